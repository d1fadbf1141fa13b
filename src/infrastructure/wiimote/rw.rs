//! Register/Memory Access
//!
//! Blocking reads and writes of the device's EEPROM and register space.
//!
//! The initiator sends a request on the control channel and then sleeps on
//! a condition variable. The answer arrives on the interrupt channel, where
//! the listener thread hands it to an [`RwResolver`], which finishes the
//! pending transaction and wakes the initiator.
//!
//! ```text
//!            initiator                         listener
//!  None ──► Pending  (publish + send)
//!           Pending ──────────────────────────► Ready | Error (notify)
//!  None ◄── Ready | Error (take + reset)
//! ```
//!
//! Two locks are involved. The transaction lock (`rw_lock`) is held for a
//! whole read or write chunk and keeps transactions one at a time. The
//! slot lock only guards the state and pending record and is never held
//! across I/O, so the listener can always get in to signal.

use super::protocol::{self, RwFlags, RwReport};
use super::{ControlChannel, Wiimote, WiimoteError};
use crate::infrastructure::error_sink;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use tracing::{debug, trace, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RwState {
    #[default]
    None,
    Pending,
    Ready,
    Error,
}

/// The in-flight transaction, owned by the slot while Pending
#[derive(Debug)]
enum PendingTransaction {
    Read {
        offset: u32,
        buf: Vec<u8>,
        received: usize,
    },
    Write,
}

#[derive(Debug, Default)]
struct RwSlot {
    state: RwState,
    pending: Option<PendingTransaction>,
}

pub(super) struct RwShared {
    slot: Mutex<RwSlot>,
    cond: Condvar,
}

impl RwShared {
    pub(super) fn new() -> Self {
        Self {
            slot: Mutex::new(RwSlot::default()),
            cond: Condvar::new(),
        }
    }

    /// Lock the slot on a path that must complete regardless
    fn lock_or_recover(&self, device_id: i32) -> MutexGuard<'_, RwSlot> {
        self.slot.lock().unwrap_or_else(|poisoned| {
            error_sink::report_error(device_id, "Error locking rw state: deadlock warning");
            poisoned.into_inner()
        })
    }
}

impl<C: ControlChannel> Wiimote<C> {
    /// Current register transaction state
    pub fn rw_state(&self) -> RwState {
        self.rw.lock_or_recover(self.id).state
    }

    /// Read `out.len()` bytes starting at `offset`
    ///
    /// Blocks until the listener resolves the request (or the configured
    /// timeout passes). With [`RwFlags::DECODE`] every byte is passed
    /// through [`protocol::decode`].
    pub fn read(&self, flags: RwFlags, offset: u32, out: &mut [u8]) -> Result<(), WiimoteError> {
        let body = protocol::encode_read_request(flags, offset, out.len()).inspect_err(|e| {
            self.report_error(&format!("Error composing read request: {e}"));
        })?;

        if out.is_empty() {
            return Ok(());
        }

        let txn = self.lock_transaction()?;
        debug!(device = self.id, offset = format!("{offset:#08x}"), len = out.len(), "Starting read");

        let pending = PendingTransaction::Read {
            offset,
            buf: vec![0u8; out.len()],
            received: 0,
        };
        let result = self.transact(&txn, pending, protocol::RPT_READ_REQ, &body);
        drop(txn);

        match result {
            Ok(Some(PendingTransaction::Read { buf, .. })) => {
                out.copy_from_slice(&buf);
                if flags.contains(RwFlags::DECODE) {
                    out.iter_mut().for_each(|b| *b = protocol::decode(*b));
                }
                Ok(())
            }
            Ok(_) => {
                self.report_error("Read completed without its pending record");
                Err(WiimoteError::TransactionFailed)
            }
            Err(e) => {
                self.report_error(&format!("Error reading {} bytes at {offset:#08x}: {e}", out.len()));
                Err(e)
            }
        }
    }

    /// Write `data` starting at `offset`, one 16-byte chunk per round trip
    ///
    /// Stops at the first failed chunk. Chunks already acknowledged stay
    /// written.
    pub fn write(&self, flags: RwFlags, offset: u32, data: &[u8]) -> Result<(), WiimoteError> {
        let chunks = protocol::plan_write_chunks(offset, data).inspect_err(|e| {
            self.report_error(&format!("Error composing write request: {e}"));
        })?;

        for chunk in chunks {
            let body = protocol::encode_write_request(flags, &chunk).inspect_err(|e| {
                self.report_error(&format!("Error composing write request: {e}"));
            })?;

            let txn = self.lock_transaction()?;
            debug!(
                device = self.id,
                offset = format!("{:#08x}", chunk.offset),
                len = chunk.data.len(),
                "Writing chunk"
            );
            let result = self.transact(&txn, PendingTransaction::Write, protocol::RPT_WRITE, &body);
            drop(txn);

            if let Err(e) = result {
                self.report_error(&format!("Error writing at {:#08x}: {e}", chunk.offset));
                return Err(e);
            }
        }

        Ok(())
    }

    fn lock_transaction(&self) -> Result<MutexGuard<'_, ()>, WiimoteError> {
        self.rw_lock.lock().map_err(|_| {
            self.report_error("Error locking rw transaction lock");
            WiimoteError::LockPoisoned("rw transaction")
        })
    }

    /// One round trip: publish, send, wait, take back, reset.
    ///
    /// Taking the transaction guard proves the caller owns the slot. A slot
    /// that is not idle at that point means two transactions overlap; the
    /// request is refused before anything is sent and the slot is left alone.
    fn transact(
        &self,
        _txn: &MutexGuard<'_, ()>,
        pending: PendingTransaction,
        report_id: u8,
        body: &[u8],
    ) -> Result<Option<PendingTransaction>, WiimoteError> {
        {
            let mut slot = self
                .rw
                .slot
                .lock()
                .map_err(|_| WiimoteError::LockPoisoned("rw state"))?;
            if slot.state != RwState::None || slot.pending.is_some() {
                drop(slot);
                self.report_error("Register transaction started while another is in flight");
                return Err(WiimoteError::TransactionInFlight);
            }
            slot.pending = Some(pending);
            slot.state = RwState::Pending;
        }

        let outcome = match self.send_report(0, report_id, body) {
            Ok(()) => self.wait_for_completion(),
            Err(e) => Err(e),
        };

        let mut slot = self.rw.lock_or_recover(self.id);
        let pending = slot.pending.take();
        slot.state = RwState::None;
        drop(slot);

        outcome.map(|()| pending)
    }

    fn wait_for_completion(&self) -> Result<(), WiimoteError> {
        let slot = self
            .rw
            .slot
            .lock()
            .map_err(|_| WiimoteError::LockPoisoned("rw state"))?;

        let still_pending = |s: &mut RwSlot| s.state == RwState::Pending;
        let slot = match self.rw_timeout {
            None => self
                .rw
                .cond
                .wait_while(slot, still_pending)
                .map_err(|_| WiimoteError::LockPoisoned("rw state"))?,
            Some(timeout) => {
                let (slot, res) = self
                    .rw
                    .cond
                    .wait_timeout_while(slot, timeout, still_pending)
                    .map_err(|_| WiimoteError::LockPoisoned("rw state"))?;
                if res.timed_out() {
                    warn!(device = self.id, ?timeout, "Register transaction timed out");
                    return Err(WiimoteError::Timeout(timeout));
                }
                slot
            }
        };

        match slot.state {
            RwState::Ready => Ok(()),
            _ => Err(WiimoteError::TransactionFailed),
        }
    }
}

/// Listener-side handle that resolves the pending transaction of one device
#[derive(Clone)]
pub struct RwResolver {
    device_id: i32,
    shared: Arc<RwShared>,
}

impl RwResolver {
    pub(super) fn new(device_id: i32, shared: Arc<RwShared>) -> Self {
        Self { device_id, shared }
    }

    pub fn state(&self) -> RwState {
        self.shared.lock_or_recover(self.device_id).state
    }

    /// Feed one inbound frame; returns whether it belonged to the register
    /// protocol
    pub fn handle_report(&self, frame: &[u8]) -> bool {
        match protocol::parse_rw_report(frame) {
            Some(RwReport::ReadData { error, offset, data }) => {
                trace!(device = self.device_id, offset, len = data.len(), error, "read data rx");
                self.read_data(error, offset, data);
                true
            }
            Some(RwReport::WriteAck { report_id, error }) if report_id == protocol::RPT_WRITE => {
                trace!(device = self.device_id, error, "write ack rx");
                self.write_ack(error);
                true
            }
            Some(RwReport::WriteAck { report_id, .. }) => {
                trace!(device = self.device_id, report = report_id, "ack for non-register report");
                false
            }
            None => false,
        }
    }

    /// Append read data; the read becomes Ready once all bytes are in
    ///
    /// `offset` carries the low 16 bits of the address of the first byte in
    /// `data`. A reply that does not continue the pending read (a stale
    /// answer to an earlier request, for instance) fails it.
    pub fn read_data(&self, error: u8, offset: u16, data: &[u8]) {
        let mut slot = self.shared.lock_or_recover(self.device_id);
        let outcome = match (slot.state, slot.pending.as_mut()) {
            (RwState::Pending, Some(PendingTransaction::Read { .. })) if error != 0 => {
                Some(Err(format!("Read error reported by device ({error:#x})")))
            }
            (
                RwState::Pending,
                Some(PendingTransaction::Read {
                    offset: start,
                    buf,
                    received,
                }),
            ) => {
                let expected = start.wrapping_add(*received as u32) as u16;
                let end = *received + data.len();
                if offset != expected {
                    Some(Err(format!(
                        "Read data for {offset:#06x} while expecting {expected:#06x}"
                    )))
                } else if end > buf.len() {
                    Some(Err("Read data overflows the requested length".to_string()))
                } else {
                    buf[*received..end].copy_from_slice(data);
                    *received = end;
                    Some(Ok(end == buf.len()))
                }
            }
            _ => None,
        };

        match outcome {
            None => {
                drop(slot);
                error_sink::report_error(self.device_id, "Received unexpected read report");
            }
            Some(Ok(true)) => self.transition(slot, RwState::Ready),
            Some(Ok(false)) => {}
            Some(Err(message)) => {
                self.transition(slot, RwState::Error);
                error_sink::report_error(self.device_id, &message);
            }
        }
    }

    /// Resolve the pending write chunk
    pub fn write_ack(&self, error: u8) {
        let slot = self.shared.lock_or_recover(self.device_id);
        if slot.state != RwState::Pending || !matches!(slot.pending, Some(PendingTransaction::Write)) {
            drop(slot);
            error_sink::report_error(self.device_id, "Received unexpected write acknowledgement");
            return;
        }

        if error == 0 {
            self.transition(slot, RwState::Ready);
        } else {
            self.transition(slot, RwState::Error);
            error_sink::report_error(self.device_id, &format!("Write error reported by device ({error:#x})"));
        }
    }

    pub fn complete_write(&self) {
        self.write_ack(0);
    }

    /// Fail whatever is pending
    pub fn fail(&self) {
        let slot = self.shared.lock_or_recover(self.device_id);
        if slot.state == RwState::Pending {
            self.transition(slot, RwState::Error);
        }
    }

    fn transition(&self, mut slot: MutexGuard<'_, RwSlot>, next: RwState) {
        slot.state = next;
        drop(slot);
        self.shared.cond.notify_all();
    }
}
