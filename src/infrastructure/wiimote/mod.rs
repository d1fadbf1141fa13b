//! Wii Remote Module
//!
//! Register access and speaker control for a connected Wii Remote.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                        Wiimote<C>                         │
//! │  (device handle - control channel, rumble bit, rw state)  │
//! └───────┬───────────────┬────────────────┬─────────────────┘
//!         │               │                │
//!         ▼               ▼                ▼
//! ┌─────────────┐  ┌─────────────┐  ┌─────────────┐
//! │  Transport  │◄─│     RW      │◄─│  Sequence   │◄── Speaker
//! │             │  │             │  │             │
//! │ - framing   │  │ - read      │  │ - raw       │
//! │ - handshake │  │ - write     │  │   reports   │
//! │             │  │ - resolver  │  │ - mem write │
//! └─────────────┘  └──────▲──────┘  └─────────────┘
//!                         │
//!                  listener thread
//!                (interrupt channel)
//! ```
//!
//! ## Modules
//!
//! - [`protocol`] - report ids, frame layouts and pure encoders
//! - [`transport`] - outgoing reports and handshake verification
//! - [`rw`] - blocking register reads/writes and the listener-side resolver
//! - [`sequence`] - scripted write sequences
//! - [`speaker`] - speaker enable/disable and the beep stream
//! - [`bridge`] - local-socket channels exported by a Bluetooth bridge

pub mod bridge;
pub mod protocol;
pub mod rw;
pub mod sequence;
pub mod speaker;
pub mod transport;

pub use protocol::RwFlags;
pub use rw::{RwResolver, RwState};
pub use sequence::WriteStep;
pub use speaker::{Pacer, SleepPacer};

use crate::infrastructure::error_sink;
use rw::RwShared;
use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum WiimoteError {
    #[error("Report payload too large: {0} bytes (max 21)")]
    PayloadTooLarge(usize),
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    #[error("Short write: {written} of {expected} bytes")]
    ShortWrite { written: usize, expected: usize },
    #[error("Channel I/O: {0}")]
    Io(#[from] io::Error),
    #[error("Handshake expected, non-handshake received ({0:#04x})")]
    NotHandshake(u8),
    #[error("Non-successful handshake ({0:#04x})")]
    HandshakeFailed(u8),
    #[error("Device reported a failed transaction")]
    TransactionFailed,
    #[error("Another register transaction is in flight")]
    TransactionInFlight,
    #[error("Transaction timed out after {0:?}")]
    Timeout(Duration),
    #[error("Lock poisoned: {0}")]
    LockPoisoned(&'static str),
}

/// Control channel of a connected device
///
/// Every outgoing report is written here and answered by exactly one
/// handshake byte read back from the same channel.
pub trait ControlChannel: Read + Write + Send {}

impl<T: Read + Write + Send> ControlChannel for T {}

/// Handle to one connected Wii Remote
pub struct Wiimote<C> {
    id: i32,
    channel: Mutex<C>,
    /// LED mask in the high nibble, rumble in bit 0
    led_rumble: AtomicU8,
    /// Held for the whole of one read or one write chunk
    rw_lock: Mutex<()>,
    rw: Arc<RwShared>,
    rw_timeout: Option<Duration>,
}

impl<C: ControlChannel> Wiimote<C> {
    pub fn new(id: i32, channel: C) -> Self {
        Self {
            id,
            channel: Mutex::new(channel),
            led_rumble: AtomicU8::new(0),
            rw_lock: Mutex::new(()),
            rw: Arc::new(RwShared::new()),
            rw_timeout: None,
        }
    }

    /// Bound the wait for each register transaction.
    ///
    /// `None` (the default) waits forever, so a device that stops answering
    /// hangs the caller.
    pub fn with_rw_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.rw_timeout = timeout;
        self
    }

    pub fn id(&self) -> i32 {
        self.id
    }

    pub fn rumble(&self) -> bool {
        self.led_rumble.load(Ordering::Acquire) & 0x01 != 0
    }

    pub fn led(&self) -> u8 {
        self.led_rumble.load(Ordering::Acquire) >> 4
    }

    /// Handle for the listener thread that resolves pending transactions
    pub fn resolver(&self) -> RwResolver {
        RwResolver::new(self.id, self.rw.clone())
    }

    /// Switch the rumble motor and remember the state for later reports
    ///
    /// The stored bit only changes once the device accepted the report.
    pub fn set_rumble(&self, on: bool) -> Result<(), WiimoteError> {
        tracing::debug!(device = self.id, rumble = on, "Setting rumble");
        self.send_report(protocol::send_flags::NO_RUMBLE, protocol::RPT_RUMBLE, &[on as u8])?;
        if on {
            self.led_rumble.fetch_or(0x01, Ordering::AcqRel);
        } else {
            self.led_rumble.fetch_and(!0x01, Ordering::AcqRel);
        }
        Ok(())
    }

    /// Light the LEDs in the low four bits of `mask`
    pub fn set_led(&self, mask: u8) -> Result<(), WiimoteError> {
        let led = (mask & 0x0F) << 4;
        tracing::debug!(device = self.id, led = mask & 0x0F, "Setting LEDs");
        self.send_report(
            protocol::send_flags::NO_RUMBLE,
            protocol::RPT_LED_RUMBLE,
            &[led | self.rumble() as u8],
        )?;
        let _ = self
            .led_rumble
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |s| Some((s & 0x0F) | led));
        Ok(())
    }

    fn report_error(&self, message: &str) {
        error_sink::report_error(self.id, message);
    }
}
