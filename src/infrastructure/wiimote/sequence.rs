//! Write Sequences
//!
//! Compound device operations expressed as an ordered script of raw reports
//! and memory writes.

use super::protocol::RwFlags;
use super::{ControlChannel, Wiimote, WiimoteError};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteStep<'a> {
    /// Output report, acknowledged by the handshake only
    RawReport {
        report_id: u8,
        flags: u8,
        payload: &'a [u8],
    },
    /// Register/EEPROM write through the rw coordinator
    MemoryWrite {
        offset: u32,
        payload: &'a [u8],
        flags: RwFlags,
    },
}

impl<C: ControlChannel> Wiimote<C> {
    /// Run `steps` in order, stopping at the first failure
    ///
    /// Steps that already ran are not undone.
    pub fn execute(&self, steps: &[WriteStep<'_>]) -> Result<(), WiimoteError> {
        for (index, step) in steps.iter().enumerate() {
            debug!(device = self.id, step = index, ?step, "Executing write step");
            match *step {
                WriteStep::RawReport {
                    report_id,
                    flags,
                    payload,
                } => self.send_report(flags, report_id, payload)?,
                WriteStep::MemoryWrite {
                    offset,
                    payload,
                    flags,
                } => self.write(flags, offset, payload)?,
            }
        }
        Ok(())
    }
}
