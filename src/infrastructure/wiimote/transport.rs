//! Report Transport
//!
//! Writes framed output reports to the control channel and checks the
//! handshake byte the channel answers each of them with.

use super::protocol::{self, Handshake};
use super::{ControlChannel, Wiimote, WiimoteError};
use std::io::{Read, Write};
use tracing::trace;

impl<C: ControlChannel> Wiimote<C> {
    /// Send one output report and wait for its handshake
    ///
    /// Payloads longer than [`protocol::MAX_REPORT_PAYLOAD`] are rejected
    /// before anything is written.
    pub fn send_report(&self, flags: u8, report_id: u8, payload: &[u8]) -> Result<(), WiimoteError> {
        let frame = match protocol::encode_report(flags, report_id, payload, self.rumble()) {
            Ok(frame) => frame,
            Err(e) => {
                self.report_error(&format!("Error sending report {report_id:#04x}: {e}"));
                return Err(e);
            }
        };

        // The channel stays locked until the handshake is in, so no other
        // report can slip in between.
        let mut channel = self
            .channel
            .lock()
            .map_err(|_| WiimoteError::LockPoisoned("control channel"))?;

        match channel.write(&frame) {
            Ok(n) if n == frame.len() => {}
            Ok(n) => {
                self.report_error(&format!(
                    "Error writing report {report_id:#04x}: wrote {n} of {} bytes",
                    frame.len()
                ));
                return Err(WiimoteError::ShortWrite {
                    written: n,
                    expected: frame.len(),
                });
            }
            Err(e) => {
                self.report_error(&format!("Error writing report {report_id:#04x}: {e}"));
                return Err(e.into());
            }
        }
        trace!(device = self.id, report = format!("{report_id:#04x}"), len = frame.len(), "report tx");

        self.handshake_on(&mut *channel)
    }

    /// Read and check one handshake byte
    pub fn verify_handshake(&self) -> Result<(), WiimoteError> {
        let mut channel = self
            .channel
            .lock()
            .map_err(|_| WiimoteError::LockPoisoned("control channel"))?;
        self.handshake_on(&mut *channel)
    }

    fn handshake_on(&self, channel: &mut C) -> Result<(), WiimoteError> {
        let mut byte = [0u8; 1];
        if let Err(e) = channel.read_exact(&mut byte) {
            self.report_error("Error on read handshake");
            return Err(e.into());
        }

        match protocol::classify_handshake(byte[0]) {
            Handshake::Successful => Ok(()),
            Handshake::NotHandshake(b) => {
                self.report_error("Handshake expected, non-handshake received");
                Err(WiimoteError::NotHandshake(b))
            }
            Handshake::Failed(b) => {
                self.report_error("Non-successful handshake");
                Err(WiimoteError::HandshakeFailed(b))
            }
        }
    }
}
