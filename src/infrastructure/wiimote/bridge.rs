//! Bluetooth Bridge Channels
//!
//! The L2CAP control and interrupt channels of a connected Wii Remote are
//! exported by a bridge process as two local sockets. The control socket is
//! a plain byte stream (reports out, handshakes in). Every frame on the
//! interrupt socket is preceded by a one-byte length.

use super::rw::RwResolver;
use super::{Wiimote, WiimoteError};
use crate::domain::settings::BridgeSettings;
use interprocess::local_socket::{traits::Stream, GenericFilePath, Stream as LocalStream, ToFsName};
use std::io::{self, Read};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, info, trace};

/// A connected device plus the thread listening on its interrupt channel
pub struct BridgeConnection {
    pub wiimote: Arc<Wiimote<LocalStream>>,
    pub listener: JoinHandle<io::Result<()>>,
}

fn connect_stream(path: &str) -> io::Result<LocalStream> {
    let name = path.to_fs_name::<GenericFilePath>()?;
    LocalStream::connect(name)
}

/// Open both channels and start the listener thread
pub fn connect(
    id: i32,
    settings: &BridgeSettings,
    rw_timeout: Option<Duration>,
) -> Result<BridgeConnection, WiimoteError> {
    info!(
        control = %settings.control_socket,
        interrupt = %settings.interrupt_socket,
        "Connecting to bridge"
    );
    let control = connect_stream(&settings.control_socket)?;
    let interrupt = connect_stream(&settings.interrupt_socket)?;

    let wiimote = Arc::new(Wiimote::new(id, control).with_rw_timeout(rw_timeout));
    let resolver = wiimote.resolver();
    let listener = std::thread::Builder::new()
        .name(format!("wiimote-{id}-listener"))
        .spawn(move || run_listener(interrupt, resolver))?;

    Ok(BridgeConnection { wiimote, listener })
}

/// Read length-prefixed frames until the channel closes
///
/// Register protocol reports go to `resolver`; everything else is dropped.
/// When the channel closes, a transaction still pending is failed.
pub fn run_listener<R: Read>(mut interrupt: R, resolver: RwResolver) -> io::Result<()> {
    let mut frame = [0u8; u8::MAX as usize];
    let result = loop {
        let mut len = [0u8; 1];
        match interrupt.read_exact(&mut len) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break Ok(()),
            Err(e) => break Err(e),
        }

        let len = len[0] as usize;
        if let Err(e) = interrupt.read_exact(&mut frame[..len]) {
            break Err(e);
        }

        if !resolver.handle_report(&frame[..len]) {
            trace!(len, "non-register report ignored");
        }
    };

    debug!("Interrupt channel closed");
    resolver.fail();
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::wiimote::protocol::{INPUT_REPORT_HEADER, RPT_WRITE, RPT_WRITE_ACK};
    use crate::infrastructure::wiimote::RwState;
    use std::io::Cursor;

    #[test]
    fn test_listener_stops_at_eof() {
        let wiimote = Wiimote::new(3, Cursor::new(Vec::<u8>::new()));
        let mut stream = vec![4u8, INPUT_REPORT_HEADER, 0x30, 0x00, 0x00];
        stream.extend_from_slice(&[6, INPUT_REPORT_HEADER, RPT_WRITE_ACK, 0, 0, RPT_WRITE, 0]);

        // Nothing is pending, so the ack is reported as unexpected and dropped.
        run_listener(Cursor::new(stream), wiimote.resolver()).unwrap();
        assert_eq!(wiimote.rw_state(), RwState::None);
    }

    #[test]
    fn test_listener_truncated_frame() {
        let wiimote = Wiimote::new(3, Cursor::new(Vec::<u8>::new()));
        let res = run_listener(Cursor::new(vec![10u8, INPUT_REPORT_HEADER]), wiimote.resolver());
        assert!(res.is_err());
    }
}
