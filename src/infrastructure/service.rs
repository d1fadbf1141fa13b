//! Wiimote Service
//!
//! Async front end for applications running on tokio. The blocking driver
//! calls run on the blocking pool and progress is published as
//! [`AppEvent`]s.

use crate::domain::models::{AppEvent, MemoryDump, MessageSeverity, StatusMessage};
use crate::error::{Error, Result};
use crate::infrastructure::error_sink::ErrorHandler;
use crate::infrastructure::wiimote::{ControlChannel, RwFlags, Wiimote};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::info;

/// Error sink handler forwarding every report into the event channel
pub struct EventErrorHandler {
    sender: mpsc::UnboundedSender<AppEvent>,
}

impl EventErrorHandler {
    pub fn new(sender: mpsc::UnboundedSender<AppEvent>) -> Self {
        Self { sender }
    }
}

impl ErrorHandler for EventErrorHandler {
    fn report(&self, device_id: i32, message: &str) {
        let _ = self.sender.send(AppEvent::DeviceError {
            device_id,
            message: message.to_string(),
        });
    }
}

pub struct WiimoteService<C> {
    wiimote: Arc<Wiimote<C>>,
    event_sender: mpsc::UnboundedSender<AppEvent>,
}

impl<C: ControlChannel + 'static> WiimoteService<C> {
    pub fn new(wiimote: Arc<Wiimote<C>>, event_sender: mpsc::UnboundedSender<AppEvent>) -> Self {
        Self {
            wiimote,
            event_sender,
        }
    }

    pub fn wiimote(&self) -> &Arc<Wiimote<C>> {
        &self.wiimote
    }

    async fn run_blocking<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Wiimote<C>) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let wiimote = self.wiimote.clone();
        tokio::task::spawn_blocking(move || f(&wiimote))
            .await
            .map_err(|e| Error::Internal(format!("blocking task failed: {e}")))?
    }

    pub async fn read(&self, flags: RwFlags, offset: u32, len: usize) -> Result<Vec<u8>> {
        let data = self
            .run_blocking(move |wiimote| {
                let mut buf = vec![0u8; len];
                wiimote.read(flags, offset, &mut buf)?;
                Ok(buf)
            })
            .await?;

        let _ = self.event_sender.send(AppEvent::MemoryRead(MemoryDump {
            offset,
            data: data.clone(),
        }));
        Ok(data)
    }

    pub async fn write(&self, flags: RwFlags, offset: u32, data: Vec<u8>) -> Result<()> {
        let len = data.len();
        self.run_blocking(move |wiimote| Ok(wiimote.write(flags, offset, &data)?))
            .await?;
        self.send_log(
            &format!("Wrote {len} bytes at {offset:#08x}"),
            MessageSeverity::Success,
        );
        Ok(())
    }

    pub async fn beep(&self, reports: usize) -> Result<()> {
        info!(reports, "Starting beep");
        self.send_log("Beeping...", MessageSeverity::Info);
        self.run_blocking(move |wiimote| {
            Ok(wiimote.beep_with(&mut crate::infrastructure::wiimote::SleepPacer, reports)?)
        })
        .await?;
        self.send_log("Beep finished", MessageSeverity::Success);
        Ok(())
    }

    pub async fn set_rumble(&self, on: bool) -> Result<()> {
        self.run_blocking(move |wiimote| Ok(wiimote.set_rumble(on)?)).await
    }

    pub async fn set_led(&self, mask: u8) -> Result<()> {
        self.run_blocking(move |wiimote| Ok(wiimote.set_led(mask)?)).await
    }

    pub fn send_event(&self, event: AppEvent) -> bool {
        self.event_sender.send(event).is_ok()
    }

    fn send_log(&self, message: &str, severity: MessageSeverity) {
        let _ = self.event_sender.send(AppEvent::LogMessage(StatusMessage {
            message: message.to_string(),
            severity,
        }));
    }
}
