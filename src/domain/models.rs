use serde::{Deserialize, Serialize};

#[derive(Debug, Clone)]
pub enum AppEvent {
    ConnectionStatus(ConnectionStatus),
    LogMessage(StatusMessage),
    /// A message delivered through the error sink
    DeviceError { device_id: i32, message: String },
    /// Bytes returned by a completed memory read
    MemoryRead(MemoryDump),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryDump {
    pub offset: u32,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Connected,
    /// The bridge closed the interrupt channel
    Disconnected,
}

#[derive(Debug, Clone)]
pub struct StatusMessage {
    pub message: String,
    pub severity: MessageSeverity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageSeverity {
    Info,
    Success,
    Warning,
    Error,
}
