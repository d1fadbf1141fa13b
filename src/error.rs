#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Wiimote: {0}")]
    Wiimote(#[from] crate::infrastructure::wiimote::WiimoteError),
    #[error("I/O: {0}")]
    Io(#[from] std::io::Error),
    #[error("{0}")]
    Internal(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
