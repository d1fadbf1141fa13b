//! Host-side register access for the Wii Remote
//!
//! Blocking reads and writes of the device's memory over its report
//! channel, scripted write sequences and speaker control.

pub mod domain;
pub mod error;
pub mod infrastructure;
pub mod presentation;

pub use infrastructure::error_sink::{set_error_handler, ErrorHandler};
pub use infrastructure::wiimote::{RwFlags, RwResolver, RwState, Wiimote, WiimoteError, WriteStep};
