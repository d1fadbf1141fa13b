pub mod error_sink;
pub mod logging;
pub mod service;
pub mod wiimote;
