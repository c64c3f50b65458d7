//! Common utilities and types shared across statuscheck components.

pub mod error;
pub mod logging;

pub use error::{Error, ErrorKind, Result};
pub use logging::LogFormat;
