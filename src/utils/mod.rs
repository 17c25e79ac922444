//! Logging setup shared by the library and the command-line tool

mod logging;

pub use logging::{setup_logging, LogConfig};
