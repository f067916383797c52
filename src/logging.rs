//! Logging helpers.
//!
//! The library logs through the `log` facade; binaries and tests pick a
//! backend. [`init_logger`] wires up `env_logger`, so `RUST_LOG=debug`
//! (or `trace` for full frame dumps) controls verbosity.

use log::{debug, error, info, warn};

/// Initializes the logger with the `env_logger` crate.
pub fn init_logger() {
    env_logger::init();
}

/// Logs an error message.
pub fn log_error(message: &str) {
    error!("{message}");
}

/// Logs a warning message.
pub fn log_warn(message: &str) {
    warn!("{message}");
}

/// Logs an informational message.
pub fn log_info(message: &str) {
    info!("{message}");
}

/// Logs a debug message.
pub fn log_debug(message: &str) {
    debug!("{message}");
}
