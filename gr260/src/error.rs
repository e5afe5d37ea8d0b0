//! Error types for gr260.

use std::io;
use thiserror::Error;

/// Result type for gr260 operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for gr260 operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (serial port, dump and export files).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serial port error.
    #[cfg(feature = "native")]
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// The device stopped answering a command.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// No GR260 answered the model query.
    #[error("Device not found or not a GR260")]
    DeviceNotFound,

    /// A payload block kept arriving with the wrong length.
    #[error("Block at offset {offset} still mismatched after {attempts} retransmit requests")]
    RetryExhausted {
        /// Phase offset of the block that could not be received.
        offset: usize,
        /// Number of retransmit requests that were sent.
        attempts: u32,
    },

    /// A byte range that is not a whole number of records.
    #[error("Invalid {kind} data: {len} bytes is not a whole number of records")]
    InvalidRecord {
        /// Record kind ("track" or "waypoint").
        kind: &'static str,
        /// Offending byte length.
        len: usize,
    },

    /// Malformed raw dump file.
    #[error("Invalid dump: {0}")]
    InvalidDump(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}
