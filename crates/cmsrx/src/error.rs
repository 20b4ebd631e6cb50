//! Error types for receiver operations.

use std::io;

/// Result type for receiver operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while running an emulated receiver.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// I/O error from socket or filesystem operations.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Configuration file could not be read or parsed.
    #[error("config error: {0}")]
    Config(String),

    /// No port configured for a receiver key.
    #[error("port not configured for receiver: {key}")]
    PortNotConfigured {
        /// The lookup key derived from the receiver name.
        key: String,
    },

    /// Per-connection reassembly buffer exceeded its limit without
    /// producing a complete frame.
    #[error("frame buffer overflow: {size} bytes buffered, limit {limit}")]
    FrameTooLarge {
        /// Bytes currently buffered.
        size: usize,
        /// Configured buffer limit.
        limit: usize,
    },

    /// Operator command could not be parsed.
    #[error("invalid command: {0}")]
    Command(String),

    /// Media payload could not be decoded or persisted.
    #[error("media error: {0}")]
    Media(String),

    /// Logger initialization or reconfiguration failed.
    #[error("logging error: {0}")]
    Logging(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = Error::PortNotConfigured {
            key: "sia-dcs".into(),
        };
        assert_eq!(err.to_string(), "port not configured for receiver: sia-dcs");

        let err = Error::FrameTooLarge {
            size: 2_000_000,
            limit: 1_048_576,
        };
        assert!(err.to_string().contains("limit 1048576"));
    }

    #[test]
    fn test_io_conversion() {
        let err = Error::from(io::Error::from(io::ErrorKind::ConnectionReset));
        assert!(err.to_string().starts_with("I/O error:"));
    }
}
