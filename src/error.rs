//! # Error Types
//!
//! Custom error types for the telemetry relay using `thiserror`.
//!
//! Framing, transport and capacity problems are recovered where they occur
//! (resync, backoff, eviction). The variants here are what is left over:
//! startup failures and the errors that drive state transitions.

use thiserror::Error;

/// Main error type for the relay
#[derive(Debug, Error)]
pub enum RelayError {
    /// Invalid configuration value
    #[error("Configuration error: {0}")]
    Config(String),

    /// TOML parsing errors
    #[error("Configuration parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serial device errors
    #[error("Serial error: {0}")]
    Serial(String),

    /// None of the candidate serial devices could be opened
    #[error("No telemetry device found (tried: {0})")]
    SerialPortNotFound(String),

    /// MAVLink framing errors
    #[error("MAVLink protocol error: {0}")]
    Protocol(String),

    /// Relay wire protocol errors
    #[error("Wire protocol error: {0}")]
    Wire(String),

    /// Send attempted while the transport has no live connection
    #[error("Transport not connected")]
    NotConnected,

    /// A pipeline queue was closed by its peer task
    #[error("Channel closed: {0}")]
    ChannelClosed(&'static str),

    /// A downstream sink failed to accept a frame
    #[error("Sink '{name}' failed: {reason}")]
    Sink { name: String, reason: String },
}

impl RelayError {
    /// Shorthand for a configuration validation failure
    pub fn config(msg: impl Into<String>) -> Self {
        RelayError::Config(msg.into())
    }
}

/// Result type alias for the relay
pub type Result<T> = std::result::Result<T, RelayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sink_error_message() {
        let err = RelayError::Sink {
            name: "qgc".to_string(),
            reason: "connection refused".to_string(),
        };
        assert_eq!(err.to_string(), "Sink 'qgc' failed: connection refused");
    }
}
