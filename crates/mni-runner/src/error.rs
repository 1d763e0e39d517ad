//! Error types for the runner.

use mni_protocol::MniError;
use thiserror::Error;

/// Errors loading or validating a [`LinkConfig`](crate::LinkConfig).
#[derive(Debug, Error)]
pub enum ConfigError {
    /// I/O error reading the config file.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The file is not valid YAML for a link config.
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),

    /// A field holds a value the link cannot run with.
    #[error("invalid value for {field}: {reason}")]
    Invalid {
        /// Name of the offending field.
        field: &'static str,
        /// Why the value was rejected.
        reason: String,
    },

    /// The configured record size does not match what the peer sends.
    #[error("record size mismatch: configured {configured} bytes, peer sends {expected}")]
    RecordSizeMismatch {
        /// Size from the config.
        configured: usize,
        /// Size fixed by the wire layout.
        expected: usize,
    },
}

impl ConfigError {
    /// Create an invalid-value error.
    pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

/// Errors raised by the master and node drivers.
#[derive(Debug, Error)]
pub enum DriverError {
    /// The peer did not deliver a complete record within the poll budget.
    #[error("peer unresponsive after {polls} polls")]
    PeerUnresponsive {
        /// Polls spent before giving up.
        polls: u32,
    },

    /// A record arrived with the wrong opcode at offset 0.
    #[error("unexpected opcode: expected 0x{expected:02X}, got 0x{actual:02X}")]
    UnexpectedOpcode {
        /// Opcode this role expects.
        expected: u32,
        /// Opcode that arrived.
        actual: u32,
    },

    /// The credentials supplied for a request were rejected.
    #[error("access denied for user {user}")]
    AccessDenied {
        /// User that attempted the request.
        user: String,
    },

    /// A request was issued while the previous one was still outstanding.
    #[error("exchange already in progress")]
    Busy,

    /// Transport failure.
    #[error("link error: {0}")]
    Link(#[from] MniError),
}

/// Result type alias for driver operations.
pub type DriverResult<T> = Result<T, DriverError>;
