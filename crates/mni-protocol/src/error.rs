//! Error types for the MNI link.

use thiserror::Error;

/// Errors raised by the transport layer.
///
/// The codec and role adapters have no recoverable protocol errors; the only
/// failures are configuring the endpoint and OS-level I/O on it.
#[derive(Debug, Error)]
pub enum MniError {
    /// The serial endpoint could not be opened or configured.
    #[error("failed to open {endpoint}: {reason}")]
    Open {
        /// Endpoint name (e.g. `/dev/ttyUSB0`).
        endpoint: String,
        /// Description of the failure.
        reason: String,
    },

    /// A baud rate of zero was requested.
    #[error("invalid baud rate: {0}")]
    InvalidBaudRate(u32),

    /// I/O failure on an open endpoint.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl MniError {
    /// Create an open error for the given endpoint.
    pub fn open(endpoint: impl Into<String>, reason: impl Into<String>) -> Self {
        MniError::Open {
            endpoint: endpoint.into(),
            reason: reason.into(),
        }
    }
}

/// Result type alias for MNI operations.
pub type MniResult<T> = Result<T, MniError>;
