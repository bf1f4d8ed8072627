//! Transport layer errors
//!
//! All errors are recoverable: the caller is expected to retry on a later cycle.

use thiserror::Error;

/// Transport layer errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// No correlated reply arrived before the deadline.
    #[error("request to {addr} timed out after {timeout_ms}ms")]
    Timeout {
        /// Diagnostic address of the peer
        addr: String,
        /// Deadline that expired
        timeout_ms: u64,
    },

    /// The connection dropped while the request was outstanding.
    ///
    /// Caused by:
    /// - Broker restart
    /// - Link detach from the peer
    /// - Network partition
    #[error("connection to {addr} lost: {reason}")]
    Disconnected {
        /// Diagnostic address of the peer
        addr: String,
        /// Why the link went away
        reason: String,
    },

    /// A request was issued before `start()` or after `stop()`.
    #[error("client for {addr} is not started")]
    NotStarted {
        /// Diagnostic address of the peer
        addr: String,
    },

    /// The request could not be encoded for the wire.
    #[error("failed to encode request: {cause}")]
    EncodeFailed {
        /// Encoder error message
        cause: String,
    },
}

impl TransportError {
    /// Create a Timeout error
    pub fn timeout(addr: impl Into<String>, timeout_ms: u64) -> Self {
        Self::Timeout {
            addr: addr.into(),
            timeout_ms,
        }
    }

    /// Create a Disconnected error
    pub fn disconnected(addr: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Disconnected {
            addr: addr.into(),
            reason: reason.into(),
        }
    }

    /// Create a NotStarted error
    pub fn not_started(addr: impl Into<String>) -> Self {
        Self::NotStarted { addr: addr.into() }
    }

    /// Create an EncodeFailed error
    pub fn encode_failed(cause: impl Into<String>) -> Self {
        Self::EncodeFailed {
            cause: cause.into(),
        }
    }
}

/// Result type for transport operations
pub type TransportResult<T> = Result<T, TransportError>;
