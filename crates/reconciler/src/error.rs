//! Error types for the reconciler crate.

use mqop_command::TransportError;
use thiserror::Error;

use crate::entity::EntityKind;

/// Result type alias for reconciler operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Reconciler error types.
#[derive(Debug, Error)]
pub enum Error {
    /// An ensure/delete ran before a successful initialize.
    #[error("broker state not initialized")]
    NotInitialized,

    /// A desired entity shares identity with a mirrored one but differs.
    #[error("broker entity {kind} {name} was updated - updates are not supported")]
    DivergentEntity { kind: EntityKind, name: String },

    /// The broker replied without the success marker.
    #[error("{operation} failed: {value}")]
    ProtocolFailure { operation: String, value: String },

    /// The request/response round trip failed.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// A reply payload did not have the expected JSON shape.
    #[error("unexpected value from {operation}: {reason}")]
    UnexpectedValueShape { operation: String, reason: String },

    /// JSON encoding of request arguments failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid configuration.
    #[error("configuration error: {reason}")]
    Config { reason: String },

    /// I/O error while loading configuration.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create a divergent entity error.
    pub fn divergent_entity(kind: EntityKind, name: impl Into<String>) -> Self {
        Self::DivergentEntity {
            kind,
            name: name.into(),
        }
    }

    /// Create a protocol failure error.
    pub fn protocol_failure(operation: impl Into<String>, value: impl Into<String>) -> Self {
        Self::ProtocolFailure {
            operation: operation.into(),
            value: value.into(),
        }
    }

    /// Create an unexpected value shape error.
    pub fn unexpected_value(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::UnexpectedValueShape {
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    /// Create a config error.
    pub fn config_error(reason: impl Into<String>) -> Self {
        Self::Config {
            reason: reason.into(),
        }
    }

    /// Whether this error means the broker session can no longer be trusted.
    ///
    /// Only transport and protocol failures qualify; a policy conflict such as
    /// [`Error::DivergentEntity`] leaves the session intact.
    pub const fn is_connection_error(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::ProtocolFailure { .. })
    }
}
