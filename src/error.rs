//! Error taxonomy for the sync engine.
//!
//! Network-origin failures (`Transport`, `Server`, `Decoding`, `CircuitOpen`)
//! are recovered at the push/pull call site and never roll back local state.
//! `Validation` is raised before anything is written.

use thiserror::Error;
use uuid::Uuid;

use crate::storage::traits::StorageError;

#[derive(Error, Debug)]
pub enum SyncError {
    /// Remote unreachable, connection reset, or timed out
    #[error("transport error: {0}")]
    Transport(String),

    /// Remote answered with a non-2xx status
    #[error("server error {status}: {message}")]
    Server { status: u16, message: String },

    /// Remote answered 2xx with a body we could not decode
    #[error("decoding error: {0}")]
    Decoding(String),

    /// Locally rejected input (empty name, non-positive target)
    #[error("validation error: {0}")]
    Validation(String),

    #[error("goal not found: {0}")]
    NotFound(Uuid),

    /// The circuit breaker for the named remote is open
    #[error("circuit breaker open for '{0}', request rejected")]
    CircuitOpen(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl SyncError {
    /// Whether retrying the same request later can succeed.
    ///
    /// Transport failures, an open circuit, and 408/429/5xx responses are
    /// transient. Every other error is permanent for the request that caused it.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(_) | Self::CircuitOpen(_) => true,
            Self::Server { status, .. } => *status == 408 || *status == 429 || *status >= 500,
            _ => false,
        }
    }

    /// Short label used for metrics and events.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Transport(_) => "transport",
            Self::Server { .. } => "server",
            Self::Decoding(_) => "decoding",
            Self::Validation(_) => "validation",
            Self::NotFound(_) => "not_found",
            Self::CircuitOpen(_) => "circuit_open",
            Self::Config(_) => "config",
            Self::Storage(_) => "storage",
        }
    }

    pub(crate) fn is_not_found_status(&self) -> bool {
        matches!(self, Self::Server { status: 404, .. })
    }

    pub(crate) fn is_conflict_status(&self) -> bool {
        matches!(self, Self::Server { status: 409, .. })
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::Decoding(err.to_string())
        } else if let Some(status) = err.status() {
            Self::Server {
                status: status.as_u16(),
                message: err.to_string(),
            }
        } else {
            Self::Transport(err.to_string())
        }
    }
}
