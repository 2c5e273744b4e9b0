//! Client error types.

use mcp_resilience_executor::{AttemptError, RunError};
use mcp_resilience_session::{LifecycleError, LifecycleState};
use thiserror::Error;

use crate::query::QueryError;

/// Failure crossing the client boundary.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Every attempt failed.
    #[error("{operation} failed after {attempts} attempt(s): {last_error}")]
    RetryExhausted {
        operation: String,
        attempts: u32,
        #[source]
        last_error: AttemptError,
    },
    /// The client was cancelled while the call was in flight.
    #[error("{operation} cancelled")]
    Cancelled { operation: String },
    /// Called before connect completed or after the session closed.
    #[error("Client not ready (state: {0})")]
    NotReady(LifecycleState),
    #[error("Connect failed: {0}")]
    Connect(#[source] LifecycleError),
    /// Rejected before reaching the server.
    #[error("Invalid query: {0}")]
    InvalidQuery(#[from] QueryError),
}

impl ClientError {
    /// Whether the error was caused by cancellation.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
}

impl From<RunError> for ClientError {
    fn from(e: RunError) -> Self {
        match e {
            RunError::Exhausted {
                operation,
                attempts,
                last_error,
            } => Self::RetryExhausted {
                operation,
                attempts,
                last_error,
            },
            RunError::Cancelled { operation, .. } => Self::Cancelled { operation },
        }
    }
}

impl From<LifecycleError> for ClientError {
    fn from(e: LifecycleError) -> Self {
        match e {
            LifecycleError::NotReady(state) => Self::NotReady(state),
            other => Self::Connect(other),
        }
    }
}
