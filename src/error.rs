//! Error types for coalesce-core.
//!
//! Callers only ever observe a [`CallError`] on their own handle. Batch
//! mechanics (overload retries, weight escalation) never surface here.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error reported by the remote system for one sub-call of a batch.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("Remote error {code}: {message}")]
pub struct RemoteError {
    pub code: i64,
    pub message: String,
}

impl RemoteError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self { code, message: message.into() }
    }
}

/// Terminal outcome of a single call that did not succeed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CallError {
    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error("Batch execution failed: {0}")]
    Failed(String),

    #[error("Call cancelled")]
    Cancelled,

    #[error("Malformed batch response: no outcome for index {index}")]
    MalformedResponse { index: usize },
}

impl CallError {
    /// Returns true if the call was cancelled rather than failed.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Short label used for metrics and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Remote(_) => "remote",
            Self::Failed(_) => "failed",
            Self::Cancelled => "cancelled",
            Self::MalformedResponse { .. } => "malformed",
        }
    }
}

/// Synchronous rejection at the admission gate.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AdmissionError {
    #[error("Invalid weight {weight}: must be within 1..={capacity}")]
    InvalidWeight { weight: u32, capacity: u32 },

    #[error("Scheduler is shutting down")]
    ShuttingDown,
}
