//! Tagged result of one batch-execute invocation.

use serde_json::Value;

use crate::error::RemoteError;

/// Per-index entry of a partially failed batch.
#[derive(Debug, Clone, PartialEq)]
pub enum Slot {
    Ok(Value),
    /// Failure marker; the matching error is the next unused entry of the
    /// batch's ordered error list.
    Failed,
}

/// Everything a batch-execute call can report back.
#[derive(Debug, Clone, PartialEq)]
pub enum BatchOutcome {
    /// One result per batch index, in index order.
    Success(Vec<Value>),
    /// Some sub-calls failed; `errors` lines up with the `Failed` slots in order.
    PartialFailure { slots: Vec<Slot>, errors: Vec<RemoteError> },
    /// Combined response would exceed the remote size ceiling.
    Oversized,
    /// Remote is temporarily rejecting batch invocations.
    Overload,
    /// Dispatch was abandoned because of shutdown.
    Cancelled,
    /// Any other failure of the invocation as a whole.
    Unclassified(String),
}

impl BatchOutcome {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Success(_) => "success",
            Self::PartialFailure { .. } => "partial_failure",
            Self::Oversized => "oversized",
            Self::Overload => "overload",
            Self::Cancelled => "cancelled",
            Self::Unclassified(_) => "unclassified",
        }
    }
}
