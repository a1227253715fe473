//! Pending call type held by the ledger, and the caller-side handle.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use serde_json::Value;
use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::error::CallError;

/// Opaque argument set for a call. Never interpreted by the scheduler.
pub type CallArgs = serde_json::Map<String, Value>;

/// Result delivered to a caller.
pub type CallResult = Result<Value, CallError>;

/// Sending half of a call's single-assignment outcome slot.
pub type OutcomeTx = oneshot::Sender<CallResult>;

/// A call admitted into the ledger and awaiting a batch.
///
/// The outcome slot is consumed by [`PendingRequest::resolve`], so a request
/// can be resolved at most once. Dropping an unresolved request closes the
/// slot, which the handle reports as [`CallError::Cancelled`].
pub struct PendingRequest {
    pub id: u64,
    pub name: String,
    pub arguments: CallArgs,
    pub weight: u32,
    pub admitted_at: Instant,
    outcome_tx: OutcomeTx,
}

impl std::fmt::Debug for PendingRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingRequest")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("weight", &self.weight)
            .field("resolved", &self.outcome_tx.is_closed())
            .finish()
    }
}

impl PendingRequest {
    /// Create a request together with the handle its caller will await.
    pub fn new(id: u64, name: String, arguments: CallArgs, weight: u32) -> (Self, CallHandle) {
        let (tx, rx) = oneshot::channel();
        let request = Self {
            id,
            name,
            arguments,
            weight,
            admitted_at: Instant::now(),
            outcome_tx: tx,
        };
        (request, CallHandle { id, rx })
    }

    /// Deliver the outcome. Returns false if the caller stopped listening.
    pub fn resolve(self, result: CallResult) -> bool {
        self.outcome_tx.send(result).is_ok()
    }

    pub fn succeed(self, value: Value) -> bool {
        self.resolve(Ok(value))
    }

    pub fn fail(self, error: CallError) -> bool {
        self.resolve(Err(error))
    }

    pub fn cancel(self) -> bool {
        self.resolve(Err(CallError::Cancelled))
    }

    /// True when the caller dropped its handle.
    pub fn is_abandoned(&self) -> bool {
        self.outcome_tx.is_closed()
    }

    /// New ledger entry for the same logical call with weight raised by one.
    ///
    /// Weight never exceeds `capacity`; the admission time restarts so the
    /// escalated retry waits out a fresh quiet window.
    pub fn escalate(self, capacity: u32) -> Self {
        let weight = (self.weight + 1).min(capacity);
        Self { weight, admitted_at: Instant::now(), ..self }
    }
}

/// Caller-side handle resolving to the call's single outcome.
///
/// Implements [`Future`]; blocking callers can use [`CallHandle::wait_blocking`].
#[derive(Debug)]
pub struct CallHandle {
    id: u64,
    rx: oneshot::Receiver<CallResult>,
}

impl CallHandle {
    /// Outcome slot for a call that bypasses the ledger.
    pub(crate) fn channel(id: u64) -> (OutcomeTx, Self) {
        let (tx, rx) = oneshot::channel();
        (tx, Self { id, rx })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Take the outcome without waiting.
    ///
    /// Consumes the handle once the outcome is known, so it can be observed
    /// only once. While the call is pending the handle is given back.
    pub fn try_outcome(mut self) -> Result<CallResult, Self> {
        match self.rx.try_recv() {
            Ok(result) => Ok(result),
            Err(oneshot::error::TryRecvError::Empty) => Err(self),
            // Sender dropped without sending.
            Err(oneshot::error::TryRecvError::Closed) => Ok(Err(CallError::Cancelled)),
        }
    }

    /// Block the current thread until the outcome is known.
    ///
    /// Must not be called from inside an async task.
    pub fn wait_blocking(self) -> CallResult {
        self.rx.blocking_recv().unwrap_or(Err(CallError::Cancelled))
    }
}

impl Future for CallHandle {
    type Output = CallResult;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(CallError::Cancelled)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request(weight: u32) -> (PendingRequest, CallHandle) {
        PendingRequest::new(1, "users.get".into(), CallArgs::new(), weight)
    }

    #[tokio::test]
    async fn resolve_delivers_value_to_handle() {
        let (req, handle) = request(1);
        assert!(req.succeed(json!({"ok": true})));
        assert_eq!(handle.await.unwrap(), json!({"ok": true}));
    }

    #[tokio::test]
    async fn dropped_request_reports_cancelled() {
        let (req, handle) = request(1);
        drop(req);
        assert_eq!(handle.await, Err(CallError::Cancelled));
    }

    #[test]
    fn try_outcome_returns_handle_while_pending() {
        let (req, handle) = request(1);
        let handle = handle.try_outcome().unwrap_err();
        req.fail(CallError::Failed("boom".into()));
        assert_eq!(handle.try_outcome().unwrap(), Err(CallError::Failed("boom".into())));
    }

    #[test]
    fn try_outcome_yields_success_exactly_once() {
        let (req, handle) = request(1);
        let handle = handle.try_outcome().unwrap_err();
        assert!(req.succeed(json!(42)));
        assert_eq!(handle.try_outcome().unwrap(), Ok(json!(42)));
    }

    #[test]
    fn try_outcome_reports_cancelled_only_when_request_dropped() {
        let (req, handle) = request(1);
        drop(req);
        assert_eq!(handle.try_outcome().unwrap(), Err(CallError::Cancelled));
    }

    #[test]
    fn escalate_caps_at_capacity() {
        let (req, _h) = request(3);
        let req = req.escalate(4);
        assert_eq!(req.weight, 4);
        let req = req.escalate(4);
        assert_eq!(req.weight, 4);
    }

    #[test]
    fn abandoned_when_handle_dropped() {
        let (req, handle) = request(1);
        assert!(!req.is_abandoned());
        drop(handle);
        assert!(req.is_abandoned());
    }
}
