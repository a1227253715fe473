//! Recovery policy.
//!
//! Classifies a batch outcome and settles every call of the batch: deliver
//! results, put calls back into the ledger, or resolve them as failed or
//! cancelled. No call leaves this module unresolved or duplicated.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::demux::{self, DeliveryReport};
use super::ledger::Ledger;
use super::outcome::BatchOutcome;
use super::request::PendingRequest;
use crate::error::CallError;

/// What the policy does with a batch, given its outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryAction {
    /// Hand results (and per-call errors) to the callers.
    Deliver,
    /// Re-admit every call as-is.
    RetryUnchanged,
    /// Re-admit every call one weight heavier, after a fresh quiet window.
    RetryEscalated,
    CancelAll,
    FailAll,
}

pub fn classify(outcome: &BatchOutcome) -> RecoveryAction {
    match outcome {
        BatchOutcome::Success(_) | BatchOutcome::PartialFailure { .. } => RecoveryAction::Deliver,
        BatchOutcome::Overload => RecoveryAction::RetryUnchanged,
        BatchOutcome::Oversized => RecoveryAction::RetryEscalated,
        BatchOutcome::Cancelled => RecoveryAction::CancelAll,
        BatchOutcome::Unclassified(_) => RecoveryAction::FailAll,
    }
}

/// How a batch was settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    Delivered(DeliveryReport),
    Requeued { count: usize },
    Escalated { count: usize },
    Cancelled { count: usize },
    Failed { count: usize },
}

/// Applies [`RecoveryAction`]s against the shared ledger.
pub struct RecoveryPolicy {
    ledger: Arc<Ledger>,
    overload_backoff: Duration,
    shutdown: CancellationToken,
}

impl RecoveryPolicy {
    pub fn new(ledger: Arc<Ledger>, overload_backoff: Duration, shutdown: CancellationToken) -> Self {
        Self { ledger, overload_backoff, shutdown }
    }

    /// Settle every call of a batch according to its outcome.
    ///
    /// Retries requested after shutdown has begun resolve as cancelled.
    pub async fn settle(&self, requests: Vec<PendingRequest>, outcome: BatchOutcome) -> Settlement {
        let action = classify(&outcome);
        tracing::debug!(?action, kind = outcome.kind(), calls = requests.len(), "settling batch");

        match outcome {
            BatchOutcome::Success(results) => {
                Settlement::Delivered(demux::deliver_success(requests, results))
            }
            BatchOutcome::PartialFailure { slots, errors } => {
                Settlement::Delivered(demux::deliver_partial(requests, slots, errors))
            }
            BatchOutcome::Overload => self.retry_unchanged(requests).await,
            BatchOutcome::Oversized => self.retry_escalated(requests),
            BatchOutcome::Cancelled => cancel_all(requests),
            BatchOutcome::Unclassified(message) => fail_all(requests, &message),
        }
    }

    async fn retry_unchanged(&self, requests: Vec<PendingRequest>) -> Settlement {
        if !self.overload_backoff.is_zero() {
            let pause = jittered(self.overload_backoff);
            tokio::select! {
                biased;
                () = self.shutdown.cancelled() => {}
                () = tokio::time::sleep(pause) => {}
            }
        }
        if self.shutdown.is_cancelled() {
            return cancel_all(requests);
        }
        let count = requests.len();
        tracing::info!(count, "remote overloaded, returning calls to the ledger");
        self.ledger.requeue_front(requests);
        Settlement::Requeued { count }
    }

    fn retry_escalated(&self, requests: Vec<PendingRequest>) -> Settlement {
        if self.shutdown.is_cancelled() {
            return cancel_all(requests);
        }
        let count = requests.len();
        let capacity = self.ledger.capacity();
        for request in requests {
            let request = request.escalate(capacity);
            tracing::warn!(
                id = request.id,
                method = %request.name,
                weight = request.weight,
                "response too large, retrying with higher weight"
            );
            self.ledger.readmit(request);
        }
        self.ledger.advance_last_admitted(Instant::now());
        Settlement::Escalated { count }
    }
}

fn cancel_all(requests: Vec<PendingRequest>) -> Settlement {
    let count = requests.len();
    for request in requests {
        request.cancel();
    }
    Settlement::Cancelled { count }
}

fn fail_all(requests: Vec<PendingRequest>, message: &str) -> Settlement {
    let count = requests.len();
    for request in requests {
        request.fail(CallError::Failed(message.to_string()));
    }
    Settlement::Failed { count }
}

/// Base pause plus up to 25% random jitter.
fn jittered(base: Duration) -> Duration {
    let max_jitter = (base.as_millis() / 4) as u64;
    let jitter = rand::thread_rng().gen_range(0..=max_jitter);
    base + Duration::from_millis(jitter)
}
