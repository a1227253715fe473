//! Batch dispatcher: one executor invocation per batch.

use std::sync::Arc;

use tokio::time::Instant;
use tracing::Instrument;

use super::batch::Batch;
use super::recovery::{RecoveryPolicy, Settlement};
use crate::executor::{BatchExecutor, ExecuteProgram};
use crate::telemetry::{self, BatchSpan, RetryReason, SpanExt};

/// Sends batches to an executor and hands outcomes to the recovery policy.
pub struct Dispatcher {
    recovery: RecoveryPolicy,
}

impl Dispatcher {
    pub fn new(recovery: RecoveryPolicy) -> Self {
        Self { recovery }
    }

    /// Invoke `executor` exactly once for `batch` and settle every member.
    ///
    /// An empty batch is a no-op and returns `None`.
    pub async fn dispatch(&self, executor: Arc<dyn BatchExecutor>, batch: Batch) -> Option<Settlement> {
        if batch.is_empty() {
            return None;
        }
        let span = BatchSpan::new(&batch.id(), batch.len(), batch.total_weight());
        span.record("executor", executor.label());
        let recorder = span.clone();

        async move {
            let program = ExecuteProgram::from_batch(&batch);
            if tracing::enabled!(tracing::Level::TRACE) {
                for call in program.calls() {
                    tracing::trace!(
                        index = call.index,
                        method = %call.name,
                        args = %telemetry::redact_arguments(&call.arguments),
                        "batch member"
                    );
                }
            }

            let started = Instant::now();
            let outcome = executor.execute(&program).await;
            let latency = started.elapsed();
            recorder.record_outcome(&outcome, latency);
            telemetry::record_batch_dispatched(batch.total_weight(), latency);
            tracing::debug!(kind = outcome.kind(), latency_ms = latency.as_millis() as u64, "batch returned");

            let settlement = self.recovery.settle(batch.into_requests(), outcome).await;
            match settlement {
                Settlement::Delivered(report) => telemetry::record_calls_failed(report.failed),
                Settlement::Requeued { count } => telemetry::record_retry(RetryReason::Overload, count),
                Settlement::Escalated { count } => {
                    telemetry::record_retry(RetryReason::Oversized, count)
                }
                Settlement::Failed { count } => telemetry::record_calls_failed(count),
                Settlement::Cancelled { .. } => {}
            }
            Some(settlement)
        }
        .instrument(span)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::{LoopbackConfig, LoopbackExecutor};
    use crate::scheduler::demux::DeliveryReport;
    use crate::scheduler::ledger::{Ledger, PackingStrategy};
    use crate::scheduler::request::{CallArgs, PendingRequest};
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    fn dispatcher(ledger: &Arc<Ledger>) -> Dispatcher {
        Dispatcher::new(RecoveryPolicy::new(
            Arc::clone(ledger),
            Duration::ZERO,
            CancellationToken::new(),
        ))
    }

    #[tokio::test]
    async fn empty_batch_never_reaches_executor() {
        let ledger = Arc::new(Ledger::new(5, PackingStrategy::WeightClass));
        let exec = Arc::new(LoopbackExecutor::new(LoopbackConfig::default()));

        let settled = dispatcher(&ledger).dispatch(exec.clone(), Batch::new(5)).await;

        assert!(settled.is_none());
        assert_eq!(exec.batches(), 0);
    }

    #[tokio::test]
    async fn batch_is_executed_once_and_delivered() {
        let ledger = Arc::new(Ledger::new(5, PackingStrategy::WeightClass));
        let exec = Arc::new(LoopbackExecutor::new(LoopbackConfig::default()));
        let mut batch = Batch::new(5);
        let mut handles = Vec::new();
        for name in ["users.get", "wall.get"] {
            let (req, handle) = PendingRequest::new(ledger.next_id(), name.into(), CallArgs::new(), 2);
            batch.push(req);
            handles.push(handle);
        }

        let settled = dispatcher(&ledger).dispatch(exec.clone(), batch).await;

        assert_eq!(settled, Some(Settlement::Delivered(DeliveryReport { succeeded: 2, failed: 0 })));
        assert_eq!(exec.batches(), 1);
        assert_eq!(handles.remove(1).await.unwrap()["method"], "wall.get");
        assert_eq!(handles.remove(0).await.unwrap()["method"], "users.get");
    }
}
