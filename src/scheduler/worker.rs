//! Scheduler loop: decide when to cut a batch and send it off.
//!
//! One task ticks every `check_delay`. Dispatches run on their own tasks so a
//! slow executor never delays the next tick; their handles are reaped once
//! finished and returned to the caller when the loop stops.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::dispatcher::Dispatcher;
use super::ledger::Ledger;
use super::packer::pack;
use crate::config::TimingConfig;
use crate::executor::ExecutorPool;
use crate::shutdown::ShutdownCoordinator;
use crate::telemetry;

/// Why a tick decided to flush.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushReason {
    /// Pending weight reached the batch capacity.
    Full,
    /// A caller asked for a flush.
    Manual,
    /// Nothing was admitted for longer than the quiet window.
    Quiet,
    /// The oldest pending call waited longer than the wait ceiling.
    Ceiling,
}

/// Evaluate the flush condition at `now`.
///
/// The manual flag is consumed only when it causes the flush.
pub fn flush_due(
    ledger: &Ledger,
    capacity: u32,
    timing: &TimingConfig,
    manual: &AtomicBool,
    now: Instant,
) -> Option<FlushReason> {
    if ledger.total_weight() >= u64::from(capacity) {
        return Some(FlushReason::Full);
    }
    if ledger.is_empty() {
        return None;
    }
    if manual.swap(false, Ordering::AcqRel) {
        return Some(FlushReason::Manual);
    }
    let idle = ledger
        .last_admitted_at()
        .map(|last| now.saturating_duration_since(last) > timing.pending_time);
    if idle == Some(true) {
        return Some(FlushReason::Quiet);
    }
    let waited = ledger
        .first_admitted_at()
        .map(|first| now.saturating_duration_since(first) > timing.max_waiting_time);
    if waited == Some(true) {
        return Some(FlushReason::Ceiling);
    }
    None
}

/// Everything the loop needs, shared with the coalescer handle.
pub struct SchedulerContext {
    pub ledger: Arc<Ledger>,
    pub pool: Arc<ExecutorPool>,
    pub dispatcher: Arc<Dispatcher>,
    pub coordinator: Arc<ShutdownCoordinator>,
    pub timing: TimingConfig,
    pub flush_requested: Arc<AtomicBool>,
}

/// Spawn the scheduler loop.
///
/// The loop exits when `shutdown` is cancelled and returns the handles of
/// dispatches still running at that point.
pub fn spawn_scheduler(
    ctx: SchedulerContext,
    shutdown: CancellationToken,
) -> JoinHandle<Vec<JoinHandle<()>>> {
    tokio::spawn(async move { scheduler_loop(&ctx, shutdown).await })
}

async fn scheduler_loop(ctx: &SchedulerContext, shutdown: CancellationToken) -> Vec<JoinHandle<()>> {
    let capacity = ctx.ledger.capacity();
    let mut in_flight: Vec<JoinHandle<()>> = Vec::new();

    loop {
        let now = Instant::now();
        if let Some(reason) = flush_due(&ctx.ledger, capacity, &ctx.timing, &ctx.flush_requested, now) {
            if let Some(handle) = cut_batch(ctx, reason) {
                in_flight.push(handle);
            }
        }
        telemetry::record_pending_weight(ctx.ledger.total_weight());

        tokio::select! {
            biased;
            () = shutdown.cancelled() => {
                tracing::info!(in_flight = in_flight.len(), "scheduler: shutdown signal received");
                break;
            }
            () = tokio::time::sleep(ctx.timing.check_delay) => {}
        }
        in_flight.retain(|handle| !handle.is_finished());
    }

    in_flight.retain(|handle| !handle.is_finished());
    in_flight
}

fn cut_batch(ctx: &SchedulerContext, reason: FlushReason) -> Option<JoinHandle<()>> {
    let Some(executor) = ctx.pool.next() else {
        tracing::error!("scheduler: no executor available, batch not cut");
        return None;
    };
    let capacity = ctx.ledger.capacity().min(executor.max_batch_weight());
    let batch = pack(&ctx.ledger, capacity);
    if batch.is_empty() {
        return None;
    }
    tracing::debug!(
        ?reason,
        batch_id = %batch.id(),
        members = batch.len(),
        weight = batch.total_weight(),
        executor = executor.label(),
        "cutting batch"
    );

    let guard = ctx.coordinator.track_dispatch();
    let dispatcher = Arc::clone(&ctx.dispatcher);
    Some(tokio::spawn(async move {
        let _guard = guard;
        dispatcher.dispatch(executor, batch).await;
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::ledger::PackingStrategy;
    use crate::scheduler::request::{CallArgs, CallHandle, PendingRequest};
    use std::time::Duration;

    fn timing() -> TimingConfig {
        TimingConfig {
            check_delay: Duration::from_millis(10),
            pending_time: Duration::from_millis(100),
            max_waiting_time: Duration::from_millis(500),
            overload_backoff: Duration::ZERO,
        }
    }

    fn admit(ledger: &Ledger, weight: u32) -> CallHandle {
        let (req, handle) = PendingRequest::new(ledger.next_id(), "m".into(), CallArgs::new(), weight);
        ledger.admit(req);
        handle
    }

    #[tokio::test(start_paused = true)]
    async fn empty_ledger_never_flushes() {
        let ledger = Ledger::new(5, PackingStrategy::WeightClass);
        let manual = AtomicBool::new(true);
        tokio::time::advance(Duration::from_secs(10)).await;
        assert_eq!(flush_due(&ledger, 5, &timing(), &manual, Instant::now()), None);
        assert!(manual.load(Ordering::Acquire), "flag kept for the next non-empty tick");
    }

    #[tokio::test(start_paused = true)]
    async fn full_weight_flushes_immediately() {
        let ledger = Ledger::new(5, PackingStrategy::WeightClass);
        let _a = admit(&ledger, 3);
        let _b = admit(&ledger, 2);
        let manual = AtomicBool::new(true);
        assert_eq!(
            flush_due(&ledger, 5, &timing(), &manual, Instant::now()),
            Some(FlushReason::Full)
        );
        assert!(manual.load(Ordering::Acquire));
    }

    #[tokio::test(start_paused = true)]
    async fn manual_flag_is_consumed() {
        let ledger = Ledger::new(5, PackingStrategy::WeightClass);
        let _a = admit(&ledger, 1);
        let manual = AtomicBool::new(true);
        let now = Instant::now();
        assert_eq!(flush_due(&ledger, 5, &timing(), &manual, now), Some(FlushReason::Manual));
        assert_eq!(flush_due(&ledger, 5, &timing(), &manual, now), None);
    }

    #[tokio::test(start_paused = true)]
    async fn quiet_window_must_be_exceeded() {
        let ledger = Ledger::new(5, PackingStrategy::WeightClass);
        let _a = admit(&ledger, 1);
        let manual = AtomicBool::new(false);

        tokio::time::advance(Duration::from_millis(100)).await;
        assert_eq!(flush_due(&ledger, 5, &timing(), &manual, Instant::now()), None);

        tokio::time::advance(Duration::from_millis(1)).await;
        assert_eq!(
            flush_due(&ledger, 5, &timing(), &manual, Instant::now()),
            Some(FlushReason::Quiet)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn steady_trickle_hits_wait_ceiling() {
        let ledger = Ledger::new(100, PackingStrategy::WeightClass);
        let manual = AtomicBool::new(false);
        let mut handles = vec![admit(&ledger, 1)];

        // a call every 50ms keeps the quiet window from ever elapsing
        for _ in 0..10 {
            tokio::time::advance(Duration::from_millis(50)).await;
            handles.push(admit(&ledger, 1));
        }
        tokio::time::advance(Duration::from_millis(1)).await;

        assert_eq!(
            flush_due(&ledger, 100, &timing(), &manual, Instant::now()),
            Some(FlushReason::Ceiling)
        );
    }
}
