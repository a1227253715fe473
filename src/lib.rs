//! coalesce-core
//!
//! Request-coalescing batch scheduler. Many small, independently issued
//! calls are grouped into weight-bounded batches and sent through a single
//! "batch execute" primitive. Every admitted call gets exactly one outcome:
//! its own result, its own error, or a cancellation.
//!
//! # Lifecycle
//!
//! - [`Coalescer::start`] validates configuration, checks the executor pool
//!   and spawns the scheduler loop.
//! - [`Coalescer::submit`] admits calls from any thread.
//! - [`Coalescer::shutdown`] stops admission, drains in-flight batches up to
//!   the configured timeout, and cancels whatever is still queued.
//!
//! # Failure handling
//!
//! - Overload: the batch is returned to the ledger unchanged.
//! - Oversized response: members are retried one weight class heavier.
//! - Partial failure: per-call errors go to their own callers.

pub mod cli;
pub mod config;
pub mod error;
pub mod executor;
pub mod scheduler;
pub mod shutdown;
pub mod telemetry;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::OnceCell;
use tokio::task::JoinHandle;

pub use config::{ConfigError, EnvConfig};
pub use error::{AdmissionError, CallError, RemoteError};
pub use executor::{BatchExecutor, ExecuteProgram, ExecutorPool};
pub use scheduler::{BatchOutcome, CallArgs, CallHandle, CallResult, LedgerStats, PackingStrategy, Slot};
pub use shutdown::{ShutdownResult, ShutdownState};

use scheduler::{
    spawn_scheduler, AdmissionGate, Dispatcher, Ledger, RecoveryPolicy, SchedulerContext,
};
use shutdown::ShutdownCoordinator;

type SchedulerHandle = JoinHandle<Vec<JoinHandle<()>>>;

/// A running coalescer.
///
/// Dropping it without calling [`shutdown`](Self::shutdown) stops the loop
/// and cancels queued calls, but does not wait for in-flight batches.
pub struct Coalescer {
    gate: AdmissionGate,
    ledger: Arc<Ledger>,
    coordinator: Arc<ShutdownCoordinator>,
    flush_requested: Arc<AtomicBool>,
    scheduler: Mutex<Option<SchedulerHandle>>,
    shutdown_timeout: Duration,
    stopped: OnceCell<ShutdownResult>,
}

impl Coalescer {
    /// Start the coalescer on the current Tokio runtime.
    ///
    /// Fails if the configuration is inconsistent, the pool is empty, or any
    /// executor cannot accept a full batch.
    pub fn start(config: EnvConfig, pool: ExecutorPool) -> Result<Self, ConfigError> {
        config.validate()?;
        let capacity = config.batch_capacity;
        let ceiling = pool.min_batch_weight().ok_or(ConfigError::NoExecutors)?;
        if ceiling < capacity {
            return Err(ConfigError::ExecutorCeiling { ceiling, capacity });
        }
        let runtime = Handle::try_current().map_err(|e| ConfigError::Runtime(e.to_string()))?;

        let ledger = Arc::new(Ledger::new(capacity, config.packing));
        let pool = Arc::new(pool);
        let coordinator = Arc::new(ShutdownCoordinator::new());
        let flush_requested = Arc::new(AtomicBool::new(false));

        let recovery = RecoveryPolicy::new(
            Arc::clone(&ledger),
            config.timing.overload_backoff,
            coordinator.token(),
        );
        let ctx = SchedulerContext {
            ledger: Arc::clone(&ledger),
            pool: Arc::clone(&pool),
            dispatcher: Arc::new(Dispatcher::new(recovery)),
            coordinator: Arc::clone(&coordinator),
            timing: config.timing.clone(),
            flush_requested: Arc::clone(&flush_requested),
        };
        let scheduler = spawn_scheduler(ctx, coordinator.token());

        tracing::info!(
            capacity,
            packing = config.packing.as_str(),
            executors = pool.len(),
            check_delay_ms = config.timing.check_delay.as_millis() as u64,
            "coalescer started"
        );

        let gate = AdmissionGate::new(
            Arc::clone(&ledger),
            config.weights,
            pool,
            Arc::clone(&coordinator),
            runtime,
        );
        Ok(Self {
            gate,
            ledger,
            coordinator,
            flush_requested,
            scheduler: Mutex::new(Some(scheduler)),
            shutdown_timeout: config.shutdown_timeout,
            stopped: OnceCell::new(),
        })
    }

    /// Admit a call. See [`AdmissionGate::submit`].
    pub fn submit(
        &self,
        name: impl Into<String>,
        arguments: CallArgs,
        weight: Option<u32>,
    ) -> Result<CallHandle, AdmissionError> {
        self.gate.submit(name, arguments, weight)
    }

    /// Admit a call with its configured weight.
    pub fn call(&self, name: impl Into<String>, arguments: CallArgs) -> Result<CallHandle, AdmissionError> {
        self.gate.submit(name, arguments, None)
    }

    /// Flush on the next tick, regardless of timers. No effect on an empty
    /// ledger.
    pub fn flush(&self) {
        self.flush_requested.store(true, Ordering::Release);
    }

    pub fn stats(&self) -> LedgerStats {
        self.ledger.stats()
    }

    pub fn pending_weight(&self) -> u64 {
        self.ledger.total_weight()
    }

    pub fn state(&self) -> ShutdownState {
        self.coordinator.state()
    }

    /// Stop admission, drain in-flight batches and cancel queued calls.
    ///
    /// Idempotent: later calls return the first call's result.
    pub async fn shutdown(&self) -> ShutdownResult {
        self.stopped.get_or_init(|| self.run_shutdown()).await.clone()
    }

    async fn run_shutdown(&self) -> ShutdownResult {
        self.coordinator.begin();
        tracing::info!(pending = self.ledger.len(), "coalescer shutting down");

        let scheduler = self.scheduler.lock().take();
        let stragglers = match scheduler {
            Some(handle) => handle.await.unwrap_or_else(|e| {
                tracing::error!(error = %e, "scheduler loop failed");
                Vec::new()
            }),
            None => Vec::new(),
        };

        let result = self.coordinator.wait_for_drain(self.shutdown_timeout).await;
        if let ShutdownResult::Timeout { remaining } = result {
            tracing::warn!(remaining, "drain timed out, aborting in-flight batches");
            for handle in &stragglers {
                handle.abort();
            }
        }

        let cancelled = cancel_queued(&self.ledger);
        self.coordinator.finish();
        tracing::info!(?result, cancelled, "coalescer stopped");
        result
    }
}

fn cancel_queued(ledger: &Ledger) -> usize {
    let queued = ledger.drain_all();
    let count = queued.len();
    for request in queued {
        request.cancel();
    }
    count
}

impl Drop for Coalescer {
    fn drop(&mut self) {
        if self.coordinator.begin() {
            cancel_queued(&self.ledger);
        }
    }
}
