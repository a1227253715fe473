//! External batch-execute primitive.
//!
//! The scheduler never interprets method names or arguments. It hands a
//! [`ExecuteProgram`] to a [`BatchExecutor`] and consumes the tagged
//! [`BatchOutcome`] it returns.

mod loopback;
pub mod program;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::CallError;
use crate::scheduler::{BatchOutcome, CallArgs};

pub use loopback::{LoopbackConfig, LoopbackExecutor};
pub use program::{ExecuteProgram, ProgramCall};

/// Remote endpoint able to run a composite program in one invocation.
#[async_trait]
pub trait BatchExecutor: Send + Sync {
    /// Executor label for logs.
    fn label(&self) -> &str {
        "executor"
    }

    /// Largest combined weight this endpoint accepts in one program.
    fn max_batch_weight(&self) -> u32;

    /// Run every sub-call of `program` in a single invocation.
    async fn execute(&self, program: &ExecuteProgram) -> BatchOutcome;

    /// Run one call outside of any batch (skip-set methods).
    async fn call_direct(&self, name: &str, arguments: &CallArgs) -> Result<Value, CallError>;
}

/// Round-robin set of executors sharing one ledger.
///
/// Every executor must accept a full batch of the configured capacity;
/// [`ExecutorPool::min_batch_weight`] is checked at startup.
pub struct ExecutorPool {
    executors: Vec<Arc<dyn BatchExecutor>>,
    counter: AtomicUsize,
}

impl ExecutorPool {
    pub fn new(executors: Vec<Arc<dyn BatchExecutor>>) -> Self {
        Self { executors, counter: AtomicUsize::new(0) }
    }

    pub fn single(executor: Arc<dyn BatchExecutor>) -> Self {
        Self::new(vec![executor])
    }

    /// Select the next executor. Returns `None` if the pool is empty.
    pub fn next(&self) -> Option<Arc<dyn BatchExecutor>> {
        if self.executors.is_empty() {
            return None;
        }
        let idx = self.counter.fetch_add(1, Ordering::Relaxed) % self.executors.len();
        Some(Arc::clone(&self.executors[idx]))
    }

    /// Smallest per-batch ceiling across the pool.
    pub fn min_batch_weight(&self) -> Option<u32> {
        self.executors.iter().map(|e| e.max_batch_weight()).min()
    }

    pub fn len(&self) -> usize {
        self.executors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.executors.is_empty()
    }
}
