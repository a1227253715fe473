//! In-process executor that echoes every call back as its result.
//!
//! Used by the CLI simulation and benchmarks in place of a real remote.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{BatchExecutor, ExecuteProgram};
use crate::error::CallError;
use crate::scheduler::{BatchOutcome, CallArgs};

/// Configuration for [`LoopbackExecutor`].
#[derive(Debug, Clone)]
pub struct LoopbackConfig {
    pub label: String,
    pub max_batch_weight: u32,
    /// Simulated round-trip time per invocation.
    pub latency: Duration,
}

impl Default for LoopbackConfig {
    fn default() -> Self {
        Self {
            label: "loopback".to_string(),
            max_batch_weight: 25,
            latency: Duration::ZERO,
        }
    }
}

/// Echo executor: each result is `{"method": name, "args": arguments}`.
pub struct LoopbackExecutor {
    config: LoopbackConfig,
    batches: AtomicU64,
    calls: AtomicU64,
    direct_calls: AtomicU64,
}

impl LoopbackExecutor {
    pub fn new(config: LoopbackConfig) -> Self {
        Self {
            config,
            batches: AtomicU64::new(0),
            calls: AtomicU64::new(0),
            direct_calls: AtomicU64::new(0),
        }
    }

    /// Number of batch invocations served.
    pub fn batches(&self) -> u64 {
        self.batches.load(Ordering::Relaxed)
    }

    /// Number of batched sub-calls served.
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    pub fn direct_calls(&self) -> u64 {
        self.direct_calls.load(Ordering::Relaxed)
    }

    async fn simulate_latency(&self) {
        if !self.config.latency.is_zero() {
            tokio::time::sleep(self.config.latency).await;
        }
    }
}

#[async_trait]
impl BatchExecutor for LoopbackExecutor {
    fn label(&self) -> &str {
        &self.config.label
    }

    fn max_batch_weight(&self) -> u32 {
        self.config.max_batch_weight
    }

    async fn execute(&self, program: &ExecuteProgram) -> BatchOutcome {
        self.simulate_latency().await;
        if program.total_weight() > self.config.max_batch_weight {
            return BatchOutcome::Unclassified(format!(
                "program weight {} exceeds limit {}",
                program.total_weight(),
                self.config.max_batch_weight
            ));
        }
        self.batches.fetch_add(1, Ordering::Relaxed);
        self.calls.fetch_add(program.len() as u64, Ordering::Relaxed);
        BatchOutcome::Success(
            program
                .calls()
                .iter()
                .map(|c| json!({ "method": c.name, "args": c.arguments }))
                .collect(),
        )
    }

    async fn call_direct(&self, name: &str, arguments: &CallArgs) -> Result<Value, CallError> {
        self.simulate_latency().await;
        self.direct_calls.fetch_add(1, Ordering::Relaxed);
        Ok(json!({ "method": name, "args": arguments }))
    }
}
