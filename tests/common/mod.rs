//! Shared fixtures: a scripted executor that records every batch it sees.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::time::Instant;

use coalesce_core::config::EnvConfig;
use coalesce_core::{
    BatchExecutor, BatchOutcome, CallArgs, CallError, Coalescer, ExecuteProgram, ExecutorPool,
    RemoteError, Slot,
};

/// What the executor answers to its next batch.
#[derive(Debug, Clone)]
pub enum Script {
    Echo,
    Overload,
    Oversized,
    /// Fail the listed batch indices, in order, with codes `100 + index`.
    Partial(Vec<usize>),
    Unclassified(String),
    /// Never return.
    Hang,
}

/// One observed batch invocation.
#[derive(Debug, Clone)]
pub struct BatchRecord {
    pub at: Instant,
    pub methods: Vec<String>,
    pub weights: Vec<u32>,
    pub seqs: Vec<u64>,
}

impl BatchRecord {
    pub fn total_weight(&self) -> u32 {
        self.weights.iter().sum()
    }
}

pub struct ScriptedExecutor {
    label: String,
    max_batch_weight: u32,
    latency: Duration,
    scripts: Mutex<VecDeque<Script>>,
    records: Mutex<Vec<BatchRecord>>,
    direct: AtomicUsize,
}

impl ScriptedExecutor {
    pub fn new(max_batch_weight: u32) -> Self {
        Self {
            label: "scripted".into(),
            max_batch_weight,
            latency: Duration::ZERO,
            scripts: Mutex::new(VecDeque::new()),
            records: Mutex::new(Vec::new()),
            direct: AtomicUsize::new(0),
        }
    }

    pub fn labelled(mut self, label: &str) -> Self {
        self.label = label.into();
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Queue answers for the next batches; afterwards every batch is echoed.
    pub fn with_scripts(self, scripts: impl IntoIterator<Item = Script>) -> Self {
        self.scripts.lock().extend(scripts);
        self
    }

    pub fn records(&self) -> Vec<BatchRecord> {
        self.records.lock().clone()
    }

    pub fn batch_count(&self) -> usize {
        self.records.lock().len()
    }

    pub fn direct_calls(&self) -> usize {
        self.direct.load(Ordering::SeqCst)
    }
}

fn echo(name: &str, arguments: &CallArgs) -> Value {
    json!({ "method": name, "args": arguments })
}

#[async_trait]
impl BatchExecutor for ScriptedExecutor {
    fn label(&self) -> &str {
        &self.label
    }

    fn max_batch_weight(&self) -> u32 {
        self.max_batch_weight
    }

    async fn execute(&self, program: &ExecuteProgram) -> BatchOutcome {
        let calls = program.calls();
        self.records.lock().push(BatchRecord {
            at: Instant::now(),
            methods: calls.iter().map(|c| c.name.clone()).collect(),
            weights: calls.iter().map(|c| c.weight).collect(),
            seqs: calls
                .iter()
                .filter_map(|c| c.arguments.get("seq").and_then(Value::as_u64))
                .collect(),
        });
        let script = self.scripts.lock().pop_front().unwrap_or(Script::Echo);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        match script {
            Script::Echo => {
                BatchOutcome::Success(calls.iter().map(|c| echo(&c.name, &c.arguments)).collect())
            }
            Script::Overload => BatchOutcome::Overload,
            Script::Oversized => BatchOutcome::Oversized,
            Script::Partial(failing) => BatchOutcome::PartialFailure {
                slots: calls
                    .iter()
                    .map(|c| {
                        if failing.contains(&c.index) {
                            Slot::Failed
                        } else {
                            Slot::Ok(echo(&c.name, &c.arguments))
                        }
                    })
                    .collect(),
                errors: failing
                    .iter()
                    .map(|i| RemoteError::new(100 + *i as i64, format!("call {i} failed")))
                    .collect(),
            },
            Script::Unclassified(message) => BatchOutcome::Unclassified(message),
            Script::Hang => {
                std::future::pending::<()>().await;
                BatchOutcome::Cancelled
            }
        }
    }

    async fn call_direct(&self, name: &str, arguments: &CallArgs) -> Result<Value, CallError> {
        self.direct.fetch_add(1, Ordering::SeqCst);
        Ok(echo(name, arguments))
    }
}

/// Short timings: 10ms ticks, 100ms quiet window, 500ms ceiling.
pub fn config(capacity: u32) -> EnvConfig {
    let mut cfg = EnvConfig { batch_capacity: capacity, ..Default::default() };
    cfg.timing.check_delay = Duration::from_millis(10);
    cfg.timing.pending_time = Duration::from_millis(100);
    cfg.timing.max_waiting_time = Duration::from_millis(500);
    cfg.shutdown_timeout = Duration::from_secs(5);
    cfg
}

pub fn start(cfg: EnvConfig, executor: &Arc<ScriptedExecutor>) -> Coalescer {
    let pool = ExecutorPool::single(Arc::clone(executor) as Arc<dyn BatchExecutor>);
    Coalescer::start(cfg, pool).unwrap()
}

pub fn seq_args(seq: u64) -> CallArgs {
    let mut args = CallArgs::new();
    args.insert("seq".into(), json!(seq));
    args
}
