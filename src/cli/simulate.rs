// Copyright 2026 coalesce-core Contributors
// SPDX-License-Identifier: Apache-2.0

//! `simulate` subcommand: drive the scheduler against a loopback executor
//! and report how calls were coalesced.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use serde_json::json;

use crate::config::{ConfigError, EnvConfig};
use crate::executor::{BatchExecutor, ExecutorPool, LoopbackConfig, LoopbackExecutor};
use crate::scheduler::CallArgs;
use crate::shutdown::ShutdownResult;
use crate::Coalescer;

const DEFAULT_CALLS: usize = 200;
const METHODS: &[&str] = &["users.get", "wall.get", "friends.get", "groups.getById"];

#[derive(Debug, Clone, Serialize)]
pub struct SimulationReport {
    pub calls: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub batches: u64,
    pub batched_calls: u64,
    pub direct_calls: u64,
    pub elapsed_ms: u64,
    pub clean_shutdown: bool,
}

impl SimulationReport {
    /// Mean number of calls per batch.
    pub fn mean_batch_size(&self) -> f64 {
        if self.batches == 0 {
            0.0
        } else {
            self.batched_calls as f64 / self.batches as f64
        }
    }
}

/// Submit `calls` calls with seeded random weights and wait for all of them.
pub async fn simulate(config: EnvConfig, calls: usize, latency: Duration) -> Result<SimulationReport, ConfigError> {
    let executor = Arc::new(LoopbackExecutor::new(LoopbackConfig {
        max_batch_weight: config.batch_capacity,
        latency,
        ..Default::default()
    }));
    let max_weight = config.batch_capacity.min(3);
    let coalescer = Coalescer::start(
        config,
        ExecutorPool::single(Arc::clone(&executor) as Arc<dyn BatchExecutor>),
    )?;

    let started = tokio::time::Instant::now();
    let mut rng = StdRng::seed_from_u64(calls as u64);
    let mut handles = Vec::with_capacity(calls);
    let mut rejected = 0;
    for i in 0..calls {
        let method = METHODS[i % METHODS.len()];
        let mut args = CallArgs::new();
        args.insert("seq".into(), json!(i));
        let weight = rng.gen_range(1..=max_weight);
        match coalescer.submit(method, args, Some(weight)) {
            Ok(handle) => handles.push(handle),
            Err(e) => {
                tracing::warn!(error = %e, "call rejected");
                rejected += 1;
            }
        }
    }
    coalescer.flush();

    let outcomes = join_all(handles).await;
    let succeeded = outcomes.iter().filter(|o| o.is_ok()).count();
    let elapsed = started.elapsed();
    let shutdown = coalescer.shutdown().await;

    Ok(SimulationReport {
        calls,
        succeeded,
        failed: outcomes.len() - succeeded + rejected,
        batches: executor.batches(),
        batched_calls: executor.calls(),
        direct_calls: executor.direct_calls(),
        elapsed_ms: elapsed.as_millis() as u64,
        clean_shutdown: shutdown == ShutdownResult::Complete,
    })
}

/// Entry point for `coalesce-cli simulate [calls] [--latency-ms N] [--json]`.
pub async fn run_simulate(args: &[String], config: EnvConfig) -> i32 {
    let calls = args
        .get(2)
        .and_then(|s| s.parse::<usize>().ok())
        .unwrap_or(DEFAULT_CALLS);
    let latency = args
        .iter()
        .position(|a| a == "--latency-ms")
        .and_then(|i| args.get(i + 1))
        .and_then(|s| s.parse::<u64>().ok())
        .map(Duration::from_millis)
        .unwrap_or(Duration::from_millis(20));
    let json_output = args.iter().any(|a| a == "--json");

    let report = match simulate(config, calls, latency).await {
        Ok(report) => report,
        Err(e) => {
            eprintln!("Configuration error: {e}");
            return 2;
        }
    };

    if json_output {
        match serde_json::to_string_pretty(&report) {
            Ok(text) => println!("{text}"),
            Err(e) => {
                eprintln!("Failed to render report: {e}");
                return 1;
            }
        }
    } else {
        println!("calls:          {}", report.calls);
        println!("succeeded:      {}", report.succeeded);
        println!("failed:         {}", report.failed);
        println!("batches:        {}", report.batches);
        println!("mean batch:     {:.2}", report.mean_batch_size());
        println!("direct calls:   {}", report.direct_calls);
        println!("elapsed:        {} ms", report.elapsed_ms);
        println!("clean shutdown: {}", report.clean_shutdown);
    }

    if report.failed == 0 && report.clean_shutdown {
        0
    } else {
        1
    }
}
