//! Metric names and recording helpers.

use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};

pub const BATCHES_TOTAL: &str = "coalesce_batches_total";
pub const BATCH_WEIGHT: &str = "coalesce_batch_weight";
pub const BATCH_LATENCY_MS: &str = "coalesce_batch_latency_ms";
pub const RETRIES_TOTAL: &str = "coalesce_retries_total";
pub const CALLS_FAILED_TOTAL: &str = "coalesce_calls_failed_total";
pub const PENDING_WEIGHT: &str = "coalesce_pending_weight";

/// Why a batch was sent back to the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryReason {
    Overload,
    Oversized,
}

impl RetryReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Overload => "overload",
            Self::Oversized => "oversized",
        }
    }
}

/// Register metric descriptions with the installed recorder.
///
/// Safe to call without a recorder; descriptions are then discarded.
pub fn init_metrics() {
    describe_counter!(BATCHES_TOTAL, "Batches handed to an executor");
    describe_histogram!(BATCH_WEIGHT, "Combined weight of each dispatched batch");
    describe_histogram!(BATCH_LATENCY_MS, "Executor round-trip time per batch");
    describe_counter!(RETRIES_TOTAL, "Calls returned to the ledger for another attempt");
    describe_counter!(CALLS_FAILED_TOTAL, "Calls resolved with an error");
    describe_gauge!(PENDING_WEIGHT, "Total weight currently waiting in the ledger");
}

pub fn record_batch_dispatched(weight: u32, latency: Duration) {
    counter!(BATCHES_TOTAL).increment(1);
    histogram!(BATCH_WEIGHT).record(f64::from(weight));
    histogram!(BATCH_LATENCY_MS).record(latency.as_secs_f64() * 1000.0);
}

pub fn record_retry(reason: RetryReason, calls: usize) {
    counter!(RETRIES_TOTAL, "reason" => reason.as_str()).increment(calls as u64);
}

pub fn record_calls_failed(calls: usize) {
    if calls > 0 {
        counter!(CALLS_FAILED_TOTAL).increment(calls as u64);
    }
}

pub fn record_pending_weight(weight: u64) {
    gauge!(PENDING_WEIGHT).set(weight as f64);
}
