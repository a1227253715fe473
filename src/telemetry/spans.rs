//! Batch spans and log-safe argument rendering.

use std::time::Duration;

use serde_json::Value;
use tracing::{info_span, Span};
use uuid::Uuid;

use crate::scheduler::{BatchOutcome, CallArgs};

/// Argument keys never written to logs.
pub const REDACTED_KEYS: &[&str] = &["access_token"];

/// Extension trait for recording batch results into a span.
pub trait SpanExt {
    fn record_outcome(&self, outcome: &BatchOutcome, latency: Duration);
}

impl SpanExt for Span {
    fn record_outcome(&self, outcome: &BatchOutcome, latency: Duration) {
        self.record("latency_ms", latency.as_millis() as u64);
        match outcome {
            BatchOutcome::Success(_) => {
                self.record("status", "ok");
            }
            BatchOutcome::Unclassified(message) => {
                self.record("status", outcome.kind());
                self.record("error.message", message.as_str());
            }
            other => {
                self.record("status", other.kind());
            }
        }
    }
}

/// Factory for batch dispatch spans.
pub struct BatchSpan;

impl BatchSpan {
    /// Create a span for one batch dispatch.
    ///
    /// `status`, `error.message` and `latency_ms` are filled in by
    /// [`SpanExt::record_outcome`].
    pub fn new(batch_id: &Uuid, members: usize, weight: u32) -> Span {
        info_span!(
            "batch_dispatch",
            batch_id = %batch_id,
            members,
            weight,
            executor = tracing::field::Empty,
            status = tracing::field::Empty,
            error.message = tracing::field::Empty,
            latency_ms = tracing::field::Empty,
        )
    }
}

/// Copy of `arguments` with sensitive values masked, for trace logs.
pub fn redact_arguments(arguments: &CallArgs) -> Value {
    Value::Object(
        arguments
            .iter()
            .map(|(key, value)| {
                if REDACTED_KEYS.contains(&key.as_str()) {
                    (key.clone(), Value::String("***".into()))
                } else {
                    (key.clone(), value.clone())
                }
            })
            .collect(),
    )
}
