//! Telemetry for the coalescer.
//!
//! Structured logging, batch spans, and metrics recorded through the
//! `metrics` facade. No exporter is installed here; the host application
//! chooses one.

mod logging;
mod metrics;
mod spans;

pub use logging::{init_logging, LogConfig, LogError, LogFormat};
pub use metrics::{
    init_metrics, record_batch_dispatched, record_calls_failed, record_pending_weight,
    record_retry, RetryReason,
};
pub use spans::{redact_arguments, BatchSpan, SpanExt, REDACTED_KEYS};
