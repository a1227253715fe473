//! Coalescer configuration loading.
//!
//! Values come from `COALESCE_*` environment variables or a TOML file, with
//! defaults for everything. Invalid values fall back to defaults without
//! crashing; numeric values are clamped to sane floors. Semantic problems
//! (weights that can never fit a batch) are reported by [`EnvConfig::validate`].
//!
//! # Environment Variables
//!
//! | Variable | Default | Description |
//! |---|---|---|
//! | `COALESCE_BATCH_CAPACITY` | 25 | Max combined weight per batch (1..=1000) |
//! | `COALESCE_DEFAULT_WEIGHT` | 1 | Weight of methods without an override |
//! | `COALESCE_METHOD_WEIGHTS` | | Per-method weights, `name=w,name=w` |
//! | `COALESCE_SKIP_METHODS` | | Methods sent directly, comma separated |
//! | `COALESCE_PACKING` | weight-class | `weight-class` or `fifo` |
//! | `COALESCE_CHECK_DELAY_MS` | 100 | Scheduler tick interval |
//! | `COALESCE_PENDING_TIME_MS` | 1000 | Quiet window before a flush |
//! | `COALESCE_MAX_WAITING_MS` | 5000 | Longest wait for the oldest call |
//! | `COALESCE_OVERLOAD_BACKOFF_MS` | 0 | Pause before retrying an overloaded batch |
//! | `COALESCE_SHUTDOWN_TIMEOUT` | 30 | Drain timeout on shutdown (secs) |
//! | `COALESCE_LOG_FORMAT` | json | `json` or `pretty` |
//! | `COALESCE_LOG_LEVEL` | info | `EnvFilter` directive |
//! | `COALESCE_LOG_FILE` | | Append logs to this file |

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::scheduler::PackingStrategy;
use crate::telemetry::{LogConfig, LogFormat};

pub const DEFAULT_BATCH_CAPACITY: u32 = 25;
pub const MAX_BATCH_CAPACITY: u32 = 1000;

/// Name of the batch primitive itself. Always sent directly.
pub const EXECUTE_METHOD: &str = "execute";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config file: {0}")]
    Parse(String),

    #[error("Batch capacity {capacity} is outside 1..={max}")]
    BatchCapacity { capacity: u32, max: u32 },

    #[error("Default weight {weight} is outside 1..={capacity}")]
    DefaultWeight { weight: u32, capacity: u32 },

    #[error("Weight {weight} for method '{method}' is outside 1..={capacity}")]
    MethodWeight { method: String, weight: u32, capacity: u32 },

    #[error("No executors configured")]
    NoExecutors,

    #[error("Executor ceiling {ceiling} is below batch capacity {capacity}")]
    ExecutorCeiling { ceiling: u32, capacity: u32 },

    #[error("No Tokio runtime available: {0}")]
    Runtime(String),
}

/// Scheduler timing knobs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimingConfig {
    pub check_delay: Duration,
    /// Quiet window: flush once nothing was admitted for this long.
    pub pending_time: Duration,
    /// Flush once the oldest pending call has waited this long.
    pub max_waiting_time: Duration,
    pub overload_backoff: Duration,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            check_delay: Duration::from_millis(100),
            pending_time: Duration::from_millis(1000),
            max_waiting_time: Duration::from_millis(5000),
            overload_backoff: Duration::ZERO,
        }
    }
}

/// How calls are weighted and which bypass batching.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WeightPolicy {
    pub default_weight: u32,
    pub method_weights: BTreeMap<String, u32>,
    pub skip_methods: BTreeSet<String>,
}

impl Default for WeightPolicy {
    fn default() -> Self {
        Self {
            default_weight: 1,
            method_weights: BTreeMap::new(),
            skip_methods: BTreeSet::new(),
        }
    }
}

impl WeightPolicy {
    /// Explicit weight, then per-method weight, then the default.
    pub fn resolve(&self, method: &str, explicit: Option<u32>) -> u32 {
        explicit
            .or_else(|| self.method_weights.get(method).copied())
            .unwrap_or(self.default_weight)
    }

    pub fn is_skipped(&self, method: &str) -> bool {
        method == EXECUTE_METHOD || self.skip_methods.contains(method)
    }
}

/// All coalescer configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvConfig {
    pub batch_capacity: u32,
    pub packing: PackingStrategy,
    pub weights: WeightPolicy,
    pub timing: TimingConfig,
    pub shutdown_timeout: Duration,
}

impl Default for EnvConfig {
    fn default() -> Self {
        Self {
            batch_capacity: DEFAULT_BATCH_CAPACITY,
            packing: PackingStrategy::default(),
            weights: WeightPolicy::default(),
            timing: TimingConfig::default(),
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

/// Printable summary of the effective values.
#[derive(Debug, Clone, Serialize)]
pub struct EffectiveConfig {
    pub batch_capacity: u32,
    pub packing: &'static str,
    pub default_weight: u32,
    pub method_weights: BTreeMap<String, u32>,
    pub skip_methods: BTreeSet<String>,
    pub check_delay_ms: u64,
    pub pending_time_ms: u64,
    pub max_waiting_ms: u64,
    pub overload_backoff_ms: u64,
    pub shutdown_timeout_secs: u64,
}

fn parse_u32(key: &str, default: u32) -> u32 {
    match std::env::var(key) {
        Ok(val) => val.trim().parse::<u32>().unwrap_or(default),
        Err(_) => default,
    }
}

fn parse_u64(key: &str, default: u64) -> u64 {
    match std::env::var(key) {
        Ok(val) => val.trim().parse::<u64>().unwrap_or(default),
        Err(_) => default,
    }
}

/// Parse `name=weight,name=weight`. Malformed entries are skipped.
pub fn parse_method_weights(raw: &str) -> BTreeMap<String, u32> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .filter_map(|entry| {
            let parsed = entry.split_once('=').and_then(|(name, weight)| {
                let name = name.trim();
                let weight = weight.trim().parse::<u32>().ok()?;
                (!name.is_empty()).then(|| (name.to_string(), weight))
            });
            if parsed.is_none() {
                tracing::warn!(entry, "ignoring malformed method weight");
            }
            parsed
        })
        .collect()
}

/// Parse a comma separated list of method names.
pub fn parse_skip_methods(raw: &str) -> BTreeSet<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_packing(key: &str) -> PackingStrategy {
    match std::env::var(key) {
        Ok(val) => val.parse().unwrap_or_else(|_| {
            tracing::warn!(value = %val, "unknown packing strategy, using default");
            PackingStrategy::default()
        }),
        Err(_) => PackingStrategy::default(),
    }
}

fn load_timing() -> TimingConfig {
    let check_delay = parse_u64("COALESCE_CHECK_DELAY_MS", 100).max(1);
    let pending_time = parse_u64("COALESCE_PENDING_TIME_MS", 1000);
    let max_waiting = parse_u64("COALESCE_MAX_WAITING_MS", 5000);
    let backoff = parse_u64("COALESCE_OVERLOAD_BACKOFF_MS", 0);
    TimingConfig {
        check_delay: Duration::from_millis(check_delay),
        pending_time: Duration::from_millis(pending_time),
        max_waiting_time: Duration::from_millis(max_waiting),
        overload_backoff: Duration::from_millis(backoff),
    }
}

fn load_weights() -> WeightPolicy {
    let default_weight = parse_u32("COALESCE_DEFAULT_WEIGHT", 1).max(1);
    let method_weights = std::env::var("COALESCE_METHOD_WEIGHTS")
        .map(|raw| parse_method_weights(&raw))
        .unwrap_or_default();
    let skip_methods = std::env::var("COALESCE_SKIP_METHODS")
        .map(|raw| parse_skip_methods(&raw))
        .unwrap_or_default();
    WeightPolicy { default_weight, method_weights, skip_methods }
}

/// Load all configuration from environment variables.
///
/// Missing or invalid values fall back to defaults without panicking.
pub fn load() -> EnvConfig {
    let batch_capacity =
        parse_u32("COALESCE_BATCH_CAPACITY", DEFAULT_BATCH_CAPACITY).clamp(1, MAX_BATCH_CAPACITY);
    let shutdown_secs = parse_u64("COALESCE_SHUTDOWN_TIMEOUT", 30).max(1);

    EnvConfig {
        batch_capacity,
        packing: parse_packing("COALESCE_PACKING"),
        weights: load_weights(),
        timing: load_timing(),
        shutdown_timeout: Duration::from_secs(shutdown_secs),
    }
}

/// Logging settings from `COALESCE_LOG_*`.
pub fn load_log_config() -> LogConfig {
    let format = std::env::var("COALESCE_LOG_FORMAT")
        .ok()
        .and_then(|raw| raw.parse::<LogFormat>().ok())
        .unwrap_or_default();
    let level = std::env::var("COALESCE_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
    let output_path = std::env::var("COALESCE_LOG_FILE").ok().map(PathBuf::from);
    LogConfig { format, level, output_path }
}

/// On-disk form. Every field is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FileConfig {
    batch_capacity: Option<u32>,
    packing: Option<PackingStrategy>,
    default_weight: Option<u32>,
    method_weights: BTreeMap<String, u32>,
    skip_methods: BTreeSet<String>,
    check_delay_ms: Option<u64>,
    pending_time_ms: Option<u64>,
    max_waiting_ms: Option<u64>,
    overload_backoff_ms: Option<u64>,
    shutdown_timeout_secs: Option<u64>,
}

impl FileConfig {
    fn into_config(self) -> EnvConfig {
        let defaults = EnvConfig::default();
        let ms = |v: Option<u64>, d: Duration| v.map(Duration::from_millis).unwrap_or(d);
        EnvConfig {
            batch_capacity: self
                .batch_capacity
                .unwrap_or(defaults.batch_capacity)
                .clamp(1, MAX_BATCH_CAPACITY),
            packing: self.packing.unwrap_or(defaults.packing),
            weights: WeightPolicy {
                default_weight: self.default_weight.unwrap_or(1).max(1),
                method_weights: self.method_weights,
                skip_methods: self.skip_methods,
            },
            timing: TimingConfig {
                check_delay: ms(self.check_delay_ms, defaults.timing.check_delay)
                    .max(Duration::from_millis(1)),
                pending_time: ms(self.pending_time_ms, defaults.timing.pending_time),
                max_waiting_time: ms(self.max_waiting_ms, defaults.timing.max_waiting_time),
                overload_backoff: ms(self.overload_backoff_ms, defaults.timing.overload_backoff),
            },
            shutdown_timeout: Duration::from_secs(self.shutdown_timeout_secs.unwrap_or(30).max(1)),
        }
    }
}

/// Load configuration from a TOML file.
pub fn load_file(path: &Path) -> Result<EnvConfig, ConfigError> {
    let raw = std::fs::read_to_string(path)
        .map_err(|source| ConfigError::Io { path: path.to_path_buf(), source })?;
    parse_toml(&raw)
}

pub fn parse_toml(raw: &str) -> Result<EnvConfig, ConfigError> {
    let file: FileConfig = toml::from_str(raw).map_err(|e| ConfigError::Parse(e.to_string()))?;
    Ok(file.into_config())
}

impl EnvConfig {
    /// Reject weights that could never fit in a batch.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let capacity = self.batch_capacity;
        if !(1..=MAX_BATCH_CAPACITY).contains(&capacity) {
            return Err(ConfigError::BatchCapacity { capacity, max: MAX_BATCH_CAPACITY });
        }
        let default_weight = self.weights.default_weight;
        if default_weight == 0 || default_weight > capacity {
            return Err(ConfigError::DefaultWeight { weight: default_weight, capacity });
        }
        for (method, &weight) in &self.weights.method_weights {
            if weight == 0 || weight > capacity {
                return Err(ConfigError::MethodWeight { method: method.clone(), weight, capacity });
            }
        }
        Ok(())
    }

    pub fn effective_config(&self) -> EffectiveConfig {
        EffectiveConfig {
            batch_capacity: self.batch_capacity,
            packing: self.packing.as_str(),
            default_weight: self.weights.default_weight,
            method_weights: self.weights.method_weights.clone(),
            skip_methods: self.weights.skip_methods.clone(),
            check_delay_ms: self.timing.check_delay.as_millis() as u64,
            pending_time_ms: self.timing.pending_time.as_millis() as u64,
            max_waiting_ms: self.timing.max_waiting_time.as_millis() as u64,
            overload_backoff_ms: self.timing.overload_backoff.as_millis() as u64,
            shutdown_timeout_secs: self.shutdown_timeout.as_secs(),
        }
    }
}
