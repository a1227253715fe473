// Copyright 2026 coalesce-core Contributors
// SPDX-License-Identifier: Apache-2.0

//! Config CLI subcommands: show, defaults, validate.

use crate::config::{EffectiveConfig, EnvConfig};

/// Print the effective config as `KEY=value` lines, or JSON with `json`.
pub fn run_show(cfg: &EnvConfig, json: bool) -> i32 {
    let effective = cfg.effective_config();
    if json {
        match serde_json::to_string_pretty(&effective) {
            Ok(text) => println!("{text}"),
            Err(e) => {
                eprintln!("Failed to render config: {e}");
                return 1;
            }
        }
    } else {
        for line in render_lines(&effective) {
            println!("{line}");
        }
    }
    0
}

/// Print the built-in defaults (no env or file overrides).
pub fn run_defaults() {
    for line in render_lines(&EnvConfig::default().effective_config()) {
        println!("{line}");
    }
}

/// Validate configuration.
///
/// Returns 0 if valid, 2 on a configuration error, 1 on warnings only.
pub fn run_validate(cfg: &EnvConfig) -> i32 {
    if let Err(e) = cfg.validate() {
        eprintln!("ERROR: {e}");
        return 2;
    }

    let warnings = collect_warnings(cfg);
    for warning in &warnings {
        eprintln!("WARNING: {warning}");
    }
    if warnings.is_empty() {
        println!("Configuration is valid.");
        0
    } else {
        1
    }
}

/// Settings that are legal but almost certainly unintended.
pub fn collect_warnings(cfg: &EnvConfig) -> Vec<String> {
    let mut warnings = Vec::new();
    if cfg.timing.pending_time > cfg.timing.max_waiting_time {
        warnings.push(format!(
            "COALESCE_PENDING_TIME_MS ({}) exceeds COALESCE_MAX_WAITING_MS ({}); the quiet window never triggers first",
            cfg.timing.pending_time.as_millis(),
            cfg.timing.max_waiting_time.as_millis()
        ));
    }
    if cfg.timing.check_delay > cfg.timing.max_waiting_time {
        warnings.push(format!(
            "COALESCE_CHECK_DELAY_MS ({}) exceeds COALESCE_MAX_WAITING_MS ({})",
            cfg.timing.check_delay.as_millis(),
            cfg.timing.max_waiting_time.as_millis()
        ));
    }
    for method in cfg.weights.method_weights.keys() {
        if cfg.weights.is_skipped(method) {
            warnings.push(format!("method '{method}' has a weight but is always sent directly"));
        }
    }
    warnings
}

fn render_lines(cfg: &EffectiveConfig) -> Vec<String> {
    let join_weights = cfg
        .method_weights
        .iter()
        .map(|(name, weight)| format!("{name}={weight}"))
        .collect::<Vec<_>>()
        .join(",");
    let join_skip = cfg.skip_methods.iter().cloned().collect::<Vec<_>>().join(",");
    vec![
        format!("COALESCE_BATCH_CAPACITY={}", cfg.batch_capacity),
        format!("COALESCE_DEFAULT_WEIGHT={}", cfg.default_weight),
        format!("COALESCE_METHOD_WEIGHTS={join_weights}"),
        format!("COALESCE_SKIP_METHODS={join_skip}"),
        format!("COALESCE_PACKING={}", cfg.packing),
        format!("COALESCE_CHECK_DELAY_MS={}", cfg.check_delay_ms),
        format!("COALESCE_PENDING_TIME_MS={}", cfg.pending_time_ms),
        format!("COALESCE_MAX_WAITING_MS={}", cfg.max_waiting_ms),
        format!("COALESCE_OVERLOAD_BACKOFF_MS={}", cfg.overload_backoff_ms),
        format!("COALESCE_SHUTDOWN_TIMEOUT={}", cfg.shutdown_timeout_secs),
    ]
}
