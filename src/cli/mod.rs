// Copyright 2026 coalesce-core Contributors
// SPDX-License-Identifier: Apache-2.0

//! CLI commands for the `coalesce-cli` binary.
//!
//! ## Usage
//!
//! ```bash
//! coalesce-cli config show              # Effective configuration
//! coalesce-cli config validate          # Exit 0 if valid
//! coalesce-cli simulate 500             # Run 500 calls through a loopback executor
//! ```

pub mod config_cmd;
pub mod simulate;

use std::path::PathBuf;

use crate::config::{self, ConfigError, EnvConfig};

pub use simulate::{run_simulate, simulate, SimulationReport};

/// Value following `--file` in `args`, if any.
pub fn config_file_arg(args: &[String]) -> Option<PathBuf> {
    args.iter()
        .position(|a| a == "--file" || a == "-f")
        .and_then(|i| args.get(i + 1))
        .map(PathBuf::from)
}

/// Configuration from `--file` when given, otherwise from the environment.
pub fn resolve_config(args: &[String]) -> Result<EnvConfig, ConfigError> {
    match config_file_arg(args) {
        Some(path) => config::load_file(&path),
        None => Ok(config::load()),
    }
}
