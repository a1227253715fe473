//! coalesce-cli entry point.
//!
//! ## Subcommands
//!
//! - `coalesce-cli config show|defaults|validate` - Inspect configuration
//! - `coalesce-cli simulate [calls]` - Run calls through a loopback executor
//! - `coalesce-cli version` / `help`

use std::process::ExitCode;

use coalesce_core::cli::{self, config_cmd};
use coalesce_core::config;
use coalesce_core::telemetry;

#[tokio::main]
async fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();
    let command = args.get(1).map(|s| s.as_str()).unwrap_or("help");

    match command {
        "config" => {
            let subcommand = args.get(2).map(|s| s.as_str()).unwrap_or("show");
            if subcommand == "defaults" {
                config_cmd::run_defaults();
                return ExitCode::SUCCESS;
            }
            let cfg = match cli::resolve_config(&args) {
                Ok(cfg) => cfg,
                Err(e) => {
                    eprintln!("Configuration error: {e}");
                    return ExitCode::from(2u8);
                }
            };
            match subcommand {
                "show" => {
                    let json = args.iter().any(|a| a == "--json");
                    ExitCode::from(config_cmd::run_show(&cfg, json) as u8)
                }
                "validate" => ExitCode::from(config_cmd::run_validate(&cfg) as u8),
                _ => {
                    eprintln!("Unknown config subcommand: {}", subcommand);
                    print_command_help("config");
                    ExitCode::FAILURE
                }
            }
        }
        "simulate" => {
            if let Err(e) = telemetry::init_logging(&config::load_log_config()) {
                eprintln!("Logging disabled: {e}");
            }
            telemetry::init_metrics();
            let cfg = match cli::resolve_config(&args) {
                Ok(cfg) => cfg,
                Err(e) => {
                    eprintln!("Configuration error: {e}");
                    return ExitCode::from(2u8);
                }
            };
            ExitCode::from(cli::run_simulate(&args, cfg).await as u8)
        }
        "help" | "--help" | "-h" => {
            if let Some(subcommand) = args.get(2) {
                print_command_help(subcommand);
            } else {
                print_usage();
            }
            ExitCode::SUCCESS
        }
        "version" | "--version" | "-V" => {
            println!("coalesce-cli {}", env!("CARGO_PKG_VERSION"));
            ExitCode::SUCCESS
        }
        _ => {
            eprintln!("Unknown command: {}", command);
            print_usage();
            ExitCode::FAILURE
        }
    }
}

fn print_usage() {
    let version = env!("CARGO_PKG_VERSION");
    eprintln!(
        "coalesce-cli - request-coalescing batch scheduler v{}

USAGE:
    coalesce-cli [COMMAND] [OPTIONS]

COMMANDS:
    config       Inspect configuration (show, defaults, validate)
    simulate     Run calls through a loopback executor and report batching
    version      Show version information
    help         Show this help message

OPTIONS:
    -f, --file PATH  Load configuration from a TOML file instead of the environment

ENVIRONMENT:
    COALESCE_BATCH_CAPACITY   Max combined weight per batch (default: 25)
    COALESCE_PENDING_TIME_MS  Quiet window before a flush (default: 1000)
    COALESCE_MAX_WAITING_MS   Longest wait for the oldest call (default: 5000)
    COALESCE_LOG_LEVEL        Log filter (default: info)
    COALESCE_LOG_FORMAT       json or pretty (default: json)

    Run `coalesce-cli config defaults` for the full list.

EXIT CODES:
    0  Success
    1  Failure / warnings
    2  Configuration error
",
        version
    );
}

fn print_command_help(command: &str) {
    match command {
        "config" => {
            eprintln!(
                "coalesce-cli config - Inspect configuration

USAGE:
    coalesce-cli config show [--json] [--file PATH]
    coalesce-cli config defaults
    coalesce-cli config validate [--file PATH]

DESCRIPTION:
    show      Print effective values after env or file overrides
    defaults  Print built-in defaults
    validate  Exit 0 if valid, 1 on warnings, 2 on errors
"
            );
        }
        "simulate" => {
            eprintln!(
                "coalesce-cli simulate - Exercise the scheduler locally

USAGE:
    coalesce-cli simulate [CALLS] [--latency-ms N] [--json] [--file PATH]

DESCRIPTION:
    Submits CALLS calls (default 200) with random weights to a loopback
    executor that echoes every call, waits for all outcomes, shuts down,
    and prints batch statistics.
"
            );
        }
        _ => print_usage(),
    }
}
