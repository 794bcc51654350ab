//! # Steer - Event Steering Driver
//!
//! The main binary for the steering engine.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                 apps/steer (THE BINARY)              │
//! │                                                      │
//! │  ┌────────────┐   ┌────────────┐   ┌─────────────┐   │
//! │  │    CLI     │   │   Config   │   │  Built-ins  │   │
//! │  │   (clap)   │   │   (toml)   │   │ algorithms  │   │
//! │  └─────┬──────┘   └─────┬──────┘   └──────┬──────┘   │
//! │        └────────────────┼─────────────────┘          │
//! │                         ▼                            │
//! │                 ┌───────────────┐                    │
//! │                 │  steer-core   │                    │
//! │                 │(THE SCHEDULER)│                    │
//! │                 └───────────────┘                    │
//! └──────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```bash
//! steer check --config job.toml
//! steer run --config job.toml --events events.jsonl --output records.jsonl
//! ```

use clap::Parser;
use steer::cli;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

// =============================================================================
// APPLICATION ENTRY POINT
// =============================================================================

fn main() {
    let cli = cli::Cli::parse();

    // STEER_LOG_FORMAT=json enables machine-parseable output.
    let log_format = std::env::var("STEER_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());
    let default_filter = if cli.verbose {
        "steer=debug,steer_core=debug"
    } else {
        "steer=info,steer_core=info"
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default_filter.into());

    // Logs go to stderr; stdout carries records and reports.
    match log_format.as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(std::io::stderr),
                )
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }

    if let Err(e) = cli::execute(cli) {
        tracing::error!("Error: {}", e);
        std::process::exit(1);
    }
}
