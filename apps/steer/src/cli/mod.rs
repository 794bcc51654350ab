//! # Steer CLI Module
//!
//! ## Available Commands
//!
//! - `run` - Steer a file of events through a configured menu
//! - `check` - Validate a configuration and show the resolved menu

mod commands;

use crate::error::AppError;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

pub use commands::*;

// =============================================================================
// CLI STRUCTURE
// =============================================================================

/// Steer - event-level decision steering
///
/// Runs decision chains over events through a shared, memoized feature graph.
#[derive(Parser, Debug)]
#[command(name = "steer")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress the run summary
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Output in JSON format (for programmatic access)
    #[arg(long, global = true)]
    pub json_mode: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Steer events through the menu
    Run {
        /// Job configuration (TOML)
        #[arg(short, long)]
        config: PathBuf,

        /// Events to process (JSON lines)
        #[arg(short, long)]
        events: PathBuf,

        /// Write event records here instead of stdout (JSON lines)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Validate a configuration
    Check {
        /// Job configuration (TOML)
        #[arg(short, long)]
        config: PathBuf,
    },
}

// =============================================================================
// COMMAND EXECUTION
// =============================================================================

/// Execute the CLI with parsed arguments.
pub fn execute(cli: Cli) -> Result<(), AppError> {
    let opts = OutputOptions {
        json_mode: cli.json_mode,
        quiet: cli.quiet,
    };

    match cli.command {
        Commands::Run {
            config,
            events,
            output,
        } => cmd_run(&config, &events, output.as_deref(), opts),
        Commands::Check { config } => cmd_check(&config, opts),
    }
}
