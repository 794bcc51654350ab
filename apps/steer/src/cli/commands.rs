//! # CLI Command Implementations
//!
//! This module contains the actual implementations of CLI commands.

use crate::builtins::build_registry;
use crate::config::{ConfigLoader, OrderingKind, SteerConfig};
use crate::error::AppError;
use crate::sinks::{AcceptCounter, JsonLinesWriter, LoggingFetcher, read_events};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use steer_core::{
    CounterScaler, ErrorSignal, Event, MenuOrder, PriorityOrdering, RunSummary, SeedActivation,
    Services, SteerError, SteeringEngine, TimerWatchdog,
};
use tracing::{info, warn};

// =============================================================================
// FILE VALIDATION
// =============================================================================

/// Maximum size of an events file (100 MB).
const MAX_EVENTS_FILE_SIZE: u64 = 100 * 1024 * 1024;

/// Validate file size before reading.
fn validate_file_size(path: &Path, max: u64) -> Result<(), AppError> {
    let metadata = std::fs::metadata(path).map_err(|e| AppError::io(path, e))?;
    if metadata.len() > max {
        return Err(AppError::FileTooLarge {
            path: path.to_path_buf(),
            size: metadata.len(),
            max,
        });
    }
    Ok(())
}

/// Resolve an input path to an existing regular file.
fn validate_file_path(path: &Path) -> Result<PathBuf, AppError> {
    let canonical = path.canonicalize().map_err(|e| AppError::io(path, e))?;
    if !canonical.is_file() {
        return Err(AppError::io(
            path,
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "not a regular file"),
        ));
    }
    Ok(canonical)
}

/// Resolve an output path whose parent directory exists.
fn validate_output_path(path: &Path) -> Result<PathBuf, AppError> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let canonical_parent = parent.canonicalize().map_err(|e| AppError::io(parent, e))?;
    let filename = path.file_name().ok_or_else(|| {
        AppError::io(
            path,
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "output path has no filename"),
        )
    })?;
    Ok(canonical_parent.join(filename))
}

// =============================================================================
// SHARED
// =============================================================================

/// Global output switches.
#[derive(Debug, Clone, Copy, Default)]
pub struct OutputOptions {
    pub json_mode: bool,
    pub quiet: bool,
}

/// Configure an engine for a job: bind built-ins, validate the menu, install
/// the ordering policy and, when asked for, the watchdog.
pub fn build_engine(config: &SteerConfig) -> Result<SteeringEngine, AppError> {
    let registry = build_registry(&config.algorithms)?;
    let engine = SteeringEngine::configure(
        &config.menu,
        registry,
        config.engine.to_engine_config(),
    )?;
    let engine = match config.engine.ordering {
        OrderingKind::Descending => engine.with_ordering(PriorityOrdering::descending()),
        OrderingKind::Ascending => engine.with_ordering(PriorityOrdering::ascending()),
        OrderingKind::Menu => engine.with_ordering(MenuOrder),
    };

    if config.engine.watchdog && config.engine.hard_timeout_ms > 0 {
        let watchdog = TimerWatchdog::spawn().map_err(AppError::Watchdog)?;
        return Ok(engine.with_watchdog(watchdog));
    }
    Ok(engine)
}

/// What a finished job reports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutcome {
    pub summary: RunSummary,
    pub records: u64,
    pub resource_batches: u64,
    /// Resource ids requested across every batch.
    pub resources_fetched: u64,
    pub early_accepts: u64,
    /// Earliest step index at which any event was accepted.
    pub earliest_accept_step: Option<usize>,
    /// Set when the job stopped at a job-level abort.
    pub aborted: Option<ErrorSignal>,
}

/// Steer `events` and write one record per finalized event to `out`.
///
/// A job-level abort is not an error here: it is reported in
/// [`RunOutcome::aborted`] together with the partial summary. A failing
/// writer is.
pub fn run_job<W: Write>(
    config: &SteerConfig,
    events: &[Event],
    out: W,
) -> Result<(RunOutcome, W), AppError> {
    let mut engine = build_engine(config)?;
    let mut activation = SeedActivation::from_menu(&config.menu);
    let mut scaler = CounterScaler::from_menu(&config.menu, config.engine.prescale_seed);
    let mut fetcher = LoggingFetcher::default();
    let mut accepts = AcceptCounter::default();
    let mut writer = JsonLinesWriter::new(out);

    let result = {
        let mut services = Services {
            activation: &mut activation,
            scaler: &mut scaler,
            fetcher: &mut fetcher,
            accept: &mut accepts,
            consumer: &mut writer,
        };
        engine.run_all(events, &mut services)
    };

    let aborted = match result {
        Ok(_) => None,
        Err(SteerError::JobAborted(signal)) => {
            warn!(%signal, "job aborted");
            Some(signal)
        }
        Err(other) => return Err(other.into()),
    };

    let records = writer.written();
    let out = writer.finish().map_err(AppError::Output)?;
    let summary = engine.summary();
    info!(
        events = summary.events,
        accepted = summary.accepted,
        records,
        "run complete"
    );

    Ok((
        RunOutcome {
            summary,
            records,
            resource_batches: fetcher.batches,
            resources_fetched: fetcher.resources,
            early_accepts: accepts.triggers,
            earliest_accept_step: accepts.earliest_step,
            aborted,
        },
        out,
    ))
}

// =============================================================================
// RUN COMMAND
// =============================================================================

/// Steer a file of events.
pub fn cmd_run(
    config_path: &Path,
    events_path: &Path,
    output: Option<&Path>,
    opts: OutputOptions,
) -> Result<(), AppError> {
    let config = ConfigLoader::new(validate_file_path(config_path)?).load()?;
    let events_path = validate_file_path(events_path)?;
    validate_file_size(&events_path, MAX_EVENTS_FILE_SIZE)?;
    let events = read_events(&events_path)?;
    info!(events = events.len(), path = %events_path.display(), "events loaded");

    let outcome = match output {
        Some(path) => {
            let path = validate_output_path(path)?;
            let file = File::create(&path).map_err(|e| AppError::io(&path, e))?;
            run_job(&config, &events, BufWriter::new(file))?.0
        }
        None => run_job(&config, &events, std::io::stdout().lock())?.0,
    };

    if !opts.quiet {
        let text = render_summary(&outcome, opts.json_mode)?;
        // Records own stdout when no output file is given.
        if output.is_none() {
            eprintln!("{text}");
        } else {
            println!("{text}");
        }
    }

    match outcome.aborted {
        Some(signal) => Err(SteerError::JobAborted(signal).into()),
        None => Ok(()),
    }
}

/// Render the run summary as text or JSON.
pub fn render_summary(outcome: &RunOutcome, json_mode: bool) -> Result<String, AppError> {
    let summary = &outcome.summary;

    if json_mode {
        let output = serde_json::json!({
            "events": summary.events,
            "accepted": summary.accepted,
            "aborted_events": summary.aborted_events,
            "records": outcome.records,
            "resource_batches": outcome.resource_batches,
            "resources_fetched": outcome.resources_fetched,
            "early_accepts": outcome.early_accepts,
            "earliest_accept_step": outcome.earliest_accept_step,
            "invocations": summary.invocations,
            "cache_hits": summary.cache_hits,
            "job_aborted": outcome.aborted.map(|signal| signal.to_string()),
            "chains": summary.chains,
        });
        return Ok(serde_json::to_string_pretty(&output)?);
    }

    let mut lines = vec![
        "Steering Summary".to_string(),
        "================".to_string(),
        format!("Events:         {}", summary.events),
        format!("Accepted:       {}", summary.accepted),
        format!("Aborted:        {}", summary.aborted_events),
        format!("Records:        {}", outcome.records),
        format!("Invocations:    {}", summary.invocations),
        format!("Cache Hits:     {}", summary.cache_hits),
        format!("Fetch Batches:  {}", outcome.resource_batches),
        format!("Resources:      {}", outcome.resources_fetched),
    ];
    if let Some(step) = outcome.earliest_accept_step {
        lines.push(format!("First Accept:   step {}", step));
    }
    if let Some(signal) = outcome.aborted {
        lines.push(format!("Job Aborted:    {}", signal));
    }
    lines.push(String::new());
    lines.push(format!(
        "{:<20} {:>8} {:>8} {:>8} {:>8} {:>9} {:>8}",
        "Chain", "Passed", "Rejected", "Error", "Aborted", "Prescaled", "Rerun"
    ));
    for (name, c) in &summary.chains {
        lines.push(format!(
            "{:<20} {:>8} {:>8} {:>8} {:>8} {:>9} {:>8}",
            name, c.passed, c.rejected, c.rejected_by_error, c.aborted, c.prescaled, c.rerun_passed
        ));
    }
    Ok(lines.join("\n"))
}

// =============================================================================
// CHECK COMMAND
// =============================================================================

/// Validate a configuration and show what it resolves to.
pub fn cmd_check(config_path: &Path, opts: OutputOptions) -> Result<(), AppError> {
    let config = ConfigLoader::new(validate_file_path(config_path)?).load()?;
    let engine = build_engine(&config)?;
    let chains = engine.chains();
    let sequences = engine.resolver().steps();

    if opts.json_mode {
        let output = serde_json::json!({
            "seed_types": config.menu.seed_types,
            "sequences": sequences
                .iter()
                .map(|s| serde_json::json!({
                    "output": s.output,
                    "algorithm": s.name,
                    "inputs": s.inputs,
                    "seed": s.seed,
                }))
                .collect::<Vec<_>>(),
            "chains": chains
                .iter()
                .map(|c| serde_json::json!({
                    "name": c.name,
                    "counter": c.id.0,
                    "seed": c.seed,
                    "priority": c.priority,
                    "prescale": c.prescale,
                    "master": c.master.0,
                    "steps": c.steps().iter().map(|s| s.output.as_str()).collect::<Vec<_>>(),
                }))
                .collect::<Vec<_>>(),
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    println!("Menu OK");
    println!("=======");
    println!(
        "Seed types: {}",
        config
            .menu
            .seed_types
            .iter()
            .map(|t| t.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    );
    println!();
    println!("Sequences ({}):", sequences.len());
    for step in sequences {
        let inputs: Vec<&str> = step.inputs.iter().map(|t| t.as_str()).collect();
        println!("  {} <- {}({})", step.output, step.name, inputs.join(", "));
    }
    println!();
    println!("Chains ({}):", chains.len());
    for chain in chains {
        let steps: Vec<&str> = chain.steps().iter().map(|s| s.output.as_str()).collect();
        println!(
            "  [{}] {} prescale={} priority={}: {}",
            chain.id,
            chain.name,
            chain.prescale,
            chain.priority,
            steps.join(" -> ")
        );
    }
    Ok(())
}
