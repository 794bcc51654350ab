//! # Event Input and Result Output
//!
//! Events are read from JSON lines, one [`Event`] per line. Results go out
//! the same way, one [`EventRecord`] per line.

use crate::error::AppError;
use std::collections::BTreeSet;
use std::io::{BufRead, BufReader, Write};
use std::path::Path;
use steer_core::{
    ErrorSignal, Event, EventAcceptSink, EventRecord, Reason, ResourceFetcher, ResourceId,
    ResultConsumer,
};
use tracing::{debug, error};

/// Read every event of a JSON-lines file. Blank lines are skipped.
pub fn read_events(path: &Path) -> Result<Vec<Event>, AppError> {
    let file = std::fs::File::open(path).map_err(|e| AppError::io(path, e))?;
    let mut events = Vec::new();
    for (index, line) in BufReader::new(file).lines().enumerate() {
        let line = line.map_err(|e| AppError::io(path, e))?;
        if line.trim().is_empty() {
            continue;
        }
        let event = serde_json::from_str(&line).map_err(|source| AppError::Event {
            path: path.to_path_buf(),
            line: index + 1,
            source,
        })?;
        events.push(event);
    }
    Ok(events)
}

// =============================================================================
// RESULT WRITER
// =============================================================================

/// Writes one JSON line per finalized event.
///
/// A write failure is a job-level abort: nothing downstream would see the
/// remaining events. The underlying error is kept for the caller.
#[derive(Debug)]
pub struct JsonLinesWriter<W: Write> {
    out: W,
    written: u64,
    failure: Option<std::io::Error>,
}

impl<W: Write> JsonLinesWriter<W> {
    #[must_use]
    pub fn new(out: W) -> Self {
        Self {
            out,
            written: 0,
            failure: None,
        }
    }

    /// Number of records written.
    #[must_use]
    pub fn written(&self) -> u64 {
        self.written
    }

    /// Flush and return the first write failure, if any.
    pub fn finish(mut self) -> Result<W, std::io::Error> {
        if let Some(err) = self.failure.take() {
            return Err(err);
        }
        self.out.flush()?;
        Ok(self.out)
    }

    fn write(&mut self, record: &EventRecord) -> std::io::Result<()> {
        serde_json::to_writer(&mut self.out, record)?;
        self.out.write_all(b"\n")
    }
}

impl<W: Write> ResultConsumer for JsonLinesWriter<W> {
    fn finalize(&mut self, record: &EventRecord) -> ErrorSignal {
        match self.write(record) {
            Ok(()) => {
                self.written = self.written.saturating_add(1);
                ErrorSignal::OK
            }
            Err(err) => {
                error!(error = %err, "failed to write event record");
                if self.failure.is_none() {
                    self.failure = Some(err);
                }
                ErrorSignal::abort_job(Reason::ResultFailure)
            }
        }
    }
}

// =============================================================================
// FETCHER & ACCEPT SINK
// =============================================================================

/// Fetcher that only logs and counts what it is asked for.
#[derive(Debug, Default)]
pub struct LoggingFetcher {
    pub batches: u64,
    pub resources: u64,
}

impl ResourceFetcher for LoggingFetcher {
    fn request(&mut self, ids: &BTreeSet<ResourceId>) -> Result<(), ErrorSignal> {
        debug!(count = ids.len(), "resource batch requested");
        self.batches = self.batches.saturating_add(1);
        self.resources = self.resources.saturating_add(ids.len() as u64);
        Ok(())
    }
}

/// Counts early accept triggers by step index.
#[derive(Debug, Default)]
pub struct AcceptCounter {
    pub triggers: u64,
    pub earliest_step: Option<usize>,
}

impl EventAcceptSink for AcceptCounter {
    fn trigger(&mut self, step_index: usize) {
        self.triggers = self.triggers.saturating_add(1);
        self.earliest_step = Some(
            self.earliest_step
                .map_or(step_index, |step| step.min(step_index)),
        );
    }
}

// =============================================================================
// TESTS
// =============================================================================
