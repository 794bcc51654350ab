//! End-to-end tests of the `run` and `check` commands.

#![allow(clippy::unwrap_used, clippy::panic)]

use std::io::Write;
use std::path::PathBuf;
use steer::AppError;
use steer::cli::{OutputOptions, cmd_check, cmd_run, render_summary, run_job};
use steer::config::ConfigLoader;
use steer::sinks::read_events;
use steer_core::{Action, EventRecord, Outcome, Reason, SteerError};
use tempfile::TempDir;

const JOB: &str = r#"
[engine]
hard_timeout_ms = 0
watchdog = false

[menu]
seed_types = ["EM"]

[[menu.sequences]]
output = "Cluster"
algorithm = "sum"
inputs = ["EM"]

[[menu.chains]]
name = "e10"
counter = 1
seed = "EM"
steps = [{ output = "Cluster", decision = "cut10" }]

[[menu.chains]]
name = "e20"
counter = 2
seed = "EM"
steps = [{ output = "Cluster", decision = "cut20" }]

[[algorithms]]
name = "sum"
kind = "sum"
reads = true

[[algorithms]]
name = "cut10"
kind = "threshold"
param = 10

[[algorithms]]
name = "cut20"
kind = "threshold"
param = 20
"#;

const EVENTS: &str = r#"{"identity":{"run":1,"lumi_block":1,"number":1},"seeds":[{"type":"EM","roi":1,"payload":[15]}]}

{"identity":{"run":1,"lumi_block":1,"number":2},"seeds":[{"type":"EM","roi":1,"payload":[25]}]}
{"identity":{"run":1,"lumi_block":2,"number":3},"seeds":[{"type":"EM","roi":4,"payload":[5]}]}
"#;

fn write(dir: &TempDir, name: &str, content: &str) -> PathBuf {
    let path = dir.path().join(name);
    let mut file = std::fs::File::create(&path).unwrap();
    file.write_all(content.as_bytes()).unwrap();
    path
}

fn quiet() -> OutputOptions {
    OutputOptions {
        json_mode: false,
        quiet: true,
    }
}

fn records(bytes: &[u8]) -> Vec<EventRecord> {
    std::str::from_utf8(bytes)
        .unwrap()
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect()
}

#[test]
fn events_file_skips_blank_lines() {
    let dir = TempDir::new().unwrap();
    let path = write(&dir, "events.jsonl", EVENTS);

    let events = read_events(&path).unwrap();

    assert_eq!(events.len(), 3);
    assert_eq!(events[2].seeds[0].roi.0, 4);
}

#[test]
fn bad_event_line_reports_its_number() {
    let dir = TempDir::new().unwrap();
    let path = write(&dir, "events.jsonl", "{\"seeds\":[]}\n{oops\n");

    match read_events(&path).unwrap_err() {
        AppError::Event { line, .. } => assert_eq!(line, 2),
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn run_job_steers_every_event() {
    let dir = TempDir::new().unwrap();
    let config = ConfigLoader::new(write(&dir, "job.toml", JOB))
        .skip_env_vars()
        .load()
        .unwrap();
    let events = read_events(&write(&dir, "events.jsonl", EVENTS)).unwrap();

    let (outcome, out) = run_job(&config, &events, Vec::new()).unwrap();

    assert_eq!(outcome.aborted, None);
    assert_eq!(outcome.records, 3);
    assert_eq!(outcome.summary.events, 3);
    assert_eq!(outcome.summary.accepted, 2);
    assert_eq!(outcome.early_accepts, 2);
    // One Cluster per event, shared by both chains.
    assert_eq!(outcome.summary.invocations, 3);
    assert_eq!(outcome.resource_batches, 3);
    assert_eq!(outcome.resources_fetched, 3);
    assert_eq!(outcome.earliest_accept_step, Some(0));
    assert_eq!(outcome.summary.chains["e10"].passed, 2);
    assert_eq!(outcome.summary.chains["e10"].rejected, 1);
    assert_eq!(outcome.summary.chains["e20"].passed, 1);
    assert_eq!(outcome.summary.chains["e20"].rejected, 2);

    let records = records(&out);
    assert_eq!(records.len(), 3);
    assert!(records[0].accepted);
    let names: Vec<&str> = records[0].verdicts.iter().map(|v| v.name.as_str()).collect();
    assert_eq!(names, ["e10", "e20"]);
    assert_eq!(records[0].verdicts[0].outcome, Outcome::Passed);
    assert_eq!(records[0].verdicts[1].outcome, Outcome::Rejected);
    assert!(!records[2].accepted);
}

#[test]
fn hard_deadline_aborts_the_job() {
    let job = r#"
[engine]
soft_timeout_ms = 0
hard_timeout_ms = 5
watchdog = false

[menu]
seed_types = ["EM"]

[[menu.sequences]]
output = "Slow"
algorithm = "slow"
inputs = ["EM"]

[[menu.chains]]
name = "slow"
counter = 1
seed = "EM"
steps = [{ output = "Slow" }]

[[algorithms]]
name = "slow"
kind = "sleep"
param = 40
"#;
    let dir = TempDir::new().unwrap();
    let config = ConfigLoader::new(write(&dir, "job.toml", job))
        .skip_env_vars()
        .load()
        .unwrap();
    let events = read_events(&write(&dir, "events.jsonl", EVENTS)).unwrap();

    let (outcome, out) = run_job(&config, &events, Vec::new()).unwrap();

    let signal = outcome.aborted.unwrap();
    assert_eq!(signal.action, Action::AbortJob);
    assert_eq!(signal.reason, Reason::HardTimeout);
    assert_eq!(outcome.summary.events, 1);
    assert_eq!(outcome.records, 0);
    assert!(out.is_empty());

    let text = render_summary(&outcome, false).unwrap();
    assert!(text.contains("Job Aborted"));
    assert!(!text.contains("First Accept"));
}

#[test]
fn cmd_run_writes_records_file() {
    let dir = TempDir::new().unwrap();
    let config = write(&dir, "job.toml", JOB);
    let events = write(&dir, "events.jsonl", EVENTS);
    let output = dir.path().join("records.jsonl");

    cmd_run(&config, &events, Some(&output), quiet()).unwrap();

    let records = records(&std::fs::read(&output).unwrap());
    assert_eq!(records.len(), 3);
    assert_eq!(records[1].identity.map(|id| id.number), Some(2));
}

#[test]
fn cmd_run_rejects_missing_events_file() {
    let dir = TempDir::new().unwrap();
    let config = write(&dir, "job.toml", JOB);

    let err = cmd_run(&config, &dir.path().join("nope.jsonl"), None, quiet()).unwrap_err();
    assert!(matches!(err, AppError::Io { .. }));
}

#[test]
fn cmd_check_accepts_a_valid_job() {
    let dir = TempDir::new().unwrap();
    let config = write(&dir, "job.toml", JOB);

    cmd_check(&config, quiet()).unwrap();
}

#[test]
fn cmd_check_reports_unbound_decision() {
    let dir = TempDir::new().unwrap();
    let config = write(&dir, "job.toml", &JOB.replace("name = \"cut20\"", "name = \"cut30\""));

    let err = cmd_check(&config, quiet()).unwrap_err();
    assert!(matches!(
        err,
        AppError::Steer(SteerError::UnresolvedBinding(name)) if name == "cut20"
    ));
}

#[test]
fn json_summary_lists_chains() {
    let dir = TempDir::new().unwrap();
    let config = ConfigLoader::new(write(&dir, "job.toml", JOB))
        .skip_env_vars()
        .load()
        .unwrap();
    let events = read_events(&write(&dir, "events.jsonl", EVENTS)).unwrap();
    let (outcome, _) = run_job(&config, &events, Vec::new()).unwrap();

    let text = render_summary(&outcome, true).unwrap();
    let value: serde_json::Value = serde_json::from_str(&text).unwrap();

    assert_eq!(value["events"], 3);
    assert_eq!(value["resources_fetched"], 3);
    assert_eq!(value["earliest_accept_step"], 0);
    assert_eq!(value["chains"]["e20"]["passed"], 1);
    assert!(value["job_aborted"].is_null());
}

#[test]
fn demo_job_runs_clean() {
    let demos = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../demos");
    let config = ConfigLoader::new(demos.join("job.toml"))
        .skip_env_vars()
        .load()
        .unwrap();
    let events = read_events(&demos.join("events.jsonl")).unwrap();

    let (outcome, out) = run_job(&config, &events, Vec::new()).unwrap();

    assert_eq!(outcome.aborted, None);
    assert_eq!(outcome.summary.events, 5);
    assert_eq!(outcome.records, 5);
    // The event without identity.
    assert_eq!(outcome.summary.aborted_events, 1);
    assert!(outcome.summary.accepted >= 1);
    assert!(records(&out)[3].identity.is_none());
}
