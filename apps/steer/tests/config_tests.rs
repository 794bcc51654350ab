//! Configuration loading tests.

#![allow(clippy::unwrap_used, clippy::panic)]

use std::io::Write;
use steer::ConfigError;
use steer::builtins::BuiltinKind;
use steer::config::{ConfigLoader, OrderingKind};
use steer_core::primitives::DEFAULT_SOFT_TIMEOUT_MS;
use steer_core::{FeatureType, SteeringEngine};
use tempfile::TempDir;

const JOB: &str = r#"
[engine]
hard_timeout_ms = 0
ordering = "menu"
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
priority = 5
steps = [{ output = "Cluster", decision = "cut10" }]

[[menu.chains]]
name = "e20"
counter = 2
seed = "EM"
prescale = 3
steps = [{ output = "Cluster", decision = "cut20", multiplicity = 2 }]

[[menu.groups]]
name = "em"
master = "e10"
members = ["e10", "e20"]

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

fn write(dir: &TempDir, name: &str, content: &str) -> std::path::PathBuf {
    let path = dir.path().join(name);
    let mut file = std::fs::File::create(&path).unwrap();
    file.write_all(content.as_bytes()).unwrap();
    path
}

#[test]
fn loads_a_complete_job() {
    let dir = TempDir::new().unwrap();
    let path = write(&dir, "job.toml", JOB);

    let config = ConfigLoader::new(&path).skip_env_vars().load().unwrap();

    assert_eq!(config.engine.soft_timeout_ms, DEFAULT_SOFT_TIMEOUT_MS);
    assert_eq!(config.engine.hard_timeout_ms, 0);
    assert_eq!(config.engine.ordering, OrderingKind::Menu);
    assert!(config.engine.rerun);

    assert_eq!(config.menu.seed_types, vec![FeatureType::new("EM")]);
    assert_eq!(config.menu.chains.len(), 2);
    assert_eq!(config.menu.chains[0].prescale, 1);
    assert!(config.menu.chains[0].rerun);
    assert_eq!(config.menu.chains[1].prescale, 3);
    assert_eq!(config.menu.chains[1].steps[0].multiplicity, 2);
    assert_eq!(config.menu.groups[0].members, vec!["e10", "e20"]);

    assert_eq!(config.algorithms.len(), 3);
    assert_eq!(config.algorithms[1].kind, BuiltinKind::Threshold);
    assert!(config.algorithms[0].reads);
}

#[test]
fn loaded_job_configures_an_engine() {
    let dir = TempDir::new().unwrap();
    let path = write(&dir, "job.toml", JOB);
    let config = ConfigLoader::new(&path).skip_env_vars().load().unwrap();

    let registry = steer::builtins::build_registry(&config.algorithms).unwrap();
    let engine = SteeringEngine::configure(
        &config.menu,
        registry,
        config.engine.to_engine_config(),
    )
    .unwrap();

    assert_eq!(engine.chains().len(), 2);
    assert_eq!(engine.chains()[1].master, engine.chains()[0].id);
    assert_eq!(engine.config().hard_timeout, None);
}

#[test]
fn empty_file_gives_defaults() {
    let dir = TempDir::new().unwrap();
    let path = write(&dir, "empty.toml", "");

    let config = ConfigLoader::new(&path).skip_env_vars().load().unwrap();

    assert!(config.menu.chains.is_empty());
    assert!(config.algorithms.is_empty());
    assert!(config.engine.watchdog);
}

#[test]
fn missing_file_is_a_read_error() {
    let dir = TempDir::new().unwrap();
    let err = ConfigLoader::new(dir.path().join("nope.toml"))
        .skip_env_vars()
        .load()
        .unwrap_err();
    assert!(matches!(err, ConfigError::ReadFile { .. }));
}

#[test]
fn malformed_toml_is_a_parse_error() {
    let dir = TempDir::new().unwrap();
    let path = write(&dir, "bad.toml", "[engine\nrerun = true");

    let err = ConfigLoader::new(&path).skip_env_vars().load().unwrap_err();
    match err {
        ConfigError::ParseToml { path: reported, .. } => assert_eq!(reported, path),
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn unknown_algorithm_kind_is_a_parse_error() {
    let dir = TempDir::new().unwrap();
    let path = write(
        &dir,
        "job.toml",
        "[[algorithms]]\nname = \"x\"\nkind = \"median\"\n",
    );

    let err = ConfigLoader::new(&path).skip_env_vars().load().unwrap_err();
    assert!(matches!(err, ConfigError::ParseToml { .. }));
}
