//! # Configuration
//!
//! One TOML file describes a whole steering job:
//!
//! ```toml
//! [engine]
//! soft_timeout_ms = 1000
//! hard_timeout_ms = 5000   # 0 disables the hard deadline
//! rerun = true
//! ordering = "descending"
//!
//! [menu]
//! seed_types = ["EM"]
//!
//! [[menu.sequences]]
//! output = "Cluster"
//! algorithm = "sum"
//! inputs = ["EM"]
//!
//! [[menu.chains]]
//! name = "e10"
//! counter = 1
//! seed = "EM"
//! steps = [{ output = "Cluster", decision = "cut10" }]
//!
//! [[algorithms]]
//! name = "sum"
//! kind = "sum"
//! ```
//!
//! Environment variables override the `[engine]` table after the file is
//! read:
//!
//! | Variable | Field |
//! |----------|-------|
//! | `STEER_SOFT_TIMEOUT_MS` | `engine.soft_timeout_ms` |
//! | `STEER_HARD_TIMEOUT_MS` | `engine.hard_timeout_ms` |
//! | `STEER_RERUN` | `engine.rerun` |
//! | `STEER_PRESCALE_SEED` | `engine.prescale_seed` |

use crate::builtins::AlgorithmSpec;
use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use steer_core::primitives::{
    DEFAULT_HARD_TIMEOUT_MS, DEFAULT_PRESCALE_SEED, DEFAULT_SOFT_TIMEOUT_MS,
};
use steer_core::{EngineConfig, Menu};
use tracing::debug;

/// Environment variable names.
pub mod env {
    pub const SOFT_TIMEOUT_MS: &str = "STEER_SOFT_TIMEOUT_MS";
    pub const HARD_TIMEOUT_MS: &str = "STEER_HARD_TIMEOUT_MS";
    pub const RERUN: &str = "STEER_RERUN";
    pub const PRESCALE_SEED: &str = "STEER_PRESCALE_SEED";
}

// =============================================================================
// ENGINE SETTINGS
// =============================================================================

/// Static chain ordering applied each step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderingKind {
    /// Highest priority first.
    #[default]
    Descending,
    Ascending,
    /// Menu declaration order.
    Menu,
}

/// The `[engine]` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Cooperative per-event budget. 0 disables it.
    pub soft_timeout_ms: u64,
    /// Watchdog per-event budget. 0 disables it.
    pub hard_timeout_ms: u64,
    pub rerun: bool,
    pub decisions_enabled: bool,
    pub prescale_seed: u64,
    pub ordering: OrderingKind,
    /// Enforce the hard deadline from a background thread.
    pub watchdog: bool,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            soft_timeout_ms: DEFAULT_SOFT_TIMEOUT_MS,
            hard_timeout_ms: DEFAULT_HARD_TIMEOUT_MS,
            rerun: true,
            decisions_enabled: true,
            prescale_seed: DEFAULT_PRESCALE_SEED,
            ordering: OrderingKind::default(),
            watchdog: true,
        }
    }
}

impl EngineSettings {
    /// Engine configuration for these settings.
    #[must_use]
    pub fn to_engine_config(&self) -> EngineConfig {
        let budget = |ms: u64| (ms > 0).then(|| Duration::from_millis(ms));
        EngineConfig::default()
            .with_soft_timeout(budget(self.soft_timeout_ms))
            .with_hard_timeout(budget(self.hard_timeout_ms))
            .with_rerun(self.rerun)
            .with_decisions(self.decisions_enabled)
    }
}

/// A complete steering job.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SteerConfig {
    #[serde(default)]
    pub engine: EngineSettings,
    #[serde(default)]
    pub menu: Menu,
    #[serde(default)]
    pub algorithms: Vec<AlgorithmSpec>,
}

// =============================================================================
// LOADER
// =============================================================================

/// Reads a [`SteerConfig`] from a TOML file and applies environment
/// overrides.
///
/// # Example
///
/// ```ignore
/// let config = ConfigLoader::new("job.toml").load()?;
///
/// // Without the environment (tests)
/// let config = ConfigLoader::new("job.toml").skip_env_vars().load()?;
/// ```
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    path: PathBuf,
    skip_env: bool,
}

impl ConfigLoader {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            skip_env: false,
        }
    }

    /// Ignore `STEER_*` environment variables.
    #[must_use]
    pub fn skip_env_vars(mut self) -> Self {
        self.skip_env = true;
        self
    }

    pub fn load(&self) -> Result<SteerConfig, ConfigError> {
        let mut config = Self::load_file(&self.path)?;
        if !self.skip_env {
            apply_env_vars(&mut config.engine, |name| std::env::var(name).ok())?;
        }
        debug!(
            path = %self.path.display(),
            chains = config.menu.chains.len(),
            algorithms = config.algorithms.len(),
            "configuration loaded"
        );
        Ok(config)
    }

    fn load_file(path: &Path) -> Result<SteerConfig, ConfigError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| ConfigError::read_file(path, e))?;
        toml::from_str(&content).map_err(|e| ConfigError::parse_toml(path, e))
    }
}

/// Apply overrides looked up through `var`.
pub fn apply_env_vars(
    settings: &mut EngineSettings,
    var: impl Fn(&str) -> Option<String>,
) -> Result<(), ConfigError> {
    macro_rules! parse_env {
        ($name:expr, $field:expr, $parse:expr, $expected:literal) => {
            if let Some(raw) = var($name) {
                $field = $parse(raw.trim())
                    .ok_or_else(|| ConfigError::invalid_env_var($name, $expected))?;
            }
        };
    }

    let number = |s: &str| s.parse::<u64>().ok();
    parse_env!(
        env::SOFT_TIMEOUT_MS,
        settings.soft_timeout_ms,
        number,
        "expected milliseconds"
    );
    parse_env!(
        env::HARD_TIMEOUT_MS,
        settings.hard_timeout_ms,
        number,
        "expected milliseconds"
    );
    parse_env!(env::RERUN, settings.rerun, parse_bool, "expected a boolean");
    parse_env!(
        env::PRESCALE_SEED,
        settings.prescale_seed,
        number,
        "expected an unsigned integer"
    );
    Ok(())
}

/// Parse a boolean environment value.
fn parse_bool(s: &str) -> Option<bool> {
    match s.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: BTreeMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name: &str| map.get(name).cloned()
    }

    #[test]
    fn defaults_match_engine_defaults() {
        let settings = EngineSettings::default();
        assert_eq!(settings.to_engine_config(), EngineConfig::default());
    }

    #[test]
    fn zero_budgets_disable_deadlines() {
        let settings = EngineSettings {
            soft_timeout_ms: 0,
            hard_timeout_ms: 0,
            ..EngineSettings::default()
        };
        let config = settings.to_engine_config();
        assert_eq!(config.soft_timeout, None);
        assert_eq!(config.hard_timeout, None);
    }

    #[test]
    fn env_overrides_engine_settings() {
        let mut settings = EngineSettings::default();
        apply_env_vars(
            &mut settings,
            vars(&[
                (env::SOFT_TIMEOUT_MS, "250"),
                (env::HARD_TIMEOUT_MS, " 0 "),
                (env::RERUN, "off"),
                (env::PRESCALE_SEED, "42"),
            ]),
        )
        .expect("apply");

        assert_eq!(settings.soft_timeout_ms, 250);
        assert_eq!(settings.hard_timeout_ms, 0);
        assert!(!settings.rerun);
        assert_eq!(settings.prescale_seed, 42);
    }

    #[test]
    fn invalid_env_value_is_an_error() {
        let mut settings = EngineSettings::default();
        let err = apply_env_vars(&mut settings, vars(&[(env::RERUN, "maybe")])).err();
        assert!(matches!(
            err,
            Some(ConfigError::InvalidEnvVar { name, .. }) if name == env::RERUN
        ));
    }

    #[test]
    fn parse_bool_variants() {
        for yes in ["true", "TRUE", "1", "yes", "on"] {
            assert_eq!(parse_bool(yes), Some(true), "{yes}");
        }
        for no in ["false", "0", "no", "Off"] {
            assert_eq!(parse_bool(no), Some(false), "{no}");
        }
        assert_eq!(parse_bool(""), None);
    }
}
