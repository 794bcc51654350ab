//! # Application Errors
//!
//! Everything the binary can fail with. Engine configuration problems arrive
//! wrapped as [`SteerError`]; the rest is file handling and parsing.

use std::path::PathBuf;
use steer_core::SteerError;
use thiserror::Error;

/// Configuration error type.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read config file.
    #[error("failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Failed to parse TOML.
    #[error("failed to parse config file '{path}': {source}")]
    ParseToml {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    /// Invalid environment variable value.
    #[error("invalid value for environment variable '{name}': {message}")]
    InvalidEnvVar { name: String, message: String },

    /// Two algorithms share a binding name.
    #[error("algorithm '{0}' is declared more than once")]
    DuplicateAlgorithm(String),
}

impl ConfigError {
    pub fn read_file(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::ReadFile {
            path: path.into(),
            source,
        }
    }

    pub fn parse_toml(path: impl Into<PathBuf>, source: toml::de::Error) -> Self {
        Self::ParseToml {
            path: path.into(),
            source,
        }
    }

    pub fn invalid_env_var(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidEnvVar {
            name: name.into(),
            message: message.into(),
        }
    }
}

/// Top-level error of the binary.
#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Steer(#[from] SteerError),

    /// Reading events or writing results failed.
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// An event line is not valid JSON.
    #[error("invalid event at {path}:{line}: {source}")]
    Event {
        path: PathBuf,
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    /// Input file over the size limit.
    #[error("file '{path}' is {size} bytes, limit is {max}")]
    FileTooLarge { path: PathBuf, size: u64, max: u64 },

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// The watchdog thread could not be started.
    #[error("failed to start watchdog: {0}")]
    Watchdog(#[source] std::io::Error),

    /// The result writer failed mid-run.
    #[error("result output failed: {0}")]
    Output(#[source] std::io::Error),
}

impl AppError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_errors_name_the_culprit() {
        let err = ConfigError::invalid_env_var("STEER_RERUN", "expected bool");
        assert_eq!(
            err.to_string(),
            "invalid value for environment variable 'STEER_RERUN': expected bool"
        );
    }

    #[test]
    fn steer_errors_pass_through() {
        let err = AppError::from(SteerError::UnknownChain("e5".to_string()));
        assert_eq!(err.to_string(), "unknown chain 'e5'");
    }
}
