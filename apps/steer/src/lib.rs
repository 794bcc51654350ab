//! # steer
//!
//! Command-line driver for `steer-core`: loads a TOML job, binds the
//! built-in algorithms, steers a JSON-lines file of events and writes one
//! record per event.

pub mod builtins;
pub mod cli;
pub mod config;
pub mod error;
pub mod sinks;

pub use error::{AppError, ConfigError};
