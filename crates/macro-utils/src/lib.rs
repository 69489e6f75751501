//! Shared utilities for the macro regime workspace
//!
//! This crate provides the ambient pieces used by the engine and its binaries:
//! tracing setup and JSON configuration loading with environment expansion.

pub mod config;
pub mod logging;

pub use config::{ConfigError, load_json, resolve_env_string};
pub use logging::{init_json_tracing, init_tracing};
