//! Configuration file loading
//!
//! Configuration lives in JSON files. String values may reference environment
//! variables with `${VAR}` or `$VAR`; references are expanded before the
//! document is deserialized into the caller's type.

use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors raised while loading a configuration file
#[derive(Debug, Error)]
pub enum ConfigError {
    /// File could not be read
    #[error("Failed to read config file '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// File is not valid JSON or does not match the target type
    #[error("Failed to parse config file '{path}': {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// A referenced environment variable is not set
    #[error("Environment variable not found: {0}")]
    EnvVarNotFound(String),

    #[error("Invalid variable pattern: {0}")]
    Pattern(#[from] regex::Error),
}

/// Load a JSON configuration file into `T`
///
/// Every string in the document is passed through [`resolve_env_string`]
/// before deserialization.
pub fn load_json<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T, ConfigError> {
    let path = path.as_ref();
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    let mut document: serde_json::Value =
        serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
    resolve_value(&mut document)?;

    tracing::debug!("Loaded config from {}", path.display());

    serde_json::from_value(document).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

fn resolve_value(value: &mut serde_json::Value) -> Result<(), ConfigError> {
    match value {
        serde_json::Value::String(s) => {
            *s = resolve_env_string(s)?;
        }
        serde_json::Value::Array(items) => {
            for item in items {
                resolve_value(item)?;
            }
        }
        serde_json::Value::Object(map) => {
            for item in map.values_mut() {
                resolve_value(item)?;
            }
        }
        _ => {}
    }
    Ok(())
}

/// Resolve environment variable references in strings
///
/// Supports `${VAR}` and `$VAR` syntax.
pub fn resolve_env_string(s: &str) -> Result<String, ConfigError> {
    let re_braces = regex::Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}")?;
    let re_simple = regex::Regex::new(r"\$([A-Za-z_][A-Za-z0-9_]*)")?;

    let mut result = s.to_string();
    for cap in re_braces.captures_iter(s) {
        let value = lookup(&cap[1])?;
        result = result.replace(&cap[0], &value);
    }

    for cap in re_simple.captures_iter(&result.clone()) {
        let value = lookup(&cap[1])?;
        result = result.replace(&cap[0], &value);
    }

    Ok(result)
}

fn lookup(name: &str) -> Result<String, ConfigError> {
    std::env::var(name).map_err(|_| ConfigError::EnvVarNotFound(name.to_string()))
}
