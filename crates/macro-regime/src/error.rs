//! Error types for macro regime operations

use std::collections::BTreeMap;
use thiserror::Error;

/// A single series that could not be retrieved during a cache read-through
#[derive(Debug, Clone, PartialEq)]
pub struct SeriesFailure {
    /// Series identifier (e.g. `"VIX"`)
    pub series_id: String,
    /// Human-readable failure reason
    pub reason: String,
    /// Whether a stale cached value was returned in its place
    pub served_stale: bool,
}

/// Macro engine errors
#[derive(Debug, Error)]
pub enum MacroError {
    /// An upstream series fetch failed
    #[error("Source unavailable for {series_id}: {reason}")]
    SourceUnavailable {
        series_id: String,
        reason: String,
    },

    /// A derived metric lacks enough historical observations
    #[error("Insufficient history: need {needed} observations, have {available}")]
    InsufficientHistory {
        needed: usize,
        available: usize,
    },

    /// A ratio was requested with a zero denominator
    #[error("Division undefined: {0}")]
    DivisionUndefined(String),

    /// A mandatory raw field is missing from the snapshot input
    #[error("Malformed snapshot: {0}")]
    MalformedSnapshot(String),

    /// One or more series failed; `values` holds every value that was served
    #[error("{} series failed to fetch", failures.len())]
    PartialFetch {
        values: BTreeMap<String, f64>,
        failures: Vec<SeriesFailure>,
    },

    /// Fetch exceeded the caller-supplied timeout
    #[error("Fetch of {series_id} timed out after {timeout_ms}ms")]
    Timeout {
        series_id: String,
        timeout_ms: u128,
    },

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Cache persistence error
    #[error("Cache store error: {0}")]
    StoreError(String),

    /// Briefing template error
    #[error("Briefing render error: {0}")]
    BriefingError(String),

    /// Network or HTTP error
    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// Filesystem error
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl MacroError {
    /// Shorthand for [`MacroError::SourceUnavailable`]
    pub fn source_unavailable(series_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::SourceUnavailable {
            series_id: series_id.into(),
            reason: reason.into(),
        }
    }
}

impl From<minijinja::Error> for MacroError {
    fn from(err: minijinja::Error) -> Self {
        MacroError::BriefingError(err.to_string())
    }
}

/// Result type alias for macro operations
pub type Result<T> = std::result::Result<T, MacroError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = MacroError::source_unavailable("VIX", "HTTP 503");
        assert_eq!(err.to_string(), "Source unavailable for VIX: HTTP 503");

        let err = MacroError::InsufficientHistory {
            needed: 13,
            available: 11,
        };
        assert_eq!(
            err.to_string(),
            "Insufficient history: need 13 observations, have 11"
        );
    }

    #[test]
    fn test_partial_fetch_display() {
        let mut values = BTreeMap::new();
        values.insert("VIX".to_string(), 18.0);
        values.insert("10Y_YIELD".to_string(), 4.1);
        let err = MacroError::PartialFetch {
            values,
            failures: vec![SeriesFailure {
                series_id: "JP10Y_YIELD".to_string(),
                reason: "timeout".to_string(),
                served_stale: false,
            }],
        };
        assert_eq!(err.to_string(), "1 series failed to fetch");
    }
}
