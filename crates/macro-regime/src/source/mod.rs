//! Upstream series sources
//!
//! [`SeriesSource`] is the fetch boundary the cache reads through. The FRED
//! client is the production implementation; [`StaticSource`] serves fixed
//! values from memory or a JSON fixture file.

pub mod fred;

pub use fred::{FredClient, FredSource};

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::error::{MacroError, Result};

/// Fetches the value of one series as of a date
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SeriesSource: Send + Sync {
    /// Latest observation of `series_id` on or before `as_of`
    ///
    /// Implementations should give up after `timeout`; the cache enforces it
    /// regardless.
    async fn fetch_series(&self, series_id: &str, as_of: NaiveDate, timeout: Duration)
    -> Result<f64>;

    /// Every observation of `series_id` dated within `start..=end`
    ///
    /// An empty range is an error, not an empty map.
    async fn fetch_history(
        &self,
        series_id: &str,
        start: NaiveDate,
        end: NaiveDate,
        timeout: Duration,
    ) -> Result<BTreeMap<NaiveDate, f64>>;
}

/// Fixture file layout read by [`StaticSource::from_json_file`]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StaticFixture {
    /// Value returned for any date
    pub values: HashMap<String, f64>,
    /// Dated observations; the latest one on or before `as_of` wins over `values`
    pub history: HashMap<String, BTreeMap<NaiveDate, f64>>,
    /// Series that always fail
    pub failing: HashSet<String>,
}

/// In-memory source with fixed values
#[derive(Debug, Default)]
pub struct StaticSource {
    fixture: StaticFixture,
    calls: AtomicUsize,
}

impl StaticSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_fixture(fixture: StaticFixture) -> Self {
        Self {
            fixture,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let fixture: StaticFixture = macro_utils::load_json(path.as_ref())
            .map_err(|e| MacroError::ConfigError(e.to_string()))?;
        Ok(Self::from_fixture(fixture))
    }

    pub fn with_value(mut self, series_id: impl Into<String>, value: f64) -> Self {
        self.fixture.values.insert(series_id.into(), value);
        self
    }

    pub fn with_observation(
        mut self,
        series_id: impl Into<String>,
        date: NaiveDate,
        value: f64,
    ) -> Self {
        self.fixture
            .history
            .entry(series_id.into())
            .or_default()
            .insert(date, value);
        self
    }

    pub fn with_failure(mut self, series_id: impl Into<String>) -> Self {
        self.fixture.failing.insert(series_id.into());
        self
    }

    /// Number of fetches served so far
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn lookup(&self, series_id: &str, as_of: NaiveDate) -> Option<f64> {
        self.fixture
            .history
            .get(series_id)
            .and_then(|history| history.range(..=as_of).next_back().map(|(_, v)| *v))
            .or_else(|| self.fixture.values.get(series_id).copied())
    }
}

#[async_trait]
impl SeriesSource for StaticSource {
    async fn fetch_series(
        &self,
        series_id: &str,
        as_of: NaiveDate,
        _timeout: Duration,
    ) -> Result<f64> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fixture.failing.contains(series_id) {
            return Err(MacroError::source_unavailable(series_id, "configured to fail"));
        }
        self.lookup(series_id, as_of).ok_or_else(|| {
            MacroError::source_unavailable(series_id, format!("no observation on or before {as_of}"))
        })
    }

    async fn fetch_history(
        &self,
        series_id: &str,
        start: NaiveDate,
        end: NaiveDate,
        _timeout: Duration,
    ) -> Result<BTreeMap<NaiveDate, f64>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fixture.failing.contains(series_id) {
            return Err(MacroError::source_unavailable(series_id, "configured to fail"));
        }
        let observations: BTreeMap<NaiveDate, f64> = self
            .fixture
            .history
            .get(series_id)
            .map(|history| history.range(start..=end).map(|(d, v)| (*d, *v)).collect())
            .unwrap_or_default();
        if observations.is_empty() {
            return Err(MacroError::source_unavailable(
                series_id,
                format!("no observations between {start} and {end}"),
            ));
        }
        Ok(observations)
    }
}
