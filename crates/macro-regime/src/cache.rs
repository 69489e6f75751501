//! Read-through cache for macro series and the latest snapshot
//!
//! Entries are keyed by series and as-of date. A fresh entry is served
//! without touching the source; a miss is fetched under a per-key lock so
//! concurrent callers share one upstream call. When a fetch fails the last
//! cached value for the same key is served as a stale fallback and the
//! failure is reported alongside it.
//!
//! Dated observation histories (the monthly CPI levels) are cached per
//! series, not per date. Entries not refreshed for [`SERIES_RETENTION_DAYS`]
//! are pruned whenever new values are written.

use chrono::{DateTime, NaiveDate, TimeDelta, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};

use crate::calendar::{TradingCalendar, eastern_date};
use crate::config::RegimeConfig;
use crate::error::{MacroError, Result, SeriesFailure};
use crate::metrics;
use crate::series::RawSeriesPoint;
use crate::snapshot::MacroSnapshot;
use crate::source::SeriesSource;
use crate::store::CacheStore;

/// Version written into persisted cache files
pub const CACHE_FORMAT_VERSION: u32 = 1;

/// Days a series entry is kept after it was last fetched
pub const SERIES_RETENTION_DAYS: i64 = 3;

fn is_stale(cached_at: DateTime<Utc>, ttl_secs: u64, now: DateTime<Utc>) -> bool {
    let ttl = i64::try_from(ttl_secs)
        .ok()
        .and_then(TimeDelta::try_seconds)
        .unwrap_or(TimeDelta::MAX);
    now.signed_duration_since(cached_at) > ttl
}

/// Cached observation of one series for one as-of date
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesEntry {
    pub point: RawSeriesPoint,
    pub cached_at: DateTime<Utc>,
    pub ttl_secs: u64,
}

impl SeriesEntry {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn is_stale(&self, now: DateTime<Utc>) -> bool {
        is_stale(self.cached_at, self.ttl_secs, now)
    }
}

/// Cached observation history of one series
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub observations: BTreeMap<NaiveDate, f64>,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub cached_at: DateTime<Utc>,
    pub ttl_secs: u64,
}

impl HistoryEntry {
    pub fn is_stale(&self, now: DateTime<Utc>) -> bool {
        is_stale(self.cached_at, self.ttl_secs, now)
    }

    fn covers(&self, start: NaiveDate, end: NaiveDate) -> bool {
        self.start == start && self.end == end
    }
}

/// Observation history returned by [`SeriesCache::get_or_fetch_history_at`]
#[derive(Debug, Clone, PartialEq)]
pub struct CachedHistory {
    pub observations: BTreeMap<NaiveDate, f64>,
    /// Why the fetch failed, when a previously cached history was served instead
    pub stale_reason: Option<String>,
}

/// Cached snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub snapshot: Arc<MacroSnapshot>,
    pub cached_at: DateTime<Utc>,
    pub ttl_secs: u64,
}

impl CacheEntry {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    /// `now - cached_at > ttl`
    pub fn is_stale(&self, now: DateTime<Utc>) -> bool {
        is_stale(self.cached_at, self.ttl_secs, now)
    }
}

/// Everything the cache holds; this is what a [`CacheStore`] persists
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheState {
    #[serde(default)]
    pub version: u32,
    #[serde(default)]
    pub series: BTreeMap<String, SeriesEntry>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub history: BTreeMap<String, HistoryEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<CacheEntry>,
}

impl Default for CacheState {
    fn default() -> Self {
        Self {
            version: CACHE_FORMAT_VERSION,
            series: BTreeMap::new(),
            history: BTreeMap::new(),
            snapshot: None,
        }
    }
}

impl CacheState {
    /// Drop series entries last fetched more than [`SERIES_RETENTION_DAYS`] before `now`
    ///
    /// Returns the number of entries removed.
    pub fn prune(&mut self, now: DateTime<Utc>) -> usize {
        let retention = TimeDelta::try_days(SERIES_RETENTION_DAYS).unwrap_or(TimeDelta::MAX);
        let before = self.series.len();
        self.series
            .retain(|_, entry| now.signed_duration_since(entry.cached_at) <= retention);
        before - self.series.len()
    }
}

/// Cache key for a series on an as-of date
pub fn entry_key(series_id: &str, as_of: NaiveDate) -> String {
    format!("{series_id}@{as_of}")
}

/// TTLs and fetch timeout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheSettings {
    pub ttl_trading: Duration,
    pub ttl_off_hours: Duration,
    pub fetch_timeout: Duration,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self::from(&RegimeConfig::default())
    }
}

impl From<&RegimeConfig> for CacheSettings {
    fn from(config: &RegimeConfig) -> Self {
        Self {
            ttl_trading: config.ttl_trading,
            ttl_off_hours: config.ttl_off_hours,
            fetch_timeout: config.fetch_timeout,
        }
    }
}

enum Resolution {
    Cached(f64),
    Fetched(f64),
    Failed { reason: String, stale: Option<f64> },
}

struct CacheInner {
    state: RwLock<CacheState>,
    in_flight: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    // held from snapshotting the state until the store write completes
    persist_lock: Mutex<()>,
    settings: CacheSettings,
    calendar: Arc<dyn TradingCalendar>,
    store: Option<Arc<dyn CacheStore>>,
}

/// Thread-safe series cache
pub struct SeriesCache {
    inner: Arc<CacheInner>,
}

impl SeriesCache {
    /// Create an empty, memory-only cache
    pub fn new(settings: CacheSettings, calendar: Arc<dyn TradingCalendar>) -> Self {
        Self::with_state(settings, calendar, None, CacheState::default())
    }

    /// Memory-only cache using the configured TTLs and trading session
    pub fn from_config(config: &RegimeConfig) -> Self {
        Self::new(CacheSettings::from(config), Arc::new(config.session))
    }

    /// Create a cache backed by `store`, loading whatever it holds
    ///
    /// A store that cannot be read, or holds another format version, is
    /// logged and the cache starts empty.
    pub async fn open(
        settings: CacheSettings,
        calendar: Arc<dyn TradingCalendar>,
        store: Arc<dyn CacheStore>,
    ) -> Self {
        let state = match store.load().await {
            Ok(Some(state)) if state.version == CACHE_FORMAT_VERSION => {
                tracing::debug!("Loaded {} cached series entries", state.series.len());
                state
            }
            Ok(Some(state)) => {
                tracing::warn!(
                    "Ignoring cache with format version {} (expected {})",
                    state.version,
                    CACHE_FORMAT_VERSION
                );
                CacheState::default()
            }
            Ok(None) => CacheState::default(),
            Err(e) => {
                tracing::warn!("Failed to load cache, starting empty: {}", e);
                CacheState::default()
            }
        };
        Self::with_state(settings, calendar, Some(store), state)
    }

    fn with_state(
        settings: CacheSettings,
        calendar: Arc<dyn TradingCalendar>,
        store: Option<Arc<dyn CacheStore>>,
        state: CacheState,
    ) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                state: RwLock::new(state),
                in_flight: Mutex::new(HashMap::new()),
                persist_lock: Mutex::new(()),
                settings,
                calendar,
                store,
            }),
        }
    }

    pub fn settings(&self) -> CacheSettings {
        self.inner.settings
    }

    /// TTL for an entry whose as-of time is `at`
    pub fn ttl_for(&self, at: DateTime<Utc>) -> Duration {
        if self.inner.calendar.is_trading_hours(at) {
            self.inner.settings.ttl_trading
        } else {
            self.inner.settings.ttl_off_hours
        }
    }

    /// Resolve `series_ids` as of `as_of`, reading through to `source`
    pub async fn get_or_fetch(
        &self,
        series_ids: &[&str],
        as_of: DateTime<Utc>,
        source: &dyn SeriesSource,
    ) -> Result<BTreeMap<String, f64>> {
        self.get_or_fetch_at(series_ids, as_of, Utc::now(), source)
            .await
    }

    /// [`get_or_fetch`](Self::get_or_fetch) with an explicit clock
    ///
    /// Every series is attempted before returning. If any fetch failed the
    /// result is [`MacroError::PartialFetch`], whose `values` still carries
    /// every fresh, fetched and stale-fallback value.
    pub async fn get_or_fetch_at(
        &self,
        series_ids: &[&str],
        as_of: DateTime<Utc>,
        now: DateTime<Utc>,
        source: &dyn SeriesSource,
    ) -> Result<BTreeMap<String, f64>> {
        let resolutions = join_all(series_ids.iter().map(|id| async move {
            (*id, self.resolve(id, as_of, now, source).await)
        }))
        .await;

        let mut values = BTreeMap::new();
        let mut failures = Vec::new();
        let mut fetched = 0usize;
        for (series_id, resolution) in resolutions {
            match resolution {
                Resolution::Cached(value) => {
                    values.insert(series_id.to_string(), value);
                }
                Resolution::Fetched(value) => {
                    fetched += 1;
                    values.insert(series_id.to_string(), value);
                }
                Resolution::Failed { reason, stale } => {
                    if let Some(value) = stale {
                        values.insert(series_id.to_string(), value);
                    }
                    failures.push(SeriesFailure {
                        series_id: series_id.to_string(),
                        reason,
                        served_stale: stale.is_some(),
                    });
                }
            }
        }

        if fetched > 0 {
            let pruned = self.inner.state.write().await.prune(now);
            if pruned > 0 {
                tracing::debug!("Pruned {} expired series entries", pruned);
            }
            self.persist().await;
        }

        if failures.is_empty() {
            Ok(values)
        } else {
            Err(MacroError::PartialFetch { values, failures })
        }
    }

    async fn resolve(
        &self,
        series_id: &str,
        as_of: DateTime<Utc>,
        now: DateTime<Utc>,
        source: &dyn SeriesSource,
    ) -> Resolution {
        let date = eastern_date(as_of);
        let key = entry_key(series_id, date);

        if let Some(value) = self.fresh_value(&key, now).await {
            tracing::debug!("Cache hit for key: {}", key);
            return Resolution::Cached(value);
        }

        let lock = self.in_flight_lock(&key).await;
        let guard = lock.lock().await;

        // another caller may have filled the entry while we waited
        if let Some(value) = self.fresh_value(&key, now).await {
            tracing::debug!("Cache hit for key after wait: {}", key);
            drop(guard);
            self.release_in_flight(&key, &lock).await;
            return Resolution::Cached(value);
        }

        tracing::debug!("Cache miss for key: {}", key);

        let timeout = self.inner.settings.fetch_timeout;
        let result =
            match tokio::time::timeout(timeout, source.fetch_series(series_id, date, timeout))
                .await
            {
                Ok(result) => result.and_then(|value| metrics::check_finite(series_id, value)),
                Err(_) => Err(MacroError::Timeout {
                    series_id: series_id.to_string(),
                    timeout_ms: timeout.as_millis(),
                }),
            };

        let resolution = match result {
            Ok(value) => {
                let entry = SeriesEntry {
                    point: RawSeriesPoint::new(series_id, value, date, now),
                    cached_at: now,
                    ttl_secs: self.ttl_for(as_of).as_secs(),
                };
                self.inner.state.write().await.series.insert(key.clone(), entry);
                Resolution::Fetched(value)
            }
            Err(e) => {
                let stale = self
                    .inner
                    .state
                    .read()
                    .await
                    .series
                    .get(&key)
                    .map(|entry| entry.point.value);
                match stale {
                    Some(value) => tracing::warn!(
                        "Fetch of {} failed, serving stale value {}: {}",
                        key,
                        value,
                        e
                    ),
                    None => tracing::warn!("Fetch of {} failed: {}", key, e),
                }
                Resolution::Failed {
                    reason: e.to_string(),
                    stale,
                }
            }
        };

        drop(guard);
        self.release_in_flight(&key, &lock).await;
        resolution
    }

    /// Observations of `series_id` dated `start..=eastern_date(as_of)`
    ///
    /// A fresh cached history for the same range is served without touching
    /// the source. When the fetch fails the last cached history of the series,
    /// whatever its range, is served with [`CachedHistory::stale_reason`] set;
    /// with nothing cached the fetch error is returned.
    pub async fn get_or_fetch_history_at(
        &self,
        series_id: &str,
        start: NaiveDate,
        as_of: DateTime<Utc>,
        now: DateTime<Utc>,
        source: &dyn SeriesSource,
    ) -> Result<CachedHistory> {
        let end = eastern_date(as_of);
        let key = format!("{series_id}#history");

        if let Some(observations) = self.fresh_history(series_id, start, end, now).await {
            tracing::debug!("Cache hit for key: {}", key);
            return Ok(CachedHistory {
                observations,
                stale_reason: None,
            });
        }

        let lock = self.in_flight_lock(&key).await;
        let guard = lock.lock().await;

        let result = match self.fresh_history(series_id, start, end, now).await {
            Some(observations) => {
                tracing::debug!("Cache hit for key after wait: {}", key);
                Ok(CachedHistory {
                    observations,
                    stale_reason: None,
                })
            }
            None => {
                tracing::debug!("Cache miss for key: {}", key);
                self.fetch_history(series_id, start, end, as_of, now, source)
                    .await
            }
        };

        drop(guard);
        self.release_in_flight(&key, &lock).await;
        result
    }

    async fn fetch_history(
        &self,
        series_id: &str,
        start: NaiveDate,
        end: NaiveDate,
        as_of: DateTime<Utc>,
        now: DateTime<Utc>,
        source: &dyn SeriesSource,
    ) -> Result<CachedHistory> {
        let timeout = self.inner.settings.fetch_timeout;
        let result = match tokio::time::timeout(
            timeout,
            source.fetch_history(series_id, start, end, timeout),
        )
        .await
        {
            Ok(result) => result.and_then(|observations| {
                observations
                    .into_iter()
                    .map(|(date, value)| Ok((date, metrics::check_finite(series_id, value)?)))
                    .collect::<Result<BTreeMap<_, _>>>()
            }),
            Err(_) => Err(MacroError::Timeout {
                series_id: series_id.to_string(),
                timeout_ms: timeout.as_millis(),
            }),
        };

        match result {
            Ok(observations) => {
                let entry = HistoryEntry {
                    observations: observations.clone(),
                    start,
                    end,
                    cached_at: now,
                    ttl_secs: self.ttl_for(as_of).as_secs(),
                };
                self.inner
                    .state
                    .write()
                    .await
                    .history
                    .insert(series_id.to_string(), entry);
                self.persist().await;
                Ok(CachedHistory {
                    observations,
                    stale_reason: None,
                })
            }
            Err(e) => {
                let stale = self
                    .inner
                    .state
                    .read()
                    .await
                    .history
                    .get(series_id)
                    .map(|entry| entry.observations.clone());
                match stale {
                    Some(observations) => {
                        tracing::warn!(
                            "History fetch of {} failed, serving {} cached observations: {}",
                            series_id,
                            observations.len(),
                            e
                        );
                        Ok(CachedHistory {
                            observations,
                            stale_reason: Some(e.to_string()),
                        })
                    }
                    None => Err(e),
                }
            }
        }
    }

    async fn fresh_history(
        &self,
        series_id: &str,
        start: NaiveDate,
        end: NaiveDate,
        now: DateTime<Utc>,
    ) -> Option<BTreeMap<NaiveDate, f64>> {
        let state = self.inner.state.read().await;
        state
            .history
            .get(series_id)
            .filter(|entry| entry.covers(start, end) && !entry.is_stale(now))
            .map(|entry| entry.observations.clone())
    }

    async fn fresh_value(&self, key: &str, now: DateTime<Utc>) -> Option<f64> {
        let state = self.inner.state.read().await;
        state
            .series
            .get(key)
            .filter(|entry| !entry.is_stale(now))
            .map(|entry| entry.point.value)
    }

    async fn in_flight_lock(&self, key: &str) -> Arc<Mutex<()>> {
        let mut in_flight = self.inner.in_flight.lock().await;
        Arc::clone(in_flight.entry(key.to_string()).or_default())
    }

    async fn release_in_flight(&self, key: &str, lock: &Arc<Mutex<()>>) {
        let mut in_flight = self.inner.in_flight.lock().await;
        if in_flight.get(key).is_some_and(|held| Arc::ptr_eq(held, lock)) {
            in_flight.remove(key);
        }
    }

    /// Cached entry for one series and date, fresh or not
    pub async fn entry(&self, series_id: &str, as_of: NaiveDate) -> Option<SeriesEntry> {
        let state = self.inner.state.read().await;
        state.series.get(&entry_key(series_id, as_of)).cloned()
    }

    /// Cached observation history for one series, fresh or not
    pub async fn history_entry(&self, series_id: &str) -> Option<HistoryEntry> {
        self.inner.state.read().await.history.get(series_id).cloned()
    }

    /// Latest cached snapshot, fresh or not
    pub async fn snapshot_entry(&self) -> Option<CacheEntry> {
        self.inner.state.read().await.snapshot.clone()
    }

    /// Latest cached snapshot if it is still fresh at `now`
    pub async fn fresh_snapshot(&self, now: DateTime<Utc>) -> Option<Arc<MacroSnapshot>> {
        let state = self.inner.state.read().await;
        state
            .snapshot
            .as_ref()
            .filter(|entry| !entry.is_stale(now))
            .map(|entry| Arc::clone(&entry.snapshot))
    }

    /// Replace the cached snapshot and persist
    pub async fn store_snapshot(
        &self,
        snapshot: Arc<MacroSnapshot>,
        now: DateTime<Utc>,
    ) -> CacheEntry {
        let entry = CacheEntry {
            snapshot,
            cached_at: now,
            ttl_secs: self.ttl_for(now).as_secs(),
        };
        self.inner.state.write().await.snapshot = Some(entry.clone());
        self.persist().await;
        entry
    }

    /// Invalidate a specific cache entry
    pub async fn invalidate(&self, series_id: &str, as_of: NaiveDate) -> bool {
        let removed = {
            let mut state = self.inner.state.write().await;
            state.series.remove(&entry_key(series_id, as_of)).is_some()
        };
        if removed {
            self.persist().await;
        }
        removed
    }

    /// Clear all cached entries, including the snapshot
    pub async fn clear(&self) {
        {
            let mut state = self.inner.state.write().await;
            state.series.clear();
            state.history.clear();
            state.snapshot = None;
        }
        self.persist().await;
    }

    /// Get the number of cached series entries
    pub async fn len(&self) -> usize {
        self.inner.state.read().await.series.len()
    }

    /// Check if the cache is empty
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Write the current state to the store; failures are logged only
    async fn persist(&self) {
        let Some(store) = &self.inner.store else {
            return;
        };
        let _guard = self.inner.persist_lock.lock().await;
        let state = self.inner.state.read().await.clone();
        if let Err(e) = store.save(&state).await {
            tracing::warn!("Failed to persist cache: {}", e);
        }
    }
}

impl Clone for SeriesCache {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}
