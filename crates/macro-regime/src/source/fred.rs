//! Federal Reserve Economic Data (FRED) API client
//!
//! FRED is a database maintained by the Federal Reserve Bank of St. Louis
//! containing over 800,000 economic time series from numerous sources.
//!
//! API Key: Free registration at https://fred.stlouisfed.org/docs/api/api_key.html
//! Rate Limit: 120 requests per minute

use async_trait::async_trait;
use chrono::{Days, NaiveDate};
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use super::SeriesSource;
use crate::config::FRED_API_KEY_ENV;
use crate::error::{MacroError, Result};
use crate::series::MacroSeries;

type SharedRateLimiter = Arc<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>;

const FRED_BASE_URL: &str = "https://api.stlouisfed.org/fred";

/// Default requests per minute
pub const DEFAULT_RATE_LIMIT: u32 = 120;

/// Lookback window for daily series (covers long weekends and holidays)
const DAILY_LOOKBACK_DAYS: u64 = 31;

/// Lookback window for weekly, monthly and quarterly series
const PERIODIC_LOOKBACK_DAYS: u64 = 400;

/// Observation data from FRED series
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Observation {
    /// Date of observation (YYYY-MM-DD)
    pub date: String,
    /// Value (can be "." for missing data)
    pub value: String,
}

impl Observation {
    /// Parse into a dated value; `None` for FRED's "." missing marker
    pub fn parse(&self) -> Option<ParsedObservation> {
        let value = self.value.trim().parse::<f64>().ok()?;
        let date = NaiveDate::parse_from_str(&self.date, "%Y-%m-%d").ok()?;
        Some(ParsedObservation { date, value })
    }
}

/// Parsed observation with numeric value
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ParsedObservation {
    pub date: NaiveDate,
    pub value: f64,
}

/// FRED observations response
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ObservationsResponse {
    observations: Vec<Observation>,
}

/// Latest usable observation on or before `as_of`
///
/// Observations may come in any order; missing markers are skipped.
pub fn latest_on_or_before(
    observations: &[Observation],
    as_of: NaiveDate,
) -> Option<ParsedObservation> {
    observations
        .iter()
        .filter_map(Observation::parse)
        .filter(|obs| obs.date <= as_of)
        .max_by_key(|obs| obs.date)
}

/// FRED API client
pub struct FredClient {
    client: Client,
    api_key: String,
    rate_limiter: SharedRateLimiter,
}

impl FredClient {
    /// Create a new FRED client
    ///
    /// # Arguments
    /// * `api_key` - FRED API key
    /// * `rate_limit` - Requests per minute (default 120)
    pub fn new(api_key: impl Into<String>, rate_limit: Option<u32>) -> Self {
        let per_minute = NonZeroU32::new(rate_limit.unwrap_or(DEFAULT_RATE_LIMIT))
            .or_else(|| NonZeroU32::new(DEFAULT_RATE_LIMIT))
            .unwrap_or(NonZeroU32::MIN);
        let rate_limiter = Arc::new(RateLimiter::direct(Quota::per_minute(per_minute)));

        Self {
            client: Client::new(),
            api_key: api_key.into(),
            rate_limiter,
        }
    }

    /// Create from environment variable FRED_API_KEY
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var(FRED_API_KEY_ENV).map_err(|_| {
            MacroError::ConfigError(format!("{FRED_API_KEY_ENV} environment variable not set"))
        })?;

        Ok(Self::new(api_key, None))
    }

    /// Get observations for a series between two dates, newest first
    pub async fn get_observations(
        &self,
        series_id: &str,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
        timeout: Option<Duration>,
    ) -> Result<Vec<Observation>> {
        self.rate_limiter.until_ready().await;

        let mut params: Vec<(&str, String)> = vec![
            ("series_id", series_id.to_string()),
            ("api_key", self.api_key.clone()),
            ("file_type", "json".to_string()),
            ("sort_order", "desc".to_string()),
        ];
        if let Some(start) = start {
            params.push(("observation_start", start.format("%Y-%m-%d").to_string()));
        }
        if let Some(end) = end {
            params.push(("observation_end", end.format("%Y-%m-%d").to_string()));
        }

        let url = format!("{FRED_BASE_URL}/series/observations");
        let mut request = self.client.get(&url).query(&params);
        if let Some(timeout) = timeout {
            request = request.timeout(timeout);
        }

        let response = request.send().await.map_err(|e| {
            MacroError::source_unavailable(series_id, format!("FRED request failed: {e}"))
        })?;

        if !response.status().is_success() {
            return Err(MacroError::source_unavailable(
                series_id,
                format!("FRED API error: {}", response.status()),
            ));
        }

        let data: ObservationsResponse = response.json().await.map_err(|e| {
            MacroError::source_unavailable(series_id, format!("Failed to parse FRED response: {e}"))
        })?;

        tracing::debug!(
            "FRED returned {} observations for {}",
            data.observations.len(),
            series_id
        );
        Ok(data.observations)
    }

    /// Latest non-missing value of `series_id` on or before `as_of`
    pub async fn get_latest_as_of(
        &self,
        series_id: &str,
        as_of: NaiveDate,
        lookback_days: u64,
        timeout: Option<Duration>,
    ) -> Result<ParsedObservation> {
        let start = as_of.checked_sub_days(Days::new(lookback_days));
        let observations = self
            .get_observations(series_id, start, Some(as_of), timeout)
            .await?;

        latest_on_or_before(&observations, as_of).ok_or_else(|| {
            MacroError::source_unavailable(
                series_id,
                format!("no observation within {lookback_days} days before {as_of}"),
            )
        })
    }
}

/// [`SeriesSource`] backed by FRED
///
/// Accepts the engine's stable series ids and maps them to FRED codes.
pub struct FredSource {
    client: FredClient,
}

impl FredSource {
    pub fn new(client: FredClient) -> Self {
        Self { client }
    }

    pub fn from_env() -> Result<Self> {
        Ok(Self::new(FredClient::from_env()?))
    }
}

#[async_trait]
impl SeriesSource for FredSource {
    async fn fetch_series(
        &self,
        series_id: &str,
        as_of: NaiveDate,
        timeout: Duration,
    ) -> Result<f64> {
        let series: MacroSeries = series_id
            .parse()
            .map_err(|_| MacroError::source_unavailable(series_id, "not a FRED-backed series"))?;
        let lookback = if series.is_daily() {
            DAILY_LOOKBACK_DAYS
        } else {
            PERIODIC_LOOKBACK_DAYS
        };

        let obs = self
            .client
            .get_latest_as_of(series.fred_id(), as_of, lookback, Some(timeout))
            .await
            .map_err(|e| match e {
                MacroError::SourceUnavailable { reason, .. } => {
                    MacroError::source_unavailable(series_id, reason)
                }
                other => other,
            })?;

        tracing::debug!(
            "{} ({}) as of {}: {} observed {}",
            series_id,
            series.fred_id(),
            as_of,
            obs.value,
            obs.date
        );
        Ok(obs.value)
    }

    async fn fetch_history(
        &self,
        series_id: &str,
        start: NaiveDate,
        end: NaiveDate,
        timeout: Duration,
    ) -> Result<BTreeMap<NaiveDate, f64>> {
        let series: MacroSeries = series_id
            .parse()
            .map_err(|_| MacroError::source_unavailable(series_id, "not a FRED-backed series"))?;

        let observations = self
            .client
            .get_observations(series.fred_id(), Some(start), Some(end), Some(timeout))
            .await
            .map_err(|e| match e {
                MacroError::SourceUnavailable { reason, .. } => {
                    MacroError::source_unavailable(series_id, reason)
                }
                other => other,
            })?;

        let history: BTreeMap<NaiveDate, f64> = observations
            .iter()
            .filter_map(Observation::parse)
            .map(|obs| (obs.date, obs.value))
            .collect();
        if history.is_empty() {
            return Err(MacroError::source_unavailable(
                series_id,
                format!("no observations between {start} and {end}"),
            ));
        }
        tracing::debug!(
            "{} ({}): {} observations {}..={}",
            series_id,
            series.fred_id(),
            history.len(),
            start,
            end
        );
        Ok(history)
    }
}
