//! Snapshot service
//!
//! [`MacroService`] ties the cache, the source and the snapshot builder
//! together: it serves the cached snapshot while fresh and otherwise fetches
//! every series, builds a new snapshot linked to the previous one, caches it
//! and persists.

use chrono::{DateTime, Months, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::briefing;
use crate::cache::SeriesCache;
use crate::calendar::eastern_date;
use crate::config::RegimeConfig;
use crate::error::{MacroError, Result, SeriesFailure};
use crate::metrics::{self, YOY_WINDOW};
use crate::regime::{RegimeAssessment, RegimeClassifier};
use crate::series::MacroSeries;
use crate::signals::{Signal, SignalDetectorRegistry};
use crate::snapshot::{MacroSnapshot, Metric, SnapshotInputs};
use crate::source::SeriesSource;

/// Months of CPI observations requested; covers the window plus a release lag
const CPI_LOOKBACK_MONTHS: u32 = 15;

/// Everything derived from one snapshot
#[derive(Debug, Clone)]
pub struct MacroReport {
    pub snapshot: Arc<MacroSnapshot>,
    pub assessment: RegimeAssessment,
    pub signals: Vec<Signal>,
}

impl MacroReport {
    /// Markdown briefing for this report
    pub fn briefing(&self) -> Result<String> {
        briefing::render_briefing(&self.snapshot, &self.assessment, &self.signals)
    }
}

/// Builds, caches and evaluates macro snapshots
pub struct MacroService {
    source: Arc<dyn SeriesSource>,
    cache: SeriesCache,
    config: Arc<RegimeConfig>,
    classifier: RegimeClassifier,
    registry: SignalDetectorRegistry,
}

impl MacroService {
    pub fn new(
        source: Arc<dyn SeriesSource>,
        cache: SeriesCache,
        config: Arc<RegimeConfig>,
    ) -> Result<Self> {
        config.validate()?;
        let classifier = RegimeClassifier::from_config(&config.regime, config.multipliers);
        let registry = SignalDetectorRegistry::from_config(&config.signals);
        Ok(Self {
            source,
            cache,
            config,
            classifier,
            registry,
        })
    }

    pub fn config(&self) -> &RegimeConfig {
        &self.config
    }

    pub fn cache(&self) -> &SeriesCache {
        &self.cache
    }

    pub fn classifier(&self) -> &RegimeClassifier {
        &self.classifier
    }

    pub fn registry(&self) -> &SignalDetectorRegistry {
        &self.registry
    }

    /// Cached snapshot if fresh, otherwise a newly built one
    pub async fn get_current_snapshot(&self) -> Result<Arc<MacroSnapshot>> {
        self.snapshot_at(Utc::now()).await
    }

    /// [`get_current_snapshot`](Self::get_current_snapshot) with an explicit clock
    pub async fn snapshot_at(&self, now: DateTime<Utc>) -> Result<Arc<MacroSnapshot>> {
        if let Some(snapshot) = self.cache.fresh_snapshot(now).await {
            tracing::debug!("Serving cached snapshot from {}", snapshot.timestamp());
            return Ok(snapshot);
        }
        self.refresh_at(now).await
    }

    /// Build a new snapshot regardless of the cached one
    pub async fn refresh_snapshot(&self) -> Result<Arc<MacroSnapshot>> {
        self.refresh_at(Utc::now()).await
    }

    /// [`refresh_snapshot`](Self::refresh_snapshot) with an explicit clock
    pub async fn refresh_at(&self, now: DateTime<Utc>) -> Result<Arc<MacroSnapshot>> {
        tracing::info!("Building macro snapshot at {}", now);

        let ids: Vec<&str> = MacroSeries::ALL.iter().map(|s| s.id()).collect();
        let (values, failures) =
            split_partial(self.cache.get_or_fetch_at(&ids, now, now, self.source.as_ref()).await)?;

        let mut inputs = SnapshotInputs::new();
        for series in MacroSeries::ALL {
            let failure = failures.iter().find(|f| f.series_id == series.id());
            let metric = match values.get(series.id()) {
                Some(value) => Metric::Available(*value),
                None => Metric::source_unavailable(
                    failure.map_or_else(|| "not returned by source".to_string(), |f| f.reason.clone()),
                ),
            };
            if let Some(failure) = failure.filter(|f| f.served_stale) {
                tracing::warn!(
                    "{} served from stale cache: {}",
                    failure.series_id,
                    failure.reason
                );
                inputs.stale.insert(series, failure.reason.clone());
            }
            inputs.values.insert(series, metric);
        }

        let (history, stale_reason) = self.cpi_history(now).await;
        inputs.cpi_history = history;
        if let Some(reason) = stale_reason {
            inputs
                .stale
                .entry(MacroSeries::CpiIndex)
                .or_insert_with(|| format!("history: {reason}"));
        }

        let previous = match self.cache.snapshot_entry().await {
            Some(entry) if entry.snapshot.timestamp() <= now => Some(entry.snapshot),
            Some(entry) => {
                tracing::warn!(
                    "Cached snapshot at {} is newer than {}; building without previous",
                    entry.snapshot.timestamp(),
                    now
                );
                None
            }
            None => None,
        };

        let snapshot = Arc::new(MacroSnapshot::build(inputs, previous, now)?);
        if snapshot.is_degraded() {
            let fields: Vec<String> = snapshot
                .unavailable_fields()
                .iter()
                .map(ToString::to_string)
                .collect();
            tracing::warn!("Snapshot degraded, unavailable: {}", fields.join(", "));
        }

        self.cache.store_snapshot(Arc::clone(&snapshot), now).await;
        Ok(snapshot)
    }

    /// Monthly CPI levels by observation month, oldest first
    ///
    /// CPI is published weeks after the month it measures, so the run ends at
    /// the latest observed month rather than the month of `now`. Only the most
    /// recent unbroken run is kept: a gap would misalign the year-over-year
    /// comparison. The second value is set when a cached history was served
    /// because the fetch failed.
    async fn cpi_history(&self, now: DateTime<Utc>) -> (Vec<f64>, Option<String>) {
        let id = MacroSeries::CpiIndex.id();
        let today = eastern_date(now);
        let start = today
            .checked_sub_months(Months::new(CPI_LOOKBACK_MONTHS))
            .unwrap_or(today);

        let history = match self
            .cache
            .get_or_fetch_history_at(id, start, now, now, self.source.as_ref())
            .await
        {
            Ok(history) => history,
            Err(e) => {
                tracing::warn!("CPI history fetch failed: {}", e);
                return (Vec::new(), None);
            }
        };

        let run = metrics::monthly_run(&history.observations);
        if run.len() < YOY_WINDOW {
            tracing::warn!(
                "CPI history has {} of {} monthly observations",
                run.len(),
                YOY_WINDOW
            );
        }
        (run, history.stale_reason)
    }

    /// Classify the given snapshot with the configured thresholds
    pub fn classify(&self, snapshot: &MacroSnapshot) -> Result<RegimeAssessment> {
        let assessment = self.classifier.classify(snapshot)?;
        tracing::info!(
            "Regime {} (multiplier {}) via '{}'",
            assessment.label,
            assessment.position_multiplier,
            assessment.matched_rule
        );
        Ok(assessment)
    }

    /// Run every detector against the snapshot and its previous snapshot
    pub fn detect(&self, snapshot: &MacroSnapshot) -> Vec<Signal> {
        self.registry.detect_all(snapshot, None)
    }

    /// Current snapshot with its regime and signals
    pub async fn report(&self) -> Result<MacroReport> {
        self.report_at(Utc::now()).await
    }

    pub async fn report_at(&self, now: DateTime<Utc>) -> Result<MacroReport> {
        let snapshot = self.snapshot_at(now).await?;
        let assessment = self.classify(&snapshot)?;
        let signals = self.detect(&snapshot);
        Ok(MacroReport {
            snapshot,
            assessment,
            signals,
        })
    }
}

/// Treat a partial fetch as data plus failures; any other error propagates
fn split_partial(
    result: Result<BTreeMap<String, f64>>,
) -> Result<(BTreeMap<String, f64>, Vec<SeriesFailure>)> {
    match result {
        Ok(values) => Ok((values, Vec::new())),
        Err(MacroError::PartialFetch { values, failures }) => Ok((values, failures)),
        Err(e) => Err(e),
    }
}

/// Classify a snapshot with `config`'s thresholds and multipliers
pub fn classify_regime(snapshot: &MacroSnapshot, config: &RegimeConfig) -> Result<RegimeAssessment> {
    RegimeClassifier::from_config(&config.regime, config.multipliers).classify(snapshot)
}

/// Run every built-in detector with `config`'s thresholds
///
/// When `previous` is `None` the snapshot's own back-reference is used.
pub fn detect_signals(
    snapshot: &MacroSnapshot,
    previous: Option<&MacroSnapshot>,
    config: &RegimeConfig,
) -> Vec<Signal> {
    SignalDetectorRegistry::from_config(&config.signals).detect_all(snapshot, previous)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calendar::TradingCalendar;
    use crate::cache::CacheSettings;
    use crate::regime::RegimeLabel;
    use crate::source::{MockSeriesSource, StaticSource};
    use crate::snapshot::Field;
    use chrono::{NaiveDate, TimeZone};

    struct Closed;

    impl TradingCalendar for Closed {
        fn is_trading_hours(&self, _at: DateTime<Utc>) -> bool {
            false
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 19, 14, 0, 0).unwrap()
    }

    /// Calm market with CPI rising 3% over the year to September 2026
    ///
    /// CPI observations are dated the first of the month they measure and the
    /// latest one is September's, as it would be in mid-October.
    fn calm_source() -> StaticSource {
        let mut source = StaticSource::new()
            .with_value("3M_YIELD", 4.0)
            .with_value("2Y_YIELD", 3.6)
            .with_value("5Y_YIELD", 3.8)
            .with_value("10Y_YIELD", 4.4)
            .with_value("30Y_YIELD", 4.8)
            .with_value("FED_FUNDS", 4.1)
            .with_value("REAL_GDP_GROWTH", 2.5)
            .with_value("UNEMPLOYMENT", 4.1)
            .with_value("VIX", 15.0)
            .with_value("HY_SPREAD", 3.0)
            .with_value("DOLLAR_INDEX", 120.0)
            .with_value("USD_JPY", 150.0)
            .with_value("JP10Y_YIELD", 0.5)
            .with_value("FED_BALANCE_SHEET", 7_000_000.0);
        for i in 0..13u32 {
            let month = (8 + i) % 12 + 1;
            let year = if i < 4 { 2025 } else { 2026 };
            let date = NaiveDate::from_ymd_opt(year, month, 1).unwrap();
            source = source.with_observation("CPI_INDEX", date, 300.0 + 9.0 * f64::from(i) / 12.0);
        }
        source
    }

    fn service(source: Arc<dyn SeriesSource>) -> MacroService {
        let config = Arc::new(RegimeConfig::default());
        let cache = SeriesCache::new(CacheSettings::from(config.as_ref()), Arc::new(Closed));
        MacroService::new(source, cache, config).unwrap()
    }

    #[tokio::test]
    async fn test_builds_full_snapshot() {
        let service = service(Arc::new(calm_source()));
        let snap = service.snapshot_at(now()).await.unwrap();

        assert!(!snap.is_degraded(), "unexpected: {:?}", snap.notes());
        assert!((snap.value(Field::CPI_YOY).unwrap() - 3.0).abs() < 1e-9);
        assert!((snap.value(Field::CURVE_10Y2Y).unwrap() - 0.8).abs() < 1e-9);
        assert!(snap.previous().is_none());

        let assessment = service.classify(&snap).unwrap();
        assert_eq!(assessment.label, RegimeLabel::RiskOn);
    }

    #[tokio::test]
    async fn test_fresh_snapshot_is_reused() {
        let source = Arc::new(calm_source());
        let service = service(source.clone());

        let first = service.snapshot_at(now()).await.unwrap();
        let calls = source.calls();
        let second = service
            .snapshot_at(now() + chrono::TimeDelta::try_hours(1).unwrap())
            .await
            .unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(source.calls(), calls);
    }

    #[tokio::test]
    async fn test_refresh_links_previous() {
        let service = service(Arc::new(calm_source()));
        let first = service.snapshot_at(now()).await.unwrap();
        let second = service
            .refresh_at(now() + chrono::TimeDelta::try_hours(1).unwrap())
            .await
            .unwrap();

        assert_eq!(second.previous().unwrap().timestamp(), first.timestamp());
    }

    #[tokio::test]
    async fn test_failed_series_becomes_unavailable() {
        let source = calm_source().with_failure("FED_BALANCE_SHEET");
        let service = service(Arc::new(source));
        let snap = service.snapshot_at(now()).await.unwrap();

        assert_eq!(snap.unavailable_fields(), vec![Field::FED_BALANCE_SHEET]);
        let signals = service.detect(&snap);
        assert_eq!(signals.len(), 5);
        let liquidity = signals.iter().find(|s| s.name == "liquidity_drain").unwrap();
        assert!(!liquidity.fired);
        assert_eq!(liquidity.strength, None);
    }

    #[tokio::test]
    async fn test_short_cpi_history() {
        let mut source = calm_source();
        source = source.with_failure("CPI_INDEX");
        let service = service(Arc::new(source));
        let snap = service.snapshot_at(now()).await.unwrap();
        assert_eq!(snap.value(Field::CPI_YOY), None);
    }

    #[tokio::test]
    async fn test_cpi_yoy_uses_observation_months() {
        let mut source = calm_source();
        for i in 0..13u32 {
            let (year, month) = if i < 4 { (2025, 9 + i) } else { (2026, i - 3) };
            let date = NaiveDate::from_ymd_opt(year, month, 1).unwrap();
            source = source.with_observation("CPI_INDEX", date, 300.0 + f64::from(i));
        }
        let service = service(Arc::new(source));
        let snap = service.snapshot_at(now()).await.unwrap();

        assert!((snap.value(Field::CPI_YOY).unwrap() - 4.0).abs() < 1e-9);
        assert_eq!(snap.value(Field::CPI_INDEX), Some(312.0));
    }

    #[tokio::test]
    async fn test_stale_series_are_marked() {
        let config = Arc::new(RegimeConfig::default());
        let cache = SeriesCache::new(CacheSettings::from(config.as_ref()), Arc::new(Closed));
        let first = MacroService::new(Arc::new(calm_source()), cache.clone(), Arc::clone(&config))
            .unwrap();
        first.snapshot_at(now()).await.unwrap();

        let outage = calm_source().with_failure("VIX").with_failure("CPI_INDEX");
        let second = MacroService::new(Arc::new(outage), cache, config).unwrap();
        let later = now() + chrono::TimeDelta::try_hours(13).unwrap();
        let snap = second.refresh_at(later).await.unwrap();

        assert!(snap.is_degraded());
        assert_eq!(
            snap.stale_series(),
            &[MacroSeries::CpiIndex, MacroSeries::Vix]
        );
        assert_eq!(snap.value(Field::VIX), Some(15.0));
        assert!((snap.value(Field::CPI_YOY).unwrap() - 3.0).abs() < 1e-9);
        assert!(snap.unavailable_fields().is_empty());
    }

    #[tokio::test]
    async fn test_every_series_failing_still_builds() {
        let mut source = MockSeriesSource::new();
        source
            .expect_fetch_series()
            .returning(|id, _, _| Err(MacroError::source_unavailable(id, "HTTP 503")));
        source
            .expect_fetch_history()
            .times(1)
            .returning(|id, _, _, _| Err(MacroError::source_unavailable(id, "HTTP 503")));
        let service = service(Arc::new(source));

        let snap = service.snapshot_at(now()).await.unwrap();
        assert_eq!(
            snap.unavailable_fields().len(),
            MacroSeries::ALL.len() + 4
        );
        let assessment = service.classify(&snap).unwrap();
        assert_eq!(assessment.label, RegimeLabel::Neutral);
        assert!(assessment.degraded);
    }

    #[tokio::test]
    async fn test_free_functions_match_service() {
        let service = service(Arc::new(calm_source()));
        let snap = service.snapshot_at(now()).await.unwrap();
        let config = RegimeConfig::default();

        assert_eq!(
            classify_regime(&snap, &config).unwrap(),
            service.classify(&snap).unwrap()
        );
        assert_eq!(detect_signals(&snap, None, &config), service.detect(&snap));
    }

    #[tokio::test]
    async fn test_report_renders_briefing() {
        let service = service(Arc::new(calm_source()));
        let report = service.report_at(now()).await.unwrap();
        let markdown = report.briefing().unwrap();
        assert!(markdown.contains("**Regime: RISK_ON**"));
    }
}
