//! End-to-end scenarios through the public API

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use macro_regime::{
    CacheSettings, Field, JsonFileStore, MacroError, MacroSeries, MacroService, MacroSnapshot,
    MemoryStore, RegimeConfig, RegimeLabel, SeriesCache, SeriesSource, SignalDetectorRegistry,
    SnapshotInputs, StaticSource, TradingCalendar, UnavailableReason, classify_regime,
    detect_signals, fired_only, parse_regime,
};
use std::sync::Arc;
use tokio_test::{assert_err, assert_ok};

struct AlwaysOpen;

impl TradingCalendar for AlwaysOpen {
    fn is_trading_hours(&self, _at: DateTime<Utc>) -> bool {
        true
    }
}

fn at(day: u32, hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 10, day, hour, 0, 0).unwrap()
}

fn cpi_history() -> Vec<f64> {
    (0..13).map(|i| 300.0 + 9.0 * f64::from(i) / 12.0).collect()
}

fn inputs(vix: f64, curve: f64, gdp: f64, hy: f64) -> SnapshotInputs {
    SnapshotInputs::new()
        .with_value(MacroSeries::Treasury3M, 4.0 - curve)
        .with_value(MacroSeries::Treasury2Y, 4.0 - curve)
        .with_value(MacroSeries::Treasury5Y, 4.0)
        .with_value(MacroSeries::Treasury10Y, 4.0)
        .with_value(MacroSeries::Treasury30Y, 4.3)
        .with_value(MacroSeries::FedFunds, 4.1)
        .with_value(MacroSeries::CpiIndex, 309.0)
        .with_value(MacroSeries::RealGdpGrowth, gdp)
        .with_value(MacroSeries::Unemployment, 4.1)
        .with_value(MacroSeries::Vix, vix)
        .with_value(MacroSeries::HySpread, hy)
        .with_value(MacroSeries::DollarIndex, 120.0)
        .with_value(MacroSeries::UsdJpy, 150.0)
        .with_value(MacroSeries::Japan10Y, 0.5)
        .with_value(MacroSeries::FedBalanceSheet, 7_000_000.0)
        .with_cpi_history(cpi_history())
}

fn build(inputs: SnapshotInputs) -> MacroSnapshot {
    MacroSnapshot::build(inputs, None, at(19, 14)).unwrap()
}

/// Calm market as served by a source, with `months` of monthly CPI
///
/// CPI is dated by the month it measures and lags a month behind, so in
/// October 2026 the latest observation is September's.
fn calm_source(months: u32) -> StaticSource {
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
        .with_value("HY_SPREAD", 2.0)
        .with_value("DOLLAR_INDEX", 120.0)
        .with_value("USD_JPY", 150.0)
        .with_value("JP10Y_YIELD", 0.5)
        .with_value("FED_BALANCE_SHEET", 7_000_000.0);
    // September 2026 back to September 2025
    for back in 0..months {
        let (year, month) = if back <= 8 {
            (2026, 9 - back)
        } else {
            (2025, 21 - back)
        };
        let date = NaiveDate::from_ymd_opt(year, month, 1).unwrap();
        source = source.with_observation("CPI_INDEX", date, 309.0 - 9.0 * f64::from(back) / 12.0);
    }
    source
}

fn service_with(source: Arc<dyn SeriesSource>, cache: SeriesCache) -> MacroService {
    MacroService::new(source, cache, Arc::new(RegimeConfig::default())).unwrap()
}

fn memory_cache() -> SeriesCache {
    SeriesCache::new(
        CacheSettings::from(&RegimeConfig::default()),
        Arc::new(AlwaysOpen),
    )
}

#[test]
fn extreme_volatility_is_crisis() {
    let snap = build(inputs(50.0, 0.8, 2.5, 2.0));
    let assessment = assert_ok!(classify_regime(&snap, &RegimeConfig::default()));
    assert_eq!(assessment.as_tuple(), (RegimeLabel::Crisis, 0.4));
    assert_eq!(assessment.matched_rule, "extreme_volatility");
}

#[test]
fn inverted_but_calm_is_neutral() {
    let snap = build(inputs(20.0, -0.3, 1.0, 3.0));
    let assessment = classify_regime(&snap, &RegimeConfig::default()).unwrap();
    assert_eq!(assessment.as_tuple(), (RegimeLabel::Neutral, 1.0));
    assert!(!assessment.degraded);
}

#[test]
fn calm_growth_with_steep_curve_is_risk_on() {
    let snap = build(inputs(15.0, 0.8, 2.5, 2.0));
    let assessment = classify_regime(&snap, &RegimeConfig::default()).unwrap();
    assert_eq!(assessment.as_tuple(), (RegimeLabel::RiskOn, 1.0));
}

#[test]
fn elevated_volatility_with_inversion_is_risk_off() {
    let snap = build(inputs(30.0, -0.2, 1.5, 3.0));
    let assessment = classify_regime(&snap, &RegimeConfig::default()).unwrap();
    assert_eq!(assessment.as_tuple(), (RegimeLabel::RiskOff, 0.7));
}

#[test]
fn classification_is_idempotent() {
    let snap = build(inputs(20.0, -0.3, 1.0, 3.0));
    let config = RegimeConfig::default();
    let first = classify_regime(&snap, &config).unwrap();
    for _ in 0..3 {
        assert_eq!(classify_regime(&snap, &config).unwrap(), first);
    }

    let registry = SignalDetectorRegistry::default();
    assert_eq!(registry.detect_all(&snap, None), registry.detect_all(&snap, None));
}

#[test]
fn yen_carry_unwind_fires() {
    let previous =
        Arc::new(MacroSnapshot::build(inputs(15.0, 0.8, 2.5, 2.0), None, at(18, 14)).unwrap());
    let current = MacroSnapshot::build(
        inputs(15.0, 0.8, 2.5, 2.0)
            .with_value(MacroSeries::UsdJpy, 140.0)
            .with_value(MacroSeries::Japan10Y, 0.9),
        Some(previous),
        at(19, 14),
    )
    .unwrap();

    let signals = detect_signals(&current, None, &RegimeConfig::default());
    assert_eq!(signals.len(), 5);

    let carry = signals.iter().find(|s| s.name == "carry_trade_unwind").unwrap();
    assert!(carry.fired);
    assert!((carry.strength.unwrap() - 2.222).abs() < 0.01);

    let fired = fired_only(&signals);
    assert!(fired.iter().any(|s| s.name == "carry_trade_unwind"));
}

#[test]
fn missing_balance_sheet_only_silences_liquidity() {
    let prev = Arc::new(build(inputs(15.0, 0.8, 2.5, 2.0)));
    let current = MacroSnapshot::build(
        inputs(15.0, 0.8, 2.5, 2.0).with_unavailable(MacroSeries::FedBalanceSheet, "HTTP 503"),
        Some(prev),
        at(19, 15),
    )
    .unwrap();

    let signals = detect_signals(&current, None, &RegimeConfig::default());
    assert_eq!(signals.len(), 5);
    for signal in &signals {
        if signal.name == "liquidity_drain" {
            assert!(signal.is_unavailable());
            assert!(signal.note.as_deref().unwrap_or_default().contains("FED_BALANCE_SHEET"));
        } else {
            assert!(signal.strength.is_some(), "{} was not evaluated", signal.name);
        }
    }
}

#[tokio::test]
async fn short_cpi_history_marks_yoy_insufficient() {
    let service = service_with(Arc::new(calm_source(11)), memory_cache());
    let snap = service.snapshot_at(at(19, 14)).await.unwrap();

    assert_eq!(
        snap.get(Field::CPI_YOY).and_then(|m| m.reason()),
        Some(&UnavailableReason::InsufficientHistory {
            needed: 13,
            available: 11
        })
    );
    // raw CPI level is still there
    assert_eq!(snap.value(MacroSeries::CpiIndex), Some(309.0));

    // regime does not read CPI YoY; reflation does
    let assessment = service.classify(&snap).unwrap();
    assert_eq!(assessment.label, RegimeLabel::RiskOn);
    assert!(!assessment.degraded);

    let reflation = service
        .detect(&snap)
        .into_iter()
        .find(|s| s.name == "reflation")
        .unwrap();
    assert!(!reflation.fired);
    assert!(reflation.note.unwrap().contains("CPI_YOY"));
}

#[tokio::test]
async fn full_history_gives_three_percent_inflation() {
    let service = service_with(Arc::new(calm_source(13)), memory_cache());
    let report = service.report_at(at(19, 14)).await.unwrap();

    assert!((report.snapshot.value(Field::CPI_YOY).unwrap() - 3.0).abs() < 1e-9);
    assert_eq!(report.assessment.label, RegimeLabel::RiskOn);
    assert_eq!(report.signals.len(), 5);

    let markdown = report.briefing().unwrap();
    assert_eq!(parse_regime(&markdown), Some(RegimeLabel::RiskOn));
}

#[tokio::test]
async fn cached_snapshot_expires_after_ttl() {
    let source = Arc::new(calm_source(13));
    let service = service_with(source.clone(), memory_cache());

    let first = service.snapshot_at(at(19, 14)).await.unwrap();
    let calls = source.calls();

    // within the 4h trading TTL
    let again = service.snapshot_at(at(19, 17)).await.unwrap();
    assert!(Arc::ptr_eq(&first, &again));
    assert_eq!(source.calls(), calls);

    // past it
    let later = service.snapshot_at(at(19, 19)).await.unwrap();
    assert!(!Arc::ptr_eq(&first, &later));
    assert!(source.calls() > calls);
    assert_eq!(later.previous().unwrap().timestamp(), first.timestamp());
}

#[tokio::test]
async fn stale_values_survive_a_source_outage() {
    let cache = memory_cache();
    let warm = service_with(Arc::new(calm_source(13)), cache.clone());
    warm.snapshot_at(at(19, 9)).await.unwrap();

    let down = service_with(Arc::new(calm_source(13).with_failure("VIX")), cache);
    let snap = down.refresh_at(at(19, 14)).await.unwrap();

    // stale VIX is served rather than dropped, and flagged
    assert_eq!(snap.value(Field::VIX), Some(15.0));
    assert!(snap.unavailable_fields().is_empty());
    assert!(snap.is_degraded());
    assert_eq!(snap.stale_series(), &[MacroSeries::Vix]);
    assert!(snap.notes().iter().any(|n| n.starts_with("VIX served from stale cache")));

    let assessment = down.classify(&snap).unwrap();
    assert_eq!(assessment.label, RegimeLabel::RiskOn);
}

#[tokio::test]
async fn lagged_cpi_compares_the_same_month_a_year_apart() {
    let mut source = calm_source(0);
    for i in 0..13u32 {
        let (year, month) = if i < 4 { (2025, 9 + i) } else { (2026, i - 3) };
        let date = NaiveDate::from_ymd_opt(year, month, 1).unwrap();
        source = source.with_observation("CPI_INDEX", date, 300.0 + f64::from(i));
    }
    let service = service_with(Arc::new(source), memory_cache());
    let snap = service.snapshot_at(at(19, 14)).await.unwrap();

    // September 2026 over September 2025
    assert!((snap.value(Field::CPI_YOY).unwrap() - 4.0).abs() < 1e-9);
    assert_eq!(snap.value(Field::CPI_INDEX), Some(312.0));
}

#[tokio::test]
async fn daily_refreshes_keep_the_cache_bounded() {
    let cache = memory_cache();
    let service = service_with(Arc::new(calm_source(13)), cache.clone());

    for day in 19..=28 {
        service.refresh_at(at(day, 14)).await.unwrap();
    }

    // the latest day plus three retained days of every series
    assert_eq!(cache.len().await, MacroSeries::ALL.len() * 4);
}

#[tokio::test]
async fn outage_without_cache_degrades_gracefully() {
    let source = calm_source(13).with_failure("VIX").with_failure("HY_SPREAD");
    let service = service_with(Arc::new(source), memory_cache());
    let snap = service.snapshot_at(at(19, 14)).await.unwrap();

    assert!(snap.is_degraded());
    let assessment = service.classify(&snap).unwrap();
    assert!(assessment.degraded);
    assert_eq!(assessment.label, RegimeLabel::Neutral);
    assert!(assessment.skipped_rules.iter().any(|s| s.rule == "extreme_volatility"));
}

#[tokio::test]
async fn persisted_cache_is_reused_by_a_new_service() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cache").join("macro.json");
    let settings = CacheSettings::from(&RegimeConfig::default());

    let source = Arc::new(calm_source(13));
    let cache = SeriesCache::open(
        settings,
        Arc::new(AlwaysOpen),
        Arc::new(JsonFileStore::new(&path)),
    )
    .await;
    let first = service_with(source.clone(), cache).snapshot_at(at(19, 14)).await.unwrap();
    assert!(path.exists());
    let calls = source.calls();

    let reopened = SeriesCache::open(
        settings,
        Arc::new(AlwaysOpen),
        Arc::new(JsonFileStore::new(&path)),
    )
    .await;
    let second = service_with(source.clone(), reopened)
        .snapshot_at(at(19, 15))
        .await
        .unwrap();

    assert_eq!(source.calls(), calls);
    assert_eq!(second.timestamp(), first.timestamp());
    assert_eq!(second.value(Field::CPI_YOY), first.value(Field::CPI_YOY));
}

#[tokio::test]
async fn memory_store_receives_every_write() {
    let store = Arc::new(MemoryStore::new());
    let cache = SeriesCache::open(
        CacheSettings::from(&RegimeConfig::default()),
        Arc::new(AlwaysOpen),
        store.clone(),
    )
    .await;
    let service = service_with(Arc::new(calm_source(13)), cache);

    service.snapshot_at(at(19, 14)).await.unwrap();
    assert!(store.save_count() > 0);
}

#[test]
fn malformed_snapshot_is_rejected() {
    let err = assert_err!(MacroSnapshot::build(SnapshotInputs::new(), None, at(19, 14)));
    assert!(matches!(err, MacroError::MalformedSnapshot(_)));
}
