//! Deterministic macro regime and signal engine
//!
//! This crate turns a set of macroeconomic and cross-asset series into an
//! immutable snapshot, labels the market regime and flags cross-asset signals.
//! It includes:
//!
//! - A read-through series cache with trading-hours TTLs, stale fallback and
//!   JSON persistence
//! - Derived metrics (CPI year-over-year, curve spreads, basis points)
//! - Immutable snapshots where every field is available or explicitly not
//! - A first-match regime classifier with three-valued conditions
//! - Five independent cross-asset signal detectors
//! - A FRED-backed series source and a markdown briefing renderer
//!
//! # Example
//!
//! ```rust,ignore
//! use macro_regime::{FredSource, MacroService, RegimeConfig, SeriesCache};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Arc::new(RegimeConfig::default().with_env());
//!     let cache = SeriesCache::from_config(&config);
//!     let service = MacroService::new(Arc::new(FredSource::from_env()?), cache, config)?;
//!
//!     let report = service.report().await?;
//!     println!("{}", report.briefing()?);
//!
//!     Ok(())
//! }
//! ```

pub mod briefing;
pub mod cache;
pub mod calendar;
pub mod config;
pub mod error;
pub mod metrics;
pub mod regime;
pub mod series;
pub mod service;
pub mod signals;
pub mod snapshot;
pub mod source;
pub mod store;

// Re-export main types for convenience
pub use briefing::{parse_regime, render_briefing};
pub use cache::{
    CacheEntry, CacheSettings, CacheState, CachedHistory, HistoryEntry, SeriesCache, SeriesEntry,
};
pub use calendar::{TradingCalendar, UsEquitySession, is_exchange_holiday};
pub use config::RegimeConfig;
pub use error::{MacroError, Result, SeriesFailure};
pub use regime::{
    Condition, PositionMultipliers, RegimeAssessment, RegimeClassifier, RegimeLabel, RegimeRule,
    RegimeThresholds,
};
pub use series::{MacroSeries, RawSeriesPoint};
pub use service::{MacroReport, MacroService, classify_regime, detect_signals};
pub use signals::{Detector, Signal, SignalDetectorRegistry, SignalThresholds, fired_only};
pub use snapshot::{DerivedField, Field, MacroSnapshot, Metric, SnapshotInputs, UnavailableReason};
pub use source::{FredClient, FredSource, SeriesSource, StaticSource};
pub use store::{CacheStore, JsonFileStore, MemoryStore};
