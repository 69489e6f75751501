//! Immutable point-in-time macro snapshot
//!
//! A [`MacroSnapshot`] holds every tracked raw series plus the derived fields
//! computed from them. Each value is a [`Metric`]: either available or
//! explicitly unavailable with a reason, so a missing input can never be read
//! as a zero.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::error::{MacroError, Result};
use crate::metrics;
use crate::series::MacroSeries;

/// Why a field has no value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum UnavailableReason {
    /// Upstream fetch failed or returned an unusable value
    SourceUnavailable { message: String },
    /// Not enough history for the transform
    InsufficientHistory { needed: usize, available: usize },
    /// Zero denominator
    DivisionUndefined { message: String },
    /// One or more input fields were themselves unavailable
    MissingInput { fields: Vec<Field> },
}

impl fmt::Display for UnavailableReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnavailableReason::SourceUnavailable { message } => {
                write!(f, "source unavailable ({message})")
            }
            UnavailableReason::InsufficientHistory { needed, available } => {
                write!(f, "insufficient history ({available} of {needed})")
            }
            UnavailableReason::DivisionUndefined { message } => {
                write!(f, "division undefined ({message})")
            }
            UnavailableReason::MissingInput { fields } => {
                let names: Vec<String> = fields.iter().map(ToString::to_string).collect();
                write!(f, "missing input ({})", names.join(", "))
            }
        }
    }
}

impl From<&MacroError> for UnavailableReason {
    fn from(err: &MacroError) -> Self {
        match err {
            MacroError::InsufficientHistory { needed, available } => {
                UnavailableReason::InsufficientHistory {
                    needed: *needed,
                    available: *available,
                }
            }
            MacroError::DivisionUndefined(message) => UnavailableReason::DivisionUndefined {
                message: message.clone(),
            },
            MacroError::SourceUnavailable { reason, .. } => {
                UnavailableReason::SourceUnavailable {
                    message: reason.clone(),
                }
            }
            other => UnavailableReason::SourceUnavailable {
                message: other.to_string(),
            },
        }
    }
}

/// A field value that is either present or explicitly unavailable
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "value", rename_all = "snake_case")]
pub enum Metric {
    Available(f64),
    Unavailable(UnavailableReason),
}

impl Metric {
    pub fn value(&self) -> Option<f64> {
        match self {
            Metric::Available(v) => Some(*v),
            Metric::Unavailable(_) => None,
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self, Metric::Available(_))
    }

    pub fn reason(&self) -> Option<&UnavailableReason> {
        match self {
            Metric::Available(_) => None,
            Metric::Unavailable(reason) => Some(reason),
        }
    }

    /// Unavailable because the upstream source failed
    pub fn source_unavailable(message: impl Into<String>) -> Self {
        Metric::Unavailable(UnavailableReason::SourceUnavailable {
            message: message.into(),
        })
    }
}

impl From<Result<f64>> for Metric {
    fn from(result: Result<f64>) -> Self {
        match result {
            Ok(v) => Metric::Available(v),
            Err(err) => Metric::Unavailable(UnavailableReason::from(&err)),
        }
    }
}

/// Fields computed from raw series
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum DerivedField {
    /// CPI year-over-year change (%)
    CpiYoy,
    /// HY spread in basis points
    HySpreadBps,
    /// 10Y minus 2Y yield (percentage points)
    Curve10Y2Y,
    /// 10Y minus 3M yield (percentage points)
    Curve10Y3M,
}

impl DerivedField {
    pub const ALL: [DerivedField; 4] = [
        DerivedField::CpiYoy,
        DerivedField::HySpreadBps,
        DerivedField::Curve10Y2Y,
        DerivedField::Curve10Y3M,
    ];

    pub fn id(self) -> &'static str {
        match self {
            DerivedField::CpiYoy => "CPI_YOY",
            DerivedField::HySpreadBps => "HY_SPREAD_BPS",
            DerivedField::Curve10Y2Y => "CURVE_10Y2Y",
            DerivedField::Curve10Y3M => "CURVE_10Y3M",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            DerivedField::CpiYoy => "CPI YoY",
            DerivedField::HySpreadBps => "HY Spread (bps)",
            DerivedField::Curve10Y2Y => "10Y-2Y Spread",
            DerivedField::Curve10Y3M => "10Y-3M Spread",
        }
    }

    /// Raw series this field is computed from
    ///
    /// CPI YoY reads the monthly CPI history, not the latest raw level.
    pub fn inputs(self) -> &'static [MacroSeries] {
        match self {
            DerivedField::CpiYoy => &[],
            DerivedField::HySpreadBps => &[MacroSeries::HySpread],
            DerivedField::Curve10Y2Y => &[MacroSeries::Treasury10Y, MacroSeries::Treasury2Y],
            DerivedField::Curve10Y3M => &[MacroSeries::Treasury10Y, MacroSeries::Treasury3M],
        }
    }
}

impl From<DerivedField> for String {
    fn from(field: DerivedField) -> Self {
        field.id().to_string()
    }
}

impl TryFrom<String> for DerivedField {
    type Error = MacroError;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        DerivedField::ALL
            .into_iter()
            .find(|field| field.id() == value)
            .ok_or_else(|| MacroError::ConfigError(format!("Unknown derived field: {value}")))
    }
}

/// Any snapshot field, raw or derived
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum Field {
    Raw(MacroSeries),
    Derived(DerivedField),
}

impl Field {
    pub const CPI_INDEX: Field = Field::Raw(MacroSeries::CpiIndex);
    pub const VIX: Field = Field::Raw(MacroSeries::Vix);
    pub const REAL_GDP_GROWTH: Field = Field::Raw(MacroSeries::RealGdpGrowth);
    pub const HY_SPREAD: Field = Field::Raw(MacroSeries::HySpread);
    pub const USD_JPY: Field = Field::Raw(MacroSeries::UsdJpy);
    pub const JAPAN_10Y: Field = Field::Raw(MacroSeries::Japan10Y);
    pub const FED_BALANCE_SHEET: Field = Field::Raw(MacroSeries::FedBalanceSheet);
    pub const CPI_YOY: Field = Field::Derived(DerivedField::CpiYoy);
    pub const HY_SPREAD_BPS: Field = Field::Derived(DerivedField::HySpreadBps);
    pub const CURVE_10Y2Y: Field = Field::Derived(DerivedField::Curve10Y2Y);
    pub const CURVE_10Y3M: Field = Field::Derived(DerivedField::Curve10Y3M);

    pub fn id(self) -> &'static str {
        match self {
            Field::Raw(series) => series.id(),
            Field::Derived(field) => field.id(),
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Field::Raw(series) => series.label(),
            Field::Derived(field) => field.label(),
        }
    }

    pub fn is_derived(self) -> bool {
        matches!(self, Field::Derived(_))
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for Field {
    type Err = MacroError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        if let Ok(series) = s.parse::<MacroSeries>() {
            return Ok(Field::Raw(series));
        }
        DerivedField::try_from(s.to_string()).map(Field::Derived)
    }
}

impl From<Field> for String {
    fn from(field: Field) -> Self {
        field.id().to_string()
    }
}

impl TryFrom<String> for Field {
    type Error = MacroError;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<MacroSeries> for Field {
    fn from(series: MacroSeries) -> Self {
        Field::Raw(series)
    }
}

impl From<DerivedField> for Field {
    fn from(field: DerivedField) -> Self {
        Field::Derived(field)
    }
}

/// Raw values handed to [`MacroSnapshot::build`]
///
/// Every [`MacroSeries`] must have an entry, available or not. A missing key
/// means the caller never attempted the series and the input is malformed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SnapshotInputs {
    pub values: BTreeMap<MacroSeries, Metric>,
    /// Monthly CPI index levels by observation month, oldest first
    pub cpi_history: Vec<f64>,
    /// Series whose value came from an expired cache entry, with the fetch error
    pub stale: BTreeMap<MacroSeries, String>,
}

impl SnapshotInputs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_value(mut self, series: MacroSeries, value: f64) -> Self {
        self.values.insert(series, Metric::Available(value));
        self
    }

    pub fn with_unavailable(mut self, series: MacroSeries, message: impl Into<String>) -> Self {
        self.values.insert(series, Metric::source_unavailable(message));
        self
    }

    pub fn with_cpi_history(mut self, history: Vec<f64>) -> Self {
        self.cpi_history = history;
        self
    }

    /// Mark `series` as served from an expired cache entry
    pub fn with_stale(mut self, series: MacroSeries, reason: impl Into<String>) -> Self {
        self.stale.insert(series, reason.into());
        self
    }
}

/// Immutable, fully-materialised macro snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MacroSnapshot {
    timestamp: DateTime<Utc>,
    raw: BTreeMap<MacroSeries, Metric>,
    derived: BTreeMap<DerivedField, Metric>,
    #[serde(default)]
    notes: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    stale: Vec<MacroSeries>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    previous: Option<Arc<MacroSnapshot>>,
}

impl MacroSnapshot {
    /// Assemble a snapshot, computing every derived field eagerly
    ///
    /// `previous` is kept one level deep: its own back-link is dropped.
    pub fn build(
        inputs: SnapshotInputs,
        previous: Option<Arc<MacroSnapshot>>,
        timestamp: DateTime<Utc>,
    ) -> Result<Self> {
        let missing: Vec<&str> = MacroSeries::ALL
            .iter()
            .filter(|series| !inputs.values.contains_key(series))
            .map(|series| series.id())
            .collect();
        if !missing.is_empty() {
            return Err(MacroError::MalformedSnapshot(format!(
                "missing raw fields: {}",
                missing.join(", ")
            )));
        }

        if let Some(prev) = &previous {
            if timestamp < prev.timestamp {
                return Err(MacroError::MalformedSnapshot(format!(
                    "timestamp {timestamp} precedes previous snapshot {}",
                    prev.timestamp
                )));
            }
        }

        let mut notes = Vec::new();
        let mut raw = BTreeMap::new();
        for (series, metric) in inputs.values {
            let metric = match metric {
                Metric::Available(v) => Metric::from(metrics::check_finite(series.id(), v)),
                unavailable => unavailable,
            };
            if let Metric::Unavailable(reason) = &metric {
                notes.push(format!("{series} unavailable: {reason}"));
            }
            raw.insert(series, metric);
        }

        let mut stale = Vec::new();
        for (series, reason) in inputs.stale {
            if raw.get(&series).is_some_and(Metric::is_available) {
                notes.push(format!("{series} served from stale cache: {reason}"));
                stale.push(series);
            }
        }

        let mut derived = BTreeMap::new();
        for field in DerivedField::ALL {
            let metric = derive(field, &raw, &inputs.cpi_history);
            if let Metric::Unavailable(reason) = &metric {
                notes.push(format!("{} unavailable: {reason}", field.id()));
            }
            derived.insert(field, metric);
        }

        let previous = previous.map(|prev| {
            if prev.previous.is_some() {
                Arc::new(prev.detached())
            } else {
                prev
            }
        });

        tracing::debug!(
            "Built snapshot at {} with {} note(s)",
            timestamp,
            notes.len()
        );

        Ok(Self {
            timestamp,
            raw,
            derived,
            notes,
            stale,
            previous,
        })
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Previous snapshot, if this one was built with a back-reference
    pub fn previous(&self) -> Option<&MacroSnapshot> {
        self.previous.as_deref()
    }

    pub fn get(&self, field: Field) -> Option<&Metric> {
        match field {
            Field::Raw(series) => self.raw.get(&series),
            Field::Derived(derived) => self.derived.get(&derived),
        }
    }

    /// Numeric value of `field`; `None` when unavailable
    pub fn value(&self, field: impl Into<Field>) -> Option<f64> {
        self.get(field.into()).and_then(Metric::value)
    }

    pub fn raw(&self) -> impl Iterator<Item = (MacroSeries, &Metric)> {
        self.raw.iter().map(|(k, v)| (*k, v))
    }

    pub fn derived(&self) -> impl Iterator<Item = (DerivedField, &Metric)> {
        self.derived.iter().map(|(k, v)| (*k, v))
    }

    /// Every field that is present but unavailable, raw fields first
    pub fn unavailable_fields(&self) -> Vec<Field> {
        let raw = self
            .raw
            .iter()
            .filter(|(_, m)| !m.is_available())
            .map(|(s, _)| Field::Raw(*s));
        let derived = self
            .derived
            .iter()
            .filter(|(_, m)| !m.is_available())
            .map(|(d, _)| Field::Derived(*d));
        raw.chain(derived).collect()
    }

    /// Observations about degraded inputs, one per unavailable or stale field
    pub fn notes(&self) -> &[String] {
        &self.notes
    }

    /// Raw series whose value is an expired cached observation
    pub fn stale_series(&self) -> &[MacroSeries] {
        &self.stale
    }

    /// True when any field is unavailable or served stale
    pub fn is_degraded(&self) -> bool {
        !self.stale.is_empty()
            || self
                .raw
                .values()
                .chain(self.derived.values())
                .any(|m| !m.is_available())
    }

    /// Check structural completeness
    ///
    /// Snapshots produced by [`MacroSnapshot::build`] always pass; this guards
    /// snapshots read back from a store.
    pub fn validate(&self) -> Result<()> {
        let mut missing: Vec<&str> = MacroSeries::ALL
            .iter()
            .filter(|series| !self.raw.contains_key(series))
            .map(|series| series.id())
            .collect();
        missing.extend(
            DerivedField::ALL
                .iter()
                .filter(|field| !self.derived.contains_key(field))
                .map(|field| field.id()),
        );

        if missing.is_empty() {
            Ok(())
        } else {
            Err(MacroError::MalformedSnapshot(format!(
                "missing fields: {}",
                missing.join(", ")
            )))
        }
    }

    /// Copy without the back-reference
    pub fn detached(&self) -> MacroSnapshot {
        MacroSnapshot {
            timestamp: self.timestamp,
            raw: self.raw.clone(),
            derived: self.derived.clone(),
            notes: self.notes.clone(),
            stale: self.stale.clone(),
            previous: None,
        }
    }
}

fn derive(field: DerivedField, raw: &BTreeMap<MacroSeries, Metric>, cpi_history: &[f64]) -> Metric {
    let mut values = Vec::with_capacity(field.inputs().len());
    let mut missing = Vec::new();
    for series in field.inputs() {
        match raw.get(series).and_then(Metric::value) {
            Some(v) => values.push(v),
            None => missing.push(Field::Raw(*series)),
        }
    }
    if !missing.is_empty() {
        return Metric::Unavailable(UnavailableReason::MissingInput { fields: missing });
    }

    let result = match field {
        DerivedField::CpiYoy => {
            if cpi_history.iter().any(|v| !v.is_finite()) {
                Err(MacroError::source_unavailable(
                    MacroSeries::CpiIndex.id(),
                    "non-finite value in CPI history",
                ))
            } else {
                metrics::yoy_percent(cpi_history).map(|yoy| yoy * 100.0)
            }
        }
        DerivedField::HySpreadBps => Ok(metrics::to_basis_points(values[0])),
        DerivedField::Curve10Y2Y | DerivedField::Curve10Y3M => {
            Ok(metrics::curve_spread(values[0], values[1]))
        }
    };
    Metric::from(result)
}
