//! Catalogue of tracked macro series
//!
//! Each raw input of a [`MacroSnapshot`](crate::snapshot::MacroSnapshot) is one
//! [`MacroSeries`] variant. The stable string identifier is what the cache and
//! persisted files use; the FRED code is what the upstream client requests.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::MacroError;

/// Raw macro series tracked by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum MacroSeries {
    /// 3-Month Treasury bill yield (%)
    Treasury3M,
    /// 2-Year Treasury yield (%)
    Treasury2Y,
    /// 5-Year Treasury yield (%)
    Treasury5Y,
    /// 10-Year Treasury yield (%)
    Treasury10Y,
    /// 30-Year Treasury yield (%)
    Treasury30Y,
    /// Effective federal funds rate (%)
    FedFunds,
    /// CPI, all urban consumers (index level)
    CpiIndex,
    /// Real GDP growth, annualised quarterly (%)
    RealGdpGrowth,
    /// Unemployment rate (%)
    Unemployment,
    /// CBOE volatility index
    Vix,
    /// ICE BofA US high-yield option-adjusted spread (%)
    HySpread,
    /// Nominal broad dollar index
    DollarIndex,
    /// Japanese yen per US dollar
    UsdJpy,
    /// Japan 10-year government bond yield (%)
    Japan10Y,
    /// Federal Reserve total assets (millions USD)
    FedBalanceSheet,
}

impl MacroSeries {
    /// Every tracked series, in fetch and display order
    pub const ALL: [MacroSeries; 15] = [
        MacroSeries::Treasury3M,
        MacroSeries::Treasury2Y,
        MacroSeries::Treasury5Y,
        MacroSeries::Treasury10Y,
        MacroSeries::Treasury30Y,
        MacroSeries::FedFunds,
        MacroSeries::CpiIndex,
        MacroSeries::RealGdpGrowth,
        MacroSeries::Unemployment,
        MacroSeries::Vix,
        MacroSeries::HySpread,
        MacroSeries::DollarIndex,
        MacroSeries::UsdJpy,
        MacroSeries::Japan10Y,
        MacroSeries::FedBalanceSheet,
    ];

    /// Stable identifier used as cache key and in persisted files
    pub fn id(self) -> &'static str {
        match self {
            MacroSeries::Treasury3M => "3M_YIELD",
            MacroSeries::Treasury2Y => "2Y_YIELD",
            MacroSeries::Treasury5Y => "5Y_YIELD",
            MacroSeries::Treasury10Y => "10Y_YIELD",
            MacroSeries::Treasury30Y => "30Y_YIELD",
            MacroSeries::FedFunds => "FED_FUNDS",
            MacroSeries::CpiIndex => "CPI_INDEX",
            MacroSeries::RealGdpGrowth => "REAL_GDP_GROWTH",
            MacroSeries::Unemployment => "UNEMPLOYMENT",
            MacroSeries::Vix => "VIX",
            MacroSeries::HySpread => "HY_SPREAD",
            MacroSeries::DollarIndex => "DOLLAR_INDEX",
            MacroSeries::UsdJpy => "USD_JPY",
            MacroSeries::Japan10Y => "JP10Y_YIELD",
            MacroSeries::FedBalanceSheet => "FED_BALANCE_SHEET",
        }
    }

    /// FRED series code
    pub fn fred_id(self) -> &'static str {
        match self {
            MacroSeries::Treasury3M => "DGS3MO",
            MacroSeries::Treasury2Y => "DGS2",
            MacroSeries::Treasury5Y => "DGS5",
            MacroSeries::Treasury10Y => "DGS10",
            MacroSeries::Treasury30Y => "DGS30",
            MacroSeries::FedFunds => "DFF",
            MacroSeries::CpiIndex => "CPIAUCSL",
            MacroSeries::RealGdpGrowth => "A191RL1Q225SBEA",
            MacroSeries::Unemployment => "UNRATE",
            MacroSeries::Vix => "VIXCLS",
            MacroSeries::HySpread => "BAMLH0A0HYM2",
            MacroSeries::DollarIndex => "DTWEXBGS",
            MacroSeries::UsdJpy => "DEXJPUS",
            MacroSeries::Japan10Y => "IRLTLT01JPM156N",
            MacroSeries::FedBalanceSheet => "WALCL",
        }
    }

    /// Whether the series is published at daily (business-day) frequency
    pub fn is_daily(self) -> bool {
        matches!(
            self,
            MacroSeries::Treasury3M
                | MacroSeries::Treasury2Y
                | MacroSeries::Treasury5Y
                | MacroSeries::Treasury10Y
                | MacroSeries::Treasury30Y
                | MacroSeries::FedFunds
                | MacroSeries::Vix
                | MacroSeries::HySpread
                | MacroSeries::DollarIndex
                | MacroSeries::UsdJpy
        )
    }

    /// Short human-readable name
    pub fn label(self) -> &'static str {
        match self {
            MacroSeries::Treasury3M => "3M Treasury",
            MacroSeries::Treasury2Y => "2Y Treasury",
            MacroSeries::Treasury5Y => "5Y Treasury",
            MacroSeries::Treasury10Y => "10Y Treasury",
            MacroSeries::Treasury30Y => "30Y Treasury",
            MacroSeries::FedFunds => "Fed Funds",
            MacroSeries::CpiIndex => "CPI Index",
            MacroSeries::RealGdpGrowth => "Real GDP Growth",
            MacroSeries::Unemployment => "Unemployment",
            MacroSeries::Vix => "VIX",
            MacroSeries::HySpread => "HY Spread",
            MacroSeries::DollarIndex => "Dollar Index",
            MacroSeries::UsdJpy => "USD/JPY",
            MacroSeries::Japan10Y => "Japan 10Y",
            MacroSeries::FedBalanceSheet => "Fed Balance Sheet",
        }
    }
}

impl fmt::Display for MacroSeries {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for MacroSeries {
    type Err = MacroError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MacroSeries::ALL
            .into_iter()
            .find(|series| series.id() == s)
            .ok_or_else(|| MacroError::ConfigError(format!("Unknown series id: {s}")))
    }
}

impl From<MacroSeries> for String {
    fn from(series: MacroSeries) -> Self {
        series.id().to_string()
    }
}

impl TryFrom<String> for MacroSeries {
    type Error = MacroError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// A single upstream observation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawSeriesPoint {
    pub series_id: String,
    pub value: f64,
    /// Date the observation applies to
    pub as_of: NaiveDate,
    /// Wall-clock time of retrieval
    pub fetched_at: DateTime<Utc>,
}

impl RawSeriesPoint {
    pub fn new(
        series_id: impl Into<String>,
        value: f64,
        as_of: NaiveDate,
        fetched_at: DateTime<Utc>,
    ) -> Self {
        Self {
            series_id: series_id.into(),
            value,
            as_of,
            fetched_at,
        }
    }
}
