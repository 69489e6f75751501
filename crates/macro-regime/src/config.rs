//! Configuration for macro regime operations

use crate::calendar::UsEquitySession;
use crate::error::{MacroError, Result};
use crate::regime::{PositionMultipliers, RegimeThresholds};
use crate::signals::SignalThresholds;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable holding the FRED API key
pub const FRED_API_KEY_ENV: &str = "FRED_API_KEY";

/// Environment variable overriding the cache file location
pub const CACHE_PATH_ENV: &str = "MACRO_CACHE_PATH";

/// Configuration for snapshot building, classification and detection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegimeConfig {
    /// Cache TTL for entries written during the trading session
    pub ttl_trading: Duration,

    /// Cache TTL for entries written outside the trading session
    pub ttl_off_hours: Duration,

    /// Per-series fetch timeout
    pub fetch_timeout: Duration,

    /// Trading session used to pick a TTL
    pub session: UsEquitySession,

    /// Regime decision-list thresholds
    pub regime: RegimeThresholds,

    /// Position-sizing multiplier per regime
    pub multipliers: PositionMultipliers,

    /// Per-detector thresholds
    pub signals: SignalThresholds,

    /// FRED API key (optional; required only by the FRED source)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fred_api_key: Option<String>,

    /// Where the cache is persisted; in-memory only when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_path: Option<PathBuf>,
}

impl Default for RegimeConfig {
    fn default() -> Self {
        Self {
            ttl_trading: Duration::from_secs(4 * 3600),   // 4 hours
            ttl_off_hours: Duration::from_secs(12 * 3600), // 12 hours
            fetch_timeout: Duration::from_secs(15),
            session: UsEquitySession::default(),
            regime: RegimeThresholds::default(),
            multipliers: PositionMultipliers::default(),
            signals: SignalThresholds::default(),
            fred_api_key: None,
            cache_path: None,
        }
    }
}

impl RegimeConfig {
    /// Create a new configuration builder
    pub fn builder() -> RegimeConfigBuilder {
        RegimeConfigBuilder::default()
    }

    /// Load from a JSON file; `${VAR}` references are expanded from the environment
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let config: RegimeConfig = macro_utils::load_json(path.as_ref())
            .map_err(|e| MacroError::ConfigError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Fill the API key and cache path from the environment when unset
    pub fn with_env(mut self) -> Self {
        if self.fred_api_key.is_none() {
            self.fred_api_key = std::env::var(FRED_API_KEY_ENV).ok().filter(|k| !k.is_empty());
        }
        if self.cache_path.is_none() {
            self.cache_path = std::env::var_os(CACHE_PATH_ENV).map(PathBuf::from);
        }
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.ttl_trading.is_zero() || self.ttl_off_hours.is_zero() {
            return Err(MacroError::ConfigError(
                "cache TTLs must be greater than 0".to_string(),
            ));
        }

        if self.ttl_trading > self.ttl_off_hours {
            return Err(MacroError::ConfigError(
                "ttl_trading must not exceed ttl_off_hours".to_string(),
            ));
        }

        if self.fetch_timeout.is_zero() {
            return Err(MacroError::ConfigError(
                "fetch_timeout must be greater than 0".to_string(),
            ));
        }

        if self.session.open >= self.session.close {
            return Err(MacroError::ConfigError(format!(
                "session open {} must precede close {}",
                self.session.open, self.session.close
            )));
        }

        self.regime.validate()?;
        self.multipliers.validate()?;
        self.signals.validate()
    }

    /// TTL for an entry written at a time inside or outside the session
    pub fn ttl(&self, trading_hours: bool) -> Duration {
        if trading_hours {
            self.ttl_trading
        } else {
            self.ttl_off_hours
        }
    }
}

/// Builder for RegimeConfig
#[derive(Debug, Default)]
pub struct RegimeConfigBuilder {
    ttl_trading: Option<Duration>,
    ttl_off_hours: Option<Duration>,
    fetch_timeout: Option<Duration>,
    session: Option<UsEquitySession>,
    regime: Option<RegimeThresholds>,
    multipliers: Option<PositionMultipliers>,
    signals: Option<SignalThresholds>,
    fred_api_key: Option<String>,
    cache_path: Option<PathBuf>,
}

impl RegimeConfigBuilder {
    /// Set cache TTL during the trading session
    pub fn ttl_trading(mut self, duration: Duration) -> Self {
        self.ttl_trading = Some(duration);
        self
    }

    /// Set cache TTL outside the trading session
    pub fn ttl_off_hours(mut self, duration: Duration) -> Self {
        self.ttl_off_hours = Some(duration);
        self
    }

    /// Set per-series fetch timeout
    pub fn fetch_timeout(mut self, duration: Duration) -> Self {
        self.fetch_timeout = Some(duration);
        self
    }

    pub fn session(mut self, session: UsEquitySession) -> Self {
        self.session = Some(session);
        self
    }

    pub fn regime_thresholds(mut self, thresholds: RegimeThresholds) -> Self {
        self.regime = Some(thresholds);
        self
    }

    pub fn multipliers(mut self, multipliers: PositionMultipliers) -> Self {
        self.multipliers = Some(multipliers);
        self
    }

    pub fn signal_thresholds(mut self, thresholds: SignalThresholds) -> Self {
        self.signals = Some(thresholds);
        self
    }

    /// Set FRED API key
    pub fn fred_api_key(mut self, key: impl Into<String>) -> Self {
        self.fred_api_key = Some(key.into());
        self
    }

    /// Set the cache file location
    pub fn cache_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.cache_path = Some(path.into());
        self
    }

    /// Build the configuration
    pub fn build(self) -> Result<RegimeConfig> {
        let defaults = RegimeConfig::default();

        let config = RegimeConfig {
            ttl_trading: self.ttl_trading.unwrap_or(defaults.ttl_trading),
            ttl_off_hours: self.ttl_off_hours.unwrap_or(defaults.ttl_off_hours),
            fetch_timeout: self.fetch_timeout.unwrap_or(defaults.fetch_timeout),
            session: self.session.unwrap_or(defaults.session),
            regime: self.regime.unwrap_or(defaults.regime),
            multipliers: self.multipliers.unwrap_or(defaults.multipliers),
            signals: self.signals.unwrap_or(defaults.signals),
            fred_api_key: self.fred_api_key,
            cache_path: self.cache_path,
        };

        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = RegimeConfig::default();
        assert_eq!(config.ttl_trading, Duration::from_secs(14_400));
        assert_eq!(config.ttl_off_hours, Duration::from_secs(43_200));
        assert_eq!(config.multipliers.crisis, 0.4);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_builder() {
        let config = RegimeConfig::builder()
            .ttl_trading(Duration::from_secs(600))
            .fetch_timeout(Duration::from_secs(5))
            .fred_api_key("test_key")
            .build()
            .unwrap();

        assert_eq!(config.ttl_trading, Duration::from_secs(600));
        assert_eq!(config.ttl(true), Duration::from_secs(600));
        assert_eq!(config.ttl(false), Duration::from_secs(43_200));
        assert_eq!(config.fred_api_key.as_deref(), Some("test_key"));
    }

    #[test]
    fn test_validation_rejects_inverted_ttls() {
        let result = RegimeConfig::builder()
            .ttl_trading(Duration::from_secs(86_400))
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_validation_rejects_zero_timeout() {
        let config = RegimeConfig {
            fetch_timeout: Duration::ZERO,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let json = r#"{ "multipliers": { "crisis": 0.25 }, "regime": { "crisis_vix": 50.0 } }"#;
        let config: RegimeConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.multipliers.crisis, 0.25);
        assert_eq!(config.multipliers.risk_off, 0.7);
        assert_eq!(config.regime.crisis_vix, 50.0);
        assert_eq!(config.regime.risk_on_vix, 18.0);
        assert_eq!(config.ttl_trading, Duration::from_secs(14_400));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{ "signals": {{ "carry_trade": {{ "jpy_drop": 0.05 }} }} }}"#
        )
        .unwrap();

        let config = RegimeConfig::from_file(file.path()).unwrap();
        assert_eq!(config.signals.carry_trade.jpy_drop, 0.05);
        assert_eq!(config.signals.carry_trade.jgb_rise_bps, 10.0);
    }

    #[test]
    fn test_from_file_rejects_invalid_values() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "multipliers": {{ "crisis": -1.0 }} }}"#).unwrap();
        assert!(matches!(
            RegimeConfig::from_file(file.path()),
            Err(MacroError::ConfigError(_))
        ));
    }
}
