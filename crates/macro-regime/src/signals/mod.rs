//! Cross-asset signal detectors
//!
//! Each detector compares the current snapshot with the previous one and
//! emits a [`Signal`]. Detectors are independent and stateless; the
//! [`SignalDetectorRegistry`] runs them in a fixed order and always returns
//! one signal per registered detector.

mod carry_trade;
mod credit_stress;
mod liquidity;
mod reflation;
mod risk_rally;

pub use carry_trade::CarryTradeConfig;
pub use credit_stress::CreditStressConfig;
pub use liquidity::LiquidityDrainConfig;
pub use reflation::ReflationConfig;
pub use risk_rally::RiskRallyConfig;

use serde::{Deserialize, Serialize};

use crate::error::{MacroError, Result};
use crate::snapshot::{Field, MacroSnapshot};

/// Output of one detector for one snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    /// Stable detector id, e.g. `carry_trade_unwind`
    pub name: String,
    pub label: String,
    pub fired: bool,
    /// Detector-specific magnitude; `None` when the detector could not evaluate
    pub strength: Option<f64>,
    /// Fields the detector reads
    pub drivers: Vec<Field>,
    /// Explanation when inputs were missing or a test was skipped
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl Signal {
    pub fn is_unavailable(&self) -> bool {
        self.strength.is_none()
    }
}

/// Thresholds for every built-in detector
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalThresholds {
    pub carry_trade: CarryTradeConfig,
    pub credit_stress: CreditStressConfig,
    pub liquidity_drain: LiquidityDrainConfig,
    pub reflation: ReflationConfig,
    pub risk_rally: RiskRallyConfig,
}

impl SignalThresholds {
    pub fn validate(&self) -> Result<()> {
        self.carry_trade.validate()?;
        self.credit_stress.validate()?;
        self.liquidity_drain.validate()?;
        self.reflation.validate()?;
        self.risk_rally.validate()
    }
}

/// The closed set of detectors
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Detector {
    CarryTradeUnwind(CarryTradeConfig),
    CreditStress(CreditStressConfig),
    LiquidityDrain(LiquidityDrainConfig),
    Reflation(ReflationConfig),
    RiskRally(RiskRallyConfig),
}

impl Detector {
    pub fn name(&self) -> &'static str {
        match self {
            Detector::CarryTradeUnwind(_) => carry_trade::NAME,
            Detector::CreditStress(_) => credit_stress::NAME,
            Detector::LiquidityDrain(_) => liquidity::NAME,
            Detector::Reflation(_) => reflation::NAME,
            Detector::RiskRally(_) => risk_rally::NAME,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Detector::CarryTradeUnwind(_) => carry_trade::LABEL,
            Detector::CreditStress(_) => credit_stress::LABEL,
            Detector::LiquidityDrain(_) => liquidity::LABEL,
            Detector::Reflation(_) => reflation::LABEL,
            Detector::RiskRally(_) => risk_rally::LABEL,
        }
    }

    pub fn drivers(&self) -> &'static [Field] {
        match self {
            Detector::CarryTradeUnwind(_) => carry_trade::DRIVERS,
            Detector::CreditStress(_) => credit_stress::DRIVERS,
            Detector::LiquidityDrain(_) => liquidity::DRIVERS,
            Detector::Reflation(_) => reflation::DRIVERS,
            Detector::RiskRally(_) => risk_rally::DRIVERS,
        }
    }

    pub fn detect(&self, current: &MacroSnapshot, previous: Option<&MacroSnapshot>) -> Signal {
        let mut reader = Reader::new(current, previous);
        let outcome = match self {
            Detector::CarryTradeUnwind(cfg) => carry_trade::detect(cfg, &mut reader),
            Detector::CreditStress(cfg) => credit_stress::detect(cfg, &mut reader),
            Detector::LiquidityDrain(cfg) => liquidity::detect(cfg, &mut reader),
            Detector::Reflation(cfg) => reflation::detect(cfg, &mut reader),
            Detector::RiskRally(cfg) => risk_rally::detect(cfg, &mut reader),
        };

        let mut signal = Signal {
            name: self.name().to_string(),
            label: self.label().to_string(),
            fired: false,
            strength: None,
            drivers: self.drivers().to_vec(),
            note: None,
        };
        match outcome {
            Some(Evaluation {
                fired,
                strength,
                note,
            }) => {
                signal.fired = fired;
                signal.strength = Some(strength);
                signal.note = note;
            }
            None => {
                signal.note = Some(reader.missing_note());
                tracing::debug!("Signal {} unavailable: {:?}", signal.name, signal.note);
            }
        }
        signal
    }
}

/// What a detector decided once its inputs were read
pub(crate) struct Evaluation {
    pub fired: bool,
    pub strength: f64,
    pub note: Option<String>,
}

impl Evaluation {
    pub fn new(fired: bool, strength: f64) -> Self {
        Self {
            fired,
            strength,
            note: None,
        }
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }
}

/// Field access that records which inputs were unavailable
pub(crate) struct Reader<'a> {
    current: &'a MacroSnapshot,
    previous: Option<&'a MacroSnapshot>,
    missing: Vec<String>,
    problems: Vec<String>,
}

impl<'a> Reader<'a> {
    fn new(current: &'a MacroSnapshot, previous: Option<&'a MacroSnapshot>) -> Self {
        Self {
            current,
            previous,
            missing: Vec::new(),
            problems: Vec::new(),
        }
    }

    pub fn current(&mut self, field: Field) -> Option<f64> {
        let value = self.current.value(field);
        if value.is_none() {
            self.missing.push(field.id().to_string());
        }
        value
    }

    pub fn previous(&mut self, field: Field) -> Option<f64> {
        let value = self.peek_previous(field);
        if value.is_none() {
            self.missing.push(format!("{} (previous)", field.id()));
        }
        value
    }

    /// Previous value without recording it as missing
    pub fn peek_previous(&self, field: Field) -> Option<f64> {
        self.previous.and_then(|prev| prev.value(field))
    }

    /// Unwrap a computation that can fail, recording the failure
    pub fn checked(&mut self, result: Result<f64>) -> Option<f64> {
        match result {
            Ok(v) => Some(v),
            Err(err) => {
                self.problems.push(err.to_string());
                None
            }
        }
    }

    fn missing_note(&self) -> String {
        let mut parts = Vec::new();
        if !self.missing.is_empty() {
            parts.push(format!("inputs unavailable: {}", self.missing.join(", ")));
        }
        parts.extend(self.problems.iter().cloned());
        if parts.is_empty() {
            "inputs unavailable".to_string()
        } else {
            parts.join("; ")
        }
    }
}

/// Ordered set of detectors
#[derive(Debug, Clone)]
pub struct SignalDetectorRegistry {
    detectors: Vec<Detector>,
}

impl Default for SignalDetectorRegistry {
    fn default() -> Self {
        Self::from_config(&SignalThresholds::default())
    }
}

impl SignalDetectorRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self {
            detectors: Vec::new(),
        }
    }

    /// All built-in detectors in their fixed order
    pub fn from_config(thresholds: &SignalThresholds) -> Self {
        Self {
            detectors: vec![
                Detector::CarryTradeUnwind(thresholds.carry_trade),
                Detector::CreditStress(thresholds.credit_stress),
                Detector::LiquidityDrain(thresholds.liquidity_drain),
                Detector::Reflation(thresholds.reflation),
                Detector::RiskRally(thresholds.risk_rally),
            ],
        }
    }

    /// Add a detector; a detector with the same name is rejected
    pub fn register(&mut self, detector: Detector) -> Result<()> {
        if self.detectors.iter().any(|d| d.name() == detector.name()) {
            return Err(MacroError::ConfigError(format!(
                "Detector already registered: {}",
                detector.name()
            )));
        }
        tracing::debug!("Registered detector: {}", detector.name());
        self.detectors.push(detector);
        Ok(())
    }

    pub fn detectors(&self) -> &[Detector] {
        &self.detectors
    }

    pub fn len(&self) -> usize {
        self.detectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.detectors.is_empty()
    }

    /// Run every detector; one signal per detector, in registration order
    ///
    /// When `previous` is `None` the snapshot's own back-reference is used.
    pub fn detect_all(
        &self,
        current: &MacroSnapshot,
        previous: Option<&MacroSnapshot>,
    ) -> Vec<Signal> {
        let previous = previous.or_else(|| current.previous());
        let signals: Vec<Signal> = self
            .detectors
            .iter()
            .map(|detector| detector.detect(current, previous))
            .collect();

        let fired = signals.iter().filter(|s| s.fired).count();
        tracing::info!(
            "Evaluated {} detectors at {}: {} fired",
            signals.len(),
            current.timestamp(),
            fired
        );
        signals
    }
}

/// Signals that fired, in input order
pub fn fired_only(signals: &[Signal]) -> Vec<&Signal> {
    signals.iter().filter(|s| s.fired).collect()
}

fn ensure_finite(name: &str, values: &[(&str, f64)]) -> Result<()> {
    for (field, value) in values {
        if !value.is_finite() {
            return Err(MacroError::ConfigError(format!(
                "{name}.{field} must be finite, got {value}"
            )));
        }
    }
    Ok(())
}

fn ensure_positive(name: &str, field: &str, value: f64) -> Result<()> {
    if value > 0.0 && value.is_finite() {
        Ok(())
    } else {
        Err(MacroError::ConfigError(format!(
            "{name}.{field} must be positive, got {value}"
        )))
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use crate::series::MacroSeries;
    use crate::snapshot::test_support::{calm_inputs, snapshot};

    #[test]
    fn test_registry_has_five_detectors_in_order() {
        let registry = SignalDetectorRegistry::default();
        let names: Vec<&str> = registry.detectors().iter().map(Detector::name).collect();
        assert_eq!(
            names,
            vec![
                "carry_trade_unwind",
                "credit_stress",
                "liquidity_drain",
                "reflation",
                "risk_rally",
            ]
        );
    }

    #[test]
    fn test_detect_all_returns_one_signal_per_detector() {
        let (_, current) = pair(unchanged, unchanged);
        let signals = SignalDetectorRegistry::default().detect_all(&current, None);
        assert_eq!(signals.len(), 5);
        assert!(signals.iter().all(|s| !s.is_unavailable()));
    }

    #[test]
    fn test_no_previous_snapshot_makes_delta_detectors_unavailable() {
        let current = snapshot(calm_inputs());
        let signals = SignalDetectorRegistry::default().detect_all(&current, None);
        assert_eq!(signals.len(), 5);

        let carry = &signals[0];
        assert!(!carry.fired);
        assert_eq!(carry.strength, None);
        assert!(carry.note.as_deref().unwrap().contains("USD_JPY (previous)"));

        // credit stress can still run its level test
        let credit = &signals[1];
        assert!(credit.strength.is_some());
    }

    #[test]
    fn test_explicit_previous_overrides_back_reference() {
        let (_, current) = pair(unchanged, set(MacroSeries::UsdJpy, 140.0));
        // compare the current snapshot with itself: no move at all
        let signals = SignalDetectorRegistry::default().detect_all(&current, Some(&current));
        assert!(!signals[0].fired);

        let signals = SignalDetectorRegistry::default().detect_all(&current, None);
        assert!(signals[0].strength.unwrap() > 0.0);
    }

    #[test]
    fn test_detection_is_idempotent() {
        let (_, current) = pair(unchanged, set(MacroSeries::Vix, 12.0));
        let registry = SignalDetectorRegistry::default();
        assert_eq!(
            registry.detect_all(&current, None),
            registry.detect_all(&current, None)
        );
    }

    #[test]
    fn test_register_rejects_duplicates() {
        let mut registry = SignalDetectorRegistry::new();
        assert!(registry.is_empty());
        registry
            .register(Detector::Reflation(ReflationConfig::default()))
            .unwrap();
        assert!(registry
            .register(Detector::Reflation(ReflationConfig::default()))
            .is_err());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_fired_only_filters() {
        let (_, current) = pair(unchanged, set(MacroSeries::UsdJpy, 140.0));
        let signals = SignalDetectorRegistry::default().detect_all(&current, None);
        let fired = fired_only(&signals);
        assert!(fired.iter().all(|s| s.fired));
        assert!(fired.len() < signals.len());
    }

    #[test]
    fn test_signal_serializes_without_empty_note() {
        let (_, current) = pair(unchanged, unchanged);
        let signals = SignalDetectorRegistry::default().detect_all(&current, None);
        let json = serde_json::to_value(&signals[0]).unwrap();
        assert_eq!(json["name"], "carry_trade_unwind");
        assert!(json.get("note").is_none());
        assert_eq!(json["drivers"][0], "USD_JPY");
    }

    #[test]
    fn test_default_thresholds_validate() {
        assert!(SignalThresholds::default().validate().is_ok());
    }
}
