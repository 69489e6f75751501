//! Market regime classification
//!
//! The classifier is an ordered list of [`RegimeRule`]s evaluated top to
//! bottom; the first satisfied rule decides the label. Conditions use
//! three-valued logic so an unavailable input can never satisfy a rule, and
//! every rule skipped for that reason is reported on the assessment.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{MacroError, Result};
use crate::snapshot::{Field, MacroSnapshot};

/// Discrete market regime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RegimeLabel {
    Crisis,
    RiskOff,
    RiskOn,
    Neutral,
}

impl RegimeLabel {
    pub const ALL: [RegimeLabel; 4] = [
        RegimeLabel::Crisis,
        RegimeLabel::RiskOff,
        RegimeLabel::RiskOn,
        RegimeLabel::Neutral,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            RegimeLabel::Crisis => "CRISIS",
            RegimeLabel::RiskOff => "RISK_OFF",
            RegimeLabel::RiskOn => "RISK_ON",
            RegimeLabel::Neutral => "NEUTRAL",
        }
    }
}

impl fmt::Display for RegimeLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RegimeLabel {
    type Err = MacroError;

    fn from_str(s: &str) -> Result<Self> {
        let normalized = s.trim().to_uppercase().replace('-', "_");
        RegimeLabel::ALL
            .into_iter()
            .find(|label| label.as_str() == normalized)
            .ok_or_else(|| MacroError::ConfigError(format!("Unknown regime label: {s}")))
    }
}

/// Position-sizing multiplier per regime
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PositionMultipliers {
    pub crisis: f64,
    pub risk_off: f64,
    pub risk_on: f64,
    pub neutral: f64,
}

impl Default for PositionMultipliers {
    fn default() -> Self {
        Self {
            crisis: 0.4,
            risk_off: 0.7,
            risk_on: 1.0,
            neutral: 1.0,
        }
    }
}

impl PositionMultipliers {
    pub fn for_label(&self, label: RegimeLabel) -> f64 {
        match label {
            RegimeLabel::Crisis => self.crisis,
            RegimeLabel::RiskOff => self.risk_off,
            RegimeLabel::RiskOn => self.risk_on,
            RegimeLabel::Neutral => self.neutral,
        }
    }

    pub fn validate(&self) -> Result<()> {
        for label in RegimeLabel::ALL {
            let m = self.for_label(label);
            if !m.is_finite() || m < 0.0 {
                return Err(MacroError::ConfigError(format!(
                    "position multiplier for {label} must be a non-negative number, got {m}"
                )));
            }
        }
        Ok(())
    }
}

/// Thresholds of the regime decision list
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegimeThresholds {
    /// VIX above this is a crisis on its own
    pub crisis_vix: f64,
    /// VIX above this with an inverted curve is a crisis
    pub crisis_vix_inverted: f64,
    /// VIX above this with an inverted curve is risk-off
    pub risk_off_vix_inverted: f64,
    /// Real GDP growth below this is risk-off
    pub risk_off_gdp: f64,
    /// HY spread (%) above this is risk-off
    pub risk_off_hy_spread: f64,
    /// Risk-on requires VIX below this
    pub risk_on_vix: f64,
    /// Risk-on requires 10Y-2Y above this
    pub risk_on_curve: f64,
    /// Risk-on requires real GDP growth above this
    pub risk_on_gdp: f64,
    /// The curve counts as inverted when 10Y-2Y is below this
    pub inversion: f64,
}

impl Default for RegimeThresholds {
    fn default() -> Self {
        Self {
            crisis_vix: 45.0,
            crisis_vix_inverted: 35.0,
            risk_off_vix_inverted: 25.0,
            risk_off_gdp: 0.0,
            risk_off_hy_spread: 5.0,
            risk_on_vix: 18.0,
            risk_on_curve: 0.5,
            risk_on_gdp: 2.0,
            inversion: 0.0,
        }
    }
}

impl RegimeThresholds {
    pub fn validate(&self) -> Result<()> {
        let values = [
            self.crisis_vix,
            self.crisis_vix_inverted,
            self.risk_off_vix_inverted,
            self.risk_off_gdp,
            self.risk_off_hy_spread,
            self.risk_on_vix,
            self.risk_on_curve,
            self.risk_on_gdp,
            self.inversion,
        ];
        if values.iter().any(|v| !v.is_finite()) {
            return Err(MacroError::ConfigError(
                "regime thresholds must be finite".to_string(),
            ));
        }
        if !(self.crisis_vix >= self.crisis_vix_inverted
            && self.crisis_vix_inverted >= self.risk_off_vix_inverted)
        {
            return Err(MacroError::ConfigError(
                "VIX thresholds must satisfy crisis >= crisis_inverted >= risk_off_inverted"
                    .to_string(),
            ));
        }
        Ok(())
    }
}

/// Outcome of evaluating a [`Condition`]
#[derive(Debug, Clone, PartialEq)]
pub enum Truth {
    Satisfied,
    NotSatisfied,
    /// Could not be decided because these fields are unavailable
    Unknown(Vec<Field>),
}

/// Predicate over snapshot fields
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    /// `field > threshold`
    Above(Field, f64),
    /// `field < threshold`
    Below(Field, f64),
    /// Conjunction; false if any part is false, unknown if any part is unknown
    All(Vec<Condition>),
    Always,
}

impl Condition {
    pub fn evaluate(&self, snapshot: &MacroSnapshot) -> Truth {
        match self {
            Condition::Above(field, threshold) => compare(snapshot, *field, |v| v > *threshold),
            Condition::Below(field, threshold) => compare(snapshot, *field, |v| v < *threshold),
            Condition::All(parts) => {
                let mut unknown = Vec::new();
                for part in parts {
                    match part.evaluate(snapshot) {
                        Truth::NotSatisfied => return Truth::NotSatisfied,
                        Truth::Unknown(fields) => {
                            for field in fields {
                                if !unknown.contains(&field) {
                                    unknown.push(field);
                                }
                            }
                        }
                        Truth::Satisfied => {}
                    }
                }
                if unknown.is_empty() {
                    Truth::Satisfied
                } else {
                    Truth::Unknown(unknown)
                }
            }
            Condition::Always => Truth::Satisfied,
        }
    }
}

fn compare(snapshot: &MacroSnapshot, field: Field, test: impl Fn(f64) -> bool) -> Truth {
    match snapshot.value(field) {
        Some(v) if test(v) => Truth::Satisfied,
        Some(_) => Truth::NotSatisfied,
        None => Truth::Unknown(vec![field]),
    }
}

/// One entry of the decision list
#[derive(Debug, Clone, PartialEq)]
pub struct RegimeRule {
    pub name: String,
    pub condition: Condition,
    pub label: RegimeLabel,
}

impl RegimeRule {
    pub fn new(name: impl Into<String>, condition: Condition, label: RegimeLabel) -> Self {
        Self {
            name: name.into(),
            condition,
            label,
        }
    }
}

/// A rule that could not be evaluated
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkippedRule {
    pub rule: String,
    pub unavailable: Vec<Field>,
}

/// Classifier output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegimeAssessment {
    pub label: RegimeLabel,
    pub position_multiplier: f64,
    pub matched_rule: String,
    /// Rules ahead of the match that were skipped for missing inputs
    pub skipped_rules: Vec<SkippedRule>,
    /// True when any skipped rule might have changed the outcome
    pub degraded: bool,
}

impl RegimeAssessment {
    pub fn as_tuple(&self) -> (RegimeLabel, f64) {
        (self.label, self.position_multiplier)
    }
}

/// First-match-wins regime decision list
#[derive(Debug, Clone)]
pub struct RegimeClassifier {
    rules: Vec<RegimeRule>,
    multipliers: PositionMultipliers,
}

impl Default for RegimeClassifier {
    fn default() -> Self {
        Self::from_config(&RegimeThresholds::default(), PositionMultipliers::default())
    }
}

impl RegimeClassifier {
    /// Build the standard seven-rule list
    pub fn from_config(t: &RegimeThresholds, multipliers: PositionMultipliers) -> Self {
        let inverted = || Condition::Below(Field::CURVE_10Y2Y, t.inversion);
        let rules = vec![
            RegimeRule::new(
                "extreme_volatility",
                Condition::Above(Field::VIX, t.crisis_vix),
                RegimeLabel::Crisis,
            ),
            RegimeRule::new(
                "high_volatility_inverted_curve",
                Condition::All(vec![
                    Condition::Above(Field::VIX, t.crisis_vix_inverted),
                    inverted(),
                ]),
                RegimeLabel::Crisis,
            ),
            RegimeRule::new(
                "elevated_volatility_inverted_curve",
                Condition::All(vec![
                    Condition::Above(Field::VIX, t.risk_off_vix_inverted),
                    inverted(),
                ]),
                RegimeLabel::RiskOff,
            ),
            RegimeRule::new(
                "negative_growth",
                Condition::Below(Field::REAL_GDP_GROWTH, t.risk_off_gdp),
                RegimeLabel::RiskOff,
            ),
            RegimeRule::new(
                "wide_credit_spreads",
                Condition::Above(Field::HY_SPREAD, t.risk_off_hy_spread),
                RegimeLabel::RiskOff,
            ),
            RegimeRule::new(
                "calm_growth_steep_curve",
                Condition::All(vec![
                    Condition::Below(Field::VIX, t.risk_on_vix),
                    Condition::Above(Field::CURVE_10Y2Y, t.risk_on_curve),
                    Condition::Above(Field::REAL_GDP_GROWTH, t.risk_on_gdp),
                ]),
                RegimeLabel::RiskOn,
            ),
            RegimeRule::new("default", Condition::Always, RegimeLabel::Neutral),
        ];
        Self::with_rules(rules, multipliers)
    }

    /// Custom rule list; a trailing `Always -> NEUTRAL` rule is appended if
    /// the list does not already end with an unconditional rule
    pub fn with_rules(mut rules: Vec<RegimeRule>, multipliers: PositionMultipliers) -> Self {
        if rules.last().is_none_or(|r| r.condition != Condition::Always) {
            rules.push(RegimeRule::new(
                "default",
                Condition::Always,
                RegimeLabel::Neutral,
            ));
        }
        Self { rules, multipliers }
    }

    pub fn rules(&self) -> &[RegimeRule] {
        &self.rules
    }

    pub fn multipliers(&self) -> &PositionMultipliers {
        &self.multipliers
    }

    /// Label the snapshot
    ///
    /// Fails only for a structurally malformed snapshot.
    pub fn classify(&self, snapshot: &MacroSnapshot) -> Result<RegimeAssessment> {
        snapshot.validate()?;

        let mut skipped_rules = Vec::new();
        for rule in &self.rules {
            match rule.condition.evaluate(snapshot) {
                Truth::Satisfied => {
                    let degraded = !skipped_rules.is_empty();
                    if degraded {
                        tracing::warn!(
                            "Regime {} decided by '{}' after skipping {} rule(s) with unavailable inputs",
                            rule.label,
                            rule.name,
                            skipped_rules.len()
                        );
                    } else {
                        tracing::debug!("Regime {} decided by '{}'", rule.label, rule.name);
                    }
                    return Ok(RegimeAssessment {
                        label: rule.label,
                        position_multiplier: self.multipliers.for_label(rule.label),
                        matched_rule: rule.name.clone(),
                        skipped_rules,
                        degraded,
                    });
                }
                Truth::NotSatisfied => {}
                Truth::Unknown(unavailable) => skipped_rules.push(SkippedRule {
                    rule: rule.name.clone(),
                    unavailable,
                }),
            }
        }

        // with_rules guarantees a trailing unconditional rule
        Ok(RegimeAssessment {
            label: RegimeLabel::Neutral,
            position_multiplier: self.multipliers.for_label(RegimeLabel::Neutral),
            matched_rule: "default".to_string(),
            degraded: !skipped_rules.is_empty(),
            skipped_rules,
        })
    }
}
