//! Markdown macro briefing
//!
//! The briefing is the human-facing summary of one snapshot. Its
//! `**Regime: LABEL**` line is also machine-read later by [`parse_regime`].

use minijinja::Environment;
use regex::Regex;
use serde_json::json;

use crate::error::Result;
use crate::regime::{RegimeAssessment, RegimeLabel};
use crate::series::MacroSeries;
use crate::signals::Signal;
use crate::snapshot::{Field, MacroSnapshot, Metric};

const TEMPLATE_NAME: &str = "macro_briefing.md";

const TEMPLATE: &str = r"## Macro Regime

**Regime: {{ regime }}**

- Position multiplier: {{ multiplier }}
- Decided by: `{{ matched_rule }}`
- As of: {{ timestamp }}
{% if degraded %}
- Classification degraded: {{ skipped | length }} rule(s) skipped for unavailable inputs
{% endif %}

### Key Metrics

| Metric | Value |
|---|---|
{% for row in metrics %}
| {{ row.label }} | {{ row.value }} |
{% endfor %}

### Signals

{% for s in fired %}
- **{{ s.label }}** fired (strength {{ s.strength }})
{% else %}
- No signals fired
{% endfor %}
{% if unavailable_signals %}

Could not evaluate: {{ unavailable_signals | join(', ') }}
{% endif %}
{% if quality %}

### Data Quality

{% for line in quality %}
- {{ line }}
{% endfor %}
{% endif %}
";

const REGIME_PATTERN: &str = r"\*\*Regime:\s*([A-Za-z_\-]+)\*\*";

/// Fields shown in the metric table, in order
const KEY_METRICS: [Field; 14] = [
    Field::VIX,
    Field::Raw(MacroSeries::Treasury10Y),
    Field::Raw(MacroSeries::Treasury2Y),
    Field::CURVE_10Y2Y,
    Field::CURVE_10Y3M,
    Field::Raw(MacroSeries::FedFunds),
    Field::CPI_YOY,
    Field::REAL_GDP_GROWTH,
    Field::Raw(MacroSeries::Unemployment),
    Field::HY_SPREAD_BPS,
    Field::Raw(MacroSeries::DollarIndex),
    Field::USD_JPY,
    Field::JAPAN_10Y,
    Field::FED_BALANCE_SHEET,
];

fn format_metric(field: Field, metric: Option<&Metric>) -> String {
    match metric.and_then(Metric::value) {
        None => "n/a".to_string(),
        Some(v) if field == Field::FED_BALANCE_SHEET || field == Field::HY_SPREAD_BPS => {
            format!("{v:.0}")
        }
        Some(v) => format!("{v:.2}"),
    }
}

/// Render the briefing section for one snapshot
pub fn render_briefing(
    snapshot: &MacroSnapshot,
    assessment: &RegimeAssessment,
    signals: &[Signal],
) -> Result<String> {
    let metrics: Vec<_> = KEY_METRICS
        .iter()
        .map(|field| {
            json!({
                "label": field.label(),
                "value": format_metric(*field, snapshot.get(*field)),
            })
        })
        .collect();

    let fired: Vec<_> = signals
        .iter()
        .filter(|s| s.fired)
        .map(|s| {
            json!({
                "label": s.label,
                "strength": s.strength.map_or_else(|| "n/a".to_string(), |v| format!("{v:.2}")),
            })
        })
        .collect();

    let unavailable_signals: Vec<&str> = signals
        .iter()
        .filter(|s| s.is_unavailable())
        .map(|s| s.label.as_str())
        .collect();

    let mut quality: Vec<String> = assessment
        .skipped_rules
        .iter()
        .map(|skipped| {
            let fields: Vec<String> = skipped.unavailable.iter().map(ToString::to_string).collect();
            format!("Rule `{}` skipped: {} unavailable", skipped.rule, fields.join(", "))
        })
        .collect();
    quality.extend(snapshot.notes().iter().cloned());

    let ctx = json!({
        "regime": assessment.label.as_str(),
        "multiplier": format!("{:.2}", assessment.position_multiplier),
        "matched_rule": assessment.matched_rule,
        "timestamp": snapshot.timestamp().format("%Y-%m-%d %H:%M UTC").to_string(),
        "degraded": assessment.degraded,
        "skipped": assessment.skipped_rules.len(),
        "metrics": metrics,
        "fired": fired,
        "unavailable_signals": unavailable_signals,
        "quality": quality,
    });

    let mut env = Environment::new();
    env.set_trim_blocks(true);
    env.set_lstrip_blocks(true);
    env.add_template(TEMPLATE_NAME, TEMPLATE)?;
    let rendered = env.get_template(TEMPLATE_NAME)?.render(ctx)?;
    Ok(rendered)
}

/// Recover the regime label from a rendered briefing
pub fn parse_regime(markdown: &str) -> Option<RegimeLabel> {
    let re = Regex::new(REGIME_PATTERN).ok()?;
    re.captures(markdown)?.get(1)?.as_str().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::regime::RegimeClassifier;
    use crate::signals::SignalDetectorRegistry;
    use crate::signals::test_support::{pair, set};
    use crate::snapshot::test_support::{calm_inputs, snapshot};

    fn render(snap: &MacroSnapshot) -> String {
        let assessment = RegimeClassifier::default().classify(snap).unwrap();
        let signals = SignalDetectorRegistry::default().detect_all(snap, None);
        render_briefing(snap, &assessment, &signals).unwrap()
    }

    #[test]
    fn test_briefing_contains_regime_and_metrics() {
        let markdown = render(&snapshot(calm_inputs()));

        assert!(markdown.contains("**Regime: RISK_ON**"));
        assert!(markdown.contains("- Position multiplier: 1.00"));
        assert!(markdown.contains("| VIX | 15.00 |"));
        assert!(markdown.contains("| 10Y-2Y Spread | 0.80 |"));
        assert!(markdown.contains("| HY Spread (bps) | 300 |"));
        assert!(!markdown.contains("Classification degraded"));
    }

    #[test]
    fn test_unavailable_values_render_as_na() {
        let snap = snapshot(calm_inputs().with_unavailable(MacroSeries::Vix, "HTTP 503"));
        let markdown = render(&snap);

        assert!(markdown.contains("| VIX | n/a |"));
        assert!(markdown.contains("Classification degraded"));
        assert!(markdown.contains("### Data Quality"));
        assert!(markdown.contains("Rule `extreme_volatility` skipped: VIX unavailable"));
        assert!(markdown.contains("VIX unavailable: source unavailable (HTTP 503)"));
    }

    #[test]
    fn test_fired_signals_are_listed() {
        let (_, current) = pair(set(MacroSeries::Japan10Y, 0.5), |inputs| {
            inputs
                .with_value(MacroSeries::UsdJpy, 140.0)
                .with_value(MacroSeries::Japan10Y, 0.9)
        });
        let markdown = render(&current);
        assert!(markdown.contains("- **Yen carry-trade unwind** fired (strength 2.22)"));
        assert!(!markdown.contains("No signals fired"));
    }

    #[test]
    fn test_no_previous_lists_unavailable_signals() {
        let markdown = render(&snapshot(calm_inputs()));
        assert!(markdown.contains("- No signals fired"));
        assert!(markdown.contains("Could not evaluate: Yen carry-trade unwind"));
    }

    #[test]
    fn test_parse_regime_round_trip() {
        for label in RegimeLabel::ALL {
            let markdown = format!("# Report\n\n**Regime: {label}**\n");
            assert_eq!(parse_regime(&markdown), Some(label));
        }

        let markdown = render(&snapshot(calm_inputs()));
        assert_eq!(parse_regime(&markdown), Some(RegimeLabel::RiskOn));
    }

    #[test]
    fn test_parse_regime_missing_or_unknown() {
        assert_eq!(parse_regime("no regime here"), None);
        assert_eq!(parse_regime("**Regime: SIDEWAYS**"), None);
    }
}
