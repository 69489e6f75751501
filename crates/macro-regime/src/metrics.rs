//! Derived metric transforms
//!
//! Pure functions over raw series values. Every failure is an explicit error
//! so callers can mark the dependent field unavailable instead of reading a
//! placeholder zero.

use chrono::{Datelike, NaiveDate};
use std::collections::BTreeMap;

use crate::error::{MacroError, Result};

/// Monthly observations needed for a year-over-year comparison
pub const YOY_WINDOW: usize = 13;

/// Year-over-year change as a fraction (`1.0` == +100%)
///
/// `index_values_by_month` is ordered oldest first; the latest value is
/// compared with the one twelve observations earlier.
pub fn yoy_percent(index_values_by_month: &[f64]) -> Result<f64> {
    let available = index_values_by_month.len();
    if available < YOY_WINDOW {
        return Err(MacroError::InsufficientHistory {
            needed: YOY_WINDOW,
            available,
        });
    }

    let latest = index_values_by_month[available - 1];
    let year_ago = index_values_by_month[available - YOY_WINDOW];
    if year_ago == 0.0 {
        return Err(MacroError::DivisionUndefined(
            "index value twelve months ago is zero".to_string(),
        ));
    }

    Ok(latest / year_ago - 1.0)
}

/// Monthly levels ending at the latest observed month, oldest first
///
/// Observations are grouped by the month they are dated in (the last one in
/// a month wins), so a publication lag never shifts the comparison. Only the
/// unbroken run of consecutive months leading up to the latest one is kept,
/// capped at [`YOY_WINDOW`] values.
pub fn monthly_run(observations: &BTreeMap<NaiveDate, f64>) -> Vec<f64> {
    let mut by_month: BTreeMap<(i32, u32), f64> = BTreeMap::new();
    for (date, value) in observations {
        by_month.insert((date.year(), date.month()), *value);
    }

    let mut run = Vec::with_capacity(YOY_WINDOW);
    let mut expected = None;
    for (&(year, month), value) in by_month.iter().rev() {
        if expected.is_some_and(|m| m != (year, month)) || run.len() == YOY_WINDOW {
            break;
        }
        run.push(*value);
        expected = Some(if month == 1 { (year - 1, 12) } else { (year, month - 1) });
    }
    run.reverse();
    run
}

/// Percentage points to basis points
pub fn to_basis_points(percentage_points: f64) -> f64 {
    percentage_points * 100.0
}

/// Long yield minus short yield, in the yields' own units
pub fn curve_spread(long_yield: f64, short_yield: f64) -> f64 {
    long_yield - short_yield
}

/// Relative change `(current - previous) / previous`
pub fn rate_of_change(current: f64, previous: f64) -> Result<f64> {
    if previous == 0.0 {
        return Err(MacroError::DivisionUndefined(format!(
            "rate of change from a zero base (current {current})"
        )));
    }
    Ok((current - previous) / previous)
}

/// Change between two percentage readings, expressed in basis points
pub fn change_in_bps(current: f64, previous: f64) -> f64 {
    to_basis_points(curve_spread(current, previous))
}

/// Reject NaN and infinite upstream values
pub fn check_finite(series_id: &str, value: f64) -> Result<f64> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(MacroError::source_unavailable(
            series_id,
            format!("non-finite value {value}"),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_yoy_doubling() {
        let mut series = vec![100.0; 13];
        series[12] = 200.0;
        assert!(approx(yoy_percent(&series).unwrap(), 1.0));
    }

    #[test]
    fn test_yoy_uses_last_thirteen() {
        // Older leading values are ignored
        let series: Vec<f64> = (0..20).map(|i| 100.0 + f64::from(i)).collect();
        // latest 119, twelve before that 107
        assert!(approx(yoy_percent(&series).unwrap(), 119.0 / 107.0 - 1.0));
    }

    #[test]
    fn test_yoy_insufficient_history() {
        let series = vec![300.0; 11];
        let err = yoy_percent(&series).unwrap_err();
        assert!(matches!(
            err,
            MacroError::InsufficientHistory {
                needed: 13,
                available: 11
            }
        ));
    }

    #[test]
    fn test_yoy_zero_base() {
        let mut series = vec![1.0; 13];
        series[0] = 0.0;
        assert!(matches!(
            yoy_percent(&series),
            Err(MacroError::DivisionUndefined(_))
        ));
    }

    fn month(y: i32, m: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, 1).unwrap()
    }

    #[test]
    fn test_monthly_run_is_keyed_by_observation_month() {
        // Sep 2025 .. Sep 2026, published with a lag
        let observations: BTreeMap<NaiveDate, f64> = (0..13u32)
            .map(|i| {
                let (y, m) = if i < 4 { (2025, 9 + i) } else { (2026, i - 3) };
                (month(y, m), 300.0 + f64::from(i))
            })
            .collect();

        let run = monthly_run(&observations);
        assert_eq!(run.len(), 13);
        assert_eq!(run[0], 300.0);
        assert_eq!(run[12], 312.0);
        assert!(approx(yoy_percent(&run).unwrap(), 0.04));
    }

    #[test]
    fn test_monthly_run_stops_at_gap() {
        let mut observations = BTreeMap::new();
        observations.insert(month(2026, 5), 305.0);
        // June missing
        observations.insert(month(2026, 7), 307.0);
        observations.insert(month(2026, 8), 308.0);
        // a second reading in the same month replaces the first
        observations.insert(NaiveDate::from_ymd_opt(2026, 8, 15).unwrap(), 308.5);

        assert_eq!(monthly_run(&observations), vec![307.0, 308.5]);
        assert!(monthly_run(&BTreeMap::new()).is_empty());
    }

    #[test]
    fn test_monthly_run_caps_at_window() {
        let observations: BTreeMap<NaiveDate, f64> = (1..=12u32)
            .map(|m| (month(2025, m), f64::from(m)))
            .chain((1..=12u32).map(|m| (month(2026, m), 100.0 + f64::from(m))))
            .collect();

        let run = monthly_run(&observations);
        assert_eq!(run.len(), YOY_WINDOW);
        assert_eq!(run[0], 12.0);
        assert_eq!(run[12], 112.0);
    }

    #[test]
    fn test_basis_points_and_spread() {
        assert!(approx(to_basis_points(3.25), 325.0));
        assert!(approx(curve_spread(4.2, 4.5), -0.3));
        assert!(approx(change_in_bps(0.9, 0.5), 40.0));
    }

    #[test]
    fn test_rate_of_change() {
        assert!(approx(rate_of_change(140.0, 150.0).unwrap(), -1.0 / 15.0));
        assert!(matches!(
            rate_of_change(1.0, 0.0),
            Err(MacroError::DivisionUndefined(_))
        ));
    }

    #[test]
    fn test_check_finite() {
        assert_eq!(check_finite("VIX", 17.5).unwrap(), 17.5);
        assert!(check_finite("VIX", f64::NAN).is_err());
        assert!(check_finite("VIX", f64::INFINITY).is_err());
    }
}
