//! Reflation
//!
//! Rising inflation with positive growth and a steepening curve.

use serde::{Deserialize, Serialize};

use super::{Evaluation, Reader, ensure_finite};
use crate::error::Result;
use crate::snapshot::Field;

pub(super) const NAME: &str = "reflation";
pub(super) const LABEL: &str = "Reflation";
pub(super) const DRIVERS: &[Field] = &[Field::CPI_YOY, Field::REAL_GDP_GROWTH, Field::CURVE_10Y2Y];

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReflationConfig {
    /// CPI YoY must rise by more than this many percentage points
    pub min_cpi_rise: f64,
    /// Real GDP growth must exceed this (%)
    pub min_gdp_growth: f64,
    /// 10Y-2Y must steepen by more than this many percentage points
    pub min_steepening: f64,
}

impl ReflationConfig {
    pub fn validate(&self) -> Result<()> {
        ensure_finite(
            NAME,
            &[
                ("min_cpi_rise", self.min_cpi_rise),
                ("min_gdp_growth", self.min_gdp_growth),
                ("min_steepening", self.min_steepening),
            ],
        )
    }
}

/// Strength is the sum of the CPI YoY change, GDP growth and curve change,
/// all in percentage points.
pub(super) fn detect(cfg: &ReflationConfig, r: &mut Reader<'_>) -> Option<Evaluation> {
    let cpi = r.current(Field::CPI_YOY);
    let cpi_prev = r.previous(Field::CPI_YOY);
    let gdp = r.current(Field::REAL_GDP_GROWTH);
    let curve = r.current(Field::CURVE_10Y2Y);
    let curve_prev = r.previous(Field::CURVE_10Y2Y);
    let (cpi, cpi_prev, gdp, curve, curve_prev) = (cpi?, cpi_prev?, gdp?, curve?, curve_prev?);

    let cpi_change = cpi - cpi_prev;
    let steepening = curve - curve_prev;
    let fired =
        cpi_change > cfg.min_cpi_rise && gdp > cfg.min_gdp_growth && steepening > cfg.min_steepening;

    Some(Evaluation::new(fired, cpi_change + gdp + steepening))
}
