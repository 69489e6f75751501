//! Broad risk rally
//!
//! Falling volatility, a steepening curve and tightening credit at once.

use serde::{Deserialize, Serialize};

use super::{Evaluation, Reader, ensure_finite};
use crate::error::Result;
use crate::metrics;
use crate::snapshot::Field;

pub(super) const NAME: &str = "risk_rally";
pub(super) const LABEL: &str = "Risk rally";
pub(super) const DRIVERS: &[Field] = &[Field::VIX, Field::CURVE_10Y2Y, Field::HY_SPREAD];

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskRallyConfig {
    /// VIX must fall by more than this fraction
    pub min_vix_fall: f64,
    /// 10Y-2Y must steepen by more than this many percentage points
    pub min_steepening: f64,
    /// HY spread must tighten by more than this many percentage points
    pub min_hy_tightening: f64,
}

impl RiskRallyConfig {
    pub fn validate(&self) -> Result<()> {
        ensure_finite(
            NAME,
            &[
                ("min_vix_fall", self.min_vix_fall),
                ("min_steepening", self.min_steepening),
                ("min_hy_tightening", self.min_hy_tightening),
            ],
        )
    }
}

/// Strength is VIX fall (fraction) + curve steepening (pp) + HY tightening (pp).
pub(super) fn detect(cfg: &RiskRallyConfig, r: &mut Reader<'_>) -> Option<Evaluation> {
    let vix = r.current(Field::VIX);
    let vix_prev = r.previous(Field::VIX);
    let curve = r.current(Field::CURVE_10Y2Y);
    let curve_prev = r.previous(Field::CURVE_10Y2Y);
    let hy = r.current(Field::HY_SPREAD);
    let hy_prev = r.previous(Field::HY_SPREAD);
    let (vix, vix_prev, curve, curve_prev, hy, hy_prev) =
        (vix?, vix_prev?, curve?, curve_prev?, hy?, hy_prev?);

    let vix_fall = -r.checked(metrics::rate_of_change(vix, vix_prev))?;
    let steepening = curve - curve_prev;
    let tightening = hy_prev - hy;
    let fired = vix_fall > cfg.min_vix_fall
        && steepening > cfg.min_steepening
        && tightening > cfg.min_hy_tightening;

    Some(Evaluation::new(fired, vix_fall + steepening + tightening))
}
