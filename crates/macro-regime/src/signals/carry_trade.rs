//! Yen carry-trade unwind
//!
//! Fires when the yen strengthens sharply (USD/JPY falls) while JGB yields
//! rise: the funding leg of the carry trade gets more expensive on both sides.

use serde::{Deserialize, Serialize};

use super::{Evaluation, Reader, ensure_positive};
use crate::error::Result;
use crate::metrics;
use crate::snapshot::Field;

pub(super) const NAME: &str = "carry_trade_unwind";
pub(super) const LABEL: &str = "Yen carry-trade unwind";
pub(super) const DRIVERS: &[Field] = &[Field::USD_JPY, Field::JAPAN_10Y];

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CarryTradeConfig {
    /// Minimum fall in USD/JPY, as a fraction (0.03 == 3%)
    pub jpy_drop: f64,
    /// Minimum rise in the 10Y JGB yield, in basis points
    pub jgb_rise_bps: f64,
}

impl Default for CarryTradeConfig {
    fn default() -> Self {
        Self {
            jpy_drop: 0.03,
            jgb_rise_bps: 10.0,
        }
    }
}

impl CarryTradeConfig {
    pub fn validate(&self) -> Result<()> {
        ensure_positive(NAME, "jpy_drop", self.jpy_drop)?;
        ensure_positive(NAME, "jgb_rise_bps", self.jgb_rise_bps)
    }
}

/// Strength is the USD/JPY fall normalised by the threshold; negative when the
/// yen weakened.
pub(super) fn detect(cfg: &CarryTradeConfig, r: &mut Reader<'_>) -> Option<Evaluation> {
    let usdjpy = r.current(Field::USD_JPY);
    let usdjpy_prev = r.previous(Field::USD_JPY);
    let jgb = r.current(Field::JAPAN_10Y);
    let jgb_prev = r.previous(Field::JAPAN_10Y);
    let (usdjpy, usdjpy_prev, jgb, jgb_prev) = (usdjpy?, usdjpy_prev?, jgb?, jgb_prev?);

    let jpy_drop = -r.checked(metrics::rate_of_change(usdjpy, usdjpy_prev))?;
    let jgb_rise = metrics::change_in_bps(jgb, jgb_prev);

    let fired = jpy_drop > cfg.jpy_drop && jgb_rise > cfg.jgb_rise_bps;
    Some(Evaluation::new(fired, jpy_drop / cfg.jpy_drop))
}
