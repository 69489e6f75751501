//! Fed balance-sheet liquidity drain

use serde::{Deserialize, Serialize};

use super::{Evaluation, Reader, ensure_positive};
use crate::error::Result;
use crate::metrics;
use crate::snapshot::Field;

pub(super) const NAME: &str = "liquidity_drain";
pub(super) const LABEL: &str = "Liquidity drain";
pub(super) const DRIVERS: &[Field] = &[Field::FED_BALANCE_SHEET];

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LiquidityDrainConfig {
    /// Minimum contraction of Fed total assets, as a fraction (0.005 == 0.5%)
    pub contraction: f64,
}

impl Default for LiquidityDrainConfig {
    fn default() -> Self {
        Self { contraction: 0.005 }
    }
}

impl LiquidityDrainConfig {
    pub fn validate(&self) -> Result<()> {
        ensure_positive(NAME, "contraction", self.contraction)
    }
}

/// Strength is the contraction in percent; negative when the balance sheet grew.
pub(super) fn detect(cfg: &LiquidityDrainConfig, r: &mut Reader<'_>) -> Option<Evaluation> {
    let current = r.current(Field::FED_BALANCE_SHEET);
    let previous = r.previous(Field::FED_BALANCE_SHEET);
    let (current, previous) = (current?, previous?);

    let contraction = -r.checked(metrics::rate_of_change(current, previous))?;
    Some(Evaluation::new(
        contraction > cfg.contraction,
        contraction * 100.0,
    ))
}
