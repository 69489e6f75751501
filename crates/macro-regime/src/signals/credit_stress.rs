//! High-yield credit stress
//!
//! Fires when the HY spread is above an absolute level, or when it widened
//! sharply since the previous snapshot.

use serde::{Deserialize, Serialize};

use super::{Evaluation, Reader, ensure_positive};
use crate::error::Result;
use crate::snapshot::Field;

pub(super) const NAME: &str = "credit_stress";
pub(super) const LABEL: &str = "Credit stress";
pub(super) const DRIVERS: &[Field] = &[Field::HY_SPREAD_BPS];

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CreditStressConfig {
    /// Absolute spread level that fires on its own, in bps
    pub level_bps: f64,
    /// Widening versus the previous snapshot that fires, in bps
    pub widening_bps: f64,
    /// Spread regarded as normal; strength is the excess over it
    pub baseline_bps: f64,
}

impl Default for CreditStressConfig {
    fn default() -> Self {
        Self {
            level_bps: 500.0,
            widening_bps: 50.0,
            baseline_bps: 400.0,
        }
    }
}

impl CreditStressConfig {
    pub fn validate(&self) -> Result<()> {
        ensure_positive(NAME, "level_bps", self.level_bps)?;
        ensure_positive(NAME, "widening_bps", self.widening_bps)?;
        ensure_positive(NAME, "baseline_bps", self.baseline_bps)
    }
}

/// Strength is `(spread - baseline) / baseline`.
///
/// Only the current spread is required; without a previous value the
/// widening test is skipped and noted.
pub(super) fn detect(cfg: &CreditStressConfig, r: &mut Reader<'_>) -> Option<Evaluation> {
    let spread = r.current(Field::HY_SPREAD_BPS)?;
    let strength = (spread - cfg.baseline_bps) / cfg.baseline_bps;
    let above_level = spread > cfg.level_bps;

    match r.peek_previous(Field::HY_SPREAD_BPS) {
        Some(previous) => {
            let widened = spread - previous > cfg.widening_bps;
            Some(Evaluation::new(above_level || widened, strength))
        }
        None => Some(
            Evaluation::new(above_level, strength)
                .with_note("previous HY spread unavailable; widening test skipped"),
        ),
    }
}
