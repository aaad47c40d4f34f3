// =============================================================================
// Strategy evaluators — signal generation
// =============================================================================
//
// Three deterministic evaluators, each conforming to the same small
// capability: `(IndicatorSnapshot, SymbolMeta, RegimeLabel) -> Option<Signal>`.
// Ordering on a given symbol/scan is fixed: LSVR -> VWAP-MR -> Trend-Fallback;
// the first one to produce a signal wins. No dynamic dispatch is needed since
// the caller (the scan pipeline) knows the fixed three-element order and the
// Position later tags itself with `StrategyKind` rather than holding a
// trait object.

pub mod lsvr;
pub mod trend_fallback;
pub mod vwap_mr;

use serde::{Deserialize, Serialize};

use crate::indicators::snapshot::IndicatorSnapshot;
use crate::symbol::SymbolMeta;
use crate::types::{RegimeLabel, Side, StrategyKind};

/// One rung of a take-profit ladder: the price at which to trigger, and the
/// fraction of the position's remaining size to close there.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TpLadderEntry {
    pub trigger_price: f64,
    pub size_fraction: f64,
}

/// A candidate trade produced by an evaluator. Promoted to a Position by the
/// risk engine and order router, or discarded at a gate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub symbol: String,
    pub side: Side,
    pub strategy_kind: StrategyKind,
    pub entry_ref_price: f64,
    pub stop_ref_price: f64,
    pub tp_ladder: Vec<TpLadderEntry>,
    pub time_stop_seconds: u64,
    pub confluence_score: f64,
    pub regime: RegimeLabel,
}

impl Signal {
    /// `R`, the risk unit: the absolute distance between entry and stop.
    pub fn risk_unit(&self) -> f64 {
        (self.entry_ref_price - self.stop_ref_price).abs()
    }

    /// True if the TP ladder's size fractions sum to 1.0 (within epsilon) and
    /// trigger prices are strictly monotonic away from entry, per spec §3's
    /// Signal invariant and P3.
    pub fn ladder_is_valid(&self) -> bool {
        if self.tp_ladder.is_empty() {
            return false;
        }
        let sum: f64 = self.tp_ladder.iter().map(|t| t.size_fraction).sum();
        if (sum - 1.0).abs() > 1e-9 {
            return false;
        }

        let mut prev = self.entry_ref_price;
        for rung in &self.tp_ladder {
            let monotonic = match self.side {
                Side::Long => rung.trigger_price > prev,
                Side::Short => rung.trigger_price < prev,
            };
            if !monotonic {
                return false;
            }
            prev = rung.trigger_price;
        }
        true
    }
}

/// The function signature every evaluator conforms to.
pub type Evaluator =
    fn(&IndicatorSnapshot, &SymbolMeta, RegimeLabel, &EvaluatorConfig) -> Option<Signal>;

/// Shared tunables for all three evaluators, sourced from
/// `strategy.{lsvr,vwap_mr,trend}.*` config keys.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluatorConfig {
    pub lsvr: lsvr::LsvrConfig,
    pub vwap_mr: vwap_mr::VwapMrConfig,
    pub trend: trend_fallback::TrendFallbackConfig,
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        Self {
            lsvr: lsvr::LsvrConfig::default(),
            vwap_mr: vwap_mr::VwapMrConfig::default(),
            trend: trend_fallback::TrendFallbackConfig::default(),
        }
    }
}

/// Run the three evaluators in their fixed order, gated by regime, and
/// return the first signal produced.
pub fn evaluate_symbol(
    snapshot: &IndicatorSnapshot,
    meta: &SymbolMeta,
    regime: RegimeLabel,
    config: &EvaluatorConfig,
) -> Option<Signal> {
    if regime == RegimeLabel::Range {
        if let Some(signal) = lsvr::evaluate(snapshot, meta, regime, &config.lsvr) {
            return Some(signal);
        }
        if let Some(signal) = vwap_mr::evaluate(snapshot, meta, regime, &config.vwap_mr) {
            return Some(signal);
        }
        None
    } else {
        trend_fallback::evaluate(snapshot, meta, regime, &config.trend)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signal(side: Side, entry: f64, stop: f64, ladder: Vec<TpLadderEntry>) -> Signal {
        Signal {
            symbol: "BTCUSDT".into(),
            side,
            strategy_kind: StrategyKind::Lsvr,
            entry_ref_price: entry,
            stop_ref_price: stop,
            tp_ladder: ladder,
            time_stop_seconds: 900,
            confluence_score: 1.0,
            regime: RegimeLabel::Range,
        }
    }

    #[test]
    fn risk_unit_is_absolute_distance() {
        let s = signal(Side::Long, 100.0, 98.6, vec![]);
        assert!((s.risk_unit() - 1.4).abs() < 1e-9);
    }

    #[test]
    fn ladder_valid_requires_fractions_sum_to_one() {
        let s = signal(
            Side::Long,
            100.0,
            98.6,
            vec![
                TpLadderEntry { trigger_price: 100.4, size_fraction: 0.75 },
                TpLadderEntry { trigger_price: 101.0, size_fraction: 0.20 },
                TpLadderEntry { trigger_price: 102.8, size_fraction: 0.05 },
            ],
        );
        assert!(s.ladder_is_valid());
    }

    #[test]
    fn ladder_invalid_when_fractions_dont_sum_to_one() {
        let s = signal(
            Side::Long,
            100.0,
            98.6,
            vec![TpLadderEntry { trigger_price: 100.4, size_fraction: 0.5 }],
        );
        assert!(!s.ladder_is_valid());
    }

    #[test]
    fn ladder_invalid_when_not_monotonic_for_long() {
        let s = signal(
            Side::Long,
            100.0,
            98.6,
            vec![
                TpLadderEntry { trigger_price: 101.0, size_fraction: 0.5 },
                TpLadderEntry { trigger_price: 100.5, size_fraction: 0.5 },
            ],
        );
        assert!(!s.ladder_is_valid());
    }

    #[test]
    fn ladder_monotonic_for_short_is_decreasing() {
        let s = signal(
            Side::Short,
            100.0,
            101.4,
            vec![
                TpLadderEntry { trigger_price: 99.6, size_fraction: 0.5 },
                TpLadderEntry { trigger_price: 99.0, size_fraction: 0.5 },
            ],
        );
        assert!(s.ladder_is_valid());
    }
}
