// =============================================================================
// Leverage-aware risk engine — sizing, liquidation math, guard enforcement
// =============================================================================
//
// Pure functions over a Signal plus account/symbol state: no I/O, no shared
// mutable state. `size_trade` is the sole entry point the order router calls
// before submitting anything; everything else here is a building block it
// composes, kept public so tests (and the lifecycle manager, recomputing
// ladder/stop references during recovery) can exercise them directly.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::strategy::Signal;
use crate::symbol::SymbolMeta;
use crate::types::Side;

/// Liquidation-buffer guard thresholds (spec §3 Position invariants).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct LiqGuardConfig {
    pub max_stop_pct: f64,
    pub min_abs_buffer_pct: f64,
    pub min_fraction_of_liq_distance: f64,
    pub max_shrink_steps: u32,
}

impl Default for LiqGuardConfig {
    fn default() -> Self {
        Self {
            max_stop_pct: 0.028,
            min_abs_buffer_pct: 0.012,
            min_fraction_of_liq_distance: 0.30,
            max_shrink_steps: 10,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RiskEngineConfig {
    /// Fallback leverage used when a symbol's own max leverage is unavailable.
    pub global_leverage: u32,
    pub margin_fraction_per_trade: f64,
    pub min_profit_roe: f64,
    pub trailing_callback_ratio: f64,
    pub liq_guards: LiqGuardConfig,
}

impl Default for RiskEngineConfig {
    fn default() -> Self {
        Self {
            global_leverage: 25,
            margin_fraction_per_trade: 0.10,
            min_profit_roe: 0.025,
            trailing_callback_ratio: 0.003,
            liq_guards: LiqGuardConfig::default(),
        }
    }
}

/// The result of sizing a signal against current equity and symbol metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SizingDecision {
    pub signal: Signal,
    pub leverage: u32,
    pub contracts: f64,
    pub entry_price_reference: f64,
    pub stop_price: f64,
    pub liq_price: f64,
    pub passes_guards: bool,
    pub reason_if_failed: Option<String>,
}

/// Exchange-declared max leverage for the symbol, falling back to the
/// globally configured leverage with a warning when metadata is unavailable.
pub fn effective_leverage(meta: Option<&SymbolMeta>, global_leverage: u32) -> u32 {
    match meta {
        Some(m) if m.max_leverage > 0 => m.max_leverage,
        _ => {
            warn!(global_leverage, "symbol max leverage unavailable, falling back to global configuration");
            global_leverage
        }
    }
}

/// `roe / leverage`: the price-percent move that realizes `roe` return on
/// margin at the given leverage.
pub fn roe_to_price_move(roe: f64, leverage: u32) -> f64 {
    roe / leverage as f64
}

/// Liquidation price for a position opened at `entry` with `leverage` and the
/// symbol's maintenance margin rate.
pub fn liquidation_price(entry: f64, side: Side, leverage: u32, mmr: f64) -> f64 {
    let l = leverage as f64;
    match side {
        Side::Long => entry * (1.0 - 1.0 / l + mmr),
        Side::Short => entry * (1.0 + 1.0 / l - mmr),
    }
}

/// Evaluate the three liquidation-buffer guards (spec §3 Position invariants
/// / P2) for a candidate entry/stop/liq triple. Returns the first failing
/// reason, or `None` if all three hold.
fn guard_failure_reason(entry: f64, stop: f64, liq: f64, cfg: &LiqGuardConfig) -> Option<&'static str> {
    if entry <= 0.0 {
        return Some("non-positive entry price");
    }
    let stop_pct = (entry - stop).abs() / entry;
    if stop_pct > cfg.max_stop_pct {
        return Some("stop distance exceeds max_stop_pct");
    }
    let buffer_pct = (stop - liq).abs() / entry;
    if buffer_pct < cfg.min_abs_buffer_pct {
        return Some("stop-to-liquidation buffer below min_abs_buffer_pct");
    }
    let liq_distance = (entry - liq).abs();
    if liq_distance > 0.0 && (stop - liq).abs() < cfg.min_fraction_of_liq_distance * liq_distance {
        return Some("stop-to-liquidation buffer below min_fraction_of_liq_distance");
    }
    None
}

/// Size `signal` against `equity`, shrinking by 10% per retry (up to
/// `max_shrink_steps`) until the liquidation guards pass or the lot floor is
/// reached, per spec §4.5's `size_trade` contract.
pub fn size_trade(
    signal: &Signal,
    equity: f64,
    leverage: u32,
    meta: &SymbolMeta,
    config: &RiskEngineConfig,
) -> SizingDecision {
    let entry = signal.entry_ref_price;
    let stop = meta.snap_price(signal.stop_ref_price, matches!(signal.side, Side::Short));
    let liq = liquidation_price(entry, signal.side, leverage, meta.maintenance_margin_rate);

    let target_notional = config.margin_fraction_per_trade * equity * leverage as f64;
    let mut contracts = meta.floor_to_lot(target_notional / entry);

    let mut reason = guard_failure_reason(entry, stop, liq, &config.liq_guards);
    let mut steps = 0;
    while reason.is_some() && steps < config.liq_guards.max_shrink_steps {
        contracts = meta.floor_to_lot(contracts * 0.9);
        if contracts < meta.size_lot {
            reason = Some("below min lot");
            break;
        }
        reason = guard_failure_reason(entry, stop, liq, &config.liq_guards);
        steps += 1;
    }

    if contracts < meta.size_lot {
        reason = Some("below min lot");
    }

    let passes_guards = reason.is_none();
    SizingDecision {
        signal: signal.clone(),
        leverage,
        contracts,
        entry_price_reference: entry,
        stop_price: stop,
        liq_price: liq,
        passes_guards,
        reason_if_failed: reason.map(|r| r.to_string()),
    }
}

/// The trigger price for the min-profit floor / trailing-TP activation,
/// `entry * (1 ± roe_to_price_move(min_profit_roe, leverage))` on the
/// favorable side.
pub fn profit_floor_trigger(entry: f64, side: Side, leverage: u32, min_profit_roe: f64) -> f64 {
    let move_pct = roe_to_price_move(min_profit_roe, leverage);
    match side {
        Side::Long => entry * (1.0 + move_pct),
        Side::Short => entry * (1.0 - move_pct),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::TpLadderEntry;
    use crate::types::{Bucket, RegimeLabel, StrategyKind};

    fn meta(max_leverage: u32, mmr: f64) -> SymbolMeta {
        SymbolMeta {
            symbol_id: "BTCUSDT".into(),
            bucket: Bucket::Major,
            sector: "layer1".into(),
            price_tick: 0.01,
            size_lot: 1.0,
            price_decimals: 2,
            size_decimals: 0,
            max_leverage,
            maintenance_margin_rate: mmr,
        }
    }

    fn long_signal(entry: f64, stop: f64) -> Signal {
        Signal {
            symbol: "BTCUSDT".into(),
            side: Side::Long,
            strategy_kind: StrategyKind::Lsvr,
            entry_ref_price: entry,
            stop_ref_price: stop,
            tp_ladder: vec![
                TpLadderEntry { trigger_price: 100.40, size_fraction: 0.75 },
                TpLadderEntry { trigger_price: 101.00, size_fraction: 0.20 },
                TpLadderEntry { trigger_price: 102.80, size_fraction: 0.05 },
            ],
            time_stop_seconds: 900,
            confluence_score: 1.0,
            regime: RegimeLabel::Range,
        }
    }

    #[test]
    fn roe_to_price_move_inverts_cleanly() {
        // P7: roe_to_price_move(target, leverage) * leverage == target within 1e-9.
        let roe = 0.025;
        let leverage = 10;
        let move_pct = roe_to_price_move(roe, leverage);
        assert!((move_pct * leverage as f64 - roe).abs() < 1e-9);
    }

    #[test]
    fn effective_leverage_uses_symbol_metadata() {
        let m = meta(10, 0.005);
        assert_eq!(effective_leverage(Some(&m), 25), 10);
    }

    #[test]
    fn effective_leverage_falls_back_to_global() {
        assert_eq!(effective_leverage(None, 25), 25);
    }

    #[test]
    fn liquidation_price_long_scenario_from_spec() {
        // Spec scenario 1: entry 100.00, leverage 25, mmr 0.005 -> liq 96.50.
        let liq = liquidation_price(100.0, Side::Long, 25, 0.005);
        assert!((liq - 96.50).abs() < 1e-9);
    }

    #[test]
    fn size_trade_matches_spec_scenario_one() {
        let m = meta(25, 0.005);
        let cfg = RiskEngineConfig::default();
        let signal = long_signal(100.0, 98.60);
        let decision = size_trade(&signal, 1000.0, 25, &m, &cfg);
        assert!((decision.contracts - 25.0).abs() < 1e-9);
        assert!(decision.passes_guards);
        assert!((decision.liq_price - 96.50).abs() < 1e-9);
    }

    #[test]
    fn size_trade_rejects_when_stop_too_wide() {
        let m = meta(25, 0.005);
        let cfg = RiskEngineConfig::default();
        // Stop 10% away blows max_stop_pct (2.8%) regardless of shrinking.
        let signal = long_signal(100.0, 90.0);
        let decision = size_trade(&signal, 1000.0, 25, &m, &cfg);
        assert!(!decision.passes_guards);
        assert_eq!(decision.reason_if_failed.as_deref(), Some("stop distance exceeds max_stop_pct"));
    }

    #[test]
    fn size_trade_rejects_below_min_lot() {
        let mut m = meta(25, 0.005);
        m.size_lot = 1_000_000.0; // unreachable lot size forces the floor rejection
        let cfg = RiskEngineConfig::default();
        let signal = long_signal(100.0, 98.60);
        let decision = size_trade(&signal, 1000.0, 25, &m, &cfg);
        assert!(!decision.passes_guards);
        assert_eq!(decision.reason_if_failed.as_deref(), Some("below min lot"));
    }

    #[test]
    fn profit_floor_trigger_matches_spec_scenario_two() {
        // Spec scenario 2: entry 7.5852, leverage 10, roe 0.025 -> 7.5662 short TP1.
        let trigger = profit_floor_trigger(7.5852, Side::Short, 10, 0.025);
        assert!((trigger - 7.5662).abs() < 1e-3);
    }
}
