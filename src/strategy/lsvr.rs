// =============================================================================
// LSVR — Liquidity Sweep -> VWAP Reversion
// =============================================================================
//
// Fires only in range regime. The setup: price pierces a swing reference
// (prior-day high/low or the most recent Asia session extreme) and reclaims
// it, with RSI confirming exhaustion of the sweeping move and volume *not*
// spiking (a volume spike means a breakout, not a trap). Entry targets a
// reversion back through VWAP.
//
// The evaluator works from one closed-bar snapshot, so "reclaim" is read off
// the relationship between current price, the swept level, and the VWAP
// bands rather than off the sweeping bar's wick directly — the snapshot
// doesn't carry per-bar OHLC history, only the derived indicator state.

use serde::{Deserialize, Serialize};

use crate::indicators::snapshot::IndicatorSnapshot;
use crate::symbol::SymbolMeta;
use crate::types::{RegimeLabel, Side, StrategyKind};

use super::{Signal, TpLadderEntry};

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct LsvrConfig {
    /// Swept level must sit at least this many ATRs beyond the nearer VWAP
    /// band (a shallow poke isn't a sweep).
    pub sweep_atr_mult_min: f64,
    /// Reclaim must have pulled price back within this many ATRs of the
    /// swept level (too far past it and it's a momentum break, not a trap).
    pub sweep_atr_mult_max: f64,
    pub rsi_oversold: f64,
    pub rsi_overbought: f64,
    /// Skip the setup if last bar's volume exceeds this multiple of the
    /// 20-bar mean — a spike means the sweep is being driven through, not
    /// trapped and reversed.
    pub volume_spike_mult: f64,
    pub stop_atr_mult: f64,
    pub time_stop_seconds: u64,
    pub r_multiple_final_tp: f64,
}

impl Default for LsvrConfig {
    fn default() -> Self {
        Self {
            sweep_atr_mult_min: 0.5,
            sweep_atr_mult_max: 0.75,
            rsi_oversold: 35.0,
            rsi_overbought: 65.0,
            volume_spike_mult: 3.0,
            stop_atr_mult: 1.35,
            time_stop_seconds: 1200,
            r_multiple_final_tp: 1.8,
        }
    }
}

/// The more recently broken of the two candidate swing levels wins, per the
/// "more recently broken" tie-break: a level set minutes ago is still live
/// liquidity; one set a day ago may already have been absorbed.
fn more_recent_level(a: (f64, i64), b: Option<(f64, i64)>) -> (f64, i64) {
    match b {
        Some(b) if b.1 > a.1 => b,
        _ => a,
    }
}

pub fn evaluate(
    snap: &IndicatorSnapshot,
    _meta: &SymbolMeta,
    regime: RegimeLabel,
    cfg: &LsvrConfig,
) -> Option<Signal> {
    if regime != RegimeLabel::Range {
        return None;
    }

    let atr = snap.atr_14?;
    if atr <= 0.0 {
        return None;
    }
    let rsi = snap.rsi_14?;
    let vwap = snap.vwap?;
    let levels = snap.session_levels?;
    let price = snap.current_price;

    if let (Some(mean_vol), true) = (snap.volume_mean_20, snap.last_volume > 0.0) {
        if mean_vol > 0.0 && snap.last_volume > mean_vol * cfg.volume_spike_mult {
            return None;
        }
    }

    // Long: a sweep of the downside level that has reclaimed back toward VWAP.
    let (pdl_level, pdl_time) = more_recent_level((levels.pdl, levels.pdl_time), levels.asia_low.map(|v| (v, levels.asia_low_time)));
    let dist_to_vwap_low = vwap.lower_1sigma - pdl_level;
    // Divergence, not confirmation: price made the extreme (the sweep below
    // `pdl_level`) while RSI stayed off its own oversold extreme — if RSI had
    // also plunged to `rsi_oversold` the move would be confirmed momentum,
    // not a trap.
    let long_ok = dist_to_vwap_low >= atr * cfg.sweep_atr_mult_min
        && price > pdl_level
        && price - pdl_level <= atr * cfg.sweep_atr_mult_max
        && price <= vwap.lower_1sigma + atr * cfg.sweep_atr_mult_max
        && rsi >= cfg.rsi_oversold
        && pdl_time > 0;

    if long_ok {
        let entry = price;
        let stop = pdl_level - atr * cfg.stop_atr_mult;
        let r = entry - stop;
        if r <= 0.0 {
            return None;
        }
        let ladder = vec![
            TpLadderEntry { trigger_price: vwap.vwap, size_fraction: 0.75 },
            TpLadderEntry { trigger_price: vwap.upper_1sigma, size_fraction: 0.20 },
            TpLadderEntry { trigger_price: entry + r * cfg.r_multiple_final_tp, size_fraction: 0.05 },
        ];
        let signal = Signal {
            symbol: snap.symbol.clone(),
            side: Side::Long,
            strategy_kind: StrategyKind::Lsvr,
            entry_ref_price: entry,
            stop_ref_price: stop,
            tp_ladder: ladder,
            time_stop_seconds: cfg.time_stop_seconds,
            confluence_score: (rsi - cfg.rsi_oversold).max(0.0),
            regime,
        };
        if signal.ladder_is_valid() {
            return Some(signal);
        }
    }

    // Short: a sweep of the upside level that has reclaimed back toward VWAP.
    let (pdh_level, pdh_time) = more_recent_level((levels.pdh, levels.pdh_time), levels.asia_high.map(|v| (v, levels.asia_high_time)));
    let dist_to_vwap_high = pdh_level - vwap.upper_1sigma;
    let short_ok = dist_to_vwap_high >= atr * cfg.sweep_atr_mult_min
        && price < pdh_level
        && pdh_level - price <= atr * cfg.sweep_atr_mult_max
        && price >= vwap.upper_1sigma - atr * cfg.sweep_atr_mult_max
        && rsi <= cfg.rsi_overbought
        && pdh_time > 0;

    if short_ok {
        let entry = price;
        let stop = pdh_level + atr * cfg.stop_atr_mult;
        let r = stop - entry;
        if r <= 0.0 {
            return None;
        }
        let ladder = vec![
            TpLadderEntry { trigger_price: vwap.vwap, size_fraction: 0.75 },
            TpLadderEntry { trigger_price: vwap.lower_1sigma, size_fraction: 0.20 },
            TpLadderEntry { trigger_price: entry - r * cfg.r_multiple_final_tp, size_fraction: 0.05 },
        ];
        let signal = Signal {
            symbol: snap.symbol.clone(),
            side: Side::Short,
            strategy_kind: StrategyKind::Lsvr,
            entry_ref_price: entry,
            stop_ref_price: stop,
            tp_ladder: ladder,
            time_stop_seconds: cfg.time_stop_seconds,
            confluence_score: (cfg.rsi_overbought - rsi).max(0.0),
            regime,
        };
        if signal.ladder_is_valid() {
            return Some(signal);
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::vwap::VwapResult;

    fn base_snapshot() -> IndicatorSnapshot {
        IndicatorSnapshot {
            symbol: "BTCUSDT".into(),
            current_price: 100.2,
            ema_9: None,
            ema_21: None,
            ema_55: None,
            ema_200: None,
            rsi_14: Some(45.0),
            atr_14: Some(1.0),
            adx_14: None,
            bollinger: None,
            bb_width_percentile: None,
            stoch_rsi: None,
            stoch_rsi_k_recent: Vec::new(),
            vwap: Some(VwapResult { vwap: 101.0, upper_1sigma: 101.5, lower_1sigma: 100.5, sigma: 0.5 }),
            vwap_slope_sigma: None,
            supertrend: None,
            session_levels: Some(crate::indicators::session::SessionLevels {
                pdh: 103.0,
                pdh_time: 1000,
                pdl: 99.0,
                pdl_time: 5000,
                asia_high: None,
                asia_high_time: 0,
                asia_low: None,
                asia_low_time: 0,
            }),
            volume_mean_20: Some(100.0),
            last_volume: 50.0,
        }
    }

    #[test]
    fn fires_long_on_reclaimed_downside_sweep() {
        let cfg = LsvrConfig::default();
        let snap = base_snapshot();
        let signal = evaluate(&snap, &meta(), RegimeLabel::Range, &cfg);
        assert!(signal.is_some());
        let s = signal.unwrap();
        assert_eq!(s.side, Side::Long);
        assert!(s.ladder_is_valid());
    }

    #[test]
    fn skips_outside_range_regime() {
        let cfg = LsvrConfig::default();
        let snap = base_snapshot();
        assert!(evaluate(&snap, &meta(), RegimeLabel::Trend, &cfg).is_none());
    }

    #[test]
    fn skips_on_volume_spike() {
        let cfg = LsvrConfig::default();
        let mut snap = base_snapshot();
        snap.last_volume = 500.0;
        assert!(evaluate(&snap, &meta(), RegimeLabel::Range, &cfg).is_none());
    }

    #[test]
    fn skips_when_rsi_confirms_the_sweep() {
        // RSI also at its own extreme means the move is confirmed momentum,
        // not a divergent trap — no entry.
        let cfg = LsvrConfig::default();
        let mut snap = base_snapshot();
        snap.rsi_14 = Some(20.0);
        assert!(evaluate(&snap, &meta(), RegimeLabel::Range, &cfg).is_none());
    }

    fn meta() -> SymbolMeta {
        SymbolMeta {
            symbol_id: "BTCUSDT".into(),
            bucket: crate::types::Bucket::Major,
            sector: "layer1".into(),
            price_tick: 0.1,
            size_lot: 0.001,
            price_decimals: 1,
            size_decimals: 3,
            max_leverage: 25,
            maintenance_margin_rate: 0.005,
        }
    }
}
