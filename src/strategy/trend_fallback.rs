// =============================================================================
// Trend-Fallback — pullback continuation in a trending regime
// =============================================================================
//
// The only evaluator that runs outside range regime. Side is fixed by the
// 200-EMA relationship; entry is a pullback to the VWAP band that recrosses
// the fast/slow EMA pair, confirmed by RSI sitting on the trend's side of 50.
// The first TP rung locks a fixed ATR multiple; the remainder is handed to
// the trailing-stop exit logic (callback-ratio trailing take-profit), so its
// ladder rung is a wide backstop target rather than the real expected exit.

use serde::{Deserialize, Serialize};

use crate::indicators::snapshot::IndicatorSnapshot;
use crate::indicators::supertrend::SupertrendDirection;
use crate::symbol::SymbolMeta;
use crate::types::{RegimeLabel, Side, StrategyKind};

use super::{Signal, TpLadderEntry};

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TrendFallbackConfig {
    pub rsi_midline: f64,
    pub tp1_atr_mult: f64,
    pub stop_atr_mult: f64,
    pub backstop_atr_mult: f64,
    pub tp1_size_fraction: f64,
    pub time_stop_seconds: u64,
}

impl Default for TrendFallbackConfig {
    fn default() -> Self {
        Self {
            rsi_midline: 50.0,
            tp1_atr_mult: 1.2,
            stop_atr_mult: 1.5,
            backstop_atr_mult: 4.0,
            tp1_size_fraction: 0.5,
            time_stop_seconds: 2400,
        }
    }
}

pub fn evaluate(
    snap: &IndicatorSnapshot,
    _meta: &SymbolMeta,
    regime: RegimeLabel,
    cfg: &TrendFallbackConfig,
) -> Option<Signal> {
    if regime != RegimeLabel::Trend {
        return None;
    }

    let atr = snap.atr_14?;
    if atr <= 0.0 {
        return None;
    }
    let rsi = snap.rsi_14?;
    let ema_9 = snap.ema_9?;
    let ema_21 = snap.ema_21?;
    let ema_200 = snap.ema_200?;
    let vwap = snap.vwap?;
    let vwap_slope_sigma = snap.vwap_slope_sigma?;
    let price = snap.current_price;

    let long_trend = price > ema_200;
    let short_trend = price < ema_200;

    // VWAP slope must still point the trend's way, not just the 200-EMA's
    // side of price — a flattening/reversing VWAP means the pullback may be
    // the start of a real reversal, not a fallback entry.
    let slope_aligned_up = vwap_slope_sigma >= 0.0;
    let slope_aligned_down = vwap_slope_sigma <= 0.0;

    let pulled_back_to_band = price <= vwap.upper_1sigma && price >= vwap.lower_1sigma;
    let ema_recrossed_up = ema_9 > ema_21;
    let ema_recrossed_down = ema_9 < ema_21;

    if long_trend && slope_aligned_up && pulled_back_to_band && ema_recrossed_up && rsi >= cfg.rsi_midline {
        let entry = price;
        let swing_stop = match snap.supertrend {
            Some(st) if st.direction == SupertrendDirection::Up && st.band < entry => st.band,
            _ => entry - atr * cfg.stop_atr_mult,
        };
        let r = entry - swing_stop;
        if r <= 0.0 {
            return None;
        }
        let ladder = vec![
            TpLadderEntry { trigger_price: entry + atr * cfg.tp1_atr_mult, size_fraction: cfg.tp1_size_fraction },
            TpLadderEntry { trigger_price: entry + atr * cfg.backstop_atr_mult, size_fraction: 1.0 - cfg.tp1_size_fraction },
        ];
        let signal = Signal {
            symbol: snap.symbol.clone(),
            side: Side::Long,
            strategy_kind: StrategyKind::TrendFallback,
            entry_ref_price: entry,
            stop_ref_price: swing_stop,
            tp_ladder: ladder,
            time_stop_seconds: cfg.time_stop_seconds,
            confluence_score: rsi - cfg.rsi_midline,
            regime,
        };
        if signal.ladder_is_valid() {
            return Some(signal);
        }
    }

    if short_trend && slope_aligned_down && pulled_back_to_band && ema_recrossed_down && rsi <= cfg.rsi_midline {
        let entry = price;
        let swing_stop = match snap.supertrend {
            Some(st) if st.direction == SupertrendDirection::Down && st.band > entry => st.band,
            _ => entry + atr * cfg.stop_atr_mult,
        };
        let r = swing_stop - entry;
        if r <= 0.0 {
            return None;
        }
        let ladder = vec![
            TpLadderEntry { trigger_price: entry - atr * cfg.tp1_atr_mult, size_fraction: cfg.tp1_size_fraction },
            TpLadderEntry { trigger_price: entry - atr * cfg.backstop_atr_mult, size_fraction: 1.0 - cfg.tp1_size_fraction },
        ];
        let signal = Signal {
            symbol: snap.symbol.clone(),
            side: Side::Short,
            strategy_kind: StrategyKind::TrendFallback,
            entry_ref_price: entry,
            stop_ref_price: swing_stop,
            tp_ladder: ladder,
            time_stop_seconds: cfg.time_stop_seconds,
            confluence_score: cfg.rsi_midline - rsi,
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
    use crate::indicators::supertrend::SupertrendResult;
    use crate::indicators::vwap::VwapResult;

    fn meta() -> SymbolMeta {
        SymbolMeta {
            symbol_id: "SOLUSDT".into(),
            bucket: crate::types::Bucket::Mid,
            sector: "layer1".into(),
            price_tick: 0.001,
            size_lot: 0.1,
            price_decimals: 3,
            size_decimals: 1,
            max_leverage: 15,
            maintenance_margin_rate: 0.01,
        }
    }

    fn base_snapshot() -> IndicatorSnapshot {
        IndicatorSnapshot {
            symbol: "SOLUSDT".into(),
            current_price: 100.0,
            ema_9: Some(100.2),
            ema_21: Some(99.8),
            ema_55: None,
            ema_200: Some(95.0),
            rsi_14: Some(55.0),
            atr_14: Some(1.0),
            adx_14: None,
            bollinger: None,
            bb_width_percentile: None,
            stoch_rsi: None,
            stoch_rsi_k_recent: Vec::new(),
            vwap: Some(VwapResult { vwap: 100.5, upper_1sigma: 101.0, lower_1sigma: 99.0, sigma: 0.5 }),
            vwap_slope_sigma: Some(0.3),
            supertrend: Some(SupertrendResult { direction: SupertrendDirection::Up, band: 97.0 }),
            session_levels: None,
            volume_mean_20: Some(100.0),
            last_volume: 90.0,
        }
    }

    #[test]
    fn fires_long_in_uptrend_pullback() {
        let cfg = TrendFallbackConfig::default();
        let snap = base_snapshot();
        let signal = evaluate(&snap, &meta(), RegimeLabel::Trend, &cfg).unwrap();
        assert_eq!(signal.side, Side::Long);
        assert!(signal.ladder_is_valid());
        assert!((signal.stop_ref_price - 97.0).abs() < 1e-9);
    }

    #[test]
    fn skips_in_range_regime() {
        let cfg = TrendFallbackConfig::default();
        let snap = base_snapshot();
        assert!(evaluate(&snap, &meta(), RegimeLabel::Range, &cfg).is_none());
    }

    #[test]
    fn skips_when_below_200ema_with_ema9_above_ema21() {
        let cfg = TrendFallbackConfig::default();
        let mut snap = base_snapshot();
        snap.ema_200 = Some(110.0); // price now below 200-EMA: a downtrend, but EMA9>EMA21 so neither side fires.
        assert!(evaluate(&snap, &meta(), RegimeLabel::Trend, &cfg).is_none());
    }

    #[test]
    fn short_setup_mirrors_long() {
        let cfg = TrendFallbackConfig::default();
        let mut snap = base_snapshot();
        snap.ema_200 = Some(110.0);
        snap.ema_9 = Some(99.8);
        snap.ema_21 = Some(100.2);
        snap.rsi_14 = Some(45.0);
        snap.vwap_slope_sigma = Some(-0.3);
        snap.supertrend = Some(SupertrendResult { direction: SupertrendDirection::Down, band: 103.0 });
        let signal = evaluate(&snap, &meta(), RegimeLabel::Trend, &cfg).unwrap();
        assert_eq!(signal.side, Side::Short);
    }

    #[test]
    fn skips_when_vwap_slope_misaligned_with_trend() {
        // Uptrend pullback setup, but VWAP slope has turned down — no entry.
        let cfg = TrendFallbackConfig::default();
        let mut snap = base_snapshot();
        snap.vwap_slope_sigma = Some(-0.1);
        assert!(evaluate(&snap, &meta(), RegimeLabel::Trend, &cfg).is_none());
    }
}
