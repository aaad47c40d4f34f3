// =============================================================================
// VWAP-MR — mean reversion to VWAP off a Bollinger/VWAP-band touch
// =============================================================================
//
// Fires only in range regime, after (or alongside) LSVR's own range check.
// The setup: price touches the outer band (Bollinger or VWAP ±1σ) with
// Stochastic RSI turning back from its extreme and RSI not yet fully
// exhausted, on unremarkable volume.

use serde::{Deserialize, Serialize};

use crate::indicators::snapshot::IndicatorSnapshot;
use crate::symbol::SymbolMeta;
use crate::types::{RegimeLabel, Side, StrategyKind};

use super::{Signal, TpLadderEntry};

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct VwapMrConfig {
    pub stoch_oversold: f64,
    pub stoch_overbought: f64,
    pub rsi_min_long: f64,
    pub rsi_max_short: f64,
    pub volume_spike_mult: f64,
    pub stop_atr_mult: f64,
    pub time_stop_seconds: u64,
    pub final_tp_r_multiple: f64,
}

impl Default for VwapMrConfig {
    fn default() -> Self {
        Self {
            stoch_oversold: 20.0,
            stoch_overbought: 80.0,
            rsi_min_long: 42.0,
            rsi_max_short: 58.0,
            volume_spike_mult: 1.8,
            stop_atr_mult: 1.35,
            time_stop_seconds: 1500,
            final_tp_r_multiple: 2.0,
        }
    }
}

pub fn evaluate(
    snap: &IndicatorSnapshot,
    _meta: &SymbolMeta,
    regime: RegimeLabel,
    cfg: &VwapMrConfig,
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
    let stoch = snap.stoch_rsi?;
    let price = snap.current_price;

    if let Some(mean_vol) = snap.volume_mean_20 {
        if mean_vol > 0.0 && snap.last_volume > mean_vol * cfg.volume_spike_mult {
            return None;
        }
    }

    let touched_lower_band = price <= vwap.lower_1sigma
        || snap.bollinger.as_ref().is_some_and(|bb| price <= bb.lower);
    let touched_upper_band = price >= vwap.upper_1sigma
        || snap.bollinger.as_ref().is_some_and(|bb| price >= bb.upper);

    // Stoch RSI turning up out of oversold, confirmed within the last 3
    // bars: %K touched the oversold threshold somewhere in that window and
    // is now back above %D (the cross has just happened), rather than
    // requiring the touch and the cross on the very same bar.
    let touched_oversold_recently =
        snap.stoch_rsi_k_recent.iter().any(|&k| k <= cfg.stoch_oversold);
    let touched_overbought_recently =
        snap.stoch_rsi_k_recent.iter().any(|&k| k >= cfg.stoch_overbought);
    let stoch_turning_up = touched_oversold_recently && stoch.k >= stoch.d;
    let stoch_turning_down = touched_overbought_recently && stoch.k <= stoch.d;

    if touched_lower_band && stoch_turning_up && rsi >= cfg.rsi_min_long {
        let entry = price;
        let stop = entry - atr * cfg.stop_atr_mult;
        let r = entry - stop;
        if r <= 0.0 {
            return None;
        }
        let ladder = vec![
            TpLadderEntry { trigger_price: vwap.vwap, size_fraction: 0.65 },
            TpLadderEntry { trigger_price: vwap.upper_1sigma, size_fraction: 0.30 },
            TpLadderEntry { trigger_price: entry + r * cfg.final_tp_r_multiple, size_fraction: 0.05 },
        ];
        let signal = Signal {
            symbol: snap.symbol.clone(),
            side: Side::Long,
            strategy_kind: StrategyKind::VwapMr,
            entry_ref_price: entry,
            stop_ref_price: stop,
            tp_ladder: ladder,
            time_stop_seconds: cfg.time_stop_seconds,
            confluence_score: cfg.stoch_oversold - stoch.k,
            regime,
        };
        if signal.ladder_is_valid() {
            return Some(signal);
        }
    }

    if touched_upper_band && stoch_turning_down && rsi <= cfg.rsi_max_short {
        let entry = price;
        let stop = entry + atr * cfg.stop_atr_mult;
        let r = stop - entry;
        if r <= 0.0 {
            return None;
        }
        let ladder = vec![
            TpLadderEntry { trigger_price: vwap.vwap, size_fraction: 0.65 },
            TpLadderEntry { trigger_price: vwap.lower_1sigma, size_fraction: 0.30 },
            TpLadderEntry { trigger_price: entry - r * cfg.final_tp_r_multiple, size_fraction: 0.05 },
        ];
        let signal = Signal {
            symbol: snap.symbol.clone(),
            side: Side::Short,
            strategy_kind: StrategyKind::VwapMr,
            entry_ref_price: entry,
            stop_ref_price: stop,
            tp_ladder: ladder,
            time_stop_seconds: cfg.time_stop_seconds,
            confluence_score: stoch.k - cfg.stoch_overbought,
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
    use crate::indicators::bollinger::BollingerResult;
    use crate::indicators::stoch_rsi::StochRsiResult;
    use crate::indicators::vwap::VwapResult;

    fn meta() -> SymbolMeta {
        SymbolMeta {
            symbol_id: "ETHUSDT".into(),
            bucket: crate::types::Bucket::Major,
            sector: "layer1".into(),
            price_tick: 0.01,
            size_lot: 0.01,
            price_decimals: 2,
            size_decimals: 2,
            max_leverage: 20,
            maintenance_margin_rate: 0.006,
        }
    }

    fn base_snapshot() -> IndicatorSnapshot {
        IndicatorSnapshot {
            symbol: "ETHUSDT".into(),
            current_price: 100.0,
            ema_9: None,
            ema_21: None,
            ema_55: None,
            ema_200: None,
            rsi_14: Some(45.0),
            atr_14: Some(1.0),
            adx_14: None,
            bollinger: Some(BollingerResult { upper: 103.0, middle: 101.0, lower: 100.0, width: 3.0 }),
            bb_width_percentile: None,
            stoch_rsi: Some(StochRsiResult { k: 15.0, d: 10.0 }),
            stoch_rsi_k_recent: vec![25.0, 18.0, 15.0],
            vwap: Some(VwapResult { vwap: 101.5, upper_1sigma: 102.5, lower_1sigma: 100.5, sigma: 1.0 }),
            vwap_slope_sigma: None,
            supertrend: None,
            session_levels: None,
            volume_mean_20: Some(100.0),
            last_volume: 80.0,
        }
    }

    #[test]
    fn fires_long_on_lower_band_touch_with_stoch_turning_up() {
        let cfg = VwapMrConfig::default();
        let snap = base_snapshot();
        let signal = evaluate(&snap, &meta(), RegimeLabel::Range, &cfg).unwrap();
        assert_eq!(signal.side, Side::Long);
        assert!(signal.ladder_is_valid());
    }

    #[test]
    fn skips_on_volume_spike() {
        let cfg = VwapMrConfig::default();
        let mut snap = base_snapshot();
        snap.last_volume = 500.0;
        assert!(evaluate(&snap, &meta(), RegimeLabel::Range, &cfg).is_none());
    }

    #[test]
    fn skips_outside_range_regime() {
        let cfg = VwapMrConfig::default();
        let snap = base_snapshot();
        assert!(evaluate(&snap, &meta(), RegimeLabel::Trend, &cfg).is_none());
    }

    #[test]
    fn skips_when_rsi_too_low_for_long() {
        let cfg = VwapMrConfig::default();
        let mut snap = base_snapshot();
        snap.rsi_14 = Some(30.0);
        assert!(evaluate(&snap, &meta(), RegimeLabel::Range, &cfg).is_none());
    }

    #[test]
    fn skips_when_oversold_touch_not_confirmed_in_window() {
        // %K is back above %D now but never actually reached the oversold
        // threshold within the last 3 bars — no confirmed cross.
        let cfg = VwapMrConfig::default();
        let mut snap = base_snapshot();
        snap.stoch_rsi_k_recent = vec![45.0, 38.0, 33.0];
        assert!(evaluate(&snap, &meta(), RegimeLabel::Range, &cfg).is_none());
    }
}
