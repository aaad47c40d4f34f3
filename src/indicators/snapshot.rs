// =============================================================================
// IndicatorSnapshot — the single struct every downstream component consumes
// =============================================================================
//
// Computed fresh every scan from the last N candles of one timeframe for one
// symbol; never mutated afterward. No hidden state: callers re-pass the
// window each scan, and every value in here is a pure function of that
// window.

use crate::indicators::adx::calculate_adx;
use crate::indicators::atr::calculate_atr;
use crate::indicators::bollinger::{bollinger_width_percentile, calculate_bollinger, BollingerResult};
use crate::indicators::ema::calculate_ema;
use crate::indicators::rsi::calculate_rsi;
use crate::indicators::session::{calculate_session_levels, rolling_volume_mean, SessionLevels};
use crate::indicators::stoch_rsi::{calculate_stoch_rsi, recent_k_values, StochRsiResult};
use crate::indicators::supertrend::{calculate_supertrend, SupertrendResult};
use crate::indicators::vwap::{calculate_vwap, vwap_slope_in_sigma, VwapResult};
use crate::market_data::Candle;

/// Fixed lookbacks used to build a snapshot. These are the indicator
/// engine's contract, not tunables — strategy-level thresholds (not periods)
/// are what config parameterizes.
pub struct SnapshotParams {
    pub ms_per_day: i64,
    pub asia_start_ms: i64,
    pub asia_end_ms: i64,
}

impl Default for SnapshotParams {
    fn default() -> Self {
        Self {
            ms_per_day: 86_400_000,
            // Asia session window (UTC): 00:00-08:00.
            asia_start_ms: 0,
            asia_end_ms: 28_800_000,
        }
    }
}

/// All indicator values at the most recent closed bar, derived from one
/// candle window for one symbol/timeframe.
#[derive(Debug, Clone)]
pub struct IndicatorSnapshot {
    pub symbol: String,
    pub current_price: f64,
    pub ema_9: Option<f64>,
    pub ema_21: Option<f64>,
    pub ema_55: Option<f64>,
    pub ema_200: Option<f64>,
    pub rsi_14: Option<f64>,
    pub atr_14: Option<f64>,
    pub adx_14: Option<f64>,
    pub bollinger: Option<BollingerResult>,
    pub bb_width_percentile: Option<f64>,
    pub stoch_rsi: Option<StochRsiResult>,
    /// Last 3 smoothed %K values (oldest first) — lets a strategy confirm a
    /// threshold cross held somewhere in a short window, not just this bar.
    pub stoch_rsi_k_recent: Vec<f64>,
    pub vwap: Option<VwapResult>,
    pub vwap_slope_sigma: Option<f64>,
    pub supertrend: Option<SupertrendResult>,
    pub session_levels: Option<SessionLevels>,
    pub volume_mean_20: Option<f64>,
    pub last_volume: f64,
}

impl IndicatorSnapshot {
    /// Build a snapshot from `candles` (oldest-first, closed bars only) for
    /// `session_candles` — a finer-grained (typically 1-minute) series used
    /// for VWAP and session-level computation, since those reset at
    /// boundaries the strategy timeframe may not align with.
    pub fn compute(
        symbol: &str,
        candles: &[Candle],
        session_candles: &[Candle],
        params: &SnapshotParams,
    ) -> Option<IndicatorSnapshot> {
        let current_price = candles.last()?.close;
        if current_price <= 0.0 {
            return None;
        }

        let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();

        let ema_9 = calculate_ema(&closes, 9).last().copied();
        let ema_21 = calculate_ema(&closes, 21).last().copied();
        let ema_55 = calculate_ema(&closes, 55).last().copied();
        let ema_200 = calculate_ema(&closes, 200).last().copied();
        let rsi_14 = calculate_rsi(&closes, 14).last().copied();
        let atr_14 = calculate_atr(candles, 14);
        let adx_14 = calculate_adx(candles, 14);
        let bollinger = calculate_bollinger(&closes, 20, 2.0);
        let bb_width_percentile = bollinger_width_percentile(&closes, 20, 2.0, 100);
        let stoch_rsi = calculate_stoch_rsi(&closes, 14, 14, 3, 3);
        let stoch_rsi_k_recent = recent_k_values(&closes, 14, 14, 3, 3);
        let vwap = calculate_vwap(session_candles);
        let vwap_slope_sigma = vwap_slope_in_sigma(session_candles, 20);
        let supertrend = calculate_supertrend(candles, 10, 3.0);
        let session_levels =
            calculate_session_levels(session_candles, params.ms_per_day, params.asia_start_ms, params.asia_end_ms);
        let volume_mean_20 = rolling_volume_mean(candles, 20);

        Some(IndicatorSnapshot {
            symbol: symbol.to_string(),
            current_price,
            ema_9,
            ema_21,
            ema_55,
            ema_200,
            rsi_14,
            atr_14,
            adx_14,
            bollinger,
            bb_width_percentile,
            stoch_rsi,
            stoch_rsi_k_recent,
            vwap,
            vwap_slope_sigma,
            supertrend,
            session_levels,
            volume_mean_20,
            last_volume: candles.last().map(|c| c.volume).unwrap_or(0.0),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candle(open_time: i64, high: f64, low: f64, close: f64, volume: f64) -> Candle {
        Candle {
            open_time,
            close_time: open_time + 59_999,
            open: close,
            high,
            low,
            close,
            volume,
            quote_volume: close * volume,
            trades_count: 1,
            taker_buy_volume: volume / 2.0,
            taker_buy_quote_volume: close * volume / 2.0,
            is_closed: true,
        }
    }

    #[test]
    fn snapshot_empty_candles_is_none() {
        let params = SnapshotParams::default();
        assert!(IndicatorSnapshot::compute("BTCUSDT", &[], &[], &params).is_none());
    }

    #[test]
    fn snapshot_zero_price_is_none() {
        let candles = vec![candle(0, 0.0, 0.0, 0.0, 1.0)];
        let params = SnapshotParams::default();
        assert!(IndicatorSnapshot::compute("BTCUSDT", &candles, &candles, &params).is_none());
    }

    #[test]
    fn snapshot_computes_with_enough_data() {
        let candles: Vec<Candle> = (0..250)
            .map(|i| {
                let base = 100.0 + (i as f64 * 0.05).sin() * 3.0 + i as f64 * 0.02;
                candle(i * 300_000, base + 1.0, base - 1.0, base, 10.0)
            })
            .collect();
        let params = SnapshotParams::default();
        let snap = IndicatorSnapshot::compute("BTCUSDT", &candles, &candles, &params).unwrap();
        assert!(snap.ema_9.is_some());
        assert!(snap.rsi_14.is_some());
        assert!(snap.atr_14.is_some());
        assert!(snap.bollinger.is_some());
        assert!(snap.vwap.is_some());
    }
}
