// =============================================================================
// Session VWAP with standard-deviation bands
// =============================================================================
//
// VWAP (volume-weighted average price) accumulates from the most recent
// session boundary (UTC midnight by default) rather than over a fixed
// look-back window. Bands are ±1σ computed over the same accumulated window,
// using the volume-weighted variance of price around the VWAP.

use crate::market_data::Candle;

/// VWAP and its ±1σ bands as of the last candle in the session window.
#[derive(Debug, Clone, Copy)]
pub struct VwapResult {
    pub vwap: f64,
    pub upper_1sigma: f64,
    pub lower_1sigma: f64,
    pub sigma: f64,
}

/// Compute session VWAP (and 1σ bands) over `candles`, which the caller has
/// already trimmed to the current session (i.e. everything from the last
/// session-boundary candle onward). Returns `None` if `candles` is empty or
/// cumulative volume is zero.
pub fn calculate_vwap(candles: &[Candle]) -> Option<VwapResult> {
    if candles.is_empty() {
        return None;
    }

    let mut cum_pv = 0.0;
    let mut cum_v = 0.0;
    for c in candles {
        let typical = (c.high + c.low + c.close) / 3.0;
        cum_pv += typical * c.volume;
        cum_v += c.volume;
    }

    if cum_v <= 0.0 {
        return None;
    }

    let vwap = cum_pv / cum_v;

    let variance_num: f64 = candles
        .iter()
        .map(|c| {
            let typical = (c.high + c.low + c.close) / 3.0;
            let dev = typical - vwap;
            dev * dev * c.volume
        })
        .sum();
    let variance = variance_num / cum_v;
    let sigma = variance.sqrt();

    if !vwap.is_finite() || !sigma.is_finite() {
        return None;
    }

    Some(VwapResult {
        vwap,
        upper_1sigma: vwap + sigma,
        lower_1sigma: vwap - sigma,
        sigma,
    })
}

/// Slope of VWAP over the last `lookback` closed bars, expressed in units of
/// σ per bar (so it can be compared against the regime classifier's
/// `[-0.05σ, +0.05σ]` band). Returns `None` if fewer than `lookback + 1`
/// session candles are available.
pub fn vwap_slope_in_sigma(candles: &[Candle], lookback: usize) -> Option<f64> {
    if candles.len() < lookback + 1 {
        return None;
    }

    let recent = &candles[candles.len() - lookback - 1..];
    let first = calculate_vwap(&recent[..1])?;
    let last = calculate_vwap(recent)?;

    if last.sigma == 0.0 {
        return Some(0.0);
    }

    Some((last.vwap - first.vwap) / (lookback as f64) / last.sigma)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candle(high: f64, low: f64, close: f64, volume: f64) -> Candle {
        Candle {
            open_time: 0,
            close_time: 0,
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
    fn vwap_empty_returns_none() {
        assert!(calculate_vwap(&[]).is_none());
    }

    #[test]
    fn vwap_zero_volume_returns_none() {
        let candles = vec![candle(101.0, 99.0, 100.0, 0.0); 5];
        assert!(calculate_vwap(&candles).is_none());
    }

    #[test]
    fn vwap_constant_price_has_zero_sigma() {
        let candles = vec![candle(100.0, 100.0, 100.0, 10.0); 5];
        let vwap = calculate_vwap(&candles).unwrap();
        assert!((vwap.vwap - 100.0).abs() < 1e-9);
        assert!(vwap.sigma.abs() < 1e-9);
    }

    #[test]
    fn vwap_weighted_by_volume() {
        // A large-volume bar at 90 should pull VWAP down from a simple mean of 100.
        let candles = vec![
            candle(101.0, 99.0, 100.0, 1.0),
            candle(91.0, 89.0, 90.0, 100.0),
        ];
        let vwap = calculate_vwap(&candles).unwrap();
        assert!(vwap.vwap < 95.0, "expected vwap pulled toward heavy volume bar, got {}", vwap.vwap);
    }

    #[test]
    fn vwap_bands_straddle_vwap() {
        let candles: Vec<Candle> = (0..10)
            .map(|i| candle(101.0 + i as f64, 99.0 + i as f64, 100.0 + i as f64, 10.0))
            .collect();
        let vwap = calculate_vwap(&candles).unwrap();
        assert!(vwap.upper_1sigma > vwap.vwap);
        assert!(vwap.lower_1sigma < vwap.vwap);
    }
}
