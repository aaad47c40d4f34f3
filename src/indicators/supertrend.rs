// =============================================================================
// Supertrend(period, multiplier)
// =============================================================================
//
// Supertrend is an ATR-banded trend-following overlay. It flips direction
// when price closes through the opposite band, and otherwise ratchets its
// active band toward price (never away from it), which is what makes it
// useful as a trailing-stop reference for the Trend-Fallback strategy.

use crate::indicators::atr::calculate_atr;
use crate::market_data::Candle;

/// Supertrend state as of the last candle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupertrendDirection {
    Up,
    Down,
}

#[derive(Debug, Clone, Copy)]
pub struct SupertrendResult {
    pub direction: SupertrendDirection,
    /// The active trailing band: below price while `Up`, above price while `Down`.
    pub band: f64,
}

/// Compute Supertrend over `candles` with ATR `period` and band `multiplier`
/// (10, 3.0 per the indicator engine's default). Returns `None` if there
/// isn't enough data for the underlying ATR.
pub fn calculate_supertrend(
    candles: &[Candle],
    period: usize,
    multiplier: f64,
) -> Option<SupertrendResult> {
    if candles.len() < period + 2 {
        return None;
    }

    let mut direction = SupertrendDirection::Up;
    let mut final_upper = f64::INFINITY;
    let mut final_lower = f64::NEG_INFINITY;

    // Walk forward from the first index where ATR becomes available.
    let start = period + 1;
    for i in start..candles.len() {
        let window = &candles[..=i];
        let atr = calculate_atr(window, period)?;
        let hl2 = (candles[i].high + candles[i].low) / 2.0;
        let basic_upper = hl2 + multiplier * atr;
        let basic_lower = hl2 - multiplier * atr;

        let prev_close = candles[i - 1].close;

        final_upper = if basic_upper < final_upper || prev_close > final_upper {
            basic_upper
        } else {
            final_upper
        };
        final_lower = if basic_lower > final_lower || prev_close < final_lower {
            basic_lower
        } else {
            final_lower
        };

        let close = candles[i].close;
        direction = match direction {
            SupertrendDirection::Up if close < final_lower => SupertrendDirection::Down,
            SupertrendDirection::Down if close > final_upper => SupertrendDirection::Up,
            other => other,
        };
    }

    let band = match direction {
        SupertrendDirection::Up => final_lower,
        SupertrendDirection::Down => final_upper,
    };

    if !band.is_finite() {
        return None;
    }

    Some(SupertrendResult { direction, band })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candle(high: f64, low: f64, close: f64) -> Candle {
        Candle {
            open_time: 0,
            close_time: 0,
            open: close,
            high,
            low,
            close,
            volume: 10.0,
            quote_volume: 0.0,
            trades_count: 1,
            taker_buy_volume: 0.0,
            taker_buy_quote_volume: 0.0,
            is_closed: true,
        }
    }

    #[test]
    fn supertrend_insufficient_data_is_none() {
        let candles = vec![candle(101.0, 99.0, 100.0); 5];
        assert!(calculate_supertrend(&candles, 10, 3.0).is_none());
    }

    #[test]
    fn supertrend_strong_uptrend_is_up() {
        let candles: Vec<Candle> = (0..60)
            .map(|i| {
                let base = 100.0 + i as f64 * 1.5;
                candle(base + 1.0, base - 1.0, base + 0.5)
            })
            .collect();
        let result = calculate_supertrend(&candles, 10, 3.0).unwrap();
        assert_eq!(result.direction, SupertrendDirection::Up);
        assert!(result.band < candles.last().unwrap().close);
    }

    #[test]
    fn supertrend_strong_downtrend_is_down() {
        let candles: Vec<Candle> = (0..60)
            .map(|i| {
                let base = 200.0 - i as f64 * 1.5;
                candle(base + 1.0, base - 1.0, base - 0.5)
            })
            .collect();
        let result = calculate_supertrend(&candles, 10, 3.0).unwrap();
        assert_eq!(result.direction, SupertrendDirection::Down);
        assert!(result.band > candles.last().unwrap().close);
    }
}
