// =============================================================================
// Session levels: prior-day high/low and the Asia-session extreme
// =============================================================================
//
// Both levels are swing references the LSVR strategy sweeps against. The
// session boundary (UTC midnight) and Asia-session window are configured, not
// hardcoded, since different venues report candle open_time in different
// epochs.

use crate::market_data::Candle;

/// Prior-day high/low and the most recent Asia-session high/low, each
/// carrying the close_time of the candle that set the extreme so callers can
/// apply the "more recently broken" tie-break from the strategy's open
/// question resolution.
#[derive(Debug, Clone, Copy)]
pub struct SessionLevels {
    pub pdh: f64,
    pub pdh_time: i64,
    pub pdl: f64,
    pub pdl_time: i64,
    pub asia_high: Option<f64>,
    pub asia_high_time: i64,
    pub asia_low: Option<f64>,
    pub asia_low_time: i64,
}

/// Compute session levels from a slice of 1-minute (or similar) closed
/// candles covering at least the last two UTC days.
///
/// `ms_per_day` is almost always `86_400_000`; `asia_start_ms`/`asia_end_ms`
/// are the millisecond-of-day bounds of the Asia session window (config).
pub fn calculate_session_levels(
    candles: &[Candle],
    ms_per_day: i64,
    asia_start_ms: i64,
    asia_end_ms: i64,
) -> Option<SessionLevels> {
    if candles.is_empty() {
        return None;
    }

    let last_time = candles.last()?.open_time;
    let today_start = last_time - (last_time.rem_euclid(ms_per_day));
    let prior_day_start = today_start - ms_per_day;

    let prior_day: Vec<&Candle> = candles
        .iter()
        .filter(|c| c.open_time >= prior_day_start && c.open_time < today_start)
        .collect();

    if prior_day.is_empty() {
        return None;
    }

    let (mut pdh, mut pdh_time) = (f64::NEG_INFINITY, 0i64);
    let (mut pdl, mut pdl_time) = (f64::INFINITY, 0i64);
    for c in &prior_day {
        if c.high > pdh {
            pdh = c.high;
            pdh_time = c.close_time;
        }
        if c.low < pdl {
            pdl = c.low;
            pdl_time = c.close_time;
        }
    }

    // Most recent Asia session: search back up to 2 days for the window.
    let mut asia_high: Option<f64> = None;
    let mut asia_high_time = 0i64;
    let mut asia_low: Option<f64> = None;
    let mut asia_low_time = 0i64;

    for c in candles.iter().rev() {
        let day_start = c.open_time - c.open_time.rem_euclid(ms_per_day);
        let ms_of_day = c.open_time - day_start;
        if ms_of_day >= asia_start_ms && ms_of_day < asia_end_ms {
            if asia_high.map_or(true, |h| c.high > h) {
                asia_high = Some(c.high);
                asia_high_time = c.close_time;
            }
            if asia_low.map_or(true, |l| c.low < l) {
                asia_low = Some(c.low);
                asia_low_time = c.close_time;
            }
        }
    }

    Some(SessionLevels {
        pdh,
        pdh_time,
        pdl,
        pdl_time,
        asia_high,
        asia_high_time,
        asia_low,
        asia_low_time,
    })
}

/// Rolling mean volume over the last `period` closed candles.
pub fn rolling_volume_mean(candles: &[Candle], period: usize) -> Option<f64> {
    if period == 0 || candles.len() < period {
        return None;
    }
    let window = &candles[candles.len() - period..];
    let mean = window.iter().map(|c| c.volume).sum::<f64>() / period as f64;
    if mean.is_finite() {
        Some(mean)
    } else {
        None
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
            quote_volume: 0.0,
            trades_count: 1,
            taker_buy_volume: 0.0,
            taker_buy_quote_volume: 0.0,
            is_closed: true,
        }
    }

    const DAY: i64 = 86_400_000;

    #[test]
    fn session_levels_empty_is_none() {
        assert!(calculate_session_levels(&[], DAY, 0, 28_800_000).is_none());
    }

    #[test]
    fn session_levels_finds_prior_day_extremes() {
        let mut candles = Vec::new();
        // Prior day: high 110 at minute 500, low 90 at minute 700.
        for m in 0..1440 {
            let t = m * 60_000;
            let (h, l) = if m == 500 {
                (110.0, 100.0)
            } else if m == 700 {
                (105.0, 90.0)
            } else {
                (102.0, 98.0)
            };
            candles.push(candle(t, h, l, 100.0, 10.0));
        }
        // A handful of "today" candles so today_start computation has same-day data.
        for m in 0..5 {
            candles.push(candle(DAY + m * 60_000, 101.0, 99.0, 100.0, 10.0));
        }

        let levels = calculate_session_levels(&candles, DAY, 0, 28_800_000).unwrap();
        assert!((levels.pdh - 110.0).abs() < 1e-9);
        assert!((levels.pdl - 90.0).abs() < 1e-9);
    }

    #[test]
    fn rolling_volume_mean_basic() {
        let candles: Vec<Candle> = (0..20)
            .map(|i| candle(i * 60_000, 101.0, 99.0, 100.0, 10.0 + i as f64))
            .collect();
        let mean = rolling_volume_mean(&candles, 10).unwrap();
        // Last 10 volumes: 20..29 -> mean 24.5
        assert!((mean - 24.5).abs() < 1e-9);
    }

    #[test]
    fn rolling_volume_mean_insufficient_data() {
        let candles = vec![candle(0, 101.0, 99.0, 100.0, 10.0); 3];
        assert!(rolling_volume_mean(&candles, 10).is_none());
    }
}
