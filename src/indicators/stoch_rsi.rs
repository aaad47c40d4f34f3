// =============================================================================
// Stochastic RSI
// =============================================================================
//
// Stoch RSI applies the %K/%D stochastic formula to RSI values rather than
// price. Periods here: RSI period 14, stochastic look-back 14, %K smoothing
// 3, %D smoothing 3 (fast 3 / slow 3 per the indicator engine's contract).

use super::rsi::calculate_rsi;

/// A single Stoch RSI reading.
#[derive(Debug, Clone, Copy)]
pub struct StochRsiResult {
    pub k: f64,
    pub d: f64,
}

/// Compute the most recent Stoch RSI %K/%D pair.
///
/// `rsi_period` is the RSI look-back (14), `stoch_period` the stochastic
/// look-back applied to the RSI series (14), `k_smooth`/`d_smooth` the SMA
/// smoothing windows (3/3).
pub fn calculate_stoch_rsi(
    closes: &[f64],
    rsi_period: usize,
    stoch_period: usize,
    k_smooth: usize,
    d_smooth: usize,
) -> Option<StochRsiResult> {
    if d_smooth == 0 {
        return None;
    }
    let smoothed_k = smoothed_k_series(closes, rsi_period, stoch_period, k_smooth)?;
    if smoothed_k.len() < d_smooth {
        return None;
    }
    let smoothed_d = sma_series(&smoothed_k, d_smooth);

    let k = *smoothed_k.last()?;
    let d = *smoothed_d.last()?;

    if !k.is_finite() || !d.is_finite() {
        return None;
    }

    Some(StochRsiResult { k, d })
}

/// The last `n` smoothed %K values (oldest first), used to confirm a
/// threshold cross held over a multi-bar window rather than a single print.
pub fn recent_k_values(
    closes: &[f64],
    rsi_period: usize,
    stoch_period: usize,
    k_smooth: usize,
    n: usize,
) -> Vec<f64> {
    match smoothed_k_series(closes, rsi_period, stoch_period, k_smooth) {
        Some(smoothed_k) => {
            let take = n.min(smoothed_k.len());
            smoothed_k[smoothed_k.len() - take..].to_vec()
        }
        None => Vec::new(),
    }
}

/// Raw %K = (RSI - min(RSI, stoch_period)) / (max - min) * 100 over a
/// rolling window of the RSI series, then SMA-smoothed by `k_smooth`.
fn smoothed_k_series(closes: &[f64], rsi_period: usize, stoch_period: usize, k_smooth: usize) -> Option<Vec<f64>> {
    if rsi_period == 0 || stoch_period == 0 || k_smooth == 0 {
        return None;
    }

    let rsi_series = calculate_rsi(closes, rsi_period);
    if rsi_series.len() < stoch_period + k_smooth {
        return None;
    }

    let mut raw_k = Vec::with_capacity(rsi_series.len() - stoch_period + 1);
    for i in stoch_period - 1..rsi_series.len() {
        let window = &rsi_series[i + 1 - stoch_period..=i];
        let lo = window.iter().cloned().fold(f64::INFINITY, f64::min);
        let hi = window.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        let range = hi - lo;
        let k = if range.abs() < 1e-12 {
            50.0
        } else {
            (rsi_series[i] - lo) / range * 100.0
        };
        raw_k.push(k);
    }

    if raw_k.len() < k_smooth {
        return None;
    }

    let smoothed_k = sma_series(&raw_k, k_smooth);
    if smoothed_k.is_empty() {
        None
    } else {
        Some(smoothed_k)
    }
}

fn sma_series(values: &[f64], period: usize) -> Vec<f64> {
    if values.len() < period {
        return Vec::new();
    }
    let mut out = Vec::with_capacity(values.len() - period + 1);
    for i in period - 1..values.len() {
        let window = &values[i + 1 - period..=i];
        out.push(window.iter().sum::<f64>() / period as f64);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stoch_rsi_insufficient_data_is_none() {
        let closes: Vec<f64> = (0..10).map(|i| 100.0 + i as f64).collect();
        assert!(calculate_stoch_rsi(&closes, 14, 14, 3, 3).is_none());
    }

    #[test]
    fn stoch_rsi_in_valid_range() {
        let closes: Vec<f64> = (0..60)
            .map(|i| 100.0 + (i as f64 * 0.2).sin() * 5.0)
            .collect();
        let result = calculate_stoch_rsi(&closes, 14, 14, 3, 3);
        assert!(result.is_some());
        let r = result.unwrap();
        assert!((0.0..=100.0).contains(&r.k), "k out of range: {}", r.k);
        assert!((0.0..=100.0).contains(&r.d), "d out of range: {}", r.d);
    }

    #[test]
    fn stoch_rsi_strong_uptrend_reads_high() {
        let closes: Vec<f64> = (0..60).map(|i| 100.0 + i as f64 * 2.0).collect();
        let result = calculate_stoch_rsi(&closes, 14, 14, 3, 3).unwrap();
        assert!(result.k > 50.0, "expected elevated %K in uptrend, got {}", result.k);
    }
}
