// =============================================================================
// Regime classifier
// =============================================================================
//
// Binary classification: `range` if ADX, Bollinger-width percentile, and
// VWAP slope all sit inside their bucket's band; `trend` otherwise. LSVR and
// VWAP-MR only fire in `range`; Trend-Fallback only fires in `trend`.

use serde::{Deserialize, Serialize};

use crate::indicators::snapshot::IndicatorSnapshot;
use crate::types::{Bucket, RegimeLabel};

/// Per-bucket regime thresholds. Defaults mirror spec §4.3.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RegimeThresholds {
    pub adx_range_max: f64,
    pub bb_pct_max: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegimeConfig {
    pub major: RegimeThresholds,
    pub mid: RegimeThresholds,
    pub micro: RegimeThresholds,
    /// VWAP slope band, in units of sigma per bar, that still counts as range.
    pub vwap_slope_band_sigma: f64,
}

impl Default for RegimeConfig {
    fn default() -> Self {
        Self {
            major: RegimeThresholds { adx_range_max: 20.0, bb_pct_max: 40.0 },
            mid: RegimeThresholds { adx_range_max: 22.0, bb_pct_max: 50.0 },
            micro: RegimeThresholds { adx_range_max: 25.0, bb_pct_max: 60.0 },
            vwap_slope_band_sigma: 0.05,
        }
    }
}

impl RegimeConfig {
    pub fn thresholds_for(&self, bucket: Bucket) -> RegimeThresholds {
        match bucket {
            Bucket::Major => self.major,
            Bucket::Mid => self.mid,
            Bucket::Micro => self.micro,
        }
    }
}

/// Classify the regime for a symbol from its indicator snapshot. Returns
/// `None` if a required indicator isn't ready yet (treated by callers as "no
/// evaluators may fire this scan").
pub fn classify(snapshot: &IndicatorSnapshot, bucket: Bucket, config: &RegimeConfig) -> Option<RegimeLabel> {
    let t = config.thresholds_for(bucket);

    let adx = snapshot.adx_14?;
    let bb_pct = snapshot.bb_width_percentile?;
    let vwap_slope = snapshot.vwap_slope_sigma?;

    let is_range = adx < t.adx_range_max
        && bb_pct <= t.bb_pct_max
        && vwap_slope >= -config.vwap_slope_band_sigma
        && vwap_slope <= config.vwap_slope_band_sigma;

    Some(if is_range { RegimeLabel::Range } else { RegimeLabel::Trend })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::bollinger::BollingerResult;

    fn snapshot(adx: f64, bb_pct: f64, vwap_slope: f64) -> IndicatorSnapshot {
        IndicatorSnapshot {
            symbol: "BTCUSDT".into(),
            current_price: 100.0,
            ema_9: None,
            ema_21: None,
            ema_55: None,
            ema_200: None,
            rsi_14: None,
            atr_14: None,
            adx_14: Some(adx),
            bollinger: Some(BollingerResult { upper: 101.0, middle: 100.0, lower: 99.0, width: 2.0 }),
            bb_width_percentile: Some(bb_pct),
            stoch_rsi: None,
            stoch_rsi_k_recent: Vec::new(),
            vwap: None,
            vwap_slope_sigma: Some(vwap_slope),
            supertrend: None,
            session_levels: None,
            volume_mean_20: None,
            last_volume: 0.0,
        }
    }

    #[test]
    fn classifies_range_when_all_thresholds_hold() {
        let cfg = RegimeConfig::default();
        let snap = snapshot(15.0, 30.0, 0.01);
        assert_eq!(classify(&snap, Bucket::Major, &cfg), Some(RegimeLabel::Range));
    }

    #[test]
    fn classifies_trend_when_adx_too_high() {
        let cfg = RegimeConfig::default();
        let snap = snapshot(30.0, 30.0, 0.01);
        assert_eq!(classify(&snap, Bucket::Major, &cfg), Some(RegimeLabel::Trend));
    }

    #[test]
    fn classifies_trend_when_bb_pct_too_high() {
        let cfg = RegimeConfig::default();
        let snap = snapshot(15.0, 80.0, 0.01);
        assert_eq!(classify(&snap, Bucket::Major, &cfg), Some(RegimeLabel::Trend));
    }

    #[test]
    fn classifies_trend_when_vwap_slope_outside_band() {
        let cfg = RegimeConfig::default();
        let snap = snapshot(15.0, 30.0, 0.2);
        assert_eq!(classify(&snap, Bucket::Major, &cfg), Some(RegimeLabel::Trend));
    }

    #[test]
    fn bucket_thresholds_differ() {
        let cfg = RegimeConfig::default();
        // ADX 23 is trend for major (max 20) but range for micro (max 25).
        let snap = snapshot(23.0, 30.0, 0.01);
        assert_eq!(classify(&snap, Bucket::Major, &cfg), Some(RegimeLabel::Trend));
        assert_eq!(classify(&snap, Bucket::Micro, &cfg), Some(RegimeLabel::Range));
    }

    #[test]
    fn missing_indicator_returns_none() {
        let cfg = RegimeConfig::default();
        let mut snap = snapshot(15.0, 30.0, 0.01);
        snap.adx_14 = None;
        assert!(classify(&snap, Bucket::Major, &cfg).is_none());
    }
}
