// =============================================================================
// Symbol metadata — venue-declared trading rules per contract
// =============================================================================
//
// Loaded on startup from `symbol_meta` and refreshed hourly. Downstream code
// never touches the venue's untyped JSON shape directly; everything is
// parsed once into this typed record, per the "dynamic dict-shaped venue
// responses" design note.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::EngineError;
use crate::types::Bucket;

/// Venue-declared trading rules for one contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SymbolMeta {
    pub symbol_id: String,
    pub bucket: Bucket,
    pub sector: String,
    pub price_tick: f64,
    pub size_lot: f64,
    pub price_decimals: u32,
    pub size_decimals: u32,
    pub max_leverage: u32,
    pub maintenance_margin_rate: f64,
}

impl SymbolMeta {
    /// Round `price` to `price_decimals` and snap it to the `price_tick`
    /// grid, in the given rounding direction (per spec §4.5: "round down if
    /// required; never cross current price").
    pub fn snap_price(&self, price: f64, round_down: bool) -> f64 {
        if self.price_tick <= 0.0 {
            return price;
        }
        let ticks = price / self.price_tick;
        let snapped_ticks = if round_down { ticks.floor() } else { ticks.ceil() };
        let snapped = snapped_ticks * self.price_tick;
        let factor = 10f64.powi(self.price_decimals as i32);
        (snapped * factor).round() / factor
    }

    /// Floor `contracts` down to the nearest `size_lot`.
    pub fn floor_to_lot(&self, contracts: f64) -> f64 {
        if self.size_lot <= 0.0 {
            return contracts;
        }
        (contracts / self.size_lot).floor() * self.size_lot
    }
}

/// Cached symbol metadata with hourly refresh, matching the universe gate's
/// "re-evaluated once per hour for each symbol" cadence for the metadata that
/// backs both the gate and the risk engine's leverage lookups.
pub struct SymbolMetaCache {
    entries: RwLock<HashMap<String, (SymbolMeta, Instant)>>,
    refresh_interval: Duration,
}

impl SymbolMetaCache {
    pub fn new(refresh_interval: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            refresh_interval,
        }
    }

    /// Return cached metadata if fresh; `None` signals the caller must fetch.
    pub fn get_fresh(&self, symbol: &str) -> Option<SymbolMeta> {
        let entries = self.entries.read();
        entries.get(symbol).and_then(|(meta, fetched_at)| {
            if fetched_at.elapsed() < self.refresh_interval {
                Some(meta.clone())
            } else {
                None
            }
        })
    }

    /// Return the last known metadata regardless of staleness, for the
    /// leverage engine's "cached; refresh at startup and on first use"
    /// fallback when a fresh fetch is unavailable.
    pub fn get_stale(&self, symbol: &str) -> Option<SymbolMeta> {
        self.entries.read().get(symbol).map(|(meta, _)| meta.clone())
    }

    pub fn insert(&self, meta: SymbolMeta) {
        self.entries
            .write()
            .insert(meta.symbol_id.clone(), (meta, Instant::now()));
    }

    /// Validate metadata is usable for sizing/gating. A `fatal_config` per
    /// spec §7: the engine must refuse to start (or refuse to trade this
    /// symbol) on invalid thresholds or missing metadata.
    pub fn validate(meta: &SymbolMeta) -> Result<(), EngineError> {
        if meta.price_tick <= 0.0 || meta.size_lot <= 0.0 {
            return Err(EngineError::FatalConfig(format!(
                "symbol {} has non-positive price_tick/size_lot",
                meta.symbol_id
            )));
        }
        if meta.max_leverage == 0 {
            return Err(EngineError::FatalConfig(format!(
                "symbol {} has max_leverage of zero",
                meta.symbol_id
            )));
        }
        if !(0.0..1.0).contains(&meta.maintenance_margin_rate) {
            return Err(EngineError::FatalConfig(format!(
                "symbol {} has invalid maintenance_margin_rate {}",
                meta.symbol_id, meta.maintenance_margin_rate
            )));
        }
        Ok(())
    }

    /// Insert after validating; logs and refuses on failure instead of
    /// silently poisoning the cache.
    pub fn insert_validated(&self, meta: SymbolMeta) -> Result<(), EngineError> {
        Self::validate(&meta)?;
        info!(symbol = %meta.symbol_id, bucket = %meta.bucket, max_leverage = meta.max_leverage, "symbol metadata cached");
        self.insert(meta);
        Ok(())
    }

    /// Mark an entry stale by removing it so the next lookup forces a
    /// refetch; used when a venue_validation error implies our cached
    /// metadata (ticks/lots) has drifted.
    pub fn invalidate(&self, symbol: &str) {
        if self.entries.write().remove(symbol).is_some() {
            warn!(symbol, "symbol metadata invalidated, will refetch on next use");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta() -> SymbolMeta {
        SymbolMeta {
            symbol_id: "BTCUSDT".into(),
            bucket: Bucket::Major,
            sector: "layer1".into(),
            price_tick: 0.1,
            size_lot: 0.001,
            price_decimals: 1,
            size_decimals: 3,
            max_leverage: 25,
            maintenance_margin_rate: 0.005,
        }
    }

    #[test]
    fn snap_price_rounds_to_tick_grid() {
        let m = meta();
        assert!((m.snap_price(100.04, true) - 100.0).abs() < 1e-9);
        assert!((m.snap_price(100.06, false) - 100.1).abs() < 1e-9);
    }

    #[test]
    fn floor_to_lot_never_rounds_up() {
        let m = meta();
        assert!((m.floor_to_lot(1.0009) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn validate_rejects_zero_tick() {
        let mut m = meta();
        m.price_tick = 0.0;
        assert!(SymbolMetaCache::validate(&m).is_err());
    }

    #[test]
    fn validate_rejects_zero_leverage() {
        let mut m = meta();
        m.max_leverage = 0;
        assert!(SymbolMetaCache::validate(&m).is_err());
    }

    #[test]
    fn cache_get_fresh_respects_refresh_interval() {
        let cache = SymbolMetaCache::new(Duration::from_secs(3600));
        cache.insert(meta());
        assert!(cache.get_fresh("BTCUSDT").is_some());
        assert!(cache.get_fresh("ETHUSDT").is_none());
    }
}
