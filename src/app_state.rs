// =============================================================================
// Shared application state — wiring point for every long-running task
// =============================================================================
//
// One `Arc<AppState>` is cloned into the scan loop, monitor loop, and the
// HTTP surface. Everything here is either already internally synchronized
// (`PositionManager`, `SymbolMetaCache`, `CandleBuffer`) or wrapped in its own
// lock at the field it needs (`RwLock<RuntimeConfig>` — the only thing that
// changes at runtime without a restart).

use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;

use crate::binance::client::BinanceClient;
use crate::market_data::CandleBuffer;
use crate::order_router::OrderRouter;
use crate::position_engine::PositionManager;
use crate::runtime_config::RuntimeConfig;
use crate::symbol::SymbolMetaCache;

/// Number of closed candles kept per (symbol, interval) series.
const CANDLE_RING_CAPACITY: usize = 500;

pub struct AppState {
    pub config: RwLock<RuntimeConfig>,
    pub config_path: String,
    pub client: Arc<BinanceClient>,
    pub order_router: Arc<OrderRouter>,
    pub position_manager: Arc<PositionManager>,
    pub symbol_meta: Arc<SymbolMetaCache>,
    pub candles: Arc<CandleBuffer>,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(config: RuntimeConfig, config_path: String, client: Arc<BinanceClient>) -> Self {
        let order_router = Arc::new(OrderRouter::new(client.clone()));
        let symbol_meta_refresh = std::time::Duration::from_secs(config.symbol_meta_refresh_seconds);

        Self {
            config: RwLock::new(config),
            config_path,
            client,
            order_router,
            position_manager: Arc::new(PositionManager::new()),
            symbol_meta: Arc::new(SymbolMetaCache::new(symbol_meta_refresh)),
            candles: Arc::new(CandleBuffer::new(CANDLE_RING_CAPACITY)),
            start_time: Instant::now(),
        }
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}
