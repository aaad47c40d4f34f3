// =============================================================================
// Concurrency coordinator — scan scheduler, monitor scheduler, recovery
// =============================================================================
//
// Owns the two tick-driven loops described in the component design: a scan
// loop that turns market data into new positions, and a monitor loop that
// services every open position's lifecycle (fill reconciliation, TP/SL
// placement, bot-side exits, the nested verification sub-loop). Work for a
// given symbol is serialized end-to-end across both loops by a per-symbol
// async mutex, so "fill -> place TP/SL -> verify" forms one critical section
// even though different symbols run concurrently.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use crate::app_state::AppState;
use crate::indicators::snapshot::{IndicatorSnapshot, SnapshotParams};
use crate::market_data::CandleKey;
use crate::order_router::ConditionalOrderDescriptor;
use crate::position_engine::{now_ms, Position, ProcessState};
use crate::regime::detector;
use crate::risk;
use crate::strategy::{self, lsvr};
use crate::symbol::SymbolMeta;
use crate::types::{Bucket, CloseReason, ConditionalKind, RefType, Side, StrategyKind, TradingMode};
use crate::universe::{self, QuoteSnapshot};

/// Worker-pool width within one scan/monitor tick (spec §5: "bounded worker
/// pool, default 10-20").
const TICK_CONCURRENCY: usize = 12;

/// Funding prints on Binance USD-M futures fall on fixed 8-hour UTC
/// boundaries. No dedicated funding-time endpoint is in the exchange client
/// surface (spec §6 doesn't list one), so the blackout window is computed
/// from the grid directly rather than polled.
const FUNDING_INTERVAL_MS: i64 = 8 * 60 * 60 * 1000;

fn ms_to_next_funding(now: i64) -> i64 {
    let into_cycle = now.rem_euclid(FUNDING_INTERVAL_MS);
    FUNDING_INTERVAL_MS - into_cycle
}

/// True if `now` sits within `blackout_seconds` of the next (or, symmetrically,
/// the just-passed) funding print.
fn in_funding_blackout(now: i64, blackout_seconds: i64) -> bool {
    let blackout_ms = blackout_seconds * 1000;
    let until_next = ms_to_next_funding(now);
    until_next <= blackout_ms || (FUNDING_INTERVAL_MS - until_next) <= blackout_ms
}

/// Registry of per-symbol async mutexes so a symbol's scan-path entry and
/// monitor-path servicing never interleave.
#[derive(Default)]
struct SymbolLocks {
    locks: RwLock<HashMap<String, Arc<Mutex<()>>>>,
}

impl SymbolLocks {
    fn get(&self, symbol: &str) -> Arc<Mutex<()>> {
        if let Some(lock) = self.locks.read().get(symbol) {
            return lock.clone();
        }
        let mut write = self.locks.write();
        write.entry(symbol.to_string()).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
    }
}

/// Best-effort sector/bucket classification for symbols the venue doesn't
/// tag directly. Binance's `exchangeInfo` carries tick/lot/precision but
/// neither a liquidity bucket nor a sector label, so both are assigned from a
/// small static table; unknown symbols fall back to the most conservative
/// bucket and an "other" sector.
fn classify_symbol(symbol: &str) -> (Bucket, &'static str) {
    match symbol {
        "BTCUSDT" | "ETHUSDT" => (Bucket::Major, "layer1"),
        "BNBUSDT" | "SOLUSDT" | "ADAUSDT" | "AVAXUSDT" | "DOTUSDT" => (Bucket::Mid, "layer1"),
        "XRPUSDT" | "LTCUSDT" | "LINKUSDT" => (Bucket::Mid, "infra"),
        "UNIUSDT" | "AAVEUSDT" => (Bucket::Mid, "defi"),
        "DOGEUSDT" | "SHIBUSDT" | "PEPEUSDT" => (Bucket::Micro, "meme"),
        _ => (Bucket::Micro, "other"),
    }
}

fn maintenance_margin_rate_for(bucket: Bucket) -> f64 {
    match bucket {
        Bucket::Major => 0.004,
        Bucket::Mid => 0.006,
        Bucket::Micro => 0.010,
    }
}

/// Parse tick size / lot size / decimals out of the raw `exchangeInfo` filter
/// array, falling back to conservative defaults if a filter is missing.
fn parse_filters(info: &serde_json::Value) -> (f64, f64, u32, u32) {
    let filters = info["filters"].as_array().cloned().unwrap_or_default();
    let mut price_tick = 0.01;
    let mut size_lot = 0.001;

    for f in &filters {
        match f["filterType"].as_str() {
            Some("PRICE_FILTER") => {
                if let Some(s) = f["tickSize"].as_str() {
                    price_tick = s.parse().unwrap_or(price_tick);
                }
            }
            Some("LOT_SIZE") => {
                if let Some(s) = f["stepSize"].as_str() {
                    size_lot = s.parse().unwrap_or(size_lot);
                }
            }
            _ => {}
        }
    }

    let price_decimals = info["pricePrecision"].as_u64().unwrap_or(2) as u32;
    let size_decimals = info["quantityPrecision"].as_u64().unwrap_or(3) as u32;
    (price_tick, size_lot, price_decimals, size_decimals)
}

pub struct Coordinator {
    state: Arc<AppState>,
    symbol_locks: SymbolLocks,
    monitor_shutdown: Arc<AtomicBool>,
    cold_start_done: AtomicBool,
    last_reconcile_cycle: AtomicI64,
}

impl Coordinator {
    pub fn new(state: Arc<AppState>) -> Self {
        Self {
            state,
            symbol_locks: SymbolLocks::default(),
            monitor_shutdown: Arc::new(AtomicBool::new(false)),
            cold_start_done: AtomicBool::new(false),
            last_reconcile_cycle: AtomicI64::new(0),
        }
    }

    /// Signal the monitor loop to stop after finishing its in-flight
    /// iteration. The scan loop is expected to be cancelled by aborting its
    /// `JoinHandle` directly — it has no in-flight exits to protect.
    pub fn request_shutdown(&self) {
        self.monitor_shutdown.store(true, Ordering::SeqCst);
    }

    // -------------------------------------------------------------------------
    // Symbol metadata
    // -------------------------------------------------------------------------

    #[instrument(skip(self))]
    async fn load_symbol_meta(&self, symbol: &str) -> anyhow::Result<SymbolMeta> {
        let info = self.state.client.get_symbol_info(symbol).await?;
        let (price_tick, size_lot, price_decimals, size_decimals) = parse_filters(&info);
        let (bucket, sector) = classify_symbol(symbol);
        let global_leverage = self.state.config.read().risk.global_leverage;

        Ok(SymbolMeta {
            symbol_id: symbol.to_string(),
            bucket,
            sector: sector.to_string(),
            price_tick,
            size_lot,
            price_decimals,
            size_decimals,
            max_leverage: global_leverage,
            maintenance_margin_rate: maintenance_margin_rate_for(bucket),
        })
    }

    async fn symbol_meta(&self, symbol: &str) -> Option<SymbolMeta> {
        if let Some(meta) = self.state.symbol_meta.get_fresh(symbol) {
            return Some(meta);
        }
        match self.load_symbol_meta(symbol).await {
            Ok(meta) => match self.state.symbol_meta.insert_validated(meta.clone()) {
                Ok(()) => Some(meta),
                Err(e) => {
                    error!(symbol, error = %e, "symbol metadata failed validation");
                    None
                }
            },
            Err(e) => {
                warn!(symbol, error = %e, "failed to load symbol metadata, falling back to stale cache");
                self.state.symbol_meta.get_stale(symbol)
            }
        }
    }

    // -------------------------------------------------------------------------
    // Startup recovery (spec §4.7 "Recovery at startup")
    // -------------------------------------------------------------------------

    /// Enumerate exchange-resident positions for every configured symbol and
    /// synthesize best-effort `Position` records. Never submits an entry.
    #[instrument(skip(self))]
    pub async fn recover(&self) {
        let symbols = self.state.config.read().symbols.clone();
        for symbol in symbols {
            match self.state.client.fetch_position(&symbol).await {
                Ok((entry_price, amt)) if amt != 0.0 => {
                    let side = if amt > 0.0 { Side::Long } else { Side::Short };
                    self.recover_one(&symbol, entry_price, amt.abs(), side).await;
                }
                Ok(_) => {}
                Err(e) => warn!(symbol = %symbol, error = %e, "recovery: failed to fetch position snapshot"),
            }
        }
    }

    async fn recover_one(&self, symbol: &str, entry_price: f64, size: f64, side: Side) {
        let meta = self.symbol_meta(symbol).await;
        let (bucket, sector) = meta
            .as_ref()
            .map(|m| (m.bucket, m.sector.clone()))
            .unwrap_or_else(|| {
                let (b, s) = classify_symbol(symbol);
                (b, s.to_string())
            });
        let leverage = meta.as_ref().map(|m| m.max_leverage).unwrap_or(self.state.config.read().risk.global_leverage);

        let mut position = Position {
            id: uuid::Uuid::new_v4().to_string(),
            symbol: symbol.to_string(),
            sector,
            side,
            strategy_kind: StrategyKind::Lsvr,
            opened_at_ms: now_ms(),
            requested_contracts: size,
            actual_filled_contracts: size,
            remaining_contracts: size,
            entry_price,
            leverage,
            stop_price: entry_price,
            liq_price: risk::liquidation_price(entry_price, side, leverage, maintenance_margin_rate_for(bucket)),
            tp_ladder: Vec::new(),
            profit_floor_price: 0.0,
            trailing_activation_price: 0.0,
            peak_favorable_price: entry_price,
            tp_hit_count: 0,
            trailing_active: false,
            sl_order_id: None,
            tp_floor_order_id: None,
            trailing_order_id: None,
            time_stop_seconds: 3600,
            state: ProcessState::Unprotected,
            tp_sl_attempts: 0,
            closed_at_ms: None,
            close_reason: None,
            realized_pnl: 0.0,
        };

        match self.state.order_router.verify_conditional(symbol, ConditionalKind::StopLoss).await {
            Ok(Some((order_id, trigger))) => {
                position.state = ProcessState::Protected;
                position.sl_order_id = Some(order_id);
                position.stop_price = trigger;
                info!(symbol, "recovered position with an attached stop-loss, phase=Protected");
            }
            _ => {
                warn!(symbol, "recovered position has no attached stop-loss, phase=Unprotected");
            }
        }

        if let Ok(Some((order_id, trigger))) =
            self.state.order_router.verify_conditional(symbol, ConditionalKind::ProfitFloor).await
        {
            position.tp_floor_order_id = Some(order_id);
            position.profit_floor_price = trigger;
        }
        if let Ok(Some((order_id, trigger))) =
            self.state.order_router.verify_conditional(symbol, ConditionalKind::TrailingTakeProfit).await
        {
            position.trailing_order_id = Some(order_id);
            position.trailing_activation_price = trigger;
        }

        let id = self.state.position_manager.insert(position);
        if self.state.position_manager.get(&id).map(|p| p.state) == Some(ProcessState::Unprotected) {
            error!(symbol, position_id = %id, "unprotected fill recovered at startup, closing at market");
            if let Err(e) = self.state.order_router.close_market(symbol, side.opposite(), size).await {
                error!(symbol, position_id = %id, error = %e, "failed to close recovered unprotected position");
            } else {
                self.state.position_manager.close(&id, CloseReason::External, 0.0);
            }
        }
    }

    // -------------------------------------------------------------------------
    // Scan loop
    // -------------------------------------------------------------------------

    #[instrument(skip(self))]
    async fn scan_symbol(&self, symbol: &str, lookback: u32, primary_tf: &str, session_tf: &str, entries_allowed: bool) {
        if self.state.position_manager.has_open_for_symbol(symbol) {
            return;
        }

        let lock = self.symbol_locks.get(symbol);
        let _guard = lock.lock().await;

        // Re-check after acquiring the lock: another tick may have filled
        // this symbol while we waited.
        if self.state.position_manager.has_open_for_symbol(symbol) {
            return;
        }

        let Some(meta) = self.symbol_meta(symbol).await else { return };

        let quote = match self.fetch_quote(symbol).await {
            Ok(q) => q,
            Err(e) => {
                debug!(symbol, error = %e, "scan: failed to fetch quote snapshot");
                return;
            }
        };

        let (universe_cfg, regime_cfg, strategy_cfg, risk_cfg, concurrency_cfg) = {
            let cfg = self.state.config.read();
            (cfg.universe.clone(), cfg.regime.clone(), cfg.strategy.clone(), cfg.risk.clone(), cfg.concurrency.clone())
        };

        if let Err(reason) = universe::enter_allowed(&universe_cfg, meta.bucket, &quote) {
            debug!(symbol, %reason, "scan: rejected by universe gate");
            return;
        }

        if !entries_allowed {
            return;
        }

        if in_funding_blackout(now_ms(), concurrency_cfg.funding_blackout_seconds) {
            debug!(symbol, "scan: suppressed by funding blackout");
            return;
        }

        if self.state.position_manager.open_count() >= concurrency_cfg.max_symbols_concurrent {
            debug!(symbol, "scan: global concurrency cap reached");
            return;
        }
        if self.state.position_manager.open_count_in_sector(&meta.sector) >= concurrency_cfg.max_per_sector {
            debug!(symbol, sector = %meta.sector, "scan: sector concurrency cap reached");
            return;
        }

        let primary_key = CandleKey { symbol: symbol.to_string(), interval: primary_tf.to_string() };
        let session_key = CandleKey { symbol: symbol.to_string(), interval: session_tf.to_string() };

        if let Err(e) = self.refresh_candles(symbol, primary_tf, lookback, &primary_key).await {
            debug!(symbol, error = %e, "scan: candle refresh failed");
            return;
        }
        if primary_tf != session_tf {
            if let Err(e) = self.refresh_candles(symbol, session_tf, lookback, &session_key).await {
                debug!(symbol, error = %e, "scan: session candle refresh failed");
                return;
            }
        }

        let primary_candles = self.state.candles.get_closed(&primary_key, lookback as usize);
        let session_candles = if primary_tf == session_tf {
            primary_candles.clone()
        } else {
            self.state.candles.get_closed(&session_key, lookback as usize)
        };

        let Some(snapshot) = IndicatorSnapshot::compute(symbol, &primary_candles, &session_candles, &SnapshotParams::default()) else {
            return;
        };

        let Some(regime) = detector::classify(&snapshot, meta.bucket, &regime_cfg) else { return };

        let Some(signal) = strategy::evaluate_symbol(&snapshot, &meta, regime, &strategy_cfg) else { return };
        if !signal.ladder_is_valid() {
            warn!(symbol, "scan: evaluator produced an invalid TP ladder, discarding signal");
            return;
        }

        let equity = match self.state.client.get_balance("USDT").await {
            Ok(v) => v,
            Err(e) => {
                warn!(symbol, error = %e, "scan: failed to fetch equity, skipping entry");
                return;
            }
        };

        let leverage = risk::effective_leverage(Some(&meta), risk_cfg.global_leverage);
        let sizing = risk::size_trade(&signal, equity, leverage, &meta, &risk_cfg);
        if !sizing.passes_guards {
            info!(symbol, reason = ?sizing.reason_if_failed, "scan: signal rejected by liquidation guards");
            return;
        }

        self.open_position(symbol, &meta, sizing).await;
    }

    async fn fetch_quote(&self, symbol: &str) -> anyhow::Result<QuoteSnapshot> {
        let (bid, ask, bid_qty, ask_qty) = self.state.client.get_book_ticker(symbol).await?;
        let volume_24h_usd = self.state.client.get_24h_quote_volume(symbol).await?;
        let mid = (bid + ask) / 2.0;
        let spread_bps = if mid > 0.0 { (ask - bid) / mid * 10_000.0 } else { f64::INFINITY };
        let top_of_book_depth_usd = (bid_qty * bid).min(ask_qty * ask);
        Ok(QuoteSnapshot { spread_bps, top_of_book_depth_usd, volume_24h_usd })
    }

    async fn refresh_candles(&self, symbol: &str, interval: &str, lookback: u32, key: &CandleKey) -> anyhow::Result<()> {
        let candles = self.state.client.get_klines(symbol, interval, lookback).await?;
        self.state.candles.replace_all(key.clone(), candles);
        Ok(())
    }

    #[instrument(skip(self, sizing))]
    async fn open_position(&self, symbol: &str, meta: &SymbolMeta, sizing: risk::SizingDecision) {
        let side = sizing.signal.side;
        match self.state.order_router.submit_market_entry(symbol, side, sizing.contracts).await {
            Ok(order_id) => {
                let position = Position::new(&sizing, &meta.sector, now_ms());
                let id = self.state.position_manager.insert(position);
                debug!(symbol, position_id = %id, order_id, "entry submitted, moving to reconciliation");
                self.reconcile_fill(&id, symbol).await;
            }
            Err(e) => {
                error!(symbol, error = %e, "entry submission failed");
            }
        }
    }

    // -------------------------------------------------------------------------
    // Reconciling phase (spec §4.7)
    // -------------------------------------------------------------------------

    async fn reconcile_fill(&self, position_id: &str, symbol: &str) {
        self.state.position_manager.transition(position_id, ProcessState::Reconciling);

        const POLL_ATTEMPTS: u32 = 5;
        const POLL_INTERVAL: Duration = Duration::from_secs(2);

        let mut filled = None;
        for attempt in 0..POLL_ATTEMPTS {
            match self.state.order_router.read_actual_filled(symbol).await {
                Ok((entry_price, contracts)) if contracts.abs() > 0.0 => {
                    filled = Some((entry_price, contracts.abs()));
                    break;
                }
                Ok(_) => {
                    debug!(symbol, attempt, "reconciling: fill not visible yet");
                }
                Err(e) => {
                    debug!(symbol, attempt, error = %e, "reconciling: positions poll failed");
                }
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }

        let Some((entry_price, contracts)) = filled else {
            error!(symbol, position_id, "reconciling: fill never observed within grace window");
            self.state.position_manager.fail(position_id, "fill not observed within reconcile grace window");
            return;
        };

        self.state.position_manager.with_mut(position_id, |p| p.mark_filled(entry_price, contracts));

        self.place_protective_orders(position_id, symbol).await;
    }

    #[instrument(skip(self))]
    async fn place_protective_orders(&self, position_id: &str, symbol: &str) {
        let Some(position) = self.state.position_manager.get(position_id) else { return };
        let (risk_cfg, tp_sl_max_attempts, tp_sl_backoff_base) = {
            let cfg = self.state.config.read();
            (cfg.risk.clone(), cfg.concurrency.tp_sl_max_attempts, cfg.concurrency.tp_sl_backoff_base_seconds)
        };

        let close_side = position.side.opposite();

        let sl_descriptor = ConditionalOrderDescriptor {
            kind: ConditionalKind::StopLoss,
            close_side,
            trigger_price: position.stop_price,
            size: position.actual_filled_contracts,
            ref_type: RefType::Mark,
            callback_ratio: None,
        };

        let profit_floor_trigger =
            risk::profit_floor_trigger(position.entry_price, position.side, position.leverage, risk_cfg.min_profit_roe);

        let floor_descriptor = ConditionalOrderDescriptor {
            kind: ConditionalKind::ProfitFloor,
            close_side,
            trigger_price: profit_floor_trigger,
            size: position.actual_filled_contracts,
            ref_type: RefType::Mark,
            callback_ratio: None,
        };

        let trailing_descriptor = ConditionalOrderDescriptor {
            kind: ConditionalKind::TrailingTakeProfit,
            close_side,
            trigger_price: profit_floor_trigger,
            size: position.actual_filled_contracts,
            ref_type: RefType::Mark,
            callback_ratio: Some(risk_cfg.trailing_callback_ratio),
        };

        let sl_result = self
            .place_with_retry(symbol, &sl_descriptor, tp_sl_max_attempts, tp_sl_backoff_base)
            .await;
        let floor_result = self
            .place_with_retry(symbol, &floor_descriptor, tp_sl_max_attempts, tp_sl_backoff_base)
            .await;
        let trailing_result = self
            .place_with_retry(symbol, &trailing_descriptor, tp_sl_max_attempts, tp_sl_backoff_base)
            .await;

        match (sl_result, floor_result, trailing_result) {
            (Some(sl_id), Some(floor_id), Some(trailing_id)) => {
                self.state.position_manager.with_mut(position_id, |p| {
                    p.sl_order_id = Some(sl_id);
                    p.tp_floor_order_id = Some(floor_id);
                    p.trailing_order_id = Some(trailing_id);
                    p.profit_floor_price = profit_floor_trigger;
                    p.trailing_activation_price = profit_floor_trigger;
                });
                self.state.position_manager.transition(position_id, ProcessState::Protected);
            }
            _ => {
                error!(symbol, position_id, "unprotected fill: TP/SL placement exhausted retries, attempting immediate close");
                self.state.position_manager.transition(position_id, ProcessState::Unprotected);
                self.force_close_unprotected(position_id, symbol).await;
            }
        }
    }

    /// Submit one conditional order with a nudge-on-side-violation retry, up
    /// to `max_attempts` with exponential backoff from `backoff_base`.
    async fn place_with_retry(
        &self,
        symbol: &str,
        descriptor: &ConditionalOrderDescriptor,
        max_attempts: u32,
        backoff_base_seconds: u64,
    ) -> Option<String> {
        let mut descriptor = descriptor.clone();
        for attempt in 0..max_attempts {
            match self.state.order_router.place_conditional(symbol, &descriptor).await {
                Ok(id) => return Some(id),
                Err(crate::error::EngineError::VenueValidation(msg)) => {
                    warn!(symbol, attempt, %msg, "conditional order rejected on trigger-side rule, nudging one tick");
                    if let Some(meta) = self.state.symbol_meta.get_stale(symbol) {
                        let round_down = matches!(descriptor.close_side, Side::Short);
                        let nudge = if round_down { -meta.price_tick } else { meta.price_tick };
                        descriptor.trigger_price = meta.snap_price(descriptor.trigger_price + nudge, round_down);
                    }
                }
                Err(e) => {
                    warn!(symbol, attempt, error = %e, "conditional order placement failed");
                }
            }
            tokio::time::sleep(Duration::from_secs(backoff_base_seconds * 2u64.pow(attempt))).await;
        }
        None
    }

    async fn force_close_unprotected(&self, position_id: &str, symbol: &str) {
        let Some(position) = self.state.position_manager.get(position_id) else { return };
        match self
            .state
            .order_router
            .close_market(symbol, position.side.opposite(), position.remaining_contracts)
            .await
        {
            Ok(_) => {
                self.cleanup_closing(position_id, symbol, CloseReason::External).await;
            }
            Err(e) => {
                error!(symbol, position_id, error = %e, "unprotected close attempt failed, will retry every monitor tick");
            }
        }
    }

    // -------------------------------------------------------------------------
    // Monitor loop (Protected-phase servicing, spec §4.7)
    // -------------------------------------------------------------------------

    #[instrument(skip(self))]
    pub async fn monitor_once(&self) {
        let positions = self.state.position_manager.get_open_positions();
        let semaphore = Arc::new(Semaphore::new(TICK_CONCURRENCY));
        let mut handles = Vec::with_capacity(positions.len());

        for position in positions {
            let sem = semaphore.clone();
            let this: &Coordinator = self;
            let fut = async move {
                let _permit = sem.acquire_owned().await.expect("semaphore not closed");
                this.monitor_position(&position).await;
            };
            handles.push(fut);
        }

        futures_lite_join_all(handles).await;
    }

    async fn monitor_position(&self, snapshot_position: &Position) {
        let symbol = snapshot_position.symbol.clone();
        let lock = self.symbol_locks.get(&symbol);
        let _guard = lock.lock().await;

        let Some(position) = self.state.position_manager.get(&snapshot_position.id) else { return };
        if !position.is_open() {
            return;
        }

        match position.state {
            ProcessState::Unprotected => {
                self.force_close_unprotected(&position.id, &symbol).await;
            }
            ProcessState::Protected => {
                self.service_protected(&position).await;
            }
            _ => {}
        }
    }

    async fn service_protected(&self, position: &Position) {
        let symbol = &position.symbol;
        let current_price = match self.state.client.get_book_ticker(symbol).await {
            Ok((bid, ask, _, _)) => (bid + ask) / 2.0,
            Err(e) => {
                debug!(symbol, error = %e, "monitor: failed to fetch current price");
                return;
            }
        };

        self.state.position_manager.with_mut(&position.id, |p| p.update_peak_favorable(current_price));

        let stop_hit = match position.side {
            Side::Long => current_price <= position.stop_price,
            Side::Short => current_price >= position.stop_price,
        };
        if stop_hit {
            info!(symbol, position_id = %position.id, current_price, stop_price = position.stop_price, "bot-side stop triggered");
            self.close_position(position, CloseReason::StopLoss).await;
            return;
        }

        let elapsed = position.elapsed_seconds(now_ms());
        if elapsed as u64 > position.time_stop_seconds && position.remaining_contracts > 0.0 {
            error!(symbol, position_id = %position.id, elapsed, "time-stop firing — last-resort safety net, investigate upstream");
            self.close_position(position, CloseReason::TimeStop).await;
            return;
        }

        if position.tp_hit_count == 0 {
            if let Some(rung0) = position.tp_ladder.first() {
                let crossed = match position.side {
                    Side::Long => current_price >= rung0.trigger_price,
                    Side::Short => current_price <= rung0.trigger_price,
                };
                if crossed {
                    self.handle_tp1(position, rung0.size_fraction).await;
                    return;
                }
            }
        }

        if self.tripwire_triggered(position, current_price).await {
            info!(symbol, position_id = %position.id, strategy = %position.strategy_kind, "tripwire triggered");
            self.close_position(position, CloseReason::Tripwire).await;
            return;
        }

        self.verify_conditionals(position).await;
    }

    async fn handle_tp1(&self, position: &Position, fraction: f64) {
        let symbol = &position.symbol;
        let close_qty = self.state.position_manager.with_mut(&position.id, |p| p.reduce_remaining(fraction)).unwrap_or(0.0);
        if close_qty <= 0.0 {
            return;
        }

        match self.state.order_router.close_market(symbol, position.side.opposite(), close_qty).await {
            Ok(_) => {
                self.state.position_manager.with_mut(&position.id, |p| p.tp_hit_count = 1);
                self.state.position_manager.record_tp_hit(&position.id, 1);
                info!(symbol, position_id = %position.id, close_qty, "TP1 filled at market");
            }
            Err(e) => {
                error!(symbol, position_id = %position.id, error = %e, "TP1 market close failed");
                return;
            }
        }

        // LSVR and Trend-Fallback trail the remainder after TP1; VWAP-MR does
        // not (per the strategy's Open Question resolution — see DESIGN.md).
        if matches!(position.strategy_kind, StrategyKind::Lsvr | StrategyKind::TrendFallback) {
            self.rearm_trailing(position, current_favorable_price(position)).await;
        }
    }

    async fn rearm_trailing(&self, position: &Position, activation_price: f64) {
        let symbol = &position.symbol;
        let remaining = self.state.position_manager.get(&position.id).map(|p| p.remaining_contracts).unwrap_or(0.0);
        if remaining <= 0.0 {
            return;
        }

        if let Some(old_id) = &position.trailing_order_id {
            if let Err(e) = self.state.order_router.cancel_conditional(symbol, old_id).await {
                warn!(symbol, position_id = %position.id, error = %e, "failed to cancel prior trailing-TP before re-placing");
            }
        }

        let (risk_cfg, tp_sl_max_attempts, tp_sl_backoff_base) = {
            let cfg = self.state.config.read();
            (cfg.risk.clone(), cfg.concurrency.tp_sl_max_attempts, cfg.concurrency.tp_sl_backoff_base_seconds)
        };

        let descriptor = ConditionalOrderDescriptor {
            kind: ConditionalKind::TrailingTakeProfit,
            close_side: position.side.opposite(),
            trigger_price: activation_price,
            size: remaining,
            ref_type: RefType::Mark,
            callback_ratio: Some(risk_cfg.trailing_callback_ratio),
        };

        if let Some(new_id) = self.place_with_retry(symbol, &descriptor, tp_sl_max_attempts, tp_sl_backoff_base).await {
            self.state.position_manager.with_mut(&position.id, |p| {
                p.trailing_order_id = Some(new_id);
                p.trailing_active = true;
                p.trailing_activation_price = activation_price;
            });
        } else {
            error!(symbol, position_id = %position.id, "failed to rearm trailing take-profit after TP1");
        }
    }

    async fn tripwire_triggered(&self, position: &Position, current_price: f64) -> bool {
        match position.strategy_kind {
            StrategyKind::Lsvr => self.lsvr_resweep_tripwire(position).await,
            StrategyKind::VwapMr => {
                let adverse_move = match position.side {
                    Side::Long => position.entry_price - current_price,
                    Side::Short => current_price - position.entry_price,
                };
                if adverse_move <= 0.0 {
                    return false;
                }
                match self.latest_atr(position).await {
                    Some(atr) if atr > 0.0 => adverse_move >= atr * 1.7,
                    _ => false,
                }
            }
            StrategyKind::TrendFallback => false,
        }
    }

    async fn latest_atr(&self, position: &Position) -> Option<f64> {
        let primary_tf = self.state.config.read().primary_timeframe.clone();
        let key = CandleKey { symbol: position.symbol.clone(), interval: primary_tf };
        let candles = self.state.candles.get_closed(&key, 20);
        crate::indicators::atr::calculate_atr(&candles, 14)
    }

    async fn lsvr_resweep_tripwire(&self, position: &Position) -> bool {
        let Some(meta) = self.state.symbol_meta.get_stale(&position.symbol) else { return false };
        let (primary_tf, session_tf, lookback, lsvr_cfg) = {
            let cfg = self.state.config.read();
            (cfg.primary_timeframe.clone(), cfg.session_timeframe.clone(), cfg.candle_lookback, cfg.strategy.lsvr)
        };
        let primary_key = CandleKey { symbol: position.symbol.clone(), interval: primary_tf };
        let session_key = CandleKey { symbol: position.symbol.clone(), interval: session_tf };
        let primary = self.state.candles.get_closed(&primary_key, lookback as usize);
        let session = self.state.candles.get_closed(&session_key, lookback as usize);
        let Some(snapshot) = IndicatorSnapshot::compute(&position.symbol, &primary, &session, &SnapshotParams::default()) else {
            return false;
        };
        match lsvr::evaluate(&snapshot, &meta, crate::types::RegimeLabel::Range, &lsvr_cfg) {
            Some(signal) => signal.side == position.side.opposite(),
            None => false,
        }
    }

    /// Throttled re-verification of every exchange-resident conditional order
    /// (spec §4.7/§7 StaleState policy, P4): detects both a missing order id
    /// and trigger-price drift beyond one tick, and actually cancel-then-
    /// replaces the offending order rather than only logging the mismatch.
    async fn verify_conditionals(&self, position: &Position) {
        let verify_interval = self.state.config.read().concurrency.sl_verify_seconds as i64;
        if now_ms() - self.last_reconcile_cycle.load(Ordering::Relaxed) < verify_interval * 1000 {
            return;
        }

        let Some(meta) = self.state.symbol_meta.get_stale(&position.symbol) else {
            self.last_reconcile_cycle.store(now_ms(), Ordering::Relaxed);
            return;
        };
        let trailing_callback_ratio = self.state.config.read().risk.trailing_callback_ratio;
        let close_side = position.side.opposite();

        for kind in [ConditionalKind::StopLoss, ConditionalKind::ProfitFloor, ConditionalKind::TrailingTakeProfit] {
            let (existing_id, expected_trigger, callback_ratio) = match kind {
                ConditionalKind::StopLoss => (position.sl_order_id.clone(), position.stop_price, None),
                ConditionalKind::ProfitFloor => (position.tp_floor_order_id.clone(), position.profit_floor_price, None),
                ConditionalKind::TrailingTakeProfit => (
                    position.trailing_order_id.clone(),
                    position.trailing_activation_price,
                    Some(trailing_callback_ratio),
                ),
            };
            let Some(existing_id) = existing_id else { continue };

            let needs_replace = match self.state.order_router.verify_conditional(&position.symbol, kind).await {
                Ok(Some((observed_id, observed_trigger))) => {
                    observed_id != existing_id || (observed_trigger - expected_trigger).abs() > meta.price_tick
                }
                Ok(None) => true,
                Err(e) => {
                    debug!(symbol = %position.symbol, error = %e, "verification: list_conditional_orders failed");
                    false
                }
            };
            if !needs_replace {
                continue;
            }

            warn!(symbol = %position.symbol, position_id = %position.id, ?kind, "verification: conditional order missing or drifted, re-placing");

            if let Err(e) = self.state.order_router.cancel_conditional(&position.symbol, &existing_id).await {
                debug!(symbol = %position.symbol, error = %e, ?kind, "verification: cancel of stale conditional failed (may already be gone)");
            }

            let descriptor = ConditionalOrderDescriptor {
                kind,
                close_side,
                trigger_price: expected_trigger,
                size: position.remaining_contracts,
                ref_type: RefType::Mark,
                callback_ratio,
            };
            match self.state.order_router.place_conditional(&position.symbol, &descriptor).await {
                Ok(new_id) => {
                    self.state.position_manager.with_mut(&position.id, |p| match kind {
                        ConditionalKind::StopLoss => p.sl_order_id = Some(new_id),
                        ConditionalKind::ProfitFloor => p.tp_floor_order_id = Some(new_id),
                        ConditionalKind::TrailingTakeProfit => p.trailing_order_id = Some(new_id),
                    });
                }
                Err(e) => {
                    error!(symbol = %position.symbol, position_id = %position.id, ?kind, error = %e, "verification: failed to re-place conditional order");
                }
            }
        }
        self.last_reconcile_cycle.store(now_ms(), Ordering::Relaxed);
    }

    // -------------------------------------------------------------------------
    // Closing phase
    // -------------------------------------------------------------------------

    async fn close_position(&self, position: &Position, reason: CloseReason) {
        let symbol = &position.symbol;
        self.state.position_manager.transition(&position.id, ProcessState::Closing);

        let remaining = self.state.position_manager.get(&position.id).map(|p| p.remaining_contracts).unwrap_or(0.0);
        if remaining > 0.0 {
            if let Err(e) = self.state.order_router.close_market(symbol, position.side.opposite(), remaining).await {
                error!(symbol, position_id = %position.id, error = %e, "market close failed during Closing");
            }
        }

        self.cleanup_closing(&position.id, symbol, reason).await;
    }

    async fn cleanup_closing(&self, position_id: &str, symbol: &str, reason: CloseReason) {
        if let Err(e) = self.state.order_router.cancel_all_conditionals(symbol).await {
            warn!(symbol, position_id, error = %e, "failed to cancel all conditionals during close cleanup");
        }
        let realized_pnl = self
            .state
            .position_manager
            .get(position_id)
            .map(|p| realized_pnl_estimate(&p))
            .unwrap_or(0.0);
        self.state.position_manager.close(position_id, reason, realized_pnl);
    }
}

fn current_favorable_price(position: &Position) -> f64 {
    position.peak_favorable_price
}

fn realized_pnl_estimate(position: &Position) -> f64 {
    let closed_qty = position.actual_filled_contracts - position.remaining_contracts;
    match position.side {
        Side::Long => (position.peak_favorable_price - position.entry_price) * closed_qty,
        Side::Short => (position.entry_price - position.peak_favorable_price) * closed_qty,
    }
}

/// Minimal `futures::future::join_all` replacement so the crate doesn't need
/// to add the `futures` crate solely for this one call site.
async fn futures_lite_join_all<F: std::future::Future<Output = ()>>(futs: Vec<F>) {
    let mut handles = Vec::with_capacity(futs.len());
    for fut in futs {
        handles.push(fut);
    }
    for fut in handles {
        fut.await;
    }
}

/// Spawn the scan loop: one tick every `scan_interval_seconds`, cancelled
/// immediately on shutdown by aborting the returned handle.
pub fn spawn_scan_loop(coordinator: Arc<Coordinator>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let interval = coordinator.state.config.read().concurrency.scan_interval_seconds;
            tokio::time::sleep(Duration::from_secs(interval)).await;
            coordinator.scan_once().await;
        }
    })
}

/// Spawn the monitor loop: one tick every `monitor_interval_seconds`, checked
/// for a shutdown request between ticks so the in-flight iteration always
/// finishes before the task exits.
pub fn spawn_monitor_loop(coordinator: Arc<Coordinator>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            if coordinator.monitor_shutdown.load(Ordering::SeqCst) {
                info!("monitor loop stopping after shutdown request");
                break;
            }
            let interval = coordinator.state.config.read().concurrency.monitor_interval_seconds;
            tokio::time::sleep(Duration::from_secs(interval)).await;
            coordinator.monitor_once().await;
        }
    })
}

impl Coordinator {
    /// Run exactly one scan pass over the configured symbols. Used both for
    /// the cold-start scan and each steady-state tick; requires `Arc<Self>`
    /// so per-symbol tasks can hold their own clone of the coordinator.
    #[instrument(skip(self))]
    pub async fn scan_once(self: &Arc<Self>) {
        let (symbols, trading_mode, candle_lookback, primary_tf, session_tf) = {
            let cfg = self.state.config.read();
            (
                cfg.symbols.clone(),
                cfg.trading_mode,
                cfg.candle_lookback,
                cfg.primary_timeframe.clone(),
                cfg.session_timeframe.clone(),
            )
        };

        let entries_allowed = trading_mode == TradingMode::Live && self.cold_start_done.load(Ordering::SeqCst);
        let semaphore = Arc::new(Semaphore::new(TICK_CONCURRENCY));
        let mut handles = Vec::with_capacity(symbols.len());

        for symbol in symbols {
            let sem = semaphore.clone();
            let this = Arc::clone(self);
            let primary_tf = primary_tf.clone();
            let session_tf = session_tf.clone();
            handles.push(tokio::spawn(async move {
                let _permit = sem.acquire_owned().await.expect("semaphore not closed");
                this.scan_symbol(&symbol, candle_lookback, &primary_tf, &session_tf, entries_allowed).await;
            }));
        }

        for h in handles {
            let _ = h.await;
        }

        self.cold_start_done.store(true, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn funding_blackout_near_boundary() {
        // One 8h boundary lands at 28_800_000 ms; 30s before it is inside a
        // 120s blackout window.
        let near = 28_800_000 - 30_000;
        assert!(in_funding_blackout(near, 120));
    }

    #[test]
    fn funding_blackout_mid_cycle_is_clear() {
        let mid = 14_400_000; // 4h into an 8h cycle
        assert!(!in_funding_blackout(mid, 120));
    }

    #[test]
    fn classify_symbol_known_major() {
        assert_eq!(classify_symbol("BTCUSDT").0, Bucket::Major);
    }

    #[test]
    fn classify_symbol_unknown_falls_back_to_micro() {
        let (bucket, sector) = classify_symbol("NEWCOINUSDT");
        assert_eq!(bucket, Bucket::Micro);
        assert_eq!(sector, "other");
    }
}
