// =============================================================================
// Position lifecycle manager — owns the set of live positions
// =============================================================================
//
// Phases per spec §4.7:
//
//   Created ──market_ok──► Reconciling ──tp_sl_ok──► Protected ──► Closing ──► Closed
//      │ market_fail            │ retries_exhausted
//      ▼                        ▼
//    Failed                  Unprotected (alarm, retry)
//
// The manager owns no exchange I/O; the order router and monitor loop call
// into `PositionManager` to read/mutate position state, and the manager
// itself only enforces the invariants (monotonic `remaining_contracts`,
// `actual_filled_contracts` set exactly once, etc).

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::risk::SizingDecision;
use crate::strategy::{Signal, TpLadderEntry};
use crate::types::{CloseReason, ConditionalKind, Side, StrategyKind};

/// Phase of the per-position state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProcessState {
    Created,
    Reconciling,
    Protected,
    Unprotected,
    Closing,
    Closed,
    Failed,
}

impl std::fmt::Display for ProcessState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ProcessState::Created => "created",
            ProcessState::Reconciling => "reconciling",
            ProcessState::Protected => "protected",
            ProcessState::Unprotected => "unprotected",
            ProcessState::Closing => "closing",
            ProcessState::Closed => "closed",
            ProcessState::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// A take-profit ladder rung carrying fill progress, on top of the evaluator's
/// static `(trigger_price, size_fraction)` pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TpRung {
    pub trigger_price: f64,
    pub size_fraction: f64,
    pub filled: bool,
}

impl From<&TpLadderEntry> for TpRung {
    fn from(e: &TpLadderEntry) -> Self {
        Self { trigger_price: e.trigger_price, size_fraction: e.size_fraction, filled: false }
    }
}

/// One weak reference to an exchange-resident conditional order: a lookup
/// token, never an owned object (spec §9 "back-references from orders to
/// positions").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConditionalRef {
    pub kind: ConditionalKind,
    pub exchange_id: String,
    pub trigger_price: f64,
    pub verified: bool,
}

/// A live (or terminal) position, owned exclusively by the lifecycle manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub id: String,
    pub symbol: String,
    pub sector: String,
    pub side: Side,
    pub strategy_kind: StrategyKind,
    pub opened_at_ms: i64,

    pub requested_contracts: f64,
    pub actual_filled_contracts: f64,
    pub remaining_contracts: f64,
    pub entry_price: f64,
    pub leverage: u32,

    pub stop_price: f64,
    pub liq_price: f64,
    pub tp_ladder: Vec<TpRung>,

    /// Trigger price of the profit-floor conditional order (the trailing
    /// take-profit's activation level — never closes anything itself).
    pub profit_floor_price: f64,
    /// Current activation price of the live trailing take-profit order;
    /// starts equal to `profit_floor_price` and is rewritten by TP1 re-arm.
    pub trailing_activation_price: f64,

    pub peak_favorable_price: f64,
    pub tp_hit_count: u32,
    pub trailing_active: bool,

    pub sl_order_id: Option<String>,
    pub tp_floor_order_id: Option<String>,
    pub trailing_order_id: Option<String>,

    pub time_stop_seconds: u64,
    pub state: ProcessState,
    pub tp_sl_attempts: u32,

    pub closed_at_ms: Option<i64>,
    pub close_reason: Option<CloseReason>,
    pub realized_pnl: f64,
}

impl Position {
    /// Construct a fresh `Created`-phase position from a sized signal. The
    /// entry/actual-fill fields are placeholders until `mark_filled` runs —
    /// `actual_filled_contracts` is set exactly once, from the exchange's
    /// post-fill snapshot, never from the requested size (spec §3 invariant).
    pub fn new(sizing: &SizingDecision, sector: &str, now_ms: i64) -> Self {
        let signal: &Signal = &sizing.signal;
        Self {
            id: Uuid::new_v4().to_string(),
            symbol: signal.symbol.clone(),
            sector: sector.to_string(),
            side: signal.side,
            strategy_kind: signal.strategy_kind,
            opened_at_ms: now_ms,
            requested_contracts: sizing.contracts,
            actual_filled_contracts: 0.0,
            remaining_contracts: 0.0,
            entry_price: sizing.entry_price_reference,
            leverage: sizing.leverage,
            stop_price: sizing.stop_price,
            liq_price: sizing.liq_price,
            tp_ladder: signal.tp_ladder.iter().map(TpRung::from).collect(),
            profit_floor_price: 0.0,
            trailing_activation_price: 0.0,
            peak_favorable_price: sizing.entry_price_reference,
            tp_hit_count: 0,
            trailing_active: false,
            sl_order_id: None,
            tp_floor_order_id: None,
            trailing_order_id: None,
            time_stop_seconds: signal.time_stop_seconds,
            state: ProcessState::Created,
            tp_sl_attempts: 0,
            closed_at_ms: None,
            close_reason: None,
            realized_pnl: 0.0,
        }
    }

    /// Lock the actual fill size (spec §4.7 Reconciling): sets
    /// `actual_filled_contracts` exactly once and rewrites `remaining` to
    /// match it, never the requested size.
    pub fn mark_filled(&mut self, filled_price: f64, filled_contracts: f64) {
        self.entry_price = filled_price;
        self.actual_filled_contracts = filled_contracts;
        self.remaining_contracts = filled_contracts;
        self.peak_favorable_price = filled_price;
    }

    pub fn update_peak_favorable(&mut self, current_price: f64) {
        match self.side {
            Side::Long => {
                if current_price > self.peak_favorable_price {
                    self.peak_favorable_price = current_price;
                }
            }
            Side::Short => {
                if current_price < self.peak_favorable_price {
                    self.peak_favorable_price = current_price;
                }
            }
        }
    }

    /// `remaining_contracts` is monotonically non-increasing until terminal
    /// (spec §3 invariant) — enforced here rather than trusted at call sites.
    pub fn reduce_remaining(&mut self, fraction: f64) -> f64 {
        let qty = (self.actual_filled_contracts * fraction).min(self.remaining_contracts);
        self.remaining_contracts = (self.remaining_contracts - qty).max(0.0);
        qty
    }

    pub fn is_open(&self) -> bool {
        !matches!(self.state, ProcessState::Closed | ProcessState::Failed)
    }

    pub fn elapsed_seconds(&self, now_ms: i64) -> i64 {
        (now_ms - self.opened_at_ms) / 1000
    }
}

/// Realized return-on-margin, as a percentage, for the trade-journal log.
/// Zero margin (never filled) reads as 0% rather than dividing by zero.
fn roe_pct(p: &Position) -> f64 {
    let margin = p.entry_price * p.actual_filled_contracts / p.leverage.max(1) as f64;
    if margin <= 0.0 {
        0.0
    } else {
        p.realized_pnl / margin * 100.0
    }
}

/// Current wall-clock time in epoch milliseconds.
pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

/// Owns the map of live and terminal positions, keyed by id. Writers are
/// serialized per-symbol at the caller (coordinator) level; this map itself
/// uses a single read-write lock, matching spec §5's "guarded by a
/// read-write lock with writers serialized per-symbol."
pub struct PositionManager {
    positions: RwLock<HashMap<String, Position>>,
}

impl Default for PositionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl PositionManager {
    pub fn new() -> Self {
        Self { positions: RwLock::new(HashMap::new()) }
    }

    pub fn insert(&self, position: Position) -> String {
        let id = position.id.clone();
        info!(
            position_id = %id,
            symbol = %position.symbol,
            side = %position.side,
            strategy_kind = %position.strategy_kind,
            contracts = position.requested_contracts,
            entry_price = position.entry_price,
            stop_price = position.stop_price,
            tp_ladder = ?position.tp_ladder,
            peak_favorable_price = position.peak_favorable_price,
            realized_pnl_pct_roe = 0.0,
            "position created"
        );
        self.positions.write().insert(id.clone(), position);
        id
    }

    pub fn get(&self, id: &str) -> Option<Position> {
        self.positions.read().get(id).cloned()
    }

    pub fn get_by_symbol(&self, symbol: &str) -> Option<Position> {
        self.positions
            .read()
            .values()
            .find(|p| p.symbol == symbol && p.is_open())
            .cloned()
    }

    pub fn has_open_for_symbol(&self, symbol: &str) -> bool {
        self.positions.read().values().any(|p| p.symbol == symbol && p.is_open())
    }

    pub fn open_count(&self) -> usize {
        self.positions.read().values().filter(|p| p.is_open()).count()
    }

    pub fn open_count_in_sector(&self, sector: &str) -> usize {
        self.positions
            .read()
            .values()
            .filter(|p| p.is_open() && p.sector == sector)
            .count()
    }

    pub fn get_open_positions(&self) -> Vec<Position> {
        self.positions.read().values().filter(|p| p.is_open()).cloned().collect()
    }

    pub fn get_closed_positions(&self) -> Vec<Position> {
        self.positions.read().values().filter(|p| !p.is_open()).cloned().collect()
    }

    /// Apply `f` to the position identified by `id` under the write lock,
    /// returning whatever `f` returns. Used for every state transition so
    /// callers never hold a stale clone across an await point.
    pub fn with_mut<T>(&self, id: &str, f: impl FnOnce(&mut Position) -> T) -> Option<T> {
        let mut map = self.positions.write();
        map.get_mut(id).map(f)
    }

    pub fn transition(&self, id: &str, new_state: ProcessState) {
        if let Some((old, snapshot)) = self.with_mut(id, |p| {
            let old = p.state;
            p.state = new_state;
            (old, p.clone())
        }) {
            info!(
                position_id = %id,
                from = %old,
                to = %new_state,
                symbol = %snapshot.symbol,
                strategy_kind = %snapshot.strategy_kind,
                contracts = snapshot.actual_filled_contracts,
                entry_price = snapshot.entry_price,
                stop_price = snapshot.stop_price,
                tp_ladder = ?snapshot.tp_ladder,
                peak_favorable_price = snapshot.peak_favorable_price,
                realized_pnl_pct_roe = roe_pct(&snapshot),
                "position phase transition"
            );
        } else {
            warn!(position_id = %id, "transition requested for unknown position");
        }
    }

    /// Trade-journal event for a TP-ladder rung fill — not itself a phase
    /// transition, so it doesn't go through `transition()`, but spec §6
    /// requires the same full field set on every lifecycle event.
    pub fn record_tp_hit(&self, id: &str, rung_index: u32) {
        if let Some(snapshot) = self.get(id) {
            info!(
                position_id = %id,
                rung_index,
                symbol = %snapshot.symbol,
                strategy_kind = %snapshot.strategy_kind,
                contracts = snapshot.remaining_contracts,
                entry_price = snapshot.entry_price,
                stop_price = snapshot.stop_price,
                tp_ladder = ?snapshot.tp_ladder,
                peak_favorable_price = snapshot.peak_favorable_price,
                realized_pnl_pct_roe = roe_pct(&snapshot),
                "take-profit rung filled"
            );
        }
    }

    pub fn close(&self, id: &str, reason: CloseReason, realized_pnl: f64) {
        let closed = self.with_mut(id, |p| {
            p.state = ProcessState::Closed;
            p.close_reason = Some(reason);
            p.closed_at_ms = Some(now_ms());
            p.realized_pnl = realized_pnl;
            p.remaining_contracts = 0.0;
            p.clone()
        });
        if let Some(snapshot) = closed {
            info!(
                position_id = %id,
                symbol = %snapshot.symbol,
                side = %snapshot.side,
                %reason,
                realized_pnl,
                strategy_kind = %snapshot.strategy_kind,
                contracts = snapshot.actual_filled_contracts,
                entry_price = snapshot.entry_price,
                stop_price = snapshot.stop_price,
                tp_ladder = ?snapshot.tp_ladder,
                peak_favorable_price = snapshot.peak_favorable_price,
                realized_pnl_pct_roe = roe_pct(&snapshot),
                "position closed"
            );
        }
    }

    pub fn fail(&self, id: &str, reason: &str) {
        error!(position_id = %id, reason, "position entry failed — never reached the exchange");
        self.with_mut(id, |p| {
            p.state = ProcessState::Failed;
            p.closed_at_ms = Some(now_ms());
        });
    }

    /// Remove terminal (Closed/Failed) positions older than `retain_ms` from
    /// the map so it doesn't grow unbounded across a long-running process.
    pub fn prune_terminal(&self, retain_ms: i64) {
        let cutoff = now_ms() - retain_ms;
        self.positions.write().retain(|_, p| p.is_open() || p.closed_at_ms.map(|t| t > cutoff).unwrap_or(true));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RegimeLabel;

    fn signal() -> Signal {
        Signal {
            symbol: "BTCUSDT".into(),
            side: Side::Long,
            strategy_kind: StrategyKind::Lsvr,
            entry_ref_price: 100.0,
            stop_ref_price: 98.60,
            tp_ladder: vec![
                TpLadderEntry { trigger_price: 100.40, size_fraction: 0.75 },
                TpLadderEntry { trigger_price: 101.00, size_fraction: 0.20 },
                TpLadderEntry { trigger_price: 102.80, size_fraction: 0.05 },
            ],
            time_stop_seconds: 900,
            confluence_score: 1.0,
            regime: RegimeLabel::Range,
        }
    }

    fn sizing() -> SizingDecision {
        SizingDecision {
            signal: signal(),
            leverage: 25,
            contracts: 25.0,
            entry_price_reference: 100.0,
            stop_price: 98.60,
            liq_price: 96.50,
            passes_guards: true,
            reason_if_failed: None,
        }
    }

    #[test]
    fn new_position_starts_created_with_zero_fill() {
        let p = Position::new(&sizing(), "layer1", 1_000);
        assert_eq!(p.state, ProcessState::Created);
        assert_eq!(p.actual_filled_contracts, 0.0);
        assert_eq!(p.remaining_contracts, 0.0);
    }

    #[test]
    fn mark_filled_locks_actual_from_exchange_snapshot_not_requested() {
        let mut p = Position::new(&sizing(), "layer1", 1_000);
        // Spec scenario 3: fill observed at 41 when 41.994 was requested.
        p.requested_contracts = 41.994;
        p.mark_filled(100.05, 41.0);
        assert_eq!(p.actual_filled_contracts, 41.0);
        assert_eq!(p.remaining_contracts, 41.0);
    }

    #[test]
    fn reduce_remaining_is_monotonically_non_increasing() {
        let mut p = Position::new(&sizing(), "layer1", 1_000);
        p.mark_filled(100.0, 25.0);
        let closed = p.reduce_remaining(0.75);
        assert!((closed - 18.75).abs() < 1e-9);
        assert!((p.remaining_contracts - 6.25).abs() < 1e-9);
        let second = p.reduce_remaining(1.0);
        assert!((second - 6.25).abs() < 1e-9);
        assert_eq!(p.remaining_contracts, 0.0);
    }

    #[test]
    fn manager_tracks_open_count_and_sector_caps() {
        let mgr = PositionManager::new();
        let mut p1 = Position::new(&sizing(), "layer1", 1_000);
        p1.mark_filled(100.0, 25.0);
        let mut p2 = Position::new(&sizing(), "layer1", 1_000);
        p2.symbol = "ETHUSDT".into();
        p2.mark_filled(100.0, 10.0);

        mgr.insert(p1);
        mgr.insert(p2);
        assert_eq!(mgr.open_count(), 2);
        assert_eq!(mgr.open_count_in_sector("layer1"), 2);
    }

    #[test]
    fn close_sets_terminal_fields_and_zeros_remaining() {
        let mgr = PositionManager::new();
        let mut p = Position::new(&sizing(), "layer1", 1_000);
        p.mark_filled(100.0, 25.0);
        let id = mgr.insert(p);

        mgr.close(&id, CloseReason::StopLoss, -36.4);
        let closed = mgr.get(&id).unwrap();
        assert_eq!(closed.state, ProcessState::Closed);
        assert_eq!(closed.remaining_contracts, 0.0);
        assert_eq!(closed.close_reason, Some(CloseReason::StopLoss));
        assert!(!closed.is_open());
    }

    #[test]
    fn has_open_for_symbol_ignores_closed_positions() {
        let mgr = PositionManager::new();
        let mut p = Position::new(&sizing(), "layer1", 1_000);
        p.mark_filled(100.0, 25.0);
        let id = mgr.insert(p);
        assert!(mgr.has_open_for_symbol("BTCUSDT"));
        mgr.close(&id, CloseReason::TimeStop, 0.0);
        assert!(!mgr.has_open_for_symbol("BTCUSDT"));
    }
}
