// =============================================================================
// Shared types used across the trading engine
// =============================================================================

use serde::{Deserialize, Serialize};

/// Trade direction. Longs profit from price increases, shorts from decreases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Long,
    Short,
}

impl Side {
    /// The opposite side, used when describing the close order for a position.
    pub fn opposite(self) -> Side {
        match self {
            Side::Long => Side::Short,
            Side::Short => Side::Long,
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Long => write!(f, "long"),
            Side::Short => write!(f, "short"),
        }
    }
}

/// Which strategy evaluator produced a signal. Tagged on the Position so the
/// lifecycle manager can apply strategy-specific tripwires and trailing
/// behavior without dynamic dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StrategyKind {
    Lsvr,
    VwapMr,
    TrendFallback,
}

impl std::fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StrategyKind::Lsvr => write!(f, "lsvr"),
            StrategyKind::VwapMr => write!(f, "vwap_mr"),
            StrategyKind::TrendFallback => write!(f, "trend_fallback"),
        }
    }
}

/// Market regime label emitted by the regime classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RegimeLabel {
    Range,
    Trend,
}

impl std::fmt::Display for RegimeLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RegimeLabel::Range => write!(f, "range"),
            RegimeLabel::Trend => write!(f, "trend"),
        }
    }
}

/// Symbol liquidity bucket. Parameterizes universe-gate and regime-classifier
/// thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Bucket {
    Major,
    Mid,
    Micro,
}

impl std::fmt::Display for Bucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Bucket::Major => write!(f, "major"),
            Bucket::Mid => write!(f, "mid"),
            Bucket::Micro => write!(f, "micro"),
        }
    }
}

/// Why a position was closed. Recorded on the Position's terminal fields and
/// emitted in the trade-journal event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CloseReason {
    StopLoss,
    TrailingTp,
    MinProfitFloor,
    TimeStop,
    Manual,
    Tripwire,
    External,
}

impl std::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CloseReason::StopLoss => "stop_loss",
            CloseReason::TrailingTp => "trailing_tp",
            CloseReason::MinProfitFloor => "min_profit_floor",
            CloseReason::TimeStop => "time_stop",
            CloseReason::Manual => "manual",
            CloseReason::Tripwire => "tripwire",
            CloseReason::External => "external",
        };
        write!(f, "{s}")
    }
}

/// Kind of exchange-resident conditional order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionalKind {
    StopLoss,
    ProfitFloor,
    TrailingTakeProfit,
}

impl std::fmt::Display for ConditionalKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ConditionalKind::StopLoss => "stop_loss",
            ConditionalKind::ProfitFloor => "profit_floor",
            ConditionalKind::TrailingTakeProfit => "trailing_take_profit",
        };
        write!(f, "{s}")
    }
}

/// Price reference a conditional order's trigger is evaluated against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RefType {
    Mark,
    Last,
    Index,
}

/// Balance snapshot for a single asset from the exchange.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalanceInfo {
    pub asset: String,
    #[serde(default)]
    pub free: f64,
    #[serde(default)]
    pub locked: f64,
}

/// Whether the engine is actively trading, paused, or killed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradingMode {
    Live,
    Paused,
    Killed,
}

impl Default for TradingMode {
    fn default() -> Self {
        Self::Paused
    }
}

impl std::fmt::Display for TradingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Live => write!(f, "Live"),
            Self::Paused => write!(f, "Paused"),
            Self::Killed => write!(f, "Killed"),
        }
    }
}
