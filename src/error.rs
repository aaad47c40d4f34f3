// =============================================================================
// Error taxonomy for the position lifecycle and order router
// =============================================================================
//
// `anyhow` carries ad-hoc context across I/O and parsing boundaries throughout
// this crate, matching the rest of the codebase. This module exists for the
// handful of call sites where the *caller* must branch on error kind rather
// than just log and bail: the lifecycle manager's state transitions read the
// kind of a failure off the router, never a string.

use thiserror::Error;

/// Error kinds the position lifecycle manager and order router can surface.
///
/// Each variant corresponds to one row of the error-handling table: the
/// condition that produces it and the policy the caller is expected to apply
/// are documented on the variant, not re-derived from the message text.
#[derive(Debug, Error, Clone)]
pub enum EngineError {
    /// Network timeout, 5xx, or rate limit. Retried with exponential backoff
    /// inside the router (bounded attempts) before this ever surfaces.
    #[error("transient I/O error: {0}")]
    TransientIo(String),

    /// Trigger side rule, size precision, or missing size rejected by the
    /// venue. Adjusted once (tick nudge / re-round) then retried; a second
    /// failure of the same kind is surfaced as-is.
    #[error("venue validation error: {0}")]
    VenueValidation(String),

    /// A conditional order was rejected because the fill isn't visible yet.
    /// Caller should back off and re-poll positions, bounded by
    /// `tp_sl_max_attempts`.
    #[error("insufficient position visibility: {0}")]
    InsufficientPosition(String),

    /// Sizing cannot satisfy the liquidation-buffer guards even at minimum
    /// lot. The signal is discarded; never retried.
    #[error("liquidation guard failed: {0}")]
    LiquidationGuardFailed(String),

    /// A fill was observed but all TP/SL placement retries were exhausted.
    /// Alarm-level; the lifecycle manager must immediately attempt a market
    /// close.
    #[error("unprotected fill: {0}")]
    UnprotectedFill(String),

    /// The verification loop found drift or a missing conditional order.
    /// Policy: cancel + re-place; never adopt the venue's state as
    /// authoritative.
    #[error("stale conditional-order state: {0}")]
    StaleState(String),

    /// Invalid thresholds or missing symbol metadata. Refuses to start;
    /// never raised from the steady-state loops.
    #[error("fatal configuration error: {0}")]
    FatalConfig(String),
}

impl EngineError {
    /// Whether the router should retry this error kind on its own, without
    /// involving the lifecycle state machine.
    pub fn is_router_retryable(&self) -> bool {
        matches!(self, EngineError::TransientIo(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transient_io_is_router_retryable() {
        assert!(EngineError::TransientIo("timeout".into()).is_router_retryable());
        assert!(!EngineError::VenueValidation("bad side".into()).is_router_retryable());
        assert!(!EngineError::LiquidationGuardFailed("below min lot".into()).is_router_retryable());
    }

    #[test]
    fn display_messages_are_human_readable() {
        let e = EngineError::StaleState("stop_loss missing for BTCUSDT".into());
        assert_eq!(
            e.to_string(),
            "stale conditional-order state: stop_loss missing for BTCUSDT"
        );
    }
}
