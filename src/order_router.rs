// =============================================================================
// Order router — market entries and exchange-resident conditional orders
// =============================================================================
//
// Per spec §4.6: the router's every method is a thin, typed wrapper over the
// exchange client, with its own bounded retry for transient I/O (the "retries
// silently" class from §7's propagation rule); everything else returns a
// typed `EngineError` and lets the lifecycle manager decide the transition.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, instrument, warn};

use crate::binance::client::{BinanceClient, ConditionalOrderKind};
use crate::error::EngineError;
use crate::types::{ConditionalKind, RefType, Side};

const MAX_TRANSIENT_RETRIES: u32 = 3;

/// Everything the router needs to place or replace one conditional order.
#[derive(Debug, Clone)]
pub struct ConditionalOrderDescriptor {
    pub kind: ConditionalKind,
    /// The side of the *closing* order (opposite of the position's side).
    pub close_side: Side,
    pub trigger_price: f64,
    pub size: f64,
    pub ref_type: RefType,
    pub callback_ratio: Option<f64>,
}

pub struct OrderRouter {
    client: Arc<BinanceClient>,
}

fn classify_io_error(err: &anyhow::Error) -> EngineError {
    let msg = err.to_string();
    let lower = msg.to_lowercase();
    if lower.contains("trigger") && (lower.contains("side") || lower.contains("must be")) {
        EngineError::VenueValidation(msg)
    } else if lower.contains("precision") || lower.contains("quantity") || lower.contains("min_qty") {
        EngineError::VenueValidation(msg)
    } else {
        EngineError::TransientIo(msg)
    }
}

impl OrderRouter {
    pub fn new(client: Arc<BinanceClient>) -> Self {
        Self { client }
    }

    /// Run `op` up to `MAX_TRANSIENT_RETRIES` times with exponential backoff,
    /// but only for errors classified as transient — venue-validation errors
    /// are surfaced immediately so the caller applies its own one-tick-nudge
    /// policy instead of blindly repeating the same rejected request.
    async fn with_retry<T, F, Fut>(&self, op_name: &str, mut op: F) -> Result<T, EngineError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = anyhow::Result<T>>,
    {
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(v) => return Ok(v),
                Err(e) => {
                    let classified = classify_io_error(&e);
                    if !classified.is_router_retryable() || attempt + 1 >= MAX_TRANSIENT_RETRIES {
                        return Err(classified);
                    }
                    attempt += 1;
                    let backoff = Duration::from_millis(250 * 2u64.pow(attempt));
                    warn!(op = op_name, attempt, error = %e, "transient router error, retrying");
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }

    /// `submit_market_entry(symbol, side, contracts) -> order_id`. Always a
    /// market order — post-only/maker paths are intentionally excluded so a
    /// fill is deterministic for immediate TP/SL arming (spec §7 rationale).
    #[instrument(skip(self))]
    pub async fn submit_market_entry(&self, symbol: &str, side: Side, contracts: f64) -> Result<String, EngineError> {
        self.with_retry("submit_market_entry", || {
            self.client.submit_market_order(symbol, side, contracts, false)
        })
        .await
    }

    /// `read_actual_filled(symbol) -> (entry_price, signed_contracts)`: the
    /// positions endpoint is authoritative, never the requested size. The
    /// sign of `signed_contracts` carries side (positive long, negative
    /// short) — callers that already know the position's side only need
    /// the magnitude, but recovery paths need the sign too.
    #[instrument(skip(self))]
    pub async fn read_actual_filled(&self, symbol: &str) -> Result<(f64, f64), EngineError> {
        self.with_retry("read_actual_filled", || self.client.fetch_position(symbol)).await
    }

    #[instrument(skip(self, descriptor))]
    pub async fn place_conditional(
        &self,
        symbol: &str,
        descriptor: &ConditionalOrderDescriptor,
    ) -> Result<String, EngineError> {
        let kind = match descriptor.kind {
            ConditionalKind::StopLoss => ConditionalOrderKind::StopMarket,
            ConditionalKind::ProfitFloor => ConditionalOrderKind::TakeProfitMarket,
            ConditionalKind::TrailingTakeProfit => ConditionalOrderKind::TrailingStopMarket,
        };
        self.with_retry("place_conditional", || {
            self.client.place_conditional_order(
                symbol,
                descriptor.close_side,
                kind,
                descriptor.trigger_price,
                descriptor.size,
                descriptor.ref_type,
                descriptor.callback_ratio,
            )
        })
        .await
    }

    /// `verify_conditional(symbol, kind) -> Option<descriptor>`.
    #[instrument(skip(self))]
    pub async fn verify_conditional(
        &self,
        symbol: &str,
        kind: ConditionalKind,
    ) -> Result<Option<(String, f64)>, EngineError> {
        let orders = self
            .with_retry("verify_conditional", || self.client.list_conditional_orders(symbol))
            .await?;
        let venue_kind = match kind {
            ConditionalKind::StopLoss => "STOP_MARKET",
            ConditionalKind::ProfitFloor => "TAKE_PROFIT_MARKET",
            ConditionalKind::TrailingTakeProfit => "TRAILING_STOP_MARKET",
        };
        Ok(orders
            .into_iter()
            .find(|o| o.order_type == venue_kind)
            .map(|o| (o.exchange_id, o.trigger_price)))
    }

    #[instrument(skip(self))]
    pub async fn cancel_conditional(&self, symbol: &str, exchange_id: &str) -> Result<(), EngineError> {
        self.with_retry("cancel_conditional", || self.client.cancel_order(symbol, exchange_id)).await
    }

    /// Binance futures conditional orders cannot be amended in place; a
    /// "modify" is cancel-then-replace, matching the venue's actual contract
    /// even though spec §4.6 names it as one router operation.
    #[instrument(skip(self, descriptor))]
    pub async fn modify_conditional(
        &self,
        symbol: &str,
        exchange_id: &str,
        descriptor: &ConditionalOrderDescriptor,
    ) -> Result<String, EngineError> {
        self.cancel_conditional(symbol, exchange_id).await?;
        debug!(symbol, exchange_id, new_trigger = descriptor.trigger_price, "conditional cancelled, replacing");
        self.place_conditional(symbol, descriptor).await
    }

    /// Reduce-only market close for `contracts` — used on every close path:
    /// bot-side SL, TP rung fills, tripwires, time-stop, unprotected-fill
    /// force-close.
    #[instrument(skip(self))]
    pub async fn close_market(&self, symbol: &str, close_side: Side, contracts: f64) -> Result<String, EngineError> {
        self.with_retry("close_market", || {
            self.client.submit_market_order(symbol, close_side, contracts, true)
        })
        .await
    }

    #[instrument(skip(self))]
    pub async fn cancel_all_conditionals(&self, symbol: &str) -> Result<(), EngineError> {
        let orders = self
            .with_retry("cancel_all_conditionals", || self.client.list_conditional_orders(symbol))
            .await?;
        for order in orders {
            if let Err(e) = self.cancel_conditional(symbol, &order.exchange_id).await {
                warn!(symbol, exchange_id = %order.exchange_id, error = %e, "failed to cancel conditional during cleanup");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_distinguishes_venue_validation_from_transient() {
        let venue = anyhow::anyhow!("trigger price must be below current price");
        assert!(matches!(classify_io_error(&venue), EngineError::VenueValidation(_)));

        let transient = anyhow::anyhow!("connection reset by peer");
        assert!(matches!(classify_io_error(&transient), EngineError::TransientIo(_)));
    }
}
