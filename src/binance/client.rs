// =============================================================================
// Binance Futures (fapi) REST API Client — HMAC-SHA256 signed requests
// =============================================================================
//
// SECURITY: The secret key is never logged or serialized. All signed requests
// include X-MBX-APIKEY as a header and a recvWindow of 5 000 ms to tolerate
// minor clock drift between the bot and Binance servers.
// =============================================================================

use anyhow::{Context, Result};
use hmac::{Hmac, Mac};
use reqwest::header::{HeaderMap, HeaderValue};
use sha2::Sha256;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, instrument, warn};

use crate::binance::rate_limit::{RateLimitSnapshot, RateLimitTracker};
use crate::market_data::Candle;
use crate::types::{RefType, Side};

type HmacSha256 = Hmac<Sha256>;

/// Default recv-window sent with every signed request (milliseconds).
const RECV_WINDOW: u64 = 5000;

/// Kind of exchange-resident conditional order, mapped to the venue's order
/// `type` field on the futures order endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConditionalOrderKind {
    StopMarket,
    TakeProfitMarket,
    TrailingStopMarket,
}

impl ConditionalOrderKind {
    fn as_venue_type(self) -> &'static str {
        match self {
            ConditionalOrderKind::StopMarket => "STOP_MARKET",
            ConditionalOrderKind::TakeProfitMarket => "TAKE_PROFIT_MARKET",
            ConditionalOrderKind::TrailingStopMarket => "TRAILING_STOP_MARKET",
        }
    }

    fn from_venue_type(s: &str) -> Option<Self> {
        match s {
            "STOP_MARKET" => Some(ConditionalOrderKind::StopMarket),
            "TAKE_PROFIT_MARKET" => Some(ConditionalOrderKind::TakeProfitMarket),
            "TRAILING_STOP_MARKET" => Some(ConditionalOrderKind::TrailingStopMarket),
            _ => None,
        }
    }
}

/// One exchange-resident conditional order as reported by `/fapi/v1/openOrders`.
#[derive(Debug, Clone)]
pub struct ConditionalOrderInfo {
    pub exchange_id: String,
    pub order_type: String,
    pub trigger_price: f64,
}

fn side_str(side: Side) -> &'static str {
    match side {
        Side::Long => "BUY",
        Side::Short => "SELL",
    }
}

/// The futures conditional-order `workingType` a `RefType` maps to. Binance
/// futures has no notion of an index-price trigger distinct from mark price,
/// so `RefType::Index` degrades to `MARK_PRICE` — the closer of the two venue
/// options to "index", and documented as such in the grounding ledger rather
/// than silently mis-tagged as last price.
fn working_type(ref_type: RefType) -> &'static str {
    match ref_type {
        RefType::Mark => "MARK_PRICE",
        RefType::Index => "MARK_PRICE",
        RefType::Last => "CONTRACT_PRICE",
    }
}

/// Binance USD-M futures REST API client with HMAC-SHA256 request signing.
///
/// Owns its own [`RateLimitTracker`] — every signed call updates it from the
/// response headers internally, so callers never have to thread one through.
#[derive(Clone)]
pub struct BinanceClient {
    api_key: String,
    secret: String,
    base_url: String,
    client: reqwest::Client,
    tracker: RateLimitTracker,
}

impl BinanceClient {
    // -------------------------------------------------------------------------
    // Construction
    // -------------------------------------------------------------------------

    /// Create a new `BinanceClient` targeting the USD-M futures API.
    ///
    /// # Arguments
    /// * `api_key` — Binance API key (sent as a header, never in query params).
    /// * `secret`  — Binance secret key used exclusively for HMAC signing.
    pub fn new(api_key: impl Into<String>, secret: impl Into<String>) -> Self {
        let api_key = api_key.into();
        let secret = secret.into();

        let mut default_headers = HeaderMap::new();
        // The API key header is required for all signed endpoints.
        if let Ok(val) = HeaderValue::from_str(&api_key) {
            default_headers.insert("X-MBX-APIKEY", val);
        }

        let client = reqwest::Client::builder()
            .default_headers(default_headers)
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .expect("failed to build reqwest client");

        debug!("BinanceClient initialised (base_url=https://fapi.binance.com)");

        Self {
            api_key,
            secret,
            base_url: "https://fapi.binance.com".to_string(),
            client,
            tracker: RateLimitTracker::default(),
        }
    }

    /// Current rate-limit usage, for the HTTP status surface.
    pub fn rate_limit_snapshot(&self) -> RateLimitSnapshot {
        self.tracker.snapshot()
    }

    // -------------------------------------------------------------------------
    // Signing helpers
    // -------------------------------------------------------------------------

    /// Produce an HMAC-SHA256 hex signature of `query`.
    pub fn sign(&self, query: &str) -> String {
        let mut mac =
            HmacSha256::new_from_slice(self.secret.as_bytes()).expect("HMAC accepts any key size");
        mac.update(query.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    /// Current UNIX timestamp in milliseconds.
    pub fn timestamp_ms() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock before UNIX epoch")
            .as_millis() as u64
    }

    /// Build the full query string for a signed request (appends timestamp,
    /// recvWindow, and signature).
    fn signed_query(&self, params: &str) -> String {
        let ts = Self::timestamp_ms();
        let base = if params.is_empty() {
            format!("timestamp={ts}&recvWindow={RECV_WINDOW}")
        } else {
            format!("{params}&timestamp={ts}&recvWindow={RECV_WINDOW}")
        };
        let sig = self.sign(&base);
        format!("{base}&signature={sig}")
    }

    fn record_weight(&self, headers: &HeaderMap) {
        self.tracker.update_from_headers(headers);
    }

    // -------------------------------------------------------------------------
    // Account / balance / positions
    // -------------------------------------------------------------------------

    /// GET /fapi/v2/account (signed).
    #[instrument(skip(self), name = "binance::get_account")]
    pub async fn get_account(&self) -> Result<serde_json::Value> {
        let qs = self.signed_query("");
        let url = format!("{}/fapi/v2/account?{}", self.base_url, qs);

        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .context("GET /fapi/v2/account request failed")?;

        self.record_weight(resp.headers());
        let status = resp.status();
        let body: serde_json::Value = resp
            .json()
            .await
            .context("failed to parse account response")?;

        if !status.is_success() {
            anyhow::bail!("Binance GET /fapi/v2/account returned {}: {}", status, body);
        }

        debug!("account info retrieved successfully");
        Ok(body)
    }

    /// Convenience: extract the wallet balance for a single `asset` (usually
    /// "USDT") from the futures account snapshot.
    #[instrument(skip(self))]
    pub async fn get_balance(&self, asset: &str) -> Result<f64> {
        let account = self.get_account().await?;

        let assets = account["assets"]
            .as_array()
            .context("account response missing 'assets' array")?;

        for a in assets {
            if a["asset"].as_str() == Some(asset) {
                let balance: f64 = a["walletBalance"]
                    .as_str()
                    .unwrap_or("0")
                    .parse()
                    .unwrap_or(0.0);
                debug!(asset, balance, "balance retrieved");
                return Ok(balance);
            }
        }

        warn!(asset, "asset not found in futures account — returning 0.0");
        Ok(0.0)
    }

    /// GET /fapi/v2/positionRisk (signed) for one symbol, returning
    /// `(entry_price, signed_position_amt)`. One-way mode encodes side in
    /// the sign of `positionAmt` — positive is long, negative is short —
    /// so callers that need side must not discard it. Authoritative for
    /// "what did the exchange actually fill", never the requested size.
    #[instrument(skip(self), name = "binance::fetch_position")]
    pub async fn fetch_position(&self, symbol: &str) -> Result<(f64, f64)> {
        let params = format!("symbol={symbol}");
        let qs = self.signed_query(&params);
        let url = format!("{}/fapi/v2/positionRisk?{}", self.base_url, qs);

        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .context("GET /fapi/v2/positionRisk request failed")?;

        self.record_weight(resp.headers());
        let status = resp.status();
        let body: serde_json::Value = resp
            .json()
            .await
            .context("failed to parse positionRisk response")?;

        if !status.is_success() {
            anyhow::bail!("Binance GET /fapi/v2/positionRisk returned {}: {}", status, body);
        }

        let entries = body.as_array().context("positionRisk response is not an array")?;
        let entry = entries
            .first()
            .context("positionRisk response has no entries for symbol")?;

        let entry_price = Self::parse_str_f64(&entry["entryPrice"])?;
        let position_amt = Self::parse_str_f64(&entry["positionAmt"])?;

        debug!(symbol, entry_price, position_amt, "position snapshot fetched");
        Ok((entry_price, position_amt))
    }

    /// POST /fapi/v1/leverage (signed) — set leverage for `symbol`.
    #[instrument(skip(self), name = "binance::set_leverage")]
    pub async fn set_leverage(&self, symbol: &str, leverage: u32) -> Result<()> {
        let params = format!("symbol={symbol}&leverage={leverage}");
        let qs = self.signed_query(&params);
        let url = format!("{}/fapi/v1/leverage?{}", self.base_url, qs);

        let resp = self
            .client
            .post(&url)
            .send()
            .await
            .context("POST /fapi/v1/leverage request failed")?;

        self.record_weight(resp.headers());
        let status = resp.status();
        let body: serde_json::Value = resp
            .json()
            .await
            .context("failed to parse leverage response")?;

        if !status.is_success() {
            anyhow::bail!("Binance POST /fapi/v1/leverage returned {}: {}", status, body);
        }

        debug!(symbol, leverage, "leverage set");
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Orders
    // -------------------------------------------------------------------------

    /// POST /fapi/v1/order (signed) — submit a market order, returning the
    /// venue order id as a string.
    #[instrument(skip(self), name = "binance::submit_market_order")]
    pub async fn submit_market_order(
        &self,
        symbol: &str,
        side: Side,
        contracts: f64,
        reduce_only: bool,
    ) -> Result<String> {
        let mut params = format!(
            "symbol={symbol}&side={}&type=MARKET&quantity={contracts}",
            side_str(side)
        );
        if reduce_only {
            params.push_str("&reduceOnly=true");
        }

        let qs = self.signed_query(&params);
        let url = format!("{}/fapi/v1/order?{}", self.base_url, qs);

        debug!(symbol, side = %side, contracts, reduce_only, "submitting market order");

        let resp = self
            .client
            .post(&url)
            .send()
            .await
            .context("POST /fapi/v1/order (market) request failed")?;

        self.record_weight(resp.headers());
        self.tracker.record_order_sent();
        let status = resp.status();
        let body: serde_json::Value = resp
            .json()
            .await
            .context("failed to parse market order response")?;

        if !status.is_success() {
            anyhow::bail!("Binance POST /fapi/v1/order (market) returned {}: {}", status, body);
        }

        let order_id = body["orderId"]
            .as_u64()
            .context("market order response missing orderId")?;

        debug!(symbol, order_id, "market order submitted");
        Ok(order_id.to_string())
    }

    /// POST /fapi/v1/order (signed) — place a stop-market, take-profit-market,
    /// or trailing-stop-market conditional order, `closePosition=true` style
    /// except when `size` is a partial fraction of the position (the TP
    /// ladder's rungs), in which case a reduce-only `quantity` is sent
    /// instead so partial rungs coexist with the rest of the position.
    #[instrument(skip(self), name = "binance::place_conditional_order")]
    pub async fn place_conditional_order(
        &self,
        symbol: &str,
        close_side: Side,
        kind: ConditionalOrderKind,
        trigger_price: f64,
        size: f64,
        ref_type: RefType,
        callback_ratio: Option<f64>,
    ) -> Result<String> {
        let mut params = format!(
            "symbol={symbol}&side={}&type={}&workingType={}&quantity={size}&reduceOnly=true",
            side_str(close_side),
            kind.as_venue_type(),
            working_type(ref_type),
        );

        match kind {
            ConditionalOrderKind::TrailingStopMarket => {
                let ratio = callback_ratio
                    .context("trailing stop requires a callback_ratio")?
                    * 100.0;
                params.push_str(&format!("&callbackRate={ratio}&activationPrice={trigger_price}"));
            }
            ConditionalOrderKind::StopMarket | ConditionalOrderKind::TakeProfitMarket => {
                params.push_str(&format!("&stopPrice={trigger_price}"));
            }
        }

        let qs = self.signed_query(&params);
        let url = format!("{}/fapi/v1/order?{}", self.base_url, qs);

        debug!(symbol, ?kind, trigger_price, size, "placing conditional order");

        let resp = self
            .client
            .post(&url)
            .send()
            .await
            .context("POST /fapi/v1/order (conditional) request failed")?;

        self.record_weight(resp.headers());
        self.tracker.record_order_sent();
        let status = resp.status();
        let body: serde_json::Value = resp
            .json()
            .await
            .context("failed to parse conditional order response")?;

        if !status.is_success() {
            anyhow::bail!("Binance POST /fapi/v1/order (conditional) returned {}: {}", status, body);
        }

        let order_id = body["orderId"]
            .as_u64()
            .context("conditional order response missing orderId")?;

        debug!(symbol, order_id, "conditional order placed");
        Ok(order_id.to_string())
    }

    /// DELETE /fapi/v1/order (signed) — cancel an existing order by its
    /// venue order id (passed as a string; the router never deals in the raw
    /// `u64`).
    #[instrument(skip(self), name = "binance::cancel_order")]
    pub async fn cancel_order(&self, symbol: &str, exchange_id: &str) -> Result<()> {
        let params = format!("symbol={symbol}&orderId={exchange_id}");
        let qs = self.signed_query(&params);
        let url = format!("{}/fapi/v1/order?{}", self.base_url, qs);

        debug!(symbol, exchange_id, "cancelling order");

        let resp = self
            .client
            .delete(&url)
            .send()
            .await
            .context("DELETE /fapi/v1/order request failed")?;

        self.record_weight(resp.headers());
        let status = resp.status();
        let body: serde_json::Value = resp
            .json()
            .await
            .context("failed to parse cancel response")?;

        // Binance returns -2011 ("Unknown order sent") when the order already
        // triggered or was cancelled elsewhere; that's not a router failure.
        if !status.is_success() && body["code"].as_i64() != Some(-2011) {
            anyhow::bail!("Binance DELETE /fapi/v1/order returned {}: {}", status, body);
        }

        debug!(symbol, exchange_id, "order cancelled");
        Ok(())
    }

    /// GET /fapi/v1/openOrders (signed) — list resting orders for `symbol`,
    /// filtered down to conditional order kinds the router understands.
    #[instrument(skip(self), name = "binance::list_conditional_orders")]
    pub async fn list_conditional_orders(&self, symbol: &str) -> Result<Vec<ConditionalOrderInfo>> {
        let params = format!("symbol={symbol}");
        let qs = self.signed_query(&params);
        let url = format!("{}/fapi/v1/openOrders?{}", self.base_url, qs);

        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .context("GET /fapi/v1/openOrders request failed")?;

        self.record_weight(resp.headers());
        let status = resp.status();
        let body: serde_json::Value = resp
            .json()
            .await
            .context("failed to parse openOrders response")?;

        if !status.is_success() {
            anyhow::bail!("Binance GET /fapi/v1/openOrders returned {}: {}", status, body);
        }

        let raw = body.as_array().cloned().unwrap_or_default();
        let mut orders = Vec::with_capacity(raw.len());
        for entry in raw {
            let Some(order_type) = entry["type"].as_str() else { continue };
            if ConditionalOrderKind::from_venue_type(order_type).is_none() {
                continue;
            }
            let exchange_id = entry["orderId"]
                .as_u64()
                .map(|id| id.to_string())
                .context("open order missing orderId")?;
            let trigger_price = Self::parse_str_f64(&entry["stopPrice"]).unwrap_or(0.0);
            orders.push(ConditionalOrderInfo {
                exchange_id,
                order_type: order_type.to_string(),
                trigger_price,
            });
        }

        debug!(symbol, count = orders.len(), "conditional orders listed");
        Ok(orders)
    }

    // -------------------------------------------------------------------------
    // Public market data
    // -------------------------------------------------------------------------

    /// GET /fapi/v1/klines (public — no signature required).
    ///
    /// Returns a vector of [`Candle`] structs parsed from Binance's array-of-
    /// arrays response format.
    ///
    /// Array indices:
    ///   [0] openTime, [1] open, [2] high, [3] low, [4] close, [5] volume,
    ///   [6] closeTime, [7] quoteAssetVolume, [8] numberOfTrades,
    ///   [9] takerBuyBaseVolume, [10] takerBuyQuoteVolume
    #[instrument(skip(self), name = "binance::get_klines")]
    pub async fn get_klines(&self, symbol: &str, interval: &str, limit: u32) -> Result<Vec<Candle>> {
        let url = format!(
            "{}/fapi/v1/klines?symbol={}&interval={}&limit={}",
            self.base_url, symbol, interval, limit
        );

        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .context("GET /fapi/v1/klines request failed")?;

        let status = resp.status();
        let body: serde_json::Value = resp
            .json()
            .await
            .context("failed to parse klines response")?;

        if !status.is_success() {
            anyhow::bail!("Binance GET /fapi/v1/klines returned {}: {}", status, body);
        }

        let raw = body.as_array().context("klines response is not an array")?;

        let mut candles = Vec::with_capacity(raw.len());

        for entry in raw {
            let arr = entry.as_array().context("kline entry is not an array")?;

            if arr.len() < 11 {
                warn!("skipping malformed kline entry with {} elements", arr.len());
                continue;
            }

            let open_time = arr[0].as_i64().unwrap_or(0);
            let open = Self::parse_str_f64(&arr[1])?;
            let high = Self::parse_str_f64(&arr[2])?;
            let low = Self::parse_str_f64(&arr[3])?;
            let close = Self::parse_str_f64(&arr[4])?;
            let volume = Self::parse_str_f64(&arr[5])?;
            let close_time = arr[6].as_i64().unwrap_or(0);
            let quote_volume = Self::parse_str_f64(&arr[7]).unwrap_or(0.0);
            let trades_count = arr[8].as_u64().unwrap_or(0);
            let taker_buy_volume = Self::parse_str_f64(&arr[9]).unwrap_or(0.0);
            let taker_buy_quote_volume = Self::parse_str_f64(&arr[10]).unwrap_or(0.0);

            candles.push(Candle {
                open_time,
                close_time,
                open,
                high,
                low,
                close,
                volume,
                quote_volume,
                trades_count,
                taker_buy_volume,
                taker_buy_quote_volume,
                is_closed: true,
            });
        }

        debug!(symbol, interval, count = candles.len(), "klines fetched");
        Ok(candles)
    }

    /// GET /fapi/v1/exchangeInfo filtered by symbol — raw JSON; the caller
    /// (symbol metadata loader) parses out tick size, lot size, and max
    /// leverage from the `filters`/`leverageBracket` shape.
    #[instrument(skip(self), name = "binance::get_symbol_info")]
    pub async fn get_symbol_info(&self, symbol: &str) -> Result<serde_json::Value> {
        let url = format!("{}/fapi/v1/exchangeInfo", self.base_url);

        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .context("GET /fapi/v1/exchangeInfo request failed")?;

        let status = resp.status();
        let body: serde_json::Value = resp
            .json()
            .await
            .context("failed to parse exchangeInfo response")?;

        if !status.is_success() {
            anyhow::bail!("Binance GET /fapi/v1/exchangeInfo returned {}: {}", status, body);
        }

        let info = body["symbols"]
            .as_array()
            .and_then(|arr| arr.iter().find(|s| s["symbol"].as_str() == Some(symbol)))
            .cloned()
            .context("symbol not found in exchangeInfo response")?;

        debug!(symbol, "symbol info retrieved");
        Ok(info)
    }

    /// GET /fapi/v1/ticker/bookTicker (public) — best bid/ask price and size,
    /// used by the universe gate's spread and depth checks. Returns
    /// `(bid_price, ask_price, bid_qty, ask_qty)`.
    #[instrument(skip(self), name = "binance::get_book_ticker")]
    pub async fn get_book_ticker(&self, symbol: &str) -> Result<(f64, f64, f64, f64)> {
        let url = format!("{}/fapi/v1/ticker/bookTicker?symbol={}", self.base_url, symbol);

        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .context("GET /fapi/v1/ticker/bookTicker request failed")?;

        let status = resp.status();
        let body: serde_json::Value = resp
            .json()
            .await
            .context("failed to parse bookTicker response")?;

        if !status.is_success() {
            anyhow::bail!("Binance GET /fapi/v1/ticker/bookTicker returned {}: {}", status, body);
        }

        let bid = Self::parse_str_f64(&body["bidPrice"])?;
        let ask = Self::parse_str_f64(&body["askPrice"])?;
        let bid_qty = Self::parse_str_f64(&body["bidQty"]).unwrap_or(0.0);
        let ask_qty = Self::parse_str_f64(&body["askQty"]).unwrap_or(0.0);
        Ok((bid, ask, bid_qty, ask_qty))
    }

    /// GET /fapi/v1/ticker/24hr (public) — 24h quote volume, used by the
    /// universe gate's liquidity floor.
    #[instrument(skip(self), name = "binance::get_24h_quote_volume")]
    pub async fn get_24h_quote_volume(&self, symbol: &str) -> Result<f64> {
        let url = format!("{}/fapi/v1/ticker/24hr?symbol={}", self.base_url, symbol);

        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .context("GET /fapi/v1/ticker/24hr request failed")?;

        let status = resp.status();
        let body: serde_json::Value = resp
            .json()
            .await
            .context("failed to parse 24hr ticker response")?;

        if !status.is_success() {
            anyhow::bail!("Binance GET /fapi/v1/ticker/24hr returned {}: {}", status, body);
        }

        Self::parse_str_f64(&body["quoteVolume"])
    }

    // -------------------------------------------------------------------------
    // Internal helpers
    // -------------------------------------------------------------------------

    /// Parse a JSON value that may be either a string or a number into `f64`.
    fn parse_str_f64(val: &serde_json::Value) -> Result<f64> {
        if let Some(s) = val.as_str() {
            s.parse::<f64>()
                .with_context(|| format!("failed to parse '{s}' as f64"))
        } else if let Some(n) = val.as_f64() {
            Ok(n)
        } else {
            anyhow::bail!("expected string or number, got: {val}")
        }
    }
}

impl std::fmt::Debug for BinanceClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BinanceClient")
            .field("api_key", &"<redacted>")
            .field("secret", &"<redacted>")
            .field("base_url", &self.base_url)
            .finish()
    }
}
