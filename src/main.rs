// =============================================================================
// Entry point
// =============================================================================
//
// Starts in Paused trading mode regardless of what's in the config file —
// operators flip to Live explicitly once they've confirmed recovery looked
// sane. Startup order: load config, build the exchange client and shared
// state, recover any exchange-resident positions, run one cold-start scan,
// then hand off to the scan/monitor loops.

mod api;
mod app_state;
mod binance;
mod coordinator;
mod error;
mod indicators;
mod market_data;
mod order_router;
mod position_engine;
mod regime;
mod risk;
mod runtime_config;
mod strategy;
mod symbol;
mod types;
mod universe;

use std::sync::Arc;

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::app_state::AppState;
use crate::binance::client::BinanceClient;
use crate::coordinator::{spawn_monitor_loop, spawn_scan_loop, Coordinator};
use crate::runtime_config::RuntimeConfig;
use crate::types::TradingMode;

const CONFIG_PATH: &str = "runtime_config.json";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("perpetual-engine starting up");

    let mut config = RuntimeConfig::load(CONFIG_PATH).unwrap_or_else(|e| {
        warn!(error = %e, "failed to load runtime config, using defaults");
        RuntimeConfig::default()
    });

    // Always start paused; a previous crash mid-trade should never resume
    // live trading silently.
    config.trading_mode = TradingMode::Paused;

    if let Ok(syms) = std::env::var("ENGINE_SYMBOLS") {
        let symbols: Vec<String> = syms
            .split(',')
            .map(|s| s.trim().to_uppercase())
            .filter(|s| !s.is_empty())
            .collect();
        if !symbols.is_empty() {
            config.symbols = symbols;
        }
    }

    info!(symbols = ?config.symbols, trading_mode = %config.trading_mode, "runtime config ready");

    let api_key = std::env::var("BINANCE_API_KEY").unwrap_or_default();
    let api_secret = std::env::var("BINANCE_API_SECRET").unwrap_or_default();
    if api_key.is_empty() || api_secret.is_empty() {
        warn!("BINANCE_API_KEY / BINANCE_API_SECRET not set — signed requests will be rejected by the venue");
    }
    let client = Arc::new(BinanceClient::new(api_key, api_secret));

    let state = Arc::new(AppState::new(config, CONFIG_PATH.to_string(), client));
    let coordinator = Arc::new(Coordinator::new(state.clone()));

    info!("recovering exchange-resident positions");
    coordinator.recover().await;

    info!("running cold-start scan");
    coordinator.scan_once().await;

    let scan_handle = spawn_scan_loop(coordinator.clone());
    let monitor_handle = spawn_monitor_loop(coordinator.clone());

    let bind_addr = std::env::var("ENGINE_BIND_ADDR").unwrap_or_else(|_| "127.0.0.1:8080".to_string());
    let http_state = state.clone();
    tokio::spawn(async move {
        let app = api::rest::router(http_state);
        match tokio::net::TcpListener::bind(&bind_addr).await {
            Ok(listener) => {
                info!(addr = %bind_addr, "status surface listening");
                if let Err(e) = axum::serve(listener, app).await {
                    error!(error = %e, "status surface exited");
                }
            }
            Err(e) => error!(addr = %bind_addr, error = %e, "failed to bind status surface"),
        }
    });

    info!("all subsystems running, trading mode Paused — flip to Live in the config to start entries");

    tokio::signal::ctrl_c().await?;
    warn!("shutdown signal received");

    scan_handle.abort();
    coordinator.request_shutdown();
    let _ = monitor_handle.await;

    if let Err(e) = state.config.read().save(CONFIG_PATH) {
        error!(error = %e, "failed to save runtime config on shutdown");
    }

    info!("perpetual-engine shut down complete");
    Ok(())
}
