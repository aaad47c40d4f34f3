// =============================================================================
// Runtime configuration — hot-reloadable engine settings with atomic save
// =============================================================================
//
// Central configuration hub for the trading engine. Every tunable lives here
// so the engine can be reconfigured without a restart. Persistence uses an
// atomic tmp + rename pattern to prevent corruption on crash; every field
// carries a serde default so an older config file on disk never fails to
// load after a field is added.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::regime::detector::RegimeConfig;
use crate::risk::RiskEngineConfig;
use crate::strategy::EvaluatorConfig;
use crate::types::TradingMode;
use crate::universe::UniverseConfig;

fn default_symbols() -> Vec<String> {
    vec![
        "BTCUSDT".to_string(),
        "ETHUSDT".to_string(),
        "BNBUSDT".to_string(),
        "XRPUSDT".to_string(),
        "SOLUSDT".to_string(),
    ]
}

fn default_scan_interval_seconds() -> u64 {
    5
}

fn default_monitor_interval_seconds() -> u64 {
    2
}

fn default_sl_verify_seconds() -> u64 {
    60
}

fn default_tp_sl_max_attempts() -> u32 {
    5
}

fn default_tp_sl_backoff_base_seconds() -> u64 {
    2
}

fn default_funding_blackout_seconds() -> i64 {
    120
}

fn default_max_symbols_concurrent() -> usize {
    3
}

fn default_max_per_sector() -> usize {
    2
}

fn default_reconcile_grace_seconds() -> i64 {
    30
}

fn default_position_retain_ms() -> i64 {
    86_400_000
}

fn default_symbol_meta_refresh_seconds() -> u64 {
    3600
}

fn default_primary_timeframe() -> String {
    "5m".to_string()
}

fn default_session_timeframe() -> String {
    "1m".to_string()
}

fn default_candle_lookback() -> u32 {
    300
}

/// Concurrency caps and timing cadence for the scan/monitor loops (spec
/// §4.8 / §5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConcurrencyConfig {
    #[serde(default = "default_max_symbols_concurrent")]
    pub max_symbols_concurrent: usize,
    #[serde(default = "default_max_per_sector")]
    pub max_per_sector: usize,
    #[serde(default = "default_funding_blackout_seconds")]
    pub funding_blackout_seconds: i64,
    #[serde(default = "default_scan_interval_seconds")]
    pub scan_interval_seconds: u64,
    #[serde(default = "default_monitor_interval_seconds")]
    pub monitor_interval_seconds: u64,
    #[serde(default = "default_sl_verify_seconds")]
    pub sl_verify_seconds: u64,
    #[serde(default = "default_tp_sl_max_attempts")]
    pub tp_sl_max_attempts: u32,
    #[serde(default = "default_tp_sl_backoff_base_seconds")]
    pub tp_sl_backoff_base_seconds: u64,
    #[serde(default = "default_reconcile_grace_seconds")]
    pub reconcile_grace_seconds: i64,
    #[serde(default = "default_position_retain_ms")]
    pub position_retain_ms: i64,
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            max_symbols_concurrent: default_max_symbols_concurrent(),
            max_per_sector: default_max_per_sector(),
            funding_blackout_seconds: default_funding_blackout_seconds(),
            scan_interval_seconds: default_scan_interval_seconds(),
            monitor_interval_seconds: default_monitor_interval_seconds(),
            sl_verify_seconds: default_sl_verify_seconds(),
            tp_sl_max_attempts: default_tp_sl_max_attempts(),
            tp_sl_backoff_base_seconds: default_tp_sl_backoff_base_seconds(),
            reconcile_grace_seconds: default_reconcile_grace_seconds(),
            position_retain_ms: default_position_retain_ms(),
        }
    }
}

/// Top-level runtime configuration for the trading engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Current trading mode: Live, Paused, or Killed. Paused/Killed suppress
    /// new entries only; exits and the monitor loop always run.
    #[serde(default)]
    pub trading_mode: TradingMode,

    /// Symbols the engine scans and trades.
    #[serde(default = "default_symbols")]
    pub symbols: Vec<String>,

    #[serde(default = "default_symbol_meta_refresh_seconds")]
    pub symbol_meta_refresh_seconds: u64,

    /// Strategy evaluation timeframe fed to the indicator engine.
    #[serde(default = "default_primary_timeframe")]
    pub primary_timeframe: String,

    /// Finer-grained timeframe used only for VWAP/session-level computation.
    #[serde(default = "default_session_timeframe")]
    pub session_timeframe: String,

    /// Candles fetched per poll, per timeframe.
    #[serde(default = "default_candle_lookback")]
    pub candle_lookback: u32,

    #[serde(default)]
    pub concurrency: ConcurrencyConfig,

    #[serde(default)]
    pub risk: RiskEngineConfig,

    #[serde(default)]
    pub universe: UniverseConfig,

    #[serde(default)]
    pub regime: RegimeConfig,

    #[serde(default)]
    pub strategy: EvaluatorConfig,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            trading_mode: TradingMode::Paused,
            symbols: default_symbols(),
            symbol_meta_refresh_seconds: default_symbol_meta_refresh_seconds(),
            primary_timeframe: default_primary_timeframe(),
            session_timeframe: default_session_timeframe(),
            candle_lookback: default_candle_lookback(),
            concurrency: ConcurrencyConfig::default(),
            risk: RiskEngineConfig::default(),
            universe: UniverseConfig::default(),
            regime: RegimeConfig::default(),
            strategy: EvaluatorConfig::default(),
        }
    }
}

impl RuntimeConfig {
    /// Load configuration from a JSON file at `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read runtime config from {}", path.display()))?;

        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse runtime config from {}", path.display()))?;

        info!(
            path = %path.display(),
            symbols = ?config.symbols,
            trading_mode = %config.trading_mode,
            "runtime config loaded"
        );

        Ok(config)
    }

    /// Persist the current configuration to `path` using an atomic write
    /// (write to `.tmp`, then rename) so a crash mid-write never leaves a
    /// corrupt file behind.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        let content = serde_json::to_string_pretty(self)
            .context("failed to serialise runtime config to JSON")?;

        let tmp_path = path.with_extension("json.tmp");

        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp config to {}", tmp_path.display()))?;

        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp config to {}", path.display()))?;

        info!(path = %path.display(), "runtime config saved (atomic)");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_expected_values() {
        let cfg = RuntimeConfig::default();
        assert_eq!(cfg.trading_mode, TradingMode::Paused);
        assert_eq!(cfg.symbols.len(), 5);
        assert_eq!(cfg.symbols[0], "BTCUSDT");
        assert_eq!(cfg.concurrency.max_symbols_concurrent, 3);
        assert_eq!(cfg.concurrency.max_per_sector, 2);
        assert_eq!(cfg.concurrency.scan_interval_seconds, 5);
        assert_eq!(cfg.concurrency.monitor_interval_seconds, 2);
        assert_eq!(cfg.concurrency.tp_sl_max_attempts, 5);
    }

    #[test]
    fn deserialise_empty_json_uses_defaults() {
        let cfg: RuntimeConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.trading_mode, TradingMode::Paused);
        assert_eq!(cfg.concurrency.funding_blackout_seconds, 120);
        assert_eq!(cfg.concurrency.sl_verify_seconds, 60);
    }

    #[test]
    fn deserialise_partial_json_fills_defaults() {
        let json = r#"{ "trading_mode": "Live", "symbols": ["ETHUSDT"] }"#;
        let cfg: RuntimeConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.trading_mode, TradingMode::Live);
        assert_eq!(cfg.symbols, vec!["ETHUSDT"]);
        assert_eq!(cfg.concurrency.max_symbols_concurrent, 3);
    }

    #[test]
    fn roundtrip_serialisation() {
        let cfg = RuntimeConfig::default();
        let json = serde_json::to_string(&cfg).unwrap();
        let cfg2: RuntimeConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(cfg.symbols, cfg2.symbols);
        assert_eq!(cfg.concurrency.max_symbols_concurrent, cfg2.concurrency.max_symbols_concurrent);
        assert_eq!(cfg.trading_mode, cfg2.trading_mode);
    }
}
