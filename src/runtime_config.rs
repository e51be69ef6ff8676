// =============================================================================
// Runtime Configuration — hot-reloadable engine settings with atomic save
// =============================================================================
//
// Every tunable named in spec.md §"Configuration surface" lives here, kept
// in the teacher's load/save shape: `#[serde(default = "...")]` on every
// field so an older config file on disk still deserializes after a field is
// added, and an atomic tmp-then-rename write so a crash mid-save can never
// corrupt the file in place. Grounded on `original_source/config.py`'s
// `SYSTEM_CONFIG` dict for the concrete default values.
//
// The score-config (factor weights + thresholds) is a narrower, separately
// hot-swappable surface — see `scoring.rs::ScoreConfigHandle` — saved
// through the same atomic-write helper exposed here as `atomic_write_json`.
// =============================================================================

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

fn default_symbol() -> String {
    "GOLD".to_string()
}

fn default_webhook_port() -> u16 {
    8080
}

fn default_max_positions() -> usize {
    1
}

fn default_min_free_margin() -> f64 {
    500.0
}

fn default_risk_percent() -> f64 {
    2.0
}

fn default_atr_sl_multiplier() -> f64 {
    2.0
}

fn default_atr_tp_multiplier() -> f64 {
    3.0
}

fn default_max_sl_usd() -> f64 {
    80.0
}

fn default_min_sl_usd() -> f64 {
    8.0
}

fn default_atr_volatility_max() -> f64 {
    30.0
}

fn default_atr_volatility_min() -> f64 {
    3.0
}

fn default_max_daily_loss_percent() -> f64 {
    -10.0
}

fn default_max_consecutive_losses() -> u32 {
    3
}

fn default_reset_hours() -> i64 {
    24
}

fn default_gap_block_threshold_usd() -> f64 {
    15.0
}

fn default_collection_window_ms() -> u64 {
    500
}

fn default_signal_buffer_size() -> usize {
    50
}

fn default_partial_close_ratio() -> f64 {
    0.5
}

fn default_partial_tp_atr_mult() -> f64 {
    2.0
}

fn default_be_trigger_atr_mult() -> f64 {
    1.0
}

fn default_be_buffer_usd() -> f64 {
    2.0
}

fn default_trailing_step_atr_mult() -> f64 {
    1.5
}

fn default_pm_check_interval_sec() -> u64 {
    10
}

fn default_health_check_interval_sec() -> u64 {
    60
}

fn default_eod_close_hour_utc() -> u32 {
    23
}

fn default_eod_close_minute_utc() -> u32 {
    30
}

// =============================================================================
// NewsFilterConfig
// =============================================================================

/// Pending-news blackout window (spec.md §"Configuration surface":
/// "news-filter toggles").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewsFilterConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_news_block_before_min")]
    pub block_before_min: i64,
    #[serde(default = "default_news_block_after_min")]
    pub block_after_min: i64,
    #[serde(default = "default_news_target_currencies")]
    pub target_currencies: Vec<String>,
    #[serde(default = "default_news_min_impact")]
    pub min_impact: String,
}

fn default_true() -> bool {
    true
}

fn default_news_block_before_min() -> i64 {
    30
}

fn default_news_block_after_min() -> i64 {
    30
}

fn default_news_target_currencies() -> Vec<String> {
    vec!["USD".to_string(), "EUR".to_string()]
}

fn default_news_min_impact() -> String {
    "high".to_string()
}

impl Default for NewsFilterConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            block_before_min: default_news_block_before_min(),
            block_after_min: default_news_block_after_min(),
            target_currencies: default_news_target_currencies(),
            min_impact: default_news_min_impact(),
        }
    }
}

// =============================================================================
// RuntimeConfig
// =============================================================================

/// Top-level runtime configuration for the engine. Every field has a serde
/// default so older JSON files missing new fields still deserialize.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Broker-side instrument name (`config.py`: "XMTrading のシンボル名").
    #[serde(default = "default_symbol")]
    pub symbol: String,

    #[serde(default = "default_webhook_port")]
    pub webhook_port: u16,

    /// Broker account identifier, read from the environment rather than
    /// stored in plaintext config (spec.md: "broker credentials").
    #[serde(default)]
    pub broker_account_env: Option<String>,

    #[serde(default = "default_max_positions")]
    pub max_positions: usize,

    #[serde(default = "default_min_free_margin")]
    pub min_free_margin: f64,

    #[serde(default = "default_risk_percent")]
    pub risk_percent: f64,

    #[serde(default = "default_atr_sl_multiplier")]
    pub atr_sl_multiplier: f64,

    #[serde(default = "default_atr_tp_multiplier")]
    pub atr_tp_multiplier: f64,

    #[serde(default = "default_max_sl_usd")]
    pub max_sl_usd: f64,

    #[serde(default = "default_min_sl_usd")]
    pub min_sl_usd: f64,

    #[serde(default = "default_atr_volatility_max")]
    pub atr_volatility_max: f64,

    #[serde(default = "default_atr_volatility_min")]
    pub atr_volatility_min: f64,

    #[serde(default = "default_max_daily_loss_percent")]
    pub max_daily_loss_percent: f64,

    #[serde(default = "default_max_consecutive_losses")]
    pub max_consecutive_losses: u32,

    #[serde(default = "default_reset_hours")]
    pub reset_hours: i64,

    #[serde(default = "default_gap_block_threshold_usd")]
    pub gap_block_threshold_usd: f64,

    /// Debounce window `W` the Collector batches entry/structure signals
    /// within before handing a closed batch to the Dispatcher.
    #[serde(default = "default_collection_window_ms")]
    pub collection_window_ms: u64,

    #[serde(default = "default_signal_buffer_size")]
    pub signal_buffer_size: usize,

    #[serde(default)]
    pub news_filter: NewsFilterConfig,

    #[serde(default = "default_partial_close_ratio")]
    pub partial_close_ratio: f64,

    #[serde(default = "default_partial_tp_atr_mult")]
    pub partial_tp_atr_mult: f64,

    #[serde(default = "default_be_trigger_atr_mult")]
    pub be_trigger_atr_mult: f64,

    #[serde(default = "default_be_buffer_usd")]
    pub be_buffer_usd: f64,

    #[serde(default = "default_trailing_step_atr_mult")]
    pub trailing_step_atr_mult: f64,

    #[serde(default = "default_pm_check_interval_sec")]
    pub pm_check_interval_sec: u64,

    #[serde(default = "default_health_check_interval_sec")]
    pub health_check_interval_sec: u64,

    #[serde(default = "default_eod_close_hour_utc")]
    pub eod_close_hour_utc: u32,

    #[serde(default = "default_eod_close_minute_utc")]
    pub eod_close_minute_utc: u32,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            symbol: default_symbol(),
            webhook_port: default_webhook_port(),
            broker_account_env: None,
            max_positions: default_max_positions(),
            min_free_margin: default_min_free_margin(),
            risk_percent: default_risk_percent(),
            atr_sl_multiplier: default_atr_sl_multiplier(),
            atr_tp_multiplier: default_atr_tp_multiplier(),
            max_sl_usd: default_max_sl_usd(),
            min_sl_usd: default_min_sl_usd(),
            atr_volatility_max: default_atr_volatility_max(),
            atr_volatility_min: default_atr_volatility_min(),
            max_daily_loss_percent: default_max_daily_loss_percent(),
            max_consecutive_losses: default_max_consecutive_losses(),
            reset_hours: default_reset_hours(),
            gap_block_threshold_usd: default_gap_block_threshold_usd(),
            collection_window_ms: default_collection_window_ms(),
            signal_buffer_size: default_signal_buffer_size(),
            news_filter: NewsFilterConfig::default(),
            partial_close_ratio: default_partial_close_ratio(),
            partial_tp_atr_mult: default_partial_tp_atr_mult(),
            be_trigger_atr_mult: default_be_trigger_atr_mult(),
            be_buffer_usd: default_be_buffer_usd(),
            trailing_step_atr_mult: default_trailing_step_atr_mult(),
            pm_check_interval_sec: default_pm_check_interval_sec(),
            health_check_interval_sec: default_health_check_interval_sec(),
            eod_close_hour_utc: default_eod_close_hour_utc(),
            eod_close_minute_utc: default_eod_close_minute_utc(),
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
        info!(path = %path.display(), symbol = %config.symbol, "runtime config loaded");
        Ok(config)
    }

    /// Persist the current configuration to `path` using an atomic write.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let content = serde_json::to_string_pretty(self).context("failed to serialize runtime config to JSON")?;
        atomic_write_json(path, &content)
    }
}

/// Write to a temporary sibling file, then rename — used for both the
/// runtime config and the score-config file so neither can be left
/// half-written on crash.
pub fn atomic_write_json(path: impl AsRef<Path>, content: &str) -> Result<()> {
    let path = path.as_ref();
    let tmp_path = path.with_extension("json.tmp");
    std::fs::write(&tmp_path, content).with_context(|| format!("failed to write tmp config to {}", tmp_path.display()))?;
    std::fs::rename(&tmp_path, path).with_context(|| format!("failed to rename tmp config to {}", path.display()))?;
    info!(path = %path.display(), "config saved (atomic)");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_documented_defaults() {
        let cfg = RuntimeConfig::default();
        assert_eq!(cfg.symbol, "GOLD");
        assert_eq!(cfg.max_positions, 1);
        assert!((cfg.risk_percent - 2.0).abs() < f64::EPSILON);
        assert!((cfg.atr_sl_multiplier - 2.0).abs() < f64::EPSILON);
        assert!((cfg.max_daily_loss_percent + 10.0).abs() < f64::EPSILON);
        assert_eq!(cfg.max_consecutive_losses, 3);
        assert_eq!(cfg.eod_close_hour_utc, 23);
        assert_eq!(cfg.eod_close_minute_utc, 30);
        assert!(cfg.news_filter.enabled);
    }

    #[test]
    fn deserialize_empty_json_uses_defaults() {
        let cfg: RuntimeConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.symbol, "GOLD");
        assert_eq!(cfg.signal_buffer_size, 50);
        assert_eq!(cfg.collection_window_ms, 500);
    }

    #[test]
    fn deserialize_partial_json_fills_defaults() {
        let json = r#"{ "symbol": "SILVER", "risk_percent": 1.0 }"#;
        let cfg: RuntimeConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.symbol, "SILVER");
        assert!((cfg.risk_percent - 1.0).abs() < f64::EPSILON);
        assert_eq!(cfg.max_positions, 1);
    }

    #[test]
    fn roundtrip_serialization() {
        let cfg = RuntimeConfig::default();
        let json = serde_json::to_string(&cfg).unwrap();
        let cfg2: RuntimeConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(cfg.symbol, cfg2.symbol);
        assert_eq!(cfg.max_positions, cfg2.max_positions);
        assert_eq!(cfg.eod_close_hour_utc, cfg2.eod_close_hour_utc);
    }

    #[test]
    fn save_then_load_roundtrips_through_disk() {
        let dir = std::env::temp_dir().join(format!("aurum-engine-test-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("runtime_config.json");

        let mut cfg = RuntimeConfig::default();
        cfg.symbol = "PLATINUM".to_string();
        cfg.save(&path).unwrap();

        let loaded = RuntimeConfig::load(&path).unwrap();
        assert_eq!(loaded.symbol, "PLATINUM");

        std::fs::remove_dir_all(&dir).ok();
    }
}
