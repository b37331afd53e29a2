// =============================================================================
// Runtime Configuration — chart feed settings with atomic save
// =============================================================================
//
// Every field carries a serde default so an older or partial config file
// always loads. Environment variables (read after `.env` is loaded) override
// the file for the settings most often changed per deployment:
//
//   CHART_SYMBOL, CHART_INTERVAL, CHART_BIND_ADDR, CHART_FIXTURE
//
// Persistence uses an atomic tmp + rename pattern to prevent corruption on
// crash.
// =============================================================================

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::chart_state::normalize_symbol;
use crate::market_data::binance::{DEFAULT_REST_BASE_URL, DEFAULT_WS_BASE_URL};
use crate::market_data::{ReconnectPolicy, DEFAULT_WINDOW_CAPACITY, MAX_HISTORY_LIMIT};
use crate::types::Interval;

/// Default config file name, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "chart_feed.json";

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_symbol() -> String {
    "BTCUSDT".to_string()
}

fn default_history_limit() -> u32 {
    MAX_HISTORY_LIMIT
}

fn default_window_capacity() -> usize {
    DEFAULT_WINDOW_CAPACITY
}

fn default_rest_base_url() -> String {
    DEFAULT_REST_BASE_URL.to_string()
}

fn default_ws_base_url() -> String {
    DEFAULT_WS_BASE_URL.to_string()
}

fn default_http_timeout_secs() -> u64 {
    10
}

fn default_history_retry_secs() -> u64 {
    5
}

fn default_bind_addr() -> String {
    "0.0.0.0:3001".to_string()
}

fn default_enabled_indicators() -> Vec<String> {
    vec!["emaCross".to_string()]
}

// =============================================================================
// RuntimeConfig
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    // --- Market ---------------------------------------------------------------
    /// Trading pair shown at startup.
    #[serde(default = "default_symbol")]
    pub symbol: String,

    #[serde(default)]
    pub interval: Interval,

    /// Candles requested per history fetch (clamped to 1..=1000).
    #[serde(default = "default_history_limit")]
    pub history_limit: u32,

    /// Maximum candles kept in the rolling window.
    #[serde(default = "default_window_capacity")]
    pub window_capacity: usize,

    // --- Upstream -------------------------------------------------------------
    #[serde(default = "default_rest_base_url")]
    pub rest_base_url: String,

    #[serde(default = "default_ws_base_url")]
    pub ws_base_url: String,

    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,

    /// Streaming reconnect backoff.
    #[serde(default)]
    pub reconnect: ReconnectPolicy,

    /// Delay before a failed history fetch is retried.
    #[serde(default = "default_history_retry_secs")]
    pub history_retry_secs: u64,

    /// When set, market data is replayed from this recorded fixture instead
    /// of the exchange.
    #[serde(default)]
    pub fixture_path: Option<PathBuf>,

    // --- Consumer API ---------------------------------------------------------
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Indicators switched on at startup.
    #[serde(default = "default_enabled_indicators")]
    pub enabled_indicators: Vec<String>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            symbol: default_symbol(),
            interval: Interval::default(),
            history_limit: default_history_limit(),
            window_capacity: default_window_capacity(),
            rest_base_url: default_rest_base_url(),
            ws_base_url: default_ws_base_url(),
            http_timeout_secs: default_http_timeout_secs(),
            reconnect: ReconnectPolicy::default(),
            history_retry_secs: default_history_retry_secs(),
            fixture_path: None,
            bind_addr: default_bind_addr(),
            enabled_indicators: default_enabled_indicators(),
        }
    }
}

impl RuntimeConfig {
    /// Load configuration from a JSON file at `path`.
    ///
    /// If the file does not exist, returns an error so the caller can fall
    /// back to defaults with a warning.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read runtime config from {}", path.display()))?;

        let mut config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse runtime config from {}", path.display()))?;

        config.validate()?;

        info!(
            path = %path.display(),
            symbol = %config.symbol,
            interval = %config.interval,
            "runtime config loaded"
        );

        Ok(config)
    }

    /// Persist the current configuration to `path` using an atomic write
    /// (write to `.tmp`, then rename).
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

    /// Apply `CHART_*` overrides from the process environment.
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary key lookup. Empty values are ignored.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(symbol) = get("CHART_SYMBOL") {
            self.symbol = symbol;
        }
        if let Some(interval) = get("CHART_INTERVAL") {
            self.interval = interval
                .trim()
                .parse()
                .with_context(|| format!("CHART_INTERVAL={interval}"))?;
        }
        if let Some(addr) = get("CHART_BIND_ADDR") {
            self.bind_addr = addr.trim().to_string();
        }
        if let Some(path) = get("CHART_FIXTURE") {
            self.fixture_path = Some(PathBuf::from(path.trim()));
        }

        self.validate()
    }

    /// Normalise the symbol the way a market switch does and reject settings
    /// the pipeline cannot run with.
    pub fn validate(&mut self) -> Result<()> {
        self.symbol = normalize_symbol(&self.symbol).context("invalid symbol in config")?;
        if self.history_limit == 0 || self.history_limit > MAX_HISTORY_LIMIT {
            bail!(
                "history_limit must be within 1..={MAX_HISTORY_LIMIT}, got {}",
                self.history_limit
            );
        }
        if self.window_capacity == 0 {
            bail!("window_capacity must be at least 1");
        }
        if self.http_timeout_secs == 0 {
            bail!("http_timeout_secs must be at least 1");
        }
        Ok(())
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn history_retry(&self) -> Duration {
        Duration::from_secs(self.history_retry_secs)
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn default_config_has_expected_values() {
        let mut cfg = RuntimeConfig::default();
        assert_eq!(cfg.symbol, "BTCUSDT");
        assert_eq!(cfg.interval, Interval::OneHour);
        assert_eq!(cfg.history_limit, 1000);
        assert_eq!(cfg.window_capacity, 1000);
        assert_eq!(cfg.rest_base_url, "https://api.binance.com");
        assert_eq!(cfg.reconnect.max_attempts, 10);
        assert_eq!(cfg.http_timeout(), Duration::from_secs(10));
        assert_eq!(cfg.enabled_indicators, vec!["emaCross"]);
        assert!(cfg.fixture_path.is_none());
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn deserialise_empty_json_uses_defaults() {
        let cfg: RuntimeConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.symbol, "BTCUSDT");
        assert_eq!(cfg.bind_addr, "0.0.0.0:3001");
        assert_eq!(cfg.reconnect.base_delay_ms, 1_000);
        assert_eq!(cfg.reconnect.max_delay_ms, 30_000);
    }

    #[test]
    fn deserialise_partial_json_fills_defaults() {
        let json = r#"{ "symbol": "ETHUSDT", "interval": "15m", "reconnect": { "max_attempts": 3 } }"#;
        let cfg: RuntimeConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.symbol, "ETHUSDT");
        assert_eq!(cfg.interval, Interval::FifteenMinutes);
        assert_eq!(cfg.reconnect.max_attempts, 3);
        assert_eq!(cfg.reconnect.base_delay_ms, 1_000);
        assert_eq!(cfg.history_limit, MAX_HISTORY_LIMIT);
    }

    #[test]
    fn env_overrides_take_precedence() {
        let env: HashMap<&str, &str> = [
            ("CHART_SYMBOL", " solusdt "),
            ("CHART_INTERVAL", "4h"),
            ("CHART_BIND_ADDR", "127.0.0.1:9000"),
            ("CHART_FIXTURE", ""),
        ]
        .into_iter()
        .collect();

        let mut cfg = RuntimeConfig::default();
        cfg.apply_overrides(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(cfg.symbol, "SOLUSDT");
        assert_eq!(cfg.interval, Interval::FourHours);
        assert_eq!(cfg.bind_addr, "127.0.0.1:9000");
        assert!(cfg.fixture_path.is_none());
    }

    #[test]
    fn bad_interval_override_is_rejected() {
        let mut cfg = RuntimeConfig::default();
        let err = cfg
            .apply_overrides(|k| (k == "CHART_INTERVAL").then(|| "3h".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains("CHART_INTERVAL"));
    }

    #[test]
    fn validate_rejects_out_of_range_values() {
        let mut cfg = RuntimeConfig::default();
        cfg.history_limit = 5_000;
        assert!(cfg.validate().is_err());

        let mut cfg = RuntimeConfig::default();
        cfg.window_capacity = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validate_normalises_symbol() {
        let mut cfg = RuntimeConfig::default();
        cfg.symbol = "  ethusdt ".into();
        cfg.validate().unwrap();
        assert_eq!(cfg.symbol, "ETHUSDT");

        for bad in ["", "   ", "BTC/USDT", "btc-usdt"] {
            let mut cfg = RuntimeConfig::default();
            cfg.symbol = bad.into();
            assert!(cfg.validate().is_err(), "{bad:?} accepted");
        }
    }

    #[test]
    fn load_normalises_symbol_from_file() {
        let dir = std::env::temp_dir().join(format!("chart-feed-sym-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("chart_feed.json");

        std::fs::write(&path, r#"{ "symbol": "solusdt" }"#).unwrap();
        assert_eq!(RuntimeConfig::load(&path).unwrap().symbol, "SOLUSDT");

        std::fs::write(&path, r#"{ "symbol": "sol usdt" }"#).unwrap();
        assert!(RuntimeConfig::load(&path).is_err());

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn save_then_load() {
        let dir = std::env::temp_dir().join(format!("chart-feed-cfg-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("chart_feed.json");

        let mut cfg = RuntimeConfig::default();
        cfg.symbol = "ETHUSDT".into();
        cfg.interval = Interval::OneDay;
        cfg.fixture_path = Some(PathBuf::from("fixtures/btc.json"));
        cfg.save(&path).unwrap();

        assert!(!path.with_extension("json.tmp").exists());
        let loaded = RuntimeConfig::load(&path).unwrap();
        assert_eq!(loaded.symbol, "ETHUSDT");
        assert_eq!(loaded.interval, Interval::OneDay);
        assert_eq!(loaded.fixture_path, cfg.fixture_path);

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn load_missing_file_is_an_error() {
        assert!(RuntimeConfig::load("/definitely/not/here/chart_feed.json").is_err());
    }
}
