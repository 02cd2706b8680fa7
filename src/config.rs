use std::path::Path;

use figment::providers::{Env, Format, Json, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use crate::error::{TrackerError, TrackerResult};
use crate::publish::StartCell;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppConfig {
    pub binance: BinanceConfig,
    pub sheet: SheetConfig,
    pub poller: PollerConfig,
    pub infra: InfraConfig,
}

impl AppConfig {
    /// Env var aliases kept for deployments migrating from the older tracker
    /// scripts. Only fill values the `BST_...` config did not set.
    fn apply_legacy_env_overrides(&mut self) {
        fn env_trimmed(key: &str) -> Option<String> {
            let value = std::env::var(key).ok()?;
            let trimmed = value.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_string())
            }
        }

        if self
            .sheet
            .credentials_json
            .as_deref()
            .unwrap_or_default()
            .trim()
            .is_empty()
        {
            if let Some(blob) = env_trimmed("GOOGLE_CREDENTIALS") {
                self.sheet.credentials_json = Some(blob);
            }
        }

        if std::env::var("BST_SHEET__SPREADSHEET_NAME").is_err() {
            if let Some(name) = env_trimmed("SHEET_NAME") {
                self.sheet.spreadsheet_name = name;
            }
        }

        if self
            .binance
            .api_key
            .as_deref()
            .unwrap_or_default()
            .trim()
            .is_empty()
        {
            self.binance.api_key = env_trimmed("BINANCE_API_KEY");
        }

        if std::env::var("BST_INFRA__HEALTH_PORT").is_err() {
            if let Some(port) = env_trimmed("PORT").and_then(|p| p.parse::<u16>().ok()) {
                self.infra.health_port = port;
            }
        }
    }

    pub fn validate(&self) -> TrackerResult<()> {
        self.binance.validate()?;
        self.sheet.validate()?;
        self.poller.validate()?;
        self.infra.validate()?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PriceFetchMode {
    /// One bulk ticker call, filtered client-side.
    #[default]
    #[serde(alias = "Bulk", alias = "bulk")]
    Bulk,
    /// One ticker call per instrument.
    #[serde(alias = "PerSymbol", alias = "per_symbol")]
    PerSymbol,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BinanceConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub proxy_url: Option<String>,
    /// Instruments are kept only when their symbol ends with this suffix.
    pub quote_suffix: String,
    pub request_timeout_s: u64,
    pub price_fetch_mode: PriceFetchMode,
}

impl Default for BinanceConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.binance.us".to_string(),
            api_key: None,
            proxy_url: None,
            quote_suffix: "USDT".to_string(),
            request_timeout_s: 10,
            price_fetch_mode: PriceFetchMode::Bulk,
        }
    }
}

impl BinanceConfig {
    pub fn validate(&self) -> TrackerResult<()> {
        if self.base_url.trim().is_empty() {
            return Err(TrackerError::Config(
                "binance.base_url must not be empty".to_string(),
            ));
        }
        if self.quote_suffix.trim().is_empty() {
            return Err(TrackerError::Config(
                "binance.quote_suffix must not be empty".to_string(),
            ));
        }
        if self.request_timeout_s == 0 || self.request_timeout_s > 300 {
            return Err(TrackerError::Config(format!(
                "binance.request_timeout_s must be in [1,300], got {}",
                self.request_timeout_s
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SheetConfig {
    /// Service credentials blob; required. Token exchange happens outside
    /// this process, the blob only needs to carry the bearer token.
    pub credentials_json: Option<String>,
    pub spreadsheet_name: String,
    pub base_url: String,
    pub start_cell: String,
    pub chunk_rows: usize,
    pub chunk_retry_delay_s: u64,
}

impl Default for SheetConfig {
    fn default() -> Self {
        Self {
            credentials_json: None,
            spreadsheet_name: "Crypto_Tracker".to_string(),
            base_url: "https://sheets.googleapis.com/v4".to_string(),
            start_cell: "A1".to_string(),
            chunk_rows: 50,
            chunk_retry_delay_s: 5,
        }
    }
}

impl SheetConfig {
    pub fn validate(&self) -> TrackerResult<()> {
        if self
            .credentials_json
            .as_deref()
            .unwrap_or_default()
            .trim()
            .is_empty()
        {
            return Err(TrackerError::Config(
                "missing required sheet.credentials_json (set BST_SHEET__CREDENTIALS_JSON or GOOGLE_CREDENTIALS)"
                    .to_string(),
            ));
        }
        if self.spreadsheet_name.trim().is_empty() {
            return Err(TrackerError::Config(
                "sheet.spreadsheet_name must not be empty".to_string(),
            ));
        }
        if self.chunk_rows == 0 {
            return Err(TrackerError::Config(
                "sheet.chunk_rows must be >0".to_string(),
            ));
        }
        StartCell::parse(&self.start_cell)?;
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PollerConfig {
    pub interval_s: u64,
    pub backfill_batch_size: usize,
    pub backfill_lookback_hours: i64,
    pub retry_max_attempts: u32,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval_s: 10,
            backfill_batch_size: 10,
            backfill_lookback_hours: 24,
            retry_max_attempts: 5,
            retry_base_delay_ms: 1_000,
            retry_max_delay_ms: 30_000,
        }
    }
}

impl PollerConfig {
    pub fn validate(&self) -> TrackerResult<()> {
        if self.interval_s == 0 {
            return Err(TrackerError::Config(
                "poller.interval_s must be >0".to_string(),
            ));
        }
        if self.backfill_batch_size == 0 {
            return Err(TrackerError::Config(
                "poller.backfill_batch_size must be >0".to_string(),
            ));
        }
        if self.backfill_lookback_hours <= 0 {
            return Err(TrackerError::Config(format!(
                "poller.backfill_lookback_hours must be >0, got {}",
                self.backfill_lookback_hours
            )));
        }
        if self.retry_max_attempts == 0 {
            return Err(TrackerError::Config(
                "poller.retry_max_attempts must be >0".to_string(),
            ));
        }
        if self.retry_base_delay_ms == 0 {
            return Err(TrackerError::Config(
                "poller.retry_base_delay_ms must be >0".to_string(),
            ));
        }
        if self.retry_max_delay_ms < self.retry_base_delay_ms {
            return Err(TrackerError::Config(format!(
                "poller.retry_max_delay_ms ({}) must be >= poller.retry_base_delay_ms ({})",
                self.retry_max_delay_ms, self.retry_base_delay_ms
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct InfraConfig {
    pub log_level: String,
    pub health_port: u16,
    /// Second bind attempt when `health_port` is taken or not permitted.
    pub health_fallback_port: u16,
    pub metrics_port: u16,
}

impl Default for InfraConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            health_port: 8080,
            health_fallback_port: 8080,
            metrics_port: 9090,
        }
    }
}

impl InfraConfig {
    pub fn validate(&self) -> TrackerResult<()> {
        if self.log_level.trim().is_empty() {
            return Err(TrackerError::Config(
                "infra.log_level must not be empty".to_string(),
            ));
        }
        if self.health_port == 0 || self.health_fallback_port == 0 {
            return Err(TrackerError::Config(
                "infra.health_port and infra.health_fallback_port must be >0".to_string(),
            ));
        }
        if self.metrics_port == 0 {
            return Err(TrackerError::Config(
                "infra.metrics_port must be >0".to_string(),
            ));
        }
        Ok(())
    }
}

pub fn load_config() -> TrackerResult<AppConfig> {
    let figment = build_figment_from_env()?;
    load_config_from(figment)
}

fn build_figment_from_env() -> TrackerResult<Figment> {
    let mut figment = Figment::from(Serialized::defaults(AppConfig::default()));

    if let Ok(path) = std::env::var("BST_CONFIG_PATH") {
        figment = merge_config_file(figment, &path)?;
    }

    figment = figment.merge(Env::prefixed("BST_").split("__"));
    Ok(figment)
}

fn merge_config_file(figment: Figment, path: &str) -> TrackerResult<Figment> {
    let p = Path::new(path);
    match p.extension().and_then(|s| s.to_str()) {
        Some("toml") => Ok(figment.merge(Toml::file(path))),
        Some("json") => Ok(figment.merge(Json::file(path))),
        _ => Err(TrackerError::Config(format!(
            "unsupported config file extension for BST_CONFIG_PATH: {path} (expected .toml or .json)"
        ))),
    }
}

fn load_config_from(figment: Figment) -> TrackerResult<AppConfig> {
    let mut cfg: AppConfig = figment
        .extract()
        .map_err(|e| TrackerError::Config(e.to_string()))?;
    cfg.apply_legacy_env_overrides();
    cfg.validate()?;
    Ok(cfg)
}
