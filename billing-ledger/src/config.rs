//! Configuration module for billing-ledger.

use rust_decimal::Decimal;
use service_core::config as core_config;
use service_core::error::AppError;
use service_core::retry::RetryConfig;
use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::engine::STANDARD_SLABS;

#[derive(Debug, Clone)]
pub struct LedgerConfig {
    pub common: core_config::Config,
    pub service_name: String,
    pub service_version: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    /// Absent when the ledger runs on the in-memory store.
    pub database: Option<DatabaseConfig>,
    pub settings: LedgerSettings,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

/// Knobs the billing service itself reads.
#[derive(Debug, Clone)]
pub struct LedgerSettings {
    pub gst_slabs: Vec<Decimal>,
    pub conflict_retry: RetryConfig,
}

impl Default for LedgerSettings {
    fn default() -> Self {
        Self {
            gst_slabs: STANDARD_SLABS.to_vec(),
            conflict_retry: RetryConfig::default(),
        }
    }
}

impl LedgerConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common = core_config::Config::load()?;

        let database = match env::var("DATABASE_URL") {
            Ok(url) => Some(DatabaseConfig {
                url,
                max_connections: env::var("DATABASE_MAX_CONNECTIONS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(10),
                min_connections: env::var("DATABASE_MIN_CONNECTIONS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(2),
            }),
            Err(_) => None,
        };

        let gst_slabs = match env::var("GST_STANDARD_SLABS") {
            Ok(raw) => parse_slabs(&raw)?,
            Err(_) => STANDARD_SLABS.to_vec(),
        };

        let mut conflict_retry = RetryConfig::default();
        if let Some(max) = env::var("LEDGER_MAX_CONFLICT_RETRIES")
            .ok()
            .and_then(|s| s.parse().ok())
        {
            conflict_retry.max_retries = max;
        }
        if let Some(ms) = env::var("LEDGER_RETRY_BACKOFF_MS")
            .ok()
            .and_then(|s| s.parse().ok())
        {
            conflict_retry.initial_backoff = Duration::from_millis(ms);
        }

        Ok(Self {
            service_name: env::var("SERVICE_NAME").unwrap_or_else(|_| "billing-ledger".to_string()),
            service_version: env::var("SERVICE_VERSION")
                .unwrap_or_else(|_| env!("CARGO_PKG_VERSION").to_string()),
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| common.log_level.clone()),
            otlp_endpoint: env::var("OTLP_ENDPOINT")
                .ok()
                .or_else(|| common.otlp_endpoint.clone()),
            common,
            database,
            settings: LedgerSettings {
                gst_slabs,
                conflict_retry,
            },
        })
    }

    /// Database settings, or a config error for callers that need one.
    pub fn require_database(&self) -> Result<&DatabaseConfig, AppError> {
        self.database
            .as_ref()
            .ok_or_else(|| AppError::ConfigError(anyhow::anyhow!("DATABASE_URL is required")))
    }
}

/// Parse a comma separated slab list such as `0,5,12,18,28`.
pub fn parse_slabs(raw: &str) -> Result<Vec<Decimal>, AppError> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            Decimal::from_str(s).map_err(|e| {
                AppError::ConfigError(anyhow::anyhow!("invalid GST slab '{}': {}", s, e))
            })
        })
        .collect()
}
