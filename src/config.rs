//! Configuration management for the metric store
//!
//! TOML file support, environment variable overrides, and defaults that
//! run a complete store out of the box. Every section may be omitted.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::archive::ArchiveConfig;
use crate::cardinality::CardinalityConfig;
use crate::ingestion::{BackpressureStrategy, IngestionConfig};
use crate::query::QueryConfig;

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct Config {
    /// HTTP server settings
    #[serde(default)]
    pub server: ServerConfig,

    /// Metric catalog settings
    #[serde(default)]
    pub catalog: CatalogConfig,

    /// Buffered ingestion settings
    #[serde(default)]
    pub ingestion: IngestionConfig,

    /// Label and series limits
    #[serde(default)]
    pub cardinality: CardinalityConfig,

    /// Query execution settings
    #[serde(default)]
    pub query: QueryConfig,

    /// Cold tier settings
    #[serde(default)]
    pub archive: ArchiveConfig,

    /// Logging
    #[serde(default)]
    pub monitoring: MonitoringConfig,
}

/// Server configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Listen address
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// Allowed CORS origins; empty allows any
    #[serde(default)]
    pub cors_allowed_origins: Vec<String>,

    /// Seconds to wait for background services on shutdown
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,
}

/// Catalog configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct CatalogConfig {
    /// Hot-window length for metrics registered without one
    #[serde(default = "default_retention_days")]
    pub default_retention_days: u32,
}

/// Monitoring configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct MonitoringConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_listen_addr() -> String { "0.0.0.0:8082".to_string() }
fn default_shutdown_timeout_secs() -> u64 { 30 }
fn default_retention_days() -> u32 { 30 }
fn default_log_level() -> String { "info".to_string() }

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            cors_allowed_origins: Vec::new(),
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
        }
    }
}

impl ServerConfig {
    /// Shutdown grace period
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            default_retention_days: default_retention_days(),
        }
    }
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from TOML file
    pub fn from_file(path: &str) -> Result<Self, String> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file {}: {}", path, e))?;

        toml::from_str(&contents)
            .map_err(|e| format!("Failed to parse config file {}: {}", path, e))
    }

    /// Load configuration with environment variable overrides
    pub fn from_file_with_env(path: &str) -> Result<Self, String> {
        let mut config = Self::from_file(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load from environment variables only
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    /// Apply environment variable overrides
    pub fn apply_env_overrides(&mut self) {
        // Server
        if let Ok(addr) = std::env::var("METRIC_STORE_LISTEN_ADDR") {
            self.server.listen_addr = addr;
        }
        if let Ok(origins) = std::env::var("METRIC_STORE_CORS_ORIGINS") {
            self.server.cors_allowed_origins = origins
                .split(',')
                .map(str::trim)
                .filter(|o| !o.is_empty())
                .map(String::from)
                .collect();
        }

        // Catalog
        if let Ok(days) = std::env::var("METRIC_STORE_DEFAULT_RETENTION_DAYS") {
            if let Ok(d) = days.parse() {
                self.catalog.default_retention_days = d;
            }
        }

        // Ingestion
        if let Ok(capacity) = std::env::var("METRIC_STORE_BUFFER_CAPACITY") {
            if let Ok(c) = capacity.parse() {
                self.ingestion.buffer_capacity = c;
            }
        }
        if let Ok(interval) = std::env::var("METRIC_STORE_FLUSH_INTERVAL_MS") {
            if let Ok(i) = interval.parse() {
                self.ingestion.flush_interval_ms = i;
            }
        }
        if let Ok(policy) = std::env::var("METRIC_STORE_OVERFLOW_POLICY") {
            if let Ok(p) = policy.parse::<BackpressureStrategy>() {
                self.ingestion.overflow_policy = p;
            }
        }

        // Cardinality
        if let Ok(max) = std::env::var("METRIC_STORE_MAX_SERIES_PER_METRIC") {
            if let Ok(m) = max.parse() {
                self.cardinality.max_series_per_metric = m;
            }
        }

        // Query
        if let Ok(timeout) = std::env::var("METRIC_STORE_QUERY_TIMEOUT_MS") {
            if let Ok(t) = timeout.parse() {
                self.query.timeout_ms = t;
            }
        }

        // Archive
        if let Ok(enabled) = std::env::var("METRIC_STORE_ARCHIVE_ENABLED") {
            if let Ok(e) = enabled.parse() {
                self.archive.enabled = e;
            }
        }
        if let Ok(interval) = std::env::var("METRIC_STORE_ARCHIVE_INTERVAL_SECS") {
            if let Ok(i) = interval.parse() {
                self.archive.interval_secs = i;
            }
        }

        // Monitoring
        if let Ok(log_level) = std::env::var("RUST_LOG") {
            self.monitoring.log_level = log_level;
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.server.listen_addr.trim().is_empty() {
            return Err("Listen address cannot be empty".to_string());
        }
        if self.catalog.default_retention_days == 0 {
            return Err("Default retention days must be > 0".to_string());
        }

        self.ingestion.validate()?;
        self.cardinality.validate()?;
        self.query.validate()?;
        self.archive.validate()?;

        Ok(())
    }

    /// Save configuration to TOML file
    pub fn save_to_file(&self, path: &str) -> Result<(), String> {
        let contents = toml::to_string_pretty(self)
            .map_err(|e| format!("Failed to serialize config: {}", e))?;

        std::fs::write(path, contents)
            .map_err(|e| format!("Failed to write config file {}: {}", path, e))
    }
}
