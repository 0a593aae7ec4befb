// src/config.rs

//! Manages server configuration: loading, resolving dynamic values, and validation.

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::fs;
use tracing::warn;

/// Metrics endpoint configuration.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct MetricsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: default_metrics_port(),
        }
    }
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_viewer_port() -> u16 {
    7712
}

/// Watchdog tuning for ingest sessions (§4.5/§5).
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct WatchdogConfig {
    #[serde(default = "default_tick_secs")]
    pub tick_secs: u64,
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            tick_secs: default_tick_secs(),
            idle_timeout_secs: default_idle_timeout_secs(),
        }
    }
}

fn default_tick_secs() -> u64 {
    5
}
fn default_idle_timeout_secs() -> u64 {
    30
}

/// A raw representation of the config file before validation and resolution.
#[derive(Deserialize)]
struct RawConfig {
    #[serde(default = "default_host")]
    host: String,
    #[serde(default = "default_port")]
    port: u16,
    #[serde(default = "default_log_level")]
    log_level: String,
    #[serde(default = "default_max_clients")]
    max_clients: usize,
    #[serde(default = "default_data_dir")]
    data_dir: String,
    #[serde(default)]
    index_path: Option<String>,
    #[serde(default)]
    default_retention_days: Option<u32>,
    #[serde(default)]
    watchdog: WatchdogConfig,
    #[serde(default)]
    metrics: MetricsConfig,
    #[serde(default = "default_viewer_port")]
    viewer_port: u16,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    7711
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_max_clients() -> usize {
    4096
}
fn default_data_dir() -> String {
    "./data".to_string()
}

/// Represents the final, validated, and resolved server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub max_clients: usize,
    pub data_dir: String,
    pub index_path: String,
    pub default_retention_days: Option<u32>,
    #[serde(default)]
    pub watchdog: WatchdogConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default = "default_viewer_port")]
    pub viewer_port: u16,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            log_level: default_log_level(),
            max_clients: default_max_clients(),
            data_dir: default_data_dir(),
            index_path: format!("{}/index.sqlite3", default_data_dir()),
            default_retention_days: None,
            watchdog: WatchdogConfig::default(),
            metrics: MetricsConfig::default(),
            viewer_port: default_viewer_port(),
        }
    }
}

impl Config {
    /// Creates a new `Config` instance by reading and parsing a TOML file.
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file at '{path}'"))?;
        let raw_config: RawConfig = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse TOML from '{path}'"))?;

        let index_path = raw_config
            .index_path
            .unwrap_or_else(|| format!("{}/index.sqlite3", raw_config.data_dir));

        let config = Config {
            host: raw_config.host,
            port: raw_config.port,
            log_level: raw_config.log_level,
            max_clients: raw_config.max_clients,
            data_dir: raw_config.data_dir,
            index_path,
            default_retention_days: raw_config.default_retention_days,
            watchdog: raw_config.watchdog,
            metrics: raw_config.metrics,
            viewer_port: raw_config.viewer_port,
        };

        config.validate()?;
        Ok(config)
    }

    /// Validates the resolved configuration to ensure logical consistency.
    fn validate(&self) -> Result<()> {
        if self.port == 0 {
            return Err(anyhow!("port cannot be 0"));
        }
        if self.host.trim().is_empty() {
            return Err(anyhow!("host cannot be empty"));
        }
        if self.max_clients == 0 {
            return Err(anyhow!("max_clients cannot be 0"));
        }
        if self.data_dir.trim().is_empty() {
            return Err(anyhow!("data_dir cannot be empty"));
        }
        if self.viewer_port == 0 {
            return Err(anyhow!("viewer_port cannot be 0"));
        }
        if self.viewer_port == self.port {
            return Err(anyhow!("viewer_port cannot be the same as the main server port"));
        }
        if self.watchdog.tick_secs == 0 {
            return Err(anyhow!("watchdog.tick_secs cannot be 0"));
        }
        if self.watchdog.idle_timeout_secs == 0 {
            return Err(anyhow!("watchdog.idle_timeout_secs cannot be 0"));
        }
        if self.watchdog.idle_timeout_secs < self.watchdog.tick_secs {
            warn!(
                "watchdog.idle_timeout_secs ({}) is smaller than watchdog.tick_secs ({}); idle sessions may take up to one extra tick to abort",
                self.watchdog.idle_timeout_secs, self.watchdog.tick_secs
            );
        }
        if self.metrics.enabled {
            if self.metrics.port == 0 {
                return Err(anyhow!("metrics.port cannot be 0"));
            }
            if self.metrics.port == self.port {
                return Err(anyhow!(
                    "metrics.port cannot be the same as the main server port"
                ));
            }
        }
        Ok(())
    }
}
