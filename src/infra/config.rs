//! Configuration loading from TOML files
//!
//! Config file is selected via:
//! 1. --config <path> command line argument
//! 2. CONFIG_FILE environment variable
//! 3. Default: config/dev.toml

use crate::services::debounce::DEFAULT_DEBOUNCE_MS;
use anyhow::Context;
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::Path;
use tracing::warn;

#[derive(Debug, Clone, Deserialize)]
pub struct EventConfig {
    /// Event identifier; namespaces the ledger files
    #[serde(default = "default_event_id")]
    pub id: String,
    /// Label recorded on every check-in made by this instance
    #[serde(default = "default_origin_tag")]
    pub origin_tag: String,
}

impl Default for EventConfig {
    fn default() -> Self {
        Self { id: default_event_id(), origin_tag: default_origin_tag() }
    }
}

fn default_event_id() -> String {
    "default".to_string()
}

fn default_origin_tag() -> String {
    "local".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct RegistryConfig {
    /// URL or file path of the guest registry document
    #[serde(default = "default_registry_source")]
    pub source: String,
    #[serde(default = "default_registry_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self { source: default_registry_source(), timeout_ms: default_registry_timeout_ms() }
    }
}

fn default_registry_source() -> String {
    "data.json".to_string()
}

fn default_registry_timeout_ms() -> u64 {
    10_000
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScannerConfig {
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self { debounce_ms: default_debounce_ms() }
    }
}

fn default_debounce_ms() -> u64 {
    DEFAULT_DEBOUNCE_MS
}

#[derive(Debug, Clone, Deserialize)]
pub struct LedgerConfig {
    /// Directory holding the per-event ledger files
    #[serde(default = "default_ledger_dir")]
    pub dir: String,
    /// false keeps the ledger in memory for this session only
    #[serde(default = "default_ledger_persist")]
    pub persist: bool,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self { dir: default_ledger_dir(), persist: default_ledger_persist() }
    }
}

fn default_ledger_dir() -> String {
    "ledger".to_string()
}

fn default_ledger_persist() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_interval")]
    pub interval_secs: u64,
    /// Prometheus metrics HTTP port (0 to disable)
    #[serde(default)]
    pub prometheus_port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { interval_secs: default_metrics_interval(), prometheus_port: 0 }
    }
}

fn default_metrics_interval() -> u64 {
    30
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub event: EventConfig,
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default)]
    pub scanner: ScannerConfig,
    #[serde(default)]
    pub ledger: LedgerConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Main configuration struct used throughout the application
#[derive(Debug, Clone)]
pub struct Config {
    event_id: String,
    origin_tag: String,
    registry_source: String,
    registry_timeout_ms: u64,
    debounce_ms: u64,
    ledger_dir: String,
    ledger_persist: bool,
    metrics_interval_secs: u64,
    prometheus_port: u16,
    config_file: String,
}

impl Default for Config {
    fn default() -> Self {
        Self::from_toml(TomlConfig::default(), "default".to_string())
    }
}

impl Config {
    fn from_toml(toml_config: TomlConfig, config_file: String) -> Self {
        Self {
            event_id: toml_config.event.id,
            origin_tag: toml_config.event.origin_tag,
            registry_source: toml_config.registry.source,
            registry_timeout_ms: toml_config.registry.timeout_ms,
            debounce_ms: toml_config.scanner.debounce_ms,
            ledger_dir: toml_config.ledger.dir,
            ledger_persist: toml_config.ledger.persist,
            metrics_interval_secs: toml_config.metrics.interval_secs,
            prometheus_port: toml_config.metrics.prometheus_port,
            config_file,
        }
    }

    /// Determine config file path from an explicit argument or the environment
    pub fn resolve_config_path(cli_path: Option<&str>) -> String {
        if let Some(path) = cli_path {
            return path.to_string();
        }

        // Check CONFIG_FILE environment variable
        if let Ok(path) = env::var("CONFIG_FILE") {
            return path;
        }

        // Default to dev.toml
        "config/dev.toml".to_string()
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let toml_config: TomlConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        Ok(Self::from_toml(toml_config, path.display().to_string()))
    }

    /// Load configuration - tries TOML file first, falls back to defaults
    pub fn load_from_path(path: &str) -> Self {
        match Self::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(error = %format!("{:#}", e), "config_load_failed_using_defaults");
                Self::default()
            }
        }
    }

    /// Override the event identifier (e.g. from the command line)
    pub fn with_event_id(mut self, event_id: impl Into<String>) -> Self {
        self.event_id = event_id.into();
        self
    }

    /// Override the registry source (e.g. from the command line)
    pub fn with_registry_source(mut self, source: impl Into<String>) -> Self {
        self.registry_source = source.into();
        self
    }

    pub fn with_ledger_dir(mut self, dir: impl Into<String>) -> Self {
        self.ledger_dir = dir.into();
        self
    }

    // Getters for all config fields
    pub fn event_id(&self) -> &str {
        &self.event_id
    }

    pub fn origin_tag(&self) -> &str {
        &self.origin_tag
    }

    pub fn registry_source(&self) -> &str {
        &self.registry_source
    }

    pub fn registry_timeout_ms(&self) -> u64 {
        self.registry_timeout_ms
    }

    pub fn debounce_ms(&self) -> u64 {
        self.debounce_ms
    }

    pub fn ledger_dir(&self) -> &str {
        &self.ledger_dir
    }

    pub fn ledger_persist(&self) -> bool {
        self.ledger_persist
    }

    pub fn metrics_interval_secs(&self) -> u64 {
        self.metrics_interval_secs
    }

    pub fn prometheus_port(&self) -> u16 {
        self.prometheus_port
    }

    pub fn config_file(&self) -> &str {
        &self.config_file
    }
}
