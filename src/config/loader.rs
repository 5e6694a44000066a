//! Configuration Loader
//!
//! Loads and validates configuration from TOML files matching tracker.toml structure.

use serde::Deserialize;
use solana_sdk::pubkey::Pubkey;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

use crate::adapters::solana::RetryPolicy;
use crate::domain::address::{DEFAULT_POOL_THRESHOLD_PCT, DEFAULT_WALLET_THRESHOLD_PCT};
use crate::domain::event_log::DEFAULT_LOG_FILE;
use crate::domain::state_store::DEFAULT_STATE_FILE;
use crate::domain::{CexAddress, GateConfig, TrackedAddress, TrendConfig};

/// Environment variable overriding the primary RPC endpoint
pub const RPC_URL_ENV: &str = "SOLANA_RPC_URL";

/// Main configuration structure matching tracker.toml
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub token: TokenSection,
    #[serde(default)]
    pub wallets: Vec<WalletEntry>,
    #[serde(default)]
    pub cex_wallets: Vec<CexEntry>,
    pub rpc: RpcSection,
    #[serde(default)]
    pub monitor: MonitorSection,
    #[serde(default)]
    pub storage: StorageSection,
    #[serde(default)]
    pub trend: TrendSection,
    #[serde(default)]
    pub logging: LoggingSection,
}

/// Token being tracked
#[derive(Debug, Clone, Deserialize)]
pub struct TokenSection {
    /// Ticker for display
    pub symbol: String,
    /// SPL mint address
    pub mint: String,
    pub decimals: u8,
    /// Total supply in whole tokens, for share-of-supply display
    pub total_supply: u64,
}

/// One tracked wallet or pool vault
#[derive(Debug, Clone, Deserialize)]
pub struct WalletEntry {
    pub label: String,
    pub address: String,
    /// Defaults to 1% for wallets and 5% for pools
    #[serde(default)]
    pub alert_threshold_pct: Option<f64>,
    #[serde(default)]
    pub is_pool: bool,
    #[serde(default)]
    pub notes: Option<String>,
}

impl WalletEntry {
    pub fn to_tracked(&self) -> TrackedAddress {
        let base = if self.is_pool {
            TrackedAddress::pool(&self.label, &self.address)
        } else {
            TrackedAddress::wallet(&self.label, &self.address)
        };
        let threshold = self.alert_threshold_pct.unwrap_or(if self.is_pool {
            DEFAULT_POOL_THRESHOLD_PCT
        } else {
            DEFAULT_WALLET_THRESHOLD_PCT
        });
        let tracked = base.with_threshold(threshold);
        match self.notes.as_deref().filter(|n| !n.is_empty()) {
            Some(notes) => tracked.with_notes(notes),
            None => tracked,
        }
    }
}

/// Known exchange wallet
#[derive(Debug, Clone, Deserialize)]
pub struct CexEntry {
    pub label: String,
    pub address: String,
}

/// Solana RPC configuration section
#[derive(Debug, Clone, Deserialize)]
pub struct RpcSection {
    /// Endpoints in failover order; the first is the primary
    pub endpoints: Vec<String>,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_timeout_ms() -> u64 { 10_000 }
fn default_max_retries() -> u32 { 3 }
fn default_base_delay_ms() -> u64 { 500 }
fn default_max_delay_ms() -> u64 { 8_000 }

impl RpcSection {
    /// Endpoints with the `SOLANA_RPC_URL` override applied
    pub fn get_endpoints(&self) -> Vec<String> {
        self.endpoints_with_override(std::env::var(RPC_URL_ENV).ok())
    }

    /// Replace the primary endpoint when an override is given
    pub fn endpoints_with_override(&self, primary: Option<String>) -> Vec<String> {
        let mut endpoints = self.endpoints.clone();
        if let Some(url) = primary.filter(|u| !u.trim().is_empty()) {
            match endpoints.first_mut() {
                Some(first) => *first = url,
                None => endpoints.push(url),
            }
        }
        endpoints
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            timeout: Duration::from_millis(self.timeout_ms),
            max_retries: self.max_retries,
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
        }
    }
}

/// Poll loop and validation gate parameters
#[derive(Debug, Clone, Deserialize)]
pub struct MonitorSection {
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_max_concurrent_reads")]
    pub max_concurrent_reads: usize,
    /// Consecutive zero reads before a drop to zero is accepted
    #[serde(default = "default_zero_confirmations")]
    pub zero_confirmations: u32,
    /// Changes above this percentage are flagged for review
    #[serde(default = "default_suspect_change_pct")]
    pub suspect_change_pct: f64,
    #[serde(default)]
    pub balance_epsilon: u64,
    /// Recompute the trend every N cycles; 0 disables
    #[serde(default = "default_trend_every_cycles")]
    pub trend_every_cycles: u64,
}

fn default_poll_interval() -> u64 { 60 }
fn default_max_concurrent_reads() -> usize { 8 }
fn default_zero_confirmations() -> u32 { 2 }
fn default_suspect_change_pct() -> f64 { 50.0 }
fn default_trend_every_cycles() -> u64 { 5 }

impl Default for MonitorSection {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
            max_concurrent_reads: default_max_concurrent_reads(),
            zero_confirmations: default_zero_confirmations(),
            suspect_change_pct: default_suspect_change_pct(),
            balance_epsilon: 0,
            trend_every_cycles: default_trend_every_cycles(),
        }
    }
}

impl MonitorSection {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn gate_config(&self) -> GateConfig {
        GateConfig {
            zero_confirmations: self.zero_confirmations,
            suspect_change_pct: self.suspect_change_pct,
            balance_epsilon: self.balance_epsilon,
        }
    }
}

/// Where state and the signal log live
#[derive(Debug, Clone, Deserialize)]
pub struct StorageSection {
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    #[serde(default = "default_state_file")]
    pub state_file: String,
    #[serde(default = "default_log_file")]
    pub log_file: String,
}

fn default_data_dir() -> String { "data".to_string() }
fn default_state_file() -> String { DEFAULT_STATE_FILE.to_string() }
fn default_log_file() -> String { DEFAULT_LOG_FILE.to_string() }

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            state_file: default_state_file(),
            log_file: default_log_file(),
        }
    }
}

impl StorageSection {
    /// Data directory with `~` expanded
    pub fn data_dir(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.data_dir).into_owned())
    }

    pub fn state_path(&self) -> PathBuf {
        self.data_dir().join(&self.state_file)
    }

    pub fn log_path(&self) -> PathBuf {
        self.data_dir().join(&self.log_file)
    }
}

/// Trend analyzer parameters
#[derive(Debug, Clone, Deserialize)]
pub struct TrendSection {
    #[serde(default = "default_window_hours")]
    pub window_hours: i64,
    #[serde(default = "default_accumulation_threshold")]
    pub accumulation_threshold: f64,
    #[serde(default = "default_distribution_threshold")]
    pub distribution_threshold: f64,
    /// Consecutive agreeing windows before the phase changes
    #[serde(default = "default_confirm_windows")]
    pub confirm_windows: u32,
}

fn default_window_hours() -> i64 { 24 }
fn default_accumulation_threshold() -> f64 { 2.0 }
fn default_distribution_threshold() -> f64 { -2.0 }
fn default_confirm_windows() -> u32 { 2 }

impl Default for TrendSection {
    fn default() -> Self {
        Self {
            window_hours: default_window_hours(),
            accumulation_threshold: default_accumulation_threshold(),
            distribution_threshold: default_distribution_threshold(),
            confirm_windows: default_confirm_windows(),
        }
    }
}

impl TrendSection {
    pub fn trend_config(&self) -> TrendConfig {
        TrendConfig {
            window: chrono::Duration::hours(self.window_hours),
            accumulation_threshold: self.accumulation_threshold,
            distribution_threshold: self.distribution_threshold,
            confirm_windows: self.confirm_windows,
        }
    }
}

/// Logging configuration section
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingSection {
    /// Log level: "trace", "debug", "info", "warn", "error"
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String { "info".to_string() }

impl Default for LoggingSection {
    fn default() -> Self {
        Self { level: default_log_level() }
    }
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),
    #[error("Validation failed: {0}")]
    ValidationError(String),
}

/// Load configuration from a TOML file
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let config: Config = toml::from_str(&content)?;
    config.validate()?;
    Ok(config)
}

fn invalid(msg: impl Into<String>) -> ConfigError {
    ConfigError::ValidationError(msg.into())
}

fn check_pubkey(what: &str, address: &str) -> Result<(), ConfigError> {
    Pubkey::from_str(address)
        .map(|_| ())
        .map_err(|e| invalid(format!("{} has invalid address '{}': {}", what, address, e)))
}

fn check_label(label: &str) -> Result<(), ConfigError> {
    if label.trim().is_empty() {
        return Err(invalid("label cannot be empty"));
    }
    // Labels are written into the pipe-delimited signal log
    if label.contains(['|', ',']) || label.contains(char::is_whitespace) {
        return Err(invalid(format!(
            "label '{}' cannot contain '|', ',' or whitespace",
            label
        )));
    }
    Ok(())
}

impl Config {
    /// Tracked wallets and pools in config order
    pub fn tracked_addresses(&self) -> Vec<TrackedAddress> {
        self.wallets.iter().map(WalletEntry::to_tracked).collect()
    }

    pub fn cex_addresses(&self) -> Vec<CexAddress> {
        self.cex_wallets
            .iter()
            .map(|c| CexAddress {
                label: c.label.clone(),
                address: c.address.clone(),
            })
            .collect()
    }

    /// Validate all configuration parameters
    pub fn validate(&self) -> Result<(), ConfigError> {
        // Token
        if self.token.symbol.trim().is_empty() {
            return Err(invalid("token symbol cannot be empty"));
        }
        check_pubkey("token mint", &self.token.mint)?;

        // Tracked addresses
        if self.wallets.is_empty() {
            return Err(invalid("at least one wallet must be configured"));
        }

        let mut labels = HashSet::new();
        let mut addresses = HashSet::new();
        for entry in &self.wallets {
            check_label(&entry.label)?;
            check_pubkey(&format!("wallet '{}'", entry.label), &entry.address)?;

            if !labels.insert(entry.label.as_str()) {
                return Err(invalid(format!("duplicate wallet label '{}'", entry.label)));
            }
            if !addresses.insert(entry.address.as_str()) {
                return Err(invalid(format!("duplicate wallet address '{}'", entry.address)));
            }
            if let Some(pct) = entry.alert_threshold_pct {
                if pct <= 0.0 || pct > 100.0 {
                    return Err(invalid(format!(
                        "alert_threshold_pct for '{}' must be 0-100, got {}",
                        entry.label, pct
                    )));
                }
            }
        }

        let mut cex_labels = HashSet::new();
        let mut cex_addresses = HashSet::new();
        for cex in &self.cex_wallets {
            check_label(&cex.label)?;
            check_pubkey(&format!("cex wallet '{}'", cex.label), &cex.address)?;

            if !cex_labels.insert(cex.label.as_str()) {
                return Err(invalid(format!("duplicate cex label '{}'", cex.label)));
            }
            if !cex_addresses.insert(cex.address.as_str()) {
                return Err(invalid(format!("duplicate cex address '{}'", cex.address)));
            }
            if addresses.contains(cex.address.as_str()) {
                return Err(invalid(format!(
                    "cex wallet '{}' is also a tracked wallet",
                    cex.label
                )));
            }
        }

        // RPC
        if self.rpc.endpoints.is_empty() {
            return Err(invalid("rpc endpoints cannot be empty"));
        }
        for url in &self.rpc.endpoints {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(invalid(format!("rpc endpoint '{}' must be http(s)", url)));
            }
        }
        if self.rpc.timeout_ms == 0 {
            return Err(invalid("rpc timeout_ms must be > 0"));
        }
        if self.rpc.max_delay_ms < self.rpc.base_delay_ms {
            return Err(invalid(format!(
                "rpc max_delay_ms ({}) must be >= base_delay_ms ({})",
                self.rpc.max_delay_ms, self.rpc.base_delay_ms
            )));
        }

        // Monitor
        if self.monitor.poll_interval_secs == 0 {
            return Err(invalid("poll_interval_secs must be > 0"));
        }
        if self.monitor.max_concurrent_reads == 0 {
            return Err(invalid("max_concurrent_reads must be > 0"));
        }
        if self.monitor.zero_confirmations == 0 {
            return Err(invalid("zero_confirmations must be >= 1"));
        }
        if self.monitor.suspect_change_pct <= 0.0 {
            return Err(invalid(format!(
                "suspect_change_pct must be > 0, got {}",
                self.monitor.suspect_change_pct
            )));
        }

        // Storage
        if self.storage.state_file.is_empty() || self.storage.log_file.is_empty() {
            return Err(invalid("state_file and log_file cannot be empty"));
        }
        if self.storage.state_file == self.storage.log_file {
            return Err(invalid("state_file and log_file must differ"));
        }

        // Trend
        if self.trend.window_hours <= 0 {
            return Err(invalid(format!(
                "trend window_hours must be > 0, got {}",
                self.trend.window_hours
            )));
        }
        if self.trend.confirm_windows == 0 {
            return Err(invalid("trend confirm_windows must be >= 1"));
        }
        if self.trend.accumulation_threshold <= 0.0 || self.trend.distribution_threshold >= 0.0 {
            return Err(invalid(format!(
                "trend thresholds must straddle zero, got {} / {}",
                self.trend.accumulation_threshold, self.trend.distribution_threshold
            )));
        }

        Ok(())
    }
}
