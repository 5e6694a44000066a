//! CLI Command Definitions
//!
//! Argument parsing for every whale-tracker subcommand.

use chrono::Duration;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Default configuration path for every subcommand
pub const DEFAULT_CONFIG_PATH: &str = "config/tracker.toml";

/// Whale Tracker - SPL token whale balance monitor for Solana
#[derive(Parser, Debug)]
#[command(
    name = "whale-tracker",
    version = env!("CARGO_PKG_VERSION"),
    author = env!("CARGO_PKG_AUTHORS"),
    about = "Whale wallet balance monitor and signal detector for Solana SPL tokens",
    long_about = "Whale Tracker polls the token balances of a fixed set of wallets and pools, \
                  separates real balance changes from RPC failures, and logs BUY / SELL / \
                  CEX_TRANSFER / LIQUIDITY signals with a hysteresis-smoothed trend phase."
)]
pub struct CliApp {
    /// The command to execute
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Enable debug logging
    #[arg(long, global = true)]
    pub debug: bool,
}

impl CliApp {
    /// Config path of whichever subcommand was given
    pub fn config_path(&self) -> &PathBuf {
        match &self.command {
            Command::Run(cmd) => &cmd.config,
            Command::Snapshot(cmd) => &cmd.config,
            Command::Status(cmd) => &cmd.config,
            Command::History(cmd) => &cmd.config,
            Command::Trend(cmd) => &cmd.config,
        }
    }
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the polling loop
    Run(RunCmd),

    /// Poll once and show validated balances
    Snapshot(SnapshotCmd),

    /// Show the last persisted balances without network access
    Status(StatusCmd),

    /// Show logged signals for a recent period
    History(HistoryCmd),

    /// Recompute the trend phase history from the signal log
    Trend(TrendCmd),
}

/// Start polling loop
#[derive(Parser, Debug)]
pub struct RunCmd {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE", default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    /// Override poll interval in seconds
    #[arg(short, long, value_name = "SECONDS")]
    pub interval: Option<u64>,
}

/// Poll once
#[derive(Parser, Debug)]
pub struct SnapshotCmd {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE", default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,
}

/// Show persisted state
#[derive(Parser, Debug)]
pub struct StatusCmd {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE", default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    /// Output format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
}

/// Show historical signals
#[derive(Parser, Debug)]
pub struct HistoryCmd {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE", default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    /// Period to show (e.g. 24h, 12h, 1d, or hours as a bare number)
    #[arg(short, long, value_name = "PERIOD", default_value = "24h", value_parser = parse_period)]
    pub since: Duration,
}

/// Recompute trend
#[derive(Parser, Debug)]
pub struct TrendCmd {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE", default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    /// Output format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,

    /// Only show the most recent N windows
    #[arg(long, value_name = "WINDOWS")]
    pub last: Option<usize>,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
}

/// Parse a lookback period: `24h`, `1d`, `30m`, or a bare number of hours
pub fn parse_period(value: &str) -> Result<Duration, String> {
    let value = value.trim().to_lowercase();
    if value.is_empty() {
        return Err("period cannot be empty".to_string());
    }

    let (digits, unit) = match value.char_indices().last() {
        Some((i, c)) if c.is_ascii_alphabetic() => (&value[..i], Some(c)),
        _ => (value.as_str(), None),
    };

    let amount: i64 = digits
        .parse()
        .map_err(|_| format!("invalid period '{}': expected e.g. 24h, 1d or 12", value))?;
    if amount <= 0 {
        return Err(format!("period must be positive, got '{}'", value));
    }

    match unit {
        None | Some('h') => Ok(Duration::hours(amount)),
        Some('d') => Ok(Duration::days(amount)),
        Some('m') => Ok(Duration::minutes(amount)),
        Some(other) => Err(format!("unknown period unit '{}' in '{}'", other, value)),
    }
}
