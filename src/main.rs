//! Whale Tracker - SPL token whale balance monitor
//!
//! Polls tracked wallet and pool balances on Solana, logs typed signals and
//! derives a trend phase from the signal log.

use anyhow::{Context, Result};
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::watch;
use tracing_subscriber::{fmt, EnvFilter};

use whale_tracker::adapters::cli::{self, Command, HistoryCmd, OutputFormat, RunCmd, SnapshotCmd, StatusCmd, TrendCmd};
use whale_tracker::adapters::solana::RpcBalanceSource;
use whale_tracker::application::BalanceMonitor;
use whale_tracker::config::{load_config, Config};
use whale_tracker::domain::{supply_share_pct, EventLog, StateStore, TrendAnalyzer};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if it exists (RPC keys go here, not in tracker.toml)
    dotenvy::dotenv().ok();

    let app = cli::init();

    let config = load_config(app.config_path())
        .with_context(|| format!("Failed to load configuration from {}", app.config_path().display()))?;
    init_logging(app.verbose, app.debug, &config.logging.level)?;

    match app.command {
        Command::Run(cmd) => run_command(cmd, config).await,
        Command::Snapshot(cmd) => snapshot_command(cmd, config).await,
        Command::Status(cmd) => status_command(cmd, config),
        Command::History(cmd) => history_command(cmd, config),
        Command::Trend(cmd) => trend_command(cmd, config),
    }
}

/// Flags win, then RUST_LOG, then the config level
fn init_logging(verbose: bool, debug: bool, config_level: &str) -> Result<()> {
    let filter = if debug {
        EnvFilter::new("debug")
    } else if verbose {
        EnvFilter::new("info")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(config_level))
    };

    fmt().with_env_filter(filter).with_target(false).init();
    Ok(())
}

fn build_monitor(config: &Config) -> Result<BalanceMonitor> {
    let rpc = Arc::new(
        RpcBalanceSource::new(config.rpc.get_endpoints(), &config.token.mint, config.rpc.retry_policy())
            .context("Failed to create RPC client")?,
    );
    BalanceMonitor::from_config(config, rpc.clone(), rpc).context("Failed to initialize monitor")
}

async fn run_command(cmd: RunCmd, mut config: Config) -> Result<()> {
    if let Some(secs) = cmd.interval {
        anyhow::ensure!(secs > 0, "--interval must be > 0");
        config.monitor.poll_interval_secs = secs;
    }

    tracing::info!(
        "Starting whale tracker for {} ({}) - data dir {}",
        config.token.symbol,
        config.token.mint,
        config.storage.data_dir().display()
    );

    let mut monitor = build_monitor(&config)?;

    // Setup Ctrl+C handler
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        tracing::info!("Shutdown signal received, finishing current cycle");
        let _ = shutdown_tx.send(true);
    });

    monitor.run(shutdown_rx).await?;
    tracing::info!("Whale tracker stopped");
    Ok(())
}

async fn snapshot_command(_cmd: SnapshotCmd, config: Config) -> Result<()> {
    let mut monitor = build_monitor(&config)?;
    let balances = monitor.snapshot().await.context("Snapshot cycle failed")?;

    println!("{} balances at {}", config.token.symbol, Utc::now().format("%Y-%m-%d %H:%M:%S UTC"));
    println!("{:<20} {:>22} {:>10} {:>10}", "LABEL", "BALANCE", "SUPPLY %", "CONFIDENCE");
    for address in monitor.addresses() {
        match balances.iter().find(|b| b.label == address.label) {
            Some(b) => println!(
                "{:<20} {:>22} {:>9.4}% {:>10}",
                address.label,
                format_amount(b.balance, config.token.decimals),
                supply_share_pct(b.balance, config.token.decimals, config.token.total_supply),
                b.confidence
            ),
            None => println!("{:<20} {:>22} {:>10} {:>10}", address.label, "-", "-", "UNREAD"),
        }
    }
    Ok(())
}

fn status_command(cmd: StatusCmd, config: Config) -> Result<()> {
    let path = config.storage.state_path();
    let state = StateStore::read_snapshot(&path)
        .with_context(|| format!("Failed to read state file {}", path.display()))?;

    if cmd.format == OutputFormat::Json {
        let balances: serde_json::Map<String, serde_json::Value> = state
            .balances
            .iter()
            .map(|(label, b)| {
                let value = serde_json::json!({
                    "balance": b.balance,
                    "observed_at": b.observed_at,
                    "confidence": b.confidence,
                    "supply_pct": supply_share_pct(b.balance, config.token.decimals, config.token.total_supply),
                });
                (label.clone(), value)
            })
            .collect();
        let doc = serde_json::json!({ "updated_at": state.updated_at, "balances": balances });
        println!("{}", serde_json::to_string_pretty(&doc)?);
        return Ok(());
    }

    match state.updated_at {
        Some(at) => println!("State {} (updated {})", path.display(), at.format("%Y-%m-%d %H:%M:%S UTC")),
        None => println!("State {} (never flushed)", path.display()),
    }
    println!("{:<20} {:>22} {:>10} {:>10}  {}", "LABEL", "BALANCE", "SUPPLY %", "CONFIDENCE", "OBSERVED");
    for address in config.tracked_addresses() {
        match state.balances.get(&address.label) {
            Some(b) => println!(
                "{:<20} {:>22} {:>9.4}% {:>10}  {}",
                address.label,
                format_amount(b.balance, config.token.decimals),
                supply_share_pct(b.balance, config.token.decimals, config.token.total_supply),
                b.confidence,
                b.observed_at.format("%Y-%m-%d %H:%M:%S")
            ),
            None => println!("{:<20} {:>22} {:>10} {:>10}  -", address.label, "-", "-", "COLD"),
        }
    }
    Ok(())
}

fn history_command(cmd: HistoryCmd, config: Config) -> Result<()> {
    let log = EventLog::new(config.storage.log_path());
    let since = Utc::now() - cmd.since;
    let signals = log.read_since(since).context("Failed to read signal log")?;

    if signals.is_empty() {
        println!("No signals since {}", since.format("%Y-%m-%d %H:%M UTC"));
        return Ok(());
    }

    println!("{} signals since {}", signals.len(), since.format("%Y-%m-%d %H:%M UTC"));
    for s in &signals {
        println!(
            "{}  {:<8} {:<14} {:<28} {:>+9.2}%  {:>22}{}{}",
            s.timestamp.format("%Y-%m-%d %H:%M:%S"),
            s.severity,
            s.signal_type,
            s.label_list(),
            s.change_pct,
            format_amount(s.balance, config.token.decimals),
            s.counterparty.as_deref().map(|c| format!("  -> {}", c)).unwrap_or_default(),
            if s.requires_review { "  [REVIEW]" } else { "" }
        );
    }
    Ok(())
}

fn trend_command(cmd: TrendCmd, config: Config) -> Result<()> {
    let log = EventLog::new(config.storage.log_path());
    let signals = log.read_all().context("Failed to read signal log")?;

    let analyzer = TrendAnalyzer::new(config.trend.trend_config());
    let history = analyzer.analyze_until(&signals, Utc::now());
    let bias = analyzer.bias(&history);
    let days = analyzer.daily_coordination(&signals);

    let shown = match cmd.last {
        Some(n) => &history[history.len().saturating_sub(n)..],
        None => &history[..],
    };

    if cmd.format == OutputFormat::Json {
        let doc = serde_json::json!({
            "bias": bias,
            "phases": shown,
            "daily_coordination": days,
        });
        println!("{}", serde_json::to_string_pretty(&doc)?);
        return Ok(());
    }

    if shown.is_empty() {
        println!("No signals logged yet");
        return Ok(());
    }

    println!("{:<17} {:<14} {:<14} {:>8} {:>7} {:>5}", "WINDOW", "PHASE", "CANDIDATE", "SCORE", "SIGNALS", "CONF");
    for w in shown {
        println!(
            "{:<17} {:<14} {:<14} {:>+8.2} {:>7} {:>5}",
            w.window_start.format("%Y-%m-%d %H:%M"),
            w.phase,
            w.candidate,
            w.score,
            w.signal_count,
            w.confirmations
        );
    }

    let coordinated: Vec<_> = days
        .iter()
        .filter(|d| d.coordinated_buying || d.coordinated_selling)
        .collect();
    if !coordinated.is_empty() {
        println!();
        println!("Coordinated days:");
        for d in coordinated {
            println!(
                "  {}  buyers [{}]  sellers [{}]",
                d.day,
                d.buyers.join(", "),
                d.sellers.join(", ")
            );
        }
    }

    println!();
    println!("Bias: {}", bias);
    Ok(())
}

/// Raw base units as a decimal token amount
fn format_amount(raw: u64, decimals: u8) -> String {
    let scale = 10_u64.checked_pow(decimals as u32).unwrap_or(1);
    if scale == 1 {
        return raw.to_string();
    }
    format!("{}.{:0width$}", raw / scale, raw % scale, width = decimals as usize)
}
