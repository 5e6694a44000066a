//! Balance Monitor
//!
//! The poll scheduler. One cycle reads every tracked address concurrently,
//! runs the reads through the validation gate, diffs accepted balances
//! against the state store, then commits: state flush first, signal log
//! append second. Gate transitions are applied only after the flush
//! succeeds, so a failed flush leaves the monitor exactly where the durable
//! state says it is.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{watch, Semaphore};

use crate::config::Config;
use crate::domain::{
    AddressChange, BalanceReading, CexRegistry, EventLog, EventLogError, GateConfig, GateOutcome,
    GateVerdict, PersistError, ReadError, Severity, Signal, SignalDetector, StateStore,
    TrackedAddress, TransferEvidence, TrendAnalyzer, TrendBias, TrendConfig, TrendPhase,
    ValidatedBalance, ValidationGate,
};
use crate::ports::{BalanceSource, TransferLookup};

#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("State persistence failed: {0}")]
    Persist(#[from] PersistError),
    #[error("Signal log append failed: {0}")]
    EventLog(#[from] EventLogError),
    #[error("Monitor setup failed: {0}")]
    Setup(String),
}

/// Scheduling parameters
#[derive(Debug, Clone)]
pub struct MonitorSettings {
    pub poll_interval: Duration,
    pub max_concurrent_reads: usize,
    /// Recompute the trend every N cycles; 0 disables
    pub trend_every_cycles: u64,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(60),
            max_concurrent_reads: 8,
            trend_every_cycles: 5,
        }
    }
}

impl From<&Config> for MonitorSettings {
    fn from(config: &Config) -> Self {
        Self {
            poll_interval: config.monitor.poll_interval(),
            max_concurrent_reads: config.monitor.max_concurrent_reads,
            trend_every_cycles: config.monitor.trend_every_cycles,
        }
    }
}

/// Latest trend recomputation
#[derive(Debug, Clone)]
pub struct TrendSummary {
    pub history: Vec<TrendPhase>,
    pub bias: TrendBias,
}

/// What one poll cycle did
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub cycle: u64,
    pub started_at: DateTime<Utc>,
    /// Gate outcome per address, in config order
    pub outcomes: Vec<(String, GateOutcome)>,
    /// Balances persisted this cycle
    pub committed: Vec<ValidatedBalance>,
    pub signals: Vec<Signal>,
    pub trend: Option<TrendSummary>,
}

impl CycleReport {
    fn count(&self, name: &str) -> usize {
        self.outcomes.iter().filter(|(_, o)| o.name() == name).count()
    }

    pub fn failed(&self) -> usize {
        self.count("FAILED")
    }

    pub fn pending(&self) -> usize {
        self.count("PENDING_ZERO")
    }

    pub fn suspect(&self) -> usize {
        self.count("SUSPECT")
    }

    pub fn outcome(&self, label: &str) -> Option<&GateOutcome> {
        self.outcomes.iter().find(|(l, _)| l == label).map(|(_, o)| o)
    }
}

pub struct BalanceMonitor {
    addresses: Vec<TrackedAddress>,
    source: Arc<dyn BalanceSource>,
    lookup: Arc<dyn TransferLookup>,
    gate: ValidationGate,
    detector: SignalDetector,
    store: StateStore,
    log: EventLog,
    trend: TrendAnalyzer,
    settings: MonitorSettings,
    cycles: u64,
}

impl BalanceMonitor {
    /// Create a monitor over an already loaded store
    pub fn new(
        addresses: Vec<TrackedAddress>,
        source: Arc<dyn BalanceSource>,
        lookup: Arc<dyn TransferLookup>,
        store: StateStore,
        log: EventLog,
    ) -> Self {
        let mut monitor = Self {
            addresses,
            source,
            lookup,
            gate: ValidationGate::default(),
            detector: SignalDetector::default(),
            store,
            log,
            trend: TrendAnalyzer::default(),
            settings: MonitorSettings::default(),
            cycles: 0,
        };
        monitor.seed_gate();
        monitor
    }

    /// Build from config, loading durable state from the data directory
    pub fn from_config(
        config: &Config,
        source: Arc<dyn BalanceSource>,
        lookup: Arc<dyn TransferLookup>,
    ) -> Result<Self, MonitorError> {
        let store = StateStore::load(config.storage.state_path())?;
        let log = EventLog::new(config.storage.log_path());

        Ok(Self::new(config.tracked_addresses(), source, lookup, store, log)
            .with_gate_config(config.monitor.gate_config())
            .with_cex(CexRegistry::new(&config.cex_addresses()))
            .with_trend_config(config.trend.trend_config())
            .with_settings(MonitorSettings::from(config)))
    }

    pub fn with_gate_config(mut self, config: GateConfig) -> Self {
        self.gate = ValidationGate::new(config);
        self.seed_gate();
        self
    }

    pub fn with_cex(mut self, registry: CexRegistry) -> Self {
        self.detector = SignalDetector::new(registry);
        self
    }

    pub fn with_trend_config(mut self, config: TrendConfig) -> Self {
        self.trend = TrendAnalyzer::new(config);
        self
    }

    pub fn with_settings(mut self, settings: MonitorSettings) -> Self {
        self.settings = settings;
        self
    }

    fn seed_gate(&mut self) {
        for address in &self.addresses {
            if let Some(stored) = self.store.get(&address.label) {
                self.gate.seed(&stored);
            }
        }
    }

    pub fn addresses(&self) -> &[TrackedAddress] {
        &self.addresses
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    pub fn gate(&self) -> &ValidationGate {
        &self.gate
    }

    pub fn event_log(&self) -> &EventLog {
        &self.log
    }

    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    /// Run cycles until `shutdown` flips to true or its sender is dropped
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) -> Result<(), MonitorError> {
        tracing::info!(
            "Starting balance monitor - {} addresses via {}, poll interval: {:?}",
            self.addresses.len(),
            self.source.name(),
            self.settings.poll_interval
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            if let Err(e) = self.run_cycle().await {
                tracing::error!("Cycle error: {}", e);
                // Continue running; the next cycle starts from durable state
            }

            tokio::select! {
                _ = tokio::time::sleep(self.settings.poll_interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        tracing::info!("Balance monitor stopped after {} cycles", self.cycles);
        Ok(())
    }

    /// Poll once and return the committed balances
    pub async fn snapshot(&mut self) -> Result<Vec<ValidatedBalance>, MonitorError> {
        self.run_cycle().await?;
        Ok(self.current_balances())
    }

    /// Last committed balance for every tracked address, in config order
    pub fn current_balances(&self) -> Vec<ValidatedBalance> {
        self.addresses
            .iter()
            .filter_map(|a| self.store.get(&a.label))
            .collect()
    }

    /// One full poll cycle
    pub async fn run_cycle(&mut self) -> Result<CycleReport, MonitorError> {
        let started_at = Utc::now();
        let readings = self.read_all().await;
        let evidence = self.lookup_transfers(&readings).await;

        let verdicts: Vec<GateVerdict> = readings
            .iter()
            .zip(evidence.iter())
            .map(|(reading, ev)| self.gate.evaluate(reading, ev.as_ref()))
            .collect();

        for (address, verdict) in self.addresses.iter().zip(verdicts.iter()) {
            log_outcome(address, &verdict.outcome);
        }

        let priors: Vec<Option<ValidatedBalance>> = self
            .addresses
            .iter()
            .map(|a| self.store.get(&a.label))
            .collect();

        let changes: Vec<AddressChange<'_>> = self
            .addresses
            .iter()
            .zip(verdicts.iter())
            .zip(priors.iter())
            .zip(evidence.iter())
            .filter_map(|(((address, verdict), prior), ev)| {
                verdict.outcome.signal_candidate().map(|current| AddressChange {
                    address,
                    prior: prior.as_ref(),
                    current,
                    evidence: ev.as_ref(),
                })
            })
            .collect();
        let signals = self.detector.detect_cycle(&changes);

        let committed: Vec<ValidatedBalance> = verdicts
            .iter()
            .filter_map(|v| v.outcome.validated().cloned())
            .collect();

        if !committed.is_empty() {
            if let Err(e) = self.store.apply_and_flush(&committed) {
                tracing::error!(
                    "State flush failed, discarding cycle ({} signals dropped): {}",
                    signals.len(),
                    e
                );
                return Err(MonitorError::Persist(e));
            }
        }

        let outcomes: Vec<(String, GateOutcome)> = self
            .addresses
            .iter()
            .zip(verdicts)
            .map(|(address, verdict)| {
                self.gate.apply(&address.label, verdict.next);
                (address.label.clone(), verdict.outcome)
            })
            .collect();

        self.cycles += 1;
        let cycle = self.cycles;

        for signal in &signals {
            log_signal(signal);
        }
        self.log.append(&signals)?;

        let trend = if self.settings.trend_every_cycles > 0 && cycle % self.settings.trend_every_cycles == 0 {
            self.recompute_trend()
        } else {
            None
        };

        let report = CycleReport {
            cycle,
            started_at,
            outcomes,
            committed,
            signals,
            trend,
        };

        tracing::info!(
            "Cycle {} | {} addresses | {} failed | {} pending | {} suspect | {} signals",
            cycle,
            report.outcomes.len(),
            report.failed(),
            report.pending(),
            report.suspect(),
            report.signals.len()
        );

        Ok(report)
    }

    /// Read every address as its own task, bounded by the semaphore
    async fn read_all(&self) -> Vec<BalanceReading> {
        let permits = Arc::new(Semaphore::new(self.settings.max_concurrent_reads.max(1)));

        let handles: Vec<_> = self
            .addresses
            .iter()
            .cloned()
            .map(|address| {
                let source = Arc::clone(&self.source);
                let permits = Arc::clone(&permits);
                tokio::spawn(async move {
                    let _permit = permits.acquire_owned().await.ok();
                    source.fetch_balance(&address).await
                })
            })
            .collect();

        let mut readings = Vec::with_capacity(handles.len());
        for (address, handle) in self.addresses.iter().zip(handles) {
            let reading = match handle.await {
                Ok(reading) => reading,
                Err(e) => {
                    tracing::error!("Read task for {} failed: {}", address.label, e);
                    BalanceReading::failed(&address.label, ReadError::Transport(format!("read task failed: {}", e)))
                }
            };
            readings.push(reading);
        }
        readings
    }

    /// Fetch transfer evidence for reads that show a large drop or a zero
    async fn lookup_transfers(&self, readings: &[BalanceReading]) -> Vec<Option<TransferEvidence>> {
        let mut evidence = Vec::with_capacity(readings.len());

        for (address, reading) in self.addresses.iter().zip(readings) {
            let prior = self.gate.state(&address.label).accepted_balance();
            let needed = match (prior, reading.balance()) {
                (Some(prior), Some(current)) if current < prior => {
                    current == 0 || percent_drop(prior, current) >= address.alert_threshold_pct
                }
                _ => false,
            };

            if !needed {
                evidence.push(None);
                continue;
            }

            match self.lookup.latest_transfer(address).await {
                Ok(found) => evidence.push(found),
                Err(e) => {
                    tracing::warn!("Transfer lookup for {} failed: {}", address.label, e);
                    evidence.push(None);
                }
            }
        }

        evidence
    }

    /// Recompute phase history from the signal log
    pub fn recompute_trend(&self) -> Option<TrendSummary> {
        match self.log.read_all() {
            Ok(signals) => {
                let history = self.trend.analyze_until(&signals, Utc::now());
                let bias = self.trend.bias(&history);
                if let Some(latest) = history.last() {
                    tracing::info!(
                        "Trend: {} (candidate {}, score {:.2}) | bias {}",
                        latest.phase,
                        latest.candidate,
                        latest.score,
                        bias
                    );
                }
                Some(TrendSummary { history, bias })
            }
            Err(e) => {
                tracing::warn!("Trend recompute skipped: {}", e);
                None
            }
        }
    }
}

fn percent_drop(prior: u64, current: u64) -> f64 {
    if prior == 0 {
        return 0.0;
    }
    prior.saturating_sub(current) as f64 / prior as f64 * 100.0
}

fn log_outcome(address: &TrackedAddress, outcome: &GateOutcome) {
    match outcome {
        GateOutcome::Failed { error, consecutive_failures } => {
            tracing::warn!(
                "{}: read failed ({} in a row), carrying prior state: {}",
                address.label,
                consecutive_failures,
                error
            );
        }
        GateOutcome::PendingZero { prior, confirmations, required } => {
            tracing::info!(
                "{}: zero balance pending confirmation {}/{} (prior {})",
                address.label,
                confirmations,
                required,
                prior
            );
        }
        GateOutcome::Accepted(v) if v.is_suspect() => {
            tracing::warn!(
                "{}: suspicious change to {} accepted for review",
                address.label,
                v.balance
            );
        }
        GateOutcome::Baseline(v) => {
            tracing::info!("{}: baseline balance {}", address.label, v.balance);
        }
        GateOutcome::Accepted(v) => {
            tracing::debug!("{}: balance {} confirmed x{}", address.label, v.balance, v.confirmations);
        }
    }
}

fn log_signal(signal: &Signal) {
    let review = if signal.requires_review { " [REVIEW]" } else { "" };
    match signal.severity {
        Severity::Critical | Severity::Warning => tracing::warn!(
            "{} {} | {} | {:+.2}% ({:+}) -> {}{}",
            signal.severity,
            signal.signal_type,
            signal.label_list(),
            signal.change_pct,
            signal.change_abs,
            signal.balance,
            review
        ),
        Severity::Info => tracing::info!(
            "{} {} | {} | {:+.2}% ({:+}) -> {}{}",
            signal.severity,
            signal.signal_type,
            signal.label_list(),
            signal.change_pct,
            signal.change_abs,
            signal.balance,
            review
        ),
    }
}
