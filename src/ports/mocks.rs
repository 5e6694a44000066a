//! Scripted test doubles for the ports
//!
//! Used by unit and integration tests to drive the monitor through exact
//! read sequences without a network.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use async_trait::async_trait;

use crate::domain::{BalanceReading, ReadError, ReadOutcome, TrackedAddress, TransferEvidence};
use super::balance_source::{BalanceSource, TransferLookup};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Debug, Default)]
struct Script {
    queue: VecDeque<ReadOutcome>,
    last: Option<ReadOutcome>,
}

/// Balance source that replays a per-label script of outcomes
///
/// Once a label's script runs out, its last outcome repeats. A label that was
/// never scripted reads as a transport failure.
#[derive(Debug, Clone, Default)]
pub struct MockBalanceSource {
    scripts: Arc<Mutex<HashMap<String, Script>>>,
    panicking: Arc<Mutex<HashSet<String>>>,
    calls: Arc<Mutex<Vec<String>>>,
}

impl MockBalanceSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method to queue balances for a label
    pub fn with_balances(self, label: &str, balances: &[u64]) -> Self {
        for b in balances {
            self.push(label, ReadOutcome::Balance(*b));
        }
        self
    }

    /// Builder method to queue one failed read for a label
    pub fn with_failure(self, label: &str, error: ReadError) -> Self {
        self.push(label, ReadOutcome::Failed(error));
        self
    }

    /// Builder method making every read of a label panic
    pub fn with_panic(self, label: &str) -> Self {
        lock(&self.panicking).insert(label.to_string());
        self
    }

    /// Queue an outcome after construction
    pub fn push(&self, label: &str, outcome: ReadOutcome) {
        lock(&self.scripts)
            .entry(label.to_string())
            .or_default()
            .queue
            .push_back(outcome);
    }

    /// Labels read so far, in call order
    pub fn get_calls(&self) -> Vec<String> {
        lock(&self.calls).clone()
    }

    pub fn call_count(&self, label: &str) -> usize {
        lock(&self.calls).iter().filter(|l| *l == label).count()
    }

    fn next_outcome(&self, label: &str) -> ReadOutcome {
        let mut scripts = lock(&self.scripts);
        let script = scripts.entry(label.to_string()).or_default();
        match script.queue.pop_front() {
            Some(outcome) => {
                script.last = Some(outcome.clone());
                outcome
            }
            None => script
                .last
                .clone()
                .unwrap_or_else(|| ReadOutcome::Failed(ReadError::Transport("no scripted read".to_string()))),
        }
    }
}

#[async_trait]
impl BalanceSource for MockBalanceSource {
    async fn fetch_balance(&self, address: &TrackedAddress) -> BalanceReading {
        lock(&self.calls).push(address.label.clone());

        if lock(&self.panicking).contains(&address.label) {
            panic!("scripted panic reading {}", address.label);
        }

        match self.next_outcome(&address.label) {
            ReadOutcome::Balance(b) => BalanceReading::ok(&address.label, b).with_endpoint("mock"),
            ReadOutcome::Failed(e) => BalanceReading::failed(&address.label, e).with_endpoint("mock"),
        }
    }

    fn name(&self) -> &str {
        "mock"
    }
}

/// Transfer lookup answering from a fixed table of evidence
#[derive(Debug, Clone, Default)]
pub struct StaticTransferLookup {
    evidence: Arc<Mutex<HashMap<String, TransferEvidence>>>,
    calls: Arc<Mutex<Vec<String>>>,
}

impl StaticTransferLookup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_evidence(self, label: &str, evidence: TransferEvidence) -> Self {
        lock(&self.evidence).insert(label.to_string(), evidence);
        self
    }

    pub fn get_calls(&self) -> Vec<String> {
        lock(&self.calls).clone()
    }
}

#[async_trait]
impl TransferLookup for StaticTransferLookup {
    async fn latest_transfer(
        &self,
        address: &TrackedAddress,
    ) -> Result<Option<TransferEvidence>, ReadError> {
        lock(&self.calls).push(address.label.clone());
        Ok(lock(&self.evidence).get(&address.label).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_script_replays_then_repeats_last() {
        let source = MockBalanceSource::new().with_balances("w", &[10, 20]);
        let address = TrackedAddress::wallet("w", "11111111111111111111111111111111");

        assert_eq!(source.fetch_balance(&address).await.balance(), Some(10));
        assert_eq!(source.fetch_balance(&address).await.balance(), Some(20));
        assert_eq!(source.fetch_balance(&address).await.balance(), Some(20));
        assert_eq!(source.call_count("w"), 3);
    }

    #[tokio::test]
    async fn test_unscripted_label_fails() {
        let source = MockBalanceSource::new();
        let address = TrackedAddress::wallet("ghost", "11111111111111111111111111111111");

        let reading = source.fetch_balance(&address).await;
        assert!(matches!(reading.outcome, ReadOutcome::Failed(ReadError::Transport(_))));
    }

    #[tokio::test]
    async fn test_static_lookup() {
        let evidence = TransferEvidence {
            signature: "sig".to_string(),
            outgoing: true,
            amount: 5,
            destinations: vec!["dest".to_string()],
            block_time: None,
        };
        let lookup = StaticTransferLookup::new().with_evidence("w", evidence.clone());
        let address = TrackedAddress::wallet("w", "11111111111111111111111111111111");

        assert_eq!(lookup.latest_transfer(&address).await.unwrap(), Some(evidence));
        assert_eq!(lookup.get_calls(), vec!["w".to_string()]);
    }
}
