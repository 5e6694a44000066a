//! Validation Gate
//!
//! Decides whether a raw balance read can be trusted before it reaches the
//! signal detector or the state store. Guards against the failure class
//! where an RPC error is mistaken for a wallet being emptied.
//!
//! Per-address states:
//! - `Cold`: no baseline yet, the first good read becomes the baseline
//! - `Stable`: last accepted balance
//! - `PendingZero`: a zero was read against a nonzero baseline and is
//!   waiting for more zero reads or an outgoing transfer on chain
//!
//! `evaluate` never mutates the gate. It returns the proposed next state,
//! which the caller applies once the cycle has been persisted.

use chrono::{DateTime, Utc};
use std::collections::HashMap;

use super::balance::{
    BalanceReading, Confidence, ReadError, ReadOutcome, TransferEvidence, ValidatedBalance,
};

/// Consecutive zero reads needed to accept a drop to zero
pub const DEFAULT_ZERO_CONFIRMATIONS: u32 = 2;

/// Changes larger than this share of the prior balance are suspect (percent)
pub const DEFAULT_SUSPECT_CHANGE_PCT: f64 = 50.0;

/// Gate tuning
#[derive(Debug, Clone)]
pub struct GateConfig {
    pub zero_confirmations: u32,
    pub suspect_change_pct: f64,
    /// Reads within this many base units of the baseline count as unchanged
    pub balance_epsilon: u64,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            zero_confirmations: DEFAULT_ZERO_CONFIRMATIONS,
            suspect_change_pct: DEFAULT_SUSPECT_CHANGE_PCT,
            balance_epsilon: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub enum GateState {
    #[default]
    Cold,
    Stable {
        balance: u64,
        observed_at: DateTime<Utc>,
    },
    PendingZero {
        prior: u64,
        prior_observed_at: DateTime<Utc>,
        confirmations: u32,
    },
}

impl GateState {
    /// Last accepted balance, if any
    pub fn accepted_balance(&self) -> Option<u64> {
        match self {
            GateState::Cold => None,
            GateState::Stable { balance, .. } => Some(*balance),
            GateState::PendingZero { prior, .. } => Some(*prior),
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, GateState::PendingZero { .. })
    }
}

/// Gate bookkeeping for one address
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AddressGate {
    pub state: GateState,
    /// Run of reads agreeing with the current baseline
    pub identical_reads: u32,
    /// Failed reads since startup
    pub failures: u64,
    pub consecutive_failures: u32,
}

/// Classification of one read
#[derive(Debug, Clone, PartialEq)]
pub enum GateOutcome {
    /// Read failed; previous state carried forward
    Failed {
        error: ReadError,
        consecutive_failures: u32,
    },
    /// First good read for a cold address; never produces a signal
    Baseline(ValidatedBalance),
    /// Accepted value, `Confirmed` or `Suspect`
    Accepted(ValidatedBalance),
    /// Zero read awaiting confirmation; no signal, no state change
    PendingZero {
        prior: u64,
        confirmations: u32,
        required: u32,
    },
}

impl GateOutcome {
    /// Balance to persist this cycle, if any
    pub fn validated(&self) -> Option<&ValidatedBalance> {
        match self {
            GateOutcome::Baseline(v) | GateOutcome::Accepted(v) => Some(v),
            _ => None,
        }
    }

    /// Balance the signal detector may diff against the stored state
    pub fn signal_candidate(&self) -> Option<&ValidatedBalance> {
        match self {
            GateOutcome::Accepted(v) => Some(v),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            GateOutcome::Failed { .. } => "FAILED",
            GateOutcome::Baseline(_) => "BASELINE",
            GateOutcome::Accepted(v) if v.is_suspect() => "SUSPECT",
            GateOutcome::Accepted(_) => "CONFIRMED",
            GateOutcome::PendingZero { .. } => "PENDING_ZERO",
        }
    }
}

/// Outcome plus the state to apply if the cycle commits
#[derive(Debug, Clone)]
pub struct GateVerdict {
    pub outcome: GateOutcome,
    pub next: AddressGate,
}

/// Per-address read validation
#[derive(Debug, Default)]
pub struct ValidationGate {
    config: GateConfig,
    addresses: HashMap<String, AddressGate>,
}

impl ValidationGate {
    pub fn new(config: GateConfig) -> Self {
        Self {
            config,
            addresses: HashMap::new(),
        }
    }

    pub fn config(&self) -> &GateConfig {
        &self.config
    }

    /// Start an address from a persisted balance instead of cold
    pub fn seed(&mut self, stored: &ValidatedBalance) {
        let entry = self.addresses.entry(stored.label.clone()).or_default();
        entry.state = GateState::Stable {
            balance: stored.balance,
            observed_at: stored.observed_at,
        };
        entry.identical_reads = stored.confirmations.max(1);
    }

    pub fn state(&self, label: &str) -> GateState {
        self.addresses
            .get(label)
            .map(|g| g.state.clone())
            .unwrap_or_default()
    }

    pub fn failure_count(&self, label: &str) -> u64 {
        self.addresses.get(label).map_or(0, |g| g.failures)
    }

    /// Commit a verdict's next state
    pub fn apply(&mut self, label: &str, next: AddressGate) {
        self.addresses.insert(label.to_string(), next);
    }

    /// Classify a read without changing gate state
    pub fn evaluate(
        &self,
        reading: &BalanceReading,
        evidence: Option<&TransferEvidence>,
    ) -> GateVerdict {
        let mut next = self
            .addresses
            .get(&reading.label)
            .cloned()
            .unwrap_or_default();

        let value = match &reading.outcome {
            ReadOutcome::Failed(error) => {
                next.failures += 1;
                next.consecutive_failures += 1;
                return GateVerdict {
                    outcome: GateOutcome::Failed {
                        error: error.clone(),
                        consecutive_failures: next.consecutive_failures,
                    },
                    next,
                };
            }
            ReadOutcome::Balance(value) => *value,
        };
        next.consecutive_failures = 0;

        let outcome = match next.state.clone() {
            GateState::Cold => {
                next.state = GateState::Stable {
                    balance: value,
                    observed_at: reading.read_at,
                };
                next.identical_reads = 1;
                GateOutcome::Baseline(ValidatedBalance::confirmed(
                    reading.label.clone(),
                    value,
                    reading.read_at,
                ))
            }
            GateState::Stable { balance, observed_at } => {
                self.judge(&mut next, reading, balance, observed_at, value, 0, evidence)
            }
            GateState::PendingZero {
                prior,
                prior_observed_at,
                confirmations,
            } => {
                let so_far = if value == 0 { confirmations } else { 0 };
                if value != 0 {
                    tracing::info!(
                        "{}: pending zero abandoned, read {} against baseline {}",
                        reading.label,
                        value,
                        prior
                    );
                }
                self.judge(&mut next, reading, prior, prior_observed_at, value, so_far, evidence)
            }
        };

        GateVerdict { outcome, next }
    }

    fn judge(
        &self,
        next: &mut AddressGate,
        reading: &BalanceReading,
        prior: u64,
        prior_observed_at: DateTime<Utc>,
        value: u64,
        zero_reads_so_far: u32,
        evidence: Option<&TransferEvidence>,
    ) -> GateOutcome {
        let label = reading.label.clone();

        if value.abs_diff(prior) <= self.config.balance_epsilon {
            next.identical_reads = if next.state.is_pending() {
                1
            } else {
                next.identical_reads.saturating_add(1)
            };
            next.state = GateState::Stable {
                balance: value,
                observed_at: reading.read_at,
            };
            return GateOutcome::Accepted(ValidatedBalance {
                label,
                balance: value,
                confidence: Confidence::Confirmed,
                confirmations: next.identical_reads,
                observed_at: reading.read_at,
            });
        }

        if value == 0 && prior > 0 {
            let confirmations = zero_reads_so_far + 1;
            let required = self.config.zero_confirmations.max(1);
            let on_chain = evidence.map_or(false, |e| e.confirms_outgoing_since(prior_observed_at));

            if confirmations >= required || on_chain {
                next.state = GateState::Stable {
                    balance: 0,
                    observed_at: reading.read_at,
                };
                next.identical_reads = confirmations;
                return GateOutcome::Accepted(ValidatedBalance {
                    label,
                    balance: 0,
                    confidence: Confidence::Confirmed,
                    confirmations,
                    observed_at: reading.read_at,
                });
            }

            tracing::debug!(
                "{}: zero read {}/{} against baseline {}",
                reading.label,
                confirmations,
                required,
                prior
            );
            next.state = GateState::PendingZero {
                prior,
                prior_observed_at,
                confirmations,
            };
            return GateOutcome::PendingZero {
                prior,
                confirmations,
                required,
            };
        }

        let change_pct = if prior == 0 {
            100.0
        } else {
            value.abs_diff(prior) as f64 / prior as f64 * 100.0
        };
        let confidence = if change_pct > self.config.suspect_change_pct {
            Confidence::Suspect
        } else {
            Confidence::Confirmed
        };

        next.state = GateState::Stable {
            balance: value,
            observed_at: reading.read_at,
        };
        next.identical_reads = 1;

        GateOutcome::Accepted(ValidatedBalance {
            label,
            balance: value,
            confidence,
            confirmations: 1,
            observed_at: reading.read_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const B: u64 = 10_000_000;

    /// Run a read through the gate and commit its next state
    fn feed(gate: &mut ValidationGate, reading: BalanceReading) -> GateOutcome {
        feed_with(gate, reading, None)
    }

    fn feed_with(
        gate: &mut ValidationGate,
        reading: BalanceReading,
        evidence: Option<&TransferEvidence>,
    ) -> GateOutcome {
        let label = reading.label.clone();
        let verdict = gate.evaluate(&reading, evidence);
        gate.apply(&label, verdict.next);
        verdict.outcome
    }

    fn seeded_gate(balance: u64) -> ValidationGate {
        let mut gate = ValidationGate::new(GateConfig::default());
        feed(&mut gate, BalanceReading::ok("w", balance));
        gate
    }

    #[test]
    fn test_cold_start_is_baseline() {
        let mut gate = ValidationGate::new(GateConfig::default());
        let outcome = feed(&mut gate, BalanceReading::ok("w", B));

        assert!(matches!(outcome, GateOutcome::Baseline(ref v) if v.balance == B));
        assert!(outcome.signal_candidate().is_none());
        assert_eq!(gate.state("w").accepted_balance(), Some(B));
    }

    #[test]
    fn test_failed_read_leaves_state_unchanged() {
        let mut gate = seeded_gate(B);
        let before = gate.state("w");

        let outcome = feed(&mut gate, BalanceReading::failed("w", ReadError::Timeout(1000)));

        assert!(matches!(outcome, GateOutcome::Failed { consecutive_failures: 1, .. }));
        assert!(outcome.validated().is_none());
        assert_eq!(gate.state("w"), before);
        assert_eq!(gate.failure_count("w"), 1);
    }

    #[test]
    fn test_identical_reads_count_confirmations() {
        let mut gate = seeded_gate(B);
        feed(&mut gate, BalanceReading::ok("w", B));
        let outcome = feed(&mut gate, BalanceReading::ok("w", B));

        match outcome {
            GateOutcome::Accepted(v) => {
                assert_eq!(v.confidence, Confidence::Confirmed);
                assert_eq!(v.confirmations, 3);
            }
            other => panic!("expected accepted, got {:?}", other),
        }
    }

    #[test]
    fn test_single_zero_read_is_pending() {
        let mut gate = seeded_gate(B);
        let outcome = feed(&mut gate, BalanceReading::ok("w", 0));

        assert_eq!(
            outcome,
            GateOutcome::PendingZero { prior: B, confirmations: 1, required: 2 }
        );
        assert!(outcome.validated().is_none());
        assert!(gate.state("w").is_pending());
    }

    #[test]
    fn test_second_zero_read_confirms() {
        let mut gate = seeded_gate(B);
        feed(&mut gate, BalanceReading::ok("w", 0));
        let outcome = feed(&mut gate, BalanceReading::ok("w", 0));

        match outcome {
            GateOutcome::Accepted(v) => {
                assert_eq!(v.balance, 0);
                assert_eq!(v.confidence, Confidence::Confirmed);
                assert_eq!(v.confirmations, 2);
            }
            other => panic!("expected confirmed zero, got {:?}", other),
        }
        assert_eq!(gate.state("w").accepted_balance(), Some(0));
    }

    #[test]
    fn test_failure_between_zero_reads_keeps_pending_count() {
        let mut gate = seeded_gate(B);
        feed(&mut gate, BalanceReading::ok("w", 0));
        feed(&mut gate, BalanceReading::failed("w", ReadError::Transport("reset".into())));
        assert!(gate.state("w").is_pending());

        let outcome = feed(&mut gate, BalanceReading::ok("w", 0));
        assert!(matches!(outcome, GateOutcome::Accepted(ref v) if v.balance == 0));
    }

    #[test]
    fn test_on_chain_transfer_confirms_zero_immediately() {
        let mut gate = seeded_gate(B);
        let evidence = TransferEvidence {
            signature: "sig".to_string(),
            outgoing: true,
            amount: B,
            destinations: vec!["Dest".to_string()],
            block_time: Some(Utc::now()),
        };

        let outcome = feed_with(&mut gate, BalanceReading::ok("w", 0), Some(&evidence));
        assert!(matches!(outcome, GateOutcome::Accepted(ref v) if v.balance == 0 && v.confirmations == 1));
    }

    #[test]
    fn test_stale_transfer_does_not_confirm_zero() {
        let mut gate = seeded_gate(B);
        let evidence = TransferEvidence {
            signature: "old".to_string(),
            outgoing: true,
            amount: B,
            destinations: vec![],
            block_time: Some(Utc::now() - chrono::Duration::days(3)),
        };

        let outcome = feed_with(&mut gate, BalanceReading::ok("w", 0), Some(&evidence));
        assert!(matches!(outcome, GateOutcome::PendingZero { .. }));
    }

    #[test]
    fn test_nonzero_read_abandons_pending_zero() {
        let mut gate = seeded_gate(B);
        feed(&mut gate, BalanceReading::ok("w", 0));

        let outcome = feed(&mut gate, BalanceReading::ok("w", B));
        assert!(matches!(outcome, GateOutcome::Accepted(ref v) if v.balance == B && v.confidence == Confidence::Confirmed));
        assert!(!gate.state("w").is_pending());

        // A fresh zero starts counting from one again
        let outcome = feed(&mut gate, BalanceReading::ok("w", 0));
        assert!(matches!(outcome, GateOutcome::PendingZero { confirmations: 1, .. }));
    }

    #[test]
    fn test_large_move_is_suspect() {
        let mut gate = seeded_gate(B);
        let outcome = feed(&mut gate, BalanceReading::ok("w", B * 3));

        match outcome {
            GateOutcome::Accepted(v) => {
                assert_eq!(v.confidence, Confidence::Suspect);
                assert_eq!(v.balance, B * 3);
            }
            other => panic!("expected suspect, got {:?}", other),
        }
        // State still moves so the address does not freeze
        assert_eq!(gate.state("w").accepted_balance(), Some(B * 3));
    }

    #[test]
    fn test_moderate_move_is_confirmed() {
        let mut gate = seeded_gate(B);
        let outcome = feed(&mut gate, BalanceReading::ok("w", B - B / 5));
        assert!(matches!(outcome, GateOutcome::Accepted(ref v) if v.confidence == Confidence::Confirmed));
    }

    #[test]
    fn test_growth_from_zero_is_suspect() {
        let mut gate = seeded_gate(0);
        let outcome = feed(&mut gate, BalanceReading::ok("w", 500));
        assert!(matches!(outcome, GateOutcome::Accepted(ref v) if v.is_suspect()));
    }

    #[test]
    fn test_epsilon_treats_dust_as_unchanged() {
        let mut gate = ValidationGate::new(GateConfig { balance_epsilon: 10, ..GateConfig::default() });
        feed(&mut gate, BalanceReading::ok("w", 1_000));
        let outcome = feed(&mut gate, BalanceReading::ok("w", 1_005));
        assert!(matches!(outcome, GateOutcome::Accepted(ref v) if v.confirmations == 2));
    }

    #[test]
    fn test_evaluate_does_not_mutate() {
        let gate = seeded_gate(B);
        let before = gate.state("w");
        let _ = gate.evaluate(&BalanceReading::ok("w", 0), None);
        let _ = gate.evaluate(&BalanceReading::ok("w", 0), None);
        assert_eq!(gate.state("w"), before);
    }

    #[test]
    fn test_seed_from_store() {
        let mut gate = ValidationGate::new(GateConfig::default());
        gate.seed(&ValidatedBalance::confirmed("w", B, Utc::now()));
        let outcome = feed(&mut gate, BalanceReading::ok("w", 0));
        assert!(matches!(outcome, GateOutcome::PendingZero { prior: B, .. }));
    }

    #[test]
    fn test_outcome_names() {
        let mut gate = seeded_gate(B);
        assert_eq!(feed(&mut gate, BalanceReading::ok("w", B)).name(), "CONFIRMED");
        assert_eq!(feed(&mut gate, BalanceReading::ok("w", 0)).name(), "PENDING_ZERO");
        assert_eq!(
            feed(&mut gate, BalanceReading::failed("w", ReadError::Timeout(1))).name(),
            "FAILED"
        );
    }
}
