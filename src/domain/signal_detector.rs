//! Signal Detector
//!
//! Turns accepted balance changes into typed signals. Per-address rules map
//! the percentage delta to BUY / SELL / CEX_TRANSFER (wallets) or
//! LIQUIDITY_ADD / LIQUIDITY_DROP (pools); cross-address rules look at one
//! poll cycle's signals and emit ACCUMULATION / DISTRIBUTION when two or more
//! wallets move the same way.

use chrono::{DateTime, Utc};
use std::collections::BTreeSet;

use super::address::{CexRegistry, TrackedAddress};
use super::balance::{TransferEvidence, ValidatedBalance};
use super::signal::{Severity, Signal, SignalType};

/// Distinct wallets moving the same way needed for a coordinated signal
pub const MIN_COORDINATED_WALLETS: usize = 2;

/// One address's accepted change within a cycle
#[derive(Debug, Clone, Copy)]
pub struct AddressChange<'a> {
    pub address: &'a TrackedAddress,
    pub prior: Option<&'a ValidatedBalance>,
    pub current: &'a ValidatedBalance,
    pub evidence: Option<&'a TransferEvidence>,
}

/// Percentage change relative to `prior`; growth from zero counts as +100%
pub fn percent_change(prior: u64, current: u64) -> f64 {
    if prior == 0 {
        return if current > 0 { 100.0 } else { 0.0 };
    }
    (current as f64 - prior as f64) / prior as f64 * 100.0
}

fn signed_delta(prior: u64, current: u64) -> i64 {
    let delta = current as i128 - prior as i128;
    delta.clamp(i64::MIN as i128, i64::MAX as i128) as i64
}

#[derive(Debug, Clone, Default)]
pub struct SignalDetector {
    cex: CexRegistry,
}

impl SignalDetector {
    pub fn new(cex: CexRegistry) -> Self {
        Self { cex }
    }

    /// Classify one address's change; `None` when below threshold or cold
    pub fn classify(&self, change: &AddressChange<'_>) -> Option<Signal> {
        let prior = change.prior?;
        let current = change.current;
        let address = change.address;

        if current.balance == prior.balance {
            return None;
        }
        if address.is_pool && prior.balance == 0 {
            return None;
        }

        let pct = percent_change(prior.balance, current.balance);
        if pct.abs() < address.alert_threshold_pct {
            return None;
        }

        let delta = signed_delta(prior.balance, current.balance);
        let increase = delta > 0;
        let tx = change.evidence.map(|e| e.signature.clone());

        let signal = if address.is_pool {
            let (signal_type, severity) = if increase {
                (SignalType::LiquidityAdd, Severity::Info)
            } else {
                (SignalType::LiquidityDrop, Severity::Warning)
            };
            Signal::new(signal_type, &address.label, current.balance, delta, pct, severity, current.observed_at)
        } else if increase {
            Signal::new(SignalType::Buy, &address.label, current.balance, delta, pct, Severity::Info, current.observed_at)
        } else {
            let exchange = change
                .evidence
                .and_then(|e| self.cex.first_match(&e.destinations));
            match exchange {
                Some(cex_label) => Signal::new(
                    SignalType::CexTransfer,
                    &address.label,
                    current.balance,
                    delta,
                    pct,
                    Severity::Critical,
                    current.observed_at,
                )
                .with_counterparty(cex_label),
                None => Signal::new(
                    SignalType::Sell,
                    &address.label,
                    current.balance,
                    delta,
                    pct,
                    Severity::Warning,
                    current.observed_at,
                ),
            }
        };

        Some(signal.with_tx(tx).flagged_for_review(current.is_suspect()))
    }

    /// Coordinated-activity signals for a single cycle's individual signals
    pub fn aggregate(&self, cycle_signals: &[Signal]) -> Vec<Signal> {
        let mut out = Vec::new();
        if let Some(s) = Self::coordinated(cycle_signals, SignalType::Buy, SignalType::Accumulation, Severity::Info) {
            out.push(s);
        }
        if let Some(s) = Self::coordinated(cycle_signals, SignalType::Sell, SignalType::Distribution, Severity::Warning) {
            out.push(s);
        }
        out
    }

    /// Individual signals for every change followed by the cycle's aggregates
    pub fn detect_cycle(&self, changes: &[AddressChange<'_>]) -> Vec<Signal> {
        let mut signals: Vec<Signal> = changes.iter().filter_map(|c| self.classify(c)).collect();
        let aggregates = self.aggregate(&signals);
        signals.extend(aggregates);
        signals
    }

    fn coordinated(
        signals: &[Signal],
        member: SignalType,
        kind: SignalType,
        severity: Severity,
    ) -> Option<Signal> {
        let mut seen = BTreeSet::new();
        let members: Vec<&Signal> = signals
            .iter()
            .filter(|s| s.signal_type == member)
            .filter(|s| s.labels.first().map_or(false, |l| seen.insert(l.clone())))
            .collect();

        if members.len() < MIN_COORDINATED_WALLETS {
            return None;
        }

        let labels: Vec<String> = members.iter().filter_map(|s| s.labels.first().cloned()).collect();
        let balance: u64 = members.iter().map(|s| s.balance).fold(0u64, u64::saturating_add);
        let change_abs: i64 = members.iter().map(|s| s.change_abs).fold(0i64, i64::saturating_add);
        let prior_total = balance as i128 - change_abs as i128;
        let change_pct = if prior_total > 0 {
            change_abs as f64 / prior_total as f64 * 100.0
        } else {
            100.0
        };
        let timestamp: DateTime<Utc> = members
            .iter()
            .map(|s| s.timestamp)
            .max()
            .unwrap_or_else(Utc::now);

        Some(Signal {
            signal_type: kind,
            labels,
            balance,
            change_pct,
            change_abs,
            timestamp,
            tx_signature: None,
            severity,
            counterparty: None,
            requires_review: members.iter().any(|s| s.requires_review),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::address::CexAddress;
    use crate::domain::balance::Confidence;
    use approx::assert_relative_eq;

    fn vb(label: &str, balance: u64) -> ValidatedBalance {
        ValidatedBalance::confirmed(label, balance, Utc::now())
    }

    fn detector() -> SignalDetector {
        SignalDetector::new(CexRegistry::new(&[CexAddress {
            label: "binance_hot".to_string(),
            address: "BinanceHot111".to_string(),
        }]))
    }

    fn change<'a>(
        address: &'a TrackedAddress,
        prior: &'a ValidatedBalance,
        current: &'a ValidatedBalance,
    ) -> AddressChange<'a> {
        AddressChange { address, prior: Some(prior), current, evidence: None }
    }

    #[test]
    fn test_percent_change() {
        assert_relative_eq!(percent_change(1000, 1023), 2.3, epsilon = 1e-9);
        assert_relative_eq!(percent_change(1000, 0), -100.0);
        assert_eq!(percent_change(0, 5), 100.0);
        assert_eq!(percent_change(0, 0), 0.0);
    }

    #[test]
    fn test_buy_above_threshold() {
        let addr = TrackedAddress::wallet("w1", "A1");
        let (p, c) = (vb("w1", 1_000_000), vb("w1", 1_023_000));
        let signal = detector().classify(&change(&addr, &p, &c)).unwrap();

        assert_eq!(signal.signal_type, SignalType::Buy);
        assert_eq!(signal.severity, Severity::Info);
        assert_eq!(signal.change_abs, 23_000);
        assert_eq!(signal.balance, 1_023_000);
        assert_relative_eq!(signal.change_pct, 2.3, epsilon = 1e-9);
    }

    #[test]
    fn test_below_threshold_is_silent() {
        let addr = TrackedAddress::wallet("w1", "A1");
        let (p, c) = (vb("w1", 1_000_000), vb("w1", 1_005_000));
        assert!(detector().classify(&change(&addr, &p, &c)).is_none());
    }

    #[test]
    fn test_cold_address_is_silent() {
        let addr = TrackedAddress::wallet("w1", "A1");
        let c = vb("w1", 5_000_000);
        let ch = AddressChange { address: &addr, prior: None, current: &c, evidence: None };
        assert!(detector().classify(&ch).is_none());
    }

    #[test]
    fn test_sell_without_cex_destination() {
        let addr = TrackedAddress::wallet("w1", "A1");
        let (p, c) = (vb("w1", 1_000_000), vb("w1", 900_000));
        let signal = detector().classify(&change(&addr, &p, &c)).unwrap();

        assert_eq!(signal.signal_type, SignalType::Sell);
        assert_eq!(signal.severity, Severity::Warning);
        assert_eq!(signal.change_abs, -100_000);
    }

    #[test]
    fn test_cex_transfer_when_destination_known() {
        let addr = TrackedAddress::wallet("W4", "A4");
        let (p, c) = (vb("W4", 10_000_000), vb("W4", 0));
        let evidence = TransferEvidence {
            signature: "5xCexSig".to_string(),
            outgoing: true,
            amount: 10_000_000,
            destinations: vec!["BinanceHot111".to_string()],
            block_time: Some(Utc::now()),
        };
        let ch = AddressChange { address: &addr, prior: Some(&p), current: &c, evidence: Some(&evidence) };
        let signal = detector().classify(&ch).unwrap();

        assert_eq!(signal.signal_type, SignalType::CexTransfer);
        assert_eq!(signal.severity, Severity::Critical);
        assert_eq!(signal.change_abs, -10_000_000);
        assert_relative_eq!(signal.change_pct, -100.0);
        assert_eq!(signal.counterparty.as_deref(), Some("binance_hot"));
        assert_eq!(signal.tx_signature.as_deref(), Some("5xCexSig"));
    }

    #[test]
    fn test_pool_maps_to_liquidity_signals() {
        let pool = TrackedAddress::pool("meteora", "P1");
        let (p, up, down) = (vb("meteora", 1_000_000), vb("meteora", 1_100_000), vb("meteora", 800_000));

        let add = detector().classify(&change(&pool, &p, &up)).unwrap();
        assert_eq!(add.signal_type, SignalType::LiquidityAdd);
        assert_eq!(add.severity, Severity::Info);

        let drop = detector().classify(&change(&pool, &p, &down)).unwrap();
        assert_eq!(drop.signal_type, SignalType::LiquidityDrop);
        assert_eq!(drop.severity, Severity::Warning);
    }

    #[test]
    fn test_pool_uses_its_higher_threshold() {
        let pool = TrackedAddress::pool("meteora", "P1");
        let (p, c) = (vb("meteora", 1_000_000), vb("meteora", 1_030_000));
        assert!(detector().classify(&change(&pool, &p, &c)).is_none());
    }

    #[test]
    fn test_suspect_balance_flags_signal() {
        let addr = TrackedAddress::wallet("w1", "A1");
        let p = vb("w1", 1_000_000);
        let mut c = vb("w1", 5_000_000);
        c.confidence = Confidence::Suspect;
        let signal = detector().classify(&change(&addr, &p, &c)).unwrap();
        assert!(signal.requires_review);
    }

    #[test]
    fn test_accumulation_scenario() {
        let w1 = TrackedAddress::wallet("W1", "A1");
        let w2 = TrackedAddress::wallet("W2", "A2");
        let w3 = TrackedAddress::wallet("W3", "A3");
        let (p1, c1) = (vb("W1", 1_000_000), vb("W1", 1_023_000));
        let (p2, c2) = (vb("W2", 2_000_000), vb("W2", 2_036_000));
        let (p3, c3) = (vb("W3", 3_000_000), vb("W3", 3_000_000));

        let signals = detector().detect_cycle(&[
            change(&w1, &p1, &c1),
            change(&w2, &p2, &c2),
            change(&w3, &p3, &c3),
        ]);

        let kinds: Vec<_> = signals.iter().map(|s| s.signal_type).collect();
        assert_eq!(kinds, vec![SignalType::Buy, SignalType::Buy, SignalType::Accumulation]);
        assert_eq!(signals[0].labels, vec!["W1"]);
        assert_eq!(signals[1].labels, vec!["W2"]);
        assert_eq!(signals[2].labels, vec!["W1", "W2"]);
        assert_eq!(signals[2].change_abs, 59_000);
        assert!(!signals.iter().any(|s| s.involves("W3")));
    }

    #[test]
    fn test_distribution_needs_two_distinct_sellers() {
        let t = Utc::now();
        let sell = |label: &str| Signal::new(SignalType::Sell, label, 90, -10, -10.0, Severity::Warning, t);

        assert!(detector().aggregate(&[sell("W1")]).is_empty());
        assert!(detector().aggregate(&[sell("W1"), sell("W1")]).is_empty());

        let out = detector().aggregate(&[sell("W1"), sell("W2")]);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].signal_type, SignalType::Distribution);
        assert_eq!(out[0].severity, Severity::Warning);
        assert_relative_eq!(out[0].change_pct, -10.0, epsilon = 1e-9);
    }

    #[test]
    fn test_cex_transfers_do_not_count_as_distribution() {
        let t = Utc::now();
        let signals = vec![
            Signal::new(SignalType::CexTransfer, "W1", 0, -10, -100.0, Severity::Critical, t),
            Signal::new(SignalType::Sell, "W2", 90, -10, -10.0, Severity::Warning, t),
        ];
        assert!(detector().aggregate(&signals).is_empty());
    }

    #[test]
    fn test_aggregate_is_pure_per_cycle() {
        let t = Utc::now();
        let buys = vec![
            Signal::new(SignalType::Buy, "W1", 110, 10, 10.0, Severity::Info, t),
            Signal::new(SignalType::Buy, "W2", 110, 10, 10.0, Severity::Info, t),
        ];
        let d = detector();
        assert_eq!(d.aggregate(&buys), d.aggregate(&buys));
        // A later cycle without buys emits nothing
        assert!(d.aggregate(&[]).is_empty());
    }
}
