//! Tracked Addresses
//!
//! The fixed set of wallets and pools being watched, plus the known
//! exchange wallets used to classify outgoing transfers.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Default alert threshold for regular wallets (percent)
pub const DEFAULT_WALLET_THRESHOLD_PCT: f64 = 1.0;

/// Default alert threshold for liquidity pools (percent)
pub const DEFAULT_POOL_THRESHOLD_PCT: f64 = 5.0;

/// A wallet or pool whose token balance is polled every cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackedAddress {
    /// Unique human-readable label (e.g. "whale_1")
    pub label: String,
    /// Base58 owner address
    pub address: String,
    /// Minimum percentage change that produces a signal
    pub alert_threshold_pct: f64,
    /// Liquidity pool vault rather than a holder wallet
    pub is_pool: bool,
    pub notes: Option<String>,
}

impl TrackedAddress {
    /// Create a wallet with the default wallet threshold
    pub fn wallet(label: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            address: address.into(),
            alert_threshold_pct: DEFAULT_WALLET_THRESHOLD_PCT,
            is_pool: false,
            notes: None,
        }
    }

    /// Create a pool with the default pool threshold
    pub fn pool(label: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            address: address.into(),
            alert_threshold_pct: DEFAULT_POOL_THRESHOLD_PCT,
            is_pool: true,
            notes: None,
        }
    }

    pub fn with_threshold(mut self, pct: f64) -> Self {
        self.alert_threshold_pct = pct;
        self
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }
}

/// A known centralized-exchange wallet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CexAddress {
    pub label: String,
    pub address: String,
}

/// Lookup table of exchange wallets by address
#[derive(Debug, Clone, Default)]
pub struct CexRegistry {
    by_address: HashMap<String, String>,
}

impl CexRegistry {
    pub fn new(entries: &[CexAddress]) -> Self {
        let by_address = entries
            .iter()
            .map(|c| (c.address.clone(), c.label.clone()))
            .collect();
        Self { by_address }
    }

    /// Label of the exchange owning `address`, if known
    pub fn label_for(&self, address: &str) -> Option<&str> {
        self.by_address.get(address).map(String::as_str)
    }

    /// First destination in `destinations` that is a known exchange
    pub fn first_match<'a, I>(&self, destinations: I) -> Option<&str>
    where
        I: IntoIterator<Item = &'a String>,
    {
        destinations
            .into_iter()
            .find_map(|d| self.label_for(d))
    }

    pub fn len(&self) -> usize {
        self.by_address.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_address.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_thresholds() {
        let w = TrackedAddress::wallet("whale_1", "Addr1");
        assert!(!w.is_pool);
        assert_eq!(w.alert_threshold_pct, DEFAULT_WALLET_THRESHOLD_PCT);

        let p = TrackedAddress::pool("meteora", "Pool1");
        assert!(p.is_pool);
        assert!(p.alert_threshold_pct > w.alert_threshold_pct);
    }

    #[test]
    fn test_builder_methods() {
        let w = TrackedAddress::wallet("w", "a")
            .with_threshold(2.5)
            .with_notes("dev wallet");
        assert_eq!(w.alert_threshold_pct, 2.5);
        assert_eq!(w.notes.as_deref(), Some("dev wallet"));
    }

    #[test]
    fn test_cex_registry_lookup() {
        let registry = CexRegistry::new(&[
            CexAddress { label: "binance_hot".to_string(), address: "BinanceAddr".to_string() },
            CexAddress { label: "okx".to_string(), address: "OkxAddr".to_string() },
        ]);

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.label_for("OkxAddr"), Some("okx"));
        assert_eq!(registry.label_for("Unknown"), None);

        let destinations = vec!["Random".to_string(), "BinanceAddr".to_string()];
        assert_eq!(registry.first_match(&destinations), Some("binance_hot"));
    }

    #[test]
    fn test_empty_registry_matches_nothing() {
        let registry = CexRegistry::default();
        assert!(registry.is_empty());
        assert_eq!(registry.first_match(&vec!["x".to_string()]), None);
    }
}
