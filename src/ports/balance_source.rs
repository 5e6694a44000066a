use async_trait::async_trait;

use crate::domain::{BalanceReading, ReadError, TrackedAddress, TransferEvidence};

/// Source of token balances for tracked addresses
///
/// Implementations bound their own latency and never turn a failure into a
/// zero balance: every call returns a reading, failed or not.
#[async_trait]
pub trait BalanceSource: Send + Sync {
    /// Read the current token balance of one address
    async fn fetch_balance(&self, address: &TrackedAddress) -> BalanceReading;

    /// Human-readable name for logs
    fn name(&self) -> &str;
}

/// Lookup of the newest token transfer touching an address
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TransferLookup: Send + Sync {
    /// Newest successful transaction for the address, if any
    async fn latest_transfer(
        &self,
        address: &TrackedAddress,
    ) -> Result<Option<TransferEvidence>, ReadError>;
}
