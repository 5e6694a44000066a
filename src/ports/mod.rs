//! Ports Layer - Trait definitions for external dependencies
//!
//! Following hexagonal architecture, these traits abstract:
//! - Balance reads (Solana JSON-RPC)
//! - Transfer lookups used to confirm drops and match exchange destinations

pub mod balance_source;
pub mod mocks;

pub use balance_source::{BalanceSource, TransferLookup};
pub use mocks::{MockBalanceSource, StaticTransferLookup};

#[cfg(test)]
pub use balance_source::MockTransferLookup;
