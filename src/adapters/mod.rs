//! Adapters Layer - External System Implementations
//!
//! This module contains implementations of the port traits:
//! - Solana: JSON-RPC balance and transfer lookups with endpoint failover
//! - CLI: Command-line argument definitions

pub mod solana;
pub mod cli;

pub use solana::{RetryPolicy, RpcBalanceSource, SolanaClientError};
pub use cli::CliApp;
