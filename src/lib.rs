//! Whale Tracker - SPL token whale balance monitor library
//!
//! Watches a fixed set of Solana wallets and pools for one token, separates
//! genuine balance changes from RPC failures, and turns them into typed
//! signals and a smoothed trend phase.
//!
//! # Modules
//!
//! - `domain`: Core logic (ValidationGate, SignalDetector, StateStore, EventLog, TrendAnalyzer)
//! - `ports`: Trait abstractions (BalanceSource, TransferLookup)
//! - `adapters`: External implementations (Solana JSON-RPC, CLI)
//! - `config`: Configuration loading and validation
//! - `application`: The BalanceMonitor poll scheduler

pub mod domain;
pub mod ports;
pub mod adapters;
pub mod config;
pub mod application;
