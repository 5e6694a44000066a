//! Balance Readings
//!
//! Raw per-poll reads and the validated balances accepted from them.
//! A failed read is its own variant; it never collapses to a zero balance.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Why a balance read did not produce a value
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReadError {
    #[error("Request timed out after {0}ms")]
    Timeout(u64),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Malformed response: {0}")]
    MalformedResponse(String),
}

/// Result of a single balance read
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    /// Raw token amount in base units
    Balance(u64),
    Failed(ReadError),
}

/// One poll attempt for one address
#[derive(Debug, Clone)]
pub struct BalanceReading {
    pub label: String,
    pub outcome: ReadOutcome,
    pub read_at: DateTime<Utc>,
    /// Endpoint that answered, or the last one tried on failure
    pub endpoint: Option<String>,
    /// Attempts beyond the first, across all endpoints
    pub retries: u32,
}

impl BalanceReading {
    pub fn ok(label: impl Into<String>, balance: u64) -> Self {
        Self {
            label: label.into(),
            outcome: ReadOutcome::Balance(balance),
            read_at: Utc::now(),
            endpoint: None,
            retries: 0,
        }
    }

    pub fn failed(label: impl Into<String>, error: ReadError) -> Self {
        Self {
            label: label.into(),
            outcome: ReadOutcome::Failed(error),
            read_at: Utc::now(),
            endpoint: None,
            retries: 0,
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn at(mut self, read_at: DateTime<Utc>) -> Self {
        self.read_at = read_at;
        self
    }

    pub fn balance(&self) -> Option<u64> {
        match self.outcome {
            ReadOutcome::Balance(b) => Some(b),
            ReadOutcome::Failed(_) => None,
        }
    }
}

/// How much the accepted value can be trusted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Confidence {
    #[default]
    Confirmed,
    /// Large move accepted but flagged for manual review
    Suspect,
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Confidence::Confirmed => "CONFIRMED",
            Confidence::Suspect => "SUSPECT",
        };
        f.pad(s)
    }
}

/// A balance accepted by the validation gate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidatedBalance {
    pub label: String,
    pub balance: u64,
    pub confidence: Confidence,
    /// Consecutive agreeing reads that produced this acceptance
    pub confirmations: u32,
    pub observed_at: DateTime<Utc>,
}

impl ValidatedBalance {
    pub fn confirmed(label: impl Into<String>, balance: u64, observed_at: DateTime<Utc>) -> Self {
        Self {
            label: label.into(),
            balance,
            confidence: Confidence::Confirmed,
            confirmations: 1,
            observed_at,
        }
    }

    pub fn is_suspect(&self) -> bool {
        self.confidence == Confidence::Suspect
    }
}

/// What the most recent transaction for an address shows about its token flow
#[derive(Debug, Clone, PartialEq)]
pub struct TransferEvidence {
    pub signature: String,
    /// Tracked owner's token balance decreased in this transaction
    pub outgoing: bool,
    /// Base units that left the tracked owner
    pub amount: u64,
    /// Owners whose token balance increased
    pub destinations: Vec<String>,
    pub block_time: Option<DateTime<Utc>>,
}

impl TransferEvidence {
    /// Allowed clock difference between the chain and this host
    pub const CLOCK_SKEW_SECS: i64 = 120;

    /// Whether this transaction is an outgoing transfer that happened after `since`
    pub fn confirms_outgoing_since(&self, since: DateTime<Utc>) -> bool {
        if !self.outgoing {
            return false;
        }
        match self.block_time {
            Some(t) => t >= since - chrono::Duration::seconds(Self::CLOCK_SKEW_SECS),
            None => false,
        }
    }
}

/// Share of total supply held, in percent
pub fn supply_share_pct(balance: u64, decimals: u8, total_supply: u64) -> f64 {
    if total_supply == 0 {
        return 0.0;
    }
    let display = balance as f64 / 10_f64.powi(decimals as i32);
    display / total_supply as f64 * 100.0
}
