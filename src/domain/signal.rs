use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Enum representing the kinds of whale activity signals
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SignalType {
    Buy,
    Sell,
    CexTransfer,
    LiquidityDrop,
    LiquidityAdd,
    Accumulation,
    Distribution,
}

impl SignalType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalType::Buy => "BUY",
            SignalType::Sell => "SELL",
            SignalType::CexTransfer => "CEX_TRANSFER",
            SignalType::LiquidityDrop => "LIQUIDITY_DROP",
            SignalType::LiquidityAdd => "LIQUIDITY_ADD",
            SignalType::Accumulation => "ACCUMULATION",
            SignalType::Distribution => "DISTRIBUTION",
        }
    }

    /// Signals produced by cross-address aggregation
    pub fn is_aggregate(&self) -> bool {
        matches!(self, SignalType::Accumulation | SignalType::Distribution)
    }
}

impl fmt::Display for SignalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for SignalType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "BUY" => Ok(SignalType::Buy),
            "SELL" => Ok(SignalType::Sell),
            "CEX_TRANSFER" => Ok(SignalType::CexTransfer),
            "LIQUIDITY_DROP" => Ok(SignalType::LiquidityDrop),
            "LIQUIDITY_ADD" => Ok(SignalType::LiquidityAdd),
            "ACCUMULATION" => Ok(SignalType::Accumulation),
            "DISTRIBUTION" => Ok(SignalType::Distribution),
            other => Err(format!("Unknown signal type: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "INFO",
            Severity::Warning => "WARNING",
            Severity::Critical => "CRITICAL",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "INFO" => Ok(Severity::Info),
            "WARNING" => Ok(Severity::Warning),
            "CRITICAL" => Ok(Severity::Critical),
            other => Err(format!("Unknown severity: {}", other)),
        }
    }
}

/// A detected balance event. Immutable once emitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub signal_type: SignalType,
    /// Labels of the involved addresses (several for aggregates)
    pub labels: Vec<String>,
    /// Resulting balance in base units
    pub balance: u64,
    pub change_pct: f64,
    pub change_abs: i64,
    pub timestamp: DateTime<Utc>,
    pub tx_signature: Option<String>,
    pub severity: Severity,
    /// Exchange label for CEX transfers
    pub counterparty: Option<String>,
    /// Derived from a suspect balance; verify before acting
    pub requires_review: bool,
}

impl Signal {
    pub fn new(
        signal_type: SignalType,
        label: impl Into<String>,
        balance: u64,
        change_abs: i64,
        change_pct: f64,
        severity: Severity,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            signal_type,
            labels: vec![label.into()],
            balance,
            change_pct,
            change_abs,
            timestamp,
            tx_signature: None,
            severity,
            counterparty: None,
            requires_review: false,
        }
    }

    pub fn with_tx(mut self, signature: Option<String>) -> Self {
        self.tx_signature = signature;
        self
    }

    pub fn with_counterparty(mut self, counterparty: impl Into<String>) -> Self {
        self.counterparty = Some(counterparty.into());
        self
    }

    pub fn flagged_for_review(mut self, requires_review: bool) -> Self {
        self.requires_review = requires_review;
        self
    }

    /// Comma-joined labels as written to the event log
    pub fn label_list(&self) -> String {
        self.labels.join(",")
    }

    pub fn involves(&self, label: &str) -> bool {
        self.labels.iter().any(|l| l == label)
    }
}
