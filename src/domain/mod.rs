//! Domain Layer - Core tracking logic
//!
//! Pure types and logic with no network access. Balance reads arrive through
//! the ports layer; everything here decides what those reads mean.
//!
//! - `address`: tracked wallets, pools and known exchange addresses
//! - `balance`: raw readings, validated balances and transfer evidence
//! - `validation_gate`: separates real balance changes from bad reads
//! - `signal_detector`: per-address and same-cycle signals
//! - `state_store`: last accepted balance per label, for crash recovery
//! - `event_log`: append-only signal log
//! - `trend`: phase history over the signal log

pub mod address;
pub mod balance;
pub mod signal;
pub mod validation_gate;
pub mod signal_detector;
pub mod state_store;
pub mod event_log;
pub mod trend;

pub use address::{CexAddress, CexRegistry, TrackedAddress};
pub use balance::{
    supply_share_pct, BalanceReading, Confidence, ReadError, ReadOutcome, TransferEvidence,
    ValidatedBalance,
};
pub use signal::{Severity, Signal, SignalType};
pub use validation_gate::{AddressGate, GateConfig, GateOutcome, GateState, GateVerdict, ValidationGate};
pub use signal_detector::{percent_change, AddressChange, SignalDetector};
pub use state_store::{PersistError, PersistedState, StateStore, StoredBalance};
pub use event_log::{EventLog, EventLogError};
pub use trend::{DailyCoordination, Phase, TrendAnalyzer, TrendBias, TrendConfig, TrendPhase};
