pub mod monitor;

pub use monitor::{BalanceMonitor, CycleReport, MonitorError, MonitorSettings, TrendSummary};
