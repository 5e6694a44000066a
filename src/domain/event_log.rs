//! Event Log
//!
//! Append-only, pipe-delimited record of emitted signals. One line per signal:
//!
//! `timestamp|severity|type|labels|balance|pct_change|abs_change|tx|counterparty|review`
//!
//! The first eight fields never change position. New fields are only ever
//! appended, so readers ignore anything past the ones they know and treat
//! missing trailing fields as empty.

use chrono::{DateTime, SecondsFormat, Utc};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

use super::signal::{Severity, Signal, SignalType};

/// Default log file name
pub const DEFAULT_LOG_FILE: &str = "whale_signals.log";

/// Field separator
pub const FIELD_SEPARATOR: char = '|';

/// Fields every readable line must carry
const CORE_FIELDS: usize = 8;

#[derive(Error, Debug)]
pub enum EventLogError {
    #[error("Failed to open event log {path}: {source}")]
    OpenError {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to append to event log: {0}")]
    WriteError(#[from] std::io::Error),

    #[error("Failed to read event log: {0}")]
    ReadError(String),
}

/// Handle to the signal log file
#[derive(Debug, Clone)]
pub struct EventLog {
    path: PathBuf,
}

impl EventLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Default log path for a data directory
    pub fn default_path(data_dir: &Path) -> PathBuf {
        data_dir.join(DEFAULT_LOG_FILE)
    }

    /// Append one cycle of signals with a single write
    pub fn append(&self, signals: &[Signal]) -> Result<(), EventLogError> {
        if signals.is_empty() {
            return Ok(());
        }

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| EventLogError::OpenError {
                path: parent.display().to_string(),
                source,
            })?;
        }

        let mut buffer = String::new();
        for signal in signals {
            buffer.push_str(&format_line(signal));
            buffer.push('\n');
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|source| EventLogError::OpenError {
                path: self.path.display().to_string(),
                source,
            })?;

        file.write_all(buffer.as_bytes())?;
        file.sync_data()?;

        tracing::debug!("Appended {} signals to {}", signals.len(), self.path.display());
        Ok(())
    }

    /// Every readable signal in file order; a missing log is empty
    pub fn read_all(&self) -> Result<Vec<Signal>, EventLogError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let content = fs::read_to_string(&self.path)
            .map_err(|e| EventLogError::ReadError(format!("{}: {}", self.path.display(), e)))?;

        let mut signals = Vec::new();
        let mut skipped = 0usize;
        for line in content.lines() {
            if line.trim().is_empty() {
                continue;
            }
            match parse_line(line) {
                Some(signal) => signals.push(signal),
                None => skipped += 1,
            }
        }

        if skipped > 0 {
            tracing::debug!("Skipped {} unreadable lines in {}", skipped, self.path.display());
        }
        Ok(signals)
    }

    /// Signals at or after `since`
    pub fn read_since(&self, since: DateTime<Utc>) -> Result<Vec<Signal>, EventLogError> {
        Ok(self
            .read_all()?
            .into_iter()
            .filter(|s| s.timestamp >= since)
            .collect())
    }
}

/// Render one signal as a log line, without the trailing newline
pub fn format_line(signal: &Signal) -> String {
    [
        signal.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
        signal.severity.as_str().to_string(),
        signal.signal_type.as_str().to_string(),
        signal.label_list(),
        signal.balance.to_string(),
        format!("{:.4}", signal.change_pct),
        format!("{:+}", signal.change_abs),
        signal.tx_signature.clone().unwrap_or_default(),
        signal.counterparty.clone().unwrap_or_default(),
        if signal.requires_review { "1" } else { "0" }.to_string(),
    ]
    .join("|")
}

/// Parse one log line; `None` for unknown types or malformed core fields
pub fn parse_line(line: &str) -> Option<Signal> {
    let fields: Vec<&str> = line.trim_end_matches(['\r', '\n']).split(FIELD_SEPARATOR).collect();
    if fields.len() < CORE_FIELDS {
        return None;
    }

    let timestamp = DateTime::parse_from_rfc3339(fields[0]).ok()?.with_timezone(&Utc);
    let severity: Severity = fields[1].parse().ok()?;
    let signal_type: SignalType = fields[2].parse().ok()?;
    let labels: Vec<String> = fields[3]
        .split(',')
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect();
    if labels.is_empty() {
        return None;
    }
    let balance: u64 = fields[4].parse().ok()?;
    let change_pct: f64 = fields[5].parse().ok()?;
    let change_abs: i64 = fields[6].parse().ok()?;
    let tx_signature = non_empty(fields[7]);
    let counterparty = fields.get(8).and_then(|f| non_empty(f));
    let requires_review = matches!(fields.get(9).copied(), Some("1") | Some("true"));

    Some(Signal {
        signal_type,
        labels,
        balance,
        change_pct,
        change_abs,
        timestamp,
        tx_signature,
        severity,
        counterparty,
        requires_review,
    })
}

fn non_empty(field: &str) -> Option<String> {
    if field.is_empty() {
        None
    } else {
        Some(field.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use regex::Regex;
    use tempfile::tempdir;

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 5, hour, 0, 0).unwrap()
    }

    fn buy(label: &str, hour: u32) -> Signal {
        Signal::new(SignalType::Buy, label, 1_023_000, 23_000, 2.3, Severity::Info, at(hour))
    }

    #[test]
    fn test_line_shape() {
        let line = format_line(&buy("whale_1", 12));
        let shape = Regex::new(
            r"^\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2}\.\d{3}Z\|INFO\|BUY\|whale_1\|1023000\|2\.3000\|\+23000\|\|\|0$",
        )
        .unwrap();
        assert!(shape.is_match(&line), "unexpected line: {}", line);
    }

    #[test]
    fn test_cex_transfer_line() {
        let signal = Signal::new(SignalType::CexTransfer, "whale_4", 0, -10_000_000, -100.0, Severity::Critical, at(3))
            .with_tx(Some("5xSig".to_string()))
            .with_counterparty("binance_hot");
        let line = format_line(&signal);
        assert_eq!(
            line,
            "2026-01-05T03:00:00.000Z|CRITICAL|CEX_TRANSFER|whale_4|0|-100.0000|-10000000|5xSig|binance_hot|0"
        );
        assert_eq!(parse_line(&line).unwrap(), signal);
    }

    #[test]
    fn test_aggregate_labels_are_comma_joined() {
        let mut signal = buy("whale_1", 1);
        signal.signal_type = SignalType::Accumulation;
        signal.labels = vec!["whale_1".to_string(), "whale_2".to_string()];

        let line = format_line(&signal);
        assert!(line.contains("|whale_1,whale_2|"));
        assert_eq!(parse_line(&line).unwrap().labels.len(), 2);
    }

    #[test]
    fn test_parse_tolerates_missing_and_extra_trailing_fields() {
        let core = "2026-01-05T12:00:00.000Z|WARNING|SELL|whale_2|90|-10.0000|-10|";
        let parsed = parse_line(core).unwrap();
        assert_eq!(parsed.signal_type, SignalType::Sell);
        assert!(parsed.tx_signature.is_none());
        assert!(parsed.counterparty.is_none());
        assert!(!parsed.requires_review);

        let extended = format!("{}|cex|1|some_future_field|another", core);
        let parsed = parse_line(&extended).unwrap();
        assert_eq!(parsed.counterparty.as_deref(), Some("cex"));
        assert!(parsed.requires_review);
    }

    #[test]
    fn test_parse_skips_unknown_and_malformed() {
        assert!(parse_line("2026-01-05T12:00:00.000Z|INFO|WHALE_BUY|w|1|1.0000|+1|").is_none());
        assert!(parse_line("not a timestamp|INFO|BUY|w|1|1.0000|+1|").is_none());
        assert!(parse_line("2026-01-05T12:00:00.000Z|INFO|BUY|w|lots|1.0000|+1|").is_none());
        assert!(parse_line("2026-01-05T12:00:00.000Z|INFO|BUY").is_none());
        assert!(parse_line("2026-01-05T12:00:00.000Z|INFO|BUY||1|1.0000|+1|").is_none());
    }

    #[test]
    fn test_append_and_read_back() {
        let dir = tempdir().unwrap();
        let log = EventLog::new(dir.path().join("signals.log"));

        log.append(&[buy("whale_1", 1), buy("whale_2", 1)]).unwrap();
        log.append(&[buy("whale_3", 5)]).unwrap();

        let signals = log.read_all().unwrap();
        assert_eq!(signals.len(), 3);
        assert!(signals[2].involves("whale_3"));

        let recent = log.read_since(at(4)).unwrap();
        assert_eq!(recent.len(), 1);
    }

    #[test]
    fn test_read_skips_garbage_lines() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("signals.log");
        let good = format_line(&buy("whale_1", 1));
        fs::write(&path, format!("garbage\n\n{}\nalso|garbage\n", good)).unwrap();

        let signals = EventLog::new(&path).read_all().unwrap();
        assert_eq!(signals.len(), 1);
    }

    #[test]
    fn test_missing_log_is_empty() {
        let dir = tempdir().unwrap();
        let log = EventLog::new(dir.path().join("none.log"));
        assert!(log.read_all().unwrap().is_empty());
    }

    #[test]
    fn test_empty_append_does_not_create_file() {
        let dir = tempdir().unwrap();
        let log = EventLog::new(dir.path().join("signals.log"));
        log.append(&[]).unwrap();
        assert!(!log.path().exists());
    }
}
