//! Trend Analyzer
//!
//! Scores the signal log over fixed-width tumbling windows and smooths the
//! per-window classification with hysteresis, so a single noisy window never
//! flips the committed phase. Pure: the same log segment always yields the
//! same history.

use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use super::signal::{Signal, SignalType};
use super::signal_detector::MIN_COORDINATED_WALLETS;

/// Default window width in hours
pub const DEFAULT_WINDOW_HOURS: i64 = 24;
pub const DEFAULT_ACCUMULATION_THRESHOLD: f64 = 2.0;
pub const DEFAULT_DISTRIBUTION_THRESHOLD: f64 = -2.0;
/// Consecutive agreeing windows needed to change the committed phase
pub const DEFAULT_CONFIRM_WINDOWS: u32 = 2;

#[derive(Debug, Clone)]
pub struct TrendConfig {
    pub window: Duration,
    pub accumulation_threshold: f64,
    pub distribution_threshold: f64,
    pub confirm_windows: u32,
}

impl Default for TrendConfig {
    fn default() -> Self {
        Self {
            window: Duration::hours(DEFAULT_WINDOW_HOURS),
            accumulation_threshold: DEFAULT_ACCUMULATION_THRESHOLD,
            distribution_threshold: DEFAULT_DISTRIBUTION_THRESHOLD,
            confirm_windows: DEFAULT_CONFIRM_WINDOWS,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    Accumulation,
    Distribution,
    Consolidation,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Accumulation => "ACCUMULATION",
            Phase::Distribution => "DISTRIBUTION",
            Phase::Consolidation => "CONSOLIDATION",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// One window of the phase history
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrendPhase {
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    /// Phase after hysteresis
    pub phase: Phase,
    /// Raw classification of this window's score
    pub candidate: Phase,
    pub score: f64,
    pub signal_count: usize,
    /// Consecutive windows agreeing with the committed phase
    pub confirmations: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TrendBias {
    StrongBullish,
    Bullish,
    Neutral,
    Bearish,
    StrongBearish,
}

impl fmt::Display for TrendBias {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TrendBias::StrongBullish => "STRONG_BULLISH",
            TrendBias::Bullish => "BULLISH",
            TrendBias::Neutral => "NEUTRAL",
            TrendBias::Bearish => "BEARISH",
            TrendBias::StrongBearish => "STRONG_BEARISH",
        };
        f.pad(s)
    }
}

/// Buy/sell participation for one UTC calendar day
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailyCoordination {
    pub day: NaiveDate,
    pub buyers: Vec<String>,
    pub sellers: Vec<String>,
    pub coordinated_buying: bool,
    pub coordinated_selling: bool,
}

/// Weight of each signal type in a window score
pub fn signal_weight(signal_type: SignalType) -> f64 {
    match signal_type {
        SignalType::CexTransfer => -4.0,
        SignalType::Distribution => -3.0,
        SignalType::LiquidityDrop => -2.0,
        SignalType::Sell => -1.0,
        SignalType::Buy => 1.0,
        SignalType::LiquidityAdd => 2.0,
        SignalType::Accumulation => 3.0,
    }
}

/// Score contribution of one signal, scaled by the size of the move
pub fn contribution(signal: &Signal) -> f64 {
    let magnitude = 1.0 + signal.change_pct.abs().min(100.0) / 100.0;
    let value = signal_weight(signal.signal_type) * magnitude;
    if signal.requires_review {
        value / 2.0
    } else {
        value
    }
}

pub struct TrendAnalyzer {
    config: TrendConfig,
}

impl TrendAnalyzer {
    pub fn new(config: TrendConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &TrendConfig {
        &self.config
    }

    /// Phase history from the earliest to the latest signal's window
    pub fn analyze(&self, signals: &[Signal]) -> Vec<TrendPhase> {
        self.analyze_through(signals, None)
    }

    /// Phase history extended with empty windows up to `until`
    pub fn analyze_until(&self, signals: &[Signal], until: DateTime<Utc>) -> Vec<TrendPhase> {
        self.analyze_through(signals, Some(until))
    }

    fn analyze_through(&self, signals: &[Signal], until: Option<DateTime<Utc>>) -> Vec<TrendPhase> {
        let width = self.config.window.num_seconds().max(1);

        let mut buckets: BTreeMap<i64, (f64, usize)> = BTreeMap::new();
        for signal in signals {
            let index = signal.timestamp.timestamp().div_euclid(width);
            let bucket = buckets.entry(index).or_insert((0.0, 0));
            bucket.0 += contribution(signal);
            bucket.1 += 1;
        }

        let (first, mut last) = match (buckets.keys().next(), buckets.keys().next_back()) {
            (Some(first), Some(last)) => (*first, *last),
            _ => return Vec::new(),
        };
        if let Some(until) = until {
            last = last.max(until.timestamp().div_euclid(width));
        }

        let required = self.config.confirm_windows.max(1);
        let mut committed = Phase::Consolidation;
        let mut confirmations = 0u32;
        let mut pending: Option<(Phase, u32)> = None;
        let mut history = Vec::with_capacity((last - first + 1) as usize);

        for index in first..=last {
            let (score, signal_count) = buckets.get(&index).copied().unwrap_or((0.0, 0));
            let candidate = self.classify(score);

            if candidate == committed {
                confirmations += 1;
                pending = None;
            } else {
                confirmations = 0;
                let streak = match pending {
                    Some((phase, n)) if phase == candidate => n + 1,
                    _ => 1,
                };
                if streak >= required {
                    tracing::debug!("Trend phase {} -> {} after {} windows", committed, candidate, streak);
                    committed = candidate;
                    confirmations = streak;
                    pending = None;
                } else {
                    pending = Some((candidate, streak));
                }
            }

            let (window_start, window_end) = self.window_bounds(index, width);
            history.push(TrendPhase {
                window_start,
                window_end,
                phase: committed,
                candidate,
                score,
                signal_count,
                confirmations,
            });
        }

        history
    }

    fn classify(&self, score: f64) -> Phase {
        if score >= self.config.accumulation_threshold {
            Phase::Accumulation
        } else if score <= self.config.distribution_threshold {
            Phase::Distribution
        } else {
            Phase::Consolidation
        }
    }

    fn window_bounds(&self, index: i64, width: i64) -> (DateTime<Utc>, DateTime<Utc>) {
        let start = Utc.timestamp_opt(index * width, 0).single().unwrap_or_default();
        (start, start + Duration::seconds(width))
    }

    /// Directional bias of the most recent window
    pub fn bias(&self, history: &[TrendPhase]) -> TrendBias {
        let Some(latest) = history.last() else {
            return TrendBias::Neutral;
        };
        match latest.phase {
            Phase::Consolidation => TrendBias::Neutral,
            Phase::Accumulation => {
                if latest.score >= 2.0 * self.config.accumulation_threshold {
                    TrendBias::StrongBullish
                } else {
                    TrendBias::Bullish
                }
            }
            Phase::Distribution => {
                if latest.score <= 2.0 * self.config.distribution_threshold {
                    TrendBias::StrongBearish
                } else {
                    TrendBias::Bearish
                }
            }
        }
    }

    /// Distinct buyers and sellers per UTC day, flagging coordinated days
    pub fn daily_coordination(&self, signals: &[Signal]) -> Vec<DailyCoordination> {
        let mut days: BTreeMap<NaiveDate, (BTreeSet<String>, BTreeSet<String>)> = BTreeMap::new();

        for signal in signals {
            let side = match signal.signal_type {
                SignalType::Buy => 0,
                SignalType::Sell => 1,
                _ => continue,
            };
            let entry = days.entry(signal.timestamp.date_naive()).or_default();
            let set = if side == 0 { &mut entry.0 } else { &mut entry.1 };
            set.extend(signal.labels.iter().cloned());
        }

        days.into_iter()
            .map(|(day, (buyers, sellers))| DailyCoordination {
                day,
                coordinated_buying: buyers.len() >= MIN_COORDINATED_WALLETS,
                coordinated_selling: sellers.len() >= MIN_COORDINATED_WALLETS,
                buyers: buyers.into_iter().collect(),
                sellers: sellers.into_iter().collect(),
            })
            .collect()
    }
}

impl Default for TrendAnalyzer {
    fn default() -> Self {
        Self::new(TrendConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::signal::Severity;
    use approx::assert_relative_eq;

    fn day(d: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, d, hour, 0, 0).unwrap()
    }

    fn signal(signal_type: SignalType, label: &str, pct: f64, at: DateTime<Utc>) -> Signal {
        Signal::new(signal_type, label, 1_000, 10, pct, Severity::Info, at)
    }

    #[test]
    fn test_contribution_scaling() {
        let s = signal(SignalType::Buy, "w", 50.0, day(5, 1));
        assert_relative_eq!(contribution(&s), 1.5);

        let capped = signal(SignalType::CexTransfer, "w", -300.0, day(5, 1));
        assert_relative_eq!(contribution(&capped), -8.0);

        let review = signal(SignalType::Accumulation, "w", 0.0, day(5, 1)).flagged_for_review(true);
        assert_relative_eq!(contribution(&review), 1.5);
    }

    #[test]
    fn test_empty_log_has_no_history() {
        let analyzer = TrendAnalyzer::default();
        assert!(analyzer.analyze(&[]).is_empty());
        assert_eq!(analyzer.bias(&[]), TrendBias::Neutral);
    }

    #[test]
    fn test_windows_align_to_epoch_and_fill_gaps() {
        let analyzer = TrendAnalyzer::default();
        let signals = vec![
            signal(SignalType::Buy, "w1", 1.0, day(5, 13)),
            signal(SignalType::Buy, "w1", 1.0, day(7, 2)),
        ];

        let history = analyzer.analyze(&signals);
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].window_start, day(5, 0));
        assert_eq!(history[0].window_end, day(6, 0));
        assert_eq!(history[1].signal_count, 0);
        assert_eq!(history[1].score, 0.0);
        assert_eq!(history[2].window_start, day(7, 0));
    }

    #[test]
    fn test_analyze_until_extends_with_empty_windows() {
        let analyzer = TrendAnalyzer::default();
        let signals = vec![signal(SignalType::Buy, "w1", 1.0, day(5, 13))];

        let history = analyzer.analyze_until(&signals, day(8, 1));
        assert_eq!(history.len(), 4);
        assert!(history[1..].iter().all(|w| w.signal_count == 0));
    }

    #[test]
    fn test_single_distribution_window_is_smoothed() {
        let analyzer = TrendAnalyzer::default();
        let signals = vec![
            signal(SignalType::Buy, "w1", 1.0, day(5, 1)),
            signal(SignalType::CexTransfer, "w4", -100.0, day(6, 1)),
            signal(SignalType::Buy, "w1", 1.0, day(7, 1)),
        ];

        let history = analyzer.analyze(&signals);
        assert_eq!(history.len(), 3);
        assert_eq!(history[1].candidate, Phase::Distribution);
        assert!(history.iter().all(|w| w.phase == Phase::Consolidation));
        assert_eq!(analyzer.bias(&history), TrendBias::Neutral);
    }

    #[test]
    fn test_phase_commits_after_consecutive_windows() {
        let analyzer = TrendAnalyzer::default();
        let signals = vec![
            signal(SignalType::Accumulation, "w1,w2", 5.0, day(5, 1)),
            signal(SignalType::Accumulation, "w1,w2", 5.0, day(6, 1)),
            signal(SignalType::Accumulation, "w1,w2", 5.0, day(7, 1)),
        ];

        let history = analyzer.analyze(&signals);
        assert_eq!(history[0].phase, Phase::Consolidation);
        assert_eq!(history[1].phase, Phase::Accumulation);
        assert_eq!(history[1].confirmations, 2);
        assert_eq!(history[2].confirmations, 3);
        // 3.15 is below twice the threshold
        assert_eq!(analyzer.bias(&history), TrendBias::Bullish);
    }

    #[test]
    fn test_strong_bearish_bias() {
        let analyzer = TrendAnalyzer::default();
        let signals = vec![
            signal(SignalType::CexTransfer, "w4", -100.0, day(5, 1)),
            signal(SignalType::CexTransfer, "w5", -100.0, day(6, 1)),
        ];

        let history = analyzer.analyze(&signals);
        assert_eq!(history[1].phase, Phase::Distribution);
        assert_eq!(analyzer.bias(&history), TrendBias::StrongBearish);
    }

    #[test]
    fn test_analysis_is_idempotent() {
        let analyzer = TrendAnalyzer::default();
        let signals = vec![
            signal(SignalType::Sell, "w2", -5.0, day(5, 22)),
            signal(SignalType::Buy, "w1", 3.0, day(5, 4)),
            signal(SignalType::LiquidityDrop, "pool", -20.0, day(6, 8)),
        ];

        assert_eq!(analyzer.analyze(&signals), analyzer.analyze(&signals));
    }

    #[test]
    fn test_daily_coordination() {
        let analyzer = TrendAnalyzer::default();
        let signals = vec![
            signal(SignalType::Buy, "w1", 2.0, day(5, 1)),
            signal(SignalType::Buy, "w2", 2.0, day(5, 20)),
            signal(SignalType::Buy, "w1", 2.0, day(5, 21)),
            signal(SignalType::Sell, "w3", -2.0, day(6, 3)),
            signal(SignalType::LiquidityDrop, "pool", -9.0, day(6, 4)),
        ];

        let days = analyzer.daily_coordination(&signals);
        assert_eq!(days.len(), 2);
        assert_eq!(days[0].buyers, vec!["w1".to_string(), "w2".to_string()]);
        assert!(days[0].coordinated_buying);
        assert!(!days[1].coordinated_selling);
        assert_eq!(days[1].sellers, vec!["w3".to_string()]);
    }
}
