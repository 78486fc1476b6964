use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::signals::{Signal, round_to};

/// Half-split mean difference inside this band counts as stable.
pub const DIRECTION_BAND: f64 = 0.03;

/// One historical score set. Histories are ordered newest first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recorded_at: Option<DateTime<Utc>>,
    pub signals: BTreeMap<Signal, f64>,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum TrendError {
    #[error("history entry {index}: {signal} = {value} is outside [0, 1]")]
    OutOfRange {
        index: usize,
        signal: Signal,
        value: f64,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendDirection {
    Improving,
    Declining,
    Stable,
    InsufficientData,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrendStats {
    pub current: f64,
    pub mean: f64,
    pub median: f64,
    pub min: f64,
    pub max: f64,
    pub std_dev: f64,
    pub direction: TrendDirection,
    /// Coefficient of variation (std_dev / mean).
    pub volatility: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SignalTrend {
    pub signal: Signal,
    pub data_points: usize,
    #[serde(flatten)]
    pub stats: Option<TrendStats>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Divergence {
    pub improving_signal: Signal,
    pub declining_signal: Signal,
    pub improving_current: f64,
    pub declining_current: f64,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrendReport {
    pub entries: usize,
    pub signal_trends: BTreeMap<Signal, SignalTrend>,
    pub divergences: Vec<Divergence>,
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

fn median(values: &[f64]) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

fn sample_std_dev(values: &[f64], mean: f64) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let variance =
        values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    variance.sqrt()
}

fn direction_of(diff: f64) -> TrendDirection {
    if diff > DIRECTION_BAND {
        TrendDirection::Improving
    } else if diff < -DIRECTION_BAND {
        TrendDirection::Declining
    } else {
        TrendDirection::Stable
    }
}

/// Statistics for one signal over a newest-first history.
pub fn signal_trend(history: &[HistoryEntry], signal: Signal) -> SignalTrend {
    let values: Vec<f64> = history
        .iter()
        .filter_map(|entry| entry.signals.get(&signal).copied())
        .collect();
    let (Some(&current), Some(&oldest)) = (values.first(), values.last()) else {
        return SignalTrend {
            signal,
            data_points: 0,
            stats: None,
        };
    };

    let direction = if values.len() >= 4 {
        let mid = values.len() / 2;
        direction_of(mean(&values[..mid]) - mean(&values[mid..]))
    } else if values.len() >= 2 {
        direction_of(current - oldest)
    } else {
        TrendDirection::InsufficientData
    };

    let mean_value = mean(&values);
    let std_dev = sample_std_dev(&values, mean_value);
    let volatility = if mean_value > 0.0 {
        std_dev / mean_value
    } else {
        0.0
    };

    SignalTrend {
        signal,
        data_points: values.len(),
        stats: Some(TrendStats {
            current: round_to(current, 4),
            mean: round_to(mean_value, 4),
            median: round_to(median(&values), 4),
            min: round_to(values.iter().copied().fold(f64::MAX, f64::min), 4),
            max: round_to(values.iter().copied().fold(f64::MIN, f64::max), 4),
            std_dev: round_to(std_dev, 4),
            direction,
            volatility: round_to(volatility, 4),
        }),
    }
}

/// Pairs of signals where one improves while the other declines.
pub fn divergences(trends: &BTreeMap<Signal, SignalTrend>) -> Vec<Divergence> {
    let moving: Vec<(Signal, &TrendStats)> = Signal::ALL
        .iter()
        .filter_map(|signal| {
            let trend = trends.get(signal)?;
            let stats = trend.stats.as_ref()?;
            (trend.data_points >= 2).then_some((*signal, stats))
        })
        .collect();

    let mut out = Vec::new();
    for (i, (a, a_stats)) in moving.iter().enumerate() {
        for (b, b_stats) in &moving[i + 1..] {
            let (improving, declining) = match (a_stats.direction, b_stats.direction) {
                (TrendDirection::Improving, TrendDirection::Declining) => {
                    ((*a, *a_stats), (*b, *b_stats))
                }
                (TrendDirection::Declining, TrendDirection::Improving) => {
                    ((*b, *b_stats), (*a, *a_stats))
                }
                _ => continue,
            };
            out.push(Divergence {
                improving_signal: improving.0,
                declining_signal: declining.0,
                improving_current: improving.1.current,
                declining_current: declining.1.current,
                description: format!(
                    "{} is improving while {} is declining; this divergence may deserve attention.",
                    improving.0.label(),
                    declining.0.label().to_lowercase()
                ),
            });
        }
    }
    out
}

/// Trend statistics for all four signals plus divergence patterns.
pub fn analyze(history: &[HistoryEntry]) -> Result<TrendReport, TrendError> {
    for (index, entry) in history.iter().enumerate() {
        for (signal, value) in &entry.signals {
            if !value.is_finite() || !(0.0..=1.0).contains(value) {
                return Err(TrendError::OutOfRange {
                    index,
                    signal: *signal,
                    value: *value,
                });
            }
        }
    }

    let signal_trends: BTreeMap<Signal, SignalTrend> = Signal::ALL
        .into_iter()
        .map(|signal| (signal, signal_trend(history, signal)))
        .collect();
    let divergences = divergences(&signal_trends);

    Ok(TrendReport {
        entries: history.len(),
        signal_trends,
        divergences,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(values: [f64; 4]) -> HistoryEntry {
        HistoryEntry {
            recorded_at: None,
            signals: Signal::ALL.into_iter().zip(values).collect(),
        }
    }

    #[test]
    fn empty_history_has_no_stats() {
        let trend = signal_trend(&[], Signal::VitalStability);
        assert_eq!(trend.data_points, 0);
        assert!(trend.stats.is_none());
    }

    #[test]
    fn single_point_is_insufficient() {
        let trend = signal_trend(&[entry([0.5; 4])], Signal::VitalStability);
        let stats = trend.stats.unwrap();
        assert_eq!(stats.direction, TrendDirection::InsufficientData);
        assert_eq!(stats.std_dev, 0.0);
    }

    #[test]
    fn half_split_direction() {
        // newest first: recent half mean 0.8, older half mean 0.6
        let history = [
            entry([0.8, 0.5, 0.5, 0.5]),
            entry([0.8, 0.5, 0.5, 0.5]),
            entry([0.6, 0.5, 0.5, 0.5]),
            entry([0.6, 0.5, 0.5, 0.5]),
        ];
        let stats = signal_trend(&history, Signal::VitalStability).stats.unwrap();
        assert_eq!(stats.direction, TrendDirection::Improving);
        assert_eq!(stats.current, 0.8);
        assert_eq!(stats.median, 0.7);
        let flat = signal_trend(&history, Signal::MetabolicBalance).stats.unwrap();
        assert_eq!(flat.direction, TrendDirection::Stable);
        assert_eq!(flat.volatility, 0.0);
    }

    #[test]
    fn detects_opposite_movements() {
        let history = [entry([0.8, 0.4, 0.6, 0.6]), entry([0.6, 0.7, 0.6, 0.6])];
        let report = analyze(&history).unwrap();
        assert_eq!(report.divergences.len(), 1);
        let divergence = &report.divergences[0];
        assert_eq!(divergence.improving_signal, Signal::VitalStability);
        assert_eq!(divergence.declining_signal, Signal::MetabolicBalance);
        assert_eq!(divergence.declining_current, 0.4);
    }

    #[test]
    fn rejects_out_of_range_history() {
        let err = analyze(&[entry([0.5, 1.5, 0.5, 0.5])]).unwrap_err();
        assert!(matches!(
            err,
            TrendError::OutOfRange {
                index: 0,
                signal: Signal::MetabolicBalance,
                ..
            }
        ));
    }
}
