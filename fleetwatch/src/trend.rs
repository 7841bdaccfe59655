//! Short-term trend over the tail of a metric's history.

use std::collections::VecDeque;

use crate::types::{HistoryPoint, Trend};

/// Number of trailing points compared.
pub const TREND_WINDOW: usize = 5;
/// Percent change beyond which a trend is no longer stable.
pub const TREND_CHANGE_PCT: f64 = 10.0;

/// Classifies the change from the first to the last of the trailing `TREND_WINDOW` values.
///
/// Fewer than two values is `Stable`. The change is taken relative to the magnitude of the
/// first value, so direction holds for negative series. A window starting at zero has no
/// percentage change; it follows the sign of the last value instead.
pub fn calculate_trend(values: &[f64]) -> Trend {
    if values.len() < 2 {
        return Trend::Stable;
    }
    let recent = &values[values.len().saturating_sub(TREND_WINDOW)..];
    let first = recent[0];
    let last = recent[recent.len() - 1];

    if first == 0.0 {
        return if last > 0.0 {
            Trend::Increasing
        } else if last < 0.0 {
            Trend::Decreasing
        } else {
            Trend::Stable
        };
    }

    let change = (last - first) / first.abs() * 100.0;
    if change > TREND_CHANGE_PCT {
        Trend::Increasing
    } else if change < -TREND_CHANGE_PCT {
        Trend::Decreasing
    } else {
        Trend::Stable
    }
}

pub fn history_trend(history: &VecDeque<HistoryPoint>) -> Trend {
    let skip = history.len().saturating_sub(TREND_WINDOW);
    let tail: Vec<f64> = history.iter().skip(skip).map(|p| p.value).collect();
    calculate_trend(&tail)
}
