//! Time-windowed performance reports with recommendations.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::Thresholds;
use crate::monitor::{MetricMonitor, SystemStatus};
use crate::types::{HistoryPoint, Metric};

/// Peak usage above which a capacity recommendation is made.
pub const PEAK_CAPACITY_PCT: f64 = 95.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TimeRange {
    #[serde(rename = "1h")]
    OneHour,
    #[default]
    #[serde(rename = "24h")]
    OneDay,
    #[serde(rename = "7d")]
    SevenDays,
}

impl TimeRange {
    pub fn lookback(self) -> Duration {
        match self {
            TimeRange::OneHour => Duration::hours(1),
            TimeRange::OneDay => Duration::hours(24),
            TimeRange::SevenDays => Duration::days(7),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TimeRange::OneHour => "1h",
            TimeRange::OneDay => "24h",
            TimeRange::SevenDays => "7d",
        }
    }

    /// Parses a range name, falling back to the default for anything unrecognized.
    pub fn parse_or_default(s: &str) -> Self {
        s.parse().unwrap_or_else(|_| {
            debug!(range = s, "unrecognized report range, using 24h");
            TimeRange::default()
        })
    }
}

impl fmt::Display for TimeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TimeRange {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "1h" => Ok(TimeRange::OneHour),
            "24h" => Ok(TimeRange::OneDay),
            "7d" => Ok(TimeRange::SevenDays),
            other => Err(format!("unknown time range '{other}' (expected 1h, 24h or 7d)")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MetricSummary {
    pub average: f64,
    pub min: f64,
    pub max: f64,
    pub current: f64,
    pub data_points: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    Medium,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RecommendationKind {
    Performance,
    Capacity,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Recommendation {
    #[serde(rename = "type")]
    pub kind: RecommendationKind,
    pub priority: Priority,
    pub metric: Metric,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PerformanceReport {
    pub time_range: TimeRange,
    pub generated_at: DateTime<Utc>,
    pub summary: SystemStatus,
    pub metrics: BTreeMap<Metric, MetricSummary>,
    pub recommendations: Vec<Recommendation>,
}

/// Aggregates the points in the window. `None` when the window is empty.
pub fn summarize<'a>(
    points: impl IntoIterator<Item = &'a HistoryPoint>,
    current: f64,
) -> Option<MetricSummary> {
    let mut n = 0usize;
    let mut sum = 0.0;
    let mut min = f64::INFINITY;
    let mut max = f64::NEG_INFINITY;
    for p in points {
        n += 1;
        sum += p.value;
        min = min.min(p.value);
        max = max.max(p.value);
    }
    (n > 0).then(|| MetricSummary {
        average: sum / n as f64,
        min,
        max,
        current,
        data_points: n,
    })
}

/// High priority when the windowed average breaches the threshold, medium when the
/// peak passes `PEAK_CAPACITY_PCT`. Metric order is preserved; both may fire.
pub fn recommendations(
    metrics: &BTreeMap<Metric, MetricSummary>,
    thresholds: &Thresholds,
) -> Vec<Recommendation> {
    let mut out = Vec::new();
    for (&metric, s) in metrics {
        let name = metric.as_str().to_ascii_uppercase();
        if s.average > thresholds.get(metric) {
            out.push(Recommendation {
                kind: RecommendationKind::Performance,
                priority: Priority::High,
                metric,
                message: format!(
                    "{name} average usage ({:.1}%) exceeds its threshold; optimize or upgrade the resource",
                    s.average
                ),
            });
        }
        if s.max > PEAK_CAPACITY_PCT {
            out.push(Recommendation {
                kind: RecommendationKind::Capacity,
                priority: Priority::Medium,
                metric,
                message: format!(
                    "{name} peak usage reached {:.1}%; watch capacity and plan to scale",
                    s.max
                ),
            });
        }
    }
    out
}

impl MetricMonitor {
    pub fn performance_report(&self, range: TimeRange) -> PerformanceReport {
        let now = self.now();
        let since = now - range.lookback();
        let metrics: BTreeMap<Metric, MetricSummary> = Metric::ALL
            .iter()
            .filter_map(|&m| summarize(self.history_since(m, since), self.current(m)).map(|s| (m, s)))
            .collect();
        let recommendations = recommendations(&metrics, self.thresholds());
        PerformanceReport {
            time_range: range,
            generated_at: now,
            summary: self.system_status(),
            metrics,
            recommendations,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::MonitorConfig;
    use crate::error::CollectError;
    use chrono::TimeZone;
    use std::sync::Arc;

    fn monitor() -> (ManualClock, MetricMonitor) {
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap());
        let mon = MetricMonitor::new(&MonitorConfig::default(), Arc::new(clock.clone()));
        (clock, mon)
    }

    #[test]
    fn range_parsing_falls_back_to_a_day() {
        assert_eq!(TimeRange::parse_or_default("1h"), TimeRange::OneHour);
        assert_eq!(TimeRange::parse_or_default("7d"), TimeRange::SevenDays);
        assert_eq!(TimeRange::parse_or_default("30d"), TimeRange::OneDay);
        assert_eq!(TimeRange::parse_or_default(""), TimeRange::OneDay);
        assert!("2h".parse::<TimeRange>().is_err());
    }

    #[test]
    fn day_report_only_covers_the_last_day() {
        let (clock, mut mon) = monitor();
        // one reading per hour for 48 hours; cpu reads the hour index
        for hour in 0..48 {
            let v = hour as f64;
            mon.collect(&mut move |_: Metric| -> Result<f64, CollectError> { Ok(v) });
            clock.advance(Duration::hours(1));
        }
        // now = start + 48h; window starts at start + 24h (inclusive)
        let report = mon.performance_report(TimeRange::OneDay);
        let cpu = report.metrics[&Metric::Cpu];
        let expected: Vec<f64> = (24..48).map(|h| h as f64).collect();
        assert_eq!(cpu.data_points, expected.len());
        assert_eq!(cpu.min, 24.0);
        assert_eq!(cpu.max, 47.0);
        assert_eq!(cpu.average, expected.iter().sum::<f64>() / expected.len() as f64);
        assert_eq!(cpu.current, 47.0);
        assert_eq!(report.time_range, TimeRange::OneDay);

        let hour = mon.performance_report(TimeRange::OneHour);
        assert_eq!(hour.metrics[&Metric::Cpu].data_points, 1);
        let week = mon.performance_report(TimeRange::SevenDays);
        assert_eq!(week.metrics[&Metric::Cpu].data_points, 48);
    }

    #[test]
    fn metrics_without_points_are_left_out() {
        let (clock, mut mon) = monitor();
        mon.collect(&mut |m: Metric| -> Result<f64, CollectError> {
            match m {
                Metric::Network => Err(CollectError::Unavailable(m)),
                _ => Ok(10.0),
            }
        });
        clock.advance(Duration::minutes(1));
        let report = mon.performance_report(TimeRange::OneHour);
        assert!(!report.metrics.contains_key(&Metric::Network));
        assert_eq!(report.metrics.len(), 3);

        clock.advance(Duration::hours(2));
        assert!(mon.performance_report(TimeRange::OneHour).metrics.is_empty());
    }

    #[test]
    fn recommendations_follow_metric_order() {
        let mut metrics = BTreeMap::new();
        let s = |average, max| MetricSummary {
            average,
            min: 0.0,
            max,
            current: max,
            data_points: 3,
        };
        metrics.insert(Metric::Storage, s(96.0, 99.0));
        metrics.insert(Metric::Cpu, s(50.0, 97.0));
        metrics.insert(Metric::Memory, s(86.0, 90.0));
        metrics.insert(Metric::Network, s(10.0, 95.0));

        let recs = recommendations(&metrics, &Thresholds::default());
        let got: Vec<(Metric, Priority)> = recs.iter().map(|r| (r.metric, r.priority)).collect();
        assert_eq!(
            got,
            vec![
                (Metric::Cpu, Priority::Medium),
                (Metric::Memory, Priority::High),
                (Metric::Storage, Priority::High),
                (Metric::Storage, Priority::Medium),
            ]
        );
        assert_eq!(recs[0].kind, RecommendationKind::Capacity);
        assert_eq!(recs[1].kind, RecommendationKind::Performance);
    }

    #[test]
    fn report_serializes_for_exporters() {
        let (_, mut mon) = monitor();
        mon.collect(&mut |_: Metric| -> Result<f64, CollectError> { Ok(97.0) });
        let js = serde_json::to_value(mon.performance_report(TimeRange::OneHour)).unwrap();
        assert_eq!(js["time_range"], "1h");
        assert_eq!(js["metrics"]["cpu"]["data_points"], 1);
        assert_eq!(js["summary"]["overall"], "poor");
        assert_eq!(js["recommendations"][0]["type"], "performance");
        assert_eq!(js["recommendations"][0]["priority"], "high");
    }
}
