//! Metric monitor: per-metric current value and bounded history, threshold alerts,
//! and the derived status queries. Single owner; mutation only through `collect`
//! and `acknowledge_alert`.

use std::collections::{BTreeMap, VecDeque};
use std::panic::{catch_unwind, AssertUnwindSafe};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, warn};

use crate::alert::{Alert, AlertLog};
use crate::buffer::panic_message;
use crate::clock::SharedClock;
use crate::config::{MonitorConfig, Thresholds};
use crate::error::CollectError;
use crate::history::PerMetricHistory;
use crate::source::MetricSource;
use crate::trend::history_trend;
use crate::types::{Health, HistoryPoint, Metric, Status, Trend};

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Reading {
    pub metric: Metric,
    pub value: f64,
}

/// What one collection cycle did.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CycleOutcome {
    pub cycle: u64,
    pub at: DateTime<Utc>,
    pub readings: Vec<Reading>,
    #[serde(skip)]
    pub skipped: Vec<CollectError>,
    pub alerts_raised: Vec<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MetricStatus {
    pub current: f64,
    pub trend: Trend,
    pub status: Status,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SystemStatus {
    pub overall: Health,
    pub metrics: BTreeMap<Metric, MetricStatus>,
    pub active_alerts: usize,
    pub uptime_secs: i64,
}

pub struct MetricMonitor {
    current: [f64; 4],
    history: PerMetricHistory,
    thresholds: Thresholds,
    alerts: AlertLog,
    clock: SharedClock,
    started_at: DateTime<Utc>,
    cycles: u64,
}

impl MetricMonitor {
    pub fn new(cfg: &MonitorConfig, clock: SharedClock) -> Self {
        let started_at = clock.now();
        Self {
            current: [0.0; 4],
            history: PerMetricHistory::new(cfg.history_capacity),
            thresholds: cfg.thresholds,
            alerts: AlertLog::new(cfg.alert_capacity),
            clock,
            started_at,
            cycles: 0,
        }
    }

    /// One collection cycle: read every metric, record valid readings, then check
    /// thresholds for the metrics refreshed in this cycle. A failed, panicking or
    /// non-finite reading skips that metric only.
    pub fn collect(&mut self, source: &mut dyn MetricSource) -> CycleOutcome {
        let now = self.clock.now();
        self.cycles += 1;
        let mut readings = Vec::with_capacity(Metric::ALL.len());
        let mut skipped = Vec::new();

        for metric in Metric::ALL {
            match read_guarded(source, metric).and_then(|v| validate(metric, v)) {
                Ok(value) => {
                    self.current[metric.index()] = value;
                    self.history.push(metric, value, now);
                    readings.push(Reading { metric, value });
                }
                Err(e) => {
                    warn!(cycle = self.cycles, "skipping {metric} this cycle: {e}");
                    skipped.push(e);
                }
            }
        }

        let alerts_raised = readings
            .iter()
            .filter_map(|r| {
                let threshold = self.thresholds.get(r.metric);
                (r.value > threshold).then(|| self.alerts.raise(r.metric, r.value, threshold, now))
            })
            .collect::<Vec<_>>();

        debug!(
            cycle = self.cycles,
            collected = readings.len(),
            skipped = skipped.len(),
            alerts = alerts_raised.len(),
            "collection cycle done"
        );
        CycleOutcome {
            cycle: self.cycles,
            at: now,
            readings,
            skipped,
            alerts_raised,
        }
    }

    pub fn system_status(&self) -> SystemStatus {
        let metrics = Metric::ALL
            .iter()
            .map(|&m| {
                let current = self.current(m);
                let status = if current > self.thresholds.get(m) {
                    Status::Warning
                } else {
                    Status::Normal
                };
                let st = MetricStatus {
                    current,
                    trend: history_trend(self.history.get(m)),
                    status,
                };
                (m, st)
            })
            .collect();
        let mean = self.current.iter().sum::<f64>() / self.current.len() as f64;
        SystemStatus {
            overall: Health::from_average(mean),
            metrics,
            active_alerts: self.alerts.active_count(),
            uptime_secs: (self.clock.now() - self.started_at).num_seconds(),
        }
    }

    /// Marks the alert acknowledged. Returns false if no alert has this id.
    pub fn acknowledge_alert(&mut self, id: u64) -> bool {
        let now = self.clock.now();
        let found = self.alerts.acknowledge(id, now);
        if !found {
            debug!(alert_id = id, "acknowledge: no such alert");
        }
        found
    }

    pub fn current(&self, metric: Metric) -> f64 {
        self.current[metric.index()]
    }

    pub fn history(&self, metric: Metric) -> &VecDeque<HistoryPoint> {
        self.history.get(metric)
    }

    pub(crate) fn history_since(
        &self,
        metric: Metric,
        since: DateTime<Utc>,
    ) -> impl Iterator<Item = &HistoryPoint> + '_ {
        self.history.since(metric, since)
    }

    pub fn alerts(&self) -> impl Iterator<Item = &Alert> {
        self.alerts.iter()
    }

    pub fn active_alerts(&self) -> usize {
        self.alerts.active_count()
    }

    pub fn thresholds(&self) -> &Thresholds {
        &self.thresholds
    }

    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    pub(crate) fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }
}

fn read_guarded(source: &mut dyn MetricSource, metric: Metric) -> Result<f64, CollectError> {
    catch_unwind(AssertUnwindSafe(|| source.read(metric))).unwrap_or_else(|panic| {
        Err(CollectError::Source {
            metric,
            reason: format!("source panicked: {}", panic_message(&*panic)),
        })
    })
}

fn validate(metric: Metric, value: f64) -> Result<f64, CollectError> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(CollectError::NotFinite { metric, value })
    }
}
