//! Threshold alerts and the bounded alert log.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, error, warn};

use crate::history::push_capped;
use crate::types::Metric;

/// Points above the threshold beyond which an alert escalates to critical.
pub const CRITICAL_MARGIN: f64 = 10.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    Critical,
}

impl Severity {
    pub fn classify(current: f64, threshold: f64) -> Self {
        if current > threshold + CRITICAL_MARGIN {
            Severity::Critical
        } else {
            Severity::Warning
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    SystemPerformance,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Alert {
    pub id: u64,
    #[serde(rename = "type")]
    pub kind: AlertKind,
    pub metric: Metric,
    pub current_value: f64,
    pub threshold: f64,
    pub severity: Severity,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub acknowledged: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub acknowledged_at: Option<DateTime<Utc>>,
}

/// FIFO-bounded alert log. Eviction ignores acknowledgement state.
#[derive(Debug, Clone)]
pub struct AlertLog {
    alerts: VecDeque<Alert>,
    cap: usize,
    next_id: u64,
}

impl AlertLog {
    pub fn new(cap: usize) -> Self {
        Self {
            alerts: VecDeque::with_capacity(cap.min(1024)),
            cap,
            next_id: 1,
        }
    }

    /// Records a threshold breach and returns the new alert's id.
    pub fn raise(
        &mut self,
        metric: Metric,
        current_value: f64,
        threshold: f64,
        now: DateTime<Utc>,
    ) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        let severity = Severity::classify(current_value, threshold);
        let message = format!(
            "{} usage too high: {:.1}% (threshold: {}%)",
            metric.as_str().to_ascii_uppercase(),
            current_value,
            threshold
        );
        match severity {
            Severity::Critical => error!(alert_id = id, %metric, current_value, threshold, "{message}"),
            Severity::Warning => warn!(alert_id = id, %metric, current_value, threshold, "{message}"),
        }
        let alert = Alert {
            id,
            kind: AlertKind::SystemPerformance,
            metric,
            current_value,
            threshold,
            severity,
            message,
            timestamp: now,
            acknowledged: false,
            acknowledged_at: None,
        };
        if let Some(old) = push_capped(&mut self.alerts, alert, self.cap) {
            if !old.acknowledged {
                debug!(alert_id = old.id, "evicted unacknowledged alert");
            }
        }
        id
    }

    /// Returns false when no alert has this id. Re-acknowledging keeps the first timestamp.
    pub fn acknowledge(&mut self, id: u64, now: DateTime<Utc>) -> bool {
        match self.alerts.iter_mut().find(|a| a.id == id) {
            Some(alert) => {
                if !alert.acknowledged {
                    alert.acknowledged = true;
                    alert.acknowledged_at = Some(now);
                }
                true
            }
            None => false,
        }
    }

    pub fn active_count(&self) -> usize {
        self.alerts.iter().filter(|a| !a.acknowledged).count()
    }

    pub fn get(&self, id: u64) -> Option<&Alert> {
        self.alerts.iter().find(|a| a.id == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Alert> {
        self.alerts.iter()
    }

    pub fn len(&self) -> usize {
        self.alerts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.alerts.is_empty()
    }
}
