//! Small utilities to manage bounded history buffers.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};

use crate::types::{HistoryPoint, Metric};

/// Appends `v`, dropping from the front until the deque holds at most `cap` items.
/// Returns the last evicted item, if any.
pub fn push_capped<T>(dq: &mut VecDeque<T>, v: T, cap: usize) -> Option<T> {
    dq.push_back(v);
    let mut evicted = None;
    while dq.len() > cap {
        evicted = dq.pop_front();
    }
    evicted
}

// Keeps a history deque per metric with a fixed capacity
#[derive(Debug, Clone)]
pub struct PerMetricHistory {
    deques: [VecDeque<HistoryPoint>; 4],
    cap: usize,
}

impl PerMetricHistory {
    pub fn new(cap: usize) -> Self {
        Self {
            deques: std::array::from_fn(|_| VecDeque::with_capacity(cap.min(1024))),
            cap,
        }
    }

    pub fn push(&mut self, metric: Metric, value: f64, timestamp: DateTime<Utc>) {
        push_capped(
            &mut self.deques[metric.index()],
            HistoryPoint { value, timestamp },
            self.cap,
        );
    }

    pub fn get(&self, metric: Metric) -> &VecDeque<HistoryPoint> {
        &self.deques[metric.index()]
    }

    // Points at or after `since`, oldest first
    pub fn since(
        &self,
        metric: Metric,
        since: DateTime<Utc>,
    ) -> impl Iterator<Item = &HistoryPoint> + '_ {
        self.deques[metric.index()]
            .iter()
            .filter(move |p| p.timestamp >= since)
    }

    pub fn capacity(&self) -> usize {
        self.cap
    }
}
