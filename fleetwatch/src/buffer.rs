//! Bounded sample buffer with an ordered subscriber list.
//!
//! Ingestion and delivery are decoupled: `add_data` only appends, and each tick hands
//! the single newest sample to every subscriber. Older samples stay in the buffer but
//! are never pushed individually.

use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::clock::SharedClock;
use crate::history::push_capped;
use crate::types::Sample;

pub type SubscriberResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// Receives the latest sample on every tick.
pub trait Subscriber: Send + Sync {
    fn on_sample(&self, sample: &Sample) -> SubscriberResult;
}

impl<F> Subscriber for F
where
    F: Fn(&Sample) -> SubscriberResult + Send + Sync,
{
    fn on_sample(&self, sample: &Sample) -> SubscriberResult {
        self(sample)
    }
}

/// Identity of one registration. Registering the same listener twice yields two ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct SubscriberId(u64);

pub(crate) type Registration = (SubscriberId, Arc<dyn Subscriber>);

pub struct SampleBuffer {
    samples: VecDeque<Sample>,
    capacity: usize,
    subscribers: Vec<Registration>,
    next_id: u64,
    clock: SharedClock,
}

impl SampleBuffer {
    pub fn new(capacity: usize, clock: SharedClock) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
            subscribers: Vec::new(),
            next_id: 0,
            clock,
        }
    }

    pub fn add_data(&mut self, fields: Map<String, Value>) {
        let sample = Sample::new(fields, self.clock.now());
        if push_capped(&mut self.samples, sample, self.capacity).is_some() {
            debug!(capacity = self.capacity, "sample buffer full, evicted oldest sample");
        }
    }

    pub fn subscribe(&mut self, subscriber: Arc<dyn Subscriber>) -> SubscriberId {
        let id = SubscriberId(self.next_id);
        self.next_id += 1;
        self.subscribers.push((id, subscriber));
        id
    }

    /// Removes the registration with this id. Returns false if it was not registered.
    pub fn unsubscribe(&mut self, id: SubscriberId) -> bool {
        match self.subscribers.iter().position(|(sid, _)| *sid == id) {
            Some(idx) => {
                self.subscribers.remove(idx);
                true
            }
            None => false,
        }
    }

    pub fn latest(&self) -> Option<&Sample> {
        self.samples.back()
    }

    pub fn samples(&self) -> impl Iterator<Item = &Sample> {
        self.samples.iter()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    // Latest sample plus the subscriber list as of now, so delivery can run unlocked
    pub(crate) fn pending(&self) -> Option<(Sample, Vec<Registration>)> {
        self.samples
            .back()
            .map(|s| (s.clone(), self.subscribers.clone()))
    }

    /// One processing tick. Returns the number of subscribers that accepted the sample.
    pub fn tick(&self, slow_warn: Duration) -> usize {
        match self.samples.back() {
            Some(latest) => deliver(latest, &self.subscribers, slow_warn),
            None => 0,
        }
    }
}

/// Hands `sample` to each subscriber in order. Failures and panics are logged and skipped.
pub(crate) fn deliver(sample: &Sample, subscribers: &[Registration], slow_warn: Duration) -> usize {
    let mut delivered = 0;
    for (id, sub) in subscribers {
        let started = Instant::now();
        match catch_unwind(AssertUnwindSafe(|| sub.on_sample(sample))) {
            Ok(Ok(())) => delivered += 1,
            Ok(Err(e)) => warn!(subscriber = ?id, "subscriber failed: {e}"),
            Err(panic) => warn!(subscriber = ?id, "subscriber panicked: {}", panic_message(&*panic)),
        }
        let took = started.elapsed();
        if took > slow_warn {
            warn!(subscriber = ?id, ?took, "slow subscriber delayed the tick");
        }
    }
    delivered
}

pub(crate) fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
