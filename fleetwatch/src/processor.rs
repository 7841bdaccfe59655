//! Real-time data processor: owns a [`SampleBuffer`] and drives its tick on a tokio interval.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use serde_json::{Map, Value};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, warn};

use crate::buffer::{deliver, SampleBuffer, Subscriber, SubscriberId};
use crate::clock::SharedClock;
use crate::config::BufferConfig;
use crate::types::Sample;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProcessorStats {
    pub buffer_size: usize,
    pub subscriber_count: usize,
    pub is_processing: bool,
}

struct Ticker {
    stop_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

pub struct DataProcessor {
    buffer: Arc<Mutex<SampleBuffer>>,
    period: Duration,
    slow_warn: Duration,
    ticker: Mutex<Option<Ticker>>,
}

impl DataProcessor {
    pub fn new(cfg: &BufferConfig, clock: SharedClock) -> Self {
        Self {
            buffer: Arc::new(Mutex::new(SampleBuffer::new(cfg.capacity, clock))),
            period: cfg.tick_interval(),
            slow_warn: cfg.slow_subscriber_warn(),
            ticker: Mutex::new(None),
        }
    }

    fn buffer(&self) -> MutexGuard<'_, SampleBuffer> {
        lock(&self.buffer)
    }

    fn ticker(&self) -> MutexGuard<'_, Option<Ticker>> {
        self.ticker.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn add_data(&self, fields: Map<String, Value>) {
        self.buffer().add_data(fields);
    }

    pub fn subscribe(&self, subscriber: Arc<dyn Subscriber>) -> SubscriberId {
        self.buffer().subscribe(subscriber)
    }

    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        self.buffer().unsubscribe(id)
    }

    pub fn latest(&self) -> Option<Sample> {
        self.buffer().latest().cloned()
    }

    /// Runs one tick on the caller's thread. Returns the number of successful deliveries.
    pub fn process_once(&self) -> usize {
        process_tick(&self.buffer, self.slow_warn)
    }

    /// Starts the periodic tick. Must be called inside a tokio runtime.
    /// Returns false when already processing (the running ticker is kept).
    pub fn start_processing(&self) -> bool {
        let mut ticker = self.ticker();
        if ticker.as_ref().is_some_and(|t| !t.handle.is_finished()) {
            debug!("data processor already running");
            return false;
        }
        let rt = match tokio::runtime::Handle::try_current() {
            Ok(rt) => rt,
            Err(e) => {
                warn!("cannot start data processor outside a tokio runtime: {e}");
                return false;
            }
        };

        let (stop_tx, mut stop_rx) = watch::channel(false);
        let buffer = Arc::clone(&self.buffer);
        let period = self.period;
        let slow_warn = self.slow_warn;
        let handle = rt.spawn(async move {
            let mut interval = interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        process_tick(&buffer, slow_warn);
                    }
                    _ = stop_rx.changed() => break,
                }
            }
            debug!("data processor stopped");
        });
        *ticker = Some(Ticker { stop_tx, handle });
        debug!(?period, "data processor started");
        true
    }

    /// Stops future ticks. A tick already in progress runs to completion. Safe to call repeatedly.
    pub fn stop_processing(&self) {
        if let Some(t) = self.ticker().take() {
            let _ = t.stop_tx.send(true);
        }
    }

    /// Stops the ticker and waits until its task has exited, so no delivery is still
    /// running when this returns.
    pub async fn stop_and_wait(&self) {
        let ticker = self.ticker().take();
        if let Some(t) = ticker {
            let _ = t.stop_tx.send(true);
            if let Err(e) = t.handle.await {
                warn!("data processor ticker ended abnormally: {e}");
            }
        }
    }

    pub fn is_processing(&self) -> bool {
        self.ticker()
            .as_ref()
            .is_some_and(|t| !t.handle.is_finished())
    }

    pub fn statistics(&self) -> ProcessorStats {
        let is_processing = self.is_processing();
        let buf = self.buffer();
        ProcessorStats {
            buffer_size: buf.len(),
            subscriber_count: buf.subscriber_count(),
            is_processing,
        }
    }
}

impl Drop for DataProcessor {
    fn drop(&mut self) {
        self.stop_processing();
    }
}

fn lock(buffer: &Mutex<SampleBuffer>) -> MutexGuard<'_, SampleBuffer> {
    buffer.lock().unwrap_or_else(PoisonError::into_inner)
}

// Snapshot under the lock, notify outside it so subscribers may call back into the processor
fn process_tick(buffer: &Mutex<SampleBuffer>, slow_warn: Duration) -> usize {
    let pending = lock(buffer).pending();
    match pending {
        Some((sample, subscribers)) => deliver(&sample, &subscribers, slow_warn),
        None => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::SubscriberResult;
    use crate::clock::system_clock;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn processor(capacity: usize) -> DataProcessor {
        let cfg = BufferConfig {
            capacity,
            ..BufferConfig::default()
        };
        DataProcessor::new(&cfg, system_clock())
    }

    fn counter(hits: &Arc<AtomicUsize>) -> Arc<dyn Subscriber> {
        let hits = Arc::clone(hits);
        Arc::new(move |_: &Sample| -> SubscriberResult {
            hits.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }

    fn drone(id: &str) -> Map<String, Value> {
        let mut m = Map::new();
        m.insert("drone".into(), json!(id));
        m
    }

    #[test]
    fn stop_before_start_is_harmless() {
        let p = processor(10);
        p.stop_processing();
        p.stop_processing();
        assert!(!p.statistics().is_processing);
    }

    #[test]
    fn start_outside_runtime_is_refused() {
        let p = processor(10);
        assert!(!p.start_processing());
        assert!(!p.is_processing());
    }

    #[tokio::test(start_paused = true)]
    async fn ticks_deliver_latest_once_per_interval() {
        let p = processor(10);
        let hits = Arc::new(AtomicUsize::new(0));
        let seen = Arc::new(Mutex::new(Vec::new()));
        p.subscribe(counter(&hits));
        {
            let seen = Arc::clone(&seen);
            p.subscribe(Arc::new(move |s: &Sample| -> SubscriberResult {
                seen.lock().unwrap().push(s.fields["drone"].clone());
                Ok(())
            }));
        }
        for id in ["uav-001", "uav-002", "uav-003"] {
            p.add_data(drone(id));
        }
        assert!(p.start_processing());

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(*seen.lock().unwrap(), vec![json!("uav-003")]);

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 2);
        p.stop_processing();
    }

    #[tokio::test(start_paused = true)]
    async fn second_start_does_not_double_tick() {
        let p = processor(10);
        let hits = Arc::new(AtomicUsize::new(0));
        p.subscribe(counter(&hits));
        p.add_data(drone("uav-001"));

        assert!(p.start_processing());
        assert!(!p.start_processing());
        tokio::time::sleep(Duration::from_millis(3500)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 3);
        p.stop_processing();
    }

    #[tokio::test(start_paused = true)]
    async fn stop_halts_future_ticks() {
        let p = processor(10);
        let hits = Arc::new(AtomicUsize::new(0));
        p.subscribe(counter(&hits));
        p.add_data(drone("uav-001"));
        p.start_processing();
        tokio::time::sleep(Duration::from_millis(1500)).await;
        p.stop_processing();
        p.stop_processing();
        let stats = p.statistics();
        assert!(!stats.is_processing);
        assert_eq!(stats.buffer_size, 1);
        assert_eq!(stats.subscriber_count, 1);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_and_wait_joins_the_ticker() {
        let p = processor(10);
        let hits = Arc::new(AtomicUsize::new(0));
        p.subscribe(counter(&hits));
        p.add_data(drone("uav-001"));
        assert!(p.start_processing());
        tokio::time::sleep(Duration::from_millis(2500)).await;

        p.stop_and_wait().await;
        assert!(!p.is_processing());
        let after_stop = hits.load(Ordering::SeqCst);
        assert_eq!(after_stop, 2);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(hits.load(Ordering::SeqCst), after_stop);
        // waiting again with nothing running returns immediately
        p.stop_and_wait().await;
        assert!(p.start_processing());
        p.stop_and_wait().await;
    }

    #[tokio::test(start_paused = true)]
    async fn subscriber_may_reenter_processor() {
        let p = Arc::new(processor(10));
        let hits = Arc::new(AtomicUsize::new(0));
        {
            let weak = Arc::downgrade(&p);
            let hits = Arc::clone(&hits);
            p.subscribe(Arc::new(move |_: &Sample| -> SubscriberResult {
                if let Some(p) = weak.upgrade() {
                    hits.store(p.statistics().buffer_size, Ordering::SeqCst);
                }
                Ok(())
            }));
        }
        p.add_data(drone("uav-004"));
        assert_eq!(p.process_once(), 1);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
