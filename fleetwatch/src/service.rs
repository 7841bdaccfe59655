//! Monitor service: a single task owns the [`MetricMonitor`] and its source, runs the
//! periodic collection cycle while started, and answers queries over a command channel.
//! Cycles and queries are serialized by the task, so history writes never interleave.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::alert::Alert;
use crate::buffer::panic_message;
use crate::error::ServiceError;
use crate::monitor::{CycleOutcome, MetricMonitor, SystemStatus};
use crate::report::{PerformanceReport, TimeRange};
use crate::source::MetricSource;
use crate::types::{HistoryPoint, Metric};

/// Called after every collection cycle, on the service task. A panicking hook is
/// logged and the service keeps running.
pub type CycleHook = Box<dyn FnMut(&CycleOutcome) + Send>;

#[derive(Debug)]
pub enum MonitorCommand {
    Start,
    Stop,
    IsRunning(oneshot::Sender<bool>),
    CollectNow(oneshot::Sender<CycleOutcome>),
    Status(oneshot::Sender<SystemStatus>),
    Report(TimeRange, oneshot::Sender<PerformanceReport>),
    Acknowledge(u64, oneshot::Sender<bool>),
    Alerts(oneshot::Sender<Vec<Alert>>),
    History(Metric, oneshot::Sender<Vec<HistoryPoint>>),
    Shutdown,
}

#[derive(Clone)]
pub struct MonitorHandle {
    tx: mpsc::UnboundedSender<MonitorCommand>,
}

impl MonitorHandle {
    fn send(&self, cmd: MonitorCommand) -> Result<(), ServiceError> {
        self.tx.send(cmd).map_err(|_| ServiceError::Closed)
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> MonitorCommand,
    ) -> Result<T, ServiceError> {
        let (response_tx, response_rx) = oneshot::channel();
        self.send(make(response_tx))?;
        response_rx.await.map_err(|_| ServiceError::Closed)
    }

    /// Idle -> Running. No-op when already running.
    pub fn start_monitoring(&self) -> Result<(), ServiceError> {
        self.send(MonitorCommand::Start)
    }

    /// Running -> Idle. Cancels future cycles only; always safe to call.
    pub fn stop_monitoring(&self) -> Result<(), ServiceError> {
        self.send(MonitorCommand::Stop)
    }

    pub async fn is_running(&self) -> Result<bool, ServiceError> {
        self.request(MonitorCommand::IsRunning).await
    }

    /// Runs one collection cycle now, outside the periodic schedule.
    pub async fn collect_now(&self) -> Result<CycleOutcome, ServiceError> {
        self.request(MonitorCommand::CollectNow).await
    }

    pub async fn system_status(&self) -> Result<SystemStatus, ServiceError> {
        self.request(MonitorCommand::Status).await
    }

    pub async fn performance_report(
        &self,
        range: TimeRange,
    ) -> Result<PerformanceReport, ServiceError> {
        self.request(|tx| MonitorCommand::Report(range, tx)).await
    }

    pub async fn acknowledge_alert(&self, id: u64) -> Result<bool, ServiceError> {
        self.request(|tx| MonitorCommand::Acknowledge(id, tx)).await
    }

    pub async fn alerts(&self) -> Result<Vec<Alert>, ServiceError> {
        self.request(MonitorCommand::Alerts).await
    }

    pub async fn history(&self, metric: Metric) -> Result<Vec<HistoryPoint>, ServiceError> {
        self.request(|tx| MonitorCommand::History(metric, tx)).await
    }

    pub fn shutdown(&self) -> Result<(), ServiceError> {
        self.send(MonitorCommand::Shutdown)
    }
}

pub struct MonitorService {
    monitor: MetricMonitor,
    source: Box<dyn MetricSource>,
    period: Duration,
    ticker: Option<Interval>,
    on_cycle: Option<CycleHook>,
    rx: mpsc::UnboundedReceiver<MonitorCommand>,
}

impl MonitorService {
    pub fn new(
        monitor: MetricMonitor,
        source: Box<dyn MetricSource>,
        period: Duration,
    ) -> (Self, MonitorHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let service = Self {
            monitor,
            source,
            period,
            ticker: None,
            on_cycle: None,
            rx,
        };
        (service, MonitorHandle { tx })
    }

    pub fn with_cycle_hook(mut self, hook: CycleHook) -> Self {
        self.on_cycle = Some(hook);
        self
    }

    pub async fn run(mut self) {
        debug!("monitor service started");

        loop {
            tokio::select! {
                cmd = self.rx.recv() => match cmd {
                    Some(cmd) => {
                        if !self.handle(cmd) {
                            break;
                        }
                    }
                    None => break,
                },
                _ = next_tick(&mut self.ticker) => {
                    self.collect();
                }
            }
        }

        debug!("monitor service stopped");
    }

    // Returns false on shutdown
    fn handle(&mut self, cmd: MonitorCommand) -> bool {
        match cmd {
            MonitorCommand::Start => {
                if self.ticker.is_none() {
                    let mut interval = interval_at(Instant::now() + self.period, self.period);
                    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
                    self.ticker = Some(interval);
                    info!(period = ?self.period, "monitoring started");
                }
            }
            MonitorCommand::Stop => {
                if self.ticker.take().is_some() {
                    info!("monitoring stopped");
                }
            }
            MonitorCommand::IsRunning(tx) => reply(tx, self.ticker.is_some(), "is_running"),
            MonitorCommand::CollectNow(tx) => {
                let outcome = self.collect();
                reply(tx, outcome, "collect_now");
            }
            MonitorCommand::Status(tx) => reply(tx, self.monitor.system_status(), "status"),
            MonitorCommand::Report(range, tx) => {
                reply(tx, self.monitor.performance_report(range), "report")
            }
            MonitorCommand::Acknowledge(id, tx) => {
                reply(tx, self.monitor.acknowledge_alert(id), "acknowledge")
            }
            MonitorCommand::Alerts(tx) => {
                reply(tx, self.monitor.alerts().cloned().collect(), "alerts")
            }
            MonitorCommand::History(metric, tx) => reply(
                tx,
                self.monitor.history(metric).iter().copied().collect(),
                "history",
            ),
            MonitorCommand::Shutdown => {
                debug!("monitor service shutting down");
                return false;
            }
        }
        true
    }

    fn collect(&mut self) -> CycleOutcome {
        let outcome = self.monitor.collect(self.source.as_mut());
        if let Some(hook) = self.on_cycle.as_mut() {
            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| hook(&outcome))) {
                warn!(cycle = outcome.cycle, "cycle hook panicked: {}", panic_message(&*panic));
            }
        }
        outcome
    }
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

fn reply<T>(tx: oneshot::Sender<T>, value: T, what: &str) {
    if tx.send(value).is_err() {
        error!("failed to send {what} response - receiver dropped");
    }
}
