//! Telemetry ingestion and alerting for a monitored drone fleet.
//!
//! Two components, each driven by its own periodic tick:
//! - [`processor::DataProcessor`] buffers pushed samples and fans the newest one out to subscribers.
//! - [`service::MonitorService`] polls a [`source::MetricSource`], keeps bounded per-metric history,
//!   raises threshold alerts and answers status/report queries.

pub mod alert;
pub mod buffer;
pub mod clock;
pub mod config;
pub mod error;
pub mod history;
pub mod monitor;
pub mod processor;
pub mod report;
pub mod service;
pub mod source;
pub mod trend;
pub mod types;

pub use alert::{Alert, Severity};
pub use buffer::{Subscriber, SubscriberId, SubscriberResult};
pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use config::{Config, Thresholds};
pub use error::{CollectError, ConfigError, ServiceError};
pub use monitor::{CycleOutcome, MetricMonitor, SystemStatus};
pub use processor::{DataProcessor, ProcessorStats};
pub use report::{PerformanceReport, TimeRange};
pub use service::{MonitorHandle, MonitorService};
pub use source::{MetricSource, RandomSource};
pub use types::{Health, Metric, Sample, Trend};
