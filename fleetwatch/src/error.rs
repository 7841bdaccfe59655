//! Error types for configuration, collection and the monitor service.

use std::path::PathBuf;

use thiserror::Error;

use crate::types::Metric;

/// Rejected configuration. Raised when the config is built or loaded, never during collection.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unknown metric '{0}' (expected one of cpu, memory, network, storage)")]
    UnknownMetric(String),

    #[error("threshold for {metric} must be a finite, non-negative number (got {value})")]
    InvalidThreshold { metric: Metric, value: f64 },

    #[error("{0} must be greater than zero")]
    Zero(&'static str),

    #[error("{name} must be at most {max} (got {value})")]
    TooLarge {
        name: &'static str,
        value: u64,
        max: u64,
    },

    #[error("failed to read config file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// A metric source could not produce a usable reading for one metric.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CollectError {
    #[error("{0} reading unavailable")]
    Unavailable(Metric),

    #[error("{metric} reading is not a finite number ({value})")]
    NotFinite { metric: Metric, value: f64 },

    #[error("{metric} source failed: {reason}")]
    Source { metric: Metric, reason: String },
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ServiceError {
    #[error("monitor service has shut down")]
    Closed,
}
