//! Value types shared by the buffer, the monitor and report consumers.
//! Everything here serializes to the JSON shape the dashboard reads.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ConfigError;

/// The fixed set of tracked metrics. Declaration order is the enumeration order
/// used for collection, alerting and recommendations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    Cpu,
    Memory,
    Network,
    Storage,
}

impl Metric {
    pub const ALL: [Metric; 4] = [Metric::Cpu, Metric::Memory, Metric::Network, Metric::Storage];

    pub fn as_str(self) -> &'static str {
        match self {
            Metric::Cpu => "cpu",
            Metric::Memory => "memory",
            Metric::Network => "network",
            Metric::Storage => "storage",
        }
    }

    pub(crate) fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Metric {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cpu" => Ok(Metric::Cpu),
            "memory" => Ok(Metric::Memory),
            "network" => Ok(Metric::Network),
            "storage" => Ok(Metric::Storage),
            _ => Err(ConfigError::UnknownMetric(s.to_string())),
        }
    }
}

/// One reading kept in a metric's history.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HistoryPoint {
    pub value: f64,
    pub timestamp: DateTime<Utc>,
}

/// An ingested telemetry sample: producer fields plus the ingestion timestamp.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Sample {
    #[serde(flatten)]
    pub fields: Map<String, Value>,
    pub timestamp: DateTime<Utc>,
}

impl Sample {
    /// Stamps producer fields. A producer-supplied `timestamp` field is replaced.
    pub fn new(mut fields: Map<String, Value>, timestamp: DateTime<Utc>) -> Self {
        fields.remove("timestamp");
        Self { fields, timestamp }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Increasing,
    Decreasing,
    Stable,
}

/// Fleet-wide health bucket derived from the mean of current readings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Health {
    Excellent,
    Good,
    Fair,
    Poor,
}

impl Health {
    pub fn from_average(avg: f64) -> Self {
        if avg < 50.0 {
            Health::Excellent
        } else if avg < 70.0 {
            Health::Good
        } else if avg < 85.0 {
            Health::Fair
        } else {
            Health::Poor
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Normal,
    Warning,
}
