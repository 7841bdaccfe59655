//! Pipeline configuration: JSON file with per-field defaults.
//! Looked up under $XDG_CONFIG_HOME/fleetwatch/config.json (fallback ~/.config/fleetwatch/config.json)

use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    fs, io,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::error::ConfigError;
use crate::types::Metric;

pub const DEFAULT_BUFFER_CAPACITY: usize = 1000;
pub const DEFAULT_HISTORY_CAPACITY: usize = 100;
pub const DEFAULT_ALERT_CAPACITY: usize = 50;
pub const DEFAULT_BUFFER_TICK_MS: u64 = 1_000;
pub const DEFAULT_MONITOR_TICK_MS: u64 = 5_000;
pub const DEFAULT_SLOW_SUBSCRIBER_MS: u64 = 250;
/// Upper bound for any buffer, history or alert log capacity.
pub const MAX_CAPACITY: usize = 1_000_000;

/// Alert threshold per metric, in percent.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(
    try_from = "BTreeMap<String, f64>",
    into = "BTreeMap<String, f64>"
)]
pub struct Thresholds([f64; 4]);

impl Default for Thresholds {
    fn default() -> Self {
        Self([80.0, 85.0, 90.0, 95.0])
    }
}

impl Thresholds {
    pub fn get(&self, metric: Metric) -> f64 {
        self.0[metric.index()]
    }

    pub fn with(mut self, metric: Metric, value: f64) -> Result<Self, ConfigError> {
        if !value.is_finite() || value < 0.0 {
            return Err(ConfigError::InvalidThreshold { metric, value });
        }
        self.0[metric.index()] = value;
        Ok(self)
    }
}

// Metrics missing from the map keep their default threshold.
impl TryFrom<BTreeMap<String, f64>> for Thresholds {
    type Error = ConfigError;

    fn try_from(map: BTreeMap<String, f64>) -> Result<Self, Self::Error> {
        map.into_iter().try_fold(Thresholds::default(), |t, (name, v)| {
            let metric: Metric = name.parse()?;
            t.with(metric, v)
        })
    }
}

impl From<Thresholds> for BTreeMap<String, f64> {
    fn from(t: Thresholds) -> Self {
        Metric::ALL
            .iter()
            .map(|m| (m.as_str().to_string(), t.get(*m)))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferConfig {
    pub capacity: usize,
    pub tick_interval_ms: u64,
    pub slow_subscriber_warn_ms: u64,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_BUFFER_CAPACITY,
            tick_interval_ms: DEFAULT_BUFFER_TICK_MS,
            slow_subscriber_warn_ms: DEFAULT_SLOW_SUBSCRIBER_MS,
        }
    }
}

impl BufferConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn slow_subscriber_warn(&self) -> Duration {
        Duration::from_millis(self.slow_subscriber_warn_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub history_capacity: usize,
    pub alert_capacity: usize,
    pub tick_interval_ms: u64,
    pub thresholds: Thresholds,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            alert_capacity: DEFAULT_ALERT_CAPACITY,
            tick_interval_ms: DEFAULT_MONITOR_TICK_MS,
            thresholds: Thresholds::default(),
        }
    }
}

impl MonitorConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub buffer: BufferConfig,
    pub monitor: MonitorConfig,
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let checks = [
            ("buffer.capacity", self.buffer.capacity as u64),
            ("buffer.tick_interval_ms", self.buffer.tick_interval_ms),
            ("monitor.history_capacity", self.monitor.history_capacity as u64),
            ("monitor.alert_capacity", self.monitor.alert_capacity as u64),
            ("monitor.tick_interval_ms", self.monitor.tick_interval_ms),
        ];
        if let Some((name, _)) = checks.iter().find(|(_, v)| *v == 0) {
            return Err(ConfigError::Zero(name));
        }
        let capacities = [
            ("buffer.capacity", self.buffer.capacity),
            ("monitor.history_capacity", self.monitor.history_capacity),
            ("monitor.alert_capacity", self.monitor.alert_capacity),
        ];
        match capacities.iter().find(|(_, v)| *v > MAX_CAPACITY) {
            Some(&(name, value)) => Err(ConfigError::TooLarge {
                name,
                value: value as u64,
                max: MAX_CAPACITY as u64,
            }),
            None => Ok(()),
        }
    }

    pub fn from_json(s: &str, path: &Path) -> Result<Self, ConfigError> {
        let cfg: Config = serde_json::from_str(s).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Loads an explicit config file; the file must exist.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let s = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&s, path)
    }

    /// Loads the default config file, falling back to defaults when it does not exist.
    pub fn load_default() -> Result<Self, ConfigError> {
        let path = config_path();
        match fs::read_to_string(&path) {
            Ok(s) => Self::from_json(&s, &path),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Config::default()),
            Err(source) => Err(ConfigError::Io { path, source }),
        }
    }
}

pub fn config_dir() -> PathBuf {
    if let Some(xdg) = std::env::var_os("XDG_CONFIG_HOME") {
        PathBuf::from(xdg).join("fleetwatch")
    } else {
        dirs_next::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("fleetwatch")
    }
}

pub fn config_path() -> PathBuf {
    config_dir().join("config.json")
}
