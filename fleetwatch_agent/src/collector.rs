//! Host metric source using sysinfo for fleetwatch_agent.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::Instant;

use fleetwatch::{CollectError, Metric, MetricSource};
use once_cell::sync::OnceCell;
use sysinfo::{Disks, Networks, System};
use tracing::warn;

// Link capacity used to turn network throughput into a percentage.
// Override with FLEETWATCH_AGENT_LINK_BYTES_PER_SEC (default 1 Gbit/s).
pub fn link_bytes_per_sec() -> u64 {
    static V: OnceCell<u64> = OnceCell::new();
    *V.get_or_init(|| {
        std::env::var("FLEETWATCH_AGENT_LINK_BYTES_PER_SEC")
            .ok()
            .and_then(|v| v.parse().ok())
            .filter(|v| *v > 0)
            .unwrap_or(125_000_000)
    })
}

pub struct SysinfoSource {
    sys: System,
    nets: Networks,
    disks: Disks,
    last_net_read: Instant,
    link_bytes_per_sec: f64,
}

impl SysinfoSource {
    pub fn new(link_bytes_per_sec: u64) -> Self {
        let mut sys = System::new();
        // cpu usage is a delta; prime it so the first cycle has a baseline
        sys.refresh_cpu_usage();
        sys.refresh_memory();
        Self {
            sys,
            nets: Networks::new_with_refreshed_list(),
            disks: Disks::new_with_refreshed_list(),
            last_net_read: Instant::now(),
            link_bytes_per_sec: link_bytes_per_sec.max(1) as f64,
        }
    }

    fn cpu(&mut self) -> Result<f64, CollectError> {
        guarded(Metric::Cpu, || self.sys.refresh_cpu_usage())?;
        Ok(self.sys.global_cpu_usage() as f64)
    }

    fn memory(&mut self) -> Result<f64, CollectError> {
        guarded(Metric::Memory, || self.sys.refresh_memory())?;
        let total = self.sys.total_memory();
        if total == 0 {
            return Err(CollectError::Unavailable(Metric::Memory));
        }
        let used = total.saturating_sub(self.sys.available_memory());
        Ok(used as f64 / total as f64 * 100.0)
    }

    fn storage(&mut self) -> Result<f64, CollectError> {
        guarded(Metric::Storage, || self.disks.refresh(true))?;
        // Skip anything with available == 0 (e.g., overlay, squashfs)
        let (total, available) = self
            .disks
            .list()
            .iter()
            .filter(|d| d.available_space() > 0)
            .fold((0u64, 0u64), |(t, a), d| {
                (
                    t.saturating_add(d.total_space()),
                    a.saturating_add(d.available_space()),
                )
            });
        if total == 0 {
            return Err(CollectError::Unavailable(Metric::Storage));
        }
        Ok(total.saturating_sub(available) as f64 / total as f64 * 100.0)
    }

    fn network(&mut self) -> Result<f64, CollectError> {
        guarded(Metric::Network, || self.nets.refresh(true))?;
        let now = Instant::now();
        let dt = now.duration_since(self.last_net_read).as_secs_f64().max(1e-6);
        self.last_net_read = now;
        // received()/transmitted() are deltas since the previous refresh
        let bytes: u64 = self
            .nets
            .iter()
            .map(|(_, data)| data.received().saturating_add(data.transmitted()))
            .sum();
        let pct = bytes as f64 / dt / self.link_bytes_per_sec * 100.0;
        Ok(pct.clamp(0.0, 100.0))
    }
}

impl MetricSource for SysinfoSource {
    fn read(&mut self, metric: Metric) -> Result<f64, CollectError> {
        match metric {
            Metric::Cpu => self.cpu(),
            Metric::Memory => self.memory(),
            Metric::Network => self.network(),
            Metric::Storage => self.storage(),
        }
    }
}

fn guarded(metric: Metric, refresh: impl FnOnce()) -> Result<(), CollectError> {
    catch_unwind(AssertUnwindSafe(refresh)).map_err(|e| {
        warn!("sysinfo {metric} refresh panicked: {e:?}");
        CollectError::Source {
            metric,
            reason: "sysinfo refresh panicked".into(),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn readings_are_percentages_or_unavailable() {
        let mut src = SysinfoSource::new(link_bytes_per_sec());
        for m in Metric::ALL {
            match src.read(m) {
                Ok(v) => assert!((0.0..=100.0).contains(&v), "{m} = {v}"),
                Err(CollectError::Unavailable(got)) => assert_eq!(got, m),
                Err(e) => panic!("unexpected error for {m}: {e}"),
            }
        }
    }
}
