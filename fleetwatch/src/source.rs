//! Metric sources polled by the monitor's collection cycle.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::error::CollectError;
use crate::types::Metric;

/// Produces one reading per metric per collection cycle, in percent.
pub trait MetricSource: Send {
    fn read(&mut self, metric: Metric) -> Result<f64, CollectError>;
}

impl<F> MetricSource for F
where
    F: FnMut(Metric) -> Result<f64, CollectError> + Send,
{
    fn read(&mut self, metric: Metric) -> Result<f64, CollectError> {
        self(metric)
    }
}

/// Uniform 0..100 stand-in for a real collector.
#[derive(Debug)]
pub struct RandomSource {
    rng: StdRng,
}

impl RandomSource {
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }

    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl Default for RandomSource {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricSource for RandomSource {
    fn read(&mut self, _metric: Metric) -> Result<f64, CollectError> {
        Ok(self.rng.gen_range(0.0..100.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_readings_are_percentages() {
        let mut src = RandomSource::seeded(7);
        for _ in 0..200 {
            for m in Metric::ALL {
                let v = src.read(m).unwrap();
                assert!((0.0..100.0).contains(&v));
            }
        }
    }

    #[test]
    fn seeded_sources_repeat() {
        let mut a = RandomSource::seeded(42);
        let mut b = RandomSource::seeded(42);
        assert_eq!(a.read(Metric::Cpu), b.read(Metric::Cpu));
    }
}
