//! Resource sampling for agent metrics.

use rand::Rng;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResourceSample {
    /// Megabytes.
    pub memory: f64,
    /// Percent.
    pub cpu: f64,
}

/// Source of memory/cpu figures refreshed after every run.
pub trait ResourceProbe: Send + Sync {
    fn sample(&self) -> ResourceSample;
}

/// Random figures in a plausible range; agents have no process of their own to measure.
#[derive(Debug, Clone)]
pub struct SimulatedProbe {
    pub memory_range: (f64, f64),
    pub cpu_range: (f64, f64),
}

impl Default for SimulatedProbe {
    fn default() -> Self {
        Self {
            memory_range: (20.0, 120.0),
            cpu_range: (0.0, 60.0),
        }
    }
}

impl ResourceProbe for SimulatedProbe {
    fn sample(&self) -> ResourceSample {
        let mut rng = rand::thread_rng();
        ResourceSample {
            memory: sample_range(&mut rng, self.memory_range),
            cpu: sample_range(&mut rng, self.cpu_range),
        }
    }
}

fn sample_range(rng: &mut impl Rng, (low, high): (f64, f64)) -> f64 {
    if high > low {
        rng.gen_range(low..high)
    } else {
        low
    }
}

/// Always reports the same figures.
#[derive(Debug, Clone, Copy)]
pub struct FixedProbe(pub ResourceSample);

impl FixedProbe {
    pub fn new(memory: f64, cpu: f64) -> Self {
        Self(ResourceSample { memory, cpu })
    }
}

impl ResourceProbe for FixedProbe {
    fn sample(&self) -> ResourceSample {
        self.0
    }
}
