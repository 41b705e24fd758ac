use std::sync::Mutex;

use sysinfo::System;

/// Host CPU and memory utilisation at one instant, both in percent.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ResourceSnapshot {
    pub cpu_percent: Option<f64>,
    pub memory_percent: Option<f64>,
}

/// Source of resource snapshots. Sampling never fails: unknown values are `None`.
pub trait ResourceSampler: Send + Sync + 'static {
    fn sample(&self) -> ResourceSnapshot;
}

/// System-wide sampler backed by `sysinfo`.
///
/// CPU usage is the delta since the previous refresh, so the first sample of
/// a fresh sampler reads close to zero.
pub struct SystemSampler {
    sys: Mutex<System>,
}

impl SystemSampler {
    pub fn new() -> Self {
        let mut sys = System::new();
        sys.refresh_cpu_usage();
        Self {
            sys: Mutex::new(sys),
        }
    }
}

impl Default for SystemSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceSampler for SystemSampler {
    fn sample(&self) -> ResourceSnapshot {
        let Ok(mut sys) = self.sys.lock() else {
            return ResourceSnapshot::default();
        };
        sys.refresh_cpu_usage();
        sys.refresh_memory();

        let cpu = f64::from(sys.global_cpu_usage());
        let total = sys.total_memory();
        let memory_percent = (total > 0).then(|| sys.used_memory() as f64 / total as f64 * 100.0);

        ResourceSnapshot {
            cpu_percent: cpu.is_finite().then_some(cpu),
            memory_percent,
        }
    }
}

/// Sampler used when `tracking.disable_resource_sampling` is set.
pub struct NoopSampler;

impl ResourceSampler for NoopSampler {
    fn sample(&self) -> ResourceSnapshot {
        ResourceSnapshot::default()
    }
}
