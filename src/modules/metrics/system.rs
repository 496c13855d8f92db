//! Host CPU and memory gauges.

use std::sync::Arc;
use std::time::Duration;

use sysinfo::{CpuRefreshKind, MemoryRefreshKind, RefreshKind, System};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::error::MetricsResult;
use super::labels::Labels;
use super::registry::{MetricDefinition, MetricsRegistry};

/// Host CPU usage in percent, averaged over all cores.
pub const SYSTEM_CPU_PERCENT: &str = "system_cpu_percent";
/// Host memory in use, in bytes.
pub const SYSTEM_MEMORY_BYTES: &str = "system_memory_bytes";

/// Samples host CPU and memory usage into two unlabelled gauges.
pub struct SystemSampler {
    system: System,
    registry: Arc<MetricsRegistry>,
}

impl std::fmt::Debug for SystemSampler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SystemSampler").finish_non_exhaustive()
    }
}

impl SystemSampler {
    /// Register the gauges on `registry`.
    ///
    /// # Errors
    ///
    /// Fails if either name is already registered with another type.
    pub fn register(registry: Arc<MetricsRegistry>) -> MetricsResult<Self> {
        registry.register(MetricDefinition::gauge(
            SYSTEM_CPU_PERCENT,
            "Host CPU usage in percent",
        ))?;
        registry.register(MetricDefinition::gauge(
            SYSTEM_MEMORY_BYTES,
            "Host memory in use, in bytes",
        ))?;

        let system = System::new_with_specifics(
            RefreshKind::nothing()
                .with_cpu(CpuRefreshKind::nothing().with_cpu_usage())
                .with_memory(MemoryRefreshKind::nothing().with_ram()),
        );
        Ok(Self { system, registry })
    }

    /// Refresh both gauges.
    ///
    /// CPU usage is measured between two refreshes, so the first sample
    /// reads 0.
    ///
    /// # Errors
    ///
    /// Fails only if the gauges were never registered.
    pub fn sample(&mut self) -> MetricsResult<()> {
        self.system.refresh_cpu_usage();
        self.system.refresh_memory();

        let none = Labels::new();
        self.registry.set(
            SYSTEM_CPU_PERCENT,
            &none,
            f64::from(self.system.global_cpu_usage()),
        )?;
        self.registry
            .set(SYSTEM_MEMORY_BYTES, &none, self.system.used_memory() as f64)?;
        Ok(())
    }

    /// Sample every `interval` until `cancel` fires.
    pub fn spawn(mut self, interval: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = self.sample() {
                            warn!(error = %e, "Failed to sample system metrics");
                        }
                    }
                }
            }
            debug!("System sampler stopped");
        })
    }
}
