//! Simulated load driver.
//!
//! Feeds each tenant's pool in the in-memory resource manager with a
//! sinusoidal demand curve, so the controllers have something to react to.

use std::f64::consts::TAU;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info};

use scalegrid_core::{
    InMemoryResourceManager, LoadProfile, MetricsSnapshot, TenantId, epoch_millis, parse_duration,
};

/// Latency of an unloaded unit.
const BASE_LATENCY_MS: f64 = 40.0;

/// One tenant's demand curve.
#[derive(Debug, Clone)]
pub struct SimulatedTenant {
    pub id: TenantId,
    pub profile: LoadProfile,
    period: Duration,
}

impl SimulatedTenant {
    /// `None` if the profile's period does not parse.
    pub fn new(id: impl Into<TenantId>, profile: LoadProfile) -> Option<Self> {
        let period = parse_duration(&profile.period).filter(|p| !p.is_zero())?;
        Some(Self {
            id: id.into(),
            profile,
            period,
        })
    }

    /// Requests per minute at `elapsed` into the run.
    pub fn demand(&self, elapsed: Duration) -> f64 {
        let phase = TAU * elapsed.as_secs_f64() / self.period.as_secs_f64();
        (self.profile.base + self.profile.amplitude * phase.sin()).max(0.0)
    }

    /// What the pool reports when `units` units serve `demand`.
    pub fn snapshot(&self, demand: f64, units: u32) -> MetricsSnapshot {
        let capacity = f64::from(units.max(1)) * self.profile.unit_capacity;
        let load = demand / capacity;
        let overload = (load - 1.0).max(0.0);
        let utilization = load.min(1.0);

        MetricsSnapshot {
            timestamp: epoch_millis(),
            total_requests: demand.round() as u64,
            active_worker_count: units,
            utilization,
            memory_utilization: (0.2 + 0.6 * utilization).min(1.0),
            power_utilization: (0.1 + 0.8 * utilization).min(1.0),
            average_latency_ms: BASE_LATENCY_MS * (1.0 + 0.5 * utilization + 10.0 * overload),
            queue_length: ((demand - capacity).max(0.0) / 6.0).round() as u64,
            throughput_per_minute: demand.min(capacity),
        }
    }
}

/// Push a fresh load template for every tenant each `tick` until shutdown.
pub async fn drive_load(
    resources: InMemoryResourceManager,
    tenants: Vec<SimulatedTenant>,
    tick: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let started = Instant::now();
    info!(tenants = tenants.len(), tick = ?tick, "load driver started");

    loop {
        let elapsed = started.elapsed();
        for tenant in &tenants {
            let units = resources.worker_count(&tenant.id) as u32;
            let demand = tenant.demand(elapsed);
            let snapshot = tenant.snapshot(demand, units);
            debug!(
                tenant = %tenant.id,
                demand = demand.round(),
                units,
                utilization = snapshot.utilization,
                "load updated"
            );
            resources.set_load(&tenant.id, snapshot);
        }

        tokio::select! {
            _ = tokio::time::sleep(tick) => {}
            _ = shutdown.changed() => break,
        }
    }

    debug!("load driver stopped");
}
