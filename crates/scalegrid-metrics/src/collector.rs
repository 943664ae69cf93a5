//! Snapshot collector: time-bounded pulls from the resource manager.
//!
//! Every call is wrapped in `tokio::time::timeout` so a hung collaborator
//! costs one failed cycle instead of a stalled controller. Snapshots are
//! sanitized before they reach the decision engine.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use scalegrid_core::{MetricsSnapshot, ResourceManager, WorkerId, WorkerWorkload, epoch_millis};

use crate::error::{MetricsError, MetricsResult};

/// Pulls snapshots and workloads for one or more tenants.
#[derive(Clone)]
pub struct SnapshotCollector {
    resources: Arc<dyn ResourceManager>,
}

impl SnapshotCollector {
    pub fn new(resources: Arc<dyn ResourceManager>) -> Self {
        Self { resources }
    }

    /// Pull and sanitize a snapshot for the tenant.
    pub async fn collect(
        &self,
        tenant_id: &str,
        timeout: Duration,
    ) -> MetricsResult<MetricsSnapshot> {
        let raw = tokio::time::timeout(timeout, self.resources.cluster_snapshot(tenant_id))
            .await
            .map_err(|_| MetricsError::Timeout(timeout))??;

        let (snapshot, corrected) = sanitize(raw);
        if !corrected.is_empty() {
            warn!(
                tenant = %tenant_id,
                fields = ?corrected,
                "resource manager reported out-of-range metrics"
            );
        }
        debug!(
            tenant = %tenant_id,
            utilization = snapshot.utilization,
            latency_ms = snapshot.average_latency_ms,
            queue = snapshot.queue_length,
            workers = snapshot.active_worker_count,
            "snapshot collected"
        );
        Ok(snapshot)
    }

    /// Pull the per-worker workload map for the tenant.
    pub async fn workloads(
        &self,
        tenant_id: &str,
        timeout: Duration,
    ) -> MetricsResult<HashMap<WorkerId, WorkerWorkload>> {
        let workloads = tokio::time::timeout(timeout, self.resources.worker_workloads(tenant_id))
            .await
            .map_err(|_| MetricsError::Timeout(timeout))??;
        Ok(workloads)
    }
}

/// Clamp ratios into [0, 1], zero out NaN and negative readings, and stamp
/// a missing timestamp. An infinite reading saturates rather than resets,
/// so unbounded latency still reads as pressure. Returns the names of
/// corrected fields.
fn sanitize(mut s: MetricsSnapshot) -> (MetricsSnapshot, Vec<&'static str>) {
    let mut corrected = Vec::new();

    for (name, value) in [
        ("utilization", &mut s.utilization),
        ("memory_utilization", &mut s.memory_utilization),
        ("power_utilization", &mut s.power_utilization),
    ] {
        let fixed = if value.is_nan() {
            0.0
        } else {
            value.clamp(0.0, 1.0)
        };
        if fixed != *value {
            *value = fixed;
            corrected.push(name);
        }
    }

    for (name, value) in [
        ("average_latency_ms", &mut s.average_latency_ms),
        ("throughput_per_minute", &mut s.throughput_per_minute),
    ] {
        let fixed = if value.is_nan() || *value < 0.0 {
            0.0
        } else {
            value.min(f64::MAX)
        };
        if fixed != *value {
            *value = fixed;
            corrected.push(name);
        }
    }

    if s.timestamp == 0 {
        s.timestamp = epoch_millis();
        corrected.push("timestamp");
    }

    (s, corrected)
}
