//! Resource manager interface: the controller's only window onto the
//! physical pool.
//!
//! The controller never touches GPUs directly: it pulls snapshots and
//! workloads and asks for units to be added or released through
//! [`ResourceManager`]. [`InMemoryResourceManager`] is a scriptable
//! implementation used by tests and by the daemon's simulated mode.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tracing::debug;

use crate::error::{ResourceError, ResourceResult};
use crate::types::{MetricsSnapshot, Priority, TenantId, WorkerId, WorkerWorkload, epoch_millis};

/// Boxed future returned by every `ResourceManager` call.
pub type ResourceFuture<'a, T> = Pin<Box<dyn Future<Output = ResourceResult<T>> + Send + 'a>>;

/// External collaborator that measures and allocates compute units.
///
/// Every call may block on I/O; callers bound them with a timeout.
pub trait ResourceManager: Send + Sync {
    /// Aggregate metrics for the tenant's pool right now.
    fn cluster_snapshot<'a>(&'a self, tenant_id: &'a str) -> ResourceFuture<'a, MetricsSnapshot>;

    /// Per-worker workload records for the tenant.
    fn worker_workloads<'a>(
        &'a self,
        tenant_id: &'a str,
    ) -> ResourceFuture<'a, HashMap<WorkerId, WorkerWorkload>>;

    /// Provision one more unit; returns its id.
    fn allocate_unit<'a>(&'a self, tenant_id: &'a str) -> ResourceFuture<'a, WorkerId>;

    /// Release a specific unit.
    fn deallocate_unit<'a>(
        &'a self,
        tenant_id: &'a str,
        worker_id: &'a str,
    ) -> ResourceFuture<'a, ()>;
}

/// Per-tenant state inside the in-memory manager.
#[derive(Default)]
struct TenantPool {
    workers: BTreeMap<WorkerId, WorkerWorkload>,
    next_index: u64,
    /// Template served when no scripted snapshot is queued.
    load: Option<MetricsSnapshot>,
    scripted: VecDeque<ResourceResult<MetricsSnapshot>>,
    /// Number of upcoming allocate/deallocate calls to reject.
    failing_allocations: u32,
    latency: Duration,
    allocations: u64,
    deallocations: u64,
}

impl TenantPool {
    fn mint_worker(&mut self, tenant_id: &str, priority: Priority) -> WorkerId {
        self.next_index += 1;
        let id = format!("{tenant_id}-w{}", self.next_index);
        self.workers
            .insert(id.clone(), WorkerWorkload::idle(id.clone(), priority));
        id
    }

    fn next_snapshot(&mut self) -> ResourceResult<MetricsSnapshot> {
        let active = self.workers.len() as u32;
        let mut snapshot = match self.scripted.pop_front() {
            Some(scripted) => scripted?,
            None => self
                .load
                .clone()
                .unwrap_or_else(|| MetricsSnapshot::idle(active)),
        };
        snapshot.active_worker_count = active;
        snapshot.timestamp = epoch_millis();
        Ok(snapshot)
    }

    fn take_allocation_failure(&mut self) -> bool {
        if self.failing_allocations > 0 {
            self.failing_allocations -= 1;
            true
        } else {
            false
        }
    }
}

/// In-process `ResourceManager` with an explicit, scriptable worker set
/// per tenant.
///
/// Cloning shares the underlying pools.
#[derive(Clone, Default)]
pub struct InMemoryResourceManager {
    pools: Arc<Mutex<HashMap<TenantId, TenantPool>>>,
}

impl InMemoryResourceManager {
    pub fn new() -> Self {
        Self::default()
    }

    fn pools(&self) -> MutexGuard<'_, HashMap<TenantId, TenantPool>> {
        self.pools.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn with_pool<T>(&self, tenant_id: &str, f: impl FnOnce(&mut TenantPool) -> T) -> T {
        let mut pools = self.pools();
        f(pools.entry(tenant_id.to_string()).or_default())
    }

    /// Add `count` idle workers of the given priority.
    pub fn provision(&self, tenant_id: &str, count: u32, priority: Priority) -> Vec<WorkerId> {
        self.with_pool(tenant_id, |pool| {
            (0..count)
                .map(|_| pool.mint_worker(tenant_id, priority))
                .collect()
        })
    }

    /// Insert or replace a worker's workload record.
    pub fn set_workload(&self, tenant_id: &str, workload: WorkerWorkload) {
        self.with_pool(tenant_id, |pool| {
            pool.workers.insert(workload.worker_id.clone(), workload);
        });
    }

    /// Serve this snapshot (re-stamped, with the live worker count) until
    /// replaced. Also spreads the load evenly across current workers.
    pub fn set_load(&self, tenant_id: &str, snapshot: MetricsSnapshot) {
        self.with_pool(tenant_id, |pool| {
            let n = pool.workers.len().max(1) as u64;
            for w in pool.workers.values_mut() {
                w.current_requests = snapshot.total_requests / n;
                w.utilization = snapshot.utilization;
                w.average_latency_ms = snapshot.average_latency_ms;
                w.predicted_load = snapshot.utilization;
            }
            pool.load = Some(snapshot);
        });
    }

    /// Queue a one-shot snapshot, served before the load template.
    pub fn push_snapshot(&self, tenant_id: &str, snapshot: MetricsSnapshot) {
        self.with_pool(tenant_id, |pool| pool.scripted.push_back(Ok(snapshot)));
    }

    /// Queue a one-shot snapshot failure.
    pub fn push_snapshot_failure(&self, tenant_id: &str, cause: &str) {
        self.with_pool(tenant_id, |pool| {
            pool.scripted
                .push_back(Err(ResourceError::Unavailable(cause.to_string())))
        });
    }

    /// Reject the next `count` allocate/deallocate calls.
    pub fn fail_next_allocations(&self, tenant_id: &str, count: u32) {
        self.with_pool(tenant_id, |pool| pool.failing_allocations = count);
    }

    /// Delay every call for this tenant.
    pub fn set_latency(&self, tenant_id: &str, latency: Duration) {
        self.with_pool(tenant_id, |pool| pool.latency = latency);
    }

    pub fn worker_ids(&self, tenant_id: &str) -> Vec<WorkerId> {
        self.with_pool(tenant_id, |pool| pool.workers.keys().cloned().collect())
    }

    pub fn worker_count(&self, tenant_id: &str) -> usize {
        self.with_pool(tenant_id, |pool| pool.workers.len())
    }

    /// Successful allocations so far.
    pub fn allocation_count(&self, tenant_id: &str) -> u64 {
        self.with_pool(tenant_id, |pool| pool.allocations)
    }

    /// Successful deallocations so far.
    pub fn deallocation_count(&self, tenant_id: &str) -> u64 {
        self.with_pool(tenant_id, |pool| pool.deallocations)
    }

    async fn simulate_latency(&self, tenant_id: &str) {
        let latency = self.with_pool(tenant_id, |pool| pool.latency);
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
    }
}

impl ResourceManager for InMemoryResourceManager {
    fn cluster_snapshot<'a>(&'a self, tenant_id: &'a str) -> ResourceFuture<'a, MetricsSnapshot> {
        Box::pin(async move {
            self.simulate_latency(tenant_id).await;
            self.with_pool(tenant_id, TenantPool::next_snapshot)
        })
    }

    fn worker_workloads<'a>(
        &'a self,
        tenant_id: &'a str,
    ) -> ResourceFuture<'a, HashMap<WorkerId, WorkerWorkload>> {
        Box::pin(async move {
            self.simulate_latency(tenant_id).await;
            Ok(self.with_pool(tenant_id, |pool| {
                pool.workers
                    .iter()
                    .map(|(id, w)| (id.clone(), w.clone()))
                    .collect()
            }))
        })
    }

    fn allocate_unit<'a>(&'a self, tenant_id: &'a str) -> ResourceFuture<'a, WorkerId> {
        Box::pin(async move {
            self.simulate_latency(tenant_id).await;
            self.with_pool(tenant_id, |pool| {
                if pool.take_allocation_failure() {
                    return Err(ResourceError::Rejected("no capacity".to_string()));
                }
                pool.allocations += 1;
                let id = pool.mint_worker(tenant_id, Priority::Medium);
                debug!(tenant = %tenant_id, worker = %id, "unit allocated");
                Ok(id)
            })
        })
    }

    fn deallocate_unit<'a>(
        &'a self,
        tenant_id: &'a str,
        worker_id: &'a str,
    ) -> ResourceFuture<'a, ()> {
        Box::pin(async move {
            self.simulate_latency(tenant_id).await;
            self.with_pool(tenant_id, |pool| {
                if pool.take_allocation_failure() {
                    return Err(ResourceError::Rejected("release refused".to_string()));
                }
                if pool.workers.remove(worker_id).is_none() {
                    return Err(ResourceError::UnknownWorker(worker_id.to_string()));
                }
                pool.deallocations += 1;
                debug!(tenant = %tenant_id, worker = %worker_id, "unit released");
                Ok(())
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn provision_and_allocate_mint_unique_ids() {
        let rm = InMemoryResourceManager::new();
        let ids = rm.provision("acme", 2, Priority::Low);
        assert_eq!(ids, vec!["acme-w1".to_string(), "acme-w2".to_string()]);

        let id = rm.allocate_unit("acme").await.unwrap();
        assert_eq!(id, "acme-w3");
        assert_eq!(rm.worker_count("acme"), 3);
        assert_eq!(rm.allocation_count("acme"), 1);
    }

    #[tokio::test]
    async fn snapshot_reflects_live_worker_count() {
        let rm = InMemoryResourceManager::new();
        rm.provision("acme", 3, Priority::Medium);
        rm.set_load(
            "acme",
            MetricsSnapshot {
                utilization: 0.9,
                ..MetricsSnapshot::idle(0)
            },
        );

        let snap = rm.cluster_snapshot("acme").await.unwrap();
        assert_eq!(snap.active_worker_count, 3);
        assert_eq!(snap.utilization, 0.9);
        assert!(snap.timestamp > 0);
    }

    #[tokio::test]
    async fn scripted_snapshots_come_first() {
        let rm = InMemoryResourceManager::new();
        rm.push_snapshot_failure("acme", "metrics agent down");
        rm.push_snapshot(
            "acme",
            MetricsSnapshot {
                utilization: 0.4,
                ..MetricsSnapshot::idle(0)
            },
        );

        assert!(matches!(
            rm.cluster_snapshot("acme").await,
            Err(ResourceError::Unavailable(_))
        ));
        assert_eq!(rm.cluster_snapshot("acme").await.unwrap().utilization, 0.4);
        // Falls back to idle once the script is drained.
        assert_eq!(rm.cluster_snapshot("acme").await.unwrap().utilization, 0.0);
    }

    #[tokio::test]
    async fn injected_allocation_failures_are_consumed() {
        let rm = InMemoryResourceManager::new();
        rm.fail_next_allocations("acme", 1);

        assert!(matches!(
            rm.allocate_unit("acme").await,
            Err(ResourceError::Rejected(_))
        ));
        assert!(rm.allocate_unit("acme").await.is_ok());
        assert_eq!(rm.allocation_count("acme"), 1);
    }

    #[tokio::test]
    async fn deallocate_unknown_worker_fails() {
        let rm = InMemoryResourceManager::new();
        assert_eq!(
            rm.deallocate_unit("acme", "ghost").await,
            Err(ResourceError::UnknownWorker("ghost".to_string()))
        );
    }

    #[tokio::test]
    async fn tenants_are_isolated() {
        let rm = InMemoryResourceManager::new();
        rm.provision("acme", 2, Priority::Medium);
        rm.provision("globex", 1, Priority::Medium);

        let id = rm.worker_ids("acme")[0].clone();
        rm.deallocate_unit("acme", &id).await.unwrap();

        assert_eq!(rm.worker_count("acme"), 1);
        assert_eq!(rm.worker_count("globex"), 1);
        assert!(rm.deallocate_unit("globex", &id).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn latency_delays_calls() {
        let rm = InMemoryResourceManager::new();
        rm.set_latency("acme", Duration::from_secs(3));

        let start = tokio::time::Instant::now();
        rm.worker_workloads("acme").await.unwrap();
        assert!(start.elapsed() >= Duration::from_secs(3));
    }
}
