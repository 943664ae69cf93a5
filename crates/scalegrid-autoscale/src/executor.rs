//! Scaling executor: turns an accepted decision into allocator calls.
//!
//! The allocator call runs without holding the state lock; only the
//! commit (new count, cooldown clock, history) takes the write lock, so
//! status readers are never blocked behind external I/O.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tracing::{info, warn};

use scalegrid_core::{
    ResourceManager, ScaleAction, ScalingDecision, TenantId, WorkerId, WorkerWorkload,
};

use crate::error::{ScaleError, ScaleResult};
use crate::events::{ControllerEvent, EventBus};
use crate::state::ControllerState;

/// Result of a successfully applied decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedScaling {
    pub action: ScaleAction,
    /// The unit that was added or released.
    pub worker_id: WorkerId,
    pub new_unit_count: u32,
}

/// Pick the unit to release on scale-down.
///
/// Lowest priority first, so a critical unit is only chosen when every
/// remaining unit is critical; ties go to the fewest in-flight requests,
/// then to the smallest worker id.
pub fn select_release_candidate(workloads: &[WorkerWorkload]) -> Option<&WorkerWorkload> {
    workloads
        .iter()
        .min_by(|a, b| {
            a.priority
                .cmp(&b.priority)
                .then(a.current_requests.cmp(&b.current_requests))
                .then_with(|| a.worker_id.cmp(&b.worker_id))
        })
}

/// Applies decisions for one tenant through the resource manager.
pub struct ScalingExecutor {
    tenant_id: TenantId,
    resources: Arc<dyn ResourceManager>,
    events: EventBus,
}

impl ScalingExecutor {
    pub fn new(tenant_id: TenantId, resources: Arc<dyn ResourceManager>, events: EventBus) -> Self {
        Self {
            tenant_id,
            resources,
            events,
        }
    }

    /// Apply a decision.
    ///
    /// `Hold` makes no allocator call and returns `Ok(None)`. On success
    /// the new count and cooldown clock are committed and a `Scaled`
    /// event is published. On failure the failure is recorded, an `Error`
    /// event is published, and count and cooldown clock are left alone.
    pub async fn apply(
        &self,
        decision: &ScalingDecision,
        workloads: &[WorkerWorkload],
        state: &RwLock<ControllerState>,
        timeout: Duration,
    ) -> ScaleResult<Option<AppliedScaling>> {
        let result = match decision.action {
            ScaleAction::Hold => return Ok(None),
            ScaleAction::ScaleUp => self.allocate(timeout).await,
            ScaleAction::ScaleDown => self.release(workloads, timeout).await,
        };

        match result {
            Ok(worker_id) => {
                let at = tokio::time::Instant::now().into_std();
                state
                    .write()
                    .await
                    .record_applied(decision.clone(), worker_id.clone(), at);

                info!(
                    tenant = %self.tenant_id,
                    action = %decision.action,
                    worker = %worker_id,
                    units = decision.target_unit_count,
                    reason = %decision.reason,
                    "scaling action applied"
                );
                self.events.publish(ControllerEvent::Scaled {
                    tenant: self.tenant_id.clone(),
                    decision: decision.clone(),
                    new_unit_count: decision.target_unit_count,
                    worker_id: worker_id.clone(),
                });

                Ok(Some(AppliedScaling {
                    action: decision.action,
                    worker_id,
                    new_unit_count: decision.target_unit_count,
                }))
            }
            Err(e) => {
                let cause = e.to_string();
                state
                    .write()
                    .await
                    .record_failed(decision.clone(), cause.clone());

                warn!(
                    tenant = %self.tenant_id,
                    action = %decision.action,
                    error = %cause,
                    "scaling action failed"
                );
                self.events.publish(ControllerEvent::Error {
                    tenant: self.tenant_id.clone(),
                    cause,
                });
                Err(e)
            }
        }
    }

    async fn allocate(&self, timeout: Duration) -> ScaleResult<WorkerId> {
        tokio::time::timeout(timeout, self.resources.allocate_unit(&self.tenant_id))
            .await
            .map_err(|_| ScaleError::Allocation(format!("allocate timed out after {timeout:?}")))?
            .map_err(|e| ScaleError::Allocation(e.to_string()))
    }

    async fn release(
        &self,
        workloads: &[WorkerWorkload],
        timeout: Duration,
    ) -> ScaleResult<WorkerId> {
        let candidate = select_release_candidate(workloads)
            .ok_or_else(|| ScaleError::Allocation("no releasable worker".to_string()))?;
        let worker_id = candidate.worker_id.clone();

        tokio::time::timeout(
            timeout,
            self.resources.deallocate_unit(&self.tenant_id, &worker_id),
        )
        .await
        .map_err(|_| ScaleError::Allocation(format!("release timed out after {timeout:?}")))?
        .map_err(|e| ScaleError::Allocation(e.to_string()))?;

        Ok(worker_id)
    }
}
