//! Controller loop: one background task per tenant.
//!
//! The loop sleeps until the next tick, runs one evaluation cycle
//! (collect → refresh workloads → decide → apply → record → publish), and
//! reschedules itself `evaluation_interval` after the cycle finished.
//! Cycles for one tenant never overlap: timer-driven and forced cycles
//! both take the same cycle lock.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, Weak};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock, broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use scalegrid_core::{
    ControllerStatus, DecisionRecord, MAX_DURATION, MetricsSnapshot, Priority, ResourceManager,
    ScaleAction, ScalingConfig, ScalingConfigPatch, ScalingDecision, TenantId, WorkerId,
    WorkerWorkload,
};
use scalegrid_metrics::{SnapshotCollector, TenantReport, WorkloadSummary, WorkloadTracker};

use crate::engine::decide;
use crate::error::ScaleResult;
use crate::events::{ControllerEvent, EventBus};
use crate::executor::ScalingExecutor;
use crate::state::ControllerState;

/// Lifecycle of a controller loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopPhase {
    Stopped,
    Starting,
    Running,
    Stopping,
}

/// Background task plus its shutdown signal.
struct LoopSlot {
    handle: JoinHandle<()>,
    shutdown_tx: watch::Sender<bool>,
}

struct Shared {
    tenant_id: TenantId,
    /// Swapped whole on update so a cycle never sees a half-applied config.
    config: std::sync::RwLock<Arc<ScalingConfig>>,
    state: RwLock<ControllerState>,
    tracker: RwLock<WorkloadTracker>,
    /// Held for the whole of a cycle.
    cycle: Mutex<()>,
    completed_cycles: AtomicU64,
    lifecycle: Mutex<Option<LoopSlot>>,
    phase: watch::Sender<LoopPhase>,
    /// Set once the registry has discarded this controller.
    retired: AtomicBool,
    collector: SnapshotCollector,
    executor: ScalingExecutor,
    events: EventBus,
}

/// Handle to one tenant's controller. Clones share the same controller.
#[derive(Clone)]
pub struct Controller {
    shared: Arc<Shared>,
}

impl fmt::Debug for Controller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Controller")
            .field("tenant_id", &self.shared.tenant_id)
            .field("phase", &self.phase())
            .finish_non_exhaustive()
    }
}

impl Controller {
    /// Build a stopped controller. The unit count starts at `min_units`
    /// and is synced from the live worker set on `start`.
    pub fn new(
        tenant_id: impl Into<TenantId>,
        config: ScalingConfig,
        resources: Arc<dyn ResourceManager>,
    ) -> ScaleResult<Self> {
        config.validate()?;
        let tenant_id = tenant_id.into();
        let events = EventBus::default();
        let (phase, _) = watch::channel(LoopPhase::Stopped);

        let shared = Shared {
            state: RwLock::new(ControllerState::new(
                config.min_units,
                config.history_capacity,
            )),
            tracker: RwLock::new(WorkloadTracker::new()),
            cycle: Mutex::new(()),
            completed_cycles: AtomicU64::new(0),
            lifecycle: Mutex::new(None),
            phase,
            retired: AtomicBool::new(false),
            collector: SnapshotCollector::new(Arc::clone(&resources)),
            executor: ScalingExecutor::new(tenant_id.clone(), resources, events.clone()),
            events,
            config: std::sync::RwLock::new(Arc::new(config)),
            tenant_id,
        };
        Ok(Self {
            shared: Arc::new(shared),
        })
    }

    pub fn tenant_id(&self) -> &str {
        &self.shared.tenant_id
    }

    /// Start the loop. No-op if it is already running or the controller
    /// has been removed from its registry.
    pub async fn start(&self) {
        let mut slot = self.shared.lifecycle.lock().await;
        if self.is_retired() {
            warn!(tenant = %self.shared.tenant_id, "start refused, controller was removed");
            return;
        }
        if let Some(running) = slot.as_ref()
            && !running.handle.is_finished()
        {
            debug!(tenant = %self.shared.tenant_id, "controller already running");
            return;
        }

        self.shared.phase.send_replace(LoopPhase::Starting);
        self.shared.sync_workers().await;

        let config = self.shared.config();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(run_loop(
            Arc::downgrade(&self.shared),
            shutdown_rx,
            config.evaluation_interval,
        ));
        *slot = Some(LoopSlot {
            handle,
            shutdown_tx,
        });
        self.shared.phase.send_replace(LoopPhase::Running);

        info!(
            tenant = %self.shared.tenant_id,
            interval = ?config.evaluation_interval,
            min = config.min_units,
            max = config.max_units,
            "controller started"
        );
        self.shared.events.publish(ControllerEvent::Started {
            tenant: self.shared.tenant_id.clone(),
            config: config.as_ref().clone(),
        });
    }

    /// Stop the loop and wait for the task to exit. No-op if not running.
    ///
    /// An in-flight cycle is allowed to finish; no new cycle starts.
    pub async fn stop(&self) {
        let mut slot = self.shared.lifecycle.lock().await;
        let Some(running) = slot.take() else {
            return;
        };

        self.shared.phase.send_replace(LoopPhase::Stopping);
        let _ = running.shutdown_tx.send(true);
        if let Err(e) = running.handle.await
            && e.is_panic()
        {
            error!(tenant = %self.shared.tenant_id, "controller loop panicked");
        }
        self.shared.phase.send_replace(LoopPhase::Stopped);

        info!(tenant = %self.shared.tenant_id, "controller stopped");
        self.shared.events.publish(ControllerEvent::Stopped {
            tenant: self.shared.tenant_id.clone(),
        });
    }

    /// Run one cycle now, outside the timer cadence.
    ///
    /// Waits for an in-flight cycle; if one completed while waiting, the
    /// request is coalesced into it and `Ok(None)` is returned. Works
    /// whether or not the loop is running.
    pub async fn force_evaluation(&self) -> ScaleResult<Option<ScalingDecision>> {
        let seen = self.shared.completed_cycles.load(Ordering::Acquire);
        self.shared.cycle(Some(seen)).await
    }

    /// Merge a partial config. Invalid results are rejected and the
    /// previous config stays in force. Takes effect from the next cycle.
    pub fn update_config(&self, patch: &ScalingConfigPatch) -> ScaleResult<ScalingConfig> {
        let mut current = self
            .shared
            .config
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let next = match current.apply_patch(patch) {
            Ok(next) => next,
            Err(e) => {
                warn!(tenant = %self.shared.tenant_id, error = %e, "config update rejected");
                return Err(e.into());
            }
        };
        *current = Arc::new(next.clone());
        drop(current);

        info!(
            tenant = %self.shared.tenant_id,
            min = next.min_units,
            max = next.max_units,
            up = next.scale_up_threshold,
            down = next.scale_down_threshold,
            "config updated"
        );
        self.shared.events.publish(ControllerEvent::ConfigUpdated {
            tenant: self.shared.tenant_id.clone(),
            config: next.clone(),
        });
        Ok(next)
    }

    pub fn config(&self) -> ScalingConfig {
        self.shared.config().as_ref().clone()
    }

    pub fn phase(&self) -> LoopPhase {
        *self.shared.phase.borrow()
    }

    /// Whether the loop task is alive. A loop that died without `stop`
    /// reads as not running.
    pub fn is_running(&self) -> bool {
        if self.phase() != LoopPhase::Running {
            return false;
        }
        // A held lock means start or stop is mid-transition.
        match self.shared.lifecycle.try_lock() {
            Ok(slot) => slot.as_ref().is_some_and(|s| !s.handle.is_finished()),
            Err(_) => true,
        }
    }

    pub(crate) fn is_retired(&self) -> bool {
        self.shared.retired.load(Ordering::Acquire)
    }

    /// Stop the loop for good. Later `start` calls on any clone are refused.
    pub(crate) async fn retire(&self) {
        self.shared.retired.store(true, Ordering::Release);
        self.stop().await;
    }

    pub async fn status(&self) -> ControllerStatus {
        let state = self.shared.state.read().await;
        ControllerStatus {
            tenant_id: self.shared.tenant_id.clone(),
            is_running: self.is_running(),
            current_unit_count: state.current_unit_count,
            last_scaling_action_at: state.last_scaling_action_epoch_ms,
            config: self.config(),
        }
    }

    /// Latest snapshot, if any cycle has completed.
    pub async fn current_metrics(&self) -> Option<MetricsSnapshot> {
        self.shared.state.read().await.metrics_history.latest().cloned()
    }

    /// Snapshots, oldest first.
    pub async fn metrics_history(&self) -> Vec<MetricsSnapshot> {
        self.shared.state.read().await.metrics_history.to_vec()
    }

    /// Decisions with their outcomes, oldest first.
    pub async fn decision_history(&self) -> Vec<DecisionRecord> {
        self.shared.state.read().await.decision_history.to_vec()
    }

    pub async fn workloads(&self) -> HashMap<WorkerId, WorkerWorkload> {
        self.shared.tracker.read().await.snapshot()
    }

    pub async fn workload_summary(&self) -> WorkloadSummary {
        self.shared.tracker.read().await.summary()
    }

    /// Status plus latest snapshot, for exposition.
    pub async fn report(&self) -> TenantReport {
        (self.status().await, self.current_metrics().await)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ControllerEvent> {
        self.shared.events.subscribe()
    }
}

impl Shared {
    fn config(&self) -> Arc<ScalingConfig> {
        Arc::clone(&self.config.read().unwrap_or_else(PoisonError::into_inner))
    }

    fn publish_error(&self, cause: String) {
        self.events.publish(ControllerEvent::Error {
            tenant: self.tenant_id.clone(),
            cause,
        });
    }

    /// Load the tenant's known worker set and adopt its size as the
    /// current unit count.
    async fn sync_workers(&self) {
        let _cycle = self.cycle.lock().await;
        let config = self.config();
        match self
            .collector
            .workloads(&self.tenant_id, config.call_timeout)
            .await
        {
            Ok(workers) => {
                let count = workers.len() as u32;
                self.tracker.write().await.replace_all(workers);
                if count > 0 {
                    self.state.write().await.current_unit_count = count;
                }
                debug!(tenant = %self.tenant_id, workers = count, "worker set synced");
            }
            Err(e) => {
                warn!(tenant = %self.tenant_id, error = %e, "failed to load worker set");
                self.publish_error(e.to_string());
            }
        }
    }

    /// Run one cycle under the cycle lock. With `seen`, skip if another
    /// cycle completed since the caller read the counter.
    async fn cycle(&self, seen: Option<u64>) -> ScaleResult<Option<ScalingDecision>> {
        let _cycle = self.cycle.lock().await;
        if let Some(seen) = seen
            && self.completed_cycles.load(Ordering::Acquire) != seen
        {
            debug!(tenant = %self.tenant_id, "forced evaluation coalesced");
            return Ok(None);
        }

        let result = self.evaluate().await;
        self.completed_cycles.fetch_add(1, Ordering::AcqRel);
        result.map(Some)
    }

    async fn evaluate(&self) -> ScaleResult<ScalingDecision> {
        let config = self.config();

        let snapshot = match self
            .collector
            .collect(&self.tenant_id, config.call_timeout)
            .await
        {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(tenant = %self.tenant_id, error = %e, "metrics unavailable, skipping cycle");
                self.publish_error(e.to_string());
                return Err(e.into());
            }
        };

        self.refresh_workloads(&config).await;

        let now = Instant::now().into_std();
        let decision = {
            let mut state = self.state.write().await;
            let decision = decide(
                &snapshot,
                &config,
                state.current_unit_count,
                state.last_scaling_action_at,
                now,
            );
            state.set_history_capacity(config.history_capacity);
            state.metrics_history.push(snapshot.clone());
            if decision.is_hold() {
                state.record_held(decision.clone());
            }
            decision
        };

        debug!(
            tenant = %self.tenant_id,
            action = %decision.action,
            target = decision.target_unit_count,
            reason = %decision.reason,
            "evaluation"
        );
        self.events.publish(ControllerEvent::Evaluation {
            tenant: self.tenant_id.clone(),
            snapshot: snapshot.clone(),
            decision: decision.clone(),
        });

        if decision.is_hold() {
            return Ok(decision);
        }

        if decision.action == ScaleAction::ScaleUp && snapshot.power_utilization >= 1.0 {
            warn!(
                tenant = %self.tenant_id,
                power = snapshot.power_utilization,
                budget_watts = config.power_budget_watts,
                "scaling up over power budget"
            );
        }

        let workloads: Vec<WorkerWorkload> = self.tracker.read().await.iter().cloned().collect();
        let applied = self
            .executor
            .apply(&decision, &workloads, &self.state, config.call_timeout)
            .await?;

        if let Some(applied) = applied {
            let mut tracker = self.tracker.write().await;
            match applied.action {
                ScaleAction::ScaleUp => {
                    tracker.upsert(WorkerWorkload::idle(applied.worker_id, Priority::Medium))
                }
                ScaleAction::ScaleDown => {
                    tracker.remove(&applied.worker_id);
                }
                ScaleAction::Hold => {}
            }
        }

        Ok(decision)
    }

    /// Failures are reported but do not abort the cycle; the tracker keeps
    /// its previous contents.
    async fn refresh_workloads(&self, config: &ScalingConfig) {
        match self
            .collector
            .workloads(&self.tenant_id, config.call_timeout)
            .await
        {
            Ok(workers) => {
                let delta = self.tracker.write().await.replace_all(workers);
                if !delta.is_empty() {
                    debug!(
                        tenant = %self.tenant_id,
                        added = ?delta.added,
                        removed = ?delta.removed,
                        "worker set changed"
                    );
                }
            }
            Err(e) => {
                warn!(tenant = %self.tenant_id, error = %e, "workload refresh failed");
                self.publish_error(e.to_string());
            }
        }
    }
}

/// Deadline `after` from now, clamped so it cannot overflow `Instant`.
fn deadline_after(after: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(after.min(MAX_DURATION)).unwrap_or(now)
}

/// Flips the phase to `Stopped` if the loop task ends without `stop`,
/// including on panic or abort.
struct LoopExitGuard(Weak<Shared>);

impl Drop for LoopExitGuard {
    fn drop(&mut self) {
        let Some(shared) = self.0.upgrade() else {
            return;
        };
        let died = shared.phase.send_if_modified(|phase| {
            if *phase == LoopPhase::Running {
                *phase = LoopPhase::Stopped;
                true
            } else {
                false
            }
        });
        if died {
            error!(tenant = %shared.tenant_id, "controller loop exited unexpectedly");
            shared.publish_error("evaluation loop exited unexpectedly".to_string());
        }
    }
}

/// The evaluation loop for a single tenant.
async fn run_loop(shared: Weak<Shared>, mut shutdown: watch::Receiver<bool>, first: Duration) {
    let _exit = LoopExitGuard(shared.clone());
    let mut next_tick = deadline_after(first);

    loop {
        tokio::select! {
            _ = tokio::time::sleep_until(next_tick) => {}
            _ = shutdown.changed() => break,
        }
        if *shutdown.borrow() {
            break;
        }
        let Some(shared) = shared.upgrade() else {
            break;
        };

        // Errors are logged and published inside the cycle; the loop
        // keeps ticking.
        let _ = shared.cycle(None).await;
        next_tick = deadline_after(shared.config().evaluation_interval);
    }

    debug!("controller loop exited");
}
