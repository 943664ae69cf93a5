//! Per-tenant mutable controller state.
//!
//! Owned by the controller and written only by its evaluation cycle;
//! readers go through the controller's `RwLock` and get copies.

use std::time::Instant;

use scalegrid_core::{
    DecisionOutcome, DecisionRecord, MetricsSnapshot, ScalingDecision, WorkerId, epoch_millis,
};
use scalegrid_metrics::BoundedHistory;

#[derive(Debug, Clone)]
pub struct ControllerState {
    pub current_unit_count: u32,
    /// Monotonic time of the last accepted scaling action (cooldown clock).
    pub last_scaling_action_at: Option<Instant>,
    /// Wall-clock time of the same action, unix milliseconds.
    pub last_scaling_action_epoch_ms: Option<u64>,
    pub metrics_history: BoundedHistory<MetricsSnapshot>,
    pub decision_history: BoundedHistory<DecisionRecord>,
}

impl ControllerState {
    pub fn new(current_unit_count: u32, history_capacity: usize) -> Self {
        Self {
            current_unit_count,
            last_scaling_action_at: None,
            last_scaling_action_epoch_ms: None,
            metrics_history: BoundedHistory::new(history_capacity),
            decision_history: BoundedHistory::new(history_capacity),
        }
    }

    /// Resize both histories, dropping the oldest entries if needed.
    pub fn set_history_capacity(&mut self, capacity: usize) {
        if self.metrics_history.capacity() != capacity {
            self.metrics_history.set_capacity(capacity);
            self.decision_history.set_capacity(capacity);
        }
    }

    pub fn record_held(&mut self, decision: ScalingDecision) {
        self.push_decision(decision, DecisionOutcome::Held);
    }

    /// Commit an accepted action: new unit count, restarted cooldown.
    pub fn record_applied(&mut self, decision: ScalingDecision, worker_id: WorkerId, at: Instant) {
        self.current_unit_count = decision.target_unit_count;
        self.last_scaling_action_at = Some(at);
        self.last_scaling_action_epoch_ms = Some(epoch_millis());
        self.push_decision(decision, DecisionOutcome::Applied { worker_id });
    }

    /// Record a failed action. Unit count and cooldown clock are untouched.
    pub fn record_failed(&mut self, decision: ScalingDecision, cause: String) {
        self.push_decision(decision, DecisionOutcome::Failed { cause });
    }

    fn push_decision(&mut self, decision: ScalingDecision, outcome: DecisionOutcome) {
        self.decision_history.push(DecisionRecord {
            timestamp: epoch_millis(),
            decision,
            outcome,
        });
    }
}
