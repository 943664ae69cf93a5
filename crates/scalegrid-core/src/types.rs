//! Domain types shared across ScaleGrid crates.
//!
//! Snapshots, workloads, and decisions are plain values: created once,
//! cloned freely, never mutated after they leave the producer.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::config::ScalingConfig;

/// Isolation boundary: one controller per tenant.
pub type TenantId = String;

/// Identifier of one allocatable compute unit.
pub type WorkerId = String;

// ── Metrics ───────────────────────────────────────────────────────

/// Point-in-time view of a tenant's worker pool.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetricsSnapshot {
    /// Unix timestamp in milliseconds.
    pub timestamp: u64,
    pub total_requests: u64,
    pub active_worker_count: u32,
    /// Aggregate compute utilization (0.0–1.0).
    pub utilization: f64,
    /// Aggregate memory utilization (0.0–1.0).
    pub memory_utilization: f64,
    /// Power draw relative to the power budget (0.0–1.0).
    pub power_utilization: f64,
    pub average_latency_ms: f64,
    pub queue_length: u64,
    pub throughput_per_minute: f64,
}

impl MetricsSnapshot {
    /// An idle snapshot stamped with the current time.
    pub fn idle(active_worker_count: u32) -> Self {
        Self {
            timestamp: epoch_millis(),
            total_requests: 0,
            active_worker_count,
            utilization: 0.0,
            memory_utilization: 0.0,
            power_utilization: 0.0,
            average_latency_ms: 0.0,
            queue_length: 0,
            throughput_per_minute: 0.0,
        }
    }
}

// ── Workloads ─────────────────────────────────────────────────────

/// Priority class of the work a unit is serving.
///
/// Ordered `Low < Medium < High < Critical`; scale-down releases the
/// lowest-priority unit first.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

impl Priority {
    pub const ALL: [Priority; 4] = [
        Priority::Low,
        Priority::Medium,
        Priority::High,
        Priority::Critical,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
            Priority::Critical => "critical",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Live workload record for one worker.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkerWorkload {
    pub worker_id: WorkerId,
    pub current_requests: u64,
    pub average_latency_ms: f64,
    /// Per-worker utilization (0.0–1.0).
    pub utilization: f64,
    /// Memory in use, bytes.
    pub memory_usage: u64,
    pub priority: Priority,
    /// Forecast utilization for the next interval (0.0–1.0).
    pub predicted_load: f64,
}

impl WorkerWorkload {
    /// A freshly provisioned, idle worker.
    pub fn idle(worker_id: impl Into<WorkerId>, priority: Priority) -> Self {
        Self {
            worker_id: worker_id.into(),
            current_requests: 0,
            average_latency_ms: 0.0,
            utilization: 0.0,
            memory_usage: 0,
            priority,
            predicted_load: 0.0,
        }
    }
}

// ── Decisions ─────────────────────────────────────────────────────

/// Direction of a scaling decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScaleAction {
    ScaleUp,
    ScaleDown,
    Hold,
}

impl fmt::Display for ScaleAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ScaleAction::ScaleUp => "scale_up",
            ScaleAction::ScaleDown => "scale_down",
            ScaleAction::Hold => "hold",
        })
    }
}

/// Output of one evaluation: what to do and why.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScalingDecision {
    pub action: ScaleAction,
    pub target_unit_count: u32,
    pub reason: String,
}

impl ScalingDecision {
    pub fn hold(current_unit_count: u32, reason: impl Into<String>) -> Self {
        Self {
            action: ScaleAction::Hold,
            target_unit_count: current_unit_count,
            reason: reason.into(),
        }
    }

    pub fn is_hold(&self) -> bool {
        self.action == ScaleAction::Hold
    }
}

/// What happened to a decision once the controller acted on it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DecisionOutcome {
    Held,
    Applied { worker_id: WorkerId },
    Failed { cause: String },
}

/// One entry of a controller's decision history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DecisionRecord {
    /// Unix timestamp in milliseconds.
    pub timestamp: u64,
    pub decision: ScalingDecision,
    pub outcome: DecisionOutcome,
}

// ── Status ────────────────────────────────────────────────────────

/// Read-only view of a controller, as returned by status queries.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ControllerStatus {
    pub tenant_id: TenantId,
    pub is_running: bool,
    pub current_unit_count: u32,
    /// Unix timestamp in milliseconds of the last accepted scaling action.
    pub last_scaling_action_at: Option<u64>,
    pub config: ScalingConfig,
}

/// Current wall-clock time as unix milliseconds.
pub fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
