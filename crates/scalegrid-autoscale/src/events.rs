//! Controller events and the broadcast bus that carries them.
//!
//! Publishing never blocks: with no subscribers the event is dropped, and
//! a subscriber that falls behind skips the oldest events
//! (`RecvError::Lagged`) instead of stalling the controller.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use scalegrid_core::{MetricsSnapshot, ScalingConfig, ScalingDecision, TenantId, WorkerId};

/// Default per-controller event buffer.
pub const EVENT_BUFFER: usize = 256;

/// Something observable happened in a tenant's controller.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ControllerEvent {
    Started {
        tenant: TenantId,
        config: ScalingConfig,
    },
    Stopped {
        tenant: TenantId,
    },
    Evaluation {
        tenant: TenantId,
        snapshot: MetricsSnapshot,
        decision: ScalingDecision,
    },
    Scaled {
        tenant: TenantId,
        decision: ScalingDecision,
        new_unit_count: u32,
        worker_id: WorkerId,
    },
    ConfigUpdated {
        tenant: TenantId,
        config: ScalingConfig,
    },
    Error {
        tenant: TenantId,
        cause: String,
    },
}

impl ControllerEvent {
    pub fn tenant(&self) -> &str {
        match self {
            ControllerEvent::Started { tenant, .. }
            | ControllerEvent::Stopped { tenant }
            | ControllerEvent::Evaluation { tenant, .. }
            | ControllerEvent::Scaled { tenant, .. }
            | ControllerEvent::ConfigUpdated { tenant, .. }
            | ControllerEvent::Error { tenant, .. } => tenant.as_str(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ControllerEvent::Started { .. } => "started",
            ControllerEvent::Stopped { .. } => "stopped",
            ControllerEvent::Evaluation { .. } => "evaluation",
            ControllerEvent::Scaled { .. } => "scaled",
            ControllerEvent::ConfigUpdated { .. } => "config_updated",
            ControllerEvent::Error { .. } => "error",
        }
    }
}

/// Fan-out channel for one controller's events.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ControllerEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish without waiting on subscribers.
    pub fn publish(&self, event: ControllerEvent) {
        // Err only means nobody is listening.
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ControllerEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(EVENT_BUFFER)
    }
}
