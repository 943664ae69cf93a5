//! Decision engine: metrics in, scaling decision out.
//!
//! `decide` is a pure function of the snapshot, the config, the current
//! unit count, and time. It never touches the resource manager and never
//! mutates state; the controller applies whatever it returns.

use std::time::Instant;

use scalegrid_core::{MetricsSnapshot, ScaleAction, ScalingConfig, ScalingDecision};

pub const REASON_COOLDOWN: &str = "cooldown active";
pub const REASON_AT_BOUND: &str = "at bound";
pub const REASON_WITHIN_BAND: &str = "within target band";

/// Latency and queue must sit below this fraction of their thresholds
/// before a scale-down is considered.
const COMFORT_RATIO: f64 = 0.8;

/// Which high-pressure conditions fired for a snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Pressure {
    utilization: bool,
    latency: bool,
    queue: bool,
}

impl Pressure {
    fn assess(snapshot: &MetricsSnapshot, config: &ScalingConfig) -> Self {
        Self {
            utilization: snapshot.utilization >= config.scale_up_threshold,
            latency: snapshot.average_latency_ms >= config.latency_threshold_ms,
            queue: snapshot.queue_length >= config.queue_threshold,
        }
    }

    fn is_high(&self) -> bool {
        self.utilization || self.latency || self.queue
    }

    fn describe(&self, snapshot: &MetricsSnapshot, config: &ScalingConfig) -> String {
        let mut triggers = Vec::new();
        if self.utilization {
            triggers.push(format!(
                "utilization {:.2} >= {:.2}",
                snapshot.utilization, config.scale_up_threshold
            ));
        }
        if self.latency {
            triggers.push(format!(
                "latency {:.0}ms >= {:.0}ms",
                snapshot.average_latency_ms, config.latency_threshold_ms
            ));
        }
        if self.queue {
            triggers.push(format!(
                "queue {} >= {}",
                snapshot.queue_length, config.queue_threshold
            ));
        }
        triggers.join(", ")
    }
}

/// Latency and queue are both well under their thresholds.
fn comfortable(snapshot: &MetricsSnapshot, config: &ScalingConfig) -> bool {
    snapshot.average_latency_ms < config.latency_threshold_ms * COMFORT_RATIO
        && (snapshot.queue_length as f64) < config.queue_threshold as f64 * COMFORT_RATIO
}

/// Evaluate one snapshot and return a scaling decision.
///
/// Moves are single-step (±1 unit). An active cooldown holds regardless
/// of how extreme the snapshot is.
pub fn decide(
    snapshot: &MetricsSnapshot,
    config: &ScalingConfig,
    current_unit_count: u32,
    last_action_at: Option<Instant>,
    now: Instant,
) -> ScalingDecision {
    if let Some(last) = last_action_at
        && now.saturating_duration_since(last) < config.cooldown_period
    {
        return ScalingDecision::hold(current_unit_count, REASON_COOLDOWN);
    }

    // Bounds changed under us (config update): walk back one step at a time.
    if current_unit_count > config.max_units {
        return ScalingDecision {
            action: ScaleAction::ScaleDown,
            target_unit_count: current_unit_count - 1,
            reason: format!(
                "above max bound ({current_unit_count} > {})",
                config.max_units
            ),
        };
    }
    if current_unit_count < config.min_units {
        return ScalingDecision {
            action: ScaleAction::ScaleUp,
            target_unit_count: current_unit_count + 1,
            reason: format!(
                "below min bound ({current_unit_count} < {})",
                config.min_units
            ),
        };
    }

    let pressure = Pressure::assess(snapshot, config);
    if pressure.is_high() {
        if current_unit_count >= config.max_units {
            return ScalingDecision::hold(current_unit_count, REASON_AT_BOUND);
        }
        let mut reason = format!("high pressure: {}", pressure.describe(snapshot, config));
        if snapshot.power_utilization >= 1.0 {
            reason.push_str("; power budget exceeded");
        }
        return ScalingDecision {
            action: ScaleAction::ScaleUp,
            target_unit_count: (current_unit_count + 1).min(config.max_units),
            reason,
        };
    }

    if snapshot.utilization <= config.scale_down_threshold && comfortable(snapshot, config) {
        if current_unit_count <= config.min_units {
            return ScalingDecision::hold(current_unit_count, REASON_AT_BOUND);
        }
        return ScalingDecision {
            action: ScaleAction::ScaleDown,
            target_unit_count: (current_unit_count - 1).max(config.min_units),
            reason: format!(
                "low pressure: utilization {:.2} <= {:.2}",
                snapshot.utilization, config.scale_down_threshold
            ),
        };
    }

    ScalingDecision::hold(current_unit_count, REASON_WITHIN_BAND)
}
