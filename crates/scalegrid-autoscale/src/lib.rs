//! scalegrid-autoscale: per-tenant scaling control loop.
//!
//! Each tenant gets one `Controller` that ticks every
//! `evaluation_interval`, pulls a `MetricsSnapshot`, asks the decision
//! engine what to do, and applies the answer through the resource
//! manager. `ControllerRegistry` owns the tenant → controller map.
//!
//! # Scaling Algorithm
//!
//! ```text
//! if now - last_action < cooldown:
//!     Hold("cooldown active")          // absolute, checked first
//!
//! pressure_high = utilization >= scale_up_threshold
//!              || latency_ms  >= latency_threshold_ms
//!              || queue       >= queue_threshold
//!
//! if pressure_high:
//!     current < max ? ScaleUp(current + 1) : Hold("at bound")
//!
//! if utilization <= scale_down_threshold and latency/queue comfortable:
//!     current > min ? ScaleDown(current - 1) : Hold("at bound")
//!
//! Hold("within target band")
//! ```
//!
//! Cooldown bounds how often the unit count changes; single-step moves
//! bound how far it changes per evaluation.

pub mod controller;
pub mod engine;
pub mod error;
pub mod events;
pub mod executor;
pub mod registry;
pub mod state;

pub use controller::{Controller, LoopPhase};
pub use engine::decide;
pub use error::{ScaleError, ScaleResult};
pub use events::{ControllerEvent, EventBus};
pub use executor::{AppliedScaling, ScalingExecutor, select_release_candidate};
pub use registry::ControllerRegistry;
pub use state::ControllerState;
