//! scalegrid-metrics: observation side of the ScaleGrid controller.
//!
//! Pulls point-in-time snapshots and per-worker workloads from the
//! resource manager, keeps bounded in-memory histories, and renders
//! controller state in the Prometheus text format.
//!
//! # Architecture
//!
//! ```text
//! SnapshotCollector
//!   ├── collect()   → MetricsSnapshot (time-bounded, sanitized)
//!   └── workloads() → worker_id → WorkerWorkload
//!
//! WorkloadTracker   ← replace_all() once per cycle
//! BoundedHistory<T> ← FIFO ring buffer, oldest evicted first
//!
//! Prometheus exposition
//!   └── render_prometheus() → text/plain
//! ```

pub mod collector;
pub mod error;
pub mod history;
pub mod prometheus;
pub mod tracker;

pub use collector::SnapshotCollector;
pub use error::{MetricsError, MetricsResult};
pub use history::BoundedHistory;
pub use prometheus::{TenantReport, render_prometheus};
pub use tracker::{TrackerDelta, WorkloadSummary, WorkloadTracker};
