//! scalegrid-core: shared types for the ScaleGrid autoscaler.
//!
//! Holds the domain model consumed by the metrics and autoscale crates
//! (snapshots, worker workloads, scaling decisions), the scaling
//! configuration with its validation rules, and the `ResourceManager`
//! interface through which the controller talks to the GPU allocator.

pub mod config;
pub mod error;
pub mod resource;
pub mod types;

pub use config::{
    DaemonConfig, LoadProfile, MAX_DURATION, ScalingConfig, ScalingConfigPatch, TenantConfig,
    format_duration, parse_duration,
};
pub use error::{ConfigError, ConfigResult, ResourceError, ResourceResult};
pub use resource::{InMemoryResourceManager, ResourceFuture, ResourceManager};
pub use types::*;
