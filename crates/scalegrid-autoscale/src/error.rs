//! Autoscaler error types.

use thiserror::Error;

use scalegrid_core::{ConfigError, TenantId};
use scalegrid_metrics::MetricsError;

/// Errors surfaced by controllers and the registry.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ScaleError {
    /// Rejected config; the previous config stays in effect.
    #[error("invalid configuration: {0}")]
    Configuration(#[from] ConfigError),

    /// Snapshot pull failed; the cycle was skipped.
    #[error(transparent)]
    MetricsUnavailable(#[from] MetricsError),

    /// The allocator rejected or did not answer a scaling request.
    #[error("allocation failed: {0}")]
    Allocation(String),

    /// The registry resolved a tenant to a controller that was already
    /// removed, so two controller lifetimes overlap. Indicates broken
    /// registry locking.
    #[error("duplicate controller for tenant {0}")]
    DuplicateController(TenantId),
}

pub type ScaleResult<T> = Result<T, ScaleError>;
