//! Metrics collection errors.

use std::time::Duration;

use scalegrid_core::ResourceError;
use thiserror::Error;

/// Result type alias for metrics operations.
pub type MetricsResult<T> = Result<T, MetricsError>;

/// A snapshot or workload pull did not produce data.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum MetricsError {
    #[error("metrics unavailable: {0}")]
    Unavailable(#[from] ResourceError),

    #[error("metrics call timed out after {0:?}")]
    Timeout(Duration),
}
