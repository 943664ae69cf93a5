//! Error types for configuration and the resource manager interface.

use thiserror::Error;

/// Result type alias for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// A scaling configuration was rejected.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ConfigError {
    #[error("invalid unit bounds: min_units={min} max_units={max} (need 0 < min <= max)")]
    InvalidBounds { min: u32, max: u32 },

    #[error(
        "invalid thresholds: need 0 <= scale_down ({down}) < target ({target}) < scale_up ({up}) <= 1"
    )]
    InvalidThreshold { down: f64, target: f64, up: f64 },

    #[error("invalid duration for {field}: {value}")]
    InvalidDuration { field: &'static str, value: String },

    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },

    #[error("failed to parse config: {0}")]
    Parse(String),

    #[error("failed to read config: {0}")]
    Io(String),
}

/// Result type alias for resource manager calls.
pub type ResourceResult<T> = Result<T, ResourceError>;

/// Errors reported by a `ResourceManager` implementation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ResourceError {
    #[error("resource manager unavailable: {0}")]
    Unavailable(String),

    #[error("allocation rejected: {0}")]
    Rejected(String),

    #[error("unknown worker: {0}")]
    UnknownWorker(String),
}
