//! Error types for the risk pipeline.
//!
//! Only configuration can fail. Numeric degeneracy and missing sensor data
//! are recovered in place and logged.

use thiserror::Error;

/// Invalid component configuration, detected at construction.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{field} must be positive, got {value}")]
    NonPositive { field: &'static str, value: f64 },

    #[error("{field} must lie in [{min}, {max}], got {value}")]
    OutOfRange {
        field: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("{lower} ({lower_value}) must not exceed {upper} ({upper_value})")]
    InvalidOrdering {
        lower: &'static str,
        lower_value: f64,
        upper: &'static str,
        upper_value: f64,
    },

    #[error("max_channel_capacity must be at least 1")]
    ZeroCapacity,

    #[error("Config parse error: {0}")]
    Parse(#[from] serde_json::Error),
}

impl ConfigError {
    /// Fails unless `value > 0` (NaN fails too).
    pub fn ensure_positive(field: &'static str, value: f64) -> Result<(), Self> {
        if value > 0.0 && value.is_finite() {
            Ok(())
        } else {
            Err(Self::NonPositive { field, value })
        }
    }

    /// Fails unless `min <= value <= max`.
    pub fn ensure_range(field: &'static str, value: f64, min: f64, max: f64) -> Result<(), Self> {
        if (min..=max).contains(&value) {
            Ok(())
        } else {
            Err(Self::OutOfRange {
                field,
                value,
                min,
                max,
            })
        }
    }
}
