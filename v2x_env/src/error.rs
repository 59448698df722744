//! Error types for the V2X environment abstraction.

use thiserror::Error;

use crate::types::SensorKind;

/// Errors that can occur in the environment abstraction layer.
#[derive(Debug, Error)]
pub enum EnvError {
    /// Opening the device (or its simulation) failed
    #[error("Sensor connection failed: {0}")]
    ConnectionFailed(String),

    /// `read()`/`calibrate()` called before `connect()`
    #[error("Sensor {0} is not connected")]
    NotConnected(String),

    /// The device returned no usable data this tick
    #[error("Sensor read failed: {0}")]
    ReadFailed(String),

    /// Raw device output could not be decoded
    #[error("Parse error: {0}")]
    ParseError(String),

    /// No driver exists for the requested kind/mode combination
    #[error("Unsupported sensor: {0:?}")]
    UnsupportedSensor(SensorKind),

    /// Underlying device I/O failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl EnvError {
    /// Creates a read error.
    pub fn read(msg: impl Into<String>) -> Self {
        Self::ReadFailed(msg.into())
    }

    /// Creates a parse error.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::ParseError(msg.into())
    }
}
