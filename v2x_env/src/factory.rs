//! Driver selection.

use crate::context::V2xContext;
use crate::error::EnvError;
use crate::hardware::{SerialGps, SerialImu, SerialRadar, SerialSettings};
use crate::sensor::SensorDriver;
use crate::simulated::{SimulatedGps, SimulatedImu, SimulatedRadar};
use crate::types::SensorKind;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Per-sensor settings for [`create_sensor`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SensorConfig {
    /// Use the random-walk driver instead of hardware
    /// Default: true
    pub simulation: bool,

    /// Device path of the hardware port (e.g. `/dev/ttyUSB0`)
    pub port: Option<String>,

    /// Serial baud rate
    /// Default: 9600
    pub baud_rate: u32,

    /// Serial read timeout in milliseconds, kept under one 100 ms tick
    /// Default: 50
    pub read_timeout_ms: u64,

    /// Radar maximum range in metres
    /// Default: 200.0
    pub max_range_m: f64,

    /// Start latitude of the simulated GPS walk
    /// Default: 28.6139
    pub start_lat: f64,

    /// Start longitude of the simulated GPS walk
    /// Default: 77.2090
    pub start_lon: f64,
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            simulation: true,
            port: None,
            baud_rate: 9600,
            read_timeout_ms: 50,
            max_range_m: 200.0,
            start_lat: 28.6139,
            start_lon: 77.2090,
        }
    }
}

impl SensorConfig {
    /// Simulation settings with defaults.
    pub fn simulated() -> Self {
        Self::default()
    }

    /// Hardware settings for a device path.
    pub fn hardware(port: impl Into<String>) -> Self {
        Self {
            simulation: false,
            port: Some(port.into()),
            ..Self::default()
        }
    }

    /// Serial line parameters for `port`.
    pub fn serial_settings(&self, port: &str) -> SerialSettings {
        SerialSettings::new(port, self.baud_rate, Duration::from_millis(self.read_timeout_ms))
    }
}

/// Builds the driver for `kind`.
///
/// `rng` seeds the simulated random walk and is ignored for hardware.
/// Hardware drivers stamp readings with `clock` and need `config.port`.
pub fn create_sensor(
    kind: SensorKind,
    config: &SensorConfig,
    rng: StdRng,
    clock: Arc<dyn V2xContext>,
) -> Result<Box<dyn SensorDriver>, EnvError> {
    if config.simulation {
        let driver: Box<dyn SensorDriver> = match kind {
            SensorKind::Gps => Box::new(SimulatedGps::new(rng, config.start_lat, config.start_lon)),
            SensorKind::Imu => Box::new(SimulatedImu::new(rng)),
            SensorKind::Radar => Box::new(SimulatedRadar::new(rng, config.max_range_m)),
        };
        return Ok(driver);
    }

    let port = config.port.as_deref().ok_or(EnvError::UnsupportedSensor(kind))?;
    let settings = config.serial_settings(port);
    let driver: Box<dyn SensorDriver> = match kind {
        SensorKind::Gps => Box::new(SerialGps::new(settings, clock)),
        SensorKind::Imu => Box::new(SerialImu::new(settings, clock)),
        SensorKind::Radar => Box::new(SerialRadar::new(settings, clock, config.max_range_m)),
    };
    Ok(driver)
}
