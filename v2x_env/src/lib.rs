//! V2X Environment Abstraction Layer
//!
//! This crate provides the "Sans-IO" abstraction allowing the V2X risk
//! pipeline to run against **Production** hardware (tokio, serial sensors)
//! and **Simulation** (virtual clock, random-walk sensors) without changes.
//!
//! # Core Concept
//!
//! Everything the pipeline needs from the outside world is intercepted:
//! - Time (`now()`, `sleep()`)
//! - Randomness (`derive_rng()`)
//! - Sensors (`SensorDriver::read()`)
//!
//! In simulation all entropy is derived from a single 64-bit seed, so any
//! bad cycle can be replayed from its seed number.
//!
//! # Example
//!
//! ```ignore
//! use v2x_env::{create_sensor, ManagedSensor, SensorConfig, SensorKind, TokioContext, V2xContext};
//!
//! let ctx = TokioContext::shared();
//! let driver = create_sensor(SensorKind::Gps, &SensorConfig::simulated(), ctx.derive_rng(1), ctx.clone())?;
//! let mut gps = ManagedSensor::new(driver);
//! gps.connect()?;
//!
//! loop {
//!     if let Some(reading) = gps.safe_read() {
//!         handle(reading);
//!     }
//!     ctx.sleep(Duration::from_millis(100)).await;
//! }
//! ```

mod context;
mod error;
mod factory;
mod hardware;
mod sensor;
mod simulated;
mod tokio_impl;
mod types;

pub use context::V2xContext;
pub use error::EnvError;
pub use factory::{create_sensor, SensorConfig};
pub use hardware::{
    parse_distance, parse_gprmc, SerialGps, SerialImu, SerialLink, SerialRadar, SerialSettings,
};
pub use sensor::{ManagedSensor, SensorDriver};
pub use simulated::{SimulatedGps, SimulatedImu, SimulatedRadar};
pub use tokio_impl::TokioContext;
pub use types::{SensorData, SensorKind, SensorReading, VehicleId};
