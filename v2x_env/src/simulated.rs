//! Simulated sensor drivers.
//!
//! Each driver runs a bounded random walk from a seeded RNG so that an OBU
//! can be exercised end-to-end without hardware.

use crate::error::EnvError;
use crate::sensor::SensorDriver;
use crate::types::{SensorData, SensorKind, SensorReading};
use rand::rngs::StdRng;
use rand::Rng;
use tracing::info;

/// Sample period of the simulated devices (10 Hz).
const SAMPLE_PERIOD_SECS: f64 = 0.1;

/// Shared bookkeeping for simulated drivers.
#[derive(Debug)]
struct SimClock {
    connected: bool,
    samples: u64,
}

impl SimClock {
    fn new() -> Self {
        Self {
            connected: false,
            samples: 0,
        }
    }

    fn tick(&mut self, name: &str) -> Result<f64, EnvError> {
        if !self.connected {
            return Err(EnvError::NotConnected(name.to_string()));
        }
        self.samples += 1;
        Ok(self.samples as f64 * SAMPLE_PERIOD_SECS)
    }
}

/// GPS random walk around a start point.
#[derive(Debug)]
pub struct SimulatedGps {
    rng: StdRng,
    clock: SimClock,
    lat: f64,
    lon: f64,
    speed_mps: f64,
    heading_deg: f64,
}

impl SimulatedGps {
    /// Creates a GPS walk starting at `(lat, lon)`.
    pub fn new(rng: StdRng, lat: f64, lon: f64) -> Self {
        Self {
            rng,
            clock: SimClock::new(),
            lat,
            lon,
            speed_mps: 0.0,
            heading_deg: 0.0,
        }
    }
}

impl SensorDriver for SimulatedGps {
    fn name(&self) -> &str {
        "GPS"
    }

    fn kind(&self) -> SensorKind {
        SensorKind::Gps
    }

    fn is_simulation(&self) -> bool {
        true
    }

    fn is_connected(&self) -> bool {
        self.clock.connected
    }

    fn connect(&mut self) -> Result<(), EnvError> {
        info!("GPS connected in SIMULATION mode");
        self.clock.connected = true;
        Ok(())
    }

    fn read(&mut self) -> Result<SensorReading, EnvError> {
        let timestamp = self.clock.tick("GPS")?;

        self.speed_mps = (self.speed_mps + self.rng.gen_range(-0.5..0.6)).max(0.0);
        self.heading_deg += self.rng.gen_range(-5.0..5.0);
        let heading = self.heading_deg.to_radians();
        // ~speed m/s expressed in degrees
        self.lat += heading.cos() * self.speed_mps * 1e-5;
        self.lon += heading.sin() * self.speed_mps * 1e-5;

        let quality = self.rng.gen_range(0.85..1.0);
        Ok(SensorReading::new(
            timestamp,
            SensorData::Gps {
                latitude: self.lat,
                longitude: self.lon,
                speed_mps: self.speed_mps,
                heading_deg: self.heading_deg.rem_euclid(360.0),
            },
        )
        .with_quality(quality))
    }

    fn calibrate(&mut self) -> Result<(), EnvError> {
        info!("GPS calibration - waiting for satellite fix");
        Ok(())
    }

    fn close(&mut self) {
        self.clock.connected = false;
        info!("GPS sensor closed");
    }
}

/// IMU with drifting planar acceleration.
#[derive(Debug)]
pub struct SimulatedImu {
    rng: StdRng,
    clock: SimClock,
    ax: f64,
    ay: f64,
}

impl SimulatedImu {
    /// Bound on the simulated planar acceleration (m/s²).
    pub const MAX_ACCEL: f64 = 15.0;

    pub fn new(rng: StdRng) -> Self {
        Self {
            rng,
            clock: SimClock::new(),
            ax: 0.0,
            ay: 0.0,
        }
    }
}

impl SensorDriver for SimulatedImu {
    fn name(&self) -> &str {
        "IMU"
    }

    fn kind(&self) -> SensorKind {
        SensorKind::Imu
    }

    fn is_simulation(&self) -> bool {
        true
    }

    fn is_connected(&self) -> bool {
        self.clock.connected
    }

    fn connect(&mut self) -> Result<(), EnvError> {
        info!("IMU connected in SIMULATION mode");
        self.clock.connected = true;
        Ok(())
    }

    fn read(&mut self) -> Result<SensorReading, EnvError> {
        let timestamp = self.clock.tick("IMU")?;

        self.ax = (self.ax + self.rng.gen_range(-0.3..0.3)).clamp(-Self::MAX_ACCEL, Self::MAX_ACCEL);
        self.ay = (self.ay + self.rng.gen_range(-0.3..0.3)).clamp(-Self::MAX_ACCEL, Self::MAX_ACCEL);

        let data = SensorData::Imu {
            accel_x: self.ax,
            accel_y: self.ay,
            accel_z: 9.81 + self.rng.gen_range(-0.05..0.05),
            gyro_x: self.rng.gen_range(-1.0..1.0),
            gyro_y: self.rng.gen_range(-1.0..1.0),
            gyro_z: self.rng.gen_range(-5.0..5.0),
        };
        let quality = self.rng.gen_range(0.9..1.0);
        Ok(SensorReading::new(timestamp, data).with_quality(quality))
    }

    fn calibrate(&mut self) -> Result<(), EnvError> {
        info!("IMU calibration - keep device still");
        self.ax = 0.0;
        self.ay = 0.0;
        Ok(())
    }

    fn close(&mut self) {
        self.clock.connected = false;
        info!("IMU sensor closed");
    }
}

/// Radar tracking a single target that wanders in range.
#[derive(Debug)]
pub struct SimulatedRadar {
    rng: StdRng,
    clock: SimClock,
    max_range_m: f64,
    distance_m: f64,
}

impl SimulatedRadar {
    pub fn new(rng: StdRng, max_range_m: f64) -> Self {
        Self {
            rng,
            clock: SimClock::new(),
            max_range_m: max_range_m.max(2.0),
            distance_m: 100.0_f64.clamp(2.0, max_range_m.max(2.0)),
        }
    }
}

impl SensorDriver for SimulatedRadar {
    fn name(&self) -> &str {
        "Radar"
    }

    fn kind(&self) -> SensorKind {
        SensorKind::Radar
    }

    fn is_simulation(&self) -> bool {
        true
    }

    fn is_connected(&self) -> bool {
        self.clock.connected
    }

    fn connect(&mut self) -> Result<(), EnvError> {
        info!("Radar connected in SIMULATION mode");
        self.clock.connected = true;
        Ok(())
    }

    fn read(&mut self) -> Result<SensorReading, EnvError> {
        let timestamp = self.clock.tick("Radar")?;

        self.distance_m = (self.distance_m + self.rng.gen_range(-5.0..4.0)).clamp(2.0, self.max_range_m);
        let relative_velocity = self.rng.gen_range(-2.0..2.0);

        let data = SensorData::Radar {
            distance_m: self.distance_m,
            relative_velocity_mps: relative_velocity,
            target_detected: self.distance_m < self.max_range_m * 0.9,
        };
        let quality = self.rng.gen_range(0.8..1.0);
        Ok(SensorReading::new(timestamp, data).with_quality(quality))
    }

    fn calibrate(&mut self) -> Result<(), EnvError> {
        info!("Radar calibration - point sensor at known distance");
        Ok(())
    }

    fn close(&mut self) {
        self.clock.connected = false;
        info!("Radar sensor closed");
    }
}
