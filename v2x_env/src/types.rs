//! Common types for the V2X environment abstraction.

use serde::{Deserialize, Serialize};

/// Identifier of a vehicle / onboard unit.
///
/// OBUs are provisioned with human-readable ids (e.g. `OBU-SIM-001`),
/// so this wraps a string rather than a UUID.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct VehicleId(pub String);

impl VehicleId {
    /// Creates a VehicleId from anything string-like.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Creates a deterministic VehicleId from an index (for simulation).
    pub fn from_seed(index: u64) -> Self {
        Self(format!("OBU-SIM-{:03}", index))
    }

    /// Returns the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for VehicleId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl std::fmt::Display for VehicleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The kind of physical (or simulated) sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SensorKind {
    Gps,
    Imu,
    Radar,
}

impl SensorKind {
    /// Returns the driver name used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            SensorKind::Gps => "GPS",
            SensorKind::Imu => "IMU",
            SensorKind::Radar => "Radar",
        }
    }
}

/// Sensor-specific payload of a reading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SensorData {
    Gps {
        latitude: f64,
        longitude: f64,
        speed_mps: f64,
        heading_deg: f64,
    },
    Imu {
        accel_x: f64,
        accel_y: f64,
        accel_z: f64,
        gyro_x: f64,
        gyro_y: f64,
        gyro_z: f64,
    },
    Radar {
        distance_m: f64,
        relative_velocity_mps: f64,
        target_detected: bool,
    },
}

/// Standardised container for a single sensor reading.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SensorReading {
    /// Seconds since the UNIX epoch (or since simulation start)
    pub timestamp: f64,

    /// Which sensor produced it
    pub kind: SensorKind,

    /// Decoded payload
    pub data: SensorData,

    /// Confidence score [0.0 - 1.0]
    pub quality: f64,

    /// Raw device bytes, when the reading came from hardware
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw: Option<Vec<u8>>,
}

impl SensorReading {
    /// Creates a reading with full quality and no raw bytes.
    pub fn new(timestamp: f64, data: SensorData) -> Self {
        let kind = match data {
            SensorData::Gps { .. } => SensorKind::Gps,
            SensorData::Imu { .. } => SensorKind::Imu,
            SensorData::Radar { .. } => SensorKind::Radar,
        };
        Self {
            timestamp,
            kind,
            data,
            quality: 1.0,
            raw: None,
        }
    }

    /// Sets the quality score.
    pub fn with_quality(mut self, quality: f64) -> Self {
        self.quality = quality.clamp(0.0, 1.0);
        self
    }

    /// Attaches raw device bytes.
    pub fn with_raw(mut self, raw: Vec<u8>) -> Self {
        self.raw = if raw.is_empty() { None } else { Some(raw) };
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vehicle_id_from_seed() {
        assert_eq!(VehicleId::from_seed(1).as_str(), "OBU-SIM-001");
        assert_eq!(VehicleId::from_seed(42).to_string(), "OBU-SIM-042");
    }

    #[test]
    fn test_reading_kind_follows_payload() {
        let reading = SensorReading::new(
            0.0,
            SensorData::Radar {
                distance_m: 12.0,
                relative_velocity_mps: -1.0,
                target_detected: true,
            },
        );
        assert_eq!(reading.kind, SensorKind::Radar);
        assert_eq!(reading.with_quality(1.7).quality, 1.0);
    }
}
