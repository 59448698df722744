//! Sensor driver abstraction (hardware abstraction layer).

use crate::error::EnvError;
use crate::types::{SensorKind, SensorReading};
use tracing::{info, warn};

/// Uniform capability interface for every sensor driver.
///
/// # Implementations
///
/// - **Simulation**: random-walk generators (`SimulatedGps`, ...)
/// - **Hardware**: line-oriented device readers (`SerialGps`, ...)
///
/// Drivers are selected through [`crate::create_sensor`], keyed by
/// [`SensorKind`] and the simulation flag, so upstream code never names a
/// concrete driver type.
pub trait SensorDriver: Send {
    /// Human-readable driver name (for logging).
    fn name(&self) -> &str;

    /// The kind of data this driver produces.
    fn kind(&self) -> SensorKind;

    /// Whether this driver is a simulation.
    fn is_simulation(&self) -> bool;

    /// Whether `connect()` has succeeded and `close()` has not been called.
    fn is_connected(&self) -> bool;

    /// Opens the device (or starts the simulation).
    fn connect(&mut self) -> Result<(), EnvError>;

    /// Returns the latest reading.
    ///
    /// # Returns
    /// * `Ok(reading)` - A decoded reading
    /// * `Err(EnvError::NotConnected)` - `connect()` was not called
    /// * `Err(EnvError::ParseError)` - The device produced garbage
    fn read(&mut self) -> Result<SensorReading, EnvError>;

    /// Runs the sensor-specific calibration routine.
    fn calibrate(&mut self) -> Result<(), EnvError>;

    /// Releases the device.
    fn close(&mut self);
}

/// Owns a driver and makes reads infallible for the fusion loop.
///
/// A failed read is logged and turned into `None`; the estimator then simply
/// omits that correction for the tick.
pub struct ManagedSensor {
    driver: Box<dyn SensorDriver>,
    last_reading: Option<SensorReading>,
    failures: u64,
}

impl ManagedSensor {
    /// Wraps a driver.
    pub fn new(driver: Box<dyn SensorDriver>) -> Self {
        info!(
            "Sensor [{}] initialised (simulation={})",
            driver.name(),
            driver.is_simulation()
        );
        Self {
            driver,
            last_reading: None,
            failures: 0,
        }
    }

    /// Connects the underlying driver.
    pub fn connect(&mut self) -> Result<(), EnvError> {
        self.driver.connect()
    }

    /// Runs calibration on the underlying driver.
    pub fn calibrate(&mut self) -> Result<(), EnvError> {
        self.driver.calibrate()
    }

    /// Closes the underlying driver.
    pub fn close(&mut self) {
        self.driver.close();
    }

    /// Reads without ever failing.
    pub fn safe_read(&mut self) -> Option<SensorReading> {
        match self.driver.read() {
            Ok(reading) => {
                self.last_reading = Some(reading.clone());
                Some(reading)
            }
            Err(e) => {
                self.failures += 1;
                warn!("Sensor [{}] read error: {}", self.driver.name(), e);
                None
            }
        }
    }

    /// The last successful reading, if any.
    pub fn last_reading(&self) -> Option<&SensorReading> {
        self.last_reading.as_ref()
    }

    /// Number of failed reads so far.
    pub fn failures(&self) -> u64 {
        self.failures
    }

    /// The kind of the wrapped driver.
    pub fn kind(&self) -> SensorKind {
        self.driver.kind()
    }

    /// Name of the wrapped driver.
    pub fn name(&self) -> &str {
        self.driver.name()
    }

    /// Whether the wrapped driver is connected.
    pub fn is_connected(&self) -> bool {
        self.driver.is_connected()
    }
}

impl std::fmt::Debug for ManagedSensor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagedSensor")
            .field("name", &self.driver.name())
            .field("connected", &self.driver.is_connected())
            .field("simulation", &self.driver.is_simulation())
            .field("failures", &self.failures)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SensorData;

    /// Driver that fails every other read.
    struct FlakyDriver {
        calls: u32,
    }

    impl SensorDriver for FlakyDriver {
        fn name(&self) -> &str {
            "flaky"
        }
        fn kind(&self) -> SensorKind {
            SensorKind::Radar
        }
        fn is_simulation(&self) -> bool {
            true
        }
        fn is_connected(&self) -> bool {
            true
        }
        fn connect(&mut self) -> Result<(), EnvError> {
            Ok(())
        }
        fn read(&mut self) -> Result<SensorReading, EnvError> {
            self.calls += 1;
            if self.calls % 2 == 0 {
                return Err(EnvError::read("bus glitch"));
            }
            Ok(SensorReading::new(
                self.calls as f64,
                SensorData::Radar {
                    distance_m: 50.0,
                    relative_velocity_mps: 0.0,
                    target_detected: true,
                },
            ))
        }
        fn calibrate(&mut self) -> Result<(), EnvError> {
            Ok(())
        }
        fn close(&mut self) {}
    }

    #[test]
    fn test_safe_read_swallows_errors() {
        let mut sensor = ManagedSensor::new(Box::new(FlakyDriver { calls: 0 }));

        assert!(sensor.safe_read().is_some());
        assert!(sensor.safe_read().is_none());
        assert_eq!(sensor.failures(), 1);

        // Last good reading survives the failure
        let last = sensor.last_reading().unwrap();
        assert_eq!(last.timestamp, 1.0);
    }
}
