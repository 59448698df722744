//! Onboard unit runtime.
//!
//! One tick: predict, read sensors, fuse, predict the trajectory, assess
//! risk. The OBU owns its estimator exclusively; the RSU only ever sees the
//! resulting [`ObuReport`].

use crate::aggregator::TrackedVehicle;
use crate::config::PipelineConfig;
use crate::error::ConfigError;
use crate::estimator::{KinematicState, SensorObservation, StateEstimator};
use crate::prediction::{KinematicPredictor, TrajectoryPredictor};
use crate::risk::{CollisionAssessment, CollisionRiskAssessor, Waypoint};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use v2x_env::{EnvError, ManagedSensor, SensorData, SensorReading, VehicleId};

impl SensorObservation {
    /// Estimator input carried by a reading.
    ///
    /// GPS gives a position fix, IMU its planar acceleration and radar
    /// its range.
    pub fn from_reading(reading: &SensorReading) -> Self {
        match reading.data {
            SensorData::Gps {
                latitude,
                longitude,
                ..
            } => SensorObservation::Position {
                lat: latitude,
                lon: longitude,
            },
            SensorData::Imu {
                accel_x, accel_y, ..
            } => SensorObservation::Acceleration {
                ax: accel_x,
                ay: accel_y,
            },
            SensorData::Radar { distance_m, .. } => SensorObservation::Range {
                distance: distance_m,
            },
        }
    }
}

/// What an OBU reports after a tick.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObuReport {
    pub vehicle_id: VehicleId,
    pub state: KinematicState,
    pub trajectory: Option<Vec<Waypoint>>,
    pub assessment: Option<CollisionAssessment>,
    /// Latest GPS fix (lat, lon)
    pub last_fix: Option<(f64, f64)>,
}

/// In-vehicle pipeline: sensors → estimator → predictor → assessor.
pub struct OnboardUnit {
    vehicle_id: VehicleId,
    sensors: Vec<ManagedSensor>,
    estimator: StateEstimator,
    predictor: Box<dyn TrajectoryPredictor>,
    assessor: CollisionRiskAssessor,
    last_fix: Option<(f64, f64)>,
    ticks: u64,
}

impl OnboardUnit {
    /// Builds an OBU with the kinematic reference predictor.
    pub fn new(
        vehicle_id: VehicleId,
        sensors: Vec<ManagedSensor>,
        config: &PipelineConfig,
    ) -> Result<Self, ConfigError> {
        let predictor = KinematicPredictor::new(config.predictor.clone())?;
        Self::with_predictor(vehicle_id, sensors, Box::new(predictor), config)
    }

    /// Builds an OBU around an external trajectory predictor.
    pub fn with_predictor(
        vehicle_id: VehicleId,
        sensors: Vec<ManagedSensor>,
        predictor: Box<dyn TrajectoryPredictor>,
        config: &PipelineConfig,
    ) -> Result<Self, ConfigError> {
        let estimator = StateEstimator::new(config.estimator.clone())?;
        let assessor = CollisionRiskAssessor::new(config.assessor.clone())?;
        Ok(Self {
            vehicle_id,
            sensors,
            estimator,
            predictor,
            assessor,
            last_fix: None,
            ticks: 0,
        })
    }

    /// Connects every sensor; the first failure aborts.
    pub fn connect_all(&mut self) -> Result<(), EnvError> {
        for sensor in &mut self.sensors {
            sensor.connect()?;
        }
        info!("OBU {} connected {} sensors", self.vehicle_id, self.sensors.len());
        Ok(())
    }

    /// Closes every sensor.
    pub fn close_all(&mut self) {
        for sensor in &mut self.sensors {
            sensor.close();
        }
        info!("OBU {} shut down", self.vehicle_id);
    }

    /// Runs one cycle of `dt` seconds.
    ///
    /// `neighbours` are trajectories of nearby vehicles, as relayed by the
    /// RSU. A sensor that fails this tick simply contributes nothing.
    pub fn tick(&mut self, dt: f64, neighbours: &[Vec<Waypoint>]) -> ObuReport {
        self.ticks += 1;
        self.estimator.predict(dt);

        let mut radar: Option<(f64, f64)> = None;
        for sensor in &mut self.sensors {
            let Some(reading) = sensor.safe_read() else {
                continue;
            };
            match reading.data {
                SensorData::Gps {
                    latitude,
                    longitude,
                    ..
                } => self.last_fix = Some((latitude, longitude)),
                SensorData::Radar {
                    distance_m,
                    relative_velocity_mps,
                    ..
                } => radar = Some((distance_m, relative_velocity_mps)),
                SensorData::Imu { .. } => {}
            }
            self.estimator.apply(&SensorObservation::from_reading(&reading));
        }

        let state = self.estimator.get_state();
        self.predictor.push_state(&state);
        let trajectory = self.predictor.predict();

        let mut assessment = trajectory
            .as_ref()
            .map(|t| self.assessor.assess(t, neighbours, self.predictor.step()));

        if let Some((distance, closing)) = radar {
            let radar_risk = self.assessor.assess_radar(distance, closing);
            let worse = assessment
                .as_ref()
                .map_or(true, |current| radar_risk.risk_level > current.risk_level);
            if worse {
                assessment = Some(radar_risk);
            }
        }

        if self.ticks % 10 == 0 {
            debug!(
                "OBU {} tick {} | pos=({:.2}, {:.2}) | speed={:.2} m/s | risk={}",
                self.vehicle_id,
                self.ticks,
                state.x,
                state.y,
                state.speed,
                assessment
                    .as_ref()
                    .map_or("N/A", |a| a.risk_level.as_str())
            );
        }

        ObuReport {
            vehicle_id: self.vehicle_id.clone(),
            state,
            trajectory,
            assessment,
            last_fix: self.last_fix,
        }
    }

    /// Snapshot entry for RSU aggregation.
    pub fn tracked(&self) -> TrackedVehicle {
        TrackedVehicle::new(self.vehicle_id.clone(), self.estimator.get_state())
    }

    pub fn vehicle_id(&self) -> &VehicleId {
        &self.vehicle_id
    }

    pub fn estimator(&self) -> &StateEstimator {
        &self.estimator
    }

    pub fn sensors(&self) -> &[ManagedSensor] {
        &self.sensors
    }
}

impl std::fmt::Debug for OnboardUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OnboardUnit")
            .field("vehicle_id", &self.vehicle_id)
            .field("sensors", &self.sensors)
            .field("ticks", &self.ticks)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::risk::RiskLevel;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use v2x_env::{create_sensor, SensorConfig, SensorDriver, SensorKind, TokioContext};

    /// Radar that always sees a target closing fast.
    struct ClosingRadar;

    impl SensorDriver for ClosingRadar {
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
            true
        }
        fn connect(&mut self) -> Result<(), EnvError> {
            Ok(())
        }
        fn read(&mut self) -> Result<SensorReading, EnvError> {
            Ok(SensorReading::new(
                0.0,
                SensorData::Radar {
                    distance_m: 12.0,
                    relative_velocity_mps: -8.0,
                    target_detected: true,
                },
            ))
        }
        fn calibrate(&mut self) -> Result<(), EnvError> {
            Ok(())
        }
        fn close(&mut self) {}
    }

    fn simulated(kind: SensorKind, seed: u64) -> ManagedSensor {
        let driver = create_sensor(
            kind,
            &SensorConfig::simulated(),
            StdRng::seed_from_u64(seed),
            TokioContext::shared(),
        )
        .unwrap();
        ManagedSensor::new(driver)
    }

    #[test]
    fn test_observation_from_reading() {
        let gps = SensorReading::new(
            0.0,
            SensorData::Gps {
                latitude: 28.6,
                longitude: 77.2,
                speed_mps: 3.0,
                heading_deg: 90.0,
            },
        );
        assert_eq!(
            SensorObservation::from_reading(&gps),
            SensorObservation::Position { lat: 28.6, lon: 77.2 }
        );
    }

    #[test]
    fn test_simulated_obu_loop() {
        let sensors = vec![
            simulated(SensorKind::Gps, 1),
            simulated(SensorKind::Imu, 2),
            simulated(SensorKind::Radar, 3),
        ];
        let mut obu =
            OnboardUnit::new(VehicleId::from_seed(1), sensors, &PipelineConfig::default()).unwrap();
        obu.connect_all().unwrap();

        let mut last = None;
        for _ in 0..25 {
            last = Some(obu.tick(0.1, &[]));
        }
        let report = last.unwrap();

        assert!(obu.estimator().is_initialised());
        assert!(report.last_fix.is_some());
        assert_eq!(report.trajectory.as_ref().map(|t| t.len()), Some(50));
        // Radar always reports, so there is always an assessment
        assert!(report.assessment.is_some());
        assert!(report.state.x.is_finite());

        obu.close_all();
        assert!(obu.sensors().iter().all(|s| !s.is_connected()));
    }

    #[test]
    fn test_radar_risk_wins_when_worse() {
        let sensors = vec![ManagedSensor::new(Box::new(ClosingRadar))];
        let mut obu =
            OnboardUnit::new(VehicleId::from("OBU-TEST"), sensors, &PipelineConfig::default()).unwrap();

        let report = obu.tick(0.1, &[]);
        let assessment = report.assessment.unwrap();
        // 12 m at 8 m/s closing
        assert_eq!(assessment.ttc_seconds, Some(1.5));
        assert_eq!(assessment.risk_level, RiskLevel::High);
        assert!(report.trajectory.is_none());
    }

    #[test]
    fn test_unconnected_sensors_are_tolerated() {
        let sensors = vec![simulated(SensorKind::Gps, 5)];
        let mut obu =
            OnboardUnit::new(VehicleId::from("OBU-TEST"), sensors, &PipelineConfig::default()).unwrap();

        let report = obu.tick(0.1, &[]);
        assert!(report.last_fix.is_none());
        assert!(report.assessment.is_none());
        assert_eq!(obu.sensors()[0].failures(), 1);
    }
}
