//! Oracle - the ground-truth traffic model.
//!
//! Vehicles move in the local tangent plane under constant acceleration.
//! Sensor observations are generated from the truth with seeded Gaussian
//! noise, so every run with the same seed sees the same measurements.

use nalgebra::Vector2;
use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use v2x_core::{KinematicState, LocalTangentPlane, SensorObservation};
use v2x_env::VehicleId;

/// Radar ranges below this are discarded; the range Jacobian is unstable
/// near the origin.
const MIN_RADAR_RANGE_M: f64 = 5.0;

/// A vehicle in the ground-truth model.
#[derive(Debug, Clone)]
pub struct GroundTruthVehicle {
    pub id: VehicleId,
    pub position: Vector2<f64>,
    pub velocity: Vector2<f64>,
    pub acceleration: Vector2<f64>,
    pub active: bool,
}

impl GroundTruthVehicle {
    /// Truth expressed as a kinematic state.
    pub fn state(&self) -> KinematicState {
        KinematicState::new(
            self.position.x,
            self.position.y,
            self.velocity.x,
            self.velocity.y,
        )
        .with_acceleration(self.acceleration.x, self.acceleration.y)
    }
}

/// Sensor noise and availability.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NoiseModel {
    /// GPS position noise (std dev, metres)
    pub gps_std_m: f64,

    /// IMU acceleration noise (std dev, m/s²)
    pub imu_std: f64,

    /// Radar range noise (std dev, metres)
    pub radar_std_m: f64,

    /// Radar sees the origin only within this range
    pub radar_max_range_m: f64,

    /// Probability that any single observation is lost
    pub dropout_probability: f64,
}

impl Default for NoiseModel {
    fn default() -> Self {
        Self {
            gps_std_m: 0.5,
            imu_std: 0.05,
            radar_std_m: 0.3,
            radar_max_range_m: 200.0,
            dropout_probability: 0.0,
        }
    }
}

/// The ground truth oracle.
pub struct Oracle {
    vehicles: BTreeMap<VehicleId, GroundTruthVehicle>,
    next_index: u64,
    physics_rng: ChaCha8Rng,
    noise: NoiseModel,
    projection: LocalTangentPlane,
    current_time: f64,
    dropped: u64,
    generated: u64,
}

impl Oracle {
    /// Creates an oracle with a physics seed.
    pub fn new(seed: u64) -> Self {
        Self {
            vehicles: BTreeMap::new(),
            next_index: 1,
            physics_rng: ChaCha8Rng::seed_from_u64(seed),
            noise: NoiseModel::default(),
            projection: LocalTangentPlane::default(),
            current_time: 0.0,
            dropped: 0,
            generated: 0,
        }
    }

    pub fn with_noise(mut self, noise: NoiseModel) -> Self {
        self.noise = noise;
        self
    }

    /// Projection used to turn positions into GPS fixes.
    pub fn with_projection(mut self, projection: LocalTangentPlane) -> Self {
        self.projection = projection;
        self
    }

    /// Spawns a vehicle and returns its id.
    pub fn spawn_vehicle(&mut self, position: Vector2<f64>, velocity: Vector2<f64>) -> VehicleId {
        let id = VehicleId::from_seed(self.next_index);
        self.next_index += 1;

        self.vehicles.insert(
            id.clone(),
            GroundTruthVehicle {
                id: id.clone(),
                position,
                velocity,
                acceleration: Vector2::zeros(),
                active: true,
            },
        );
        id
    }

    pub fn set_acceleration(&mut self, id: &VehicleId, acceleration: Vector2<f64>) {
        if let Some(vehicle) = self.vehicles.get_mut(id) {
            vehicle.acceleration = acceleration;
        }
    }

    /// Removes a vehicle from the simulation.
    pub fn remove_vehicle(&mut self, id: &VehicleId) {
        if let Some(vehicle) = self.vehicles.get_mut(id) {
            vehicle.active = false;
        }
    }

    /// Advances physics by dt seconds.
    pub fn step(&mut self, dt: f64) {
        self.current_time += dt;

        for vehicle in self.vehicles.values_mut().filter(|v| v.active) {
            vehicle.position += vehicle.velocity * dt + vehicle.acceleration * (0.5 * dt * dt);
            vehicle.velocity += vehicle.acceleration * dt;
        }
    }

    /// Returns the current simulation time.
    pub fn time(&self) -> f64 {
        self.current_time
    }

    pub fn noise(&self) -> &NoiseModel {
        &self.noise
    }

    /// Returns all active vehicles in id order.
    pub fn active_vehicles(&self) -> Vec<&GroundTruthVehicle> {
        self.vehicles.values().filter(|v| v.active).collect()
    }

    pub fn vehicle(&self, id: &VehicleId) -> Option<&GroundTruthVehicle> {
        self.vehicles.get(id)
    }

    /// Noisy observations of one vehicle for this tick.
    ///
    /// GPS and IMU are always attempted; radar only while the vehicle is
    /// within range of the origin. Each may be dropped independently.
    pub fn observe(&mut self, id: &VehicleId) -> Vec<SensorObservation> {
        let Some(truth) = self.vehicles.get(id).filter(|v| v.active).cloned() else {
            return Vec::new();
        };
        let mut observations = Vec::with_capacity(3);

        let gps_x = truth.position.x + self.gaussian(self.noise.gps_std_m);
        let gps_y = truth.position.y + self.gaussian(self.noise.gps_std_m);
        let (lat, lon) = self.projection.to_latlon(gps_x, gps_y);
        self.emit(&mut observations, SensorObservation::Position { lat, lon });

        let ax = truth.acceleration.x + self.gaussian(self.noise.imu_std);
        let ay = truth.acceleration.y + self.gaussian(self.noise.imu_std);
        self.emit(&mut observations, SensorObservation::Acceleration { ax, ay });

        let range = truth.position.norm();
        if (MIN_RADAR_RANGE_M..=self.noise.radar_max_range_m).contains(&range) {
            let distance = (range + self.gaussian(self.noise.radar_std_m)).max(0.0);
            self.emit(&mut observations, SensorObservation::Range { distance });
        }

        observations
    }

    /// Observations for every active vehicle, in id order.
    pub fn observe_all(&mut self) -> Vec<(VehicleId, Vec<SensorObservation>)> {
        let ids: Vec<VehicleId> = self
            .vehicles
            .values()
            .filter(|v| v.active)
            .map(|v| v.id.clone())
            .collect();

        ids.into_iter()
            .map(|id| {
                let observations = self.observe(&id);
                (id, observations)
            })
            .collect()
    }

    /// Ground-truth states for error calculation.
    pub fn ground_truth(&self) -> Vec<(VehicleId, KinematicState)> {
        self.vehicles
            .values()
            .filter(|v| v.active)
            .map(|v| (v.id.clone(), v.state()))
            .collect()
    }

    /// Observations lost to dropout so far.
    pub fn dropped_observations(&self) -> u64 {
        self.dropped
    }

    /// Observations delivered so far.
    pub fn generated_observations(&self) -> u64 {
        self.generated
    }

    fn gaussian(&mut self, std_dev: f64) -> f64 {
        let z: f64 = self.physics_rng.sample(StandardNormal);
        z * std_dev
    }

    fn emit(&mut self, out: &mut Vec<SensorObservation>, observation: SensorObservation) {
        if self.physics_rng.gen::<f64>() < self.noise.dropout_probability {
            self.dropped += 1;
        } else {
            self.generated += 1;
            out.push(observation);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_oracle_spawn_vehicle() {
        let mut oracle = Oracle::new(42);

        let id = oracle.spawn_vehicle(Vector2::new(100.0, 200.0), Vector2::new(10.0, 0.0));

        assert_eq!(id, VehicleId::from_seed(1));
        let vehicle = oracle.vehicle(&id).unwrap();
        assert_eq!(vehicle.position.x, 100.0);
        assert_eq!(oracle.active_vehicles().len(), 1);
    }

    #[test]
    fn test_oracle_physics_step() {
        let mut oracle = Oracle::new(42);

        let id = oracle.spawn_vehicle(Vector2::new(0.0, 0.0), Vector2::new(20.0, 0.0));
        oracle.set_acceleration(&id, Vector2::new(0.0, 2.0));

        for _ in 0..10 {
            oracle.step(0.1);
        }

        let vehicle = oracle.vehicle(&id).unwrap();
        assert_relative_eq!(vehicle.position.x, 20.0, epsilon = 1e-9);
        assert_relative_eq!(vehicle.position.y, 1.0, epsilon = 1e-9);
        assert_relative_eq!(vehicle.velocity.y, 2.0, epsilon = 1e-9);
        assert_relative_eq!(oracle.time(), 1.0, epsilon = 1e-9);
    }

    #[test]
    fn test_oracle_deterministic_noise() {
        let mut oracle1 = Oracle::new(42);
        let mut oracle2 = Oracle::new(42);

        let id1 = oracle1.spawn_vehicle(Vector2::new(30.0, 40.0), Vector2::zeros());
        let id2 = oracle2.spawn_vehicle(Vector2::new(30.0, 40.0), Vector2::zeros());

        // Same seed = same noise
        assert_eq!(oracle1.observe(&id1), oracle2.observe(&id2));
    }

    #[test]
    fn test_gps_fix_projects_near_truth() {
        let mut oracle = Oracle::new(3);
        let id = oracle.spawn_vehicle(Vector2::new(30.0, 40.0), Vector2::zeros());
        let projection = LocalTangentPlane::default();

        let observations = oracle.observe(&id);
        let Some(SensorObservation::Position { lat, lon }) = observations.first().copied() else {
            panic!("first observation should be a GPS fix");
        };
        let (x, y) = projection.to_local(lat, lon);
        assert!((x - 30.0).abs() < 5.0);
        assert!((y - 40.0).abs() < 5.0);
        // 50 m from the origin: radar is in range
        assert_eq!(observations.len(), 3);
    }

    #[test]
    fn test_full_dropout_loses_everything() {
        let noise = NoiseModel {
            dropout_probability: 1.0,
            ..NoiseModel::default()
        };
        let mut oracle = Oracle::new(9).with_noise(noise);
        oracle.spawn_vehicle(Vector2::new(30.0, 40.0), Vector2::zeros());

        let all = oracle.observe_all();
        assert_eq!(all.len(), 1);
        assert!(all[0].1.is_empty());
        assert_eq!(oracle.dropped_observations(), 3);
        assert_eq!(oracle.generated_observations(), 0);
    }

    #[test]
    fn test_removed_vehicle_is_not_observed() {
        let mut oracle = Oracle::new(1);
        let id = oracle.spawn_vehicle(Vector2::new(10.0, 10.0), Vector2::zeros());
        oracle.remove_vehicle(&id);

        assert!(oracle.observe(&id).is_empty());
        assert!(oracle.ground_truth().is_empty());
    }
}
