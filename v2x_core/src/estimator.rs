//! The state estimator - 6-state Extended Kalman Filter
//!
//! Fuses asynchronous GPS (position), IMU (acceleration) and radar (range)
//! observations into `[x, y, vx, vy, ax, ay]` with a constant-acceleration
//! motion model.

use crate::config::EstimatorConfig;
use crate::error::ConfigError;
use crate::projection::LocalTangentPlane;
use nalgebra::{DMatrix, DVector, Matrix6};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Dimension of the kinematic state.
pub const STATE_DIM: usize = 6;

/// Lower bound on the range used as Jacobian divisor.
const MIN_RANGE: f64 = 1e-6;

/// Snapshot of a vehicle's estimated kinematics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KinematicState {
    pub x: f64,
    pub y: f64,
    pub vx: f64,
    pub vy: f64,
    pub ax: f64,
    pub ay: f64,

    /// Derived: √(vx² + vy²)
    pub speed: f64,

    /// 6×6 state covariance, same ordering as the state
    pub covariance: Matrix6<f64>,
}

impl KinematicState {
    /// A state with known position and velocity, zero acceleration and
    /// zero covariance.
    pub fn new(x: f64, y: f64, vx: f64, vy: f64) -> Self {
        Self {
            x,
            y,
            vx,
            vy,
            ax: 0.0,
            ay: 0.0,
            speed: vx.hypot(vy),
            covariance: Matrix6::zeros(),
        }
    }

    pub fn with_acceleration(mut self, ax: f64, ay: f64) -> Self {
        self.ax = ax;
        self.ay = ay;
        self
    }

    fn from_filter(x: &DVector<f64>, p: &DMatrix<f64>) -> Self {
        Self {
            x: x[0],
            y: x[1],
            vx: x[2],
            vy: x[3],
            ax: x[4],
            ay: x[5],
            speed: x[2].hypot(x[3]),
            covariance: p.fixed_view::<STATE_DIM, STATE_DIM>(0, 0).into_owned(),
        }
    }

    pub fn position(&self) -> (f64, f64) {
        (self.x, self.y)
    }

    pub fn velocity(&self) -> (f64, f64) {
        (self.vx, self.vy)
    }
}

/// A single measurement, consumed once by [`StateEstimator::apply`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum SensorObservation {
    /// GPS fix in degrees
    Position { lat: f64, lon: f64 },
    /// IMU planar acceleration in m/s²
    Acceleration { ax: f64, ay: f64 },
    /// Radar range to the origin of the local frame, metres
    Range { distance: f64 },
}

/// Extended Kalman Filter for one vehicle.
///
/// Owned exclusively by its vehicle; independent estimators share nothing
/// and may run on separate threads.
#[derive(Debug, Clone)]
pub struct StateEstimator {
    /// State vector [x, y, vx, vy, ax, ay]
    x: DVector<f64>,

    /// State covariance P
    p: DMatrix<f64>,

    /// Process noise Q
    q: DMatrix<f64>,

    r_position: DMatrix<f64>,
    r_acceleration: DMatrix<f64>,
    r_range: DMatrix<f64>,

    projection: LocalTangentPlane,

    /// Set by the first position fix
    initialised: bool,

    skipped_updates: u64,
}

impl StateEstimator {
    /// Creates an estimator at the origin with `P = initial_uncertainty · I`.
    pub fn new(config: EstimatorConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        let q_base = config.process_noise;
        let mut q = DMatrix::identity(STATE_DIM, STATE_DIM) * q_base;
        // Acceleration is less predictable
        q[(4, 4)] = q_base * 2.0;
        q[(5, 5)] = q_base * 2.0;

        info!(
            "StateEstimator initialised (state_dim={}, q={:.3})",
            STATE_DIM, q_base
        );

        Ok(Self {
            x: DVector::zeros(STATE_DIM),
            p: DMatrix::identity(STATE_DIM, STATE_DIM) * config.initial_uncertainty,
            q,
            r_position: DMatrix::identity(2, 2) * config.measurement_noise_gps,
            r_acceleration: DMatrix::identity(2, 2) * config.measurement_noise_imu,
            r_range: DMatrix::identity(1, 1) * config.measurement_noise_radar,
            projection: config.reference,
            initialised: false,
            skipped_updates: 0,
        })
    }

    /// Prediction step: advance the state by `dt` seconds.
    ///
    /// Must run once per cycle before any update.
    pub fn predict(&mut self, dt: f64) {
        let f = Self::transition(dt);
        self.x = &f * &self.x;
        // P_{k+1|k} = F P F^T + Q
        self.p = &f * &self.p * f.transpose() + &self.q;
    }

    /// Correction with a GPS fix.
    ///
    /// The very first fix also overwrites the position components so that
    /// dead reckoning starts from the vehicle's real location.
    pub fn update_position(&mut self, lat: f64, lon: f64) {
        let (x_m, y_m) = self.projection.to_local(lat, lon);
        let z = DVector::from_vec(vec![x_m, y_m]);
        let mut h = DMatrix::zeros(2, STATE_DIM);
        h[(0, 0)] = 1.0;
        h[(1, 1)] = 1.0;
        let r = self.r_position.clone();
        self.correct(z, h, &r, "position");

        if !self.initialised {
            self.x[0] = x_m;
            self.x[1] = y_m;
            self.initialised = true;
        }
    }

    /// Correction with an IMU acceleration sample.
    pub fn update_acceleration(&mut self, ax: f64, ay: f64) {
        let z = DVector::from_vec(vec![ax, ay]);
        let mut h = DMatrix::zeros(2, STATE_DIM);
        h[(0, 4)] = 1.0;
        h[(1, 5)] = 1.0;
        let r = self.r_acceleration.clone();
        self.correct(z, h, &r, "acceleration");
    }

    /// Correction with a radar range, `h(x) = √(x² + y²)`.
    ///
    /// Linearised at the current estimate; `H·x` equals `h(x)` for this
    /// Jacobian so the shared linear innovation applies.
    pub fn update_range(&mut self, distance: f64) {
        let (px, py) = (self.x[0], self.x[1]);
        let r_est = px.hypot(py).max(MIN_RANGE);
        let z = DVector::from_vec(vec![distance]);
        let mut h = DMatrix::zeros(1, STATE_DIM);
        h[(0, 0)] = px / r_est;
        h[(0, 1)] = py / r_est;
        let r = self.r_range.clone();
        self.correct(z, h, &r, "range");
    }

    /// Dispatches an observation to the matching update.
    pub fn apply(&mut self, observation: &SensorObservation) {
        match *observation {
            SensorObservation::Position { lat, lon } => self.update_position(lat, lon),
            SensorObservation::Acceleration { ax, ay } => self.update_acceleration(ax, ay),
            SensorObservation::Range { distance } => self.update_range(distance),
        }
    }

    /// Current estimate with derived speed.
    pub fn get_state(&self) -> KinematicState {
        KinematicState::from_filter(&self.x, &self.p)
    }

    /// Whether a position fix has been received.
    pub fn is_initialised(&self) -> bool {
        self.initialised
    }

    /// Updates dropped because the innovation covariance was singular.
    pub fn skipped_updates(&self) -> u64 {
        self.skipped_updates
    }

    /// Constant-acceleration transition matrix F.
    fn transition(dt: f64) -> DMatrix<f64> {
        let mut f = DMatrix::identity(STATE_DIM, STATE_DIM);
        f[(0, 2)] = dt;
        f[(1, 3)] = dt;
        f[(0, 4)] = 0.5 * dt * dt;
        f[(1, 5)] = 0.5 * dt * dt;
        f[(2, 4)] = dt;
        f[(3, 5)] = dt;
        f
    }

    /// Shared correction step. Returns false when the update was skipped.
    fn correct(&mut self, z: DVector<f64>, h: DMatrix<f64>, r: &DMatrix<f64>, source: &str) -> bool {
        // y = z - H x
        let innovation = z - &h * &self.x;

        // S = H P H^T + R
        let s = &h * &self.p * h.transpose() + r;

        let s_inv = match s.try_inverse() {
            Some(inv) => inv,
            None => {
                self.skipped_updates += 1;
                warn!("EKF {} update: singular innovation covariance, skipping", source);
                return false;
            }
        };

        // K = P H^T S^-1
        let k = &self.p * h.transpose() * s_inv;

        self.x += &k * innovation;

        // P = (I - K H) P, re-symmetrised against round-off
        let i = DMatrix::<f64>::identity(STATE_DIM, STATE_DIM);
        let p = (i - &k * &h) * &self.p;
        self.p = (&p + p.transpose()) * 0.5;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn estimator() -> StateEstimator {
        StateEstimator::new(EstimatorConfig::default()).unwrap()
    }

    fn assert_symmetric_psd(p: &Matrix6<f64>) {
        for i in 0..STATE_DIM {
            for j in 0..STATE_DIM {
                assert_relative_eq!(p[(i, j)], p[(j, i)], epsilon = 1e-9);
            }
        }
        let eigen = p.symmetric_eigen();
        for &lambda in eigen.eigenvalues.iter() {
            assert!(lambda >= -1e-9, "negative eigenvalue {}", lambda);
        }
    }

    #[test]
    fn test_initial_state() {
        let ekf = estimator();
        let state = ekf.get_state();

        assert_eq!(state.position(), (0.0, 0.0));
        assert_eq!(state.speed, 0.0);
        assert_relative_eq!(state.covariance[(0, 0)], 10.0);
        assert!(!ekf.is_initialised());
    }

    #[test]
    fn test_predict_constant_acceleration() {
        let mut ekf = estimator();
        ekf.x = DVector::from_vec(vec![0.0, 0.0, 2.0, 1.0, 1.0, 0.0]);
        ekf.predict(0.5);

        let state = ekf.get_state();
        assert_relative_eq!(state.x, 2.0 * 0.5 + 0.5 * 1.0 * 0.25);
        assert_relative_eq!(state.y, 0.5);
        assert_relative_eq!(state.vx, 2.5);
        assert_relative_eq!(state.speed, 2.5_f64.hypot(1.0));
    }

    #[test]
    fn test_predict_grows_uncertainty() {
        let mut ekf = estimator();
        let before = ekf.get_state().covariance[(0, 0)];
        ekf.predict(0.1);
        assert!(ekf.get_state().covariance[(0, 0)] > before);
    }

    #[test]
    fn test_first_fix_seeds_position() {
        let mut ekf = estimator();
        let ltp = LocalTangentPlane::default();
        let (lat, lon) = ltp.to_latlon(120.0, -45.0);

        ekf.predict(0.1);
        ekf.update_position(lat, lon);

        let state = ekf.get_state();
        assert!(ekf.is_initialised());
        assert_relative_eq!(state.x, 120.0, epsilon = 1e-6);
        assert_relative_eq!(state.y, -45.0, epsilon = 1e-6);
    }

    #[test]
    fn test_position_updates_converge() {
        let config = EstimatorConfig {
            process_noise: 1e-3,
            ..EstimatorConfig::default()
        };
        let mut ekf = StateEstimator::new(config).unwrap();
        let ltp = LocalTangentPlane::default();
        let (lat, lon) = ltp.to_latlon(30.0, 40.0);

        // Start a few metres off, then feed a consistent fix
        ekf.x = DVector::from_vec(vec![25.0, 35.0, 0.0, 0.0, 0.0, 0.0]);
        ekf.initialised = true;
        for _ in 0..50 {
            ekf.predict(0.1);
            ekf.update_position(lat, lon);
            assert_symmetric_psd(&ekf.get_state().covariance);
        }

        let state = ekf.get_state();
        assert_relative_eq!(state.x, 30.0, epsilon = 0.5);
        assert_relative_eq!(state.y, 40.0, epsilon = 0.5);
    }

    #[test]
    fn test_acceleration_update_moves_towards_measurement() {
        let mut ekf = estimator();
        for _ in 0..20 {
            ekf.predict(0.1);
            ekf.update_acceleration(1.5, -0.5);
            assert_symmetric_psd(&ekf.get_state().covariance);
        }
        let state = ekf.get_state();
        assert_relative_eq!(state.ax, 1.5, epsilon = 0.1);
        assert_relative_eq!(state.ay, -0.5, epsilon = 0.1);
    }

    #[test]
    fn test_range_update_pulls_radius() {
        let mut ekf = estimator();
        ekf.x = DVector::from_vec(vec![30.0, 40.0, 0.0, 0.0, 0.0, 0.0]);

        ekf.update_range(60.0);

        let state = ekf.get_state();
        let radius = state.x.hypot(state.y);
        assert!(radius > 50.0 && radius < 60.0);
        // Correction is along the line of sight
        assert_relative_eq!(state.y / state.x, 40.0 / 30.0, epsilon = 1e-9);
        assert_symmetric_psd(&state.covariance);
    }

    #[test]
    fn test_range_at_origin_is_guarded() {
        let mut ekf = estimator();
        ekf.update_range(10.0);

        let state = ekf.get_state();
        assert!(state.x.is_finite() && state.y.is_finite());
    }

    #[test]
    fn test_singular_innovation_skips_update() {
        let mut ekf = estimator();
        // Zero covariance with zero noise leaves S singular
        ekf.p = DMatrix::zeros(STATE_DIM, STATE_DIM);
        ekf.r_acceleration = DMatrix::zeros(2, 2);

        ekf.apply(&SensorObservation::Acceleration { ax: 3.0, ay: 3.0 });

        assert_eq!(ekf.skipped_updates(), 1);
        assert_eq!(ekf.get_state().ax, 0.0);
    }

    #[test]
    fn test_invalid_config_fails_fast() {
        let config = EstimatorConfig {
            measurement_noise_gps: 0.0,
            ..EstimatorConfig::default()
        };
        assert!(matches!(
            StateEstimator::new(config),
            Err(ConfigError::NonPositive { field: "measurement_noise_gps", .. })
        ));
    }
}
