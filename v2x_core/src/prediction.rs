//! Trajectory prediction seam.
//!
//! The learned predictor runs outside this crate; anything that can turn a
//! history of states into waypoints plugs in through [`TrajectoryPredictor`].

use crate::config::PredictorConfig;
use crate::error::ConfigError;
use crate::estimator::KinematicState;
use crate::risk::Waypoint;
use std::collections::VecDeque;

/// Produces a finite, time-ordered trajectory from recent states.
pub trait TrajectoryPredictor: Send {
    /// Appends the latest fused state to the history.
    fn push_state(&mut self, state: &KinematicState);

    /// Predicted waypoints, or `None` while the history is still filling.
    fn predict(&self) -> Option<Vec<Waypoint>>;

    /// Spacing between predicted waypoints in seconds.
    fn step(&self) -> f64;
}

/// Constant-acceleration extrapolation of the latest state.
#[derive(Debug, Clone)]
pub struct KinematicPredictor {
    config: PredictorConfig,
    history: VecDeque<KinematicState>,
}

impl KinematicPredictor {
    pub fn new(config: PredictorConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            history: VecDeque::with_capacity(config.sequence_length),
            config,
        })
    }

    pub fn is_ready(&self) -> bool {
        self.history.len() >= self.config.sequence_length
    }
}

impl TrajectoryPredictor for KinematicPredictor {
    fn push_state(&mut self, state: &KinematicState) {
        if self.history.len() == self.config.sequence_length {
            self.history.pop_front();
        }
        self.history.push_back(state.clone());
    }

    fn predict(&self) -> Option<Vec<Waypoint>> {
        if !self.is_ready() {
            return None;
        }
        let s = self.history.back()?;

        let trajectory = (1..=self.config.horizon)
            .map(|k| {
                let t = k as f64 * self.config.step;
                Waypoint::new(
                    s.x + s.vx * t + 0.5 * s.ax * t * t,
                    s.y + s.vy * t + 0.5 * s.ay * t * t,
                )
            })
            .collect();
        Some(trajectory)
    }

    fn step(&self) -> f64 {
        self.config.step
    }
}
