//! Traffic scenarios for the simulator.

use crate::oracle::{NoiseModel, Oracle};
use nalgebra::Vector2;

/// Scenario identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScenarioId {
    /// SIM-001: two vehicles closing head-on
    HeadOn,

    /// SIM-002: perpendicular approach to a crossing point
    Intersection,

    /// SIM-003: convoy at matched speed, no conflict
    Platoon,

    /// SIM-004: dense cluster overloading the warning channel
    ChannelSaturation,

    /// SIM-005: half of all observations lost
    SensorDropout,

    /// SIM-006: full OBU loop over simulated sensor drivers
    ObuLoop,
}

impl ScenarioId {
    /// Returns a list of all scenarios.
    pub fn all() -> Vec<ScenarioId> {
        vec![
            ScenarioId::HeadOn,
            ScenarioId::Intersection,
            ScenarioId::Platoon,
            ScenarioId::ChannelSaturation,
            ScenarioId::SensorDropout,
            ScenarioId::ObuLoop,
        ]
    }

    /// Returns the scenario name.
    pub fn name(&self) -> &'static str {
        match self {
            ScenarioId::HeadOn => "head_on",
            ScenarioId::Intersection => "intersection",
            ScenarioId::Platoon => "platoon",
            ScenarioId::ChannelSaturation => "channel_saturation",
            ScenarioId::SensorDropout => "sensor_dropout",
            ScenarioId::ObuLoop => "obu_loop",
        }
    }

    /// Returns a description of the scenario.
    pub fn description(&self) -> &'static str {
        match self {
            ScenarioId::HeadOn => "Two vehicles at 10 m/s each, 120 m apart, same lane",
            ScenarioId::Intersection => "Two vehicles converging on a crossing at right angles",
            ScenarioId::Platoon => "Five vehicles 20 m apart at 15 m/s, verify no HIGH alarms",
            ScenarioId::ChannelSaturation => "20 vehicles in a tight cluster, 190 pairs per cycle",
            ScenarioId::SensorDropout => "50% observation loss, verify fused tracks stay within 5 m",
            ScenarioId::ObuLoop => "Four OBUs on simulated GPS/IMU/radar feeding one RSU",
        }
    }

    /// Time at which ground-truth paths meet, for conflict scenarios.
    pub fn conflict_time_secs(&self) -> Option<f64> {
        match self {
            ScenarioId::HeadOn => Some(6.0),
            ScenarioId::Intersection => Some(8.0),
            _ => None,
        }
    }

    /// Sensor noise used by the scenario.
    pub fn noise(&self) -> NoiseModel {
        match self {
            ScenarioId::SensorDropout => NoiseModel {
                dropout_probability: 0.5,
                ..NoiseModel::default()
            },
            _ => NoiseModel::default(),
        }
    }

    /// Whether vehicles come from OBUs instead of the oracle.
    pub fn uses_obus(&self) -> bool {
        matches!(self, ScenarioId::ObuLoop)
    }

    /// Spawns the scenario's vehicles.
    pub fn populate(&self, oracle: &mut Oracle) {
        match self {
            ScenarioId::HeadOn => {
                oracle.spawn_vehicle(Vector2::new(-60.0, 40.0), Vector2::new(10.0, 0.0));
                oracle.spawn_vehicle(Vector2::new(60.0, 40.0), Vector2::new(-10.0, 0.0));
            }
            ScenarioId::Intersection => {
                oracle.spawn_vehicle(Vector2::new(-80.0, 30.0), Vector2::new(10.0, 0.0));
                oracle.spawn_vehicle(Vector2::new(0.0, -50.0), Vector2::new(0.0, 10.0));
            }
            ScenarioId::Platoon => {
                for i in 0..5 {
                    let x = -150.0 + 20.0 * i as f64;
                    oracle.spawn_vehicle(Vector2::new(x, 50.0), Vector2::new(15.0, 0.0));
                }
            }
            ScenarioId::ChannelSaturation => {
                let centre = Vector2::new(50.0, 50.0);
                for row in 0..4 {
                    for col in 0..5 {
                        let position =
                            centre + Vector2::new((col as f64 - 2.0) * 15.0, (row as f64 - 1.5) * 15.0);
                        // Drift towards the centre, halving the spread in 10 s
                        let velocity = (centre - position) * 0.05;
                        oracle.spawn_vehicle(position, velocity);
                    }
                }
            }
            ScenarioId::SensorDropout => {
                oracle.spawn_vehicle(Vector2::new(-50.0, 20.0), Vector2::new(5.0, 0.0));
                oracle.spawn_vehicle(Vector2::new(50.0, -20.0), Vector2::new(-5.0, 0.0));
                oracle.spawn_vehicle(Vector2::new(20.0, 60.0), Vector2::new(0.0, -4.0));
                let braking = oracle.spawn_vehicle(Vector2::new(-30.0, -60.0), Vector2::new(3.0, 4.0));
                oracle.set_acceleration(&braking, Vector2::new(-0.15, -0.2));
            }
            ScenarioId::ObuLoop => {}
        }
    }
}

impl std::fmt::Display for ScenarioId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for ScenarioId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "head_on" | "headon" | "sim-001" => Ok(ScenarioId::HeadOn),
            "intersection" | "sim-002" => Ok(ScenarioId::Intersection),
            "platoon" | "sim-003" => Ok(ScenarioId::Platoon),
            "channel_saturation" | "channelsaturation" | "sim-004" => {
                Ok(ScenarioId::ChannelSaturation)
            }
            "sensor_dropout" | "sensordropout" | "sim-005" => Ok(ScenarioId::SensorDropout),
            "obu_loop" | "obuloop" | "sim-006" => Ok(ScenarioId::ObuLoop),
            _ => Err(format!("Unknown scenario: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_round_trip() {
        for scenario in ScenarioId::all() {
            assert_eq!(scenario.name().parse::<ScenarioId>(), Ok(scenario));
        }
        assert_eq!("SIM-002".parse::<ScenarioId>(), Ok(ScenarioId::Intersection));
        assert!("split_brain".parse::<ScenarioId>().is_err());
    }

    #[test]
    fn test_populate_counts() {
        let mut oracle = Oracle::new(1);
        ScenarioId::ChannelSaturation.populate(&mut oracle);
        assert_eq!(oracle.active_vehicles().len(), 20);

        let mut oracle = Oracle::new(1);
        ScenarioId::ObuLoop.populate(&mut oracle);
        assert!(oracle.active_vehicles().is_empty());
    }

    #[test]
    fn test_head_on_paths_meet_at_conflict_time() {
        let mut oracle = Oracle::new(1);
        ScenarioId::HeadOn.populate(&mut oracle);
        let t = ScenarioId::HeadOn.conflict_time_secs().unwrap();
        for _ in 0..(t * 10.0) as usize {
            oracle.step(0.1);
        }
        let truth = oracle.ground_truth();
        let gap = (truth[0].1.x - truth[1].1.x).abs();
        assert!(gap < 1e-6);
    }
}
