//! Component configuration.
//!
//! Every struct is bound once at construction and validated there; a bad
//! value is a deployment defect and fails fast with [`ConfigError`].

use crate::error::ConfigError;
use crate::projection::LocalTangentPlane;
use serde::{Deserialize, Serialize};

/// Configuration for the [`crate::StateEstimator`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EstimatorConfig {
    /// Base process noise; acceleration terms use twice this
    /// Default: 0.1
    pub process_noise: f64,

    /// Position (GPS) measurement noise, metres²
    /// Default: 1.0
    pub measurement_noise_gps: f64,

    /// Acceleration (IMU) measurement noise
    /// Default: 0.5
    pub measurement_noise_imu: f64,

    /// Range (radar) measurement noise
    /// Default: 2.0
    pub measurement_noise_radar: f64,

    /// Diagonal of the initial covariance
    /// Default: 10.0
    pub initial_uncertainty: f64,

    /// Projection used for position fixes
    pub reference: LocalTangentPlane,
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            process_noise: 0.1,
            measurement_noise_gps: 1.0,
            measurement_noise_imu: 0.5,
            measurement_noise_radar: 2.0,
            initial_uncertainty: 10.0,
            reference: LocalTangentPlane::default(),
        }
    }
}

impl EstimatorConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        ConfigError::ensure_positive("process_noise", self.process_noise)?;
        ConfigError::ensure_positive("measurement_noise_gps", self.measurement_noise_gps)?;
        ConfigError::ensure_positive("measurement_noise_imu", self.measurement_noise_imu)?;
        ConfigError::ensure_positive("measurement_noise_radar", self.measurement_noise_radar)?;
        ConfigError::ensure_positive("initial_uncertainty", self.initial_uncertainty)
    }
}

/// Configuration for the [`crate::CollisionRiskAssessor`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssessorConfig {
    /// TTC at or below which risk is HIGH (seconds)
    /// Default: 2.0
    pub ttc_high: f64,

    /// TTC at or below which risk is MEDIUM (seconds)
    /// Default: 5.0
    pub ttc_medium: f64,

    /// Closest approach that alone raises MEDIUM (metres)
    /// Default: 10.0
    pub min_distance_alert: f64,

    /// Vehicle disc radius used by `compute_ttc` (metres)
    /// Default: 3.0
    pub vehicle_radius: f64,
}

impl Default for AssessorConfig {
    fn default() -> Self {
        Self {
            ttc_high: 2.0,
            ttc_medium: 5.0,
            min_distance_alert: 10.0,
            vehicle_radius: 3.0,
        }
    }
}

impl AssessorConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        ConfigError::ensure_positive("ttc_high", self.ttc_high)?;
        ConfigError::ensure_positive("ttc_medium", self.ttc_medium)?;
        ConfigError::ensure_positive("min_distance_alert", self.min_distance_alert)?;
        ConfigError::ensure_positive("vehicle_radius", self.vehicle_radius)?;
        if self.ttc_high > self.ttc_medium {
            return Err(ConfigError::InvalidOrdering {
                lower: "ttc_high",
                lower_value: self.ttc_high,
                upper: "ttc_medium",
                upper_value: self.ttc_medium,
            });
        }
        Ok(())
    }
}

/// Configuration for the [`crate::RiskAggregator`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregatorConfig {
    /// Pairs farther apart than this are not reported (metres)
    /// Default: 200.0
    pub distance_threshold: f64,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            distance_threshold: 200.0,
        }
    }
}

impl AggregatorConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        ConfigError::ensure_positive("distance_threshold", self.distance_threshold)
    }
}

/// Configuration for the [`crate::CollisionProbabilityMap`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CpMapConfig {
    /// Cell edge length (metres)
    /// Default: 50.0
    pub grid_size: f64,

    /// Exponential decay rate (1/s)
    /// Default: 0.05
    pub decay_rate: f64,

    /// Score a cell must exceed to be reported as a hotspot
    /// Default: 0.3
    pub hotspot_threshold: f64,

    /// Projection used for cell keys
    pub reference: LocalTangentPlane,
}

impl Default for CpMapConfig {
    fn default() -> Self {
        Self {
            grid_size: 50.0,
            decay_rate: 0.05,
            hotspot_threshold: 0.3,
            reference: LocalTangentPlane::default(),
        }
    }
}

impl CpMapConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        ConfigError::ensure_positive("grid_size", self.grid_size)?;
        ConfigError::ensure_range("decay_rate", self.decay_rate, 0.0, f64::MAX)?;
        ConfigError::ensure_range("hotspot_threshold", self.hotspot_threshold, 0.0, 1.0)
    }
}

/// Configuration for the [`crate::DisseminationPolicy`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DisseminationConfig {
    /// Default: 0.1
    pub learning_rate: f64,

    /// Default: 0.95
    pub discount: f64,

    /// Exploration probability
    /// Default: 0.15
    pub epsilon: f64,

    /// Warnings the channel can carry per decision epoch
    /// Default: 50
    pub max_channel_capacity: u32,
}

impl Default for DisseminationConfig {
    fn default() -> Self {
        Self {
            learning_rate: 0.1,
            discount: 0.95,
            epsilon: 0.15,
            max_channel_capacity: 50,
        }
    }
}

impl DisseminationConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        ConfigError::ensure_positive("learning_rate", self.learning_rate)?;
        ConfigError::ensure_range("learning_rate", self.learning_rate, 0.0, 1.0)?;
        ConfigError::ensure_range("discount", self.discount, 0.0, 1.0)?;
        ConfigError::ensure_range("epsilon", self.epsilon, 0.0, 1.0)?;
        if self.max_channel_capacity == 0 {
            return Err(ConfigError::ZeroCapacity);
        }
        Ok(())
    }
}

/// Configuration for the [`crate::KinematicPredictor`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PredictorConfig {
    /// States buffered before the first prediction
    /// Default: 20
    pub sequence_length: usize,

    /// Waypoints per predicted trajectory
    /// Default: 50 (5 s at 10 Hz)
    pub horizon: usize,

    /// Spacing between waypoints (seconds)
    /// Default: 0.1
    pub step: f64,
}

impl Default for PredictorConfig {
    fn default() -> Self {
        Self {
            sequence_length: 20,
            horizon: 50,
            step: 0.1,
        }
    }
}

impl PredictorConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        ConfigError::ensure_positive("sequence_length", self.sequence_length as f64)?;
        ConfigError::ensure_positive("horizon", self.horizon as f64)?;
        ConfigError::ensure_positive("step", self.step)
    }
}

/// Everything one deployment needs, loadable from JSON.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub estimator: EstimatorConfig,
    pub assessor: AssessorConfig,
    pub aggregator: AggregatorConfig,
    pub cp_map: CpMapConfig,
    pub dissemination: DisseminationConfig,
    pub predictor: PredictorConfig,
}

impl PipelineConfig {
    /// Parses and validates a JSON document. Missing fields take defaults.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.estimator.validate()?;
        self.assessor.validate()?;
        self.aggregator.validate()?;
        self.cp_map.validate()?;
        self.dissemination.validate()?;
        self.predictor.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(PipelineConfig::default().validate().is_ok());
    }

    #[test]
    fn test_partial_json_falls_back_to_defaults() {
        let config =
            PipelineConfig::from_json(r#"{ "cp_map": { "grid_size": 25.0 }, "dissemination": { "epsilon": 0.0 } }"#)
                .unwrap();

        assert_eq!(config.cp_map.grid_size, 25.0);
        assert_eq!(config.cp_map.decay_rate, 0.05);
        assert_eq!(config.dissemination.epsilon, 0.0);
        assert_eq!(config.dissemination.max_channel_capacity, 50);
        assert_eq!(config.assessor, AssessorConfig::default());
    }

    #[test]
    fn test_json_rejects_invalid_values() {
        let err = PipelineConfig::from_json(r#"{ "dissemination": { "max_channel_capacity": 0 } }"#)
            .unwrap_err();
        assert!(matches!(err, ConfigError::ZeroCapacity));

        let err = PipelineConfig::from_json("{\n  \"estimator\": { not json").unwrap_err();
        match err {
            ConfigError::Parse(source) => {
                assert_eq!(source.line(), 2);
                assert!(source.column() > 0);
            }
            other => panic!("expected a parse error, got {:?}", other),
        }
    }

    #[test]
    fn test_ttc_thresholds_must_be_ordered() {
        let config = AssessorConfig {
            ttc_high: 6.0,
            ..AssessorConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidOrdering { .. })
        ));
    }

    #[test]
    fn test_negative_decay_rejected() {
        let config = CpMapConfig {
            decay_rate: -0.1,
            ..CpMapConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::OutOfRange { .. })));
    }
}
