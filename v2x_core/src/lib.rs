//! V2X Core - Real-Time Collision Risk Pipeline
//!
//! The pipeline runs once per ~100 ms tick:
//! 1. **Fusion**: each OBU fuses GPS/IMU/radar into a kinematic state (EKF)
//! 2. **Assessment**: predicted trajectories and radar closure give a TTC and risk level
//! 3. **Aggregation**: the RSU scores every vehicle pair in range
//! 4. **Mapping**: pair risk is deposited into a decaying spatial grid (CP-Map)
//! 5. **Dissemination**: a Q-learning policy decides whom to warn under a channel budget
//!
//! All state is owned by explicit instances: one [`StateEstimator`] per
//! vehicle, one aggregator, map and policy per RSU, driven by [`RsuCycle`].

pub mod aggregator;
pub mod config;
pub mod cp_map;
pub mod dissemination;
pub mod error;
pub mod estimator;
pub mod obu;
pub mod prediction;
pub mod projection;
pub mod risk;
pub mod rsu;

// Re-export key types for convenience
pub use aggregator::{classify_score, risk_score, RiskAggregator, RiskRecord, TrackedVehicle};
pub use config::{
    AggregatorConfig, AssessorConfig, CpMapConfig, DisseminationConfig, EstimatorConfig,
    PipelineConfig, PredictorConfig,
};
pub use cp_map::{CellKey, CollisionProbabilityMap, GridCell, Hotspot};
pub use dissemination::{
    Action, AnnotatedRecord, Decision, DisseminationPolicy, LoadBucket, PolicyStats, QState,
    QValues,
};
pub use error::ConfigError;
pub use estimator::{KinematicState, SensorObservation, StateEstimator};
pub use obu::{ObuReport, OnboardUnit};
pub use prediction::{KinematicPredictor, TrajectoryPredictor};
pub use projection::LocalTangentPlane;
pub use risk::{segment_intersection, CollisionAssessment, CollisionRiskAssessor, RiskLevel, Waypoint};
pub use rsu::{CycleReport, RsuCycle};
