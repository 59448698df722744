//! Pairwise risk aggregation across the tracked fleet.

use crate::config::AggregatorConfig;
use crate::error::ConfigError;
use crate::estimator::KinematicState;
use crate::risk::RiskLevel;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;
use uuid::Uuid;
use v2x_env::VehicleId;

/// Closing speeds at or below this (m/s) give an infinite TTC.
const MIN_RELATIVE_SPEED: f64 = 0.1;

/// TTCs at or beyond this score zero.
const SCORE_TTC_CUTOFF: f64 = 100.0;

/// TTCs at or beyond this are not reported.
const REPORTED_TTC_LIMIT: f64 = 1000.0;

/// Rounds to `decimals` places, half away from zero.
pub(crate) fn round_dp(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

/// Collision score in [0, 1] from TTC and separation.
///
/// Non-increasing in both arguments.
pub fn risk_score(ttc: f64, distance: f64) -> f64 {
    if ttc >= SCORE_TTC_CUTOFF {
        return 0.0;
    }
    ((1.0 / (ttc + 0.1)) * (1.0 / (distance + 1.0)) * 50.0).min(1.0)
}

/// Score bands: above 0.7 HIGH, above 0.3 MEDIUM.
pub fn classify_score(score: f64) -> RiskLevel {
    if score > 0.7 {
        RiskLevel::High
    } else if score > 0.3 {
        RiskLevel::Medium
    } else {
        RiskLevel::Low
    }
}

/// One entry of the aggregation snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackedVehicle {
    pub id: VehicleId,
    pub state: KinematicState,
}

impl TrackedVehicle {
    pub fn new(id: impl Into<VehicleId>, state: KinematicState) -> Self {
        Self {
            id: id.into(),
            state,
        }
    }
}

/// Pairwise risk between two vehicles at one instant. Immutable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskRecord {
    pub id: Uuid,
    pub vehicle_a: VehicleId,
    pub vehicle_b: Option<VehicleId>,
    pub distance_m: f64,
    pub relative_speed_mps: f64,
    pub ttc_seconds: Option<f64>,
    pub risk_score: f64,
    pub risk_level: RiskLevel,
    pub timestamp: f64,
}

impl RiskRecord {
    /// Order-independent key of the pair, if the record has two vehicles.
    pub fn pair_key(&self) -> Option<(VehicleId, VehicleId)> {
        let b = self.vehicle_b.as_ref()?;
        Some(sorted_pair(&self.vehicle_a, b))
    }
}

fn sorted_pair(a: &VehicleId, b: &VehicleId) -> (VehicleId, VehicleId) {
    if a <= b {
        (a.clone(), b.clone())
    } else {
        (b.clone(), a.clone())
    }
}

/// Scores every unordered pair within `distance_threshold`.
#[derive(Debug)]
pub struct RiskAggregator {
    config: AggregatorConfig,
    pair_cache: HashMap<(VehicleId, VehicleId), f64>,
}

impl RiskAggregator {
    pub fn new(config: AggregatorConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            pair_cache: HashMap::new(),
        })
    }

    /// Pairwise records for a consistent snapshot, highest score first.
    ///
    /// Pairs farther apart than the threshold are left out entirely.
    pub fn aggregate(&mut self, vehicles: &[TrackedVehicle], timestamp: f64) -> Vec<RiskRecord> {
        let mut records = Vec::new();

        for (i, a) in vehicles.iter().enumerate() {
            for b in &vehicles[i + 1..] {
                if let Some(record) = self.pair_risk(a, b, timestamp) {
                    records.push(record);
                }
            }
        }

        records.sort_by(|x, y| y.risk_score.total_cmp(&x.risk_score));
        debug!(
            "Aggregated {} vehicles into {} risk records",
            vehicles.len(),
            records.len()
        );
        records
    }

    /// Number of pairs ever scored.
    pub fn pair_cache_len(&self) -> usize {
        self.pair_cache.len()
    }

    fn pair_risk(&mut self, a: &TrackedVehicle, b: &TrackedVehicle, timestamp: f64) -> Option<RiskRecord> {
        let (sa, sb) = (&a.state, &b.state);

        let dist = (sa.x - sb.x).hypot(sa.y - sb.y);
        if dist > self.config.distance_threshold {
            return None;
        }

        let rel_speed = (sa.vx - sb.vx).hypot(sa.vy - sb.vy);
        let ttc = if rel_speed > MIN_RELATIVE_SPEED {
            dist / rel_speed
        } else {
            f64::INFINITY
        };

        let score = risk_score(ttc, dist);
        self.pair_cache.insert(sorted_pair(&a.id, &b.id), score);

        Some(RiskRecord {
            id: Uuid::new_v4(),
            vehicle_a: a.id.clone(),
            vehicle_b: Some(b.id.clone()),
            distance_m: round_dp(dist, 2),
            relative_speed_mps: round_dp(rel_speed, 2),
            ttc_seconds: (ttc < REPORTED_TTC_LIMIT).then(|| round_dp(ttc, 2)),
            risk_score: round_dp(score, 4),
            risk_level: classify_score(score),
            timestamp,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn aggregator() -> RiskAggregator {
        RiskAggregator::new(AggregatorConfig::default()).unwrap()
    }

    fn vehicle(id: &str, x: f64, y: f64, vx: f64, vy: f64) -> TrackedVehicle {
        TrackedVehicle::new(id, KinematicState::new(x, y, vx, vy))
    }

    #[test]
    fn test_risk_score_bounds() {
        assert_eq!(risk_score(100.0, 10.0), 0.0);
        assert_eq!(risk_score(f64::INFINITY, 10.0), 0.0);
        assert_eq!(risk_score(0.0, 0.0), 1.0);
        assert_relative_eq!(risk_score(5.0, 50.0), 50.0 / (5.1 * 51.0));
    }

    #[test]
    fn test_classify_score_bands() {
        assert_eq!(classify_score(0.71), RiskLevel::High);
        assert_eq!(classify_score(0.7), RiskLevel::Medium);
        assert_eq!(classify_score(0.31), RiskLevel::Medium);
        assert_eq!(classify_score(0.3), RiskLevel::Low);
    }

    #[test]
    fn test_only_pairs_in_range_are_reported() {
        let mut agg = aggregator();
        let fleet = vec![
            vehicle("A", 0.0, 0.0, 5.0, 0.0),
            vehicle("B", 150.0, 0.0, -5.0, 0.0),
            vehicle("C", 2000.0, 0.0, 0.0, 0.0),
        ];

        let records = agg.aggregate(&fleet, 1.0);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].vehicle_a, VehicleId::from("A"));
        assert_eq!(records[0].vehicle_b, Some(VehicleId::from("B")));
        assert_eq!(agg.pair_cache_len(), 1);
    }

    #[test]
    fn test_threshold_is_inclusive() {
        let mut agg = aggregator();
        let fleet = vec![vehicle("A", 0.0, 0.0, 0.0, 0.0), vehicle("B", 200.0, 0.0, 0.0, 0.0)];
        assert_eq!(agg.aggregate(&fleet, 0.0).len(), 1);
    }

    #[test]
    fn test_head_on_pair() {
        let mut agg = aggregator();
        let fleet = vec![vehicle("A", 0.0, 0.0, 5.0, 0.0), vehicle("B", 50.0, 0.0, -5.0, 0.0)];

        let records = agg.aggregate(&fleet, 12.5);
        let r = &records[0];
        assert_eq!(r.distance_m, 50.0);
        assert_eq!(r.relative_speed_mps, 10.0);
        assert_eq!(r.ttc_seconds, Some(5.0));
        assert_relative_eq!(r.risk_score, 0.1922);
        assert!(r.risk_score > 0.0);
        assert_eq!(r.risk_level, RiskLevel::Low);
        assert_eq!(r.timestamp, 12.5);
    }

    #[test]
    fn test_stationary_pair_has_no_ttc() {
        let mut agg = aggregator();
        let fleet = vec![vehicle("A", 0.0, 0.0, 1.0, 1.0), vehicle("B", 5.0, 0.0, 1.0, 1.0)];

        let r = &agg.aggregate(&fleet, 0.0)[0];
        assert!(r.ttc_seconds.is_none());
        assert_eq!(r.risk_score, 0.0);
        assert_eq!(r.risk_level, RiskLevel::Low);
    }

    #[test]
    fn test_records_sorted_by_score() {
        let mut agg = aggregator();
        let fleet = vec![
            vehicle("A", 0.0, 0.0, 10.0, 0.0),
            vehicle("B", 8.0, 0.0, -10.0, 0.0),
            vehicle("C", 0.0, 120.0, 0.0, 0.0),
            vehicle("D", 60.0, 120.0, 0.0, 0.0),
        ];

        let records = agg.aggregate(&fleet, 0.0);
        assert!(records.len() >= 2);
        for pair in records.windows(2) {
            assert!(pair[0].risk_score >= pair[1].risk_score);
        }
        assert_eq!(records[0].risk_level, RiskLevel::High);
    }

    #[test]
    fn test_pair_key_is_order_independent() {
        let mut agg = aggregator();
        let ab = agg.aggregate(&[vehicle("B", 0.0, 0.0, 0.0, 0.0), vehicle("A", 1.0, 0.0, 0.0, 0.0)], 0.0);
        assert_eq!(
            ab[0].pair_key(),
            Some((VehicleId::from("A"), VehicleId::from("B")))
        );
    }
}
