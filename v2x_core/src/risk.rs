//! Collision risk assessment
//!
//! Time-to-collision from predicted trajectories (proximity and segment
//! intersection), from radar closure rate, and from the analytic
//! two-disc model.

use crate::config::AssessorConfig;
use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::info;

/// Denominators below this are treated as parallel segments.
const PARALLEL_EPSILON: f64 = 1e-10;

/// Closure rates slower than this (m/s) are not "approaching".
const MIN_CLOSING_SPEED: f64 = 0.1;

/// Risk classification, ordered so that `High` is the worst.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    pub const ALL: [RiskLevel; 3] = [RiskLevel::Low, RiskLevel::Medium, RiskLevel::High];

    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "LOW",
            RiskLevel::Medium => "MEDIUM",
            RiskLevel::High => "HIGH",
        }
    }

    /// Dense index for table lookups.
    pub fn index(&self) -> usize {
        *self as usize
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A point of a predicted trajectory in local metres.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Waypoint {
    pub x: f64,
    pub y: f64,
}

impl Waypoint {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance_to(&self, other: &Waypoint) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }

    fn midpoint(&self, other: &Waypoint) -> Waypoint {
        Waypoint::new((self.x + other.x) / 2.0, (self.y + other.y) / 2.0)
    }
}

/// Result of a single risk evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollisionAssessment {
    pub risk_level: RiskLevel,

    /// None when no collision path was found
    pub ttc_seconds: Option<f64>,

    /// Closest approach; infinite when nothing was compared
    pub min_distance_m: f64,

    pub intersection_point: Option<Waypoint>,

    pub details: String,
}

impl CollisionAssessment {
    fn clear() -> Self {
        Self {
            risk_level: RiskLevel::Low,
            ttc_seconds: None,
            min_distance_m: f64::INFINITY,
            intersection_point: None,
            details: "No collision risk detected".to_string(),
        }
    }
}

/// Intersection of segment p1→p2 with segment p3→p4, if any.
pub fn segment_intersection(
    p1: &Waypoint,
    p2: &Waypoint,
    p3: &Waypoint,
    p4: &Waypoint,
) -> Option<Waypoint> {
    let (x1, y1, x2, y2) = (p1.x, p1.y, p2.x, p2.y);
    let (x3, y3, x4, y4) = (p3.x, p3.y, p4.x, p4.y);

    let denom = (x1 - x2) * (y3 - y4) - (y1 - y2) * (x3 - x4);
    if denom.abs() < PARALLEL_EPSILON {
        return None;
    }

    let t = ((x1 - x3) * (y3 - y4) - (y1 - y3) * (x3 - x4)) / denom;
    let u = -((x1 - x2) * (y1 - y3) - (y1 - y2) * (x1 - x3)) / denom;

    if (0.0..=1.0).contains(&t) && (0.0..=1.0).contains(&u) {
        Some(Waypoint::new(x1 + t * (x2 - x1), y1 + t * (y2 - y1)))
    } else {
        None
    }
}

/// Evaluates collision risk against configured TTC thresholds.
///
/// Stateless apart from its thresholds.
#[derive(Debug, Clone)]
pub struct CollisionRiskAssessor {
    config: AssessorConfig,
}

impl CollisionRiskAssessor {
    pub fn new(config: AssessorConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        info!(
            "CollisionRiskAssessor - TTC thresholds: HIGH<={:.1}s, MEDIUM<={:.1}s",
            config.ttc_high, config.ttc_medium
        );
        Ok(Self { config })
    }

    pub fn config(&self) -> &AssessorConfig {
        &self.config
    }

    /// Worst-case assessment of `ego` against every other trajectory.
    ///
    /// Trajectories are compared index by index over their common prefix,
    /// `dt` seconds apart. The candidate with the smallest closest
    /// approach wins.
    pub fn assess(
        &self,
        ego: &[Waypoint],
        others: &[Vec<Waypoint>],
        dt: f64,
    ) -> CollisionAssessment {
        let mut worst = CollisionAssessment::clear();

        for (idx, other) in others.iter().enumerate() {
            let mut result = self.evaluate_pair(ego, other, dt);
            if result.min_distance_m < worst.min_distance_m {
                result.details = format!("Closest threat: vehicle #{}", idx);
                worst = result;
            }
        }

        worst
    }

    /// Quick check from radar range and range rate (negative = approaching).
    pub fn assess_radar(&self, distance_m: f64, relative_velocity: f64) -> CollisionAssessment {
        let ttc = if relative_velocity < -MIN_CLOSING_SPEED {
            Some((distance_m / relative_velocity).abs())
        } else {
            None
        };

        let details = match ttc {
            Some(t) => format!("Radar: dist={:.1}m, TTC={:.1}s", distance_m, t),
            None => "No approach".to_string(),
        };

        CollisionAssessment {
            risk_level: self.classify(ttc, distance_m),
            ttc_seconds: ttc,
            min_distance_m: distance_m,
            intersection_point: None,
            details,
        }
    }

    /// Maps (ttc, closest approach) to a level. Both thresholds are inclusive.
    pub fn classify(&self, ttc: Option<f64>, min_distance: f64) -> RiskLevel {
        if let Some(t) = ttc {
            if t <= self.config.ttc_high {
                return RiskLevel::High;
            }
            if t <= self.config.ttc_medium {
                return RiskLevel::Medium;
            }
        }
        if min_distance < self.config.min_distance_alert {
            // Close but not closing
            return RiskLevel::Medium;
        }
        RiskLevel::Low
    }

    /// Two-disc TTC with the configured vehicle radius.
    pub fn ttc_between(
        &self,
        pos_ego: (f64, f64),
        vel_ego: (f64, f64),
        pos_other: (f64, f64),
        vel_other: (f64, f64),
    ) -> Option<f64> {
        Self::compute_ttc(pos_ego, vel_ego, pos_other, vel_other, self.config.vehicle_radius)
    }

    /// Earliest positive time at which two discs of `radius` touch under
    /// constant velocity.
    pub fn compute_ttc(
        pos_ego: (f64, f64),
        vel_ego: (f64, f64),
        pos_other: (f64, f64),
        vel_other: (f64, f64),
        radius: f64,
    ) -> Option<f64> {
        let dx = pos_other.0 - pos_ego.0;
        let dy = pos_other.1 - pos_ego.1;
        let dvx = vel_other.0 - vel_ego.0;
        let dvy = vel_other.1 - vel_ego.1;

        let a = dvx * dvx + dvy * dvy;
        if a < PARALLEL_EPSILON {
            return None;
        }
        let b = 2.0 * (dx * dvx + dy * dvy);
        let c = dx * dx + dy * dy - (2.0 * radius).powi(2);

        let disc = b * b - 4.0 * a * c;
        if disc < 0.0 {
            return None;
        }

        let sqrt_disc = disc.sqrt();
        let t1 = (-b - sqrt_disc) / (2.0 * a);
        let t2 = (-b + sqrt_disc) / (2.0 * a);

        // t1 <= t2 since a > 0
        [t1, t2].into_iter().find(|&t| t > 0.0)
    }

    fn evaluate_pair(&self, a: &[Waypoint], b: &[Waypoint], dt: f64) -> CollisionAssessment {
        let n = a.len().min(b.len());
        let mut min_dist = f64::INFINITY;
        let mut ttc: Option<f64> = None;
        let mut intersection: Option<Waypoint> = None;

        for i in 0..n {
            let dist = a[i].distance_to(&b[i]);
            if dist < min_dist {
                min_dist = dist;
                if dist < self.config.min_distance_alert && ttc.is_none() {
                    ttc = Some(i as f64 * dt);
                    intersection = Some(a[i].midpoint(&b[i]));
                }
            }
        }

        // Segment crossings catch paths that pass between samples
        for i in 0..n.saturating_sub(1) {
            if let Some(pt) = segment_intersection(&a[i], &a[i + 1], &b[i], &b[i + 1]) {
                let t = i as f64 * dt;
                if ttc.map_or(true, |current| t < current) {
                    ttc = Some(t);
                    intersection = Some(pt);
                }
            }
        }

        CollisionAssessment {
            risk_level: self.classify(ttc, min_dist),
            ttc_seconds: ttc,
            min_distance_m: min_dist,
            intersection_point: intersection,
            details: String::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn assessor() -> CollisionRiskAssessor {
        CollisionRiskAssessor::new(AssessorConfig::default()).unwrap()
    }

    fn line(start: (f64, f64), step: (f64, f64), n: usize) -> Vec<Waypoint> {
        (0..n)
            .map(|i| Waypoint::new(start.0 + step.0 * i as f64, start.1 + step.1 * i as f64))
            .collect()
    }

    #[test]
    fn test_risk_level_ordering() {
        assert!(RiskLevel::High > RiskLevel::Medium);
        assert!(RiskLevel::Medium > RiskLevel::Low);
        assert_eq!(RiskLevel::Medium.to_string(), "MEDIUM");
    }

    #[test]
    fn test_crossing_segments_intersect() {
        let pt = segment_intersection(
            &Waypoint::new(0.0, 0.0),
            &Waypoint::new(10.0, 10.0),
            &Waypoint::new(0.0, 10.0),
            &Waypoint::new(10.0, 0.0),
        )
        .unwrap();
        assert_relative_eq!(pt.x, 5.0, epsilon = 1e-9);
        assert_relative_eq!(pt.y, 5.0, epsilon = 1e-9);
    }

    #[test]
    fn test_parallel_segments_do_not_intersect() {
        let pt = segment_intersection(
            &Waypoint::new(0.0, 0.0),
            &Waypoint::new(10.0, 0.0),
            &Waypoint::new(0.0, 5.0),
            &Waypoint::new(10.0, 5.0),
        );
        assert!(pt.is_none());
    }

    #[test]
    fn test_disjoint_segments_do_not_intersect() {
        // Lines cross at (5, 5) but the segments stop short of it
        let pt = segment_intersection(
            &Waypoint::new(0.0, 0.0),
            &Waypoint::new(2.0, 2.0),
            &Waypoint::new(0.0, 10.0),
            &Waypoint::new(2.0, 8.0),
        );
        assert!(pt.is_none());
    }

    #[test]
    fn test_compute_ttc_closing_discs() {
        let ttc = CollisionRiskAssessor::compute_ttc(
            (0.0, 0.0),
            (5.0, 0.0),
            (100.0, 0.0),
            (-5.0, 0.0),
            3.0,
        )
        .unwrap();
        assert_relative_eq!(ttc, 9.4, epsilon = 1e-9);
    }

    #[test]
    fn test_compute_ttc_separating_discs() {
        let ttc =
            CollisionRiskAssessor::compute_ttc((0.0, 0.0), (-5.0, 0.0), (100.0, 0.0), (5.0, 0.0), 3.0);
        assert!(ttc.is_none());
    }

    #[test]
    fn test_compute_ttc_degenerate_cases() {
        // Same velocity
        assert!(
            CollisionRiskAssessor::compute_ttc((0.0, 0.0), (3.0, 1.0), (50.0, 0.0), (3.0, 1.0), 3.0)
                .is_none()
        );
        // Passing wide
        assert!(
            CollisionRiskAssessor::compute_ttc((0.0, 0.0), (10.0, 0.0), (100.0, 50.0), (0.0, 0.0), 3.0)
                .is_none()
        );
    }

    #[test]
    fn test_classify_boundaries() {
        let a = assessor();
        assert_eq!(a.classify(Some(2.0), 100.0), RiskLevel::High);
        assert_eq!(a.classify(Some(5.0), 100.0), RiskLevel::Medium);
        assert_eq!(a.classify(Some(5.01), 100.0), RiskLevel::Low);
        assert_eq!(a.classify(None, 9.9), RiskLevel::Medium);
        assert_eq!(a.classify(None, 10.0), RiskLevel::Low);
    }

    #[test]
    fn test_assess_radar() {
        let a = assessor();

        let approaching = a.assess_radar(15.0, -10.0);
        assert_eq!(approaching.ttc_seconds, Some(1.5));
        assert_eq!(approaching.risk_level, RiskLevel::High);

        let receding = a.assess_radar(15.0, 2.0);
        assert!(receding.ttc_seconds.is_none());
        assert_eq!(receding.risk_level, RiskLevel::Low);
        assert_eq!(receding.details, "No approach");
    }

    #[test]
    fn test_assess_without_neighbours_is_low() {
        let a = assessor();
        let ego = line((0.0, 0.0), (1.0, 0.0), 50);

        let result = a.assess(&ego, &[], 0.1);
        assert_eq!(result.risk_level, RiskLevel::Low);
        assert!(result.ttc_seconds.is_none());
        assert!(result.min_distance_m.is_infinite());
    }

    #[test]
    fn test_assess_crossing_paths() {
        let a = assessor();
        // Fast crossing: samples never come within 10 m, segments 2 cross at the origin
        let ego = line((-50.0, 0.0), (20.0, 0.0), 6);
        let other = line((0.0, 50.0), (0.0, -20.0), 6);

        let result = a.assess(&ego, &[other], 0.1);
        assert!(result.min_distance_m > 10.0);
        assert_relative_eq!(result.ttc_seconds.unwrap(), 0.2, epsilon = 1e-9);
        let pt = result.intersection_point.unwrap();
        assert_relative_eq!(pt.x, 0.0, epsilon = 1e-9);
        assert_relative_eq!(pt.y, 0.0, epsilon = 1e-9);
        assert_eq!(result.risk_level, RiskLevel::High);
        assert_eq!(result.details, "Closest threat: vehicle #0");
    }

    #[test]
    fn test_assess_proximity_sets_ttc() {
        let a = assessor();
        // Head-on along the x axis, closing 2 m per step
        let ego = line((0.0, 0.0), (1.0, 0.0), 50);
        let other = line((40.0, 0.5), (-1.0, 0.0), 50);

        let result = a.assess(&ego, &[other], 0.1);
        // Pointwise distance first drops below 10 m at index 16
        let ttc = result.ttc_seconds.unwrap();
        assert!(ttc <= 1.6 + 1e-9);
        assert_eq!(result.risk_level, RiskLevel::High);
    }

    #[test]
    fn test_assess_picks_closest_candidate() {
        let a = assessor();
        let ego = line((0.0, 0.0), (1.0, 0.0), 20);
        let far = line((0.0, 80.0), (1.0, 0.0), 20);
        let near = line((0.0, 20.0), (1.0, 0.0), 20);

        let result = a.assess(&ego, &[far, near], 0.1);
        assert_relative_eq!(result.min_distance_m, 20.0);
        assert_eq!(result.details, "Closest threat: vehicle #1");
        assert_eq!(result.risk_level, RiskLevel::Low);
    }
}
