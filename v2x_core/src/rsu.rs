//! Roadside unit cycle driver.
//!
//! Owns the cycle-global components and runs them once per tick against a
//! consistent snapshot of tracked vehicles:
//!
//! ```text
//! snapshot ─► RiskAggregator ─► records (highest risk first)
//!                                  │
//!                  ┌───────────────┴───────────────┐
//!                  ▼                               ▼
//!        CP-Map.update (A and B)        DisseminationPolicy.decide
//!                                                  │
//!                          learn from last cycle's decisions
//!                                                  │
//!                       CP-Map.decay_all, policy.reset_epoch
//! ```

use crate::aggregator::{RiskAggregator, TrackedVehicle};
use crate::config::PipelineConfig;
use crate::cp_map::{CollisionProbabilityMap, Hotspot};
use crate::dissemination::{Action, AnnotatedRecord, Decision, DisseminationPolicy};
use crate::error::ConfigError;
use crate::estimator::KinematicState;
use crate::projection::LocalTangentPlane;
use crate::risk::RiskLevel;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;
use v2x_env::{V2xContext, VehicleId};

/// RNG stream used for policy exploration.
const POLICY_RNG_STREAM: u64 = 0x5253_5531;

/// Reward for a warning that was followed by a lower score.
pub const REWARD_EFFECTIVE_WARNING: f64 = 1.0;

/// Penalty for warning a LOW-risk pair.
pub const PENALTY_UNNECESSARY_WARNING: f64 = -0.5;

/// Penalty for skipping a pair that became HIGH risk.
pub const PENALTY_MISSED_WARNING: f64 = -1.0;

/// Result of one RSU cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleReport {
    pub cycle: u64,
    pub timestamp: f64,
    pub records: Vec<AnnotatedRecord>,
    pub hotspots: Vec<Hotspot>,
    pub active_cells: usize,
    pub warnings_issued: u32,
    pub evicted_cells: usize,
}

impl CycleReport {
    pub fn warned(&self) -> impl Iterator<Item = &AnnotatedRecord> {
        self.records
            .iter()
            .filter(|r| r.decision.action == Action::Warn)
    }
}

/// A decision awaiting its outcome in the next cycle.
#[derive(Debug, Clone, Copy)]
struct PendingOutcome {
    decision: Decision,
    risk_score: f64,
    risk_level: RiskLevel,
}

/// Reward for last cycle's `action` given the pair's score and level now.
pub fn outcome_reward(
    action: Action,
    warned_level: RiskLevel,
    previous_score: f64,
    score: f64,
    level: RiskLevel,
) -> f64 {
    match action {
        Action::Warn if score < previous_score => REWARD_EFFECTIVE_WARNING,
        Action::Warn if warned_level == RiskLevel::Low => PENALTY_UNNECESSARY_WARNING,
        Action::Skip if level == RiskLevel::High => PENALTY_MISSED_WARNING,
        _ => 0.0,
    }
}

/// One RSU's risk pipeline.
pub struct RsuCycle<Ctx: V2xContext> {
    ctx: Arc<Ctx>,
    projection: LocalTangentPlane,
    aggregator: RiskAggregator,
    cp_map: CollisionProbabilityMap,
    policy: DisseminationPolicy,
    pending: HashMap<(VehicleId, VehicleId), PendingOutcome>,
    cycle: u64,
}

impl<Ctx: V2xContext> RsuCycle<Ctx> {
    pub fn new(ctx: Arc<Ctx>, config: &PipelineConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let aggregator = RiskAggregator::new(config.aggregator.clone())?;
        let cp_map = CollisionProbabilityMap::new(config.cp_map.clone())?;
        let policy = DisseminationPolicy::new(
            config.dissemination.clone(),
            ctx.derive_rng(POLICY_RNG_STREAM),
        )?;

        Ok(Self {
            projection: config.cp_map.reference,
            ctx,
            aggregator,
            cp_map,
            policy,
            pending: HashMap::new(),
            cycle: 0,
        })
    }

    /// Runs aggregation, mapping, dissemination and learning for a snapshot.
    pub fn run_cycle(&mut self, vehicles: &[TrackedVehicle]) -> CycleReport {
        self.cycle += 1;
        let now = self.ctx.now_secs();

        let states: HashMap<&VehicleId, &KinematicState> =
            vehicles.iter().map(|v| (&v.id, &v.state)).collect();

        // 1. Aggregate
        let records = self.aggregator.aggregate(vehicles, now);

        // 2. Map and decide, highest risk first
        let mut annotated = Vec::with_capacity(records.len());
        for record in records {
            for id in std::iter::once(&record.vehicle_a).chain(record.vehicle_b.as_ref()) {
                if let Some(state) = states.get(id) {
                    let (lat, lon) = self.projection.to_latlon(state.x, state.y);
                    self.cp_map.update(id, lat, lon, record.risk_score, now);
                }
            }
            let decision = self
                .policy
                .decide(&record.vehicle_a, record.risk_level, record.risk_score);
            annotated.push(AnnotatedRecord { record, decision });
        }
        let warnings_issued = self.policy.live_warnings();

        // 3. Learn from last cycle's decisions on pairs still reported
        self.learn_from_outcomes(&annotated);

        // 4. Close the epoch
        let evicted_cells = self.cp_map.decay_all(now);
        self.policy.reset_epoch();

        let hotspots = self.cp_map.hotspots(now);
        let active_cells = self.cp_map.active_cells();

        debug!(
            "RSU cycle {} | vehicles={} records={} warnings={} hotspots={} cells={}",
            self.cycle,
            vehicles.len(),
            annotated.len(),
            warnings_issued,
            hotspots.len(),
            active_cells
        );

        CycleReport {
            cycle: self.cycle,
            timestamp: now,
            records: annotated,
            hotspots,
            active_cells,
            warnings_issued,
            evicted_cells,
        }
    }

    fn learn_from_outcomes(&mut self, annotated: &[AnnotatedRecord]) {
        let mut next_pending = HashMap::with_capacity(annotated.len());

        for entry in annotated {
            let Some(key) = entry.record.pair_key() else {
                continue;
            };
            if let Some(prev) = self.pending.get(&key) {
                let reward = outcome_reward(
                    prev.decision.action,
                    prev.risk_level,
                    prev.risk_score,
                    entry.record.risk_score,
                    entry.record.risk_level,
                );
                self.policy
                    .learn(prev.decision.state, prev.decision.action, reward, entry.decision.state);
            }
            next_pending.insert(
                key,
                PendingOutcome {
                    decision: entry.decision,
                    risk_score: entry.record.risk_score,
                    risk_level: entry.record.risk_level,
                },
            );
        }

        self.pending = next_pending;
    }

    pub fn cycle(&self) -> u64 {
        self.cycle
    }

    pub fn cp_map(&self) -> &CollisionProbabilityMap {
        &self.cp_map
    }

    pub fn policy(&self) -> &DisseminationPolicy {
        &self.policy
    }

    pub fn aggregator(&self) -> &RiskAggregator {
        &self.aggregator
    }

    pub fn projection(&self) -> &LocalTangentPlane {
        &self.projection
    }

    pub fn context(&self) -> &Arc<Ctx> {
        &self.ctx
    }
}
