//! Warning dissemination policy - online Q-learning
//!
//! Decides WARN or SKIP for each risk record under a per-epoch channel
//! budget. The state is (risk level × channel-load bucket); the Q-table is a
//! fixed 3×3 array of action values.
//!
//! Every WARN consumes channel capacity for the rest of the epoch, so the
//! order of decisions matters: records are decided highest risk first and
//! the counter is reset once per cycle.

use crate::aggregator::RiskRecord;
use crate::config::DisseminationConfig;
use crate::error::ConfigError;
use crate::risk::RiskLevel;
use rand::rngs::StdRng;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, info};
use v2x_env::VehicleId;

/// Dissemination action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Action {
    Warn,
    Skip,
}

impl Action {
    /// Fixed action order; the first wins ties.
    pub const ALL: [Action; 2] = [Action::Warn, Action::Skip];
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Warn => f.write_str("WARN"),
            Action::Skip => f.write_str("SKIP"),
        }
    }
}

/// Channel-load bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LoadBucket {
    Low,
    Med,
    High,
}

impl LoadBucket {
    /// Buckets a load fraction: below 0.4 LOW, below 0.75 MED, else HIGH.
    pub fn from_load(channel_load: f64) -> Self {
        if channel_load < 0.4 {
            LoadBucket::Low
        } else if channel_load < 0.75 {
            LoadBucket::Med
        } else {
            LoadBucket::High
        }
    }

    fn index(&self) -> usize {
        *self as usize
    }
}

/// Discrete policy state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QState {
    pub risk_level: RiskLevel,
    pub load: LoadBucket,
}

impl QState {
    pub fn new(risk_level: RiskLevel, channel_load: f64) -> Self {
        Self {
            risk_level,
            load: LoadBucket::from_load(channel_load),
        }
    }
}

/// Action values of one state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct QValues {
    pub warn: f64,
    pub skip: f64,
}

impl QValues {
    pub fn get(&self, action: Action) -> f64 {
        match action {
            Action::Warn => self.warn,
            Action::Skip => self.skip,
        }
    }

    fn get_mut(&mut self, action: Action) -> &mut f64 {
        match action {
            Action::Warn => &mut self.warn,
            Action::Skip => &mut self.skip,
        }
    }

    /// Greedy action; WARN on ties.
    pub fn best_action(&self) -> Action {
        if self.skip > self.warn {
            Action::Skip
        } else {
            Action::Warn
        }
    }

    pub fn max(&self) -> f64 {
        self.warn.max(self.skip)
    }
}

/// Outcome of one `decide` call.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub action: Action,

    /// State the decision was taken in
    pub state: QState,

    /// Channel load seen by the decision
    pub channel_load: f64,
}

/// A risk record with the decision taken for it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnotatedRecord {
    #[serde(flatten)]
    pub record: RiskRecord,
    pub decision: Decision,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyStats {
    pub total_decisions: u64,
    pub live_warnings: u32,
    pub epsilon: f64,
    pub visited_states: usize,
}

/// ε-greedy Q-learning agent.
#[derive(Debug)]
pub struct DisseminationPolicy {
    config: DisseminationConfig,
    q_table: [[QValues; 3]; 3],
    visited: [[bool; 3]; 3],
    live_warnings: u32,
    total_decisions: u64,
    rng: StdRng,
}

impl DisseminationPolicy {
    /// Creates a policy with all Q-values at zero.
    ///
    /// `rng` drives exploration; seed it for reproducible runs.
    pub fn new(config: DisseminationConfig, rng: StdRng) -> Result<Self, ConfigError> {
        config.validate()?;
        info!(
            "DisseminationPolicy initialised (lr={}, gamma={}, epsilon={}, capacity={})",
            config.learning_rate, config.discount, config.epsilon, config.max_channel_capacity
        );
        Ok(Self {
            config,
            q_table: [[QValues::default(); 3]; 3],
            visited: [[false; 3]; 3],
            live_warnings: 0,
            total_decisions: 0,
            rng,
        })
    }

    /// Fraction of this epoch's capacity already used by warnings.
    pub fn channel_load(&self) -> f64 {
        self.live_warnings as f64 / self.config.max_channel_capacity.max(1) as f64
    }

    /// Warnings issued so far in this epoch.
    pub fn live_warnings(&self) -> u32 {
        self.live_warnings
    }

    /// Picks WARN or SKIP for one record.
    ///
    /// A WARN raises the channel load seen by later decisions in the same
    /// epoch. Once the epoch's capacity is used up every record is skipped,
    /// whatever the Q-table or exploration would pick.
    pub fn decide(&mut self, vehicle_id: &VehicleId, risk_level: RiskLevel, risk_score: f64) -> Decision {
        let channel_load = self.channel_load();
        let state = QState::new(risk_level, channel_load);
        self.mark_visited(state);

        let chosen = if self.rng.gen::<f64>() < self.config.epsilon {
            Action::ALL[self.rng.gen_range(0..Action::ALL.len())]
        } else {
            self.q_values(state).best_action()
        };
        let action = if self.channel_full() { Action::Skip } else { chosen };

        if action == Action::Warn {
            self.live_warnings += 1;
        }
        self.total_decisions += 1;

        debug!(
            "Policy {} -> {} (level={}, score={:.4}, load={:.2})",
            vehicle_id, action, risk_level, risk_score, channel_load
        );

        Decision {
            action,
            state,
            channel_load,
        }
    }

    /// Whether this epoch's warning budget is exhausted.
    pub fn channel_full(&self) -> bool {
        self.live_warnings >= self.config.max_channel_capacity
    }

    /// Q-learning update after observing an outcome.
    ///
    /// `Q(s,a) += lr · (reward + γ · max_a' Q(s',a') - Q(s,a))`
    pub fn update(
        &mut self,
        risk_level: RiskLevel,
        channel_load: f64,
        action: Action,
        reward: f64,
        next_risk_level: RiskLevel,
        next_channel_load: f64,
    ) {
        self.learn(
            QState::new(risk_level, channel_load),
            action,
            reward,
            QState::new(next_risk_level, next_channel_load),
        );
    }

    /// [`Self::update`] on already-bucketed states.
    pub fn learn(&mut self, state: QState, action: Action, reward: f64, next: QState) {
        self.mark_visited(state);
        self.mark_visited(next);

        let next_max = self.q_values(next).max();
        let (lr, gamma) = (self.config.learning_rate, self.config.discount);

        let q = self.q_entry(state).get_mut(action);
        *q += lr * (reward + gamma * next_max - *q);
    }

    /// Decides every record in order.
    pub fn batch_decide(&mut self, records: Vec<RiskRecord>) -> Vec<AnnotatedRecord> {
        records
            .into_iter()
            .map(|record| {
                let decision = self.decide(&record.vehicle_a, record.risk_level, record.risk_score);
                AnnotatedRecord { record, decision }
            })
            .collect()
    }

    /// Starts a new decision epoch.
    pub fn reset_epoch(&mut self) {
        self.live_warnings = 0;
    }

    pub fn q_values(&self, state: QState) -> QValues {
        self.q_table[state.risk_level.index()][state.load.index()]
    }

    pub fn stats(&self) -> PolicyStats {
        PolicyStats {
            total_decisions: self.total_decisions,
            live_warnings: self.live_warnings,
            epsilon: self.config.epsilon,
            visited_states: self.visited.iter().flatten().filter(|&&v| v).count(),
        }
    }

    fn q_entry(&mut self, state: QState) -> &mut QValues {
        &mut self.q_table[state.risk_level.index()][state.load.index()]
    }

    fn mark_visited(&mut self, state: QState) {
        self.visited[state.risk_level.index()][state.load.index()] = true;
    }
}
