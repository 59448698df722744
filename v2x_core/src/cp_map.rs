//! Collision Probability Map (CP-Map)
//!
//! A sparse grid over the local tangent plane where each cell accumulates
//! collision risk that decays exponentially with time. Cells are created on
//! first contribution and evicted once their score falls below
//! [`EVICTION_THRESHOLD`].
//!
//! Time is explicit: every time-dependent call takes `now` in seconds from
//! the caller's context.

use crate::aggregator::round_dp;
use crate::config::CpMapConfig;
use crate::error::ConfigError;
use crate::projection::LocalTangentPlane;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use tracing::{debug, info};
use v2x_env::VehicleId;

/// Cells whose score drops below this are evicted by `decay_all`.
pub const EVICTION_THRESHOLD: f64 = 0.01;

/// Fraction of a record's risk score deposited per update.
const DEPOSIT_FACTOR: f64 = 0.3;

/// Cell index as (row, col).
pub type CellKey = (i64, i64);

/// One occupied grid cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridCell {
    /// Stored score in [0, 1], valid as of `updated_at`
    pub score: f64,
    pub updated_at: f64,
    pub vehicles: BTreeSet<VehicleId>,
}

impl GridCell {
    fn decayed(&self, decay_rate: f64, now: f64) -> f64 {
        let elapsed = (now - self.updated_at).max(0.0);
        self.score * (-decay_rate * elapsed).exp()
    }
}

/// A cell whose decayed score exceeded the query threshold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hotspot {
    pub cell: CellKey,
    pub risk_score: f64,
    pub vehicles: Vec<VehicleId>,
}

/// Decaying spatial risk grid.
#[derive(Debug, Clone)]
pub struct CollisionProbabilityMap {
    config: CpMapConfig,
    projection: LocalTangentPlane,
    cells: HashMap<CellKey, GridCell>,
}

impl CollisionProbabilityMap {
    pub fn new(config: CpMapConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        info!(
            "CP-Map initialised (cell={:.0}m, decay={:.3}/s)",
            config.grid_size, config.decay_rate
        );
        Ok(Self {
            projection: config.reference,
            config,
            cells: HashMap::new(),
        })
    }

    pub fn config(&self) -> &CpMapConfig {
        &self.config
    }

    /// Cell containing (lat, lon).
    pub fn cell_for(&self, lat: f64, lon: f64) -> CellKey {
        let (x, y) = self.projection.to_local(lat, lon);
        let col = (x / self.config.grid_size).floor() as i64;
        let row = (y / self.config.grid_size).floor() as i64;
        (row, col)
    }

    /// Deposits 30% of `risk_score` into the cell at (lat, lon).
    ///
    /// The deposit is added to the stored score as of its last update, not
    /// to the decayed value; callers run [`Self::decay_all`] once per cycle
    /// to keep stored scores current.
    pub fn update(&mut self, vehicle_id: &VehicleId, lat: f64, lon: f64, risk_score: f64, now: f64) {
        let key = self.cell_for(lat, lon);
        let deposit = risk_score.clamp(0.0, 1.0) * DEPOSIT_FACTOR;

        let cell = self.cells.entry(key).or_insert_with(|| GridCell {
            score: 0.0,
            updated_at: now,
            vehicles: BTreeSet::new(),
        });
        cell.score = (cell.score + deposit).min(1.0);
        cell.updated_at = now;
        cell.vehicles.insert(vehicle_id.clone());
    }

    /// Decayed risk at (lat, lon), rounded to 4 decimals. Does not mutate.
    pub fn get_risk_at(&self, lat: f64, lon: f64, now: f64) -> f64 {
        self.cells
            .get(&self.cell_for(lat, lon))
            .map(|cell| round_dp(cell.decayed(self.config.decay_rate, now), 4))
            .unwrap_or(0.0)
    }

    /// Cells whose decayed score exceeds `threshold`, highest first.
    pub fn get_hotspots(&self, threshold: f64, now: f64) -> Vec<Hotspot> {
        let mut hotspots: Vec<Hotspot> = self
            .cells
            .iter()
            .filter_map(|(key, cell)| {
                let current = cell.decayed(self.config.decay_rate, now);
                (current > threshold).then(|| Hotspot {
                    cell: *key,
                    risk_score: round_dp(current, 4),
                    vehicles: cell.vehicles.iter().cloned().collect(),
                })
            })
            .collect();

        hotspots.sort_by(|a, b| b.risk_score.total_cmp(&a.risk_score).then(a.cell.cmp(&b.cell)));
        hotspots
    }

    /// Hotspots above the configured threshold.
    pub fn hotspots(&self, now: f64) -> Vec<Hotspot> {
        self.get_hotspots(self.config.hotspot_threshold, now)
    }

    /// Applies decay to every stored score and evicts dead cells.
    ///
    /// Returns the number of evicted cells.
    pub fn decay_all(&mut self, now: f64) -> usize {
        let decay_rate = self.config.decay_rate;
        let before = self.cells.len();

        self.cells.retain(|_, cell| {
            cell.score = cell.decayed(decay_rate, now);
            cell.updated_at = now;
            cell.score >= EVICTION_THRESHOLD
        });

        let evicted = before - self.cells.len();
        if evicted > 0 {
            debug!("CP-Map evicted {} cells ({} active)", evicted, self.cells.len());
        }
        evicted
    }

    /// Number of stored cells.
    pub fn active_cells(&self) -> usize {
        self.cells.len()
    }

    pub fn cell(&self, key: &CellKey) -> Option<&GridCell> {
        self.cells.get(key)
    }
}
