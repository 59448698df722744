//! V2X Deterministic Simulation Harness
//!
//! Runs the complete risk pipeline (EKF fusion, aggregation, CP-Map and
//! dissemination) against a ground-truth traffic model, with every source
//! of non-determinism derived from one 64-bit seed:
//! - **Time**: a virtual clock advanced once per 100 ms tick
//! - **Sensors**: Gaussian noise and dropout from a seeded ChaCha8 stream
//! - **Exploration**: the policy's ε-greedy RNG is derived from the context
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────┐
//! │                    ScenarioRunner                         │
//! │                                                           │
//! │   ┌──────────┐  noisy obs   ┌────────────────────────┐    │
//! │   │  Oracle  │─────────────►│ StateEstimator / OBU   │    │
//! │   │ (truth)  │              │   (one per vehicle)    │    │
//! │   └──────────┘              └───────────┬────────────┘    │
//! │                                         │ snapshot        │
//! │                              ┌──────────▼────────────┐    │
//! │   SimContext ───────────────►│  RsuCycle<SimContext> │    │
//! │   (virtual clock, seed)      └──────────┬────────────┘    │
//! │                                         │                 │
//! │                                  SimExport frames         │
//! └───────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use v2x_sim::{ScenarioRunner, scenarios::ScenarioId};
//!
//! let result = ScenarioRunner::new(42)
//!     .with_duration(10.0)
//!     .run(ScenarioId::HeadOn);
//! assert!(result.passed);
//! ```

mod config;
mod context;
mod error;
mod exporter;
mod oracle;
mod runner;
pub mod scenarios;

pub use config::load_config;
pub use context::SimContext;
pub use error::SimError;
pub use exporter::{SimEvent, SimExport, SimFrame, VehiclePosition};
pub use oracle::{GroundTruthVehicle, NoiseModel, Oracle};
pub use runner::{ScenarioMetrics, ScenarioResult, ScenarioRunner, WARMUP_SECS};
