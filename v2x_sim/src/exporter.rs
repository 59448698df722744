//! JSON exporter for offline inspection.
//!
//! Exports one frame per RSU cycle: ground truth, fused estimates, the
//! annotated risk records and the CP-Map hotspots.

use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Write;
use v2x_core::{AnnotatedRecord, Hotspot, KinematicState};
use v2x_env::VehicleId;

/// A single frame of simulation data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimFrame {
    /// Simulation time in seconds
    pub time_sec: f64,

    /// Ground truth vehicle positions
    pub ground_truth: Vec<VehiclePosition>,

    /// Fused estimates as seen by the RSU
    pub estimates: Vec<VehiclePosition>,

    /// Risk records with the dissemination decision
    pub records: Vec<AnnotatedRecord>,

    pub hotspots: Vec<Hotspot>,

    /// Events (first HIGH, saturation, etc.)
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub events: Vec<SimEvent>,
}

/// Position and velocity of a vehicle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VehiclePosition {
    pub id: VehicleId,
    pub x: f64,
    pub y: f64,
    pub vx: f64,
    pub vy: f64,
}

impl VehiclePosition {
    pub fn new(id: VehicleId, state: &KinematicState) -> Self {
        Self {
            id,
            x: state.x,
            y: state.y,
            vx: state.vx,
            vy: state.vy,
        }
    }
}

/// Simulation event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimEvent {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,
}

impl SimEvent {
    pub fn info(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            level: None,
        }
    }

    pub fn warn(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            level: Some("warn".to_string()),
        }
    }
}

/// Complete simulation export.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimExport {
    /// Scenario name
    pub scenario: String,

    /// Seed used
    pub seed: u64,

    /// Duration in seconds
    pub duration_sec: f64,

    /// All frames
    pub frames: Vec<SimFrame>,

    /// Final results
    pub passed: bool,

    /// Final RMS position error if applicable
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_rms_error: Option<f64>,
}

impl SimExport {
    /// Creates a new export container.
    pub fn new(scenario: &str, seed: u64) -> Self {
        Self {
            scenario: scenario.to_string(),
            seed,
            duration_sec: 0.0,
            frames: Vec::new(),
            passed: false,
            final_rms_error: None,
        }
    }

    /// Adds a frame.
    pub fn add_frame(&mut self, frame: SimFrame) {
        self.duration_sec = frame.time_sec;
        self.frames.push(frame);
    }

    /// Finalizes the export.
    pub fn finalize(&mut self, passed: bool, rms_error: Option<f64>) {
        self.passed = passed;
        self.final_rms_error = rms_error;
    }

    /// Writes to a JSON file.
    pub fn write_to_file(&self, path: &str) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        let mut file = File::create(path)?;
        file.write_all(json.as_bytes())?;
        Ok(())
    }
}
