//! Pipeline configuration loading for the simulator CLI.

use crate::error::SimError;
use v2x_core::PipelineConfig;

/// Reads and validates a JSON pipeline configuration.
///
/// Fields missing from the file take their defaults.
pub fn load_config(path: &str) -> Result<PipelineConfig, SimError> {
    let json = std::fs::read_to_string(path).map_err(|e| SimError::io(path, e))?;
    Ok(PipelineConfig::from_json(&json)?)
}
