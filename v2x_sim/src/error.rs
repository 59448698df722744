//! Error types for the simulator.

use thiserror::Error;
use v2x_core::ConfigError;
use v2x_env::EnvError;

#[derive(Error, Debug)]
pub enum SimError {
    #[error("Invalid pipeline configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Sensor setup failed: {0}")]
    Env(#[from] EnvError),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl SimError {
    pub fn io(path: impl Into<String>, source: std::io::Error) -> Self {
        SimError::Io {
            path: path.into(),
            source,
        }
    }
}
