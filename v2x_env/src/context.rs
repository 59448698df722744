//! Core environment context trait for V2X nodes.

use async_trait::async_trait;
use rand::rngs::StdRng;
use std::time::{Duration, SystemTime};

/// The central interface for environment interaction.
///
/// This trait abstracts the "real world" so that the risk pipeline can run
/// on an RSU/OBU (tokio, OS entropy) or inside the deterministic simulator.
///
/// # Implementations
///
/// - **Production**: `TokioContext` - wraps `tokio::time`, OS entropy
/// - **Simulation**: `SimContext` (in `v2x_sim`) - virtual clock, seeded RNG
///
/// # Determinism
///
/// For simulation, every method that would normally introduce
/// non-determinism (time, randomness) is controlled by the implementation.
#[async_trait]
pub trait V2xContext: Send + Sync + 'static {
    /// Returns the current monotonic time since context creation.
    ///
    /// The CP-Map decay clock and record timestamps are derived from this.
    /// In simulation, this is the virtual clock time.
    fn now(&self) -> Duration;

    /// Returns the wall-clock time.
    ///
    /// In simulation, this is derived from virtual clock + epoch offset.
    fn system_time(&self) -> SystemTime;

    /// Suspends execution for the given duration.
    ///
    /// In production: wraps `tokio::time::sleep`
    /// In simulation: advances virtual clock
    async fn sleep(&self, duration: Duration);

    /// Derives an RNG stream from a seed extension.
    ///
    /// Used for exploration in the dissemination policy and for the
    /// simulated sensor random walks. The simulation implementation combines
    /// the global seed with `seed_extension` so that every consumer gets a
    /// distinct but reproducible stream.
    fn derive_rng(&self, seed_extension: u64) -> StdRng;

    /// Returns the context's seed (for logging/debugging).
    ///
    /// In production, returns 0 (not seeded).
    fn seed(&self) -> u64;

    /// Convenience: monotonic time in fractional seconds.
    fn now_secs(&self) -> f64 {
        self.now().as_secs_f64()
    }
}
