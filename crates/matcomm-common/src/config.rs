//! Harness configuration.
//!
//! One explicit value threaded through every sampler/golden/orchestrator
//! call; there is no environment-driven global state.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::case::GenMode;

/// Configuration for one harness run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarnessConfig {
    /// Random vs deterministic input generation.
    pub gen_mode: GenMode,

    /// Bound on sampling retries before reporting exhaustion.
    pub max_sample_attempts: usize,

    /// Upper bound on leading batch dimensions for sampled shapes.
    pub max_batch_dims: usize,

    /// Random shape range merged into the stress-dimension pool.
    pub random_dim_range: (usize, usize),

    /// Path to the kernel executable under test.
    pub kernel_path: PathBuf,

    /// Root directory for per-case data directories.
    pub data_root: PathBuf,

    /// First device id handed to rank 0; rank i gets `device_id_base + i`.
    pub device_id_base: usize,

    /// How long the join loop waits for all ranks before reaping survivors.
    /// `None` waits indefinitely, preserving the original behavior.
    pub join_timeout: Option<Duration>,

    /// Seed for the sampling RNG; fixed by default for reproducibility.
    pub seed: u64,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            gen_mode: GenMode::Random,
            max_sample_attempts: 10_000,
            max_batch_dims: 2,
            random_dim_range: (1, 1024),
            kernel_path: PathBuf::from("./kernel_under_test"),
            data_root: PathBuf::from("./test_data"),
            device_id_base: 0,
            join_timeout: None,
            seed: 42,
        }
    }
}

impl HarnessConfig {
    pub fn deterministic(mut self) -> Self {
        self.gen_mode = GenMode::Deterministic;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_values_are_stable() {
        let cfg = HarnessConfig::default();
        assert_eq!(cfg.random_dim_range, (1, 1024));
        assert_eq!(cfg.seed, 42);
        assert_eq!(cfg.gen_mode, GenMode::Random);
        assert!(cfg.join_timeout.is_none());
    }

    #[test]
    fn deterministic_builder_flips_gen_mode() {
        let cfg = HarnessConfig::default().deterministic();
        assert_eq!(cfg.gen_mode, GenMode::Deterministic);
    }
}
