//! Matmul shape sampling.

use std::collections::HashSet;

use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use tracing::debug;

use matcomm_common::case::{CommPattern, MAX_OPERAND_ELEMENTS};
use matcomm_common::{HarnessConfig, HarnessError, Result};

/// Fixed stress-test dimension values: boundary sizes around tile edges,
/// powers of two and one deliberately huge dimension.
pub const STRESS_DIMS: [usize; 14] = [1, 7, 8, 9, 15, 16, 17, 19, 20, 21, 255, 256, 257, 131073];

/// One sampled matmul shape tuple.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SampledShape {
    pub m: usize,
    pub k: usize,
    pub n: usize,
    pub batch_dims: Vec<usize>,
}

/// Draws unique `(M, K, N[, batch dims])` tuples from the stress pool plus a
/// configurable random range, keeping every operand under the element-count
/// ceiling. Retries are bounded; exhausting the budget is an error, not a
/// hang.
pub struct ShapeSampler {
    rng: ChaCha8Rng,
    pool: Vec<usize>,
    max_attempts: usize,
    max_batch_dims: usize,
}

impl ShapeSampler {
    pub fn new(config: &HarnessConfig) -> Self {
        let (lo, hi) = config.random_dim_range;
        let mut pool: Vec<usize> = STRESS_DIMS.to_vec();
        pool.extend(lo..=hi);
        Self {
            rng: ChaCha8Rng::seed_from_u64(config.seed),
            pool,
            max_attempts: config.max_sample_attempts,
            max_batch_dims: config.max_batch_dims,
        }
    }

    /// Sample `count` unique shapes valid for `pattern` at `world_size`.
    pub fn sample(
        &mut self,
        pattern: CommPattern,
        world_size: usize,
        count: usize,
    ) -> Result<Vec<SampledShape>> {
        // Draw order is part of the contract: the returned list must be
        // identical across runs for a fixed seed, so dedup via the set but
        // keep insertion order.
        let mut seen: HashSet<SampledShape> = HashSet::new();
        let mut shapes = Vec::with_capacity(count);
        let mut attempts = 0usize;

        while shapes.len() < count {
            if attempts >= self.max_attempts {
                return Err(HarnessError::SamplingExhausted {
                    attempts,
                    wanted: count,
                    produced: shapes.len(),
                });
            }
            attempts += 1;

            if let Some(shape) = self.draw(pattern, world_size) {
                if seen.insert(shape.clone()) {
                    shapes.push(shape);
                }
            }
        }

        debug!(attempts, count, pattern = %pattern, "shape sampling complete");
        Ok(shapes)
    }

    fn draw(&mut self, pattern: CommPattern, world_size: usize) -> Option<SampledShape> {
        let mut m = *self.pool.choose(&mut self.rng)?;
        let mut k = *self.pool.choose(&mut self.rng)?;
        let n = *self.pool.choose(&mut self.rng)?;

        // Sharded patterns need evenly divisible dimensions; round up to the
        // nearest multiple rather than rejecting the draw.
        if pattern.requires_m_sharding() {
            m = round_up(m, world_size);
        }
        if pattern.requires_k_sharding() {
            k = round_up(k, world_size);
        }

        let batch_dims = if pattern == CommPattern::Allreduce && self.max_batch_dims > 0 {
            let n_batch = self.rng.gen_range(0..=self.max_batch_dims);
            // Batch dims come from the small end of the pool to keep element
            // counts sane.
            (0..n_batch)
                .map(|_| STRESS_DIMS[self.rng.gen_range(0..10)])
                .collect()
        } else {
            Vec::new()
        };

        let batch: u64 = batch_dims.iter().map(|&d| d as u64).product();
        let elems_a = batch * m as u64 * k as u64;
        let elems_b = batch * k as u64 * n as u64;
        if elems_a >= MAX_OPERAND_ELEMENTS || elems_b >= MAX_OPERAND_ELEMENTS {
            return None;
        }

        Some(SampledShape { m, k, n, batch_dims })
    }
}

fn round_up(value: usize, multiple: usize) -> usize {
    value.div_ceil(multiple) * multiple
}
