//! Operand, bias and scale tensor generation.

use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use rand_distr::Normal;

use matcomm_common::case::{GenMode, ScaleKind, ScalePolicy};
use matcomm_common::{DType, HostTensor, Result};

/// Continuous-regime distribution bounds.
const MEAN_RANGE: (f32, f32) = (-100.0, 100.0);
const STD_RANGE: (f32, f32) = (1.0, 25.0);
/// Fraction of elements replaced with precision-floor outliers.
const OUTLIER_FRACTION: f64 = 0.001;
/// Quantized-regime bounds.
const QUANT_OPERAND_RANGE: (i32, i32) = (-16, 16);
const SCALE_RANGE: (f32, f32) = (0.004, 0.005);
const BIAS_RANGE: (i32, i32) = (-65536, 65536);
/// Fixed scale used by deterministic mode.
const DEBUG_SCALE: f32 = 0.01;

/// Samples operand/bias/scale tensors under the active generation mode.
pub struct TensorSampler {
    rng: ChaCha8Rng,
    mode: GenMode,
}

impl TensorSampler {
    pub fn new(seed: u64, mode: GenMode) -> Self {
        Self {
            rng: ChaCha8Rng::seed_from_u64(seed),
            mode,
        }
    }

    /// Continuous regime: a normal draw with per-tensor mean/std, then a
    /// 0.1% sprinkling of outliers near the dtype's precision floor to
    /// stress denormal and rounding edge cases. Finishes by casting into
    /// the storage dtype.
    pub fn continuous(&mut self, dtype: DType, shape: Vec<usize>) -> Result<HostTensor> {
        let numel: usize = shape.iter().product();

        if self.mode == GenMode::Deterministic {
            return HostTensor::from_f32(dtype, shape, &vec![1.0; numel]);
        }

        let mean = self.rng.gen_range(MEAN_RANGE.0..=MEAN_RANGE.1);
        let std = self.rng.gen_range(STD_RANGE.0..=STD_RANGE.1);
        // std is sampled from a strictly positive range.
        let dist = Normal::new(mean, std).expect("valid normal parameters");

        let mut values: Vec<f32> = (0..numel).map(|_| dist.sample(&mut self.rng)).collect();

        let outlier_scale = outlier_scale_for(dtype);
        let num_outliers = (numel as f64 * OUTLIER_FRACTION) as usize;
        let unit = Normal::new(0.0f32, 1.0).expect("unit normal");
        for _ in 0..num_outliers {
            let idx = self.rng.gen_range(0..numel);
            values[idx] = unit.sample(&mut self.rng) * outlier_scale;
        }

        HostTensor::from_f32(dtype, shape, &values)
    }

    /// Quantized regime operand: independent uniform integers in [-16, 16]
    /// stored as int8. Deterministic mode uses all-ones.
    pub fn quantized_operand(&mut self, shape: Vec<usize>) -> Result<HostTensor> {
        let numel: usize = shape.iter().product();
        let values: Vec<f32> = match self.mode {
            GenMode::Deterministic => vec![1.0; numel],
            GenMode::Random => (0..numel)
                .map(|_| {
                    self.rng
                        .gen_range(QUANT_OPERAND_RANGE.0..QUANT_OPERAND_RANGE.1)
                        as f32
                })
                .collect(),
        };
        HostTensor::from_f32(DType::I8, shape, &values)
    }

    /// Dequantization bias: int32 over a wide range, or the incrementing
    /// ramp 1..=N in deterministic mode.
    pub fn bias(&mut self, n: usize) -> Result<HostTensor> {
        let values: Vec<f32> = match self.mode {
            GenMode::Deterministic => (1..=n).map(|v| v as f32).collect(),
            GenMode::Random => (0..n)
                .map(|_| self.rng.gen_range(BIAS_RANGE.0..=BIAS_RANGE.1) as f32)
                .collect(),
        };
        HostTensor::from_f32(DType::I32, vec![n], &values)
    }

    /// Sample scales for the requested policy shape.
    pub fn scales(&mut self, kind: ScaleKind, m: usize, n: usize) -> ScalePolicy {
        match kind {
            ScaleKind::None => ScalePolicy::None,
            ScaleKind::PerTensor => ScalePolicy::PerTensor(self.scale_scalar()),
            ScaleKind::PerChannel => ScalePolicy::PerChannel(self.scale_vector(n)),
            ScaleKind::PerToken => ScalePolicy::PerToken(self.scale_vector(m)),
            ScaleKind::Fused => {
                // Token side is a per-tensor scalar broadcast over rows; the
                // kernel receives the pre-fused per-channel product.
                let per_tensor = match self.mode {
                    GenMode::Deterministic => DEBUG_SCALE,
                    GenMode::Random => self.rng.gen_range(0.0f32..1.0),
                };
                ScalePolicy::Fused {
                    per_token: vec![per_tensor; m],
                    per_channel: self.scale_vector(n),
                }
            }
        }
    }

    fn scale_scalar(&mut self) -> f32 {
        match self.mode {
            GenMode::Deterministic => DEBUG_SCALE,
            GenMode::Random => self.rng.gen_range(SCALE_RANGE.0..=SCALE_RANGE.1),
        }
    }

    fn scale_vector(&mut self, len: usize) -> Vec<f32> {
        match self.mode {
            GenMode::Deterministic => vec![DEBUG_SCALE; len],
            GenMode::Random => (0..len).map(|_| self.scale_scalar()).collect(),
        }
    }
}

fn outlier_scale_for(dtype: DType) -> f32 {
    match dtype {
        DType::F32 => 1e-4,
        _ => 1e-3,
    }
}
