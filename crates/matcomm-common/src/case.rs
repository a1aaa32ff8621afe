//! Test-case model: communication patterns, quantization policies and the
//! parameter tuple identifying one sampled case.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::dtype::DType;
use crate::error::{HarnessError, Result};

/// Element count ceiling for any single operand.
pub const MAX_OPERAND_ELEMENTS: u64 = 1 << 31;

/// Fused compute+communication pattern exercised by a case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommPattern {
    Allreduce,
    AllgatherMatmul,
    MatmulReduceScatter,
    AlltoallReduceScatter,
}

impl CommPattern {
    pub const ALL: [CommPattern; 4] = [
        Self::Allreduce,
        Self::AllgatherMatmul,
        Self::MatmulReduceScatter,
        Self::AlltoallReduceScatter,
    ];

    /// Patterns that sum partial results across ranks.
    pub fn is_reducing(self) -> bool {
        matches!(
            self,
            Self::Allreduce | Self::MatmulReduceScatter | Self::AlltoallReduceScatter
        )
    }

    /// Whether M must divide evenly across ranks.
    pub fn requires_m_sharding(self) -> bool {
        matches!(self, Self::MatmulReduceScatter | Self::AlltoallReduceScatter)
    }

    /// Whether K must divide evenly across ranks.
    pub fn requires_k_sharding(self) -> bool {
        matches!(self, Self::AlltoallReduceScatter)
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Allreduce => "allreduce",
            Self::AllgatherMatmul => "allgather_matmul",
            Self::MatmulReduceScatter => "matmul_reduce_scatter",
            Self::AlltoallReduceScatter => "alltoall_reduce_scatter",
        }
    }
}

impl fmt::Display for CommPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for CommPattern {
    type Err = HarnessError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "allreduce" | "matmul_allreduce" => Ok(Self::Allreduce),
            "allgather_matmul" => Ok(Self::AllgatherMatmul),
            "matmul_reduce_scatter" => Ok(Self::MatmulReduceScatter),
            "alltoall_reduce_scatter" | "alltoall_matmul_reduce_scatter" => {
                Ok(Self::AlltoallReduceScatter)
            }
            other => Err(HarnessError::InvalidCase(format!(
                "unknown communication pattern: {other}"
            ))),
        }
    }
}

/// Input generation mode. `Deterministic` replaces every random draw with
/// fixed values (all-ones operands, 0.01 scales, an incrementing bias ramp)
/// so that kernel debugging sees byte-identical inputs across runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenMode {
    Random,
    Deterministic,
}

/// Numeric regime of the operand matrices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuantMode {
    /// Continuous floating-point operands in the case dtype.
    None,
    /// int8 operands dequantized through bias and scale into the case dtype.
    Int8,
}

/// Which quantization-scale shape a case carries. The data itself lives in
/// [`ScalePolicy`] once sampled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScaleKind {
    None,
    PerTensor,
    PerChannel,
    PerToken,
    Fused,
}

/// Sampled quantization scales.
///
/// `Fused` is the PerToken × PerChannel family collapsed for kernels that
/// accept a single scale tensor: golden applies `per_token[i] *
/// per_channel[j]`, while [`ScalePolicy::fused_vector`] yields the one
/// pre-multiplied length-N vector handed to the kernel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ScalePolicy {
    None,
    PerTensor(f32),
    /// One scale per output column; length N.
    PerChannel(Vec<f32>),
    /// One scale per output row; length M.
    PerToken(Vec<f32>),
    Fused {
        /// Length M. Constant when the token side is a pre-fused scalar.
        per_token: Vec<f32>,
        /// Length N.
        per_channel: Vec<f32>,
    },
}

impl ScalePolicy {
    pub fn kind(&self) -> ScaleKind {
        match self {
            Self::None => ScaleKind::None,
            Self::PerTensor(_) => ScaleKind::PerTensor,
            Self::PerChannel(_) => ScaleKind::PerChannel,
            Self::PerToken(_) => ScaleKind::PerToken,
            Self::Fused { .. } => ScaleKind::Fused,
        }
    }

    /// Multiplier for output element (row, col). Token scale applies before
    /// channel scale when both exist.
    pub fn factor(&self, row: usize, col: usize) -> f32 {
        match self {
            Self::None => 1.0,
            Self::PerTensor(s) => *s,
            Self::PerChannel(c) => c[col],
            Self::PerToken(t) => t[row],
            Self::Fused {
                per_token,
                per_channel,
            } => per_token[row] * per_channel[col],
        }
    }

    /// The single pre-fused length-N multiplier for kernels accepting one
    /// scale tensor. Only meaningful for `Fused` with a constant token side.
    pub fn fused_vector(&self) -> Option<Vec<f32>> {
        match self {
            Self::Fused {
                per_token,
                per_channel,
            } => {
                let scalar = per_token.first().copied()?;
                Some(per_channel.iter().map(|c| c * scalar).collect())
            }
            _ => None,
        }
    }

    /// Check vector lengths against the case's M and N.
    pub fn validate(&self, m: usize, n: usize) -> Result<()> {
        let ok = match self {
            Self::None | Self::PerTensor(_) => true,
            Self::PerChannel(c) => c.len() == n,
            Self::PerToken(t) => t.len() == m,
            Self::Fused {
                per_token,
                per_channel,
            } => per_token.len() == m && per_channel.len() == n,
        };
        if ok {
            Ok(())
        } else {
            Err(HarnessError::InvalidCase(format!(
                "scale policy {:?} does not match m={m}, n={n}",
                self.kind()
            )))
        }
    }
}

/// One sampled test case. Identified by a stable hash of its parameters so
/// generated inputs and golden can be cached and reused across runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestCase {
    pub dtype: DType,
    pub m: usize,
    pub k: usize,
    pub n: usize,
    /// Leading batch dimensions; empty for plain 2-D matmul. Only the
    /// allreduce pattern supports batching.
    #[serde(default)]
    pub batch_dims: Vec<usize>,
    pub world_size: usize,
    pub trans_a: bool,
    pub trans_b: bool,
    pub quant: QuantMode,
    pub bias: bool,
    pub scale: ScaleKind,
    pub pattern: CommPattern,
}

impl TestCase {
    /// Stable content hash of the case parameters, used as the on-disk
    /// cache key.
    pub fn case_id(&self) -> String {
        // Serialization of a plain struct cannot fail.
        let json = serde_json::to_string(self).expect("case serialization");
        let digest = Sha256::digest(json.as_bytes());
        let mut id = String::with_capacity(32);
        for byte in &digest[..16] {
            use fmt::Write;
            let _ = write!(id, "{byte:02x}");
        }
        id
    }

    /// Short human-readable label for logs, mirroring the kernel-side id
    /// string convention.
    pub fn label(&self) -> String {
        format!(
            "{}-{}-w{}-m{}k{}n{}",
            self.pattern, self.dtype, self.world_size, self.m, self.k, self.n
        )
    }

    pub fn batch_count(&self) -> usize {
        self.batch_dims.iter().product()
    }

    pub fn shape_a(&self) -> Vec<usize> {
        let mut shape = self.batch_dims.clone();
        shape.extend([self.m, self.k]);
        shape
    }

    pub fn shape_b(&self) -> Vec<usize> {
        let mut shape = self.batch_dims.clone();
        shape.extend([self.k, self.n]);
        shape
    }

    /// Shape of the tensor the kernel must produce on one rank.
    pub fn output_shape(&self) -> Vec<usize> {
        match self.pattern {
            CommPattern::Allreduce => {
                let mut shape = self.batch_dims.clone();
                shape.extend([self.m, self.n]);
                shape
            }
            CommPattern::AllgatherMatmul => vec![self.world_size * self.m, self.n],
            CommPattern::MatmulReduceScatter | CommPattern::AlltoallReduceScatter => {
                vec![self.m / self.world_size, self.n]
            }
        }
    }

    /// Effective reduction-chain length used to pick the tolerance bucket:
    /// summing across ranks lengthens the chain beyond K.
    pub fn accumulation_length(&self) -> usize {
        if self.pattern.is_reducing() {
            self.k * self.world_size
        } else {
            self.k
        }
    }

    /// Enforce the structural invariants of §4 before any data is generated.
    pub fn validate(&self) -> Result<()> {
        if self.world_size == 0 {
            return Err(HarnessError::InvalidCase("world_size must be >= 1".into()));
        }
        if self.m == 0 || self.k == 0 || self.n == 0 {
            return Err(HarnessError::InvalidCase(format!(
                "degenerate shape m={}, k={}, n={}",
                self.m, self.k, self.n
            )));
        }

        let batch = self.batch_count() as u64;
        let elems_a = batch * self.m as u64 * self.k as u64;
        let elems_b = batch * self.k as u64 * self.n as u64;
        if elems_a >= MAX_OPERAND_ELEMENTS || elems_b >= MAX_OPERAND_ELEMENTS {
            return Err(HarnessError::InvalidCase(format!(
                "operand element count exceeds 2^31: a={elems_a}, b={elems_b}"
            )));
        }

        if !self.batch_dims.is_empty() && self.pattern != CommPattern::Allreduce {
            return Err(HarnessError::InvalidCase(format!(
                "batch dims are only supported for allreduce, not {}",
                self.pattern
            )));
        }

        if self.pattern.requires_m_sharding() && self.m % self.world_size != 0 {
            return Err(HarnessError::InvalidCase(format!(
                "{} requires M ({}) divisible by world_size ({})",
                self.pattern, self.m, self.world_size
            )));
        }
        if self.pattern.requires_k_sharding() && self.k % self.world_size != 0 {
            return Err(HarnessError::InvalidCase(format!(
                "{} requires K ({}) divisible by world_size ({})",
                self.pattern, self.k, self.world_size
            )));
        }

        if self.quant == QuantMode::None && (self.bias || self.scale != ScaleKind::None) {
            return Err(HarnessError::InvalidCase(
                "bias/scale fusion requires the int8 quantized regime".into(),
            ));
        }

        Ok(())
    }
}
