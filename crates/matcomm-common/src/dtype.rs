//! Storage dtypes understood by the harness.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::HarnessError;

/// Element type of a tensor as stored on disk and fed to the kernel.
///
/// Accumulation is always performed in f32 regardless of the storage dtype;
/// `DType` only governs how values are encoded in operand/output buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DType {
    F16,
    Bf16,
    F32,
    I8,
    I32,
}

impl DType {
    /// Width of one element in bytes.
    pub fn size_in_bytes(self) -> usize {
        match self {
            Self::F16 | Self::Bf16 => 2,
            Self::F32 | Self::I32 => 4,
            Self::I8 => 1,
        }
    }

    /// Whether values of this dtype are integers.
    pub fn is_integer(self) -> bool {
        matches!(self, Self::I8 | Self::I32)
    }

    /// Canonical short name, matching the kernel-side naming.
    pub fn name(self) -> &'static str {
        match self {
            Self::F16 => "fp16",
            Self::Bf16 => "bf16",
            Self::F32 => "fp32",
            Self::I8 => "int8",
            Self::I32 => "int32",
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DType {
    type Err = HarnessError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "fp16" | "f16" | "float16" => Ok(Self::F16),
            "bf16" | "bfloat16" => Ok(Self::Bf16),
            "fp32" | "f32" | "float32" => Ok(Self::F32),
            "int8" | "i8" => Ok(Self::I8),
            "int32" | "i32" => Ok(Self::I32),
            other => Err(HarnessError::UnknownDType(other.to_string())),
        }
    }
}
