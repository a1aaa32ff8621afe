//! Error taxonomy for the harness.

use std::path::PathBuf;

use thiserror::Error;

use crate::dtype::DType;

/// Errors produced while sampling, computing golden or driving the kernel.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum HarnessError {
    /// Shape/tensor sampling could not satisfy its constraints within the
    /// configured attempt budget.
    #[error("sampling exhausted after {attempts} attempts ({produced} of {wanted} cases produced)")]
    SamplingExhausted {
        attempts: usize,
        wanted: usize,
        produced: usize,
    },

    /// The golden tensor contains non-finite values; the draw is
    /// unrepresentative and the case should be skipped, not failed.
    #[error("non-finite values in golden for case {case_id}")]
    OverflowInGolden { case_id: String },

    /// A worker process exited non-zero. The captured log is surfaced for
    /// diagnosis; no tolerance check is attempted.
    #[error("rank {rank} exited with code {code:?}, log at {log_path:?}")]
    RankProcessFailure {
        rank: usize,
        code: Option<i32>,
        log_path: PathBuf,
    },

    /// A rank did not exit within the configured join timeout and had to be
    /// reaped.
    #[error("rank {rank} did not exit within {timeout_secs}s")]
    JoinTimeout { rank: usize, timeout_secs: u64 },

    /// Numeric mismatch beyond the dtype/length-scaled bound.
    #[error(
        "tolerance violation for case {case_id}: {mismatched}/{total} elements outside \
         rtol={rtol} atol={atol} (max |diff|={max_abs_diff}, dtype={dtype}, output={output_path:?})"
    )]
    ToleranceViolation {
        case_id: String,
        dtype: DType,
        rtol: f32,
        atol: f32,
        mismatched: usize,
        total: usize,
        max_abs_diff: f32,
        output_path: PathBuf,
    },

    /// Shape or element-count mismatch between tensors that must agree.
    #[error("shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    /// Test-case parameters violate a structural invariant.
    #[error("invalid case: {0}")]
    InvalidCase(String),

    #[error("unknown dtype: {0}")]
    UnknownDType(String),

    #[error("failed to serialize case parameters: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, HarnessError>;

impl HarnessError {
    /// True for anomalies handled locally (skip/regenerate) rather than
    /// surfaced as hard failures.
    pub fn is_skippable(&self) -> bool {
        matches!(self, Self::OverflowInGolden { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overflow_is_skippable_but_rank_failure_is_not() {
        let overflow = HarnessError::OverflowInGolden { case_id: "abc".into() };
        assert!(overflow.is_skippable());

        let failure = HarnessError::RankProcessFailure {
            rank: 1,
            code: Some(139),
            log_path: PathBuf::from("/tmp/rank_1.log"),
        };
        assert!(!failure.is_skippable());
        assert!(failure.to_string().contains("rank 1"));
    }
}
