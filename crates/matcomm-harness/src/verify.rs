//! Dtype-aware tolerance comparison of kernel output against golden.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use matcomm_common::case::TestCase;
use matcomm_common::{DType, HarnessError, HostTensor, Result};

use crate::layout::CaseLayout;

/// Relative/absolute tolerance pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Tolerance {
    pub rtol: f32,
    pub atol: f32,
}

/// Tolerance for a dtype, scaled by accumulation length: longer reduction
/// chains accumulate more rounding error and get a looser bound.
///
/// Buckets mirror the kernel team's acceptance thresholds; integer dtypes
/// compare exactly.
pub fn tolerance_for(dtype: DType, accumulation_length: usize) -> Tolerance {
    let err = match dtype {
        DType::F16 => {
            if accumulation_length < 2048 {
                2.0f32.powi(-8)
            } else {
                2.0f32.powi(-7)
            }
        }
        DType::Bf16 => {
            if accumulation_length < 2048 {
                2.0f32.powi(-7)
            } else {
                2.0f32.powi(-6)
            }
        }
        DType::F32 => {
            if accumulation_length < 2048 {
                2.0f32.powi(-11)
            } else if accumulation_length < 16384 {
                2.0f32.powi(-10)
            } else {
                2.0f32.powi(-9)
            }
        }
        DType::I8 | DType::I32 => 0.0,
    };
    Tolerance { rtol: err, atol: err }
}

/// Outcome of one element-wise comparison.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyReport {
    pub case_id: String,
    pub dtype: DType,
    pub shape: Vec<usize>,
    pub tolerance: Tolerance,
    pub total: usize,
    pub mismatched: usize,
    pub max_abs_diff: f32,
    /// Diagnostic: share of elements inside the bound, in percent.
    pub within_tolerance_pct: f64,
    pub passed: bool,
}

/// Compare `result` against `golden` element-wise:
/// PASS iff for every element |result − golden| ≤ atol + rtol·|golden|.
pub fn compare(
    case: &TestCase,
    golden: &HostTensor,
    result: &HostTensor,
    tolerance: Tolerance,
) -> Result<VerifyReport> {
    if golden.shape() != result.shape() {
        return Err(HarnessError::ShapeMismatch {
            expected: golden.shape().to_vec(),
            actual: result.shape().to_vec(),
        });
    }

    let golden_values = golden.to_f32();
    let result_values = result.to_f32();
    let total = golden_values.len();

    let mut mismatched = 0usize;
    let mut max_abs_diff = 0.0f32;
    for (&g, &r) in golden_values.iter().zip(&result_values) {
        let diff = (r - g).abs();
        // NaN on either side always counts as a mismatch.
        if !(diff <= tolerance.atol + tolerance.rtol * g.abs()) {
            mismatched += 1;
        }
        if diff > max_abs_diff || diff.is_nan() {
            max_abs_diff = if diff.is_nan() { f32::INFINITY } else { diff };
        }
    }

    let within_tolerance_pct = 100.0 * (total - mismatched) as f64 / total.max(1) as f64;
    Ok(VerifyReport {
        case_id: case.case_id(),
        dtype: case.dtype,
        shape: golden.shape().to_vec(),
        tolerance,
        total,
        mismatched,
        max_abs_diff,
        within_tolerance_pct,
        passed: mismatched == 0,
    })
}

/// Load `rank`'s output from the case directory and verify it against the
/// persisted golden. Failure produces a `ToleranceViolation` carrying the
/// full diagnostic dump.
pub fn verify_rank(case: &TestCase, layout: &CaseLayout, rank: usize) -> Result<VerifyReport> {
    let golden = layout.read_golden(case, rank)?;
    let result = layout.read_output(case, rank)?;
    let tolerance = tolerance_for(case.dtype, case.accumulation_length());

    let report = compare(case, &golden, &result, tolerance)?;
    if report.passed {
        debug!(
            case = %case.label(),
            rank,
            within = report.within_tolerance_pct,
            "verification passed"
        );
        Ok(report)
    } else {
        warn!(
            case = %case.label(),
            rank,
            mismatched = report.mismatched,
            max_abs_diff = report.max_abs_diff,
            "verification failed"
        );
        Err(HarnessError::ToleranceViolation {
            case_id: report.case_id.clone(),
            dtype: case.dtype,
            rtol: tolerance.rtol,
            atol: tolerance.atol,
            mismatched: report.mismatched,
            total: report.total,
            max_abs_diff: report.max_abs_diff,
            output_path: layout.output_path(rank),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use matcomm_common::case::{CommPattern, QuantMode, ScaleKind};

    fn case() -> TestCase {
        TestCase {
            dtype: DType::F16,
            m: 2,
            k: 2048,
            n: 2,
            batch_dims: vec![],
            world_size: 2,
            trans_a: false,
            trans_b: false,
            quant: QuantMode::None,
            bias: false,
            scale: ScaleKind::None,
            pattern: CommPattern::Allreduce,
        }
    }

    #[test]
    fn tolerance_buckets_loosen_with_chain_length() {
        assert_eq!(tolerance_for(DType::F16, 100).rtol, 2.0f32.powi(-8));
        assert_eq!(tolerance_for(DType::F16, 4096).rtol, 2.0f32.powi(-7));
        assert_eq!(tolerance_for(DType::F32, 100).rtol, 2.0f32.powi(-11));
        assert_eq!(tolerance_for(DType::F32, 8192).rtol, 2.0f32.powi(-10));
        assert_eq!(tolerance_for(DType::F32, 65536).rtol, 2.0f32.powi(-9));
        assert_eq!(tolerance_for(DType::I8, 100).rtol, 0.0);
    }

    #[test]
    fn identical_tensors_pass_with_zero_diff() {
        let c = case();
        let t = HostTensor::from_f32(DType::F16, vec![2, 2], &[1.0, 2.0, 3.0, 4.0]).unwrap();
        let report = compare(&c, &t, &t.clone(), tolerance_for(DType::F16, 100)).unwrap();
        assert!(report.passed);
        assert_eq!(report.max_abs_diff, 0.0);
        assert_eq!(report.within_tolerance_pct, 100.0);
    }

    #[test]
    fn small_perturbation_within_bound_passes() {
        let c = case();
        let golden = HostTensor::from_f32(DType::F32, vec![4], &[100.0; 4]).unwrap();
        let result = HostTensor::from_f32(DType::F32, vec![4], &[100.01; 4]).unwrap();
        let report = compare(&c, &golden, &result, Tolerance { rtol: 1e-3, atol: 1e-3 }).unwrap();
        assert!(report.passed);
    }

    #[test]
    fn gross_mismatch_fails_with_diagnostics() {
        let c = case();
        let golden = HostTensor::from_f32(DType::F32, vec![4], &[1.0, 1.0, 1.0, 1.0]).unwrap();
        let result = HostTensor::from_f32(DType::F32, vec![4], &[1.0, 5.0, 1.0, 1.0]).unwrap();
        let report = compare(&c, &golden, &result, Tolerance { rtol: 1e-2, atol: 1e-2 }).unwrap();
        assert!(!report.passed);
        assert_eq!(report.mismatched, 1);
        assert_eq!(report.max_abs_diff, 4.0);
        assert_eq!(report.within_tolerance_pct, 75.0);
    }

    #[test]
    fn nan_in_result_counts_as_mismatch() {
        let c = case();
        let golden = HostTensor::from_f32(DType::F32, vec![1], &[1.0]).unwrap();
        let result = HostTensor::from_f32(DType::F32, vec![1], &[f32::NAN]).unwrap();
        let report = compare(&c, &golden, &result, Tolerance { rtol: 1.0, atol: 1.0 }).unwrap();
        assert!(!report.passed);
    }

    #[test]
    fn shape_mismatch_is_an_error_not_a_failure() {
        let c = case();
        let golden = HostTensor::from_f32(DType::F32, vec![4], &[0.0; 4]).unwrap();
        let result = HostTensor::from_f32(DType::F32, vec![2, 2], &[0.0; 4]).unwrap();
        assert!(compare(&c, &golden, &result, Tolerance { rtol: 0.0, atol: 0.0 }).is_err());
    }
}
