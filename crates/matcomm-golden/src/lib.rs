//! Golden reference computation.
//!
//! One entry point covers every fused pattern and scale policy; there are no
//! per-variant golden paths to drift apart. The numeric pipeline is fixed:
//! accumulate in f32, add bias, multiply scale(s), and only then — after any
//! cross-rank reduction or slicing — cast to the output dtype, exactly once.

pub mod matmul;

use tracing::debug;

use matcomm_common::case::{CommPattern, ScalePolicy, TestCase};
use matcomm_common::{HarnessError, HostTensor, Result};
use matcomm_sampler::CaseInputs;

pub use matmul::matmul_f32;

/// Compute the tensor the kernel must produce on `rank`.
///
/// A non-finite result maps to [`HarnessError::OverflowInGolden`]; callers
/// treat that as an unrepresentative draw and skip the case.
pub fn compute_golden(case: &TestCase, inputs: &CaseInputs, rank: usize) -> Result<HostTensor> {
    case.validate()?;
    debug_assert!(rank < case.world_size);

    let values = match case.pattern {
        CommPattern::Allreduce => allreduce_sum(case, inputs)?,
        CommPattern::AllgatherMatmul => allgather_matmul(case, inputs, rank)?,
        CommPattern::MatmulReduceScatter => {
            let sum = allreduce_sum(case, inputs)?;
            shard_rows(&sum, case.m, case.n, case.world_size, rank)
        }
        CommPattern::AlltoallReduceScatter => {
            let full = global_product(case, inputs)?;
            shard_rows(&full, case.m, case.n, case.world_size, rank)
        }
    };

    let golden = HostTensor::from_f32(case.dtype, case.output_shape(), &values)?;
    if golden.has_non_finite() {
        return Err(HarnessError::OverflowInGolden {
            case_id: case.case_id(),
        });
    }

    debug!(case = %case.label(), rank, "golden computed");
    Ok(golden)
}

/// Golden for every rank in ascending order. For the allgather pattern the
/// concatenation of these is the full gathered golden.
pub fn compute_golden_all(case: &TestCase, inputs: &CaseInputs) -> Result<Vec<HostTensor>> {
    (0..case.world_size)
        .map(|rank| compute_golden(case, inputs, rank))
        .collect()
}

/// Sum over ranks of (local matmul + bias) × scale, in f32. Bias and scale
/// apply per-rank, before the reduction.
fn allreduce_sum(case: &TestCase, inputs: &CaseInputs) -> Result<Vec<f32>> {
    let batch = case.batch_count().max(1);
    let mut sum = vec![0.0f32; batch * case.m * case.n];

    for rank in 0..case.world_size {
        let a = inputs.per_rank_a[rank].to_f32();
        let b = inputs.per_rank_b[rank].to_f32();
        let mut local = matmul_f32(&a, &b, batch, case.m, case.k, case.n);
        apply_epilogue(&mut local, case.m, case.n, batch, inputs.bias.as_ref(), &inputs.scale);
        for (acc, v) in sum.iter_mut().zip(local) {
            *acc += v;
        }
    }
    Ok(sum)
}

/// matmul(gathered_A, B_rank) for one rank, bias and scale applied over the
/// gathered row axis.
fn allgather_matmul(case: &TestCase, inputs: &CaseInputs, rank: usize) -> Result<Vec<f32>> {
    let gathered_m = case.m * case.world_size;
    let mut gathered_a = Vec::with_capacity(gathered_m * case.k);
    // Ascending rank order is the contract; do not reorder.
    for shard in &inputs.per_rank_a {
        gathered_a.extend(shard.to_f32());
    }

    let b = inputs.per_rank_b[rank].to_f32();
    let mut out = matmul_f32(&gathered_a, &b, 1, gathered_m, case.k, case.n);
    apply_epilogue(&mut out, gathered_m, case.n, 1, inputs.bias.as_ref(), &inputs.scale);
    Ok(out)
}

/// Full M×N product of the global (un-split) operands.
fn global_product(case: &TestCase, inputs: &CaseInputs) -> Result<Vec<f32>> {
    let (global_a, global_b) = match (&inputs.global_a, &inputs.global_b) {
        (Some(a), Some(b)) => (a, b),
        _ => {
            return Err(HarnessError::InvalidCase(
                "alltoall_reduce_scatter requires global operands".into(),
            ))
        }
    };
    let a = global_a.to_f32();
    let b = global_b.to_f32();
    let mut out = matmul_f32(&a, &b, 1, case.m, case.k, case.n);
    apply_epilogue(&mut out, case.m, case.n, 1, inputs.bias.as_ref(), &inputs.scale);
    Ok(out)
}

/// Fixed epilogue order: add bias, then multiply scale(s). Token scale
/// applies before channel scale inside [`ScalePolicy::factor`].
fn apply_epilogue(
    acc: &mut [f32],
    rows: usize,
    cols: usize,
    batch: usize,
    bias: Option<&HostTensor>,
    scale: &ScalePolicy,
) {
    let bias = bias.map(HostTensor::to_f32);

    for bi in 0..batch {
        let base = bi * rows * cols;
        for row in 0..rows {
            for col in 0..cols {
                let idx = base + row * cols + col;
                if let Some(bias) = &bias {
                    acc[idx] += bias[col];
                }
                acc[idx] *= scale.factor(row, col);
            }
        }
    }
}

/// Rows belonging to `rank` after a reduce-scatter over M.
fn shard_rows(full: &[f32], m: usize, n: usize, world_size: usize, rank: usize) -> Vec<f32> {
    let rows_per_rank = m / world_size;
    let start = rank * rows_per_rank * n;
    full[start..start + rows_per_rank * n].to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;
    use matcomm_common::case::{QuantMode, ScaleKind};
    use matcomm_common::DType;
    use matcomm_sampler::CaseInputs;

    fn case(pattern: CommPattern) -> TestCase {
        TestCase {
            dtype: DType::F32,
            m: 4,
            k: 4,
            n: 4,
            batch_dims: vec![],
            world_size: 2,
            trans_a: false,
            trans_b: false,
            quant: QuantMode::None,
            bias: false,
            scale: ScaleKind::None,
            pattern,
        }
    }

    fn const_inputs(case: &TestCase, a_val: f32, b_val: f32) -> CaseInputs {
        let a = HostTensor::from_f32(case.dtype, case.shape_a(), &vec![a_val; case.m * case.k])
            .unwrap();
        let b = HostTensor::from_f32(case.dtype, case.shape_b(), &vec![b_val; case.k * case.n])
            .unwrap();
        CaseInputs {
            per_rank_a: vec![a.clone(), a],
            per_rank_b: vec![b.clone(), b],
            bias: None,
            scale: ScalePolicy::None,
            global_a: None,
            global_b: None,
        }
    }

    #[test]
    fn allreduce_sums_per_rank_products() {
        let case = case(CommPattern::Allreduce);
        let inputs = const_inputs(&case, 1.0, 1.0);
        let golden = compute_golden(&case, &inputs, 0).unwrap();
        // Each rank's product element is K; two ranks sum to 2K.
        assert!(golden.to_f32().iter().all(|&v| v == 8.0));
        assert_eq!(golden.shape(), &[4, 4]);
    }

    #[test]
    fn reduce_scatter_slices_the_summed_result() {
        let case = case(CommPattern::MatmulReduceScatter);
        let inputs = const_inputs(&case, 1.0, 1.0);
        let g0 = compute_golden(&case, &inputs, 0).unwrap();
        let g1 = compute_golden(&case, &inputs, 1).unwrap();
        assert_eq!(g0.shape(), &[2, 4]);
        assert_eq!(g1.shape(), &[2, 4]);
        assert!(g0.to_f32().iter().all(|&v| v == 8.0));
        assert_eq!(g0.to_f32(), g1.to_f32());
    }

    #[test]
    fn epilogue_adds_bias_before_scaling() {
        let mut acc = vec![10.0f32; 4];
        let bias = HostTensor::from_f32(DType::I32, vec![2], &[1.0, 2.0]).unwrap();
        let scale = ScalePolicy::PerChannel(vec![0.5, 2.0]);
        apply_epilogue(&mut acc, 2, 2, 1, Some(&bias), &scale);
        // (10 + 1) * 0.5 and (10 + 2) * 2.
        assert_eq!(acc, vec![5.5, 24.0, 5.5, 24.0]);
    }

    #[test]
    fn overflow_in_golden_is_reported_as_skippable() {
        let mut c = case(CommPattern::Allreduce);
        c.dtype = DType::F16;
        // Large operands overflow f16 on cast.
        let inputs = const_inputs(&c, 1000.0, 1000.0);
        let err = compute_golden(&c, &inputs, 0).unwrap_err();
        assert!(err.is_skippable());
    }

    #[test]
    fn missing_globals_for_alltoall_is_an_invalid_case() {
        let c = case(CommPattern::AlltoallReduceScatter);
        let inputs = const_inputs(&c, 1.0, 1.0);
        let err = compute_golden(&c, &inputs, 0).unwrap_err();
        assert!(matches!(err, HarnessError::InvalidCase(_)));
    }
}
