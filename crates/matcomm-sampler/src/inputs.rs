//! Full input sets for one test case.

use tracing::debug;

use matcomm_common::case::{CommPattern, QuantMode, ScalePolicy, TestCase};
use matcomm_common::{DType, HostTensor, Result};

use crate::tensor::TensorSampler;

/// Every tensor a case needs: per-rank operand pairs plus optional bias,
/// scales and (for the alltoall variant) the global un-split matrices the
/// golden is computed from.
#[derive(Debug, Clone)]
pub struct CaseInputs {
    /// Operand A per rank. For alltoall these are the sequence-parallel
    /// row-splits of `global_a`.
    pub per_rank_a: Vec<HostTensor>,
    /// Operand B per rank. For alltoall these are the tensor-parallel
    /// K-splits of `global_b`.
    pub per_rank_b: Vec<HostTensor>,
    /// int32 dequantization bias, length N. Quantized regime only.
    pub bias: Option<HostTensor>,
    pub scale: ScalePolicy,
    /// Global M×K operand; alltoall only.
    pub global_a: Option<HostTensor>,
    /// Global K×N operand; alltoall only.
    pub global_b: Option<HostTensor>,
}

/// Generate all input tensors for `case` under the sampler's mode.
pub fn sample_inputs(case: &TestCase, sampler: &mut TensorSampler) -> Result<CaseInputs> {
    case.validate()?;

    let operand_dtype = match case.quant {
        QuantMode::None => case.dtype,
        QuantMode::Int8 => DType::I8,
    };

    let mut inputs = match case.pattern {
        CommPattern::AlltoallReduceScatter => {
            // Golden comes from the un-split matrices; ranks get row splits
            // of A (sequence parallel) and of B along K (tensor parallel).
            let global_a = sample_operand(sampler, case, operand_dtype, case.shape_a())?;
            let global_b = sample_operand(sampler, case, operand_dtype, case.shape_b())?;

            let m_local = case.m / case.world_size;
            let k_local = case.k / case.world_size;
            let mut per_rank_a = Vec::with_capacity(case.world_size);
            let mut per_rank_b = Vec::with_capacity(case.world_size);
            for rank in 0..case.world_size {
                per_rank_a.push(global_a.row_slice(rank * m_local, (rank + 1) * m_local)?);
                per_rank_b.push(global_b.row_slice(rank * k_local, (rank + 1) * k_local)?);
            }

            CaseInputs {
                per_rank_a,
                per_rank_b,
                bias: None,
                scale: ScalePolicy::None,
                global_a: Some(global_a),
                global_b: Some(global_b),
            }
        }
        _ => {
            let mut per_rank_a = Vec::with_capacity(case.world_size);
            let mut per_rank_b = Vec::with_capacity(case.world_size);
            for _ in 0..case.world_size {
                per_rank_a.push(sample_operand(sampler, case, operand_dtype, case.shape_a())?);
                per_rank_b.push(sample_operand(sampler, case, operand_dtype, case.shape_b())?);
            }
            CaseInputs {
                per_rank_a,
                per_rank_b,
                bias: None,
                scale: ScalePolicy::None,
                global_a: None,
                global_b: None,
            }
        }
    };

    if case.quant == QuantMode::Int8 {
        if case.bias {
            inputs.bias = Some(sampler.bias(case.n)?);
        }
        inputs.scale = sampler.scales(case.scale, golden_rows(case), case.n);
        inputs.scale.validate(golden_rows(case), case.n)?;
    }

    debug!(case = %case.label(), "sampled case inputs");
    Ok(inputs)
}

/// Number of output rows the scale's token axis must cover before any
/// scatter slicing: the gathered M for allgather, plain M otherwise.
fn golden_rows(case: &TestCase) -> usize {
    match case.pattern {
        CommPattern::AllgatherMatmul => case.m * case.world_size,
        _ => case.m,
    }
}

fn sample_operand(
    sampler: &mut TensorSampler,
    case: &TestCase,
    dtype: DType,
    shape: Vec<usize>,
) -> Result<HostTensor> {
    match case.quant {
        QuantMode::None => sampler.continuous(case.dtype, shape),
        QuantMode::Int8 => {
            debug_assert_eq!(dtype, DType::I8);
            sampler.quantized_operand(shape)
        }
    }
}
