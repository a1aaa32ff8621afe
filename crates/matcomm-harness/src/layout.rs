//! On-disk layout of one case's data directory.
//!
//! Everything for a case lives under `<data_root>/<case_id>/`, so repeated
//! runs with identical parameters reuse the generated inputs and golden.
//! Each rank gets an isolated subdirectory holding its operand slices, its
//! golden, its captured log and, once the kernel has run, its output.

use std::fs;
use std::path::{Path, PathBuf};

use matcomm_common::case::{CommPattern, ScalePolicy, TestCase};
use matcomm_common::{io, DType, HostTensor, Result};
use matcomm_sampler::CaseInputs;

/// Well-known filenames inside a rank directory (kernel contract).
pub const OPERAND_A_FILE: &str = "a_gm.bin";
pub const OPERAND_B_FILE: &str = "b_gm.bin";
pub const BIAS_FILE: &str = "bias_gm.bin";
pub const SCALE_FILE: &str = "scale_gm.bin";
pub const GOLDEN_FILE: &str = "golden.bin";
pub const OUTPUT_FILE: &str = "shmem_output.bin";
pub const LOG_FILE: &str = "rank.log";
pub const CANCEL_FILE: &str = "cancel.signal";
const CASE_FILE: &str = "case.json";

/// Paths for one case keyed by its parameter hash.
#[derive(Debug, Clone)]
pub struct CaseLayout {
    case_dir: PathBuf,
}

impl CaseLayout {
    pub fn new(data_root: &Path, case: &TestCase) -> Self {
        Self {
            case_dir: data_root.join(case.case_id()),
        }
    }

    pub fn case_dir(&self) -> &Path {
        &self.case_dir
    }

    pub fn rank_dir(&self, rank: usize) -> PathBuf {
        self.case_dir.join(format!("rank_{rank}"))
    }

    pub fn rank_file(&self, rank: usize, name: &str) -> PathBuf {
        self.rank_dir(rank).join(name)
    }

    /// True once inputs and golden for this exact case are already on disk.
    /// The descriptor alone is not enough: a write interrupted between the
    /// tensor files and the descriptor must never pass as a complete cache.
    pub fn is_populated(&self, case: &TestCase) -> bool {
        if !self.case_dir.join(CASE_FILE).is_file() {
            return false;
        }
        (0..case.world_size).all(|rank| {
            self.rank_file(rank, OPERAND_A_FILE).is_file()
                && self.rank_file(rank, OPERAND_B_FILE).is_file()
                && self.rank_file(rank, GOLDEN_FILE).is_file()
        })
    }

    /// Persist every rank's operand/bias/scale slices and per-rank golden,
    /// then the case descriptor. The descriptor goes last: it marks the
    /// directory complete, so a failure partway through leaves a dir that
    /// [`CaseLayout::is_populated`] rejects and `prepare` regenerates.
    /// Transpose flags apply to the stored operand layout only.
    pub fn write_case(
        &self,
        case: &TestCase,
        inputs: &CaseInputs,
        goldens: &[HostTensor],
    ) -> Result<()> {
        fs::create_dir_all(&self.case_dir)?;

        for rank in 0..case.world_size {
            fs::create_dir_all(self.rank_dir(rank))?;

            let a = &inputs.per_rank_a[rank];
            let a = if case.trans_a { a.transposed_2d()? } else { a.clone() };
            io::write_tensor(&self.rank_file(rank, OPERAND_A_FILE), &a)?;

            let b = &inputs.per_rank_b[rank];
            let b = if case.trans_b { b.transposed_2d()? } else { b.clone() };
            io::write_tensor(&self.rank_file(rank, OPERAND_B_FILE), &b)?;

            if let Some(bias) = &inputs.bias {
                io::write_tensor(&self.rank_file(rank, BIAS_FILE), bias)?;
            }
            if let Some(scale) = scale_tensor(&inputs.scale)? {
                io::write_tensor(&self.rank_file(rank, SCALE_FILE), &scale)?;
            }

            io::write_tensor(&self.rank_file(rank, GOLDEN_FILE), &goldens[rank])?;
        }

        fs::write(
            self.case_dir.join(CASE_FILE),
            serde_json::to_vec_pretty(case).map_err(matcomm_common::HarnessError::from)?,
        )?;
        Ok(())
    }

    /// Read the persisted golden for `rank` back, shaped per the case.
    pub fn read_golden(&self, case: &TestCase, rank: usize) -> Result<HostTensor> {
        io::read_tensor(
            &self.rank_file(rank, GOLDEN_FILE),
            case.dtype,
            case.output_shape(),
        )
    }

    /// Read the kernel output produced by `rank`.
    pub fn read_output(&self, case: &TestCase, rank: usize) -> Result<HostTensor> {
        io::read_tensor(
            &self.rank_file(rank, OUTPUT_FILE),
            case.dtype,
            case.output_shape(),
        )
    }

    pub fn output_path(&self, rank: usize) -> PathBuf {
        self.rank_file(rank, OUTPUT_FILE)
    }
}

/// Flatten a scale policy into the single tensor the kernel receives:
/// fused policies hand over the pre-multiplied per-channel vector, vector
/// policies their vector, per-tensor a one-element tensor.
fn scale_tensor(scale: &ScalePolicy) -> Result<Option<HostTensor>> {
    let values = match scale {
        ScalePolicy::None => return Ok(None),
        ScalePolicy::PerTensor(s) => vec![*s],
        ScalePolicy::PerChannel(v) | ScalePolicy::PerToken(v) => v.clone(),
        ScalePolicy::Fused { .. } => scale
            .fused_vector()
            .expect("fused policy always has a token side"),
    };
    let len = values.len();
    Ok(Some(HostTensor::from_f32(DType::F32, vec![len], &values)?))
}

/// Shapes of the operands a given rank reads back, accounting for
/// transposition and alltoall splitting. Used by diagnostics.
pub fn stored_operand_shapes(case: &TestCase) -> (Vec<usize>, Vec<usize>) {
    let (mut shape_a, mut shape_b) = match case.pattern {
        CommPattern::AlltoallReduceScatter => (
            vec![case.m / case.world_size, case.k],
            vec![case.k / case.world_size, case.n],
        ),
        _ => (case.shape_a(), case.shape_b()),
    };
    if case.trans_a {
        shape_a.reverse();
    }
    if case.trans_b {
        shape_b.reverse();
    }
    (shape_a, shape_b)
}
