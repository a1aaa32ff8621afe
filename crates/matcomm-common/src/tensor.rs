//! Host-side tensors.
//!
//! A [`HostTensor`] owns a raw little-endian byte buffer in row-major order,
//! exactly as it is persisted on disk and handed to the kernel under test.
//! The buffer is not self-describing: dtype and shape travel out-of-band and
//! must be supplied by whichever component reads a file back.
//!
//! The harness does all arithmetic in f32; constructors cast working values
//! into the storage dtype and [`HostTensor::to_f32`] decodes them back, so a
//! write/read round trip is bit-identical by construction.

use half::{bf16, f16};

use crate::dtype::DType;
use crate::error::{HarnessError, Result};

/// A dense row-major tensor held as raw storage bytes.
#[derive(Debug, Clone, PartialEq)]
pub struct HostTensor {
    dtype: DType,
    shape: Vec<usize>,
    data: Vec<u8>,
}

impl HostTensor {
    /// Build a tensor by casting f32 working values into `dtype` storage.
    ///
    /// Integer dtypes truncate toward zero after rounding; callers sampling
    /// integer regimes always pass exactly-representable values.
    pub fn from_f32(dtype: DType, shape: Vec<usize>, values: &[f32]) -> Result<Self> {
        let numel: usize = shape.iter().product();
        if numel != values.len() {
            return Err(HarnessError::ShapeMismatch {
                expected: shape,
                actual: vec![values.len()],
            });
        }

        let mut data = Vec::with_capacity(numel * dtype.size_in_bytes());
        match dtype {
            DType::F16 => {
                for &v in values {
                    data.extend_from_slice(&f16::from_f32(v).to_le_bytes());
                }
            }
            DType::Bf16 => {
                for &v in values {
                    data.extend_from_slice(&bf16::from_f32(v).to_le_bytes());
                }
            }
            DType::F32 => {
                for &v in values {
                    data.extend_from_slice(&v.to_le_bytes());
                }
            }
            DType::I8 => {
                for &v in values {
                    data.push(v.round() as i8 as u8);
                }
            }
            DType::I32 => {
                for &v in values {
                    data.extend_from_slice(&(v.round() as i32).to_le_bytes());
                }
            }
        }

        Ok(Self { dtype, shape, data })
    }

    /// Wrap an existing storage buffer. Fails if the byte length does not
    /// match `shape` × element width.
    pub fn from_raw(dtype: DType, shape: Vec<usize>, data: Vec<u8>) -> Result<Self> {
        let numel: usize = shape.iter().product();
        let expected = numel * dtype.size_in_bytes();
        if data.len() != expected {
            return Err(HarnessError::ShapeMismatch {
                expected: vec![expected],
                actual: vec![data.len()],
            });
        }
        Ok(Self { dtype, shape, data })
    }

    /// Decode the storage buffer back into f32 working values.
    pub fn to_f32(&self) -> Vec<f32> {
        match self.dtype {
            DType::F16 => self
                .data
                .chunks_exact(2)
                .map(|c| f16::from_le_bytes([c[0], c[1]]).to_f32())
                .collect(),
            DType::Bf16 => self
                .data
                .chunks_exact(2)
                .map(|c| bf16::from_le_bytes([c[0], c[1]]).to_f32())
                .collect(),
            DType::F32 => self
                .data
                .chunks_exact(4)
                .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                .collect(),
            DType::I8 => self.data.iter().map(|&b| b as i8 as f32).collect(),
            DType::I32 => self
                .data
                .chunks_exact(4)
                .map(|c| i32::from_le_bytes([c[0], c[1], c[2], c[3]]) as f32)
                .collect(),
        }
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn numel(&self) -> usize {
        self.shape.iter().product()
    }

    /// Raw storage bytes, exactly as written to disk.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// True if any decoded element is NaN or infinite.
    pub fn has_non_finite(&self) -> bool {
        self.to_f32().iter().any(|v| !v.is_finite())
    }

    /// Copy out rows `[start, end)` of a 2-D tensor. Row-major layout makes
    /// this a contiguous byte range.
    pub fn row_slice(&self, start: usize, end: usize) -> Result<Self> {
        if self.shape.len() != 2 {
            return Err(HarnessError::InvalidCase(format!(
                "row slicing requires a 2-D tensor, got shape {:?}",
                self.shape
            )));
        }
        let (rows, cols) = (self.shape[0], self.shape[1]);
        if start > end || end > rows {
            return Err(HarnessError::InvalidCase(format!(
                "row slice [{start}, {end}) out of bounds for {rows} rows"
            )));
        }
        let width = cols * self.dtype.size_in_bytes();
        let data = self.data[start * width..end * width].to_vec();
        Self::from_raw(self.dtype, vec![end - start, cols], data)
    }

    /// Return a tensor holding this one's 2-D transpose.
    ///
    /// Used only when persisting operands for kernels launched with
    /// transA/transB; golden math always consumes the untransposed layout.
    pub fn transposed_2d(&self) -> Result<Self> {
        if self.shape.len() != 2 {
            return Err(HarnessError::InvalidCase(format!(
                "transpose requires a 2-D tensor, got shape {:?}",
                self.shape
            )));
        }
        let (rows, cols) = (self.shape[0], self.shape[1]);
        let width = self.dtype.size_in_bytes();
        let mut out = vec![0u8; self.data.len()];
        for r in 0..rows {
            for c in 0..cols {
                let src = (r * cols + c) * width;
                let dst = (c * rows + r) * width;
                out[dst..dst + width].copy_from_slice(&self.data[src..src + width]);
            }
        }
        Self::from_raw(self.dtype, vec![cols, rows], out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn f32_values_survive_storage_exactly() {
        let values = vec![1.5f32, -2.25, 0.0, 1024.0];
        let t = HostTensor::from_f32(DType::F32, vec![2, 2], &values).unwrap();
        assert_eq!(t.to_f32(), values);
        assert_eq!(t.as_bytes().len(), 16);
    }

    #[test]
    fn f16_cast_quantizes_to_storage_precision() {
        let t = HostTensor::from_f32(DType::F16, vec![1], &[1.0 + 1e-6]).unwrap();
        // 1.0 + 1e-6 is below f16 resolution around 1.0.
        assert_eq!(t.to_f32(), vec![1.0]);
    }

    #[test]
    fn i8_round_trip_is_exact_for_small_ints() {
        let values: Vec<f32> = (-16..16).map(|v| v as f32).collect();
        let t = HostTensor::from_f32(DType::I8, vec![32], &values).unwrap();
        assert_eq!(t.to_f32(), values);
    }

    #[test]
    fn i32_bias_range_is_exact() {
        let values = vec![-65536.0f32, -1.0, 0.0, 65536.0];
        let t = HostTensor::from_f32(DType::I32, vec![4], &values).unwrap();
        assert_eq!(t.to_f32(), values);
    }

    #[test]
    fn shape_element_count_mismatch_is_rejected() {
        let err = HostTensor::from_f32(DType::F32, vec![2, 3], &[0.0; 5]).unwrap_err();
        assert!(matches!(err, HarnessError::ShapeMismatch { .. }));
    }

    #[test]
    fn transpose_swaps_row_major_layout() {
        let values = vec![1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0];
        let t = HostTensor::from_f32(DType::F32, vec![2, 3], &values).unwrap();
        let tt = t.transposed_2d().unwrap();
        assert_eq!(tt.shape(), &[3, 2]);
        assert_eq!(tt.to_f32(), vec![1.0, 4.0, 2.0, 5.0, 3.0, 6.0]);
    }

    #[test]
    fn row_slice_extracts_contiguous_rows() {
        let values: Vec<f32> = (0..12).map(|v| v as f32).collect();
        let t = HostTensor::from_f32(DType::F32, vec![4, 3], &values).unwrap();
        let mid = t.row_slice(1, 3).unwrap();
        assert_eq!(mid.shape(), &[2, 3]);
        assert_eq!(mid.to_f32(), vec![3.0, 4.0, 5.0, 6.0, 7.0, 8.0]);
        assert!(t.row_slice(3, 5).is_err());
    }

    #[test]
    fn non_finite_detection_sees_inf_through_f16_storage() {
        let t = HostTensor::from_f32(DType::F16, vec![1], &[1e20]).unwrap();
        assert!(t.has_non_finite());
    }
}
