//! Raw binary tensor persistence.
//!
//! Files are headerless: the bytes on disk are exactly the tensor's storage
//! buffer. Readers must know the dtype and shape out-of-band, which the
//! harness always does because it created the case.

use std::fs;
use std::path::Path;

use crate::dtype::DType;
use crate::error::{HarnessError, Result};
use crate::tensor::HostTensor;

/// Write a tensor's storage bytes to `path`, creating parent directories.
pub fn write_tensor(path: &Path, tensor: &HostTensor) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, tensor.as_bytes())?;
    Ok(())
}

/// Read a tensor back given its externally-known dtype and shape.
pub fn read_tensor(path: &Path, dtype: DType, shape: Vec<usize>) -> Result<HostTensor> {
    let data = fs::read(path)?;
    let numel: usize = shape.iter().product();
    let expected = numel * dtype.size_in_bytes();
    if data.len() != expected {
        return Err(HarnessError::InvalidCase(format!(
            "{} holds {} bytes, expected {} for shape {:?} {}",
            path.display(),
            data.len(),
            expected,
            shape,
            dtype,
        )));
    }
    HostTensor::from_raw(dtype, shape, data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_is_bit_identical() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.bin");

        let values = vec![0.5f32, -1.25, 3.75, 100.0, -0.001, 7.0];
        let original = HostTensor::from_f32(DType::F16, vec![2, 3], &values).unwrap();
        write_tensor(&path, &original).unwrap();

        let loaded = read_tensor(&path, DType::F16, vec![2, 3]).unwrap();
        assert_eq!(loaded.as_bytes(), original.as_bytes());
        assert_eq!(loaded.to_f32(), original.to_f32());
    }

    #[test]
    fn size_mismatch_is_reported_with_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("short.bin");
        std::fs::write(&path, [0u8; 6]).unwrap();

        let err = read_tensor(&path, DType::F32, vec![2, 2]).unwrap_err();
        assert!(err.to_string().contains("short.bin"));
    }
}
