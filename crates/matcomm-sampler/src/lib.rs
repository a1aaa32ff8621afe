//! Randomized shape and tensor sampling.
//!
//! Two generation regimes exist: a continuous one (normal draws with
//! injected low-magnitude outliers) and an int8 quantized one (small uniform
//! integers with bias and dequantization scales). Deterministic mode swaps
//! every draw for fixed values so repeated runs produce byte-identical
//! operand files.

pub mod inputs;
pub mod shape;
pub mod tensor;

pub use inputs::{sample_inputs, CaseInputs};
pub use shape::{SampledShape, ShapeSampler, STRESS_DIMS};
pub use tensor::TensorSampler;
