//! Common types for the matcomm correctness harness.
//!
//! This crate provides the foundational pieces shared by the sampler, the
//! golden computer and the process harness: storage dtypes, host tensors
//! with raw-binary persistence, the test-case model, the error taxonomy and
//! the harness configuration.

pub mod case;
pub mod config;
pub mod dtype;
pub mod error;
pub mod io;
pub mod tensor;

pub use case::{CommPattern, GenMode, QuantMode, ScalePolicy, TestCase};
pub use config::HarnessConfig;
pub use dtype::DType;
pub use error::{HarnessError, Result};
pub use tensor::HostTensor;
