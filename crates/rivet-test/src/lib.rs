//! Test harness for the rivet Vulkan helpers.
//!
//! Runs the components against the in-memory device from `rivet-gpu`'s
//! `mock` feature, so no GPU is needed.

pub mod harness;

pub use harness::{check_partition, init_tracing, DescriptorScenario};
pub use rivet_gpu::mock::{MockBuffer, MockDevice};

use thiserror::Error;

/// Failure inside a scenario.
#[derive(Error, Debug)]
pub enum TestError {
    #[error("GPU error: {0}")]
    Gpu(#[from] rivet_gpu::GpuError),
    #[error("Invariant violated: {0}")]
    Invariant(String),
}

/// Result type for harness helpers.
pub type Result<T> = std::result::Result<T, TestError>;
