//! Core types for the rivet Vulkan helpers.
//!
//! This crate holds everything that does not need a Vulkan device:
//! - Configuration for descriptor pools and sub-buffer allocation
//! - Alignment and chunk-rounding arithmetic
//! - The core error type

pub mod config;
pub mod error;
pub mod math;

pub use config::{DescriptorPoolConfig, FitStrategy, RivetConfig, SubBufferConfig};
pub use error::{Error, Result};

/// Library-wide defaults.
pub mod constants {
    /// Descriptor sets handed out by one native pool before another is created.
    pub const DEFAULT_MAX_SETS_PER_POOL: u32 = 10;
    /// Minimum unit, in bytes, of every sub-buffer allocation.
    ///
    /// 256 covers `minStorageBufferOffsetAlignment` and
    /// `minUniformBufferOffsetAlignment` on every desktop driver.
    pub const DEFAULT_CHUNK_GRANULARITY: u64 = 256;
}
