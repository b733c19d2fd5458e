//! GPU error types.

use ash::vk;
use thiserror::Error;

/// GPU-related errors.
#[derive(Error, Debug)]
pub enum GpuError {
    /// Vulkan error.
    #[error("Vulkan error: {0}")]
    Vulkan(#[from] vk::Result),

    /// A native object could not be created after a cache miss.
    #[error("Object creation failed: {0}")]
    ObjectCreation(String),

    /// Descriptor set allocation failed for a reason other than pool exhaustion.
    #[error("Descriptor set allocation failed: {0}")]
    DescriptorAllocation(vk::Result),

    /// The descriptor set was not handed out by this allocator.
    #[error("Descriptor set {0:?} was not allocated here")]
    UnknownDescriptorSet(vk::DescriptorSet),

    /// The descriptor set was already returned to its pool.
    #[error("Descriptor set {0:?} was already released")]
    DescriptorSetAlreadyReleased(vk::DescriptorSet),

    /// The sub-buffer id is stale or belongs to another allocator.
    #[error("Unknown or already released sub-buffer")]
    UnknownSubBuffer,

    /// Memory allocation failed.
    #[error("Memory allocation failed: {0}")]
    AllocationFailed(String),

    /// Resource not found.
    #[error("Resource not found: {0}")]
    ResourceNotFound(String),

    /// Rejected configuration.
    #[error(transparent)]
    Config(#[from] rivet_core::Error),

    /// Invalid state.
    #[error("Invalid state: {0}")]
    InvalidState(String),
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, GpuError>;
