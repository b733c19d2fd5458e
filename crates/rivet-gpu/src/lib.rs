//! Vulkan object reuse for the rivet helpers.
//!
//! This crate provides:
//! - Memoizing caches for samplers, descriptor set layouts, pipeline layouts,
//!   and render passes, keyed by their full creation parameters
//! - Pooled descriptor set allocation with whole-pool reclamation
//! - Sub-allocation of aligned ranges from one large buffer
//! - A lock-guarded registry tying the caches and the set allocator together
//!
//! Native calls go through small collaborator traits ([`ObjectFactory`],
//! [`DescriptorDevice`], [`BackingBuffer`]) implemented for `ash` types, so
//! every component can be driven by the in-memory device behind the `mock`
//! feature.

pub mod cache;
pub mod descriptors;
pub mod error;
pub mod memory;
#[cfg(any(test, feature = "mock"))]
pub mod mock;
pub mod resources;
pub mod sub_buffer;

pub use cache::{
    DescriptorSetLayoutBuilder, DescriptorSetLayoutCache, DescriptorSetLayoutKey, ObjectCache,
    ObjectFactory, PipelineLayoutCache, PipelineLayoutKey, PushConstantRange, RenderPassCache,
    RenderPassKey, SamplerCache, SamplerKey, StructuralKey,
};
pub use descriptors::{DescriptorDevice, DescriptorSetAllocator, DescriptorSetPool, PoolStats};
pub use error::{GpuError, Result};
pub use memory::{BackingBuffer, DeviceBuffer};
pub use resources::{GpuResources, ResourceDevice};
pub use sub_buffer::{Region, SubBuffer, SubBufferAllocator, SubBufferId, SubBufferStats};
