//! Shared setup and invariant checks for the scenario tests.

use ash::vk;
use rivet_gpu::mock::MockDevice;
use rivet_gpu::{DescriptorSetLayoutCache, DescriptorSetLayoutKey, DescriptorSetPool, SubBufferAllocator};
use tracing_subscriber::EnvFilter;

use crate::{Result, TestError};

/// Install a test-friendly subscriber, filtered by `RUST_LOG`.
///
/// Safe to call from every test; only the first call installs anything.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Check that the regions of `allocator` tile the whole buffer in order and
/// that every region's aligned range lies inside its span.
pub fn check_partition(allocator: &SubBufferAllocator) -> Result<()> {
    let mut cursor = 0;
    for (index, region) in allocator.allocations().iter().enumerate() {
        if region.allocation_offset != cursor {
            return Err(TestError::Invariant(format!(
                "region {index} starts at {} but the previous one ended at {cursor}",
                region.allocation_offset
            )));
        }
        if region.allocation_size == 0 {
            return Err(TestError::Invariant(format!("region {index} is empty")));
        }
        if region.offset % region.alignment != 0 {
            return Err(TestError::Invariant(format!(
                "region {index} offset {} is not a multiple of {}",
                region.offset, region.alignment
            )));
        }
        if region.offset < region.allocation_offset || region.offset + region.size > region.end() {
            return Err(TestError::Invariant(format!(
                "region {index} range escapes its span"
            )));
        }
        cursor = region.end();
    }

    if cursor != allocator.buffer_size() {
        return Err(TestError::Invariant(format!(
            "regions cover {cursor} of {} bytes",
            allocator.buffer_size()
        )));
    }
    Ok(())
}

/// One layout's descriptor set pool on a mock device.
pub struct DescriptorScenario {
    /// Device the pool and layout live on.
    pub device: MockDevice,
    /// Cache owning `layout`.
    pub layouts: DescriptorSetLayoutCache,
    /// Pool under test.
    pub pool: DescriptorSetPool,
    /// Layout every set uses.
    pub layout: vk::DescriptorSetLayout,
}

impl DescriptorScenario {
    /// Pool of `capacity` sets for a uniform-buffer plus texture layout.
    pub fn new(capacity: u32) -> Result<Self> {
        let device = MockDevice::new();
        let key = DescriptorSetLayoutKey::builder()
            .uniform_buffer(0, vk::ShaderStageFlags::VERTEX)
            .sampled_image(1, vk::ShaderStageFlags::FRAGMENT)
            .build();

        let mut layouts = DescriptorSetLayoutCache::new();
        let layout = layouts.create(&device, &key)?;
        // SAFETY: `layouts` owns `layout` and is destroyed after the pool.
        let pool = unsafe { DescriptorSetPool::new(&device, layout, &key, capacity)? };
        Ok(Self {
            device,
            layouts,
            pool,
            layout,
        })
    }

    /// Allocate one set from the pool.
    pub fn allocate(&mut self) -> Result<vk::DescriptorSet> {
        Ok(self.pool.allocate(&self.device)?)
    }

    /// Return a set. The mock device never has pending work.
    pub fn release(&mut self, set: vk::DescriptorSet) -> Result<()> {
        Ok(unsafe { self.pool.release(&self.device, set)? })
    }

    /// Every pool's counters stay within `0 <= returned <= allocated <= capacity`.
    pub fn check_counters(&self) -> Result<()> {
        for stats in self.pool.pool_stats() {
            if stats.allocated > stats.capacity as usize || stats.returned > stats.allocated {
                return Err(TestError::Invariant(format!("pool counters out of range: {stats:?}")));
            }
        }
        Ok(())
    }
}

impl Drop for DescriptorScenario {
    fn drop(&mut self) {
        unsafe {
            self.pool.destroy(&self.device);
            self.layouts.destroy(&self.device);
        }
    }
}
