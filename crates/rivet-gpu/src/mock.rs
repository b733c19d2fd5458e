//! Deterministic in-memory device for tests.
//!
//! Handles are sequential integers. Pools enforce their set capacity the way
//! a driver would, by failing with `ERROR_OUT_OF_POOL_MEMORY`.

use crate::cache::{ObjectFactory, StructuralKey};
use crate::descriptors::DescriptorDevice;
use crate::error::{GpuError, Result};
use crate::memory::BackingBuffer;
use ash::prelude::VkResult;
use ash::vk::{self, Handle};
use hashbrown::HashMap;
use std::cell::{Cell, RefCell};
use std::sync::atomic::{AtomicU64, Ordering};

/// Handles at or above this value are never produced by a [`MockDevice`].
const FOREIGN_BASE: u64 = 0xdead_0000_0000;

#[derive(Debug)]
struct MockPool {
    max_sets: u32,
    allocated: u32,
}

/// Fake device implementing every native collaborator trait.
#[derive(Debug)]
pub struct MockDevice {
    next_handle: Cell<u64>,
    next_foreign: Cell<u64>,
    created: RefCell<HashMap<&'static str, usize>>,
    destroyed: RefCell<HashMap<&'static str, usize>>,
    live: RefCell<HashMap<u64, &'static str>>,
    fail_creation: Cell<bool>,
    pools: RefCell<HashMap<u64, MockPool>>,
    pool_resets: Cell<usize>,
    fail_allocation: Cell<Option<vk::Result>>,
    fail_reset: Cell<bool>,
}

impl MockDevice {
    /// Device with no objects and no pending failures.
    pub fn new() -> Self {
        Self {
            next_handle: Cell::new(1),
            next_foreign: Cell::new(FOREIGN_BASE),
            created: RefCell::new(HashMap::new()),
            destroyed: RefCell::new(HashMap::new()),
            live: RefCell::new(HashMap::new()),
            fail_creation: Cell::new(false),
            pools: RefCell::new(HashMap::new()),
            pool_resets: Cell::new(0),
            fail_allocation: Cell::new(None),
            fail_reset: Cell::new(false),
        }
    }

    fn next_raw(&self) -> u64 {
        let raw = self.next_handle.get();
        self.next_handle.set(raw + 1);
        raw
    }

    /// Objects of `kind` created so far.
    pub fn created(&self, kind: &str) -> usize {
        self.created.borrow().get(kind).copied().unwrap_or(0)
    }

    /// Objects of `kind` destroyed so far.
    pub fn destroyed(&self, kind: &str) -> usize {
        self.destroyed.borrow().get(kind).copied().unwrap_or(0)
    }

    /// Cached objects created and not yet destroyed, of every kind.
    pub fn live_objects(&self) -> usize {
        self.live.borrow().len()
    }

    /// Make the next object creation fail with `ERROR_OUT_OF_DEVICE_MEMORY`.
    pub fn fail_next_creation(&self) {
        self.fail_creation.set(true);
    }

    /// Make the next descriptor set allocation fail with `result`.
    pub fn fail_next_descriptor_allocation(&self, result: vk::Result) {
        self.fail_allocation.set(Some(result));
    }

    /// Make the next pool reset fail with `ERROR_DEVICE_LOST`.
    pub fn fail_next_pool_reset(&self) {
        self.fail_reset.set(true);
    }

    /// Native pool resets so far.
    pub fn pool_resets(&self) -> usize {
        self.pool_resets.get()
    }

    /// Descriptor pools created and not yet destroyed.
    pub fn live_pools(&self) -> usize {
        self.pools.borrow().len()
    }

    /// A set handle this device never allocated.
    pub fn foreign_descriptor_set(&self) -> vk::DescriptorSet {
        vk::DescriptorSet::from_raw(self.next_foreign_raw())
    }

    /// A layout handle this device never created.
    pub fn foreign_layout(&self) -> vk::DescriptorSetLayout {
        vk::DescriptorSetLayout::from_raw(self.next_foreign_raw())
    }

    fn next_foreign_raw(&self) -> u64 {
        let raw = self.next_foreign.get();
        self.next_foreign.set(raw + 1);
        raw
    }
}

impl Default for MockDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: StructuralKey> ObjectFactory<K> for MockDevice {
    fn create_object(&self, _key: &K) -> Result<K::Handle> {
        if self.fail_creation.replace(false) {
            return Err(GpuError::Vulkan(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY));
        }

        let raw = self.next_raw();
        *self.created.borrow_mut().entry(K::KIND).or_default() += 1;
        self.live.borrow_mut().insert(raw, K::KIND);
        Ok(K::Handle::from_raw(raw))
    }

    unsafe fn destroy_object(&self, handle: K::Handle) {
        if self.live.borrow_mut().remove(&handle.as_raw()).is_some() {
            *self.destroyed.borrow_mut().entry(K::KIND).or_default() += 1;
        }
    }
}

impl DescriptorDevice for MockDevice {
    fn create_descriptor_pool(
        &self,
        max_sets: u32,
        _pool_sizes: &[vk::DescriptorPoolSize],
    ) -> Result<vk::DescriptorPool> {
        let raw = self.next_raw();
        self.pools.borrow_mut().insert(
            raw,
            MockPool {
                max_sets,
                allocated: 0,
            },
        );
        Ok(vk::DescriptorPool::from_raw(raw))
    }

    unsafe fn allocate_descriptor_set(
        &self,
        pool: vk::DescriptorPool,
        _layout: vk::DescriptorSetLayout,
    ) -> VkResult<vk::DescriptorSet> {
        if let Some(result) = self.fail_allocation.take() {
            return Err(result);
        }

        let mut pools = self.pools.borrow_mut();
        let info = pools
            .get_mut(&pool.as_raw())
            .ok_or(vk::Result::ERROR_UNKNOWN)?;
        if info.allocated >= info.max_sets {
            return Err(vk::Result::ERROR_OUT_OF_POOL_MEMORY);
        }
        info.allocated += 1;
        drop(pools);

        Ok(vk::DescriptorSet::from_raw(self.next_raw()))
    }

    unsafe fn reset_descriptor_pool(&self, pool: vk::DescriptorPool) -> Result<()> {
        if self.fail_reset.replace(false) {
            return Err(GpuError::Vulkan(vk::Result::ERROR_DEVICE_LOST));
        }
        let mut pools = self.pools.borrow_mut();
        let info = pools
            .get_mut(&pool.as_raw())
            .ok_or(GpuError::Vulkan(vk::Result::ERROR_UNKNOWN))?;
        info.allocated = 0;
        self.pool_resets.set(self.pool_resets.get() + 1);
        Ok(())
    }

    unsafe fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool) {
        self.pools.borrow_mut().remove(&pool.as_raw());
    }
}

static NEXT_BUFFER: AtomicU64 = AtomicU64::new(1);

/// Buffer handle and size with no memory behind them.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MockBuffer {
    buffer: vk::Buffer,
    size: u64,
}

impl MockBuffer {
    /// Fresh buffer handle of `size` bytes.
    pub fn new(size: u64) -> Self {
        let raw = NEXT_BUFFER.fetch_add(1, Ordering::Relaxed);
        Self {
            buffer: vk::Buffer::from_raw(raw),
            size,
        }
    }
}

impl BackingBuffer for MockBuffer {
    fn raw(&self) -> vk::Buffer {
        self.buffer
    }

    fn size(&self) -> u64 {
        self.size
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::SamplerKey;

    #[test]
    fn pools_enforce_capacity() {
        let device = MockDevice::new();
        let pool = DescriptorDevice::create_descriptor_pool(&device, 2, &[]).unwrap();
        let layout = device.foreign_layout();

        unsafe {
            device.allocate_descriptor_set(pool, layout).unwrap();
            device.allocate_descriptor_set(pool, layout).unwrap();
            assert_eq!(
                device.allocate_descriptor_set(pool, layout),
                Err(vk::Result::ERROR_OUT_OF_POOL_MEMORY)
            );

            device.fail_next_pool_reset();
            assert!(DescriptorDevice::reset_descriptor_pool(&device, pool).is_err());
            assert_eq!(device.pool_resets(), 0);

            DescriptorDevice::reset_descriptor_pool(&device, pool).unwrap();
            assert!(device.allocate_descriptor_set(pool, layout).is_ok());
            DescriptorDevice::destroy_descriptor_pool(&device, pool);
        }
        assert_eq!(device.live_pools(), 0);
    }

    #[test]
    fn object_counters_track_kind() {
        let device = MockDevice::new();
        let key = SamplerKey::default();
        let handle = ObjectFactory::<SamplerKey>::create_object(&device, &key).unwrap();

        assert_eq!(device.created(SamplerKey::KIND), 1);
        assert_eq!(device.created("render pass"), 0);
        unsafe { ObjectFactory::<SamplerKey>::destroy_object(&device, handle) };
        assert_eq!(device.destroyed(SamplerKey::KIND), 1);
        assert_eq!(device.live_objects(), 0);
    }
}
