//! Descriptor set pooling.
//!
//! Sets are drawn from fixed-capacity native pools, one family of pools per
//! descriptor set layout. Reclamation is coarse-grained: a native pool is
//! reset as a whole once every set it handed out has been released. A single
//! long-lived set therefore pins its entire pool generation.

use crate::cache::{DescriptorSetLayoutCache, DescriptorSetLayoutKey, ObjectFactory};
use crate::error::{GpuError, Result};
use ash::prelude::VkResult;
use ash::vk;
use hashbrown::hash_map::Entry;
use hashbrown::{HashMap, HashSet};
use rivet_core::DescriptorPoolConfig;

/// Native descriptor pool operations.
///
/// `ash::Device` implements this; every pool and layout passed in must
/// have been created from the same device.
pub trait DescriptorDevice {
    /// Create a pool for `max_sets` sets with the given per-type capacities.
    fn create_descriptor_pool(
        &self,
        max_sets: u32,
        pool_sizes: &[vk::DescriptorPoolSize],
    ) -> Result<vk::DescriptorPool>;

    /// Allocate one set. Exhaustion is reported as `ERROR_OUT_OF_POOL_MEMORY`
    /// or `ERROR_FRAGMENTED_POOL`.
    ///
    /// # Safety
    /// `pool` and `layout` must be live objects of this device.
    unsafe fn allocate_descriptor_set(
        &self,
        pool: vk::DescriptorPool,
        layout: vk::DescriptorSetLayout,
    ) -> VkResult<vk::DescriptorSet>;

    /// Return every set of `pool` at once.
    ///
    /// # Safety
    /// `pool` must be a live pool of this device and none of its sets may be
    /// referenced by pending work.
    unsafe fn reset_descriptor_pool(&self, pool: vk::DescriptorPool) -> Result<()>;

    /// Destroy `pool` and every set allocated from it.
    ///
    /// # Safety
    /// `pool` must be a live pool of this device and none of its sets may be
    /// referenced by pending work.
    unsafe fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool);
}

impl DescriptorDevice for ash::Device {
    fn create_descriptor_pool(
        &self,
        max_sets: u32,
        pool_sizes: &[vk::DescriptorPoolSize],
    ) -> Result<vk::DescriptorPool> {
        let create_info = vk::DescriptorPoolCreateInfo::default()
            .max_sets(max_sets)
            .pool_sizes(pool_sizes);

        let pool = unsafe { self.create_descriptor_pool(&create_info, None)? };
        Ok(pool)
    }

    unsafe fn allocate_descriptor_set(
        &self,
        pool: vk::DescriptorPool,
        layout: vk::DescriptorSetLayout,
    ) -> VkResult<vk::DescriptorSet> {
        let layouts = [layout];
        let alloc_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(pool)
            .set_layouts(&layouts);

        let sets = unsafe { self.allocate_descriptor_sets(&alloc_info)? };
        sets.first()
            .copied()
            .ok_or(vk::Result::ERROR_OUT_OF_POOL_MEMORY)
    }

    unsafe fn reset_descriptor_pool(&self, pool: vk::DescriptorPool) -> Result<()> {
        unsafe { self.reset_descriptor_pool(pool, vk::DescriptorPoolResetFlags::empty())? };
        Ok(())
    }

    unsafe fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool) {
        unsafe { self.destroy_descriptor_pool(pool, None) };
    }
}

/// Counters for one native pool.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PoolStats {
    /// Native pool handle.
    pub pool: vk::DescriptorPool,
    /// Sets the pool was sized for.
    pub capacity: u32,
    /// Sets handed out in the current generation.
    pub allocated: usize,
    /// Sets of the current generation released so far.
    pub returned: usize,
}

struct PoolInfo {
    pool: vk::DescriptorPool,
    allocated: HashSet<vk::DescriptorSet>,
    returned: HashSet<vk::DescriptorSet>,
    /// The driver reported exhaustion before `capacity` was reached.
    exhausted: bool,
}

impl PoolInfo {
    fn new(pool: vk::DescriptorPool) -> Self {
        Self {
            pool,
            allocated: HashSet::new(),
            returned: HashSet::new(),
            exhausted: false,
        }
    }

    fn has_room(&self, capacity: u32) -> bool {
        !self.exhausted && self.allocated.len() < capacity as usize
    }

    /// Every set of this generation came back.
    fn is_drained(&self, capacity: u32) -> bool {
        self.returned.len() == capacity as usize
            || (self.exhausted && self.returned.len() == self.allocated.len())
    }
}

/// Pools of descriptor sets for a single layout.
///
/// Not thread-safe; wrap it in a lock if it is shared.
pub struct DescriptorSetPool {
    layout: vk::DescriptorSetLayout,
    max_sets: u32,
    pool_sizes: Vec<vk::DescriptorPoolSize>,
    pools: Vec<PoolInfo>,
    set_to_pool: HashMap<vk::DescriptorSet, usize>,
    resets: u64,
}

impl DescriptorSetPool {
    /// Create the manager and its first native pool.
    ///
    /// `layout_key` must describe `layout`; it sizes the pools.
    ///
    /// # Safety
    /// `layout` must be a live descriptor set layout of `device` and must
    /// outlive the manager.
    pub unsafe fn new<D>(
        device: &D,
        layout: vk::DescriptorSetLayout,
        layout_key: &DescriptorSetLayoutKey,
        max_sets: u32,
    ) -> Result<Self>
    where
        D: DescriptorDevice + ?Sized,
    {
        DescriptorPoolConfig {
            max_sets_per_pool: max_sets,
        }
        .validate()?;

        let mut manager = Self {
            layout,
            max_sets,
            pool_sizes: layout_key.pool_sizes(max_sets),
            pools: Vec::new(),
            set_to_pool: HashMap::new(),
            resets: 0,
        };
        manager.create_pool(device)?;
        Ok(manager)
    }

    /// Layout every set from this manager uses.
    pub fn layout(&self) -> vk::DescriptorSetLayout {
        self.layout
    }

    /// Capacity of each native pool.
    pub fn max_sets(&self) -> u32 {
        self.max_sets
    }

    /// Native pool resets performed so far.
    pub fn reset_count(&self) -> u64 {
        self.resets
    }

    /// Allocate a set from the first pool with room, creating a pool if none has any.
    ///
    /// A pool the driver reports as exhausted is reset on the spot when all
    /// of its sets are already back, and tried once more.
    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    pub fn allocate<D>(&mut self, device: &D) -> Result<vk::DescriptorSet>
    where
        D: DescriptorDevice + ?Sized,
    {
        for index in 0..self.pools.len() {
            if !self.pools[index].has_room(self.max_sets) {
                continue;
            }
            if let Some(set) = self.try_allocate(device, index)? {
                return Ok(set);
            }

            let info = &self.pools[index];
            if !info.is_drained(self.max_sets) {
                continue;
            }
            // SAFETY: every set of this generation was released, and release
            // requires that no pending work still references it.
            unsafe { self.reset_pool(device, index)? };
            if let Some(set) = self.try_allocate(device, index)? {
                return Ok(set);
            }
        }

        let index = self.create_pool(device)?;
        // SAFETY: the pool was just created from `device`; `layout` is live per `new`.
        let set = unsafe { device.allocate_descriptor_set(self.pools[index].pool, self.layout) }
            .map_err(GpuError::DescriptorAllocation)?;
        self.record(index, set);
        Ok(set)
    }

    /// Allocate from pool `index`. Exhaustion marks the pool and yields `None`.
    fn try_allocate<D>(&mut self, device: &D, index: usize) -> Result<Option<vk::DescriptorSet>>
    where
        D: DescriptorDevice + ?Sized,
    {
        let info = &mut self.pools[index];
        // SAFETY: the pool belongs to this manager; `layout` is live per `new`.
        match unsafe { device.allocate_descriptor_set(info.pool, self.layout) } {
            Ok(set) => {
                self.record(index, set);
                Ok(Some(set))
            }
            Err(vk::Result::ERROR_OUT_OF_POOL_MEMORY | vk::Result::ERROR_FRAGMENTED_POOL) => {
                tracing::warn!(
                    pool = ?info.pool,
                    allocated = info.allocated.len(),
                    capacity = self.max_sets,
                    "descriptor pool exhausted before reaching capacity"
                );
                info.exhausted = true;
                Ok(None)
            }
            Err(e) => Err(GpuError::DescriptorAllocation(e)),
        }
    }

    fn record(&mut self, index: usize, set: vk::DescriptorSet) {
        self.pools[index].allocated.insert(set);
        self.set_to_pool.insert(set, index);
    }

    /// Return a set to its pool. The set must not be used afterwards.
    ///
    /// Once every set of a pool generation is back, the pool is reset.
    ///
    /// # Safety
    /// No pending work may reference `set`.
    pub unsafe fn release<D>(&mut self, device: &D, set: vk::DescriptorSet) -> Result<()>
    where
        D: DescriptorDevice + ?Sized,
    {
        let index = *self
            .set_to_pool
            .get(&set)
            .ok_or(GpuError::UnknownDescriptorSet(set))?;

        let info = &mut self.pools[index];
        if !info.returned.insert(set) {
            return Err(GpuError::DescriptorSetAlreadyReleased(set));
        }

        if info.is_drained(self.max_sets) {
            // SAFETY: every set of the generation is released under the same contract.
            unsafe { self.reset_pool(device, index)? };
        }
        Ok(())
    }

    /// Reset pools whose whole generation was allocated and returned.
    ///
    /// With `force_all`, every pool is reset regardless of outstanding sets,
    /// invalidating all of them.
    ///
    /// # Safety
    /// With `force_all`, no pending work may reference any set from this
    /// manager. Without it, the contract of [`Self::release`] suffices.
    pub unsafe fn reset_all_available_pools<D>(&mut self, device: &D, force_all: bool) -> Result<()>
    where
        D: DescriptorDevice + ?Sized,
    {
        for index in 0..self.pools.len() {
            let info = &self.pools[index];
            let full = info.allocated.len() == self.max_sets as usize || info.exhausted;
            if force_all || (full && info.is_drained(self.max_sets)) {
                unsafe { self.reset_pool(device, index)? };
            }
        }
        Ok(())
    }

    /// Pool a live set was allocated from.
    pub fn pool_of(&self, set: vk::DescriptorSet) -> Option<vk::DescriptorPool> {
        self.set_to_pool.get(&set).map(|&i| self.pools[i].pool)
    }

    /// Sets of `pool` handed out and not yet released.
    pub fn outstanding_sets(&self, pool: vk::DescriptorPool) -> Option<usize> {
        self.find(pool)
            .map(|info| info.allocated.len() - info.returned.len())
    }

    /// Returns true if every set of `pool`'s current generation is back.
    pub fn is_resettable(&self, pool: vk::DescriptorPool) -> bool {
        self.find(pool)
            .is_some_and(|info| info.is_drained(self.max_sets))
    }

    /// Number of native pools.
    pub fn pool_count(&self) -> usize {
        self.pools.len()
    }

    /// Sets allocated across all pools in their current generations.
    pub fn allocated_set_count(&self) -> usize {
        self.pools.iter().map(|p| p.allocated.len()).sum()
    }

    /// Counters for every pool, in creation order.
    pub fn pool_stats(&self) -> Vec<PoolStats> {
        self.pools
            .iter()
            .map(|info| PoolStats {
                pool: info.pool,
                capacity: self.max_sets,
                allocated: info.allocated.len(),
                returned: info.returned.len(),
            })
            .collect()
    }

    /// Destroy every native pool. All sets become invalid.
    ///
    /// # Safety
    /// No pending work may reference any set from this manager.
    pub unsafe fn destroy<D>(&mut self, device: &D)
    where
        D: DescriptorDevice + ?Sized,
    {
        for info in self.pools.drain(..) {
            unsafe { device.destroy_descriptor_pool(info.pool) };
        }
        self.set_to_pool.clear();
    }

    fn find(&self, pool: vk::DescriptorPool) -> Option<&PoolInfo> {
        self.pools.iter().find(|info| info.pool == pool)
    }

    fn create_pool<D>(&mut self, device: &D) -> Result<usize>
    where
        D: DescriptorDevice + ?Sized,
    {
        let pool = device.create_descriptor_pool(self.max_sets, &self.pool_sizes)?;
        self.pools.push(PoolInfo::new(pool));
        tracing::debug!(
            layout = ?self.layout,
            ?pool,
            pools = self.pools.len(),
            capacity = self.max_sets,
            "created descriptor pool"
        );
        Ok(self.pools.len() - 1)
    }

    /// Reset pool `index` natively, then forget its generation.
    ///
    /// # Safety
    /// No pending work may reference a set of that pool.
    unsafe fn reset_pool<D>(&mut self, device: &D, index: usize) -> Result<()>
    where
        D: DescriptorDevice + ?Sized,
    {
        let pool = self.pools[index].pool;
        unsafe { device.reset_descriptor_pool(pool)? };

        let info = &mut self.pools[index];
        for set in info.allocated.drain() {
            self.set_to_pool.remove(&set);
        }
        info.returned.clear();
        info.exhausted = false;
        self.resets += 1;

        tracing::trace!(?pool, "reset descriptor pool");
        Ok(())
    }
}

impl Drop for DescriptorSetPool {
    fn drop(&mut self) {
        if !self.pools.is_empty() {
            tracing::warn!(
                layout = ?self.layout,
                leaked = self.pools.len(),
                "descriptor set pool dropped without destroy()"
            );
        }
    }
}

/// Allocates descriptor sets for any layout.
///
/// Keeps one [`DescriptorSetPool`] per layout, created on first use.
pub struct DescriptorSetAllocator {
    config: DescriptorPoolConfig,
    pools: HashMap<vk::DescriptorSetLayout, DescriptorSetPool>,
    /// Sets of the current pool generations, released or not.
    set_to_layout: HashMap<vk::DescriptorSet, vk::DescriptorSetLayout>,
}

impl DescriptorSetAllocator {
    /// Create an allocator with the given pool sizing.
    pub fn new(config: DescriptorPoolConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            pools: HashMap::new(),
            set_to_layout: HashMap::new(),
        })
    }

    /// Allocate a set for `layout`.
    ///
    /// The layout must have been created through `layouts`, which is used to
    /// size the pools the first time the layout is seen. `device` must be the
    /// device `layouts` creates objects with.
    pub fn allocate<D>(
        &mut self,
        device: &D,
        layouts: &DescriptorSetLayoutCache,
        layout: vk::DescriptorSetLayout,
    ) -> Result<vk::DescriptorSet>
    where
        D: DescriptorDevice + ?Sized,
    {
        let pool = match self.pools.entry(layout) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                let key = layouts.create_info(layout)?;
                // SAFETY: `layout` is owned by `layouts`, which outlives its handles' users.
                let pool = unsafe {
                    DescriptorSetPool::new(device, layout, key, self.config.max_sets_per_pool)?
                };
                entry.insert(pool)
            }
        };

        let resets = pool.reset_count();
        let set = pool.allocate(device)?;
        if pool.reset_count() != resets {
            self.forget_reset_sets();
        }
        self.set_to_layout.insert(set, layout);
        Ok(set)
    }

    /// Allocate a set for the layout described by `key`, creating the layout if needed.
    pub fn allocate_for_key<D>(
        &mut self,
        device: &D,
        layouts: &mut DescriptorSetLayoutCache,
        key: &DescriptorSetLayoutKey,
    ) -> Result<vk::DescriptorSet>
    where
        D: DescriptorDevice + ObjectFactory<DescriptorSetLayoutKey> + ?Sized,
    {
        let layout = layouts.create(device, key)?;
        self.allocate(device, layouts, layout)
    }

    /// Return a set to the pool of its layout.
    ///
    /// # Safety
    /// See [`DescriptorSetPool::release`].
    pub unsafe fn release<D>(&mut self, device: &D, set: vk::DescriptorSet) -> Result<()>
    where
        D: DescriptorDevice + ?Sized,
    {
        let layout = *self
            .set_to_layout
            .get(&set)
            .ok_or(GpuError::UnknownDescriptorSet(set))?;
        let pool = self
            .pools
            .get_mut(&layout)
            .ok_or(GpuError::UnknownDescriptorSet(set))?;

        let resets = pool.reset_count();
        unsafe { pool.release(device, set)? };
        if pool.reset_count() != resets {
            self.forget_reset_sets();
        }
        Ok(())
    }

    /// Reset every fully returned pool of every layout.
    ///
    /// # Safety
    /// See [`DescriptorSetPool::reset_all_available_pools`].
    pub unsafe fn reset_all_available_pools<D>(&mut self, device: &D, force_all: bool) -> Result<()>
    where
        D: DescriptorDevice + ?Sized,
    {
        for pool in self.pools.values_mut() {
            unsafe { pool.reset_all_available_pools(device, force_all)? };
        }
        self.forget_reset_sets();
        Ok(())
    }

    /// Drop sets whose pool generation has been reset.
    fn forget_reset_sets(&mut self) {
        let pools = &self.pools;
        self.set_to_layout.retain(|set, layout| {
            pools
                .get(layout)
                .is_some_and(|pool| pool.pool_of(*set).is_some())
        });
    }

    /// Per-layout manager, if the layout has been used.
    pub fn pool(&self, layout: vk::DescriptorSetLayout) -> Option<&DescriptorSetPool> {
        self.pools.get(&layout)
    }

    /// Number of layouts with pools.
    pub fn layout_count(&self) -> usize {
        self.pools.len()
    }

    /// Native pools across all layouts.
    pub fn pool_count(&self) -> usize {
        self.pools.values().map(DescriptorSetPool::pool_count).sum()
    }

    /// Allocated sets across all layouts.
    pub fn allocated_set_count(&self) -> usize {
        self.pools
            .values()
            .map(DescriptorSetPool::allocated_set_count)
            .sum()
    }

    /// Destroy every per-layout pool.
    ///
    /// # Safety
    /// See [`DescriptorSetPool::destroy`].
    pub unsafe fn destroy<D>(&mut self, device: &D)
    where
        D: DescriptorDevice + ?Sized,
    {
        for (_, mut pool) in self.pools.drain() {
            unsafe { pool.destroy(device) };
        }
        self.set_to_layout.clear();
    }
}

impl Default for DescriptorSetAllocator {
    fn default() -> Self {
        Self {
            config: DescriptorPoolConfig::default(),
            pools: HashMap::new(),
            set_to_layout: HashMap::new(),
        }
    }
}
