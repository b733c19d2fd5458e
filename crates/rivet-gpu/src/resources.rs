//! Shared registry of cached objects and descriptor sets.

use crate::cache::{
    DescriptorSetLayoutCache, DescriptorSetLayoutKey, ObjectFactory, PipelineLayoutCache,
    PipelineLayoutKey, PushConstantRange, RenderPassCache, RenderPassKey, SamplerCache,
    SamplerKey,
};
use crate::descriptors::{DescriptorDevice, DescriptorSetAllocator};
use crate::error::Result;
use ash::vk;
use parking_lot::Mutex;
use rivet_core::RivetConfig;

/// Every native collaborator the registry needs.
pub trait ResourceDevice:
    ObjectFactory<SamplerKey>
    + ObjectFactory<DescriptorSetLayoutKey>
    + ObjectFactory<PipelineLayoutKey>
    + ObjectFactory<RenderPassKey>
    + DescriptorDevice
{
}

impl<T> ResourceDevice for T where
    T: ObjectFactory<SamplerKey>
        + ObjectFactory<DescriptorSetLayoutKey>
        + ObjectFactory<PipelineLayoutKey>
        + ObjectFactory<RenderPassKey>
        + DescriptorDevice
        + ?Sized
{
}

/// Caches for every object kind plus the descriptor set allocator.
///
/// Each component sits behind its own lock, held across lookup and creation,
/// so concurrent requests for an equal key create one native object.
/// When several locks are needed they are taken in the order
/// descriptor sets, set layouts, pipeline layouts.
pub struct GpuResources {
    config: RivetConfig,
    samplers: Mutex<SamplerCache>,
    set_layouts: Mutex<DescriptorSetLayoutCache>,
    pipeline_layouts: Mutex<PipelineLayoutCache>,
    render_passes: Mutex<RenderPassCache>,
    descriptor_sets: Mutex<DescriptorSetAllocator>,
}

impl GpuResources {
    /// Empty registry; the config is validated first.
    pub fn new(config: RivetConfig) -> Result<Self> {
        config.validate()?;
        let descriptor_sets = DescriptorSetAllocator::new(config.descriptor_pools.clone())?;
        Ok(Self {
            config,
            samplers: Mutex::new(SamplerCache::new()),
            set_layouts: Mutex::new(DescriptorSetLayoutCache::new()),
            pipeline_layouts: Mutex::new(PipelineLayoutCache::new()),
            render_passes: Mutex::new(RenderPassCache::new()),
            descriptor_sets: Mutex::new(descriptor_sets),
        })
    }

    /// Settings the registry was built with.
    pub fn config(&self) -> &RivetConfig {
        &self.config
    }

    /// Cached sampler for `key`.
    pub fn sampler<D>(&self, device: &D, key: &SamplerKey) -> Result<vk::Sampler>
    where
        D: ResourceDevice + ?Sized,
    {
        self.samplers.lock().create(device, key)
    }

    /// Cached descriptor set layout for `key`.
    pub fn set_layout<D>(
        &self,
        device: &D,
        key: &DescriptorSetLayoutKey,
    ) -> Result<vk::DescriptorSetLayout>
    where
        D: ResourceDevice + ?Sized,
    {
        self.set_layouts.lock().create(device, key)
    }

    /// Key a set layout was created from.
    pub fn set_layout_info(&self, layout: vk::DescriptorSetLayout) -> Result<DescriptorSetLayoutKey> {
        self.set_layouts.lock().create_info(layout).cloned()
    }

    /// Cached pipeline layout for `key`.
    pub fn pipeline_layout<D>(
        &self,
        device: &D,
        key: &PipelineLayoutKey,
    ) -> Result<vk::PipelineLayout>
    where
        D: ResourceDevice + ?Sized,
    {
        self.pipeline_layouts.lock().create(device, key)
    }

    /// Pipeline layout over the given set layouts, creating any of them that
    /// do not exist yet.
    pub fn pipeline_layout_for<D>(
        &self,
        device: &D,
        set_layouts: &[DescriptorSetLayoutKey],
        push_constant_ranges: &[PushConstantRange],
    ) -> Result<vk::PipelineLayout>
    where
        D: ResourceDevice + ?Sized,
    {
        let handles = {
            let mut cache = self.set_layouts.lock();
            set_layouts
                .iter()
                .map(|key| cache.create(device, key))
                .collect::<Result<Vec<_>>>()?
        };

        let key = PipelineLayoutKey::new(handles, push_constant_ranges.iter().copied());
        self.pipeline_layout(device, &key)
    }

    /// Cached render pass for `key`.
    pub fn render_pass<D>(&self, device: &D, key: &RenderPassKey) -> Result<vk::RenderPass>
    where
        D: ResourceDevice + ?Sized,
    {
        self.render_passes.lock().create(device, key)
    }

    /// Allocate a descriptor set for a layout created by this registry.
    pub fn allocate_descriptor_set<D>(
        &self,
        device: &D,
        layout: vk::DescriptorSetLayout,
    ) -> Result<vk::DescriptorSet>
    where
        D: ResourceDevice + ?Sized,
    {
        let mut sets = self.descriptor_sets.lock();
        let layouts = self.set_layouts.lock();
        sets.allocate(device, &layouts, layout)
    }

    /// Allocate a descriptor set for the layout described by `key`.
    pub fn allocate_descriptor_set_for_key<D>(
        &self,
        device: &D,
        key: &DescriptorSetLayoutKey,
    ) -> Result<vk::DescriptorSet>
    where
        D: ResourceDevice + ?Sized,
    {
        let mut sets = self.descriptor_sets.lock();
        let mut layouts = self.set_layouts.lock();
        sets.allocate_for_key(device, &mut layouts, key)
    }

    /// Return a descriptor set allocated by this registry.
    ///
    /// # Safety
    /// No pending work may reference `set`.
    pub unsafe fn release_descriptor_set<D>(&self, device: &D, set: vk::DescriptorSet) -> Result<()>
    where
        D: ResourceDevice + ?Sized,
    {
        unsafe { self.descriptor_sets.lock().release(device, set) }
    }

    /// See [`DescriptorSetAllocator::reset_all_available_pools`].
    ///
    /// # Safety
    /// Same contract as [`DescriptorSetAllocator::reset_all_available_pools`].
    pub unsafe fn reset_descriptor_pools<D>(&self, device: &D, force_all: bool) -> Result<()>
    where
        D: ResourceDevice + ?Sized,
    {
        unsafe {
            self.descriptor_sets
                .lock()
                .reset_all_available_pools(device, force_all)
        }
    }

    /// Destroy everything, dependents before what they were built from.
    ///
    /// # Safety
    /// The device must be idle and no handle from this registry may be used afterwards.
    pub unsafe fn destroy<D>(&self, device: &D)
    where
        D: ResourceDevice + ?Sized,
    {
        unsafe {
            self.descriptor_sets.lock().destroy(device);
            self.pipeline_layouts.lock().destroy(device);
            self.set_layouts.lock().destroy(device);
            self.render_passes.lock().destroy(device);
            self.samplers.lock().destroy(device);
        }
        tracing::debug!("destroyed gpu resources");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::StructuralKey;
    use crate::error::GpuError;
    use crate::mock::MockDevice;

    fn material_layout() -> DescriptorSetLayoutKey {
        DescriptorSetLayoutKey::builder()
            .uniform_buffer(0, vk::ShaderStageFlags::VERTEX)
            .sampled_image(1, vk::ShaderStageFlags::FRAGMENT)
            .build()
    }

    #[test]
    fn pipeline_layout_for_reuses_set_layouts() {
        let device = MockDevice::new();
        let resources = GpuResources::new(RivetConfig::default()).unwrap();

        let push = [PushConstantRange::new(vk::ShaderStageFlags::VERTEX, 0, 64)];
        let a = resources
            .pipeline_layout_for(&device, &[material_layout()], &push)
            .unwrap();
        let b = resources
            .pipeline_layout_for(&device, &[material_layout()], &push)
            .unwrap();

        assert_eq!(a, b);
        assert_eq!(device.created(DescriptorSetLayoutKey::KIND), 1);
        assert_eq!(device.created(PipelineLayoutKey::KIND), 1);

        let set_layout = resources.set_layout(&device, &material_layout()).unwrap();
        assert_eq!(resources.set_layout_info(set_layout).unwrap(), material_layout());
        unsafe { resources.destroy(&device) };
    }

    #[test]
    fn descriptor_sets_through_the_registry() {
        let device = MockDevice::new();
        let resources = GpuResources::new(RivetConfig::default()).unwrap();

        let set = resources
            .allocate_descriptor_set_for_key(&device, &material_layout())
            .unwrap();
        let layout = resources.set_layout(&device, &material_layout()).unwrap();
        let other = resources.allocate_descriptor_set(&device, layout).unwrap();
        assert_ne!(set, other);

        unsafe { resources.release_descriptor_set(&device, set).unwrap() };
        assert!(matches!(
            unsafe { resources.release_descriptor_set(&device, set) },
            Err(GpuError::DescriptorSetAlreadyReleased(_))
        ));
        unsafe {
            resources.reset_descriptor_pools(&device, true).unwrap();
            resources.destroy(&device);
        }
    }

    #[test]
    fn destroy_releases_every_object() {
        let device = MockDevice::new();
        let resources = GpuResources::new(RivetConfig::default()).unwrap();

        resources.sampler(&device, &SamplerKey::default()).unwrap();
        resources
            .render_pass(
                &device,
                &RenderPassKey::simple(
                    &[(vk::Format::B8G8R8A8_SRGB, vk::ImageLayout::PRESENT_SRC_KHR)],
                    Some((
                        vk::Format::D32_SFLOAT,
                        vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
                    )),
                ),
            )
            .unwrap();
        resources
            .pipeline_layout_for(&device, &[material_layout()], &[])
            .unwrap();
        resources
            .allocate_descriptor_set_for_key(&device, &material_layout())
            .unwrap();
        assert_eq!(device.live_objects(), 4);

        unsafe { resources.destroy(&device) };
        assert_eq!(device.live_objects(), 0);
        assert_eq!(device.live_pools(), 0);
    }

    #[test]
    fn invalid_config_is_rejected() {
        let mut config = RivetConfig::default();
        config.descriptor_pools.max_sets_per_pool = 0;
        assert!(GpuResources::new(config).is_err());
    }
}
