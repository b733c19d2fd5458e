//! Descriptor set layout keys.

use super::{ObjectCache, ObjectFactory, StructuralKey};
use crate::error::Result;
use ash::vk;
use std::collections::BTreeMap;

/// One binding slot of a descriptor set layout.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct LayoutBinding {
    /// Binding number within the set.
    pub binding: u32,
    /// Kind of descriptor.
    pub descriptor_type: vk::DescriptorType,
    /// Array length of the binding.
    pub descriptor_count: u32,
    /// Stages that access the binding.
    pub stage_flags: vk::ShaderStageFlags,
    /// Compared by handle value. The samplers usually come from a
    /// [`super::SamplerCache`], so equal samplers share a handle.
    pub immutable_samplers: Vec<vk::Sampler>,
}

impl LayoutBinding {
    /// Binding without immutable samplers.
    pub fn new(
        binding: u32,
        descriptor_type: vk::DescriptorType,
        descriptor_count: u32,
        stage_flags: vk::ShaderStageFlags,
    ) -> Self {
        Self {
            binding,
            descriptor_type,
            descriptor_count,
            stage_flags,
            immutable_samplers: Vec::new(),
        }
    }

    fn to_vk(&self) -> vk::DescriptorSetLayoutBinding<'_> {
        let mut binding = vk::DescriptorSetLayoutBinding::default()
            .binding(self.binding)
            .descriptor_type(self.descriptor_type)
            .stage_flags(self.stage_flags);
        if !self.immutable_samplers.is_empty() {
            binding = binding.immutable_samplers(&self.immutable_samplers);
        }
        binding.descriptor_count(self.descriptor_count)
    }
}

/// Structural key for a `VkDescriptorSetLayout`.
///
/// Bindings are kept sorted by binding number. Vulkan identifies bindings
/// by number, not position, so two layouts listing the same bindings in a
/// different order share one cache entry.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct DescriptorSetLayoutKey {
    flags: vk::DescriptorSetLayoutCreateFlags,
    bindings: Vec<LayoutBinding>,
}

impl DescriptorSetLayoutKey {
    /// Build a key from any binding order.
    pub fn new(
        flags: vk::DescriptorSetLayoutCreateFlags,
        bindings: impl IntoIterator<Item = LayoutBinding>,
    ) -> Self {
        let mut bindings: Vec<_> = bindings.into_iter().collect();
        bindings.sort_by_key(|b| b.binding);
        Self { flags, bindings }
    }

    /// Start a builder.
    pub fn builder() -> DescriptorSetLayoutBuilder {
        DescriptorSetLayoutBuilder::new()
    }

    /// Creation flags.
    pub fn flags(&self) -> vk::DescriptorSetLayoutCreateFlags {
        self.flags
    }

    /// Bindings in ascending binding-number order.
    pub fn bindings(&self) -> &[LayoutBinding] {
        &self.bindings
    }

    /// Pool sizes for a pool holding `max_sets` sets of this layout.
    ///
    /// Counts are summed per descriptor type and emitted in a stable order.
    pub fn pool_sizes(&self, max_sets: u32) -> Vec<vk::DescriptorPoolSize> {
        let mut per_type: BTreeMap<vk::DescriptorType, u32> = BTreeMap::new();
        for binding in &self.bindings {
            *per_type.entry(binding.descriptor_type).or_default() += binding.descriptor_count;
        }

        per_type
            .into_iter()
            .map(|(ty, count)| {
                vk::DescriptorPoolSize::default()
                    .ty(ty)
                    .descriptor_count(count.saturating_mul(max_sets))
            })
            .collect()
    }

    /// Lend the native create info to `f`.
    ///
    /// The binding array only lives for the duration of the call.
    pub fn with_create_info<R>(
        &self,
        f: impl FnOnce(&vk::DescriptorSetLayoutCreateInfo<'_>) -> R,
    ) -> R {
        let bindings: Vec<_> = self.bindings.iter().map(LayoutBinding::to_vk).collect();
        let info = vk::DescriptorSetLayoutCreateInfo::default()
            .flags(self.flags)
            .bindings(&bindings);
        f(&info)
    }
}

impl StructuralKey for DescriptorSetLayoutKey {
    type Handle = vk::DescriptorSetLayout;
    const KIND: &'static str = "descriptor set layout";
}

impl ObjectFactory<DescriptorSetLayoutKey> for ash::Device {
    fn create_object(&self, key: &DescriptorSetLayoutKey) -> Result<vk::DescriptorSetLayout> {
        let layout =
            key.with_create_info(|info| unsafe { self.create_descriptor_set_layout(info, None) })?;
        Ok(layout)
    }

    unsafe fn destroy_object(&self, handle: vk::DescriptorSetLayout) {
        unsafe { self.destroy_descriptor_set_layout(handle, None) };
    }
}

/// Cache of descriptor set layouts.
pub type DescriptorSetLayoutCache = ObjectCache<DescriptorSetLayoutKey>;

/// Descriptor set layout key builder.
#[derive(Clone, Debug, Default)]
pub struct DescriptorSetLayoutBuilder {
    flags: vk::DescriptorSetLayoutCreateFlags,
    bindings: Vec<LayoutBinding>,
}

impl DescriptorSetLayoutBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set layout creation flags.
    pub fn flags(mut self, flags: vk::DescriptorSetLayoutCreateFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Add a binding.
    pub fn binding(
        mut self,
        binding: u32,
        descriptor_type: vk::DescriptorType,
        count: u32,
        stage_flags: vk::ShaderStageFlags,
    ) -> Self {
        self.bindings.push(LayoutBinding::new(
            binding,
            descriptor_type,
            count,
            stage_flags,
        ));
        self
    }

    /// Add a storage buffer binding.
    pub fn storage_buffer(self, binding: u32, stage_flags: vk::ShaderStageFlags) -> Self {
        self.binding(binding, vk::DescriptorType::STORAGE_BUFFER, 1, stage_flags)
    }

    /// Add a uniform buffer binding.
    pub fn uniform_buffer(self, binding: u32, stage_flags: vk::ShaderStageFlags) -> Self {
        self.binding(binding, vk::DescriptorType::UNIFORM_BUFFER, 1, stage_flags)
    }

    /// Add a storage image binding.
    pub fn storage_image(self, binding: u32, stage_flags: vk::ShaderStageFlags) -> Self {
        self.binding(binding, vk::DescriptorType::STORAGE_IMAGE, 1, stage_flags)
    }

    /// Add a sampled image binding.
    pub fn sampled_image(self, binding: u32, stage_flags: vk::ShaderStageFlags) -> Self {
        self.binding(
            binding,
            vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            1,
            stage_flags,
        )
    }

    /// Add a combined image sampler binding with baked-in samplers.
    pub fn immutable_samplers(
        mut self,
        binding: u32,
        stage_flags: vk::ShaderStageFlags,
        samplers: &[vk::Sampler],
    ) -> Self {
        self.bindings.push(LayoutBinding {
            binding,
            descriptor_type: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            descriptor_count: u32::try_from(samplers.len()).unwrap_or(u32::MAX),
            stage_flags,
            immutable_samplers: samplers.to_vec(),
        });
        self
    }

    /// Add an acceleration structure binding (for ray tracing).
    pub fn acceleration_structure(self, binding: u32, stage_flags: vk::ShaderStageFlags) -> Self {
        self.binding(
            binding,
            vk::DescriptorType::ACCELERATION_STRUCTURE_KHR,
            1,
            stage_flags,
        )
    }

    /// Build the key.
    pub fn build(self) -> DescriptorSetLayoutKey {
        DescriptorSetLayoutKey::new(self.flags, self.bindings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;

    fn textured_layout() -> DescriptorSetLayoutKey {
        DescriptorSetLayoutKey::builder()
            .binding(
                0,
                vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                3,
                vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT,
            )
            .sampled_image(1, vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT)
            .uniform_buffer(2, vk::ShaderStageFlags::VERTEX)
            .build()
    }

    #[test]
    fn binding_order_is_normalized() {
        let forward = textured_layout();
        let reversed = DescriptorSetLayoutKey::new(
            vk::DescriptorSetLayoutCreateFlags::empty(),
            forward.bindings().iter().rev().cloned(),
        );
        assert_eq!(forward, reversed);
        assert_eq!(reversed.bindings()[0].binding, 0);
    }

    #[test]
    fn binding_count_mismatch_is_unequal() {
        let full = textured_layout();
        let shorter = DescriptorSetLayoutKey::new(
            full.flags(),
            full.bindings()[..2].iter().cloned(),
        );
        assert_ne!(full, shorter);
        assert_ne!(shorter, full);
    }

    #[test]
    fn flags_participate() {
        let plain = DescriptorSetLayoutKey::builder()
            .storage_buffer(0, vk::ShaderStageFlags::COMPUTE)
            .build();
        let push = DescriptorSetLayoutKey::builder()
            .flags(vk::DescriptorSetLayoutCreateFlags::PUSH_DESCRIPTOR_KHR)
            .storage_buffer(0, vk::ShaderStageFlags::COMPUTE)
            .build();
        assert_ne!(plain, push);
    }

    #[test]
    fn immutable_samplers_compare_by_handle() {
        let a = DescriptorSetLayoutKey::builder()
            .immutable_samplers(0, vk::ShaderStageFlags::FRAGMENT, &[vk::Sampler::from_raw(7)])
            .build();
        let b = DescriptorSetLayoutKey::builder()
            .immutable_samplers(0, vk::ShaderStageFlags::FRAGMENT, &[vk::Sampler::from_raw(7)])
            .build();
        let c = DescriptorSetLayoutKey::builder()
            .immutable_samplers(0, vk::ShaderStageFlags::FRAGMENT, &[vk::Sampler::from_raw(8)])
            .build();
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.bindings()[0].descriptor_count, 1);
    }

    #[test]
    fn pool_sizes_sum_per_type() {
        let sizes = textured_layout().pool_sizes(10);
        assert_eq!(sizes.len(), 2);

        let samplers = sizes
            .iter()
            .find(|s| s.ty == vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
            .unwrap();
        assert_eq!(samplers.descriptor_count, 40);

        let uniforms = sizes
            .iter()
            .find(|s| s.ty == vk::DescriptorType::UNIFORM_BUFFER)
            .unwrap();
        assert_eq!(uniforms.descriptor_count, 10);
    }

    #[test]
    fn create_info_mirrors_bindings() {
        let key = textured_layout();
        key.with_create_info(|info| {
            assert_eq!(info.binding_count, 3);
        });
    }
}
