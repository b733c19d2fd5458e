//! Pipeline layout keys.

use super::{ObjectCache, ObjectFactory, StructuralKey};
use crate::error::Result;
use ash::vk;

/// Hashable mirror of `VkPushConstantRange`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PushConstantRange {
    /// Stages that read the range.
    pub stage_flags: vk::ShaderStageFlags,
    /// Start in bytes.
    pub offset: u32,
    /// Length in bytes.
    pub size: u32,
}

impl PushConstantRange {
    /// Range of `size` bytes at `offset`, visible to `stage_flags`.
    pub fn new(stage_flags: vk::ShaderStageFlags, offset: u32, size: u32) -> Self {
        Self {
            stage_flags,
            offset,
            size,
        }
    }

    fn to_vk(self) -> vk::PushConstantRange {
        vk::PushConstantRange::default()
            .stage_flags(self.stage_flags)
            .offset(self.offset)
            .size(self.size)
    }
}

impl From<vk::PushConstantRange> for PushConstantRange {
    fn from(range: vk::PushConstantRange) -> Self {
        Self::new(range.stage_flags, range.offset, range.size)
    }
}

/// Structural key for a `VkPipelineLayout`.
///
/// Set layouts are compared by handle. They are expected to come from a
/// [`super::DescriptorSetLayoutCache`], where structurally equal layouts
/// already share a handle. Order matters: position is the set index.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct PipelineLayoutKey {
    /// Creation flags.
    pub flags: vk::PipelineLayoutCreateFlags,
    /// Set layouts, indexed by set number.
    pub set_layouts: Vec<vk::DescriptorSetLayout>,
    /// Push constant ranges.
    pub push_constant_ranges: Vec<PushConstantRange>,
}

impl PipelineLayoutKey {
    /// Key with empty flags.
    pub fn new(
        set_layouts: impl IntoIterator<Item = vk::DescriptorSetLayout>,
        push_constant_ranges: impl IntoIterator<Item = PushConstantRange>,
    ) -> Self {
        Self {
            flags: vk::PipelineLayoutCreateFlags::empty(),
            set_layouts: set_layouts.into_iter().collect(),
            push_constant_ranges: push_constant_ranges.into_iter().collect(),
        }
    }

    /// Lend the native create info to `f`.
    pub fn with_create_info<R>(&self, f: impl FnOnce(&vk::PipelineLayoutCreateInfo<'_>) -> R) -> R {
        let ranges: Vec<_> = self
            .push_constant_ranges
            .iter()
            .map(|r| r.to_vk())
            .collect();
        let info = vk::PipelineLayoutCreateInfo::default()
            .flags(self.flags)
            .set_layouts(&self.set_layouts)
            .push_constant_ranges(&ranges);
        f(&info)
    }
}

impl StructuralKey for PipelineLayoutKey {
    type Handle = vk::PipelineLayout;
    const KIND: &'static str = "pipeline layout";
}

impl ObjectFactory<PipelineLayoutKey> for ash::Device {
    fn create_object(&self, key: &PipelineLayoutKey) -> Result<vk::PipelineLayout> {
        let layout =
            key.with_create_info(|info| unsafe { self.create_pipeline_layout(info, None) })?;
        Ok(layout)
    }

    unsafe fn destroy_object(&self, handle: vk::PipelineLayout) {
        unsafe { self.destroy_pipeline_layout(handle, None) };
    }
}

/// Cache of pipeline layouts.
pub type PipelineLayoutCache = ObjectCache<PipelineLayoutKey>;

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;

    fn layouts(raw: &[u64]) -> Vec<vk::DescriptorSetLayout> {
        raw.iter()
            .map(|&r| vk::DescriptorSetLayout::from_raw(r))
            .collect()
    }

    #[test]
    fn set_layout_order_is_significant() {
        let a = PipelineLayoutKey::new(layouts(&[1, 2]), []);
        let b = PipelineLayoutKey::new(layouts(&[2, 1]), []);
        assert_ne!(a, b);
        assert_eq!(a, PipelineLayoutKey::new(layouts(&[1, 2]), []));
    }

    #[test]
    fn push_constants_participate() {
        let stages = vk::ShaderStageFlags::VERTEX;
        let a = PipelineLayoutKey::new(layouts(&[1]), [PushConstantRange::new(stages, 0, 64)]);
        let b = PipelineLayoutKey::new(layouts(&[1]), [PushConstantRange::new(stages, 0, 128)]);
        let c = PipelineLayoutKey::new(layouts(&[1]), []);
        assert_ne!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn create_info_counts() {
        let key = PipelineLayoutKey::new(
            layouts(&[1, 2, 3]),
            [PushConstantRange::from(
                vk::PushConstantRange::default()
                    .stage_flags(vk::ShaderStageFlags::FRAGMENT)
                    .size(16),
            )],
        );
        key.with_create_info(|info| {
            assert_eq!(info.set_layout_count, 3);
            assert_eq!(info.push_constant_range_count, 1);
        });
    }
}
