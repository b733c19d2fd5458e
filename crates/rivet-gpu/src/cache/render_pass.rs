//! Render pass keys.

use super::{ObjectCache, ObjectFactory, StructuralKey};
use crate::error::Result;
use ash::vk;

/// Hashable mirror of `VkAttachmentReference`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct AttachmentReference {
    /// Index into the render pass attachments.
    pub attachment: u32,
    /// Layout during the subpass.
    pub layout: vk::ImageLayout,
}

impl AttachmentReference {
    /// Reference to `attachment` used in `layout`.
    pub fn new(attachment: u32, layout: vk::ImageLayout) -> Self {
        Self { attachment, layout }
    }

    fn to_vk(self) -> vk::AttachmentReference {
        vk::AttachmentReference::default()
            .attachment(self.attachment)
            .layout(self.layout)
    }
}

/// Hashable mirror of `VkAttachmentDescription`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct AttachmentDescription {
    pub flags: vk::AttachmentDescriptionFlags,
    pub format: vk::Format,
    pub samples: vk::SampleCountFlags,
    pub load_op: vk::AttachmentLoadOp,
    pub store_op: vk::AttachmentStoreOp,
    pub stencil_load_op: vk::AttachmentLoadOp,
    pub stencil_store_op: vk::AttachmentStoreOp,
    pub initial_layout: vk::ImageLayout,
    pub final_layout: vk::ImageLayout,
}

impl AttachmentDescription {
    /// Single-sampled attachment that is cleared on load and stored,
    /// with stencil ignored, starting from an undefined layout.
    pub fn cleared(format: vk::Format, final_layout: vk::ImageLayout) -> Self {
        Self {
            flags: vk::AttachmentDescriptionFlags::empty(),
            format,
            samples: vk::SampleCountFlags::TYPE_1,
            load_op: vk::AttachmentLoadOp::CLEAR,
            store_op: vk::AttachmentStoreOp::STORE,
            stencil_load_op: vk::AttachmentLoadOp::DONT_CARE,
            stencil_store_op: vk::AttachmentStoreOp::DONT_CARE,
            initial_layout: vk::ImageLayout::UNDEFINED,
            final_layout,
        }
    }

    fn to_vk(self) -> vk::AttachmentDescription {
        vk::AttachmentDescription::default()
            .flags(self.flags)
            .format(self.format)
            .samples(self.samples)
            .load_op(self.load_op)
            .store_op(self.store_op)
            .stencil_load_op(self.stencil_load_op)
            .stencil_store_op(self.stencil_store_op)
            .initial_layout(self.initial_layout)
            .final_layout(self.final_layout)
    }
}

impl From<vk::AttachmentDescription> for AttachmentDescription {
    fn from(d: vk::AttachmentDescription) -> Self {
        Self {
            flags: d.flags,
            format: d.format,
            samples: d.samples,
            load_op: d.load_op,
            store_op: d.store_op,
            stencil_load_op: d.stencil_load_op,
            stencil_store_op: d.stencil_store_op,
            initial_layout: d.initial_layout,
            final_layout: d.final_layout,
        }
    }
}

/// Owned subpass description.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SubpassDescription {
    pub flags: vk::SubpassDescriptionFlags,
    pub pipeline_bind_point: vk::PipelineBindPoint,
    pub input_attachments: Vec<AttachmentReference>,
    pub color_attachments: Vec<AttachmentReference>,
    /// Empty, or exactly one entry per color attachment.
    pub resolve_attachments: Vec<AttachmentReference>,
    pub depth_stencil_attachment: Option<AttachmentReference>,
    pub preserve_attachments: Vec<u32>,
}

impl Default for SubpassDescription {
    fn default() -> Self {
        Self {
            flags: vk::SubpassDescriptionFlags::empty(),
            pipeline_bind_point: vk::PipelineBindPoint::GRAPHICS,
            input_attachments: Vec::new(),
            color_attachments: Vec::new(),
            resolve_attachments: Vec::new(),
            depth_stencil_attachment: None,
            preserve_attachments: Vec::new(),
        }
    }
}

/// Native attachment arrays for one subpass, kept alive while the
/// `VkSubpassDescription` borrowing them is in use.
struct SubpassArrays {
    input: Vec<vk::AttachmentReference>,
    color: Vec<vk::AttachmentReference>,
    resolve: Vec<vk::AttachmentReference>,
    depth_stencil: Option<vk::AttachmentReference>,
}

impl SubpassDescription {
    fn arrays(&self) -> SubpassArrays {
        let convert =
            |refs: &[AttachmentReference]| refs.iter().map(|r| r.to_vk()).collect::<Vec<_>>();
        SubpassArrays {
            input: convert(&self.input_attachments),
            color: convert(&self.color_attachments),
            resolve: convert(&self.resolve_attachments),
            depth_stencil: self.depth_stencil_attachment.map(AttachmentReference::to_vk),
        }
    }

    fn to_vk<'a>(&'a self, arrays: &'a SubpassArrays) -> vk::SubpassDescription<'a> {
        let mut desc = vk::SubpassDescription::default()
            .flags(self.flags)
            .pipeline_bind_point(self.pipeline_bind_point)
            .input_attachments(&arrays.input)
            .color_attachments(&arrays.color)
            .preserve_attachments(&self.preserve_attachments);
        if !arrays.resolve.is_empty() {
            desc = desc.resolve_attachments(&arrays.resolve);
        }
        if let Some(depth) = arrays.depth_stencil.as_ref() {
            desc = desc.depth_stencil_attachment(depth);
        }
        desc
    }
}

/// Hashable mirror of `VkSubpassDependency`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubpassDependency {
    pub src_subpass: u32,
    pub dst_subpass: u32,
    pub src_stage_mask: vk::PipelineStageFlags,
    pub dst_stage_mask: vk::PipelineStageFlags,
    pub src_access_mask: vk::AccessFlags,
    pub dst_access_mask: vk::AccessFlags,
    pub dependency_flags: vk::DependencyFlags,
}

impl SubpassDependency {
    fn to_vk(self) -> vk::SubpassDependency {
        vk::SubpassDependency::default()
            .src_subpass(self.src_subpass)
            .dst_subpass(self.dst_subpass)
            .src_stage_mask(self.src_stage_mask)
            .dst_stage_mask(self.dst_stage_mask)
            .src_access_mask(self.src_access_mask)
            .dst_access_mask(self.dst_access_mask)
            .dependency_flags(self.dependency_flags)
    }
}

impl From<vk::SubpassDependency> for SubpassDependency {
    fn from(d: vk::SubpassDependency) -> Self {
        Self {
            src_subpass: d.src_subpass,
            dst_subpass: d.dst_subpass,
            src_stage_mask: d.src_stage_mask,
            dst_stage_mask: d.dst_stage_mask,
            src_access_mask: d.src_access_mask,
            dst_access_mask: d.dst_access_mask,
            dependency_flags: d.dependency_flags,
        }
    }
}

/// Structural key for a `VkRenderPass`.
///
/// Every sequence is order-sensitive: attachment indices are positional.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct RenderPassKey {
    pub flags: vk::RenderPassCreateFlags,
    pub attachments: Vec<AttachmentDescription>,
    pub subpasses: Vec<SubpassDescription>,
    pub dependencies: Vec<SubpassDependency>,
}

impl RenderPassKey {
    /// Single graphics subpass writing `colors` and an optional depth target.
    ///
    /// Each entry is `(format, final_layout)`. Attachments are cleared on
    /// load and stored. Two external dependencies order the pass against
    /// work before and after it.
    pub fn simple(
        colors: &[(vk::Format, vk::ImageLayout)],
        depth: Option<(vk::Format, vk::ImageLayout)>,
    ) -> Self {
        let mut attachments: Vec<_> = colors
            .iter()
            .map(|&(format, layout)| AttachmentDescription::cleared(format, layout))
            .collect();

        let color_attachments = (0..colors.len())
            .map(|i| {
                AttachmentReference::new(
                    u32::try_from(i).unwrap_or(u32::MAX),
                    vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
                )
            })
            .collect();

        let depth_stencil_attachment = depth.map(|(format, layout)| {
            attachments.push(AttachmentDescription::cleared(format, layout));
            AttachmentReference::new(
                u32::try_from(colors.len()).unwrap_or(u32::MAX),
                vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
            )
        });

        let color_access =
            vk::AccessFlags::COLOR_ATTACHMENT_READ | vk::AccessFlags::COLOR_ATTACHMENT_WRITE;
        let dependencies = vec![
            SubpassDependency {
                src_subpass: vk::SUBPASS_EXTERNAL,
                dst_subpass: 0,
                src_stage_mask: vk::PipelineStageFlags::BOTTOM_OF_PIPE,
                dst_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
                src_access_mask: vk::AccessFlags::MEMORY_READ,
                dst_access_mask: color_access,
                dependency_flags: vk::DependencyFlags::BY_REGION,
            },
            SubpassDependency {
                src_subpass: 0,
                dst_subpass: vk::SUBPASS_EXTERNAL,
                src_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
                dst_stage_mask: vk::PipelineStageFlags::BOTTOM_OF_PIPE,
                src_access_mask: color_access,
                dst_access_mask: vk::AccessFlags::MEMORY_READ,
                dependency_flags: vk::DependencyFlags::BY_REGION,
            },
        ];

        Self {
            flags: vk::RenderPassCreateFlags::empty(),
            attachments,
            subpasses: vec![SubpassDescription {
                color_attachments,
                depth_stencil_attachment,
                ..SubpassDescription::default()
            }],
            dependencies,
        }
    }

    /// Lend the native create info to `f`.
    pub fn with_create_info<R>(&self, f: impl FnOnce(&vk::RenderPassCreateInfo<'_>) -> R) -> R {
        let attachments: Vec<_> = self.attachments.iter().map(|a| a.to_vk()).collect();
        let arrays: Vec<_> = self.subpasses.iter().map(SubpassDescription::arrays).collect();
        let subpasses: Vec<_> = self
            .subpasses
            .iter()
            .zip(&arrays)
            .map(|(subpass, arrays)| subpass.to_vk(arrays))
            .collect();
        let dependencies: Vec<_> = self.dependencies.iter().map(|d| d.to_vk()).collect();

        let info = vk::RenderPassCreateInfo::default()
            .flags(self.flags)
            .attachments(&attachments)
            .subpasses(&subpasses)
            .dependencies(&dependencies);
        f(&info)
    }
}

impl StructuralKey for RenderPassKey {
    type Handle = vk::RenderPass;
    const KIND: &'static str = "render pass";
}

impl ObjectFactory<RenderPassKey> for ash::Device {
    fn create_object(&self, key: &RenderPassKey) -> Result<vk::RenderPass> {
        let pass = key.with_create_info(|info| unsafe { self.create_render_pass(info, None) })?;
        Ok(pass)
    }

    unsafe fn destroy_object(&self, handle: vk::RenderPass) {
        unsafe { self.destroy_render_pass(handle, None) };
    }
}

/// Cache of render passes.
pub type RenderPassCache = ObjectCache<RenderPassKey>;

#[cfg(test)]
mod tests {
    use super::*;

    const COLOR: (vk::Format, vk::ImageLayout) = (
        vk::Format::R8G8B8A8_UNORM,
        vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
    );
    const DEPTH: (vk::Format, vk::ImageLayout) = (
        vk::Format::D32_SFLOAT,
        vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
    );

    #[test]
    fn simple_pass_layout() {
        let key = RenderPassKey::simple(&[COLOR, COLOR], Some(DEPTH));
        assert_eq!(key.attachments.len(), 3);
        assert_eq!(key.subpasses.len(), 1);
        assert_eq!(key.dependencies.len(), 2);

        let subpass = &key.subpasses[0];
        assert_eq!(subpass.color_attachments.len(), 2);
        assert_eq!(
            subpass.depth_stencil_attachment.map(|r| r.attachment),
            Some(2)
        );
    }

    #[test]
    fn identical_recipes_are_equal() {
        assert_eq!(
            RenderPassKey::simple(&[COLOR], None),
            RenderPassKey::simple(&[COLOR], None)
        );
    }

    #[test]
    fn depth_presence_is_compared_both_ways() {
        let without = RenderPassKey::simple(&[COLOR], None);
        let mut with = without.clone();
        with.subpasses[0].depth_stencil_attachment = Some(AttachmentReference::new(
            1,
            vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        ));
        assert_ne!(without, with);
        assert_ne!(with, without);
    }

    #[test]
    fn sequence_length_mismatch_is_unequal() {
        let one = RenderPassKey::simple(&[COLOR], None);
        let two = RenderPassKey::simple(&[COLOR, COLOR], None);
        assert_ne!(one, two);

        let mut resolved = one.clone();
        resolved.subpasses[0].resolve_attachments =
            vec![AttachmentReference::new(0, vk::ImageLayout::GENERAL)];
        assert_ne!(one, resolved);
    }

    #[test]
    fn create_info_counts() {
        let key = RenderPassKey::simple(&[COLOR], Some(DEPTH));
        key.with_create_info(|info| {
            assert_eq!(info.attachment_count, 2);
            assert_eq!(info.subpass_count, 1);
            assert_eq!(info.dependency_count, 2);
        });
    }
}
