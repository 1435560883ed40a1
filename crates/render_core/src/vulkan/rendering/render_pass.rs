//! Render pass construction
//!
//! [`RenderPassBuilder`] describes a single graphics subpass over a list of
//! colour attachments and an optional depth attachment. The common
//! present-to-screen case has a shortcut in [`RenderPass::single_colour`].

use ash::vk;

use crate::vulkan::resources::handle::DeviceHandle;
use crate::vulkan::{Device, VulkanError, VulkanResult};

/// Builder for a single-subpass [`RenderPass`]
#[derive(Default)]
pub struct RenderPassBuilder {
    colour_attachments: Vec<vk::AttachmentDescription>,
    depth_attachment: Option<vk::AttachmentDescription>,
    dependencies: Vec<vk::SubpassDependency>,
}

impl RenderPassBuilder {
    /// Start with no attachments
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a colour attachment
    pub fn colour_attachment(
        mut self,
        format: vk::Format,
        samples: vk::SampleCountFlags,
        load_op: vk::AttachmentLoadOp,
        store_op: vk::AttachmentStoreOp,
        final_layout: vk::ImageLayout,
    ) -> Self {
        self.colour_attachments.push(
            vk::AttachmentDescription::builder()
                .format(format)
                .samples(samples)
                .load_op(load_op)
                .store_op(store_op)
                .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
                .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
                .initial_layout(vk::ImageLayout::UNDEFINED)
                .final_layout(final_layout)
                .build(),
        );
        self
    }

    /// Set the depth attachment, cleared on load and discarded after the pass
    pub fn depth_attachment(mut self, format: vk::Format, samples: vk::SampleCountFlags) -> Self {
        self.depth_attachment = Some(
            vk::AttachmentDescription::builder()
                .format(format)
                .samples(samples)
                .load_op(vk::AttachmentLoadOp::CLEAR)
                .store_op(vk::AttachmentStoreOp::DONT_CARE)
                .stencil_load_op(vk::AttachmentLoadOp::CLEAR)
                .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
                .initial_layout(vk::ImageLayout::UNDEFINED)
                .final_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL)
                .build(),
        );
        self
    }

    /// Add an explicit subpass dependency
    pub fn dependency(mut self, dependency: vk::SubpassDependency) -> Self {
        self.dependencies.push(dependency);
        self
    }

    /// Add the usual dependency on previous attachment writes outside the pass
    pub fn external_dependency(self) -> Self {
        let mut stages = vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT;
        let mut access = vk::AccessFlags::COLOR_ATTACHMENT_WRITE;
        if self.depth_attachment.is_some() {
            stages |= vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS;
            access |= vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE;
        }
        let dependency = vk::SubpassDependency::builder()
            .src_subpass(vk::SUBPASS_EXTERNAL)
            .dst_subpass(0)
            .src_stage_mask(stages)
            .src_access_mask(vk::AccessFlags::empty())
            .dst_stage_mask(stages)
            .dst_access_mask(access)
            .build();
        self.dependency(dependency)
    }

    /// Create the render pass
    pub fn build(self, device: &Device) -> VulkanResult<RenderPass> {
        if self.colour_attachments.is_empty() && self.depth_attachment.is_none() {
            return Err(VulkanError::InvalidOperation {
                reason: "render pass needs at least one attachment".to_string(),
            });
        }

        let colour_refs: Vec<vk::AttachmentReference> = (0..self.colour_attachments.len())
            .map(|index| vk::AttachmentReference {
                attachment: index as u32,
                layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            })
            .collect();
        let depth_ref = vk::AttachmentReference {
            attachment: self.colour_attachments.len() as u32,
            layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        };

        let mut subpass = vk::SubpassDescription::builder()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .color_attachments(&colour_refs);
        if self.depth_attachment.is_some() {
            subpass = subpass.depth_stencil_attachment(&depth_ref);
        }
        let subpasses = [subpass.build()];

        let mut attachments = self.colour_attachments.clone();
        attachments.extend(self.depth_attachment);

        let create_info = vk::RenderPassCreateInfo::builder()
            .attachments(&attachments)
            .subpasses(&subpasses)
            .dependencies(&self.dependencies);

        let render_pass = unsafe { device.raw().create_render_pass(&create_info, None) }
            .map_err(VulkanError::creation("render pass"))?;

        log::debug!(
            "Created render pass ({} colour attachments, depth {})",
            self.colour_attachments.len(),
            self.depth_attachment.is_some()
        );
        Ok(RenderPass {
            handle: DeviceHandle::new(device, render_pass),
            colour_formats: self.colour_attachments.iter().map(|a| a.format).collect(),
            depth_format: self.depth_attachment.map(|a| a.format),
        })
    }
}

/// Render pass wrapper with RAII cleanup
pub struct RenderPass {
    handle: DeviceHandle<vk::RenderPass>,
    colour_formats: Vec<vk::Format>,
    depth_format: Option<vk::Format>,
}

impl RenderPass {
    /// One cleared colour attachment ending in `PRESENT_SRC_KHR`, plus an
    /// optional depth attachment
    pub fn single_colour(
        device: &Device,
        colour_format: vk::Format,
        depth_format: Option<vk::Format>,
    ) -> VulkanResult<Self> {
        let mut builder = RenderPassBuilder::new().colour_attachment(
            colour_format,
            vk::SampleCountFlags::TYPE_1,
            vk::AttachmentLoadOp::CLEAR,
            vk::AttachmentStoreOp::STORE,
            vk::ImageLayout::PRESENT_SRC_KHR,
        );
        if let Some(format) = depth_format {
            builder = builder.depth_attachment(format, vk::SampleCountFlags::TYPE_1);
        }
        builder.external_dependency().build(device)
    }

    /// Get the render pass handle
    pub fn handle(&self) -> vk::RenderPass {
        self.handle.raw()
    }

    /// Formats of the colour attachments, in attachment order
    pub fn colour_formats(&self) -> &[vk::Format] {
        &self.colour_formats
    }

    /// Format of the depth attachment, if any
    pub fn depth_format(&self) -> Option<vk::Format> {
        self.depth_format
    }

    /// Total attachment count a framebuffer must supply
    pub fn attachment_count(&self) -> usize {
        self.colour_formats.len() + usize::from(self.depth_format.is_some())
    }

    /// Device the render pass was created on
    pub fn device(&self) -> &Device {
        self.handle.device()
    }
}

impl Drop for RenderPass {
    fn drop(&mut self) {
        unsafe {
            self.handle
                .device()
                .raw()
                .destroy_render_pass(self.handle.raw(), None);
        }
    }
}
