//! Framebuffers binding image views to a render pass

use ash::vk;

use crate::vulkan::rendering::render_pass::RenderPass;
use crate::vulkan::resources::handle::DeviceHandle;
use crate::vulkan::{VulkanError, VulkanResult};

/// Framebuffer wrapper with RAII cleanup
///
/// Framebuffers reference swapchain image views, so they must be rebuilt
/// whenever the swapchain is recreated.
pub struct Framebuffer {
    handle: DeviceHandle<vk::Framebuffer>,
    extent: vk::Extent2D,
}

impl Framebuffer {
    /// Create a framebuffer for `render_pass` from one view per attachment
    pub fn new(
        render_pass: &RenderPass,
        attachments: &[vk::ImageView],
        extent: vk::Extent2D,
    ) -> VulkanResult<Self> {
        if attachments.len() != render_pass.attachment_count() {
            return Err(VulkanError::InvalidOperation {
                reason: format!(
                    "framebuffer has {} attachments, render pass expects {}",
                    attachments.len(),
                    render_pass.attachment_count()
                ),
            });
        }

        let device = render_pass.device();
        let framebuffer_info = vk::FramebufferCreateInfo::builder()
            .render_pass(render_pass.handle())
            .attachments(attachments)
            .width(extent.width)
            .height(extent.height)
            .layers(1);

        let framebuffer = unsafe { device.raw().create_framebuffer(&framebuffer_info, None) }
            .map_err(VulkanError::creation("framebuffer"))?;

        Ok(Self {
            handle: DeviceHandle::new(device, framebuffer),
            extent,
        })
    }

    /// One framebuffer per colour view, each sharing an optional depth view
    pub fn for_views(
        render_pass: &RenderPass,
        colour_views: &[vk::ImageView],
        depth_view: Option<vk::ImageView>,
        extent: vk::Extent2D,
    ) -> VulkanResult<Vec<Self>> {
        colour_views
            .iter()
            .map(|&view| {
                let mut attachments = vec![view];
                attachments.extend(depth_view);
                Self::new(render_pass, &attachments, extent)
            })
            .collect()
    }

    /// Get the framebuffer handle
    pub fn handle(&self) -> vk::Framebuffer {
        self.handle.raw()
    }

    /// Get the framebuffer extent
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }
}

impl Drop for Framebuffer {
    fn drop(&mut self) {
        let device = self.handle.device();
        unsafe {
            let _ = device.wait_idle();
            device.raw().destroy_framebuffer(self.handle.raw(), None);
        }
    }
}
