//! Images and their views
//!
//! An [`Image`] either owns its memory (created through the allocator) or
//! only wraps an image owned by someone else, such as a swapchain image.
//! Dropping an image always destroys its view; the image and its memory are
//! released through the allocator only when the image is owned.

use ash::vk;
use std::sync::Arc;

use crate::vulkan::initialization::allocator::{MemoryAllocator, MemoryUsage, VmaAllocator};
use crate::vulkan::resources::handle::DeviceHandle;
use crate::vulkan::{Device, VulkanError, VulkanResult};

/// Creation parameters for an owned 2D image
#[derive(Debug, Clone, Copy)]
pub struct ImageDesc {
    /// Image size in pixels
    pub extent: vk::Extent2D,
    /// Texel format
    pub format: vk::Format,
    /// Native usage flags
    pub usage: vk::ImageUsageFlags,
    /// Aspect the default view covers
    pub aspect: vk::ImageAspectFlags,
    /// Memory access pattern
    pub memory_usage: MemoryUsage,
    /// Samples per texel
    pub samples: vk::SampleCountFlags,
}

impl ImageDesc {
    /// Device-local colour attachment that can also be sampled and copied
    pub fn colour_2d(extent: vk::Extent2D, format: vk::Format) -> Self {
        Self {
            extent,
            format,
            usage: vk::ImageUsageFlags::COLOR_ATTACHMENT
                | vk::ImageUsageFlags::SAMPLED
                | vk::ImageUsageFlags::TRANSFER_SRC
                | vk::ImageUsageFlags::TRANSFER_DST,
            aspect: vk::ImageAspectFlags::COLOR,
            memory_usage: MemoryUsage::GpuOnly,
            samples: vk::SampleCountFlags::TYPE_1,
        }
    }

    /// Device-local depth attachment
    pub fn depth(extent: vk::Extent2D, format: vk::Format) -> Self {
        let mut aspect = vk::ImageAspectFlags::DEPTH;
        if has_stencil(format) {
            aspect |= vk::ImageAspectFlags::STENCIL;
        }
        Self {
            extent,
            format,
            usage: vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
            aspect,
            memory_usage: MemoryUsage::GpuOnly,
            samples: vk::SampleCountFlags::TYPE_1,
        }
    }

    /// Override the usage flags
    pub fn with_usage(mut self, usage: vk::ImageUsageFlags) -> Self {
        self.usage = usage;
        self
    }

    /// Override the sample count
    pub fn with_samples(mut self, samples: vk::SampleCountFlags) -> Self {
        self.samples = samples;
        self
    }
}

/// Whether a depth format carries a stencil component
pub fn has_stencil(format: vk::Format) -> bool {
    matches!(
        format,
        vk::Format::D16_UNORM_S8_UINT | vk::Format::D24_UNORM_S8_UINT | vk::Format::D32_SFLOAT_S8_UINT
    )
}

/// Create a 2D view covering the first mip level and array layer
pub(crate) fn create_view(
    device: &Device,
    image: vk::Image,
    format: vk::Format,
    aspect: vk::ImageAspectFlags,
) -> VulkanResult<vk::ImageView> {
    let create_info = vk::ImageViewCreateInfo::builder()
        .image(image)
        .view_type(vk::ImageViewType::TYPE_2D)
        .format(format)
        .components(vk::ComponentMapping {
            r: vk::ComponentSwizzle::IDENTITY,
            g: vk::ComponentSwizzle::IDENTITY,
            b: vk::ComponentSwizzle::IDENTITY,
            a: vk::ComponentSwizzle::IDENTITY,
        })
        .subresource_range(vk::ImageSubresourceRange {
            aspect_mask: aspect,
            base_mip_level: 0,
            level_count: 1,
            base_array_layer: 0,
            layer_count: 1,
        });

    unsafe { device.raw().create_image_view(&create_info, None) }
        .map_err(VulkanError::creation("image view"))
}

/// Image plus default view, optionally owning its memory
pub struct Image<A: MemoryAllocator = VmaAllocator> {
    allocation: Option<A::Allocation>,
    owned: bool,
    view: DeviceHandle<vk::ImageView>,
    image: DeviceHandle<vk::Image>,
    allocator: Arc<A>,
    format: vk::Format,
    extent: vk::Extent2D,
    aspect: vk::ImageAspectFlags,
}

impl<A: MemoryAllocator> Image<A> {
    /// Allocate a new image and create its view
    pub fn new(allocator: &Arc<A>, desc: &ImageDesc) -> VulkanResult<Self> {
        let image_info = vk::ImageCreateInfo::builder()
            .image_type(vk::ImageType::TYPE_2D)
            .format(desc.format)
            .extent(vk::Extent3D {
                width: desc.extent.width,
                height: desc.extent.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .samples(desc.samples)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(desc.usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);

        let (image, mut allocation) = allocator.create_image(&image_info, desc.memory_usage)?;
        let view = match create_view(allocator.device(), image, desc.format, desc.aspect) {
            Ok(view) => view,
            Err(e) => {
                allocator.destroy_image(image, &mut allocation);
                return Err(e);
            }
        };

        log::debug!(
            "Created {}x{} {:?} image",
            desc.extent.width,
            desc.extent.height,
            desc.format
        );
        let device = allocator.device();
        Ok(Self {
            allocation: Some(allocation),
            owned: true,
            view: DeviceHandle::new(device, view),
            image: DeviceHandle::new(device, image),
            allocator: Arc::clone(allocator),
            format: desc.format,
            extent: desc.extent,
            aspect: desc.aspect,
        })
    }

    /// Wrap an image whose memory is owned elsewhere
    ///
    /// Only the view created here is destroyed when the wrapper is dropped.
    pub fn view_only(
        allocator: &Arc<A>,
        image: vk::Image,
        format: vk::Format,
        extent: vk::Extent2D,
        aspect: vk::ImageAspectFlags,
    ) -> VulkanResult<Self> {
        let device = allocator.device();
        let view = create_view(device, image, format, aspect)?;
        Ok(Self {
            allocation: None,
            owned: false,
            view: DeviceHandle::new(device, view),
            image: DeviceHandle::new(device, image),
            allocator: Arc::clone(allocator),
            format,
            extent,
            aspect,
        })
    }

    /// Get the image handle
    pub fn handle(&self) -> vk::Image {
        self.image.raw()
    }

    /// Get the view handle
    pub fn view(&self) -> vk::ImageView {
        self.view.raw()
    }

    /// Whether this wrapper owns the image memory
    pub fn is_owned(&self) -> bool {
        self.owned
    }

    /// Texel format
    pub fn format(&self) -> vk::Format {
        self.format
    }

    /// Image size in pixels
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    /// Aspect covered by the view
    pub fn aspect(&self) -> vk::ImageAspectFlags {
        self.aspect
    }

    /// Full-image subresource range for barriers
    pub fn subresource_range(&self) -> vk::ImageSubresourceRange {
        vk::ImageSubresourceRange {
            aspect_mask: self.aspect,
            base_mip_level: 0,
            level_count: 1,
            base_array_layer: 0,
            layer_count: 1,
        }
    }
}

impl<A: MemoryAllocator> Drop for Image<A> {
    fn drop(&mut self) {
        let device = self.view.device();
        unsafe {
            let _ = device.wait_idle();
            device.raw().destroy_image_view(self.view.raw(), None);
        }
        if !self.owned {
            return;
        }
        if let Some(mut allocation) = self.allocation.take() {
            self.allocator.destroy_image(self.image.raw(), &mut allocation);
        }
    }
}
