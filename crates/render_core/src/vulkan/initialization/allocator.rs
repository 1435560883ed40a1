//! Device memory sub-allocation
//!
//! Buffers and images never talk to `vkAllocateMemory` directly. They go
//! through a [`MemoryAllocator`], which production code backs with the Vulkan
//! Memory Allocator library ([`VmaAllocator`]).

use ash::vk;
use serde::{Deserialize, Serialize};
use vk_mem::Alloc;

use crate::vulkan::{Device, VulkanError, VulkanResult};

/// Intended access pattern for a block of memory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MemoryUsage {
    /// Device-local, never touched by the host
    GpuOnly,
    /// Written by the host, read by the device (uniforms, staging, dynamic vertices)
    CpuToGpu,
    /// Host memory the device can read over the bus
    CpuOnly,
    /// Written by the device, read back by the host
    GpuToCpu,
}

impl MemoryUsage {
    /// Whether allocations with this usage can be mapped
    pub fn is_host_visible(self) -> bool {
        !matches!(self, MemoryUsage::GpuOnly)
    }

    fn allocation_info(self) -> vk_mem::AllocationCreateInfo {
        let (usage, flags) = match self {
            MemoryUsage::GpuOnly => (
                vk_mem::MemoryUsage::AutoPreferDevice,
                vk_mem::AllocationCreateFlags::empty(),
            ),
            MemoryUsage::CpuToGpu => (
                vk_mem::MemoryUsage::Auto,
                vk_mem::AllocationCreateFlags::HOST_ACCESS_SEQUENTIAL_WRITE,
            ),
            MemoryUsage::CpuOnly => (
                vk_mem::MemoryUsage::AutoPreferHost,
                vk_mem::AllocationCreateFlags::HOST_ACCESS_SEQUENTIAL_WRITE,
            ),
            MemoryUsage::GpuToCpu => (
                vk_mem::MemoryUsage::Auto,
                vk_mem::AllocationCreateFlags::HOST_ACCESS_RANDOM,
            ),
        };
        vk_mem::AllocationCreateInfo {
            usage,
            flags,
            ..Default::default()
        }
    }
}

/// Sub-allocator over device memory
///
/// Implementations create the native buffer or image together with its
/// backing memory and destroy both in one call.
pub trait MemoryAllocator {
    /// Opaque allocation record returned alongside each resource
    type Allocation;

    /// Device the allocator draws memory from
    fn device(&self) -> &Device;

    /// Create a buffer and bind freshly allocated memory to it
    fn create_buffer(
        &self,
        info: &vk::BufferCreateInfo,
        usage: MemoryUsage,
    ) -> VulkanResult<(vk::Buffer, Self::Allocation)>;

    /// Destroy a buffer created by [`MemoryAllocator::create_buffer`] and free its memory
    fn destroy_buffer(&self, buffer: vk::Buffer, allocation: &mut Self::Allocation);

    /// Create an image and bind freshly allocated memory to it
    fn create_image(
        &self,
        info: &vk::ImageCreateInfo,
        usage: MemoryUsage,
    ) -> VulkanResult<(vk::Image, Self::Allocation)>;

    /// Destroy an image created by [`MemoryAllocator::create_image`] and free its memory
    fn destroy_image(&self, image: vk::Image, allocation: &mut Self::Allocation);

    /// Map an allocation into host address space
    fn map(&self, allocation: &mut Self::Allocation) -> VulkanResult<*mut u8>;

    /// Unmap a previously mapped allocation
    fn unmap(&self, allocation: &mut Self::Allocation);
}

/// [`MemoryAllocator`] backed by the Vulkan Memory Allocator library
pub struct VmaAllocator {
    // Declared before `device` so the allocator is destroyed first.
    allocator: vk_mem::Allocator,
    device: Device,
}

impl VmaAllocator {
    /// Create an allocator for the given device
    pub fn new(device: &Device) -> VulkanResult<Self> {
        let create_info = vk_mem::AllocatorCreateInfo::new(
            device.instance().raw(),
            device.raw(),
            device.physical_device(),
        );
        let allocator = vk_mem::Allocator::new(create_info)
            .map_err(VulkanError::creation("memory allocator"))?;

        log::debug!("Created memory allocator for '{}'", device.name());
        Ok(Self {
            allocator,
            device: device.clone(),
        })
    }
}

impl MemoryAllocator for VmaAllocator {
    type Allocation = vk_mem::Allocation;

    fn device(&self) -> &Device {
        &self.device
    }

    fn create_buffer(
        &self,
        info: &vk::BufferCreateInfo,
        usage: MemoryUsage,
    ) -> VulkanResult<(vk::Buffer, Self::Allocation)> {
        unsafe { self.allocator.create_buffer(info, &usage.allocation_info()) }
            .map_err(VulkanError::creation("buffer"))
    }

    fn destroy_buffer(&self, buffer: vk::Buffer, allocation: &mut Self::Allocation) {
        unsafe { self.allocator.destroy_buffer(buffer, allocation) };
    }

    fn create_image(
        &self,
        info: &vk::ImageCreateInfo,
        usage: MemoryUsage,
    ) -> VulkanResult<(vk::Image, Self::Allocation)> {
        unsafe { self.allocator.create_image(info, &usage.allocation_info()) }
            .map_err(VulkanError::creation("image"))
    }

    fn destroy_image(&self, image: vk::Image, allocation: &mut Self::Allocation) {
        unsafe { self.allocator.destroy_image(image, allocation) };
    }

    fn map(&self, allocation: &mut Self::Allocation) -> VulkanResult<*mut u8> {
        unsafe { self.allocator.map_memory(allocation) }.map_err(VulkanError::Api)
    }

    fn unmap(&self, allocation: &mut Self::Allocation) {
        unsafe { self.allocator.unmap_memory(allocation) };
    }
}
