//! Vulkan synchronization primitives for GPU/CPU coordination
//!
//! RAII wrappers for fences (host-waitable), semaphores (GPU-only) and events
//! (host- or device-settable markers), plus the per-frame bundle used by the
//! frame loop. `Fence::wait_for` is one of the two blocking operations in this
//! crate; the other is [`Device::wait_idle`](crate::vulkan::Device::wait_idle).

use ash::vk;
use std::time::Duration;

use crate::vulkan::resources::handle::DeviceHandle;
use crate::vulkan::{Device, VulkanError, VulkanResult};

/// Global memory dependencies used between uploads and the work that reads them
///
/// Recorded with [`CommandBuffer::memory_barrier`](crate::vulkan::CommandBuffer::memory_barrier).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryDependency {
    /// Host writes (mapped uniforms) before shader reads
    HostWriteToShaderRead,
    /// Host writes (staging buffers) before transfer reads
    HostWriteToTransferRead,
    /// Transfer writes before vertex attribute fetch
    TransferWriteToVertexRead,
    /// Compute shader writes before graphics shader reads
    ComputeWriteToShaderRead,
}

impl MemoryDependency {
    /// Source and destination pipeline stages
    pub fn stages(self) -> (vk::PipelineStageFlags, vk::PipelineStageFlags) {
        let graphics_shaders =
            vk::PipelineStageFlags::VERTEX_SHADER | vk::PipelineStageFlags::FRAGMENT_SHADER;
        match self {
            Self::HostWriteToShaderRead => (vk::PipelineStageFlags::HOST, graphics_shaders),
            Self::HostWriteToTransferRead => {
                (vk::PipelineStageFlags::HOST, vk::PipelineStageFlags::TRANSFER)
            }
            Self::TransferWriteToVertexRead => (
                vk::PipelineStageFlags::TRANSFER,
                vk::PipelineStageFlags::VERTEX_INPUT,
            ),
            Self::ComputeWriteToShaderRead => {
                (vk::PipelineStageFlags::COMPUTE_SHADER, graphics_shaders)
            }
        }
    }

    /// Access masks as a native barrier
    pub fn barrier(self) -> vk::MemoryBarrier {
        let (src, dst) = match self {
            Self::HostWriteToShaderRead => {
                (vk::AccessFlags::HOST_WRITE, vk::AccessFlags::SHADER_READ)
            }
            Self::HostWriteToTransferRead => {
                (vk::AccessFlags::HOST_WRITE, vk::AccessFlags::TRANSFER_READ)
            }
            Self::TransferWriteToVertexRead => (
                vk::AccessFlags::TRANSFER_WRITE,
                vk::AccessFlags::VERTEX_ATTRIBUTE_READ,
            ),
            Self::ComputeWriteToShaderRead => {
                (vk::AccessFlags::SHADER_WRITE, vk::AccessFlags::SHADER_READ)
            }
        };
        vk::MemoryBarrier::builder()
            .src_access_mask(src)
            .dst_access_mask(dst)
            .build()
    }
}

/// Convert an optional timeout into the nanosecond count Vulkan expects
///
/// `None` waits indefinitely.
pub fn timeout_nanos(timeout: Option<Duration>) -> u64 {
    timeout.map_or(u64::MAX, |duration| {
        u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX)
    })
}

/// GPU-GPU synchronization primitive
///
/// Signaled by one queue operation and waited on by another; the host can
/// neither wait on nor query it.
pub struct Semaphore {
    handle: DeviceHandle<vk::Semaphore>,
}

impl Semaphore {
    /// Create a new semaphore
    pub fn new(device: &Device) -> VulkanResult<Self> {
        let create_info = vk::SemaphoreCreateInfo::builder();
        let semaphore = unsafe { device.raw().create_semaphore(&create_info, None) }
            .map_err(VulkanError::creation("semaphore"))?;

        Ok(Self {
            handle: DeviceHandle::new(device, semaphore),
        })
    }

    /// Get the semaphore handle
    pub fn handle(&self) -> vk::Semaphore {
        self.handle.raw()
    }
}

impl Drop for Semaphore {
    fn drop(&mut self) {
        let device = self.handle.device();
        unsafe {
            let _ = device.wait_idle();
            device.raw().destroy_semaphore(self.handle.raw(), None);
        }
    }
}

/// Host-waitable binary fence
pub struct Fence {
    handle: DeviceHandle<vk::Fence>,
}

impl Fence {
    /// Create a new fence, optionally already signaled
    pub fn new(device: &Device, signaled: bool) -> VulkanResult<Self> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };

        let create_info = vk::FenceCreateInfo::builder().flags(flags);
        let fence = unsafe { device.raw().create_fence(&create_info, None) }
            .map_err(VulkanError::creation("fence"))?;

        Ok(Self {
            handle: DeviceHandle::new(device, fence),
        })
    }

    /// Block until the fence is signaled or the timeout elapses
    ///
    /// Returns `Ok(false)` on timeout. `None` waits indefinitely.
    pub fn wait_for(&self, timeout: Option<Duration>) -> VulkanResult<bool> {
        let device = self.handle.device();
        let result = unsafe {
            device
                .raw()
                .wait_for_fences(&[self.handle.raw()], true, timeout_nanos(timeout))
        };
        match device.track(result) {
            Ok(()) => Ok(true),
            Err(vk::Result::TIMEOUT) => Ok(false),
            Err(e) => Err(VulkanError::Api(e)),
        }
    }

    /// Reset the fence to unsignaled
    pub fn reset(&self) -> VulkanResult<()> {
        unsafe { self.handle.device().raw().reset_fences(&[self.handle.raw()]) }
            .map_err(VulkanError::Api)
    }

    /// Query the fence state without blocking
    pub fn is_signaled(&self) -> VulkanResult<bool> {
        unsafe { self.handle.device().raw().get_fence_status(self.handle.raw()) }
            .map_err(VulkanError::Api)
    }

    /// Get the fence handle
    pub fn handle(&self) -> vk::Fence {
        self.handle.raw()
    }
}

impl Drop for Fence {
    fn drop(&mut self) {
        let device = self.handle.device();
        unsafe {
            let _ = device.wait_idle();
            device.raw().destroy_fence(self.handle.raw(), None);
        }
    }
}

/// Single-bit marker settable from the host or from a command buffer
pub struct Event {
    handle: DeviceHandle<vk::Event>,
}

impl Event {
    /// Create a new event in the unset state
    pub fn new(device: &Device) -> VulkanResult<Self> {
        let create_info = vk::EventCreateInfo::builder();
        let event = unsafe { device.raw().create_event(&create_info, None) }
            .map_err(VulkanError::creation("event"))?;

        Ok(Self {
            handle: DeviceHandle::new(device, event),
        })
    }

    /// Set the event from the host
    pub fn set(&self) -> VulkanResult<()> {
        unsafe { self.handle.device().raw().set_event(self.handle.raw()) }.map_err(VulkanError::Api)
    }

    /// Reset the event from the host
    pub fn reset(&self) -> VulkanResult<()> {
        unsafe { self.handle.device().raw().reset_event(self.handle.raw()) }
            .map_err(VulkanError::Api)
    }

    /// Whether the event is currently set
    pub fn status(&self) -> VulkanResult<bool> {
        unsafe { self.handle.device().raw().get_event_status(self.handle.raw()) }
            .map_err(VulkanError::Api)
    }

    /// Get the event handle
    pub fn handle(&self) -> vk::Event {
        self.handle.raw()
    }
}

impl Drop for Event {
    fn drop(&mut self) {
        let device = self.handle.device();
        unsafe {
            let _ = device.wait_idle();
            device.raw().destroy_event(self.handle.raw(), None);
        }
    }
}

/// Frame synchronization objects for in-flight frame management
pub struct FrameSync {
    /// Semaphore signaled when swapchain image becomes available
    pub image_available: Semaphore,
    /// Semaphore signaled when frame rendering is complete
    pub render_finished: Semaphore,
    /// Fence for CPU-GPU synchronization of frame
    pub in_flight: Fence,
}

impl FrameSync {
    /// Create frame synchronization objects
    pub fn new(device: &Device) -> VulkanResult<Self> {
        Ok(Self {
            image_available: Semaphore::new(device)?,
            render_finished: Semaphore::new(device)?,
            // Signaled so the first wait on this frame returns immediately.
            in_flight: Fence::new(device, true)?,
        })
    }
}
