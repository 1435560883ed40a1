//! Allocator-backed buffers with host transfers
//!
//! Writes and reads map the allocation, copy, and unmap again. A transfer is
//! checked against the buffer size before anything is mapped, so an invalid
//! request never touches memory.

use ash::vk;
use bytemuck::Pod;
use std::sync::{Arc, Mutex, PoisonError};

use crate::vulkan::initialization::allocator::{MemoryAllocator, MemoryUsage, VmaAllocator};
use crate::vulkan::resources::handle::DeviceHandle;
use crate::vulkan::{VulkanError, VulkanResult};

/// Buffer wrapper owning its memory allocation
pub struct Buffer<A: MemoryAllocator = VmaAllocator> {
    allocation: Mutex<Option<A::Allocation>>,
    handle: DeviceHandle<vk::Buffer>,
    allocator: Arc<A>,
    size: vk::DeviceSize,
    usage: vk::BufferUsageFlags,
    memory_usage: MemoryUsage,
}

impl<A: MemoryAllocator> Buffer<A> {
    /// Create a buffer of `size` bytes
    pub fn new(
        allocator: &Arc<A>,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        memory_usage: MemoryUsage,
    ) -> VulkanResult<Self> {
        if size == 0 {
            return Err(VulkanError::InvalidOperation {
                reason: "buffer size must be non-zero".to_string(),
            });
        }

        let buffer_info = vk::BufferCreateInfo::builder()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let (buffer, allocation) = allocator.create_buffer(&buffer_info, memory_usage)?;

        log::debug!("Created {} byte buffer ({:?}, {:?})", size, usage, memory_usage);
        Ok(Self {
            allocation: Mutex::new(Some(allocation)),
            handle: DeviceHandle::new(allocator.device(), buffer),
            allocator: Arc::clone(allocator),
            size,
            usage,
            memory_usage,
        })
    }

    /// Create a host-visible buffer initialised with `data`
    pub fn with_data<T: Pod>(
        allocator: &Arc<A>,
        usage: vk::BufferUsageFlags,
        data: &[T],
    ) -> VulkanResult<Self> {
        let bytes: &[u8] = bytemuck::cast_slice(data);
        let buffer = Self::new(
            allocator,
            bytes.len() as vk::DeviceSize,
            usage,
            MemoryUsage::CpuToGpu,
        )?;
        buffer.write_bytes(0, bytes)?;
        Ok(buffer)
    }

    /// Get buffer handle
    pub fn handle(&self) -> vk::Buffer {
        self.handle.raw()
    }

    /// Get size
    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }

    /// Native usage flags the buffer was created with
    pub fn usage(&self) -> vk::BufferUsageFlags {
        self.usage
    }

    /// Memory access pattern the buffer was allocated for
    pub fn memory_usage(&self) -> MemoryUsage {
        self.memory_usage
    }

    /// Copy raw bytes into the buffer at `offset`
    pub fn write_bytes(&self, offset: vk::DeviceSize, data: &[u8]) -> VulkanResult<()> {
        self.with_mapped(offset, data.len() as u64, |dst| {
            dst.copy_from_slice(data);
        })
    }

    /// Copy `f32` values into the buffer at `offset`
    pub fn write_floats(&self, offset: vk::DeviceSize, data: &[f32]) -> VulkanResult<()> {
        self.write_pod(offset, data)
    }

    /// Copy `i32` values into the buffer at `offset`
    pub fn write_ints(&self, offset: vk::DeviceSize, data: &[i32]) -> VulkanResult<()> {
        self.write_pod(offset, data)
    }

    /// Copy any plain-old-data slice into the buffer at `offset`
    pub fn write_pod<T: Pod>(&self, offset: vk::DeviceSize, data: &[T]) -> VulkanResult<()> {
        self.write_bytes(offset, bytemuck::cast_slice(data))
    }

    /// Read `len` bytes starting at `offset`
    pub fn read_bytes(&self, offset: vk::DeviceSize, len: usize) -> VulkanResult<Vec<u8>> {
        let mut out = vec![0u8; len];
        self.with_mapped(offset, len as u64, |src| out.copy_from_slice(src))?;
        Ok(out)
    }

    /// Read `count` `f32` values starting at `offset`
    pub fn read_floats(&self, offset: vk::DeviceSize, count: usize) -> VulkanResult<Vec<f32>> {
        self.read_pod(offset, count)
    }

    /// Read `count` `i32` values starting at `offset`
    pub fn read_ints(&self, offset: vk::DeviceSize, count: usize) -> VulkanResult<Vec<i32>> {
        self.read_pod(offset, count)
    }

    fn read_pod<T: Pod>(&self, offset: vk::DeviceSize, count: usize) -> VulkanResult<Vec<T>> {
        let mut out = vec![T::zeroed(); count];
        let bytes: &mut [u8] = bytemuck::cast_slice_mut(&mut out);
        let len = bytes.len() as u64;
        self.with_mapped(offset, len, |src| bytes.copy_from_slice(src))?;
        Ok(out)
    }

    /// Map, hand the `[offset, offset + len)` window to `f`, then unmap
    fn with_mapped(
        &self,
        offset: vk::DeviceSize,
        len: u64,
        f: impl FnOnce(&mut [u8]),
    ) -> VulkanResult<()> {
        let out_of_bounds = VulkanError::OutOfBounds {
            offset,
            len,
            size: self.size,
        };
        match offset.checked_add(len) {
            Some(end) if end <= self.size => {}
            _ => return Err(out_of_bounds),
        }
        if !self.memory_usage.is_host_visible() {
            return Err(VulkanError::InvalidOperation {
                reason: format!("{:?} buffers cannot be mapped", self.memory_usage),
            });
        }
        if len == 0 {
            return Ok(());
        }

        let offset = usize::try_from(offset).map_err(|_| out_of_bounds.clone())?;
        let len = usize::try_from(len).map_err(|_| out_of_bounds)?;

        let mut guard = self.allocation.lock().unwrap_or_else(PoisonError::into_inner);
        let allocation = guard.as_mut().ok_or_else(|| VulkanError::InvalidOperation {
            reason: "buffer memory already released".to_string(),
        })?;
        let ptr = self.allocator.map(allocation)?;
        unsafe {
            let window = std::slice::from_raw_parts_mut(ptr.add(offset), len);
            f(window);
        }
        self.allocator.unmap(allocation);
        Ok(())
    }
}

impl<A: MemoryAllocator> Drop for Buffer<A> {
    fn drop(&mut self) {
        let _ = self.handle.device().wait_idle();
        let allocation = self
            .allocation
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(mut allocation) = allocation {
            self.allocator.destroy_buffer(self.handle.raw(), &mut allocation);
        }
    }
}
