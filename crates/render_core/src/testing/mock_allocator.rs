//! Host-memory stand-in for the device memory allocator

use ash::vk::{self, Handle};
use std::collections::HashSet;
use std::sync::Mutex;

use super::mock_driver;
use crate::vulkan::initialization::allocator::{MemoryAllocator, MemoryUsage};
use crate::vulkan::{Device, VulkanResult};

/// One call made through [`MockAllocator`]
#[derive(Debug, Clone, PartialEq)]
pub enum AllocatorCall {
    CreateBuffer(vk::Buffer),
    DestroyBuffer(vk::Buffer),
    CreateImage(vk::Image),
    DestroyImage(vk::Image),
    Map(u64),
    Unmap(u64),
}

/// Allocation backed by a plain byte vector
pub struct MockAllocation {
    id: u64,
    memory: Vec<u8>,
}

/// Allocator that fabricates handles through the mock driver and keeps
/// memory on the host
pub struct MockAllocator {
    device: Device,
    calls: Mutex<Vec<AllocatorCall>>,
    live: Mutex<HashSet<u64>>,
}

impl MockAllocator {
    pub fn new(device: &Device) -> Self {
        Self {
            device: device.clone(),
            calls: Mutex::new(Vec::new()),
            live: Mutex::new(HashSet::new()),
        }
    }

    /// Calls made so far, in order
    pub fn calls(&self) -> Vec<AllocatorCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Allocations created and not yet destroyed
    pub fn live_allocations(&self) -> usize {
        self.live.lock().unwrap().len()
    }

    fn push(&self, call: AllocatorCall) {
        self.calls.lock().unwrap().push(call);
    }

    fn allocate(&self, kind: &'static str, size: usize) -> MockAllocation {
        let parent = self.device.raw().handle().as_raw();
        let id = mock_driver::register_object(kind, parent);
        self.live.lock().unwrap().insert(id);
        MockAllocation {
            id,
            memory: vec![0; size],
        }
    }

    fn free(&self, kind: &'static str, allocation: &MockAllocation) {
        if !self.live.lock().unwrap().remove(&allocation.id) {
            panic!("allocation {:#x} freed twice", allocation.id);
        }
        mock_driver::release_object(kind, allocation.id);
    }
}

impl MemoryAllocator for MockAllocator {
    type Allocation = MockAllocation;

    fn device(&self) -> &Device {
        &self.device
    }

    fn create_buffer(
        &self,
        info: &vk::BufferCreateInfo,
        _usage: MemoryUsage,
    ) -> VulkanResult<(vk::Buffer, Self::Allocation)> {
        let allocation = self.allocate("buffer", info.size as usize);
        let buffer = vk::Buffer::from_raw(allocation.id);
        self.push(AllocatorCall::CreateBuffer(buffer));
        Ok((buffer, allocation))
    }

    fn destroy_buffer(&self, buffer: vk::Buffer, allocation: &mut Self::Allocation) {
        self.push(AllocatorCall::DestroyBuffer(buffer));
        self.free("buffer", allocation);
    }

    fn create_image(
        &self,
        _info: &vk::ImageCreateInfo,
        _usage: MemoryUsage,
    ) -> VulkanResult<(vk::Image, Self::Allocation)> {
        let allocation = self.allocate("image", 0);
        let image = vk::Image::from_raw(allocation.id);
        self.push(AllocatorCall::CreateImage(image));
        Ok((image, allocation))
    }

    fn destroy_image(&self, image: vk::Image, allocation: &mut Self::Allocation) {
        self.push(AllocatorCall::DestroyImage(image));
        self.free("image", allocation);
    }

    fn map(&self, allocation: &mut Self::Allocation) -> VulkanResult<*mut u8> {
        self.push(AllocatorCall::Map(allocation.id));
        Ok(allocation.memory.as_mut_ptr())
    }

    fn unmap(&self, allocation: &mut Self::Allocation) {
        self.push(AllocatorCall::Unmap(allocation.id));
    }
}
