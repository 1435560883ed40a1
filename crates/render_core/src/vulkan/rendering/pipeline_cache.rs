//! Pipeline cache
//!
//! The cache contents are an opaque blob owned by the driver. Callers may
//! persist it between runs and hand it back on the next start; the blob is
//! never interpreted here.

use ash::vk;

use crate::vulkan::resources::handle::DeviceHandle;
use crate::vulkan::{Device, VulkanError, VulkanResult};

/// Driver-side pipeline cache
pub struct PipelineCache {
    handle: DeviceHandle<vk::PipelineCache>,
}

impl PipelineCache {
    /// Create an empty cache
    pub fn new(device: &Device) -> VulkanResult<Self> {
        Self::from_data(device, &[])
    }

    /// Create a cache seeded with data from an earlier [`PipelineCache::data`]
    ///
    /// The driver ignores blobs it does not recognise.
    pub fn from_data(device: &Device, initial_data: &[u8]) -> VulkanResult<Self> {
        let create_info = vk::PipelineCacheCreateInfo::builder().initial_data(initial_data);
        let cache = unsafe { device.raw().create_pipeline_cache(&create_info, None) }
            .map_err(VulkanError::creation("pipeline cache"))?;
        log::debug!("Created pipeline cache ({} seed bytes)", initial_data.len());
        Ok(Self {
            handle: DeviceHandle::new(device, cache),
        })
    }

    /// Get the cache handle
    pub fn handle(&self) -> vk::PipelineCache {
        self.handle.raw()
    }

    /// Read the current cache blob
    pub fn data(&self) -> VulkanResult<Vec<u8>> {
        unsafe {
            self.handle
                .device()
                .raw()
                .get_pipeline_cache_data(self.handle.raw())
        }
        .map_err(VulkanError::Api)
    }
}

impl Drop for PipelineCache {
    fn drop(&mut self) {
        unsafe {
            self.handle
                .device()
                .raw()
                .destroy_pipeline_cache(self.handle.raw(), None);
        }
    }
}
