//! Pipeline layouts and push-constant range checks

use ash::vk;

use crate::vulkan::resources::descriptor_set::DescriptorSetLayout;
use crate::vulkan::resources::handle::DeviceHandle;
use crate::vulkan::{Device, VulkanError, VulkanResult};

/// Assert that a push-constant range fits the device limits
///
/// Offset and size must be multiples of four and the range must end within
/// `maxPushConstantsSize`. A violation is an integration bug, so this panics.
pub(crate) fn check_push_constants(limits: &vk::PhysicalDeviceLimits, offset: u32, size: u32) {
    assert!(
        offset % 4 == 0,
        "push constant offset {offset} is not a multiple of 4"
    );
    assert!(
        size % 4 == 0,
        "push constant size {size} is not a multiple of 4"
    );
    let end = offset.checked_add(size);
    assert!(
        end.is_some_and(|end| end <= limits.max_push_constants_size),
        "push constant range {offset}+{size} exceeds maxPushConstantsSize {}",
        limits.max_push_constants_size
    );
}

/// Builder for [`PipelineLayout`]
#[derive(Default)]
pub struct PipelineLayoutBuilder {
    set_layouts: Vec<vk::DescriptorSetLayout>,
    push_constant_ranges: Vec<vk::PushConstantRange>,
}

impl PipelineLayoutBuilder {
    /// Start an empty layout
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a descriptor set layout (set numbers follow call order)
    pub fn set_layout(mut self, layout: &DescriptorSetLayout) -> Self {
        self.set_layouts.push(layout.handle());
        self
    }

    /// Declare a push-constant range visible to `stages`
    pub fn push_constant_range(mut self, stages: vk::ShaderStageFlags, offset: u32, size: u32) -> Self {
        self.push_constant_ranges.push(vk::PushConstantRange {
            stage_flags: stages,
            offset,
            size,
        });
        self
    }

    /// Create the layout
    ///
    /// # Panics
    ///
    /// With validation enabled, panics if a push-constant range is misaligned
    /// or larger than the device allows.
    pub fn build(self, device: &Device) -> VulkanResult<PipelineLayout> {
        if device.debug_enabled() {
            for range in &self.push_constant_ranges {
                check_push_constants(device.limits(), range.offset, range.size);
            }
        }

        let create_info = vk::PipelineLayoutCreateInfo::builder()
            .set_layouts(&self.set_layouts)
            .push_constant_ranges(&self.push_constant_ranges);
        let layout = unsafe { device.raw().create_pipeline_layout(&create_info, None) }
            .map_err(VulkanError::creation("pipeline layout"))?;

        log::debug!(
            "Created pipeline layout ({} sets, {} push constant ranges)",
            self.set_layouts.len(),
            self.push_constant_ranges.len()
        );
        Ok(PipelineLayout {
            handle: DeviceHandle::new(device, layout),
            set_layout_count: self.set_layouts.len(),
            push_constant_ranges: self.push_constant_ranges,
        })
    }
}

/// Descriptor set and push-constant interface of a pipeline
pub struct PipelineLayout {
    handle: DeviceHandle<vk::PipelineLayout>,
    set_layout_count: usize,
    push_constant_ranges: Vec<vk::PushConstantRange>,
}

impl PipelineLayout {
    /// Layout with no descriptor sets or push constants
    pub fn empty(device: &Device) -> VulkanResult<Self> {
        PipelineLayoutBuilder::new().build(device)
    }

    /// Get the layout handle
    pub fn handle(&self) -> vk::PipelineLayout {
        self.handle.raw()
    }

    /// Device the layout was created on
    pub fn device(&self) -> &Device {
        self.handle.device()
    }

    /// Number of descriptor set layouts
    pub fn set_layout_count(&self) -> usize {
        self.set_layout_count
    }

    /// Declared push-constant ranges
    pub fn push_constant_ranges(&self) -> &[vk::PushConstantRange] {
        &self.push_constant_ranges
    }
}

impl Drop for PipelineLayout {
    fn drop(&mut self) {
        unsafe {
            self.handle
                .device()
                .raw()
                .destroy_pipeline_layout(self.handle.raw(), None);
        }
    }
}
