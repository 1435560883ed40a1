//! Descriptor set layouts, pools and sets
//!
//! Sets allocated from a [`DescriptorPool`] keep the pool alive. When the pool
//! was created with `FREE_DESCRIPTOR_SET` the sets are returned to it on drop;
//! otherwise they are reclaimed when the pool is reset or destroyed.
//!
//! Allocation failures caused by the pool running out of space are reported
//! as [`VulkanError::DescriptorPoolExhausted`] so callers can grow or recycle
//! pools instead of aborting.

use ash::vk;
use std::sync::Arc;

use crate::vulkan::resources::handle::DeviceHandle;
use crate::vulkan::{Device, VulkanError, VulkanResult};

/// Descriptor set layout builder for creating reusable layouts
#[derive(Default)]
pub struct DescriptorSetLayoutBuilder {
    bindings: Vec<vk::DescriptorSetLayoutBinding>,
}

impl DescriptorSetLayoutBuilder {
    /// Create a new descriptor set layout builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a binding of any descriptor type
    pub fn binding(
        mut self,
        binding: u32,
        descriptor_type: vk::DescriptorType,
        count: u32,
        stage_flags: vk::ShaderStageFlags,
    ) -> Self {
        self.bindings.push(
            vk::DescriptorSetLayoutBinding::builder()
                .binding(binding)
                .descriptor_type(descriptor_type)
                .descriptor_count(count)
                .stage_flags(stage_flags)
                .build(),
        );
        self
    }

    /// Add a uniform buffer binding
    pub fn add_uniform_buffer(self, binding: u32, stage_flags: vk::ShaderStageFlags) -> Self {
        self.binding(binding, vk::DescriptorType::UNIFORM_BUFFER, 1, stage_flags)
    }

    /// Add a combined image sampler binding
    pub fn add_combined_image_sampler(self, binding: u32, stage_flags: vk::ShaderStageFlags) -> Self {
        self.binding(
            binding,
            vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            1,
            stage_flags,
        )
    }

    /// Add a storage buffer binding
    pub fn add_storage_buffer(self, binding: u32, stage_flags: vk::ShaderStageFlags) -> Self {
        self.binding(binding, vk::DescriptorType::STORAGE_BUFFER, 1, stage_flags)
    }

    /// Build the descriptor set layout
    pub fn build(self, device: &Device) -> VulkanResult<DescriptorSetLayout> {
        let layout_info = vk::DescriptorSetLayoutCreateInfo::builder().bindings(&self.bindings);

        let layout = unsafe { device.raw().create_descriptor_set_layout(&layout_info, None) }
            .map_err(VulkanError::creation("descriptor set layout"))?;

        Ok(DescriptorSetLayout {
            handle: DeviceHandle::new(device, layout),
            bindings: self.bindings,
        })
    }
}

/// Descriptor set layout wrapper with automatic cleanup
pub struct DescriptorSetLayout {
    handle: DeviceHandle<vk::DescriptorSetLayout>,
    bindings: Vec<vk::DescriptorSetLayoutBinding>,
}

impl DescriptorSetLayout {
    /// Get the Vulkan descriptor set layout handle
    pub fn handle(&self) -> vk::DescriptorSetLayout {
        self.handle.raw()
    }

    /// Get the bindings used in this layout
    pub fn bindings(&self) -> &[vk::DescriptorSetLayoutBinding] {
        &self.bindings
    }
}

impl Drop for DescriptorSetLayout {
    fn drop(&mut self) {
        unsafe {
            self.handle
                .device()
                .raw()
                .destroy_descriptor_set_layout(self.handle.raw(), None);
        }
    }
}

/// Builder for [`DescriptorPool`] with per-type capacities
pub struct DescriptorPoolBuilder {
    max_sets: u32,
    pool_sizes: Vec<vk::DescriptorPoolSize>,
    free_individual_sets: bool,
}

impl Default for DescriptorPoolBuilder {
    fn default() -> Self {
        Self {
            max_sets: 1,
            pool_sizes: Vec::new(),
            free_individual_sets: true,
        }
    }
}

impl DescriptorPoolBuilder {
    /// Pool for a single set that frees sets individually
    pub fn new() -> Self {
        Self::default()
    }

    /// Maximum number of sets allocated at once
    pub fn max_sets(mut self, max_sets: u32) -> Self {
        self.max_sets = max_sets;
        self
    }

    /// Reserve `count` descriptors of type `ty`
    pub fn pool_size(mut self, ty: vk::DescriptorType, count: u32) -> Self {
        match self.pool_sizes.iter_mut().find(|size| size.ty == ty) {
            Some(size) => size.descriptor_count += count,
            None => self.pool_sizes.push(vk::DescriptorPoolSize {
                ty,
                descriptor_count: count,
            }),
        }
        self
    }

    /// Whether dropped sets are returned to the pool individually
    pub fn free_individual_sets(mut self, enabled: bool) -> Self {
        self.free_individual_sets = enabled;
        self
    }

    /// Create the pool
    pub fn build(self, device: &Device) -> VulkanResult<DescriptorPool> {
        let flags = if self.free_individual_sets {
            vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET
        } else {
            vk::DescriptorPoolCreateFlags::empty()
        };
        let pool_info = vk::DescriptorPoolCreateInfo::builder()
            .flags(flags)
            .max_sets(self.max_sets)
            .pool_sizes(&self.pool_sizes);

        let pool = unsafe { device.raw().create_descriptor_pool(&pool_info, None) }
            .map_err(VulkanError::creation("descriptor pool"))?;

        log::debug!(
            "Created descriptor pool (max {} sets, {} pool sizes)",
            self.max_sets,
            self.pool_sizes.len()
        );
        Ok(DescriptorPool {
            inner: Arc::new(PoolInner {
                handle: DeviceHandle::new(device, pool),
                flags,
                max_sets: self.max_sets,
            }),
        })
    }
}

struct PoolInner {
    handle: DeviceHandle<vk::DescriptorPool>,
    flags: vk::DescriptorPoolCreateFlags,
    max_sets: u32,
}

impl Drop for PoolInner {
    fn drop(&mut self) {
        unsafe {
            self.handle
                .device()
                .raw()
                .destroy_descriptor_pool(self.handle.raw(), None);
        }
    }
}

/// Descriptor pool for allocating descriptor sets
#[derive(Clone)]
pub struct DescriptorPool {
    inner: Arc<PoolInner>,
}

impl DescriptorPool {
    /// Get the pool handle
    pub fn handle(&self) -> vk::DescriptorPool {
        self.inner.handle.raw()
    }

    /// Maximum number of sets the pool was sized for
    pub fn max_sets(&self) -> u32 {
        self.inner.max_sets
    }

    /// Allocate one set per layout
    ///
    /// Returns [`VulkanError::DescriptorPoolExhausted`] when the pool has no
    /// room left for the request.
    pub fn allocate(&self, layouts: &[&DescriptorSetLayout]) -> VulkanResult<DescriptorSets> {
        let device = self.inner.handle.device();
        let raw_layouts: Vec<_> = layouts.iter().map(|layout| layout.handle()).collect();
        let alloc_info = vk::DescriptorSetAllocateInfo::builder()
            .descriptor_pool(self.handle())
            .set_layouts(&raw_layouts);

        let sets = unsafe { device.raw().allocate_descriptor_sets(&alloc_info) }.map_err(
            |result| match result {
                vk::Result::ERROR_OUT_OF_POOL_MEMORY | vk::Result::ERROR_FRAGMENTED_POOL => {
                    log::warn!("Descriptor pool exhausted ({:?})", result);
                    VulkanError::DescriptorPoolExhausted(result)
                }
                other => VulkanError::Creation {
                    what: "descriptor sets",
                    result: other,
                },
            },
        )?;

        Ok(DescriptorSets {
            sets: sets
                .into_iter()
                .map(|set| DeviceHandle::new(device, set))
                .collect(),
            pool: self.clone(),
        })
    }

    /// Return every set to the pool
    ///
    /// Fails while any [`DescriptorSets`] allocated from this pool are alive.
    pub fn reset(&mut self) -> VulkanResult<()> {
        if Arc::strong_count(&self.inner) > 1 {
            return Err(VulkanError::InvalidOperation {
                reason: "descriptor pool reset while sets or pool clones are alive".to_string(),
            });
        }
        let device = self.inner.handle.device();
        unsafe {
            device
                .raw()
                .reset_descriptor_pool(self.handle(), vk::DescriptorPoolResetFlags::empty())
        }
        .map_err(VulkanError::Api)
    }

    fn frees_individual_sets(&self) -> bool {
        self.inner
            .flags
            .contains(vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET)
    }
}

/// Descriptor sets allocated together from one pool
pub struct DescriptorSets {
    sets: Vec<DeviceHandle<vk::DescriptorSet>>,
    pool: DescriptorPool,
}

impl DescriptorSets {
    /// Native handles in allocation order
    pub fn handles(&self) -> Vec<vk::DescriptorSet> {
        self.sets.iter().map(DeviceHandle::raw).collect()
    }

    /// Handle of the set at `index`
    pub fn get(&self, index: usize) -> Option<vk::DescriptorSet> {
        self.sets.get(index).map(DeviceHandle::raw)
    }

    /// Number of sets
    pub fn len(&self) -> usize {
        self.sets.len()
    }

    /// Whether no sets were allocated
    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }
}

impl Drop for DescriptorSets {
    fn drop(&mut self) {
        if self.sets.is_empty() || !self.pool.frees_individual_sets() {
            return;
        }
        let device = self.pool.inner.handle.device();
        let handles = self.handles();
        unsafe {
            let _ = device.wait_idle();
            if let Err(e) = device.raw().free_descriptor_sets(self.pool.handle(), &handles) {
                log::warn!("Failed to free {} descriptor sets: {:?}", handles.len(), e);
            }
        }
    }
}

enum WriteInfo {
    Buffers(Vec<vk::DescriptorBufferInfo>),
    Images(Vec<vk::DescriptorImageInfo>),
}

struct PendingWrite {
    set: vk::DescriptorSet,
    binding: u32,
    array_element: u32,
    descriptor_type: vk::DescriptorType,
    info: WriteInfo,
}

/// Collects descriptor writes and applies them in one update call
///
/// Descriptor infos are owned by the writer; the native write structs that
/// point into them are built only inside [`DescriptorSetWriter::update`].
#[derive(Default)]
pub struct DescriptorSetWriter {
    writes: Vec<PendingWrite>,
}

impl DescriptorSetWriter {
    /// Create a new descriptor set writer
    pub fn new() -> Self {
        Self::default()
    }

    /// Write a uniform buffer to a descriptor set
    pub fn write_buffer(
        self,
        descriptor_set: vk::DescriptorSet,
        binding: u32,
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
        range: vk::DeviceSize,
    ) -> Self {
        self.write_buffers(
            descriptor_set,
            binding,
            vk::DescriptorType::UNIFORM_BUFFER,
            vec![vk::DescriptorBufferInfo {
                buffer,
                offset,
                range,
            }],
        )
    }

    /// Write an array of buffer descriptors of any buffer type
    pub fn write_buffers(
        mut self,
        descriptor_set: vk::DescriptorSet,
        binding: u32,
        descriptor_type: vk::DescriptorType,
        infos: Vec<vk::DescriptorBufferInfo>,
    ) -> Self {
        self.writes.push(PendingWrite {
            set: descriptor_set,
            binding,
            array_element: 0,
            descriptor_type,
            info: WriteInfo::Buffers(infos),
        });
        self
    }

    /// Write an image sampler to a descriptor set
    pub fn write_image(
        self,
        descriptor_set: vk::DescriptorSet,
        binding: u32,
        image_view: vk::ImageView,
        sampler: vk::Sampler,
        layout: vk::ImageLayout,
    ) -> Self {
        self.write_images(
            descriptor_set,
            binding,
            vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            vec![vk::DescriptorImageInfo {
                sampler,
                image_view,
                image_layout: layout,
            }],
        )
    }

    /// Write an array of image descriptors of any image type
    pub fn write_images(
        mut self,
        descriptor_set: vk::DescriptorSet,
        binding: u32,
        descriptor_type: vk::DescriptorType,
        infos: Vec<vk::DescriptorImageInfo>,
    ) -> Self {
        self.writes.push(PendingWrite {
            set: descriptor_set,
            binding,
            array_element: 0,
            descriptor_type,
            info: WriteInfo::Images(infos),
        });
        self
    }

    /// Number of queued writes
    pub fn len(&self) -> usize {
        self.writes.len()
    }

    /// Whether nothing has been queued
    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    /// Execute all write operations
    pub fn update(self, device: &Device) {
        let writes: Vec<vk::WriteDescriptorSet> = self
            .writes
            .iter()
            .map(|pending| {
                let builder = vk::WriteDescriptorSet::builder()
                    .dst_set(pending.set)
                    .dst_binding(pending.binding)
                    .dst_array_element(pending.array_element)
                    .descriptor_type(pending.descriptor_type);
                match &pending.info {
                    WriteInfo::Buffers(infos) => builder.buffer_info(infos).build(),
                    WriteInfo::Images(infos) => builder.image_info(infos).build(),
                }
            })
            .collect();
        unsafe {
            device.raw().update_descriptor_sets(&writes, &[]);
        }
    }
}
