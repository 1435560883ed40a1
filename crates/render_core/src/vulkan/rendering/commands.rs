//! Command buffer management
//!
//! Command buffers are allocated from exactly one [`CommandPool`] and keep it
//! alive. Recording follows `begin -> commands -> end`; the wrapper tracks
//! that state and refuses transitions the native API forbids. Commands are
//! forwarded in the order they are called, and render passes are scoped by
//! guard objects that end the pass when dropped.

use ash::vk;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::vulkan::rendering::framebuffer::Framebuffer;
use crate::vulkan::rendering::pipeline::Pipeline;
use crate::vulkan::rendering::pipeline_layout::{check_push_constants, PipelineLayout};
use crate::vulkan::rendering::render_pass::RenderPass;
use crate::vulkan::resources::handle::DeviceHandle;
use crate::vulkan::state::sync::{Event, Fence, MemoryDependency};
use crate::vulkan::{Device, Queue, VulkanError, VulkanResult};

struct PoolInner {
    handle: DeviceHandle<vk::CommandPool>,
    queue_family: u32,
    flags: vk::CommandPoolCreateFlags,
    // Bumped by every pool reset; buffers recorded under an older value are
    // back in the initial state.
    generation: AtomicU64,
}

impl PoolInner {
    fn resettable_buffers(&self) -> bool {
        self.flags
            .contains(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
    }
}

impl Drop for PoolInner {
    fn drop(&mut self) {
        let device = self.handle.device();
        unsafe {
            let _ = device.wait_idle();
            device.raw().destroy_command_pool(self.handle.raw(), None);
        }
    }
}

/// Command pool wrapper with RAII cleanup
///
/// Cloning shares the pool. Every [`CommandBuffer`] holds a clone, so the
/// pool is destroyed only after its last buffer has been freed.
#[derive(Clone)]
pub struct CommandPool {
    inner: Arc<PoolInner>,
}

impl CommandPool {
    /// Create a pool whose buffers can be reset individually
    pub fn new(device: &Device, queue_family_index: u32) -> VulkanResult<Self> {
        Self::with_flags(
            device,
            queue_family_index,
            vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
        )
    }

    /// Create a pool with explicit creation flags
    pub fn with_flags(
        device: &Device,
        queue_family_index: u32,
        flags: vk::CommandPoolCreateFlags,
    ) -> VulkanResult<Self> {
        let pool_create_info = vk::CommandPoolCreateInfo::builder()
            .flags(flags)
            .queue_family_index(queue_family_index);

        let pool = unsafe { device.raw().create_command_pool(&pool_create_info, None) }
            .map_err(VulkanError::creation("command pool"))?;

        Ok(Self {
            inner: Arc::new(PoolInner {
                handle: DeviceHandle::new(device, pool),
                queue_family: queue_family_index,
                flags,
                generation: AtomicU64::new(0),
            }),
        })
    }

    /// Get the command pool handle
    pub fn handle(&self) -> vk::CommandPool {
        self.inner.handle.raw()
    }

    /// Queue family this pool allocates for
    pub fn queue_family(&self) -> u32 {
        self.inner.queue_family
    }

    fn device(&self) -> &Device {
        self.inner.handle.device()
    }

    fn generation(&self) -> u64 {
        self.inner.generation.load(Ordering::Acquire)
    }

    /// Allocate command buffers at the given level
    pub fn allocate(
        &self,
        level: vk::CommandBufferLevel,
        count: u32,
    ) -> VulkanResult<Vec<CommandBuffer>> {
        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(self.handle())
            .level(level)
            .command_buffer_count(count);

        let raw = unsafe { self.device().raw().allocate_command_buffers(&alloc_info) }
            .map_err(VulkanError::creation("command buffers"))?;

        Ok(raw
            .into_iter()
            .map(|buffer| CommandBuffer {
                handle: DeviceHandle::new(self.device(), buffer),
                pool: self.clone(),
                level,
                state: RecordingState::Initial,
                generation: self.generation(),
            })
            .collect())
    }

    /// Allocate a single primary command buffer
    pub fn allocate_primary(&self) -> VulkanResult<CommandBuffer> {
        self.allocate_one(vk::CommandBufferLevel::PRIMARY)
    }

    /// Allocate a single secondary command buffer
    pub fn allocate_secondary(&self) -> VulkanResult<CommandBuffer> {
        self.allocate_one(vk::CommandBufferLevel::SECONDARY)
    }

    fn allocate_one(&self, level: vk::CommandBufferLevel) -> VulkanResult<CommandBuffer> {
        self.allocate(level, 1)?
            .pop()
            .ok_or(VulkanError::Creation {
                what: "command buffer",
                result: vk::Result::ERROR_UNKNOWN,
            })
    }

    /// Reset every buffer allocated from this pool
    ///
    /// Buffers keep their wrappers and report [`RecordingState::Initial`]
    /// afterwards, ready to be recorded again.
    pub fn reset(&self) -> VulkanResult<()> {
        unsafe {
            self.device()
                .raw()
                .reset_command_pool(self.handle(), vk::CommandPoolResetFlags::empty())
        }
        .map_err(VulkanError::Api)?;
        self.inner.generation.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    /// Record, submit and wait for a one-time command buffer
    pub fn run_one_time<F>(&self, queue: &Queue, record: F) -> VulkanResult<()>
    where
        F: FnOnce(&mut CommandBuffer) -> VulkanResult<()>,
    {
        let mut cmd = self.allocate_primary()?;
        cmd.begin(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT)?;
        record(&mut cmd)?;
        cmd.end()?;

        let fence = Fence::new(self.device(), false)?;
        queue
            .submit(&[], &[cmd.handle()], &[], Some(&fence))
            .map_err(VulkanError::Api)?;
        if !fence.wait_for(None)? {
            return Err(VulkanError::Timeout("one-time command buffer"));
        }
        Ok(())
    }
}

/// Recording state of a [`CommandBuffer`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordingState {
    /// Freshly allocated or reset
    Initial,
    /// Between `begin` and `end`
    Recording,
    /// Recorded and ready to submit
    Executable,
}

/// Render pass and framebuffer a secondary buffer will execute inside
#[derive(Debug, Clone, Copy)]
pub struct Inheritance {
    /// Render pass the secondary buffer is compatible with
    pub render_pass: vk::RenderPass,
    /// Subpass it executes in
    pub subpass: u32,
    /// Framebuffer, when known ahead of time
    pub framebuffer: vk::Framebuffer,
}

/// Single primary or secondary command buffer
pub struct CommandBuffer {
    handle: DeviceHandle<vk::CommandBuffer>,
    pool: CommandPool,
    level: vk::CommandBufferLevel,
    state: RecordingState,
    generation: u64,
}

impl CommandBuffer {
    /// Get the command buffer handle
    pub fn handle(&self) -> vk::CommandBuffer {
        self.handle.raw()
    }

    /// Primary or secondary
    pub fn level(&self) -> vk::CommandBufferLevel {
        self.level
    }

    /// Current recording state
    pub fn state(&self) -> RecordingState {
        if self.generation == self.pool.generation() {
            self.state
        } else {
            RecordingState::Initial
        }
    }

    fn set_state(&mut self, state: RecordingState) {
        self.state = state;
        self.generation = self.pool.generation();
    }

    fn device(&self) -> &Device {
        self.handle.device()
    }

    /// Native handle for a recording call
    fn recording(&self) -> vk::CommandBuffer {
        debug_assert_eq!(
            self.state(),
            RecordingState::Recording,
            "command recorded outside begin/end"
        );
        self.handle.raw()
    }

    fn check_can_begin(&self) -> VulkanResult<()> {
        match self.state() {
            RecordingState::Recording => Err(VulkanError::InvalidOperation {
                reason: "Command buffer already recording".to_string(),
            }),
            RecordingState::Executable if !self.pool.inner.resettable_buffers() => {
                Err(VulkanError::InvalidOperation {
                    reason: "Command buffer must be reset through its pool before re-recording"
                        .to_string(),
                })
            }
            _ => Ok(()),
        }
    }

    /// Begin recording a primary buffer
    pub fn begin(&mut self, flags: vk::CommandBufferUsageFlags) -> VulkanResult<()> {
        self.check_can_begin()?;
        let begin_info = vk::CommandBufferBeginInfo::builder().flags(flags);
        unsafe {
            self.device()
                .raw()
                .begin_command_buffer(self.handle(), &begin_info)
        }
        .map_err(VulkanError::Api)?;
        self.set_state(RecordingState::Recording);
        Ok(())
    }

    /// Begin recording a secondary buffer that inherits render pass state
    pub fn begin_secondary(
        &mut self,
        inheritance: &Inheritance,
        flags: vk::CommandBufferUsageFlags,
    ) -> VulkanResult<()> {
        if self.level != vk::CommandBufferLevel::SECONDARY {
            return Err(VulkanError::InvalidOperation {
                reason: "begin_secondary on a primary command buffer".to_string(),
            });
        }
        self.check_can_begin()?;

        let inheritance_info = vk::CommandBufferInheritanceInfo::builder()
            .render_pass(inheritance.render_pass)
            .subpass(inheritance.subpass)
            .framebuffer(inheritance.framebuffer);
        let mut flags = flags;
        if inheritance.render_pass != vk::RenderPass::null() {
            flags |= vk::CommandBufferUsageFlags::RENDER_PASS_CONTINUE;
        }
        let begin_info = vk::CommandBufferBeginInfo::builder()
            .flags(flags)
            .inheritance_info(&inheritance_info);
        unsafe {
            self.device()
                .raw()
                .begin_command_buffer(self.handle(), &begin_info)
        }
        .map_err(VulkanError::Api)?;
        self.set_state(RecordingState::Recording);
        Ok(())
    }

    /// End command recording
    pub fn end(&mut self) -> VulkanResult<()> {
        if self.state() != RecordingState::Recording {
            return Err(VulkanError::InvalidOperation {
                reason: "Command buffer not recording".to_string(),
            });
        }
        unsafe { self.device().raw().end_command_buffer(self.handle()) }
            .map_err(VulkanError::Api)?;
        self.set_state(RecordingState::Executable);
        Ok(())
    }

    /// Return the buffer to the initial state
    ///
    /// Only buffers from a pool created with `RESET_COMMAND_BUFFER` can be
    /// reset individually; others go back through [`CommandPool::reset`].
    pub fn reset(&mut self) -> VulkanResult<()> {
        if !self.pool.inner.resettable_buffers() {
            return Err(VulkanError::InvalidOperation {
                reason: "Command pool does not allow resetting individual buffers".to_string(),
            });
        }
        unsafe {
            self.device()
                .raw()
                .reset_command_buffer(self.handle(), vk::CommandBufferResetFlags::empty())
        }
        .map_err(VulkanError::Api)?;
        self.set_state(RecordingState::Initial);
        Ok(())
    }

    /// Begin a render pass; it ends when the returned guard is dropped
    pub fn begin_render_pass(
        &mut self,
        render_pass: &RenderPass,
        framebuffer: &Framebuffer,
        render_area: vk::Rect2D,
        clear_values: &[vk::ClearValue],
        contents: vk::SubpassContents,
    ) -> VulkanResult<ActiveRenderPass<'_>> {
        if self.state() != RecordingState::Recording {
            return Err(VulkanError::InvalidOperation {
                reason: "Command buffer not recording".to_string(),
            });
        }

        let render_pass_begin = vk::RenderPassBeginInfo::builder()
            .render_pass(render_pass.handle())
            .framebuffer(framebuffer.handle())
            .render_area(render_area)
            .clear_values(clear_values);

        unsafe {
            self.device()
                .raw()
                .cmd_begin_render_pass(self.handle(), &render_pass_begin, contents);
        }
        Ok(ActiveRenderPass { cmd: self })
    }

    /// Begin dynamic rendering; it ends when the returned guard is dropped
    ///
    /// Requires a device created with `VK_KHR_dynamic_rendering`.
    pub fn begin_rendering(
        &mut self,
        render_area: vk::Rect2D,
        colour_attachments: &[vk::RenderingAttachmentInfo],
        depth_attachment: Option<&vk::RenderingAttachmentInfo>,
    ) -> VulkanResult<ActiveRendering<'_>> {
        if self.state() != RecordingState::Recording {
            return Err(VulkanError::InvalidOperation {
                reason: "Command buffer not recording".to_string(),
            });
        }
        let loader = self
            .device()
            .dynamic_rendering()
            .ok_or_else(|| VulkanError::InvalidOperation {
                reason: "dynamic rendering is not enabled on this device".to_string(),
            })?;

        let mut rendering_info = vk::RenderingInfo::builder()
            .render_area(render_area)
            .layer_count(1)
            .color_attachments(colour_attachments);
        if let Some(depth) = depth_attachment {
            rendering_info = rendering_info.depth_attachment(depth);
        }
        unsafe { loader.cmd_begin_rendering(self.handle(), &rendering_info) };
        Ok(ActiveRendering { cmd: self })
    }

    /// Set viewport
    pub fn set_viewport(&mut self, viewport: &vk::Viewport) {
        unsafe {
            self.device()
                .raw()
                .cmd_set_viewport(self.recording(), 0, std::slice::from_ref(viewport));
        }
    }

    /// Set scissor
    pub fn set_scissor(&mut self, scissor: &vk::Rect2D) {
        unsafe {
            self.device()
                .raw()
                .cmd_set_scissor(self.recording(), 0, std::slice::from_ref(scissor));
        }
    }

    /// Set a full-extent viewport and scissor
    pub fn set_viewport_and_scissor(&mut self, extent: vk::Extent2D) {
        self.set_viewport(&vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: extent.width as f32,
            height: extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        });
        self.set_scissor(&vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent,
        });
    }

    /// Bind a graphics or compute pipeline
    pub fn bind_pipeline(&mut self, pipeline: &Pipeline) {
        unsafe {
            self.device().raw().cmd_bind_pipeline(
                self.recording(),
                pipeline.bind_point(),
                pipeline.handle(),
            );
        }
    }

    /// Bind descriptor sets against a pipeline layout
    pub fn bind_descriptor_sets(
        &mut self,
        bind_point: vk::PipelineBindPoint,
        layout: &PipelineLayout,
        first_set: u32,
        sets: &[vk::DescriptorSet],
        dynamic_offsets: &[u32],
    ) {
        unsafe {
            self.device().raw().cmd_bind_descriptor_sets(
                self.recording(),
                bind_point,
                layout.handle(),
                first_set,
                sets,
                dynamic_offsets,
            );
        }
    }

    /// Push constants to shaders
    ///
    /// With validation enabled, `offset` and `data.len()` must be multiples
    /// of 4 and fit inside `maxPushConstantsSize`; violations panic.
    pub fn push_constants(
        &mut self,
        layout: &PipelineLayout,
        stages: vk::ShaderStageFlags,
        offset: u32,
        data: &[u8],
    ) {
        if self.device().debug_enabled() {
            let size = u32::try_from(data.len()).unwrap_or(u32::MAX);
            check_push_constants(self.device().limits(), offset, size);
        }
        unsafe {
            self.device().raw().cmd_push_constants(
                self.recording(),
                layout.handle(),
                stages,
                offset,
                data,
            );
        }
    }

    /// Bind vertex buffers
    pub fn bind_vertex_buffers(
        &mut self,
        first_binding: u32,
        buffers: &[vk::Buffer],
        offsets: &[vk::DeviceSize],
    ) {
        unsafe {
            self.device().raw().cmd_bind_vertex_buffers(
                self.recording(),
                first_binding,
                buffers,
                offsets,
            );
        }
    }

    /// Bind index buffer
    pub fn bind_index_buffer(
        &mut self,
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
        index_type: vk::IndexType,
    ) {
        unsafe {
            self.device()
                .raw()
                .cmd_bind_index_buffer(self.recording(), buffer, offset, index_type);
        }
    }

    /// Draw non-indexed primitives
    pub fn draw(
        &mut self,
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    ) {
        unsafe {
            self.device().raw().cmd_draw(
                self.recording(),
                vertex_count,
                instance_count,
                first_vertex,
                first_instance,
            );
        }
    }

    /// Draw indexed
    pub fn draw_indexed(
        &mut self,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    ) {
        unsafe {
            self.device().raw().cmd_draw_indexed(
                self.recording(),
                index_count,
                instance_count,
                first_index,
                vertex_offset,
                first_instance,
            );
        }
    }

    /// Draw with parameters read from a buffer
    pub fn draw_indirect(
        &mut self,
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
        draw_count: u32,
        stride: u32,
    ) {
        unsafe {
            self.device()
                .raw()
                .cmd_draw_indirect(self.recording(), buffer, offset, draw_count, stride);
        }
    }

    /// Indexed draw with parameters read from a buffer
    pub fn draw_indexed_indirect(
        &mut self,
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
        draw_count: u32,
        stride: u32,
    ) {
        unsafe {
            self.device().raw().cmd_draw_indexed_indirect(
                self.recording(),
                buffer,
                offset,
                draw_count,
                stride,
            );
        }
    }

    /// Dispatch compute work groups
    pub fn dispatch(&mut self, x: u32, y: u32, z: u32) {
        unsafe { self.device().raw().cmd_dispatch(self.recording(), x, y, z) };
    }

    /// Dispatch with group counts read from a buffer
    pub fn dispatch_indirect(&mut self, buffer: vk::Buffer, offset: vk::DeviceSize) {
        unsafe {
            self.device()
                .raw()
                .cmd_dispatch_indirect(self.recording(), buffer, offset);
        }
    }

    /// Copy regions between buffers
    pub fn copy_buffer(&mut self, src: vk::Buffer, dst: vk::Buffer, regions: &[vk::BufferCopy]) {
        unsafe {
            self.device()
                .raw()
                .cmd_copy_buffer(self.recording(), src, dst, regions);
        }
    }

    /// Copy buffer contents into an image
    pub fn copy_buffer_to_image(
        &mut self,
        src: vk::Buffer,
        dst: vk::Image,
        dst_layout: vk::ImageLayout,
        regions: &[vk::BufferImageCopy],
    ) {
        unsafe {
            self.device().raw().cmd_copy_buffer_to_image(
                self.recording(),
                src,
                dst,
                dst_layout,
                regions,
            );
        }
    }

    /// Copy regions between images
    pub fn copy_image(
        &mut self,
        src: vk::Image,
        src_layout: vk::ImageLayout,
        dst: vk::Image,
        dst_layout: vk::ImageLayout,
        regions: &[vk::ImageCopy],
    ) {
        unsafe {
            self.device().raw().cmd_copy_image(
                self.recording(),
                src,
                src_layout,
                dst,
                dst_layout,
                regions,
            );
        }
    }

    /// Scaled copy between images
    pub fn blit_image(
        &mut self,
        src: vk::Image,
        src_layout: vk::ImageLayout,
        dst: vk::Image,
        dst_layout: vk::ImageLayout,
        regions: &[vk::ImageBlit],
        filter: vk::Filter,
    ) {
        unsafe {
            self.device().raw().cmd_blit_image(
                self.recording(),
                src,
                src_layout,
                dst,
                dst_layout,
                regions,
                filter,
            );
        }
    }

    /// Clear colour image subresources outside a render pass
    pub fn clear_colour_image(
        &mut self,
        image: vk::Image,
        layout: vk::ImageLayout,
        colour: [f32; 4],
        ranges: &[vk::ImageSubresourceRange],
    ) {
        let clear = vk::ClearColorValue { float32: colour };
        unsafe {
            self.device()
                .raw()
                .cmd_clear_color_image(self.recording(), image, layout, &clear, ranges);
        }
    }

    /// Clear depth/stencil image subresources outside a render pass
    pub fn clear_depth_stencil_image(
        &mut self,
        image: vk::Image,
        layout: vk::ImageLayout,
        value: vk::ClearDepthStencilValue,
        ranges: &[vk::ImageSubresourceRange],
    ) {
        unsafe {
            self.device().raw().cmd_clear_depth_stencil_image(
                self.recording(),
                image,
                layout,
                &value,
                ranges,
            );
        }
    }

    /// Fill a buffer range with a repeated 32-bit value
    pub fn fill_buffer(
        &mut self,
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
        size: vk::DeviceSize,
        data: u32,
    ) {
        unsafe {
            self.device()
                .raw()
                .cmd_fill_buffer(self.recording(), buffer, offset, size, data);
        }
    }

    /// Write a small amount of inline data into a buffer
    pub fn update_buffer(&mut self, buffer: vk::Buffer, offset: vk::DeviceSize, data: &[u8]) {
        unsafe {
            self.device()
                .raw()
                .cmd_update_buffer(self.recording(), buffer, offset, data);
        }
    }

    /// Record a pipeline barrier
    pub fn pipeline_barrier(
        &mut self,
        src_stage: vk::PipelineStageFlags,
        dst_stage: vk::PipelineStageFlags,
        memory_barriers: &[vk::MemoryBarrier],
        buffer_barriers: &[vk::BufferMemoryBarrier],
        image_barriers: &[vk::ImageMemoryBarrier],
    ) {
        unsafe {
            self.device().raw().cmd_pipeline_barrier(
                self.recording(),
                src_stage,
                dst_stage,
                vk::DependencyFlags::empty(),
                memory_barriers,
                buffer_barriers,
                image_barriers,
            );
        }
    }

    /// Record a global memory dependency
    pub fn memory_barrier(&mut self, dependency: MemoryDependency) {
        let (src_stage, dst_stage) = dependency.stages();
        self.pipeline_barrier(src_stage, dst_stage, &[dependency.barrier()], &[], &[]);
    }

    /// Record a single image memory barrier
    ///
    /// # Panics
    ///
    /// Panics if `image` is null.
    #[allow(clippy::too_many_arguments)]
    pub fn insert_image_memory_barrier(
        &mut self,
        image: vk::Image,
        src_access: vk::AccessFlags,
        dst_access: vk::AccessFlags,
        old_layout: vk::ImageLayout,
        new_layout: vk::ImageLayout,
        src_stage: vk::PipelineStageFlags,
        dst_stage: vk::PipelineStageFlags,
        range: vk::ImageSubresourceRange,
    ) {
        assert!(
            image != vk::Image::null(),
            "image memory barrier requires a non-null image"
        );
        let barrier = vk::ImageMemoryBarrier::builder()
            .src_access_mask(src_access)
            .dst_access_mask(dst_access)
            .old_layout(old_layout)
            .new_layout(new_layout)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(image)
            .subresource_range(range)
            .build();
        self.pipeline_barrier(src_stage, dst_stage, &[], &[], &[barrier]);
    }

    /// Transition a colour image between the layouts a frame uses
    ///
    /// Picks access masks and stages for the common transitions
    /// (undefined/transfer/attachment/present); anything else falls back to a
    /// full barrier.
    pub fn transition_image_layout(
        &mut self,
        image: vk::Image,
        range: vk::ImageSubresourceRange,
        old_layout: vk::ImageLayout,
        new_layout: vk::ImageLayout,
    ) {
        let (src_access, src_stage) = layout_access(old_layout, true);
        let (dst_access, dst_stage) = layout_access(new_layout, false);
        self.insert_image_memory_barrier(
            image, src_access, dst_access, old_layout, new_layout, src_stage, dst_stage, range,
        );
    }

    /// Signal an event once `stage` completes
    pub fn set_event(&mut self, event: &Event, stage: vk::PipelineStageFlags) {
        unsafe {
            self.device()
                .raw()
                .cmd_set_event(self.recording(), event.handle(), stage);
        }
    }

    /// Unsignal an event once `stage` completes
    pub fn reset_event(&mut self, event: &Event, stage: vk::PipelineStageFlags) {
        unsafe {
            self.device()
                .raw()
                .cmd_reset_event(self.recording(), event.handle(), stage);
        }
    }

    /// Wait for events before `dst_stage`
    pub fn wait_events(
        &mut self,
        events: &[&Event],
        src_stage: vk::PipelineStageFlags,
        dst_stage: vk::PipelineStageFlags,
        memory_barriers: &[vk::MemoryBarrier],
    ) {
        let handles: Vec<vk::Event> = events.iter().map(|event| event.handle()).collect();
        unsafe {
            self.device().raw().cmd_wait_events(
                self.recording(),
                &handles,
                src_stage,
                dst_stage,
                memory_barriers,
                &[],
                &[],
            );
        }
    }

    /// Execute recorded secondary buffers from this primary buffer
    pub fn execute_commands(&mut self, secondaries: &[&CommandBuffer]) -> VulkanResult<()> {
        if self.level != vk::CommandBufferLevel::PRIMARY {
            return Err(VulkanError::InvalidOperation {
                reason: "only primary command buffers can execute others".to_string(),
            });
        }
        if let Some(bad) = secondaries.iter().find(|cmd| {
            cmd.level != vk::CommandBufferLevel::SECONDARY
                || cmd.state() != RecordingState::Executable
        }) {
            return Err(VulkanError::InvalidOperation {
                reason: format!(
                    "cannot execute {:?} command buffer in state {:?}",
                    bad.level,
                    bad.state()
                ),
            });
        }
        let handles: Vec<vk::CommandBuffer> = secondaries.iter().map(|cmd| cmd.handle()).collect();
        unsafe {
            self.device()
                .raw()
                .cmd_execute_commands(self.recording(), &handles);
        }
        Ok(())
    }
}

fn layout_access(
    layout: vk::ImageLayout,
    is_source: bool,
) -> (vk::AccessFlags, vk::PipelineStageFlags) {
    match layout {
        vk::ImageLayout::UNDEFINED => (
            vk::AccessFlags::empty(),
            vk::PipelineStageFlags::TOP_OF_PIPE,
        ),
        vk::ImageLayout::TRANSFER_DST_OPTIMAL => (
            vk::AccessFlags::TRANSFER_WRITE,
            vk::PipelineStageFlags::TRANSFER,
        ),
        vk::ImageLayout::TRANSFER_SRC_OPTIMAL => (
            vk::AccessFlags::TRANSFER_READ,
            vk::PipelineStageFlags::TRANSFER,
        ),
        vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL => (
            vk::AccessFlags::COLOR_ATTACHMENT_READ | vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        ),
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL => (
            vk::AccessFlags::SHADER_READ,
            vk::PipelineStageFlags::FRAGMENT_SHADER,
        ),
        vk::ImageLayout::PRESENT_SRC_KHR if is_source => (
            vk::AccessFlags::empty(),
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        ),
        vk::ImageLayout::PRESENT_SRC_KHR => (
            vk::AccessFlags::empty(),
            vk::PipelineStageFlags::BOTTOM_OF_PIPE,
        ),
        _ => (
            vk::AccessFlags::MEMORY_READ | vk::AccessFlags::MEMORY_WRITE,
            vk::PipelineStageFlags::ALL_COMMANDS,
        ),
    }
}

impl Drop for CommandBuffer {
    fn drop(&mut self) {
        let device = self.handle.device();
        unsafe {
            let _ = device.wait_idle();
            device
                .raw()
                .free_command_buffers(self.pool.handle(), &[self.handle.raw()]);
        }
    }
}

/// Active render pass; ends the pass when dropped
pub struct ActiveRenderPass<'a> {
    cmd: &'a mut CommandBuffer,
}

impl ActiveRenderPass<'_> {
    /// Advance to the next subpass
    pub fn next_subpass(&mut self, contents: vk::SubpassContents) {
        unsafe {
            self.cmd
                .device()
                .raw()
                .cmd_next_subpass(self.cmd.recording(), contents);
        }
    }
}

impl Deref for ActiveRenderPass<'_> {
    type Target = CommandBuffer;

    fn deref(&self) -> &CommandBuffer {
        self.cmd
    }
}

impl DerefMut for ActiveRenderPass<'_> {
    fn deref_mut(&mut self) -> &mut CommandBuffer {
        self.cmd
    }
}

impl Drop for ActiveRenderPass<'_> {
    fn drop(&mut self) {
        unsafe {
            self.cmd
                .device()
                .raw()
                .cmd_end_render_pass(self.cmd.recording());
        }
    }
}

/// Active dynamic-rendering scope; ends rendering when dropped
pub struct ActiveRendering<'a> {
    cmd: &'a mut CommandBuffer,
}

impl Deref for ActiveRendering<'_> {
    type Target = CommandBuffer;

    fn deref(&self) -> &CommandBuffer {
        self.cmd
    }
}

impl DerefMut for ActiveRendering<'_> {
    fn deref_mut(&mut self) -> &mut CommandBuffer {
        self.cmd
    }
}

impl Drop for ActiveRendering<'_> {
    fn drop(&mut self) {
        if let Some(loader) = self.cmd.device().dynamic_rendering() {
            unsafe { loader.cmd_end_rendering(self.cmd.recording()) };
        }
    }
}
