//! Per-frame acquire / record / submit / present sequencing
//!
//! The loop owns only per-frame synchronization and command buffers; the
//! swapchain and everything the renderer draws with are passed in. Each frame:
//!
//! 1. recreate the swapchain if an earlier frame asked for it
//! 2. wait for this frame slot's fence
//! 3. acquire an image (out-of-date: recreate and skip the frame)
//! 4. wait for the slot that last rendered to that image, then record
//! 5. reset the fence and submit
//! 6. present (suboptimal or out-of-date: recreate before the next acquire)
//!
//! The fence is reset only immediately before the submit that signals it, so
//! a skipped or failed frame never leaves its slot waiting on a fence nobody
//! will signal.

use ash::vk;
use std::time::Duration;

use crate::config::RendererConfig;
use crate::vulkan::initialization::allocator::{MemoryAllocator, VmaAllocator};
use crate::vulkan::initialization::window::WindowSignal;
use crate::vulkan::rendering::commands::{CommandBuffer, CommandPool, RecordingState};
use crate::vulkan::state::swapchain::{SwapChain, SwapchainStatus};
use crate::vulkan::state::sync::FrameSync;
use crate::vulkan::{Device, Queue, VulkanError, VulkanResult};

/// What a renderer needs to know to record one frame
#[derive(Debug, Clone, Copy)]
pub struct FrameTarget {
    /// Frame-in-flight slot being recorded
    pub frame_index: usize,
    /// Swapchain image that will be presented
    pub image_index: u32,
    /// Swapchain image handle
    pub image: vk::Image,
    /// View over the swapchain image
    pub view: vk::ImageView,
    /// Swapchain extent
    pub extent: vk::Extent2D,
    /// Swapchain image format
    pub format: vk::Format,
}

/// Application hook that records the commands for each frame
pub trait FrameRenderer<A: MemoryAllocator = VmaAllocator> {
    /// Record into `cmd`, which is already in the recording state
    fn record(&mut self, cmd: &mut CommandBuffer, target: &FrameTarget) -> VulkanResult<()>;

    /// Rebuild anything that depends on the swapchain images or extent
    fn swapchain_recreated(&mut self, _swapchain: &SwapChain<A>) -> VulkanResult<()> {
        Ok(())
    }
}

/// Result of one [`FrameLoop::draw_frame`] call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    /// The frame was submitted and presented
    Presented {
        /// Image that was presented
        image_index: u32,
        /// What the presentation engine reported
        status: SwapchainStatus,
    },
    /// Acquire reported out-of-date; the swapchain was rebuilt and no frame drawn
    Recreated,
    /// The window has no drawable area
    Minimised,
    /// The window asked to close
    Closed,
}

/// Counters for the frames driven so far
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameStats {
    /// Frames submitted and presented
    pub frames_presented: u64,
    /// Frames dropped because of recreation, a minimised window or a recording error
    pub frames_skipped: u64,
    /// Swapchain recreations performed by the loop
    pub recreations: u64,
}

/// Synchronization and command buffer for one frame-in-flight slot
pub struct FrameResources {
    /// Semaphores and fence for this slot
    pub sync: FrameSync,
    /// Primary command buffer re-recorded every time the slot comes round
    pub command_buffer: CommandBuffer,
}

/// Drives frames against a swapchain
pub struct FrameLoop {
    frames: Vec<FrameResources>,
    pool: CommandPool,
    queue: Queue,
    current_frame: usize,
    // Slot whose fence guards the last submission to each swapchain image.
    images_in_flight: Vec<Option<usize>>,
    pending_recreate: bool,
    minimised: bool,
    close_requested: bool,
    fence_timeout: Option<Duration>,
    stats: FrameStats,
}

impl FrameLoop {
    /// Create the per-frame resources described by `config`
    pub fn new(device: &Device, queue: Queue, config: &RendererConfig) -> VulkanResult<Self> {
        let pool = CommandPool::new(device, queue.family_index())?;
        let count = config.frames_in_flight.max(1);
        let buffers = pool.allocate(vk::CommandBufferLevel::PRIMARY, count)?;
        let frames = buffers
            .into_iter()
            .map(|command_buffer| {
                Ok(FrameResources {
                    sync: FrameSync::new(device)?,
                    command_buffer,
                })
            })
            .collect::<VulkanResult<Vec<_>>>()?;

        log::debug!("Frame loop ready with {} frames in flight", frames.len());
        Ok(Self {
            frames,
            pool,
            queue,
            current_frame: 0,
            images_in_flight: Vec::new(),
            pending_recreate: false,
            minimised: false,
            close_requested: false,
            fence_timeout: config.fence_timeout(),
            stats: FrameStats::default(),
        })
    }

    /// React to a window notification
    pub fn handle_signal<A: MemoryAllocator>(&mut self, signal: WindowSignal, swapchain: &mut SwapChain<A>) {
        match signal {
            WindowSignal::Resized { width, height } => {
                self.minimised = width == 0 || height == 0;
                if self.minimised {
                    log::debug!("Window minimised, pausing frames");
                    return;
                }
                if swapchain.set_window_extent(vk::Extent2D { width, height }) {
                    self.pending_recreate = true;
                }
            }
            WindowSignal::CloseRequested => self.close_requested = true,
        }
    }

    /// Ask for a swapchain recreation before the next acquire
    pub fn request_recreate(&mut self) {
        self.pending_recreate = true;
    }

    /// Run one frame
    ///
    /// Transient swapchain conditions are handled here and never surface as
    /// errors; any other failure is returned and should end the loop.
    pub fn draw_frame<A, R>(
        &mut self,
        swapchain: &mut SwapChain<A>,
        renderer: &mut R,
    ) -> VulkanResult<FrameOutcome>
    where
        A: MemoryAllocator,
        R: FrameRenderer<A>,
    {
        if self.close_requested {
            return Ok(FrameOutcome::Closed);
        }
        if self.minimised {
            self.stats.frames_skipped += 1;
            return Ok(FrameOutcome::Minimised);
        }
        if self.pending_recreate {
            self.recreate(swapchain, renderer)?;
        }

        let index = self.current_frame;
        let frame = &self.frames[index];
        if !frame.sync.in_flight.wait_for(self.fence_timeout)? {
            return Err(VulkanError::Timeout("in-flight frame fence"));
        }

        let (status, image_index) =
            swapchain.acquire_next_image(&frame.sync.image_available, None, None);
        match status {
            SwapchainStatus::OutOfDate => {
                log::debug!("Acquire reported out-of-date swapchain");
                self.recreate(swapchain, renderer)?;
                self.stats.frames_skipped += 1;
                return Ok(FrameOutcome::Recreated);
            }
            SwapchainStatus::Failed(result) => return Err(VulkanError::Api(result)),
            SwapchainStatus::Suboptimal => self.pending_recreate = true,
            SwapchainStatus::Optimal => {}
        }

        let image = swapchain
            .images()
            .get(image_index as usize)
            .ok_or_else(|| VulkanError::InvalidOperation {
                reason: format!("acquired image index {image_index} out of range"),
            })?;
        let target = FrameTarget {
            frame_index: index,
            image_index,
            image: image.handle(),
            view: image.view(),
            extent: swapchain.extent(),
            format: swapchain.format(),
        };

        self.wait_for_image(image_index as usize, index, swapchain.image_count())?;

        let frame = &mut self.frames[index];
        if let Err(e) = Self::record::<A, R>(&mut frame.command_buffer, renderer, &target) {
            self.abandon_frame(index);
            return Err(e);
        }

        let frame = &self.frames[index];
        frame.sync.in_flight.reset()?;
        self.queue
            .submit(
                &[(
                    frame.sync.image_available.handle(),
                    vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
                )],
                &[frame.command_buffer.handle()],
                &[frame.sync.render_finished.handle()],
                Some(&frame.sync.in_flight),
            )
            .map_err(VulkanError::Api)?;
        self.images_in_flight[image_index as usize] = Some(index);

        let status = swapchain.queue_present(
            &self.queue,
            &[frame.sync.render_finished.handle()],
            image_index,
        );
        match status {
            SwapchainStatus::Failed(result) => return Err(VulkanError::Api(result)),
            status if status.needs_recreate() => {
                log::debug!("Present reported {:?}, recreating before next acquire", status);
                self.pending_recreate = true;
            }
            _ => {}
        }

        self.stats.frames_presented += 1;
        self.current_frame = (self.current_frame + 1) % self.frames.len();
        Ok(FrameOutcome::Presented {
            image_index,
            status,
        })
    }

    fn record<A, R>(
        cmd: &mut CommandBuffer,
        renderer: &mut R,
        target: &FrameTarget,
    ) -> VulkanResult<()>
    where
        A: MemoryAllocator,
        R: FrameRenderer<A>,
    {
        cmd.begin(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT)?;
        renderer.record(cmd, target)?;
        cmd.end()
    }

    /// Block until no other slot is still rendering to `image_index`
    fn wait_for_image(
        &mut self,
        image_index: usize,
        slot: usize,
        image_count: usize,
    ) -> VulkanResult<()> {
        if self.images_in_flight.len() != image_count {
            self.images_in_flight = vec![None; image_count];
        }
        match self.images_in_flight[image_index] {
            Some(owner) if owner != slot => {
                if !self.frames[owner].sync.in_flight.wait_for(self.fence_timeout)? {
                    return Err(VulkanError::Timeout("swapchain image fence"));
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// Unwind a frame whose recording failed after a successful acquire
    ///
    /// The acquire semaphore is consumed by an empty submission that also
    /// signals the slot's fence, and a recreate is queued to hand the
    /// unpresented image back.
    fn abandon_frame(&mut self, index: usize) {
        let frame = &mut self.frames[index];
        if frame.command_buffer.state() == RecordingState::Recording {
            if let Err(e) = frame.command_buffer.reset() {
                log::warn!("Failed to reset abandoned command buffer: {}", e);
            }
        }

        let drained = frame.sync.in_flight.reset().and_then(|()| {
            self.queue
                .submit(
                    &[(
                        frame.sync.image_available.handle(),
                        vk::PipelineStageFlags::ALL_COMMANDS,
                    )],
                    &[],
                    &[],
                    Some(&frame.sync.in_flight),
                )
                .map_err(VulkanError::Api)
        });
        if let Err(e) = drained {
            log::warn!("Failed to release frame {} after a recording error: {}", index, e);
        }
        self.pending_recreate = true;
        self.stats.frames_skipped += 1;
    }

    fn recreate<A, R>(&mut self, swapchain: &mut SwapChain<A>, renderer: &mut R) -> VulkanResult<()>
    where
        A: MemoryAllocator,
        R: FrameRenderer<A>,
    {
        swapchain.recreate()?;
        self.images_in_flight = vec![None; swapchain.image_count()];
        renderer.swapchain_recreated(swapchain)?;
        self.pending_recreate = false;
        self.stats.recreations += 1;
        Ok(())
    }

    /// Block until every submitted frame has finished
    pub fn wait_idle(&self) -> VulkanResult<()> {
        self.queue.wait_idle()
    }

    /// Slot the next frame will use
    pub fn current_frame(&self) -> usize {
        self.current_frame
    }

    /// Number of frame-in-flight slots
    pub fn frames_in_flight(&self) -> usize {
        self.frames.len()
    }

    /// Whether a recreate will run before the next acquire
    pub fn recreate_pending(&self) -> bool {
        self.pending_recreate
    }

    /// Whether the window currently has no drawable area
    pub fn is_minimised(&self) -> bool {
        self.minimised
    }

    /// Whether the window asked to close
    pub fn close_requested(&self) -> bool {
        self.close_requested
    }

    /// Frame counters
    pub fn stats(&self) -> FrameStats {
        self.stats
    }

    /// Command pool the per-frame buffers come from
    pub fn command_pool(&self) -> &CommandPool {
        &self.pool
    }
}

impl Drop for FrameLoop {
    fn drop(&mut self) {
        if let Err(e) = self.queue.wait_idle() {
            log::warn!("Queue wait failed during frame loop teardown: {}", e);
        }
    }
}
