//! Queue submission endpoint

use ash::prelude::VkResult;
use ash::vk;

use crate::vulkan::rendering::commands::CommandBuffer;
use crate::vulkan::state::sync::{Fence, Semaphore};
use crate::vulkan::{Device, VulkanError, VulkanResult};

/// Device queue used for submission and presentation
///
/// Queues belong to the device and are never destroyed on their own. A
/// `Queue` is not internally synchronized; concurrent submission from several
/// threads needs external locking.
#[derive(Clone)]
pub struct Queue {
    device: Device,
    raw: vk::Queue,
    family_index: u32,
}

impl Queue {
    pub(crate) fn new(device: &Device, raw: vk::Queue, family_index: u32) -> Self {
        Self {
            device: device.clone(),
            raw,
            family_index,
        }
    }

    /// Get the queue handle
    pub fn raw(&self) -> vk::Queue {
        self.raw
    }

    /// Queue family this queue belongs to
    pub fn family_index(&self) -> u32 {
        self.family_index
    }

    /// Submit one batch of command buffers
    ///
    /// The native result is returned untouched; the caller decides whether a
    /// failure is fatal.
    pub fn submit(
        &self,
        waits: &[(vk::Semaphore, vk::PipelineStageFlags)],
        command_buffers: &[vk::CommandBuffer],
        signals: &[vk::Semaphore],
        fence: Option<&Fence>,
    ) -> VkResult<()> {
        let (wait_semaphores, wait_stages): (Vec<_>, Vec<_>) = waits.iter().copied().unzip();
        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(command_buffers)
            .signal_semaphores(signals)
            .build();

        let fence = fence.map_or(vk::Fence::null(), Fence::handle);
        let result = unsafe { self.device.raw().queue_submit(self.raw, &[submit_info], fence) };
        self.device.track(result)
    }

    /// Submit a batch assembled with [`Submission`]
    pub fn submit_batch(&self, submission: &Submission, fence: Option<&Fence>) -> VkResult<()> {
        self.submit(
            &submission.waits,
            &submission.command_buffers,
            &submission.signals,
            fence,
        )
    }

    /// Block until the queue has finished all submitted work
    pub fn wait_idle(&self) -> VulkanResult<()> {
        self.device
            .track(unsafe { self.device.raw().queue_wait_idle(self.raw) })
            .map_err(VulkanError::Api)
    }
}

/// One queue submission batch
#[derive(Default)]
pub struct Submission {
    waits: Vec<(vk::Semaphore, vk::PipelineStageFlags)>,
    command_buffers: Vec<vk::CommandBuffer>,
    signals: Vec<vk::Semaphore>,
}

impl Submission {
    /// Start an empty batch
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait on a semaphore before the given stage executes
    pub fn wait(mut self, semaphore: &Semaphore, stage: vk::PipelineStageFlags) -> Self {
        self.waits.push((semaphore.handle(), stage));
        self
    }

    /// Append a recorded command buffer
    pub fn command_buffer(mut self, command_buffer: &CommandBuffer) -> Self {
        self.command_buffers.push(command_buffer.handle());
        self
    }

    /// Signal a semaphore when the batch completes
    pub fn signal(mut self, semaphore: &Semaphore) -> Self {
        self.signals.push(semaphore.handle());
        self
    }
}
