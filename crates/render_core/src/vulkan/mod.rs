//! Vulkan backend
//!
//! Every GPU object is owned by a wrapper that destroys it on drop. Child
//! objects hold a clone of the [`Device`] (and through it the [`Instance`]),
//! so parents always outlive their children regardless of the order in which
//! the caller drops them.

pub mod error;
/// Instance, device, surface, window and memory allocator setup
pub mod initialization;
/// Command recording, pipelines and render passes
pub mod rendering;
/// Buffers, images and descriptors
pub mod resources;
/// Synchronisation, swapchain and the frame loop
pub mod state;

pub use error::{VulkanError, VulkanResult};
pub use initialization::{
    allocator::{MemoryAllocator, MemoryUsage, VmaAllocator},
    device::Device,
    instance::Instance,
    surface::Surface,
    window::{RawWindowTarget, WindowSignal, WindowTarget},
};
pub use rendering::{
    commands::{CommandBuffer, CommandPool, RecordingState},
    framebuffer::Framebuffer,
    pipeline::{Pipeline, PipelineBuilder, PipelineKind},
    pipeline_cache::PipelineCache,
    pipeline_layout::{PipelineLayout, PipelineLayoutBuilder},
    queue::{Queue, Submission},
    render_pass::{RenderPass, RenderPassBuilder},
    shader::{Shader, ShaderStage},
};
pub use resources::{
    buffer::Buffer,
    descriptor_set::{
        DescriptorPool, DescriptorPoolBuilder, DescriptorSetLayout, DescriptorSetLayoutBuilder,
        DescriptorSetWriter, DescriptorSets,
    },
    image::{Image, ImageDesc},
};
pub use state::{
    frame_loop::{FrameLoop, FrameOutcome, FrameRenderer, FrameStats, FrameTarget},
    swapchain::{SwapChain, SwapchainState, SwapchainStatus},
    sync::{Event, Fence, FrameSync, MemoryDependency, Semaphore},
};

#[cfg(feature = "glfw-window")]
pub use initialization::window::Window;
