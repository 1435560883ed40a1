//! # Render Core
//!
//! Ownership-checked Vulkan plumbing: instance and device bootstrap, a
//! swapchain that recreates itself in place, and a frame loop that sequences
//! acquire, record, submit and present across several frames in flight.
//!
//! ## Features
//!
//! - **RAII everywhere**: every native object is destroyed on drop, children
//!   before parents
//! - **Swapchain recreation**: out-of-date and suboptimal results are folded
//!   into a single recreate path
//! - **Pluggable memory**: buffers and images go through [`vulkan::MemoryAllocator`],
//!   backed by VMA in production
//! - **Validation mode**: debug messenger, derivative-pipeline checks and
//!   handle leak tracking when enabled
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use render_core::prelude::*;
//! use std::sync::Arc;
//!
//! # fn run(window: &dyn WindowTarget) -> VulkanResult<()> {
//! let config = RendererConfig::new("demo");
//! let instance = Instance::new(
//!     &config.application_name,
//!     config.validation_enabled(),
//!     &window.required_extensions()?,
//! )?;
//! let device = Device::new(&instance)?;
//! let surface = Arc::new(Surface::new(&device, window)?);
//! let allocator = Arc::new(VmaAllocator::new(&device)?);
//! let swapchain = SwapChain::new(&surface, &allocator, &config.swapchain, window.framebuffer_extent())?;
//! let frames = FrameLoop::new(&device, device.graphics_queue(), &config)?;
//! # let _ = (swapchain, frames);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod config;
pub mod logging;
pub mod vulkan;

#[cfg(test)]
mod testing;

/// Common imports for renderer users
pub mod prelude {
    pub use crate::config::{
        ApplicationConfig, Config, EngineConfig, PresentModePreference, RendererConfig,
        ShaderConfig, SwapchainConfig,
    };
    pub use crate::logging::init_logging;
    pub use crate::vulkan::{
        Buffer, CommandBuffer, CommandPool, Device, FrameLoop, FrameOutcome, FrameRenderer,
        FrameTarget, Image, ImageDesc, Instance, MemoryAllocator, MemoryUsage, Pipeline,
        PipelineBuilder, RenderPass, Shader, ShaderStage, Surface, SwapChain, SwapchainStatus,
        VmaAllocator, VulkanError, VulkanResult, WindowSignal, WindowTarget,
    };
}
