//! Clear-colour demo application
//!
//! Opens a window and presents frames cleared to a slowly pulsing colour,
//! drawing a triangle on top when compiled shaders are found. Resizing,
//! minimising and closing the window exercise the swapchain recreate path.
//!
//! An optional TOML or RON configuration file may be passed as the first
//! argument.

use ash::vk;
use render_core::config::{ApplicationConfig, Config, ConfigError, ShaderConfig};
use render_core::logging::init_logging;
use render_core::vulkan::{
    CommandBuffer, Device, FrameLoop, FrameOutcome, FrameRenderer, FrameTarget, Framebuffer,
    Instance, Pipeline, PipelineBuilder, PipelineLayout, RenderPass, Shader, ShaderStage, Surface,
    SwapChain, VmaAllocator, VulkanError, VulkanResult, Window, WindowTarget,
};
use std::sync::Arc;
use std::time::Instant;

const WINDOW_WIDTH: u32 = 800;
const WINDOW_HEIGHT: u32 = 600;

/// Clears every swapchain image and optionally draws a triangle
struct ClearRenderer {
    device: Device,
    render_pass: RenderPass,
    framebuffers: Vec<Framebuffer>,
    pipeline: Option<Pipeline>,
    clear_color: [f32; 4],
    start_time: Instant,
}

impl ClearRenderer {
    fn new(
        device: &Device,
        swapchain: &SwapChain,
        shaders: &ShaderConfig,
        clear_color: [f32; 4],
    ) -> VulkanResult<Self> {
        let render_pass = RenderPass::single_colour(device, swapchain.format(), None)?;
        let framebuffers =
            Framebuffer::for_views(&render_pass, &swapchain.image_views(), None, swapchain.extent())?;

        let pipeline = if shaders.is_available() {
            Some(Self::triangle_pipeline(device, &render_pass, shaders)?)
        } else {
            log::warn!(
                "Triangle shaders not found ({}, {}); clearing only",
                shaders.vertex_shader_path,
                shaders.fragment_shader_path
            );
            None
        };

        Ok(Self {
            device: device.clone(),
            render_pass,
            framebuffers,
            pipeline,
            clear_color,
            start_time: Instant::now(),
        })
    }

    fn triangle_pipeline(
        device: &Device,
        render_pass: &RenderPass,
        shaders: &ShaderConfig,
    ) -> VulkanResult<Pipeline> {
        let vertex = Shader::from_file(device, ShaderStage::Vertex, &shaders.vertex_shader_path)?;
        let fragment =
            Shader::from_file(device, ShaderStage::Fragment, &shaders.fragment_shader_path)?;
        PipelineBuilder::graphics(PipelineLayout::empty(device)?)
            .shader(vertex)
            .shader(fragment)
            .render_pass(render_pass, 0)
            .cull(vk::CullModeFlags::NONE, vk::FrontFace::CLOCKWISE)
            .build()
    }

    fn current_colour(&self) -> [f32; 4] {
        let pulse = 0.75 + 0.25 * self.start_time.elapsed().as_secs_f32().sin();
        let [r, g, b, a] = self.clear_color;
        [r * pulse, g * pulse, b * pulse, a]
    }
}

impl FrameRenderer for ClearRenderer {
    fn record(&mut self, cmd: &mut CommandBuffer, target: &FrameTarget) -> VulkanResult<()> {
        let framebuffer = self
            .framebuffers
            .get(target.image_index as usize)
            .ok_or_else(|| VulkanError::InvalidOperation {
                reason: format!("no framebuffer for image {}", target.image_index),
            })?;

        let clear_values = [vk::ClearValue {
            color: vk::ClearColorValue {
                float32: self.current_colour(),
            },
        }];
        let render_area = vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent: target.extent,
        };

        let mut pass = cmd.begin_render_pass(
            &self.render_pass,
            framebuffer,
            render_area,
            &clear_values,
            vk::SubpassContents::INLINE,
        )?;
        if let Some(pipeline) = &self.pipeline {
            pass.set_viewport_and_scissor(target.extent);
            pass.bind_pipeline(pipeline);
            pass.draw(3, 1, 0, 0);
        }
        Ok(())
    }

    fn swapchain_recreated(&mut self, swapchain: &SwapChain) -> VulkanResult<()> {
        self.framebuffers.clear();
        self.framebuffers = Framebuffer::for_views(
            &self.render_pass,
            &swapchain.image_views(),
            None,
            swapchain.extent(),
        )?;
        log::debug!(
            "Rebuilt {} framebuffers at {}x{} on {}",
            self.framebuffers.len(),
            swapchain.extent().width,
            swapchain.extent().height,
            self.device.name()
        );
        Ok(())
    }
}

fn load_config() -> Result<ApplicationConfig, ConfigError> {
    match std::env::args().nth(1) {
        Some(path) => ApplicationConfig::load_from_file(path),
        None => Ok(ApplicationConfig::new("Clear Demo")),
    }
}

fn run(config: &ApplicationConfig) -> Result<(), Box<dyn std::error::Error>> {
    let renderer_config = &config.renderer;

    log::info!("Creating window...");
    let mut window = Window::new(&renderer_config.application_name, WINDOW_WIDTH, WINDOW_HEIGHT)?;

    let instance = Instance::new(
        &renderer_config.application_name,
        renderer_config.validation_enabled(),
        &window.required_extensions()?,
    )?;
    let device = Device::new(&instance)?;
    log::info!("Rendering on {}", device.name());

    let surface = Arc::new(Surface::new(&device, &window)?);
    let allocator = Arc::new(VmaAllocator::new(&device)?);
    let mut swapchain = SwapChain::new(
        &surface,
        &allocator,
        &renderer_config.swapchain,
        window.framebuffer_extent(),
    )?;
    let mut frames = FrameLoop::new(&device, device.graphics_queue(), renderer_config)?;
    let mut renderer = ClearRenderer::new(
        &device,
        &swapchain,
        &config.shaders,
        renderer_config.swapchain.clear_color,
    )?;

    log::info!("Entering frame loop");
    while !frames.close_requested() {
        for signal in window.poll_signals() {
            frames.handle_signal(signal, &mut swapchain);
        }
        match frames.draw_frame(&mut swapchain, &mut renderer)? {
            FrameOutcome::Minimised => window.wait_events(),
            FrameOutcome::Closed => break,
            FrameOutcome::Presented { .. } | FrameOutcome::Recreated => {}
        }
    }

    frames.wait_idle()?;
    let stats = frames.stats();
    log::info!(
        "Presented {} frames ({} skipped, {} swapchain recreations)",
        stats.frames_presented,
        stats.frames_skipped,
        stats.recreations
    );
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config()?;
    init_logging(&config.engine)?;
    config.validate()?;

    log::info!("Starting {}", config.renderer.application_name);
    if let Err(e) = run(&config) {
        log::error!("Application error: {}", e);
        return Err(e);
    }
    log::info!("Clear demo finished successfully");
    Ok(())
}
