//! Graphics and compute pipeline construction
//!
//! A [`PipelineBuilder`] owns the shader modules and the [`PipelineLayout`]
//! it is given. `build` consumes the builder, so the shader modules are
//! destroyed exactly once whether or not pipeline creation succeeds, and the
//! layout moves into the finished [`Pipeline`].

use ash::vk;

use crate::vulkan::rendering::pipeline_cache::PipelineCache;
use crate::vulkan::rendering::pipeline_layout::PipelineLayout;
use crate::vulkan::rendering::render_pass::RenderPass;
use crate::vulkan::rendering::shader::{Shader, ShaderStage};
use crate::vulkan::resources::handle::DeviceHandle;
use crate::vulkan::{Device, VulkanError, VulkanResult};

/// Which terminal build path a builder takes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineKind {
    /// Rasterization pipeline
    Graphics,
    /// Compute pipeline
    Compute,
}

impl PipelineKind {
    /// Bind point used when recording
    pub fn bind_point(self) -> vk::PipelineBindPoint {
        match self {
            PipelineKind::Graphics => vk::PipelineBindPoint::GRAPHICS,
            PipelineKind::Compute => vk::PipelineBindPoint::COMPUTE,
        }
    }
}

enum RenderTarget<'a> {
    None,
    RenderPass {
        render_pass: &'a RenderPass,
        subpass: u32,
    },
    Dynamic {
        colour_formats: Vec<vk::Format>,
        depth_format: vk::Format,
    },
}

/// Check base-pipeline and derivative settings before they reach the driver
///
/// Pipelines are created one at a time, so a base pipeline can only be given
/// by handle; `base_index` must stay at `-1`.
pub fn check_derivative(
    flags: vk::PipelineCreateFlags,
    base: Option<(vk::Pipeline, vk::PipelineCreateFlags)>,
    base_index: i32,
) -> Result<(), String> {
    if !flags.contains(vk::PipelineCreateFlags::DERIVATIVE) {
        if base.is_some() || base_index != -1 {
            return Err("base pipeline given without the DERIVATIVE flag".to_string());
        }
        return Ok(());
    }
    match (base, base_index) {
        (None, -1) => Err("derivative pipeline has no base pipeline".to_string()),
        (Some(_), index) if index != -1 => {
            Err("base pipeline handle and index are mutually exclusive".to_string())
        }
        (None, index) => Err(format!(
            "base pipeline index {index} does not name an earlier pipeline in this batch"
        )),
        (Some((handle, _)), _) if handle == vk::Pipeline::null() => {
            Err("base pipeline handle is null".to_string())
        }
        (Some((_, base_flags)), _)
            if !base_flags.contains(vk::PipelineCreateFlags::ALLOW_DERIVATIVES) =>
        {
            Err("base pipeline was not created with ALLOW_DERIVATIVES".to_string())
        }
        _ => Ok(()),
    }
}

/// Accumulates pipeline state for a single graphics or compute pipeline
pub struct PipelineBuilder<'a> {
    kind: PipelineKind,
    layout: PipelineLayout,
    shaders: Vec<Shader>,
    target: RenderTarget<'a>,
    cache: Option<&'a PipelineCache>,
    flags: vk::PipelineCreateFlags,
    base: Option<(vk::Pipeline, vk::PipelineCreateFlags)>,
    base_kind: Option<PipelineKind>,
    base_index: i32,
    vertex_bindings: Vec<vk::VertexInputBindingDescription>,
    vertex_attributes: Vec<vk::VertexInputAttributeDescription>,
    topology: vk::PrimitiveTopology,
    primitive_restart: bool,
    polygon_mode: vk::PolygonMode,
    cull_mode: vk::CullModeFlags,
    front_face: vk::FrontFace,
    samples: vk::SampleCountFlags,
    depth_test: bool,
    depth_write: bool,
    depth_compare: vk::CompareOp,
    blend: vk::PipelineColorBlendAttachmentState,
    fixed_viewport: Option<vk::Extent2D>,
    dynamic_states: Vec<vk::DynamicState>,
}

impl<'a> PipelineBuilder<'a> {
    fn with_kind(kind: PipelineKind, layout: PipelineLayout) -> Self {
        Self {
            kind,
            layout,
            shaders: Vec::new(),
            target: RenderTarget::None,
            cache: None,
            flags: vk::PipelineCreateFlags::empty(),
            base: None,
            base_kind: None,
            base_index: -1,
            vertex_bindings: Vec::new(),
            vertex_attributes: Vec::new(),
            topology: vk::PrimitiveTopology::TRIANGLE_LIST,
            primitive_restart: false,
            polygon_mode: vk::PolygonMode::FILL,
            cull_mode: vk::CullModeFlags::BACK,
            front_face: vk::FrontFace::COUNTER_CLOCKWISE,
            samples: vk::SampleCountFlags::TYPE_1,
            depth_test: false,
            depth_write: false,
            depth_compare: vk::CompareOp::LESS,
            blend: vk::PipelineColorBlendAttachmentState::builder()
                .color_write_mask(vk::ColorComponentFlags::RGBA)
                .blend_enable(false)
                .build(),
            fixed_viewport: None,
            dynamic_states: vec![vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR],
        }
    }

    /// Start a graphics pipeline with dynamic viewport and scissor
    pub fn graphics(layout: PipelineLayout) -> Self {
        Self::with_kind(PipelineKind::Graphics, layout)
    }

    /// Start a compute pipeline
    pub fn compute(layout: PipelineLayout) -> Self {
        Self::with_kind(PipelineKind::Compute, layout)
    }

    /// Add a shader stage; the builder takes ownership of the module
    pub fn shader(mut self, shader: Shader) -> Self {
        self.shaders.push(shader);
        self
    }

    /// Render into `subpass` of a render pass
    pub fn render_pass(mut self, render_pass: &'a RenderPass, subpass: u32) -> Self {
        self.target = RenderTarget::RenderPass {
            render_pass,
            subpass,
        };
        self
    }

    /// Render with `VK_KHR_dynamic_rendering` into attachments of these formats
    pub fn dynamic_rendering(
        mut self,
        colour_formats: &[vk::Format],
        depth_format: Option<vk::Format>,
    ) -> Self {
        self.target = RenderTarget::Dynamic {
            colour_formats: colour_formats.to_vec(),
            depth_format: depth_format.unwrap_or(vk::Format::UNDEFINED),
        };
        self
    }

    /// Use a pipeline cache during creation
    pub fn cache(mut self, cache: &'a PipelineCache) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Let later pipelines derive from this one
    pub fn allow_derivatives(mut self) -> Self {
        self.flags |= vk::PipelineCreateFlags::ALLOW_DERIVATIVES;
        self
    }

    /// Derive from an existing pipeline
    pub fn derive_from(mut self, base: &'a Pipeline) -> Self {
        self.flags |= vk::PipelineCreateFlags::DERIVATIVE;
        self.base = Some((base.handle(), base.flags()));
        self.base_kind = Some(base.kind());
        self
    }

    /// Set raw creation flags, replacing any set so far
    pub fn flags(mut self, flags: vk::PipelineCreateFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Set a raw base pipeline index
    pub fn base_pipeline_index(mut self, index: i32) -> Self {
        self.base_index = index;
        self
    }

    /// Add a vertex buffer binding
    pub fn vertex_binding(mut self, binding: u32, stride: u32, input_rate: vk::VertexInputRate) -> Self {
        self.vertex_bindings.push(vk::VertexInputBindingDescription {
            binding,
            stride,
            input_rate,
        });
        self
    }

    /// Add a vertex attribute
    pub fn vertex_attribute(mut self, location: u32, binding: u32, format: vk::Format, offset: u32) -> Self {
        self.vertex_attributes.push(vk::VertexInputAttributeDescription {
            location,
            binding,
            format,
            offset,
        });
        self
    }

    /// Primitive topology and restart
    pub fn topology(mut self, topology: vk::PrimitiveTopology, primitive_restart: bool) -> Self {
        self.topology = topology;
        self.primitive_restart = primitive_restart;
        self
    }

    /// Rasterizer polygon mode
    pub fn polygon_mode(mut self, mode: vk::PolygonMode) -> Self {
        self.polygon_mode = mode;
        self
    }

    /// Face culling and winding
    pub fn cull(mut self, cull_mode: vk::CullModeFlags, front_face: vk::FrontFace) -> Self {
        self.cull_mode = cull_mode;
        self.front_face = front_face;
        self
    }

    /// Rasterization sample count
    pub fn samples(mut self, samples: vk::SampleCountFlags) -> Self {
        self.samples = samples;
        self
    }

    /// Enable depth testing
    pub fn depth(mut self, write: bool, compare: vk::CompareOp) -> Self {
        self.depth_test = true;
        self.depth_write = write;
        self.depth_compare = compare;
        self
    }

    /// Standard premultiplied-free alpha blending on every colour attachment
    pub fn alpha_blending(mut self) -> Self {
        self.blend = vk::PipelineColorBlendAttachmentState::builder()
            .color_write_mask(vk::ColorComponentFlags::RGBA)
            .blend_enable(true)
            .src_color_blend_factor(vk::BlendFactor::SRC_ALPHA)
            .dst_color_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
            .color_blend_op(vk::BlendOp::ADD)
            .src_alpha_blend_factor(vk::BlendFactor::ONE)
            .dst_alpha_blend_factor(vk::BlendFactor::ZERO)
            .alpha_blend_op(vk::BlendOp::ADD)
            .build();
        self
    }

    /// Bake a viewport and scissor covering `extent` into the pipeline
    pub fn fixed_viewport(mut self, extent: vk::Extent2D) -> Self {
        self.fixed_viewport = Some(extent);
        self.dynamic_states
            .retain(|state| *state != vk::DynamicState::VIEWPORT && *state != vk::DynamicState::SCISSOR);
        self
    }

    /// Mark additional state as dynamic
    pub fn dynamic_state(mut self, state: vk::DynamicState) -> Self {
        if !self.dynamic_states.contains(&state) {
            self.dynamic_states.push(state);
        }
        self
    }

    /// Create the pipeline
    ///
    /// With validation enabled, derivative settings are checked first and
    /// reported as [`VulkanError::InvalidPipeline`].
    pub fn build(self) -> VulkanResult<Pipeline> {
        let device = self.layout.device().clone();
        self.validate(&device)?;

        let raw = match self.kind {
            PipelineKind::Graphics => self.create_graphics(&device)?,
            PipelineKind::Compute => self.create_compute(&device)?,
        };

        log::debug!(
            "Created {:?} pipeline ({} stages)",
            self.kind,
            self.shaders.len()
        );
        Ok(Pipeline {
            handle: DeviceHandle::new(&device, raw),
            layout: self.layout,
            kind: self.kind,
            flags: self.flags,
        })
    }

    fn validate(&self, device: &Device) -> VulkanResult<()> {
        let stages: Vec<ShaderStage> = self.shaders.iter().map(Shader::stage).collect();
        for (index, stage) in stages.iter().enumerate() {
            if stages[..index].contains(stage) {
                return Err(VulkanError::InvalidPipeline(format!(
                    "{stage:?} stage given twice"
                )));
            }
        }

        match self.kind {
            PipelineKind::Compute => {
                if stages != [ShaderStage::Compute] {
                    return Err(VulkanError::InvalidPipeline(format!(
                        "compute pipeline needs exactly one compute stage, got {stages:?}"
                    )));
                }
            }
            PipelineKind::Graphics => {
                if !stages.contains(&ShaderStage::Vertex) {
                    return Err(VulkanError::InvalidPipeline(
                        "graphics pipeline has no vertex stage".to_string(),
                    ));
                }
                if stages.contains(&ShaderStage::Compute) {
                    return Err(VulkanError::InvalidPipeline(
                        "compute stage in a graphics pipeline".to_string(),
                    ));
                }
                match &self.target {
                    RenderTarget::None => {
                        return Err(VulkanError::InvalidPipeline(
                            "graphics pipeline needs a render pass or dynamic rendering formats"
                                .to_string(),
                        ))
                    }
                    RenderTarget::Dynamic { .. } if !device.supports_dynamic_rendering() => {
                        return Err(VulkanError::InvalidPipeline(
                            "dynamic rendering is not enabled on this device".to_string(),
                        ))
                    }
                    _ => {}
                }
                if self.fixed_viewport.is_none()
                    && !(self.dynamic_states.contains(&vk::DynamicState::VIEWPORT)
                        && self.dynamic_states.contains(&vk::DynamicState::SCISSOR))
                {
                    return Err(VulkanError::InvalidPipeline(
                        "viewport and scissor must be fixed or dynamic".to_string(),
                    ));
                }
            }
        }

        if device.debug_enabled() {
            check_derivative(self.flags, self.base, self.base_index)
                .map_err(VulkanError::InvalidPipeline)?;
            if let Some(base_kind) = self.base_kind.filter(|kind| *kind != self.kind) {
                return Err(VulkanError::InvalidPipeline(format!(
                    "{:?} pipeline cannot derive from a {:?} pipeline",
                    self.kind, base_kind
                )));
            }
        }
        Ok(())
    }

    fn base_handle(&self) -> vk::Pipeline {
        self.base.map_or(vk::Pipeline::null(), |(handle, _)| handle)
    }

    fn cache_handle(&self) -> vk::PipelineCache {
        self.cache.map_or(vk::PipelineCache::null(), PipelineCache::handle)
    }

    fn create_graphics(&self, device: &Device) -> VulkanResult<vk::Pipeline> {
        let stages: Vec<_> = self.shaders.iter().map(Shader::stage_info).collect();

        let vertex_input = vk::PipelineVertexInputStateCreateInfo::builder()
            .vertex_binding_descriptions(&self.vertex_bindings)
            .vertex_attribute_descriptions(&self.vertex_attributes);

        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::builder()
            .topology(self.topology)
            .primitive_restart_enable(self.primitive_restart);

        let extent = self.fixed_viewport.unwrap_or_default();
        let viewports = [vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: extent.width as f32,
            height: extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        }];
        let scissors = [vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent,
        }];
        let viewport_state = if self.fixed_viewport.is_some() {
            vk::PipelineViewportStateCreateInfo::builder()
                .viewports(&viewports)
                .scissors(&scissors)
        } else {
            vk::PipelineViewportStateCreateInfo::builder()
                .viewport_count(1)
                .scissor_count(1)
        };

        let dynamic_state =
            vk::PipelineDynamicStateCreateInfo::builder().dynamic_states(&self.dynamic_states);

        let rasterizer = vk::PipelineRasterizationStateCreateInfo::builder()
            .depth_clamp_enable(false)
            .rasterizer_discard_enable(false)
            .polygon_mode(self.polygon_mode)
            .line_width(1.0)
            .cull_mode(self.cull_mode)
            .front_face(self.front_face)
            .depth_bias_enable(false);

        let multisampling = vk::PipelineMultisampleStateCreateInfo::builder()
            .sample_shading_enable(false)
            .rasterization_samples(self.samples);

        let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::builder()
            .depth_test_enable(self.depth_test)
            .depth_write_enable(self.depth_write)
            .depth_compare_op(self.depth_compare)
            .depth_bounds_test_enable(false)
            .stencil_test_enable(false);

        let colour_count = match &self.target {
            RenderTarget::RenderPass { render_pass, .. } => render_pass.colour_formats().len(),
            RenderTarget::Dynamic { colour_formats, .. } => colour_formats.len(),
            RenderTarget::None => 0,
        };
        let blend_attachments = vec![self.blend; colour_count];
        let colour_blending = vk::PipelineColorBlendStateCreateInfo::builder()
            .logic_op_enable(false)
            .attachments(&blend_attachments);

        let mut rendering_info = vk::PipelineRenderingCreateInfo::builder();
        let mut create_info = vk::GraphicsPipelineCreateInfo::builder()
            .flags(self.flags)
            .stages(&stages)
            .vertex_input_state(&vertex_input)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterizer)
            .multisample_state(&multisampling)
            .depth_stencil_state(&depth_stencil)
            .color_blend_state(&colour_blending)
            .dynamic_state(&dynamic_state)
            .layout(self.layout.handle())
            .base_pipeline_handle(self.base_handle())
            .base_pipeline_index(self.base_index);

        match &self.target {
            RenderTarget::RenderPass {
                render_pass,
                subpass,
            } => {
                create_info = create_info.render_pass(render_pass.handle()).subpass(*subpass);
            }
            RenderTarget::Dynamic {
                colour_formats,
                depth_format,
            } => {
                rendering_info = rendering_info
                    .color_attachment_formats(colour_formats)
                    .depth_attachment_format(*depth_format);
                create_info = create_info.push_next(&mut rendering_info);
            }
            RenderTarget::None => {}
        }

        let pipelines = unsafe {
            device
                .raw()
                .create_graphics_pipelines(self.cache_handle(), &[create_info.build()], None)
        }
        .map_err(|(partial, result)| {
            destroy_partial(device, &partial);
            VulkanError::creation("graphics pipeline")(result)
        })?;
        single_pipeline(pipelines, "graphics pipeline")
    }

    fn create_compute(&self, device: &Device) -> VulkanResult<vk::Pipeline> {
        let stage = self
            .shaders
            .first()
            .map(Shader::stage_info)
            .ok_or_else(|| VulkanError::InvalidPipeline("compute pipeline has no shader".to_string()))?;

        let create_info = vk::ComputePipelineCreateInfo::builder()
            .flags(self.flags)
            .stage(stage)
            .layout(self.layout.handle())
            .base_pipeline_handle(self.base_handle())
            .base_pipeline_index(self.base_index);

        let pipelines = unsafe {
            device
                .raw()
                .create_compute_pipelines(self.cache_handle(), &[create_info.build()], None)
        }
        .map_err(|(partial, result)| {
            destroy_partial(device, &partial);
            VulkanError::creation("compute pipeline")(result)
        })?;
        single_pipeline(pipelines, "compute pipeline")
    }
}

fn destroy_partial(device: &Device, pipelines: &[vk::Pipeline]) {
    for &pipeline in pipelines.iter().filter(|p| **p != vk::Pipeline::null()) {
        unsafe { device.raw().destroy_pipeline(pipeline, None) };
    }
}

fn single_pipeline(pipelines: Vec<vk::Pipeline>, what: &'static str) -> VulkanResult<vk::Pipeline> {
    pipelines.into_iter().next().ok_or(VulkanError::Creation {
        what,
        result: vk::Result::ERROR_UNKNOWN,
    })
}

/// Pipeline wrapper that owns its layout
pub struct Pipeline {
    handle: DeviceHandle<vk::Pipeline>,
    layout: PipelineLayout,
    kind: PipelineKind,
    flags: vk::PipelineCreateFlags,
}

impl Pipeline {
    /// Get pipeline handle
    pub fn handle(&self) -> vk::Pipeline {
        self.handle.raw()
    }

    /// Get the pipeline layout
    pub fn layout(&self) -> &PipelineLayout {
        &self.layout
    }

    /// Graphics or compute
    pub fn kind(&self) -> PipelineKind {
        self.kind
    }

    /// Bind point used when recording
    pub fn bind_point(&self) -> vk::PipelineBindPoint {
        self.kind.bind_point()
    }

    /// Flags the pipeline was created with
    pub fn flags(&self) -> vk::PipelineCreateFlags {
        self.flags
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        let device = self.handle.device();
        log::debug!("Destroying {:?} pipeline", self.kind);
        unsafe {
            let _ = device.wait_idle();
            device.raw().destroy_pipeline(self.handle.raw(), None);
        }
    }
}
