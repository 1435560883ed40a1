//! SPIR-V shader modules
//!
//! The renderer only ever sees compiled bytecode. Compiling GLSL/HLSL is the
//! job of an external tool; a [`Shader`] takes the bytes plus the stage they
//! belong to.

use ash::vk;
use serde::{Deserialize, Serialize};
use std::ffi::{CStr, CString};
use std::io::Cursor;
use std::path::Path;

use crate::vulkan::resources::handle::DeviceHandle;
use crate::vulkan::{Device, VulkanError, VulkanResult};

/// First word of every SPIR-V module
pub const SPIRV_MAGIC: u32 = 0x0723_0203;

/// Pipeline stage a shader module is compiled for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ShaderStage {
    /// Vertex shader
    Vertex,
    /// Tessellation control shader
    TessellationControl,
    /// Tessellation evaluation shader
    TessellationEvaluation,
    /// Geometry shader
    Geometry,
    /// Fragment shader
    Fragment,
    /// Compute shader
    Compute,
}

impl ShaderStage {
    /// Native stage flag
    pub fn to_vk(self) -> vk::ShaderStageFlags {
        match self {
            ShaderStage::Vertex => vk::ShaderStageFlags::VERTEX,
            ShaderStage::TessellationControl => vk::ShaderStageFlags::TESSELLATION_CONTROL,
            ShaderStage::TessellationEvaluation => vk::ShaderStageFlags::TESSELLATION_EVALUATION,
            ShaderStage::Geometry => vk::ShaderStageFlags::GEOMETRY,
            ShaderStage::Fragment => vk::ShaderStageFlags::FRAGMENT,
            ShaderStage::Compute => vk::ShaderStageFlags::COMPUTE,
        }
    }
}

/// Compiled shader module for one stage
pub struct Shader {
    handle: DeviceHandle<vk::ShaderModule>,
    stage: ShaderStage,
    entry_point: CString,
}

impl Shader {
    /// Create a shader module from SPIR-V bytecode
    ///
    /// The bytes need not be aligned, but their length must be a multiple of
    /// four and they must start with the SPIR-V magic number.
    pub fn from_bytes(device: &Device, stage: ShaderStage, bytes: &[u8]) -> VulkanResult<Self> {
        let words = parse_spirv(bytes)?;
        let create_info = vk::ShaderModuleCreateInfo::builder().code(&words);
        let module = unsafe { device.raw().create_shader_module(&create_info, None) }
            .map_err(VulkanError::creation("shader module"))?;

        log::debug!("Created {:?} shader module ({} words)", stage, words.len());
        Ok(Self {
            handle: DeviceHandle::new(device, module),
            stage,
            entry_point: CString::from(c"main"),
        })
    }

    /// Load a shader module from a SPIR-V file
    pub fn from_file<P: AsRef<Path>>(
        device: &Device,
        stage: ShaderStage,
        path: P,
    ) -> VulkanResult<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|e| {
            VulkanError::InvalidShader(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::from_bytes(device, stage, &bytes)
    }

    /// Use a different entry point than `main`
    pub fn with_entry_point(mut self, name: &str) -> VulkanResult<Self> {
        self.entry_point = CString::new(name)
            .map_err(|_| VulkanError::InvalidShader(format!("bad entry point {name:?}")))?;
        Ok(self)
    }

    /// Get shader module handle
    pub fn handle(&self) -> vk::ShaderModule {
        self.handle.raw()
    }

    /// Stage this module was compiled for
    pub fn stage(&self) -> ShaderStage {
        self.stage
    }

    /// Entry point name
    pub fn entry_point(&self) -> &CStr {
        &self.entry_point
    }

    /// Build the stage description used at pipeline creation
    ///
    /// The returned struct borrows the entry point name from `self`.
    pub fn stage_info(&self) -> vk::PipelineShaderStageCreateInfo {
        vk::PipelineShaderStageCreateInfo::builder()
            .stage(self.stage.to_vk())
            .module(self.handle())
            .name(&self.entry_point)
            .build()
    }
}

impl Drop for Shader {
    fn drop(&mut self) {
        unsafe {
            self.handle
                .device()
                .raw()
                .destroy_shader_module(self.handle.raw(), None);
        }
    }
}

/// Decode SPIR-V bytes into words, checking length and magic number
pub fn parse_spirv(bytes: &[u8]) -> VulkanResult<Vec<u32>> {
    let words = ash::util::read_spv(&mut Cursor::new(bytes))
        .map_err(|e| VulkanError::InvalidShader(e.to_string()))?;
    match words.first() {
        Some(&SPIRV_MAGIC) => Ok(words),
        Some(other) => Err(VulkanError::InvalidShader(format!(
            "bad SPIR-V magic number {other:#010x}"
        ))),
        None => Err(VulkanError::InvalidShader("empty SPIR-V module".to_string())),
    }
}
