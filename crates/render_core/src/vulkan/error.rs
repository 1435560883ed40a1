//! Vulkan error taxonomy
//!
//! Setup failures are fatal and abort startup, creation failures carry the
//! native result code, and descriptor-pool exhaustion has its own variant so
//! callers can tell it apart from a generic creation failure. Per-frame
//! acquire/present codes never come through here; see
//! [`SwapchainStatus`](crate::vulkan::SwapchainStatus).

use ash::vk;
use thiserror::Error;

/// Vulkan-specific error types
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VulkanError {
    /// General Vulkan API error with result code
    #[error("Vulkan API error: {0:?}")]
    Api(vk::Result),

    /// Native object creation failed
    #[error("Failed to create {what}: {result:?}")]
    Creation {
        /// Kind of object that could not be created
        what: &'static str,
        /// Result code reported by the driver
        result: vk::Result,
    },

    /// The Vulkan loader could not be found or initialized
    #[error("Failed to load Vulkan: {0}")]
    Loading(String),

    /// A required instance or device extension is unavailable
    #[error("Required extension not available: {0}")]
    MissingExtension(String),

    /// A requested instance layer is unavailable
    #[error("Required layer not available: {0}")]
    MissingLayer(String),

    /// The driver enumerated zero physical devices
    #[error("No Vulkan-capable physical device found")]
    NoPhysicalDevice,

    /// The selected physical device lacks `VK_KHR_swapchain`
    #[error("Selected GPU '{device}' does not support VK_KHR_swapchain")]
    MissingSwapchainSupport {
        /// Name reported by the driver
        device: String,
    },

    /// The selected physical device has no graphics-capable queue family
    #[error("Selected GPU '{device}' has no graphics queue family")]
    NoGraphicsQueue {
        /// Name reported by the driver
        device: String,
    },

    /// The graphics queue family cannot present to the surface
    #[error("Queue family {family} cannot present to this surface")]
    PresentationUnsupported {
        /// Graphics queue family index that was checked
        family: u32,
    },

    /// The surface reported no colour formats
    #[error("Surface reports no supported formats")]
    NoSurfaceFormats,

    /// Descriptor pool ran out of space for the requested sets
    #[error("Descriptor pool exhausted: {0:?}")]
    DescriptorPoolExhausted(vk::Result),

    /// Vulkan context initialization failed
    #[error("Initialization failed: {0}")]
    InitializationFailed(String),

    /// Invalid operation attempted
    #[error("Invalid operation: {reason}")]
    InvalidOperation {
        /// Description of why the operation is invalid
        reason: String,
    },

    /// A host copy would fall outside the mapped allocation
    #[error("Access of {len} bytes at offset {offset} exceeds resource size {size}")]
    OutOfBounds {
        /// Byte offset of the access
        offset: u64,
        /// Length of the access in bytes
        len: u64,
        /// Size of the resource in bytes
        size: u64,
    },

    /// Pipeline state rejected before reaching the driver
    #[error("Invalid pipeline state: {0}")]
    InvalidPipeline(String),

    /// Shader bytecode is malformed
    #[error("Invalid shader: {0}")]
    InvalidShader(String),

    /// A host wait ran out of time
    #[error("Timed out waiting for {0}")]
    Timeout(&'static str),

    /// The window collaborator failed
    #[error("Window error: {0}")]
    Window(String),
}

impl VulkanError {
    /// Build a closure mapping a native result to a creation error
    pub fn creation(what: &'static str) -> impl Fn(vk::Result) -> Self {
        move |result| Self::Creation { what, result }
    }
}

impl From<vk::Result> for VulkanError {
    fn from(result: vk::Result) -> Self {
        Self::Api(result)
    }
}

/// Result type for Vulkan operations
pub type VulkanResult<T> = Result<T, VulkanError>;
