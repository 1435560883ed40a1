//! Vulkan surface management
//!
//! Handles window surface creation and format negotiation for presentation.
//! Formats are queried once and cached; capabilities are queried on every call
//! because they change whenever the window is resized.

use ash::extensions::khr;
use ash::vk;

use crate::vulkan::initialization::window::WindowTarget;
use crate::vulkan::{Device, VulkanError, VulkanResult};

/// Format used when the surface reports a single `UNDEFINED` entry
pub const FALLBACK_COLOUR_FORMAT: vk::Format = vk::Format::B8G8R8A8_UNORM;

/// Extent reported by surfaces whose size is decided by the swapchain
const EXTENT_FROM_SWAPCHAIN: u32 = u32::MAX;

/// Vulkan surface wrapper for presentation
pub struct Surface {
    loader: khr::Surface,
    raw: vk::SurfaceKHR,
    formats: Vec<vk::SurfaceFormatKHR>,
    device: Device,
}

impl Surface {
    /// Create a surface for `window` and check the device can present to it
    pub fn new(device: &Device, window: &dyn WindowTarget) -> VulkanResult<Self> {
        let instance = device.instance();
        let loader = khr::Surface::new(instance.entry(), instance.raw());
        let raw = window.create_surface(instance.entry(), instance.raw())?;

        // From here on, dropping `surface` destroys the native handle.
        let mut surface = Self {
            loader,
            raw,
            formats: Vec::new(),
            device: device.clone(),
        };

        let family = device.graphics_queue_family();
        if !surface.supports_present(family)? {
            return Err(VulkanError::PresentationUnsupported { family });
        }

        let formats = unsafe {
            surface
                .loader
                .get_physical_device_surface_formats(device.physical_device(), raw)
        }
        .map_err(VulkanError::Api)?;
        if formats.is_empty() {
            return Err(VulkanError::NoSurfaceFormats);
        }
        surface.formats = formats;

        log::debug!(
            "Created surface ({} formats, colour {:?})",
            surface.formats.len(),
            surface.colour_format()
        );
        Ok(surface)
    }

    /// Get the underlying surface handle
    pub fn handle(&self) -> vk::SurfaceKHR {
        self.raw
    }

    /// Get the surface loader
    pub fn loader(&self) -> &khr::Surface {
        &self.loader
    }

    /// Device this surface presents from
    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Formats reported at construction
    pub fn formats(&self) -> &[vk::SurfaceFormatKHR] {
        &self.formats
    }

    /// Colour format for swapchain images
    ///
    /// A lone `UNDEFINED` entry means the surface accepts anything, in which
    /// case [`FALLBACK_COLOUR_FORMAT`] is used.
    pub fn colour_format(&self) -> vk::Format {
        match self.formats.as_slice() {
            [only] if only.format == vk::Format::UNDEFINED => FALLBACK_COLOUR_FORMAT,
            [first, ..] => first.format,
            [] => FALLBACK_COLOUR_FORMAT,
        }
    }

    /// Colour space of the first reported format
    pub fn colour_space(&self) -> vk::ColorSpaceKHR {
        self.formats
            .first()
            .map_or(vk::ColorSpaceKHR::SRGB_NONLINEAR, |format| format.color_space)
    }

    /// Get current surface capabilities
    pub fn capabilities(&self) -> VulkanResult<vk::SurfaceCapabilitiesKHR> {
        unsafe {
            self.loader
                .get_physical_device_surface_capabilities(self.device.physical_device(), self.raw)
        }
        .map_err(VulkanError::Api)
    }

    /// Get supported present modes
    pub fn present_modes(&self) -> VulkanResult<Vec<vk::PresentModeKHR>> {
        unsafe {
            self.loader
                .get_physical_device_surface_present_modes(self.device.physical_device(), self.raw)
        }
        .map_err(VulkanError::Api)
    }

    /// Check if a queue family supports presentation to this surface
    pub fn supports_present(&self, queue_family_index: u32) -> VulkanResult<bool> {
        unsafe {
            self.loader.get_physical_device_surface_support(
                self.device.physical_device(),
                queue_family_index,
                self.raw,
            )
        }
        .map_err(VulkanError::Api)
    }

    /// Current drawable extent
    ///
    /// Uses the surface's own extent when it reports one, otherwise
    /// `window_extent`; either way the result is clamped to the capability
    /// bounds.
    pub fn extent(&self, window_extent: vk::Extent2D) -> VulkanResult<vk::Extent2D> {
        Ok(choose_extent(&self.capabilities()?, window_extent))
    }
}

/// Pick the swapchain extent for the given capabilities
pub fn choose_extent(
    caps: &vk::SurfaceCapabilitiesKHR,
    window_extent: vk::Extent2D,
) -> vk::Extent2D {
    let requested = if caps.current_extent.width == EXTENT_FROM_SWAPCHAIN {
        window_extent
    } else {
        caps.current_extent
    };
    let max_width = caps.max_image_extent.width.max(caps.min_image_extent.width);
    let max_height = caps.max_image_extent.height.max(caps.min_image_extent.height);
    vk::Extent2D {
        width: requested.width.clamp(caps.min_image_extent.width, max_width),
        height: requested.height.clamp(caps.min_image_extent.height, max_height),
    }
}

impl Drop for Surface {
    fn drop(&mut self) {
        log::debug!("Destroying surface");
        unsafe {
            self.loader.destroy_surface(self.raw, None);
        }
    }
}
