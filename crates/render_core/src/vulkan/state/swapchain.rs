//! Vulkan swapchain management
//!
//! Handles swapchain creation and in-place recreation. A recreate builds the
//! new swapchain with the current one as `oldSwapchain`, and the old images,
//! views and handle are released only once the replacement exists. If
//! creation fails the current swapchain stays in place, so a swapchain handle
//! is valid at every point between [`SwapChain::new`] and teardown.
//!
//! Passing a swapchain as `oldSwapchain` retires it even when creation
//! fails. A kept swapchain is therefore marked retired: it can still be
//! destroyed but never acquires again, and the next recreate starts from a
//! null `oldSwapchain`.

use ash::prelude::VkResult;
use ash::vk;
use std::sync::Arc;
use std::time::Duration;

use crate::config::SwapchainConfig;
use crate::vulkan::initialization::allocator::{MemoryAllocator, VmaAllocator};
use crate::vulkan::initialization::surface::{choose_extent, Surface};
use crate::vulkan::resources::handle::DeviceHandle;
use crate::vulkan::resources::image::Image;
use crate::vulkan::state::sync::{timeout_nanos, Fence, Semaphore};
use crate::vulkan::{Device, Queue, VulkanError, VulkanResult};

/// Outcome of an acquire or present call
///
/// None of these are errors from the swapchain's point of view; the frame
/// loop inspects them and decides whether to recreate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwapchainStatus {
    /// The swapchain matches the surface exactly
    Optimal,
    /// Presentation still works but the swapchain no longer matches the surface
    Suboptimal,
    /// The swapchain can no longer present and must be recreated
    OutOfDate,
    /// Any other native failure
    Failed(vk::Result),
}

impl SwapchainStatus {
    /// Whether the swapchain should be recreated before the next acquire
    pub fn needs_recreate(self) -> bool {
        matches!(self, SwapchainStatus::Suboptimal | SwapchainStatus::OutOfDate)
    }

    /// Whether an image was acquired or presented
    pub fn is_usable(self) -> bool {
        matches!(self, SwapchainStatus::Optimal | SwapchainStatus::Suboptimal)
    }

    fn from_error(result: vk::Result) -> Self {
        match result {
            vk::Result::ERROR_OUT_OF_DATE_KHR => SwapchainStatus::OutOfDate,
            vk::Result::SUBOPTIMAL_KHR => SwapchainStatus::Suboptimal,
            other => SwapchainStatus::Failed(other),
        }
    }

    fn from_suboptimal(suboptimal: bool) -> Self {
        if suboptimal {
            SwapchainStatus::Suboptimal
        } else {
            SwapchainStatus::Optimal
        }
    }
}

/// Lifecycle of a [`SwapChain`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwapchainState {
    /// No native swapchain has been built yet
    Uninitialized,
    /// A native swapchain exists and can be used
    Created,
    /// A replacement is being built
    Recreating,
    /// Torn down; only dropping remains
    Destroyed,
}

/// Pick the image count for the given capabilities
///
/// Defaults to one more than the minimum; `max_image_count == 0` means there
/// is no upper bound.
pub fn choose_image_count(caps: &vk::SurfaceCapabilitiesKHR, desired: Option<u32>) -> u32 {
    let requested = desired
        .unwrap_or_else(|| caps.min_image_count.saturating_add(1))
        .max(caps.min_image_count);
    if caps.max_image_count > 0 {
        requested.min(caps.max_image_count)
    } else {
        requested
    }
}

/// Use the identity transform when available, otherwise keep the current one
pub fn choose_transform(caps: &vk::SurfaceCapabilitiesKHR) -> vk::SurfaceTransformFlagsKHR {
    if caps
        .supported_transforms
        .contains(vk::SurfaceTransformFlagsKHR::IDENTITY)
    {
        vk::SurfaceTransformFlagsKHR::IDENTITY
    } else {
        caps.current_transform
    }
}

/// Use the preferred present mode when available, otherwise FIFO
pub fn choose_present_mode(
    available: &[vk::PresentModeKHR],
    preferred: vk::PresentModeKHR,
) -> vk::PresentModeKHR {
    if available.contains(&preferred) {
        preferred
    } else {
        vk::PresentModeKHR::FIFO
    }
}

fn choose_composite_alpha(caps: &vk::SurfaceCapabilitiesKHR) -> vk::CompositeAlphaFlagsKHR {
    [
        vk::CompositeAlphaFlagsKHR::OPAQUE,
        vk::CompositeAlphaFlagsKHR::PRE_MULTIPLIED,
        vk::CompositeAlphaFlagsKHR::POST_MULTIPLIED,
        vk::CompositeAlphaFlagsKHR::INHERIT,
    ]
    .into_iter()
    .find(|mode| caps.supported_composite_alpha.contains(*mode))
    .unwrap_or(vk::CompositeAlphaFlagsKHR::OPAQUE)
}

/// Native swapchain together with the views over its images
///
/// Dropping the parts destroys every view before the swapchain itself.
struct SwapchainParts<A: MemoryAllocator> {
    images: Vec<Image<A>>,
    handle: DeviceHandle<vk::SwapchainKHR>,
}

impl<A: MemoryAllocator> Drop for SwapchainParts<A> {
    fn drop(&mut self) {
        let device = self.handle.device();
        let _ = device.wait_idle();
        self.images.clear();
        unsafe {
            device
                .swapchain_loader()
                .destroy_swapchain(self.handle.raw(), None);
        }
    }
}

/// Swapchain management wrapper with RAII cleanup
pub struct SwapChain<A: MemoryAllocator = VmaAllocator> {
    parts: Option<SwapchainParts<A>>,
    state: SwapchainState,
    surface: Arc<Surface>,
    allocator: Arc<A>,
    config: SwapchainConfig,
    window_extent: vk::Extent2D,
    format: vk::Format,
    colour_space: vk::ColorSpaceKHR,
    extent: vk::Extent2D,
    present_mode: vk::PresentModeKHR,
    recreate_count: u64,
    retired: bool,
}

impl<A: MemoryAllocator> SwapChain<A> {
    /// Create a swapchain for `surface`
    pub fn new(
        surface: &Arc<Surface>,
        allocator: &Arc<A>,
        config: &SwapchainConfig,
        window_extent: vk::Extent2D,
    ) -> VulkanResult<Self> {
        let mut swapchain = Self {
            parts: None,
            state: SwapchainState::Uninitialized,
            surface: Arc::clone(surface),
            allocator: Arc::clone(allocator),
            config: config.clone(),
            window_extent,
            format: surface.colour_format(),
            colour_space: surface.colour_space(),
            extent: window_extent,
            present_mode: vk::PresentModeKHR::FIFO,
            recreate_count: 0,
            retired: false,
        };
        let parts = swapchain.create(vk::SwapchainKHR::null())?;
        swapchain.parts = Some(parts);
        swapchain.state = SwapchainState::Created;
        Ok(swapchain)
    }

    fn device(&self) -> &Device {
        self.surface.device()
    }

    /// Build a new native swapchain, passing `old` as the recycling hint
    fn create(&mut self, old: vk::SwapchainKHR) -> VulkanResult<SwapchainParts<A>> {
        let caps = self.surface.capabilities()?;
        let extent = choose_extent(&caps, self.window_extent);
        let image_count = choose_image_count(&caps, self.config.desired_image_count);
        let present_mode =
            choose_present_mode(&self.surface.present_modes()?, self.config.present_mode.to_vk());

        let mut usage = vk::ImageUsageFlags::COLOR_ATTACHMENT;
        if caps
            .supported_usage_flags
            .contains(vk::ImageUsageFlags::TRANSFER_DST)
        {
            usage |= vk::ImageUsageFlags::TRANSFER_DST;
        }

        let create_info = vk::SwapchainCreateInfoKHR::builder()
            .surface(self.surface.handle())
            .min_image_count(image_count)
            .image_format(self.format)
            .image_color_space(self.colour_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(usage)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(choose_transform(&caps))
            .composite_alpha(choose_composite_alpha(&caps))
            .present_mode(present_mode)
            .clipped(true)
            .old_swapchain(old);

        let device = self.device().clone();
        let loader = device.swapchain_loader();
        if old != vk::SwapchainKHR::null() {
            self.retired = true;
        }
        let raw = unsafe { loader.create_swapchain(&create_info, None) }
            .map_err(VulkanError::creation("swapchain"))?;

        // Owned by `parts` from here; an early return tears down what exists.
        let mut parts = SwapchainParts {
            images: Vec::new(),
            handle: DeviceHandle::new(&device, raw),
        };
        let raw_images =
            unsafe { loader.get_swapchain_images(raw) }.map_err(VulkanError::Api)?;
        for image in raw_images {
            parts.images.push(Image::view_only(
                &self.allocator,
                image,
                self.format,
                extent,
                vk::ImageAspectFlags::COLOR,
            )?);
        }

        self.extent = extent;
        self.present_mode = present_mode;
        log::info!(
            "Created swapchain: {}x{}, {} images, {:?}, {:?}",
            extent.width,
            extent.height,
            parts.images.len(),
            self.format,
            present_mode
        );
        Ok(parts)
    }

    /// Rebuild the swapchain for the current surface state
    ///
    /// Waits for the device to go idle, builds the replacement using the
    /// current swapchain as `oldSwapchain`, and only then releases the old
    /// images, views and handle. On failure the current swapchain is kept,
    /// retired if it was already handed to the driver.
    pub fn recreate(&mut self) -> VulkanResult<()> {
        if self.state == SwapchainState::Destroyed {
            return Err(VulkanError::InvalidOperation {
                reason: "cannot recreate a destroyed swapchain".to_string(),
            });
        }

        self.state = SwapchainState::Recreating;
        if let Err(e) = self.device().wait_idle() {
            self.state = SwapchainState::Created;
            return Err(e);
        }

        let old = if self.retired {
            vk::SwapchainKHR::null()
        } else {
            self.handle()
        };
        match self.create(old) {
            Ok(parts) => {
                let previous = self.parts.replace(parts);
                drop(previous);
                self.retired = false;
                self.recreate_count += 1;
                self.state = SwapchainState::Created;
                Ok(())
            }
            Err(e) => {
                log::warn!("Swapchain recreation failed, keeping current swapchain: {}", e);
                self.state = SwapchainState::Created;
                Err(e)
            }
        }
    }

    /// Record a new window framebuffer size
    ///
    /// Returns `true` if the size changed and a recreate is due.
    pub fn set_window_extent(&mut self, extent: vk::Extent2D) -> bool {
        let changed = self.window_extent.width != extent.width
            || self.window_extent.height != extent.height;
        self.window_extent = extent;
        changed
    }

    /// Acquire the next presentable image
    ///
    /// Never fails; the returned status says whether `index` is usable. A
    /// retired swapchain reports [`SwapchainStatus::OutOfDate`] without
    /// calling the driver.
    pub fn acquire_next_image(
        &self,
        semaphore: &Semaphore,
        fence: Option<&Fence>,
        timeout: Option<Duration>,
    ) -> (SwapchainStatus, u32) {
        if self.state != SwapchainState::Created {
            return (SwapchainStatus::Failed(vk::Result::ERROR_INITIALIZATION_FAILED), 0);
        }
        if self.retired {
            return (SwapchainStatus::OutOfDate, 0);
        }

        let device = self.device();
        let result = unsafe {
            device.swapchain_loader().acquire_next_image(
                self.handle(),
                timeout_nanos(timeout),
                semaphore.handle(),
                fence.map_or(vk::Fence::null(), Fence::handle),
            )
        };
        match device.track(result) {
            Ok((index, suboptimal)) => (SwapchainStatus::from_suboptimal(suboptimal), index),
            Err(e) => (SwapchainStatus::from_error(e), 0),
        }
    }

    /// Queue `image_index` for presentation once `wait_semaphores` signal
    pub fn queue_present(
        &self,
        queue: &Queue,
        wait_semaphores: &[vk::Semaphore],
        image_index: u32,
    ) -> SwapchainStatus {
        if self.state != SwapchainState::Created {
            return SwapchainStatus::Failed(vk::Result::ERROR_INITIALIZATION_FAILED);
        }

        let swapchains = [self.handle()];
        let indices = [image_index];
        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&indices);

        let device = self.device();
        let result: VkResult<bool> = unsafe {
            device
                .swapchain_loader()
                .queue_present(queue.raw(), &present_info)
        };
        match device.track(result) {
            Ok(suboptimal) => SwapchainStatus::from_suboptimal(suboptimal),
            Err(e) => SwapchainStatus::from_error(e),
        }
    }

    /// Release the swapchain ahead of drop
    pub fn destroy(&mut self) {
        self.parts = None;
        self.state = SwapchainState::Destroyed;
    }

    /// Current lifecycle state
    pub fn state(&self) -> SwapchainState {
        self.state
    }

    /// Whether the current swapchain was retired by a failed recreate
    pub fn is_retired(&self) -> bool {
        self.retired
    }

    /// Current native handle (null once destroyed)
    pub fn handle(&self) -> vk::SwapchainKHR {
        self.parts
            .as_ref()
            .map_or(vk::SwapchainKHR::null(), |parts| parts.handle.raw())
    }

    /// Presentable images
    pub fn images(&self) -> &[Image<A>] {
        match &self.parts {
            Some(parts) => &parts.images,
            None => &[],
        }
    }

    /// Views over the presentable images, in image-index order
    pub fn image_views(&self) -> Vec<vk::ImageView> {
        self.images().iter().map(Image::view).collect()
    }

    /// Number of presentable images
    pub fn image_count(&self) -> usize {
        self.images().len()
    }

    /// Get swapchain image format
    pub fn format(&self) -> vk::Format {
        self.format
    }

    /// Colour space images are presented in
    pub fn colour_space(&self) -> vk::ColorSpaceKHR {
        self.colour_space
    }

    /// Get swapchain extent
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    /// Last framebuffer size reported by the window
    pub fn window_extent(&self) -> vk::Extent2D {
        self.window_extent
    }

    /// Present mode in use
    pub fn present_mode(&self) -> vk::PresentModeKHR {
        self.present_mode
    }

    /// Number of successful recreations
    pub fn recreate_count(&self) -> u64 {
        self.recreate_count
    }

    /// Surface this swapchain presents to
    pub fn surface(&self) -> &Arc<Surface> {
        &self.surface
    }
}

impl<A: MemoryAllocator> Drop for SwapChain<A> {
    fn drop(&mut self) {
        if self.parts.is_some() {
            log::debug!("Destroying swapchain");
        }
        self.destroy();
    }
}
