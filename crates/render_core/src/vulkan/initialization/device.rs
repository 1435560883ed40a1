//! Physical device selection and logical device creation

use ash::extensions::khr::{DynamicRendering, Swapchain as SwapchainLoader};
use ash::vk;
use std::ffi::CStr;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

use crate::vulkan::resources::handle::HandleRegistry;
use crate::vulkan::{Instance, Queue, VulkanError, VulkanResult};

/// Rank used when choosing between physical devices (lower wins)
///
/// Integrated GPUs are preferred over discrete ones for this engine's target
/// hardware; everything else comes last.
pub fn device_type_rank(device_type: vk::PhysicalDeviceType) -> u8 {
    match device_type {
        vk::PhysicalDeviceType::INTEGRATED_GPU => 0,
        vk::PhysicalDeviceType::DISCRETE_GPU => 1,
        _ => 2,
    }
}

/// Pick the best-ranked device type, keeping enumeration order on ties
pub fn select_device_index(device_types: &[vk::PhysicalDeviceType]) -> Option<usize> {
    device_types
        .iter()
        .enumerate()
        .min_by_key(|(_, ty)| device_type_rank(**ty))
        .map(|(index, _)| index)
}

/// First queue family that supports graphics operations
pub fn find_graphics_family(families: &[vk::QueueFamilyProperties]) -> Option<u32> {
    families
        .iter()
        .position(|family| {
            family.queue_count > 0 && family.queue_flags.contains(vk::QueueFlags::GRAPHICS)
        })
        .and_then(|index| u32::try_from(index).ok())
}

pub(crate) struct DeviceShared {
    pub(crate) device: ash::Device,
    physical_device: vk::PhysicalDevice,
    properties: vk::PhysicalDeviceProperties,
    graphics_family: u32,
    graphics_queue: vk::Queue,
    swapchain_loader: SwapchainLoader,
    dynamic_rendering: Option<DynamicRendering>,
    debug_enabled: bool,
    last_result: AtomicI32,
    registry: HandleRegistry,
    instance: Instance,
}

impl Drop for DeviceShared {
    fn drop(&mut self) {
        if !self.registry.is_empty() {
            log::warn!(
                "Destroying device with {} live handles: {:?}",
                self.registry.len(),
                self.registry.snapshot()
            );
        }
        log::debug!("Destroying logical device");
        unsafe {
            let _ = self.device.device_wait_idle();
            self.device.destroy_device(None);
        }
    }
}

/// Logical device plus the physical device it was created from
///
/// Every resource created from a device keeps a clone of it, so the native
/// device is destroyed only after all of its children are gone.
#[derive(Clone)]
pub struct Device {
    shared: Arc<DeviceShared>,
}

impl Device {
    /// Select a physical device and create the logical device
    ///
    /// Selection prefers integrated over discrete GPUs. The chosen device must
    /// support `VK_KHR_swapchain` and expose a graphics queue family;
    /// otherwise creation fails.
    pub fn new(instance: &Instance) -> VulkanResult<Self> {
        let raw_instance = instance.raw();
        let physical_devices =
            unsafe { raw_instance.enumerate_physical_devices() }.map_err(VulkanError::Api)?;
        if physical_devices.is_empty() {
            return Err(VulkanError::NoPhysicalDevice);
        }

        let properties: Vec<vk::PhysicalDeviceProperties> = physical_devices
            .iter()
            .map(|&pd| unsafe { raw_instance.get_physical_device_properties(pd) })
            .collect();
        let device_types: Vec<_> = properties.iter().map(|p| p.device_type).collect();
        let index = select_device_index(&device_types).ok_or(VulkanError::NoPhysicalDevice)?;

        let physical_device = physical_devices[index];
        let properties = properties[index];
        let device_name = unsafe { CStr::from_ptr(properties.device_name.as_ptr()) }
            .to_string_lossy()
            .into_owned();
        log::info!(
            "Selected GPU: {} ({:?}, {} candidates)",
            device_name,
            properties.device_type,
            physical_devices.len()
        );

        let extensions = unsafe { raw_instance.enumerate_device_extension_properties(physical_device) }
            .map_err(VulkanError::Api)?;
        let has_extension = |name: &CStr| {
            extensions
                .iter()
                .any(|ext| unsafe { CStr::from_ptr(ext.extension_name.as_ptr()) } == name)
        };
        if !has_extension(SwapchainLoader::name()) {
            return Err(VulkanError::MissingSwapchainSupport {
                device: device_name,
            });
        }
        // Dynamic rendering on a 1.1 device also needs its extension dependencies.
        let dynamic_rendering_extensions = [
            DynamicRendering::name(),
            vk::KhrDepthStencilResolveFn::name(),
            vk::KhrCreateRenderpass2Fn::name(),
        ];
        let dynamic_rendering_supported = dynamic_rendering_extensions
            .iter()
            .all(|name| has_extension(name));

        let queue_families =
            unsafe { raw_instance.get_physical_device_queue_family_properties(physical_device) };
        let graphics_family = find_graphics_family(&queue_families).ok_or_else(|| {
            VulkanError::NoGraphicsQueue {
                device: device_name.clone(),
            }
        })?;

        let priorities = [1.0_f32];
        let queue_infos = [vk::DeviceQueueCreateInfo::builder()
            .queue_family_index(graphics_family)
            .queue_priorities(&priorities)
            .build()];

        let mut extension_names = vec![SwapchainLoader::name().as_ptr()];
        if dynamic_rendering_supported {
            extension_names.extend(dynamic_rendering_extensions.iter().map(|name| name.as_ptr()));
        }

        let supported_features = unsafe { raw_instance.get_physical_device_features(physical_device) };
        let features = vk::PhysicalDeviceFeatures::builder()
            .sampler_anisotropy(supported_features.sampler_anisotropy == vk::TRUE)
            .fill_mode_non_solid(supported_features.fill_mode_non_solid == vk::TRUE);

        let mut dynamic_rendering_features =
            vk::PhysicalDeviceDynamicRenderingFeatures::builder().dynamic_rendering(true);
        let mut create_info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(&queue_infos)
            .enabled_extension_names(&extension_names)
            .enabled_features(&features);
        if dynamic_rendering_supported {
            create_info = create_info.push_next(&mut dynamic_rendering_features);
        }

        let device = unsafe { raw_instance.create_device(physical_device, &create_info, None) }
            .map_err(VulkanError::creation("logical device"))?;

        let graphics_queue = unsafe { device.get_device_queue(graphics_family, 0) };
        let swapchain_loader = SwapchainLoader::new(raw_instance, &device);
        let dynamic_rendering =
            dynamic_rendering_supported.then(|| DynamicRendering::new(raw_instance, &device));

        log::debug!(
            "Logical device ready (graphics family {}, dynamic rendering {})",
            graphics_family,
            dynamic_rendering_supported
        );

        Ok(Self {
            shared: Arc::new(DeviceShared {
                device,
                physical_device,
                properties,
                graphics_family,
                graphics_queue,
                swapchain_loader,
                dynamic_rendering,
                debug_enabled: instance.debug_enabled(),
                last_result: AtomicI32::new(vk::Result::SUCCESS.as_raw()),
                registry: HandleRegistry::default(),
                instance: instance.clone(),
            }),
        })
    }

    /// Get the raw `ash` device
    pub fn raw(&self) -> &ash::Device {
        &self.shared.device
    }

    /// Get the instance this device was created from
    pub fn instance(&self) -> &Instance {
        &self.shared.instance
    }

    /// Get the selected physical device
    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.shared.physical_device
    }

    /// Get the physical device properties
    pub fn properties(&self) -> &vk::PhysicalDeviceProperties {
        &self.shared.properties
    }

    /// Get the physical device limits
    pub fn limits(&self) -> &vk::PhysicalDeviceLimits {
        &self.shared.properties.limits
    }

    /// Human readable device name
    pub fn name(&self) -> String {
        unsafe { CStr::from_ptr(self.shared.properties.device_name.as_ptr()) }
            .to_string_lossy()
            .into_owned()
    }

    /// Get the graphics queue family index
    pub fn graphics_queue_family(&self) -> u32 {
        self.shared.graphics_family
    }

    /// Get the graphics queue
    pub fn graphics_queue(&self) -> Queue {
        Queue::new(self, self.shared.graphics_queue, self.shared.graphics_family)
    }

    /// Whether validation-mode checks are active
    pub fn debug_enabled(&self) -> bool {
        self.shared.debug_enabled
    }

    /// Whether `VK_KHR_dynamic_rendering` was enabled
    pub fn supports_dynamic_rendering(&self) -> bool {
        self.shared.dynamic_rendering.is_some()
    }

    pub(crate) fn dynamic_rendering(&self) -> Option<&DynamicRendering> {
        self.shared.dynamic_rendering.as_ref()
    }

    pub(crate) fn swapchain_loader(&self) -> &SwapchainLoader {
        &self.shared.swapchain_loader
    }

    pub(crate) fn registry(&self) -> &HandleRegistry {
        &self.shared.registry
    }

    /// Number of child handles currently alive
    pub fn live_handle_count(&self) -> usize {
        self.shared.registry.len()
    }

    /// Last result code observed from a tracked device operation
    pub fn last_result(&self) -> vk::Result {
        vk::Result::from_raw(self.shared.last_result.load(Ordering::Relaxed))
    }

    /// Record the outcome of a device operation and pass it through
    pub(crate) fn track<T>(&self, result: ash::prelude::VkResult<T>) -> ash::prelude::VkResult<T> {
        let code = match &result {
            Ok(_) => vk::Result::SUCCESS,
            Err(code) => *code,
        };
        self.shared.last_result.store(code.as_raw(), Ordering::Relaxed);
        result
    }

    /// Block until the device has finished all submitted work
    pub fn wait_idle(&self) -> VulkanResult<()> {
        self.track(unsafe { self.shared.device.device_wait_idle() })
            .map_err(VulkanError::Api)
    }
}
