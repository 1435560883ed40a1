//! Vulkan instance bootstrap
//!
//! Loads the driver, validates the presentation extensions the window
//! collaborator needs, optionally enables the Khronos validation layer and
//! routes its messages into `log`.

use ash::extensions::ext::DebugUtils;
use ash::{vk, Entry};
use std::ffi::{CStr, CString};
use std::sync::Arc;

use crate::vulkan::{VulkanError, VulkanResult};

/// Name of the Khronos validation layer enabled in debug mode
pub const VALIDATION_LAYER: &str = "VK_LAYER_KHRONOS_validation";

const ENGINE_NAME: &str = "RenderCore";

/// Debug messenger and the loader used to destroy it
struct DebugMessenger {
    loader: DebugUtils,
    messenger: vk::DebugUtilsMessengerEXT,
}

pub(crate) struct InstanceShared {
    pub(crate) entry: Entry,
    pub(crate) instance: ash::Instance,
    debug_messenger: Option<DebugMessenger>,
    debug_enabled: bool,
}

impl Drop for InstanceShared {
    fn drop(&mut self) {
        log::debug!("Destroying Vulkan instance");
        unsafe {
            if let Some(debug) = self.debug_messenger.take() {
                debug
                    .loader
                    .destroy_debug_utils_messenger(debug.messenger, None);
            }
            self.instance.destroy_instance(None);
        }
    }
}

/// Process-wide connection to the Vulkan driver
///
/// Cloning an `Instance` is cheap and shares the same driver connection. The
/// native instance is destroyed when the last clone (including the ones held
/// by devices and surfaces) is dropped, so it always outlives its children.
#[derive(Clone)]
pub struct Instance {
    shared: Arc<InstanceShared>,
}

impl Instance {
    /// Load the system Vulkan loader and create an instance
    ///
    /// `required_extensions` is usually supplied by the window collaborator
    /// (`VK_KHR_surface` plus the platform surface extension).
    pub fn new(
        app_name: &str,
        debug_enabled: bool,
        required_extensions: &[CString],
    ) -> VulkanResult<Self> {
        let entry = unsafe { Entry::load() }
            .map_err(|e| VulkanError::Loading(format!("{e:?}")))?;
        Self::with_entry(entry, app_name, debug_enabled, required_extensions)
    }

    /// Create an instance through an already loaded entry point table
    pub fn with_entry(
        entry: Entry,
        app_name: &str,
        debug_enabled: bool,
        required_extensions: &[CString],
    ) -> VulkanResult<Self> {
        let available_extensions = entry
            .enumerate_instance_extension_properties(None)
            .map_err(VulkanError::Api)?;
        let available: Vec<&CStr> = available_extensions
            .iter()
            .map(|ext| unsafe { CStr::from_ptr(ext.extension_name.as_ptr()) })
            .collect();

        let mut extensions: Vec<CString> = required_extensions.to_vec();
        if debug_enabled {
            extensions.push(DebugUtils::name().to_owned());
        }
        for required in &extensions {
            if !available.contains(&required.as_c_str()) {
                return Err(VulkanError::MissingExtension(
                    required.to_string_lossy().into_owned(),
                ));
            }
        }

        let layer_names = if debug_enabled {
            let layers = entry
                .enumerate_instance_layer_properties()
                .map_err(VulkanError::Api)?;
            let has_validation = layers.iter().any(|layer| {
                let name = unsafe { CStr::from_ptr(layer.layer_name.as_ptr()) };
                name.to_bytes() == VALIDATION_LAYER.as_bytes()
            });
            if !has_validation {
                return Err(VulkanError::MissingLayer(VALIDATION_LAYER.to_string()));
            }
            vec![to_cstring(VALIDATION_LAYER)?]
        } else {
            Vec::new()
        };

        let app_name_cstr = to_cstring(app_name)?;
        let engine_name_cstr = to_cstring(ENGINE_NAME)?;
        let app_info = vk::ApplicationInfo::builder()
            .application_name(&app_name_cstr)
            .application_version(vk::make_api_version(0, 1, 0, 0))
            .engine_name(&engine_name_cstr)
            .engine_version(vk::make_api_version(0, 1, 0, 0))
            .api_version(vk::API_VERSION_1_1);

        let extension_ptrs: Vec<*const std::os::raw::c_char> =
            extensions.iter().map(|ext| ext.as_ptr()).collect();
        let layer_ptrs: Vec<*const std::os::raw::c_char> =
            layer_names.iter().map(|name| name.as_ptr()).collect();

        let create_info = vk::InstanceCreateInfo::builder()
            .application_info(&app_info)
            .enabled_extension_names(&extension_ptrs)
            .enabled_layer_names(&layer_ptrs);

        let instance = unsafe { entry.create_instance(&create_info, None) }
            .map_err(VulkanError::creation("instance"))?;

        let mut shared = InstanceShared {
            entry,
            instance,
            debug_messenger: None,
            debug_enabled,
        };

        if debug_enabled {
            // `shared` already owns the instance, so a failure here still
            // destroys it on the way out.
            let loader = DebugUtils::new(&shared.entry, &shared.instance);
            let messenger = setup_debug_messenger(&loader)?;
            shared.debug_messenger = Some(DebugMessenger { loader, messenger });
        }

        log::info!(
            "Created Vulkan instance for '{}' ({} extensions, validation {})",
            app_name,
            extensions.len(),
            if debug_enabled { "on" } else { "off" }
        );

        Ok(Self {
            shared: Arc::new(shared),
        })
    }

    /// Get a reference to the Vulkan entry
    pub fn entry(&self) -> &Entry {
        &self.shared.entry
    }

    /// Get a reference to the Vulkan instance
    pub fn raw(&self) -> &ash::Instance {
        &self.shared.instance
    }

    /// Whether validation and the debug messenger are enabled
    pub fn debug_enabled(&self) -> bool {
        self.shared.debug_enabled
    }

    /// Whether a debug messenger is installed
    pub fn has_debug_messenger(&self) -> bool {
        self.shared.debug_messenger.is_some()
    }
}

fn to_cstring(value: &str) -> VulkanResult<CString> {
    CString::new(value).map_err(|_| VulkanError::InvalidOperation {
        reason: format!("string contains an interior nul byte: {value:?}"),
    })
}

fn setup_debug_messenger(loader: &DebugUtils) -> VulkanResult<vk::DebugUtilsMessengerEXT> {
    let create_info = vk::DebugUtilsMessengerCreateInfoEXT::builder()
        .message_severity(
            vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
                | vk::DebugUtilsMessageSeverityFlagsEXT::INFO
                | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
        )
        .message_type(
            vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
        )
        .pfn_user_callback(Some(debug_callback));

    unsafe { loader.create_debug_utils_messenger(&create_info, None) }
        .map_err(VulkanError::creation("debug messenger"))
}

/// Debug callback for validation layers
unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    if callback_data.is_null() || (*callback_data).p_message.is_null() {
        return vk::FALSE;
    }
    let message = CStr::from_ptr((*callback_data).p_message).to_string_lossy();

    if message_severity >= vk::DebugUtilsMessageSeverityFlagsEXT::ERROR {
        log::error!("[Vulkan] {:?} - {}", message_type, message);
    } else if message_severity >= vk::DebugUtilsMessageSeverityFlagsEXT::WARNING {
        log::warn!("[Vulkan] {:?} - {}", message_type, message);
    } else if message_severity >= vk::DebugUtilsMessageSeverityFlagsEXT::INFO {
        log::info!("[Vulkan] {:?} - {}", message_type, message);
    } else {
        log::trace!("[Vulkan] {:?} - {}", message_type, message);
    }

    vk::FALSE
}
