//! In-process stand-in for the Vulkan driver
//!
//! Every entry point the crate loads through `ash` resolves to a function in
//! this module. Calls are recorded by name, object lifetimes are tracked in a
//! per-thread table, and misuse the real driver would not catch (double
//! destroys, parents destroyed before their children, submits with a
//! signaled fence) is collected as violations. The test harness runs each
//! test on its own thread, so every test sees a fresh driver.

use ash::vk::{self, Handle};
use ash::Entry;
use std::cell::RefCell;
use std::collections::{HashMap, HashSet, VecDeque};
use std::ffi::{c_void, CStr, CString};
use std::os::raw::c_char;

use crate::vulkan::initialization::window::WindowTarget;
use crate::vulkan::{Device, Instance, VulkanError, VulkanResult};

const PHYSICAL_DEVICE_BASE: u64 = 0x10_0000;
const QUEUE_BASE: u64 = 0x20_0000;

const INSTANCE_EXTENSIONS: [&str; 3] = [
    "VK_KHR_surface",
    "VK_EXT_headless_surface",
    "VK_EXT_debug_utils",
];

/// A physical device the mock driver enumerates
#[derive(Debug, Clone)]
pub struct MockPhysicalDevice {
    pub name: String,
    pub device_type: vk::PhysicalDeviceType,
    pub extensions: Vec<String>,
    pub queue_families: Vec<vk::QueueFlags>,
}

impl MockPhysicalDevice {
    /// Swapchain-capable device with one universal queue family
    pub fn named(name: &str, device_type: vk::PhysicalDeviceType) -> Self {
        Self {
            name: name.to_string(),
            device_type,
            extensions: vec!["VK_KHR_swapchain".to_string()],
            queue_families: vec![
                vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER,
            ],
        }
    }

    /// Also expose `VK_KHR_dynamic_rendering` and its dependencies
    pub fn with_dynamic_rendering(mut self) -> Self {
        self.extensions.extend(
            [
                "VK_KHR_dynamic_rendering",
                "VK_KHR_depth_stencil_resolve",
                "VK_KHR_create_renderpass2",
            ]
            .map(String::from),
        );
        self
    }
}

/// What the mock driver reports
#[derive(Debug, Clone)]
pub struct MockConfig {
    pub physical_devices: Vec<MockPhysicalDevice>,
    pub validation_layer: bool,
    pub surface_formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
    pub present_support: bool,
    pub surface_capabilities: vk::SurfaceCapabilitiesKHR,
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            physical_devices: vec![MockPhysicalDevice::named(
                "Mock GPU",
                vk::PhysicalDeviceType::INTEGRATED_GPU,
            )],
            validation_layer: true,
            surface_formats: vec![vk::SurfaceFormatKHR {
                format: vk::Format::B8G8R8A8_SRGB,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            }],
            present_modes: vec![vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX],
            present_support: true,
            surface_capabilities: vk::SurfaceCapabilitiesKHR {
                min_image_count: 2,
                max_image_count: 3,
                current_extent: vk::Extent2D {
                    width: u32::MAX,
                    height: u32::MAX,
                },
                min_image_extent: vk::Extent2D {
                    width: 10,
                    height: 10,
                },
                max_image_extent: vk::Extent2D {
                    width: 4096,
                    height: 4096,
                },
                max_image_array_layers: 1,
                supported_transforms: vk::SurfaceTransformFlagsKHR::IDENTITY,
                current_transform: vk::SurfaceTransformFlagsKHR::IDENTITY,
                supported_composite_alpha: vk::CompositeAlphaFlagsKHR::OPAQUE,
                supported_usage_flags: vk::ImageUsageFlags::COLOR_ATTACHMENT
                    | vk::ImageUsageFlags::TRANSFER_DST,
            },
        }
    }
}

struct Object {
    kind: &'static str,
    parent: u64,
}

struct SwapchainRecord {
    surface: u64,
    images: Vec<u64>,
    next_image: usize,
    retired: bool,
}

struct MockState {
    config: MockConfig,
    next_handle: u64,
    instance: u64,
    objects: HashMap<u64, Object>,
    calls: Vec<&'static str>,
    violations: Vec<String>,
    failures: HashMap<&'static str, (u32, vk::Result)>,
    acquire_script: VecDeque<vk::Result>,
    present_script: VecDeque<vk::Result>,
    fences: HashMap<u64, bool>,
    signaled_semaphores: HashSet<u64>,
    events: HashMap<u64, bool>,
    descriptor_pools: HashMap<u64, (u32, vk::DescriptorPoolCreateFlags)>,
    swapchains: HashMap<u64, SwapchainRecord>,
    image_views: HashMap<u64, u64>,
    pipeline_caches: HashMap<u64, Vec<u8>>,
    last_old_swapchain: vk::SwapchainKHR,
    last_pipeline_stage_count: u32,
    last_pipeline_cache: vk::PipelineCache,
    last_descriptor_write_count: u32,
}

impl MockState {
    fn new(config: MockConfig) -> Self {
        Self {
            config,
            next_handle: 0x1000,
            instance: 0,
            objects: HashMap::new(),
            calls: Vec::new(),
            violations: Vec::new(),
            failures: HashMap::new(),
            acquire_script: VecDeque::new(),
            present_script: VecDeque::new(),
            fences: HashMap::new(),
            signaled_semaphores: HashSet::new(),
            events: HashMap::new(),
            descriptor_pools: HashMap::new(),
            swapchains: HashMap::new(),
            image_views: HashMap::new(),
            pipeline_caches: HashMap::new(),
            last_old_swapchain: vk::SwapchainKHR::null(),
            last_pipeline_stage_count: 0,
            last_pipeline_cache: vk::PipelineCache::null(),
            last_descriptor_write_count: 0,
        }
    }

    /// Record a call and return the injected failure for it, if any
    fn enter(&mut self, name: &'static str) -> Option<vk::Result> {
        self.calls.push(name);
        let failure = match self.failures.get_mut(name) {
            Some((remaining, _)) if *remaining > 0 => {
                *remaining -= 1;
                None
            }
            Some((_, result)) => Some(*result),
            None => None,
        };
        if failure.is_some() {
            self.failures.remove(name);
        }
        failure
    }

    fn violation(&mut self, message: String) {
        log::error!("[mock driver] {}", message);
        self.violations.push(message);
    }

    fn fresh_handle(&mut self) -> u64 {
        let handle = self.next_handle;
        self.next_handle += 1;
        handle
    }

    fn alloc(&mut self, kind: &'static str, parent: u64) -> u64 {
        let handle = self.fresh_handle();
        self.objects.insert(handle, Object { kind, parent });
        handle
    }

    fn is_live(&self, kind: &'static str, handle: u64) -> bool {
        self.objects
            .get(&handle)
            .map_or(false, |object| object.kind == kind)
    }

    fn require_live(&mut self, kind: &'static str, handle: u64, during: &str) {
        if !self.is_live(kind, handle) {
            self.violation(format!("{during} used {kind} {handle:#x}, which is not alive"));
        }
    }

    fn live_children(&self, parent: u64) -> Vec<&'static str> {
        let mut kinds: Vec<_> = self
            .objects
            .values()
            .filter(|object| object.parent == parent)
            .map(|object| object.kind)
            .collect();
        kinds.sort_unstable();
        kinds
    }

    fn release(&mut self, kind: &'static str, handle: u64) {
        // Destroying VK_NULL_HANDLE is a no-op.
        if handle == 0 {
            return;
        }
        match self.objects.remove(&handle) {
            Some(object) if object.kind == kind => {}
            Some(object) => {
                let actual = object.kind;
                self.objects.insert(handle, object);
                self.violation(format!("destroying {actual} {handle:#x} as a {kind}"));
                return;
            }
            None => {
                self.violation(format!("{kind} {handle:#x} destroyed twice or never created"));
                return;
            }
        }

        self.fences.remove(&handle);
        self.signaled_semaphores.remove(&handle);
        self.events.remove(&handle);
        self.image_views.remove(&handle);
        self.pipeline_caches.remove(&handle);
        if self.descriptor_pools.remove(&handle).is_some() || kind == "command_pool" {
            // Pool children are freed implicitly with the pool.
            self.objects.retain(|_, object| object.parent != handle);
        }
    }

    fn physical_device(&self, raw: vk::PhysicalDevice) -> Option<&MockPhysicalDevice> {
        let index = raw.as_raw().checked_sub(PHYSICAL_DEVICE_BASE)?;
        self.config
            .physical_devices
            .get(usize::try_from(index).ok()?)
    }
}

thread_local! {
    static STATE: RefCell<Option<MockState>> = RefCell::new(None);
}

fn with_state<R>(f: impl FnOnce(&mut MockState) -> R) -> R {
    STATE.with(|cell| {
        let mut slot = cell.borrow_mut();
        f(slot.get_or_insert_with(|| MockState::new(MockConfig::default())))
    })
}

fn record(name: &'static str) {
    with_state(|state| state.calls.push(name));
}

// ---------------------------------------------------------------------------
// Test-facing API
// ---------------------------------------------------------------------------

/// Reset the driver for this thread with the given configuration
pub fn install(config: MockConfig) {
    let _ = env_logger::builder().is_test(true).try_init();
    STATE.with(|cell| *cell.borrow_mut() = Some(MockState::new(config)));
}

/// Entry point table backed by the mock driver
pub fn entry() -> Entry {
    let static_fn = vk::StaticFn {
        get_instance_proc_addr,
    };
    unsafe { Entry::from_static_fn(static_fn) }
}

/// Instance extensions a [`MockWindow`] needs
pub fn surface_extensions() -> Vec<CString> {
    ["VK_KHR_surface", "VK_EXT_headless_surface"]
        .iter()
        .map(|name| CString::new(*name).expect("extension name"))
        .collect()
}

fn open_device(debug: bool) -> Device {
    let instance = Instance::with_entry(entry(), "mock", debug, &surface_extensions())
        .expect("mock instance");
    Device::new(&instance).expect("mock device")
}

/// Instance and device over the currently installed configuration
pub fn bootstrap_device() -> Device {
    open_device(false)
}

/// Fresh driver with default configuration and a release-mode device
pub fn device() -> Device {
    install(MockConfig::default());
    open_device(false)
}

/// Fresh driver with default configuration and a validation-mode device
pub fn debug_device() -> Device {
    install(MockConfig::default());
    open_device(true)
}

/// Fresh driver whose device has dynamic rendering enabled
pub fn dynamic_rendering_device() -> Device {
    install(MockConfig {
        physical_devices: vec![MockPhysicalDevice::named(
            "Mock GPU",
            vk::PhysicalDeviceType::INTEGRATED_GPU,
        )
        .with_dynamic_rendering()],
        ..MockConfig::default()
    });
    open_device(false)
}

/// Number of live objects of `kind` (e.g. `"fence"`, `"swapchain"`)
pub fn live_count(kind: &str) -> usize {
    with_state(|state| {
        state
            .objects
            .values()
            .filter(|object| object.kind == kind)
            .count()
    })
}

/// Number of calls to the named entry point since install
pub fn call_count(name: &str) -> usize {
    with_state(|state| state.calls.iter().filter(|call| **call == name).count())
}

/// Every entry point called since install, in order
pub fn calls() -> Vec<&'static str> {
    with_state(|state| state.calls.clone())
}

/// Misuse detected since install
pub fn violations() -> Vec<String> {
    with_state(|state| state.violations.clone())
}

/// Capabilities reported for every surface
pub fn surface_capabilities() -> vk::SurfaceCapabilitiesKHR {
    with_state(|state| state.config.surface_capabilities)
}

/// `oldSwapchain` passed to the most recent swapchain creation
pub fn last_old_swapchain() -> vk::SwapchainKHR {
    with_state(|state| state.last_old_swapchain)
}

/// Stage count of the most recent pipeline creation
pub fn last_pipeline_stage_count() -> u32 {
    with_state(|state| state.last_pipeline_stage_count)
}

/// Cache passed to the most recent pipeline creation
pub fn last_pipeline_cache() -> vk::PipelineCache {
    with_state(|state| state.last_pipeline_cache)
}

/// Write count of the most recent descriptor update
pub fn last_descriptor_write_count() -> u32 {
    with_state(|state| state.last_descriptor_write_count)
}

/// Fail the next call to `name` with `result`
pub fn fail_next(name: &'static str, result: vk::Result) {
    fail_after(name, 0, result);
}

/// Let `successes` calls to `name` through, then fail the next one
pub fn fail_after(name: &'static str, successes: u32, result: vk::Result) {
    with_state(|state| {
        state.failures.insert(name, (successes, result));
    });
}

/// Result for the next image acquire
pub fn script_acquire(result: vk::Result) {
    with_state(|state| state.acquire_script.push_back(result));
}

/// Result for the next present
pub fn script_present(result: vk::Result) {
    with_state(|state| state.present_script.push_back(result));
}

pub(crate) fn register_object(kind: &'static str, parent: u64) -> u64 {
    with_state(|state| state.alloc(kind, parent))
}

pub(crate) fn release_object(kind: &'static str, handle: u64) {
    with_state(|state| state.release(kind, handle));
}

/// Headless window presenting through `VK_EXT_headless_surface`
pub struct MockWindow {
    extent: vk::Extent2D,
}

impl MockWindow {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            extent: vk::Extent2D { width, height },
        }
    }
}

impl WindowTarget for MockWindow {
    fn required_extensions(&self) -> VulkanResult<Vec<CString>> {
        Ok(surface_extensions())
    }

    fn create_surface(&self, _entry: &Entry, instance: &ash::Instance) -> VulkanResult<vk::SurfaceKHR> {
        with_state(|state| match state.enter("vkCreateHeadlessSurfaceEXT") {
            Some(result) => Err(VulkanError::Creation {
                what: "surface",
                result,
            }),
            None => {
                let parent = instance.handle().as_raw();
                Ok(vk::SurfaceKHR::from_raw(state.alloc("surface", parent)))
            }
        })
    }

    fn framebuffer_extent(&self) -> vk::Extent2D {
        self.extent
    }
}

// ---------------------------------------------------------------------------
// Helpers shared by the entry points
// ---------------------------------------------------------------------------

fn fixed_name<const N: usize>(name: &str) -> [c_char; N] {
    let mut out = [0 as c_char; N];
    for (dst, byte) in out.iter_mut().zip(name.bytes().take(N - 1)) {
        *dst = byte as c_char;
    }
    out
}

unsafe fn name_list(count: u32, names: *const *const c_char) -> Vec<String> {
    if names.is_null() {
        return Vec::new();
    }
    std::slice::from_raw_parts(names, count as usize)
        .iter()
        .map(|&name| CStr::from_ptr(name).to_string_lossy().into_owned())
        .collect()
}

unsafe fn slice<'a, T>(ptr: *const T, count: u32) -> &'a [T] {
    if ptr.is_null() || count == 0 {
        &[]
    } else {
        std::slice::from_raw_parts(ptr, count as usize)
    }
}

/// Two-call enumeration: report the count, then copy what fits
unsafe fn enumerate<T: Copy>(items: &[T], count: *mut u32, out: *mut T) -> vk::Result {
    let available = items.len() as u32;
    if out.is_null() {
        *count = available;
        return vk::Result::SUCCESS;
    }
    let written = (*count).min(available);
    std::ptr::copy_nonoverlapping(items.as_ptr(), out, written as usize);
    *count = written;
    if written < available {
        vk::Result::INCOMPLETE
    } else {
        vk::Result::SUCCESS
    }
}

unsafe fn create_child<H: Handle>(
    name: &'static str,
    kind: &'static str,
    parent: u64,
    out: *mut H,
) -> vk::Result {
    with_state(|state| match state.enter(name) {
        Some(result) => result,
        None => {
            *out = H::from_raw(state.alloc(kind, parent));
            vk::Result::SUCCESS
        }
    })
}

fn destroy_child(name: &'static str, kind: &'static str, handle: u64) {
    with_state(|state| {
        state.calls.push(name);
        state.release(kind, handle);
    });
}

fn simple_result(name: &'static str) -> vk::Result {
    with_state(|state| state.enter(name).unwrap_or(vk::Result::SUCCESS))
}

// ---------------------------------------------------------------------------
// Loader and instance
// ---------------------------------------------------------------------------

unsafe extern "system" fn get_instance_proc_addr(
    _instance: vk::Instance,
    name: *const c_char,
) -> vk::PFN_vkVoidFunction {
    lookup(CStr::from_ptr(name))
}

unsafe extern "system" fn get_device_proc_addr(
    _device: vk::Device,
    name: *const c_char,
) -> vk::PFN_vkVoidFunction {
    lookup(CStr::from_ptr(name))
}

unsafe extern "system" fn enumerate_instance_extension_properties(
    _layer_name: *const c_char,
    count: *mut u32,
    properties: *mut vk::ExtensionProperties,
) -> vk::Result {
    record("vkEnumerateInstanceExtensionProperties");
    let available: Vec<_> = INSTANCE_EXTENSIONS
        .iter()
        .map(|name| vk::ExtensionProperties {
            extension_name: fixed_name(name),
            spec_version: 1,
        })
        .collect();
    enumerate(&available, count, properties)
}

unsafe extern "system" fn enumerate_instance_layer_properties(
    count: *mut u32,
    properties: *mut vk::LayerProperties,
) -> vk::Result {
    record("vkEnumerateInstanceLayerProperties");
    let layers = if with_state(|state| state.config.validation_layer) {
        vec![vk::LayerProperties {
            layer_name: fixed_name("VK_LAYER_KHRONOS_validation"),
            spec_version: vk::API_VERSION_1_1,
            implementation_version: 1,
            description: fixed_name("Mock validation layer"),
        }]
    } else {
        Vec::new()
    };
    enumerate(&layers, count, properties)
}

unsafe extern "system" fn create_instance(
    create_info: *const vk::InstanceCreateInfo,
    _allocator: *const vk::AllocationCallbacks,
    instance: *mut vk::Instance,
) -> vk::Result {
    let info = &*create_info;
    let extensions = name_list(info.enabled_extension_count, info.pp_enabled_extension_names);
    let layers = name_list(info.enabled_layer_count, info.pp_enabled_layer_names);
    with_state(|state| {
        if let Some(result) = state.enter("vkCreateInstance") {
            return result;
        }
        if extensions
            .iter()
            .any(|ext| !INSTANCE_EXTENSIONS.contains(&ext.as_str()))
        {
            return vk::Result::ERROR_EXTENSION_NOT_PRESENT;
        }
        if !layers.is_empty() && !state.config.validation_layer {
            return vk::Result::ERROR_LAYER_NOT_PRESENT;
        }
        let handle = state.alloc("instance", 0);
        state.instance = handle;
        *instance = vk::Instance::from_raw(handle);
        vk::Result::SUCCESS
    })
}

unsafe extern "system" fn destroy_instance(
    instance: vk::Instance,
    _allocator: *const vk::AllocationCallbacks,
) {
    with_state(|state| {
        state.calls.push("vkDestroyInstance");
        let children = state.live_children(instance.as_raw());
        if !children.is_empty() {
            state.violation(format!("instance destroyed with live children: {children:?}"));
        }
        state.release("instance", instance.as_raw());
    });
}

unsafe extern "system" fn create_debug_utils_messenger(
    instance: vk::Instance,
    _create_info: *const vk::DebugUtilsMessengerCreateInfoEXT,
    _allocator: *const vk::AllocationCallbacks,
    messenger: *mut vk::DebugUtilsMessengerEXT,
) -> vk::Result {
    create_child(
        "vkCreateDebugUtilsMessengerEXT",
        "debug_messenger",
        instance.as_raw(),
        messenger,
    )
}

unsafe extern "system" fn destroy_debug_utils_messenger(
    _instance: vk::Instance,
    messenger: vk::DebugUtilsMessengerEXT,
    _allocator: *const vk::AllocationCallbacks,
) {
    destroy_child(
        "vkDestroyDebugUtilsMessengerEXT",
        "debug_messenger",
        messenger.as_raw(),
    );
}

unsafe extern "system" fn enumerate_physical_devices(
    _instance: vk::Instance,
    count: *mut u32,
    devices: *mut vk::PhysicalDevice,
) -> vk::Result {
    record("vkEnumeratePhysicalDevices");
    let handles: Vec<_> = with_state(|state| {
        (0..state.config.physical_devices.len() as u64)
            .map(|index| vk::PhysicalDevice::from_raw(PHYSICAL_DEVICE_BASE + index))
            .collect()
    });
    enumerate(&handles, count, devices)
}

unsafe extern "system" fn get_physical_device_properties(
    physical_device: vk::PhysicalDevice,
    properties: *mut vk::PhysicalDeviceProperties,
) {
    with_state(|state| {
        state.calls.push("vkGetPhysicalDeviceProperties");
        let mut props = vk::PhysicalDeviceProperties {
            api_version: vk::API_VERSION_1_1,
            vendor_id: 0x1234,
            ..Default::default()
        };
        props.limits.max_push_constants_size = 128;
        props.limits.max_bound_descriptor_sets = 4;
        props.limits.max_viewports = 1;
        if let Some(gpu) = state.physical_device(physical_device) {
            props.device_type = gpu.device_type;
            props.device_name = fixed_name(&gpu.name);
        }
        *properties = props;
    });
}

unsafe extern "system" fn get_physical_device_features(
    _physical_device: vk::PhysicalDevice,
    features: *mut vk::PhysicalDeviceFeatures,
) {
    record("vkGetPhysicalDeviceFeatures");
    *features = vk::PhysicalDeviceFeatures {
        sampler_anisotropy: vk::TRUE,
        fill_mode_non_solid: vk::TRUE,
        ..Default::default()
    };
}

unsafe extern "system" fn get_physical_device_queue_family_properties(
    physical_device: vk::PhysicalDevice,
    count: *mut u32,
    properties: *mut vk::QueueFamilyProperties,
) {
    record("vkGetPhysicalDeviceQueueFamilyProperties");
    let families: Vec<_> = with_state(|state| {
        state
            .physical_device(physical_device)
            .map(|gpu| {
                gpu.queue_families
                    .iter()
                    .map(|&queue_flags| vk::QueueFamilyProperties {
                        queue_flags,
                        queue_count: 1,
                        ..Default::default()
                    })
                    .collect()
            })
            .unwrap_or_default()
    });
    enumerate(&families, count, properties);
}

unsafe extern "system" fn enumerate_device_extension_properties(
    physical_device: vk::PhysicalDevice,
    _layer_name: *const c_char,
    count: *mut u32,
    properties: *mut vk::ExtensionProperties,
) -> vk::Result {
    record("vkEnumerateDeviceExtensionProperties");
    let extensions: Vec<_> = with_state(|state| {
        state
            .physical_device(physical_device)
            .map(|gpu| {
                gpu.extensions
                    .iter()
                    .map(|name| vk::ExtensionProperties {
                        extension_name: fixed_name(name),
                        spec_version: 1,
                    })
                    .collect()
            })
            .unwrap_or_default()
    });
    enumerate(&extensions, count, properties)
}

unsafe extern "system" fn create_device(
    physical_device: vk::PhysicalDevice,
    create_info: *const vk::DeviceCreateInfo,
    _allocator: *const vk::AllocationCallbacks,
    device: *mut vk::Device,
) -> vk::Result {
    let info = &*create_info;
    let requested = name_list(info.enabled_extension_count, info.pp_enabled_extension_names);
    with_state(|state| {
        if let Some(result) = state.enter("vkCreateDevice") {
            return result;
        }
        let supported = state
            .physical_device(physical_device)
            .map(|gpu| requested.iter().all(|ext| gpu.extensions.contains(ext)));
        match supported {
            Some(true) => {
                let parent = state.instance;
                *device = vk::Device::from_raw(state.alloc("device", parent));
                vk::Result::SUCCESS
            }
            Some(false) => vk::Result::ERROR_EXTENSION_NOT_PRESENT,
            None => vk::Result::ERROR_INITIALIZATION_FAILED,
        }
    })
}

unsafe extern "system" fn destroy_device(
    device: vk::Device,
    _allocator: *const vk::AllocationCallbacks,
) {
    with_state(|state| {
        state.calls.push("vkDestroyDevice");
        let children = state.live_children(device.as_raw());
        if !children.is_empty() {
            state.violation(format!("device destroyed with live children: {children:?}"));
        }
        state.release("device", device.as_raw());
    });
}

unsafe extern "system" fn get_device_queue(
    _device: vk::Device,
    family: u32,
    _index: u32,
    queue: *mut vk::Queue,
) {
    record("vkGetDeviceQueue");
    *queue = vk::Queue::from_raw(QUEUE_BASE + u64::from(family));
}

unsafe extern "system" fn device_wait_idle(_device: vk::Device) -> vk::Result {
    simple_result("vkDeviceWaitIdle")
}

// ---------------------------------------------------------------------------
// Surface and swapchain
// ---------------------------------------------------------------------------

unsafe extern "system" fn destroy_surface(
    _instance: vk::Instance,
    surface: vk::SurfaceKHR,
    _allocator: *const vk::AllocationCallbacks,
) {
    with_state(|state| {
        state.calls.push("vkDestroySurfaceKHR");
        let raw = surface.as_raw();
        if state.swapchains.values().any(|sc| sc.surface == raw) {
            state.violation(format!("surface {raw:#x} destroyed while a swapchain uses it"));
        }
        state.release("surface", raw);
    });
}

unsafe extern "system" fn get_surface_support(
    _physical_device: vk::PhysicalDevice,
    _family: u32,
    surface: vk::SurfaceKHR,
    supported: *mut vk::Bool32,
) -> vk::Result {
    with_state(|state| {
        if let Some(result) = state.enter("vkGetPhysicalDeviceSurfaceSupportKHR") {
            return result;
        }
        state.require_live("surface", surface.as_raw(), "surface support query");
        *supported = if state.config.present_support {
            vk::TRUE
        } else {
            vk::FALSE
        };
        vk::Result::SUCCESS
    })
}

unsafe extern "system" fn get_surface_capabilities(
    _physical_device: vk::PhysicalDevice,
    surface: vk::SurfaceKHR,
    capabilities: *mut vk::SurfaceCapabilitiesKHR,
) -> vk::Result {
    with_state(|state| {
        if let Some(result) = state.enter("vkGetPhysicalDeviceSurfaceCapabilitiesKHR") {
            return result;
        }
        state.require_live("surface", surface.as_raw(), "capability query");
        *capabilities = state.config.surface_capabilities;
        vk::Result::SUCCESS
    })
}

unsafe extern "system" fn get_surface_formats(
    _physical_device: vk::PhysicalDevice,
    _surface: vk::SurfaceKHR,
    count: *mut u32,
    formats: *mut vk::SurfaceFormatKHR,
) -> vk::Result {
    let available = with_state(|state| {
        state.calls.push("vkGetPhysicalDeviceSurfaceFormatsKHR");
        state.config.surface_formats.clone()
    });
    enumerate(&available, count, formats)
}

unsafe extern "system" fn get_surface_present_modes(
    _physical_device: vk::PhysicalDevice,
    _surface: vk::SurfaceKHR,
    count: *mut u32,
    modes: *mut vk::PresentModeKHR,
) -> vk::Result {
    let available = with_state(|state| {
        state.calls.push("vkGetPhysicalDeviceSurfacePresentModesKHR");
        state.config.present_modes.clone()
    });
    enumerate(&available, count, modes)
}

unsafe extern "system" fn create_swapchain(
    device: vk::Device,
    create_info: *const vk::SwapchainCreateInfoKHR,
    _allocator: *const vk::AllocationCallbacks,
    swapchain: *mut vk::SwapchainKHR,
) -> vk::Result {
    let info = &*create_info;
    with_state(|state| {
        let failure = state.enter("vkCreateSwapchainKHR");
        state.last_old_swapchain = info.old_swapchain;
        if info.old_swapchain != vk::SwapchainKHR::null() {
            let old = info.old_swapchain.as_raw();
            state.require_live("swapchain", old, "swapchain recreation");
            // oldSwapchain is retired whether or not creation succeeds.
            let already_retired = state.swapchains.get(&old).map_or(false, |r| r.retired);
            if already_retired {
                state.violation(format!("retired swapchain {old:#x} passed as oldSwapchain"));
            }
            if let Some(record) = state.swapchains.get_mut(&old) {
                record.retired = true;
            }
        }
        if let Some(result) = failure {
            return result;
        }
        state.require_live("surface", info.surface.as_raw(), "swapchain creation");

        let handle = state.alloc("swapchain", device.as_raw());
        let images = (0..info.min_image_count)
            .map(|_| state.fresh_handle())
            .collect();
        state.swapchains.insert(
            handle,
            SwapchainRecord {
                surface: info.surface.as_raw(),
                images,
                next_image: 0,
                retired: false,
            },
        );
        *swapchain = vk::SwapchainKHR::from_raw(handle);
        vk::Result::SUCCESS
    })
}

unsafe extern "system" fn destroy_swapchain(
    _device: vk::Device,
    swapchain: vk::SwapchainKHR,
    _allocator: *const vk::AllocationCallbacks,
) {
    with_state(|state| {
        state.calls.push("vkDestroySwapchainKHR");
        let raw = swapchain.as_raw();
        if let Some(record) = state.swapchains.remove(&raw) {
            let views_left = state
                .image_views
                .values()
                .filter(|image| record.images.contains(image))
                .count();
            if views_left > 0 {
                state.violation(format!(
                    "swapchain {raw:#x} destroyed with {views_left} views over its images"
                ));
            }
        }
        state.release("swapchain", raw);
    });
}

unsafe extern "system" fn get_swapchain_images(
    _device: vk::Device,
    swapchain: vk::SwapchainKHR,
    count: *mut u32,
    images: *mut vk::Image,
) -> vk::Result {
    let handles: Vec<_> = with_state(|state| {
        state.calls.push("vkGetSwapchainImagesKHR");
        state
            .swapchains
            .get(&swapchain.as_raw())
            .map(|record| record.images.iter().map(|&raw| vk::Image::from_raw(raw)).collect())
            .unwrap_or_default()
    });
    enumerate(&handles, count, images)
}

unsafe extern "system" fn acquire_next_image(
    _device: vk::Device,
    swapchain: vk::SwapchainKHR,
    _timeout: u64,
    semaphore: vk::Semaphore,
    fence: vk::Fence,
    image_index: *mut u32,
) -> vk::Result {
    with_state(|state| {
        if let Some(result) = state.enter("vkAcquireNextImageKHR") {
            return result;
        }
        state.require_live("swapchain", swapchain.as_raw(), "acquire");
        if semaphore != vk::Semaphore::null() {
            state.require_live("semaphore", semaphore.as_raw(), "acquire");
        }
        let retired = state
            .swapchains
            .get(&swapchain.as_raw())
            .map_or(false, |record| record.retired);
        if retired {
            return vk::Result::ERROR_OUT_OF_DATE_KHR;
        }
        let result = state
            .acquire_script
            .pop_front()
            .unwrap_or(vk::Result::SUCCESS);
        if result != vk::Result::SUCCESS && result != vk::Result::SUBOPTIMAL_KHR {
            return result;
        }

        let Some(record) = state.swapchains.get_mut(&swapchain.as_raw()) else {
            return vk::Result::ERROR_OUT_OF_DATE_KHR;
        };
        let count = record.images.len().max(1);
        *image_index = (record.next_image % count) as u32;
        record.next_image += 1;
        if semaphore != vk::Semaphore::null()
            && !state.signaled_semaphores.insert(semaphore.as_raw())
        {
            state.violation(format!(
                "acquire signals semaphore {:#x}, which is already signaled",
                semaphore.as_raw()
            ));
        }
        if fence != vk::Fence::null() {
            state.fences.insert(fence.as_raw(), true);
        }
        result
    })
}

unsafe extern "system" fn queue_present(
    _queue: vk::Queue,
    present_info: *const vk::PresentInfoKHR,
) -> vk::Result {
    let info = &*present_info;
    let swapchains = slice(info.p_swapchains, info.swapchain_count).to_vec();
    let waits = slice(info.p_wait_semaphores, info.wait_semaphore_count).to_vec();
    with_state(|state| {
        if let Some(result) = state.enter("vkQueuePresentKHR") {
            return result;
        }
        for semaphore in waits {
            state.signaled_semaphores.remove(&semaphore.as_raw());
        }
        for swapchain in swapchains {
            state.require_live("swapchain", swapchain.as_raw(), "present");
        }
        state
            .present_script
            .pop_front()
            .unwrap_or(vk::Result::SUCCESS)
    })
}

// ---------------------------------------------------------------------------
// Queues and synchronization
// ---------------------------------------------------------------------------

unsafe extern "system" fn queue_submit(
    _queue: vk::Queue,
    submit_count: u32,
    submits: *const vk::SubmitInfo,
    fence: vk::Fence,
) -> vk::Result {
    let command_buffers: Vec<u64> = slice(submits, submit_count)
        .iter()
        .flat_map(|submit| slice(submit.p_command_buffers, submit.command_buffer_count))
        .map(|cb| cb.as_raw())
        .collect();
    let (mut waits, mut signals): (Vec<vk::Semaphore>, Vec<vk::Semaphore>) = (Vec::new(), Vec::new());
    for submit in slice(submits, submit_count) {
        waits.extend(slice(submit.p_wait_semaphores, submit.wait_semaphore_count));
        signals.extend(slice(submit.p_signal_semaphores, submit.signal_semaphore_count));
    }
    with_state(|state| {
        if let Some(result) = state.enter("vkQueueSubmit") {
            return result;
        }
        for semaphore in waits {
            state.signaled_semaphores.remove(&semaphore.as_raw());
        }
        for semaphore in signals {
            state.signaled_semaphores.insert(semaphore.as_raw());
        }
        for cb in command_buffers {
            state.require_live("command_buffer", cb, "queue submit");
        }
        if fence != vk::Fence::null() {
            match state.fences.get(&fence.as_raw()) {
                Some(true) => state.violation(format!(
                    "fence {:#x} submitted while still signaled",
                    fence.as_raw()
                )),
                Some(false) => {}
                None => state.violation(format!("submit with unknown fence {:#x}", fence.as_raw())),
            }
            // Work completes immediately.
            state.fences.insert(fence.as_raw(), true);
        }
        vk::Result::SUCCESS
    })
}

unsafe extern "system" fn queue_wait_idle(_queue: vk::Queue) -> vk::Result {
    simple_result("vkQueueWaitIdle")
}

unsafe extern "system" fn create_fence(
    device: vk::Device,
    create_info: *const vk::FenceCreateInfo,
    _allocator: *const vk::AllocationCallbacks,
    fence: *mut vk::Fence,
) -> vk::Result {
    let signaled = (*create_info)
        .flags
        .contains(vk::FenceCreateFlags::SIGNALED);
    let result = create_child("vkCreateFence", "fence", device.as_raw(), fence);
    if result == vk::Result::SUCCESS {
        with_state(|state| state.fences.insert((*fence).as_raw(), signaled));
    }
    result
}

unsafe extern "system" fn destroy_fence(
    _device: vk::Device,
    fence: vk::Fence,
    _allocator: *const vk::AllocationCallbacks,
) {
    destroy_child("vkDestroyFence", "fence", fence.as_raw());
}

unsafe extern "system" fn wait_for_fences(
    _device: vk::Device,
    count: u32,
    fences: *const vk::Fence,
    wait_all: vk::Bool32,
    timeout: u64,
) -> vk::Result {
    let fences = slice(fences, count).to_vec();
    with_state(|state| {
        if let Some(result) = state.enter("vkWaitForFences") {
            return result;
        }
        let signaled: Vec<bool> = fences
            .iter()
            .map(|fence| state.fences.get(&fence.as_raw()).copied().unwrap_or(false))
            .collect();
        let done = if wait_all == vk::TRUE {
            signaled.iter().all(|s| *s)
        } else {
            signaled.iter().any(|s| *s)
        };
        if done {
            vk::Result::SUCCESS
        } else {
            if timeout == u64::MAX {
                state.violation("unbounded wait on a fence nothing will signal".to_string());
            }
            vk::Result::TIMEOUT
        }
    })
}

unsafe extern "system" fn reset_fences(
    _device: vk::Device,
    count: u32,
    fences: *const vk::Fence,
) -> vk::Result {
    let fences = slice(fences, count).to_vec();
    with_state(|state| {
        if let Some(result) = state.enter("vkResetFences") {
            return result;
        }
        for fence in fences {
            state.require_live("fence", fence.as_raw(), "fence reset");
            state.fences.insert(fence.as_raw(), false);
        }
        vk::Result::SUCCESS
    })
}

unsafe extern "system" fn get_fence_status(_device: vk::Device, fence: vk::Fence) -> vk::Result {
    with_state(|state| {
        if let Some(result) = state.enter("vkGetFenceStatus") {
            return result;
        }
        if state.fences.get(&fence.as_raw()).copied().unwrap_or(false) {
            vk::Result::SUCCESS
        } else {
            vk::Result::NOT_READY
        }
    })
}

unsafe extern "system" fn create_semaphore(
    device: vk::Device,
    _create_info: *const vk::SemaphoreCreateInfo,
    _allocator: *const vk::AllocationCallbacks,
    semaphore: *mut vk::Semaphore,
) -> vk::Result {
    create_child("vkCreateSemaphore", "semaphore", device.as_raw(), semaphore)
}

unsafe extern "system" fn destroy_semaphore(
    _device: vk::Device,
    semaphore: vk::Semaphore,
    _allocator: *const vk::AllocationCallbacks,
) {
    destroy_child("vkDestroySemaphore", "semaphore", semaphore.as_raw());
}

unsafe extern "system" fn create_event(
    device: vk::Device,
    _create_info: *const vk::EventCreateInfo,
    _allocator: *const vk::AllocationCallbacks,
    event: *mut vk::Event,
) -> vk::Result {
    let result = create_child("vkCreateEvent", "event", device.as_raw(), event);
    if result == vk::Result::SUCCESS {
        with_state(|state| state.events.insert((*event).as_raw(), false));
    }
    result
}

unsafe extern "system" fn destroy_event(
    _device: vk::Device,
    event: vk::Event,
    _allocator: *const vk::AllocationCallbacks,
) {
    destroy_child("vkDestroyEvent", "event", event.as_raw());
}

fn store_event(name: &'static str, event: vk::Event, set: bool) -> vk::Result {
    with_state(|state| {
        if let Some(result) = state.enter(name) {
            return result;
        }
        state.require_live("event", event.as_raw(), name);
        state.events.insert(event.as_raw(), set);
        vk::Result::SUCCESS
    })
}

unsafe extern "system" fn set_event(_device: vk::Device, event: vk::Event) -> vk::Result {
    store_event("vkSetEvent", event, true)
}

unsafe extern "system" fn reset_event(_device: vk::Device, event: vk::Event) -> vk::Result {
    store_event("vkResetEvent", event, false)
}

unsafe extern "system" fn get_event_status(_device: vk::Device, event: vk::Event) -> vk::Result {
    with_state(|state| {
        if let Some(result) = state.enter("vkGetEventStatus") {
            return result;
        }
        if state.events.get(&event.as_raw()).copied().unwrap_or(false) {
            vk::Result::EVENT_SET
        } else {
            vk::Result::EVENT_RESET
        }
    })
}

// ---------------------------------------------------------------------------
// Device-scoped objects
// ---------------------------------------------------------------------------

/// Create/destroy pairs whose only state is liveness
macro_rules! plain_objects {
    ($(
        $kind:literal: $handle:ty, $info:ty,
        $create:ident = $create_name:literal,
        $destroy:ident = $destroy_name:literal;
    )*) => {
        $(
            unsafe extern "system" fn $create(
                device: vk::Device,
                _create_info: *const $info,
                _allocator: *const vk::AllocationCallbacks,
                out: *mut $handle,
            ) -> vk::Result {
                create_child($create_name, $kind, device.as_raw(), out)
            }

            unsafe extern "system" fn $destroy(
                _device: vk::Device,
                handle: $handle,
                _allocator: *const vk::AllocationCallbacks,
            ) {
                destroy_child($destroy_name, $kind, handle.as_raw());
            }
        )*
    };
}

plain_objects! {
    "command_pool": vk::CommandPool, vk::CommandPoolCreateInfo,
        create_command_pool = "vkCreateCommandPool",
        destroy_command_pool = "vkDestroyCommandPool";
    "shader_module": vk::ShaderModule, vk::ShaderModuleCreateInfo,
        create_shader_module = "vkCreateShaderModule",
        destroy_shader_module = "vkDestroyShaderModule";
    "pipeline_layout": vk::PipelineLayout, vk::PipelineLayoutCreateInfo,
        create_pipeline_layout = "vkCreatePipelineLayout",
        destroy_pipeline_layout = "vkDestroyPipelineLayout";
    "render_pass": vk::RenderPass, vk::RenderPassCreateInfo,
        create_render_pass = "vkCreateRenderPass",
        destroy_render_pass = "vkDestroyRenderPass";
    "framebuffer": vk::Framebuffer, vk::FramebufferCreateInfo,
        create_framebuffer = "vkCreateFramebuffer",
        destroy_framebuffer = "vkDestroyFramebuffer";
    "descriptor_set_layout": vk::DescriptorSetLayout, vk::DescriptorSetLayoutCreateInfo,
        create_descriptor_set_layout = "vkCreateDescriptorSetLayout",
        destroy_descriptor_set_layout = "vkDestroyDescriptorSetLayout";
}

unsafe extern "system" fn create_image_view(
    device: vk::Device,
    create_info: *const vk::ImageViewCreateInfo,
    _allocator: *const vk::AllocationCallbacks,
    view: *mut vk::ImageView,
) -> vk::Result {
    let image = (*create_info).image.as_raw();
    let result = create_child("vkCreateImageView", "image_view", device.as_raw(), view);
    if result == vk::Result::SUCCESS {
        with_state(|state| state.image_views.insert((*view).as_raw(), image));
    }
    result
}

unsafe extern "system" fn destroy_image_view(
    _device: vk::Device,
    view: vk::ImageView,
    _allocator: *const vk::AllocationCallbacks,
) {
    destroy_child("vkDestroyImageView", "image_view", view.as_raw());
}

unsafe extern "system" fn reset_command_pool(
    _device: vk::Device,
    pool: vk::CommandPool,
    _flags: vk::CommandPoolResetFlags,
) -> vk::Result {
    with_state(|state| {
        if let Some(result) = state.enter("vkResetCommandPool") {
            return result;
        }
        state.require_live("command_pool", pool.as_raw(), "pool reset");
        vk::Result::SUCCESS
    })
}

unsafe extern "system" fn allocate_command_buffers(
    _device: vk::Device,
    allocate_info: *const vk::CommandBufferAllocateInfo,
    command_buffers: *mut vk::CommandBuffer,
) -> vk::Result {
    let info = &*allocate_info;
    with_state(|state| {
        if let Some(result) = state.enter("vkAllocateCommandBuffers") {
            return result;
        }
        let pool = info.command_pool.as_raw();
        state.require_live("command_pool", pool, "command buffer allocation");
        for i in 0..info.command_buffer_count as usize {
            *command_buffers.add(i) =
                vk::CommandBuffer::from_raw(state.alloc("command_buffer", pool));
        }
        vk::Result::SUCCESS
    })
}

unsafe extern "system" fn free_command_buffers(
    _device: vk::Device,
    pool: vk::CommandPool,
    count: u32,
    command_buffers: *const vk::CommandBuffer,
) {
    let buffers = slice(command_buffers, count).to_vec();
    with_state(|state| {
        state.calls.push("vkFreeCommandBuffers");
        state.require_live("command_pool", pool.as_raw(), "command buffer free");
        for cb in buffers {
            state.release("command_buffer", cb.as_raw());
        }
    });
}

unsafe extern "system" fn begin_command_buffer(
    command_buffer: vk::CommandBuffer,
    _begin_info: *const vk::CommandBufferBeginInfo,
) -> vk::Result {
    with_state(|state| {
        if let Some(result) = state.enter("vkBeginCommandBuffer") {
            return result;
        }
        state.require_live("command_buffer", command_buffer.as_raw(), "begin");
        vk::Result::SUCCESS
    })
}

unsafe extern "system" fn end_command_buffer(_command_buffer: vk::CommandBuffer) -> vk::Result {
    simple_result("vkEndCommandBuffer")
}

unsafe extern "system" fn reset_command_buffer(
    _command_buffer: vk::CommandBuffer,
    _flags: vk::CommandBufferResetFlags,
) -> vk::Result {
    simple_result("vkResetCommandBuffer")
}

unsafe extern "system" fn create_pipeline_cache(
    device: vk::Device,
    create_info: *const vk::PipelineCacheCreateInfo,
    _allocator: *const vk::AllocationCallbacks,
    cache: *mut vk::PipelineCache,
) -> vk::Result {
    let info = &*create_info;
    let seed = if info.p_initial_data.is_null() {
        Vec::new()
    } else {
        std::slice::from_raw_parts(info.p_initial_data.cast::<u8>(), info.initial_data_size).to_vec()
    };
    let result = create_child("vkCreatePipelineCache", "pipeline_cache", device.as_raw(), cache);
    if result == vk::Result::SUCCESS {
        with_state(|state| state.pipeline_caches.insert((*cache).as_raw(), seed));
    }
    result
}

unsafe extern "system" fn destroy_pipeline_cache(
    _device: vk::Device,
    cache: vk::PipelineCache,
    _allocator: *const vk::AllocationCallbacks,
) {
    destroy_child("vkDestroyPipelineCache", "pipeline_cache", cache.as_raw());
}

unsafe extern "system" fn get_pipeline_cache_data(
    _device: vk::Device,
    cache: vk::PipelineCache,
    size: *mut usize,
    data: *mut c_void,
) -> vk::Result {
    let blob = with_state(|state| {
        state.calls.push("vkGetPipelineCacheData");
        state
            .pipeline_caches
            .get(&cache.as_raw())
            .cloned()
            .unwrap_or_default()
    });
    if data.is_null() {
        *size = blob.len();
        return vk::Result::SUCCESS;
    }
    let written = (*size).min(blob.len());
    std::ptr::copy_nonoverlapping(blob.as_ptr(), data.cast::<u8>(), written);
    *size = written;
    if written < blob.len() {
        vk::Result::INCOMPLETE
    } else {
        vk::Result::SUCCESS
    }
}

unsafe fn create_pipelines(
    name: &'static str,
    device: vk::Device,
    cache: vk::PipelineCache,
    count: u32,
    stage_count: u32,
    pipelines: *mut vk::Pipeline,
) -> vk::Result {
    with_state(|state| {
        let failure = state.enter(name);
        state.last_pipeline_cache = cache;
        state.last_pipeline_stage_count = stage_count;
        for i in 0..count as usize {
            *pipelines.add(i) = match failure {
                Some(_) => vk::Pipeline::null(),
                None => vk::Pipeline::from_raw(state.alloc("pipeline", device.as_raw())),
            };
        }
        failure.unwrap_or(vk::Result::SUCCESS)
    })
}

unsafe extern "system" fn create_graphics_pipelines(
    device: vk::Device,
    cache: vk::PipelineCache,
    count: u32,
    create_infos: *const vk::GraphicsPipelineCreateInfo,
    _allocator: *const vk::AllocationCallbacks,
    pipelines: *mut vk::Pipeline,
) -> vk::Result {
    let stage_count = slice(create_infos, count)
        .first()
        .map_or(0, |info| info.stage_count);
    create_pipelines(
        "vkCreateGraphicsPipelines",
        device,
        cache,
        count,
        stage_count,
        pipelines,
    )
}

unsafe extern "system" fn create_compute_pipelines(
    device: vk::Device,
    cache: vk::PipelineCache,
    count: u32,
    _create_infos: *const vk::ComputePipelineCreateInfo,
    _allocator: *const vk::AllocationCallbacks,
    pipelines: *mut vk::Pipeline,
) -> vk::Result {
    create_pipelines("vkCreateComputePipelines", device, cache, count, 1, pipelines)
}

unsafe extern "system" fn destroy_pipeline(
    _device: vk::Device,
    pipeline: vk::Pipeline,
    _allocator: *const vk::AllocationCallbacks,
) {
    destroy_child("vkDestroyPipeline", "pipeline", pipeline.as_raw());
}

unsafe extern "system" fn create_descriptor_pool(
    device: vk::Device,
    create_info: *const vk::DescriptorPoolCreateInfo,
    _allocator: *const vk::AllocationCallbacks,
    pool: *mut vk::DescriptorPool,
) -> vk::Result {
    let info = &*create_info;
    let result = create_child("vkCreateDescriptorPool", "descriptor_pool", device.as_raw(), pool);
    if result == vk::Result::SUCCESS {
        with_state(|state| {
            state
                .descriptor_pools
                .insert((*pool).as_raw(), (info.max_sets, info.flags))
        });
    }
    result
}

unsafe extern "system" fn destroy_descriptor_pool(
    _device: vk::Device,
    pool: vk::DescriptorPool,
    _allocator: *const vk::AllocationCallbacks,
) {
    destroy_child("vkDestroyDescriptorPool", "descriptor_pool", pool.as_raw());
}

unsafe extern "system" fn allocate_descriptor_sets(
    _device: vk::Device,
    allocate_info: *const vk::DescriptorSetAllocateInfo,
    sets: *mut vk::DescriptorSet,
) -> vk::Result {
    let info = &*allocate_info;
    let pool = info.descriptor_pool.as_raw();
    with_state(|state| {
        if let Some(result) = state.enter("vkAllocateDescriptorSets") {
            return result;
        }
        let Some(&(max_sets, _)) = state.descriptor_pools.get(&pool) else {
            state.violation(format!("allocation from unknown descriptor pool {pool:#x}"));
            return vk::Result::ERROR_OUT_OF_POOL_MEMORY;
        };
        let in_use = state.live_children(pool).len() as u32;
        if in_use + info.descriptor_set_count > max_sets {
            return vk::Result::ERROR_OUT_OF_POOL_MEMORY;
        }
        for i in 0..info.descriptor_set_count as usize {
            *sets.add(i) = vk::DescriptorSet::from_raw(state.alloc("descriptor_set", pool));
        }
        vk::Result::SUCCESS
    })
}

unsafe extern "system" fn free_descriptor_sets(
    _device: vk::Device,
    pool: vk::DescriptorPool,
    count: u32,
    sets: *const vk::DescriptorSet,
) -> vk::Result {
    let sets = slice(sets, count).to_vec();
    with_state(|state| {
        if let Some(result) = state.enter("vkFreeDescriptorSets") {
            return result;
        }
        match state.descriptor_pools.get(&pool.as_raw()) {
            Some((_, flags)) if flags.contains(vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET) => {}
            Some(_) => state.violation("freeing sets from a pool without FREE_DESCRIPTOR_SET".to_string()),
            None => state.violation(format!("freeing sets from dead pool {:#x}", pool.as_raw())),
        }
        for set in sets {
            state.release("descriptor_set", set.as_raw());
        }
        vk::Result::SUCCESS
    })
}

unsafe extern "system" fn reset_descriptor_pool(
    _device: vk::Device,
    pool: vk::DescriptorPool,
    _flags: vk::DescriptorPoolResetFlags,
) -> vk::Result {
    with_state(|state| {
        if let Some(result) = state.enter("vkResetDescriptorPool") {
            return result;
        }
        let raw = pool.as_raw();
        state.require_live("descriptor_pool", raw, "pool reset");
        state.objects.retain(|_, object| object.parent != raw);
        vk::Result::SUCCESS
    })
}

unsafe extern "system" fn update_descriptor_sets(
    _device: vk::Device,
    write_count: u32,
    _writes: *const vk::WriteDescriptorSet,
    _copy_count: u32,
    _copies: *const vk::CopyDescriptorSet,
) {
    with_state(|state| {
        state.calls.push("vkUpdateDescriptorSets");
        state.last_descriptor_write_count = write_count;
    });
}

// ---------------------------------------------------------------------------
// Command recording
// ---------------------------------------------------------------------------

/// Commands whose only observable effect is being recorded
macro_rules! recorded_commands {
    ($($func:ident = $name:literal ($($arg:ty),*);)*) => {
        $(
            unsafe extern "system" fn $func(_command_buffer: vk::CommandBuffer $(, _: $arg)*) {
                record($name);
            }
        )*
    };
}

recorded_commands! {
    cmd_begin_render_pass = "vkCmdBeginRenderPass"(*const vk::RenderPassBeginInfo, vk::SubpassContents);
    cmd_next_subpass = "vkCmdNextSubpass"(vk::SubpassContents);
    cmd_end_render_pass = "vkCmdEndRenderPass"();
    cmd_begin_rendering = "vkCmdBeginRenderingKHR"(*const vk::RenderingInfo);
    cmd_end_rendering = "vkCmdEndRenderingKHR"();
    cmd_bind_pipeline = "vkCmdBindPipeline"(vk::PipelineBindPoint, vk::Pipeline);
    cmd_bind_descriptor_sets = "vkCmdBindDescriptorSets"(
        vk::PipelineBindPoint, vk::PipelineLayout, u32, u32, *const vk::DescriptorSet, u32, *const u32
    );
    cmd_bind_vertex_buffers = "vkCmdBindVertexBuffers"(u32, u32, *const vk::Buffer, *const vk::DeviceSize);
    cmd_bind_index_buffer = "vkCmdBindIndexBuffer"(vk::Buffer, vk::DeviceSize, vk::IndexType);
    cmd_draw = "vkCmdDraw"(u32, u32, u32, u32);
    cmd_draw_indexed = "vkCmdDrawIndexed"(u32, u32, u32, i32, u32);
    cmd_draw_indirect = "vkCmdDrawIndirect"(vk::Buffer, vk::DeviceSize, u32, u32);
    cmd_draw_indexed_indirect = "vkCmdDrawIndexedIndirect"(vk::Buffer, vk::DeviceSize, u32, u32);
    cmd_dispatch = "vkCmdDispatch"(u32, u32, u32);
    cmd_dispatch_indirect = "vkCmdDispatchIndirect"(vk::Buffer, vk::DeviceSize);
    cmd_set_viewport = "vkCmdSetViewport"(u32, u32, *const vk::Viewport);
    cmd_set_scissor = "vkCmdSetScissor"(u32, u32, *const vk::Rect2D);
    cmd_push_constants = "vkCmdPushConstants"(vk::PipelineLayout, vk::ShaderStageFlags, u32, u32, *const c_void);
    cmd_pipeline_barrier = "vkCmdPipelineBarrier"(
        vk::PipelineStageFlags, vk::PipelineStageFlags, vk::DependencyFlags,
        u32, *const vk::MemoryBarrier,
        u32, *const vk::BufferMemoryBarrier,
        u32, *const vk::ImageMemoryBarrier
    );
    cmd_copy_buffer = "vkCmdCopyBuffer"(vk::Buffer, vk::Buffer, u32, *const vk::BufferCopy);
    cmd_copy_buffer_to_image = "vkCmdCopyBufferToImage"(
        vk::Buffer, vk::Image, vk::ImageLayout, u32, *const vk::BufferImageCopy
    );
    cmd_copy_image = "vkCmdCopyImage"(
        vk::Image, vk::ImageLayout, vk::Image, vk::ImageLayout, u32, *const vk::ImageCopy
    );
    cmd_blit_image = "vkCmdBlitImage"(
        vk::Image, vk::ImageLayout, vk::Image, vk::ImageLayout, u32, *const vk::ImageBlit, vk::Filter
    );
    cmd_clear_color_image = "vkCmdClearColorImage"(
        vk::Image, vk::ImageLayout, *const vk::ClearColorValue, u32, *const vk::ImageSubresourceRange
    );
    cmd_clear_depth_stencil_image = "vkCmdClearDepthStencilImage"(
        vk::Image, vk::ImageLayout, *const vk::ClearDepthStencilValue, u32, *const vk::ImageSubresourceRange
    );
    cmd_fill_buffer = "vkCmdFillBuffer"(vk::Buffer, vk::DeviceSize, vk::DeviceSize, u32);
    cmd_update_buffer = "vkCmdUpdateBuffer"(vk::Buffer, vk::DeviceSize, vk::DeviceSize, *const c_void);
    cmd_set_event = "vkCmdSetEvent"(vk::Event, vk::PipelineStageFlags);
    cmd_reset_event = "vkCmdResetEvent"(vk::Event, vk::PipelineStageFlags);
    cmd_wait_events = "vkCmdWaitEvents"(
        u32, *const vk::Event, vk::PipelineStageFlags, vk::PipelineStageFlags,
        u32, *const vk::MemoryBarrier,
        u32, *const vk::BufferMemoryBarrier,
        u32, *const vk::ImageMemoryBarrier
    );
    cmd_execute_commands = "vkCmdExecuteCommands"(u32, *const vk::CommandBuffer);
}

// ---------------------------------------------------------------------------
// Dispatch table
// ---------------------------------------------------------------------------

fn lookup(name: &CStr) -> vk::PFN_vkVoidFunction {
    let function: *const () = match name.to_bytes() {
        b"vkGetInstanceProcAddr" => get_instance_proc_addr as *const (),
        b"vkGetDeviceProcAddr" => get_device_proc_addr as *const (),
        b"vkEnumerateInstanceExtensionProperties" => {
            enumerate_instance_extension_properties as *const ()
        }
        b"vkEnumerateInstanceLayerProperties" => enumerate_instance_layer_properties as *const (),
        b"vkCreateInstance" => create_instance as *const (),
        b"vkDestroyInstance" => destroy_instance as *const (),
        b"vkCreateDebugUtilsMessengerEXT" => create_debug_utils_messenger as *const (),
        b"vkDestroyDebugUtilsMessengerEXT" => destroy_debug_utils_messenger as *const (),
        b"vkEnumeratePhysicalDevices" => enumerate_physical_devices as *const (),
        b"vkGetPhysicalDeviceProperties" => get_physical_device_properties as *const (),
        b"vkGetPhysicalDeviceFeatures" => get_physical_device_features as *const (),
        b"vkGetPhysicalDeviceQueueFamilyProperties" => {
            get_physical_device_queue_family_properties as *const ()
        }
        b"vkEnumerateDeviceExtensionProperties" => {
            enumerate_device_extension_properties as *const ()
        }
        b"vkCreateDevice" => create_device as *const (),
        b"vkDestroyDevice" => destroy_device as *const (),
        b"vkGetDeviceQueue" => get_device_queue as *const (),
        b"vkDeviceWaitIdle" => device_wait_idle as *const (),
        b"vkDestroySurfaceKHR" => destroy_surface as *const (),
        b"vkGetPhysicalDeviceSurfaceSupportKHR" => get_surface_support as *const (),
        b"vkGetPhysicalDeviceSurfaceCapabilitiesKHR" => get_surface_capabilities as *const (),
        b"vkGetPhysicalDeviceSurfaceFormatsKHR" => get_surface_formats as *const (),
        b"vkGetPhysicalDeviceSurfacePresentModesKHR" => get_surface_present_modes as *const (),
        b"vkCreateSwapchainKHR" => create_swapchain as *const (),
        b"vkDestroySwapchainKHR" => destroy_swapchain as *const (),
        b"vkGetSwapchainImagesKHR" => get_swapchain_images as *const (),
        b"vkAcquireNextImageKHR" => acquire_next_image as *const (),
        b"vkQueuePresentKHR" => queue_present as *const (),
        b"vkQueueSubmit" => queue_submit as *const (),
        b"vkQueueWaitIdle" => queue_wait_idle as *const (),
        b"vkCreateFence" => create_fence as *const (),
        b"vkDestroyFence" => destroy_fence as *const (),
        b"vkWaitForFences" => wait_for_fences as *const (),
        b"vkResetFences" => reset_fences as *const (),
        b"vkGetFenceStatus" => get_fence_status as *const (),
        b"vkCreateSemaphore" => create_semaphore as *const (),
        b"vkDestroySemaphore" => destroy_semaphore as *const (),
        b"vkCreateEvent" => create_event as *const (),
        b"vkDestroyEvent" => destroy_event as *const (),
        b"vkSetEvent" => set_event as *const (),
        b"vkResetEvent" => reset_event as *const (),
        b"vkGetEventStatus" => get_event_status as *const (),
        b"vkCreateImageView" => create_image_view as *const (),
        b"vkDestroyImageView" => destroy_image_view as *const (),
        b"vkCreateCommandPool" => create_command_pool as *const (),
        b"vkDestroyCommandPool" => destroy_command_pool as *const (),
        b"vkResetCommandPool" => reset_command_pool as *const (),
        b"vkAllocateCommandBuffers" => allocate_command_buffers as *const (),
        b"vkFreeCommandBuffers" => free_command_buffers as *const (),
        b"vkBeginCommandBuffer" => begin_command_buffer as *const (),
        b"vkEndCommandBuffer" => end_command_buffer as *const (),
        b"vkResetCommandBuffer" => reset_command_buffer as *const (),
        b"vkCreateShaderModule" => create_shader_module as *const (),
        b"vkDestroyShaderModule" => destroy_shader_module as *const (),
        b"vkCreatePipelineLayout" => create_pipeline_layout as *const (),
        b"vkDestroyPipelineLayout" => destroy_pipeline_layout as *const (),
        b"vkCreatePipelineCache" => create_pipeline_cache as *const (),
        b"vkDestroyPipelineCache" => destroy_pipeline_cache as *const (),
        b"vkGetPipelineCacheData" => get_pipeline_cache_data as *const (),
        b"vkCreateGraphicsPipelines" => create_graphics_pipelines as *const (),
        b"vkCreateComputePipelines" => create_compute_pipelines as *const (),
        b"vkDestroyPipeline" => destroy_pipeline as *const (),
        b"vkCreateRenderPass" => create_render_pass as *const (),
        b"vkDestroyRenderPass" => destroy_render_pass as *const (),
        b"vkCreateFramebuffer" => create_framebuffer as *const (),
        b"vkDestroyFramebuffer" => destroy_framebuffer as *const (),
        b"vkCreateDescriptorSetLayout" => create_descriptor_set_layout as *const (),
        b"vkDestroyDescriptorSetLayout" => destroy_descriptor_set_layout as *const (),
        b"vkCreateDescriptorPool" => create_descriptor_pool as *const (),
        b"vkDestroyDescriptorPool" => destroy_descriptor_pool as *const (),
        b"vkAllocateDescriptorSets" => allocate_descriptor_sets as *const (),
        b"vkFreeDescriptorSets" => free_descriptor_sets as *const (),
        b"vkResetDescriptorPool" => reset_descriptor_pool as *const (),
        b"vkUpdateDescriptorSets" => update_descriptor_sets as *const (),
        b"vkCmdBeginRenderPass" => cmd_begin_render_pass as *const (),
        b"vkCmdNextSubpass" => cmd_next_subpass as *const (),
        b"vkCmdEndRenderPass" => cmd_end_render_pass as *const (),
        b"vkCmdBeginRenderingKHR" => cmd_begin_rendering as *const (),
        b"vkCmdEndRenderingKHR" => cmd_end_rendering as *const (),
        b"vkCmdBindPipeline" => cmd_bind_pipeline as *const (),
        b"vkCmdBindDescriptorSets" => cmd_bind_descriptor_sets as *const (),
        b"vkCmdBindVertexBuffers" => cmd_bind_vertex_buffers as *const (),
        b"vkCmdBindIndexBuffer" => cmd_bind_index_buffer as *const (),
        b"vkCmdDraw" => cmd_draw as *const (),
        b"vkCmdDrawIndexed" => cmd_draw_indexed as *const (),
        b"vkCmdDrawIndirect" => cmd_draw_indirect as *const (),
        b"vkCmdDrawIndexedIndirect" => cmd_draw_indexed_indirect as *const (),
        b"vkCmdDispatch" => cmd_dispatch as *const (),
        b"vkCmdDispatchIndirect" => cmd_dispatch_indirect as *const (),
        b"vkCmdSetViewport" => cmd_set_viewport as *const (),
        b"vkCmdSetScissor" => cmd_set_scissor as *const (),
        b"vkCmdPushConstants" => cmd_push_constants as *const (),
        b"vkCmdPipelineBarrier" => cmd_pipeline_barrier as *const (),
        b"vkCmdCopyBuffer" => cmd_copy_buffer as *const (),
        b"vkCmdCopyBufferToImage" => cmd_copy_buffer_to_image as *const (),
        b"vkCmdCopyImage" => cmd_copy_image as *const (),
        b"vkCmdBlitImage" => cmd_blit_image as *const (),
        b"vkCmdClearColorImage" => cmd_clear_color_image as *const (),
        b"vkCmdClearDepthStencilImage" => cmd_clear_depth_stencil_image as *const (),
        b"vkCmdFillBuffer" => cmd_fill_buffer as *const (),
        b"vkCmdUpdateBuffer" => cmd_update_buffer as *const (),
        b"vkCmdSetEvent" => cmd_set_event as *const (),
        b"vkCmdResetEvent" => cmd_reset_event as *const (),
        b"vkCmdWaitEvents" => cmd_wait_events as *const (),
        b"vkCmdExecuteCommands" => cmd_execute_commands as *const (),
        _ => return None,
    };
    // SAFETY: every entry above has the exact signature Vulkan specifies for
    // its name; callers transmute back before calling.
    Some(unsafe { std::mem::transmute::<*const (), unsafe extern "system" fn()>(function) })
}
