// Vulkan initialization components

pub mod allocator;
pub mod device;
pub mod instance;
pub mod surface;
pub mod window;
