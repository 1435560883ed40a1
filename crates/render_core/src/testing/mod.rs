//! Test doubles for the Vulkan driver and the memory allocator

pub(crate) mod mock_allocator;
pub(crate) mod mock_driver;
