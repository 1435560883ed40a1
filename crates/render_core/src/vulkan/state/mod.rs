// Swapchain, synchronization and frame sequencing

pub mod frame_loop;
pub mod swapchain;
pub mod sync;
