// Device-owned resources

pub mod buffer;
pub mod descriptor_set;
pub mod handle;
pub mod image;
