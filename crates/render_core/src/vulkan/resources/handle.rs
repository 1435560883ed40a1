//! Device-scoped native handles
//!
//! A [`DeviceHandle`] pairs a native handle with the [`Device`] it was
//! created from. Holding one keeps the device alive, so a child can never
//! outlive its parent, and every handle is recorded in the device's
//! [`HandleRegistry`] for leak reporting at teardown.

use ash::vk::{self, Handle};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Mutex, PoisonError};

use crate::vulkan::Device;

/// Live-handle tracker owned by a device
#[derive(Default)]
pub struct HandleRegistry {
    live: Mutex<HashMap<(vk::ObjectType, u64), usize>>,
}

impl HandleRegistry {
    pub(crate) fn register(&self, ty: vk::ObjectType, raw: u64) {
        let mut live = self.live.lock().unwrap_or_else(PoisonError::into_inner);
        *live.entry((ty, raw)).or_insert(0) += 1;
    }

    pub(crate) fn unregister(&self, ty: vk::ObjectType, raw: u64) {
        let mut live = self.live.lock().unwrap_or_else(PoisonError::into_inner);
        match live.get_mut(&(ty, raw)) {
            Some(count) if *count > 1 => *count -= 1,
            Some(_) => {
                live.remove(&(ty, raw));
            }
            None => log::warn!("Unregistering unknown {:?} handle {:#x}", ty, raw),
        }
    }

    /// Number of handles currently alive
    pub fn len(&self) -> usize {
        self.live
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .sum()
    }

    /// Whether no handles are alive
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of the live handles, sorted for stable reporting
    pub fn snapshot(&self) -> Vec<(vk::ObjectType, u64)> {
        let live = self.live.lock().unwrap_or_else(PoisonError::into_inner);
        let mut handles: Vec<_> = live.keys().copied().collect();
        handles.sort_by_key(|(ty, raw)| (ty.as_raw(), *raw));
        handles
    }
}

/// A native handle bound to the device that created it
pub struct DeviceHandle<H: Handle + Copy> {
    device: Device,
    raw: H,
}

impl<H: Handle + Copy> DeviceHandle<H> {
    /// Wrap a freshly created handle and register it with the device
    pub fn new(device: &Device, raw: H) -> Self {
        device.registry().register(H::TYPE, raw.as_raw());
        Self {
            device: device.clone(),
            raw,
        }
    }

    /// Get the native handle
    pub fn raw(&self) -> H {
        self.raw
    }

    /// Get the owning device
    pub fn device(&self) -> &Device {
        &self.device
    }
}

impl<H: Handle + Copy> Drop for DeviceHandle<H> {
    fn drop(&mut self) {
        self.device.registry().unregister(H::TYPE, self.raw.as_raw());
    }
}

impl<H: Handle + Copy> fmt::Debug for DeviceHandle<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}({:#x})", H::TYPE, self.raw.as_raw())
    }
}
