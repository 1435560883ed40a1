//! Window collaborator seam
//!
//! The renderer only needs three things from a window: the instance
//! extensions required to present to it, a surface, and its framebuffer size.
//! Input handling stays with the window; the frame loop consumes resize and
//! close notifications as [`WindowSignal`]s.

use ash::{vk, Entry};
use raw_window_handle::{HasRawDisplayHandle, HasRawWindowHandle};
use std::ffi::{CStr, CString};

use crate::vulkan::{VulkanError, VulkanResult};

/// Presentation-relevant notifications emitted by a window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowSignal {
    /// The framebuffer changed size
    Resized {
        /// New framebuffer width in pixels
        width: u32,
        /// New framebuffer height in pixels
        height: u32,
    },
    /// The user asked to close the window
    CloseRequested,
}

/// Anything the renderer can present to
pub trait WindowTarget {
    /// Instance extensions needed to create a surface for this window
    fn required_extensions(&self) -> VulkanResult<Vec<CString>>;

    /// Create a presentation surface for this window
    fn create_surface(&self, entry: &Entry, instance: &ash::Instance) -> VulkanResult<vk::SurfaceKHR>;

    /// Current framebuffer size in pixels
    fn framebuffer_extent(&self) -> vk::Extent2D;
}

/// [`WindowTarget`] over any window exposing raw platform handles
///
/// The framebuffer size is not part of the raw handles, so the owner keeps it
/// current through [`RawWindowTarget::set_extent`].
pub struct RawWindowTarget<W> {
    window: W,
    extent: vk::Extent2D,
}

impl<W: HasRawWindowHandle + HasRawDisplayHandle> RawWindowTarget<W> {
    /// Wrap a window with its initial framebuffer size
    pub fn new(window: W, extent: vk::Extent2D) -> Self {
        Self { window, extent }
    }

    /// Record a new framebuffer size
    pub fn set_extent(&mut self, extent: vk::Extent2D) {
        self.extent = extent;
    }

    /// Get the wrapped window
    pub fn window(&self) -> &W {
        &self.window
    }
}

impl<W: HasRawWindowHandle + HasRawDisplayHandle> WindowTarget for RawWindowTarget<W> {
    fn required_extensions(&self) -> VulkanResult<Vec<CString>> {
        let names = ash_window::enumerate_required_extensions(self.window.raw_display_handle())
            .map_err(|e| VulkanError::Window(format!("unsupported display: {e:?}")))?;
        Ok(names
            .iter()
            .map(|&name| unsafe { CStr::from_ptr(name) }.to_owned())
            .collect())
    }

    fn create_surface(&self, entry: &Entry, instance: &ash::Instance) -> VulkanResult<vk::SurfaceKHR> {
        unsafe {
            ash_window::create_surface(
                entry,
                instance,
                self.window.raw_display_handle(),
                self.window.raw_window_handle(),
                None,
            )
        }
        .map_err(VulkanError::creation("surface"))
    }

    fn framebuffer_extent(&self) -> vk::Extent2D {
        self.extent
    }
}

#[cfg(feature = "glfw-window")]
pub use self::glfw_window::Window;

#[cfg(feature = "glfw-window")]
mod glfw_window {
    use super::{WindowSignal, WindowTarget};
    use crate::vulkan::{VulkanError, VulkanResult};
    use ash::{vk, Entry};
    use std::ffi::CString;

    /// GLFW window configured for Vulkan presentation
    pub struct Window {
        glfw: glfw::Glfw,
        window: glfw::PWindow,
        events: glfw::GlfwReceiver<(f64, glfw::WindowEvent)>,
    }

    impl Window {
        /// Open a resizable window without a client API
        pub fn new(title: &str, width: u32, height: u32) -> VulkanResult<Self> {
            let mut glfw = glfw::init(glfw::fail_on_errors)
                .map_err(|e| VulkanError::Window(format!("GLFW initialization failed: {e:?}")))?;

            if !glfw.vulkan_supported() {
                return Err(VulkanError::Window(
                    "GLFW reports no Vulkan support".to_string(),
                ));
            }

            glfw.window_hint(glfw::WindowHint::ClientApi(glfw::ClientApiHint::NoApi));
            glfw.window_hint(glfw::WindowHint::Resizable(true));

            let (mut window, events) = glfw
                .create_window(width, height, title, glfw::WindowMode::Windowed)
                .ok_or_else(|| VulkanError::Window("window creation failed".to_string()))?;

            window.set_key_polling(true);
            window.set_close_polling(true);
            window.set_framebuffer_size_polling(true);

            Ok(Self {
                glfw,
                window,
                events,
            })
        }

        /// Whether the window has been asked to close
        pub fn should_close(&self) -> bool {
            self.window.should_close()
        }

        /// Pump the event queue and translate the events the renderer cares about
        ///
        /// Escape is treated as a close request.
        pub fn poll_signals(&mut self) -> Vec<WindowSignal> {
            self.glfw.poll_events();
            let mut signals = Vec::new();
            for (_, event) in glfw::flush_messages(&self.events) {
                match event {
                    glfw::WindowEvent::FramebufferSize(width, height) => {
                        signals.push(WindowSignal::Resized {
                            width: width.max(0) as u32,
                            height: height.max(0) as u32,
                        });
                    }
                    glfw::WindowEvent::Close
                    | glfw::WindowEvent::Key(glfw::Key::Escape, _, glfw::Action::Press, _) => {
                        self.window.set_should_close(true);
                        signals.push(WindowSignal::CloseRequested);
                    }
                    _ => {}
                }
            }
            signals
        }

        /// Block until at least one event arrives (used while minimised)
        pub fn wait_events(&mut self) {
            self.glfw.wait_events();
        }
    }

    impl WindowTarget for Window {
        fn required_extensions(&self) -> VulkanResult<Vec<CString>> {
            let names = self.glfw.get_required_instance_extensions().ok_or_else(|| {
                VulkanError::Window("GLFW cannot determine surface extensions".to_string())
            })?;
            names
                .into_iter()
                .map(|name| {
                    CString::new(name)
                        .map_err(|e| VulkanError::Window(format!("bad extension name: {e}")))
                })
                .collect()
        }

        fn create_surface(
            &self,
            _entry: &Entry,
            instance: &ash::Instance,
        ) -> VulkanResult<vk::SurfaceKHR> {
            let mut surface = vk::SurfaceKHR::null();
            let result =
                self.window
                    .create_window_surface(instance.handle(), std::ptr::null(), &mut surface);
            if result == vk::Result::SUCCESS {
                Ok(surface)
            } else {
                Err(VulkanError::Creation {
                    what: "surface",
                    result,
                })
            }
        }

        fn framebuffer_extent(&self) -> vk::Extent2D {
            let (width, height) = self.window.get_framebuffer_size();
            vk::Extent2D {
                width: width.max(0) as u32,
                height: height.max(0) as u32,
            }
        }
    }
}
