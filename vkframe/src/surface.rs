use std::sync::Arc;

use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use thiserror::Error;

use crate::instance::Instance;

#[derive(Debug, Error)]
pub enum CreateSurfaceError {
    #[error("Display handle unavailable: {0}")]
    InvalidDisplayHandle(raw_window_handle::HandleError),
    #[error("Window handle unavailable: {0}")]
    InvalidWindowHandle(raw_window_handle::HandleError),
    #[error("Vulkan error creating surface: {0}")]
    VulkanError(vk::Result),
    #[error("Instance was created without surface extensions")]
    MissingExtension,
}

#[derive(Debug, Error)]
pub enum SurfaceSupportError {
    #[error("Instance was created without surface extensions")]
    ExtensionNotLoaded,
    #[error("Vulkan error checking present support: {0}")]
    Vulkan(vk::Result),
}

#[derive(Debug, Error)]
pub enum SurfaceQueryError {
    #[error("Instance was created without surface extensions")]
    ExtensionNotLoaded,
    #[error("Vulkan error querying surface: {0}")]
    Vulkan(vk::Result),
}

/// Size of the framebuffer behind a surface, asked for when the surface
/// lets the application pick the swapchain extent. Zero in either
/// dimension means minimized.
pub trait FramebufferExtent: Send + Sync {
    fn framebuffer_extent(&self) -> vk::Extent2D;
}

impl<F> FramebufferExtent for F
where
    F: Fn() -> vk::Extent2D + Send + Sync,
{
    fn framebuffer_extent(&self) -> vk::Extent2D {
        self()
    }
}

/// What a surface offers a swapchain, queried anew before each
/// (re)creation.
#[derive(Debug, Clone, Default)]
pub struct SurfaceSupportDetails {
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

impl SurfaceSupportDetails {
    /// A swapchain needs at least one format and one present mode.
    pub fn is_adequate(&self) -> bool {
        !(self.formats.is_empty() || self.present_modes.is_empty())
    }
}

/// A `VkSurfaceKHR` tied to the window it was made for. The window stays
/// alive at least as long as the surface.
pub struct Surface<T: HasWindowHandle + HasDisplayHandle> {
    instance: Arc<Instance>,
    handle: vk::SurfaceKHR,
    _window: Arc<T>,
}

impl<T: HasWindowHandle + HasDisplayHandle> std::fmt::Debug for Surface<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Surface")
            .field("handle", &self.handle)
            .finish_non_exhaustive()
    }
}

impl<T: HasWindowHandle + HasDisplayHandle> Surface<T> {
    /// # Safety
    /// Drop the surface when the platform revokes it (winit's `suspended`),
    /// and only once no GPU work still uses anything built on it.
    pub unsafe fn new(
        instance: &Arc<Instance>,
        window: Arc<T>,
    ) -> Result<Self, CreateSurfaceError> {
        if instance.surface_loader().is_none() {
            return Err(CreateSurfaceError::MissingExtension);
        }
        let display = window
            .display_handle()
            .map_err(CreateSurfaceError::InvalidDisplayHandle)?;
        let raw_window = window
            .window_handle()
            .map_err(CreateSurfaceError::InvalidWindowHandle)?;
        // SAFETY: both handles come from a window this surface keeps alive.
        let handle = unsafe {
            ash_window::create_surface(
                instance.entry(),
                instance.ash_instance(),
                display.as_raw(),
                raw_window.as_raw(),
                None,
            )
        }
        .map_err(CreateSurfaceError::VulkanError)?;
        tracing::debug!("Created surface {handle:?}");

        Ok(Self {
            instance: Arc::clone(instance),
            handle,
            _window: window,
        })
    }

    pub fn get_parent(&self) -> &Arc<Instance> {
        &self.instance
    }

    pub fn raw_handle(&self) -> vk::SurfaceKHR {
        self.handle
    }

    fn loader(&self) -> Option<&ash::khr::surface::Instance> {
        self.instance.surface_loader()
    }

    /// Whether queue family `family` of `dev` can present here.
    ///
    /// # Safety
    /// `dev` must come from this surface's instance.
    pub unsafe fn supports_queue_family(
        &self,
        dev: vk::PhysicalDevice,
        family: u32,
    ) -> Result<bool, SurfaceSupportError> {
        let loader = self.loader().ok_or(SurfaceSupportError::ExtensionNotLoaded)?;
        // SAFETY: dev and the surface share an instance.
        unsafe { loader.get_physical_device_surface_support(dev, family, self.handle) }
            .map_err(SurfaceSupportError::Vulkan)
    }

    /// # Safety
    /// `dev` must come from this surface's instance.
    pub unsafe fn query_support(
        &self,
        dev: vk::PhysicalDevice,
    ) -> Result<SurfaceSupportDetails, SurfaceQueryError> {
        let loader = self.loader().ok_or(SurfaceQueryError::ExtensionNotLoaded)?;
        // SAFETY: dev and the surface share an instance; the three queries
        // have no other requirements.
        unsafe {
            Ok(SurfaceSupportDetails {
                capabilities: loader
                    .get_physical_device_surface_capabilities(dev, self.handle)
                    .map_err(SurfaceQueryError::Vulkan)?,
                formats: loader
                    .get_physical_device_surface_formats(dev, self.handle)
                    .map_err(SurfaceQueryError::Vulkan)?,
                present_modes: loader
                    .get_physical_device_surface_present_modes(dev, self.handle)
                    .map_err(SurfaceQueryError::Vulkan)?,
            })
        }
    }
}

impl<T: HasWindowHandle + HasDisplayHandle> Drop for Surface<T> {
    fn drop(&mut self) {
        tracing::debug!("Dropping surface {:?}", self.handle);
        match self.loader() {
            // SAFETY: swapchains built on the surface hold an Arc to it, so
            // none remain.
            Some(loader) => unsafe { loader.destroy_surface(self.handle, None) },
            None => tracing::error!(
                "Leaking surface {:?}: surface extension missing",
                self.handle
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closures_provide_extents() {
        let extent = vk::Extent2D {
            width: 800,
            height: 600,
        };
        let source: Box<dyn FramebufferExtent> = Box::new(move || extent);
        assert_eq!(source.framebuffer_extent(), extent);
    }

    #[test]
    fn adequacy_needs_formats_and_modes() {
        let mut details = SurfaceSupportDetails::default();
        assert!(!details.is_adequate());
        details.present_modes.push(vk::PresentModeKHR::FIFO);
        assert!(!details.is_adequate());
        details.formats.push(vk::SurfaceFormatKHR::default());
        assert!(details.is_adequate());
    }
}
