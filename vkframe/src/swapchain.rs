//! Swapchain creation and the policy that picks its parameters.
//!
//! The `choose_*` functions are pure, so the selection can be checked
//! against made-up surface reports. [`Swapchain`] only feeds them what the
//! surface reports and owns the resulting handles.

use std::ffi::CString;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use thiserror::Error;

use crate::device::{Device, QueueFamilies};
use crate::surface::{Surface, SurfaceQueryError, SurfaceSupportDetails};

static NEXT_SWAPCHAIN_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Error)]
pub enum CreateSwapchainError {
    #[error("Device, surface and old swapchain come from different instances or surfaces")]
    MismatchedParams,

    #[error("Surface reports no formats")]
    NoSurfaceFormats,

    #[error("Surface reports no present modes")]
    NoPresentModes,

    #[error("Cannot build a {width}x{height} swapchain")]
    InvalidExtent { width: u32, height: u32 },

    #[error("Device was created without the swapchain extension")]
    SwapchainNotEnabled,

    #[error("Surface query failed: {0}")]
    SurfaceQuery(#[from] SurfaceQueryError),

    #[error("Vulkan error creating swapchain: {0}")]
    VulkanCreate(vk::Result),

    #[error("Vulkan error listing swapchain images: {0}")]
    VulkanGetImages(vk::Result),

    #[error("Vulkan error creating view of swapchain image {index}: {result}")]
    VulkanCreateImageView { index: usize, result: vk::Result },
}

/// 8 bits per channel, sRGB encoded, in the sRGB color space.
pub const DEFAULT_SURFACE_FORMAT: vk::SurfaceFormatKHR = vk::SurfaceFormatKHR {
    format: vk::Format::B8G8R8A8_SRGB,
    color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
};

/// The extent value a surface reports when the application decides.
const UNDEFINED_EXTENT: u32 = u32::MAX;

/// Parameters of one swapchain generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapchainConfig {
    pub surface_format: vk::SurfaceFormatKHR,
    pub present_mode: vk::PresentModeKHR,
    pub extent: vk::Extent2D,
    pub image_count: u32,
    pub composite_alpha: vk::CompositeAlphaFlagsKHR,
    pub pre_transform: vk::SurfaceTransformFlagsKHR,
}

/// Run every `choose_*` policy over a surface report.
///
/// `desired_extent` only matters when the surface leaves the extent to the
/// application.
pub fn select_swapchain_config(
    support: &SurfaceSupportDetails,
    desired_extent: vk::Extent2D,
    preferred_format: Option<vk::Format>,
) -> Result<SwapchainConfig, CreateSwapchainError> {
    let surface_format = choose_surface_format(&support.formats, preferred_format)
        .ok_or(CreateSwapchainError::NoSurfaceFormats)?;
    if support.present_modes.is_empty() {
        return Err(CreateSwapchainError::NoPresentModes);
    }

    let caps = &support.capabilities;
    let extent = choose_extent(caps, desired_extent);
    check_extent(extent)?;

    Ok(SwapchainConfig {
        surface_format,
        present_mode: choose_present_mode(&support.present_modes),
        extent,
        image_count: choose_image_count(caps),
        composite_alpha: choose_composite_alpha(caps),
        pre_transform: caps.current_transform,
    })
}

fn check_extent(extent: vk::Extent2D) -> Result<(), CreateSwapchainError> {
    match extent {
        vk::Extent2D { width: 0, .. } | vk::Extent2D { height: 0, .. } => {
            Err(CreateSwapchainError::InvalidExtent {
                width: extent.width,
                height: extent.height,
            })
        }
        _ => Ok(()),
    }
}

/// The preferred format if offered, else [`DEFAULT_SURFACE_FORMAT`], else
/// whatever the surface lists first. `None` only for an empty list.
pub fn choose_surface_format(
    formats: &[vk::SurfaceFormatKHR],
    preferred_format: Option<vk::Format>,
) -> Option<vk::SurfaceFormatKHR> {
    let preferred = preferred_format
        .and_then(|wanted| formats.iter().find(|f| f.format == wanted));
    preferred
        .or_else(|| formats.iter().find(|&&f| f == DEFAULT_SURFACE_FORMAT))
        .or(formats.first())
        .copied()
}

/// Mailbox when available. FIFO is always supported.
pub fn choose_present_mode(
    present_modes: &[vk::PresentModeKHR],
) -> vk::PresentModeKHR {
    if present_modes.contains(&vk::PresentModeKHR::MAILBOX) {
        vk::PresentModeKHR::MAILBOX
    } else {
        vk::PresentModeKHR::FIFO
    }
}

pub fn choose_extent(
    caps: &vk::SurfaceCapabilitiesKHR,
    desired_extent: vk::Extent2D,
) -> vk::Extent2D {
    if caps.current_extent.width != UNDEFINED_EXTENT {
        return caps.current_extent;
    }
    let (min, max) = (caps.min_image_extent, caps.max_image_extent);
    vk::Extent2D {
        width: desired_extent.width.max(min.width).min(max.width),
        height: desired_extent.height.max(min.height).min(max.height),
    }
}

/// One more than the minimum, capped by a nonzero maximum.
pub fn choose_image_count(caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let wanted = caps.min_image_count.saturating_add(1);
    match caps.max_image_count {
        0 => wanted,
        max => wanted.min(max),
    }
}

pub fn choose_composite_alpha(
    caps: &vk::SurfaceCapabilitiesKHR,
) -> vk::CompositeAlphaFlagsKHR {
    const PREFERENCE: [vk::CompositeAlphaFlagsKHR; 3] = [
        vk::CompositeAlphaFlagsKHR::OPAQUE,
        vk::CompositeAlphaFlagsKHR::PRE_MULTIPLIED,
        vk::CompositeAlphaFlagsKHR::POST_MULTIPLIED,
    ];
    PREFERENCE
        .into_iter()
        .find(|&alpha| caps.supported_composite_alpha.contains(alpha))
        .unwrap_or(vk::CompositeAlphaFlagsKHR::INHERIT)
}

/// Exclusive ownership when one family both draws and presents, otherwise
/// concurrent between the two.
fn image_sharing(families: &QueueFamilies) -> (vk::SharingMode, Vec<u32>) {
    if families.is_shared() {
        (vk::SharingMode::EXCLUSIVE, Vec::new())
    } else {
        (vk::SharingMode::CONCURRENT, families.unique())
    }
}

fn color_view_info(
    image: vk::Image,
    format: vk::Format,
) -> vk::ImageViewCreateInfo<'static> {
    vk::ImageViewCreateInfo::default()
        .image(image)
        .view_type(vk::ImageViewType::TYPE_2D)
        .format(format)
        .subresource_range(vk::ImageSubresourceRange {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            base_mip_level: 0,
            level_count: 1,
            base_array_layer: 0,
            layer_count: 1,
        })
}

/// Create one item per input, in order. On the first failure every item
/// already made is handed to `undo` before the error is returned.
fn create_all<I, T, E>(
    inputs: I,
    mut create: impl FnMut(usize, I::Item) -> Result<T, E>,
    mut undo: impl FnMut(T),
) -> Result<Vec<T>, E>
where
    I: IntoIterator,
{
    let mut made = Vec::new();
    for (index, input) in inputs.into_iter().enumerate() {
        match create(index, input) {
            Ok(item) => made.push(item),
            Err(e) => {
                made.into_iter().for_each(&mut undo);
                return Err(e);
            }
        }
    }
    Ok(made)
}

/// A `VkSwapchainKHR` with its images and one color view per image.
///
/// Recreation releases the views early through
/// [`destroy_image_views`](Self::destroy_image_views), then hands this
/// swapchain to [`new_with_old`](Self::new_with_old) and drops it once the
/// replacement exists.
pub struct Swapchain<T: HasDisplayHandle + HasWindowHandle> {
    device: Arc<Device>,
    surface: Arc<Surface<T>>,
    handle: vk::SwapchainKHR,
    id: u64,
    config: SwapchainConfig,
    images: Vec<vk::Image>,
    views: Vec<vk::ImageView>,
    /// `vkAcquireNextImageKHR` needs the swapchain externally synchronized.
    acquire_lock: Mutex<()>,
}

impl<T: HasDisplayHandle + HasWindowHandle> std::fmt::Debug for Swapchain<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Swapchain")
            .field("id", &self.id)
            .field("handle", &self.handle)
            .field("config", &self.config)
            .field("views", &self.views.len())
            .finish_non_exhaustive()
    }
}

impl<T: HasDisplayHandle + HasWindowHandle> Swapchain<T> {
    pub fn new(
        device: &Arc<Device>,
        surface: &Arc<Surface<T>>,
        desired_extent: vk::Extent2D,
        preferred_format: Option<vk::Format>,
    ) -> Result<Self, CreateSwapchainError> {
        Self::new_with_old(device, surface, desired_extent, None, preferred_format)
    }

    /// Build a swapchain for `surface`, retiring `old` if given.
    ///
    /// `old` must belong to the same device and surface. It remains valid
    /// afterwards, and the caller destroys it by dropping it once no GPU
    /// work uses it.
    pub fn new_with_old(
        device: &Arc<Device>,
        surface: &Arc<Surface<T>>,
        desired_extent: vk::Extent2D,
        old: Option<&Self>,
        preferred_format: Option<vk::Format>,
    ) -> Result<Self, CreateSwapchainError> {
        if !device.has_swapchain_support() {
            return Err(CreateSwapchainError::SwapchainNotEnabled);
        }
        check_extent(desired_extent)?;

        let same_instance = Arc::ptr_eq(surface.get_parent(), device.parent());
        let same_owner = old.is_none_or(|old| {
            Arc::ptr_eq(&old.device, device) && Arc::ptr_eq(&old.surface, surface)
        });
        if !(same_instance && same_owner) {
            return Err(CreateSwapchainError::MismatchedParams);
        }

        // SAFETY: the physical device and the surface share an instance,
        // checked above.
        let support = unsafe { surface.query_support(device.physical_device()) }?;
        let config =
            select_swapchain_config(&support, desired_extent, preferred_format)?;

        let (sharing_mode, families) = image_sharing(&device.queue_families());
        let create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(surface.raw_handle())
            .min_image_count(config.image_count)
            .image_format(config.surface_format.format)
            .image_color_space(config.surface_format.color_space)
            .image_extent(config.extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(sharing_mode)
            .queue_family_indices(&families)
            .pre_transform(config.pre_transform)
            .composite_alpha(config.composite_alpha)
            .present_mode(config.present_mode)
            .clipped(true)
            .old_swapchain(old.map_or(vk::SwapchainKHR::null(), |old| old.handle));

        // SAFETY: every value comes from this surface's own report and the
        // old swapchain, if any, is live.
        let handle = unsafe { device.create_raw_swapchain(&create_info) }?;
        let id = NEXT_SWAPCHAIN_ID.fetch_add(1, Ordering::Relaxed);
        name_object(device, handle, || format!("Swapchain {id}"));

        match Self::create_views(device, handle, id, config.surface_format.format) {
            Ok((images, views)) => {
                tracing::info!(
                    swapchain = id,
                    "Created {}x{} swapchain: {:?}, {:?}, {} images",
                    config.extent.width,
                    config.extent.height,
                    config.surface_format.format,
                    config.present_mode,
                    images.len(),
                );
                Ok(Self {
                    device: Arc::clone(device),
                    surface: Arc::clone(surface),
                    handle,
                    id,
                    config,
                    images,
                    views,
                    acquire_lock: Mutex::new(()),
                })
            }
            Err(e) => {
                // SAFETY: created above and not yet shared.
                unsafe { device.destroy_raw_swapchain(handle) };
                Err(e)
            }
        }
    }

    fn create_views(
        device: &Device,
        handle: vk::SwapchainKHR,
        id: u64,
        format: vk::Format,
    ) -> Result<(Vec<vk::Image>, Vec<vk::ImageView>), CreateSwapchainError> {
        // SAFETY: handle is a live swapchain of device.
        let images = unsafe { device.get_raw_swapchain_images(handle) }?;
        let views = create_all(
            images.iter().copied(),
            |index, image| {
                // SAFETY: image belongs to a swapchain of device.
                let view = unsafe {
                    device.create_raw_image_view(&color_view_info(image, format))
                }
                .map_err(|result| CreateSwapchainError::VulkanCreateImageView {
                    index,
                    result,
                })?;
                name_object(device, view, || format!("Swapchain {id} view {index}"));
                Ok::<_, CreateSwapchainError>(view)
            },
            // SAFETY: created just now and unused.
            |view| unsafe { device.destroy_raw_image_view(view) },
        )?;
        Ok((images, views))
    }

    pub fn config(&self) -> &SwapchainConfig {
        &self.config
    }

    pub fn format(&self) -> vk::Format {
        self.config.surface_format.format
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.config.extent
    }

    pub fn raw_handle(&self) -> vk::SwapchainKHR {
        self.handle
    }

    pub fn images(&self) -> &[vk::Image] {
        &self.images
    }

    /// Empty once [`destroy_image_views`](Self::destroy_image_views) ran.
    pub fn image_views(&self) -> &[vk::ImageView] {
        &self.views
    }

    /// # Safety
    /// No framebuffer or pending work may reference the views.
    pub unsafe fn destroy_image_views(&mut self) {
        for view in self.views.drain(..) {
            // SAFETY: caller contract.
            unsafe { self.device.destroy_raw_image_view(view) };
        }
    }

    /// `Ok((image_index, suboptimal))`, or `ERROR_OUT_OF_DATE_KHR` when
    /// the surface changed underneath.
    ///
    /// # Safety
    /// Non-null `semaphore` and `fence` must be unsignaled objects of this
    /// device with no pending signal.
    pub unsafe fn acquire_next_image(
        &self,
        timeout_ns: u64,
        semaphore: vk::Semaphore,
        fence: vk::Fence,
    ) -> Result<(u32, bool), vk::Result> {
        let _acquire = self.acquire_lock.lock().expect("acquire lock poisoned");
        // SAFETY: caller contract; the handle lives as long as self.
        unsafe {
            self.device
                .acquire_next_swapchain_image(self.handle, timeout_ns, semaphore, fence)
        }
    }

    /// Present `image_index` after `wait_semaphore` signals. `Ok(true)`
    /// means suboptimal.
    ///
    /// # Safety
    /// The image must have been acquired from this swapchain, and the work
    /// signaling `wait_semaphore` must leave it in `PRESENT_SRC_KHR`.
    pub unsafe fn present(
        &self,
        image_index: u32,
        wait_semaphore: vk::Semaphore,
    ) -> Result<bool, vk::Result> {
        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(std::slice::from_ref(&wait_semaphore))
            .swapchains(std::slice::from_ref(&self.handle))
            .image_indices(std::slice::from_ref(&image_index));
        // SAFETY: caller contract.
        unsafe { self.device.queue_present(&present_info) }
    }
}

fn name_object<H: vk::Handle>(device: &Device, object: H, name: impl FnOnce() -> String) {
    // SAFETY: every caller passes an object it just created from device.
    let named = unsafe { device.set_object_name_with(object, || CString::new(name()).ok()) };
    if let Err(e) = named {
        tracing::warn!("Failed to name swapchain object: {e}");
    }
}

impl<T: HasDisplayHandle + HasWindowHandle> Drop for Swapchain<T> {
    fn drop(&mut self) {
        tracing::debug!("Dropping swapchain {} ({:?})", self.id, self.handle);
        // SAFETY: owners drop a swapchain only after waiting for the device
        // or for every frame that used it.
        unsafe {
            self.destroy_image_views();
            self.device.destroy_raw_swapchain(self.handle);
        }
    }
}

#[cfg(test)]
mod tests {
    use ash::vk::Handle;

    use super::*;

    const fn extent(width: u32, height: u32) -> vk::Extent2D {
        vk::Extent2D { width, height }
    }

    const RGBA_UNORM: vk::SurfaceFormatKHR = vk::SurfaceFormatKHR {
        format: vk::Format::R8G8B8A8_UNORM,
        color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
    };

    fn resizable_surface() -> SurfaceSupportDetails {
        SurfaceSupportDetails {
            capabilities: vk::SurfaceCapabilitiesKHR {
                min_image_count: 2,
                current_extent: extent(UNDEFINED_EXTENT, UNDEFINED_EXTENT),
                min_image_extent: extent(1, 1),
                max_image_extent: extent(4096, 4096),
                supported_composite_alpha: vk::CompositeAlphaFlagsKHR::OPAQUE,
                current_transform: vk::SurfaceTransformFlagsKHR::IDENTITY,
                ..Default::default()
            },
            formats: vec![RGBA_UNORM, DEFAULT_SURFACE_FORMAT],
            present_modes: vec![vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX],
        }
    }

    #[test]
    fn format_preference_order() {
        let hdr = vk::SurfaceFormatKHR {
            format: vk::Format::R16G16B16A16_SFLOAT,
            color_space: vk::ColorSpaceKHR::EXTENDED_SRGB_LINEAR_EXT,
        };
        let both = [RGBA_UNORM, DEFAULT_SURFACE_FORMAT];

        assert_eq!(choose_surface_format(&both, None), Some(DEFAULT_SURFACE_FORMAT));
        assert_eq!(
            choose_surface_format(&both, Some(vk::Format::R8G8B8A8_UNORM)),
            Some(RGBA_UNORM)
        );
        // An unavailable preference falls through to the default.
        assert_eq!(
            choose_surface_format(&both, Some(vk::Format::R5G6B5_UNORM_PACK16)),
            Some(DEFAULT_SURFACE_FORMAT)
        );
        assert_eq!(choose_surface_format(&[hdr, RGBA_UNORM], None), Some(hdr));
        assert_eq!(choose_surface_format(&[], None), None);
    }

    #[test]
    fn mailbox_then_fifo() {
        use vk::PresentModeKHR as Mode;
        assert_eq!(choose_present_mode(&[Mode::FIFO, Mode::MAILBOX]), Mode::MAILBOX);
        assert_eq!(choose_present_mode(&[Mode::IMMEDIATE, Mode::FIFO]), Mode::FIFO);
        assert_eq!(choose_present_mode(&[Mode::IMMEDIATE]), Mode::FIFO);
    }

    #[test]
    fn fixed_current_extent_wins() {
        let caps = vk::SurfaceCapabilitiesKHR {
            current_extent: extent(1280, 720),
            ..Default::default()
        };
        assert_eq!(choose_extent(&caps, extent(1920, 1080)), extent(1280, 720));
    }

    #[test]
    fn undefined_extent_is_clamped() {
        let caps = vk::SurfaceCapabilitiesKHR {
            current_extent: extent(UNDEFINED_EXTENT, UNDEFINED_EXTENT),
            min_image_extent: extent(640, 480),
            max_image_extent: extent(1920, 1080),
            ..Default::default()
        };
        for (w, h) in [(4000, 200), (1, 1), (800, 600), (u32::MAX, 0)] {
            let chosen = choose_extent(&caps, extent(w, h));
            assert!((640..=1920).contains(&chosen.width), "{chosen:?}");
            assert!((480..=1080).contains(&chosen.height), "{chosen:?}");
        }
        assert_eq!(choose_extent(&caps, extent(4000, 200)), extent(1920, 480));
        assert_eq!(choose_extent(&caps, extent(800, 600)), extent(800, 600));
    }

    #[test]
    fn image_count_within_bounds() {
        for min in 1..6 {
            for max in [0, min, min + 1, min + 4] {
                let caps = vk::SurfaceCapabilitiesKHR {
                    min_image_count: min,
                    max_image_count: max,
                    ..Default::default()
                };
                let count = choose_image_count(&caps);
                assert!(count >= min);
                assert!(max == 0 || count <= max);
            }
        }
        let unbounded = vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            ..Default::default()
        };
        assert_eq!(choose_image_count(&unbounded), 3);
    }

    #[test]
    fn composite_alpha_order() {
        use vk::CompositeAlphaFlagsKHR as Alpha;
        let caps = |supported| vk::SurfaceCapabilitiesKHR {
            supported_composite_alpha: supported,
            ..Default::default()
        };
        assert_eq!(
            choose_composite_alpha(&caps(Alpha::PRE_MULTIPLIED | Alpha::OPAQUE)),
            Alpha::OPAQUE
        );
        assert_eq!(
            choose_composite_alpha(&caps(Alpha::POST_MULTIPLIED | Alpha::PRE_MULTIPLIED)),
            Alpha::PRE_MULTIPLIED
        );
        assert_eq!(choose_composite_alpha(&caps(Alpha::INHERIT)), Alpha::INHERIT);
    }

    #[test]
    fn resizable_surface_config() {
        let config = select_swapchain_config(&resizable_surface(), extent(1280, 720), None)
            .expect("config");
        assert_eq!(
            config,
            SwapchainConfig {
                surface_format: DEFAULT_SURFACE_FORMAT,
                present_mode: vk::PresentModeKHR::MAILBOX,
                extent: extent(1280, 720),
                image_count: 3,
                composite_alpha: vk::CompositeAlphaFlagsKHR::OPAQUE,
                pre_transform: vk::SurfaceTransformFlagsKHR::IDENTITY,
            }
        );
    }

    #[test]
    fn reselecting_with_pinned_format_is_stable() {
        let support = resizable_surface();
        let first = select_swapchain_config(&support, extent(1024, 768), None)
            .expect("first config");
        let pinned = Some(first.surface_format.format);
        for _ in 0..4 {
            let again = select_swapchain_config(&support, extent(1024, 768), pinned)
                .expect("repeated config");
            assert_eq!(again, first);
        }
    }

    #[test]
    fn zero_extents_are_rejected() {
        let mut support = resizable_surface();
        support.capabilities.current_extent = extent(0, 0);
        assert!(matches!(
            select_swapchain_config(&support, extent(800, 600), None),
            Err(CreateSwapchainError::InvalidExtent { width: 0, height: 0 })
        ));
        assert!(matches!(
            check_extent(extent(800, 0)),
            Err(CreateSwapchainError::InvalidExtent { width: 800, height: 0 })
        ));
    }

    #[test]
    fn empty_reports_are_rejected() {
        let mut no_formats = resizable_surface();
        no_formats.formats.clear();
        assert!(matches!(
            select_swapchain_config(&no_formats, extent(64, 64), None),
            Err(CreateSwapchainError::NoSurfaceFormats)
        ));

        let mut no_modes = resizable_surface();
        no_modes.present_modes.clear();
        assert!(matches!(
            select_swapchain_config(&no_modes, extent(64, 64), None),
            Err(CreateSwapchainError::NoPresentModes)
        ));
    }

    #[test]
    fn sharing_follows_queue_families() {
        let shared = QueueFamilies { graphics: 0, present: 0 };
        assert_eq!(image_sharing(&shared), (vk::SharingMode::EXCLUSIVE, vec![]));

        let split = QueueFamilies { graphics: 0, present: 2 };
        assert_eq!(image_sharing(&split), (vk::SharingMode::CONCURRENT, vec![0, 2]));
    }

    #[test]
    fn create_all_unwinds_on_failure() {
        let mut undone = Vec::new();
        let result = create_all(
            [10, 11, 12],
            |index, input| if index < 2 { Ok(input) } else { Err(index) },
            |made| undone.push(made),
        );
        assert_eq!(result, Err(2));
        assert_eq!(undone, [10, 11]);
    }

    #[test]
    fn failed_view_reports_its_index() {
        let created = |index: usize| -> Result<vk::ImageView, vk::Result> {
            if index == 1 {
                Err(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY)
            } else {
                Ok(vk::ImageView::from_raw(index as u64 + 1))
            }
        };
        let mut undone = Vec::new();
        let result = create_all(
            0..3,
            |index, _| {
                let view = created(index)
                    .map_err(|result| CreateSwapchainError::VulkanCreateImageView { index, result })?;
                Ok::<_, CreateSwapchainError>(view)
            },
            |view| undone.push(view),
        );
        assert!(matches!(
            result,
            Err(CreateSwapchainError::VulkanCreateImageView {
                index: 1,
                result: vk::Result::ERROR_OUT_OF_DEVICE_MEMORY,
            })
        ));
        assert_eq!(undone, [vk::ImageView::from_raw(1)]);
    }

    #[test]
    fn create_all_keeps_order() {
        let result: Result<Vec<_>, ()> =
            create_all(["a", "b"], |index, input| Ok((index, input)), |_| {
                panic!("nothing to undo on success")
            });
        assert_eq!(result, Ok(vec![(0, "a"), (1, "b")]));
    }
}
