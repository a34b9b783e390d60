//! Physical device probing and queue family choice.

use std::ffi::CStr;

use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};

use super::DeviceConfig;
use crate::instance::{Instance, VkVersion};
use crate::surface::{Surface, SurfaceQueryError};

/// Queue family indices for graphics and present. Both may name the same
/// family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFamilies {
    pub graphics: u32,
    pub present: u32,
}

impl QueueFamilies {
    pub fn is_shared(&self) -> bool {
        self.graphics == self.present
    }

    /// Each family once, graphics first.
    pub fn unique(&self) -> Vec<u32> {
        let mut families = vec![self.graphics];
        if !self.is_shared() {
            families.push(self.present);
        }
        families
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QueueMode {
    /// One family for both roles when there is one, two otherwise.
    #[default]
    Auto,
    /// Only a family that can both draw and present will do.
    Unified,
}

/// Choose queue families for graphics and present.
///
/// `supports_present` runs exactly once for each family index.
pub fn select_queue_families(
    families: &[vk::QueueFamilyProperties],
    mut supports_present: impl FnMut(u32) -> bool,
    mode: QueueMode,
) -> Option<QueueFamilies> {
    let roles: Vec<(bool, bool)> = families
        .iter()
        .zip(0u32..)
        .map(|(props, index)| {
            let graphics = props.queue_count > 0
                && props.queue_flags.contains(vk::QueueFlags::GRAPHICS);
            (graphics, supports_present(index))
        })
        .collect();

    let first = |pred: fn(&(bool, bool)) -> bool| {
        roles.iter().position(pred).map(|i| i as u32)
    };

    if let Some(both) = first(|&(g, p)| g && p) {
        return Some(QueueFamilies {
            graphics: both,
            present: both,
        });
    }
    if mode == QueueMode::Unified {
        return None;
    }
    Some(QueueFamilies {
        graphics: first(|&(g, _)| g)?,
        present: first(|&(_, p)| p)?,
    })
}

/// Discrete beats integrated beats virtual beats the rest.
pub(super) fn device_type_priority(ty: vk::PhysicalDeviceType) -> u32 {
    use vk::PhysicalDeviceType as T;
    match ty {
        T::DISCRETE_GPU => 3,
        T::INTEGRATED_GPU => 2,
        T::VIRTUAL_GPU => 1,
        _ => 0,
    }
}

/// Extensions a device created for `config` enables.
pub(super) fn required_extensions(
    config: &DeviceConfig,
    sync2_extension: bool,
) -> Vec<&'static CStr> {
    [
        (config.swapchain, ash::khr::swapchain::NAME),
        (sync2_extension, ash::khr::synchronization2::NAME),
        (
            config.dynamic_polygon_mode,
            ash::ext::extended_dynamic_state3::NAME,
        ),
    ]
    .into_iter()
    .filter_map(|(wanted, name)| wanted.then_some(name))
    .collect()
}

/// Why a physical device was passed over.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) enum Rejection {
    ExtensionQuery(vk::Result),
    MissingExtension(&'static CStr),
    NoDynamicPolygonMode {
        extension: bool,
        fill_mode_non_solid: bool,
    },
    NoQueues(QueueMode),
    SurfaceQuery(vk::Result),
    NoSurfaceFormats,
}

impl std::fmt::Display for Rejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ExtensionQuery(e) => {
                write!(f, "could not list device extensions: {e}")
            }
            Self::MissingExtension(name) => write!(f, "lacks {name:?}"),
            Self::NoDynamicPolygonMode {
                extension,
                fill_mode_non_solid,
            } => write!(
                f,
                "no dynamic polygon mode (extension: {extension}, \
                 fillModeNonSolid: {fill_mode_non_solid})"
            ),
            Self::NoQueues(mode) => {
                write!(f, "no graphics and present families in {mode:?} mode")
            }
            Self::SurfaceQuery(e) => write!(f, "could not query the surface: {e}"),
            Self::NoSurfaceFormats => {
                write!(f, "surface offers no formats or present modes")
            }
        }
    }
}

/// A physical device that meets every requirement.
#[derive(Debug, Clone, Copy)]
pub(super) struct Candidate {
    pub handle: vk::PhysicalDevice,
    pub props: vk::PhysicalDeviceProperties,
    pub queue_families: QueueFamilies,
    pub sync2_extension: bool,
    pub fill_mode_non_solid: bool,
}

impl Candidate {
    pub fn priority(&self) -> u32 {
        device_type_priority(self.props.device_type)
    }

    pub fn name(&self) -> &CStr {
        self.props.device_name_as_c_str().unwrap_or(c"unknown")
    }
}

/// Check `dev` against `config` and `surf`.
///
/// # Safety
/// `dev` and `surf` must come from `instance`.
pub(super) unsafe fn probe<T: HasDisplayHandle + HasWindowHandle>(
    instance: &Instance,
    surf: &Surface<T>,
    dev: vk::PhysicalDevice,
    config: &DeviceConfig,
) -> Result<Candidate, Rejection> {
    // SAFETY: dev comes from instance.
    let props = unsafe { instance.get_raw_physical_device_properties(dev) };
    let pre_1_3 = VkVersion::from_raw(props.api_version).is_pre_1_3();

    let extensions = if config.swapchain || pre_1_3 || config.dynamic_polygon_mode
    {
        // SAFETY: dev comes from instance.
        unsafe { instance.enumerate_raw_device_extension_properties(dev) }
            .map_err(Rejection::ExtensionQuery)?
    } else {
        Vec::new()
    };
    let has = |name: &CStr| {
        extensions
            .iter()
            .any(|e| e.extension_name_as_c_str() == Ok(name))
    };
    let require = |name: &'static CStr| {
        if has(name) {
            Ok(())
        } else {
            Err(Rejection::MissingExtension(name))
        }
    };

    if config.swapchain {
        require(ash::khr::swapchain::NAME)?;
    }
    // synchronization2 became core in 1.3.
    if pre_1_3 {
        require(ash::khr::synchronization2::NAME)?;
    }

    let eds3_listed = has(ash::ext::extended_dynamic_state3::NAME);
    let mut eds3 = vk::PhysicalDeviceExtendedDynamicState3FeaturesEXT::default();
    let mut features = vk::PhysicalDeviceFeatures2::default();
    if eds3_listed {
        features = features.push_next(&mut eds3);
    }
    // SAFETY: dev comes from instance; the chain only names an extension
    // the device lists.
    unsafe { instance.get_raw_physical_device_features2(dev, &mut features) };
    let fill_mode_non_solid = features.features.fill_mode_non_solid == vk::TRUE;
    let dynamic_polygon_mode =
        eds3_listed && eds3.extended_dynamic_state3_polygon_mode == vk::TRUE;

    if config.dynamic_polygon_mode && !(dynamic_polygon_mode && fill_mode_non_solid)
    {
        return Err(Rejection::NoDynamicPolygonMode {
            extension: dynamic_polygon_mode,
            fill_mode_non_solid,
        });
    }

    // SAFETY: dev comes from instance.
    let families =
        unsafe { instance.get_raw_physical_device_queue_family_properties(dev) };
    let queue_families = select_queue_families(
        &families,
        // SAFETY: dev and surf share instance.
        |index| unsafe { surf.supports_queue_family(dev, index) }.unwrap_or(false),
        config.queue_mode,
    )
    .ok_or(Rejection::NoQueues(config.queue_mode))?;

    if config.swapchain {
        // SAFETY: dev and surf share instance.
        let support = unsafe { surf.query_support(dev) }.map_err(|e| match e {
            SurfaceQueryError::Vulkan(e) => Rejection::SurfaceQuery(e),
            SurfaceQueryError::ExtensionNotLoaded => {
                Rejection::SurfaceQuery(vk::Result::ERROR_EXTENSION_NOT_PRESENT)
            }
        })?;
        if !support.is_adequate() {
            return Err(Rejection::NoSurfaceFormats);
        }
    }

    Ok(Candidate {
        handle: dev,
        props,
        queue_families,
        sync2_extension: pre_1_3,
        fill_mode_non_solid,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn family(flags: vk::QueueFlags) -> vk::QueueFamilyProperties {
        vk::QueueFamilyProperties {
            queue_flags: flags,
            queue_count: 1,
            ..Default::default()
        }
    }

    const GFX: vk::QueueFlags = vk::QueueFlags::GRAPHICS;
    const XFER: vk::QueueFlags = vk::QueueFlags::TRANSFER;

    #[test]
    fn family_doing_both_wins() {
        let families = [family(GFX), family(XFER), family(GFX)];
        let present = [false, true, true];
        assert_eq!(
            select_queue_families(&families, |i| present[i as usize], QueueMode::Auto),
            Some(QueueFamilies {
                graphics: 2,
                present: 2
            })
        );
    }

    #[test]
    fn auto_mode_splits_roles() {
        let families = [family(GFX), family(XFER)];
        let selected =
            select_queue_families(&families, |i| i == 1, QueueMode::Auto)
                .expect("split families");
        assert_eq!((selected.graphics, selected.present), (0, 1));
        assert!(!selected.is_shared());
        assert_eq!(selected.unique(), vec![0, 1]);
    }

    #[test]
    fn unified_mode_refuses_split() {
        let families = [family(GFX), family(XFER)];
        assert_eq!(
            select_queue_families(&families, |i| i == 1, QueueMode::Unified),
            None
        );
    }

    #[test]
    fn no_presenting_family_means_none() {
        assert_eq!(
            select_queue_families(&[family(GFX)], |_| false, QueueMode::Auto),
            None
        );
    }

    #[test]
    fn zero_queue_family_cannot_draw() {
        let mut empty = family(GFX);
        empty.queue_count = 0;
        let selected =
            select_queue_families(&[empty, family(GFX)], |_| true, QueueMode::Unified);
        assert_eq!(selected.map(|q| q.graphics), Some(1));
        assert_eq!(selected.map(|q| q.unique()), Some(vec![1]));
    }

    #[test]
    fn present_query_runs_once_per_family() {
        let families = [family(GFX), family(GFX), family(XFER)];
        let mut asked = Vec::new();
        select_queue_families(
            &families,
            |i| {
                asked.push(i);
                false
            },
            QueueMode::Auto,
        );
        assert_eq!(asked, vec![0, 1, 2]);
    }

    #[test]
    fn discrete_gpus_rank_first() {
        use vk::PhysicalDeviceType as T;
        let mut types = [T::CPU, T::VIRTUAL_GPU, T::DISCRETE_GPU, T::INTEGRATED_GPU];
        types.sort_by_key(|t| std::cmp::Reverse(device_type_priority(*t)));
        assert_eq!(
            types,
            [T::DISCRETE_GPU, T::INTEGRATED_GPU, T::VIRTUAL_GPU, T::CPU]
        );
    }

    #[test]
    fn extensions_follow_config() {
        let plain = DeviceConfig::default();
        assert!(required_extensions(&plain, false).is_empty());

        let full = DeviceConfig {
            swapchain: true,
            dynamic_polygon_mode: true,
            ..Default::default()
        };
        assert_eq!(
            required_extensions(&full, true),
            vec![
                ash::khr::swapchain::NAME,
                ash::khr::synchronization2::NAME,
                ash::ext::extended_dynamic_state3::NAME,
            ]
        );
    }

    #[test]
    fn rejections_read_well_in_logs() {
        let text = Rejection::MissingExtension(ash::khr::swapchain::NAME).to_string();
        assert!(text.contains("VK_KHR_swapchain"));
        assert!(Rejection::NoQueues(QueueMode::Unified)
            .to_string()
            .contains("Unified"));
        assert!(Rejection::NoSurfaceFormats.to_string().contains("present modes"));
    }
}
