//! The Vulkan instance.
//!
//! [`Instance`] owns the loaded entry points, the `VkInstance`, the
//! validation messenger when one was set up and the surface loader when
//! surfaces were requested. Everything else holds an `Arc<Instance>`.

use std::ffi::{CStr, CString, c_char};

use ash::vk;
use raw_window_handle::HasDisplayHandle;
use thiserror::Error;

const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

/// `tracing` target for messages coming from the validation layer.
pub const VALIDATION_LOG_TARGET: &str = "vkframe-validation";

/// Lowest validation message severity that gets logged.
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone, Copy)]
pub enum VulkanLogLevel {
    Verbose,
    Info,
    Warning,
    Error,
}

impl VulkanLogLevel {
    fn message_severity(self) -> vk::DebugUtilsMessageSeverityFlagsEXT {
        use vk::DebugUtilsMessageSeverityFlagsEXT as S;
        [
            (Self::Verbose, S::VERBOSE),
            (Self::Info, S::INFO),
            (Self::Warning, S::WARNING),
            (Self::Error, S::ERROR),
        ]
        .into_iter()
        .filter(|(level, _)| *level >= self)
        .fold(S::empty(), |acc, (_, bit)| acc | bit)
    }
}

/// Packed `major.minor.patch` API version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VkVersion(u32);

impl VkVersion {
    pub fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    pub fn major(&self) -> u32 {
        vk::api_version_major(self.0)
    }

    pub fn minor(&self) -> u32 {
        vk::api_version_minor(self.0)
    }

    pub fn patch(&self) -> u32 {
        vk::api_version_patch(self.0)
    }

    /// Before 1.3, synchronization2 is an extension.
    pub fn is_pre_1_3(&self) -> bool {
        (self.major(), self.minor()) < (1, 3)
    }
}

impl std::fmt::Display for VkVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.major(), self.minor(), self.patch())
    }
}

#[derive(Debug, Error)]
pub enum InstanceCreationError {
    #[error("Could not load the Vulkan library: {0}")]
    Loading(ash::LoadingError),
    #[error("Display handle unavailable: {0}")]
    InvalidDisplayHandle(crate::RwhHandleError),
    #[error("Vulkan lacks required instance extensions: {0:?}")]
    MissingExtensions(Vec<String>),
    #[error("Validation is required but {0} is not installed")]
    MissingValidationLayer(&'static str),
    #[error("Vulkan error creating instance: {0}")]
    UnknownVulkan(vk::Result),
    #[error("Application name contains a NUL byte")]
    InvalidAppName,
}

impl InstanceCreationError {
    /// The Vulkan installation lacks something that was asked for. Driver
    /// failures are not preconditions.
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            Self::MissingExtensions(_) | Self::MissingValidationLayer(_)
        )
    }
}

impl From<vk::Result> for InstanceCreationError {
    fn from(value: vk::Result) -> Self {
        Self::UnknownVulkan(value)
    }
}

#[derive(Debug, Error)]
pub enum FetchPhysicalDeviceError {
    #[error("Out of memory listing physical devices")]
    MemoryExhaustion,
    #[error("Vulkan error listing physical devices: {0}")]
    UnknownVulkan(vk::Result),
}

/// Options for [`Instance::new`].
#[derive(Debug, Default, Clone, Copy)]
pub struct InstanceConfig {
    /// Enable the platform surface extensions. Needs a display handle.
    pub surface: bool,
    /// Fail instead of running unvalidated when the Khronos layer or
    /// `VK_EXT_debug_utils` is missing.
    pub require_validation: bool,
}

/// Names from `wanted` that `available` does not list.
fn missing_extensions(
    wanted: &[&CStr],
    available: &[vk::ExtensionProperties],
) -> Vec<String> {
    wanted
        .iter()
        .filter(|name| {
            !available
                .iter()
                .any(|ext| ext.extension_name_as_c_str() == Ok(**name))
        })
        .map(|name| name.to_string_lossy().into_owned())
        .collect()
}

/// The severity to validate at, if any. Requiring validation without a
/// level means warnings and up.
fn validation_level(
    requested: Option<VulkanLogLevel>,
    required: bool,
) -> Option<VulkanLogLevel> {
    requested.or(required.then_some(VulkanLogLevel::Warning))
}

fn check_required_validation(
    required: bool,
    layer: bool,
    debug_utils: bool,
) -> Result<(), InstanceCreationError> {
    match (required, layer, debug_utils) {
        (true, false, _) => Err(InstanceCreationError::MissingValidationLayer(
            "VK_LAYER_KHRONOS_validation",
        )),
        (true, true, false) => {
            Err(InstanceCreationError::MissingValidationLayer("VK_EXT_debug_utils"))
        }
        _ => Ok(()),
    }
}

fn message_kind(ty: vk::DebugUtilsMessageTypeFlagsEXT) -> &'static str {
    use vk::DebugUtilsMessageTypeFlagsEXT as T;
    if ty.contains(T::VALIDATION) {
        "validation"
    } else if ty.contains(T::PERFORMANCE) {
        "performance"
    } else {
        "general"
    }
}

unsafe extern "system" fn forward_validation_message(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    ty: vk::DebugUtilsMessageTypeFlagsEXT,
    data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    use vk::DebugUtilsMessageSeverityFlagsEXT as S;
    // SAFETY: the layer keeps data and its message alive during the call.
    let message = unsafe { (*data).message_as_c_str() }
        .map(CStr::to_string_lossy)
        .unwrap_or_default();
    let kind = message_kind(ty);
    if severity.contains(S::ERROR) {
        tracing::error!(target: VALIDATION_LOG_TARGET, kind, "{message}");
    } else if severity.contains(S::WARNING) {
        tracing::warn!(target: VALIDATION_LOG_TARGET, kind, "{message}");
    } else if severity.contains(S::INFO) {
        tracing::info!(target: VALIDATION_LOG_TARGET, kind, "{message}");
    } else {
        tracing::trace!(target: VALIDATION_LOG_TARGET, kind, "{message}");
    }
    vk::FALSE
}

fn messenger_info(
    level: VulkanLogLevel,
) -> vk::DebugUtilsMessengerCreateInfoEXT<'static> {
    vk::DebugUtilsMessengerCreateInfoEXT::default()
        .message_severity(level.message_severity())
        .message_type(
            vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
        )
        .pfn_user_callback(Some(forward_validation_message))
}

struct Messenger {
    loader: ash::ext::debug_utils::Instance,
    handle: vk::DebugUtilsMessengerEXT,
}

pub struct Instance {
    entry: ash::Entry,
    handle: ash::Instance,
    messenger: Option<Messenger>,
    surface_loader: Option<ash::khr::surface::Instance>,
    version: VkVersion,
}

impl std::fmt::Debug for Instance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Instance")
            .field("handle", &self.handle.handle())
            .field("version", &format_args!("{}", self.version))
            .field("validation", &self.messenger.is_some())
            .finish_non_exhaustive()
    }
}

impl Drop for Instance {
    fn drop(&mut self) {
        tracing::debug!("Dropping instance {:?}", self.handle.handle());
        if let Some(messenger) = self.messenger.take() {
            // SAFETY: created from this instance and destroyed only here.
            unsafe {
                messenger
                    .loader
                    .destroy_debug_utils_messenger(messenger.handle, None)
            };
        }
        // SAFETY: children hold an Arc to the instance, so none remain.
        unsafe { self.handle.destroy_instance(None) };
    }
}

impl Instance {
    /// Load Vulkan and create an instance at the newest API version the
    /// loader offers.
    ///
    /// Validation runs when `log_level` is given or `config` requires it,
    /// and the layer is installed. Messages at or above the level go to
    /// `tracing` under [`VALIDATION_LOG_TARGET`].
    ///
    /// # Safety
    /// Loading the Vulkan library runs its initialisation code.
    pub unsafe fn new(
        app_name: impl AsRef<str>,
        log_level: Option<VulkanLogLevel>,
        display: Option<&impl HasDisplayHandle>,
        config: InstanceConfig,
    ) -> Result<Self, InstanceCreationError> {
        use InstanceCreationError as Error;

        let app_name =
            CString::new(app_name.as_ref()).map_err(|_| Error::InvalidAppName)?;
        // SAFETY: forwarded to the caller. The entry is dropped after the
        // instance since Drop destroys the instance first.
        let entry = unsafe { ash::Entry::load() }.map_err(Error::Loading)?;
        // SAFETY: entry is loaded.
        let api_version = match unsafe { entry.try_enumerate_instance_version() } {
            Ok(Some(version)) => version,
            _ => vk::API_VERSION_1_0,
        };

        let mut extensions: Vec<&CStr> = Vec::new();
        let surface = config.surface && display.is_some();
        if let Some(display) = display.filter(|_| config.surface) {
            let raw = display
                .display_handle()
                .map_err(Error::InvalidDisplayHandle)?
                .as_raw();
            for &ptr in ash_window::enumerate_required_extensions(raw)? {
                // SAFETY: ash_window hands out static NUL-terminated names.
                extensions.push(unsafe { CStr::from_ptr(ptr) });
            }
        }

        // SAFETY: entry is loaded.
        let available = unsafe { entry.enumerate_instance_extension_properties(None) }?;
        let missing = missing_extensions(&extensions, &available);
        if !missing.is_empty() {
            return Err(Error::MissingExtensions(missing));
        }

        let debug_utils = missing_extensions(&[ash::ext::debug_utils::NAME], &available)
            .is_empty();
        // SAFETY: entry is loaded.
        let layer = unsafe { entry.enumerate_instance_layer_properties() }
            .unwrap_or_default()
            .iter()
            .any(|l| l.layer_name_as_c_str() == Ok(VALIDATION_LAYER));
        check_required_validation(config.require_validation, layer, debug_utils)?;

        let validation = match validation_level(log_level, config.require_validation) {
            Some(level) if layer && debug_utils => Some(level),
            Some(_) => {
                tracing::warn!(
                    "Running without validation (layer installed: {layer}, \
                     debug utils: {debug_utils})"
                );
                None
            }
            None => None,
        };

        let mut layers: Vec<*const c_char> = Vec::new();
        if validation.is_some() {
            extensions.push(ash::ext::debug_utils::NAME);
            layers.push(VALIDATION_LAYER.as_ptr());
        }
        let extension_ptrs: Vec<*const c_char> =
            extensions.iter().map(|e| e.as_ptr()).collect();

        let app_info = vk::ApplicationInfo::default()
            .application_name(&app_name)
            .application_version(vk::make_api_version(0, 0, 1, 0))
            .engine_name(c"vkframe")
            .engine_version(vk::make_api_version(0, 0, 1, 0))
            .api_version(api_version);
        // Chained so instance creation itself is validated.
        let mut creation_messenger = validation.map(messenger_info);
        let mut create_info = vk::InstanceCreateInfo::default()
            .application_info(&app_info)
            .enabled_extension_names(&extension_ptrs)
            .enabled_layer_names(&layers);
        if let Some(info) = creation_messenger.as_mut() {
            create_info = create_info.push_next(info);
        }
        // SAFETY: create_info and everything it points at outlive the call.
        let handle = unsafe { entry.create_instance(&create_info, None) }?;

        let messenger = validation.and_then(|level| {
            let loader = ash::ext::debug_utils::Instance::new(&entry, &handle);
            // SAFETY: the loader was built for this instance.
            match unsafe { loader.create_debug_utils_messenger(&messenger_info(level), None) } {
                Ok(handle) => Some(Messenger { loader, handle }),
                Err(e) => {
                    tracing::error!("No validation output, messenger creation failed: {e}");
                    None
                }
            }
        });
        let surface_loader =
            surface.then(|| ash::khr::surface::Instance::new(&entry, &handle));

        let version = VkVersion::from_raw(api_version);
        tracing::info!(
            "Created Vulkan {version} instance (validation: {})",
            messenger.is_some()
        );

        Ok(Self {
            entry,
            handle,
            messenger,
            surface_loader,
            version,
        })
    }

    pub(crate) fn entry(&self) -> &ash::Entry {
        &self.entry
    }

    pub fn ash_instance(&self) -> &ash::Instance {
        &self.handle
    }

    pub(crate) fn surface_loader(&self) -> Option<&ash::khr::surface::Instance> {
        self.surface_loader.as_ref()
    }

    pub fn fetch_raw_physical_devices(
        &self,
    ) -> Result<Vec<vk::PhysicalDevice>, FetchPhysicalDeviceError> {
        // SAFETY: the instance is live.
        unsafe { self.handle.enumerate_physical_devices() }.map_err(|e| match e {
            vk::Result::ERROR_OUT_OF_HOST_MEMORY | vk::Result::ERROR_OUT_OF_DEVICE_MEMORY => {
                FetchPhysicalDeviceError::MemoryExhaustion
            }
            e => FetchPhysicalDeviceError::UnknownVulkan(e),
        })
    }

    /// # Safety
    /// `dev` must come from this instance.
    pub unsafe fn get_raw_physical_device_properties(
        &self,
        dev: vk::PhysicalDevice,
    ) -> vk::PhysicalDeviceProperties {
        // SAFETY: forwarded.
        unsafe { self.handle.get_physical_device_properties(dev) }
    }

    /// # Safety
    /// `dev` must come from this instance.
    pub unsafe fn get_raw_physical_device_queue_family_properties(
        &self,
        dev: vk::PhysicalDevice,
    ) -> Vec<vk::QueueFamilyProperties> {
        // SAFETY: forwarded.
        unsafe { self.handle.get_physical_device_queue_family_properties(dev) }
    }

    /// # Safety
    /// `dev` must come from this instance.
    pub unsafe fn get_raw_physical_device_memory_properties(
        &self,
        dev: vk::PhysicalDevice,
    ) -> vk::PhysicalDeviceMemoryProperties {
        // SAFETY: forwarded.
        unsafe { self.handle.get_physical_device_memory_properties(dev) }
    }

    /// # Safety
    /// `dev` must come from this instance and every structure chained into
    /// `features` must belong to an extension the device lists.
    pub unsafe fn get_raw_physical_device_features2(
        &self,
        dev: vk::PhysicalDevice,
        features: &mut vk::PhysicalDeviceFeatures2<'_>,
    ) {
        // SAFETY: forwarded.
        unsafe { self.handle.get_physical_device_features2(dev, features) }
    }

    /// # Safety
    /// `dev` must come from this instance.
    pub unsafe fn enumerate_raw_device_extension_properties(
        &self,
        dev: vk::PhysicalDevice,
    ) -> Result<Vec<vk::ExtensionProperties>, vk::Result> {
        // SAFETY: forwarded.
        unsafe { self.handle.enumerate_device_extension_properties(dev) }
    }

    /// # Safety
    /// `dev` must come from this instance and `info` must only enable what
    /// the device supports.
    pub unsafe fn create_ash_device(
        &self,
        dev: vk::PhysicalDevice,
        info: &vk::DeviceCreateInfo<'_>,
    ) -> Result<ash::Device, vk::Result> {
        // SAFETY: forwarded.
        unsafe { self.handle.create_device(dev, info, None) }
    }

    pub fn create_swapchain_loader(&self, device: &ash::Device) -> ash::khr::swapchain::Device {
        ash::khr::swapchain::Device::new(&self.handle, device)
    }

    pub fn create_synchronization2_loader(
        &self,
        device: &ash::Device,
    ) -> ash::khr::synchronization2::Device {
        ash::khr::synchronization2::Device::new(&self.handle, device)
    }

    pub fn create_extended_dynamic_state3_loader(
        &self,
        device: &ash::Device,
    ) -> ash::ext::extended_dynamic_state3::Device {
        ash::ext::extended_dynamic_state3::Device::new(&self.handle, device)
    }

    /// Object naming is only wired up when validation is.
    pub fn create_debug_utils_device_loader(
        &self,
        device: &ash::Device,
    ) -> Option<ash::ext::debug_utils::Device> {
        self.messenger
            .as_ref()
            .map(|_| ash::ext::debug_utils::Device::new(&self.handle, device))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ext(name: &CStr) -> vk::ExtensionProperties {
        let mut props = vk::ExtensionProperties::default();
        for (dst, src) in props.extension_name.iter_mut().zip(name.to_bytes()) {
            *dst = *src as c_char;
        }
        props
    }

    #[test]
    fn version_parts_and_display() {
        let v = VkVersion::from_raw(vk::make_api_version(0, 1, 3, 275));
        assert_eq!((v.major(), v.minor(), v.patch()), (1, 3, 275));
        assert_eq!(v.to_string(), "1.3.275");
        assert!(!v.is_pre_1_3());
        assert!(VkVersion::from_raw(vk::API_VERSION_1_2).is_pre_1_3());
        assert!(VkVersion::from_raw(vk::API_VERSION_1_0).is_pre_1_3());
        assert!(!VkVersion::from_raw(vk::make_api_version(0, 1, 4, 0)).is_pre_1_3());
    }

    #[test]
    fn severity_includes_everything_above_level() {
        use vk::DebugUtilsMessageSeverityFlagsEXT as S;
        assert_eq!(VulkanLogLevel::Error.message_severity(), S::ERROR);
        assert_eq!(
            VulkanLogLevel::Warning.message_severity(),
            S::WARNING | S::ERROR
        );
        assert_eq!(
            VulkanLogLevel::Verbose.message_severity(),
            S::VERBOSE | S::INFO | S::WARNING | S::ERROR
        );
    }

    #[test]
    fn reports_only_absent_extensions() {
        let available = [ext(c"VK_KHR_surface")];
        assert!(missing_extensions(&[c"VK_KHR_surface"], &available).is_empty());
        assert_eq!(
            missing_extensions(&[c"VK_KHR_surface", c"VK_KHR_xcb_surface"], &available),
            vec!["VK_KHR_xcb_surface".to_owned()]
        );
    }

    #[test]
    fn required_validation_defaults_to_warnings() {
        assert_eq!(validation_level(None, false), None);
        assert_eq!(validation_level(None, true), Some(VulkanLogLevel::Warning));
        assert_eq!(
            validation_level(Some(VulkanLogLevel::Info), true),
            Some(VulkanLogLevel::Info)
        );
    }

    #[test]
    fn required_validation_needs_layer_and_messenger() {
        assert!(check_required_validation(false, false, false).is_ok());
        assert!(check_required_validation(true, true, true).is_ok());
        let err = check_required_validation(true, false, true).unwrap_err();
        assert!(err.is_precondition());
        assert!(matches!(
            check_required_validation(true, true, false),
            Err(InstanceCreationError::MissingValidationLayer("VK_EXT_debug_utils"))
        ));
    }

    #[test]
    fn driver_errors_are_not_preconditions() {
        assert!(InstanceCreationError::MissingExtensions(vec![]).is_precondition());
        assert!(
            !InstanceCreationError::from(vk::Result::ERROR_INITIALIZATION_FAILED)
                .is_precondition()
        );
    }

    #[test]
    fn message_kind_prefers_validation() {
        use vk::DebugUtilsMessageTypeFlagsEXT as T;
        assert_eq!(message_kind(T::VALIDATION | T::PERFORMANCE), "validation");
        assert_eq!(message_kind(T::PERFORMANCE), "performance");
        assert_eq!(message_kind(T::GENERAL), "general");
    }
}
