//! The logical device ([`Device`]) and everything hanging off it.
//!
//! A `Device` owns the `VkDevice`, its `gpu-allocator` allocator, the
//! extension loaders the frame engine uses and the graphics and present
//! queues. Siblings reach Vulkan through the `unsafe fn` forwards in
//! `commands`, never through `ash::Device` directly.

mod commands;
mod memory;
mod selection;

use std::ffi::{CStr, CString};
use std::sync::{Arc, Mutex};

use ash::vk;
use gpu_allocator::{
    AllocationError,
    vulkan::{Allocator, AllocatorCreateDesc},
};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use thiserror::Error;

use crate::instance::{FetchPhysicalDeviceError, Instance};
use crate::surface::{Surface, SurfaceSupportError};

pub use memory::MemoryUsage;
pub use selection::{QueueFamilies, QueueMode, select_queue_families};

use selection::{Candidate, probe, required_extensions};

/// Where `vkQueueSubmit2` comes from.
enum Synchronization2Loader {
    Core,
    Extension(ash::khr::synchronization2::Device),
}

#[derive(Debug, Error)]
pub enum CreateCompatibleError {
    #[error("Surface belongs to a different instance than the device")]
    MismatchedParams,

    #[error("Out of memory listing physical devices")]
    MemoryExhaustion,

    #[error("Vulkan error listing physical devices: {0}")]
    UnknownVulkan(vk::Result),

    #[error("No physical device meets the requested configuration")]
    NoSuitableDevice,

    #[error("No physical device can both draw and present to this surface")]
    NoGraphicsPresentQueue,

    #[error("Vulkan error creating logical device: {0}")]
    DeviceCreationFailed(vk::Result),

    #[error("Could not query surface support: {0}")]
    SurfaceSupport(#[from] SurfaceSupportError),

    #[error("Could not create memory allocator: {0}")]
    AllocatorCreation(AllocationError),
}

impl CreateCompatibleError {
    /// True when the machine simply has no device that fits, as opposed to
    /// a runtime failure.
    pub fn is_precondition(&self) -> bool {
        matches!(self, Self::NoSuitableDevice | Self::NoGraphicsPresentQueue)
    }
}

impl From<FetchPhysicalDeviceError> for CreateCompatibleError {
    fn from(value: FetchPhysicalDeviceError) -> Self {
        match value {
            FetchPhysicalDeviceError::MemoryExhaustion => Self::MemoryExhaustion,
            FetchPhysicalDeviceError::UnknownVulkan(e) => Self::UnknownVulkan(e),
        }
    }
}

#[derive(Debug, Error)]
pub enum DynamicPolygonModeError {
    #[error("Dynamic polygon mode was not enabled on this device")]
    NotEnabled,
}

#[derive(Debug, Error)]
pub enum NameObjectError {
    #[error("Object name contains a NUL byte: {0}")]
    InvalidName(std::ffi::NulError),

    #[error("Vulkan error naming object: {0}")]
    Vulkan(vk::Result),
}

/// What the device must support.
#[derive(Debug, Default, Clone, Copy)]
pub struct DeviceConfig {
    /// Enable `VK_KHR_swapchain`.
    pub swapchain: bool,
    pub queue_mode: QueueMode,
    /// Enable `VK_EXT_extended_dynamic_state3` polygon mode together with
    /// `fillModeNonSolid`.
    pub dynamic_polygon_mode: bool,
}

pub struct Device {
    parent: Arc<Instance>,
    allocator: Option<Mutex<Allocator>>,
    handle: ash::Device,
    physical_device: vk::PhysicalDevice,
    properties: vk::PhysicalDeviceProperties,
    memory_properties: vk::PhysicalDeviceMemoryProperties,
    swapchain_device: Option<ash::khr::swapchain::Device>,
    debug_utils_device: Option<ash::ext::debug_utils::Device>,
    extended_dynamic_state3: Option<ash::ext::extended_dynamic_state3::Device>,
    synchronization2: Synchronization2Loader,
    fill_mode_non_solid: bool,
    queue_families: QueueFamilies,
    /// When both roles share a family these are the same `Arc`, so either
    /// lock serializes the one queue.
    graphics_queue: Arc<Mutex<vk::Queue>>,
    present_queue: Arc<Mutex<vk::Queue>>,
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("handle", &self.handle.handle())
            .field("physical_device", &self.physical_device)
            .field("queue_families", &self.queue_families)
            .finish_non_exhaustive()
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        tracing::debug!("Dropping device {:?}", self.handle.handle());
        // Memory blocks go back through the device, so the allocator first.
        self.allocator = None;
        // SAFETY: every child object holds an Arc to this device, so none is
        // left.
        unsafe { self.handle.destroy_device(None) };
    }
}

impl Device {
    /// Create a device on the best physical device that satisfies `config`
    /// and can present to `surf`.
    pub fn create_compatible<T: HasDisplayHandle + HasWindowHandle>(
        instance: &Arc<Instance>,
        surf: &Surface<T>,
        config: DeviceConfig,
    ) -> Result<Self, CreateCompatibleError> {
        if !Arc::ptr_eq(surf.get_parent(), instance) {
            return Err(CreateCompatibleError::MismatchedParams);
        }

        let mut best: Option<Candidate> = None;
        let mut queues_missing = false;
        for dev in instance.fetch_raw_physical_devices()? {
            // SAFETY: dev was listed by instance, which also owns surf.
            match unsafe { probe(instance, surf, dev, &config) } {
                Ok(candidate) => {
                    tracing::debug!(
                        "Candidate {:?} ({:?})",
                        candidate.name(),
                        candidate.props.device_type
                    );
                    if best.is_none_or(|b| candidate.priority() > b.priority()) {
                        best = Some(candidate);
                    }
                }
                Err(why) => {
                    queues_missing |= matches!(why, selection::Rejection::NoQueues(_));
                    tracing::debug!("Skipping {dev:?}: {why}");
                }
            }
        }
        let best = best.ok_or(if queues_missing {
            CreateCompatibleError::NoGraphicsPresentQueue
        } else {
            CreateCompatibleError::NoSuitableDevice
        })?;

        tracing::info!(
            "Using {:?} ({:?}); graphics family {}, present family {}",
            best.name(),
            best.props.device_type,
            best.queue_families.graphics,
            best.queue_families.present,
        );
        Self::from_candidate(instance, &best, &config)
    }

    fn from_candidate(
        instance: &Arc<Instance>,
        best: &Candidate,
        config: &DeviceConfig,
    ) -> Result<Self, CreateCompatibleError> {
        let priority = [1.0_f32];
        let queue_infos: Vec<vk::DeviceQueueCreateInfo<'_>> = best
            .queue_families
            .unique()
            .into_iter()
            .map(|family| {
                vk::DeviceQueueCreateInfo::default()
                    .queue_family_index(family)
                    .queue_priorities(&priority)
            })
            .collect();

        let extensions: Vec<*const std::ffi::c_char> =
            required_extensions(config, best.sync2_extension)
                .into_iter()
                .map(CStr::as_ptr)
                .collect();

        let mut features = vk::PhysicalDeviceFeatures2::default().features(
            vk::PhysicalDeviceFeatures::default()
                .fill_mode_non_solid(best.fill_mode_non_solid),
        );
        let mut sync2 =
            vk::PhysicalDeviceSynchronization2Features::default().synchronization2(true);
        let mut eds3 = vk::PhysicalDeviceExtendedDynamicState3FeaturesEXT::default()
            .extended_dynamic_state3_polygon_mode(true);
        let mut create_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_infos)
            .enabled_extension_names(&extensions)
            .push_next(&mut features)
            .push_next(&mut sync2);
        if config.dynamic_polygon_mode {
            create_info = create_info.push_next(&mut eds3);
        }

        // SAFETY: best.handle came from instance and the chain only enables
        // what probing found.
        let device = unsafe { instance.create_ash_device(best.handle, &create_info) }
            .map_err(CreateCompatibleError::DeviceCreationFailed)?;

        let queue = |family: u32| {
            // SAFETY: one queue was requested for every unique family.
            Arc::new(Mutex::new(unsafe { device.get_device_queue(family, 0) }))
        };
        let graphics_queue = queue(best.queue_families.graphics);
        let present_queue = if best.queue_families.is_shared() {
            Arc::clone(&graphics_queue)
        } else {
            queue(best.queue_families.present)
        };

        let allocator = match Allocator::new(&AllocatorCreateDesc {
            instance: instance.ash_instance().clone(),
            device: device.clone(),
            physical_device: best.handle,
            debug_settings: Default::default(),
            buffer_device_address: false,
            allocation_sizes: Default::default(),
        }) {
            Ok(allocator) => allocator,
            Err(e) => {
                // SAFETY: nothing was created from the device yet.
                unsafe { device.destroy_device(None) };
                return Err(CreateCompatibleError::AllocatorCreation(e));
            }
        };

        // SAFETY: best.handle came from instance.
        let memory_properties =
            unsafe { instance.get_raw_physical_device_memory_properties(best.handle) };

        Ok(Self {
            parent: Arc::clone(instance),
            allocator: Some(Mutex::new(allocator)),
            physical_device: best.handle,
            properties: best.props,
            memory_properties,
            swapchain_device: config
                .swapchain
                .then(|| instance.create_swapchain_loader(&device)),
            debug_utils_device: instance.create_debug_utils_device_loader(&device),
            extended_dynamic_state3: config
                .dynamic_polygon_mode
                .then(|| instance.create_extended_dynamic_state3_loader(&device)),
            synchronization2: if best.sync2_extension {
                Synchronization2Loader::Extension(
                    instance.create_synchronization2_loader(&device),
                )
            } else {
                Synchronization2Loader::Core
            },
            handle: device,
            fill_mode_non_solid: best.fill_mode_non_solid,
            queue_families: best.queue_families,
            graphics_queue,
            present_queue,
        })
    }

    pub fn parent(&self) -> &Arc<Instance> {
        &self.parent
    }

    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    pub fn non_coherent_atom_size(&self) -> vk::DeviceSize {
        self.properties.limits.non_coherent_atom_size
    }

    pub fn queue_families(&self) -> QueueFamilies {
        self.queue_families
    }

    pub fn graphics_queue_family(&self) -> u32 {
        self.queue_families.graphics
    }

    /// Pipelines may use line and point polygon modes.
    pub fn supports_fill_mode_non_solid(&self) -> bool {
        self.fill_mode_non_solid
    }

    pub fn has_dynamic_polygon_mode(&self) -> bool {
        self.extended_dynamic_state3.is_some()
    }

    pub fn has_swapchain_support(&self) -> bool {
        self.swapchain_device.is_some()
    }

    /// Block until the whole device is idle. For teardown and swapchain
    /// rebuilds only.
    pub fn wait_idle(&self) -> Result<(), vk::Result> {
        let _span = tracing::debug_span!("device_wait_idle").entered();
        // SAFETY: the device lives as long as self.
        unsafe { self.handle.device_wait_idle() }
    }

    /// Block until the graphics queue is idle.
    pub fn graphics_queue_wait_idle(&self) -> Result<(), vk::Result> {
        let _span = tracing::debug_span!("graphics_queue_wait_idle").entered();
        let queue = self.graphics_queue.lock().expect("graphics queue lock poisoned");
        // SAFETY: the lock serializes access to the queue.
        unsafe { self.handle.queue_wait_idle(*queue) }
    }

    /// Attach a debug name to `object`. Without `VK_EXT_debug_utils`, or
    /// with no name, nothing happens.
    ///
    /// # Safety
    /// `object` must be a live handle created from this device.
    pub unsafe fn set_object_name<H: vk::Handle>(
        &self,
        object: H,
        name: Option<&CStr>,
    ) -> Result<(), NameObjectError> {
        let (Some(debug_utils), Some(name)) = (self.debug_utils_device.as_ref(), name) else {
            return Ok(());
        };
        let info = vk::DebugUtilsObjectNameInfoEXT::default()
            .object_handle(object)
            .object_name(name);
        // SAFETY: caller guarantees object is a live handle of this device.
        unsafe { debug_utils.set_debug_utils_object_name(&info) }
            .map_err(NameObjectError::Vulkan)
    }

    /// Like [`set_object_name`](Self::set_object_name), but only builds the
    /// name when it will be used.
    ///
    /// # Safety
    /// As for [`set_object_name`](Self::set_object_name).
    pub unsafe fn set_object_name_with<H, F>(
        &self,
        object: H,
        make_name: F,
    ) -> Result<(), NameObjectError>
    where
        H: vk::Handle,
        F: FnOnce() -> Option<CString>,
    {
        if self.debug_utils_device.is_none() {
            return Ok(());
        }
        // SAFETY: same contract.
        unsafe { self.set_object_name(object, make_name().as_deref()) }
    }

    /// # Safety
    /// As for [`set_object_name`](Self::set_object_name).
    pub unsafe fn set_object_name_str<H: vk::Handle>(
        &self,
        object: H,
        name: Option<&str>,
    ) -> Result<(), NameObjectError> {
        if self.debug_utils_device.is_none() {
            return Ok(());
        }
        let name = name
            .map(CString::new)
            .transpose()
            .map_err(NameObjectError::InvalidName)?;
        // SAFETY: same contract.
        unsafe { self.set_object_name(object, name.as_deref()) }
    }
}
