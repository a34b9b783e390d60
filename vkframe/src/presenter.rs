//! The composed presentation session.
//!
//! [`Presenter`] owns one instance of every component and drives them
//! through [`FrameSynchronizer::tick`] once per [`Presenter::draw_frame`].
//! The window itself stays outside: it only hands in a surface, a size
//! query and a resize flag.

use std::num::NonZeroUsize;
use std::sync::Arc;

use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use thiserror::Error;

use crate::device::Device;
use crate::frame::{
    AcquireStatus, CreateFrameSlotError, FrameOps, FrameOutcome, FrameSlot,
    FrameSynchronizer, PresentStatus, classify_acquire, classify_present,
};
use crate::pipeline::{
    CreatePipelineError, GraphicsPipeline, GraphicsPipelineDesc,
    PipelineLayout,
};
use crate::recorder::{
    CommandRecorder, CreateRecorderError, RecordError, RecordTarget,
};
use crate::render_pass::RenderPass;
use crate::resources::{
    CreateResourcesError, Geometry, GpuResources, Indices, UniformSlots,
    WriteUniformsError,
};
use crate::shader::{CreateShaderModuleError, ShaderModule, ShaderStage};
use crate::surface::{FramebufferExtent, Surface};
use crate::swapchain_manager::{
    ExtentPoll, RecreateError, RecreateStatus, SwapchainManager,
};
use crate::sync::{MarkSubmittedError, ResetFenceError, WaitFenceError};
use crate::vertex::Vertex;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PresenterConfig {
    pub frames_in_flight: usize,
    pub clear_color: [f32; 4],
    /// Format for the first swapchain. `None` takes the default sRGB format
    /// when offered.
    pub preferred_format: Option<vk::Format>,
    pub extent_poll: ExtentPoll,
    /// Applied every frame when the device supports dynamic polygon mode,
    /// baked into the pipeline otherwise.
    pub polygon_mode: vk::PolygonMode,
}

impl Default for PresenterConfig {
    fn default() -> Self {
        Self {
            frames_in_flight: 2,
            clear_color: [0.0; 4],
            preferred_format: None,
            extent_poll: ExtentPoll::default(),
            polygon_mode: vk::PolygonMode::FILL,
        }
    }
}

/// What gets drawn every frame.
///
/// Without shaders every frame is a clear-only pass and the geometry is
/// still uploaded but never bound.
#[derive(Debug, Clone, Copy)]
pub struct Scene<'a, V: Vertex> {
    pub vertex_shader: Option<&'a [u8]>,
    pub fragment_shader: Option<&'a [u8]>,
    pub vertices: &'a [V],
    pub indices: Option<Indices<'a>>,
    /// Draw this many shader-generated vertices when `vertices` is empty.
    pub procedural_vertex_count: Option<u32>,
    /// Bytes per frame slot uniform buffer.
    pub uniform_size: Option<vk::DeviceSize>,
}

impl<V: Vertex> Default for Scene<'_, V> {
    fn default() -> Self {
        Self {
            vertex_shader: None,
            fragment_shader: None,
            vertices: &[],
            indices: None,
            procedural_vertex_count: None,
            uniform_size: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum CreatePresenterError {
    #[error("At least one frame must be in flight")]
    ZeroFramesInFlight,
    #[error("A vertex shader needs a fragment shader and vice versa")]
    IncompleteShaderStages,
    #[error("Failed to build swapchain: {0}")]
    Swapchain(#[from] RecreateError),
    #[error("Failed to create frame slots: {0}")]
    FrameSlots(#[from] CreateFrameSlotError),
    #[error("Failed to create command recorder: {0}")]
    Recorder(#[from] CreateRecorderError),
    #[error("Failed to create GPU resources: {0}")]
    Resources(#[from] CreateResourcesError),
    #[error("Failed to load shader: {0}")]
    Shader(#[from] CreateShaderModuleError),
    #[error("Failed to create pipeline: {0}")]
    Pipeline(#[from] CreatePipelineError),
}

/// Per-frame input from the application shell.
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameRequest<'a> {
    /// The window saw a resize since the last frame.
    pub resize_requested: bool,
    /// Written into the current slot's uniform buffer before recording.
    pub uniforms: Option<&'a [u8]>,
}

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("Uniform bytes given but the scene has no uniform buffers")]
    NoUniformBuffers,
    #[error("No frame slot {0}")]
    SlotOutOfRange(usize),
    #[error("Failed waiting for frame fence: {0}")]
    WaitFence(#[from] WaitFenceError),
    #[error("Vulkan error acquiring swapchain image: {0}")]
    Acquire(vk::Result),
    #[error("Failed to reset frame fence: {0}")]
    ResetFence(#[from] ResetFenceError),
    #[error("Failed to write uniforms: {0}")]
    WriteUniforms(#[from] WriteUniformsError),
    #[error("Swapchain returned image {0} with no framebuffer")]
    MissingFramebuffer(u32),
    #[error("Failed to record frame: {0}")]
    Record(#[from] RecordError),
    #[error("Vulkan error submitting frame: {0}")]
    Submit(vk::Result),
    #[error("Frame fence state is out of sync: {0}")]
    MarkSubmitted(#[from] MarkSubmittedError),
    #[error("Vulkan error presenting: {0}")]
    Present(vk::Result),
    #[error("Failed to recreate swapchain: {0}")]
    Recreate(#[from] RecreateError),
}

fn validate_frames_in_flight(
    frames_in_flight: usize,
) -> Result<NonZeroUsize, CreatePresenterError> {
    NonZeroUsize::new(frames_in_flight)
        .ok_or(CreatePresenterError::ZeroFramesInFlight)
}

/// Both stages or neither.
fn shader_pair<'a>(
    vertex: Option<&'a [u8]>,
    fragment: Option<&'a [u8]>,
) -> Result<Option<(&'a [u8], &'a [u8])>, CreatePresenterError> {
    match (vertex, fragment) {
        (Some(v), Some(f)) => Ok(Some((v, f))),
        (None, None) => Ok(None),
        _ => Err(CreatePresenterError::IncompleteShaderStages),
    }
}

/// The stage the acquired image is first written at. Submissions wait on
/// image-acquired here so earlier stages overlap the acquire.
const ACQUIRE_WAIT_STAGE: vk::PipelineStageFlags2 =
    vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT;

/// A presentation session for one window.
///
/// Fields are declared in drop order. [`Drop`] waits for the device to go
/// idle before any of them is released.
pub struct Presenter<T: HasDisplayHandle + HasWindowHandle> {
    synchronizer: FrameSynchronizer,
    slots: Vec<FrameSlot>,
    recorder: CommandRecorder,
    pipeline: Option<GraphicsPipeline>,
    resources: GpuResources,
    swapchain: SwapchainManager<T>,
    device: Arc<Device>,
    clear_color: [f32; 4],
    polygon_mode: vk::PolygonMode,
}

impl<T: HasDisplayHandle + HasWindowHandle> std::fmt::Debug for Presenter<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Presenter")
            .field("synchronizer", &self.synchronizer)
            .field("swapchain", &self.swapchain)
            .field("pipeline", &self.pipeline)
            .finish_non_exhaustive()
    }
}

impl<T: HasDisplayHandle + HasWindowHandle> Presenter<T> {
    pub fn new<V: Vertex>(
        device: &Arc<Device>,
        surface: &Arc<Surface<T>>,
        extent_source: Box<dyn FramebufferExtent>,
        scene: &Scene<'_, V>,
        config: &PresenterConfig,
    ) -> Result<Self, CreatePresenterError> {
        let frames_in_flight =
            validate_frames_in_flight(config.frames_in_flight)?;
        let shaders = shader_pair(scene.vertex_shader, scene.fragment_shader)?;

        let swapchain = SwapchainManager::new(
            device,
            surface,
            extent_source,
            config.preferred_format,
            config.extent_poll,
        )?;
        let recorder = CommandRecorder::new(device, frames_in_flight)?;
        let mut resources = GpuResources::new(
            device,
            recorder.pool(),
            scene.vertices,
            scene.indices,
            scene.uniform_size,
            frames_in_flight,
        )?;
        if resources.geometry.is_none()
            && let Some(count) = scene.procedural_vertex_count
        {
            resources.geometry = Some(Geometry::procedural(count));
        }

        let pipeline = shaders
            .map(|(vertex, fragment)| {
                build_pipeline::<V>(
                    device,
                    swapchain.render_pass(),
                    &resources,
                    (vertex, fragment),
                    !scene.vertices.is_empty(),
                    config.polygon_mode,
                )
            })
            .transpose()?;

        let slots = FrameSlot::ring(device, frames_in_flight)?;

        tracing::info!(
            "Presenter ready: {} frames in flight, {} pipeline",
            frames_in_flight,
            if pipeline.is_some() { "with" } else { "no" },
        );

        Ok(Self {
            synchronizer: FrameSynchronizer::new(frames_in_flight),
            slots,
            recorder,
            pipeline,
            resources,
            swapchain,
            device: Arc::clone(device),
            clear_color: config.clear_color,
            polygon_mode: config.polygon_mode,
        })
    }

    /// Run one frame tick.
    ///
    /// Out-of-date and suboptimal swapchains are handled internally and
    /// show up only in the returned [`FrameOutcome`]. Any error is fatal
    /// for the session.
    pub fn draw_frame(
        &mut self,
        request: FrameRequest<'_>,
    ) -> Result<FrameOutcome, FrameError> {
        check_uniforms(request.uniforms, self.resources.uniforms.as_ref())?;
        let Self {
            synchronizer,
            slots,
            recorder,
            pipeline,
            resources,
            swapchain,
            device,
            clear_color,
            polygon_mode,
        } = self;
        let mut ops = PresenterFrameOps {
            slots,
            recorder,
            pipeline: pipeline.as_ref(),
            resources,
            swapchain,
            device: &**device,
            clear_color: *clear_color,
            polygon_mode: *polygon_mode,
            uniforms: request.uniforms,
        };
        synchronizer.tick(&mut ops, request.resize_requested)
    }

    /// Change the polygon mode used from the next frame on. Only has an
    /// effect with dynamic polygon mode.
    pub fn set_polygon_mode(&mut self, polygon_mode: vk::PolygonMode) {
        self.polygon_mode = polygon_mode;
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.swapchain.extent()
    }

    pub fn swapchain_generation(&self) -> u64 {
        self.swapchain.generation()
    }

    pub fn frames_in_flight(&self) -> usize {
        self.synchronizer.frames_in_flight()
    }

    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }
}

impl<T: HasDisplayHandle + HasWindowHandle> Drop for Presenter<T> {
    fn drop(&mut self) {
        tracing::debug!("Dropping presenter");
        if let Err(e) = self.device.wait_idle() {
            tracing::error!("Failed to wait for device idle on teardown: {e}");
        }
    }
}

/// Shader modules only live until the pipeline exists.
fn build_pipeline<V: Vertex>(
    device: &Arc<Device>,
    render_pass: &RenderPass,
    resources: &GpuResources,
    (vertex_spirv, fragment_spirv): (&[u8], &[u8]),
    has_vertex_input: bool,
    polygon_mode: vk::PolygonMode,
) -> Result<GraphicsPipeline, CreatePresenterError> {
    let vertex = ShaderModule::new(device, vertex_spirv, Some("Vertex shader"))?;
    let fragment =
        ShaderModule::new(device, fragment_spirv, Some("Fragment shader"))?;
    let stages = [
        vertex.main_entry_point(ShaderStage::Vertex),
        fragment.main_entry_point(ShaderStage::Fragment),
    ];

    let layout = match &resources.uniforms {
        Some(uniforms) => Some(Arc::new(
            PipelineLayout::new(device, &[uniforms.layout()])
                .map_err(CreatePipelineError::LayoutCreation)?,
        )),
        None => None,
    };
    let vertex_layout = V::layout();

    let desc = GraphicsPipelineDesc {
        stages: &stages,
        vertex_layout: has_vertex_input.then_some(&vertex_layout),
        layout,
        polygon_mode,
        dynamic_polygon_mode: device.has_dynamic_polygon_mode(),
    };
    Ok(GraphicsPipeline::new(
        device,
        render_pass,
        &desc,
        Some("Scene pipeline"),
    )?)
}

// ---------------------------------------------------------------------------
// FrameOps over the real device
// ---------------------------------------------------------------------------

struct PresenterFrameOps<'a, T: HasDisplayHandle + HasWindowHandle> {
    slots: &'a mut [FrameSlot],
    recorder: &'a mut CommandRecorder,
    pipeline: Option<&'a GraphicsPipeline>,
    resources: &'a mut GpuResources,
    swapchain: &'a mut SwapchainManager<T>,
    device: &'a Device,
    clear_color: [f32; 4],
    polygon_mode: vk::PolygonMode,
    uniforms: Option<&'a [u8]>,
}

impl<T: HasDisplayHandle + HasWindowHandle> PresenterFrameOps<'_, T> {
    fn slot(&self, slot: usize) -> Result<&FrameSlot, FrameError> {
        self.slots.get(slot).ok_or(FrameError::SlotOutOfRange(slot))
    }

    fn slot_mut(&mut self, slot: usize) -> Result<&mut FrameSlot, FrameError> {
        self.slots
            .get_mut(slot)
            .ok_or(FrameError::SlotOutOfRange(slot))
    }
}

impl<T: HasDisplayHandle + HasWindowHandle> FrameOps
    for PresenterFrameOps<'_, T>
{
    type Error = FrameError;

    fn wait_for_fence(&mut self, slot: usize) -> Result<(), FrameError> {
        Ok(self.slot(slot)?.in_flight.wait(u64::MAX)?)
    }

    fn acquire_image(
        &mut self,
        slot: usize,
    ) -> Result<AcquireStatus, FrameError> {
        let semaphore = self.slot(slot)?.image_acquired.raw_semaphore();
        // SAFETY: the slot's previous submission waited on this semaphore
        // and completed, so it is unsignaled.
        let result = unsafe {
            self.swapchain.swapchain().acquire_next_image(
                u64::MAX,
                semaphore,
                vk::Fence::null(),
            )
        };
        classify_acquire(result).map_err(FrameError::Acquire)
    }

    fn reset_fence(&mut self, slot: usize) -> Result<(), FrameError> {
        let fence = &mut self.slot_mut(slot)?.in_flight;
        // SAFETY: wait_for_fence succeeded on this slot earlier in the tick.
        unsafe { fence.reset() }?;
        Ok(())
    }

    fn record(
        &mut self,
        slot: usize,
        image_index: u32,
    ) -> Result<(), FrameError> {
        if let Some(bytes) = self.uniforms
            && let Some(uniforms) = &mut self.resources.uniforms
        {
            uniforms.write(slot, bytes)?;
        }

        let framebuffer = self
            .swapchain
            .framebuffers()
            .get(image_index)
            .ok_or(FrameError::MissingFramebuffer(image_index))?;
        let descriptor_set = self
            .resources
            .uniforms
            .as_ref()
            .and_then(|u| u.descriptor_set(slot));
        let target = RecordTarget {
            render_pass: self.swapchain.render_pass().raw_handle(),
            framebuffer,
            extent: self.swapchain.extent(),
            clear_color: self.clear_color,
            pipeline: self.pipeline,
            polygon_mode: self.polygon_mode,
            descriptor_set,
            geometry: self.resources.geometry.as_ref(),
        };
        // SAFETY: the slot's fence was waited on, so its command buffer is
        // idle. Every handle in target belongs to the current generation or
        // outlives it.
        unsafe { self.recorder.record(slot, &target) }?;
        Ok(())
    }

    fn submit(&mut self, slot: usize) -> Result<(), FrameError> {
        let command_buffer = self
            .recorder
            .command_buffer(slot)
            .ok_or(FrameError::SlotOutOfRange(slot))?;
        let frame = self
            .slots
            .get_mut(slot)
            .ok_or(FrameError::SlotOutOfRange(slot))?;

        let wait_infos = [vk::SemaphoreSubmitInfo::default()
            .semaphore(frame.image_acquired.raw_semaphore())
            .stage_mask(ACQUIRE_WAIT_STAGE)];
        let cb_infos = [vk::CommandBufferSubmitInfo::default()
            .command_buffer(command_buffer)];
        let signal_infos = [vk::SemaphoreSubmitInfo::default()
            .semaphore(frame.render_finished.raw_semaphore())
            .stage_mask(vk::PipelineStageFlags2::ALL_COMMANDS)];
        let submit = vk::SubmitInfo2::default()
            .wait_semaphore_infos(&wait_infos)
            .command_buffer_infos(&cb_infos)
            .signal_semaphore_infos(&signal_infos);

        // SAFETY: the command buffer was just recorded, the semaphores and
        // fence belong to this slot and the fence was reset after the wait.
        unsafe {
            self.device.graphics_queue_submit2(
                std::slice::from_ref(&submit),
                frame.in_flight.raw_fence(),
            )
        }
        .map_err(FrameError::Submit)?;
        // SAFETY: the fence was passed to the submission above.
        unsafe { frame.in_flight.mark_submitted() }?;
        Ok(())
    }

    fn present(
        &mut self,
        slot: usize,
        image_index: u32,
    ) -> Result<PresentStatus, FrameError> {
        let semaphore = self.slot(slot)?.render_finished.raw_semaphore();
        // SAFETY: image_index was acquired this tick and the submission
        // signaling render_finished transitions it to PRESENT_SRC_KHR.
        let result = unsafe {
            self.swapchain.swapchain().present(image_index, semaphore)
        };
        classify_present(result).map_err(FrameError::Present)
    }

    fn recreate(&mut self) -> Result<RecreateStatus, FrameError> {
        Ok(self.swapchain.recreate()?)
    }
}

/// Uniform bytes need somewhere to go. Checked before the tick so a
/// rejected request touches no frame slot.
fn check_uniforms(
    bytes: Option<&[u8]>,
    slots: Option<&UniformSlots>,
) -> Result<(), FrameError> {
    match (bytes, slots) {
        (Some(_), None) => Err(FrameError::NoUniformBuffers),
        _ => Ok(()),
    }
}
