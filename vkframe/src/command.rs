//! Command pools and the buffers recorded from them.
//!
//! A [`CommandBuffer`] is recorded through a [`Recording`], which
//! [`CommandBuffer::begin`] hands out after resetting the buffer. Ending the
//! recording consumes it, so commands cannot be added to a finished buffer
//! through safe code.

use std::sync::{Arc, Mutex};

use ash::vk;
use thiserror::Error;

use crate::buffer::BufferHandle;
use crate::device::{Device, DynamicPolygonModeError};

#[derive(Debug, Error)]
pub enum CreateCommandPoolError {
    #[error("Vulkan error creating command pool: {0}")]
    Vulkan(vk::Result),
}

#[derive(Debug, Error)]
pub enum AllocateCommandBufferError {
    #[error("Cannot allocate zero command buffers")]
    ZeroCount,
    #[error("Vulkan error allocating command buffers: {0}")]
    Vulkan(vk::Result),
}

#[derive(Debug, Error)]
pub enum BeginRecordingError {
    #[error("Vulkan error resetting command buffer: {0}")]
    Reset(vk::Result),
    #[error("Vulkan error beginning command buffer: {0}")]
    Begin(vk::Result),
}

/// The `VkCommandPool` plus the lock that serializes access to it.
///
/// Buffers keep this alive, so the pool is destroyed after the last of
/// them.
struct PoolHandle {
    parent: Arc<Device>,
    raw: Mutex<vk::CommandPool>,
}

impl PoolHandle {
    fn lock(&self) -> std::sync::MutexGuard<'_, vk::CommandPool> {
        self.raw.lock().expect("command pool lock poisoned")
    }
}

impl Drop for PoolHandle {
    fn drop(&mut self) {
        let pool = *self.raw.get_mut().expect("command pool lock poisoned");
        tracing::debug!("Dropping command pool {pool:?}");
        // SAFETY: every buffer from this pool has been freed, since each
        // holds an Arc to this handle.
        unsafe { self.parent.destroy_raw_command_pool(pool) };
    }
}

/// A pool of individually resettable primary command buffers.
pub struct CommandPool {
    handle: Arc<PoolHandle>,
}

impl std::fmt::Debug for CommandPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandPool")
            .field("pool", &*self.handle.lock())
            .finish_non_exhaustive()
    }
}

impl CommandPool {
    pub fn new(
        device: &Arc<Device>,
        queue_family: u32,
        name: Option<&str>,
    ) -> Result<Self, CreateCommandPoolError> {
        let create_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(queue_family)
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);
        // SAFETY: queue_family comes from this device's queue selection.
        let pool = unsafe { device.create_raw_command_pool(&create_info) }
            .map_err(CreateCommandPoolError::Vulkan)?;

        // SAFETY: the pool was just created from device.
        if let Err(e) = unsafe { device.set_object_name_str(pool, name) } {
            tracing::warn!("Failed to name command pool {pool:?}: {e}");
        }

        Ok(Self {
            handle: Arc::new(PoolHandle {
                parent: Arc::clone(device),
                raw: Mutex::new(pool),
            }),
        })
    }

    /// Allocate `count` primary buffers in one call.
    pub fn allocate(
        &self,
        count: usize,
    ) -> Result<Vec<CommandBuffer>, AllocateCommandBufferError> {
        let count = u32::try_from(count)
            .ok()
            .filter(|&c| c > 0)
            .ok_or(AllocateCommandBufferError::ZeroCount)?;

        let pool = self.handle.lock();
        let allocate_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(*pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(count);
        // SAFETY: the pool belongs to parent and is locked for the call.
        let raws = unsafe {
            self.handle.parent.allocate_raw_command_buffers(&allocate_info)
        }
        .map_err(AllocateCommandBufferError::Vulkan)?;
        drop(pool);

        Ok(raws
            .into_iter()
            .map(|raw| CommandBuffer {
                pool: Arc::clone(&self.handle),
                raw,
            })
            .collect())
    }

    pub fn allocate_one(
        &self,
    ) -> Result<CommandBuffer, AllocateCommandBufferError> {
        let mut buffers = self.allocate(1)?;
        buffers.pop().ok_or(AllocateCommandBufferError::ZeroCount)
    }
}

/// A primary command buffer. Freed back to its pool on drop, so it must
/// not be dropped while pending execution.
pub struct CommandBuffer {
    pool: Arc<PoolHandle>,
    raw: vk::CommandBuffer,
}

impl std::fmt::Debug for CommandBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandBuffer")
            .field("handle", &self.raw)
            .finish_non_exhaustive()
    }
}

impl Drop for CommandBuffer {
    fn drop(&mut self) {
        let pool = self.pool.lock();
        // SAFETY: allocated from this pool, which is locked. Owners drop
        // buffers only once their submissions completed.
        unsafe {
            self.pool
                .parent
                .free_raw_command_buffers(*pool, std::slice::from_ref(&self.raw))
        };
    }
}

impl CommandBuffer {
    pub fn raw_command_buffer(&self) -> vk::CommandBuffer {
        self.raw
    }

    /// Reset the buffer and begin a one-time-submit recording.
    ///
    /// # Safety
    /// The buffer must not be pending execution.
    pub unsafe fn begin(
        &mut self,
    ) -> Result<Recording<'_>, BeginRecordingError> {
        let device = &self.pool.parent;
        // SAFETY: caller guarantees the buffer is idle; the pool allows
        // per-buffer resets.
        unsafe {
            device.reset_raw_command_buffer(
                self.raw,
                vk::CommandBufferResetFlags::empty(),
            )
        }
        .map_err(BeginRecordingError::Reset)?;

        let begin_info = vk::CommandBufferBeginInfo::default()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        // SAFETY: reset just above, so in the initial state.
        unsafe { device.begin_raw_command_buffer(self.raw, &begin_info) }
            .map_err(BeginRecordingError::Begin)?;

        Ok(Recording { buffer: self })
    }
}

/// A command buffer in the recording state.
///
/// The `cmd_*` wrappers are `unsafe` because Vulkan validity depends on
/// state this type does not track: which render pass is active, which
/// pipeline is bound and whether referenced objects outlive execution.
pub struct Recording<'a> {
    buffer: &'a mut CommandBuffer,
}

impl std::fmt::Debug for Recording<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Recording").field(&self.buffer.raw).finish()
    }
}

impl Recording<'_> {
    fn device(&self) -> &Device {
        &self.buffer.pool.parent
    }

    pub fn raw_command_buffer(&self) -> vk::CommandBuffer {
        self.buffer.raw
    }

    /// End recording, leaving the buffer executable.
    pub fn finish(self) -> Result<(), vk::Result> {
        // SAFETY: a Recording only exists between begin and end.
        unsafe { self.device().end_raw_command_buffer(self.buffer.raw) }
    }

    /// # Safety
    /// No render pass may be active. The render pass and framebuffer in
    /// `begin_info` must be compatible and outlive execution.
    pub unsafe fn begin_render_pass(
        &mut self,
        begin_info: &vk::RenderPassBeginInfo<'_>,
    ) {
        // SAFETY: caller contract.
        unsafe {
            self.device().cmd_begin_render_pass(
                self.buffer.raw,
                begin_info,
                vk::SubpassContents::INLINE,
            )
        }
    }

    /// # Safety
    /// A render pass must be active.
    pub unsafe fn end_render_pass(&mut self) {
        // SAFETY: caller contract.
        unsafe { self.device().cmd_end_render_pass(self.buffer.raw) }
    }

    /// # Safety
    /// `pipeline` must be a graphics pipeline of this device that outlives
    /// execution.
    pub unsafe fn bind_pipeline(&mut self, pipeline: vk::Pipeline) {
        // SAFETY: caller contract.
        unsafe {
            self.device()
                .cmd_bind_graphics_pipeline(self.buffer.raw, pipeline)
        }
    }

    /// Set one viewport and one scissor rectangle.
    ///
    /// # Safety
    /// The bound pipeline must declare both as dynamic state.
    pub unsafe fn set_viewport_and_scissor(
        &mut self,
        viewport: vk::Viewport,
        scissor: vk::Rect2D,
    ) {
        let raw = self.buffer.raw;
        // SAFETY: caller contract.
        unsafe {
            self.device().cmd_set_viewport(raw, &[viewport]);
            self.device().cmd_set_scissor(raw, &[scissor]);
        }
    }

    /// # Safety
    /// The bound pipeline must declare polygon mode as dynamic state.
    pub unsafe fn set_polygon_mode(
        &mut self,
        mode: vk::PolygonMode,
    ) -> Result<(), DynamicPolygonModeError> {
        // SAFETY: caller contract.
        unsafe { self.device().cmd_set_polygon_mode(self.buffer.raw, mode) }
    }

    /// # Safety
    /// `layout` must be compatible with the bound pipeline and the sets
    /// must outlive execution.
    pub unsafe fn bind_descriptor_sets(
        &mut self,
        layout: vk::PipelineLayout,
        sets: &[vk::DescriptorSet],
    ) {
        // SAFETY: caller contract.
        unsafe {
            self.device()
                .cmd_bind_descriptor_sets(self.buffer.raw, layout, 0, sets)
        }
    }

    /// # Safety
    /// `buffer` needs `VERTEX_BUFFER` usage and must outlive execution.
    pub unsafe fn bind_vertex_buffer(&mut self, buffer: impl BufferHandle) {
        // SAFETY: caller contract.
        unsafe {
            self.device().cmd_bind_vertex_buffers(
                self.buffer.raw,
                0,
                &[buffer.raw_buffer()],
                &[0],
            )
        }
    }

    /// # Safety
    /// `buffer` needs `INDEX_BUFFER` usage and must outlive execution.
    pub unsafe fn bind_index_buffer(
        &mut self,
        buffer: impl BufferHandle,
        index_type: vk::IndexType,
    ) {
        // SAFETY: caller contract.
        unsafe {
            self.device().cmd_bind_index_buffer(
                self.buffer.raw,
                buffer.raw_buffer(),
                0,
                index_type,
            )
        }
    }

    /// Draw `vertex_count` vertices as a single instance.
    ///
    /// # Safety
    /// A render pass must be active with a pipeline bound and its dynamic
    /// state set.
    pub unsafe fn draw(&mut self, vertex_count: u32) {
        // SAFETY: caller contract.
        unsafe { self.device().cmd_draw(self.buffer.raw, vertex_count, 1, 0, 0) }
    }

    /// # Safety
    /// As [`draw`](Self::draw), plus a bound index buffer holding at least
    /// `index_count` indices.
    pub unsafe fn draw_indexed(&mut self, index_count: u32) {
        // SAFETY: caller contract.
        unsafe {
            self.device()
                .cmd_draw_indexed(self.buffer.raw, index_count, 1, 0, 0, 0)
        }
    }
}

// Presenters move into the thread running the event loop.
#[allow(dead_code)]
trait AssertSend: Send {}
impl AssertSend for CommandPool {}
impl AssertSend for CommandBuffer {}
