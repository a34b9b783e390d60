use std::num::NonZeroUsize;
use std::sync::Arc;

use ash::vk;
use thiserror::Error;

use crate::command::{
    AllocateCommandBufferError, BeginRecordingError, CommandBuffer, CommandPool,
    CreateCommandPoolError, Recording,
};
use crate::device::{Device, DynamicPolygonModeError};
use crate::pipeline::GraphicsPipeline;
use crate::resources::Geometry;

#[derive(Debug, Error)]
pub enum CreateRecorderError {
    #[error("Failed to create command pool: {0}")]
    Pool(#[from] CreateCommandPoolError),
    #[error("Failed to allocate frame command buffers: {0}")]
    Allocate(#[from] AllocateCommandBufferError),
}

#[derive(Debug, Error)]
pub enum RecordError {
    #[error("No command buffer for frame slot {0}")]
    SlotOutOfRange(usize),
    #[error("Could not start recording: {0}")]
    Begin(#[from] BeginRecordingError),
    #[error("Vulkan error ending command buffer: {0}")]
    End(vk::Result),
    #[error("Failed to set polygon mode: {0}")]
    PolygonMode(#[from] DynamicPolygonModeError),
}

/// Viewport covering the whole swapchain image.
pub fn full_viewport(extent: vk::Extent2D) -> vk::Viewport {
    vk::Viewport {
        x: 0.0,
        y: 0.0,
        width: extent.width as f32,
        height: extent.height as f32,
        min_depth: 0.0,
        max_depth: 1.0,
    }
}

pub fn full_scissor(extent: vk::Extent2D) -> vk::Rect2D {
    vk::Rect2D {
        offset: vk::Offset2D { x: 0, y: 0 },
        extent,
    }
}

/// The draw command for the loaded geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrawCall {
    Vertices { vertex_count: u32 },
    Indexed { index_count: u32 },
}

impl DrawCall {
    /// Indexed when there are indices, plain otherwise. `None` when there is
    /// nothing to draw.
    pub fn plan(vertex_count: u32, index_count: Option<u32>) -> Option<Self> {
        match index_count {
            Some(0) => None,
            Some(index_count) => Some(Self::Indexed { index_count }),
            None if vertex_count == 0 => None,
            None => Some(Self::Vertices { vertex_count }),
        }
    }
}

/// Everything one frame's commands reference.
///
/// Handles borrowed here must stay alive until the slot's fence signals.
#[derive(Clone, Copy)]
pub struct RecordTarget<'a> {
    pub render_pass: vk::RenderPass,
    pub framebuffer: vk::Framebuffer,
    pub extent: vk::Extent2D,
    pub clear_color: [f32; 4],
    /// `None` records a clear-only pass.
    pub pipeline: Option<&'a GraphicsPipeline>,
    /// Only applied when the pipeline declares dynamic polygon mode.
    pub polygon_mode: vk::PolygonMode,
    pub descriptor_set: Option<vk::DescriptorSet>,
    pub geometry: Option<&'a Geometry>,
}

/// Owns the graphics-family command pool and one primary command buffer
/// per frame slot. A slot's buffer is only touched after that slot's fence
/// wait, so no buffer is ever recorded while the GPU reads it.
pub struct CommandRecorder {
    buffers: Vec<CommandBuffer>,
    pool: CommandPool,
}

impl std::fmt::Debug for CommandRecorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandRecorder")
            .field("pool", &self.pool)
            .field("buffers", &self.buffers.len())
            .finish_non_exhaustive()
    }
}

impl CommandRecorder {
    pub fn new(
        device: &Arc<Device>,
        frames_in_flight: NonZeroUsize,
    ) -> Result<Self, CreateRecorderError> {
        let pool = CommandPool::new(
            device,
            device.graphics_queue_family(),
            Some("Frame command pool"),
        )?;
        let buffers = pool.allocate(frames_in_flight.get())?;
        for (slot, buffer) in buffers.iter().enumerate() {
            // SAFETY: the buffer was just allocated from device.
            let name_result = unsafe {
                device.set_object_name_str(
                    buffer.raw_command_buffer(),
                    Some(&format!("Frame {slot} commands")),
                )
            };
            if let Err(e) = name_result {
                tracing::warn!("Failed to name command buffer {buffer:?}: {e}");
            }
        }
        Ok(Self { buffers, pool })
    }

    /// The pool, for one-time transfer buffers.
    pub fn pool(&self) -> &CommandPool {
        &self.pool
    }

    pub fn command_buffer(&self, slot: usize) -> Option<vk::CommandBuffer> {
        self.buffers.get(slot).map(|b| b.raw_command_buffer())
    }

    /// Re-record the slot's command buffer from scratch against `target`.
    ///
    /// # Safety
    /// - The slot's previous submission must have completed (its fence was
    ///   waited on).
    /// - Every handle in `target` must be valid, created from this
    ///   recorder's device and compatible with each other.
    pub unsafe fn record(
        &mut self,
        slot: usize,
        target: &RecordTarget<'_>,
    ) -> Result<(), RecordError> {
        let cb = self
            .buffers
            .get_mut(slot)
            .ok_or(RecordError::SlotOutOfRange(slot))?;

        // SAFETY: the caller guarantees the slot's work has completed.
        let mut rec = unsafe { cb.begin() }?;

        let clear_values = [vk::ClearValue {
            color: vk::ClearColorValue {
                float32: target.clear_color,
            },
        }];
        let begin_info = vk::RenderPassBeginInfo::default()
            .render_pass(target.render_pass)
            .framebuffer(target.framebuffer)
            .render_area(full_scissor(target.extent))
            .clear_values(&clear_values);

        // SAFETY: recording outside a render pass; caller guarantees the
        // render pass and framebuffer are compatible and alive.
        unsafe { rec.begin_render_pass(&begin_info) };

        if let Some(pipeline) = target.pipeline {
            // SAFETY: inside the render pass the pipeline was built for.
            unsafe {
                rec.bind_pipeline(pipeline.raw_handle());
                rec.set_viewport_and_scissor(
                    full_viewport(target.extent),
                    full_scissor(target.extent),
                );
            }
            if pipeline.has_dynamic_polygon_mode() {
                // SAFETY: the bound pipeline declares dynamic polygon mode.
                unsafe { rec.set_polygon_mode(target.polygon_mode) }?;
            }
            if let Some(set) = target.descriptor_set {
                // SAFETY: the set was allocated against the pipeline's
                // layout.
                unsafe {
                    rec.bind_descriptor_sets(pipeline.layout().raw_handle(), &[set])
                };
            }
            if let Some(geometry) = target.geometry {
                // SAFETY: a pipeline is bound with all dynamic state set and
                // the geometry buffers outlive the submission.
                unsafe { record_geometry(&mut rec, geometry) };
            }
        }

        // SAFETY: the render pass begun above is still active.
        unsafe { rec.end_render_pass() };
        rec.finish().map_err(RecordError::End)
    }
}

/// # Safety
/// `rec` must be inside a render pass with a compatible pipeline
/// bound, and the geometry buffers must outlive the submission.
unsafe fn record_geometry(rec: &mut Recording<'_>, geometry: &Geometry) {
    if let Some(vertices) = geometry.vertex_buffer() {
        // SAFETY: caller contract.
        unsafe { rec.bind_vertex_buffer(vertices) };
    }
    if let Some((indices, index_type)) = geometry.index_buffer() {
        // SAFETY: caller contract.
        unsafe { rec.bind_index_buffer(indices, index_type) };
    }
    match geometry.draw_call() {
        Some(DrawCall::Vertices { vertex_count }) => {
            // SAFETY: caller contract.
            unsafe { rec.draw(vertex_count) }
        }
        Some(DrawCall::Indexed { index_count }) => {
            // SAFETY: caller contract; an index buffer was bound above.
            unsafe { rec.draw_indexed(index_count) }
        }
        None => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EXTENT: vk::Extent2D = vk::Extent2D {
        width: 1280,
        height: 720,
    };

    #[test]
    fn viewport_covers_extent() {
        let viewport = full_viewport(EXTENT);
        assert_eq!((viewport.x, viewport.y), (0.0, 0.0));
        assert_eq!((viewport.width, viewport.height), (1280.0, 720.0));
        assert_eq!((viewport.min_depth, viewport.max_depth), (0.0, 1.0));
    }

    #[test]
    fn scissor_covers_extent() {
        let scissor = full_scissor(EXTENT);
        assert_eq!(scissor.offset, vk::Offset2D { x: 0, y: 0 });
        assert_eq!(scissor.extent, EXTENT);
    }

    #[test]
    fn indices_select_indexed_draw() {
        assert_eq!(
            DrawCall::plan(4, Some(6)),
            Some(DrawCall::Indexed { index_count: 6 })
        );
        assert_eq!(
            DrawCall::plan(3, None),
            Some(DrawCall::Vertices { vertex_count: 3 })
        );
    }

    #[test]
    fn empty_geometry_draws_nothing() {
        assert_eq!(DrawCall::plan(0, None), None);
        assert_eq!(DrawCall::plan(4, Some(0)), None);
    }
}
