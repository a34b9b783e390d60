//! GPU resources shared by every frame slot.
//!
//! Creation runs device, command pool, buffers, descriptor sets. Every
//! owner here declares its fields in reverse creation order so Rust's drop
//! order releases them in reverse too.
//!
//! Device-local buffers are filled through [`upload_via_staging`], which
//! blocks on the graphics queue. That is acceptable at load time only;
//! nothing in here runs per frame except [`UniformSlots::write`].

use std::num::NonZeroUsize;
use std::sync::Arc;

use ash::vk;
use bytemuck::Pod;
use thiserror::Error;

use crate::buffer::{
    CopyBufferError, CreateBufferError, DeviceLocalBuffer, HostVisibleBuffer,
    WriteBufferError,
};
use crate::command::{AllocateCommandBufferError, BeginRecordingError, CommandPool};
use crate::descriptor::{
    CreateDescriptorError, DescriptorPool, DescriptorSet, DescriptorSetLayout,
};
use crate::device::Device;
use crate::recorder::DrawCall;
use crate::vertex::Vertex;

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("Nothing to upload")]
    Empty,
    #[error("{0} elements do not fit a 32-bit draw count")]
    TooManyElements(usize),
    #[error("Index {index} is out of range for {vertex_count} vertices")]
    IndexOutOfRange { index: u32, vertex_count: u32 },
    #[error("Failed to create staging buffer: {0}")]
    Staging(CreateBufferError),
    #[error("Failed to create destination buffer: {0}")]
    Destination(CreateBufferError),
    #[error("Failed to fill staging buffer: {0}")]
    Write(#[from] WriteBufferError),
    #[error("Failed to record staging copy: {0}")]
    Copy(#[from] CopyBufferError),
    #[error("Failed to allocate transfer command buffer: {0}")]
    Allocate(#[from] AllocateCommandBufferError),
    #[error("Could not start transfer recording: {0}")]
    Begin(#[from] BeginRecordingError),
    #[error("Vulkan error ending transfer commands: {0}")]
    Record(vk::Result),
    #[error("Vulkan error submitting transfer: {0}")]
    Submit(vk::Result),
    #[error("Vulkan error waiting for transfer: {0}")]
    WaitIdle(vk::Result),
}

/// Copy `data` into a new device-local buffer through a host-visible
/// staging buffer.
///
/// The copy is recorded into a one-time command buffer from `pool`,
/// submitted to the graphics queue and waited on with a queue-idle wait
/// before the staging buffer is released.
pub fn upload_via_staging<T: Pod>(
    device: &Arc<Device>,
    pool: &CommandPool,
    data: &[T],
    usage: vk::BufferUsageFlags,
    name: Option<&str>,
) -> Result<DeviceLocalBuffer, UploadError> {
    let size = std::mem::size_of_val(data) as vk::DeviceSize;
    if size == 0 {
        return Err(UploadError::Empty);
    }

    let staging_name = name.map(|n| format!("{n} staging"));
    let mut staging = HostVisibleBuffer::new(
        device,
        size,
        vk::BufferUsageFlags::TRANSFER_SRC,
        staging_name.as_deref(),
    )
    .map_err(UploadError::Staging)?;
    staging.write_pod(data)?;

    let mut destination = DeviceLocalBuffer::new(
        device,
        size,
        usage | vk::BufferUsageFlags::TRANSFER_DST,
        name,
    )
    .map_err(UploadError::Destination)?;

    let mut cb = pool.allocate_one()?;
    // SAFETY: freshly allocated, so not pending.
    let mut rec = unsafe { cb.begin() }?;
    // SAFETY: both buffers outlive the queue-idle wait below.
    unsafe { destination.record_copy_from(&mut rec, &staging) }?;
    rec.finish().map_err(UploadError::Record)?;

    let cb_infos = [vk::CommandBufferSubmitInfo::default()
        .command_buffer(cb.raw_command_buffer())];
    let submit = vk::SubmitInfo2::default().command_buffer_infos(&cb_infos);
    // SAFETY: cb is executable and was allocated from this device. No fence
    // is used; completion is observed by the queue-idle wait.
    unsafe {
        device.graphics_queue_submit2(
            std::slice::from_ref(&submit),
            vk::Fence::null(),
        )
    }
    .map_err(UploadError::Submit)?;
    device
        .graphics_queue_wait_idle()
        .map_err(UploadError::WaitIdle)?;

    tracing::debug!(
        "Uploaded {size} bytes into {:?} ({})",
        destination.raw_buffer(),
        name.unwrap_or("unnamed"),
    );
    drop(cb);
    drop(staging);
    Ok(destination)
}

// ---------------------------------------------------------------------------
// Geometry
// ---------------------------------------------------------------------------

/// Index data in either width the recorder can bind.
#[derive(Debug, Clone, Copy)]
pub enum Indices<'a> {
    U16(&'a [u16]),
    U32(&'a [u32]),
}

impl Indices<'_> {
    pub fn len(&self) -> usize {
        match self {
            Self::U16(i) => i.len(),
            Self::U32(i) => i.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn index_type(&self) -> vk::IndexType {
        match self {
            Self::U16(_) => vk::IndexType::UINT16,
            Self::U32(_) => vk::IndexType::UINT32,
        }
    }

    fn max(&self) -> Option<u32> {
        match self {
            Self::U16(i) => i.iter().copied().max().map(u32::from),
            Self::U32(i) => i.iter().copied().max(),
        }
    }
}

fn element_count(len: usize) -> Result<u32, UploadError> {
    u32::try_from(len).map_err(|_| UploadError::TooManyElements(len))
}

/// Reject indices that would read past the vertex buffer.
fn check_indices(
    indices: &Indices<'_>,
    vertex_count: u32,
) -> Result<(), UploadError> {
    match indices.max() {
        Some(index) if index >= vertex_count => {
            Err(UploadError::IndexOutOfRange {
                index,
                vertex_count,
            })
        }
        _ => Ok(()),
    }
}

/// Range-checked index count. `None` means plain vertex draws.
fn checked_index_count(
    indices: Option<&Indices<'_>>,
    vertex_count: u32,
) -> Result<Option<u32>, UploadError> {
    indices
        .map(|indices| {
            check_indices(indices, vertex_count)?;
            element_count(indices.len())
        })
        .transpose()
}

/// Device-local vertex data and optional indices.
#[derive(Debug)]
pub struct Geometry {
    index_buffer: Option<(DeviceLocalBuffer, vk::IndexType)>,
    vertex_buffer: Option<DeviceLocalBuffer>,
    vertex_count: u32,
    index_count: Option<u32>,
}

impl Geometry {
    pub fn upload<V: Vertex>(
        device: &Arc<Device>,
        pool: &CommandPool,
        vertices: &[V],
        indices: Option<Indices<'_>>,
    ) -> Result<Self, UploadError> {
        let vertex_count = element_count(vertices.len())?;
        let index_count = checked_index_count(indices.as_ref(), vertex_count)?;

        let vertex_buffer = upload_via_staging(
            device,
            pool,
            vertices,
            vk::BufferUsageFlags::VERTEX_BUFFER,
            Some("Vertices"),
        )?;

        // An empty index list keeps its zero count and draws nothing.
        let index_buffer = match indices.filter(|i| !i.is_empty()) {
            Some(indices) => {
                let usage = vk::BufferUsageFlags::INDEX_BUFFER;
                let buffer = match indices {
                    Indices::U16(data) => upload_via_staging(
                        device,
                        pool,
                        data,
                        usage,
                        Some("Indices"),
                    )?,
                    Indices::U32(data) => upload_via_staging(
                        device,
                        pool,
                        data,
                        usage,
                        Some("Indices"),
                    )?,
                };
                Some((buffer, indices.index_type()))
            }
            None => None,
        };

        Ok(Self {
            index_buffer,
            vertex_buffer: Some(vertex_buffer),
            vertex_count,
            index_count,
        })
    }

    /// Geometry produced entirely by the vertex shader, e.g. a fullscreen
    /// triangle. No buffers are bound.
    pub fn procedural(vertex_count: u32) -> Self {
        Self {
            index_buffer: None,
            vertex_buffer: None,
            vertex_count,
            index_count: None,
        }
    }

    pub fn vertex_buffer(&self) -> Option<&DeviceLocalBuffer> {
        self.vertex_buffer.as_ref()
    }

    pub fn index_buffer(&self) -> Option<(&DeviceLocalBuffer, vk::IndexType)> {
        self.index_buffer.as_ref().map(|(b, t)| (b, *t))
    }

    pub fn draw_call(&self) -> Option<DrawCall> {
        DrawCall::plan(self.vertex_count, self.index_count)
    }
}

// ---------------------------------------------------------------------------
// UniformSlots
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum CreateUniformSlotsError {
    #[error("Uniform buffer size must be nonzero")]
    ZeroSize,
    #[error("Failed to create uniform buffer: {0}")]
    Buffer(#[from] CreateBufferError),
    #[error("Failed to create uniform descriptors: {0}")]
    Descriptor(#[from] CreateDescriptorError),
}

#[derive(Debug, Error)]
pub enum WriteUniformsError {
    #[error("No uniform buffer for frame slot {0}")]
    SlotOutOfRange(usize),
    #[error(transparent)]
    Write(#[from] WriteBufferError),
}

/// One host-visible uniform buffer and descriptor set per frame slot.
///
/// A slot's buffer is only written after that slot's fence wait, so the
/// GPU never reads it mid-write.
#[derive(Debug)]
pub struct UniformSlots {
    sets: Vec<DescriptorSet>,
    _pool: DescriptorPool,
    buffers: Vec<HostVisibleBuffer>,
    layout: DescriptorSetLayout,
    size: vk::DeviceSize,
}

impl UniformSlots {
    pub fn new(
        device: &Arc<Device>,
        frames_in_flight: NonZeroUsize,
        size: vk::DeviceSize,
    ) -> Result<Self, CreateUniformSlotsError> {
        if size == 0 {
            return Err(CreateUniformSlotsError::ZeroSize);
        }
        let count = frames_in_flight.get();

        let layout = DescriptorSetLayout::uniform_buffer(
            device,
            vk::ShaderStageFlags::VERTEX,
        )?;
        let buffers = (0..count)
            .map(|slot| {
                HostVisibleBuffer::new(
                    device,
                    size,
                    vk::BufferUsageFlags::UNIFORM_BUFFER,
                    Some(&format!("Frame {slot} uniforms")),
                )
            })
            .collect::<Result<Vec<_>, _>>()?;
        let pool = DescriptorPool::for_layout(device, &layout, count as u32)?;
        let sets = pool.allocate_sets(&layout, count)?;

        for (set, buffer) in sets.iter().zip(&buffers) {
            // SAFETY: the buffer has UNIFORM_BUFFER usage, lives as long as
            // the set, and the freshly allocated set is not in use.
            unsafe { set.write_uniform_buffer(device, buffer, size) };
        }

        Ok(Self {
            sets,
            _pool: pool,
            buffers,
            layout,
            size,
        })
    }

    /// Copy `bytes` into the slot's uniform buffer.
    ///
    /// Call only after the slot's fence wait.
    pub fn write(
        &mut self,
        slot: usize,
        bytes: &[u8],
    ) -> Result<(), WriteUniformsError> {
        let buffer = self
            .buffers
            .get_mut(slot)
            .ok_or(WriteUniformsError::SlotOutOfRange(slot))?;
        buffer.write_pod(bytes)?;
        Ok(())
    }

    pub fn descriptor_set(&self, slot: usize) -> Option<vk::DescriptorSet> {
        self.sets.get(slot).map(DescriptorSet::raw_descriptor_set)
    }

    pub fn layout(&self) -> &DescriptorSetLayout {
        &self.layout
    }

    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }
}

// ---------------------------------------------------------------------------
// GpuResources
// ---------------------------------------------------------------------------

/// The frame-independent resources, uniforms first so they drop first.
#[derive(Debug, Default)]
pub struct GpuResources {
    pub uniforms: Option<UniformSlots>,
    pub geometry: Option<Geometry>,
}

impl GpuResources {
    /// Upload geometry, then create the per-slot uniforms.
    ///
    /// Empty `vertices` leave the geometry out. `uniform_size` of `None`
    /// leaves the uniforms out.
    pub fn new<V: Vertex>(
        device: &Arc<Device>,
        pool: &CommandPool,
        vertices: &[V],
        indices: Option<Indices<'_>>,
        uniform_size: Option<vk::DeviceSize>,
        frames_in_flight: NonZeroUsize,
    ) -> Result<Self, CreateResourcesError> {
        let geometry = if vertices.is_empty() {
            None
        } else {
            Some(Geometry::upload(device, pool, vertices, indices)?)
        };
        let uniforms = uniform_size
            .map(|size| UniformSlots::new(device, frames_in_flight, size))
            .transpose()?;
        Ok(Self { uniforms, geometry })
    }
}

#[derive(Debug, Error)]
pub enum CreateResourcesError {
    #[error("Failed to upload geometry: {0}")]
    Upload(#[from] UploadError),
    #[error("Failed to create uniform buffers: {0}")]
    Uniforms(#[from] CreateUniformSlotsError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_width_picks_index_type() {
        assert_eq!(Indices::U16(&[0, 1, 2]).index_type(), vk::IndexType::UINT16);
        assert_eq!(Indices::U32(&[0, 1, 2]).index_type(), vk::IndexType::UINT32);
        assert_eq!(Indices::U32(&[0, 1, 2, 2, 3, 0]).len(), 6);
    }

    #[test]
    fn indices_past_the_last_vertex_are_rejected() {
        assert!(check_indices(&Indices::U16(&[0, 1, 2, 2, 3, 0]), 4).is_ok());
        assert!(matches!(
            check_indices(&Indices::U32(&[0, 4]), 4),
            Err(UploadError::IndexOutOfRange {
                index: 4,
                vertex_count: 4
            })
        ));
        assert!(check_indices(&Indices::U16(&[]), 0).is_ok());
    }

    #[test]
    fn empty_indices_plan_no_draw() {
        let count = checked_index_count(Some(&Indices::U16(&[])), 4).unwrap();
        assert_eq!(count, Some(0));
        assert_eq!(DrawCall::plan(4, count), None);
        assert_eq!(checked_index_count(None, 4).unwrap(), None);
        assert_eq!(
            checked_index_count(Some(&Indices::U32(&[0, 1, 3])), 4).unwrap(),
            Some(3)
        );
        assert!(matches!(
            checked_index_count(Some(&Indices::U16(&[5])), 4),
            Err(UploadError::IndexOutOfRange { index: 5, .. })
        ));
    }

    #[test]
    fn procedural_geometry_draws_without_buffers() {
        let geometry = Geometry::procedural(3);
        assert!(geometry.vertex_buffer().is_none());
        assert!(geometry.index_buffer().is_none());
        assert_eq!(
            geometry.draw_call(),
            Some(DrawCall::Vertices { vertex_count: 3 })
        );
    }

    #[test]
    fn element_counts_fit_in_u32() {
        assert_eq!(element_count(6).unwrap(), 6);
        assert!(element_count(u32::MAX as usize).is_ok());
    }
}
