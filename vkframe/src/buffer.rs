//! Buffers backed by `gpu-allocator` memory.
//!
//! [`HostVisibleBuffer`] stays mapped for its whole lifetime and backs
//! staging copies and per-slot uniforms. [`DeviceLocalBuffer`] lives in
//! GPU-only memory and is filled by a recorded copy, see
//! [`crate::resources::upload_via_staging`].

use std::marker::PhantomData;
use std::sync::Arc;

use ash::vk;
use bytemuck::Pod;
use gpu_allocator::{AllocationError, vulkan::Allocation};
use thiserror::Error;

use crate::command::Recording;
use crate::device::{Device, MemoryUsage};

/// Anything that can hand out a raw `VkBuffer` for command recording.
pub trait BufferHandle {
    fn raw_buffer(&self) -> vk::Buffer;
}

impl<T> BufferHandle for &T
where
    T: BufferHandle + ?Sized,
{
    fn raw_buffer(&self) -> vk::Buffer {
        (*self).raw_buffer()
    }
}

#[derive(Debug, Error)]
pub enum CreateBufferError {
    #[error("Buffer size must be nonzero")]
    ZeroSize,

    #[error("Vulkan error creating buffer: {0}")]
    CreateBuffer(vk::Result),

    #[error("Could not allocate buffer memory: {0}")]
    AllocateMemory(AllocationError),

    #[error("Vulkan error binding buffer memory: {0}")]
    BindMemory(vk::Result),
}

#[derive(Debug, Error)]
pub enum WriteBufferError {
    #[error("{data_bytes} bytes do not fit a {buffer_bytes} byte buffer")]
    DataTooLarge {
        data_bytes: usize,
        buffer_bytes: vk::DeviceSize,
    },

    #[error("Vulkan error flushing written range: {0}")]
    FlushMemory(vk::Result),

    #[error("Buffer memory is not mapped")]
    NotMapped,
}

#[derive(Debug, Error)]
pub enum CopyBufferError {
    #[error("Cannot copy {src_bytes} bytes into a {dst_bytes} byte buffer")]
    SourceTooLarge {
        src_bytes: vk::DeviceSize,
        dst_bytes: vk::DeviceSize,
    },
}

/// Round `len` up to a multiple of `atom`, the granularity non-coherent
/// flushes must respect.
fn flush_size(len: vk::DeviceSize, atom: vk::DeviceSize) -> vk::DeviceSize {
    len.div_ceil(atom) * atom
}

fn check_write(
    data_bytes: usize,
    buffer_bytes: vk::DeviceSize,
) -> Result<(), WriteBufferError> {
    if data_bytes as vk::DeviceSize > buffer_bytes {
        Err(WriteBufferError::DataTooLarge {
            data_bytes,
            buffer_bytes,
        })
    } else {
        Ok(())
    }
}

/// Where a [`Buffer`]'s memory lives.
pub trait Residency: std::fmt::Debug {
    const USAGE: MemoryUsage;
}

/// Mapped, CPU-writable memory.
#[derive(Debug)]
pub enum HostVisible {}

impl Residency for HostVisible {
    const USAGE: MemoryUsage = MemoryUsage::CpuToGpu;
}

/// GPU-only memory, written by transfers.
#[derive(Debug)]
pub enum DeviceLocal {}

impl Residency for DeviceLocal {
    const USAGE: MemoryUsage = MemoryUsage::GpuOnly;
}

pub type HostVisibleBuffer = Buffer<HostVisible>;
pub type DeviceLocalBuffer = Buffer<DeviceLocal>;

/// A buffer with its own allocation. Destroyed with its memory on drop.
pub struct Buffer<L: Residency> {
    parent: Arc<Device>,
    handle: vk::Buffer,
    allocation: Option<Allocation>,
    size: vk::DeviceSize,
    _location: PhantomData<L>,
}

impl<L: Residency> std::fmt::Debug for Buffer<L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Buffer")
            .field("handle", &self.handle)
            .field("size", &self.size)
            .field("usage", &L::USAGE)
            .finish_non_exhaustive()
    }
}

impl<L: Residency> Buffer<L> {
    pub fn new(
        device: &Arc<Device>,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        name: Option<&str>,
    ) -> Result<Self, CreateBufferError> {
        if size == 0 {
            return Err(CreateBufferError::ZeroSize);
        }

        let create_info = vk::BufferCreateInfo::default()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        // SAFETY: plain create info, nothing borrowed.
        let handle = unsafe { device.create_raw_buffer(&create_info) }
            .map_err(CreateBufferError::CreateBuffer)?;

        // SAFETY: the buffer was just created from device.
        if let Err(e) = unsafe { device.set_object_name_str(handle, name) } {
            tracing::warn!("Failed to name buffer {handle:?}: {e}");
        }

        // SAFETY: the buffer was just created from device.
        let reqs = unsafe { device.get_raw_buffer_memory_requirements(handle) };
        let allocation = match device.allocate_memory(
            name.unwrap_or("buffer"),
            reqs,
            L::USAGE,
            true,
        ) {
            Ok(allocation) => allocation,
            Err(e) => {
                // SAFETY: unbound and unused, only this scope knows it.
                unsafe { device.destroy_raw_buffer(handle) };
                return Err(CreateBufferError::AllocateMemory(e));
            }
        };

        // SAFETY: allocation came from device's allocator for these
        // requirements and the buffer has no memory bound yet.
        let bound = unsafe {
            device.bind_raw_buffer_memory(
                handle,
                allocation.memory(),
                allocation.offset(),
            )
        };
        if let Err(e) = bound {
            if let Err(free_err) = device.free_memory(allocation) {
                tracing::error!("Failed to free buffer memory: {free_err}");
            }
            // SAFETY: unused, only this scope knows it.
            unsafe { device.destroy_raw_buffer(handle) };
            return Err(CreateBufferError::BindMemory(e));
        }

        Ok(Self {
            parent: Arc::clone(device),
            handle,
            allocation: Some(allocation),
            size,
            _location: PhantomData,
        })
    }

    pub fn raw_buffer(&self) -> vk::Buffer {
        self.handle
    }

    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }

    pub fn parent(&self) -> &Arc<Device> {
        &self.parent
    }
}

impl<L: Residency> BufferHandle for Buffer<L> {
    fn raw_buffer(&self) -> vk::Buffer {
        self.handle
    }
}

impl<L: Residency> Drop for Buffer<L> {
    fn drop(&mut self) {
        tracing::debug!("Dropping buffer {:?}", self.handle);
        // SAFETY: owners drop buffers only once no submission reads them.
        unsafe { self.parent.destroy_raw_buffer(self.handle) };

        if let Some(allocation) = self.allocation.take()
            && let Err(e) = self.parent.free_memory(allocation)
        {
            tracing::error!("Failed to free buffer memory: {e}");
        }
    }
}

impl Buffer<HostVisible> {
    /// Copy `data` to the start of the buffer and make it visible to the
    /// device.
    ///
    /// No pending submission may read the buffer. For per-slot uniforms
    /// the slot's fence wait guarantees that.
    pub fn write_pod<T: Pod>(
        &mut self,
        data: &[T],
    ) -> Result<(), WriteBufferError> {
        let bytes: &[u8] = bytemuck::cast_slice(data);
        check_write(bytes.len(), self.size)?;

        let allocation =
            self.allocation.as_ref().ok_or(WriteBufferError::NotMapped)?;
        let dst = allocation.mapped_ptr().ok_or(WriteBufferError::NotMapped)?;
        // SAFETY: dst is the start of this buffer's mapping, which holds at
        // least bytes.len() bytes after the check above.
        unsafe {
            std::ptr::copy_nonoverlapping(
                bytes.as_ptr(),
                dst.as_ptr().cast::<u8>(),
                bytes.len(),
            );
        }

        if bytes.is_empty()
            || allocation
                .memory_properties()
                .contains(vk::MemoryPropertyFlags::HOST_COHERENT)
        {
            return Ok(());
        }

        let atom = self.parent.non_coherent_atom_size();
        // Non-coherent allocations are padded to the atom, so the rounded
        // range stays inside the allocation.
        debug_assert_eq!(allocation.offset() % atom, 0);
        let range = vk::MappedMemoryRange::default()
            // SAFETY: the allocation stays live as long as self.
            .memory(unsafe { allocation.memory() })
            .offset(allocation.offset())
            .size(flush_size(bytes.len() as vk::DeviceSize, atom));
        // SAFETY: range covers mapped memory of this device.
        unsafe {
            self.parent
                .flush_raw_mapped_memory_ranges(std::slice::from_ref(&range))
        }
        .map_err(WriteBufferError::FlushMemory)
    }
}

impl Buffer<DeviceLocal> {
    /// Record a copy of all of `src` into the start of this buffer.
    ///
    /// # Safety
    /// - No render pass may be active in `recording`.
    /// - `src` and `self` must outlive the copy's execution.
    /// - `src` needs `TRANSFER_SRC` usage and `self` needs `TRANSFER_DST`.
    pub unsafe fn record_copy_from(
        &mut self,
        recording: &mut Recording<'_>,
        src: &HostVisibleBuffer,
    ) -> Result<(), CopyBufferError> {
        if src.size > self.size {
            return Err(CopyBufferError::SourceTooLarge {
                src_bytes: src.size,
                dst_bytes: self.size,
            });
        }

        let region = vk::BufferCopy::default().size(src.size);
        // SAFETY: caller contract; the region fits both buffers.
        unsafe {
            self.parent.cmd_copy_buffer(
                recording.raw_command_buffer(),
                src.handle,
                self.handle,
                std::slice::from_ref(&region),
            )
        };
        Ok(())
    }
}
