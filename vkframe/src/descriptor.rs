//! Descriptor set layouts, pools and sets.
//!
//! A pool is sized from the layout it serves, so it holds exactly the sets
//! asked for. Sets are plain handles that go away with their pool.

use std::collections::BTreeMap;
use std::sync::Arc;

use ash::vk;
use thiserror::Error;

use crate::buffer::BufferHandle;
use crate::device::Device;

#[derive(Debug, Error)]
pub enum CreateDescriptorError {
    #[error("Vulkan error creating descriptor set layout: {0}")]
    Layout(vk::Result),
    #[error("Vulkan error creating descriptor pool: {0}")]
    Pool(vk::Result),
    #[error("Vulkan error allocating descriptor sets: {0}")]
    Allocate(vk::Result),
}

/// Binding of the per-slot uniform buffer.
pub const UNIFORM_BINDING: u32 = 0;

/// Descriptors of each type needed for `set_count` sets of `bindings`.
fn pool_sizes(
    bindings: &[vk::DescriptorSetLayoutBinding<'_>],
    set_count: u32,
) -> Vec<vk::DescriptorPoolSize> {
    let mut per_type = BTreeMap::<i32, u32>::new();
    for binding in bindings {
        *per_type.entry(binding.descriptor_type.as_raw()).or_default() +=
            binding.descriptor_count;
    }
    per_type
        .into_iter()
        .map(|(ty, count)| vk::DescriptorPoolSize {
            ty: vk::DescriptorType::from_raw(ty),
            descriptor_count: count * set_count,
        })
        .collect()
}

pub struct DescriptorSetLayout {
    device: Arc<Device>,
    raw: vk::DescriptorSetLayout,
    bindings: Vec<vk::DescriptorSetLayoutBinding<'static>>,
}

impl std::fmt::Debug for DescriptorSetLayout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DescriptorSetLayout")
            .field("raw", &self.raw)
            .field("bindings", &self.bindings.len())
            .finish_non_exhaustive()
    }
}

impl DescriptorSetLayout {
    /// Bindings must not carry immutable samplers.
    pub fn new(
        device: &Arc<Device>,
        bindings: Vec<vk::DescriptorSetLayoutBinding<'static>>,
    ) -> Result<Self, CreateDescriptorError> {
        let info = vk::DescriptorSetLayoutCreateInfo::default().bindings(&bindings);
        // SAFETY: info only borrows bindings.
        let raw = unsafe { device.create_raw_descriptor_set_layout(&info) }
            .map_err(CreateDescriptorError::Layout)?;
        Ok(Self {
            device: Arc::clone(device),
            raw,
            bindings,
        })
    }

    /// One uniform buffer at [`UNIFORM_BINDING`], visible to `stages`.
    pub fn uniform_buffer(
        device: &Arc<Device>,
        stages: vk::ShaderStageFlags,
    ) -> Result<Self, CreateDescriptorError> {
        Self::new(
            device,
            vec![vk::DescriptorSetLayoutBinding {
                binding: UNIFORM_BINDING,
                descriptor_type: vk::DescriptorType::UNIFORM_BUFFER,
                descriptor_count: 1,
                stage_flags: stages,
                ..Default::default()
            }],
        )
    }

    pub fn raw_descriptor_set_layout(&self) -> vk::DescriptorSetLayout {
        self.raw
    }
}

impl Drop for DescriptorSetLayout {
    fn drop(&mut self) {
        tracing::debug!("Dropping descriptor set layout {:?}", self.raw);
        // SAFETY: pipeline layouts built from it are already gone.
        unsafe { self.device.destroy_raw_descriptor_set_layout(self.raw) };
    }
}

/// Frees every set it allocated when dropped.
pub struct DescriptorPool {
    device: Arc<Device>,
    raw: vk::DescriptorPool,
}

impl std::fmt::Debug for DescriptorPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("DescriptorPool").field(&self.raw).finish()
    }
}

impl DescriptorPool {
    /// A pool with room for exactly `set_count` sets of `layout`.
    pub fn for_layout(
        device: &Arc<Device>,
        layout: &DescriptorSetLayout,
        set_count: u32,
    ) -> Result<Self, CreateDescriptorError> {
        let sizes = pool_sizes(&layout.bindings, set_count);
        let info = vk::DescriptorPoolCreateInfo::default()
            .max_sets(set_count)
            .pool_sizes(&sizes);
        // SAFETY: info only borrows sizes.
        let raw = unsafe { device.create_raw_descriptor_pool(&info) }
            .map_err(CreateDescriptorError::Pool)?;
        Ok(Self {
            device: Arc::clone(device),
            raw,
        })
    }

    pub fn allocate_sets(
        &self,
        layout: &DescriptorSetLayout,
        count: usize,
    ) -> Result<Vec<DescriptorSet>, CreateDescriptorError> {
        let layouts = vec![layout.raw; count];
        let info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(self.raw)
            .set_layouts(&layouts);
        // SAFETY: pool and layout both belong to this device.
        let raws = unsafe { self.device.allocate_raw_descriptor_sets(&info) }
            .map_err(CreateDescriptorError::Allocate)?;
        Ok(raws.into_iter().map(DescriptorSet).collect())
    }
}

impl Drop for DescriptorPool {
    fn drop(&mut self) {
        tracing::debug!("Dropping descriptor pool {:?}", self.raw);
        // SAFETY: no pending submission binds a set from this pool.
        unsafe { self.device.destroy_raw_descriptor_pool(self.raw) };
    }
}

/// A set owned by its [`DescriptorPool`]. Do not use it after the pool
/// drops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescriptorSet(vk::DescriptorSet);

impl DescriptorSet {
    pub fn raw_descriptor_set(&self) -> vk::DescriptorSet {
        self.0
    }

    /// Point [`UNIFORM_BINDING`] at the first `range` bytes of `buffer`.
    ///
    /// # Safety
    /// - `buffer` needs `UNIFORM_BUFFER` usage, must belong to `device` and
    ///   must outlive every submission binding this set.
    /// - No pending submission may use the set.
    pub unsafe fn write_uniform_buffer(
        &self,
        device: &Device,
        buffer: impl BufferHandle,
        range: vk::DeviceSize,
    ) {
        let info = vk::DescriptorBufferInfo {
            buffer: buffer.raw_buffer(),
            offset: 0,
            range,
        };
        let write = vk::WriteDescriptorSet::default()
            .dst_set(self.0)
            .dst_binding(UNIFORM_BINDING)
            .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
            .buffer_info(std::slice::from_ref(&info));
        // SAFETY: caller contract.
        unsafe { device.update_raw_descriptor_sets(std::slice::from_ref(&write)) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn binding(
        binding: u32,
        descriptor_type: vk::DescriptorType,
        descriptor_count: u32,
    ) -> vk::DescriptorSetLayoutBinding<'static> {
        vk::DescriptorSetLayoutBinding {
            binding,
            descriptor_type,
            descriptor_count,
            ..Default::default()
        }
    }

    #[test]
    fn one_uniform_per_set() {
        let sizes = pool_sizes(&[binding(UNIFORM_BINDING, vk::DescriptorType::UNIFORM_BUFFER, 1)], 3);
        assert_eq!(sizes.len(), 1);
        assert_eq!(sizes[0].ty, vk::DescriptorType::UNIFORM_BUFFER);
        assert_eq!(sizes[0].descriptor_count, 3);
    }

    #[test]
    fn same_types_are_summed() {
        let bindings = [
            binding(0, vk::DescriptorType::UNIFORM_BUFFER, 1),
            binding(1, vk::DescriptorType::COMBINED_IMAGE_SAMPLER, 4),
            binding(2, vk::DescriptorType::UNIFORM_BUFFER, 2),
        ];
        let sizes = pool_sizes(&bindings, 2);
        let count_of = |ty| {
            sizes
                .iter()
                .find(|size| size.ty == ty)
                .map(|size| size.descriptor_count)
        };
        assert_eq!(sizes.len(), 2);
        assert_eq!(count_of(vk::DescriptorType::UNIFORM_BUFFER), Some(6));
        assert_eq!(count_of(vk::DescriptorType::COMBINED_IMAGE_SAMPLER), Some(8));
    }

    #[test]
    fn no_bindings_no_sizes() {
        assert!(pool_sizes(&[], 4).is_empty());
    }
}
