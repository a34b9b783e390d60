//! Memory type choice and the `gpu-allocator` front end.

use ash::vk;
use gpu_allocator::{
    AllocationError, MemoryLocation,
    vulkan::{Allocation, AllocationCreateDesc, AllocationScheme, Allocator},
};

use super::Device;

/// How the CPU and GPU will touch an allocation.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum MemoryUsage {
    /// Written by transfers, read by shaders. Never mapped.
    GpuOnly,
    /// Written through a persistent mapping, read by the GPU.
    CpuToGpu,
}

impl MemoryUsage {
    fn location(self) -> MemoryLocation {
        match self {
            Self::GpuOnly => MemoryLocation::GpuOnly,
            Self::CpuToGpu => MemoryLocation::CpuToGpu,
        }
    }

    /// Higher is better; `None` rules the type out.
    fn score(self, flags: vk::MemoryPropertyFlags) -> Option<u8> {
        let local = flags.contains(vk::MemoryPropertyFlags::DEVICE_LOCAL);
        let visible = flags.contains(vk::MemoryPropertyFlags::HOST_VISIBLE);
        match self {
            Self::GpuOnly if local => Some(if visible { 1 } else { 2 }),
            Self::CpuToGpu if visible => Some(if local { 2 } else { 1 }),
            _ => None,
        }
    }
}

/// The best type index allowed by `type_bits` for `usage`. Lower indices
/// win ties.
pub(super) fn select_memory_type(
    props: &vk::PhysicalDeviceMemoryProperties,
    type_bits: u32,
    usage: MemoryUsage,
) -> Option<u32> {
    let count = props.memory_type_count as usize;
    let mut best: Option<(u32, u8)> = None;
    for (index, ty) in props.memory_types[..count].iter().enumerate() {
        if type_bits & (1 << index) == 0 {
            continue;
        }
        let Some(score) = usage.score(ty.property_flags) else {
            continue;
        };
        if best.is_none_or(|(_, s)| score > s) {
            best = Some((index as u32, score));
        }
    }
    best.map(|(index, _)| index)
}

/// Pin `reqs` to `type_index`. Host-visible memory that is not coherent
/// is padded to the flush atom so flushes never touch a neighbour.
pub(super) fn pinned_requirements(
    reqs: vk::MemoryRequirements,
    type_index: u32,
    flags: vk::MemoryPropertyFlags,
    atom: vk::DeviceSize,
) -> vk::MemoryRequirements {
    let needs_padding = flags.contains(vk::MemoryPropertyFlags::HOST_VISIBLE)
        && !flags.contains(vk::MemoryPropertyFlags::HOST_COHERENT);
    vk::MemoryRequirements {
        size: if needs_padding {
            reqs.size.next_multiple_of(atom)
        } else {
            reqs.size
        },
        alignment: if needs_padding {
            reqs.alignment.max(atom)
        } else {
            reqs.alignment
        },
        memory_type_bits: 1 << type_index,
    }
}

impl Device {
    fn allocator(&self) -> std::sync::MutexGuard<'_, Allocator> {
        self.allocator
            .as_ref()
            .expect("allocator is dropped only during Device::drop")
            .lock()
            .expect("allocator lock poisoned")
    }

    /// Allocate memory for `reqs` from the type that best fits `usage`.
    pub fn allocate_memory(
        &self,
        name: &str,
        reqs: vk::MemoryRequirements,
        usage: MemoryUsage,
        linear: bool,
    ) -> Result<Allocation, AllocationError> {
        let requirements =
            match select_memory_type(&self.memory_properties, reqs.memory_type_bits, usage)
            {
                Some(index) => pinned_requirements(
                    reqs,
                    index,
                    self.memory_properties.memory_types[index as usize].property_flags,
                    self.non_coherent_atom_size(),
                ),
                None => reqs,
            };
        self.allocator().allocate(&AllocationCreateDesc {
            name,
            requirements,
            location: usage.location(),
            linear,
            allocation_scheme: AllocationScheme::GpuAllocatorManaged,
        })
    }

    pub fn free_memory(&self, allocation: Allocation) -> Result<(), AllocationError> {
        self.allocator().free(allocation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vk::MemoryPropertyFlags as F;

    fn props(types: &[vk::MemoryPropertyFlags]) -> vk::PhysicalDeviceMemoryProperties {
        let mut props = vk::PhysicalDeviceMemoryProperties {
            memory_type_count: types.len() as u32,
            ..Default::default()
        };
        for (slot, flags) in props.memory_types.iter_mut().zip(types) {
            slot.property_flags = *flags;
        }
        props
    }

    fn typical() -> vk::PhysicalDeviceMemoryProperties {
        props(&[
            F::HOST_VISIBLE | F::HOST_COHERENT,
            F::DEVICE_LOCAL | F::HOST_VISIBLE,
            F::DEVICE_LOCAL,
        ])
    }

    #[test]
    fn gpu_only_avoids_mappable_memory() {
        assert_eq!(
            select_memory_type(&typical(), 0b111, MemoryUsage::GpuOnly),
            Some(2)
        );
        assert_eq!(
            select_memory_type(&typical(), 0b011, MemoryUsage::GpuOnly),
            Some(1)
        );
    }

    #[test]
    fn cpu_to_gpu_prefers_resizable_bar() {
        assert_eq!(
            select_memory_type(&typical(), 0b111, MemoryUsage::CpuToGpu),
            Some(1)
        );
        assert_eq!(
            select_memory_type(&typical(), 0b101, MemoryUsage::CpuToGpu),
            Some(0)
        );
        assert_eq!(
            select_memory_type(&typical(), 0b100, MemoryUsage::CpuToGpu),
            None
        );
    }

    #[test]
    fn ties_go_to_lowest_index() {
        let same = props(&[F::DEVICE_LOCAL, F::DEVICE_LOCAL]);
        assert_eq!(
            select_memory_type(&same, 0b11, MemoryUsage::GpuOnly),
            Some(0)
        );
    }

    #[test]
    fn non_coherent_memory_is_padded_to_atom() {
        let reqs = vk::MemoryRequirements {
            size: 100,
            alignment: 16,
            memory_type_bits: 0b111,
        };
        let padded = pinned_requirements(reqs, 1, F::HOST_VISIBLE, 64);
        assert_eq!((padded.size, padded.alignment), (128, 64));
        assert_eq!(padded.memory_type_bits, 0b010);

        let coherent =
            pinned_requirements(reqs, 0, F::HOST_VISIBLE | F::HOST_COHERENT, 64);
        assert_eq!((coherent.size, coherent.alignment), (100, 16));

        let local = pinned_requirements(reqs, 2, F::DEVICE_LOCAL, 64);
        assert_eq!((local.size, local.alignment), (100, 16));
    }
}
