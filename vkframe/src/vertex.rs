//! Vertex memory layout descriptions.
//!
//! The layout of a vertex record is declared once, next to the type, and
//! turned into Vulkan input descriptions when the pipeline is built. The
//! buffer walking code never needs to know field offsets.

use ash::vk;
use bytemuck::Pod;

/// Vertex buffers are always bound at binding 0.
pub const VERTEX_BINDING: u32 = 0;

/// One attribute of a vertex record, read by the shader at `location`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VertexAttribute {
    pub location: u32,
    pub format: vk::Format,
    pub offset: u32,
}

/// Stride and attributes of the single per-vertex binding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VertexLayout {
    pub stride: u32,
    pub attributes: Vec<VertexAttribute>,
}

impl VertexLayout {
    pub fn binding_description(&self) -> vk::VertexInputBindingDescription {
        vk::VertexInputBindingDescription::default()
            .binding(VERTEX_BINDING)
            .stride(self.stride)
            .input_rate(vk::VertexInputRate::VERTEX)
    }

    pub fn attribute_descriptions(
        &self,
    ) -> Vec<vk::VertexInputAttributeDescription> {
        self.attributes
            .iter()
            .map(|a| {
                vk::VertexInputAttributeDescription::default()
                    .binding(VERTEX_BINDING)
                    .location(a.location)
                    .format(a.format)
                    .offset(a.offset)
            })
            .collect()
    }
}

/// A plain-old-data vertex record that knows its own layout.
///
/// ```ignore
/// #[repr(C)]
/// #[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
/// struct ColorVertex { pos: [f32; 2], color: [f32; 3] }
///
/// impl Vertex for ColorVertex {
///     fn layout() -> VertexLayout {
///         VertexLayout {
///             stride: size_of::<Self>() as u32,
///             attributes: vec![
///                 VertexAttribute { location: 0, format: vk::Format::R32G32_SFLOAT,
///                     offset: offset_of!(Self, pos) as u32 },
///                 VertexAttribute { location: 1, format: vk::Format::R32G32B32_SFLOAT,
///                     offset: offset_of!(Self, color) as u32 },
///             ],
///         }
///     }
/// }
/// ```
pub trait Vertex: Pod {
    fn layout() -> VertexLayout;
}

#[cfg(test)]
mod tests {
    use std::mem::{offset_of, size_of};

    use super::*;

    #[repr(C)]
    #[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
    struct TestVertex {
        pos: [f32; 3],
        uv: [f32; 2],
    }

    impl Vertex for TestVertex {
        fn layout() -> VertexLayout {
            VertexLayout {
                stride: size_of::<Self>() as u32,
                attributes: vec![
                    VertexAttribute {
                        location: 0,
                        format: vk::Format::R32G32B32_SFLOAT,
                        offset: offset_of!(Self, pos) as u32,
                    },
                    VertexAttribute {
                        location: 1,
                        format: vk::Format::R32G32_SFLOAT,
                        offset: offset_of!(Self, uv) as u32,
                    },
                ],
            }
        }
    }

    #[test]
    fn binding_uses_stride_and_per_vertex_rate() {
        let binding = TestVertex::layout().binding_description();
        assert_eq!(binding.binding, VERTEX_BINDING);
        assert_eq!(binding.stride, 20);
        assert_eq!(binding.input_rate, vk::VertexInputRate::VERTEX);
    }

    #[test]
    fn attributes_keep_location_format_and_offset() {
        let attrs = TestVertex::layout().attribute_descriptions();
        assert_eq!(attrs.len(), 2);
        assert_eq!(attrs[0].location, 0);
        assert_eq!(attrs[0].offset, 0);
        assert_eq!(attrs[1].location, 1);
        assert_eq!(attrs[1].format, vk::Format::R32G32_SFLOAT);
        assert_eq!(attrs[1].offset, 12);
        assert!(attrs.iter().all(|a| a.binding == VERTEX_BINDING));
    }
}
