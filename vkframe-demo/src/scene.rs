use std::fs;
use std::mem::{offset_of, size_of};
use std::path::Path;

use eyre::WrapErr;
use glam::{Mat4, Vec3};
use vkframe::ash::vk;
use vkframe::presenter::Scene;
use vkframe::resources::Indices;
use vkframe::vertex::{Vertex, VertexAttribute, VertexLayout};

#[repr(C)]
#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
pub struct ColorVertex {
    pub pos: [f32; 2],
    pub color: [f32; 3],
}

impl Vertex for ColorVertex {
    fn layout() -> VertexLayout {
        VertexLayout {
            stride: size_of::<Self>() as u32,
            attributes: vec![
                VertexAttribute {
                    location: 0,
                    format: vk::Format::R32G32_SFLOAT,
                    offset: offset_of!(Self, pos) as u32,
                },
                VertexAttribute {
                    location: 1,
                    format: vk::Format::R32G32B32_SFLOAT,
                    offset: offset_of!(Self, color) as u32,
                },
            ],
        }
    }
}

pub const QUAD_VERTICES: [ColorVertex; 4] = [
    ColorVertex {
        pos: [-0.5, -0.5],
        color: [1.0, 0.0, 0.0],
    },
    ColorVertex {
        pos: [0.5, -0.5],
        color: [0.0, 1.0, 0.0],
    },
    ColorVertex {
        pos: [0.5, 0.5],
        color: [0.0, 0.0, 1.0],
    },
    ColorVertex {
        pos: [-0.5, 0.5],
        color: [1.0, 1.0, 1.0],
    },
];

pub const QUAD_INDICES: [u16; 6] = [0, 1, 2, 2, 3, 0];

pub fn quad_indices() -> Indices<'static> {
    Indices::U16(&QUAD_INDICES)
}

/// Vertex-stage uniform block at set 0, binding 0.
#[repr(C)]
#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
pub struct SceneUniforms {
    pub mvp: Mat4,
}

pub const UNIFORM_SIZE: vk::DeviceSize = size_of::<SceneUniforms>() as u64;

/// Radians per second.
const SPIN_RATE: f32 = std::f32::consts::FRAC_PI_2;

impl SceneUniforms {
    /// The quad spun about Z by `elapsed_secs`, viewed from +Z.
    pub fn at(elapsed_secs: f32, extent: vk::Extent2D) -> Self {
        let aspect = extent.width.max(1) as f32 / extent.height.max(1) as f32;
        let model = Mat4::from_rotation_z(elapsed_secs * SPIN_RATE);
        let view = Mat4::look_at_rh(Vec3::new(0.0, 0.0, 2.0), Vec3::ZERO, Vec3::Y);
        let mut proj = Mat4::perspective_rh(45f32.to_radians(), aspect, 0.1, 10.0);
        // Vulkan clip space points Y down.
        proj.y_axis.y *= -1.0;
        Self {
            mvp: proj * view * model,
        }
    }
}

/// Shader bytes, read once and kept for every presenter rebuild.
#[derive(Debug, Default)]
pub struct SceneAssets {
    shaders: Option<(Vec<u8>, Vec<u8>)>,
}

impl SceneAssets {
    pub fn load(vertex: Option<&Path>, fragment: Option<&Path>) -> eyre::Result<Self> {
        let read = |path: &Path| {
            fs::read(path).wrap_err_with(|| format!("Failed to read shader {}", path.display()))
        };
        let shaders = match (vertex, fragment) {
            (Some(vertex), Some(fragment)) => Some((read(vertex)?, read(fragment)?)),
            _ => None,
        };
        Ok(Self { shaders })
    }

    pub fn has_shaders(&self) -> bool {
        self.shaders.is_some()
    }

    /// The indexed quad with per-frame uniforms, or a clear-only scene.
    pub fn scene(&self) -> Scene<'_, ColorVertex> {
        match &self.shaders {
            Some((vertex, fragment)) => Scene {
                vertex_shader: Some(vertex.as_slice()),
                fragment_shader: Some(fragment.as_slice()),
                vertices: &QUAD_VERTICES,
                indices: Some(quad_indices()),
                procedural_vertex_count: None,
                uniform_size: Some(UNIFORM_SIZE),
            },
            None => Scene::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clear_only_without_shaders() {
        let assets = SceneAssets::default();
        let scene = assets.scene();
        assert!(scene.vertex_shader.is_none());
        assert!(scene.vertices.is_empty());
        assert!(scene.uniform_size.is_none());
    }

    #[test]
    fn shaded_scene_draws_the_quad() {
        let assets = SceneAssets {
            shaders: Some((vec![0; 4], vec![1; 4])),
        };
        let scene = assets.scene();
        assert_eq!(scene.fragment_shader, Some(&[1u8; 4][..]));
        assert_eq!(scene.vertices.len(), 4);
        assert_eq!(scene.uniform_size, Some(UNIFORM_SIZE));
    }

    #[test]
    fn missing_shader_file_is_reported() {
        let missing = Path::new("/nonexistent/quad.vert.spv");
        let err = SceneAssets::load(Some(missing), Some(missing)).unwrap_err();
        assert!(err.to_string().contains("quad.vert.spv"));
    }

    #[test]
    fn vertex_layout_matches_struct() {
        let layout = ColorVertex::layout();
        assert_eq!(layout.stride, 20);
        assert_eq!(layout.attributes[0].offset, 0);
        assert_eq!(layout.attributes[1].offset, 8);
    }

    #[test]
    fn quad_indices_stay_in_range() {
        assert!(
            QUAD_INDICES
                .iter()
                .all(|&i| (i as usize) < QUAD_VERTICES.len())
        );
        assert_eq!(quad_indices().len(), 6);
    }

    #[test]
    fn uniforms_are_one_matrix() {
        assert_eq!(UNIFORM_SIZE, 64);
        let uniforms = SceneUniforms::at(0.0, vk::Extent2D {
            width: 1280,
            height: 720,
        });
        assert_eq!(bytemuck::bytes_of(&uniforms).len(), 64);
    }

    #[test]
    fn quad_center_projects_to_screen_center() {
        let uniforms = SceneUniforms::at(1.3, vk::Extent2D {
            width: 800,
            height: 600,
        });
        let clip = uniforms.mvp * glam::Vec4::new(0.0, 0.0, 0.0, 1.0);
        let ndc = clip / clip.w;
        assert!(ndc.x.abs() < 1e-5);
        assert!(ndc.y.abs() < 1e-5);
    }

    #[test]
    fn zero_height_does_not_divide_by_zero() {
        let uniforms = SceneUniforms::at(0.0, vk::Extent2D {
            width: 800,
            height: 0,
        });
        assert!(uniforms.mvp.is_finite());
    }
}
