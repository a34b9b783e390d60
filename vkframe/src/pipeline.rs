use std::sync::Arc;

use ash::vk;
use thiserror::Error;

use crate::descriptor::DescriptorSetLayout;
use crate::device::Device;
use crate::render_pass::RenderPass;
use crate::shader::EntryPoint;
use crate::vertex::VertexLayout;

#[derive(Debug, Error)]
pub enum CreatePipelineError {
    #[error("A pipeline needs at least one shader stage")]
    NoStages,

    #[error("Polygon mode {0:?} needs the fillModeNonSolid feature")]
    PolygonModeUnsupported(vk::PolygonMode),

    #[error("Dynamic polygon mode needs VK_EXT_extended_dynamic_state3")]
    DynamicPolygonModeUnavailable,

    #[error("Vulkan error creating pipeline layout: {0}")]
    LayoutCreation(vk::Result),

    #[error("Vulkan error creating graphics pipeline: {0}")]
    PipelineCreation(vk::Result),
}

/// Pipeline layout over a list of set layouts, in set order. No push
/// constants.
pub struct PipelineLayout {
    device: Arc<Device>,
    raw: vk::PipelineLayout,
}

impl std::fmt::Debug for PipelineLayout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("PipelineLayout").field(&self.raw).finish()
    }
}

impl PipelineLayout {
    pub fn new(
        device: &Arc<Device>,
        set_layouts: &[&DescriptorSetLayout],
    ) -> Result<Self, vk::Result> {
        let raw_sets: Vec<_> = set_layouts
            .iter()
            .map(|layout| layout.raw_descriptor_set_layout())
            .collect();
        // SAFETY: the set layouts belong to device.
        let raw = unsafe {
            device.create_raw_pipeline_layout(
                &vk::PipelineLayoutCreateInfo::default().set_layouts(&raw_sets),
            )
        }?;
        Ok(Self {
            device: Arc::clone(device),
            raw,
        })
    }

    pub fn raw_handle(&self) -> vk::PipelineLayout {
        self.raw
    }
}

impl Drop for PipelineLayout {
    fn drop(&mut self) {
        tracing::debug!("Dropping pipeline layout {:?}", self.raw);
        // SAFETY: pipelines hold an Arc to their layout, so none remain.
        unsafe { self.device.destroy_raw_pipeline_layout(self.raw) };
    }
}

/// Viewport and scissor always, polygon mode on request.
pub fn dynamic_states(dynamic_polygon_mode: bool) -> Vec<vk::DynamicState> {
    let polygon = dynamic_polygon_mode.then_some(vk::DynamicState::POLYGON_MODE_EXT);
    [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR]
        .into_iter()
        .chain(polygon)
        .collect()
}

/// What a [`GraphicsPipeline`] is built from.
///
/// The default has no stages, so callers always set `stages`. Everything
/// else defaults to an empty layout, no vertex input and filled polygons
/// with static polygon mode.
pub struct GraphicsPipelineDesc<'a> {
    pub stages: &'a [EntryPoint<'a>],

    /// Vertex buffer layout at binding 0. `None` when the vertex shader
    /// generates positions itself.
    pub vertex_layout: Option<&'a VertexLayout>,

    /// `None` gives the pipeline its own empty layout.
    pub layout: Option<Arc<PipelineLayout>>,

    /// Initial value only when `dynamic_polygon_mode` is set.
    pub polygon_mode: vk::PolygonMode,

    pub dynamic_polygon_mode: bool,
}

impl Default for GraphicsPipelineDesc<'_> {
    fn default() -> Self {
        Self {
            stages: &[],
            vertex_layout: None,
            layout: None,
            polygon_mode: vk::PolygonMode::FILL,
            dynamic_polygon_mode: false,
        }
    }
}

/// Device capabilities a description may ask for.
#[derive(Debug, Clone, Copy)]
struct PipelineFeatures {
    fill_mode_non_solid: bool,
    dynamic_polygon_mode: bool,
}

impl PipelineFeatures {
    fn of(device: &Device) -> Self {
        Self {
            fill_mode_non_solid: device.supports_fill_mode_non_solid(),
            dynamic_polygon_mode: device.has_dynamic_polygon_mode(),
        }
    }

    fn check(self, desc: &GraphicsPipelineDesc<'_>) -> Result<(), CreatePipelineError> {
        if desc.stages.is_empty() {
            Err(CreatePipelineError::NoStages)
        } else if desc.polygon_mode != vk::PolygonMode::FILL && !self.fill_mode_non_solid {
            Err(CreatePipelineError::PolygonModeUnsupported(desc.polygon_mode))
        } else if desc.dynamic_polygon_mode && !self.dynamic_polygon_mode {
            Err(CreatePipelineError::DynamicPolygonModeUnavailable)
        } else {
            Ok(())
        }
    }
}

/// A graphics pipeline for subpass 0 of a [`RenderPass`].
///
/// Triangle lists, no culling, counter-clockwise front faces, one sample,
/// no depth and opaque writes to all four channels. Viewport and scissor
/// are dynamic.
pub struct GraphicsPipeline {
    device: Arc<Device>,
    raw: vk::Pipeline,
    layout: Arc<PipelineLayout>,
    dynamic_polygon_mode: bool,
}

impl std::fmt::Debug for GraphicsPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphicsPipeline")
            .field("raw", &self.raw)
            .field("layout", &self.layout)
            .field("dynamic_polygon_mode", &self.dynamic_polygon_mode)
            .finish_non_exhaustive()
    }
}

impl GraphicsPipeline {
    pub fn new(
        device: &Arc<Device>,
        render_pass: &RenderPass,
        desc: &GraphicsPipelineDesc<'_>,
        name: Option<&str>,
    ) -> Result<Self, CreatePipelineError> {
        PipelineFeatures::of(device).check(desc)?;

        let layout = match &desc.layout {
            Some(shared) => Arc::clone(shared),
            None => PipelineLayout::new(device, &[])
                .map(Arc::new)
                .map_err(CreatePipelineError::LayoutCreation)?,
        };

        let stages: Vec<_> = desc
            .stages
            .iter()
            .map(EntryPoint::as_pipeline_stage_create_info)
            .collect();

        let bindings: Vec<_> = desc
            .vertex_layout
            .map(VertexLayout::binding_description)
            .into_iter()
            .collect();
        let attributes = desc
            .vertex_layout
            .map(VertexLayout::attribute_descriptions)
            .unwrap_or_default();
        let vertex_input = vk::PipelineVertexInputStateCreateInfo::default()
            .vertex_binding_descriptions(&bindings)
            .vertex_attribute_descriptions(&attributes);

        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::default()
            .topology(vk::PrimitiveTopology::TRIANGLE_LIST);
        // The values are dynamic but the counts are not.
        let viewport = vk::PipelineViewportStateCreateInfo::default()
            .viewport_count(1)
            .scissor_count(1);
        let rasterization = vk::PipelineRasterizationStateCreateInfo::default()
            .polygon_mode(desc.polygon_mode)
            .cull_mode(vk::CullModeFlags::NONE)
            .front_face(vk::FrontFace::COUNTER_CLOCKWISE)
            .line_width(1.0);
        let multisample = vk::PipelineMultisampleStateCreateInfo::default()
            .rasterization_samples(vk::SampleCountFlags::TYPE_1);
        let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::default();
        let opaque = vk::PipelineColorBlendAttachmentState::default()
            .color_write_mask(vk::ColorComponentFlags::RGBA);
        let color_blend = vk::PipelineColorBlendStateCreateInfo::default()
            .attachments(std::slice::from_ref(&opaque));
        let dynamic = dynamic_states(desc.dynamic_polygon_mode);
        let dynamic_state =
            vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&dynamic);

        let create_info = vk::GraphicsPipelineCreateInfo::default()
            .stages(&stages)
            .vertex_input_state(&vertex_input)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport)
            .rasterization_state(&rasterization)
            .multisample_state(&multisample)
            .depth_stencil_state(&depth_stencil)
            .color_blend_state(&color_blend)
            .dynamic_state(&dynamic_state)
            .layout(layout.raw_handle())
            .render_pass(render_pass.raw_handle())
            .subpass(0);

        // SAFETY: shader modules, layout and render pass all belong to
        // device, and every state struct outlives the call.
        let raw = unsafe { device.create_raw_graphics_pipeline(&create_info) }
            .map_err(CreatePipelineError::PipelineCreation)?;

        // SAFETY: raw was just created from device.
        if let Err(e) = unsafe { device.set_object_name_str(raw, name) } {
            tracing::warn!("Failed to name pipeline {raw:?}: {e}");
        }
        tracing::debug!(
            "Created pipeline {raw:?} ({} stages, {:?}{})",
            stages.len(),
            desc.polygon_mode,
            if desc.dynamic_polygon_mode { ", dynamic" } else { "" },
        );

        Ok(Self {
            device: Arc::clone(device),
            raw,
            layout,
            dynamic_polygon_mode: desc.dynamic_polygon_mode,
        })
    }

    pub fn raw_handle(&self) -> vk::Pipeline {
        self.raw
    }

    pub fn layout(&self) -> &Arc<PipelineLayout> {
        &self.layout
    }

    /// Whether recording must set the polygon mode.
    pub fn has_dynamic_polygon_mode(&self) -> bool {
        self.dynamic_polygon_mode
    }
}

impl Drop for GraphicsPipeline {
    fn drop(&mut self) {
        tracing::debug!("Dropping pipeline {:?}", self.raw);
        // SAFETY: the presenter waits for the device before dropping it.
        unsafe { self.device.destroy_raw_pipeline(self.raw) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: PipelineFeatures = PipelineFeatures {
        fill_mode_non_solid: true,
        dynamic_polygon_mode: true,
    };
    const NONE: PipelineFeatures = PipelineFeatures {
        fill_mode_non_solid: false,
        dynamic_polygon_mode: false,
    };

    #[test]
    fn dynamic_state_lists() {
        use vk::DynamicState as S;
        assert_eq!(dynamic_states(false), [S::VIEWPORT, S::SCISSOR]);
        assert_eq!(
            dynamic_states(true),
            [S::VIEWPORT, S::SCISSOR, S::POLYGON_MODE_EXT]
        );
    }

    #[test]
    fn default_desc_is_static_fill() {
        let desc = GraphicsPipelineDesc::default();
        assert!(desc.stages.is_empty());
        assert!(desc.vertex_layout.is_none());
        assert!(desc.layout.is_none());
        assert_eq!(desc.polygon_mode, vk::PolygonMode::FILL);
        assert!(!desc.dynamic_polygon_mode);
    }

    #[test]
    fn stageless_desc_is_rejected_first() {
        let desc = GraphicsPipelineDesc {
            polygon_mode: vk::PolygonMode::LINE,
            ..Default::default()
        };
        assert!(matches!(NONE.check(&desc), Err(CreatePipelineError::NoStages)));
        assert!(matches!(ALL.check(&desc), Err(CreatePipelineError::NoStages)));
    }
}
