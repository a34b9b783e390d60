use std::sync::Arc;

use ash::vk;
use thiserror::Error;

use crate::device::Device;

#[derive(Debug, Error)]
pub enum CreateRenderPassError {
    #[error("Vulkan error creating render pass: {0}")]
    Vulkan(vk::Result),
}

#[derive(Debug, Error)]
pub enum CreateFramebufferError {
    #[error("Framebuffer extent must be nonzero, got {width}x{height}")]
    InvalidExtent { width: u32, height: u32 },
    #[error("Vulkan error creating framebuffer {index}: {result}")]
    Vulkan { index: usize, result: vk::Result },
}

/// The single color attachment: cleared on load, stored, handed to the
/// presentation engine afterwards.
fn color_attachment(format: vk::Format) -> vk::AttachmentDescription {
    vk::AttachmentDescription::default()
        .format(format)
        .samples(vk::SampleCountFlags::TYPE_1)
        .load_op(vk::AttachmentLoadOp::CLEAR)
        .store_op(vk::AttachmentStoreOp::STORE)
        .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
        .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
        .initial_layout(vk::ImageLayout::UNDEFINED)
        .final_layout(vk::ImageLayout::PRESENT_SRC_KHR)
}

/// Orders the layout transition after the acquire semaphore wait, which
/// happens at `COLOR_ATTACHMENT_OUTPUT`.
fn acquire_dependency() -> vk::SubpassDependency {
    vk::SubpassDependency::default()
        .src_subpass(vk::SUBPASS_EXTERNAL)
        .dst_subpass(0)
        .src_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
        .src_access_mask(vk::AccessFlags::empty())
        .dst_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
        .dst_access_mask(vk::AccessFlags::COLOR_ATTACHMENT_WRITE)
}

// ---------------------------------------------------------------------------
// RenderPass
// ---------------------------------------------------------------------------

/// A one-subpass render pass drawing straight into a swapchain image.
pub struct RenderPass {
    parent: Arc<Device>,
    handle: vk::RenderPass,
    format: vk::Format,
}

impl std::fmt::Debug for RenderPass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderPass")
            .field("handle", &self.handle)
            .field("format", &self.format)
            .finish_non_exhaustive()
    }
}

impl RenderPass {
    pub fn new(
        device: &Arc<Device>,
        format: vk::Format,
    ) -> Result<Self, CreateRenderPassError> {
        let attachments = [color_attachment(format)];
        let color_refs = [vk::AttachmentReference::default()
            .attachment(0)
            .layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)];
        let subpasses = [vk::SubpassDescription::default()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .color_attachments(&color_refs)];
        let dependencies = [acquire_dependency()];

        let create_info = vk::RenderPassCreateInfo::default()
            .attachments(&attachments)
            .subpasses(&subpasses)
            .dependencies(&dependencies);

        // SAFETY: create_info and every array it points to live on this stack
        // frame for the duration of the call.
        let handle = unsafe { device.create_raw_render_pass(&create_info) }
            .map_err(CreateRenderPassError::Vulkan)?;

        // SAFETY: handle is a valid render pass created from device.
        let name_result =
            unsafe { device.set_object_name_str(handle, Some("Present pass")) };
        if let Err(e) = name_result {
            tracing::warn!("Failed to name render pass {:?}: {e}", handle);
        }

        Ok(Self {
            parent: Arc::clone(device),
            handle,
            format,
        })
    }

    pub fn raw_handle(&self) -> vk::RenderPass {
        self.handle
    }

    /// Color attachment format. Every swapchain this pass renders into must
    /// use it.
    pub fn format(&self) -> vk::Format {
        self.format
    }

    pub fn parent(&self) -> &Arc<Device> {
        &self.parent
    }
}

impl Drop for RenderPass {
    fn drop(&mut self) {
        tracing::debug!("Dropping render pass {:?}", self.handle);
        // SAFETY: handle was created from parent. Framebuffers and pipelines
        // built against it are dropped first.
        unsafe { self.parent.destroy_raw_render_pass(self.handle) };
    }
}

// ---------------------------------------------------------------------------
// Framebuffers
// ---------------------------------------------------------------------------

fn create_framebuffers<FCreate, FDestroy>(
    render_pass: vk::RenderPass,
    image_views: &[vk::ImageView],
    extent: vk::Extent2D,
    mut create_framebuffer: FCreate,
    mut destroy_framebuffer: FDestroy,
) -> Result<Vec<vk::Framebuffer>, CreateFramebufferError>
where
    FCreate:
        FnMut(&vk::FramebufferCreateInfo<'_>) -> Result<vk::Framebuffer, vk::Result>,
    FDestroy: FnMut(vk::Framebuffer),
{
    if extent.width == 0 || extent.height == 0 {
        return Err(CreateFramebufferError::InvalidExtent {
            width: extent.width,
            height: extent.height,
        });
    }

    let mut framebuffers = Vec::with_capacity(image_views.len());
    for (index, view) in image_views.iter().enumerate() {
        let attachments = std::slice::from_ref(view);
        let create_info = vk::FramebufferCreateInfo::default()
            .render_pass(render_pass)
            .attachments(attachments)
            .width(extent.width)
            .height(extent.height)
            .layers(1);
        match create_framebuffer(&create_info) {
            Ok(framebuffer) => framebuffers.push(framebuffer),
            Err(result) => {
                for created in framebuffers.drain(..) {
                    destroy_framebuffer(created);
                }
                return Err(CreateFramebufferError::Vulkan { index, result });
            }
        }
    }
    Ok(framebuffers)
}

/// One framebuffer per swapchain image view, valid for one swapchain
/// generation.
pub struct Framebuffers {
    parent: Arc<Device>,
    handles: Vec<vk::Framebuffer>,
    extent: vk::Extent2D,
}

impl std::fmt::Debug for Framebuffers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Framebuffers")
            .field("handles", &self.handles)
            .field("extent", &self.extent)
            .finish_non_exhaustive()
    }
}

impl Framebuffers {
    pub fn new(
        render_pass: &RenderPass,
        image_views: &[vk::ImageView],
        extent: vk::Extent2D,
    ) -> Result<Self, CreateFramebufferError> {
        let device = render_pass.parent();
        let handles = create_framebuffers(
            render_pass.raw_handle(),
            image_views,
            extent,
            |create_info| {
                // SAFETY: create_info pairs a render pass and a view from the
                // same device, sized to the swapchain extent.
                unsafe { device.create_raw_framebuffer(create_info) }
            },
            |framebuffer| {
                // SAFETY: framebuffer was just created and nothing uses it.
                unsafe { device.destroy_raw_framebuffer(framebuffer) }
            },
        )?;
        Ok(Self {
            parent: Arc::clone(device),
            handles,
            extent,
        })
    }

    /// The framebuffer wrapping swapchain image `image_index`.
    pub fn get(&self, image_index: u32) -> Option<vk::Framebuffer> {
        self.handles.get(image_index as usize).copied()
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    /// Destroy every framebuffer now, leaving the set empty.
    ///
    /// # Safety
    /// No pending GPU work may reference any of the framebuffers.
    pub unsafe fn destroy_all(&mut self) {
        for framebuffer in self.handles.drain(..) {
            tracing::debug!("Dropping framebuffer {:?}", framebuffer);
            // SAFETY: framebuffer was created from parent and the caller
            // guarantees it is unused.
            unsafe { self.parent.destroy_raw_framebuffer(framebuffer) };
        }
    }
}

impl Drop for Framebuffers {
    fn drop(&mut self) {
        // SAFETY: owners drop framebuffers only while the device is idle.
        unsafe { self.destroy_all() };
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use ash::vk::Handle;

    use super::*;

    fn extent(width: u32, height: u32) -> vk::Extent2D {
        vk::Extent2D { width, height }
    }

    #[test]
    fn attachment_clears_and_ends_presentable() {
        let attachment = color_attachment(vk::Format::B8G8R8A8_SRGB);
        assert_eq!(attachment.format, vk::Format::B8G8R8A8_SRGB);
        assert_eq!(attachment.load_op, vk::AttachmentLoadOp::CLEAR);
        assert_eq!(attachment.store_op, vk::AttachmentStoreOp::STORE);
        assert_eq!(attachment.initial_layout, vk::ImageLayout::UNDEFINED);
        assert_eq!(attachment.final_layout, vk::ImageLayout::PRESENT_SRC_KHR);
    }

    #[test]
    fn dependency_waits_for_color_output() {
        let dep = acquire_dependency();
        assert_eq!(dep.src_subpass, vk::SUBPASS_EXTERNAL);
        assert_eq!(dep.dst_subpass, 0);
        assert_eq!(
            dep.src_stage_mask,
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
        );
        assert_eq!(
            dep.dst_stage_mask,
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
        );
        assert_eq!(dep.dst_access_mask, vk::AccessFlags::COLOR_ATTACHMENT_WRITE);
    }

    #[test]
    fn builds_one_framebuffer_per_view() {
        let views: Vec<vk::ImageView> =
            (1..=3).map(vk::ImageView::from_raw).collect();
        let seen = RefCell::new(Vec::new());
        let created = create_framebuffers(
            vk::RenderPass::from_raw(7),
            &views,
            extent(640, 480),
            |info| {
                // SAFETY: the test passes a one-element attachment slice.
                let view = unsafe { *info.p_attachments };
                seen.borrow_mut().push((view, info.width, info.height));
                Ok(vk::Framebuffer::from_raw(view.as_raw() + 100))
            },
            |_| panic!("nothing should be destroyed"),
        )
        .unwrap();

        assert_eq!(created.len(), 3);
        assert_eq!(created[2], vk::Framebuffer::from_raw(103));
        assert_eq!(
            *seen.borrow(),
            vec![
                (views[0], 640, 480),
                (views[1], 640, 480),
                (views[2], 640, 480)
            ]
        );
    }

    #[test]
    fn failure_destroys_earlier_framebuffers() {
        let views: Vec<vk::ImageView> =
            (1..=3).map(vk::ImageView::from_raw).collect();
        let calls = RefCell::new(0u64);
        let destroyed = RefCell::new(Vec::new());
        let result = create_framebuffers(
            vk::RenderPass::from_raw(7),
            &views,
            extent(640, 480),
            |_| {
                let mut n = calls.borrow_mut();
                *n += 1;
                if *n == 3 {
                    Err(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY)
                } else {
                    Ok(vk::Framebuffer::from_raw(*n))
                }
            },
            |fb| destroyed.borrow_mut().push(fb.as_raw()),
        );

        assert!(matches!(
            result,
            Err(CreateFramebufferError::Vulkan { index: 2, .. })
        ));
        assert_eq!(*destroyed.borrow(), vec![1, 2]);
    }

    #[test]
    fn zero_extent_is_rejected() {
        let views = [vk::ImageView::from_raw(1)];
        let result = create_framebuffers(
            vk::RenderPass::from_raw(7),
            &views,
            extent(0, 480),
            |_| panic!("no framebuffer should be created"),
            |_| {},
        );
        assert!(matches!(
            result,
            Err(CreateFramebufferError::InvalidExtent { width: 0, .. })
        ));
    }
}
