//! Thin `unsafe` forwards to `ash::Device`.
//!
//! Every handle passed in must have been created from this device, and
//! none may be destroyed while the GPU can still use it. Each `# Safety`
//! section lists only what comes on top of that.

use ash::vk;

use super::{Device, DynamicPolygonModeError, Synchronization2Loader};
use crate::swapchain::CreateSwapchainError;

// ---------------------------------------------------------------------------
// Object lifetimes
// ---------------------------------------------------------------------------

impl Device {
    /// # Safety
    /// `info` must describe a valid buffer.
    pub unsafe fn create_raw_buffer(
        &self,
        info: &vk::BufferCreateInfo<'_>,
    ) -> Result<vk::Buffer, vk::Result> {
        // SAFETY: forwarded.
        unsafe { self.handle.create_buffer(info, None) }
    }

    /// # Safety
    /// No pending work may read `buffer`.
    pub unsafe fn destroy_raw_buffer(&self, buffer: vk::Buffer) {
        // SAFETY: forwarded.
        unsafe { self.handle.destroy_buffer(buffer, None) }
    }

    /// # Safety
    /// `buffer` must still exist.
    pub unsafe fn get_raw_buffer_memory_requirements(
        &self,
        buffer: vk::Buffer,
    ) -> vk::MemoryRequirements {
        // SAFETY: forwarded.
        unsafe { self.handle.get_buffer_memory_requirements(buffer) }
    }

    /// # Safety
    /// `buffer` has no memory yet and `offset` meets its requirements.
    pub unsafe fn bind_raw_buffer_memory(
        &self,
        buffer: vk::Buffer,
        memory: vk::DeviceMemory,
        offset: vk::DeviceSize,
    ) -> Result<(), vk::Result> {
        // SAFETY: forwarded.
        unsafe { self.handle.bind_buffer_memory(buffer, memory, offset) }
    }

    /// # Safety
    /// Every range lies in mapped memory and respects the flush atom.
    pub unsafe fn flush_raw_mapped_memory_ranges(
        &self,
        ranges: &[vk::MappedMemoryRange<'_>],
    ) -> Result<(), vk::Result> {
        // SAFETY: forwarded.
        unsafe { self.handle.flush_mapped_memory_ranges(ranges) }
    }

    /// # Safety
    /// `info` must describe a valid image view.
    pub unsafe fn create_raw_image_view(
        &self,
        info: &vk::ImageViewCreateInfo<'_>,
    ) -> Result<vk::ImageView, vk::Result> {
        // SAFETY: forwarded.
        unsafe { self.handle.create_image_view(info, None) }
    }

    /// # Safety
    /// Framebuffers using `view` must be gone.
    pub unsafe fn destroy_raw_image_view(&self, view: vk::ImageView) {
        // SAFETY: forwarded.
        unsafe { self.handle.destroy_image_view(view, None) }
    }

    /// # Safety
    /// `info` must point at valid SPIR-V.
    pub unsafe fn create_raw_shader_module(
        &self,
        info: &vk::ShaderModuleCreateInfo<'_>,
    ) -> Result<vk::ShaderModule, vk::Result> {
        // SAFETY: forwarded.
        unsafe { self.handle.create_shader_module(info, None) }
    }

    /// # Safety
    /// `module` must still exist.
    pub unsafe fn destroy_raw_shader_module(&self, module: vk::ShaderModule) {
        // SAFETY: forwarded.
        unsafe { self.handle.destroy_shader_module(module, None) }
    }

    /// # Safety
    /// `info` and the arrays it points to must be valid.
    pub unsafe fn create_raw_render_pass(
        &self,
        info: &vk::RenderPassCreateInfo<'_>,
    ) -> Result<vk::RenderPass, vk::Result> {
        // SAFETY: forwarded.
        unsafe { self.handle.create_render_pass(info, None) }
    }

    /// # Safety
    /// Framebuffers and pipelines built on `render_pass` must be gone.
    pub unsafe fn destroy_raw_render_pass(&self, render_pass: vk::RenderPass) {
        // SAFETY: forwarded.
        unsafe { self.handle.destroy_render_pass(render_pass, None) }
    }

    /// # Safety
    /// The attachments must be compatible with the render pass in `info`.
    pub unsafe fn create_raw_framebuffer(
        &self,
        info: &vk::FramebufferCreateInfo<'_>,
    ) -> Result<vk::Framebuffer, vk::Result> {
        // SAFETY: forwarded.
        unsafe { self.handle.create_framebuffer(info, None) }
    }

    /// # Safety
    /// No pending work may use `framebuffer`.
    pub unsafe fn destroy_raw_framebuffer(&self, framebuffer: vk::Framebuffer) {
        // SAFETY: forwarded.
        unsafe { self.handle.destroy_framebuffer(framebuffer, None) }
    }

    /// # Safety
    /// `info` must reference live set layouts.
    pub unsafe fn create_raw_pipeline_layout(
        &self,
        info: &vk::PipelineLayoutCreateInfo<'_>,
    ) -> Result<vk::PipelineLayout, vk::Result> {
        // SAFETY: forwarded.
        unsafe { self.handle.create_pipeline_layout(info, None) }
    }

    /// # Safety
    /// No pending work may use `layout`.
    pub unsafe fn destroy_raw_pipeline_layout(&self, layout: vk::PipelineLayout) {
        // SAFETY: forwarded.
        unsafe { self.handle.destroy_pipeline_layout(layout, None) }
    }

    /// Build one graphics pipeline. Nothing leaks when creation fails.
    ///
    /// # Safety
    /// Everything `info` references must be live and mutually compatible.
    pub unsafe fn create_raw_graphics_pipeline(
        &self,
        info: &vk::GraphicsPipelineCreateInfo<'_>,
    ) -> Result<vk::Pipeline, vk::Result> {
        // SAFETY: forwarded.
        let created = unsafe {
            self.handle.create_graphics_pipelines(
                vk::PipelineCache::null(),
                std::slice::from_ref(info),
                None,
            )
        };
        match created {
            Ok(pipelines) => pipelines
                .into_iter()
                .next()
                .ok_or(vk::Result::ERROR_UNKNOWN),
            Err((partial, err)) => {
                for pipeline in partial.into_iter().filter(|p| *p != vk::Pipeline::null()) {
                    // SAFETY: created just now and never handed out.
                    unsafe { self.handle.destroy_pipeline(pipeline, None) };
                }
                Err(err)
            }
        }
    }

    /// # Safety
    /// No pending work may use `pipeline`.
    pub unsafe fn destroy_raw_pipeline(&self, pipeline: vk::Pipeline) {
        // SAFETY: forwarded.
        unsafe { self.handle.destroy_pipeline(pipeline, None) }
    }

    /// # Safety
    /// `info` must describe a valid set layout.
    pub unsafe fn create_raw_descriptor_set_layout(
        &self,
        info: &vk::DescriptorSetLayoutCreateInfo<'_>,
    ) -> Result<vk::DescriptorSetLayout, vk::Result> {
        // SAFETY: forwarded.
        unsafe { self.handle.create_descriptor_set_layout(info, None) }
    }

    /// # Safety
    /// `layout` must still exist.
    pub unsafe fn destroy_raw_descriptor_set_layout(
        &self,
        layout: vk::DescriptorSetLayout,
    ) {
        // SAFETY: forwarded.
        unsafe { self.handle.destroy_descriptor_set_layout(layout, None) }
    }

    /// # Safety
    /// `info` must describe a valid pool.
    pub unsafe fn create_raw_descriptor_pool(
        &self,
        info: &vk::DescriptorPoolCreateInfo<'_>,
    ) -> Result<vk::DescriptorPool, vk::Result> {
        // SAFETY: forwarded.
        unsafe { self.handle.create_descriptor_pool(info, None) }
    }

    /// # Safety
    /// No pending work may use a set from `pool`.
    pub unsafe fn destroy_raw_descriptor_pool(&self, pool: vk::DescriptorPool) {
        // SAFETY: forwarded.
        unsafe { self.handle.destroy_descriptor_pool(pool, None) }
    }

    /// # Safety
    /// The pool in `info` must have room for the requested sets.
    pub unsafe fn allocate_raw_descriptor_sets(
        &self,
        info: &vk::DescriptorSetAllocateInfo<'_>,
    ) -> Result<Vec<vk::DescriptorSet>, vk::Result> {
        // SAFETY: forwarded.
        unsafe { self.handle.allocate_descriptor_sets(info) }
    }

    /// # Safety
    /// No pending work may use the written sets, and the buffers they point
    /// at must outlive every later use.
    pub unsafe fn update_raw_descriptor_sets(
        &self,
        writes: &[vk::WriteDescriptorSet<'_>],
    ) {
        // SAFETY: forwarded.
        unsafe { self.handle.update_descriptor_sets(writes, &[]) }
    }

    /// # Safety
    /// `info` must name a queue family of this device.
    pub unsafe fn create_raw_command_pool(
        &self,
        info: &vk::CommandPoolCreateInfo<'_>,
    ) -> Result<vk::CommandPool, vk::Result> {
        // SAFETY: forwarded.
        unsafe { self.handle.create_command_pool(info, None) }
    }

    /// # Safety
    /// No buffer from `pool` may be pending.
    pub unsafe fn destroy_raw_command_pool(&self, pool: vk::CommandPool) {
        // SAFETY: forwarded.
        unsafe { self.handle.destroy_command_pool(pool, None) }
    }

    /// # Safety
    /// The pool in `info` must be externally synchronized.
    pub unsafe fn allocate_raw_command_buffers(
        &self,
        info: &vk::CommandBufferAllocateInfo<'_>,
    ) -> Result<Vec<vk::CommandBuffer>, vk::Result> {
        // SAFETY: forwarded.
        unsafe { self.handle.allocate_command_buffers(info) }
    }

    /// # Safety
    /// `buffers` came from `pool`, none is pending and `pool` is externally
    /// synchronized.
    pub unsafe fn free_raw_command_buffers(
        &self,
        pool: vk::CommandPool,
        buffers: &[vk::CommandBuffer],
    ) {
        if !buffers.is_empty() {
            // SAFETY: forwarded.
            unsafe { self.handle.free_command_buffers(pool, buffers) }
        }
    }

    /// # Safety
    /// `info` must describe a valid fence.
    pub unsafe fn create_raw_fence(
        &self,
        info: &vk::FenceCreateInfo<'_>,
    ) -> Result<vk::Fence, vk::Result> {
        // SAFETY: forwarded.
        unsafe { self.handle.create_fence(info, None) }
    }

    /// # Safety
    /// No submission may still signal `fence`.
    pub unsafe fn destroy_raw_fence(&self, fence: vk::Fence) {
        // SAFETY: forwarded.
        unsafe { self.handle.destroy_fence(fence, None) }
    }

    /// # Safety
    /// The fences must still exist.
    pub unsafe fn wait_for_raw_fences(
        &self,
        fences: &[vk::Fence],
        wait_all: bool,
        timeout_ns: u64,
    ) -> Result<(), vk::Result> {
        // SAFETY: forwarded.
        unsafe { self.handle.wait_for_fences(fences, wait_all, timeout_ns) }
    }

    /// # Safety
    /// No queue may still own any of `fences`.
    pub unsafe fn reset_raw_fences(&self, fences: &[vk::Fence]) -> Result<(), vk::Result> {
        // SAFETY: forwarded.
        unsafe { self.handle.reset_fences(fences) }
    }

    /// # Safety
    /// `info` must describe a valid semaphore.
    pub unsafe fn create_raw_semaphore(
        &self,
        info: &vk::SemaphoreCreateInfo<'_>,
    ) -> Result<vk::Semaphore, vk::Result> {
        // SAFETY: forwarded.
        unsafe { self.handle.create_semaphore(info, None) }
    }

    /// # Safety
    /// No queue operation may still wait on or signal `semaphore`.
    pub unsafe fn destroy_raw_semaphore(&self, semaphore: vk::Semaphore) {
        // SAFETY: forwarded.
        unsafe { self.handle.destroy_semaphore(semaphore, None) }
    }
}

// ---------------------------------------------------------------------------
// Swapchain and queues
// ---------------------------------------------------------------------------

impl Device {
    fn swapchain_loader(&self) -> Option<&ash::khr::swapchain::Device> {
        self.swapchain_device.as_ref()
    }

    /// # Safety
    /// `info` must target a surface of the parent instance. A non-null
    /// `old_swapchain` must be a live swapchain of this device.
    pub unsafe fn create_raw_swapchain(
        &self,
        info: &vk::SwapchainCreateInfoKHR<'_>,
    ) -> Result<vk::SwapchainKHR, CreateSwapchainError> {
        let loader = self
            .swapchain_loader()
            .ok_or(CreateSwapchainError::SwapchainNotEnabled)?;
        // SAFETY: forwarded.
        unsafe { loader.create_swapchain(info, None) }
            .map_err(CreateSwapchainError::VulkanCreate)
    }

    /// # Safety
    /// `swapchain` must still exist.
    pub unsafe fn get_raw_swapchain_images(
        &self,
        swapchain: vk::SwapchainKHR,
    ) -> Result<Vec<vk::Image>, CreateSwapchainError> {
        let loader = self
            .swapchain_loader()
            .ok_or(CreateSwapchainError::SwapchainNotEnabled)?;
        // SAFETY: forwarded.
        unsafe { loader.get_swapchain_images(swapchain) }
            .map_err(CreateSwapchainError::VulkanGetImages)
    }

    /// # Safety
    /// Views of its images must be gone and no pending work may use it.
    pub unsafe fn destroy_raw_swapchain(&self, swapchain: vk::SwapchainKHR) {
        if let Some(loader) = self.swapchain_loader() {
            // SAFETY: forwarded.
            unsafe { loader.destroy_swapchain(swapchain, None) }
        }
    }

    /// `Ok((index, suboptimal))`, or the raw error such as
    /// `ERROR_OUT_OF_DATE_KHR`.
    ///
    /// # Safety
    /// `semaphore` and `fence`, when not null, must be unsignaled with no
    /// pending signal.
    pub unsafe fn acquire_next_swapchain_image(
        &self,
        swapchain: vk::SwapchainKHR,
        timeout_ns: u64,
        semaphore: vk::Semaphore,
        fence: vk::Fence,
    ) -> Result<(u32, bool), vk::Result> {
        let loader = self
            .swapchain_loader()
            .ok_or(vk::Result::ERROR_EXTENSION_NOT_PRESENT)?;
        // SAFETY: forwarded.
        unsafe { loader.acquire_next_image(swapchain, timeout_ns, semaphore, fence) }
    }

    /// Queue a present on the present queue. `Ok(true)` means suboptimal.
    ///
    /// # Safety
    /// The image must have been acquired and reach `PRESENT_SRC_KHR` before
    /// the wait semaphores signal.
    pub unsafe fn queue_present(
        &self,
        info: &vk::PresentInfoKHR<'_>,
    ) -> Result<bool, vk::Result> {
        let loader = self
            .swapchain_loader()
            .ok_or(vk::Result::ERROR_EXTENSION_NOT_PRESENT)?;
        let queue = self.present_queue.lock().expect("present queue lock poisoned");
        // SAFETY: forwarded; the lock serializes queue access.
        unsafe { loader.queue_present(*queue, info) }
    }

    /// `vkQueueSubmit2` on the graphics queue, through the core entry point
    /// or the KHR extension.
    ///
    /// # Safety
    /// Command buffers must be executable. `fence`, when not null, must be
    /// unsignaled and unowned.
    pub unsafe fn graphics_queue_submit2(
        &self,
        submits: &[vk::SubmitInfo2<'_>],
        fence: vk::Fence,
    ) -> Result<(), vk::Result> {
        let queue = self.graphics_queue.lock().expect("graphics queue lock poisoned");
        match &self.synchronization2 {
            // SAFETY: forwarded; the lock serializes queue access.
            Synchronization2Loader::Core => unsafe {
                self.handle.queue_submit2(*queue, submits, fence)
            },
            // SAFETY: forwarded; the lock serializes queue access.
            Synchronization2Loader::Extension(khr) => unsafe {
                khr.queue_submit2(*queue, submits, fence)
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Recording
// ---------------------------------------------------------------------------

impl Device {
    /// # Safety
    /// `cb` must be idle and come from a pool with per-buffer reset.
    pub unsafe fn reset_raw_command_buffer(
        &self,
        cb: vk::CommandBuffer,
        flags: vk::CommandBufferResetFlags,
    ) -> Result<(), vk::Result> {
        // SAFETY: forwarded.
        unsafe { self.handle.reset_command_buffer(cb, flags) }
    }

    /// # Safety
    /// `cb` must be in the initial state.
    pub unsafe fn begin_raw_command_buffer(
        &self,
        cb: vk::CommandBuffer,
        info: &vk::CommandBufferBeginInfo<'_>,
    ) -> Result<(), vk::Result> {
        // SAFETY: forwarded.
        unsafe { self.handle.begin_command_buffer(cb, info) }
    }

    /// # Safety
    /// `cb` must be recording outside a render pass.
    pub unsafe fn end_raw_command_buffer(&self, cb: vk::CommandBuffer) -> Result<(), vk::Result> {
        // SAFETY: forwarded.
        unsafe { self.handle.end_command_buffer(cb) }
    }

    /// # Safety
    /// `cb` must be recording outside a render pass; `info` names a
    /// compatible render pass and framebuffer.
    pub unsafe fn cmd_begin_render_pass(
        &self,
        cb: vk::CommandBuffer,
        info: &vk::RenderPassBeginInfo<'_>,
        contents: vk::SubpassContents,
    ) {
        // SAFETY: forwarded.
        unsafe { self.handle.cmd_begin_render_pass(cb, info, contents) }
    }

    /// # Safety
    /// `cb` must be inside a render pass.
    pub unsafe fn cmd_end_render_pass(&self, cb: vk::CommandBuffer) {
        // SAFETY: forwarded.
        unsafe { self.handle.cmd_end_render_pass(cb) }
    }

    /// # Safety
    /// `cb` must be recording.
    pub unsafe fn cmd_bind_graphics_pipeline(&self, cb: vk::CommandBuffer, pipeline: vk::Pipeline) {
        // SAFETY: forwarded.
        unsafe {
            self.handle
                .cmd_bind_pipeline(cb, vk::PipelineBindPoint::GRAPHICS, pipeline)
        }
    }

    /// # Safety
    /// `cb` must be recording and `layout` compatible with the bound
    /// pipeline.
    pub unsafe fn cmd_bind_descriptor_sets(
        &self,
        cb: vk::CommandBuffer,
        layout: vk::PipelineLayout,
        first_set: u32,
        sets: &[vk::DescriptorSet],
    ) {
        // SAFETY: forwarded.
        unsafe {
            self.handle.cmd_bind_descriptor_sets(
                cb,
                vk::PipelineBindPoint::GRAPHICS,
                layout,
                first_set,
                sets,
                &[],
            )
        }
    }

    /// # Safety
    /// `cb` must be recording; `buffers` and `offsets` have equal length.
    pub unsafe fn cmd_bind_vertex_buffers(
        &self,
        cb: vk::CommandBuffer,
        first_binding: u32,
        buffers: &[vk::Buffer],
        offsets: &[vk::DeviceSize],
    ) {
        // SAFETY: forwarded.
        unsafe { self.handle.cmd_bind_vertex_buffers(cb, first_binding, buffers, offsets) }
    }

    /// # Safety
    /// `cb` must be recording; `buffer` has `INDEX_BUFFER` usage.
    pub unsafe fn cmd_bind_index_buffer(
        &self,
        cb: vk::CommandBuffer,
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
        index_type: vk::IndexType,
    ) {
        // SAFETY: forwarded.
        unsafe { self.handle.cmd_bind_index_buffer(cb, buffer, offset, index_type) }
    }

    /// # Safety
    /// `cb` must be recording outside a render pass; regions are in bounds.
    pub unsafe fn cmd_copy_buffer(
        &self,
        cb: vk::CommandBuffer,
        src: vk::Buffer,
        dst: vk::Buffer,
        regions: &[vk::BufferCopy],
    ) {
        // SAFETY: forwarded.
        unsafe { self.handle.cmd_copy_buffer(cb, src, dst, regions) }
    }

    /// # Safety
    /// The bound pipeline must use a dynamic viewport.
    pub unsafe fn cmd_set_viewport(&self, cb: vk::CommandBuffer, viewports: &[vk::Viewport]) {
        // SAFETY: forwarded.
        unsafe { self.handle.cmd_set_viewport(cb, 0, viewports) }
    }

    /// # Safety
    /// The bound pipeline must use a dynamic scissor.
    pub unsafe fn cmd_set_scissor(&self, cb: vk::CommandBuffer, scissors: &[vk::Rect2D]) {
        // SAFETY: forwarded.
        unsafe { self.handle.cmd_set_scissor(cb, 0, scissors) }
    }

    /// # Safety
    /// The bound pipeline must use a dynamic polygon mode.
    pub unsafe fn cmd_set_polygon_mode(
        &self,
        cb: vk::CommandBuffer,
        mode: vk::PolygonMode,
    ) -> Result<(), DynamicPolygonModeError> {
        let eds3 = self
            .extended_dynamic_state3
            .as_ref()
            .ok_or(DynamicPolygonModeError::NotEnabled)?;
        // SAFETY: forwarded.
        unsafe { eds3.cmd_set_polygon_mode(cb, mode) };
        Ok(())
    }

    /// # Safety
    /// `cb` must be inside a render pass with a pipeline bound and its
    /// dynamic state set.
    pub unsafe fn cmd_draw(
        &self,
        cb: vk::CommandBuffer,
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    ) {
        // SAFETY: forwarded.
        unsafe {
            self.handle
                .cmd_draw(cb, vertex_count, instance_count, first_vertex, first_instance)
        }
    }

    /// # Safety
    /// As [`cmd_draw`](Self::cmd_draw), plus a bound index buffer.
    pub unsafe fn cmd_draw_indexed(
        &self,
        cb: vk::CommandBuffer,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    ) {
        // SAFETY: forwarded.
        unsafe {
            self.handle.cmd_draw_indexed(
                cb,
                index_count,
                instance_count,
                first_index,
                vertex_offset,
                first_instance,
            )
        }
    }
}
