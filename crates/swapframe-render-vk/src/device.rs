// SPDX-License-Identifier: CEPL-1.0
//! The device seam.
//!
//! Every call the frame pipeline makes into the driver goes through
//! [`GpuDevice`]. The instance, device, queue and surface are owned by a
//! longer-lived context above the pipeline (see [`crate::context`]); the
//! pipeline only borrows them through this trait.

use ash::prelude::VkResult;
use ash::vk;

/// Depth attachment shared by every framebuffer of one build.
#[derive(Clone, Copy, Debug)]
pub struct DepthImage {
    pub image: vk::Image,
    pub memory: vk::DeviceMemory,
    pub view: vk::ImageView,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
}

/// Everything needed to create (or recreate) a swapchain.
#[derive(Clone, Copy, Debug)]
pub struct SwapchainDesc {
    pub surface: vk::SurfaceKHR,
    pub min_image_count: u32,
    pub format: vk::SurfaceFormatKHR,
    pub extent: vk::Extent2D,
    pub usage: vk::ImageUsageFlags,
    pub pre_transform: vk::SurfaceTransformFlagsKHR,
    pub present_mode: vk::PresentModeKHR,
    pub old_swapchain: vk::SwapchainKHR,
}

/// One graphics-queue submission of a single primary command buffer.
#[derive(Clone, Copy, Debug)]
pub struct SubmitDesc {
    pub command_buffer: vk::CommandBuffer,
    pub wait_semaphore: vk::Semaphore,
    pub wait_stage: vk::PipelineStageFlags,
    pub signal_semaphore: vk::Semaphore,
    pub fence: vk::Fence,
}

pub trait GpuDevice {
    fn surface(&self) -> vk::SurfaceKHR;

    fn wait_idle(&self) -> VkResult<()>;

    fn surface_capabilities(&self, surface: vk::SurfaceKHR)
        -> VkResult<vk::SurfaceCapabilitiesKHR>;
    fn surface_formats(&self, surface: vk::SurfaceKHR) -> VkResult<Vec<vk::SurfaceFormatKHR>>;
    fn surface_present_modes(&self, surface: vk::SurfaceKHR)
        -> VkResult<Vec<vk::PresentModeKHR>>;

    fn create_swapchain(&self, desc: &SwapchainDesc) -> VkResult<vk::SwapchainKHR>;
    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR);
    fn swapchain_images(&self, swapchain: vk::SwapchainKHR) -> VkResult<Vec<vk::Image>>;

    /// `Ok((index, suboptimal))`; out-of-date and surface-lost come back as `Err`.
    fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        timeout: u64,
        semaphore: vk::Semaphore,
    ) -> VkResult<(u32, bool)>;

    /// `Ok(suboptimal)`.
    fn queue_present(
        &self,
        swapchain: vk::SwapchainKHR,
        image_index: u32,
        wait_semaphore: vk::Semaphore,
    ) -> VkResult<bool>;

    fn queue_submit(&self, submit: &SubmitDesc) -> VkResult<()>;

    fn create_semaphore(&self) -> VkResult<vk::Semaphore>;
    fn destroy_semaphore(&self, semaphore: vk::Semaphore);

    fn create_fence(&self, signaled: bool) -> VkResult<vk::Fence>;
    fn destroy_fence(&self, fence: vk::Fence);
    fn wait_for_fence(&self, fence: vk::Fence, timeout: u64) -> VkResult<()>;
    fn reset_fence(&self, fence: vk::Fence) -> VkResult<()>;

    fn create_command_pool(&self) -> VkResult<vk::CommandPool>;
    fn destroy_command_pool(&self, pool: vk::CommandPool);
    fn allocate_command_buffers(
        &self,
        pool: vk::CommandPool,
        count: u32,
    ) -> VkResult<Vec<vk::CommandBuffer>>;
    fn free_command_buffers(&self, pool: vk::CommandPool, buffers: &[vk::CommandBuffer]);

    fn create_color_view(&self, image: vk::Image, format: vk::Format) -> VkResult<vk::ImageView>;
    fn destroy_image_view(&self, view: vk::ImageView);

    fn create_framebuffer(
        &self,
        render_pass: vk::RenderPass,
        attachments: &[vk::ImageView],
        extent: vk::Extent2D,
    ) -> VkResult<vk::Framebuffer>;
    fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer);

    fn find_depth_format(&self) -> vk::Format;
    fn create_depth_image(&self, extent: vk::Extent2D, format: vk::Format) -> VkResult<DepthImage>;
    fn destroy_depth_image(&self, depth: &DepthImage);
    /// Record, submit and wait for a one-shot UNDEFINED → DEPTH_STENCIL_ATTACHMENT_OPTIMAL transition.
    fn transition_depth_image(&self, pool: vk::CommandPool, depth: &DepthImage) -> VkResult<()>;

    /// Single subpass, colour attachment cleared and left in PRESENT_SRC, optional depth.
    fn create_basic_render_pass(
        &self,
        color_format: vk::Format,
        depth_format: Option<vk::Format>,
    ) -> VkResult<vk::RenderPass>;
    fn destroy_render_pass(&self, render_pass: vk::RenderPass);
}
