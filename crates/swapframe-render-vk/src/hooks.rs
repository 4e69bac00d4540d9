// SPDX-License-Identifier: CEPL-1.0
//! Collaborators the pipeline calls out to: the render hook that owns the
//! actual drawing, and the render-service host that layers its own resources
//! (overlay UI, screenshot capture) on top of the pipeline's.

use std::cell::Cell;
use std::rc::Rc;

use anyhow::Result;
use ash::vk;
use swapframe_render::RenderSystemEvent;

use crate::device::GpuDevice;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DepthAttachmentInfo {
    pub view: vk::ImageView,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
}

/// Handed to [`RenderHook::on_build_resources`] once per build.
#[derive(Clone, Copy, Debug)]
pub struct BuildContext {
    pub image_extent: vk::Extent2D,
    pub image_format: vk::Format,
    pub image_count: u32,
    pub frames_in_flight: u32,
    pub depth: Option<DepthAttachmentInfo>,
    pub command_pool: vk::CommandPool,
}

/// Per-frame target for [`RenderHook::record`].
#[derive(Clone, Copy, Debug)]
pub struct DrawContext {
    pub extent: vk::Extent2D,
    pub render_pass: vk::RenderPass,
    pub framebuffer: vk::Framebuffer,
    pub command_buffer: vk::CommandBuffer,
    pub swap_image_index: u32,
    pub frame_index: usize,
}

/// What the host needs to build its render-pass dependent resources.
#[derive(Clone, Copy, Debug)]
pub struct HostResourceInfo {
    pub image_count: u32,
    pub render_pass: vk::RenderPass,
    pub subpass_system_ui: u32,
    pub extent: vk::Extent2D,
}

/// The image currently handed out for rendering, for on-demand capture.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SwapchainImageInfo {
    pub image: vk::Image,
    pub format: vk::Format,
    pub usage: vk::ImageUsageFlags,
    pub extent: vk::Extent2D,
}

/// Shared slot the pipeline refreshes after every prepare; `None` when no image is held.
pub type ScreenshotLink = Rc<Cell<Option<SwapchainImageInfo>>>;

/// The app-side half of the pipeline.
///
/// `on_free_resources` is called on every free, including the rollback of a
/// build that failed before `on_build_resources` ran, so it must tolerate
/// having nothing to release.
pub trait RenderHook<D: GpuDevice> {
    fn on_build_resources(&mut self, device: &D, ctx: &BuildContext) -> Result<vk::RenderPass>;

    fn on_free_resources(&mut self, device: &D);

    /// Record `ctx.command_buffer` (begin → render pass → end). Call
    /// `ui.draw(ctx)` as the last thing inside the render pass to let the host
    /// add its overlay.
    fn record(&mut self, device: &D, ctx: &DrawContext, ui: &mut SystemUi<'_>) -> Result<()>;
}

pub trait RenderHost {
    fn begin_frame(&mut self, command_buffer: vk::CommandBuffer, frame_index: usize);
    fn end_frame(&mut self);

    fn create_dependent_resources(&mut self, info: &HostResourceInfo) -> Result<()>;
    fn destroy_dependent_resources(&mut self);

    fn on_render_system_event(&mut self, event: RenderSystemEvent);

    fn set_swapchain_info_link(&mut self, link: ScreenshotLink);

    fn draw_system_ui(&mut self, _ctx: &DrawContext) {}
}

/// Lets a render hook ask the host for overlay drawing without holding the host itself.
pub struct SystemUi<'a> {
    host: Option<&'a mut dyn RenderHost>,
    drawn: bool,
}

impl<'a> SystemUi<'a> {
    pub fn new(host: Option<&'a mut dyn RenderHost>) -> Self {
        Self { host, drawn: false }
    }

    pub fn draw(&mut self, ctx: &DrawContext) {
        if self.drawn {
            return;
        }
        if let Some(host) = self.host.as_deref_mut() {
            host.draw_system_ui(ctx);
        }
        self.drawn = true;
    }
}

pub(crate) fn host_mut(host: &mut Option<Box<dyn RenderHost>>) -> Option<&mut dyn RenderHost> {
    match host {
        Some(h) => Some(h.as_mut()),
        None => None,
    }
}
