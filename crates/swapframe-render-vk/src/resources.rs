// SPDX-License-Identifier: CEPL-1.0
//! Building and freeing everything that depends on the swapchain.
//!
//! Build and free are all-or-nothing: a failed build rolls back through
//! [`FramePipeline::free_resources`] before the error is returned, so the
//! bundle is either fully valid or fully empty.

use std::cell::Cell;
use std::rc::Rc;

use ash::vk;
use tracing::{debug, error, info};

use crate::device::{DepthImage, GpuDevice};
use crate::error::{FrameError, VkResultExt};
use crate::frame::{FrameDrawRecord, SwapchainRecord};
use crate::hooks::{
    BuildContext, DepthAttachmentInfo, HostResourceInfo, RenderHook, ScreenshotLink,
};
use crate::pipeline::FramePipeline;
use crate::swapchain::SwapchainRequest;

#[derive(Default)]
pub struct DependentResources {
    pub valid: bool,
    pub render_pass: vk::RenderPass,
    pub depth: Option<DepthImage>,
    pub frames: Vec<FrameDrawRecord>,
    pub records: Vec<SwapchainRecord>,
    pub command_buffers: Vec<vk::CommandBuffer>,
    pub frames_in_flight: u32,
    /// Image handed out by the most recent successful prepare.
    pub last_acquired: Option<u32>,
    /// Acquire semaphores left in an unknown state by an aborted prepare;
    /// destroyed on the next free, once the device is idle.
    pub stale_semaphores: Vec<vk::Semaphore>,
    pub screenshot_link: ScreenshotLink,
}

impl<D: GpuDevice, H: RenderHook<D>> FramePipeline<D, H> {
    pub fn build_resources(&mut self) -> Result<(), FrameError> {
        if self.resources.valid {
            return Err(FrameError::AlreadyBuilt);
        }
        debug!("build_resources");

        // Marked valid up front so a rollback through free_resources runs.
        self.resources.valid = true;
        match self.build_inner() {
            Ok(()) => {
                let extent = self.swapchain.extent();
                info!(
                    "dependent resources built ({}x{}, {} images, {} frames in flight, depth={})",
                    extent.width,
                    extent.height,
                    self.swapchain.image_count(),
                    self.resources.frames_in_flight,
                    self.resources.depth.is_some()
                );
                Ok(())
            }
            Err(e) => {
                error!("build_resources failed: {e}");
                self.free_resources();
                Err(e)
            }
        }
    }

    fn build_inner(&mut self) -> Result<(), FrameError> {
        debug!("build: creating swapchain");
        let request = SwapchainRequest {
            usage: self.config.requested_image_usage(),
            present_mode: self.config.effective_present_mode(),
            min_image_count: self.config.desired_min_image_count,
            fallback_extent: self.config.fallback_extent,
            preferred_formats: &self.config.preferred_surface_formats,
        };
        self.swapchain.create(&self.device, &request)?;

        let image_count = self.swapchain.image_count();
        if image_count == 0 {
            return Err(FrameError::NoSwapchainImages);
        }
        let frames_in_flight = self.config.max_frames_in_flight.min(image_count);
        self.resources.frames_in_flight = frames_in_flight;
        let extent = self.swapchain.extent();
        let format = self.swapchain.format().format;
        debug!("build: {image_count} swapchain images, {frames_in_flight} frames in flight");

        for i in 0..frames_in_flight as usize {
            self.resources.frames.push(FrameDrawRecord {
                image_acquired: vk::Semaphore::null(),
                image_released: vk::Semaphore::null(),
                in_flight: vk::Fence::null(),
                swap_image: None,
            });
            let acquired = self
                .semaphores
                .acquire(&self.device)
                .call("create_semaphore")?;
            self.resources.frames[i].image_acquired = acquired;
            self.resources.frames[i].image_released =
                self.device.create_semaphore().call("create_semaphore")?;
            self.resources.frames[i].in_flight =
                self.device.create_fence(true).call("create_fence")?;
        }

        if self.config.depth_buffer == crate::config::DepthBufferMode::Enabled {
            let depth_format = self.device.find_depth_format();
            debug!("build: creating depth image ({depth_format:?})");
            let depth = self
                .device
                .create_depth_image(extent, depth_format)
                .call("create_depth_image")?;
            self.resources.depth = Some(depth);
            self.device
                .transition_depth_image(self.command_pool, &depth)
                .call("transition_depth_image")?;
        }

        debug!("build: allocating command buffers");
        self.resources.command_buffers = self
            .device
            .allocate_command_buffers(self.command_pool, frames_in_flight)
            .call("allocate_command_buffers")?;

        let depth_info = self.resources.depth.map(|d| DepthAttachmentInfo {
            view: d.view,
            format: d.format,
            extent: d.extent,
        });
        let ctx = BuildContext {
            image_extent: extent,
            image_format: format,
            image_count,
            frames_in_flight,
            depth: depth_info,
            command_pool: self.command_pool,
        };
        let render_pass = self.hook.on_build_resources(&self.device, &ctx)?;
        self.resources.render_pass = render_pass;

        debug!("build: populating swapchain records");
        let depth_view = depth_info.map(|d| d.view);
        for (i, &image) in self.swapchain.images().iter().enumerate() {
            self.resources.records.push(SwapchainRecord::default());
            let view = self
                .device
                .create_color_view(image, format)
                .call("create_image_view")?;
            self.resources.records[i].view = view;

            let framebuffer = match depth_view {
                Some(dv) => self.device.create_framebuffer(render_pass, &[view, dv], extent),
                None => self.device.create_framebuffer(render_pass, &[view], extent),
            }
            .call("create_framebuffer")?;
            self.resources.records[i].framebuffer = framebuffer;
        }

        self.resources.screenshot_link = Rc::new(Cell::new(None));
        if let Some(host) = self.host.as_mut() {
            debug!("build: host create_dependent_resources");
            host.create_dependent_resources(&HostResourceInfo {
                image_count,
                render_pass,
                subpass_system_ui: self.config.subpass_system_ui,
                extent,
            })?;
            host.set_swapchain_info_link(self.resources.screenshot_link.clone());
        }

        self.current_frame = 0;
        Ok(())
    }

    /// No-op when nothing is built. Leaves the swapchain handle alone so the
    /// next build can hand it over as `old_swapchain`.
    pub fn free_resources(&mut self) {
        if !self.resources.valid {
            return;
        }
        debug!("free_resources");
        self.wait_idle_logged("free_resources");

        if let Some(host) = self.host.as_mut() {
            host.destroy_dependent_resources();
        }

        for rec in self.resources.records.drain(..) {
            if rec.framebuffer != vk::Framebuffer::null() {
                self.device.destroy_framebuffer(rec.framebuffer);
            }
            if rec.view != vk::ImageView::null() {
                self.device.destroy_image_view(rec.view);
            }
        }

        self.hook.on_free_resources(&self.device);
        self.resources.render_pass = vk::RenderPass::null();

        if !self.resources.command_buffers.is_empty() {
            self.device
                .free_command_buffers(self.command_pool, &self.resources.command_buffers);
            self.resources.command_buffers.clear();
        }
        if let Some(depth) = self.resources.depth.take() {
            self.device.destroy_depth_image(&depth);
        }

        for frame in self.resources.frames.drain(..) {
            if frame.image_acquired != vk::Semaphore::null() {
                self.device.destroy_semaphore(frame.image_acquired);
            }
            if frame.image_released != vk::Semaphore::null() {
                self.device.destroy_semaphore(frame.image_released);
            }
            if frame.in_flight != vk::Fence::null() {
                self.device.destroy_fence(frame.in_flight);
            }
        }
        for sem in self.resources.stale_semaphores.drain(..) {
            self.device.destroy_semaphore(sem);
        }
        self.resources.screenshot_link.set(None);

        self.wait_idle_logged("free_resources (end)");
        self.resources.frames_in_flight = 0;
        self.resources.last_acquired = None;
        self.current_frame = 0;
        self.resources.valid = false;
        debug!("free_resources: completed");
    }
}
