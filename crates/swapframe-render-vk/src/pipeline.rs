// SPDX-License-Identifier: CEPL-1.0
//! The draw orchestrator.
//!
//! Per frame the caller runs `try_prepare_draw` → `draw` → `try_swap_buffers`
//! for one frame-in-flight slot. Any result other than `Completed` moves the
//! pipeline into `WaitForSwapchainRecreation`; the next prepare makes exactly
//! one attempt to recreate the swapchain before acquiring again.
//!
//! Everything here runs on the caller's thread. CPU/GPU ordering is expressed
//! only through each slot's fence and semaphores:
//! - a slot's command buffer is never re-recorded before its fence signalled,
//! - an image is never handed to a slot while another slot's work may still use it.

use ash::prelude::VkResult;
use ash::vk;
use swapframe_render::{AppDrawResult, RenderSystemEvent};
use tracing::{debug, error, info, warn};

use crate::config::{PipelineConfig, ResizeStrategy};
use crate::device::{GpuDevice, SubmitDesc};
use crate::error::{FrameError, VkResultExt};
use crate::frame::{self, FrameDrawRecord, SwapchainRecord};
use crate::hooks::{
    host_mut, DrawContext, RenderHook, RenderHost, ScreenshotLink, SwapchainImageInfo, SystemUi,
};
use crate::resources::DependentResources;
use crate::semaphore_pool::SemaphorePool;
use crate::swapchain::{is_zero_extent, SwapchainManager};

/// Effectively unbounded; acquire and fence waits block until they complete.
pub const DEFAULT_TIMEOUT: u64 = u64::MAX;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AppState {
    Ready,
    WaitForSwapchainRecreation,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecreateResult {
    Completed,
    NotReady,
    Failed,
}

/// Map an acquire/present outcome onto the four-way draw result.
pub fn classify_result<T>(result: &VkResult<T>) -> AppDrawResult {
    match result {
        Ok(_) => AppDrawResult::Completed,
        Err(vk::Result::ERROR_OUT_OF_DATE_KHR) | Err(vk::Result::ERROR_SURFACE_LOST_KHR) => {
            AppDrawResult::Retry
        }
        Err(_) => AppDrawResult::Failed,
    }
}

pub struct FramePipeline<D: GpuDevice, H: RenderHook<D>> {
    pub(crate) device: D,
    pub(crate) hook: H,
    pub(crate) host: Option<Box<dyn RenderHost>>,
    pub(crate) config: PipelineConfig,
    pub(crate) swapchain: SwapchainManager,
    pub(crate) command_pool: vk::CommandPool,
    pub(crate) semaphores: SemaphorePool,
    pub(crate) resources: DependentResources,
    pub(crate) current_frame: usize,
    app_state: AppState,
    shut_down: bool,
}

impl<D: GpuDevice, H: RenderHook<D>> FramePipeline<D, H> {
    /// Create the pipeline and run the first build. Any failure here aborts
    /// construction; whatever was created is released on the way out.
    pub fn new(
        device: D,
        hook: H,
        host: Option<Box<dyn RenderHost>>,
        config: PipelineConfig,
    ) -> Result<Self, FrameError> {
        let config = config.processed();
        let swapchain = SwapchainManager::new(device.surface());
        let command_pool = device.create_command_pool().call("create_command_pool")?;

        let mut pipeline = Self {
            device,
            hook,
            host,
            config,
            swapchain,
            command_pool,
            semaphores: SemaphorePool::new(),
            resources: DependentResources::default(),
            current_frame: 0,
            app_state: AppState::Ready,
            shut_down: false,
        };
        pipeline.build_resources()?;
        Ok(pipeline)
    }

    pub fn try_prepare_draw(&mut self, frame: usize) -> AppDrawResult {
        let result = self.do_prepare_draw(frame);
        self.set_app_state(result);
        self.refresh_screenshot_link(result, frame);
        result
    }

    fn do_prepare_draw(&mut self, frame: usize) -> AppDrawResult {
        if self.app_state == AppState::WaitForSwapchainRecreation {
            match self.try_recreate_swapchain() {
                RecreateResult::Completed => {}
                RecreateResult::NotReady => return AppDrawResult::NotReady,
                RecreateResult::Failed => {
                    debug!("prepare_draw: failed to recreate swapchain");
                    return AppDrawResult::Failed;
                }
            }
        }
        if !self.resources.valid {
            warn!("prepare_draw: dependent resources are not built");
            return AppDrawResult::Failed;
        }
        if frame >= self.resources.frames.len() {
            warn!(
                "prepare_draw: frame {frame} out of range ({} frames in flight)",
                self.resources.frames.len()
            );
            return AppDrawResult::Failed;
        }

        let acquire_sem = match self.semaphores.acquire(&self.device) {
            Ok(sem) => sem,
            Err(e) => {
                warn!("prepare_draw: create_semaphore failed: {e}");
                return AppDrawResult::Failed;
            }
        };

        let acquired =
            self.device
                .acquire_next_image(self.swapchain.handle(), DEFAULT_TIMEOUT, acquire_sem);
        let image = match acquired {
            Ok((index, suboptimal)) => {
                if suboptimal {
                    debug!("prepare_draw: swapchain is suboptimal");
                }
                index
            }
            Err(e) => {
                // Nothing was signalled; the semaphore can go straight back.
                self.semaphores.release(acquire_sem);
                debug!("prepare_draw: acquire_next_image returned {e}");
                return classify_result::<()>(&Err(e));
            }
        };
        if image as usize >= self.resources.records.len() {
            warn!("prepare_draw: driver returned image {image} outside the swapchain");
            self.resources.stale_semaphores.push(acquire_sem);
            return AppDrawResult::Failed;
        }

        // The slot's previous submission must have retired before its resources are reused.
        let fence = self.resources.frames[frame].in_flight;
        let waited = self
            .device
            .wait_for_fence(fence, DEFAULT_TIMEOUT)
            .and_then(|_| self.device.reset_fence(fence));
        if let Err(e) = waited {
            warn!("prepare_draw: in-flight fence of frame {frame} failed: {e}");
            self.resources.stale_semaphores.push(acquire_sem);
            return AppDrawResult::Failed;
        }

        if let Some(other) = frame::conflicting_owner(&self.resources.records, frame, image) {
            debug!("prepare_draw: image {image} still held by frame {other}, waiting for it");
            let other_fence = self.resources.frames[other].in_flight;
            if let Err(e) = self.device.wait_for_fence(other_fence, DEFAULT_TIMEOUT) {
                warn!("prepare_draw: in-flight fence of frame {other} failed: {e}");
                self.resources.stale_semaphores.push(acquire_sem);
                return AppDrawResult::Failed;
            }
        }
        frame::assign_image(
            &mut self.resources.frames,
            &mut self.resources.records,
            frame,
            image,
        );
        self.resources.last_acquired = Some(image);

        // The old semaphore's wait belonged to the submission we just waited on.
        let previous =
            std::mem::replace(&mut self.resources.frames[frame].image_acquired, acquire_sem);
        self.semaphores.release(previous);

        AppDrawResult::Completed
    }

    /// Record the slot's command buffer through the render hook and submit it.
    pub fn draw(&mut self, frame: usize) -> Result<(), FrameError> {
        let count = self.resources.frames.len();
        let Some(rec) = self.resources.frames.get(frame).copied() else {
            return Err(FrameError::InvalidFrame {
                index: frame,
                count,
            });
        };
        let image = rec.swap_image.ok_or(FrameError::NoImageAssigned(frame))?;

        let ctx = DrawContext {
            extent: self.swapchain.extent(),
            render_pass: self.resources.render_pass,
            framebuffer: self.resources.records[image as usize].framebuffer,
            command_buffer: self.resources.command_buffers[frame],
            swap_image_index: image,
            frame_index: frame,
        };

        if let Some(host) = self.host.as_mut() {
            host.begin_frame(ctx.command_buffer, frame);
        }
        let recorded = {
            let mut ui = SystemUi::new(host_mut(&mut self.host));
            self.hook.record(&self.device, &ctx, &mut ui)
        };
        if let Some(host) = self.host.as_mut() {
            host.end_frame();
        }
        if let Err(e) = recorded {
            error!("draw: recording frame {frame} failed: {e:#}");
            return Err(e.into());
        }

        self.device
            .queue_submit(&SubmitDesc {
                command_buffer: ctx.command_buffer,
                wait_semaphore: rec.image_acquired,
                wait_stage: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
                signal_semaphore: rec.image_released,
                fence: rec.in_flight,
            })
            .call("queue_submit")
    }

    pub fn try_swap_buffers(&mut self, frame: usize) -> AppDrawResult {
        let result = self.do_swap_buffers(frame);
        self.set_app_state(result);
        result
    }

    fn do_swap_buffers(&mut self, frame: usize) -> AppDrawResult {
        let Some(rec) = self.resources.frames.get(frame).copied() else {
            warn!("swap_buffers: frame {frame} out of range");
            return AppDrawResult::Failed;
        };
        let Some(image) = rec.swap_image else {
            warn!("swap_buffers: frame {frame} holds no swapchain image");
            return AppDrawResult::Failed;
        };

        let presented = self
            .device
            .queue_present(self.swapchain.handle(), image, rec.image_released);

        let frames_in_flight = (self.resources.frames_in_flight as usize).max(1);
        self.current_frame = (frame + 1) % frames_in_flight;

        if let Err(e) = &presented {
            debug!("swap_buffers: queue_present returned {e}");
        }
        classify_result(&presented)
    }

    /// `Completed` → `Ready`. Anything else moves to `WaitForSwapchainRecreation`,
    /// telling the host the swapchain is lost on the first transition only.
    pub fn set_app_state(&mut self, result: AppDrawResult) {
        match result {
            AppDrawResult::Completed => {
                if self.app_state != AppState::Ready {
                    debug!("app state: Ready");
                }
                self.app_state = AppState::Ready;
            }
            AppDrawResult::Failed | AppDrawResult::NotReady | AppDrawResult::Retry => {
                if self.app_state == AppState::WaitForSwapchainRecreation {
                    return;
                }
                debug!("app state: WaitForSwapchainRecreation ({result:?})");
                self.wait_idle_logged("set_app_state");
                self.swapchain.mark_lost();
                if let Some(host) = self.host.as_mut() {
                    host.on_render_system_event(RenderSystemEvent::SwapchainLost);
                }
                self.app_state = AppState::WaitForSwapchainRecreation;
            }
        }
    }

    /// Free and rebuild everything against the surface's current state.
    /// A zero-area surface (minimised window) is left completely untouched.
    pub fn try_recreate_swapchain(&mut self) -> RecreateResult {
        if let Err(e) = self.device.wait_idle() {
            warn!("recreate: wait for device idle failed: {e}");
            return RecreateResult::Failed;
        }
        let caps = match self.device.surface_capabilities(self.swapchain.surface()) {
            Ok(caps) => caps,
            Err(e) => {
                warn!("recreate: failed to get surface capabilities: {e}");
                return RecreateResult::Failed;
            }
        };
        if is_zero_extent(caps.current_extent) {
            debug!("recreate: surface extent is 0x0, not ready");
            return RecreateResult::NotReady;
        }

        debug!("recreate: recreating swapchain");
        self.swapchain.begin_recreate();
        self.free_resources();
        match self.build_resources() {
            Ok(()) => {
                if let Some(host) = self.host.as_mut() {
                    host.on_render_system_event(RenderSystemEvent::SwapchainRecreated);
                }
                RecreateResult::Completed
            }
            Err(e) => {
                warn!("recreate: failed to recreate swapchain: {e}");
                RecreateResult::Failed
            }
        }
    }

    /// Window-resized notification. Returns `None` when nothing was attempted.
    pub fn on_resized(&mut self, extent: vk::Extent2D) -> Option<RecreateResult> {
        if !is_zero_extent(extent) {
            self.config.fallback_extent = extent;
        }
        if self.config.resize_strategy != ResizeStrategy::Rebuild
            || !self.resources.valid
            || self.app_state != AppState::Ready
        {
            return None;
        }
        let result = self.try_recreate_swapchain();
        if result == RecreateResult::Failed {
            self.set_app_state(AppDrawResult::Failed);
        }
        Some(result)
    }

    /// Free + build, but only while `Ready`; returns whether a rebuild happened.
    pub fn try_rebuild_resources(&mut self) -> Result<bool, FrameError> {
        if self.app_state != AppState::Ready {
            return Ok(false);
        }
        self.free_resources();
        self.build_resources()?;
        Ok(true)
    }

    /// Switch present mode and rebuild if it changed.
    pub fn set_present_mode(&mut self, mode: vk::PresentModeKHR) -> Result<bool, FrameError> {
        if self.config.present_mode == mode {
            return Ok(false);
        }
        self.config.present_mode = mode;
        if !self.resources.valid {
            return Ok(false);
        }
        self.try_rebuild_resources()
    }

    /// PrepareDraw → Draw → SwapBuffers for the current slot.
    pub fn render_frame(&mut self) -> AppDrawResult {
        let frame = self.current_frame;
        let prepared = self.try_prepare_draw(frame);
        if !prepared.is_completed() {
            return prepared;
        }
        if self.draw(frame).is_err() {
            self.set_app_state(AppDrawResult::Failed);
            return AppDrawResult::Failed;
        }
        self.try_swap_buffers(frame)
    }

    /// The most recently acquired image, only while the swapchain is usable.
    /// Stays valid after the frame was presented.
    pub fn try_get_swapchain_info(&self) -> Option<SwapchainImageInfo> {
        if !self.swapchain.is_valid() || self.app_state != AppState::Ready {
            return None;
        }
        self.image_info_for(self.resources.last_acquired?)
    }

    fn image_info_for(&self, image: u32) -> Option<SwapchainImageInfo> {
        let handle = *self.swapchain.images().get(image as usize)?;
        Some(SwapchainImageInfo {
            image: handle,
            format: self.swapchain.format().format,
            usage: self.swapchain.usage(),
            extent: self.swapchain.extent(),
        })
    }

    fn refresh_screenshot_link(&self, result: AppDrawResult, frame: usize) {
        let image = self.resources.frames.get(frame).and_then(|f| f.swap_image);
        let info = if result.is_completed() && self.swapchain.is_valid() {
            image.and_then(|i| self.image_info_for(i))
        } else {
            None
        };
        self.resources.screenshot_link.set(info);
    }

    pub(crate) fn wait_idle_logged(&self, what: &str) {
        if let Err(e) = self.device.wait_idle() {
            warn!("{what}: wait for device idle failed: {e}");
        }
    }

    /// Final teardown: dependent resources, then the swapchain, then the pools.
    /// The surface belongs to the device context and outlives this.
    pub fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        self.shut_down = true;
        self.free_resources();
        self.swapchain.destroy(&self.device);
        self.semaphores.destroy(&self.device);
        if self.command_pool != vk::CommandPool::null() {
            self.device.destroy_command_pool(self.command_pool);
            self.command_pool = vk::CommandPool::null();
        }
        info!("frame pipeline shut down");
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn hook(&self) -> &H {
        &self.hook
    }

    pub fn hook_mut(&mut self) -> &mut H {
        &mut self.hook
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn app_state(&self) -> AppState {
        self.app_state
    }

    pub fn current_frame(&self) -> usize {
        self.current_frame
    }

    pub fn frames_in_flight(&self) -> u32 {
        self.resources.frames_in_flight
    }

    pub fn is_built(&self) -> bool {
        self.resources.valid
    }

    pub fn swapchain(&self) -> &SwapchainManager {
        &self.swapchain
    }

    pub fn frame_records(&self) -> &[FrameDrawRecord] {
        &self.resources.frames
    }

    pub fn swapchain_records(&self) -> &[SwapchainRecord] {
        &self.resources.records
    }

    pub fn screenshot_link(&self) -> ScreenshotLink {
        self.resources.screenshot_link.clone()
    }

    pub fn semaphore_pool(&self) -> &SemaphorePool {
        &self.semaphores
    }
}

impl<D: GpuDevice, H: RenderHook<D>> Drop for FramePipeline<D, H> {
    fn drop(&mut self) {
        self.shutdown();
    }
}
