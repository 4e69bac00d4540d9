// SPDX-License-Identifier: CEPL-1.0
//! Vulkan frame pipeline: swapchain lifecycle, frames in flight and the
//! PrepareDraw → Draw → SwapBuffers sequence, plus a clear-screen
//! [`VkRenderer`] built on it.
#![deny(unsafe_op_in_unsafe_fn)]

mod clear;
pub mod config;
mod context;
pub mod device;
pub mod error;
pub mod frame;
pub mod hooks;
#[cfg(test)]
pub(crate) mod mock;
pub mod pipeline;
mod resources;
pub mod semaphore_pool;
pub mod swapchain;

use std::rc::Rc;

use anyhow::Result;
use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use swapframe_render::{AppDrawResult, RenderSize, Renderer};
use tracing::{debug, info, warn};

pub use ash;
pub use clear::ClearPass;
pub use config::{DepthBufferMode, PipelineConfig, ResizeStrategy};
pub use context::{AshDevice, VkContext};
pub use device::GpuDevice;
pub use error::FrameError;
pub use hooks::{RenderHook, RenderHost, SystemUi};
pub use pipeline::{AppState, FramePipeline, RecreateResult};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VkVsyncMode {
    Fifo,    // Target monitor refresh rate
    Mailbox, // Smart Vsync, fps uncapped
}

/// Present mode asked of the swapchain; the pipeline falls back to FIFO if the
/// surface lacks it.
pub fn present_mode_for(vsync: bool, mode: VkVsyncMode) -> vk::PresentModeKHR {
    if !vsync {
        return vk::PresentModeKHR::IMMEDIATE;
    }
    match mode {
        VkVsyncMode::Fifo => vk::PresentModeKHR::FIFO,
        VkVsyncMode::Mailbox => vk::PresentModeKHR::MAILBOX,
    }
}

const DEFAULT_CLEAR: [f32; 4] = [0.02, 0.02, 0.04, 1.0];

fn extent_of(size: RenderSize) -> vk::Extent2D {
    vk::Extent2D {
        width: size.width,
        height: size.height,
    }
}

pub struct VkRenderer {
    pipeline: FramePipeline<AshDevice, ClearPass>,
    vsync: bool,
    vsync_mode: VkVsyncMode,
}

impl VkRenderer {
    pub fn with_config(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        size: RenderSize,
        mut config: PipelineConfig,
    ) -> Result<Self> {
        if !size.is_zero_area() {
            config.fallback_extent = extent_of(size);
        }
        let vsync_mode = if config.effective_present_mode() == vk::PresentModeKHR::MAILBOX {
            VkVsyncMode::Mailbox
        } else {
            VkVsyncMode::Fifo
        };

        let ctx = Rc::new(VkContext::new(window, display)?);
        let pipeline = FramePipeline::new(
            AshDevice::new(ctx),
            ClearPass::new(DEFAULT_CLEAR),
            None,
            config,
        )?;

        let extent = pipeline.swapchain().extent();
        info!(
            "Vulkan renderer ready ({}x{}, {} frames in flight)",
            extent.width,
            extent.height,
            pipeline.frames_in_flight()
        );
        Ok(Self {
            pipeline,
            vsync: true,
            vsync_mode,
        })
    }

    pub fn set_vsync_mode(&mut self, mode: VkVsyncMode) {
        if self.vsync_mode == mode {
            return;
        }
        self.vsync_mode = mode;
        self.apply_present_mode();
    }

    pub fn pipeline(&self) -> &FramePipeline<AshDevice, ClearPass> {
        &self.pipeline
    }

    pub fn pipeline_mut(&mut self) -> &mut FramePipeline<AshDevice, ClearPass> {
        &mut self.pipeline
    }

    fn apply_present_mode(&mut self) {
        let mode = present_mode_for(self.vsync, self.vsync_mode);
        match self.pipeline.set_present_mode(mode) {
            Ok(true) => debug!("present mode -> {mode:?}, resources rebuilt"),
            Ok(false) => {}
            Err(e) => warn!("switching present mode to {mode:?} failed: {e}"),
        }
    }
}

impl Renderer for VkRenderer {
    fn new(window: &dyn HasWindowHandle, display: &dyn HasDisplayHandle, size: RenderSize) -> Result<Self> {
        Self::with_config(window, display, size, PipelineConfig::default())
    }

    fn resize(&mut self, size: RenderSize) -> Result<()> {
        match self.pipeline.on_resized(extent_of(size)) {
            Some(RecreateResult::Failed) => {
                warn!("resize to {}x{}: swapchain recreation failed", size.width, size.height)
            }
            Some(r) => debug!("resize to {}x{}: {r:?}", size.width, size.height),
            None => {}
        }
        Ok(())
    }

    fn render(&mut self) -> Result<AppDrawResult> {
        Ok(self.pipeline.render_frame())
    }

    fn set_clear_color(&mut self, rgba: [f32; 4]) {
        self.pipeline.hook_mut().set_clear_color(rgba);
    }

    fn set_vsync(&mut self, on: bool) {
        if self.vsync == on {
            return;
        }
        self.vsync = on;
        self.apply_present_mode();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vsync_off_asks_for_immediate() {
        assert_eq!(
            present_mode_for(false, VkVsyncMode::Mailbox),
            vk::PresentModeKHR::IMMEDIATE
        );
        assert_eq!(
            present_mode_for(true, VkVsyncMode::Mailbox),
            vk::PresentModeKHR::MAILBOX
        );
        assert_eq!(present_mode_for(true, VkVsyncMode::Fifo), vk::PresentModeKHR::FIFO);
    }
}
