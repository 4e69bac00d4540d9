// SPDX-License-Identifier: CEPL-1.0
use ash::vk;
use tracing::warn;

/// Upper bound on frames in flight; also what `0` resolves to.
pub const DEFAULT_MAX_FRAMES_IN_FLIGHT: u32 = 2;
pub const DESIRED_MIN_SWAP_BUFFER_COUNT: u32 = 2;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum DepthBufferMode {
    #[default]
    Disabled,
    Enabled,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum ResizeStrategy {
    /// Leave resources alone; rely on out-of-date results to trigger recreation.
    Ignore,
    /// Recreate the swapchain and everything that depends on it on every resize.
    #[default]
    Rebuild,
}

#[derive(Clone, Debug)]
pub struct PipelineConfig {
    pub max_frames_in_flight: u32,
    pub depth_buffer: DepthBufferMode,
    pub desired_image_usage: vk::ImageUsageFlags,
    pub screenshots: bool,
    pub present_mode: vk::PresentModeKHR,
    pub present_mode_override: Option<vk::PresentModeKHR>,
    pub preferred_surface_formats: Vec<vk::SurfaceFormatKHR>,
    pub resize_strategy: ResizeStrategy,
    pub subpass_system_ui: u32,
    pub desired_min_image_count: u32,
    /// Used when the surface leaves the extent up to the swapchain.
    pub fallback_extent: vk::Extent2D,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_frames_in_flight: DEFAULT_MAX_FRAMES_IN_FLIGHT,
            depth_buffer: DepthBufferMode::Disabled,
            desired_image_usage: vk::ImageUsageFlags::empty(),
            screenshots: false,
            present_mode: vk::PresentModeKHR::FIFO,
            present_mode_override: None,
            preferred_surface_formats: Vec::new(),
            resize_strategy: ResizeStrategy::Rebuild,
            subpass_system_ui: 0,
            desired_min_image_count: DESIRED_MIN_SWAP_BUFFER_COUNT,
            fallback_extent: vk::Extent2D {
                width: 1,
                height: 1,
            },
        }
    }
}

impl PipelineConfig {
    /// Resolve `0` to the default and cap anything above it.
    pub fn processed(mut self) -> Self {
        if self.max_frames_in_flight == 0 {
            self.max_frames_in_flight = DEFAULT_MAX_FRAMES_IN_FLIGHT;
        } else if self.max_frames_in_flight > DEFAULT_MAX_FRAMES_IN_FLIGHT {
            warn!(
                "max_frames_in_flight {} capped to {}",
                self.max_frames_in_flight, DEFAULT_MAX_FRAMES_IN_FLIGHT
            );
            self.max_frames_in_flight = DEFAULT_MAX_FRAMES_IN_FLIGHT;
        }
        if self.desired_min_image_count == 0 {
            self.desired_min_image_count = DESIRED_MIN_SWAP_BUFFER_COUNT;
        }
        self
    }

    pub fn effective_present_mode(&self) -> vk::PresentModeKHR {
        self.present_mode_override.unwrap_or(self.present_mode)
    }

    /// Usage requested from the surface before filtering. Screenshots need the
    /// image to be a transfer source; filtering drops the bit if the surface can't.
    pub fn requested_image_usage(&self) -> vk::ImageUsageFlags {
        let mut usage = self.desired_image_usage;
        if self.screenshots {
            usage |= vk::ImageUsageFlags::TRANSFER_SRC;
        }
        usage
    }
}
