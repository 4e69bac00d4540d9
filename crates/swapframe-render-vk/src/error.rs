// SPDX-License-Identifier: CEPL-1.0
use ash::prelude::VkResult;
use ash::vk;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("{call} failed: {result}")]
    Vk {
        call: &'static str,
        result: vk::Result,
    },
    #[error("surface reports no supported formats")]
    NoSurfaceFormats,
    #[error("swapchain has no images")]
    NoSwapchainImages,
    #[error("dependent resources are still allocated, free them first")]
    AlreadyBuilt,
    #[error("frame {0} has no swapchain image assigned")]
    NoImageAssigned(usize),
    #[error("frame index {index} out of range (frames in flight: {count})")]
    InvalidFrame { index: usize, count: usize },
    #[error(transparent)]
    Hook(#[from] anyhow::Error),
}

impl FrameError {
    /// The raw driver result, if this error came straight from a Vulkan call.
    pub fn vk_result(&self) -> Option<vk::Result> {
        match self {
            FrameError::Vk { result, .. } => Some(*result),
            _ => None,
        }
    }
}

/// Attach the name of the failing Vulkan call, the way `anyhow::Context` is used elsewhere.
pub trait VkResultExt<T> {
    fn call(self, call: &'static str) -> Result<T, FrameError>;
}

impl<T> VkResultExt<T> for VkResult<T> {
    fn call(self, call: &'static str) -> Result<T, FrameError> {
        self.map_err(|result| FrameError::Vk { call, result })
    }
}
