// SPDX-License-Identifier: CEPL-1.0
use anyhow::Result;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RenderSize {
    pub width: u32,
    pub height: u32,
}

impl RenderSize {
    pub fn is_zero_area(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// Outcome of one step of the PrepareDraw → Draw → SwapBuffers sequence.
///
/// The frame loop decides what to do with it: re-enter on `Retry`, skip the
/// frame on `NotReady`, abort the session on `Failed`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AppDrawResult {
    Completed,
    Failed,
    NotReady,
    Retry,
}

impl AppDrawResult {
    pub fn is_completed(self) -> bool {
        self == AppDrawResult::Completed
    }
}

/// Notifications the render backend sends to whoever hosts it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RenderSystemEvent {
    SwapchainLost,
    SwapchainRecreated,
}

pub trait Renderer {
    fn new(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        size: RenderSize,
    ) -> Result<Self>
    where
        Self: Sized;

    fn resize(&mut self, size: RenderSize) -> Result<()>;
    fn render(&mut self) -> Result<AppDrawResult>;
    fn set_clear_color(&mut self, rgba: [f32; 4]);
    fn set_vsync(&mut self, _on: bool) {}
}
