// SPDX-License-Identifier: CEPL-1.0
//! In-memory [`GpuDevice`] for unit tests. Hands out synthetic handles, tracks
//! what is alive, models fence state and lets tests script driver results.

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet, VecDeque};
use std::rc::Rc;

use anyhow::{anyhow, Result};
use ash::prelude::VkResult;
use ash::vk::{self, Handle};
use swapframe_render::RenderSystemEvent;

use crate::device::{DepthImage, GpuDevice, SubmitDesc, SwapchainDesc};
use crate::hooks::{
    BuildContext, DrawContext, HostResourceInfo, RenderHook, RenderHost, ScreenshotLink, SystemUi,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Call {
    WaitIdle,
    SurfaceCapabilities,
    CreateSwapchain { old: vk::SwapchainKHR },
    DestroySwapchain(vk::SwapchainKHR),
    Acquire { semaphore: vk::Semaphore },
    Present { image: u32, wait: vk::Semaphore },
    Submit { fence: vk::Fence, wait: vk::Semaphore },
    WaitFence(vk::Fence),
    ResetFence(vk::Fence),
    AllocateCommandBuffers(u32),
    CreateDepthImage,
    DestroyDepthImage,
    TransitionDepthImage,
}

/// Entry points a test can make fail once.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Op {
    WaitIdle,
    SurfaceCapabilities,
    CreateSwapchain,
    SwapchainImages,
    AllocateCommandBuffers,
    CreateDepthImage,
    CreateFramebuffer,
    WaitFence,
    Submit,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FenceState {
    Signaled,
    Unsignaled,
    /// Submitted, signals on the next wait.
    Pending,
}

struct State {
    next_handle: u64,
    calls: Vec<Call>,
    failures: Vec<(Op, vk::Result)>,

    caps: vk::SurfaceCapabilitiesKHR,
    formats: Vec<vk::SurfaceFormatKHR>,
    modes: Vec<vk::PresentModeKHR>,
    image_count: u32,

    swapchains: HashMap<vk::SwapchainKHR, Vec<vk::Image>>,
    acquire_script: VecDeque<VkResult<(u32, bool)>>,
    present_script: VecDeque<VkResult<bool>>,
    next_image: u32,

    semaphores: HashSet<vk::Semaphore>,
    fences: HashMap<vk::Fence, FenceState>,
    pools: HashSet<vk::CommandPool>,
    command_buffers: HashSet<vk::CommandBuffer>,
    views: HashSet<vk::ImageView>,
    framebuffers: HashSet<vk::Framebuffer>,
    render_passes: HashSet<vk::RenderPass>,
    depth_images: HashSet<vk::Image>,
}

impl State {
    fn handle<T: Handle>(&mut self) -> T {
        self.next_handle += 1;
        T::from_raw(self.next_handle)
    }

    fn take_failure(&mut self, op: Op) -> VkResult<()> {
        match self.failures.iter().position(|(o, _)| *o == op) {
            Some(i) => Err(self.failures.remove(i).1),
            None => Ok(()),
        }
    }
}

pub struct MockDevice {
    surface: vk::SurfaceKHR,
    state: RefCell<State>,
}

impl MockDevice {
    pub fn new() -> Self {
        let extent = vk::Extent2D {
            width: 800,
            height: 600,
        };
        let caps = vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 8,
            current_extent: extent,
            min_image_extent: vk::Extent2D {
                width: 1,
                height: 1,
            },
            max_image_extent: vk::Extent2D {
                width: 4096,
                height: 4096,
            },
            max_image_array_layers: 1,
            supported_transforms: vk::SurfaceTransformFlagsKHR::IDENTITY,
            current_transform: vk::SurfaceTransformFlagsKHR::IDENTITY,
            supported_composite_alpha: vk::CompositeAlphaFlagsKHR::OPAQUE,
            supported_usage_flags: vk::ImageUsageFlags::COLOR_ATTACHMENT
                | vk::ImageUsageFlags::TRANSFER_SRC
                | vk::ImageUsageFlags::TRANSFER_DST,
        };
        Self {
            surface: vk::SurfaceKHR::from_raw(0x5f),
            state: RefCell::new(State {
                next_handle: 0x1000,
                calls: Vec::new(),
                failures: Vec::new(),
                caps,
                formats: vec![vk::SurfaceFormatKHR {
                    format: vk::Format::B8G8R8A8_UNORM,
                    color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
                }],
                modes: vec![vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX],
                image_count: 3,
                swapchains: HashMap::new(),
                acquire_script: VecDeque::new(),
                present_script: VecDeque::new(),
                next_image: 0,
                semaphores: HashSet::new(),
                fences: HashMap::new(),
                pools: HashSet::new(),
                command_buffers: HashSet::new(),
                views: HashSet::new(),
                framebuffers: HashSet::new(),
                render_passes: HashSet::new(),
                depth_images: HashSet::new(),
            }),
        }
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.borrow().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state.borrow_mut().calls.clear();
    }

    pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.state.borrow().calls.iter().filter(|c| pred(c)).count()
    }

    pub fn fail_next(&self, op: Op, result: vk::Result) {
        self.state.borrow_mut().failures.push((op, result));
    }

    pub fn set_surface_formats(&self, formats: Vec<vk::SurfaceFormatKHR>) {
        self.state.borrow_mut().formats = formats;
    }

    pub fn set_current_extent(&self, width: u32, height: u32) {
        self.state.borrow_mut().caps.current_extent = vk::Extent2D { width, height };
    }

    pub fn set_image_count(&self, count: u32) {
        self.state.borrow_mut().image_count = count;
    }

    pub fn push_acquire(&self, result: VkResult<(u32, bool)>) {
        self.state.borrow_mut().acquire_script.push_back(result);
    }

    pub fn push_present(&self, result: VkResult<bool>) {
        self.state.borrow_mut().present_script.push_back(result);
    }

    pub fn fence_state(&self, fence: vk::Fence) -> Option<FenceState> {
        self.state.borrow().fences.get(&fence).copied()
    }

    pub fn live_semaphores(&self) -> usize {
        self.state.borrow().semaphores.len()
    }

    pub fn live_fences(&self) -> usize {
        self.state.borrow().fences.len()
    }

    pub fn live_swapchains(&self) -> usize {
        self.state.borrow().swapchains.len()
    }

    pub fn live_views(&self) -> usize {
        self.state.borrow().views.len()
    }

    pub fn live_framebuffers(&self) -> usize {
        self.state.borrow().framebuffers.len()
    }

    pub fn live_command_buffers(&self) -> usize {
        self.state.borrow().command_buffers.len()
    }

    pub fn live_command_pools(&self) -> usize {
        self.state.borrow().pools.len()
    }

    pub fn live_render_passes(&self) -> usize {
        self.state.borrow().render_passes.len()
    }

    pub fn live_depth_images(&self) -> usize {
        self.state.borrow().depth_images.len()
    }
}

impl GpuDevice for MockDevice {
    fn surface(&self) -> vk::SurfaceKHR {
        self.surface
    }

    fn wait_idle(&self) -> VkResult<()> {
        let mut s = self.state.borrow_mut();
        s.calls.push(Call::WaitIdle);
        s.take_failure(Op::WaitIdle)?;
        for state in s.fences.values_mut() {
            if *state == FenceState::Pending {
                *state = FenceState::Signaled;
            }
        }
        Ok(())
    }

    fn surface_capabilities(
        &self,
        _surface: vk::SurfaceKHR,
    ) -> VkResult<vk::SurfaceCapabilitiesKHR> {
        let mut s = self.state.borrow_mut();
        s.calls.push(Call::SurfaceCapabilities);
        s.take_failure(Op::SurfaceCapabilities)?;
        Ok(s.caps)
    }

    fn surface_formats(&self, _surface: vk::SurfaceKHR) -> VkResult<Vec<vk::SurfaceFormatKHR>> {
        Ok(self.state.borrow().formats.clone())
    }

    fn surface_present_modes(
        &self,
        _surface: vk::SurfaceKHR,
    ) -> VkResult<Vec<vk::PresentModeKHR>> {
        Ok(self.state.borrow().modes.clone())
    }

    fn create_swapchain(&self, desc: &SwapchainDesc) -> VkResult<vk::SwapchainKHR> {
        let mut s = self.state.borrow_mut();
        s.calls.push(Call::CreateSwapchain {
            old: desc.old_swapchain,
        });
        s.take_failure(Op::CreateSwapchain)?;
        let handle: vk::SwapchainKHR = s.handle();
        let images: Vec<vk::Image> = (0..s.image_count).map(|_| s.handle()).collect();
        s.swapchains.insert(handle, images);
        s.next_image = 0;
        Ok(handle)
    }

    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR) {
        let mut s = self.state.borrow_mut();
        s.calls.push(Call::DestroySwapchain(swapchain));
        s.swapchains.remove(&swapchain);
    }

    fn swapchain_images(&self, swapchain: vk::SwapchainKHR) -> VkResult<Vec<vk::Image>> {
        let mut s = self.state.borrow_mut();
        s.take_failure(Op::SwapchainImages)?;
        s.swapchains
            .get(&swapchain)
            .cloned()
            .ok_or(vk::Result::ERROR_UNKNOWN)
    }

    fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        _timeout: u64,
        semaphore: vk::Semaphore,
    ) -> VkResult<(u32, bool)> {
        let mut s = self.state.borrow_mut();
        s.calls.push(Call::Acquire { semaphore });
        if let Some(scripted) = s.acquire_script.pop_front() {
            return scripted;
        }
        let count = s
            .swapchains
            .get(&swapchain)
            .map(|imgs| imgs.len() as u32)
            .ok_or(vk::Result::ERROR_OUT_OF_DATE_KHR)?;
        let index = s.next_image % count;
        s.next_image = (index + 1) % count;
        Ok((index, false))
    }

    fn queue_present(
        &self,
        _swapchain: vk::SwapchainKHR,
        image_index: u32,
        wait_semaphore: vk::Semaphore,
    ) -> VkResult<bool> {
        let mut s = self.state.borrow_mut();
        s.calls.push(Call::Present {
            image: image_index,
            wait: wait_semaphore,
        });
        s.present_script.pop_front().unwrap_or(Ok(false))
    }

    fn queue_submit(&self, submit: &SubmitDesc) -> VkResult<()> {
        let mut s = self.state.borrow_mut();
        s.calls.push(Call::Submit {
            fence: submit.fence,
            wait: submit.wait_semaphore,
        });
        s.take_failure(Op::Submit)?;
        // Submitting against a fence that is not unsignaled is invalid usage.
        let Some(state) = s.fences.get_mut(&submit.fence) else {
            return Err(vk::Result::ERROR_UNKNOWN);
        };
        if *state != FenceState::Unsignaled {
            return Err(vk::Result::ERROR_UNKNOWN);
        }
        *state = FenceState::Pending;
        Ok(())
    }

    fn create_semaphore(&self) -> VkResult<vk::Semaphore> {
        let mut s = self.state.borrow_mut();
        let sem = s.handle();
        s.semaphores.insert(sem);
        Ok(sem)
    }

    fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        self.state.borrow_mut().semaphores.remove(&semaphore);
    }

    fn create_fence(&self, signaled: bool) -> VkResult<vk::Fence> {
        let mut s = self.state.borrow_mut();
        let fence = s.handle();
        let state = if signaled {
            FenceState::Signaled
        } else {
            FenceState::Unsignaled
        };
        s.fences.insert(fence, state);
        Ok(fence)
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        self.state.borrow_mut().fences.remove(&fence);
    }

    fn wait_for_fence(&self, fence: vk::Fence, _timeout: u64) -> VkResult<()> {
        let mut s = self.state.borrow_mut();
        s.calls.push(Call::WaitFence(fence));
        s.take_failure(Op::WaitFence)?;
        let Some(state) = s.fences.get_mut(&fence) else {
            return Err(vk::Result::ERROR_UNKNOWN);
        };
        // Nothing will ever signal it.
        if *state == FenceState::Unsignaled {
            return Err(vk::Result::TIMEOUT);
        }
        *state = FenceState::Signaled;
        Ok(())
    }

    fn reset_fence(&self, fence: vk::Fence) -> VkResult<()> {
        let mut s = self.state.borrow_mut();
        s.calls.push(Call::ResetFence(fence));
        match s.fences.get_mut(&fence) {
            Some(state) => {
                *state = FenceState::Unsignaled;
                Ok(())
            }
            None => Err(vk::Result::ERROR_UNKNOWN),
        }
    }

    fn create_command_pool(&self) -> VkResult<vk::CommandPool> {
        let mut s = self.state.borrow_mut();
        let pool = s.handle();
        s.pools.insert(pool);
        Ok(pool)
    }

    fn destroy_command_pool(&self, pool: vk::CommandPool) {
        self.state.borrow_mut().pools.remove(&pool);
    }

    fn allocate_command_buffers(
        &self,
        _pool: vk::CommandPool,
        count: u32,
    ) -> VkResult<Vec<vk::CommandBuffer>> {
        let mut s = self.state.borrow_mut();
        s.calls.push(Call::AllocateCommandBuffers(count));
        s.take_failure(Op::AllocateCommandBuffers)?;
        let buffers: Vec<vk::CommandBuffer> = (0..count).map(|_| s.handle()).collect();
        s.command_buffers.extend(buffers.iter().copied());
        Ok(buffers)
    }

    fn free_command_buffers(&self, _pool: vk::CommandPool, buffers: &[vk::CommandBuffer]) {
        let mut s = self.state.borrow_mut();
        for b in buffers {
            s.command_buffers.remove(b);
        }
    }

    fn create_color_view(&self, _image: vk::Image, _format: vk::Format) -> VkResult<vk::ImageView> {
        let mut s = self.state.borrow_mut();
        let view = s.handle();
        s.views.insert(view);
        Ok(view)
    }

    fn destroy_image_view(&self, view: vk::ImageView) {
        self.state.borrow_mut().views.remove(&view);
    }

    fn create_framebuffer(
        &self,
        _render_pass: vk::RenderPass,
        _attachments: &[vk::ImageView],
        _extent: vk::Extent2D,
    ) -> VkResult<vk::Framebuffer> {
        let mut s = self.state.borrow_mut();
        s.take_failure(Op::CreateFramebuffer)?;
        let fb = s.handle();
        s.framebuffers.insert(fb);
        Ok(fb)
    }

    fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer) {
        self.state.borrow_mut().framebuffers.remove(&framebuffer);
    }

    fn find_depth_format(&self) -> vk::Format {
        vk::Format::D32_SFLOAT
    }

    fn create_depth_image(&self, extent: vk::Extent2D, format: vk::Format) -> VkResult<DepthImage> {
        let mut s = self.state.borrow_mut();
        s.calls.push(Call::CreateDepthImage);
        s.take_failure(Op::CreateDepthImage)?;
        let depth = DepthImage {
            image: s.handle(),
            memory: s.handle(),
            view: s.handle(),
            format,
            extent,
        };
        s.depth_images.insert(depth.image);
        Ok(depth)
    }

    fn destroy_depth_image(&self, depth: &DepthImage) {
        let mut s = self.state.borrow_mut();
        s.calls.push(Call::DestroyDepthImage);
        s.depth_images.remove(&depth.image);
    }

    fn transition_depth_image(&self, _pool: vk::CommandPool, _depth: &DepthImage) -> VkResult<()> {
        self.state
            .borrow_mut()
            .calls
            .push(Call::TransitionDepthImage);
        Ok(())
    }

    fn create_basic_render_pass(
        &self,
        _color_format: vk::Format,
        _depth_format: Option<vk::Format>,
    ) -> VkResult<vk::RenderPass> {
        let mut s = self.state.borrow_mut();
        let rp = s.handle();
        s.render_passes.insert(rp);
        Ok(rp)
    }

    fn destroy_render_pass(&self, render_pass: vk::RenderPass) {
        self.state.borrow_mut().render_passes.remove(&render_pass);
    }
}

/// Render hook that owns one render pass and counts what it is asked to do.
#[derive(Default)]
pub struct RecordingHook {
    pub render_pass: vk::RenderPass,
    pub builds: Vec<BuildContext>,
    pub frees: usize,
    pub recorded: Vec<DrawContext>,
    pub fail_build: bool,
    pub fail_record: bool,
}

impl RenderHook<MockDevice> for RecordingHook {
    fn on_build_resources(&mut self, device: &MockDevice, ctx: &BuildContext) -> Result<vk::RenderPass> {
        self.builds.push(*ctx);
        if self.fail_build {
            return Err(anyhow!("hook refused to build"));
        }
        self.render_pass =
            device.create_basic_render_pass(ctx.image_format, ctx.depth.map(|d| d.format))?;
        Ok(self.render_pass)
    }

    fn on_free_resources(&mut self, device: &MockDevice) {
        self.frees += 1;
        if self.render_pass != vk::RenderPass::null() {
            device.destroy_render_pass(self.render_pass);
            self.render_pass = vk::RenderPass::null();
        }
    }

    fn record(&mut self, _device: &MockDevice, ctx: &DrawContext, ui: &mut SystemUi<'_>) -> Result<()> {
        if self.fail_record {
            return Err(anyhow!("recording failed"));
        }
        self.recorded.push(*ctx);
        ui.draw(ctx);
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HostEvent {
    CreateResources { image_count: u32 },
    DestroyResources,
    BeginFrame(usize),
    EndFrame,
    SystemUi,
    LinkSet,
    System(RenderSystemEvent),
}

/// Host that logs every callback into a shared list the test keeps a handle to.
#[derive(Clone, Default)]
pub struct RecordingHost {
    pub events: Rc<RefCell<Vec<HostEvent>>>,
    pub link: Rc<RefCell<Option<ScreenshotLink>>>,
    pub fail_create: Rc<Cell<bool>>,
}

impl RecordingHost {
    pub fn events(&self) -> Vec<HostEvent> {
        self.events.borrow().clone()
    }

    pub fn count(&self, event: HostEvent) -> usize {
        self.events.borrow().iter().filter(|e| **e == event).count()
    }
}

impl RenderHost for RecordingHost {
    fn begin_frame(&mut self, _command_buffer: vk::CommandBuffer, frame_index: usize) {
        self.events.borrow_mut().push(HostEvent::BeginFrame(frame_index));
    }

    fn end_frame(&mut self) {
        self.events.borrow_mut().push(HostEvent::EndFrame);
    }

    fn create_dependent_resources(&mut self, info: &HostResourceInfo) -> Result<()> {
        if self.fail_create.get() {
            return Err(anyhow!("host could not create its resources"));
        }
        self.events.borrow_mut().push(HostEvent::CreateResources {
            image_count: info.image_count,
        });
        Ok(())
    }

    fn destroy_dependent_resources(&mut self) {
        self.events.borrow_mut().push(HostEvent::DestroyResources);
    }

    fn on_render_system_event(&mut self, event: RenderSystemEvent) {
        self.events.borrow_mut().push(HostEvent::System(event));
    }

    fn set_swapchain_info_link(&mut self, link: ScreenshotLink) {
        *self.link.borrow_mut() = Some(link);
        self.events.borrow_mut().push(HostEvent::LinkSet);
    }

    fn draw_system_ui(&mut self, _ctx: &DrawContext) {
        self.events.borrow_mut().push(HostEvent::SystemUi);
    }
}
