// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
use anyhow::Result;
use clap::{Parser, ValueEnum};
use swapframe_core::init_tracing;
use swapframe_render::{AppDrawResult, RenderSize, Renderer};
use swapframe_render_vk::ash::vk;
use swapframe_render_vk::{
    present_mode_for, DepthBufferMode, PipelineConfig, ResizeStrategy, VkRenderer, VkVsyncMode,
};
use tracing::{error, info, warn};

use swapframe_platform::winit::{
    application::ApplicationHandler,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    raw_window_handle::{HasDisplayHandle, HasWindowHandle},
    window::{Window, WindowId},
};

use serde::Deserialize;
use std::fs;

const CONFIG_PATH: &str = "swapframe.toml";

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Frames in flight (0 = default, capped at the default)
    #[arg(long)]
    frames_in_flight: Option<u32>,
    /// Force a present mode, overriding vsync settings
    #[arg(long, value_enum)]
    present_mode: Option<PresentModeArg>,
    /// Attach a depth buffer to every framebuffer
    #[arg(long)]
    depth: bool,
    /// Request transfer-source swapchain images for screenshots
    #[arg(long)]
    screenshots: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum PresentModeArg {
    Fifo,
    Mailbox,
    Immediate,
}

impl PresentModeArg {
    fn to_vk(self) -> vk::PresentModeKHR {
        match self {
            PresentModeArg::Fifo => vk::PresentModeKHR::FIFO,
            PresentModeArg::Mailbox => vk::PresentModeKHR::MAILBOX,
            PresentModeArg::Immediate => vk::PresentModeKHR::IMMEDIATE,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy)]
struct RenderCfg {
    #[serde(default = "default_clear")]
    clear_color: [f32; 4],
    #[serde(default = "default_vsync")]
    vsync: bool,
    #[serde(default)]
    vsync_mode: VsyncMode,
    #[serde(default)]
    unfocused: UnfocusedPolicy,
    #[serde(default)]
    unfocused_fps: u32,
    #[serde(default)]
    fps_when_vsync_off: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Deserialize, Default)]
#[serde(rename_all = "snake_case")]
enum VsyncMode {
    Fifo,
    #[default]
    Mailbox,
}

impl VsyncMode {
    fn to_vk(self) -> VkVsyncMode {
        match self {
            VsyncMode::Fifo => VkVsyncMode::Fifo,
            VsyncMode::Mailbox => VkVsyncMode::Mailbox,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Deserialize, Default)]
#[serde(rename_all = "snake_case")]
enum UnfocusedPolicy {
    None,
    #[default]
    VsyncOn,
    Throttle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Deserialize, Default)]
#[serde(rename_all = "snake_case")]
enum ResizeCfg {
    Ignore,
    #[default]
    Rebuild,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
enum SurfaceFormatCfg {
    Bgra8Unorm,
    Rgba8Unorm,
    Bgra8Srgb,
    Rgba8Srgb,
}

impl SurfaceFormatCfg {
    fn to_vk(self) -> vk::SurfaceFormatKHR {
        let format = match self {
            SurfaceFormatCfg::Bgra8Unorm => vk::Format::B8G8R8A8_UNORM,
            SurfaceFormatCfg::Rgba8Unorm => vk::Format::R8G8B8A8_UNORM,
            SurfaceFormatCfg::Bgra8Srgb => vk::Format::B8G8R8A8_SRGB,
            SurfaceFormatCfg::Rgba8Srgb => vk::Format::R8G8B8A8_SRGB,
        };
        vk::SurfaceFormatKHR {
            format,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
struct PipelineCfg {
    /// 0 = default
    #[serde(default)]
    max_frames_in_flight: u32,
    #[serde(default)]
    depth: bool,
    #[serde(default)]
    screenshots: bool,
    #[serde(default)]
    resize: ResizeCfg,
    #[serde(default)]
    preferred_formats: Vec<SurfaceFormatCfg>,
}

#[derive(Debug, Deserialize, Default)]
struct AppCfg {
    #[serde(default)]
    render: RenderCfg,
    #[serde(default)]
    pipeline: PipelineCfg,
}

impl Default for RenderCfg {
    fn default() -> Self {
        RenderCfg {
            clear_color: default_clear(),
            vsync: true,
            vsync_mode: VsyncMode::Mailbox,
            unfocused: UnfocusedPolicy::Throttle,
            unfocused_fps: 30,
            fps_when_vsync_off: 0,
        }
    }
}

fn default_clear() -> [f32; 4] {
    [0.02, 0.02, 0.04, 1.0]
}
fn default_vsync() -> bool {
    true
}
fn load_cfg() -> AppCfg {
    match fs::read_to_string(CONFIG_PATH) {
        Ok(s) => toml::from_str::<AppCfg>(&s).unwrap_or_else(|e| {
            warn!("{CONFIG_PATH}: {e}; using defaults");
            AppCfg::default()
        }),
        Err(_) => AppCfg::default(),
    }
}

/// File settings first, command line on top.
fn pipeline_config(cfg: &AppCfg, args: &Args) -> PipelineConfig {
    let p = &cfg.pipeline;
    PipelineConfig {
        max_frames_in_flight: args.frames_in_flight.unwrap_or(p.max_frames_in_flight),
        depth_buffer: if args.depth || p.depth {
            DepthBufferMode::Enabled
        } else {
            DepthBufferMode::Disabled
        },
        screenshots: args.screenshots || p.screenshots,
        present_mode: present_mode_for(true, cfg.render.vsync_mode.to_vk()),
        present_mode_override: args.present_mode.map(PresentModeArg::to_vk),
        preferred_surface_formats: p.preferred_formats.iter().map(|f| f.to_vk()).collect(),
        resize_strategy: match p.resize {
            ResizeCfg::Ignore => ResizeStrategy::Ignore,
            ResizeCfg::Rebuild => ResizeStrategy::Rebuild,
        },
        ..Default::default()
    }
}

struct App {
    pipeline_cfg: PipelineConfig,
    window: Option<Window>,
    renderer: Option<Box<VkRenderer>>,
    render_size: RenderSize,

    cfg: AppCfg,
    exiting: bool,
    frames: u32,
    last_fps_instant: std::time::Instant,

    paused: bool,
    focused: bool,
    next_frame_deadline: Option<std::time::Instant>,
}

impl App {
    fn shut_down(&mut self, event_loop: &ActiveEventLoop) {
        self.exiting = true;
        self.renderer = None;
        self.window = None;
        event_loop.exit();
    }

    fn request_redraw(&self) {
        if let Some(w) = &self.window {
            w.request_redraw();
        }
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_none() {
            let window = match event_loop
                .create_window(Window::default_attributes().with_title("swapframe"))
            {
                Ok(w) => w,
                Err(e) => {
                    error!("create_window failed: {e}");
                    event_loop.exit();
                    return;
                }
            };

            let size = window.inner_size();

            self.render_size = RenderSize {
                width: size.width.max(1),
                height: size.height.max(1),
            };

            let renderer = match (window.window_handle(), window.display_handle()) {
                (Ok(wh), Ok(dh)) => {
                    VkRenderer::with_config(&wh, &dh, self.render_size, self.pipeline_cfg.clone())
                }
                (Err(e), _) | (_, Err(e)) => Err(e.into()),
            };
            let mut renderer = match renderer {
                Ok(r) => Box::new(r),
                Err(e) => {
                    error!("vk init failed: {e:#}");
                    event_loop.exit();
                    return;
                }
            };

            renderer.set_clear_color(self.cfg.render.clear_color);
            renderer.set_vsync(self.cfg.render.vsync);
            renderer.set_vsync_mode(self.cfg.render.vsync_mode.to_vk());

            info!("vsync cfg = {}", self.cfg.render.vsync);

            self.window = Some(window);
            self.renderer = Some(renderer);
        }

        event_loop.set_control_flow(if self.cfg.render.vsync {
            ControlFlow::Wait
        } else {
            ControlFlow::Poll
        });

        self.paused = self.render_size.is_zero_area();
        info!("resumed → paused={}", self.paused);

        if !self.paused {
            self.request_redraw();
        }
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        window_id: WindowId,
        event: WindowEvent,
    ) {
        if let Some(window) = &self.window {
            if window_id != window.id() {
                return;
            }
        }

        match event {
            WindowEvent::CloseRequested => {
                info!("CloseRequested");
                self.shut_down(event_loop);
            }

            WindowEvent::Resized(new_size) => {
                self.render_size = RenderSize {
                    width: new_size.width,
                    height: new_size.height,
                };
                let now_paused = self.render_size.is_zero_area();
                if self.paused != now_paused {
                    self.paused = now_paused;
                }
                info!(
                    "Resized → {}x{} (paused={})",
                    self.render_size.width, self.render_size.height, self.paused
                );

                if !self.paused {
                    if let Some(r) = &mut self.renderer {
                        if let Err(e) = r.resize(self.render_size) {
                            warn!("resize failed: {e:#}");
                        }
                    }
                    self.request_redraw();
                }
            }

            WindowEvent::Occluded(occluded) => {
                let now_paused = occluded || self.render_size.is_zero_area();
                if self.paused != now_paused {
                    self.paused = now_paused;
                    info!("Occluded={} → paused={}", occluded, self.paused);
                }
            }

            WindowEvent::Focused(focused) => {
                if self.focused != focused {
                    self.focused = focused;
                    info!("Focused({})", focused);

                    if let Some(r) = &mut self.renderer {
                        match (focused, self.cfg.render.unfocused) {
                            (false, UnfocusedPolicy::VsyncOn) => {
                                r.set_vsync(true);
                                r.set_vsync_mode(VkVsyncMode::Fifo);
                            }
                            (true, UnfocusedPolicy::VsyncOn) => {
                                r.set_vsync(self.cfg.render.vsync);
                                r.set_vsync_mode(self.cfg.render.vsync_mode.to_vk());
                            }
                            _ => {}
                        }
                    }

                    if focused {
                        self.next_frame_deadline = None;
                    }
                }
            }

            WindowEvent::RedrawRequested => {
                if self.exiting || self.paused {
                    return;
                }

                let Some(r) = &mut self.renderer else {
                    return;
                };
                match r.render() {
                    Ok(AppDrawResult::Completed) => {
                        // count only frames that were actually presented
                        self.frames = self.frames.saturating_add(1);
                    }
                    // The pipeline recreates its swapchain on the next prepare.
                    Ok(AppDrawResult::Retry) => self.request_redraw(),
                    // Zero-area surface; wait for a resize.
                    Ok(AppDrawResult::NotReady) => {}
                    Ok(AppDrawResult::Failed) => {
                        error!("frame failed, shutting down");
                        self.shut_down(event_loop);
                    }
                    Err(e) => {
                        error!("render error: {e:#}");
                        self.shut_down(event_loop);
                    }
                }
            }

            _ => {}
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        if self.exiting {
            return;
        }

        // 1) Decide target FPS for this frame (0 means "no cap here")
        let mut target_fps: u32 = 0;

        if self.paused {
            event_loop.set_control_flow(ControlFlow::Wait);
            self.frames = 0;
            return;
        }

        if !self.focused {
            match self.cfg.render.unfocused {
                UnfocusedPolicy::Throttle => {
                    target_fps = self.cfg.render.unfocused_fps;
                }
                UnfocusedPolicy::VsyncOn | UnfocusedPolicy::None => {}
            }
        }

        if target_fps == 0 {
            if self.cfg.render.vsync {
                event_loop.set_control_flow(ControlFlow::Wait);
                self.request_redraw();
            } else {
                target_fps = self.cfg.render.fps_when_vsync_off;
                if target_fps == 0 {
                    event_loop.set_control_flow(ControlFlow::Poll);
                    self.request_redraw();
                }
            }
        }

        // 2) Throttled path (focused or unfocused)
        if target_fps > 0 {
            let now = std::time::Instant::now();
            let frame_dt =
                std::time::Duration::from_nanos(1_000_000_000u64 / target_fps.max(1) as u64);

            match self.next_frame_deadline {
                Some(t) if now < t => {
                    // Not time yet: sleep until the stored deadline.
                    event_loop.set_control_flow(ControlFlow::WaitUntil(t));
                }
                _ => {
                    let next = now + frame_dt;
                    self.next_frame_deadline = Some(next);
                    event_loop.set_control_flow(ControlFlow::WaitUntil(next));
                    self.request_redraw();
                }
            }
        }

        // 3) FPS counter
        let now = std::time::Instant::now();
        if now.duration_since(self.last_fps_instant).as_secs_f32() >= 1.0 {
            info!("fps ~ {}", self.frames);
            self.frames = 0;
            self.last_fps_instant = now;
        }
    }
}

fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();
    let cfg = load_cfg();
    let event_loop: EventLoop<()> = EventLoop::new()?;

    let mut app = App {
        pipeline_cfg: pipeline_config(&cfg, &args),
        window: None,
        renderer: None,
        render_size: RenderSize {
            width: 1,
            height: 1,
        },
        cfg,
        exiting: false,
        frames: 0,
        last_fps_instant: std::time::Instant::now(),
        paused: false,
        focused: true,
        next_frame_deadline: None,
    };

    event_loop.run_app(&mut app)?;
    Ok(())
}
