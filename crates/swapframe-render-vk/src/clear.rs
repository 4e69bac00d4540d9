// SPDX-License-Identifier: CEPL-1.0
use anyhow::Result;
use ash::vk;

use crate::context::AshDevice;
use crate::device::GpuDevice;
use crate::hooks::{BuildContext, DrawContext, RenderHook, SystemUi};

/// Minimal render hook: one render pass that clears the colour (and depth)
/// attachment, then lets the host draw its overlay.
pub struct ClearPass {
    render_pass: vk::RenderPass,
    has_depth: bool,
    clear: [f32; 4],
}

impl ClearPass {
    pub fn new(clear: [f32; 4]) -> Self {
        Self {
            render_pass: vk::RenderPass::null(),
            has_depth: false,
            clear,
        }
    }

    pub fn set_clear_color(&mut self, rgba: [f32; 4]) {
        self.clear = rgba;
    }

    pub fn clear_color(&self) -> [f32; 4] {
        self.clear
    }

    fn clear_values(&self) -> Vec<vk::ClearValue> {
        let mut clears = vec![vk::ClearValue {
            color: vk::ClearColorValue {
                float32: self.clear,
            },
        }];
        if self.has_depth {
            clears.push(vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue {
                    depth: 1.0,
                    stencil: 0,
                },
            });
        }
        clears
    }
}

impl RenderHook<AshDevice> for ClearPass {
    fn on_build_resources(&mut self, device: &AshDevice, ctx: &BuildContext) -> Result<vk::RenderPass> {
        let depth_format = ctx.depth.map(|d| d.format);
        self.render_pass = device.create_basic_render_pass(ctx.image_format, depth_format)?;
        self.has_depth = depth_format.is_some();
        Ok(self.render_pass)
    }

    fn on_free_resources(&mut self, device: &AshDevice) {
        if self.render_pass != vk::RenderPass::null() {
            device.destroy_render_pass(self.render_pass);
            self.render_pass = vk::RenderPass::null();
        }
        self.has_depth = false;
    }

    fn record(&mut self, device: &AshDevice, ctx: &DrawContext, ui: &mut SystemUi<'_>) -> Result<()> {
        let d = device.raw();
        let cmd = ctx.command_buffer;
        unsafe {
            d.reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())?;
            let begin = vk::CommandBufferBeginInfo {
                s_type: vk::StructureType::COMMAND_BUFFER_BEGIN_INFO,
                flags: vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT,
                ..Default::default()
            };
            d.begin_command_buffer(cmd, &begin)?;

            let clears = self.clear_values();
            let rp_begin = vk::RenderPassBeginInfo {
                s_type: vk::StructureType::RENDER_PASS_BEGIN_INFO,
                render_pass: ctx.render_pass,
                framebuffer: ctx.framebuffer,
                render_area: vk::Rect2D {
                    offset: vk::Offset2D { x: 0, y: 0 },
                    extent: ctx.extent,
                },
                clear_value_count: clears.len() as u32,
                p_clear_values: clears.as_ptr(),
                ..Default::default()
            };
            d.cmd_begin_render_pass(cmd, &rp_begin, vk::SubpassContents::INLINE);
            ui.draw(ctx);
            d.cmd_end_render_pass(cmd);

            d.end_command_buffer(cmd)?;
        }
        Ok(())
    }
}
