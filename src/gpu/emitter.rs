//! Command Emitter
//!
//! Translates dirty pipeline state into register writes and drives the
//! frame bracket: submit, transfer to screen, clear and swap.

use std::mem;

use tracing::{debug, trace, warn};

use super::resources::StaleHandle;
use super::state::DirtyFlags;
use super::tiling;
use super::types::{PixelFormat, Screen, ScreenSide, TexUnit, TEX_ENV_COUNT};
use super::GraphicsContext;
use crate::error::{ErrorSource, RESULT_COMMAND_OVERFLOW, RESULT_INVALID_HANDLE};
use crate::platform::{
    DisplayTransfer, FillRange, FramebufferFormat, GpuEvent, MemoryFill, Platform, TransferFlags,
    WaitOutcome,
};
use crate::protocol::*;

/// Hardware scissor rectangle, in the rotated bottom-left-origin frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HwScissor {
    pub left: u32,
    pub bottom: u32,
    pub right: u32,
    pub top: u32,
}

/// Convert an application rectangle on a `width` x `height` screen into
/// hardware coordinates. Every edge is clamped to the screen first.
pub fn scissor_registers(x: i32, y: i32, w: u32, h: u32, width: u32, height: u32) -> HwScissor {
    let clamp = |v: i64, max: u32| v.clamp(0, max as i64) as u32;

    let left = clamp(x as i64, width);
    let right = clamp(x as i64 + w as i64, width);
    let top = clamp(y as i64, height);
    let bottom = clamp(y as i64 + h as i64, height);

    HwScissor {
        left: height - bottom,
        bottom: width - right,
        right: height - top,
        top: width - left,
    }
}

/// Linear copy of a physical framebuffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DumpedScreen {
    pub pixels: Vec<u8>,
    pub format: FramebufferFormat,
    /// Short edge; the panel is mounted rotated.
    pub width: u32,
    pub height: u32,
}

impl<P: Platform> GraphicsContext<P> {
    /// Emit every dirty group in dependency order and mark the state clean.
    pub fn update_state(&mut self) {
        let dirty = mem::replace(&mut self.state.dirty, DirtyFlags::empty());
        if dirty.is_empty() {
            return;
        }
        debug!("Emitting dirty state: {:?}", dirty);

        if dirty.contains(DirtyFlags::VIEWPORT) {
            self.emit_viewport();
        }
        if dirty.contains(DirtyFlags::SCISSOR) {
            self.emit_scissor();
        }
        if dirty.contains(DirtyFlags::DEPTH_MAP) {
            self.emit_depth_map();
        }
        if dirty.contains(DirtyFlags::CULL) {
            self.cmd
                .write(REG_FACECULLING_CONFIG, self.state.cull_mode as u32 & 0x3);
        }
        if dirty.contains(DirtyFlags::STENCIL) {
            self.emit_stencil();
        }
        if dirty.contains(DirtyFlags::BLEND) {
            self.emit_blend();
        }
        if dirty.contains(DirtyFlags::ALPHA_TEST) {
            let alpha = self.state.alpha_test;
            self.cmd.write(
                REG_FRAGOP_ALPHA_TEST,
                alpha.enable as u32 | ((alpha.func as u32) << 4) | ((alpha.reference as u32) << 8),
            );
        }
        if dirty.contains(DirtyFlags::DEPTH_TEST_AND_MASK) {
            let depth = self.state.depth_test;
            self.cmd.write(
                REG_DEPTH_COLOR_MASK,
                depth.enable as u32 | ((depth.func as u32) << 4) | (depth.write_mask.bits() << 8),
            );
        }
        if dirty.intersects(
            DirtyFlags::ACTIVE_SHADER | DirtyFlags::SHADER_UNIFORMS | DirtyFlags::SHADER_UNIFORM_BOOLS,
        ) {
            self.emit_shader(dirty);
        }
        if dirty.contains(DirtyFlags::TEX_ENV) {
            self.emit_tex_envs();
        }
        if dirty.contains(DirtyFlags::TEXTURES) {
            self.emit_textures();
        }
    }

    fn emit_viewport(&mut self) {
        let viewport = self.state.viewport;
        // Render targets are stored rotated: the hardware width is the
        // application height.
        let (w, h) = (viewport.height, viewport.width);
        let dim = 0x0100_0000 | ((h.saturating_sub(1) & 0xFFF) << 12) | (w & 0xFFF);

        self.cmd.write(REG_FRAMEBUFFER_INVALIDATE, 1);
        self.cmd.write(REG_FRAMEBUFFER_FLUSH, 1);

        self.cmd.write_incremental(
            REG_DEPTHBUFFER_LOC,
            &[self.depth_block.phys() >> 3, self.color_block.phys() >> 3, dim],
        );
        self.cmd.write(REG_RENDERBUF_DIM, dim);
        self.cmd.write(REG_DEPTHBUFFER_FORMAT, 3);
        self.cmd.write(REG_COLORBUFFER_FORMAT, 2);
        self.cmd.write(REG_FRAMEBUFFER_BLOCK32, 0);

        let (wf, hf) = (w as f32, h as f32);
        self.cmd.write_incremental(
            REG_VIEWPORT_WIDTH,
            &[f32_to_f24(wf / 2.0), f32_to_f31(2.0 / wf), f32_to_f24(hf / 2.0), f32_to_f31(2.0 / hf)],
        );
        self.cmd
            .write(REG_VIEWPORT_XY, (viewport.y << 16) | (viewport.x & 0xFFFF));
        self.cmd
            .write_incremental(REG_COLORBUFFER_READ, &[0, 0xF, 2, 2]);
    }

    fn emit_scissor(&mut self) {
        let scissor = self.state.scissor;
        let viewport = self.state.viewport;
        let hw = scissor_registers(
            scissor.x,
            scissor.y,
            scissor.width,
            scissor.height,
            viewport.width,
            viewport.height,
        );
        trace!("Scissor {:?} -> {:?}", scissor, hw);

        self.cmd.write(REG_SCISSORTEST_MODE, scissor.mode as u32);
        self.cmd
            .write(REG_SCISSORTEST_POS, (hw.bottom << 16) | hw.left);
        self.cmd.write(
            REG_SCISSORTEST_DIM,
            (hw.top.saturating_sub(1) << 16) | hw.right.saturating_sub(1),
        );
    }

    fn emit_depth_map(&mut self) {
        let depth_map = self.state.depth_map;
        self.cmd.write(REG_DEPTHMAP_ENABLE, 1);
        self.cmd.write_incremental(
            REG_DEPTHMAP_SCALE,
            &[f32_to_f24(depth_map.scale), f32_to_f24(depth_map.offset)],
        );
    }

    fn emit_stencil(&mut self) {
        let s = self.state.stencil;
        self.cmd.write(
            REG_STENCIL_TEST,
            s.enable as u32
                | ((s.func as u32) << 4)
                | ((s.write_mask as u32) << 8)
                | ((s.reference as u32) << 16)
                | ((s.input_mask as u32) << 24),
        );
        self.cmd.write(
            REG_STENCIL_OP,
            s.fail as u32 | ((s.z_fail as u32) << 4) | ((s.z_pass as u32) << 8),
        );
    }

    fn emit_blend(&mut self) {
        let b = self.state.blend;
        let [r, g, bl, a] = b.color;
        self.cmd.write(REG_BLEND_COLOR, pack_rgba(r, g, bl, a));
        self.cmd.write(
            REG_BLEND_FUNC,
            b.color_equation as u32
                | ((b.alpha_equation as u32) << 8)
                | ((b.color_src as u32) << 16)
                | ((b.color_dst as u32) << 20)
                | ((b.alpha_src as u32) << 24)
                | ((b.alpha_dst as u32) << 28),
        );
        self.cmd.write_masked(REG_COLOR_OPERATION, 0x2, 0x100);
    }

    fn emit_shader(&mut self, dirty: DirtyFlags) {
        let shader = match self.shaders.get(self.state.active_shader) {
            Ok(Some(shader)) if shader.is_loaded() => shader,
            Ok(_) => return,
            Err(StaleHandle) => {
                warn!("Active shader {:?} was freed", self.state.active_shader);
                self.errors
                    .raise(ErrorSource::InvalidHandle, RESULT_INVALID_HANDLE);
                return;
            }
        };

        if dirty.contains(DirtyFlags::ACTIVE_SHADER) {
            shader.emit_program(&mut self.cmd);
        }
        if dirty.contains(DirtyFlags::SHADER_UNIFORMS) {
            shader.emit_float_uniforms(&mut self.cmd);
        }
        if dirty.contains(DirtyFlags::SHADER_UNIFORM_BOOLS) {
            shader.emit_bool_uniforms(&mut self.cmd);
        }
    }

    fn emit_tex_envs(&mut self) {
        let dirty = mem::take(&mut self.state.dirty_tex_envs);
        for (stage, env) in self.state.tex_envs.iter().enumerate().take(TEX_ENV_COUNT) {
            if dirty & (1 << stage) == 0 {
                continue;
            }
            self.cmd.write_incremental(
                TEXENV_BASE[stage],
                &[
                    ((env.alpha_sources as u32) << 16) | env.rgb_sources as u32,
                    ((env.alpha_operands as u32) << 12) | env.rgb_operands as u32,
                    ((env.alpha_combine as u32) << 16) | env.rgb_combine as u32,
                    env.constant_color,
                    0,
                ],
            );
        }
    }

    fn emit_textures(&mut self) {
        let dirty = mem::take(&mut self.state.dirty_textures);
        let mut enabled = self.state.enabled_textures;

        for unit in TexUnit::ALL {
            let index = unit.index();
            if dirty & (1 << index) == 0 {
                continue;
            }

            let handle = self.state.textures[index];
            let texture = match self.textures.get(handle) {
                Ok(texture) => texture,
                Err(StaleHandle) => {
                    warn!("Texture {:?} bound to {:?} was freed", handle, unit);
                    self.errors
                        .raise(ErrorSource::InvalidHandle, RESULT_INVALID_HANDLE);
                    None
                }
            };

            match texture.and_then(|t| t.phys().map(|phys| (t, phys))) {
                Some((t, phys)) => {
                    let regs = &TEXUNIT_REGS[index];
                    self.cmd.write(regs.format, t.format() as u32);
                    self.cmd.write(regs.addr, phys >> 3);
                    self.cmd.write(regs.dim, (t.width() << 16) | t.height());
                    self.cmd.write(regs.param, t.params());
                    self.cmd.write(regs.border_color, t.border_color);
                    enabled |= 1 << index;
                }
                None => enabled &= !(1 << index),
            }
        }

        self.state.enabled_textures = enabled;
        self.cmd
            .write(REG_TEXUNIT_CONFIG, 0x0001_1000 | enabled as u32);
    }

    // =========================================================================
    // Frame bracket
    // =========================================================================

    /// Submit the command list and block until the 3D engine is done.
    pub fn flush_commands(&mut self) {
        self.cmd.write(REG_FRAMEBUFFER_FLUSH, 1);
        self.cmd.write(REG_FRAMEBUFFER_INVALIDATE, 1);
        self.cmd.finalize();

        if self.cmd.overflowed() {
            warn!(
                "Command buffer overflowed its {} words; writes were dropped",
                self.cmd.capacity()
            );
            self.errors
                .raise(ErrorSource::CommandBufferOverflow, RESULT_COMMAND_OVERFLOW);
        }

        let words = self.cmd.len();
        let bytes = self.platform.bytes_mut(&self.cmd_block);
        for (chunk, word) in bytes.chunks_exact_mut(4).zip(self.cmd.words()) {
            chunk.copy_from_slice(&word.to_le_bytes());
        }

        self.platform.flush_data_cache(&self.cmd_block);
        self.platform.submit(&self.cmd_block, words);
        trace!("Submitted {} command words", words);
        self.safe_wait(GpuEvent::P3d);

        self.cmd.reset();
    }

    /// Copy the render target to the current framebuffer of the viewport's
    /// screen. Without stereo, the top screen's right eye gets the same
    /// image.
    pub fn flush_buffer(&mut self) {
        let screen = self.state.viewport.screen;
        let side = if self.allow_3d && screen == Screen::Top && self.screen_side == ScreenSide::Right {
            ScreenSide::Right
        } else {
            ScreenSide::Left
        };

        self.transfer_to_screen(screen, side);
        if screen == Screen::Top && !self.allow_3d {
            self.transfer_to_screen(screen, ScreenSide::Right);
        }
    }

    fn transfer_to_screen(&mut self, screen: Screen, side: ScreenSide) {
        let fb = self.platform.framebuffer(screen, side);
        let viewport = self.state.viewport;

        self.platform.display_transfer(DisplayTransfer {
            src: self.color_block.phys(),
            src_width: viewport.height,
            src_height: viewport.width,
            dst: fb.phys,
            dst_width: fb.width,
            dst_height: fb.height,
            in_format: PixelFormat::Rgba8,
            out_format: fb.format.pixel_format(),
            flags: TransferFlags::empty(),
        });
        self.safe_wait(GpuEvent::Ppf);
    }

    /// Fill the colour and depth buffers with the clear values.
    pub fn clear(&mut self) {
        let words = self.state.viewport.width as usize * self.state.viewport.height as usize;
        self.platform.memory_fill(MemoryFill {
            first: FillRange {
                start: self.color_block.phys(),
                words,
                value: self.clear_color,
            },
            second: Some(FillRange {
                start: self.depth_block.phys(),
                words,
                value: self.clear_depth,
            }),
        });
        self.safe_wait(GpuEvent::Psc0);
    }

    pub fn swap_buffers(&mut self, vblank: bool) {
        self.platform.swap_buffers();
        if vblank {
            self.safe_wait(GpuEvent::VBlank);
        }
    }

    /// Wait with the configured timeout. A missed signal is cleared so the
    /// next wait starts fresh.
    pub(crate) fn safe_wait(&mut self, event: GpuEvent) {
        if self.platform.wait(event, self.wait_timeout) == WaitOutcome::TimedOut {
            warn!("Timed out after {:?} waiting for {:?}", self.wait_timeout, event);
            self.platform.clear_event(event);
        }
    }

    /// Resume after the hardware lost its registers: everything is
    /// re-emitted on the next update.
    pub fn restore(&mut self) {
        debug!("Restoring GPU state");
        self.state.mark_all_dirty();
        self.cmd.reset();
        self.platform.reset_gpu(&self.cmd_block);
    }

    /// Read back a framebuffer in linear order.
    pub fn dump_screen(&self, screen: Screen, side: ScreenSide) -> DumpedScreen {
        let fb = self.platform.framebuffer(screen, side);
        let bpp = (fb.format.pixel_format().bits_per_pixel() / 8) as usize;
        let tiled = self.platform.framebuffer_bytes(screen, side);

        let mut pixels = vec![0u8; fb.width as usize * fb.height as usize * bpp];
        tiling::deswizzle(tiled, &mut pixels, fb.width, fb.height, bpp);

        DumpedScreen {
            pixels,
            format: fb.format,
            width: fb.width,
            height: fb.height,
        }
    }
}
