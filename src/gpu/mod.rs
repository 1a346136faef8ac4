//! Graphics Core
//!
//! [`GraphicsContext`] owns the pipeline state, the command list, the
//! render targets and every texture, vertex buffer and shader. Setters only
//! record state; [`GraphicsContext::update_state`] turns whatever changed
//! into register writes right before a draw.

pub mod draw;
pub mod emitter;
pub mod resources;
pub mod shader;
pub mod state;
pub mod tiling;
pub mod types;

use std::time::Duration;

use tracing::{error, info};

use crate::command_buffer::CommandBuffer;
use crate::config::Config;
use crate::error::{ErrorChannel, GpuError};
use crate::platform::{DmaBlock, Placement, Platform};
use crate::protocol::{TOP_HEIGHT, TOP_WIDTH};

use self::resources::{Arena, Texture, TextureHandle, Vbo, BLOCK_ALIGN};
use self::shader::Shader;
use self::state::{PipelineState, TexEnv};
use self::types::*;

/// Smallest command list that can hold one frame of state.
const MIN_COMMAND_WORDS: usize = 0x100;

pub struct GraphicsContext<P: Platform> {
    platform: P,
    errors: ErrorChannel,
    state: PipelineState,
    cmd: CommandBuffer,
    cmd_block: DmaBlock,
    color_block: DmaBlock,
    depth_block: DmaBlock,
    textures: Arena<Texture>,
    vbos: Arena<Vbo>,
    shaders: Arena<Shader>,
    wait_timeout: Duration,
    clear_color: u32,
    clear_depth: u32,
    allow_3d: bool,
    screen_side: ScreenSide,
}

fn out_of_memory(what: &'static str, size: usize) -> GpuError {
    error!("Failed to allocate {} ({} bytes)", what, size);
    GpuError::OutOfMemory { what, size }
}

impl<P: Platform> GraphicsContext<P> {
    /// Allocate the command list and render targets and clear them. Nothing
    /// stays allocated on failure.
    pub fn init(mut platform: P, config: &Config) -> Result<Self, GpuError> {
        if config.command_buffer_words < MIN_COMMAND_WORDS {
            return Err(GpuError::InvalidConfig(format!(
                "command_buffer_words must be at least {}, got {}",
                MIN_COMMAND_WORDS, config.command_buffer_words
            )));
        }

        let cmd_size = config.command_buffer_words * 4;
        let target_size = (TOP_WIDTH * TOP_HEIGHT * 4) as usize;

        let Some(cmd_block) = platform.alloc(Placement::Linear, cmd_size, BLOCK_ALIGN) else {
            return Err(out_of_memory("command buffer", cmd_size));
        };
        let Some(color_block) = platform.alloc(Placement::Vram, target_size, BLOCK_ALIGN) else {
            platform.free(cmd_block);
            return Err(out_of_memory("color buffer", target_size));
        };
        let Some(depth_block) = platform.alloc(Placement::Vram, target_size, BLOCK_ALIGN) else {
            platform.free(color_block);
            platform.free(cmd_block);
            return Err(out_of_memory("depth buffer", target_size));
        };

        platform.reset_gpu(&cmd_block);

        let mut ctx = Self {
            platform,
            errors: ErrorChannel::new(),
            state: PipelineState::default(),
            cmd: CommandBuffer::new(config.command_buffer_words),
            cmd_block,
            color_block,
            depth_block,
            textures: Arena::new(),
            vbos: Arena::new(),
            shaders: Arena::new(),
            wait_timeout: Duration::from_millis(config.wait_timeout_ms),
            clear_color: 0,
            clear_depth: config.clear_depth,
            allow_3d: config.allow_3d,
            screen_side: ScreenSide::Left,
        };
        let [r, g, b, a] = config.clear_color;
        ctx.set_clear_color(r, g, b, a);

        info!(
            "GPU initialized: {} command words, color 0x{:08X}, depth 0x{:08X}",
            config.command_buffer_words,
            ctx.color_block.phys(),
            ctx.depth_block.phys()
        );

        ctx.clear();
        Ok(ctx)
    }

    /// Release every block and resource and hand the platform back.
    pub fn exit(self) -> P {
        let GraphicsContext {
            mut platform,
            cmd_block,
            color_block,
            depth_block,
            mut textures,
            mut vbos,
            mut shaders,
            ..
        } = self;

        for texture in textures.drain() {
            if let Some(block) = texture.block {
                platform.free(block);
            }
        }
        for vbo in vbos.drain() {
            for block in [vbo.data, vbo.indices].into_iter().flatten() {
                platform.free(block);
            }
        }
        shaders.drain();

        platform.free(depth_block);
        platform.free(color_block);
        platform.free(cmd_block);

        info!("GPU shut down");
        platform
    }

    pub fn errors(&self) -> &ErrorChannel {
        &self.errors
    }

    pub fn errors_mut(&mut self) -> &mut ErrorChannel {
        &mut self.errors
    }

    pub fn state(&self) -> &PipelineState {
        &self.state
    }

    pub fn command_buffer(&self) -> &CommandBuffer {
        &self.cmd
    }

    pub fn platform(&self) -> &P {
        &self.platform
    }

    pub fn platform_mut(&mut self) -> &mut P {
        &mut self.platform
    }

    pub fn viewport_width(&self) -> u32 {
        self.state.viewport.width
    }

    pub fn viewport_height(&self) -> u32 {
        self.state.viewport.height
    }

    // =========================================================================
    // Fixed-function state
    // =========================================================================

    pub fn set_viewport(&mut self, screen: Screen, x: u32, y: u32, width: u32, height: u32) {
        self.state.set_viewport(screen, x, y, width, height);
    }

    pub fn set_scissor_test(&mut self, mode: ScissorMode, x: i32, y: i32, width: u32, height: u32) {
        self.state.set_scissor_test(mode, x, y, width, height);
    }

    pub fn set_depth_map(&mut self, scale: f32, offset: f32) {
        self.state.set_depth_map(scale, offset);
    }

    pub fn set_cull_mode(&mut self, mode: CullMode) {
        self.state.set_cull_mode(mode);
    }

    pub fn set_stencil_test(&mut self, enable: bool, func: TestFunc, reference: u8, input_mask: u8, write_mask: u8) {
        self.state
            .set_stencil_test(enable, func, reference, input_mask, write_mask);
    }

    pub fn set_stencil_op(&mut self, fail: StencilOp, z_fail: StencilOp, z_pass: StencilOp) {
        self.state.set_stencil_op(fail, z_fail, z_pass);
    }

    pub fn set_blend_color(&mut self, red: u8, green: u8, blue: u8, alpha: u8) {
        self.state.set_blend_color(red, green, blue, alpha);
    }

    pub fn set_blend_func(
        &mut self,
        color_equation: BlendEquation,
        alpha_equation: BlendEquation,
        color_src: BlendFactor,
        color_dst: BlendFactor,
        alpha_src: BlendFactor,
        alpha_dst: BlendFactor,
    ) {
        self.state.set_blend_func(
            color_equation,
            alpha_equation,
            color_src,
            color_dst,
            alpha_src,
            alpha_dst,
        );
    }

    pub fn set_alpha_test(&mut self, enable: bool, func: TestFunc, reference: u8) {
        self.state.set_alpha_test(enable, func, reference);
    }

    pub fn set_depth_test(&mut self, enable: bool, func: TestFunc) {
        self.state.set_depth_test(enable, func);
    }

    pub fn set_color_mask(&mut self, red: bool, green: bool, blue: bool, alpha: bool) {
        self.state.set_color_mask(red, green, blue, alpha);
    }

    pub fn set_depth_mask(&mut self, depth: bool) {
        self.state.set_depth_mask(depth);
    }

    /// Configure one combiner stage. Stages past the last are ignored.
    pub fn set_tex_env(&mut self, stage: usize, env: TexEnv) {
        self.state.set_tex_env(stage, env);
    }

    pub fn bind_texture(&mut self, unit: TexUnit, texture: TextureHandle) {
        self.state.bind_texture(unit, texture);
    }

    // =========================================================================
    // Frame settings
    // =========================================================================

    pub fn set_clear_color(&mut self, red: u8, green: u8, blue: u8, alpha: u8) {
        self.clear_color =
            ((red as u32) << 24) | ((green as u32) << 16) | ((blue as u32) << 8) | alpha as u32;
    }

    pub fn set_clear_depth(&mut self, depth: u32) {
        self.clear_depth = depth;
    }

    pub fn set_allow_3d(&mut self, allow_3d: bool) {
        self.allow_3d = allow_3d;
    }

    pub fn set_screen_side(&mut self, side: ScreenSide) {
        self.screen_side = side;
    }
}

#[cfg(test)]
pub(crate) fn test_context() -> GraphicsContext<crate::headless::HeadlessPlatform> {
    let config = Config {
        command_buffer_words: 0x10000,
        ..Config::default()
    };
    GraphicsContext::init(crate::headless::HeadlessPlatform::default(), &config).expect("init")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headless::HeadlessPlatform;
    use crate::platform::GpuEvent;

    #[test]
    fn test_init_clears_render_targets() {
        let ctx = test_context();
        assert_eq!(ctx.platform().wait_count(GpuEvent::Psc0), 1);
        assert_eq!(ctx.platform().gpu_resets(), 1);
        assert_eq!((ctx.viewport_width(), ctx.viewport_height()), (400, 240));
        assert!(!ctx.errors().has_error());
    }

    #[test]
    fn test_init_releases_siblings_on_failure() {
        // Room for the command list and one render target only.
        let platform = HeadlessPlatform::new(1 << 20, TOP_WIDTH as usize * TOP_HEIGHT as usize * 4);
        let config = Config {
            command_buffer_words: 0x1000,
            ..Config::default()
        };
        let err = GraphicsContext::init(platform, &config).err();
        assert!(matches!(
            err,
            Some(GpuError::OutOfMemory {
                what: "depth buffer",
                ..
            })
        ));
    }

    #[test]
    fn test_init_rejects_tiny_command_buffer() {
        let config = Config {
            command_buffer_words: 4,
            ..Config::default()
        };
        let err = GraphicsContext::init(HeadlessPlatform::default(), &config).err();
        assert!(matches!(err, Some(GpuError::InvalidConfig(_))));
    }

    #[test]
    fn test_exit_releases_everything() {
        let mut ctx = test_context();
        let tex = ctx.create_texture();
        ctx.set_texture_info(tex, 32, 32, PixelFormat::Rgba8, 0, Placement::Vram);
        let vbo = ctx.create_vbo();
        ctx.set_vbo_attributes(vbo, vbo_attribute(0, 3, AttributeType::Float), 1);
        ctx.set_vbo_data(vbo, &[0u8; 36], 3, Primitive::Triangles);
        ctx.set_vbo_indices(vbo, &[0, 0, 1, 0, 2, 0]);
        ctx.create_shader();

        let platform = ctx.exit();
        assert_eq!(platform.live_bytes(Placement::Linear), 0);
        assert_eq!(platform.live_bytes(Placement::Vram), 0);
    }

    #[test]
    fn test_clear_color_packing() {
        let mut ctx = test_context();
        ctx.set_clear_color(0x12, 0x34, 0x56, 0x78);
        ctx.clear();
        let fill = ctx.platform().last_fill().expect("fill");
        assert_eq!(fill.first.value, 0x1234_5678);
    }
}
