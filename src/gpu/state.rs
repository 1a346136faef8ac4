//! Pipeline State Store
//!
//! The fixed-function state vector and its dirty tracking. Every setter
//! stores the new value and marks its group dirty without comparing
//! against the old value; the emitter decides what reaches the hardware.

use bitflags::bitflags;

use super::resources::TextureHandle;
use super::resources::ShaderHandle;
use super::types::*;

bitflags! {
    /// State groups that differ from what the hardware holds. Bit order is
    /// emission order.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct DirtyFlags: u32 {
        const VIEWPORT = 1 << 0;
        const SCISSOR = 1 << 1;
        const DEPTH_MAP = 1 << 2;
        const CULL = 1 << 3;
        const STENCIL = 1 << 4;
        const BLEND = 1 << 5;
        const ALPHA_TEST = 1 << 6;
        const DEPTH_TEST_AND_MASK = 1 << 7;
        const ACTIVE_SHADER = 1 << 8;
        const SHADER_UNIFORMS = 1 << 9;
        const SHADER_UNIFORM_BOOLS = 1 << 10;
        const TEX_ENV = 1 << 11;
        const TEXTURES = 1 << 12;
    }
}

/// Mask with one bit per combiner stage.
pub const ALL_TEX_ENVS: u8 = (1 << TEX_ENV_COUNT) - 1;
/// Mask with one bit per texture unit.
pub const ALL_TEX_UNITS: u8 = (1 << TEX_UNIT_COUNT) - 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Viewport {
    pub screen: Screen,
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Scissor {
    pub mode: ScissorMode,
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DepthMap {
    pub scale: f32,
    pub offset: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StencilState {
    pub enable: bool,
    pub func: TestFunc,
    pub reference: u8,
    pub input_mask: u8,
    pub write_mask: u8,
    pub fail: StencilOp,
    pub z_fail: StencilOp,
    pub z_pass: StencilOp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlendState {
    pub color: [u8; 4],
    pub color_equation: BlendEquation,
    pub alpha_equation: BlendEquation,
    pub color_src: BlendFactor,
    pub color_dst: BlendFactor,
    pub alpha_src: BlendFactor,
    pub alpha_dst: BlendFactor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlphaTest {
    pub enable: bool,
    pub func: TestFunc,
    pub reference: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DepthTest {
    pub enable: bool,
    pub func: TestFunc,
    pub write_mask: WriteMask,
}

/// One texture combiner stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TexEnv {
    pub rgb_sources: u16,
    pub alpha_sources: u16,
    pub rgb_operands: u16,
    pub alpha_operands: u16,
    pub rgb_combine: CombineFunc,
    pub alpha_combine: CombineFunc,
    pub constant_color: u32,
}

impl TexEnv {
    /// Stage 0 default: texture 0 modulated by the vertex colour.
    pub fn first_stage() -> Self {
        Self {
            rgb_sources: tex_env_sources(
                TexEnvSource::Texture0,
                TexEnvSource::PrimaryColor,
                TexEnvSource::PrimaryColor,
            ),
            alpha_sources: tex_env_sources(
                TexEnvSource::Texture0,
                TexEnvSource::PrimaryColor,
                TexEnvSource::PrimaryColor,
            ),
            rgb_operands: 0,
            alpha_operands: 0,
            rgb_combine: CombineFunc::Modulate,
            alpha_combine: CombineFunc::Modulate,
            constant_color: 0xFFFF_FFFF,
        }
    }

    /// Later stage default: pass the previous stage through.
    pub fn passthrough() -> Self {
        Self {
            rgb_sources: tex_env_sources(
                TexEnvSource::Previous,
                TexEnvSource::PrimaryColor,
                TexEnvSource::PrimaryColor,
            ),
            alpha_sources: tex_env_sources(
                TexEnvSource::Previous,
                TexEnvSource::PrimaryColor,
                TexEnvSource::PrimaryColor,
            ),
            rgb_operands: 0,
            alpha_operands: 0,
            rgb_combine: CombineFunc::Replace,
            alpha_combine: CombineFunc::Replace,
            constant_color: 0xFFFF_FFFF,
        }
    }
}

/// The full fixed-function state plus dirty masks.
#[derive(Debug, Clone)]
pub struct PipelineState {
    pub viewport: Viewport,
    pub scissor: Scissor,
    pub depth_map: DepthMap,
    pub cull_mode: CullMode,
    pub stencil: StencilState,
    pub blend: BlendState,
    pub alpha_test: AlphaTest,
    pub depth_test: DepthTest,
    pub active_shader: ShaderHandle,
    pub tex_envs: [TexEnv; TEX_ENV_COUNT],
    pub textures: [TextureHandle; TEX_UNIT_COUNT],
    /// Units that were last emitted with a texture attached.
    pub enabled_textures: u8,

    pub dirty: DirtyFlags,
    pub dirty_tex_envs: u8,
    pub dirty_textures: u8,
}

impl Default for PipelineState {
    fn default() -> Self {
        let (width, height) = Screen::Top.dimensions();
        let mut tex_envs = [TexEnv::passthrough(); TEX_ENV_COUNT];
        tex_envs[0] = TexEnv::first_stage();

        Self {
            viewport: Viewport {
                screen: Screen::Top,
                x: 0,
                y: 0,
                width,
                height,
            },
            scissor: Scissor {
                mode: ScissorMode::Disable,
                x: 0,
                y: 0,
                width,
                height,
            },
            depth_map: DepthMap {
                scale: 0.0,
                offset: 1.0,
            },
            cull_mode: CullMode::None,
            stencil: StencilState {
                enable: false,
                func: TestFunc::Always,
                reference: 0,
                input_mask: 0xFF,
                write_mask: 0,
                fail: StencilOp::Keep,
                z_fail: StencilOp::Keep,
                z_pass: StencilOp::Keep,
            },
            blend: BlendState {
                color: [0; 4],
                color_equation: BlendEquation::Add,
                alpha_equation: BlendEquation::Add,
                color_src: BlendFactor::SrcAlpha,
                color_dst: BlendFactor::OneMinusSrcAlpha,
                alpha_src: BlendFactor::SrcAlpha,
                alpha_dst: BlendFactor::OneMinusSrcAlpha,
            },
            alpha_test: AlphaTest {
                enable: false,
                func: TestFunc::Always,
                reference: 0,
            },
            depth_test: DepthTest {
                enable: false,
                func: TestFunc::Greater,
                write_mask: WriteMask::all(),
            },
            active_shader: ShaderHandle::NULL,
            tex_envs,
            textures: [TextureHandle::NULL; TEX_UNIT_COUNT],
            enabled_textures: 0,
            dirty: DirtyFlags::all(),
            dirty_tex_envs: ALL_TEX_ENVS,
            dirty_textures: ALL_TEX_UNITS,
        }
    }
}

impl PipelineState {
    /// Forget what the hardware holds: every group and every array element
    /// is re-emitted on the next flush.
    pub fn mark_all_dirty(&mut self) {
        self.dirty = DirtyFlags::all();
        self.dirty_tex_envs = ALL_TEX_ENVS;
        self.dirty_textures = ALL_TEX_UNITS;
    }

    pub fn is_clean(&self) -> bool {
        self.dirty.is_empty()
    }

    pub fn set_viewport(&mut self, screen: Screen, x: u32, y: u32, width: u32, height: u32) {
        self.viewport = Viewport {
            screen,
            x,
            y,
            width,
            height,
        };
        // The scissor rectangle is expressed against the viewport extents.
        self.dirty |= DirtyFlags::VIEWPORT | DirtyFlags::SCISSOR;
    }

    pub fn set_scissor_test(&mut self, mode: ScissorMode, x: i32, y: i32, width: u32, height: u32) {
        self.scissor = Scissor {
            mode,
            x,
            y,
            width,
            height,
        };
        self.dirty |= DirtyFlags::SCISSOR;
    }

    pub fn set_depth_map(&mut self, scale: f32, offset: f32) {
        self.depth_map = DepthMap { scale, offset };
        self.dirty |= DirtyFlags::DEPTH_MAP;
    }

    pub fn set_cull_mode(&mut self, mode: CullMode) {
        self.cull_mode = mode;
        self.dirty |= DirtyFlags::CULL;
    }

    pub fn set_stencil_test(
        &mut self,
        enable: bool,
        func: TestFunc,
        reference: u8,
        input_mask: u8,
        write_mask: u8,
    ) {
        self.stencil.enable = enable;
        self.stencil.func = func;
        self.stencil.reference = reference;
        self.stencil.input_mask = input_mask;
        self.stencil.write_mask = write_mask;
        self.dirty |= DirtyFlags::STENCIL;
    }

    pub fn set_stencil_op(&mut self, fail: StencilOp, z_fail: StencilOp, z_pass: StencilOp) {
        self.stencil.fail = fail;
        self.stencil.z_fail = z_fail;
        self.stencil.z_pass = z_pass;
        self.dirty |= DirtyFlags::STENCIL;
    }

    pub fn set_blend_color(&mut self, red: u8, green: u8, blue: u8, alpha: u8) {
        self.blend.color = [red, green, blue, alpha];
        self.dirty |= DirtyFlags::BLEND;
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
        self.blend.color_equation = color_equation;
        self.blend.alpha_equation = alpha_equation;
        self.blend.color_src = color_src;
        self.blend.color_dst = color_dst;
        self.blend.alpha_src = alpha_src;
        self.blend.alpha_dst = alpha_dst;
        self.dirty |= DirtyFlags::BLEND;
    }

    pub fn set_alpha_test(&mut self, enable: bool, func: TestFunc, reference: u8) {
        self.alpha_test = AlphaTest {
            enable,
            func,
            reference,
        };
        self.dirty |= DirtyFlags::ALPHA_TEST;
    }

    pub fn set_depth_test(&mut self, enable: bool, func: TestFunc) {
        self.depth_test.enable = enable;
        self.depth_test.func = func;
        self.dirty |= DirtyFlags::DEPTH_TEST_AND_MASK;
    }

    pub fn set_color_mask(&mut self, red: bool, green: bool, blue: bool, alpha: bool) {
        let mask = &mut self.depth_test.write_mask;
        mask.set(WriteMask::RED, red);
        mask.set(WriteMask::GREEN, green);
        mask.set(WriteMask::BLUE, blue);
        mask.set(WriteMask::ALPHA, alpha);
        self.dirty |= DirtyFlags::DEPTH_TEST_AND_MASK;
    }

    pub fn set_depth_mask(&mut self, depth: bool) {
        self.depth_test.write_mask.set(WriteMask::DEPTH, depth);
        self.dirty |= DirtyFlags::DEPTH_TEST_AND_MASK;
    }

    /// Bind a shader. Uniforms and booleans of the new program must follow.
    pub fn set_active_shader(&mut self, shader: ShaderHandle) {
        self.active_shader = shader;
        self.dirty |=
            DirtyFlags::ACTIVE_SHADER | DirtyFlags::SHADER_UNIFORMS | DirtyFlags::SHADER_UNIFORM_BOOLS;
    }

    /// Returns false for an out-of-range stage.
    pub fn set_tex_env(&mut self, stage: usize, env: TexEnv) -> bool {
        let Some(slot) = self.tex_envs.get_mut(stage) else {
            return false;
        };
        *slot = env;
        self.dirty |= DirtyFlags::TEX_ENV;
        self.dirty_tex_envs |= 1 << stage;
        true
    }

    /// Bind a texture to a unit. Rebinding the same handle is a no-op.
    pub fn bind_texture(&mut self, unit: TexUnit, texture: TextureHandle) {
        let index = unit.index();
        if self.textures[index] == texture {
            return;
        }
        self.textures[index] = texture;
        self.mark_texture_unit_dirty(index);
    }

    pub fn mark_texture_unit_dirty(&mut self, index: usize) {
        self.dirty |= DirtyFlags::TEXTURES;
        self.dirty_textures |= 1 << index;
    }

    /// Re-dirty every unit `texture` is bound to.
    pub fn mark_texture_dirty(&mut self, texture: TextureHandle) {
        if texture.is_null() {
            return;
        }
        for index in 0..TEX_UNIT_COUNT {
            if self.textures[index] == texture {
                self.mark_texture_unit_dirty(index);
            }
        }
    }
}
