//! PICA Command Protocol
//!
//! Register map of the fixed-function command processor and the encoding
//! of command-list headers. A command list is a flat stream of 32-bit
//! words: `[param0, header, param1 .. paramN-1, (pad)]`, each command
//! padded to an 8-byte boundary.

/// Value written to the finalize register to terminate a command list.
pub const FINALIZE_MAGIC: u32 = 0x1234_5678;

/// Maximum number of parameters carried by a single command header.
pub const MAX_PARAMS_PER_HEADER: usize = 256;

/// Default command list capacity, in words.
pub const DEFAULT_COMMAND_BUFFER_WORDS: usize = 0x80000;

// =============================================================================
// Screen geometry
// =============================================================================

pub const TOP_WIDTH: u32 = 400;
pub const TOP_HEIGHT: u32 = 240;
pub const BOTTOM_WIDTH: u32 = 320;
pub const BOTTOM_HEIGHT: u32 = 240;

// =============================================================================
// Register IDs
// =============================================================================

// Misc: 0x0000 - 0x003F
pub const REG_FINALIZE: u16 = 0x0010;

// Rasterizer: 0x0040 - 0x007F
pub const REG_FACECULLING_CONFIG: u16 = 0x0040;
pub const REG_VIEWPORT_WIDTH: u16 = 0x0041;
pub const REG_VIEWPORT_INVW: u16 = 0x0042;
pub const REG_VIEWPORT_HEIGHT: u16 = 0x0043;
pub const REG_VIEWPORT_INVH: u16 = 0x0044;
pub const REG_DEPTHMAP_SCALE: u16 = 0x004D;
pub const REG_DEPTHMAP_OFFSET: u16 = 0x004E;
pub const REG_SH_OUTMAP_TOTAL: u16 = 0x004F;
pub const REG_SH_OUTMAP_O0: u16 = 0x0050;
pub const REG_SCISSORTEST_MODE: u16 = 0x0065;
pub const REG_SCISSORTEST_POS: u16 = 0x0066;
pub const REG_SCISSORTEST_DIM: u16 = 0x0067;
pub const REG_VIEWPORT_XY: u16 = 0x0068;
pub const REG_DEPTHMAP_ENABLE: u16 = 0x006D;
pub const REG_RENDERBUF_DIM: u16 = 0x006E;

// Texturing: 0x0080 - 0x00FF
pub const REG_TEXUNIT_CONFIG: u16 = 0x0080;

/// Per-unit texture register block. Unit 0 has its address at a different
/// offset from units 1 and 2.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TexUnitRegs {
    pub border_color: u16,
    pub dim: u16,
    pub param: u16,
    pub addr: u16,
    pub format: u16,
}

pub const TEXUNIT_REGS: [TexUnitRegs; 3] = [
    TexUnitRegs {
        border_color: 0x0081,
        dim: 0x0082,
        param: 0x0083,
        addr: 0x0085,
        format: 0x008E,
    },
    TexUnitRegs {
        border_color: 0x0091,
        dim: 0x0092,
        param: 0x0093,
        addr: 0x0095,
        format: 0x0096,
    },
    TexUnitRegs {
        border_color: 0x0099,
        dim: 0x009A,
        param: 0x009B,
        addr: 0x009D,
        format: 0x009E,
    },
];

/// First register (SOURCE) of each texture combiner stage. Each stage
/// spans SOURCE, OPERAND, COMBINER, COLOR, SCALE.
pub const TEXENV_BASE: [u16; 6] = [0x00C0, 0x00C8, 0x00D0, 0x00D8, 0x00F0, 0x00F8];
pub const TEXENV_REG_COUNT: usize = 5;

// Framebuffer operations: 0x0100 - 0x013F
pub const REG_COLOR_OPERATION: u16 = 0x0100;
pub const REG_BLEND_FUNC: u16 = 0x0101;
pub const REG_BLEND_COLOR: u16 = 0x0103;
pub const REG_FRAGOP_ALPHA_TEST: u16 = 0x0104;
pub const REG_STENCIL_TEST: u16 = 0x0105;
pub const REG_STENCIL_OP: u16 = 0x0106;
pub const REG_DEPTH_COLOR_MASK: u16 = 0x0107;
pub const REG_FRAMEBUFFER_INVALIDATE: u16 = 0x0110;
pub const REG_FRAMEBUFFER_FLUSH: u16 = 0x0111;
pub const REG_COLORBUFFER_READ: u16 = 0x0112;
pub const REG_DEPTHBUFFER_FORMAT: u16 = 0x0116;
pub const REG_COLORBUFFER_FORMAT: u16 = 0x0117;
pub const REG_FRAMEBUFFER_BLOCK32: u16 = 0x011B;
pub const REG_DEPTHBUFFER_LOC: u16 = 0x011C;

// Geometry pipeline: 0x0200 - 0x027F
pub const REG_ATTRIBBUFFERS_LOC: u16 = 0x0200;
pub const REG_INDEXBUFFER_CONFIG: u16 = 0x0227;
pub const REG_NUMVERTICES: u16 = 0x0228;
pub const REG_GEOSTAGE_CONFIG: u16 = 0x0229;
pub const REG_VERTEX_OFFSET: u16 = 0x022A;
pub const REG_DRAWARRAYS: u16 = 0x022E;
pub const REG_DRAWELEMENTS: u16 = 0x022F;
pub const REG_VTX_FUNC: u16 = 0x0231;
pub const REG_VSH_NUM_ATTR: u16 = 0x0242;
pub const REG_VSH_COM_MODE: u16 = 0x0244;
pub const REG_START_DRAW_FUNC0: u16 = 0x0245;
pub const REG_GEOSTAGE_CONFIG2: u16 = 0x0253;
pub const REG_PRIMITIVE_CONFIG: u16 = 0x025E;
pub const REG_RESTART_PRIMITIVE: u16 = 0x025F;

/// Number of words written starting at `REG_ATTRIBBUFFERS_LOC`: location,
/// two format words and twelve 3-word buffer descriptors.
pub const ATTRIBBUFFERS_WORDS: usize = 0x27;

// Shader units: 0x0280 - 0x02DF

/// Shader unit register block. The geometry unit mirrors the vertex unit
/// 0x30 registers lower.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShaderUnitRegs {
    pub bool_uniform: u16,
    /// First of four integer uniform registers.
    pub int_uniform: u16,
    pub input_buffer_config: u16,
    pub entrypoint: u16,
    pub attributes_permutation_low: u16,
    pub outmap_mask: u16,
    pub codetransfer_end: u16,
    pub float_uniform_config: u16,
    pub float_uniform_data: u16,
    pub codetransfer_config: u16,
    pub codetransfer_data: u16,
    pub opdescs_config: u16,
    pub opdescs_data: u16,
}

pub const VSH_REGS: ShaderUnitRegs = ShaderUnitRegs {
    bool_uniform: 0x02B0,
    int_uniform: 0x02B1,
    input_buffer_config: 0x02B9,
    entrypoint: 0x02BA,
    attributes_permutation_low: 0x02BB,
    outmap_mask: 0x02BD,
    codetransfer_end: 0x02BF,
    float_uniform_config: 0x02C0,
    float_uniform_data: 0x02C1,
    codetransfer_config: 0x02CB,
    codetransfer_data: 0x02CC,
    opdescs_config: 0x02D5,
    opdescs_data: 0x02D6,
};

pub const GSH_REGS: ShaderUnitRegs = ShaderUnitRegs {
    bool_uniform: 0x0280,
    int_uniform: 0x0281,
    input_buffer_config: 0x0289,
    entrypoint: 0x028A,
    attributes_permutation_low: 0x028B,
    outmap_mask: 0x028D,
    codetransfer_end: 0x028F,
    float_uniform_config: 0x0290,
    float_uniform_data: 0x0291,
    codetransfer_config: 0x029B,
    codetransfer_data: 0x029C,
    opdescs_config: 0x02A5,
    opdescs_data: 0x02A6,
};

/// Float uniform config bit selecting 32-bit (rather than 24-bit) input.
pub const FLOAT_UNIFORM_32BIT: u32 = 1 << 31;

/// Upper half written alongside boolean uniform bits.
pub const BOOL_UNIFORM_UPPER: u32 = 0x7FFF_0000;

// =============================================================================
// Command header
// =============================================================================

/// Decoded command header word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandHeader {
    pub reg: u16,
    /// Byte-enable mask, one bit per byte lane of the parameter.
    pub mask: u8,
    /// Number of parameters (1..=256).
    pub count: usize,
    /// When set, parameter `i` targets `reg + i` instead of `reg`.
    pub incremental: bool,
}

impl CommandHeader {
    pub const fn encode(&self) -> u32 {
        (self.reg as u32)
            | (((self.mask & 0xF) as u32) << 16)
            | ((((self.count - 1) & 0xFF) as u32) << 20)
            | ((self.incremental as u32) << 31)
    }

    pub const fn decode(word: u32) -> Self {
        Self {
            reg: (word & 0xFFFF) as u16,
            mask: ((word >> 16) & 0xF) as u8,
            count: (((word >> 20) & 0xFF) as usize) + 1,
            incremental: (word >> 31) != 0,
        }
    }
}

// =============================================================================
// Float encodings
// =============================================================================

/// Convert to the rasterizer's 24-bit float (1.7.16).
pub fn f32_to_f24(value: f32) -> u32 {
    let bits = value.to_bits();
    if bits & 0x7FFF_FFFF == 0 {
        return (bits >> 31) << 23;
    }

    let sign = bits >> 31;
    let exponent = ((bits >> 23) & 0xFF) as i32 - 127 + 63;
    let mantissa = (bits >> 7) & 0xFFFF;

    if exponent <= 0 {
        sign << 23
    } else if exponent >= 0x7F {
        (sign << 23) | (0x7F << 16)
    } else {
        (sign << 23) | ((exponent as u32) << 16) | mantissa
    }
}

/// Convert to the rasterizer's 31-bit float (1.7.23), shifted left by one
/// as the viewport inverse registers expect.
pub fn f32_to_f31(value: f32) -> u32 {
    let bits = value.to_bits();
    if bits & 0x7FFF_FFFF == 0 {
        return ((bits >> 31) << 30) << 1;
    }

    let sign = bits >> 31;
    let exponent = ((bits >> 23) & 0xFF) as i32 - 127 + 63;
    let mantissa = bits & 0x7F_FFFF;

    let encoded = if exponent <= 0 {
        sign << 30
    } else if exponent >= 0x7F {
        (sign << 30) | (0x7F << 23)
    } else {
        (sign << 30) | ((exponent as u32) << 23) | mantissa
    };

    encoded << 1
}

/// Pack four bytes as `r | g << 8 | b << 16 | a << 24`.
pub const fn pack_rgba(r: u8, g: u8, b: u8, a: u8) -> u32 {
    (r as u32) | ((g as u32) << 8) | ((b as u32) << 16) | ((a as u32) << 24)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_layout() {
        let header = CommandHeader {
            reg: REG_VIEWPORT_WIDTH,
            mask: 0xF,
            count: 4,
            incremental: true,
        };
        assert_eq!(header.encode(), 0x8030_0000 | 0xF_0000 | 0x0041);
        assert_eq!(CommandHeader::decode(header.encode()), header);
    }

    #[test]
    fn test_header_max_params() {
        let header = CommandHeader {
            reg: VSH_REGS.codetransfer_data,
            mask: 0xF,
            count: MAX_PARAMS_PER_HEADER,
            incremental: false,
        };
        assert_eq!(CommandHeader::decode(header.encode()).count, 256);
    }

    #[test]
    fn test_f24_known_values() {
        assert_eq!(f32_to_f24(0.0), 0);
        // 1.0: exponent 63, zero mantissa
        assert_eq!(f32_to_f24(1.0), 0x3F_0000);
        assert_eq!(f32_to_f24(-1.0), 0xBF_0000);
        // 200.0 = 1.5625 * 2^7
        assert_eq!(f32_to_f24(200.0), (70 << 16) | 0x9000);
    }

    #[test]
    fn test_f31_known_values() {
        assert_eq!(f32_to_f31(0.0), 0);
        assert_eq!(f32_to_f31(1.0), (63 << 23) << 1);
    }

    #[test]
    fn test_shader_unit_offset() {
        assert_eq!(VSH_REGS.bool_uniform - GSH_REGS.bool_uniform, 0x30);
        assert_eq!(VSH_REGS.opdescs_data - GSH_REGS.opdescs_data, 0x30);
    }
}
