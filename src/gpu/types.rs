//! Fixed-function enumerations and their register encodings.

use bitflags::bitflags;

pub const TEX_ENV_COUNT: usize = 6;
pub const TEX_UNIT_COUNT: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Screen {
    #[default]
    Top,
    Bottom,
}

impl Screen {
    /// Width and height in application orientation.
    pub const fn dimensions(self) -> (u32, u32) {
        match self {
            Screen::Top => (crate::protocol::TOP_WIDTH, crate::protocol::TOP_HEIGHT),
            Screen::Bottom => (crate::protocol::BOTTOM_WIDTH, crate::protocol::BOTTOM_HEIGHT),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ScreenSide {
    #[default]
    Left,
    Right,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u32)]
pub enum CullMode {
    #[default]
    None = 0x0,
    FrontCcw = 0x1,
    BackCcw = 0x2,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum TestFunc {
    Never = 0x0,
    Always = 0x1,
    Equal = 0x2,
    NotEqual = 0x3,
    Less = 0x4,
    LessEqual = 0x5,
    Greater = 0x6,
    GreaterEqual = 0x7,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum StencilOp {
    Keep = 0x0,
    Zero = 0x1,
    Replace = 0x2,
    Incr = 0x3,
    Decr = 0x4,
    Invert = 0x5,
    IncrWrap = 0x6,
    DecrWrap = 0x7,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum BlendEquation {
    Add = 0x0,
    Subtract = 0x1,
    ReverseSubtract = 0x2,
    Min = 0x3,
    Max = 0x4,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum BlendFactor {
    Zero = 0x0,
    One = 0x1,
    SrcColor = 0x2,
    OneMinusSrcColor = 0x3,
    DstColor = 0x4,
    OneMinusDstColor = 0x5,
    SrcAlpha = 0x6,
    OneMinusSrcAlpha = 0x7,
    DstAlpha = 0x8,
    OneMinusDstAlpha = 0x9,
    ConstantColor = 0xA,
    OneMinusConstantColor = 0xB,
    ConstantAlpha = 0xC,
    OneMinusConstantAlpha = 0xD,
    SrcAlphaSaturate = 0xE,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    Vertex,
    Geometry,
}

impl ShaderStage {
    pub const fn index(self) -> usize {
        match self {
            ShaderStage::Vertex => 0,
            ShaderStage::Geometry => 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u32)]
pub enum Primitive {
    #[default]
    Triangles = 0x0000,
    TriangleStrip = 0x0100,
    TriangleFan = 0x0200,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum AttributeType {
    Byte = 0x0,
    UnsignedByte = 0x1,
    Short = 0x2,
    Float = 0x3,
}

impl AttributeType {
    pub const fn from_bits(bits: u32) -> Self {
        match bits & 3 {
            0 => AttributeType::Byte,
            1 => AttributeType::UnsignedByte,
            2 => AttributeType::Short,
            _ => AttributeType::Float,
        }
    }

    pub const fn size_bytes(self) -> u32 {
        match self {
            AttributeType::Byte | AttributeType::UnsignedByte => 1,
            AttributeType::Short => 2,
            AttributeType::Float => 4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum TexEnvSource {
    PrimaryColor = 0x0,
    Texture0 = 0x3,
    Texture1 = 0x4,
    Texture2 = 0x5,
    Texture3 = 0x6,
    Constant = 0xE,
    Previous = 0xF,
}

/// Colour operands. Values 0x4..=0xF select individual source channels.
pub mod rgb_operand {
    pub const SRC_COLOR: u32 = 0x00;
    pub const ONE_MINUS_SRC_COLOR: u32 = 0x01;
    pub const SRC_ALPHA: u32 = 0x02;
    pub const ONE_MINUS_SRC_ALPHA: u32 = 0x03;
    pub const SRC0_RGB: u32 = 0x04;
    pub const SRC1_RGB: u32 = 0x08;
    pub const SRC2_RGB: u32 = 0x0C;
}

pub mod alpha_operand {
    pub const SRC_ALPHA: u32 = 0x00;
    pub const ONE_MINUS_SRC_ALPHA: u32 = 0x01;
    pub const SRC0_RGB: u32 = 0x02;
    pub const SRC1_RGB: u32 = 0x04;
    pub const SRC2_RGB: u32 = 0x06;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum CombineFunc {
    Replace = 0x0,
    Modulate = 0x1,
    Add = 0x2,
    AddSigned = 0x3,
    Interpolate = 0x4,
    Subtract = 0x5,
    Dot3Rgb = 0x6,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TexUnit {
    Unit0,
    Unit1,
    Unit2,
}

impl TexUnit {
    pub const ALL: [TexUnit; TEX_UNIT_COUNT] = [TexUnit::Unit0, TexUnit::Unit1, TexUnit::Unit2];

    pub const fn index(self) -> usize {
        match self {
            TexUnit::Unit0 => 0,
            TexUnit::Unit1 => 1,
            TexUnit::Unit2 => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum TextureFilter {
    Nearest = 0x0,
    Linear = 0x1,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum TextureWrap {
    ClampToEdge = 0x0,
    ClampToBorder = 0x1,
    Repeat = 0x2,
    MirroredRepeat = 0x3,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u32)]
pub enum PixelFormat {
    #[default]
    Rgba8 = 0x0,
    Rgb8 = 0x1,
    Rgba5551 = 0x2,
    Rgb565 = 0x3,
    Rgba4 = 0x4,
    La8 = 0x5,
    Hilo8 = 0x6,
    L8 = 0x7,
    A8 = 0x8,
    La4 = 0x9,
    L4 = 0xA,
    A4 = 0xB,
    Etc1 = 0xC,
    Etc1A4 = 0xD,
}

impl PixelFormat {
    pub const fn bits_per_pixel(self) -> u32 {
        match self {
            PixelFormat::Rgba8 => 32,
            PixelFormat::Rgb8 => 24,
            PixelFormat::Rgba5551
            | PixelFormat::Rgb565
            | PixelFormat::Rgba4
            | PixelFormat::La8
            | PixelFormat::Hilo8 => 16,
            PixelFormat::L8 | PixelFormat::A8 | PixelFormat::La4 | PixelFormat::Etc1A4 => 8,
            PixelFormat::L4 | PixelFormat::A4 | PixelFormat::Etc1 => 4,
        }
    }

    /// Bytes needed for a `width` x `height` image.
    pub const fn image_size(self, width: u32, height: u32) -> usize {
        (width as usize * height as usize * self.bits_per_pixel() as usize) / 8
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u32)]
pub enum ScissorMode {
    #[default]
    Disable = 0x0,
    Invert = 0x1,
    Normal = 0x3,
}

bitflags! {
    /// Colour and depth write enables.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct WriteMask: u32 {
        const RED = 0x01;
        const GREEN = 0x02;
        const BLUE = 0x04;
        const ALPHA = 0x08;
        const DEPTH = 0x10;

        const COLOR = Self::RED.bits() | Self::GREEN.bits() | Self::BLUE.bits() | Self::ALPHA.bits();
    }
}

impl Default for WriteMask {
    fn default() -> Self {
        WriteMask::all()
    }
}

/// Pack one attribute slot: component count in bits 2-3, element type in
/// bits 0-1, shifted to nibble `index`.
pub const fn vbo_attribute(index: u32, components: u32, ty: AttributeType) -> u64 {
    ((((components - 1) << 2) | (ty as u32 & 3)) as u64) << (index * 4)
}

pub const fn tex_env_sources(src0: TexEnvSource, src1: TexEnvSource, src2: TexEnvSource) -> u16 {
    (src0 as u32 | ((src1 as u32) << 4) | ((src2 as u32) << 8)) as u16
}

pub const fn tex_env_operands(op0: u32, op1: u32, op2: u32) -> u16 {
    (op0 | (op1 << 4) | (op2 << 8)) as u16
}

pub const fn texture_min_filter(filter: TextureFilter) -> u32 {
    (filter as u32 & 1) << 2
}

pub const fn texture_mag_filter(filter: TextureFilter) -> u32 {
    (filter as u32 & 1) << 1
}

pub const fn texture_wrap_s(wrap: TextureWrap) -> u32 {
    (wrap as u32 & 3) << 12
}

pub const fn texture_wrap_t(wrap: TextureWrap) -> u32 {
    (wrap as u32 & 3) << 8
}
