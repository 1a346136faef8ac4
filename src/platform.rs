//! Platform Capability Module
//!
//! Everything the graphics core needs from the console: DMA-visible memory,
//! command-list submission, the transfer and fill engines, completion
//! events and the LCD framebuffers. Real hardware and the headless
//! simulator both implement [`Platform`].

use std::time::Duration;

use bitflags::bitflags;

use crate::gpu::types::{PixelFormat, Screen, ScreenSide};

/// Which allocator a DMA block comes from. Blocks never move between
/// placements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Placement {
    /// General-purpose, physically contiguous heap.
    #[default]
    Linear,
    /// Dedicated video memory.
    Vram,
}

/// A contiguous block the hardware can address directly. The physical
/// address is the block's identity.
#[derive(Debug, PartialEq, Eq)]
pub struct DmaBlock {
    phys: u32,
    size: usize,
    placement: Placement,
}

impl DmaBlock {
    pub fn new(phys: u32, size: usize, placement: Placement) -> Self {
        Self {
            phys,
            size,
            placement,
        }
    }

    pub fn phys(&self) -> u32 {
        self.phys
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn placement(&self) -> Placement {
        self.placement
    }
}

/// Hardware completion signals. Each engine raises its own event and
/// waiting on the wrong one never observes the other's completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GpuEvent {
    /// Memory fill engine finished.
    Psc0,
    /// Display transfer engine finished.
    Ppf,
    /// 3D command list finished.
    P3d,
    /// Top screen vertical blank.
    VBlank,
}

impl GpuEvent {
    pub const ALL: [GpuEvent; 4] = [GpuEvent::Psc0, GpuEvent::Ppf, GpuEvent::P3d, GpuEvent::VBlank];

    pub const fn index(self) -> usize {
        match self {
            GpuEvent::Psc0 => 0,
            GpuEvent::Ppf => 1,
            GpuEvent::P3d => 2,
            GpuEvent::VBlank => 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Signaled,
    TimedOut,
}

bitflags! {
    /// Display transfer control flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct TransferFlags: u32 {
        /// Flip the image vertically.
        const FLIP_VERT = 1 << 0;
        /// Write linear input in swizzled tile order.
        const OUT_TILED = 1 << 1;
        /// Copy without any format conversion.
        const RAW_COPY = 1 << 3;
    }
}

/// One display transfer: a format-converting copy between two blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisplayTransfer {
    pub src: u32,
    pub src_width: u32,
    pub src_height: u32,
    pub dst: u32,
    pub dst_width: u32,
    pub dst_height: u32,
    pub in_format: PixelFormat,
    pub out_format: PixelFormat,
    pub flags: TransferFlags,
}

/// One memory fill range, filled with 32-bit words.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FillRange {
    pub start: u32,
    pub words: usize,
    pub value: u32,
}

/// A memory fill runs both ranges at once and raises one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryFill {
    pub first: FillRange,
    pub second: Option<FillRange>,
}

/// LCD framebuffer pixel format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FramebufferFormat {
    Rgba8,
    #[default]
    Bgr8,
    Rgb565,
    Rgb5A1,
    Rgba4,
}

impl FramebufferFormat {
    /// The texture format the transfer engine writes for this screen format.
    pub const fn pixel_format(self) -> PixelFormat {
        match self {
            FramebufferFormat::Rgba8 => PixelFormat::Rgba8,
            FramebufferFormat::Bgr8 => PixelFormat::Rgb8,
            FramebufferFormat::Rgb565 => PixelFormat::Rgb565,
            FramebufferFormat::Rgb5A1 => PixelFormat::Rgba5551,
            FramebufferFormat::Rgba4 => PixelFormat::Rgba4,
        }
    }
}

/// Location and shape of the framebuffer currently being drawn. Screens are
/// mounted rotated, so `width` is the short edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FramebufferInfo {
    pub phys: u32,
    pub width: u32,
    pub height: u32,
    pub format: FramebufferFormat,
}

/// Console capabilities consumed by the graphics core.
pub trait Platform {
    /// Allocate a DMA-visible block. `None` when the allocator is exhausted.
    fn alloc(&mut self, placement: Placement, size: usize, align: usize) -> Option<DmaBlock>;

    fn free(&mut self, block: DmaBlock);

    /// CPU view of a block. Empty if the block is unknown.
    fn bytes(&self, block: &DmaBlock) -> &[u8];

    fn bytes_mut(&mut self, block: &DmaBlock) -> &mut [u8];

    /// Write back CPU caches for a block before the hardware reads it.
    fn flush_data_cache(&mut self, block: &DmaBlock);

    /// Run `words` 32-bit words of the command list in `block`. Raises
    /// [`GpuEvent::P3d`] on completion.
    fn submit(&mut self, block: &DmaBlock, words: usize);

    /// Raises [`GpuEvent::Ppf`] on completion.
    fn display_transfer(&mut self, transfer: DisplayTransfer);

    /// Raises [`GpuEvent::Psc0`] on completion.
    fn memory_fill(&mut self, fill: MemoryFill);

    fn wait(&mut self, event: GpuEvent, timeout: Duration) -> WaitOutcome;

    fn clear_event(&mut self, event: GpuEvent);

    /// The back buffer for a screen and eye.
    fn framebuffer(&self, screen: Screen, side: ScreenSide) -> FramebufferInfo;

    fn framebuffer_bytes(&self, screen: Screen, side: ScreenSide) -> &[u8];

    /// Present the back buffers. Raises [`GpuEvent::VBlank`].
    fn swap_buffers(&mut self);

    /// Re-base the command processor on `command_block`.
    fn reset_gpu(&mut self, command_block: &DmaBlock);
}
