//! Headless Platform Module
//!
//! A host-side stand-in for the console. DMA memory is plain byte vectors
//! behind bump allocators, the engines run synchronously and raise their
//! events immediately, and every submission, transfer, fill and wait is
//! recorded for inspection.

use std::collections::HashMap;
use std::time::Duration;

use tracing::{debug, trace};

use crate::command_buffer::{self, RegWrite};
use crate::gpu::tiling;
use crate::gpu::types::{PixelFormat, Screen, ScreenSide};
use crate::platform::{
    DisplayTransfer, DmaBlock, FramebufferFormat, FramebufferInfo, GpuEvent, MemoryFill,
    Placement, Platform, TransferFlags, WaitOutcome,
};

/// Default linear heap budget.
pub const DEFAULT_LINEAR_BYTES: usize = 32 * 1024 * 1024;
/// Default VRAM budget.
pub const DEFAULT_VRAM_BYTES: usize = 6 * 1024 * 1024;

const LINEAR_BASE: u32 = 0x2000_0000;
const LINEAR_LIMIT: u32 = 0x3000_0000;
const VRAM_BASE: u32 = 0x1800_0000;
const VRAM_LIMIT: u32 = 0x1C00_0000;

/// Framebuffers live outside both heaps, one fixed slot per screen, eye
/// and buffer.
const FRAMEBUFFER_BASE: u32 = 0x1400_0000;
const FRAMEBUFFER_STRIDE: u32 = 0x0010_0000;

// =============================================================================
// Bump allocator
// =============================================================================

/// Hands out increasing addresses and never reuses them, so a stale
/// physical address can never alias a newer block.
#[derive(Debug)]
struct Heap {
    next: u32,
    limit: u32,
    budget: usize,
    live: usize,
}

impl Heap {
    fn new(base: u32, limit: u32, budget: usize) -> Self {
        Self {
            next: base,
            limit,
            budget,
            live: 0,
        }
    }

    fn alloc(&mut self, size: usize, align: usize) -> Option<u32> {
        if size == 0 || self.live.checked_add(size)? > self.budget {
            return None;
        }

        let align = u32::try_from(align.max(1).next_power_of_two()).ok()?;
        let start = self.next.checked_add(align - 1)? & !(align - 1);
        let end = start.checked_add(u32::try_from(size).ok()?)?;
        if end > self.limit {
            return None;
        }

        self.next = end;
        self.live += size;
        Some(start)
    }

    fn release(&mut self, size: usize) {
        self.live = self.live.saturating_sub(size);
    }
}

// =============================================================================
// Platform
// =============================================================================

pub struct HeadlessPlatform {
    linear: Heap,
    vram: Heap,
    blocks: HashMap<u32, Vec<u8>>,
    framebuffers: HashMap<u32, Vec<u8>>,
    formats: [FramebufferFormat; 2],
    /// Index of the back buffer per screen.
    back: [usize; 2],

    signaled: [bool; 4],
    dropped: [bool; 4],
    waits: [usize; 4],
    clears: [usize; 4],

    submissions: usize,
    last_submission: Option<Vec<RegWrite>>,
    transfers: usize,
    last_transfer: Option<DisplayTransfer>,
    fills: usize,
    last_fill: Option<MemoryFill>,
    cache_flushes: usize,
    gpu_resets: usize,
}

impl HeadlessPlatform {
    pub fn new(linear_bytes: usize, vram_bytes: usize) -> Self {
        let mut framebuffers = HashMap::new();
        for screen in [Screen::Top, Screen::Bottom] {
            let (width, height) = framebuffer_dimensions(screen);
            let bpp = (FramebufferFormat::default().pixel_format().bits_per_pixel() / 8) as usize;
            for side in [ScreenSide::Left, ScreenSide::Right] {
                for buffer in 0..2 {
                    framebuffers.insert(
                        framebuffer_phys(screen, side, buffer),
                        vec![0u8; width as usize * height as usize * bpp],
                    );
                }
            }
        }

        debug!(
            "Headless platform: {} bytes linear, {} bytes VRAM",
            linear_bytes, vram_bytes
        );

        Self {
            linear: Heap::new(LINEAR_BASE, LINEAR_LIMIT, linear_bytes),
            vram: Heap::new(VRAM_BASE, VRAM_LIMIT, vram_bytes),
            blocks: HashMap::new(),
            framebuffers,
            formats: [FramebufferFormat::default(); 2],
            back: [0; 2],
            signaled: [false; 4],
            dropped: [false; 4],
            waits: [0; 4],
            clears: [0; 4],
            submissions: 0,
            last_submission: None,
            transfers: 0,
            last_transfer: None,
            fills: 0,
            last_fill: None,
            cache_flushes: 0,
            gpu_resets: 0,
        }
    }

    /// Swallow the next raise of `event`, so the following wait times out.
    pub fn drop_next(&mut self, event: GpuEvent) {
        self.dropped[event.index()] = true;
    }

    pub fn wait_count(&self, event: GpuEvent) -> usize {
        self.waits[event.index()]
    }

    pub fn clear_count(&self, event: GpuEvent) -> usize {
        self.clears[event.index()]
    }

    pub fn submissions(&self) -> usize {
        self.submissions
    }

    /// Decoded register writes of the most recent command list.
    pub fn last_submission(&self) -> Option<&[RegWrite]> {
        self.last_submission.as_deref()
    }

    pub fn transfers(&self) -> usize {
        self.transfers
    }

    pub fn last_transfer(&self) -> Option<&DisplayTransfer> {
        self.last_transfer.as_ref()
    }

    pub fn fills(&self) -> usize {
        self.fills
    }

    pub fn last_fill(&self) -> Option<&MemoryFill> {
        self.last_fill.as_ref()
    }

    pub fn cache_flushes(&self) -> usize {
        self.cache_flushes
    }

    pub fn gpu_resets(&self) -> usize {
        self.gpu_resets
    }

    /// Bytes currently allocated from a heap.
    pub fn live_bytes(&self, placement: Placement) -> usize {
        match placement {
            Placement::Linear => self.linear.live,
            Placement::Vram => self.vram.live,
        }
    }

    /// Change a screen's pixel format. Existing contents are discarded.
    pub fn set_framebuffer_format(&mut self, screen: Screen, format: FramebufferFormat) {
        self.formats[screen_index(screen)] = format;
        let (width, height) = framebuffer_dimensions(screen);
        let size = width as usize * height as usize * (format.pixel_format().bits_per_pixel() / 8) as usize;
        for side in [ScreenSide::Left, ScreenSide::Right] {
            for buffer in 0..2 {
                self.framebuffers
                    .insert(framebuffer_phys(screen, side, buffer), vec![0u8; size]);
            }
        }
    }

    fn raise(&mut self, event: GpuEvent) {
        let i = event.index();
        if self.dropped[i] {
            self.dropped[i] = false;
            trace!("Dropped {:?}", event);
        } else {
            self.signaled[i] = true;
        }
    }

    /// Memory starting at a physical address, in a block or framebuffer.
    fn region(&self, phys: u32) -> Option<&[u8]> {
        self.blocks
            .iter()
            .chain(self.framebuffers.iter())
            .find(|(start, bytes)| phys >= **start && ((phys - **start) as usize) < bytes.len())
            .map(|(start, bytes)| &bytes[(phys - *start) as usize..])
    }

    fn region_mut(&mut self, phys: u32) -> Option<&mut [u8]> {
        self.blocks
            .iter_mut()
            .chain(self.framebuffers.iter_mut())
            .find(|(start, bytes)| phys >= **start && ((phys - **start) as usize) < bytes.len())
            .map(|(start, bytes)| &mut bytes[(phys - *start) as usize..])
    }
}

impl Default for HeadlessPlatform {
    fn default() -> Self {
        Self::new(DEFAULT_LINEAR_BYTES, DEFAULT_VRAM_BYTES)
    }
}

fn screen_index(screen: Screen) -> usize {
    match screen {
        Screen::Top => 0,
        Screen::Bottom => 1,
    }
}

/// The bottom screen has a single eye.
fn side_index(screen: Screen, side: ScreenSide) -> u32 {
    match (screen, side) {
        (Screen::Top, ScreenSide::Right) => 1,
        _ => 0,
    }
}

fn framebuffer_phys(screen: Screen, side: ScreenSide, buffer: usize) -> u32 {
    let slot = (screen_index(screen) as u32 * 2 + side_index(screen, side)) * 2 + buffer as u32;
    FRAMEBUFFER_BASE + slot * FRAMEBUFFER_STRIDE
}

/// Framebuffer shape as mounted: the short edge is the width.
fn framebuffer_dimensions(screen: Screen) -> (u32, u32) {
    let (width, height) = screen.dimensions();
    (height, width)
}

/// Convert one RGBA8 pixel (stored little-endian as A, B, G, R) into
/// `format`.
fn convert_pixel(src: &[u8], format: PixelFormat, dst: &mut [u8]) {
    let (a, b, g, r) = (src[0] as u16, src[1] as u16, src[2] as u16, src[3] as u16);
    match format {
        PixelFormat::Rgb8 => dst[..3].copy_from_slice(&src[1..4]),
        PixelFormat::Rgb565 => {
            let v = ((r >> 3) << 11) | ((g >> 2) << 5) | (b >> 3);
            dst[..2].copy_from_slice(&v.to_le_bytes());
        }
        PixelFormat::Rgba5551 => {
            let v = ((r >> 3) << 11) | ((g >> 3) << 6) | ((b >> 3) << 1) | (a >> 7);
            dst[..2].copy_from_slice(&v.to_le_bytes());
        }
        PixelFormat::Rgba4 => {
            let v = ((r >> 4) << 12) | ((g >> 4) << 8) | ((b >> 4) << 4) | (a >> 4);
            dst[..2].copy_from_slice(&v.to_le_bytes());
        }
        _ => {
            let n = dst.len().min(src.len());
            dst[..n].copy_from_slice(&src[..n]);
        }
    }
}

impl Platform for HeadlessPlatform {
    fn alloc(&mut self, placement: Placement, size: usize, align: usize) -> Option<DmaBlock> {
        let heap = match placement {
            Placement::Linear => &mut self.linear,
            Placement::Vram => &mut self.vram,
        };
        let phys = heap.alloc(size, align)?;
        self.blocks.insert(phys, vec![0u8; size]);
        trace!("alloc {:?} 0x{:08X} ({} bytes)", placement, phys, size);
        Some(DmaBlock::new(phys, size, placement))
    }

    fn free(&mut self, block: DmaBlock) {
        if self.blocks.remove(&block.phys()).is_none() {
            return;
        }
        match block.placement() {
            Placement::Linear => self.linear.release(block.size()),
            Placement::Vram => self.vram.release(block.size()),
        }
    }

    fn bytes(&self, block: &DmaBlock) -> &[u8] {
        self.blocks
            .get(&block.phys())
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    fn bytes_mut(&mut self, block: &DmaBlock) -> &mut [u8] {
        self.blocks
            .get_mut(&block.phys())
            .map(Vec::as_mut_slice)
            .unwrap_or_default()
    }

    fn flush_data_cache(&mut self, _block: &DmaBlock) {
        self.cache_flushes += 1;
    }

    fn submit(&mut self, block: &DmaBlock, words: usize) {
        let bytes = self.bytes(block);
        let list: Vec<u32> = bytes
            .chunks_exact(4)
            .take(words)
            .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect();

        self.last_submission = Some(command_buffer::decode(&list));
        self.submissions += 1;
        self.raise(GpuEvent::P3d);
    }

    fn display_transfer(&mut self, transfer: DisplayTransfer) {
        let in_bpp = (transfer.in_format.bits_per_pixel() / 8) as usize;
        let out_bpp = (transfer.out_format.bits_per_pixel() / 8) as usize;
        let pixels = transfer.src_width as usize * transfer.src_height as usize;
        let to_framebuffer = self.framebuffers.contains_key(&transfer.dst);

        let src: Vec<u8> = self
            .region(transfer.src)
            .map(|s| s[..s.len().min(pixels * in_bpp.max(1))].to_vec())
            .unwrap_or_default();

        if let Some(dst) = self.region_mut(transfer.dst) {
            if transfer.flags.contains(TransferFlags::OUT_TILED) && in_bpp > 0 {
                tiling::swizzle(&src, dst, transfer.src_width, transfer.src_height, in_bpp);
            } else if to_framebuffer
                && !transfer.flags.contains(TransferFlags::RAW_COPY)
                && in_bpp == 4
                && out_bpp > 0
            {
                for (from, to) in src.chunks_exact(4).zip(dst.chunks_exact_mut(out_bpp)) {
                    convert_pixel(from, transfer.out_format, to);
                }
            } else {
                let n = src.len().min(dst.len());
                dst[..n].copy_from_slice(&src[..n]);
            }
        }

        self.transfers += 1;
        self.last_transfer = Some(transfer);
        self.raise(GpuEvent::Ppf);
    }

    fn memory_fill(&mut self, fill: MemoryFill) {
        for range in std::iter::once(fill.first).chain(fill.second) {
            if let Some(dst) = self.region_mut(range.start) {
                let value = range.value.to_le_bytes();
                for word in dst.chunks_exact_mut(4).take(range.words) {
                    word.copy_from_slice(&value);
                }
            }
        }

        self.fills += 1;
        self.last_fill = Some(fill);
        self.raise(GpuEvent::Psc0);
    }

    fn wait(&mut self, event: GpuEvent, _timeout: Duration) -> WaitOutcome {
        let i = event.index();
        self.waits[i] += 1;
        if std::mem::take(&mut self.signaled[i]) {
            WaitOutcome::Signaled
        } else {
            WaitOutcome::TimedOut
        }
    }

    fn clear_event(&mut self, event: GpuEvent) {
        let i = event.index();
        self.signaled[i] = false;
        self.clears[i] += 1;
    }

    fn framebuffer(&self, screen: Screen, side: ScreenSide) -> FramebufferInfo {
        let (width, height) = framebuffer_dimensions(screen);
        FramebufferInfo {
            phys: framebuffer_phys(screen, side, self.back[screen_index(screen)]),
            width,
            height,
            format: self.formats[screen_index(screen)],
        }
    }

    fn framebuffer_bytes(&self, screen: Screen, side: ScreenSide) -> &[u8] {
        let phys = framebuffer_phys(screen, side, self.back[screen_index(screen)]);
        self.framebuffers
            .get(&phys)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    fn swap_buffers(&mut self) {
        for back in &mut self.back {
            *back ^= 1;
        }
        self.raise(GpuEvent::VBlank);
    }

    fn reset_gpu(&mut self, command_block: &DmaBlock) {
        debug!("GPU re-based on command block 0x{:08X}", command_block.phys());
        self.gpu_resets += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::FillRange;

    #[test]
    fn test_alloc_is_aligned_and_never_reused() {
        let mut platform = HeadlessPlatform::default();
        let a = platform.alloc(Placement::Linear, 10, 0x80).expect("alloc");
        let b = platform.alloc(Placement::Linear, 10, 0x80).expect("alloc");
        assert_eq!(a.phys() % 0x80, 0);
        assert_eq!(b.phys() % 0x80, 0);
        assert!(b.phys() > a.phys());

        let freed = a.phys();
        platform.free(a);
        let c = platform.alloc(Placement::Linear, 10, 0x80).expect("alloc");
        assert_ne!(c.phys(), freed);
    }

    #[test]
    fn test_budget_counts_live_bytes() {
        let mut platform = HeadlessPlatform::new(1024, 256);
        let a = platform.alloc(Placement::Linear, 1000, 4).expect("alloc");
        assert!(platform.alloc(Placement::Linear, 100, 4).is_none());
        assert!(platform.alloc(Placement::Vram, 1000, 4).is_none());
        assert!(platform.alloc(Placement::Linear, usize::MAX, 4).is_none());

        platform.free(a);
        assert_eq!(platform.live_bytes(Placement::Linear), 0);
        assert!(platform.alloc(Placement::Linear, 100, 4).is_some());
    }

    #[test]
    fn test_placements_do_not_overlap() {
        let mut platform = HeadlessPlatform::default();
        let linear = platform.alloc(Placement::Linear, 64, 4).expect("alloc");
        let vram = platform.alloc(Placement::Vram, 64, 4).expect("alloc");
        assert_eq!(linear.placement(), Placement::Linear);
        assert_eq!(vram.placement(), Placement::Vram);
        assert_ne!(linear.phys(), vram.phys());
    }

    #[test]
    fn test_dropped_event_times_out_once() {
        let mut platform = HeadlessPlatform::default();
        platform.drop_next(GpuEvent::Psc0);
        platform.memory_fill(MemoryFill {
            first: FillRange {
                start: 0,
                words: 0,
                value: 0,
            },
            second: None,
        });
        let timeout = Duration::from_millis(40);
        assert_eq!(platform.wait(GpuEvent::Psc0, timeout), WaitOutcome::TimedOut);

        platform.memory_fill(MemoryFill {
            first: FillRange {
                start: 0,
                words: 0,
                value: 0,
            },
            second: None,
        });
        assert_eq!(platform.wait(GpuEvent::Ppf, timeout), WaitOutcome::TimedOut);
        assert_eq!(platform.wait(GpuEvent::Psc0, timeout), WaitOutcome::Signaled);
        assert_eq!(platform.wait_count(GpuEvent::Psc0), 2);
    }

    #[test]
    fn test_fill_writes_words() {
        let mut platform = HeadlessPlatform::default();
        let block = platform.alloc(Placement::Vram, 16, 4).expect("alloc");
        platform.memory_fill(MemoryFill {
            first: FillRange {
                start: block.phys(),
                words: 3,
                value: 0xAABB_CCDD,
            },
            second: None,
        });
        assert_eq!(
            platform.bytes(&block),
            &[0xDD, 0xCC, 0xBB, 0xAA, 0xDD, 0xCC, 0xBB, 0xAA, 0xDD, 0xCC, 0xBB, 0xAA, 0, 0, 0, 0]
        );
    }

    #[test]
    fn test_tiled_transfer_swizzles() {
        let mut platform = HeadlessPlatform::default();
        let src = platform.alloc(Placement::Linear, 64, 4).expect("alloc");
        let dst = platform.alloc(Placement::Vram, 64, 4).expect("alloc");
        let linear: Vec<u8> = (0..64).collect();
        platform.bytes_mut(&src).copy_from_slice(&linear);

        platform.display_transfer(DisplayTransfer {
            src: src.phys(),
            src_width: 8,
            src_height: 8,
            dst: dst.phys(),
            dst_width: 8,
            dst_height: 8,
            in_format: PixelFormat::L8,
            out_format: PixelFormat::L8,
            flags: TransferFlags::OUT_TILED,
        });

        let tiled = platform.bytes(&dst);
        assert_eq!(tiled[1], 1);
        assert_eq!(tiled[2], 8);
        assert_eq!(tiled[3], 9);
        assert_eq!(platform.transfers(), 1);
    }

    #[test]
    fn test_transfer_to_framebuffer_converts() {
        let mut platform = HeadlessPlatform::default();
        let src = platform.alloc(Placement::Vram, 8, 4).expect("alloc");
        platform
            .bytes_mut(&src)
            .copy_from_slice(&[0xFF, 0x30, 0x20, 0x10, 0xFF, 0x60, 0x50, 0x40]);

        let fb = platform.framebuffer(Screen::Bottom, ScreenSide::Left);
        platform.display_transfer(DisplayTransfer {
            src: src.phys(),
            src_width: 2,
            src_height: 1,
            dst: fb.phys,
            dst_width: fb.width,
            dst_height: fb.height,
            in_format: PixelFormat::Rgba8,
            out_format: fb.format.pixel_format(),
            flags: TransferFlags::empty(),
        });

        let bytes = platform.framebuffer_bytes(Screen::Bottom, ScreenSide::Left);
        assert_eq!(&bytes[..6], &[0x30, 0x20, 0x10, 0x60, 0x50, 0x40]);
    }

    #[test]
    fn test_swap_flips_back_buffer() {
        let mut platform = HeadlessPlatform::default();
        let before = platform.framebuffer(Screen::Top, ScreenSide::Left);
        platform.swap_buffers();
        let after = platform.framebuffer(Screen::Top, ScreenSide::Left);
        assert_ne!(before.phys, after.phys);
        assert_eq!((after.width, after.height), (240, 400));
        assert_eq!(
            platform.wait(GpuEvent::VBlank, Duration::ZERO),
            WaitOutcome::Signaled
        );
    }

    #[test]
    fn test_bottom_screen_has_one_eye() {
        let platform = HeadlessPlatform::default();
        assert_eq!(
            platform.framebuffer(Screen::Bottom, ScreenSide::Left),
            platform.framebuffer(Screen::Bottom, ScreenSide::Right)
        );
    }

    #[test]
    fn test_rgb565_conversion() {
        let mut out = [0u8; 2];
        convert_pixel(&[0xFF, 0x00, 0x00, 0xFF], PixelFormat::Rgb565, &mut out);
        assert_eq!(u16::from_le_bytes(out), 0xF800);
    }
}
