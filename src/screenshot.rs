//! Screenshot Module
//!
//! Composes the dumped top and bottom screens into a bottom-up 24-bit BMP.

use tracing::debug;

use crate::gpu::emitter::DumpedScreen;
use crate::gpu::types::{Screen, ScreenSide};
use crate::gpu::GraphicsContext;
use crate::platform::{FramebufferFormat, Platform};
use crate::protocol::{BOTTOM_HEIGHT, BOTTOM_WIDTH, TOP_HEIGHT, TOP_WIDTH};

const HEADER_SIZE: usize = 0x36;
const INFO_HEADER_SIZE: u32 = 0x28;
/// One plane, 24 bits per pixel.
const PLANES_AND_BPP: u32 = 0x0018_0001;

/// Build a BMP of the selected screens: top above bottom, the narrower one
/// centred. `None` when neither screen is selected. Screens whose
/// framebuffer is not BGR8 are left black.
pub fn capture<P: Platform>(ctx: &GraphicsContext<P>, top: bool, bottom: bool) -> Option<Vec<u8>> {
    if !top && !bottom {
        return None;
    }

    let width = if top { TOP_WIDTH } else { BOTTOM_WIDTH };
    let height = match (top, bottom) {
        (true, true) => TOP_HEIGHT + BOTTOM_HEIGHT,
        (true, false) => TOP_HEIGHT,
        _ => BOTTOM_HEIGHT,
    };
    let image_size = (width * height * 3) as usize;

    let mut bmp = vec![0u8; HEADER_SIZE + image_size];
    bmp[0x00..0x02].copy_from_slice(&0x4D42u16.to_le_bytes());
    bmp[0x02..0x06].copy_from_slice(&((HEADER_SIZE + image_size) as u32).to_le_bytes());
    bmp[0x0A..0x0E].copy_from_slice(&(HEADER_SIZE as u32).to_le_bytes());
    bmp[0x0E..0x12].copy_from_slice(&INFO_HEADER_SIZE.to_le_bytes());
    bmp[0x12..0x16].copy_from_slice(&width.to_le_bytes());
    bmp[0x16..0x1A].copy_from_slice(&height.to_le_bytes());
    bmp[0x1A..0x1E].copy_from_slice(&PLANES_AND_BPP.to_le_bytes());
    bmp[0x22..0x26].copy_from_slice(&(image_size as u32).to_le_bytes());

    let image = &mut bmp[HEADER_SIZE..];
    if top {
        let dumped = ctx.dump_screen(Screen::Top, ScreenSide::Left);
        blit(&dumped, TOP_WIDTH, TOP_HEIGHT, image, width, height, 0);
    }
    if bottom {
        let dumped = ctx.dump_screen(Screen::Bottom, ScreenSide::Left);
        let y_offset = if top { TOP_HEIGHT } else { 0 };
        blit(&dumped, BOTTOM_WIDTH, BOTTOM_HEIGHT, image, width, height, y_offset);
    }

    Some(bmp)
}

/// Copy one rotated screen into the image. `screen_width` is the long
/// edge; the dump stores one row per screen column.
fn blit(
    dumped: &DumpedScreen,
    screen_width: u32,
    screen_height: u32,
    image: &mut [u8],
    width: u32,
    height: u32,
    y_offset: u32,
) {
    if dumped.format != FramebufferFormat::Bgr8 {
        debug!("Skipping {:?} screen in screenshot", dumped.format);
        return;
    }
    if dumped.width < screen_height || dumped.pixels.len() < (screen_width * screen_height * 3) as usize {
        debug!("Framebuffer smaller than {}x{}, skipping", screen_width, screen_height);
        return;
    }

    let x_offset = (width - screen_width) / 2;
    for x in 0..screen_width {
        for y in 0..screen_height {
            let src = ((x * dumped.width + (screen_height - 1 - y)) * 3) as usize;
            let dst = (((height - 1 - (y + y_offset)) * width + (x + x_offset)) * 3) as usize;
            image[dst..dst + 3].copy_from_slice(&dumped.pixels[src..src + 3]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::test_context;

    fn read_u32(bytes: &[u8], offset: usize) -> u32 {
        u32::from_le_bytes([bytes[offset], bytes[offset + 1], bytes[offset + 2], bytes[offset + 3]])
    }

    #[test]
    fn test_nothing_selected() {
        let ctx = test_context();
        assert!(capture(&ctx, false, false).is_none());
    }

    #[test]
    fn test_header_layout() {
        let ctx = test_context();
        let bmp = capture(&ctx, true, true).expect("bmp");
        let image_size = 400 * 480 * 3;

        assert_eq!(&bmp[..2], b"BM");
        assert_eq!(bmp.len(), HEADER_SIZE + image_size);
        assert_eq!(read_u32(&bmp, 0x02), bmp.len() as u32);
        assert_eq!(read_u32(&bmp, 0x0A), 0x36);
        assert_eq!(read_u32(&bmp, 0x0E), 0x28);
        assert_eq!(read_u32(&bmp, 0x12), 400);
        assert_eq!(read_u32(&bmp, 0x16), 480);
        assert_eq!(read_u32(&bmp, 0x1A), 0x0018_0001);
        assert_eq!(read_u32(&bmp, 0x22), image_size as u32);
    }

    #[test]
    fn test_bottom_only() {
        let mut ctx = test_context();
        ctx.set_viewport(Screen::Bottom, 0, 0, 320, 240);
        ctx.set_clear_color(0xFF, 0x80, 0x00, 0xFF);
        ctx.clear();
        ctx.flush_buffer();

        let bmp = capture(&ctx, false, true).expect("bmp");
        assert_eq!(read_u32(&bmp, 0x12), 320);
        assert_eq!(read_u32(&bmp, 0x16), 240);

        let image = &bmp[HEADER_SIZE..];
        assert!(image.chunks_exact(3).all(|px| px == [0x00, 0x80, 0xFF]));
    }

    #[test]
    fn test_bottom_screen_centred_below_top() {
        let mut ctx = test_context();
        ctx.set_viewport(Screen::Bottom, 0, 0, 320, 240);
        ctx.set_clear_color(0xFF, 0x80, 0x00, 0xFF);
        ctx.clear();
        ctx.flush_buffer();

        let bmp = capture(&ctx, true, true).expect("bmp");
        let image = &bmp[HEADER_SIZE..];
        let pixel = |row: usize, col: usize| &image[(row * 400 + col) * 3..(row * 400 + col) * 3 + 3];

        // Rows are stored bottom-up, so the bottom screen comes first.
        assert_eq!(pixel(0, 39), [0, 0, 0]);
        assert_eq!(pixel(0, 40), [0x00, 0x80, 0xFF]);
        assert_eq!(pixel(239, 359), [0x00, 0x80, 0xFF]);
        assert_eq!(pixel(239, 360), [0, 0, 0]);
        assert_eq!(pixel(240, 200), [0, 0, 0]);
    }
}
