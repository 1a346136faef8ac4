//! Swizzled tile addressing.
//!
//! The rasterizer stores images as 8x8 tiles laid out row-major, with the
//! pixels inside a tile in Morton (Z) order. Both texture upload and
//! screen dumps go through [`texture_index`].

/// Pixel index of `(x, y)` inside a tiled `width` x `height` image.
#[inline]
pub const fn texture_index(x: u32, y: u32, width: u32, _height: u32) -> u32 {
    let tile = ((y >> 3) * (width >> 3) + (x >> 3)) << 6;
    let morton = (x & 1)
        | ((y & 1) << 1)
        | ((x & 2) << 1)
        | ((y & 2) << 2)
        | ((x & 4) << 2)
        | ((y & 4) << 3);
    tile + morton
}

/// Reorder a linear image into tile order. Pixels that fall outside the
/// destination (partial tiles) are dropped.
pub fn swizzle(src: &[u8], dst: &mut [u8], width: u32, height: u32, bytes_per_pixel: usize) {
    for y in 0..height {
        for x in 0..width {
            let from = (y * width + x) as usize * bytes_per_pixel;
            let to = texture_index(x, y, width, height) as usize * bytes_per_pixel;
            if let (Some(s), Some(d)) = (
                src.get(from..from + bytes_per_pixel),
                dst.get_mut(to..to + bytes_per_pixel),
            ) {
                d.copy_from_slice(s);
            }
        }
    }
}

/// Inverse of [`swizzle`].
pub fn deswizzle(src: &[u8], dst: &mut [u8], width: u32, height: u32, bytes_per_pixel: usize) {
    for y in 0..height {
        for x in 0..width {
            let from = texture_index(x, y, width, height) as usize * bytes_per_pixel;
            let to = (y * width + x) as usize * bytes_per_pixel;
            if let (Some(s), Some(d)) = (
                src.get(from..from + bytes_per_pixel),
                dst.get_mut(to..to + bytes_per_pixel),
            ) {
                d.copy_from_slice(s);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_tile_is_morton_order() {
        // (1,0) -> 1, (0,1) -> 2, (1,1) -> 3, (2,0) -> 4
        assert_eq!(texture_index(0, 0, 8, 8), 0);
        assert_eq!(texture_index(1, 0, 8, 8), 1);
        assert_eq!(texture_index(0, 1, 8, 8), 2);
        assert_eq!(texture_index(1, 1, 8, 8), 3);
        assert_eq!(texture_index(2, 0, 8, 8), 4);
        assert_eq!(texture_index(7, 7, 8, 8), 63);
    }

    #[test]
    fn test_tiles_are_row_major() {
        assert_eq!(texture_index(8, 0, 24, 16), 64);
        assert_eq!(texture_index(16, 0, 24, 16), 128);
        assert_eq!(texture_index(0, 8, 24, 16), 192);
    }

    #[test]
    fn test_index_is_a_permutation() {
        let (w, h) = (40u32, 24u32);
        let mut seen = vec![false; (w * h) as usize];
        for y in 0..h {
            for x in 0..w {
                let i = texture_index(x, y, w, h) as usize;
                assert!(!seen[i]);
                seen[i] = true;
            }
        }
        assert!(seen.iter().all(|&s| s));
    }

    #[test]
    fn test_deswizzle_matches_reference() {
        let (w, h) = (48u32, 40u32);
        let bpp = 3;
        let linear: Vec<u8> = (0..w * h * bpp as u32).map(|i| (i % 251) as u8).collect();
        let mut tiled = vec![0u8; linear.len()];
        swizzle(&linear, &mut tiled, w, h, bpp);
        assert_ne!(tiled, linear);

        // Reference: straight per-pixel lookup through the tile formula.
        let mut reference = vec![0u8; linear.len()];
        for y in 0..h {
            for x in 0..w {
                let src = texture_index(x, y, w, h) as usize * bpp;
                let dst = (y * w + x) as usize * bpp;
                reference[dst..dst + bpp].copy_from_slice(&tiled[src..src + bpp]);
            }
        }

        let mut out = vec![0u8; linear.len()];
        deswizzle(&tiled, &mut out, w, h, bpp);
        assert_eq!(out, reference);
        assert_eq!(out, linear);
    }
}
