//! Glyph rasterization for `fb_draw_text`, backed by the same bitmap-font
//! crate the host console driver uses for its own text rendering.

use noto_sans_mono_bitmap::{FontWeight, RasterHeight, get_raster, get_raster_width};

const SIZE: RasterHeight = RasterHeight::Size16;

pub fn glyph_width() -> usize {
    get_raster_width(FontWeight::Regular, SIZE)
}

pub fn glyph_height() -> usize {
    SIZE.val()
}

/// Rasterizes `ch`, falling back to `?` for glyphs the font doesn't cover.
/// Each byte in a row is a greyscale intensity; callers treat any nonzero
/// byte as foreground.
pub fn rasterize(ch: char) -> Vec<Vec<u8>> {
    get_raster(ch, FontWeight::Regular, SIZE)
        .or_else(|| get_raster('?', FontWeight::Regular, SIZE))
        .map(|r| r.raster().iter().map(|row| row.to_vec()).collect())
        .unwrap_or_default()
}
