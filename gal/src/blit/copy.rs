//! Copy and format conversion rows.
//!
//! Each routine converts `ctx.width` pixels from `src` starting at pixel
//! `sx` into `dst` starting at pixel `dx`. Rows are whole scanlines.

use super::RowCtx;
use crate::map::MapTable;
use crate::pixels::{read_index, read_pixel, write_index, write_pixel};

/// Destination palette index for a source index or RGB332 code.
#[inline]
fn remap_index(ctx: &RowCtx<'_>, v: u8) -> u8 {
    match ctx.table {
        Some(MapTable::Index(t)) => t.get(v as usize).copied().unwrap_or(v),
        _ => v,
    }
}

/// Packed destination pixel for a source palette index.
#[inline]
fn remap_pixel(ctx: &RowCtx<'_>, v: u8) -> u32 {
    match ctx.table {
        Some(MapTable::Pixels(t)) => t.get(v as usize).copied().unwrap_or(0),
        _ => v as u32,
    }
}

/// Whether a direct-color pixel matches the source colorkey.
#[inline]
pub(super) fn is_key(ctx: &RowCtx<'_>, pixel: u32) -> bool {
    let amask = ctx.src_fmt.amask;
    (pixel & !amask) == (ctx.src_fmt.colorkey & !amask)
}

/// RGB332 code of 8-bit channels.
#[inline]
pub(super) fn rgb332(r: u32, g: u32, b: u32) -> u8 {
    ((r & 0xe0) | ((g & 0xe0) >> 3) | (b >> 6)) as u8
}

/// Identical layouts: bytes (or sub-byte indexes) move unchanged.
pub(super) fn copy_row(ctx: &RowCtx<'_>, src: &[u8], sx: usize, dst: &mut [u8], dx: usize) {
    let bits = ctx.src_fmt.bits_per_pixel;
    if bits < 8 {
        for i in 0..ctx.width {
            write_index(dst, bits, dx + i, read_index(src, bits, sx + i));
        }
        return;
    }
    let bpp = ctx.src_fmt.bytes_per_pixel as usize;
    let len = ctx.width * bpp;
    dst[dx * bpp..dx * bpp + len].copy_from_slice(&src[sx * bpp..sx * bpp + len]);
}

/// Indexed (any depth up to 8 bits) to indexed.
pub(super) fn index_to_index(
    ctx: &RowCtx<'_>,
    src: &[u8],
    sx: usize,
    dst: &mut [u8],
    dx: usize,
    keyed: bool,
) {
    let sbits = ctx.src_fmt.bits_per_pixel;
    let dbits = ctx.dst_fmt.bits_per_pixel;
    for i in 0..ctx.width {
        let idx = read_index(src, sbits, sx + i);
        if keyed && idx as u32 == ctx.src_fmt.colorkey {
            continue;
        }
        write_index(dst, dbits, dx + i, remap_index(ctx, idx));
    }
}

/// Indexed to direct color through the per-index pixel table.
pub(super) fn index_to_n(
    ctx: &RowCtx<'_>,
    src: &[u8],
    sx: usize,
    dst: &mut [u8],
    dx: usize,
    keyed: bool,
) {
    let sbits = ctx.src_fmt.bits_per_pixel;
    let dbpp = ctx.dst_fmt.bytes_per_pixel as usize;
    for i in 0..ctx.width {
        let idx = read_index(src, sbits, sx + i);
        if keyed && idx as u32 == ctx.src_fmt.colorkey {
            continue;
        }
        let at = (dx + i) * dbpp;
        write_pixel(&mut dst[at..at + dbpp], dbpp, remap_pixel(ctx, idx));
    }
}

/// Direct color to indexed via RGB332 and the map table.
pub(super) fn n_to_1(
    ctx: &RowCtx<'_>,
    src: &[u8],
    sx: usize,
    dst: &mut [u8],
    dx: usize,
    keyed: bool,
) {
    let sbpp = ctx.src_fmt.bytes_per_pixel as usize;
    let dbits = ctx.dst_fmt.bits_per_pixel;
    for i in 0..ctx.width {
        let at = (sx + i) * sbpp;
        let pixel = read_pixel(&src[at..at + sbpp], sbpp);
        if keyed && is_key(ctx, pixel) {
            continue;
        }
        let (r, g, b) = ctx.src_fmt.rgb_from_pixel(pixel);
        write_index(dst, dbits, dx + i, remap_index(ctx, rgb332(r, g, b)));
    }
}

/// Direct color to direct color. Alpha is carried when both sides have
/// a channel; otherwise the destination is written opaque.
pub(super) fn n_to_n(
    ctx: &RowCtx<'_>,
    src: &[u8],
    sx: usize,
    dst: &mut [u8],
    dx: usize,
    keyed: bool,
) {
    let sf = ctx.src_fmt;
    let df = ctx.dst_fmt;
    let sbpp = sf.bytes_per_pixel as usize;
    let dbpp = df.bytes_per_pixel as usize;
    let carry_alpha = sf.amask != 0 && df.amask != 0;
    for i in 0..ctx.width {
        let at = (sx + i) * sbpp;
        let pixel = read_pixel(&src[at..at + sbpp], sbpp);
        if keyed && is_key(ctx, pixel) {
            continue;
        }
        let (r, g, b) = sf.rgb_from_pixel(pixel);
        let a = if carry_alpha { sf.alpha_from_pixel(pixel) } else { 255 };
        let out = (dx + i) * dbpp;
        write_pixel(&mut dst[out..out + dbpp], dbpp, df.pixel_from_rgba(r, g, b, a));
    }
}
