//! Alpha blending rows.
//!
//! Per-surface alpha blends every source pixel with the uniform
//! `src_fmt.alpha` and writes an opaque destination alpha. Per-pixel alpha
//! uses the source's alpha channel: 0 skips, 255 overwrites, anything else
//! blends and accumulates destination coverage.

use super::copy::{is_key, rgb332};
use super::RowCtx;
use crate::map::MapTable;
use crate::pixels::{read_index, read_pixel, write_index, write_pixel, Color};

/// `d + (s - d) * a / 256`, exact at 0, 128 and 255.
#[inline]
pub(crate) fn blend(s: u32, d: u32, a: u32) -> u32 {
    match a {
        0 => d,
        128 => (s + d) >> 1,
        255.. => s,
        _ => {
            let (s, d) = (s as i32, d as i32);
            (d + (((s - d) * a as i32) >> 8)) as u32
        }
    }
}

#[inline]
fn blend_rgb(s: (u32, u32, u32), d: (u32, u32, u32), a: u32) -> (u32, u32, u32) {
    (blend(s.0, d.0, a), blend(s.1, d.1, a), blend(s.2, d.2, a))
}

/// Destination coverage after compositing `sa` over `da`.
#[inline]
fn coverage(sa: u32, da: u32) -> u32 {
    (sa + da - sa * da / 255).min(255)
}

#[inline]
fn palette_color(ctx: &RowCtx<'_>, from_dst: bool, idx: u8) -> (u32, u32, u32) {
    let fmt = if from_dst { ctx.dst_fmt } else { ctx.src_fmt };
    let c = fmt
        .palette
        .as_ref()
        .and_then(|p| p.colors.get(idx as usize).copied())
        .unwrap_or(Color::new(0, 0, 0));
    (c.r as u32, c.g as u32, c.b as u32)
}

#[inline]
fn remap_index(ctx: &RowCtx<'_>, v: u8) -> u8 {
    match ctx.table {
        Some(MapTable::Index(t)) => t.get(v as usize).copied().unwrap_or(v),
        _ => v,
    }
}

/// Palette source over a direct-color destination.
pub(super) fn index_to_n_surface_alpha(
    ctx: &RowCtx<'_>,
    src: &[u8],
    sx: usize,
    dst: &mut [u8],
    dx: usize,
    keyed: bool,
) {
    let sbits = ctx.src_fmt.bits_per_pixel;
    let df = ctx.dst_fmt;
    let dbpp = df.bytes_per_pixel as usize;
    let a = ctx.src_fmt.alpha as u32;
    for i in 0..ctx.width {
        let idx = read_index(src, sbits, sx + i);
        if keyed && idx as u32 == ctx.src_fmt.colorkey {
            continue;
        }
        let at = (dx + i) * dbpp;
        let out = &mut dst[at..at + dbpp];
        let d = df.rgb_from_pixel(read_pixel(out, dbpp));
        let (r, g, b) = blend_rgb(palette_color(ctx, false, idx), d, a);
        write_pixel(out, dbpp, df.pixel_from_rgba(r, g, b, 255));
    }
}

/// Direct color over an indexed destination, per-surface alpha.
pub(super) fn n_to_1_surface_alpha(
    ctx: &RowCtx<'_>,
    src: &[u8],
    sx: usize,
    dst: &mut [u8],
    dx: usize,
    keyed: bool,
) {
    let sf = ctx.src_fmt;
    let sbpp = sf.bytes_per_pixel as usize;
    let dbits = ctx.dst_fmt.bits_per_pixel;
    let a = sf.alpha as u32;
    for i in 0..ctx.width {
        let at = (sx + i) * sbpp;
        let pixel = read_pixel(&src[at..at + sbpp], sbpp);
        if keyed && is_key(ctx, pixel) {
            continue;
        }
        let d = palette_color(ctx, true, read_index(dst, dbits, dx + i));
        let (r, g, b) = blend_rgb(sf.rgb_from_pixel(pixel), d, a);
        write_index(dst, dbits, dx + i, remap_index(ctx, rgb332(r, g, b)));
    }
}

/// 32-bit pixels sharing the 0xffffff color layout, per-surface alpha.
pub(super) fn rgb_to_rgb_surface_alpha(
    ctx: &RowCtx<'_>,
    src: &[u8],
    sx: usize,
    dst: &mut [u8],
    dx: usize,
) {
    let a = ctx.src_fmt.alpha as u32;
    let opaque = ctx.dst_fmt.amask;
    let s = &src[sx * 4..(sx + ctx.width) * 4];
    let d = &mut dst[dx * 4..(dx + ctx.width) * 4];
    for (sp, dp) in s.chunks_exact(4).zip(d.chunks_exact_mut(4)) {
        let sv = read_pixel(sp, 4);
        let dv = read_pixel(dp, 4);
        let mut out = opaque;
        for shift in [0u32, 8, 16] {
            let c = blend((sv >> shift) & 0xff, (dv >> shift) & 0xff, a);
            out |= c << shift;
        }
        write_pixel(dp, 4, out);
    }
}

/// Direct color to direct color, per-surface alpha.
pub(super) fn n_to_n_surface_alpha(
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
    let a = sf.alpha as u32;
    for i in 0..ctx.width {
        let at = (sx + i) * sbpp;
        let pixel = read_pixel(&src[at..at + sbpp], sbpp);
        if keyed && is_key(ctx, pixel) {
            continue;
        }
        let out_at = (dx + i) * dbpp;
        let out = &mut dst[out_at..out_at + dbpp];
        let d = df.rgb_from_pixel(read_pixel(out, dbpp));
        let (r, g, b) = blend_rgb(sf.rgb_from_pixel(pixel), d, a);
        write_pixel(out, dbpp, df.pixel_from_rgba(r, g, b, 255));
    }
}

/// Direct color with an alpha channel over an indexed destination.
pub(super) fn n_to_1_pixel_alpha(
    ctx: &RowCtx<'_>,
    src: &[u8],
    sx: usize,
    dst: &mut [u8],
    dx: usize,
    keyed: bool,
) {
    let sf = ctx.src_fmt;
    let sbpp = sf.bytes_per_pixel as usize;
    let dbits = ctx.dst_fmt.bits_per_pixel;
    for i in 0..ctx.width {
        let at = (sx + i) * sbpp;
        let pixel = read_pixel(&src[at..at + sbpp], sbpp);
        if keyed && is_key(ctx, pixel) {
            continue;
        }
        let sa = sf.alpha_from_pixel(pixel);
        if sa == 0 {
            continue;
        }
        let s = sf.rgb_from_pixel(pixel);
        let (r, g, b) = if sa >= 255 {
            s
        } else {
            let d = palette_color(ctx, true, read_index(dst, dbits, dx + i));
            blend_rgb(s, d, sa)
        };
        write_index(dst, dbits, dx + i, remap_index(ctx, rgb332(r, g, b)));
    }
}

/// ARGB8888-style source over a 32-bit destination with the same color
/// layout.
pub(super) fn rgb_to_rgb_pixel_alpha(
    ctx: &RowCtx<'_>,
    src: &[u8],
    sx: usize,
    dst: &mut [u8],
    dx: usize,
) {
    let damask = ctx.dst_fmt.amask;
    let s = &src[sx * 4..(sx + ctx.width) * 4];
    let d = &mut dst[dx * 4..(dx + ctx.width) * 4];
    for (sp, dp) in s.chunks_exact(4).zip(d.chunks_exact_mut(4)) {
        let sv = read_pixel(sp, 4);
        let sa = sv >> 24;
        if sa == 0 {
            continue;
        }
        if sa == 255 {
            write_pixel(dp, 4, (sv & 0x00ff_ffff) | damask);
            continue;
        }
        let dv = read_pixel(dp, 4);
        let mut out = 0;
        for shift in [0u32, 8, 16] {
            out |= blend((sv >> shift) & 0xff, (dv >> shift) & 0xff, sa) << shift;
        }
        if damask != 0 {
            out |= coverage(sa, (dv & damask) >> damask.trailing_zeros()) << damask.trailing_zeros();
        }
        write_pixel(dp, 4, out);
    }
}

/// Direct color with an alpha channel to direct color.
pub(super) fn n_to_n_pixel_alpha(
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
    for i in 0..ctx.width {
        let at = (sx + i) * sbpp;
        let pixel = read_pixel(&src[at..at + sbpp], sbpp);
        if keyed && is_key(ctx, pixel) {
            continue;
        }
        let sa = sf.alpha_from_pixel(pixel).min(255);
        if sa == 0 {
            continue;
        }
        let (sr, sg, sb) = sf.rgb_from_pixel(pixel);
        let out_at = (dx + i) * dbpp;
        let out = &mut dst[out_at..out_at + dbpp];
        if sa == 255 {
            write_pixel(out, dbpp, df.pixel_from_rgba(sr, sg, sb, 255));
            continue;
        }
        let dv = read_pixel(out, dbpp);
        let (r, g, b) = blend_rgb((sr, sg, sb), df.rgb_from_pixel(dv), sa);
        let da = if df.amask != 0 {
            coverage(sa, df.alpha_from_pixel(dv).min(255))
        } else {
            255
        };
        write_pixel(out, dbpp, df.pixel_from_rgba(r, g, b, da));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pixels::PixelFormat;

    fn ctx<'a>(src_fmt: &'a PixelFormat, dst_fmt: &'a PixelFormat, width: usize) -> RowCtx<'a> {
        RowCtx {
            src_fmt,
            dst_fmt,
            table: None,
            width,
        }
    }

    #[test]
    fn test_blend() {
        assert_eq!(blend(255, 0, 128), 127);
        assert_eq!(blend(0, 255, 128), 127);
        assert_eq!(blend(200, 100, 0), 100);
        assert_eq!(blend(0, 200, 64), 150);
        assert_eq!(blend(200, 0, 64), 50);
        assert_eq!(blend(255, 0, 255), 255);
        assert_eq!(blend(0, 255, 255), 0);
    }

    #[test]
    fn test_opaque_surface_alpha_copies() {
        let mut sf = PixelFormat::xrgb8888();
        sf.alpha = 255;
        let df = PixelFormat::argb8888();
        let src: alloc::vec::Vec<u8> = [0x00FF_FFFFu32, 0x0012_3456]
            .iter()
            .flat_map(|p| p.to_le_bytes())
            .collect();
        let mut generic = alloc::vec![0u8; 8];
        n_to_n_surface_alpha(&ctx(&sf, &df, 2), &src, 0, &mut generic, 0, false);
        assert_eq!(read_pixel(&generic[0..4], 4), 0xFFFF_FFFF);
        assert_eq!(read_pixel(&generic[4..8], 4), 0xFF12_3456);
        let mut fast = alloc::vec![0u8; 8];
        rgb_to_rgb_surface_alpha(&ctx(&sf, &df, 2), &src, 0, &mut fast, 0);
        assert_eq!(fast, generic);
    }

    #[test]
    fn test_coverage() {
        assert_eq!(coverage(255, 0), 255);
        assert_eq!(coverage(0, 77), 77);
        assert_eq!(coverage(128, 128), 192);
    }

    #[test]
    fn test_surface_alpha_fast_path_matches_generic() {
        let mut sf = PixelFormat::xrgb8888();
        sf.alpha = 90;
        let df = PixelFormat::argb8888();
        let src: alloc::vec::Vec<u8> = [0x0012_3456u32, 0x00FF_00FF]
            .iter()
            .flat_map(|p| p.to_le_bytes())
            .collect();
        let init: alloc::vec::Vec<u8> = [0x8040_2010u32, 0xFF00_FF00]
            .iter()
            .flat_map(|p| p.to_le_bytes())
            .collect();

        let mut fast = init.clone();
        rgb_to_rgb_surface_alpha(&ctx(&sf, &df, 2), &src, 0, &mut fast, 0);
        let mut generic = init;
        n_to_n_surface_alpha(&ctx(&sf, &df, 2), &src, 0, &mut generic, 0, false);
        assert_eq!(fast, generic);
        assert_eq!(read_pixel(&fast[0..4], 4) >> 24, 0xFF);
    }

    #[test]
    fn test_pixel_alpha_fast_path_matches_generic() {
        let sf = PixelFormat::argb8888();
        let df = PixelFormat::argb8888();
        let src: alloc::vec::Vec<u8> = [0x00FF_FFFFu32, 0xFF12_3456, 0x80FF_0000, 0x4000_80FF]
            .iter()
            .flat_map(|p| p.to_le_bytes())
            .collect();
        let init: alloc::vec::Vec<u8> = [0x8010_2030u32, 0x0000_0000, 0x8000_0000, 0xFF40_4040]
            .iter()
            .flat_map(|p| p.to_le_bytes())
            .collect();

        let mut fast = init.clone();
        rgb_to_rgb_pixel_alpha(&ctx(&sf, &df, 4), &src, 0, &mut fast, 0);
        let mut generic = init;
        n_to_n_pixel_alpha(&ctx(&sf, &df, 4), &src, 0, &mut generic, 0, false);
        assert_eq!(fast, generic);

        // Transparent skipped, opaque copied.
        assert_eq!(read_pixel(&fast[0..4], 4), 0x8010_2030);
        assert_eq!(read_pixel(&fast[4..8], 4), 0xFF12_3456);
        // Half red over half-covered black.
        assert_eq!(read_pixel(&fast[8..12], 4), 0xC07F_0000);
    }

    #[test]
    fn test_keyed_pixel_alpha() {
        let mut sf = PixelFormat::argb8888();
        sf.colorkey = 0x0000_FF00;
        let df = PixelFormat::xrgb8888();
        let src = 0xFF00_FF00u32.to_le_bytes();
        let mut dst = 0x0011_2233u32.to_le_bytes();
        n_to_n_pixel_alpha(&ctx(&sf, &df, 1), &src, 0, &mut dst, 0, true);
        assert_eq!(u32::from_le_bytes(dst), 0x0011_2233);
    }
}
