//! Blitting.
//!
//! [`upper_blit`] clips and validates rectangles; [`lower_blit`] trusts them,
//! rebuilds the source's [`BlitMap`](crate::map::BlitMap) when it is stale
//! and runs the routine the map selected: the device's accelerated copy when
//! the source carries `HWACCEL`, otherwise a software row routine, optionally
//! over run-length spans.
//!
//! Blits from a surface onto itself are split into strips that never read
//! pixels an earlier strip has already written.

mod alpha;
mod copy;

pub(crate) use alpha::blend;

use alloc::vec;
use alloc::vec::Vec;

use crate::error::{report, GalError};
use crate::map::{self, DstDesc, MapTable, SoftBlit};
use crate::pixels::PixelFormat;
use crate::rect::Rect;
use crate::rle::{self, RleKind};
use crate::surface::{Surface, SurfaceFlags, SurfaceRef};
use crate::video::{HwBlitCheck, HwBlitRequest, VideoCaps};

/// Software blit routines.
///
/// Names read source family to destination family: `Bitmap` is a sub-byte
/// indexed source, `Index` an 8-bit indexed one, `N` any 2..=4 byte direct
/// color format and `1` an indexed destination. `key` enables the source
/// colorkey.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlitRoutine {
    /// Identical layouts, distinct surfaces.
    Copy,
    /// Identical layouts, source and destination in one surface.
    CopyOverlap,
    BitmapToIndex { key: bool },
    BitmapToN { key: bool },
    BitmapToNAlpha { key: bool },
    IndexToIndex { key: bool },
    IndexToN { key: bool },
    IndexToNAlpha { key: bool },
    NTo1 { key: bool },
    NToN { key: bool },
    NTo1SurfaceAlpha { key: bool },
    /// 32-bit, 0xffffff color layout on both sides, per-surface alpha.
    RgbToRgbSurfaceAlpha,
    NToNSurfaceAlpha { key: bool },
    NTo1PixelAlpha { key: bool },
    /// 32-bit with alpha in the top byte, per-pixel alpha.
    RgbToRgbPixelAlpha,
    NToNPixelAlpha { key: bool },
}

/// Per-row parameters shared by all routines.
#[derive(Clone, Copy)]
pub(crate) struct RowCtx<'a> {
    pub src_fmt: &'a PixelFormat,
    pub dst_fmt: &'a PixelFormat,
    pub table: Option<&'a MapTable>,
    /// Pixels to convert.
    pub width: usize,
}

/// Run `routine` over one row segment.
pub(crate) fn run_row(
    routine: BlitRoutine,
    ctx: &RowCtx<'_>,
    src: &[u8],
    sx: usize,
    dst: &mut [u8],
    dx: usize,
) {
    use BlitRoutine::*;
    match routine {
        Copy | CopyOverlap => copy::copy_row(ctx, src, sx, dst, dx),
        BitmapToIndex { key } | IndexToIndex { key } => {
            copy::index_to_index(ctx, src, sx, dst, dx, key)
        }
        BitmapToN { key } | IndexToN { key } => copy::index_to_n(ctx, src, sx, dst, dx, key),
        BitmapToNAlpha { key } | IndexToNAlpha { key } => {
            alpha::index_to_n_surface_alpha(ctx, src, sx, dst, dx, key)
        }
        NTo1 { key } => copy::n_to_1(ctx, src, sx, dst, dx, key),
        NToN { key } => copy::n_to_n(ctx, src, sx, dst, dx, key),
        NTo1SurfaceAlpha { key } => alpha::n_to_1_surface_alpha(ctx, src, sx, dst, dx, key),
        RgbToRgbSurfaceAlpha => alpha::rgb_to_rgb_surface_alpha(ctx, src, sx, dst, dx),
        NToNSurfaceAlpha { key } => alpha::n_to_n_surface_alpha(ctx, src, sx, dst, dx, key),
        NTo1PixelAlpha { key } => alpha::n_to_1_pixel_alpha(ctx, src, sx, dst, dx, key),
        RgbToRgbPixelAlpha => alpha::rgb_to_rgb_pixel_alpha(ctx, src, sx, dst, dx),
        NToNPixelAlpha { key } => alpha::n_to_n_pixel_alpha(ctx, src, sx, dst, dx, key),
    }
}

fn same_rgb_layout(a: &PixelFormat, b: &PixelFormat) -> bool {
    a.rmask == b.rmask && a.gmask == b.gmask && a.bmask == b.bmask
}

/// Pick the software routine for a non-copy blit.
fn select_routine(src: &Surface, dst: &DstDesc, key: bool, alpha: bool) -> Option<BlitRoutine> {
    use BlitRoutine::*;
    let sf = &src.format;
    let df = &dst.format;
    let to_index = df.bytes_per_pixel == 1;

    if sf.bits_per_pixel < 8 {
        return match (alpha, to_index) {
            (false, true) => Some(BitmapToIndex { key }),
            (false, false) => Some(BitmapToN { key }),
            (true, true) => None,
            (true, false) => Some(BitmapToNAlpha { key }),
        };
    }
    if sf.bytes_per_pixel == 1 {
        return match (alpha, to_index) {
            (false, true) => Some(IndexToIndex { key }),
            (false, false) => Some(IndexToN { key }),
            (true, true) => None,
            (true, false) => Some(IndexToNAlpha { key }),
        };
    }

    if !alpha {
        return Some(if to_index { NTo1 { key } } else { NToN { key } });
    }
    let rgb24 = (sf.rmask | sf.gmask | sf.bmask) == 0x00ff_ffff;
    let quad = sf.bytes_per_pixel == 4 && df.bytes_per_pixel == 4;
    if sf.amask == 0 || src.flags.contains(SurfaceFlags::SRCALPHA) {
        Some(if to_index {
            NTo1SurfaceAlpha { key }
        } else if !key && quad && rgb24 && same_rgb_layout(sf, df) {
            RgbToRgbSurfaceAlpha
        } else {
            NToNSurfaceAlpha { key }
        })
    } else {
        Some(if to_index {
            NTo1PixelAlpha { key }
        } else if !key && quad && rgb24 && sf.amask == 0xff00_0000 && same_rgb_layout(sf, df) {
            RgbToRgbPixelAlpha
        } else {
            NToNPixelAlpha { key }
        })
    }
}

/// Whether the destination's device can run this identity blit.
fn hw_eligible(src: &Surface, dst: &DstDesc, colorkey: bool, alpha: bool) -> bool {
    if !dst.flags.contains(SurfaceFlags::HWSURFACE) {
        return false;
    }
    let video = match &dst.video {
        Some(v) => v,
        None => return false,
    };

    let (copy, keyed, blend) = if src.flags.contains(SurfaceFlags::HWSURFACE) {
        match &src.video {
            Some(sv) if sv.same_device(video) => {}
            _ => return false,
        }
        (VideoCaps::HW_BLIT, VideoCaps::HW_BLIT_CC, VideoCaps::HW_BLIT_A)
    } else {
        (VideoCaps::SW_BLIT, VideoCaps::SW_BLIT_CC, VideoCaps::SW_BLIT_A)
    };
    let mut needed = copy;
    if colorkey {
        needed |= keyed;
    }
    if alpha {
        needed |= blend;
    }
    if !video.caps().contains(needed) {
        return false;
    }

    video.device().check_hw_blit(&HwBlitCheck {
        src: src.hw_desc(),
        dst: dst.hw,
        colorkey,
        alpha,
    })
}

/// Choose the hardware and software routines for `src` onto `dst`, and
/// run-length encode the source when that pays off.
pub(crate) fn calculate_blit(src: &mut Surface, dst: &DstDesc) -> Result<(), GalError> {
    if src.flags.contains(SurfaceFlags::RLEACCEL) {
        rle::unrle_surface(src);
    }
    src.map.sw_blit = None;
    src.map.hw_blit = false;
    src.flags.remove(SurfaceFlags::HWACCEL);

    let same = src.id() == dst.id;
    let colorkey = src.flags.contains(SurfaceFlags::SRCCOLORKEY);
    let surface_alpha = src.flags.contains(SurfaceFlags::SRCALPHA) && src.format.alpha != 255;
    let pixel_alpha = src.flags.contains(SurfaceFlags::SRCPIXELALPHA) && src.format.amask != 0;
    let alpha = !same && (surface_alpha || pixel_alpha);
    let uses_pixel_alpha = alpha && !surface_alpha && !src.flags.contains(SurfaceFlags::SRCALPHA);

    if src.map.identity && !uses_pixel_alpha && hw_eligible(src, dst, colorkey, alpha && surface_alpha) {
        src.flags.insert(SurfaceFlags::HWACCEL);
        src.map.hw_blit = true;
    }

    let routine = if src.map.identity && !colorkey && !alpha {
        Some(if same { BlitRoutine::CopyOverlap } else { BlitRoutine::Copy })
    } else {
        select_routine(src, dst, colorkey, alpha)
    };
    let routine = match routine {
        Some(r) => r,
        None => {
            src.flags.remove(SurfaceFlags::HWACCEL);
            src.map.hw_blit = false;
            src.map.invalidate();
            return Err(report(GalError::UnsupportedBlit));
        }
    };

    let mut soft = SoftBlit::Plain(routine);
    if src.flags.contains(SurfaceFlags::RLEACCELOK)
        && !src.flags.contains(SurfaceFlags::HWACCEL)
        && src.rle_allowed
        && !same
    {
        let kind = if src.map.identity && colorkey && (!alpha || src.format.amask == 0) {
            Some(RleKind::ColorKey)
        } else if !colorkey && uses_pixel_alpha {
            Some(RleKind::Alpha)
        } else {
            None
        };
        if let Some(kind) = kind {
            match rle::encode(src, kind) {
                Ok(data) => {
                    src.rle = Some(data);
                    src.flags.insert(SurfaceFlags::RLEACCEL);
                    soft = match kind {
                        RleKind::ColorKey => SoftBlit::Rle(routine),
                        RleKind::Alpha => SoftBlit::RleAlpha(routine),
                    };
                }
                Err(e) => log::debug!("gal: RLE encode of {:?} failed ({}), blitting plain", src.id(), e),
            }
        }
    }

    src.map.sw_blit = Some(soft);
    log::trace!(
        "gal: {:?} -> {:?} uses {:?}{}",
        src.id(),
        dst.id,
        soft,
        if src.map.hw_blit { " (hw)" } else { "" }
    );
    Ok(())
}

/// Clip a blit the way [`upper_blit`] does.
///
/// `dstrect` supplies the destination origin and receives the final
/// position and size. Returns the matching source rectangle, or `None`
/// (with a zero-size `dstrect`) when nothing is left.
pub fn clip_blit(
    src_bounds: &Rect,
    srcrect: Option<&Rect>,
    dst_clip: &Rect,
    dstrect: &mut Rect,
) -> Option<Rect> {
    let mut dx = dstrect.x as i64;
    let mut dy = dstrect.y as i64;
    let (mut sx, mut sy, mut w, mut h) = match srcrect {
        None => (0i64, 0i64, src_bounds.width as i64, src_bounds.height as i64),
        Some(r) => {
            let (mut sx, mut sy) = (r.x as i64, r.y as i64);
            let (mut w, mut h) = (r.width as i64, r.height as i64);
            if sx < 0 {
                w += sx;
                dx -= sx;
                sx = 0;
            }
            w = w.min(src_bounds.width as i64 - sx);
            if sy < 0 {
                h += sy;
                dy -= sy;
                sy = 0;
            }
            h = h.min(src_bounds.height as i64 - sy);
            (sx, sy, w, h)
        }
    };

    let trim = dst_clip.x as i64 - dx;
    if trim > 0 {
        w -= trim;
        dx += trim;
        sx += trim;
    }
    let trim = dx + w - dst_clip.right() as i64;
    if trim > 0 {
        w -= trim;
    }
    let trim = dst_clip.y as i64 - dy;
    if trim > 0 {
        h -= trim;
        dy += trim;
        sy += trim;
    }
    let trim = dy + h - dst_clip.bottom() as i64;
    if trim > 0 {
        h -= trim;
    }

    dstrect.x = dx as i32;
    dstrect.y = dy as i32;
    if w > 0 && h > 0 {
        dstrect.width = w as u32;
        dstrect.height = h as u32;
        Some(Rect::new(sx as i32, sy as i32, w as u32, h as u32))
    } else {
        dstrect.width = 0;
        dstrect.height = 0;
        None
    }
}

/// Clip and blit between two surfaces.
///
/// `srcrect` defaults to the whole source, `dstrect` to the origin; only the
/// position of `dstrect` is read, and it receives the rectangle actually
/// drawn. Blits that clip away entirely succeed with a zero-size `dstrect`.
pub fn upper_blit(
    src: &SurfaceRef,
    srcrect: Option<&Rect>,
    dst: &SurfaceRef,
    dstrect: Option<&mut Rect>,
) -> Result<(), GalError> {
    let mut origin = Rect::new(0, 0, 0, 0);
    let dr = dstrect.unwrap_or(&mut origin);

    if src.ptr_eq(dst) {
        let mut s = src.lock();
        return match clip_blit(&s.bounds(), srcrect, &s.clip_rect(), dr) {
            Some(sr) => blit_self(&mut s, &sr, dr),
            None => Ok(()),
        };
    }
    with_pair(src, dst, |s, d| match clip_blit(&s.bounds(), srcrect, &d.clip_rect(), dr) {
        Some(sr) => lower_blit_surfaces(s, &sr, d, dr),
        None => Ok(()),
    })
}

/// [`upper_blit`] on surfaces the caller already holds.
pub fn upper_blit_surfaces(
    src: &mut Surface,
    srcrect: Option<&Rect>,
    dst: &mut Surface,
    dstrect: Option<&mut Rect>,
) -> Result<(), GalError> {
    let mut origin = Rect::new(0, 0, 0, 0);
    let dr = dstrect.unwrap_or(&mut origin);
    match clip_blit(&src.bounds(), srcrect, &dst.clip_rect(), dr) {
        Some(sr) => lower_blit_surfaces(src, &sr, dst, dr),
        None => Ok(()),
    }
}

/// Blit already-clipped, equally sized rectangles.
pub fn lower_blit(
    src: &SurfaceRef,
    srcrect: &Rect,
    dst: &SurfaceRef,
    dstrect: &Rect,
) -> Result<(), GalError> {
    if src.ptr_eq(dst) {
        let mut s = src.lock();
        return blit_self(&mut s, srcrect, dstrect);
    }
    with_pair(src, dst, |s, d| lower_blit_surfaces(s, srcrect, d, dstrect))
}

/// Lock two distinct surfaces in id order and run `f`.
fn with_pair<R>(
    src: &SurfaceRef,
    dst: &SurfaceRef,
    f: impl FnOnce(&mut Surface, &mut Surface) -> R,
) -> R {
    if src.id() < dst.id() {
        let mut s = src.lock();
        let mut d = dst.lock();
        f(&mut s, &mut d)
    } else {
        let mut d = dst.lock();
        let mut s = src.lock();
        f(&mut s, &mut d)
    }
}

fn check_rects(src: &Surface, sr: &Rect, dst_bounds: &Rect, dr: &Rect) -> Result<(), GalError> {
    if sr.width != dr.width
        || sr.height != dr.height
        || !src.bounds().contains_rect(sr)
        || !dst_bounds.contains_rect(dr)
    {
        return Err(report(GalError::InvalidRect));
    }
    Ok(())
}

fn ensure_map(src: &mut Surface, dst: &DstDesc) -> Result<(), GalError> {
    if !src.map.is_valid_for(dst.id, dst.version) {
        map::map_surface(src, dst)?;
    }
    Ok(())
}

/// [`lower_blit`] on surfaces the caller already holds.
pub fn lower_blit_surfaces(
    src: &mut Surface,
    sr: &Rect,
    dst: &mut Surface,
    dr: &Rect,
) -> Result<(), GalError> {
    if sr.is_empty() {
        return Ok(());
    }
    check_rects(src, sr, &dst.bounds(), dr)?;
    if !src.map.is_valid_for(dst.id(), dst.format_version()) {
        ensure_map(src, &DstDesc::of(dst))?;
    }
    dst.prepare_write();

    if src.map.hw_blit && src.flags.contains(SurfaceFlags::HWACCEL) {
        match hw_blit(src, sr, dst, dr) {
            Ok(()) => {
                dst.mark_dirty(dr);
                return Ok(());
            }
            Err(e) => log::warn!("gal: hardware blit failed ({}), using software", e),
        }
    }

    let soft = src.map.sw_blit.ok_or_else(|| report(GalError::UnsupportedBlit))?;
    let spitch = src.pitch() as usize;
    let dpitch = dst.pitch() as usize;
    let ctx = RowCtx {
        src_fmt: &src.format,
        dst_fmt: &dst.format,
        table: src.map.table.as_ref(),
        width: sr.width as usize,
    };
    let src_bytes = src.pixels.bytes();
    let dst_bytes = dst.pixels.bytes_mut().map_err(report)?;

    match (soft, src.rle.as_ref()) {
        (SoftBlit::Rle(routine) | SoftBlit::RleAlpha(routine), Some(data)) => {
            rle::blit_spans(data, routine, &ctx, src_bytes, spitch, sr, dst_bytes, dpitch, dr);
        }
        _ => {
            let routine = soft.routine();
            for row in 0..sr.height as usize {
                let s = (sr.y as usize + row) * spitch;
                let d = (dr.y as usize + row) * dpitch;
                run_row(
                    routine,
                    &ctx,
                    &src_bytes[s..s + spitch],
                    sr.x as usize,
                    &mut dst_bytes[d..d + dpitch],
                    dr.x as usize,
                );
            }
        }
    }

    dst.mark_dirty(dr);
    Ok(())
}

/// Hand a blit to the device. `src` and `dst` may be one surface.
fn hw_blit(src: &Surface, sr: &Rect, dst: &Surface, dr: &Rect) -> Result<(), GalError> {
    let video = dst.video.as_ref().ok_or(GalError::Unsupported)?;
    let src_desc = src.hw_desc();
    let amask = src.format.amask;
    let request = HwBlitRequest {
        src: src_desc,
        src_pixels: if src_desc.handle.is_none() {
            Some(src.pixels.bytes())
        } else {
            None
        },
        src_rect: *sr,
        dst: dst.hw_desc(),
        dst_rect: *dr,
        colorkey: if src.flags.contains(SurfaceFlags::SRCCOLORKEY) {
            Some((src.format.colorkey & !amask, amask))
        } else {
            None
        },
        alpha: if src.flags.contains(SurfaceFlags::SRCALPHA) && src.format.alpha != 255 {
            Some(src.format.alpha)
        } else {
            None
        },
    };
    video.device().hw_blit(&request)
}

/// Split a same-surface blit into strips whose sources are never written by
/// an earlier strip.
pub(crate) fn overlap_strips(sr: &Rect, dr: &Rect) -> Vec<(Rect, Rect)> {
    let inter = match sr.intersection(dr) {
        Some(i) => i,
        None => return vec![(*sr, *dr)],
    };
    if dr.y <= sr.y && dr.x <= sr.x {
        return vec![(*sr, *dr)];
    }

    let mut strips = Vec::new();
    let vertical = dr.y != sr.y && (dr.x == sr.x || inter.height <= inter.width);
    if vertical {
        let total = sr.height as i32;
        let mut delta = total - inter.height as i32;
        let mut push = |y: i32, h: i32| {
            strips.push((
                Rect::new(sr.x, sr.y + y, sr.width, h as u32),
                Rect::new(dr.x, dr.y + y, dr.width, h as u32),
            ));
        };
        if dr.y > sr.y {
            let mut y = total;
            while y > 0 {
                delta = delta.min(y);
                push(y - delta, delta);
                y -= delta;
            }
        } else {
            let mut y = 0;
            while y < total {
                delta = delta.min(total - y);
                push(y, delta);
                y += delta;
            }
        }
    } else {
        let total = sr.width as i32;
        let mut delta = total - inter.width as i32;
        let mut push = |x: i32, w: i32| {
            strips.push((
                Rect::new(sr.x + x, sr.y, w as u32, sr.height),
                Rect::new(dr.x + x, dr.y, w as u32, dr.height),
            ));
        };
        if dr.x > sr.x {
            let mut x = total;
            while x > 0 {
                delta = delta.min(x);
                push(x - delta, delta);
                x -= delta;
            }
        } else {
            let mut x = 0;
            while x < total {
                delta = delta.min(total - x);
                push(x, delta);
                x += delta;
            }
        }
    }
    strips
}

/// Blit within one surface.
pub(crate) fn blit_self(s: &mut Surface, sr: &Rect, dr: &Rect) -> Result<(), GalError> {
    if sr.is_empty() {
        return Ok(());
    }
    let bounds = s.bounds();
    check_rects(s, sr, &bounds, dr)?;
    let desc = DstDesc::of(s);
    ensure_map(s, &desc)?;
    s.prepare_write();

    for (strip_src, strip_dst) in overlap_strips(sr, dr) {
        if s.map.hw_blit && s.flags.contains(SurfaceFlags::HWACCEL) {
            match hw_blit(s, &strip_src, s, &strip_dst) {
                Ok(()) => continue,
                Err(e) => log::warn!("gal: hardware self-blit failed ({}), using software", e),
            }
        }
        blit_self_strip(s, &strip_src, &strip_dst)?;
    }

    s.mark_dirty(dr);
    Ok(())
}

fn blit_self_strip(s: &mut Surface, sr: &Rect, dr: &Rect) -> Result<(), GalError> {
    let routine = s
        .map
        .sw_blit
        .map(|b| b.routine())
        .ok_or_else(|| report(GalError::UnsupportedBlit))?;
    let pitch = s.pitch() as usize;
    let rows = sr.height as usize;
    let bottom_up = dr.y > sr.y;
    let order = (0..rows).map(|i| if bottom_up { rows - 1 - i } else { i });

    let bits = s.format.bits_per_pixel;
    let bpp = s.format.bytes_per_pixel as usize;
    let ctx = RowCtx {
        src_fmt: &s.format,
        dst_fmt: &s.format,
        table: s.map.table.as_ref(),
        width: sr.width as usize,
    };
    let bytes = s.pixels.bytes_mut().map_err(report)?;

    if routine == BlitRoutine::CopyOverlap && bits >= 8 {
        let len = sr.width as usize * bpp;
        for row in order {
            let from = (sr.y as usize + row) * pitch + sr.x as usize * bpp;
            let to = (dr.y as usize + row) * pitch + dr.x as usize * bpp;
            bytes.copy_within(from..from + len, to);
        }
        return Ok(());
    }

    let mut scratch = vec![0u8; pitch];
    for row in order {
        let from = (sr.y as usize + row) * pitch;
        let to = (dr.y as usize + row) * pitch;
        scratch.copy_from_slice(&bytes[from..from + pitch]);
        run_row(
            routine,
            &ctx,
            &scratch,
            sr.x as usize,
            &mut bytes[to..to + pitch],
            dr.x as usize,
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pixels::Color;
    use crate::surface::SurfaceFlags as F;

    fn argb(w: u32, h: u32) -> Surface {
        Surface::new(F::empty(), w, h, 32, 0x00FF_0000, 0x0000_FF00, 0x0000_00FF, 0xFF00_0000)
            .unwrap()
    }

    fn xrgb(w: u32, h: u32) -> Surface {
        Surface::new(F::empty(), w, h, 32, 0x00FF_0000, 0x0000_FF00, 0x0000_00FF, 0).unwrap()
    }

    fn fill_pattern(s: &mut Surface) {
        for y in 0..s.height() {
            for x in 0..s.width() {
                s.put_pixel(x, y, (y << 8) | x | 0x0040_0000).unwrap();
            }
        }
    }

    #[test]
    fn test_clip_negative_source_origin() {
        let mut dr = Rect::new(10, 10, 0, 0);
        let sr = clip_blit(
            &Rect::sized(20, 20),
            Some(&Rect::new(-5, -3, 10, 10)),
            &Rect::sized(100, 100),
            &mut dr,
        )
        .unwrap();
        assert_eq!(sr, Rect::new(0, 0, 5, 7));
        assert_eq!(dr, Rect::new(15, 13, 5, 7));
    }

    #[test]
    fn test_clip_against_destination_clip() {
        let mut dr = Rect::new(-4, 6, 0, 0);
        let sr = clip_blit(&Rect::sized(10, 10), None, &Rect::new(0, 0, 8, 8), &mut dr).unwrap();
        assert_eq!(sr, Rect::new(4, 0, 6, 2));
        assert_eq!(dr, Rect::new(0, 6, 6, 2));
        assert_eq!((sr.width, sr.height), (dr.width, dr.height));
    }

    #[test]
    fn test_clip_empty() {
        let mut dr = Rect::new(50, 50, 3, 3);
        assert!(clip_blit(&Rect::sized(10, 10), None, &Rect::sized(20, 20), &mut dr).is_none());
        assert_eq!((dr.width, dr.height), (0, 0));
    }

    #[test]
    fn test_identity_blit_copies_bytes() {
        let src = SurfaceRef::new(xrgb(6, 5));
        fill_pattern(&mut src.lock());
        let dst = SurfaceRef::new(xrgb(6, 5));

        upper_blit(&src, None, &dst, None).unwrap();
        assert_eq!(src.lock().pixels(), dst.lock().pixels());
        assert_eq!(src.lock().blit_map().soft_blit(), Some(SoftBlit::Plain(BlitRoutine::Copy)));
        assert!(src.lock().blit_map().identity());
    }

    #[test]
    fn test_blit_outside_is_noop() {
        let src = SurfaceRef::new(xrgb(4, 4));
        let dst = SurfaceRef::new(xrgb(4, 4));
        let mut dr = Rect::new(10, 10, 0, 0);
        upper_blit(&src, None, &dst, Some(&mut dr)).unwrap();
        assert_eq!((dr.width, dr.height), (0, 0));
        assert!(dst.lock().dirty_info().is_empty());
    }

    #[test]
    fn test_only_clip_rect_changes() {
        let src = SurfaceRef::new(xrgb(8, 8));
        src.lock().fill_rect(None, 0x00FF_FFFF).unwrap();
        let dst = SurfaceRef::new(xrgb(8, 8));
        dst.lock().set_clip_rect(Some(Rect::new(2, 3, 3, 2)));

        upper_blit(&src, None, &dst, None).unwrap();
        let d = dst.lock();
        for y in 0..8 {
            for x in 0..8 {
                let inside = (2..5).contains(&x) && (3..5).contains(&y);
                assert_eq!(d.get_pixel(x, y), Some(if inside { 0x00FF_FFFF } else { 0 }));
            }
        }
    }

    #[test]
    fn test_map_reused_until_palette_changes() {
        let src = SurfaceRef::new(
            Surface::new(F::empty(), 4, 4, 8, 0, 0, 0, 0).unwrap(),
        );
        let dst = SurfaceRef::new(Surface::new(F::empty(), 4, 4, 8, 0, 0, 0, 0).unwrap());
        src.lock().set_colors(0, &[Color::new(10, 20, 30)]);

        upper_blit(&src, None, &dst, None).unwrap();
        let version = src.lock().blit_map().format_version();
        upper_blit(&src, None, &dst, None).unwrap();
        assert_eq!(src.lock().blit_map().format_version(), version);
        assert_eq!(version, dst.lock().format_version());

        dst.lock().set_colors(0, &[Color::new(1, 1, 1)]);
        upper_blit(&src, None, &dst, None).unwrap();
        assert_eq!(src.lock().blit_map().format_version(), dst.lock().format_version());
        assert_ne!(src.lock().blit_map().format_version(), version);
    }

    #[test]
    fn test_half_alpha_red_on_black() {
        let src = SurfaceRef::new(xrgb(8, 8));
        let dst = SurfaceRef::new(xrgb(8, 8));
        {
            let mut s = src.lock();
            s.fill_rect(None, 0x00FF_0000).unwrap();
            s.set_alpha(F::SRCALPHA, 128).unwrap();
        }
        upper_blit(&src, None, &dst, None).unwrap();
        let d = dst.lock();
        for y in 0..8 {
            for x in 0..8 {
                let p = d.get_pixel(x, y).unwrap();
                assert_eq!(d.format().get_rgb(p), (127, 0, 0));
            }
        }
    }

    #[test]
    fn test_opaque_alpha_is_copy() {
        let mut src = xrgb(3, 3);
        fill_pattern(&mut src);
        src.set_alpha(F::SRCALPHA, 255).unwrap();
        let mut dst = xrgb(3, 3);
        dst.fill_rect(None, 0x0012_3456).unwrap();
        upper_blit_surfaces(&mut src, None, &mut dst, None).unwrap();
        assert_eq!(src.pixels(), dst.pixels());
    }

    #[test]
    fn test_opaque_surface_alpha_over_alpha_channel() {
        let mut src = argb(2, 1);
        src.put_pixel(0, 0, 0x00FF_FFFF).unwrap();
        src.put_pixel(1, 0, 0x0012_3456).unwrap();
        src.set_alpha(F::SRCPIXELALPHA, 0).unwrap();
        src.set_alpha(F::SRCALPHA, 255).unwrap();
        assert!(src.flags().contains(F::SRCALPHA | F::SRCPIXELALPHA));
        let mut dst = xrgb(2, 1);
        upper_blit_surfaces(&mut src, None, &mut dst, None).unwrap();
        assert_eq!(dst.get_pixel(0, 0), Some(0x00FF_FFFF));
        assert_eq!(dst.get_pixel(1, 0), Some(0x0012_3456));
    }

    #[test]
    fn test_pixel_alpha_extremes() {
        let mut src = argb(2, 1);
        src.put_pixel(0, 0, 0x0011_2233).unwrap();
        src.put_pixel(1, 0, 0xFF44_5566).unwrap();
        let mut dst = xrgb(2, 1);
        dst.fill_rect(None, 0x0099_9999).unwrap();
        upper_blit_surfaces(&mut src, None, &mut dst, None).unwrap();
        assert_eq!(dst.get_pixel(0, 0), Some(0x0099_9999));
        assert_eq!(dst.get_pixel(1, 0), Some(0x0044_5566));
        assert_eq!(
            src.blit_map().soft_blit().map(|b| b.routine()),
            Some(BlitRoutine::RgbToRgbPixelAlpha)
        );
    }

    #[test]
    fn test_colorkey_skips_pixels() {
        let mut src = Surface::new(F::empty(), 4, 1, 16, 0, 0, 0, 0).unwrap();
        src.put_pixel(1, 0, 0xF800).unwrap();
        src.put_pixel(2, 0, 0x07E0).unwrap();
        src.set_color_key(F::SRCCOLORKEY, 0).unwrap();
        let mut dst = xrgb(4, 1);
        dst.fill_rect(None, 0x0000_00FF).unwrap();
        upper_blit_surfaces(&mut src, None, &mut dst, None).unwrap();
        assert_eq!(dst.get_pixel(0, 0), Some(0x0000_00FF));
        assert_eq!(dst.get_pixel(1, 0), Some(0x00F8_0000));
        assert_eq!(dst.get_pixel(2, 0), Some(0x0000_FC00));
        assert_eq!(dst.get_pixel(3, 0), Some(0x0000_00FF));
    }

    #[test]
    fn test_palette_to_direct() {
        let mut src = Surface::new(F::empty(), 2, 1, 8, 0, 0, 0, 0).unwrap();
        src.set_colors(0, &[Color::new(255, 0, 0), Color::new(0, 255, 0)]);
        src.put_pixel(1, 0, 1).unwrap();
        let mut dst = Surface::new(F::empty(), 2, 1, 16, 0, 0, 0, 0).unwrap();
        upper_blit_surfaces(&mut src, None, &mut dst, None).unwrap();
        assert_eq!(dst.get_pixel(0, 0), Some(0xF800));
        assert_eq!(dst.get_pixel(1, 0), Some(0x07E0));
    }

    #[test]
    fn test_direct_to_dithered_palette() {
        let mut src = xrgb(3, 1);
        src.put_pixel(0, 0, 0x00FF_0000).unwrap();
        src.put_pixel(1, 0, 0x0000_FF00).unwrap();
        src.put_pixel(2, 0, 0x00FF_FFFF).unwrap();
        let mut dst = Surface::new(F::empty(), 3, 1, 8, 0, 0, 0, 0).unwrap();
        dst.format.set_dithered_palette();
        upper_blit_surfaces(&mut src, None, &mut dst, None).unwrap();
        assert_eq!(dst.get_pixel(0, 0), Some(0xE0));
        assert_eq!(dst.get_pixel(1, 0), Some(0x1C));
        assert_eq!(dst.get_pixel(2, 0), Some(0xFF));
        assert!(!src.blit_map().identity());
    }

    #[test]
    fn test_unsupported_combination() {
        let mut src = Surface::new(F::empty(), 2, 2, 8, 0, 0, 0, 0).unwrap();
        src.set_alpha(F::SRCALPHA, 100).unwrap();
        let mut dst = Surface::new(F::empty(), 2, 2, 8, 0, 0, 0, 0).unwrap();
        let err = upper_blit_surfaces(&mut src, None, &mut dst, None).unwrap_err();
        assert_eq!(err, GalError::UnsupportedBlit);
        assert!(src.blit_map().dst().is_none());
    }

    #[test]
    fn test_overlap_strips_cover_rect() {
        let cases = [
            (Rect::new(0, 0, 10, 10), Rect::new(3, 2, 10, 10)),
            (Rect::new(5, 5, 10, 10), Rect::new(3, 8, 10, 10)),
            (Rect::new(0, 0, 10, 4), Rect::new(0, 1, 10, 4)),
            (Rect::new(0, 0, 10, 4), Rect::new(2, 0, 10, 4)),
            (Rect::new(2, 2, 4, 9), Rect::new(2, 0, 4, 9)),
        ];
        for (sr, dr) in cases {
            let strips = overlap_strips(&sr, &dr);
            let area: u64 = strips.iter().map(|(s, _)| s.area()).sum();
            assert_eq!(area, sr.area());
            for (s, d) in &strips {
                assert_eq!(d.x - s.x, dr.x - sr.x);
                assert_eq!(d.y - s.y, dr.y - sr.y);
            }
        }
        assert_eq!(overlap_strips(&Rect::new(4, 4, 2, 2), &Rect::new(0, 0, 2, 2)).len(), 1);
    }

    fn reference_move(before: &[u32], w: usize, sr: &Rect, dr: &Rect) -> Vec<u32> {
        let mut out = before.to_vec();
        for y in 0..sr.height as usize {
            for x in 0..sr.width as usize {
                let s = (sr.y as usize + y) * w + sr.x as usize + x;
                let d = (dr.y as usize + y) * w + dr.x as usize + x;
                out[d] = before[s];
            }
        }
        out
    }

    #[test]
    fn test_overlapping_self_blit_matches_copy() {
        let cases = [
            (Rect::new(0, 0, 8, 8), Rect::new(2, 3, 8, 8)),
            (Rect::new(3, 3, 8, 8), Rect::new(0, 1, 8, 8)),
            (Rect::new(1, 1, 9, 4), Rect::new(4, 1, 9, 4)),
            (Rect::new(2, 5, 6, 6), Rect::new(5, 2, 6, 6)),
            (Rect::new(0, 2, 12, 5), Rect::new(0, 6, 12, 5)),
        ];
        for (sr, dr) in cases {
            for depth in [16u8, 32] {
                let mut s = Surface::new(F::empty(), 14, 12, depth, 0, 0, 0, 0).unwrap();
                for y in 0..12 {
                    for x in 0..14 {
                        s.put_pixel(x, y, y * 14 + x + 1).unwrap();
                    }
                }
                let before: Vec<u32> = (0..12)
                    .flat_map(|y| (0..14).map(move |x| (x, y)))
                    .map(|(x, y)| s.get_pixel(x, y).unwrap())
                    .collect();
                let surface = SurfaceRef::new(s);
                let mut out = dr;
                upper_blit(&surface, Some(&sr), &surface, Some(&mut out)).unwrap();

                let expected = reference_move(&before, 14, &sr, &dr);
                let s = surface.lock();
                let after: Vec<u32> = (0..12)
                    .flat_map(|y| (0..14).map(move |x| (x, y)))
                    .map(|(x, y)| s.get_pixel(x, y).unwrap())
                    .collect();
                assert_eq!(after, expected, "{:?} -> {:?} at {} bpp", sr, dr, depth);
            }
        }
    }

    #[test]
    fn test_self_blit_uses_overlap_copy() {
        let s = SurfaceRef::new(xrgb(4, 4));
        upper_blit(&s, Some(&Rect::new(0, 0, 2, 2)), &s, Some(&mut Rect::new(1, 1, 0, 0))).unwrap();
        assert_eq!(
            s.lock().blit_map().soft_blit(),
            Some(SoftBlit::Plain(BlitRoutine::CopyOverlap))
        );
    }

    #[test]
    fn test_lower_blit_rejects_bad_rects() {
        let a = SurfaceRef::new(xrgb(4, 4));
        let b = SurfaceRef::new(xrgb(4, 4));
        let err = lower_blit(&a, &Rect::new(2, 2, 4, 4), &b, &Rect::new(0, 0, 4, 4)).unwrap_err();
        assert_eq!(err, GalError::InvalidRect);
    }
}
