//! Scaled blits.
//!
//! [`soft_stretch`] is the nearest-neighbour scaler for surfaces of one
//! format: rows and columns step through the source with a 16.16
//! accumulator. [`stretch_blit`] adds clipping, format conversion and
//! self-stretching on top, and a quality path that samples through an
//! inverted [`Transform`] with an optional bilinear filter.

use crate::blit::lower_blit_surfaces;
use crate::config::FIXED_ONE;
use crate::error::{report, GalError};
use crate::pixels::{read_pixel, write_pixel, PixelFormat};
use crate::rect::Rect;
use crate::surface::{Surface, SurfaceFlags, SurfaceRef};
use crate::tasks;

/// Sampling filter of the quality path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Filter {
    #[default]
    Nearest,
    /// Weighted average of the four nearest source pixels. Indexed formats
    /// fall back to nearest.
    Bilinear,
}

/// Extra placement applied around the destination rectangle's center:
/// the source is rotated, then scaled, then translated.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform {
    /// X translation in destination pixels
    pub translate_x: f32,
    /// Y translation in destination pixels
    pub translate_y: f32,
    /// Rotation in radians, clockwise in screen space
    pub rotation: f32,
    /// X scale on top of the rectangle ratio
    pub scale_x: f32,
    /// Y scale on top of the rectangle ratio
    pub scale_y: f32,
}

impl Default for Transform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Transform {
    /// Plain rectangle-to-rectangle scaling.
    pub const IDENTITY: Transform = Transform {
        translate_x: 0.0,
        translate_y: 0.0,
        rotation: 0.0,
        scale_x: 1.0,
        scale_y: 1.0,
    };

    pub fn translate(x: f32, y: f32) -> Self {
        Self {
            translate_x: x,
            translate_y: y,
            ..Self::IDENTITY
        }
    }

    pub fn scale(sx: f32, sy: f32) -> Self {
        Self {
            scale_x: sx,
            scale_y: sy,
            ..Self::IDENTITY
        }
    }

    pub fn rotate(radians: f32) -> Self {
        Self {
            rotation: radians,
            ..Self::IDENTITY
        }
    }

    pub fn is_identity(&self) -> bool {
        self.translate_x == 0.0
            && self.translate_y == 0.0
            && self.rotation == 0.0
            && self.scale_x == 1.0
            && self.scale_y == 1.0
    }
}

/// How [`stretch_blit`] samples.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct StretchOptions {
    pub filter: Filter,
    pub transform: Transform,
    /// Row bands to split the quality path into (1, 2, 4 or 8).
    pub tasks: usize,
}

impl StretchOptions {
    fn is_plain(&self) -> bool {
        self.filter == Filter::Nearest && self.transform.is_identity()
    }
}

/// Stretch `src_w` pixels of `N` bytes onto a `dst_w` pixel row, writing
/// only the pixels from column `skip` on that fit in `dst`.
fn stretch_row<const N: usize>(src: &[u8], src_w: usize, dst: &mut [u8], dst_w: usize, skip: usize) {
    let inc = ((src_w as u64) << 16) / dst_w as u64;
    let mut pos = FIXED_ONE as u64;
    let mut next = 0usize;
    let mut current = 0usize;
    let mut out = dst.chunks_exact_mut(N);
    for col in 0..dst_w {
        while pos >= FIXED_ONE as u64 {
            current = next;
            next += 1;
            pos -= FIXED_ONE as u64;
        }
        pos += inc;
        if col < skip {
            continue;
        }
        match out.next() {
            Some(px) => px.copy_from_slice(&src[current * N..current * N + N]),
            None => break,
        }
    }
}

fn check_inside(rect: &Rect, surface: &Surface) -> Result<(), GalError> {
    if rect.x < 0 || rect.y < 0 || !surface.bounds().contains_rect(rect) {
        return Err(report(GalError::InvalidRect));
    }
    Ok(())
}

/// Nearest-neighbour stretch between surfaces of the same depth.
///
/// Rectangles default to the whole surface and must lie inside it;
/// colorkey and alpha are ignored.
pub fn soft_stretch(
    src: &Surface,
    srcrect: Option<&Rect>,
    dst: &mut Surface,
    dstrect: Option<&Rect>,
) -> Result<(), GalError> {
    if src.format().bits_per_pixel != dst.format().bits_per_pixel {
        return Err(report(GalError::InvalidFormat(
            "stretching needs surfaces of the same format".into(),
        )));
    }
    if src.format().bits_per_pixel < 8 {
        return Err(report(GalError::Unsupported));
    }
    let sr = srcrect.copied().unwrap_or_else(|| src.bounds());
    let dr = dstrect.copied().unwrap_or_else(|| dst.bounds());
    check_inside(&sr, src)?;
    check_inside(&dr, dst)?;
    if sr.is_empty() || dr.is_empty() {
        return Ok(());
    }

    stretch_clipped(src, &sr, dst, &dr, &dr)
}

/// Nearest-neighbour stretch of `sr` onto `dr`, writing only the pixels
/// inside `area`. The accumulators start at the edges of `dr`, so a clipped
/// stretch picks the same source pixels as the unclipped one.
///
/// `sr` must lie inside `src` and `area` inside both `dr` and `dst`.
fn stretch_clipped(
    src: &Surface,
    sr: &Rect,
    dst: &mut Surface,
    dr: &Rect,
    area: &Rect,
) -> Result<(), GalError> {
    if sr.is_empty() || area.is_empty() {
        return Ok(());
    }
    dst.prepare_write();
    let bpp = dst.format().bytes_per_pixel as usize;
    let src_pitch = src.pitch() as usize;
    let dst_pitch = dst.pitch() as usize;
    let src_pixels = src.pixels();
    let dst_pixels = dst.pixels.bytes_mut().map_err(report)?;

    let (sw, dw) = (sr.width as usize, dr.width as usize);
    let skip = (area.x - dr.x) as usize;
    let inc = ((sr.height as u64) << 16) / dr.height as u64;
    let mut pos = FIXED_ONE as u64;
    let mut src_row = sr.y as usize;
    let mut row_start = 0usize;
    for dst_row in dr.y..area.bottom() {
        while pos >= FIXED_ONE as u64 {
            row_start = src_row * src_pitch + sr.x as usize * bpp;
            src_row += 1;
            pos -= FIXED_ONE as u64;
        }
        pos += inc;
        if dst_row < area.y {
            continue;
        }
        let s = &src_pixels[row_start..row_start + sw * bpp];
        let at = dst_row as usize * dst_pitch + area.x as usize * bpp;
        let d = &mut dst_pixels[at..at + area.width as usize * bpp];
        match bpp {
            1 => stretch_row::<1>(s, sw, d, dw, skip),
            2 => stretch_row::<2>(s, sw, d, dw, skip),
            3 => stretch_row::<3>(s, sw, d, dw, skip),
            _ => stretch_row::<4>(s, sw, d, dw, skip),
        }
    }
    dst.mark_dirty(area);
    Ok(())
}

/// Stretch `srcrect` of `src` onto `dstrect` of `dst`.
///
/// `None` rectangles mean the whole surface. Only pixels inside the
/// destination clip rectangle are written, sampled as if the whole of
/// `dstrect` were drawn. A surface may be stretched onto itself.
pub fn stretch_blit(
    src: &SurfaceRef,
    srcrect: Option<&Rect>,
    dst: &SurfaceRef,
    dstrect: Option<&Rect>,
    options: &StretchOptions,
) -> Result<(), GalError> {
    if src.ptr_eq(dst) {
        let mut s = src.lock();
        let sr = srcrect.copied().unwrap_or_else(|| s.bounds());
        let sr = match sr.intersection(&s.bounds()) {
            Some(r) => r,
            None => return Ok(()),
        };
        let mut copy = copy_region(&s, &sr)?;
        let full = copy.bounds();
        return stretch_blit_surfaces(&mut copy, Some(&full), &mut s, dstrect, options);
    }
    let (mut s, mut d) = if src.id() < dst.id() {
        let s = src.lock();
        (s, dst.lock())
    } else {
        let d = dst.lock();
        (src.lock(), d)
    };
    stretch_blit_surfaces(&mut s, srcrect, &mut d, dstrect, options)
}

/// [`stretch_blit`] on borrowed surfaces.
pub fn stretch_blit_surfaces(
    src: &mut Surface,
    srcrect: Option<&Rect>,
    dst: &mut Surface,
    dstrect: Option<&Rect>,
    options: &StretchOptions,
) -> Result<(), GalError> {
    let sr = srcrect.copied().unwrap_or_else(|| src.bounds());
    let sr = match sr.intersection(&src.bounds()) {
        Some(r) => r,
        None => return Ok(()),
    };
    let dr = dstrect.copied().unwrap_or_else(|| dst.bounds());
    if dr.is_empty() {
        return Ok(());
    }
    let cr = match dr.intersection(&dst.clip_rect()) {
        Some(r) => r,
        None => return Ok(()),
    };

    let keyed_or_blended = src
        .flags()
        .intersects(SurfaceFlags::SRCCOLORKEY | SurfaceFlags::SRCALPHA)
        || (src.flags().contains(SurfaceFlags::SRCPIXELALPHA) && src.format().amask != 0);
    let same_format = src.format().bits_per_pixel == dst.format().bits_per_pixel
        && src.format().layout_equals(dst.format())
        && src.format().palette == dst.format().palette;

    if same_format && !keyed_or_blended {
        if options.is_plain() {
            if src.format().bits_per_pixel < 8 {
                return Err(report(GalError::Unsupported));
            }
            return stretch_clipped(src, &sr, dst, &dr, &cr);
        }
        return quality_stretch(src, &sr, dst, &dr, &cr, options);
    }

    log::trace!(
        "gal: stretch {}x{} -> {}x{} through a {}-bit scratch surface",
        sr.width,
        sr.height,
        cr.width,
        cr.height,
        src.format().bits_per_pixel
    );
    let mut scratch = src.blank_like(cr.width, cr.height)?;
    let full = scratch.bounds();
    let placed = dr.offset(-cr.x, -cr.y);
    if options.is_plain() {
        if src.format().bits_per_pixel < 8 {
            return Err(report(GalError::Unsupported));
        }
        stretch_clipped(src, &sr, &mut scratch, &placed, &full)?;
        return lower_blit_surfaces(&mut scratch, &full, dst, &cr);
    }

    let inverse = match Inverse::new(&sr, &placed, &options.transform) {
        Some(inv) => inv,
        None => return Ok(()),
    };
    quality_stretch(src, &sr, &mut scratch, &placed, &full, options)?;
    // Scratch pixels mapping outside the source were never drawn.
    for y in 0..full.height as i32 {
        let mut x = 0;
        while x < full.width as i32 {
            if !inverse.covers(&sr, x, y) {
                x += 1;
                continue;
            }
            let start = x;
            while x < full.width as i32 && inverse.covers(&sr, x, y) {
                x += 1;
            }
            let run = Rect::new(start, y, (x - start) as u32, 1);
            lower_blit_surfaces(&mut scratch, &run, dst, &run.offset(cr.x, cr.y))?;
        }
    }
    Ok(())
}

/// Copy `rect` of `surface` into a new surface of the same format.
fn copy_region(surface: &Surface, rect: &Rect) -> Result<Surface, GalError> {
    let mut copy = surface.blank_like(rect.width, rect.height)?;
    let full = copy.bounds();
    soft_stretch(surface, Some(rect), &mut copy, Some(&full))?;
    Ok(copy)
}

/// Destination-to-source mapping of the quality path.
#[derive(Debug, Clone, Copy)]
struct Inverse {
    m00: f32,
    m01: f32,
    m10: f32,
    m11: f32,
    dst_cx: f32,
    dst_cy: f32,
    src_cx: f32,
    src_cy: f32,
}

impl Inverse {
    /// `None` when the transform collapses the image.
    fn new(sr: &Rect, dr: &Rect, t: &Transform) -> Option<Self> {
        let kx = t.scale_x * dr.width as f32 / sr.width as f32;
        let ky = t.scale_y * dr.height as f32 / sr.height as f32;
        if kx == 0.0 || ky == 0.0 || !kx.is_finite() || !ky.is_finite() {
            return None;
        }
        let cos = libm::cosf(t.rotation);
        let sin = libm::sinf(t.rotation);
        // Undo the scale, then rotate back.
        Some(Self {
            m00: cos / kx,
            m01: sin / ky,
            m10: -sin / kx,
            m11: cos / ky,
            dst_cx: dr.x as f32 + dr.width as f32 / 2.0 + t.translate_x,
            dst_cy: dr.y as f32 + dr.height as f32 / 2.0 + t.translate_y,
            src_cx: sr.x as f32 + sr.width as f32 / 2.0,
            src_cy: sr.y as f32 + sr.height as f32 / 2.0,
        })
    }

    /// Source position of the center of destination pixel (`x`, `y`).
    #[inline]
    fn map(&self, x: i32, y: i32) -> (f32, f32) {
        let vx = x as f32 + 0.5 - self.dst_cx;
        let vy = y as f32 + 0.5 - self.dst_cy;
        (
            self.m00 * vx + self.m01 * vy + self.src_cx,
            self.m10 * vx + self.m11 * vy + self.src_cy,
        )
    }

    /// Whether destination pixel (`x`, `y`) samples from inside `sr`.
    #[inline]
    fn covers(&self, sr: &Rect, x: i32, y: i32) -> bool {
        let (u, v) = self.map(x, y);
        inside(sr, u, v)
    }
}

#[inline]
fn inside(r: &Rect, u: f32, v: f32) -> bool {
    u >= r.x as f32 && v >= r.y as f32 && u < r.right() as f32 && v < r.bottom() as f32
}

/// Transform and filter path: `sr` maps onto `dr`, and only pixels inside
/// `area` are written. Destination pixels that map outside `sr` are left
/// untouched.
fn quality_stretch(
    src: &Surface,
    sr: &Rect,
    dst: &mut Surface,
    dr: &Rect,
    area: &Rect,
    options: &StretchOptions,
) -> Result<(), GalError> {
    let fmt = src.format();
    if fmt.bits_per_pixel < 8 || fmt.bits_per_pixel != dst.format().bits_per_pixel {
        return Err(report(GalError::Unsupported));
    }
    let inverse = match Inverse::new(sr, dr, &options.transform) {
        Some(inv) => inv,
        None => return Ok(()),
    };
    let filter = if fmt.is_indexed() {
        Filter::Nearest
    } else {
        options.filter
    };

    dst.prepare_write();
    let bpp = fmt.bytes_per_pixel as usize;
    let src_pitch = src.pitch() as usize;
    let dst_pitch = dst.pitch() as usize;
    let src_pixels = src.pixels();
    let sampler = Sampler {
        fmt,
        pixels: src_pixels,
        pitch: src_pitch,
        bpp,
        rect: *sr,
    };
    let dst_pixels = dst.pixels.bytes_mut().map_err(report)?;

    tasks::for_each_band(dst_pixels, dst_pitch, area, options.tasks, |band, rows| {
        for row in 0..band.height as usize {
            let y = band.y + row as i32;
            let line = &mut rows[row * dst_pitch..];
            for x in band.x..band.right() {
                let (u, v) = inverse.map(x, y);
                let pixel = match filter {
                    Filter::Nearest => sampler.nearest(u, v),
                    Filter::Bilinear => sampler.bilinear(u, v),
                };
                if let Some(p) = pixel {
                    let at = x as usize * bpp;
                    write_pixel(&mut line[at..at + bpp], bpp, p);
                }
            }
        }
    });
    dst.mark_dirty(area);
    Ok(())
}

struct Sampler<'a> {
    fmt: &'a PixelFormat,
    pixels: &'a [u8],
    pitch: usize,
    bpp: usize,
    rect: Rect,
}

impl Sampler<'_> {
    #[inline]
    fn at(&self, x: i32, y: i32) -> u32 {
        let off = y as usize * self.pitch + x as usize * self.bpp;
        read_pixel(&self.pixels[off..off + self.bpp], self.bpp)
    }

    fn nearest(&self, u: f32, v: f32) -> Option<u32> {
        if !inside(&self.rect, u, v) {
            return None;
        }
        Some(self.at(libm::floorf(u) as i32, libm::floorf(v) as i32))
    }

    fn bilinear(&self, u: f32, v: f32) -> Option<u32> {
        let r = &self.rect;
        if !inside(r, u, v) {
            return None;
        }
        let fu = u - 0.5;
        let fv = v - 0.5;
        let bx = libm::floorf(fu);
        let by = libm::floorf(fv);
        let wx = ((fu - bx) * 256.0) as u32;
        let wy = ((fv - by) * 256.0) as u32;
        let clamp_x = |x: i32| x.clamp(r.x, r.right() - 1);
        let clamp_y = |y: i32| y.clamp(r.y, r.bottom() - 1);
        let (x0, x1) = (clamp_x(bx as i32), clamp_x(bx as i32 + 1));
        let (y0, y1) = (clamp_y(by as i32), clamp_y(by as i32 + 1));

        let c00 = self.channels(self.at(x0, y0));
        let c10 = self.channels(self.at(x1, y0));
        let c01 = self.channels(self.at(x0, y1));
        let c11 = self.channels(self.at(x1, y1));
        let mut out = [0u32; 4];
        for i in 0..4 {
            let top = lerp(c00[i], c10[i], wx);
            let bottom = lerp(c01[i], c11[i], wx);
            out[i] = lerp(top, bottom, wy);
        }
        Some(self.fmt.pixel_from_rgba(out[0], out[1], out[2], out[3]))
    }

    #[inline]
    fn channels(&self, pixel: u32) -> [u32; 4] {
        let (r, g, b) = self.fmt.rgb_from_pixel(pixel);
        [r, g, b, self.fmt.alpha_from_pixel(pixel)]
    }
}

/// `a + (b - a) * w / 256` with `w` in 0..=256.
#[inline]
fn lerp(a: u32, b: u32, w: u32) -> u32 {
    (a * (256 - w) + b * w) >> 8
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec::Vec;

    fn rgb565(w: u32, h: u32) -> Surface {
        Surface::new(SurfaceFlags::empty(), w, h, 16, 0, 0, 0, 0).unwrap()
    }

    fn xrgb(w: u32, h: u32) -> Surface {
        Surface::new(SurfaceFlags::empty(), w, h, 32, 0xFF0000, 0xFF00, 0xFF, 0).unwrap()
    }

    fn numbered(w: u32, h: u32) -> Surface {
        let mut s = rgb565(w, h);
        for y in 0..h {
            for x in 0..w {
                s.put_pixel(x, y, y * w + x + 1).unwrap();
            }
        }
        s
    }

    fn dump(s: &Surface) -> Vec<u32> {
        (0..s.height())
            .flat_map(|y| (0..s.width()).map(move |x| (x, y)))
            .map(|(x, y)| s.get_pixel(x, y).unwrap())
            .collect()
    }

    #[test]
    fn test_stretch_row_doubles() {
        let src = [1u8, 2, 3];
        let mut dst = [0u8; 6];
        stretch_row::<1>(&src, 3, &mut dst, 6, 0);
        assert_eq!(dst, [1, 1, 2, 2, 3, 3]);

        let src = [1u8, 1, 1, 2, 2, 2];
        let mut dst = [0u8; 3];
        stretch_row::<3>(&src, 2, &mut dst, 1, 0);
        assert_eq!(dst, [1, 1, 1]);
    }

    #[test]
    fn test_soft_stretch_2x() {
        let src = numbered(2, 2);
        let mut dst = rgb565(4, 4);
        soft_stretch(&src, None, &mut dst, None).unwrap();
        assert_eq!(
            dump(&dst),
            [1, 1, 2, 2, 1, 1, 2, 2, 3, 3, 4, 4, 3, 3, 4, 4]
        );
        assert_eq!(dst.dirty_info().bounds(), Rect::new(0, 0, 4, 4));
    }

    #[test]
    fn test_soft_stretch_rejects() {
        let src = numbered(2, 2);
        let mut other = xrgb(4, 4);
        assert!(soft_stretch(&src, None, &mut other, None).is_err());
        let mut dst = rgb565(4, 4);
        assert_eq!(
            soft_stretch(&src, Some(&Rect::new(1, 1, 2, 2)), &mut dst, None),
            Err(GalError::InvalidRect)
        );
    }

    #[test]
    fn test_stretch_row_skips_leading_columns() {
        let src = [1u8, 2, 3];
        let mut full = [0u8; 7];
        stretch_row::<1>(&src, 3, &mut full, 7, 0);
        let mut tail = [0u8; 5];
        stretch_row::<1>(&src, 3, &mut tail, 7, 2);
        assert_eq!(tail, full[2..]);
    }

    #[test]
    fn test_clipped_stretch_keeps_ratio() {
        let mut src = numbered(3, 1);
        let mut whole = rgb565(7, 1);
        stretch_blit_surfaces(&mut src, None, &mut whole, None, &StretchOptions::default())
            .unwrap();
        let mut clipped = rgb565(7, 1);
        clipped.set_clip_rect(Some(Rect::new(1, 0, 6, 1)));
        stretch_blit_surfaces(&mut src, None, &mut clipped, None, &StretchOptions::default())
            .unwrap();
        let (whole, clipped) = (dump(&whole), dump(&clipped));
        assert_eq!(clipped[0], 0);
        assert_eq!(clipped[1..], whole[1..]);
        assert_eq!(whole.iter().filter(|&&p| p == 3).count(), 2);
    }

    #[test]
    fn test_stretch_blit_converts_format() {
        let mut src = xrgb(1, 1);
        src.put_pixel(0, 0, 0x00FF_0000).unwrap();
        let mut dst = rgb565(3, 2);
        stretch_blit_surfaces(&mut src, None, &mut dst, None, &StretchOptions::default()).unwrap();
        assert!(dump(&dst).iter().all(|&p| p == 0xF800));
    }

    #[test]
    fn test_stretch_blit_respects_clip() {
        let mut src = numbered(2, 2);
        let mut dst = rgb565(4, 4);
        dst.set_clip_rect(Some(Rect::new(2, 0, 2, 4)));
        stretch_blit_surfaces(&mut src, None, &mut dst, None, &StretchOptions::default()).unwrap();
        assert_eq!(dump(&dst), [0, 0, 2, 2, 0, 0, 2, 2, 0, 0, 4, 4, 0, 0, 4, 4]);
    }

    #[test]
    fn test_stretch_onto_itself() {
        let s = SurfaceRef::new(numbered(4, 4));
        stretch_blit(&s, Some(&Rect::new(0, 0, 2, 2)), &s, None, &StretchOptions::default())
            .unwrap();
        assert_eq!(
            dump(&s.lock()),
            [1, 1, 2, 2, 1, 1, 2, 2, 5, 5, 6, 6, 5, 5, 6, 6]
        );
    }

    #[test]
    fn test_quality_nearest_matches_fast_path() {
        let src = numbered(8, 8);
        let mut fast = rgb565(16, 16);
        soft_stretch(&src, None, &mut fast, None).unwrap();
        let mut slow = rgb565(16, 16);
        let options = StretchOptions {
            tasks: 4,
            ..Default::default()
        };
        let full = Rect::sized(16, 16);
        quality_stretch(&src, &src.bounds(), &mut slow, &full, &full, &options).unwrap();
        assert_eq!(dump(&fast), dump(&slow));
    }

    #[test]
    fn test_rotate_half_turn_mirrors() {
        let src = numbered(4, 4);
        let mut dst = rgb565(4, 4);
        let options = StretchOptions {
            transform: Transform::rotate(core::f32::consts::PI),
            tasks: 2,
            ..Default::default()
        };
        let full = dst.bounds();
        quality_stretch(&src, &src.bounds(), &mut dst, &full, &full, &options).unwrap();
        let mut expected = dump(&src);
        expected.reverse();
        assert_eq!(dump(&dst), expected);
    }

    #[test]
    fn test_rotated_convert_keeps_uncovered_pixels() {
        let mut src = xrgb(8, 8);
        src.fill_rect(None, 0x00FF_0000).unwrap();
        let mut dst = rgb565(16, 16);
        dst.fill_rect(None, 0xFFFF).unwrap();
        let options = StretchOptions {
            transform: Transform::rotate(core::f32::consts::FRAC_PI_4),
            ..Default::default()
        };
        stretch_blit_surfaces(&mut src, None, &mut dst, None, &options).unwrap();
        for (x, y) in [(0, 0), (15, 0), (0, 15), (15, 15)] {
            assert_eq!(dst.get_pixel(x, y), Some(0xFFFF));
        }
        assert_eq!(dst.get_pixel(8, 8), Some(0xF800));
        assert_eq!(dst.get_pixel(8, 0), Some(0xF800));
    }

    #[test]
    fn test_bilinear_ramp() {
        let mut src = xrgb(2, 1);
        src.put_pixel(1, 0, 0x00FF_FFFF).unwrap();
        let mut dst = xrgb(4, 1);
        let options = StretchOptions {
            filter: Filter::Bilinear,
            ..Default::default()
        };
        stretch_blit_surfaces(&mut src, None, &mut dst, None, &options).unwrap();
        let reds: Vec<u32> = dump(&dst).iter().map(|p| (p >> 16) & 0xFF).collect();
        assert_eq!(reds[0], 0);
        assert_eq!(reds[3], 255);
        assert!(reds[0] < reds[1] && reds[1] < reds[2] && reds[2] < reds[3]);
    }
}
