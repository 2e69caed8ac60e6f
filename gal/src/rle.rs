//! Run-length acceleration.
//!
//! An encoded surface keeps, per row, the spans of pixels a blit actually
//! has to touch: pixels other than the colorkey, or pixels with non-zero
//! alpha. Blits then skip the rest without testing each pixel. The pixel
//! memory itself is left as is, so decoding only drops the span lists.

use alloc::vec::Vec;

use crate::blit::{run_row, BlitRoutine, RowCtx};
use crate::error::GalError;
use crate::map::SoftBlit;
use crate::pixels::read_pixel;
use crate::rect::Rect;
use crate::surface::{Surface, SurfaceFlags};

/// What an encoding skips.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RleKind {
    /// Pixels equal to the colorkey (alpha bits ignored).
    ColorKey,
    /// Pixels with zero alpha.
    Alpha,
}

/// Visible spans of an encoded surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RleData {
    pub kind: RleKind,
    /// `(start, len)` spans per row, in increasing order.
    pub rows: Vec<Vec<(u32, u32)>>,
}

impl RleData {
    /// Number of visible pixels.
    pub fn visible(&self) -> u64 {
        self.rows
            .iter()
            .flat_map(|r| r.iter())
            .map(|&(_, len)| len as u64)
            .sum()
    }
}

/// Encode the visible spans of `surface`.
///
/// Only byte-addressed direct color formats are encoded; others fail and
/// the caller blits plain.
pub fn encode(surface: &Surface, kind: RleKind) -> Result<RleData, GalError> {
    let fmt = surface.format();
    if fmt.bytes_per_pixel < 2 {
        return Err(GalError::Unsupported);
    }
    if kind == RleKind::Alpha && fmt.amask == 0 {
        return Err(GalError::InvalidFormat("alpha encoding needs an alpha channel".into()));
    }

    let bpp = fmt.bytes_per_pixel as usize;
    let pitch = surface.pitch() as usize;
    let pixels = surface.pixels();
    let amask = fmt.amask;
    let key = fmt.colorkey & !amask;

    let mut rows = Vec::new();
    rows.try_reserve_exact(surface.height() as usize)
        .map_err(|_| GalError::OutOfMemory)?;
    for y in 0..surface.height() as usize {
        let row = &pixels[y * pitch..];
        let mut spans = Vec::new();
        let mut run: Option<u32> = None;
        for x in 0..surface.width() as usize {
            let p = read_pixel(&row[x * bpp..], bpp);
            let visible = match kind {
                RleKind::ColorKey => p & !amask != key,
                RleKind::Alpha => p & amask != 0,
            };
            match (visible, run) {
                (true, None) => run = Some(x as u32),
                (false, Some(start)) => {
                    spans.push((start, x as u32 - start));
                    run = None;
                }
                _ => {}
            }
        }
        if let Some(start) = run {
            spans.push((start, surface.width() - start));
        }
        rows.push(spans);
    }
    Ok(RleData { kind, rows })
}

/// Drop run-length data. A map that selected an RLE routine keeps the
/// same routine in its plain form.
pub fn unrle_surface(surface: &mut Surface) {
    surface.rle = None;
    surface.flags.remove(SurfaceFlags::RLEACCEL);
    if let Some(soft) = surface.map.sw_blit {
        surface.map.sw_blit = Some(SoftBlit::Plain(soft.routine()));
    }
}

/// Run `routine` over the visible spans of `sr`.
pub(crate) fn blit_spans(
    data: &RleData,
    routine: BlitRoutine,
    ctx: &RowCtx<'_>,
    src: &[u8],
    src_pitch: usize,
    sr: &Rect,
    dst: &mut [u8],
    dst_pitch: usize,
    dr: &Rect,
) {
    let x0 = sr.x as u32;
    let x1 = sr.right() as u32;
    for row in 0..sr.height as usize {
        let sy = sr.y as usize + row;
        let spans = match data.rows.get(sy) {
            Some(s) => s,
            None => continue,
        };
        let s = &src[sy * src_pitch..(sy + 1) * src_pitch];
        let dy = dr.y as usize + row;
        let d = &mut dst[dy * dst_pitch..(dy + 1) * dst_pitch];
        for &(start, len) in spans {
            let from = start.max(x0);
            let to = (start + len).min(x1);
            if from >= to {
                continue;
            }
            let span_ctx = RowCtx {
                width: (to - from) as usize,
                ..*ctx
            };
            let dx = dr.x as u32 + (from - x0);
            run_row(routine, &span_ctx, s, from as usize, d, dx as usize);
        }
    }
}
