//! Blit maps.
//!
//! A [`BlitMap`] caches, per source surface, how its pixels translate into
//! one destination: whether the representations are bit-identical, an
//! optional color remap table, and the routine chosen for the current
//! colorkey/alpha mode. The map stays valid while the destination's id and
//! format version match what was recorded at build time.

use alloc::vec::Vec;

use crate::blit::{self, BlitRoutine};
use crate::error::GalError;
use crate::pixels::{Palette, PixelFormat, ALPHA_OPAQUE};
use crate::rle;
use crate::surface::{Surface, SurfaceFlags, SurfaceId};
use crate::video::{HwSurfaceDesc, VideoHandle};

/// Format version stamped on an invalidated map; never a live version.
pub(crate) const INVALID_VERSION: u32 = u32::MAX;

/// Color translation table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MapTable {
    /// Source index (or RGB332 code) to destination palette index.
    Index(Vec<u8>),
    /// Source palette index to packed destination pixel.
    Pixels(Vec<u32>),
}

/// Software routine stored in a map, with the RLE variant when the source
/// has been run-length encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SoftBlit {
    /// Plain row-by-row execution of the routine.
    Plain(BlitRoutine),
    /// Skip colorkeyed spans using the RLE data.
    Rle(BlitRoutine),
    /// Skip fully transparent spans using the RLE data.
    RleAlpha(BlitRoutine),
}

impl SoftBlit {
    /// Underlying per-row routine.
    pub fn routine(&self) -> BlitRoutine {
        match *self {
            SoftBlit::Plain(r) | SoftBlit::Rle(r) | SoftBlit::RleAlpha(r) => r,
        }
    }
}

/// Cached conversion strategy from one source to one destination.
#[derive(Debug, Clone)]
pub struct BlitMap {
    pub(crate) dst: Option<SurfaceId>,
    pub(crate) identity: bool,
    pub(crate) table: Option<MapTable>,
    pub(crate) sw_blit: Option<SoftBlit>,
    pub(crate) hw_blit: bool,
    pub(crate) format_version: u32,
}

impl Default for BlitMap {
    fn default() -> Self {
        Self::new()
    }
}

impl BlitMap {
    /// An empty (invalid) map.
    pub const fn new() -> Self {
        Self {
            dst: None,
            identity: false,
            table: None,
            sw_blit: None,
            hw_blit: false,
            format_version: INVALID_VERSION,
        }
    }

    /// Forget the destination so the next blit rebuilds.
    pub fn invalidate(&mut self) {
        self.dst = None;
        self.format_version = INVALID_VERSION;
        self.table = None;
    }

    /// Whether the map can be used for `dst` at `version`.
    pub fn is_valid_for(&self, dst: SurfaceId, version: u32) -> bool {
        self.dst == Some(dst) && self.format_version == version && self.sw_blit.is_some()
    }

    /// Destination the map was built for.
    pub fn dst(&self) -> Option<SurfaceId> {
        self.dst
    }

    /// Whether a byte copy reproduces colors.
    pub fn identity(&self) -> bool {
        self.identity
    }

    /// Destination format version recorded at build time.
    pub fn format_version(&self) -> u32 {
        self.format_version
    }

    /// Selected software routine.
    pub fn soft_blit(&self) -> Option<SoftBlit> {
        self.sw_blit
    }

    /// Whether a hardware routine is attached.
    pub fn has_hw_blit(&self) -> bool {
        self.hw_blit
    }

    /// Remap table, if any.
    pub fn table(&self) -> Option<&MapTable> {
        self.table.as_ref()
    }
}

/// Snapshot of the destination taken before the source map is rebuilt, so
/// self-blits need only one borrow of the surface.
#[derive(Debug, Clone)]
pub(crate) struct DstDesc {
    pub id: SurfaceId,
    pub flags: SurfaceFlags,
    pub format: PixelFormat,
    pub version: u32,
    pub video: Option<VideoHandle>,
    pub hw: HwSurfaceDesc,
}

impl DstDesc {
    pub fn of(surface: &Surface) -> Self {
        Self {
            id: surface.id(),
            flags: surface.flags(),
            format: surface.format().clone(),
            version: surface.format_version(),
            video: surface.video.clone(),
            hw: surface.hw_desc(),
        }
    }
}

/// Nearest-color table from `src` to `dst`; `None` when the palettes are
/// identical over the source's entries.
fn map_1to1(src: &Palette, dst: &Palette) -> (Option<Vec<u8>>, bool) {
    if src.ncolors() <= dst.ncolors() && src.colors[..] == dst.colors[..src.ncolors()] {
        return (None, true);
    }
    let table = src
        .colors
        .iter()
        .map(|c| dst.find_color(c.r, c.g, c.b))
        .collect();
    (Some(table), false)
}

/// Packed destination pixel per source palette entry, opaque where the
/// destination carries alpha.
fn map_1ton(src: &Palette, dst: &PixelFormat) -> Vec<u32> {
    let alpha = if dst.amask != 0 { ALPHA_OPAQUE } else { 0 };
    src.colors
        .iter()
        .map(|c| dst.map_rgba(c.r, c.g, c.b, alpha))
        .collect()
}

/// Table from RGB332 codes to the destination palette.
fn map_nto1(dst: &Palette) -> Option<Vec<u8>> {
    map_1to1(&Palette::dithered(), dst).0
}

/// Rebuild `src`'s map for `dst` and choose its routines.
pub(crate) fn map_surface(src: &mut Surface, dst: &DstDesc) -> Result<(), GalError> {
    if src.flags.contains(SurfaceFlags::RLEACCEL) {
        rle::unrle_surface(src);
    }
    src.map.invalidate();
    src.map.identity = false;

    let srcfmt = &src.format;
    let dstfmt = &dst.format;
    match (srcfmt.bytes_per_pixel, dstfmt.bytes_per_pixel) {
        (1, 1) => {
            // Palette to palette; two device surfaces share the hardware palette.
            if src.flags.contains(SurfaceFlags::HWSURFACE) && dst.flags.contains(SurfaceFlags::HWSURFACE) {
                src.map.identity = true;
            } else {
                let (sp, dp) = match (&srcfmt.palette, &dstfmt.palette) {
                    (Some(sp), Some(dp)) => (sp, dp),
                    _ => return Err(GalError::InvalidFormat("indexed format without palette".into())),
                };
                let (table, identical) = map_1to1(sp, dp);
                src.map.table = table.map(MapTable::Index);
                src.map.identity = identical;
            }
            if srcfmt.bits_per_pixel != dstfmt.bits_per_pixel {
                src.map.identity = false;
            }
        }
        (1, _) => {
            let sp = srcfmt
                .palette
                .as_ref()
                .ok_or_else(|| GalError::InvalidFormat("indexed format without palette".into()))?;
            src.map.table = Some(MapTable::Pixels(map_1ton(sp, dstfmt)));
        }
        (_, 1) => {
            let dp = dstfmt
                .palette
                .as_ref()
                .ok_or_else(|| GalError::InvalidFormat("indexed format without palette".into()))?;
            src.map.table = map_nto1(dp).map(MapTable::Index);
            // Never a plain copy.
            src.map.identity = false;
        }
        _ => {
            src.map.identity = srcfmt.layout_equals(dstfmt);
        }
    }

    src.map.dst = Some(dst.id);
    src.map.format_version = dst.version;
    log::debug!(
        "gal: map {:?} -> {:?} rebuilt (identity {}, table {})",
        src.id(),
        dst.id,
        src.map.identity,
        src.map.table.is_some()
    );

    blit::calculate_blit(src, dst)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pixels::Color;

    #[test]
    fn test_invalidate() {
        let mut map = BlitMap::new();
        map.dst = Some(SurfaceId(3));
        map.format_version = 0;
        map.sw_blit = Some(SoftBlit::Plain(BlitRoutine::Copy));
        map.table = Some(MapTable::Index(alloc::vec![0; 4]));
        assert!(map.is_valid_for(SurfaceId(3), 0));
        assert!(!map.is_valid_for(SurfaceId(3), 1));

        map.invalidate();
        assert!(!map.is_valid_for(SurfaceId(3), 0));
        assert_eq!(map.format_version(), INVALID_VERSION);
        assert!(map.table().is_none());
    }

    #[test]
    fn test_identical_palettes_need_no_table() {
        let mut a = Palette::new(4);
        a.set_colors(0, &[Color::new(1, 2, 3), Color::new(4, 5, 6)]);
        let mut b = Palette::new(16);
        b.set_colors(0, &[Color::new(1, 2, 3), Color::new(4, 5, 6)]);
        assert_eq!(map_1to1(&a, &b), (None, true));

        b.set_colors(0, &[Color::new(4, 5, 6), Color::new(1, 2, 3)]);
        let (table, identical) = map_1to1(&a, &b);
        assert!(!identical);
        assert_eq!(table.unwrap()[..2], [1, 0]);
    }

    #[test]
    fn test_palette_to_direct_is_opaque() {
        let mut pal = Palette::new(2);
        pal.set_colors(0, &[Color::new(255, 0, 0), Color::new(0, 0, 255)]);
        assert_eq!(map_1ton(&pal, &PixelFormat::argb8888()), [0xFFFF_0000, 0xFF00_00FF]);
        assert_eq!(map_1ton(&pal, &PixelFormat::rgb565()), [0xF800, 0x001F]);
    }

    #[test]
    fn test_dithered_destination_has_no_table() {
        assert!(map_nto1(&Palette::dithered()).is_none());
        let table = map_nto1(&Palette::new(256)).unwrap();
        assert_eq!(table.len(), 256);
    }
}
