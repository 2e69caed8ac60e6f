//! Pixel format model.
//!
//! A [`PixelFormat`] describes either a packed bit-field layout (per-channel
//! mask, shift and loss) or an indexed layout backed by a [`Palette`]. The
//! conversion helpers here are the only place pixels are packed and unpacked;
//! every blit routine goes through them or through tables built from them.

use alloc::vec;
use alloc::vec::Vec;

use crate::error::GalError;

/// Fully opaque per-surface or per-pixel alpha.
pub const ALPHA_OPAQUE: u8 = 255;
/// Fully transparent per-surface or per-pixel alpha.
pub const ALPHA_TRANSPARENT: u8 = 0;

/// An RGB palette entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Color {
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }
}

/// Ordered color table of an indexed format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Palette {
    pub colors: Vec<Color>,
}

impl Palette {
    /// Palette of `ncolors` black entries.
    pub fn new(ncolors: usize) -> Self {
        Self {
            colors: vec![Color::default(); ncolors],
        }
    }

    /// Number of entries.
    pub fn ncolors(&self) -> usize {
        self.colors.len()
    }

    /// Overwrite entries starting at `first`; returns false if any entry
    /// fell outside the palette.
    pub fn set_colors(&mut self, first: usize, colors: &[Color]) -> bool {
        let mut all = true;
        for (i, color) in colors.iter().enumerate() {
            match self.colors.get_mut(first + i) {
                Some(slot) => *slot = *color,
                None => all = false,
            }
        }
        all
    }

    /// The 256-entry RGB332 palette that [`find_dithered_color`] indexes.
    pub fn dithered() -> Self {
        let mut palette = Self::new(256);
        dither_colors(&mut palette.colors, 8);
        palette
    }

    /// Nearest entry by squared RGB distance; stops at the first exact match.
    pub fn find_color(&self, r: u8, g: u8, b: u8) -> u8 {
        let mut smallest = u32::MAX;
        let mut pixel = 0u8;
        for (i, c) in self.colors.iter().enumerate() {
            let rd = c.r as i32 - r as i32;
            let gd = c.g as i32 - g as i32;
            let bd = c.b as i32 - b as i32;
            let distance = (rd * rd + gd * gd + bd * bd) as u32;
            if distance < smallest {
                pixel = i as u8;
                if distance == 0 {
                    break;
                }
                smallest = distance;
            }
        }
        pixel
    }
}

/// Pixel layout description.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixelFormat {
    pub bits_per_pixel: u8,
    pub bytes_per_pixel: u8,
    pub palette: Option<Palette>,
    /// Palette is the RGB332 dither palette; lookups skip the nearest search.
    pub dithered: bool,

    pub rloss: u8,
    pub gloss: u8,
    pub bloss: u8,
    pub aloss: u8,
    pub rshift: u8,
    pub gshift: u8,
    pub bshift: u8,
    pub ashift: u8,
    pub rmask: u32,
    pub gmask: u32,
    pub bmask: u32,
    pub amask: u32,

    /// Source colorkey, valid while the surface has `SRCCOLORKEY`.
    pub colorkey: u32,
    /// Per-surface alpha, valid while the surface has `SRCALPHA`.
    pub alpha: u8,
}

/// Shift to the lowest set bit and bits lost against an 8-bit channel.
fn mask_layout(mask: u32) -> (u8, u8) {
    if mask == 0 {
        return (0, 8);
    }
    let shift = mask.trailing_zeros();
    let width = (mask >> shift).trailing_ones();
    (shift as u8, 8u32.saturating_sub(width) as u8)
}

impl PixelFormat {
    /// Build a format for `bpp` with the given channel masks.
    ///
    /// Depths of 8 bits or less get a palette (2, 16 or 256 entries) and
    /// ignore the masks. Deeper formats with no R/G/B mask get a default
    /// split favouring green.
    pub fn new(bpp: u8, rmask: u32, gmask: u32, bmask: u32, amask: u32) -> Result<Self, GalError> {
        let mut format = PixelFormat {
            bits_per_pixel: bpp,
            bytes_per_pixel: (bpp + 7) / 8,
            palette: None,
            dithered: false,
            rloss: 8,
            gloss: 8,
            bloss: 8,
            aloss: 8,
            rshift: 0,
            gshift: 0,
            bshift: 0,
            ashift: 0,
            rmask: 0,
            gmask: 0,
            bmask: 0,
            amask: 0,
            colorkey: 0,
            alpha: ALPHA_OPAQUE,
        };

        match bpp {
            1 => {
                let mut palette = Palette::new(2);
                palette.colors[0] = Color::new(0xFF, 0xFF, 0xFF);
                palette.colors[1] = Color::new(0x00, 0x00, 0x00);
                format.palette = Some(palette);
            }
            4 => format.palette = Some(Palette::new(16)),
            8 => format.palette = Some(Palette::new(256)),
            9..=32 => {
                (format.rshift, format.rloss) = mask_layout(rmask);
                (format.gshift, format.gloss) = mask_layout(gmask);
                (format.bshift, format.bloss) = mask_layout(bmask);
                (format.ashift, format.aloss) = mask_layout(amask);
                format.rmask = rmask;
                format.gmask = gmask;
                format.bmask = bmask;
                format.amask = amask;

                if rmask == 0 && gmask == 0 && bmask == 0 {
                    // R-G-B; may collide with a caller-supplied alpha mask.
                    let bpp = bpp.min(24);
                    format.rloss = 8 - bpp / 3;
                    format.gloss = 8 - bpp / 3 - bpp % 3;
                    format.bloss = 8 - bpp / 3;
                    format.rshift = (bpp / 3 + bpp % 3) + bpp / 3;
                    format.gshift = bpp / 3;
                    format.bshift = 0;
                    format.rmask = (0xFFu32 >> format.rloss) << format.rshift;
                    format.gmask = (0xFFu32 >> format.gloss) << format.gshift;
                    format.bmask = (0xFFu32 >> format.bloss) << format.bshift;
                }
            }
            _ => return Err(GalError::InvalidFormat(alloc::format!("unsupported depth {}", bpp))),
        }

        Ok(format)
    }

    /// 32-bit ARGB with 8 bits per channel.
    pub fn argb8888() -> Self {
        Self::packed(32, 0x00FF_0000, 0x0000_FF00, 0x0000_00FF, 0xFF00_0000)
    }

    /// 32-bit RGB with the top byte unused.
    pub fn xrgb8888() -> Self {
        Self::packed(32, 0x00FF_0000, 0x0000_FF00, 0x0000_00FF, 0)
    }

    /// 24-bit packed RGB.
    pub fn rgb888() -> Self {
        Self::packed(24, 0xFF_0000, 0x00_FF00, 0x00_00FF, 0)
    }

    /// 16-bit RGB565.
    pub fn rgb565() -> Self {
        Self::packed(16, 0xF800, 0x07E0, 0x001F, 0)
    }

    /// 16-bit ARGB1555.
    pub fn argb1555() -> Self {
        Self::packed(16, 0x7C00, 0x03E0, 0x001F, 0x8000)
    }

    fn packed(bpp: u8, r: u32, g: u32, b: u32, a: u32) -> Self {
        let mut format = Self::indexed_placeholder(bpp);
        (format.rshift, format.rloss) = mask_layout(r);
        (format.gshift, format.gloss) = mask_layout(g);
        (format.bshift, format.bloss) = mask_layout(b);
        (format.ashift, format.aloss) = mask_layout(a);
        format.rmask = r;
        format.gmask = g;
        format.bmask = b;
        format.amask = a;
        format
    }

    fn indexed_placeholder(bpp: u8) -> Self {
        PixelFormat {
            bits_per_pixel: bpp,
            bytes_per_pixel: (bpp + 7) / 8,
            palette: None,
            dithered: false,
            rloss: 8,
            gloss: 8,
            bloss: 8,
            aloss: 8,
            rshift: 0,
            gshift: 0,
            bshift: 0,
            ashift: 0,
            rmask: 0,
            gmask: 0,
            bmask: 0,
            amask: 0,
            colorkey: 0,
            alpha: ALPHA_OPAQUE,
        }
    }

    /// Whether pixels are palette indices.
    #[inline]
    pub fn is_indexed(&self) -> bool {
        self.palette.is_some()
    }

    /// Whether pixels carry an alpha channel.
    #[inline]
    pub fn has_alpha(&self) -> bool {
        self.amask != 0
    }

    /// Same depth, red and alpha layout (a byte copy reproduces colors).
    pub fn layout_equals(&self, other: &PixelFormat) -> bool {
        self.bits_per_pixel == other.bits_per_pixel
            && self.rmask == other.rmask
            && self.amask == other.amask
    }

    /// Replace the palette with the RGB332 dither palette.
    pub fn set_dithered_palette(&mut self) {
        if let Some(palette) = self.palette.as_mut() {
            dither_colors(&mut palette.colors, self.bits_per_pixel);
            self.dithered = self.bits_per_pixel == 8;
        }
    }

    /// Opaque pixel value for an RGB triple.
    pub fn map_rgb(&self, r: u8, g: u8, b: u8) -> u32 {
        match &self.palette {
            None => {
                ((r >> self.rloss) as u32) << self.rshift
                    | ((g >> self.gloss) as u32) << self.gshift
                    | ((b >> self.bloss) as u32) << self.bshift
                    | self.amask
            }
            Some(palette) => self.map_indexed(palette, r, g, b),
        }
    }

    /// Pixel value for an RGBA quadruple.
    pub fn map_rgba(&self, r: u8, g: u8, b: u8, a: u8) -> u32 {
        match &self.palette {
            None => {
                ((r >> self.rloss) as u32) << self.rshift
                    | ((g >> self.gloss) as u32) << self.gshift
                    | ((b >> self.bloss) as u32) << self.bshift
                    | ((((a >> self.aloss) as u32) << self.ashift) & self.amask)
            }
            Some(palette) => self.map_indexed(palette, r, g, b),
        }
    }

    fn map_indexed(&self, palette: &Palette, r: u8, g: u8, b: u8) -> u32 {
        if self.dithered {
            find_dithered_color(self.bits_per_pixel, r, g, b) as u32
        } else {
            palette.find_color(r, g, b) as u32
        }
    }

    /// RGB components of a pixel value.
    pub fn get_rgb(&self, pixel: u32) -> (u8, u8, u8) {
        match &self.palette {
            None => (
                expand(pixel, self.rmask, self.rshift, self.rloss),
                expand(pixel, self.gmask, self.gshift, self.gloss),
                expand(pixel, self.bmask, self.bshift, self.bloss),
            ),
            Some(palette) => {
                let c = palette
                    .colors
                    .get(pixel as usize)
                    .copied()
                    .unwrap_or_default();
                (c.r, c.g, c.b)
            }
        }
    }

    /// RGBA components of a pixel value; alpha is opaque without an alpha mask.
    pub fn get_rgba(&self, pixel: u32) -> (u8, u8, u8, u8) {
        let (r, g, b) = self.get_rgb(pixel);
        let a = if self.palette.is_none() && self.amask != 0 {
            expand(pixel, self.amask, self.ashift, self.aloss)
        } else {
            ALPHA_OPAQUE
        };
        (r, g, b, a)
    }

    /// Raw channel values without re-expansion (`v << loss`), as the blit
    /// loops use them.
    #[inline]
    pub(crate) fn rgb_from_pixel(&self, pixel: u32) -> (u32, u32, u32) {
        (
            ((pixel & self.rmask) >> self.rshift) << self.rloss,
            ((pixel & self.gmask) >> self.gshift) << self.gloss,
            ((pixel & self.bmask) >> self.bshift) << self.bloss,
        )
    }

    /// Alpha channel scaled to 0..=255; narrow alpha fields are stretched so
    /// their maximum reads as (nearly) opaque.
    #[inline]
    pub(crate) fn alpha_from_pixel(&self, pixel: u32) -> u32 {
        let a = (pixel & self.amask) >> self.ashift;
        match self.aloss {
            1 => a << 1,
            2 => a << 2,
            3 => a << 3,
            4 => a * 17,
            5 => a * 36,
            6 => a * 85,
            7 => a * 255,
            _ => a,
        }
    }

    /// Pack channels (0..=255 each) into a pixel; alpha only where masked.
    #[inline]
    pub(crate) fn pixel_from_rgba(&self, r: u32, g: u32, b: u32, a: u32) -> u32 {
        ((r >> self.rloss) << self.rshift)
            | ((g >> self.gloss) << self.gshift)
            | ((b >> self.bloss) << self.bshift)
            | (((a >> self.aloss) << self.ashift) & self.amask)
    }
}

#[inline]
fn expand(pixel: u32, mask: u32, shift: u8, loss: u8) -> u8 {
    let v = (pixel & mask) >> shift;
    let hi = v << loss;
    let lo = if loss == 0 { 0 } else { v >> (8 - loss as u32) };
    (hi + lo).min(255) as u8
}

/// Fill `colors` with the RGB332 palette (8 bpp only).
pub fn dither_colors(colors: &mut [Color], bpp: u8) {
    if bpp != 8 {
        return;
    }
    for (i, color) in colors.iter_mut().enumerate().take(256) {
        let i = i as u32;
        let mut r = i & 0xe0;
        r |= r >> 3 | r >> 6;
        let mut g = (i << 3) & 0xe0;
        g |= g >> 3 | g >> 6;
        let mut b = i & 0x3;
        b |= b << 2;
        b |= b << 4;
        *color = Color::new(r as u8, g as u8, b as u8);
    }
}

/// Index of an RGB triple in the RGB332 palette (8 bpp only).
pub fn find_dithered_color(bpp: u8, r: u8, g: u8, b: u8) -> u8 {
    if bpp != 8 {
        return 0;
    }
    (r & 0xe0) | ((g & 0xe0) >> 3) | ((b & 0xc0) >> 6)
}

/// Scanline length in bytes for `width` pixels, padded to 4 bytes.
pub fn calculate_pitch(format: &PixelFormat, width: u32) -> u32 {
    let mut pitch = width * format.bytes_per_pixel as u32;
    match format.bits_per_pixel {
        1 => pitch = (pitch + 7) / 8,
        4 => pitch = (pitch + 1) / 2,
        _ => {}
    }
    (pitch + 3) & !3
}

/// Read a 1..=4 byte pixel stored in native (little-endian) order.
#[inline]
pub(crate) fn read_pixel(bytes: &[u8], bpp: usize) -> u32 {
    match bpp {
        1 => bytes[0] as u32,
        2 => u16::from_le_bytes([bytes[0], bytes[1]]) as u32,
        3 => bytes[0] as u32 | (bytes[1] as u32) << 8 | (bytes[2] as u32) << 16,
        _ => u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
    }
}

/// Write a 1..=4 byte pixel in native (little-endian) order.
#[inline]
pub(crate) fn write_pixel(bytes: &mut [u8], bpp: usize, pixel: u32) {
    match bpp {
        1 => bytes[0] = pixel as u8,
        2 => bytes[..2].copy_from_slice(&(pixel as u16).to_le_bytes()),
        3 => {
            bytes[0] = pixel as u8;
            bytes[1] = (pixel >> 8) as u8;
            bytes[2] = (pixel >> 16) as u8;
        }
        _ => bytes[..4].copy_from_slice(&pixel.to_le_bytes()),
    }
}

/// Palette index of pixel `x` in a sub-byte (1 or 4 bpp) scanline, MSB first.
#[inline]
pub(crate) fn read_index(row: &[u8], bits: u8, x: usize) -> u8 {
    match bits {
        1 => (row[x / 8] >> (7 - (x % 8))) & 0x01,
        4 => {
            let byte = row[x / 2];
            if x % 2 == 0 {
                byte >> 4
            } else {
                byte & 0x0f
            }
        }
        _ => row[x],
    }
}

/// Store palette index `v` at pixel `x` of a sub-byte scanline.
#[inline]
pub(crate) fn write_index(row: &mut [u8], bits: u8, x: usize, v: u8) {
    match bits {
        1 => {
            let bit = 7 - (x % 8);
            let byte = &mut row[x / 8];
            *byte = (*byte & !(1 << bit)) | ((v & 1) << bit);
        }
        4 => {
            let byte = &mut row[x / 2];
            if x % 2 == 0 {
                *byte = (*byte & 0x0f) | (v << 4);
            } else {
                *byte = (*byte & 0xf0) | (v & 0x0f);
            }
        }
        _ => row[x] = v,
    }
}
