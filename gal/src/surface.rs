//! Pixel surfaces.
//!
//! A [`Surface`] is a rectangular pixel buffer with a format, a clip
//! rectangle, blit state (colorkey, per-surface alpha, the cached
//! [`BlitMap`]) and dirty tracking. Its pixels live in system memory, in
//! caller memory, in video memory, or in a shared mapping.
//!
//! Surfaces are handed around as [`SurfaceRef`]s: reference counted and
//! protected by a spin lock.

use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;
use core::ptr::NonNull;
use core::sync::atomic::{AtomicU64, Ordering};

use crate::dirty::DirtyInfo;
use crate::error::{report, GalError};
use crate::map::BlitMap;
use crate::pixels::{
    calculate_pitch, read_index, read_pixel, write_index, write_pixel, Color, PixelFormat,
    ALPHA_OPAQUE,
};
use crate::rect::Rect;
use crate::rle::{self, RleData};
use crate::sem::SemGuard;
use crate::shared::SharedMapping;
use crate::video::{HwAllocation, HwSurfaceDesc, VideoCaps, VideoHandle};

bitflags::bitflags! {
    /// Surface flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct SurfaceFlags: u32 {
        /// Pixels live in video memory.
        const HWSURFACE = 0x0000_0001;
        /// Blits may complete asynchronously.
        const ASYNCBLIT = 0x0000_0004;
        /// Blits from this surface are hardware accelerated.
        const HWACCEL = 0x0000_0100;
        /// Pixels equal to the colorkey are not copied.
        const SRCCOLORKEY = 0x0000_1000;
        /// Run-length encoding is permitted.
        const RLEACCELOK = 0x0000_2000;
        /// The surface is currently run-length encoded.
        const RLEACCEL = 0x0000_4000;
        /// Blend with the per-surface alpha.
        const SRCALPHA = 0x0001_0000;
        /// Blend with the per-pixel alpha channel.
        const SRCPIXELALPHA = 0x0002_0000;
        /// Pixel memory belongs to the caller.
        const PREALLOC = 0x0100_0000;
        /// Accept any pixel format for the display surface.
        const ANYFORMAT = 0x1000_0000;
        /// The surface has an exclusive hardware palette.
        const HWPALETTE = 0x2000_0000;
        /// Double buffered display surface.
        const DOUBLEBUF = 0x4000_0000;
        /// Full screen display surface.
        const FULLSCREEN = 0x8000_0000;
    }
}

/// Unique surface identifier. Ids order blit locking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SurfaceId(pub u64);

static NEXT_SURFACE_ID: AtomicU64 = AtomicU64::new(1);

impl SurfaceId {
    fn next() -> Self {
        SurfaceId(NEXT_SURFACE_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// Where a surface's pixels live.
pub(crate) enum PixelStorage {
    /// Zero-area surface; no memory.
    Placeholder,
    /// System memory owned by the surface.
    Owned(Vec<u8>),
    /// Caller memory (`PREALLOC`).
    External { ptr: NonNull<u8>, len: usize },
    /// Video memory owned by the surface.
    Device(HwAllocation),
    /// The display framebuffer; owned by the video mode.
    Framebuffer(HwAllocation),
    /// Shared memory, possibly attached read-only.
    Shared(SharedMapping),
}

// External and device memory is only reached through the owning surface,
// which sits behind a lock.
unsafe impl Send for PixelStorage {}

impl PixelStorage {
    pub(crate) fn bytes(&self) -> &[u8] {
        match self {
            PixelStorage::Placeholder => &[],
            PixelStorage::Owned(v) => v,
            // SAFETY: the creator guaranteed `len` bytes stay valid for the
            // surface's lifetime.
            PixelStorage::External { ptr, len } => unsafe {
                core::slice::from_raw_parts(ptr.as_ptr(), *len)
            },
            // SAFETY: the allocation is live until the surface frees it.
            PixelStorage::Device(hw) | PixelStorage::Framebuffer(hw) => unsafe {
                core::slice::from_raw_parts(hw.ptr.as_ptr(), hw.len)
            },
            PixelStorage::Shared(map) => map.pixels(),
        }
    }

    pub(crate) fn bytes_mut(&mut self) -> Result<&mut [u8], GalError> {
        match self {
            PixelStorage::Placeholder => Ok(&mut []),
            PixelStorage::Owned(v) => Ok(v),
            // SAFETY: as in `bytes`; `&mut self` makes the view unique.
            PixelStorage::External { ptr, len } => Ok(unsafe {
                core::slice::from_raw_parts_mut(ptr.as_ptr(), *len)
            }),
            // SAFETY: as in `bytes`.
            PixelStorage::Device(hw) | PixelStorage::Framebuffer(hw) => Ok(unsafe {
                core::slice::from_raw_parts_mut(hw.ptr.as_ptr(), hw.len)
            }),
            PixelStorage::Shared(map) => map.pixels_mut(),
        }
    }

    fn device_handle(&self) -> Option<u64> {
        match self {
            PixelStorage::Device(hw) | PixelStorage::Framebuffer(hw) => Some(hw.handle),
            PixelStorage::Shared(map) => map.hw_handle(),
            _ => None,
        }
    }
}

/// A pixel surface.
pub struct Surface {
    id: SurfaceId,
    pub(crate) flags: SurfaceFlags,
    pub(crate) format: PixelFormat,
    width: u32,
    height: u32,
    pitch: u32,
    pub(crate) pixels: PixelStorage,
    clip_rect: Rect,
    pub(crate) map: BlitMap,
    format_version: u32,
    pub(crate) rle: Option<RleData>,
    pub(crate) rle_allowed: bool,
    dirty: DirtyInfo,
    pub(crate) video: Option<VideoHandle>,
}

impl Surface {
    /// Create a zero-filled system memory surface.
    ///
    /// `HWSURFACE` is ignored here; video memory surfaces are created
    /// through the context. A non-zero `amask` turns on `SRCPIXELALPHA`.
    pub fn new(
        flags: SurfaceFlags,
        width: u32,
        height: u32,
        depth: u8,
        rmask: u32,
        gmask: u32,
        bmask: u32,
        amask: u32,
    ) -> Result<Self, GalError> {
        let format = PixelFormat::new(depth, rmask, gmask, bmask, amask).map_err(report)?;
        let pitch = calculate_pitch(&format, width);
        let size = pitch as usize * height as usize;
        let pixels = if size == 0 {
            PixelStorage::Placeholder
        } else {
            PixelStorage::Owned(vec![0u8; size])
        };
        let flags = flags & !(SurfaceFlags::HWSURFACE | SurfaceFlags::PREALLOC);
        Ok(Self::with_storage(flags, format, width, height, pitch, pixels, None))
    }

    /// Wrap caller memory (`PREALLOC`). The surface never frees it.
    ///
    /// # Safety
    /// `pixels` must point to at least `pitch * height` bytes that stay
    /// valid, and are not accessed elsewhere, for the surface's lifetime.
    pub unsafe fn from_raw(
        pixels: NonNull<u8>,
        width: u32,
        height: u32,
        depth: u8,
        pitch: u32,
        rmask: u32,
        gmask: u32,
        bmask: u32,
        amask: u32,
    ) -> Result<Self, GalError> {
        let format = PixelFormat::new(depth, rmask, gmask, bmask, amask).map_err(report)?;
        let min_pitch = (width * format.bits_per_pixel as u32 + 7) / 8;
        if pitch < min_pitch {
            return Err(report(GalError::InvalidRect));
        }
        let storage = PixelStorage::External {
            ptr: pixels,
            len: pitch as usize * height as usize,
        };
        Ok(Self::with_storage(
            SurfaceFlags::PREALLOC,
            format,
            width,
            height,
            pitch,
            storage,
            None,
        ))
    }

    /// Zero-filled system memory surface in this surface's format, with
    /// its palette, colorkey and alpha settings.
    pub(crate) fn blank_like(&self, width: u32, height: u32) -> Result<Self, GalError> {
        let pitch = calculate_pitch(&self.format, width);
        let size = pitch as usize * height as usize;
        let mut bytes = Vec::new();
        bytes.try_reserve_exact(size).map_err(|_| report(GalError::OutOfMemory))?;
        bytes.resize(size, 0);
        let flags = self.flags
            & (SurfaceFlags::SRCCOLORKEY | SurfaceFlags::SRCALPHA | SurfaceFlags::SRCPIXELALPHA);
        let mut surface = Self::with_storage(
            flags,
            self.format.clone(),
            width,
            height,
            pitch,
            PixelStorage::Owned(bytes),
            None,
        );
        surface.flags = flags;
        Ok(surface)
    }

    pub(crate) fn with_storage(
        mut flags: SurfaceFlags,
        format: PixelFormat,
        width: u32,
        height: u32,
        pitch: u32,
        pixels: PixelStorage,
        video: Option<VideoHandle>,
    ) -> Self {
        if format.amask != 0 {
            flags |= SurfaceFlags::SRCPIXELALPHA;
        }
        Self {
            id: SurfaceId::next(),
            flags,
            format,
            width,
            height,
            pitch,
            pixels,
            clip_rect: Rect::sized(width, height),
            map: BlitMap::new(),
            format_version: 0,
            rle: None,
            rle_allowed: true,
            dirty: DirtyInfo::new(),
            video,
        }
    }

    pub fn id(&self) -> SurfaceId {
        self.id
    }

    pub fn flags(&self) -> SurfaceFlags {
        self.flags
    }

    pub fn format(&self) -> &PixelFormat {
        &self.format
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Bytes per scanline.
    pub fn pitch(&self) -> u32 {
        self.pitch
    }

    /// Whole-surface rectangle.
    pub fn bounds(&self) -> Rect {
        Rect::sized(self.width, self.height)
    }

    /// Bumped whenever the palette changes.
    pub fn format_version(&self) -> u32 {
        self.format_version
    }

    /// Cached blit state toward the last destination.
    pub fn blit_map(&self) -> &BlitMap {
        &self.map
    }

    /// Whether the surface currently carries run-length data.
    pub fn is_rle(&self) -> bool {
        self.rle.is_some()
    }

    /// Whether the pixels are in a shared mapping.
    pub fn is_shared(&self) -> bool {
        matches!(self.pixels, PixelStorage::Shared(_))
    }

    /// Shared mapping behind the pixels, if any.
    pub fn shared(&self) -> Option<&SharedMapping> {
        match &self.pixels {
            PixelStorage::Shared(map) => Some(map),
            _ => None,
        }
    }

    /// Video device of a hardware surface.
    pub fn video(&self) -> Option<&VideoHandle> {
        self.video.as_ref()
    }

    /// Raw pixel bytes.
    pub fn pixels(&self) -> &[u8] {
        self.pixels.bytes()
    }

    /// Writable pixel bytes. Drops run-length data, which would go stale.
    pub fn pixels_mut(&mut self) -> Result<&mut [u8], GalError> {
        self.prepare_write();
        self.pixels.bytes_mut().map_err(report)
    }

    /// Drop derived state that pixel writes would invalidate.
    pub(crate) fn prepare_write(&mut self) {
        if self.rle.is_some() || self.flags.contains(SurfaceFlags::RLEACCEL) {
            rle::unrle_surface(self);
        }
    }

    /// Device view of the surface.
    pub fn hw_desc(&self) -> HwSurfaceDesc {
        HwSurfaceDesc {
            handle: self.pixels.device_handle(),
            width: self.width,
            height: self.height,
            pitch: self.pitch,
            bytes_per_pixel: self.format.bytes_per_pixel,
        }
    }

    /// Set the clip rectangle; `None` resets it to the whole surface.
    /// Returns whether any part of the surface remains drawable.
    pub fn set_clip_rect(&mut self, rect: Option<Rect>) -> bool {
        let bounds = self.bounds();
        match rect {
            None => {
                self.clip_rect = bounds;
                true
            }
            Some(r) => match r.intersection(&bounds) {
                Some(clip) => {
                    self.clip_rect = clip;
                    true
                }
                None => {
                    self.clip_rect = Rect::new(r.x, r.y, 0, 0);
                    false
                }
            },
        }
    }

    pub fn clip_rect(&self) -> Rect {
        self.clip_rect
    }

    /// Current colorkey, meaningful with `SRCCOLORKEY`.
    pub fn color_key(&self) -> u32 {
        self.format.colorkey
    }

    /// Current per-surface alpha.
    pub fn alpha(&self) -> u8 {
        self.format.alpha
    }

    /// Set or clear the source colorkey.
    ///
    /// `flag` containing `SRCCOLORKEY` enables keying with `key`; adding
    /// `RLEACCEL` or `RLEACCELOK` permits run-length encoding. An empty
    /// `flag` clears both.
    pub fn set_color_key(&mut self, flag: SurfaceFlags, key: u32) -> Result<(), GalError> {
        let flag = if flag.contains(SurfaceFlags::SRCCOLORKEY) {
            if flag.intersects(SurfaceFlags::RLEACCEL | SurfaceFlags::RLEACCELOK) {
                SurfaceFlags::SRCCOLORKEY | SurfaceFlags::RLEACCELOK
            } else {
                SurfaceFlags::SRCCOLORKEY
            }
        } else {
            SurfaceFlags::empty()
        };

        if flag == self.flags & (SurfaceFlags::SRCCOLORKEY | SurfaceFlags::RLEACCELOK)
            && key == self.format.colorkey
        {
            return Ok(());
        }

        if self.flags.contains(SurfaceFlags::RLEACCEL) {
            rle::unrle_surface(self);
        }

        if flag.is_empty() {
            self.flags
                .remove(SurfaceFlags::SRCCOLORKEY | SurfaceFlags::RLEACCELOK);
            self.format.colorkey = 0;
        } else {
            self.flags.insert(SurfaceFlags::SRCCOLORKEY);
            self.format.colorkey = key;
            if self.flags.contains(SurfaceFlags::HWACCEL) {
                let desc = self.hw_desc();
                let accepted = self
                    .video
                    .as_ref()
                    .map(|v| v.device().set_hw_color_key(&desc, key).is_ok())
                    .unwrap_or(false);
                if !accepted {
                    self.flags.remove(SurfaceFlags::HWACCEL);
                }
            }
            self.flags
                .set(SurfaceFlags::RLEACCELOK, flag.contains(SurfaceFlags::RLEACCELOK));
        }

        self.map.invalidate();
        Ok(())
    }

    /// Set or clear alpha blending.
    ///
    /// `SRCALPHA` blends with `value`; `SRCPIXELALPHA` with the alpha
    /// channel. An empty `flag` turns blending off and resets alpha to
    /// opaque.
    pub fn set_alpha(&mut self, flag: SurfaceFlags, value: u8) -> Result<(), GalError> {
        let old_flags = self.flags;
        let old_alpha = self.format.alpha;
        let rle_ok = if flag.intersects(SurfaceFlags::RLEACCEL | SurfaceFlags::RLEACCELOK) {
            SurfaceFlags::RLEACCELOK
        } else {
            SurfaceFlags::empty()
        };

        let flag = if flag.contains(SurfaceFlags::SRCALPHA) {
            let flag = SurfaceFlags::SRCALPHA | rle_ok;
            if flag == self.flags & (SurfaceFlags::SRCALPHA | SurfaceFlags::RLEACCELOK)
                && value == old_alpha
            {
                return Ok(());
            }
            flag
        } else if flag.contains(SurfaceFlags::SRCPIXELALPHA) {
            SurfaceFlags::SRCPIXELALPHA | rle_ok
        } else {
            SurfaceFlags::empty()
        };

        if !flag.contains(SurfaceFlags::RLEACCELOK) && self.flags.contains(SurfaceFlags::RLEACCEL) {
            rle::unrle_surface(self);
        }

        if flag.is_empty() {
            self.flags
                .remove(SurfaceFlags::SRCALPHA | SurfaceFlags::SRCPIXELALPHA);
            self.format.alpha = ALPHA_OPAQUE;
        } else {
            if flag.contains(SurfaceFlags::SRCALPHA) {
                self.flags.insert(SurfaceFlags::SRCALPHA);
                self.format.alpha = value;
            } else {
                self.flags.insert(SurfaceFlags::SRCPIXELALPHA);
            }
            if self.flags.contains(SurfaceFlags::HWACCEL) {
                let desc = self.hw_desc();
                let alpha = self.format.alpha;
                let accepted = self
                    .video
                    .as_ref()
                    .map(|v| v.device().set_hw_alpha(&desc, alpha).is_ok())
                    .unwrap_or(false);
                if !accepted {
                    self.flags.remove(SurfaceFlags::HWACCEL);
                }
            }
            self.flags
                .set(SurfaceFlags::RLEACCELOK, flag.contains(SurfaceFlags::RLEACCELOK));
        }

        // Crossing 255 switches between the copy and blend routines.
        let crossed = ((old_alpha as u32 + 1) ^ (self.format.alpha as u32 + 1)) & 0x100 != 0;
        if self.flags.contains(SurfaceFlags::HWACCEL) || self.flags != old_flags || crossed {
            self.map.invalidate();
        }
        Ok(())
    }

    /// Load palette entries starting at `first`. Returns false when the
    /// surface has no palette or not every entry fit.
    pub fn set_colors(&mut self, first: usize, colors: &[Color]) -> bool {
        let complete = match self.format.palette.as_mut() {
            Some(palette) => palette.set_colors(first, colors),
            None => return false,
        };
        self.format.dithered = false;
        self.bump_version();
        self.map.invalidate();
        complete
    }

    /// Cut the surface off from memory it no longer owns, such as the
    /// framebuffer of a replaced video mode. It is left zero-sized.
    pub(crate) fn retire(&mut self) {
        self.rle = None;
        self.map.invalidate();
        self.flags.remove(SurfaceFlags::HWSURFACE | SurfaceFlags::HWACCEL | SurfaceFlags::RLEACCEL);
        self.pixels = PixelStorage::Placeholder;
        self.width = 0;
        self.height = 0;
        self.pitch = 0;
        self.clip_rect = Rect::default();
        self.bump_version();
    }

    fn bump_version(&mut self) {
        self.format_version = self.format_version.wrapping_add(1);
        if self.format_version == crate::map::INVALID_VERSION {
            self.format_version = 0;
        }
    }

    /// Fill `rect` (the clip rectangle when `None`) with a pixel value.
    pub fn fill_rect(&mut self, rect: Option<&Rect>, color: u32) -> Result<(), GalError> {
        let target = match rect {
            Some(r) => match r.intersection(&self.clip_rect) {
                Some(r) => r,
                None => return Ok(()),
            },
            None => self.clip_rect,
        };
        if target.is_empty() {
            return Ok(());
        }
        self.prepare_write();

        if self.flags.contains(SurfaceFlags::HWSURFACE) {
            if let Some(video) = self.video.as_ref() {
                if video.caps().contains(VideoCaps::HW_FILL) {
                    match video.device().fill_hw_rect(&self.hw_desc(), &target, color) {
                        Ok(()) => {
                            self.mark_dirty(&target);
                            return Ok(());
                        }
                        Err(e) => log::debug!("gal: hardware fill failed ({}), using software", e),
                    }
                }
            }
        }

        let bits = self.format.bits_per_pixel;
        let bpp = self.format.bytes_per_pixel as usize;
        let pitch = self.pitch as usize;
        let pixels = self.pixels.bytes_mut().map_err(report)?;
        for y in target.y as usize..target.bottom() as usize {
            let row = &mut pixels[y * pitch..(y + 1) * pitch];
            if bits < 8 {
                for x in target.x as usize..target.right() as usize {
                    write_index(row, bits, x, color as u8);
                }
            } else {
                let span = &mut row[target.x as usize * bpp..target.right() as usize * bpp];
                for px in span.chunks_exact_mut(bpp) {
                    write_pixel(px, bpp, color);
                }
            }
        }
        self.mark_dirty(&target);
        Ok(())
    }

    /// Pixel value at (`x`, `y`), `None` outside the surface.
    pub fn get_pixel(&self, x: u32, y: u32) -> Option<u32> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let row = &self.pixels.bytes()[y as usize * self.pitch as usize..];
        Some(if self.format.bits_per_pixel < 8 {
            read_index(row, self.format.bits_per_pixel, x as usize) as u32
        } else {
            let bpp = self.format.bytes_per_pixel as usize;
            read_pixel(&row[x as usize * bpp..], bpp)
        })
    }

    /// Store a pixel value at (`x`, `y`). Out-of-bounds writes are ignored.
    pub fn put_pixel(&mut self, x: u32, y: u32, pixel: u32) -> Result<(), GalError> {
        if x >= self.width || y >= self.height {
            return Ok(());
        }
        self.prepare_write();
        let bits = self.format.bits_per_pixel;
        let bpp = self.format.bytes_per_pixel as usize;
        let start = y as usize * self.pitch as usize;
        let row = &mut self.pixels.bytes_mut().map_err(report)?[start..];
        if bits < 8 {
            write_index(row, bits, x as usize, pixel as u8);
        } else {
            write_pixel(&mut row[x as usize * bpp..], bpp, pixel);
        }
        Ok(())
    }

    /// Record a changed rectangle (clipped to the surface). Shared surfaces
    /// keep the record in the shared header.
    pub fn mark_dirty(&mut self, rect: &Rect) {
        let rect = match rect.intersection(&self.bounds()) {
            Some(r) => r,
            None => return,
        };
        match &self.pixels {
            PixelStorage::Shared(map) => {
                if let Err(e) = map.update_dirty(|info| info.add(&rect)) {
                    log::warn!("gal: lost dirty rect on shared surface: {}", e);
                }
            }
            _ => self.dirty.add(&rect),
        }
    }

    /// Snapshot of the dirty record.
    pub fn dirty_info(&self) -> DirtyInfo {
        match &self.pixels {
            PixelStorage::Shared(map) => map.update_dirty(|info| *info).unwrap_or(self.dirty),
            _ => self.dirty,
        }
    }

    /// Hand out and clear the dirty rectangles.
    pub fn take_dirty(&mut self) -> (u32, Vec<Rect>) {
        match &self.pixels {
            PixelStorage::Shared(map) => map
                .update_dirty(|info| info.take())
                .unwrap_or_else(|_| (self.dirty.dirty_age, Vec::new())),
            _ => self.dirty.take(),
        }
    }

    /// Take the semaphore guarding a shared surface's header. `None` for
    /// private surfaces.
    pub fn lock_shared(&self) -> Result<Option<SemGuard>, GalError> {
        match &self.pixels {
            PixelStorage::Shared(map) => map.lock().map_err(report),
            _ => Ok(None),
        }
    }
}

impl Drop for Surface {
    fn drop(&mut self) {
        self.rle = None;
        self.map.invalidate();
        if let PixelStorage::Device(hw) = &self.pixels {
            if let Some(video) = &self.video {
                video.device().free_hw_surface(hw.handle);
            }
        }
        log::trace!("gal: surface {:?} freed", self.id);
    }
}

impl core::fmt::Debug for Surface {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Surface")
            .field("id", &self.id)
            .field("flags", &self.flags)
            .field("size", &(self.width, self.height))
            .field("bpp", &self.format.bits_per_pixel)
            .field("pitch", &self.pitch)
            .finish()
    }
}

/// Shared, lockable handle to a surface.
#[derive(Clone)]
pub struct SurfaceRef {
    id: SurfaceId,
    inner: Arc<spin::Mutex<Surface>>,
}

impl SurfaceRef {
    pub fn new(surface: Surface) -> Self {
        Self {
            id: surface.id(),
            inner: Arc::new(spin::Mutex::new(surface)),
        }
    }

    /// Id of the wrapped surface, readable without locking.
    pub fn id(&self) -> SurfaceId {
        self.id
    }

    pub fn lock(&self) -> spin::MutexGuard<'_, Surface> {
        self.inner.lock()
    }

    /// Number of live handles.
    pub fn refcount(&self) -> usize {
        Arc::strong_count(&self.inner)
    }

    /// Whether both handles refer to one surface.
    pub fn ptr_eq(&self, other: &SurfaceRef) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl core::fmt::Debug for SurfaceRef {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_tuple("SurfaceRef").field(&self.id).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rgb565(w: u32, h: u32) -> Surface {
        Surface::new(SurfaceFlags::empty(), w, h, 16, 0, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_new_surface() {
        let s = Surface::new(SurfaceFlags::HWSURFACE, 10, 3, 32, 0, 0, 0, 0xFF00_0000).unwrap();
        assert_eq!(s.pitch(), 40);
        assert_eq!(s.pixels().len(), 120);
        assert!(!s.flags().contains(SurfaceFlags::HWSURFACE));
        assert!(s.flags().contains(SurfaceFlags::SRCPIXELALPHA));
        assert_eq!(s.clip_rect(), Rect::sized(10, 3));
        assert_eq!(s.alpha(), ALPHA_OPAQUE);

        let a = rgb565(1, 1);
        let b = rgb565(1, 1);
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_zero_area_is_placeholder() {
        let s = rgb565(0, 5);
        assert!(s.pixels().is_empty());
        assert!(s.get_pixel(0, 0).is_none());
    }

    #[test]
    fn test_bad_depth() {
        assert!(Surface::new(SurfaceFlags::empty(), 4, 4, 7, 0, 0, 0, 0).is_err());
    }

    #[test]
    fn test_clip_rect() {
        let mut s = rgb565(20, 10);
        assert!(s.set_clip_rect(Some(Rect::new(-5, 2, 10, 100))));
        assert_eq!(s.clip_rect(), Rect::new(0, 2, 5, 8));
        assert!(!s.set_clip_rect(Some(Rect::new(30, 0, 4, 4))));
        assert!(s.clip_rect().is_empty());
        assert!(s.set_clip_rect(None));
        assert_eq!(s.clip_rect(), s.bounds());
    }

    #[test]
    fn test_fill_respects_clip() {
        let mut s = rgb565(8, 8);
        s.set_clip_rect(Some(Rect::new(2, 2, 4, 4)));
        s.fill_rect(None, 0xF800).unwrap();
        assert_eq!(s.get_pixel(2, 2), Some(0xF800));
        assert_eq!(s.get_pixel(5, 5), Some(0xF800));
        assert_eq!(s.get_pixel(1, 2), Some(0));
        assert_eq!(s.get_pixel(6, 6), Some(0));

        s.fill_rect(Some(&Rect::new(0, 0, 3, 3)), 0x001F).unwrap();
        assert_eq!(s.get_pixel(2, 2), Some(0x001F));
        assert_eq!(s.get_pixel(0, 0), Some(0));
        // The second fill lies inside the first record.
        assert_eq!(s.dirty_info().len(), 1);
        assert_eq!(s.dirty_info().dirty_age, 2);
    }

    #[test]
    fn test_fill_sub_byte() {
        let mut s = Surface::new(SurfaceFlags::empty(), 10, 2, 1, 0, 0, 0, 0).unwrap();
        s.fill_rect(Some(&Rect::new(1, 0, 3, 1)), 1).unwrap();
        assert_eq!(s.pixels()[0], 0b0111_0000);
        assert_eq!(s.get_pixel(3, 0), Some(1));
        assert_eq!(s.get_pixel(4, 0), Some(0));
    }

    #[test]
    fn test_color_key_flags() {
        let mut s = rgb565(4, 4);
        s.set_color_key(SurfaceFlags::SRCCOLORKEY | SurfaceFlags::RLEACCEL, 0x1234)
            .unwrap();
        assert!(s.flags().contains(SurfaceFlags::SRCCOLORKEY | SurfaceFlags::RLEACCELOK));
        assert!(!s.flags().contains(SurfaceFlags::RLEACCEL));
        assert_eq!(s.color_key(), 0x1234);

        s.set_color_key(SurfaceFlags::SRCCOLORKEY, 0x1234).unwrap();
        assert!(!s.flags().contains(SurfaceFlags::RLEACCELOK));

        s.set_color_key(SurfaceFlags::empty(), 99).unwrap();
        assert!(!s.flags().intersects(SurfaceFlags::SRCCOLORKEY | SurfaceFlags::RLEACCELOK));
        assert_eq!(s.color_key(), 0);
    }

    #[test]
    fn test_alpha_flags() {
        let mut s = rgb565(4, 4);
        s.set_alpha(SurfaceFlags::SRCALPHA, 128).unwrap();
        assert!(s.flags().contains(SurfaceFlags::SRCALPHA));
        assert_eq!(s.alpha(), 128);

        s.set_alpha(SurfaceFlags::empty(), 10).unwrap();
        assert!(!s.flags().contains(SurfaceFlags::SRCALPHA));
        assert_eq!(s.alpha(), ALPHA_OPAQUE);

        s.set_alpha(SurfaceFlags::SRCPIXELALPHA | SurfaceFlags::RLEACCEL, 0).unwrap();
        assert!(s.flags().contains(SurfaceFlags::SRCPIXELALPHA | SurfaceFlags::RLEACCELOK));
    }

    fn blit_once(src: &mut Surface, dst: &mut Surface) {
        crate::blit::upper_blit_surfaces(src, None, dst, None).unwrap();
        assert_eq!(src.blit_map().dst(), Some(dst.id()));
        assert_eq!(src.blit_map().format_version(), dst.format_version());
    }

    #[test]
    fn test_set_alpha_idempotent() {
        let mut src = rgb565(4, 4);
        let mut dst = rgb565(4, 4);
        src.set_alpha(SurfaceFlags::SRCALPHA, 100).unwrap();
        blit_once(&mut src, &mut dst);

        src.set_alpha(SurfaceFlags::SRCALPHA, 100).unwrap();
        assert_eq!(src.blit_map().dst(), Some(dst.id()));
        src.set_alpha(SurfaceFlags::SRCALPHA, 120).unwrap();
        assert_eq!(src.blit_map().dst(), Some(dst.id()));
        assert_eq!(src.alpha(), 120);
    }

    #[test]
    fn test_set_alpha_crossing_opaque_invalidates() {
        let mut src = rgb565(4, 4);
        let mut dst = rgb565(4, 4);
        src.set_alpha(SurfaceFlags::SRCALPHA, 120).unwrap();
        blit_once(&mut src, &mut dst);
        src.set_alpha(SurfaceFlags::SRCALPHA, 255).unwrap();
        assert_eq!(src.blit_map().dst(), None);

        blit_once(&mut src, &mut dst);
        src.set_alpha(SurfaceFlags::SRCALPHA, 200).unwrap();
        assert_eq!(src.blit_map().dst(), None);

        blit_once(&mut src, &mut dst);
        src.set_alpha(SurfaceFlags::SRCALPHA | SurfaceFlags::RLEACCEL, 200).unwrap();
        assert_eq!(src.blit_map().dst(), None);
    }

    #[test]
    fn test_set_color_key_idempotent() {
        let mut src = rgb565(4, 4);
        let mut dst = rgb565(4, 4);
        src.set_color_key(SurfaceFlags::SRCCOLORKEY, 0x1234).unwrap();
        blit_once(&mut src, &mut dst);
        src.set_color_key(SurfaceFlags::SRCCOLORKEY, 0x1234).unwrap();
        assert_eq!(src.blit_map().dst(), Some(dst.id()));

        src.set_color_key(SurfaceFlags::SRCCOLORKEY | SurfaceFlags::RLEACCEL, 0x1234)
            .unwrap();
        assert_eq!(src.blit_map().dst(), None);
        blit_once(&mut src, &mut dst);
        src.set_color_key(SurfaceFlags::SRCCOLORKEY | SurfaceFlags::RLEACCELOK, 0x1234)
            .unwrap();
        assert_eq!(src.blit_map().dst(), Some(dst.id()));

        src.set_color_key(SurfaceFlags::SRCCOLORKEY | SurfaceFlags::RLEACCELOK, 0x4321)
            .unwrap();
        assert_eq!(src.blit_map().dst(), None);
    }

    #[test]
    fn test_set_colors_bumps_version() {
        let mut s = Surface::new(SurfaceFlags::empty(), 2, 2, 8, 0, 0, 0, 0).unwrap();
        let v = s.format_version();
        assert!(s.set_colors(0, &[Color::new(1, 2, 3)]));
        assert_eq!(s.format_version(), v + 1);
        assert_eq!(s.format().palette.as_ref().unwrap().colors[0], Color::new(1, 2, 3));

        let mut direct = rgb565(2, 2);
        assert!(!direct.set_colors(0, &[Color::new(1, 2, 3)]));
        assert_eq!(direct.format_version(), 0);
    }

    #[test]
    fn test_from_raw() {
        let mut backing = vec![0u8; 4 * 4 * 2];
        let ptr = NonNull::new(backing.as_mut_ptr()).unwrap();
        {
            let mut s = unsafe { Surface::from_raw(ptr, 4, 4, 16, 8, 0, 0, 0, 0) }.unwrap();
            assert!(s.flags().contains(SurfaceFlags::PREALLOC));
            s.put_pixel(1, 1, 0xABCD).unwrap();
        }
        assert_eq!(&backing[10..12], &[0xCD, 0xAB]);
    }

    #[test]
    fn test_surface_ref() {
        let a = SurfaceRef::new(rgb565(2, 2));
        let b = a.clone();
        assert_eq!(a.refcount(), 2);
        assert!(a.ptr_eq(&b));
        assert_eq!(a.id(), b.lock().id());
        drop(b);
        assert_eq!(a.refcount(), 1);
    }

    #[test]
    fn test_private_surface_has_no_shared_lock() {
        let s = rgb565(2, 2);
        assert!(s.lock_shared().unwrap().is_none());
    }
}
