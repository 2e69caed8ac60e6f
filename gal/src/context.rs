//! The GAL context.
//!
//! A [`GalContext`] owns the video device handle, the configuration and
//! the display surface. Everything that depends on "the current video
//! mode" (surface placement, display formats, hardware palettes, screen
//! updates) goes through it.

use alloc::sync::Arc;
use alloc::vec::Vec;
use core::ptr::NonNull;

use crate::blit::lower_blit_surfaces;
use crate::config::GalConfig;
use crate::error::{report, GalError};
use crate::pixels::{Color, PixelFormat};
use crate::rect::Rect;
use crate::sem;
use crate::shared::{self, SharedHandle};
use crate::stretch::StretchOptions;
use crate::surface::{PixelStorage, Surface, SurfaceFlags, SurfaceRef};
use crate::video::{describe_caps, ModeList, VideoCaps, VideoDevice, VideoHandle, VideoInfo};

/// Closest-depth search order, by bytes per pixel of the request. Slot 0
/// is replaced by the requested depth.
const CLOSEST_DEPTHS: [[u8; 8]; 4] = [
    [0, 8, 16, 15, 32, 24, 0, 0],
    [0, 16, 15, 32, 24, 8, 0, 0],
    [0, 24, 32, 16, 15, 8, 0, 0],
    [0, 32, 16, 15, 24, 8, 0, 0],
];

/// Video device, configuration and display surface of one client.
pub struct GalContext {
    config: GalConfig,
    video: VideoHandle,
    native: PixelFormat,
    screen: Option<SurfaceRef>,
    screen_flags: SurfaceFlags,
    pid: u64,
}

impl GalContext {
    /// Bring up the semaphore pool and the device.
    pub fn init(device: Arc<dyn VideoDevice>, config: GalConfig) -> Result<Self, GalError> {
        sem::init(config.sem_slots);
        let native = device.video_init().map_err(report)?;
        let video = VideoHandle::new(device, config.accel_mask);
        log::info!(
            "gal: video device '{}' ready, native depth {}, caps {}",
            video.device().name(),
            native.bits_per_pixel,
            describe_caps(video.caps())
        );
        Ok(Self {
            config,
            video,
            native,
            screen: None,
            screen_flags: SurfaceFlags::empty(),
            pid: 1,
        })
    }

    /// Process id recorded as the creator of shared surfaces.
    pub fn with_pid(mut self, pid: u64) -> Self {
        self.pid = pid;
        self
    }

    pub fn pid(&self) -> u64 {
        self.pid
    }

    pub fn config(&self) -> &GalConfig {
        &self.config
    }

    pub fn video(&self) -> &VideoHandle {
        &self.video
    }

    /// Device information with the effective capabilities.
    pub fn video_info(&self) -> VideoInfo {
        VideoInfo {
            caps: self.video.caps(),
            ..self.video.device().info()
        }
    }

    /// Default stretch settings, split into the configured number of bands.
    pub fn stretch_options(&self) -> StretchOptions {
        StretchOptions {
            tasks: self.config.concurrent_tasks,
            ..StretchOptions::default()
        }
    }

    /// Format the device reported at init.
    pub fn native_format(&self) -> &PixelFormat {
        &self.native
    }

    /// The display surface, once a mode is set.
    pub fn screen(&self) -> Option<SurfaceRef> {
        self.screen.clone()
    }

    /// Sizes available for `format` (the native format when `None`).
    pub fn list_modes(&self, format: Option<&PixelFormat>, flags: SurfaceFlags) -> ModeList {
        self.video
            .device()
            .list_modes(format.unwrap_or(&self.native), flags)
    }

    /// Depth of the closest supported mode of `width` x `height` for a
    /// `bpp` request, or 0 if there is none.
    pub fn video_mode_ok(&self, width: u32, height: u32, bpp: u8, flags: SurfaceFlags) -> u8 {
        if !(8..=32).contains(&bpp) || width == 0 || height == 0 {
            return 0;
        }
        let mut depths = CLOSEST_DEPTHS[(bpp as usize + 7) / 8 - 1];
        depths[0] = bpp;
        let any_size = self.video.caps().contains(VideoCaps::ANY_SIZE);

        for &depth in depths.iter().take_while(|&&d| d != 0) {
            let format = match PixelFormat::new(depth, 0, 0, 0, 0) {
                Ok(f) => f,
                Err(_) => continue,
            };
            match self.video.device().list_modes(&format, flags) {
                ModeList::None => continue,
                ModeList::Any => return depth,
                ModeList::Sizes(_) if any_size => return depth,
                ModeList::Sizes(sizes) => {
                    if sizes.iter().any(|r| r.width == width && r.height == height) {
                        return depth;
                    }
                }
            }
        }
        0
    }

    /// Set a display mode and return the new screen surface.
    ///
    /// `bpp` 0 keeps the current depth (the native one before any mode)
    /// and accepts any format. The screen comes back cleared to black with
    /// a full clip rectangle. Handles to a previous screen are left
    /// zero-sized.
    pub fn set_video_mode(
        &mut self,
        width: u32,
        height: u32,
        bpp: u8,
        flags: SurfaceFlags,
    ) -> Result<SurfaceRef, GalError> {
        let mut flags = flags;
        let bpp = if bpp == 0 {
            flags |= SurfaceFlags::ANYFORMAT;
            match &self.screen {
                Some(screen) => screen.lock().format().bits_per_pixel,
                None => self.native.bits_per_pixel,
            }
        } else {
            bpp
        };

        let depth = self.video_mode_ok(width, height, bpp, flags);
        if depth == 0 {
            return Err(report(GalError::NoVideoMode));
        }
        if depth > 8 {
            flags.remove(SurfaceFlags::HWPALETTE);
        }

        if let Some(old) = self.screen.take() {
            old.lock().retire();
        }
        self.screen_flags = SurfaceFlags::empty();

        let mode = self
            .video
            .device()
            .set_video_mode(width, height, depth, flags)
            .map_err(report)?;
        if mode.width < width || mode.height < height {
            return Err(report(GalError::NoVideoMode));
        }

        let mut format = PixelFormat::new(mode.bpp, mode.rmask, mode.gmask, mode.bmask, mode.amask)
            .map_err(report)?;
        if format.palette.is_some() {
            format.set_dithered_palette();
            if let Some(palette) = &format.palette {
                if let Err(e) = self.video.device().set_colors(0, &palette.colors) {
                    log::debug!("gal: device kept its palette: {}", e);
                }
            }
        }

        let pitch = mode.memory.pitch;
        let mut screen = Surface::with_storage(
            mode.flags,
            format,
            mode.width,
            mode.height,
            pitch,
            PixelStorage::Framebuffer(mode.memory),
            Some(self.video.clone()),
        );
        screen.rle_allowed = self.config.rle;
        screen.set_clip_rect(None);
        let black = screen.format().map_rgb(0, 0, 0);
        screen.fill_rect(None, black)?;

        log::info!(
            "gal: video mode {}x{}x{} (requested {}x{}x{}), flags {:?}",
            mode.width,
            mode.height,
            mode.bpp,
            width,
            height,
            bpp,
            mode.flags
        );
        self.screen_flags = screen.flags();
        let screen = SurfaceRef::new(screen);
        self.screen = Some(screen.clone());
        Ok(screen)
    }

    /// Build a surface, in video memory when the screen is and the device
    /// can blit what `flags` asks for.
    fn place_surface(
        &self,
        flags: SurfaceFlags,
        width: u32,
        height: u32,
        depth: u8,
        masks: (u32, u32, u32, u32),
    ) -> Result<Surface, GalError> {
        let (rmask, gmask, bmask, amask) = masks;
        let caps = self.video.caps();
        let mut want_hw = false;
        if self.screen_flags.contains(SurfaceFlags::HWSURFACE) {
            want_hw = flags.contains(SurfaceFlags::HWSURFACE)
                || flags.intersects(SurfaceFlags::SRCCOLORKEY | SurfaceFlags::SRCALPHA);
            if flags.contains(SurfaceFlags::SRCCOLORKEY) && !caps.contains(VideoCaps::HW_BLIT_CC) {
                want_hw = false;
            }
            if flags.contains(SurfaceFlags::SRCALPHA) && !caps.contains(VideoCaps::HW_BLIT_A) {
                want_hw = false;
            }
        }

        let mut surface = if want_hw && width > 0 && height > 0 {
            let format = PixelFormat::new(depth, rmask, gmask, bmask, amask).map_err(report)?;
            match self.video.device().alloc_hw_surface(width, height, &format) {
                Ok(hw) => Surface::with_storage(
                    SurfaceFlags::HWSURFACE,
                    format,
                    width,
                    height,
                    hw.pitch,
                    PixelStorage::Device(hw),
                    Some(self.video.clone()),
                ),
                Err(e) => {
                    log::debug!(
                        "gal: no video memory for {}x{}x{} ({}), using system memory",
                        width,
                        height,
                        depth,
                        e
                    );
                    Surface::new(SurfaceFlags::empty(), width, height, depth, rmask, gmask, bmask, amask)?
                }
            }
        } else {
            Surface::new(SurfaceFlags::empty(), width, height, depth, rmask, gmask, bmask, amask)?
        };
        surface.rle_allowed = self.config.rle;
        Ok(surface)
    }

    /// Create a zero-filled surface.
    ///
    /// `HWSURFACE`, `SRCCOLORKEY` and `SRCALPHA` in `flags` only steer
    /// placement; keying and blending are switched on afterwards with
    /// [`Surface::set_color_key`] and [`Surface::set_alpha`].
    pub fn create_surface(
        &self,
        flags: SurfaceFlags,
        width: u32,
        height: u32,
        depth: u8,
        rmask: u32,
        gmask: u32,
        bmask: u32,
        amask: u32,
    ) -> Result<SurfaceRef, GalError> {
        let surface = self.place_surface(flags, width, height, depth, (rmask, gmask, bmask, amask))?;
        Ok(SurfaceRef::new(surface))
    }

    /// Wrap caller memory in a surface.
    ///
    /// # Safety
    /// As for [`Surface::from_raw`].
    pub unsafe fn create_surface_from(
        &self,
        pixels: NonNull<u8>,
        width: u32,
        height: u32,
        depth: u8,
        pitch: u32,
        rmask: u32,
        gmask: u32,
        bmask: u32,
        amask: u32,
    ) -> Result<SurfaceRef, GalError> {
        let mut surface =
            Surface::from_raw(pixels, width, height, depth, pitch, rmask, gmask, bmask, amask)?;
        surface.rle_allowed = self.config.rle;
        Ok(SurfaceRef::new(surface))
    }

    /// Create a surface other processes can attach to.
    pub fn create_shared_surface(
        &self,
        flags: SurfaceFlags,
        width: u32,
        height: u32,
        depth: u8,
        rmask: u32,
        gmask: u32,
        bmask: u32,
        amask: u32,
    ) -> Result<SurfaceRef, GalError> {
        let mut surface = shared::create_shared_surface(
            Some(&self.video),
            self.pid,
            flags,
            width,
            height,
            depth,
            rmask,
            gmask,
            bmask,
            amask,
        )?;
        surface.rle_allowed = self.config.rle;
        Ok(SurfaceRef::new(surface))
    }

    /// Attach to a surface shared by another process.
    pub fn attach_shared_surface(
        &self,
        handle: SharedHandle,
        writable: bool,
    ) -> Result<SurfaceRef, GalError> {
        let mut surface = shared::attach_shared_surface(Some(&self.video), self.pid, handle, writable)?;
        surface.rle_allowed = self.config.rle;
        Ok(SurfaceRef::new(surface))
    }

    /// Copy `src` into a new surface of `format`.
    ///
    /// The colorkey and per-surface alpha of `src` carry over when `flags`
    /// asks for them. A colorkeyed source converted to a format with alpha
    /// without `SRCCOLORKEY` in `flags` leaves keyed pixels transparent.
    pub fn convert_surface(
        &self,
        src: &SurfaceRef,
        format: &PixelFormat,
        flags: SurfaceFlags,
    ) -> Result<SurfaceRef, GalError> {
        if let Some(palette) = &format.palette {
            if palette.colors.iter().all(|c| c.r == 0 && c.g == 0 && c.b == 0) {
                return Err(report(GalError::InvalidFormat("empty destination palette".into())));
            }
        }

        let mut s = src.lock();
        let mut convert = self.place_surface(
            flags,
            s.width(),
            s.height(),
            format.bits_per_pixel,
            (format.rmask, format.gmask, format.bmask, format.amask),
        )?;
        if let Some(palette) = &format.palette {
            convert.set_colors(0, &palette.colors);
            convert.format.dithered = format.dithered;
        }

        let mut surface_flags = s.flags();
        let mut colorkey = 0;
        if surface_flags.contains(SurfaceFlags::SRCCOLORKEY) {
            if !flags.contains(SurfaceFlags::SRCCOLORKEY) && format.amask != 0 {
                surface_flags.remove(SurfaceFlags::SRCCOLORKEY);
            } else {
                colorkey = s.color_key();
                s.set_color_key(SurfaceFlags::empty(), 0)?;
            }
        }
        let blending = surface_flags.intersects(SurfaceFlags::SRCALPHA | SurfaceFlags::SRCPIXELALPHA);
        let alpha = s.alpha();
        if blending {
            s.set_alpha(SurfaceFlags::empty(), 0)?;
        }

        let bounds = s.bounds();
        let copied = lower_blit_surfaces(&mut s, &bounds, &mut convert, &bounds);

        convert.set_clip_rect(Some(s.clip_rect()));
        let rle_ok = flags & SurfaceFlags::RLEACCELOK;
        if surface_flags.contains(SurfaceFlags::SRCCOLORKEY) {
            let cflags = surface_flags & (SurfaceFlags::SRCCOLORKEY | SurfaceFlags::RLEACCELOK);
            let (r, g, b) = s.format().rgb_from_pixel(colorkey);
            let key = convert.format().map_rgb(r as u8, g as u8, b as u8);
            convert.set_color_key(cflags | rle_ok, key)?;
            s.set_color_key(cflags, colorkey)?;
        }
        if blending {
            let rle = surface_flags & SurfaceFlags::RLEACCELOK;
            if surface_flags.contains(SurfaceFlags::SRCALPHA) {
                convert.set_alpha(SurfaceFlags::SRCALPHA | rle | rle_ok, alpha)?;
                s.set_alpha(SurfaceFlags::SRCALPHA | rle, alpha)?;
            }
            if surface_flags.contains(SurfaceFlags::SRCPIXELALPHA) {
                s.set_alpha(SurfaceFlags::SRCPIXELALPHA | rle, alpha)?;
            }
        }
        copied?;
        Ok(SurfaceRef::new(convert))
    }

    fn screen_format(&self) -> Result<PixelFormat, GalError> {
        match &self.screen {
            Some(screen) => Ok(screen.lock().format().clone()),
            None => Err(report(GalError::NoVideoMode)),
        }
    }

    /// Convert `src` to the screen format for fast blitting.
    pub fn display_format(&self, src: &SurfaceRef) -> Result<SurfaceRef, GalError> {
        let format = self.screen_format()?;
        let flags = (self.screen_flags & SurfaceFlags::HWSURFACE)
            | (src.lock().flags()
                & (SurfaceFlags::SRCCOLORKEY | SurfaceFlags::SRCALPHA | SurfaceFlags::RLEACCELOK));
        self.convert_surface(src, &format, flags)
    }

    /// Convert `src` to 32-bit with an alpha channel, keeping the screen's
    /// red/blue order where the screen has one.
    pub fn display_format_alpha(&self, src: &SurfaceRef) -> Result<SurfaceRef, GalError> {
        let vf = self.screen_format()?;
        let (mut rmask, gmask, mut bmask, amask) = (0x00FF_0000, 0x0000_FF00, 0x0000_00FF, 0xFF00_0000);
        let bgr = match vf.bytes_per_pixel {
            2 => vf.rmask == 0x1F && (vf.bmask == 0xF800 || vf.bmask == 0x7C00),
            3 | 4 => vf.rmask == 0xFF && vf.bmask == 0xFF_0000,
            _ => false,
        };
        if bgr {
            rmask = 0x0000_00FF;
            bmask = 0x00FF_0000;
        }
        let format = PixelFormat::new(32, rmask, gmask, bmask, amask).map_err(report)?;
        let flags = (self.screen_flags & SurfaceFlags::HWSURFACE)
            | (src.lock().flags() & (SurfaceFlags::SRCALPHA | SurfaceFlags::RLEACCELOK));
        self.convert_surface(src, &format, flags)
    }

    /// Load palette entries of `surface`; the screen's go to the device
    /// too. Returns false when the surface has no palette or not every
    /// entry was taken.
    pub fn set_colors(&self, surface: &SurfaceRef, first: usize, colors: &[Color]) -> bool {
        let (mut complete, fitting) = {
            let mut s = surface.lock();
            let size = match &s.format().palette {
                Some(p) => p.ncolors(),
                None => return false,
            };
            let fitting = colors.len().min(size.saturating_sub(first));
            (s.set_colors(first, colors), fitting)
        };

        let is_screen = self.screen.as_ref().map_or(false, |s| s.ptr_eq(surface));
        if is_screen && fitting > 0 {
            if let Err(e) = self.video.device().set_colors(first, &colors[..fitting]) {
                log::debug!("gal: hardware palette not updated: {}", e);
                complete = false;
            }
        }
        complete
    }

    /// Push changed screen areas to the display.
    pub fn update_rects(&self, rects: &[Rect]) {
        let screen = match &self.screen {
            Some(s) => s,
            None => return,
        };
        let bounds = screen.lock().bounds();
        let clipped: Vec<Rect> = rects.iter().filter_map(|r| r.intersection(&bounds)).collect();
        if !clipped.is_empty() {
            self.video.device().update_rects(&clipped);
        }
    }

    /// [`update_rects`](Self::update_rects) for one area; a zero width or
    /// height extends to the screen edge.
    pub fn update_rect(&self, x: i32, y: i32, width: u32, height: u32) {
        let bounds = match &self.screen {
            Some(s) => s.lock().bounds(),
            None => return,
        };
        let width = if width == 0 { bounds.width } else { width };
        let height = if height == 0 { bounds.height } else { height };
        self.update_rects(&[Rect::new(x, y, width, height)]);
    }

    /// Drop a surface handle. The screen is never released this way;
    /// returns false for it.
    pub fn free_surface(&self, surface: SurfaceRef) -> bool {
        if self.screen.as_ref().map_or(false, |s| s.ptr_eq(&surface)) {
            log::debug!("gal: refusing to free the screen surface");
            return false;
        }
        drop(surface);
        true
    }

    /// Release the screen and shut the device down.
    pub fn quit(self) {}
}

impl Drop for GalContext {
    fn drop(&mut self) {
        if let Some(screen) = self.screen.take() {
            screen.lock().retire();
        }
        self.video.device().video_quit();
        log::info!("gal: video device '{}' shut down", self.video.device().name());
    }
}

impl core::fmt::Debug for GalContext {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("GalContext")
            .field("video", &self.video)
            .field("screen", &self.screen)
            .field("pid", &self.pid)
            .finish()
    }
}
