//! Video device interface.
//!
//! Hardware backends implement [`VideoDevice`]. Every operation has a
//! default that declines (`Err(GalError::Unsupported)`, `false` or a neutral
//! value), so a backend only implements what its hardware can do and the
//! engine falls back to software for the rest.
//!
//! Surfaces are described to the device by [`HwSurfaceDesc`] rather than by
//! reference: the engine keeps surfaces locked while the device works on the
//! memory behind the descriptor's handle.

pub mod memory;

use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::ptr::NonNull;

use crate::error::GalError;
use crate::pixels::{Color, PixelFormat};
use crate::rect::Rect;
use crate::surface::SurfaceFlags;

pub use memory::MemoryVideoDevice;

bitflags::bitflags! {
    /// Acceleration capabilities advertised by a device.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct VideoCaps: u32 {
        /// Rectangle fills in video memory.
        const HW_FILL = 0x0001;
        /// Video-to-video copies.
        const HW_BLIT = 0x0002;
        /// Video-to-video copies honoring a colorkey.
        const HW_BLIT_CC = 0x0004;
        /// Video-to-video copies with per-surface alpha.
        const HW_BLIT_A = 0x0008;
        /// System-to-video copies.
        const SW_BLIT = 0x0010;
        /// System-to-video copies honoring a colorkey.
        const SW_BLIT_CC = 0x0020;
        /// System-to-video copies with per-surface alpha.
        const SW_BLIT_A = 0x0040;
        /// Any mode size is accepted.
        const ANY_SIZE = 0x0100;
        /// Device memory can hold more than the display surface.
        const MULTI_SURFACE = 0x0200;
    }
}

/// Device description returned by [`VideoDevice::info`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoInfo {
    pub caps: VideoCaps,
    /// Total video memory in kilobytes.
    pub video_mem_kb: u32,
}

impl Default for VideoInfo {
    fn default() -> Self {
        Self {
            caps: VideoCaps::empty(),
            video_mem_kb: 0,
        }
    }
}

/// Resolutions a device offers for a format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModeList {
    /// Any size is acceptable.
    Any,
    /// Only these sizes, largest first.
    Sizes(Vec<Rect>),
    /// The format is not available at all.
    None,
}

/// Device memory handed to a surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HwAllocation {
    /// Device-private handle; passed back on free.
    pub handle: u64,
    /// CPU address of the memory. Valid while the device lives and the
    /// handle has not been freed.
    pub ptr: NonNull<u8>,
    /// Addressable length in bytes.
    pub len: usize,
    /// Row stride chosen by the device.
    pub pitch: u32,
}

/// Memory of a shared surface living in device memory. The header sits at
/// offset 0 and the pixels at `pixels_off`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SharedHwAllocation {
    pub handle: u64,
    pub ptr: NonNull<u8>,
    pub map_size: usize,
    pub pixels_off: usize,
}

/// Result of a mode set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoMode {
    pub width: u32,
    pub height: u32,
    pub bpp: u8,
    pub rmask: u32,
    pub gmask: u32,
    pub bmask: u32,
    pub amask: u32,
    pub flags: SurfaceFlags,
    /// Framebuffer memory.
    pub memory: HwAllocation,
}

/// A surface as seen by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HwSurfaceDesc {
    /// Device handle, `None` for system memory.
    pub handle: Option<u64>,
    pub width: u32,
    pub height: u32,
    pub pitch: u32,
    pub bytes_per_pixel: u8,
}

/// Classification passed to [`VideoDevice::check_hw_blit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HwBlitCheck {
    pub src: HwSurfaceDesc,
    pub dst: HwSurfaceDesc,
    pub colorkey: bool,
    pub alpha: bool,
}

/// One accelerated copy. Rectangles are clipped and equal-sized.
#[derive(Debug, Clone, Copy)]
pub struct HwBlitRequest<'a> {
    pub src: HwSurfaceDesc,
    /// Source pixels when the source is in system memory.
    pub src_pixels: Option<&'a [u8]>,
    pub src_rect: Rect,
    pub dst: HwSurfaceDesc,
    pub dst_rect: Rect,
    /// Source colorkey and the alpha mask to ignore when comparing.
    pub colorkey: Option<(u32, u32)>,
    /// Per-surface alpha.
    pub alpha: Option<u8>,
}

/// Capability table of a display backend.
pub trait VideoDevice: Send + Sync {
    /// Driver name.
    fn name(&self) -> &str;

    /// Capabilities and memory size.
    fn info(&self) -> VideoInfo {
        VideoInfo::default()
    }

    /// Probe the hardware and report its native format.
    fn video_init(&self) -> Result<PixelFormat, GalError> {
        Err(GalError::Unsupported)
    }

    /// Sizes available for `format`.
    fn list_modes(&self, format: &PixelFormat, flags: SurfaceFlags) -> ModeList {
        ModeList::None
    }

    /// Program a display mode and return its framebuffer.
    fn set_video_mode(
        &self,
        width: u32,
        height: u32,
        bpp: u8,
        flags: SurfaceFlags,
    ) -> Result<VideoMode, GalError> {
        Err(GalError::Unsupported)
    }

    /// Load hardware palette entries.
    fn set_colors(&self, first: usize, colors: &[Color]) -> Result<(), GalError> {
        Err(GalError::Unsupported)
    }

    /// Push changed screen regions to the display.
    fn update_rects(&self, rects: &[Rect]) {}

    /// Allocate device memory for a `width` x `height` surface.
    fn alloc_hw_surface(
        &self,
        width: u32,
        height: u32,
        format: &PixelFormat,
    ) -> Result<HwAllocation, GalError> {
        Err(GalError::Unsupported)
    }

    /// Return device memory.
    fn free_hw_surface(&self, handle: u64) {}

    /// Whether the device can perform the classified blit.
    fn check_hw_blit(&self, check: &HwBlitCheck) -> bool {
        false
    }

    /// Perform an accelerated blit.
    fn hw_blit(&self, request: &HwBlitRequest<'_>) -> Result<(), GalError> {
        Err(GalError::Unsupported)
    }

    /// Fill a rectangle of a device surface.
    fn fill_hw_rect(&self, dst: &HwSurfaceDesc, rect: &Rect, color: u32) -> Result<(), GalError> {
        Err(GalError::Unsupported)
    }

    /// Register a colorkey for a device surface.
    fn set_hw_color_key(&self, surface: &HwSurfaceDesc, key: u32) -> Result<(), GalError> {
        Err(GalError::Unsupported)
    }

    /// Register per-surface alpha for a device surface.
    fn set_hw_alpha(&self, surface: &HwSurfaceDesc, alpha: u8) -> Result<(), GalError> {
        Err(GalError::Unsupported)
    }

    /// Allocate device memory for a shared surface of `header_size` header
    /// bytes followed by `pixels_size` pixel bytes.
    fn alloc_shared_hw_surface(
        &self,
        header_size: usize,
        pixels_size: usize,
    ) -> Result<SharedHwAllocation, GalError> {
        Err(GalError::Unsupported)
    }

    /// Release shared device memory (owner side).
    fn free_shared_hw_surface(&self, handle: u64) {}

    /// Map shared device memory created elsewhere.
    fn attach_shared_hw_surface(
        &self,
        handle: u64,
        writable: bool,
    ) -> Result<SharedHwAllocation, GalError> {
        Err(GalError::Unsupported)
    }

    /// Drop a mapping made by `attach_shared_hw_surface`.
    fn detach_shared_hw_surface(&self, handle: u64) {}

    /// Shut the device down.
    fn video_quit(&self) {}
}

/// A device together with the capabilities the context lets surfaces use.
#[derive(Clone)]
pub struct VideoHandle {
    device: Arc<dyn VideoDevice>,
    caps: VideoCaps,
}

impl VideoHandle {
    /// Wrap `device`, restricting its advertised caps to `mask`.
    pub fn new(device: Arc<dyn VideoDevice>, mask: VideoCaps) -> Self {
        let caps = device.info().caps & mask;
        Self { device, caps }
    }

    /// The device.
    pub fn device(&self) -> &dyn VideoDevice {
        &*self.device
    }

    /// Shared ownership of the device.
    pub fn arc(&self) -> Arc<dyn VideoDevice> {
        self.device.clone()
    }

    /// Effective capabilities.
    pub fn caps(&self) -> VideoCaps {
        self.caps
    }

    /// Whether both handles drive the same device.
    pub fn same_device(&self, other: &VideoHandle) -> bool {
        Arc::as_ptr(&self.device) as *const () == Arc::as_ptr(&other.device) as *const ()
    }
}

impl core::fmt::Debug for VideoHandle {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("VideoHandle")
            .field("device", &self.device.name())
            .field("caps", &self.caps)
            .finish()
    }
}

/// Human readable capability summary, used in logs.
pub fn describe_caps(caps: VideoCaps) -> String {
    let mut out = String::new();
    for (name, _) in caps.iter_names() {
        if !out.is_empty() {
            out.push('|');
        }
        out.push_str(name);
    }
    if out.is_empty() {
        out.push_str("none");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NullDevice;

    impl VideoDevice for NullDevice {
        fn name(&self) -> &str {
            "null"
        }
    }

    #[test]
    fn test_defaults_decline() {
        let dev = NullDevice;
        assert_eq!(dev.info().caps, VideoCaps::empty());
        assert_eq!(dev.video_init().unwrap_err(), GalError::Unsupported);
        assert_eq!(
            dev.list_modes(&PixelFormat::rgb565(), SurfaceFlags::empty()),
            ModeList::None
        );
        let desc = HwSurfaceDesc {
            handle: Some(1),
            width: 1,
            height: 1,
            pitch: 4,
            bytes_per_pixel: 4,
        };
        assert!(!dev.check_hw_blit(&HwBlitCheck {
            src: desc,
            dst: desc,
            colorkey: false,
            alpha: false,
        }));
        assert!(dev.fill_hw_rect(&desc, &Rect::sized(1, 1), 0).is_err());
    }

    #[test]
    fn test_handle_masks_caps() {
        let dev: Arc<dyn VideoDevice> = Arc::new(
            MemoryVideoDevice::new(PixelFormat::xrgb8888(), 1 << 16).unwrap(),
        );
        let a = VideoHandle::new(dev.clone(), VideoCaps::HW_FILL);
        let b = VideoHandle::new(dev, VideoCaps::all());
        assert_eq!(a.caps(), VideoCaps::HW_FILL);
        assert!(b.caps().contains(VideoCaps::HW_BLIT));
        assert!(a.same_device(&b));

        let other = VideoHandle::new(Arc::new(NullDevice), VideoCaps::all());
        assert!(!a.same_device(&other));
    }

    #[test]
    fn test_describe_caps() {
        assert_eq!(describe_caps(VideoCaps::empty()), "none");
        assert_eq!(
            describe_caps(VideoCaps::HW_FILL | VideoCaps::HW_BLIT),
            "HW_FILL|HW_BLIT"
        );
    }
}
