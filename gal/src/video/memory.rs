//! RAM-backed video device.
//!
//! "Video memory" is one zeroed pool carved up first-fit. The device
//! implements every operation of the capability table, so it serves both
//! headless targets and as the reference backend for the engine's hardware
//! paths.

use alloc::alloc::{alloc_zeroed, dealloc, Layout};
use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::vec;
use alloc::vec::Vec;
use core::ptr::NonNull;
use spin::Mutex;

use super::{
    HwAllocation, HwBlitCheck, HwBlitRequest, HwSurfaceDesc, ModeList, SharedHwAllocation,
    VideoCaps, VideoDevice, VideoInfo, VideoMode,
};
use crate::config::PAGE_SIZE;
use crate::error::GalError;
use crate::pixels::{calculate_pitch, read_pixel, write_pixel, Color, PixelFormat};
use crate::rect::Rect;
use crate::surface::SurfaceFlags;

/// Allocation granularity inside the pool.
const VRAM_ALIGN: usize = 64;

#[derive(Debug, Clone, Copy)]
struct Block {
    offset: usize,
    len: usize,
    /// Shared blocks: live mappings, including the owner's.
    shared_refs: u32,
}

struct VramState {
    blocks: BTreeMap<u64, Block>,
    next_handle: u64,
    framebuffer: Option<u64>,
    palette: Vec<Color>,
    initialized: bool,
}

impl VramState {
    /// First-fit search over the gaps between live blocks.
    fn alloc(&mut self, len: usize, capacity: usize) -> Result<(u64, usize), GalError> {
        let len = (len.max(1) + VRAM_ALIGN - 1) / VRAM_ALIGN * VRAM_ALIGN;
        let mut used: Vec<(usize, usize)> = self.blocks.values().map(|b| (b.offset, b.len)).collect();
        used.sort_unstable();

        let mut cursor = 0usize;
        for (offset, size) in used {
            if offset - cursor >= len {
                break;
            }
            cursor = offset + size;
        }
        if cursor + len > capacity {
            return Err(GalError::OutOfMemory);
        }

        let handle = self.next_handle;
        self.next_handle += 1;
        self.blocks.insert(
            handle,
            Block {
                offset: cursor,
                len,
                shared_refs: 0,
            },
        );
        Ok((handle, cursor))
    }

    fn block(&self, handle: u64) -> Result<Block, GalError> {
        self.blocks
            .get(&handle)
            .copied()
            .ok_or_else(|| GalError::Device(alloc::format!("unknown video memory handle {}", handle)))
    }
}

/// Video device whose memory is a RAM pool.
pub struct MemoryVideoDevice {
    name: String,
    caps: VideoCaps,
    native: PixelFormat,
    modes: ModeList,
    vram: NonNull<u8>,
    layout: Layout,
    state: Mutex<VramState>,
}

// The pool is only touched under `state` or through surfaces the engine
// holds locked.
unsafe impl Send for MemoryVideoDevice {}
unsafe impl Sync for MemoryVideoDevice {}

impl MemoryVideoDevice {
    /// Device with `vram_size` bytes of pool, native format `native`, and
    /// fill/copy/colorkey acceleration.
    pub fn new(native: PixelFormat, vram_size: usize) -> Result<Self, GalError> {
        let layout = Layout::from_size_align(vram_size.max(PAGE_SIZE), PAGE_SIZE)
            .map_err(|_| GalError::OutOfMemory)?;
        // SAFETY: layout size is non-zero.
        let raw = unsafe { alloc_zeroed(layout) };
        let vram = NonNull::new(raw).ok_or(GalError::OutOfMemory)?;

        Ok(Self {
            name: String::from("memory"),
            caps: VideoCaps::HW_FILL
                | VideoCaps::HW_BLIT
                | VideoCaps::HW_BLIT_CC
                | VideoCaps::SW_BLIT
                | VideoCaps::SW_BLIT_CC
                | VideoCaps::ANY_SIZE
                | VideoCaps::MULTI_SURFACE,
            native,
            modes: ModeList::Any,
            vram,
            layout,
            state: Mutex::new(VramState {
                blocks: BTreeMap::new(),
                next_handle: 1,
                framebuffer: None,
                palette: Vec::new(),
                initialized: false,
            }),
        })
    }

    /// Replace the advertised capabilities.
    pub fn with_caps(mut self, caps: VideoCaps) -> Self {
        self.caps = caps;
        self
    }

    /// Restrict the device to fixed mode sizes.
    pub fn with_modes(mut self, sizes: Vec<Rect>) -> Self {
        self.caps.remove(VideoCaps::ANY_SIZE);
        self.modes = ModeList::Sizes(sizes);
        self
    }

    /// Live allocations in the pool.
    pub fn allocation_count(&self) -> usize {
        self.state.lock().blocks.len()
    }

    /// Hardware palette as last loaded.
    pub fn palette(&self) -> Vec<Color> {
        self.state.lock().palette.clone()
    }

    fn capacity(&self) -> usize {
        self.layout.size()
    }

    fn ptr_at(&self, offset: usize) -> NonNull<u8> {
        // SAFETY: offsets come from blocks inside the pool.
        unsafe { NonNull::new_unchecked(self.vram.as_ptr().add(offset)) }
    }

    /// Mutable view of a block.
    ///
    /// # Safety
    /// The caller must hold `state` and no other view of the block may be
    /// alive.
    unsafe fn block_bytes(&self, block: &Block) -> &mut [u8] {
        core::slice::from_raw_parts_mut(self.vram.as_ptr().add(block.offset), block.len)
    }

    fn release(&self, state: &mut VramState, handle: u64) {
        if state.blocks.remove(&handle).is_some() {
            log::trace!("gal: memory device freed handle {}", handle);
        }
    }
}

impl Drop for MemoryVideoDevice {
    fn drop(&mut self) {
        // SAFETY: allocated in `new` with the same layout.
        unsafe { dealloc(self.vram.as_ptr(), self.layout) };
    }
}

fn desc_fits(desc: &HwSurfaceDesc, rect: &Rect, len: usize) -> bool {
    rect.x >= 0
        && rect.y >= 0
        && rect.right() as u32 <= desc.width
        && rect.bottom() as u32 <= desc.height
        && (rect.bottom() as usize).saturating_sub(1) * desc.pitch as usize
            + rect.right() as usize * desc.bytes_per_pixel as usize
            <= len
}

impl VideoDevice for MemoryVideoDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn info(&self) -> VideoInfo {
        VideoInfo {
            caps: self.caps,
            video_mem_kb: (self.capacity() / 1024) as u32,
        }
    }

    fn video_init(&self) -> Result<PixelFormat, GalError> {
        self.state.lock().initialized = true;
        log::info!(
            "gal: memory video device, {} KB, native depth {}",
            self.capacity() / 1024,
            self.native.bits_per_pixel
        );
        Ok(self.native.clone())
    }

    fn list_modes(&self, format: &PixelFormat, flags: SurfaceFlags) -> ModeList {
        match format.bits_per_pixel {
            8 | 15 | 16 | 24 | 32 => self.modes.clone(),
            _ => ModeList::None,
        }
    }

    fn set_video_mode(
        &self,
        width: u32,
        height: u32,
        bpp: u8,
        flags: SurfaceFlags,
    ) -> Result<VideoMode, GalError> {
        if let ModeList::Sizes(sizes) = &self.modes {
            if !sizes.iter().any(|r| r.width == width && r.height == height) {
                return Err(GalError::NoVideoMode);
            }
        }

        let (rmask, gmask, bmask, amask) = if bpp == self.native.bits_per_pixel {
            (self.native.rmask, self.native.gmask, self.native.bmask, self.native.amask)
        } else {
            (0, 0, 0, 0)
        };
        let format = PixelFormat::new(bpp, rmask, gmask, bmask, amask)?;
        let pitch = calculate_pitch(&format, width);
        let size = pitch as usize * height as usize;

        let mut state = self.state.lock();
        if let Some(old) = state.framebuffer.take() {
            self.release(&mut state, old);
        }
        let (handle, offset) = state.alloc(size, self.capacity())?;
        state.framebuffer = Some(handle);
        let block = state.block(handle)?;
        // SAFETY: block was just allocated; state is held.
        unsafe { self.block_bytes(&block) }.fill(0);

        Ok(VideoMode {
            width,
            height,
            bpp,
            rmask: format.rmask,
            gmask: format.gmask,
            bmask: format.bmask,
            amask: format.amask,
            flags: SurfaceFlags::HWSURFACE | (flags & SurfaceFlags::FULLSCREEN),
            memory: HwAllocation {
                handle,
                ptr: self.ptr_at(offset),
                len: block.len,
                pitch,
            },
        })
    }

    fn set_colors(&self, first: usize, colors: &[Color]) -> Result<(), GalError> {
        let mut state = self.state.lock();
        if state.palette.len() < first + colors.len() {
            state.palette.resize(first + colors.len(), Color::default());
        }
        state.palette[first..first + colors.len()].copy_from_slice(colors);
        Ok(())
    }

    fn alloc_hw_surface(
        &self,
        width: u32,
        height: u32,
        format: &PixelFormat,
    ) -> Result<HwAllocation, GalError> {
        let pitch = calculate_pitch(format, width);
        let size = pitch as usize * height as usize;
        let mut state = self.state.lock();
        let (handle, offset) = state.alloc(size, self.capacity())?;
        let block = state.block(handle)?;
        // SAFETY: freshly allocated block, state held.
        unsafe { self.block_bytes(&block) }.fill(0);
        Ok(HwAllocation {
            handle,
            ptr: self.ptr_at(offset),
            len: block.len,
            pitch,
        })
    }

    fn free_hw_surface(&self, handle: u64) {
        let mut state = self.state.lock();
        self.release(&mut state, handle);
    }

    fn check_hw_blit(&self, check: &HwBlitCheck) -> bool {
        if check.dst.handle.is_none() {
            return false;
        }
        let (copy, keyed, alpha) = if check.src.handle.is_some() {
            (VideoCaps::HW_BLIT, VideoCaps::HW_BLIT_CC, VideoCaps::HW_BLIT_A)
        } else {
            (VideoCaps::SW_BLIT, VideoCaps::SW_BLIT_CC, VideoCaps::SW_BLIT_A)
        };
        if !self.caps.contains(copy) {
            return false;
        }
        if check.colorkey && !self.caps.contains(keyed) {
            return false;
        }
        if check.alpha && !(self.caps.contains(alpha) && check.dst.bytes_per_pixel >= 3) {
            return false;
        }
        check.src.bytes_per_pixel == check.dst.bytes_per_pixel
    }

    fn hw_blit(&self, request: &HwBlitRequest<'_>) -> Result<(), GalError> {
        let bpp = request.dst.bytes_per_pixel as usize;
        if request.src.bytes_per_pixel as usize != bpp || request.src_rect.width != request.dst_rect.width
            || request.src_rect.height != request.dst_rect.height
        {
            return Err(GalError::InvalidRect);
        }
        if request.alpha.is_some() && bpp < 3 {
            return Err(GalError::Unsupported);
        }

        let state = self.state.lock();
        let dst_handle = request.dst.handle.ok_or(GalError::Unsupported)?;
        let dst_block = state.block(dst_handle)?;

        // Snapshot the source rect so same-handle overlaps read original pixels.
        let row_len = request.src_rect.width as usize * bpp;
        let rows = request.src_rect.height as usize;
        let mut snapshot = vec![0u8; row_len * rows];
        {
            let src_pitch = request.src.pitch as usize;
            let (src, src_len): (&[u8], usize) = match (request.src.handle, request.src_pixels) {
                (Some(handle), _) => {
                    let block = state.block(handle)?;
                    // SAFETY: state held; the view ends before dst is borrowed.
                    let bytes = unsafe { self.block_bytes(&block) };
                    (&*bytes, block.len)
                }
                (None, Some(pixels)) => (pixels, pixels.len()),
                (None, None) => return Err(GalError::Unsupported),
            };
            if !desc_fits(&request.src, &request.src_rect, src_len) {
                return Err(GalError::InvalidRect);
            }
            let x0 = request.src_rect.x as usize * bpp;
            for row in 0..rows {
                let start = (request.src_rect.y as usize + row) * src_pitch + x0;
                snapshot[row * row_len..(row + 1) * row_len].copy_from_slice(&src[start..start + row_len]);
            }
        }

        // SAFETY: state held; no other view of the block is alive.
        let dst = unsafe { self.block_bytes(&dst_block) };
        if !desc_fits(&request.dst, &request.dst_rect, dst.len()) {
            return Err(GalError::InvalidRect);
        }
        let dst_pitch = request.dst.pitch as usize;
        let x0 = request.dst_rect.x as usize * bpp;
        for row in 0..rows {
            let start = (request.dst_rect.y as usize + row) * dst_pitch + x0;
            let out = &mut dst[start..start + row_len];
            let inp = &snapshot[row * row_len..(row + 1) * row_len];
            match (request.colorkey, request.alpha) {
                (None, None) => out.copy_from_slice(inp),
                (key, alpha) => {
                    for (s, d) in inp.chunks_exact(bpp).zip(out.chunks_exact_mut(bpp)) {
                        if let Some((key, amask)) = key {
                            if read_pixel(s, bpp) & !amask == key {
                                continue;
                            }
                        }
                        match alpha {
                            Some(a) if a != 255 => {
                                for (sc, dc) in s.iter().zip(d.iter_mut()) {
                                    let diff = *sc as i32 - *dc as i32;
                                    *dc = (*dc as i32 + ((diff * a as i32) >> 8)) as u8;
                                }
                            }
                            _ => d.copy_from_slice(s),
                        }
                    }
                }
            }
        }
        Ok(())
    }

    fn fill_hw_rect(&self, dst: &HwSurfaceDesc, rect: &Rect, color: u32) -> Result<(), GalError> {
        let state = self.state.lock();
        let handle = dst.handle.ok_or(GalError::Unsupported)?;
        let block = state.block(handle)?;
        // SAFETY: state held; no other view alive.
        let bytes = unsafe { self.block_bytes(&block) };
        if !desc_fits(dst, rect, bytes.len()) {
            return Err(GalError::InvalidRect);
        }
        let bpp = dst.bytes_per_pixel as usize;
        for y in rect.y as usize..rect.bottom() as usize {
            let start = y * dst.pitch as usize + rect.x as usize * bpp;
            let row = &mut bytes[start..start + rect.width as usize * bpp];
            for px in row.chunks_exact_mut(bpp) {
                write_pixel(px, bpp, color);
            }
        }
        Ok(())
    }

    fn set_hw_color_key(&self, surface: &HwSurfaceDesc, key: u32) -> Result<(), GalError> {
        // Keys travel with each blit request.
        if self.caps.intersects(VideoCaps::HW_BLIT_CC | VideoCaps::SW_BLIT_CC) {
            Ok(())
        } else {
            Err(GalError::Unsupported)
        }
    }

    fn set_hw_alpha(&self, surface: &HwSurfaceDesc, alpha: u8) -> Result<(), GalError> {
        if self.caps.intersects(VideoCaps::HW_BLIT_A | VideoCaps::SW_BLIT_A) {
            Ok(())
        } else {
            Err(GalError::Unsupported)
        }
    }

    fn alloc_shared_hw_surface(
        &self,
        header_size: usize,
        pixels_size: usize,
    ) -> Result<SharedHwAllocation, GalError> {
        let map_size = (header_size + pixels_size + PAGE_SIZE - 1) / PAGE_SIZE * PAGE_SIZE;
        let mut state = self.state.lock();
        let (handle, offset) = state.alloc(map_size, self.capacity())?;
        let block = {
            let block = state
                .blocks
                .get_mut(&handle)
                .ok_or(GalError::OutOfMemory)?;
            block.shared_refs = 1;
            *block
        };
        // SAFETY: freshly allocated block, state held.
        unsafe { self.block_bytes(&block) }.fill(0);
        Ok(SharedHwAllocation {
            handle,
            ptr: self.ptr_at(offset),
            map_size,
            pixels_off: header_size,
        })
    }

    fn free_shared_hw_surface(&self, handle: u64) {
        self.detach_shared_hw_surface(handle);
    }

    fn attach_shared_hw_surface(
        &self,
        handle: u64,
        writable: bool,
    ) -> Result<SharedHwAllocation, GalError> {
        let mut state = self.state.lock();
        let block = state
            .blocks
            .get_mut(&handle)
            .filter(|b| b.shared_refs > 0)
            .ok_or_else(|| GalError::Device(alloc::format!("no shared video memory {}", handle)))?;
        block.shared_refs += 1;
        let block = *block;
        // Attachers learn the pixel offset from the header.
        Ok(SharedHwAllocation {
            handle,
            ptr: self.ptr_at(block.offset),
            map_size: block.len,
            pixels_off: 0,
        })
    }

    fn detach_shared_hw_surface(&self, handle: u64) {
        let mut state = self.state.lock();
        let gone = match state.blocks.get_mut(&handle) {
            Some(block) if block.shared_refs > 0 => {
                block.shared_refs -= 1;
                block.shared_refs == 0
            }
            _ => false,
        };
        if gone {
            self.release(&mut state, handle);
        }
    }

    fn video_quit(&self) {
        let mut state = self.state.lock();
        if let Some(fb) = state.framebuffer.take() {
            self.release(&mut state, fb);
        }
        state.initialized = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device() -> MemoryVideoDevice {
        MemoryVideoDevice::new(PixelFormat::xrgb8888(), 1 << 20).unwrap()
    }

    fn desc(handle: Option<u64>, w: u32, h: u32) -> HwSurfaceDesc {
        HwSurfaceDesc {
            handle,
            width: w,
            height: h,
            pitch: w * 4,
            bytes_per_pixel: 4,
        }
    }

    #[test]
    fn test_first_fit_reuses_gaps() {
        let dev = device();
        let fmt = PixelFormat::xrgb8888();
        let a = dev.alloc_hw_surface(16, 16, &fmt).unwrap();
        let b = dev.alloc_hw_surface(16, 16, &fmt).unwrap();
        assert_ne!(a.ptr, b.ptr);
        dev.free_hw_surface(a.handle);
        let c = dev.alloc_hw_surface(8, 8, &fmt).unwrap();
        assert_eq!(c.ptr, a.ptr);
        assert_eq!(dev.allocation_count(), 2);
    }

    #[test]
    fn test_pool_exhaustion() {
        let dev = MemoryVideoDevice::new(PixelFormat::xrgb8888(), PAGE_SIZE).unwrap();
        let fmt = PixelFormat::xrgb8888();
        assert!(dev.alloc_hw_surface(32, 32, &fmt).is_ok());
        assert_eq!(
            dev.alloc_hw_surface(32, 32, &fmt).unwrap_err(),
            GalError::OutOfMemory
        );
    }

    #[test]
    fn test_fill_and_blit_with_key() {
        let dev = device();
        let fmt = PixelFormat::xrgb8888();
        let a = dev.alloc_hw_surface(4, 4, &fmt).unwrap();
        let b = dev.alloc_hw_surface(4, 4, &fmt).unwrap();
        let da = desc(Some(a.handle), 4, 4);
        let db = desc(Some(b.handle), 4, 4);

        dev.fill_hw_rect(&da, &Rect::sized(4, 4), 0x00FF_0000).unwrap();
        dev.fill_hw_rect(&da, &Rect::new(0, 0, 1, 1), 0x0000_00FF).unwrap();
        dev.fill_hw_rect(&db, &Rect::sized(4, 4), 0x0000_FF00).unwrap();

        dev.hw_blit(&HwBlitRequest {
            src: da,
            src_pixels: None,
            src_rect: Rect::sized(4, 4),
            dst: db,
            dst_rect: Rect::sized(4, 4),
            colorkey: Some((0x0000_00FF, 0)),
            alpha: None,
        })
        .unwrap();

        let bytes = unsafe { core::slice::from_raw_parts(b.ptr.as_ptr(), 64) };
        assert_eq!(read_pixel(&bytes[0..4], 4), 0x0000_FF00);
        assert_eq!(read_pixel(&bytes[4..8], 4), 0x00FF_0000);
    }

    #[test]
    fn test_shared_refcount() {
        let dev = device();
        let owner = dev.alloc_shared_hw_surface(256, 1000).unwrap();
        assert_eq!(owner.map_size, PAGE_SIZE);
        let attached = dev.attach_shared_hw_surface(owner.handle, false).unwrap();
        assert_eq!(attached.ptr, owner.ptr);

        dev.free_shared_hw_surface(owner.handle);
        assert_eq!(dev.allocation_count(), 1);
        dev.detach_shared_hw_surface(owner.handle);
        assert_eq!(dev.allocation_count(), 0);
        assert!(dev.attach_shared_hw_surface(owner.handle, false).is_err());
    }

    #[test]
    fn test_fixed_modes() {
        let dev = device().with_modes(vec![Rect::sized(640, 480)]);
        assert!(!dev.info().caps.contains(VideoCaps::ANY_SIZE));
        assert_eq!(
            dev.set_video_mode(800, 600, 32, SurfaceFlags::empty()).unwrap_err(),
            GalError::NoVideoMode
        );
        let mode = dev.set_video_mode(640, 480, 32, SurfaceFlags::empty()).unwrap();
        assert_eq!(mode.memory.pitch, 640 * 4);
        assert!(mode.flags.contains(SurfaceFlags::HWSURFACE));
    }
}
