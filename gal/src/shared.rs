//! Shared surfaces.
//!
//! A shared surface lives in one mapping laid out as a fixed
//! [`SharedSurfaceHeader`] followed by the pixels. The owner creates the
//! mapping, either in device memory or in an anonymous [`shm`] region, and
//! passes the [`SharedHandle`] to other processes, which attach read-only
//! or read-write and rebuild the surface from the header.
//!
//! The header's dirty record is the only state both sides mutate. Every
//! access to it holds the surface's semaphore slot. Pixel writes by
//! attachers should hold it too ([`Surface::lock_shared`]); the owner writes
//! pixels unguarded.

use core::mem::size_of;
use core::ptr::{self, NonNull};

use crate::config::{PAGE_SIZE, SHARED_HEADER_MAGIC, SHARED_HEADER_VERSION};
use crate::dirty::DirtyInfo;
use crate::error::{report, GalError};
use crate::pixels::{calculate_pitch, PixelFormat};
use crate::sem::{self, SemGuard};
use crate::shm::{self, flags as shm_flags, ShmId, ShmView};
use crate::surface::{PixelStorage, Surface, SurfaceFlags};
use crate::video::VideoHandle;

/// Header at offset 0 of every shared surface mapping.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SharedSurfaceHeader {
    pub magic: u32,
    pub version: u32,
    /// Pid of the owner.
    pub creator: u64,
    /// Region id or device handle.
    pub handle: u64,
    /// Non-zero when the mapping lives in device memory.
    pub byhw: u32,
    pub width: u32,
    pub height: u32,
    pub pitch: u32,
    pub depth: u32,
    pub rmask: u32,
    pub gmask: u32,
    pub bmask: u32,
    pub amask: u32,
    /// `size_of::<SharedSurfaceHeader>()` at creation.
    pub header_size: u32,
    pub map_size: u64,
    pub pixels_off: u64,
    /// Semaphore slot guarding `dirty`; [`NO_SEM_SLOT`] when unguarded.
    pub sem_slot: u32,
    pub reserved: u32,
    pub dirty: DirtyInfo,
}

const _: () = assert!(size_of::<SharedSurfaceHeader>() == 224);

/// `sem_slot` value of a surface created before the semaphore pool.
pub const NO_SEM_SLOT: u32 = u32::MAX;

/// Bytes reserved for the header ahead of the pixels.
const HEADER_SPACE: usize = (size_of::<SharedSurfaceHeader>() + 63) & !63;

/// What another process needs to attach.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SharedHandle {
    /// Region id, or device handle when `by_hw`.
    pub id: u64,
    pub by_hw: bool,
}

enum Backing {
    Shm(ShmView),
    Hw {
        handle: u64,
        ptr: NonNull<u8>,
        map_size: usize,
        video: VideoHandle,
    },
}

/// A process's mapping of a shared surface.
pub struct SharedMapping {
    backing: Backing,
    owner: bool,
    writable: bool,
    sem_slot: Option<u32>,
    pixels_off: usize,
    pixels_len: usize,
    pid: u64,
}

// The mapping is reached only through its surface, which sits behind a lock.
unsafe impl Send for SharedMapping {}

impl SharedMapping {
    fn base(&self) -> *mut u8 {
        match &self.backing {
            Backing::Shm(view) => view.as_ptr(),
            Backing::Hw { ptr, .. } => ptr.as_ptr(),
        }
    }

    /// Bytes mapped, header included.
    pub fn map_size(&self) -> usize {
        match &self.backing {
            Backing::Shm(view) => view.len(),
            Backing::Hw { map_size, .. } => *map_size,
        }
    }

    fn header_ptr(&self) -> *mut SharedSurfaceHeader {
        self.base() as *mut SharedSurfaceHeader
    }

    /// Copy of the header.
    pub fn header(&self) -> SharedSurfaceHeader {
        // SAFETY: every mapping is at least HEADER_SPACE bytes and aligned
        // to 64.
        unsafe { ptr::read(self.header_ptr()) }
    }

    /// Handle to pass to attachers.
    pub fn handle(&self) -> SharedHandle {
        match &self.backing {
            Backing::Shm(view) => SharedHandle {
                id: view.id().0,
                by_hw: false,
            },
            Backing::Hw { handle, .. } => SharedHandle {
                id: *handle,
                by_hw: true,
            },
        }
    }

    /// Device handle when the mapping is in video memory.
    pub fn hw_handle(&self) -> Option<u64> {
        match &self.backing {
            Backing::Hw { handle, .. } => Some(*handle),
            Backing::Shm(_) => None,
        }
    }

    pub fn is_owner(&self) -> bool {
        self.owner
    }

    pub fn writable(&self) -> bool {
        self.writable
    }

    pub fn sem_slot(&self) -> Option<u32> {
        self.sem_slot
    }

    pub fn pid(&self) -> u64 {
        self.pid
    }

    pub(crate) fn pixels(&self) -> &[u8] {
        // SAFETY: the pixel range was validated against the map size.
        unsafe {
            core::slice::from_raw_parts(self.base().add(self.pixels_off), self.pixels_len)
        }
    }

    pub(crate) fn pixels_mut(&mut self) -> Result<&mut [u8], GalError> {
        if !self.writable {
            return Err(GalError::ReadOnly);
        }
        // SAFETY: as in `pixels`; `&mut self` makes this process's view
        // unique.
        Ok(unsafe {
            core::slice::from_raw_parts_mut(self.base().add(self.pixels_off), self.pixels_len)
        })
    }

    /// Hold the semaphore slot, if the surface has one.
    pub fn lock(&self) -> Result<Option<SemGuard>, GalError> {
        self.sem_slot.map(sem::lock).transpose()
    }

    /// Run `f` on the header's dirty record under the semaphore.
    /// Read-only attachments see the record but never write it back.
    pub fn update_dirty<R>(&self, f: impl FnOnce(&mut DirtyInfo) -> R) -> Result<R, GalError> {
        let _guard = self.lock()?;
        // SAFETY: header is mapped; the slot serializes access to `dirty`.
        unsafe {
            let field = ptr::addr_of_mut!((*self.header_ptr()).dirty);
            let mut info = ptr::read(field);
            let out = f(&mut info);
            if self.writable {
                ptr::write(field, info);
            }
            Ok(out)
        }
    }
}

impl Drop for SharedMapping {
    fn drop(&mut self) {
        if let Some(slot) = self.sem_slot.take() {
            sem::free_slot(slot);
        }
        match &self.backing {
            Backing::Shm(view) => {
                let id = view.id();
                if self.owner {
                    if let Err(e) = shm::destroy(id, self.pid) {
                        log::warn!("gal: destroying shared region {:?}: {:?}", id, e);
                    }
                }
                if let Err(e) = shm::unmap(id, self.pid) {
                    log::warn!("gal: unmapping shared region {:?}: {:?}", id, e);
                }
            }
            Backing::Hw { handle, video, .. } => {
                if self.owner {
                    video.device().free_shared_hw_surface(*handle);
                } else {
                    video.device().detach_shared_hw_surface(*handle);
                }
            }
        }
    }
}

impl core::fmt::Debug for SharedMapping {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SharedMapping")
            .field("handle", &self.handle())
            .field("owner", &self.owner)
            .field("writable", &self.writable)
            .field("sem_slot", &self.sem_slot)
            .finish()
    }
}

/// Create a shared surface owned by `pid`.
///
/// With `HWSURFACE` in `flags` and a device, video memory is tried first;
/// otherwise, or when that fails, an anonymous region is used.
pub fn create_shared_surface(
    video: Option<&VideoHandle>,
    pid: u64,
    flags: SurfaceFlags,
    width: u32,
    height: u32,
    depth: u8,
    rmask: u32,
    gmask: u32,
    bmask: u32,
    amask: u32,
) -> Result<Surface, GalError> {
    let format = PixelFormat::new(depth, rmask, gmask, bmask, amask).map_err(report)?;
    let pitch = calculate_pitch(&format, width);
    let pixels_len = pitch as usize * height as usize;

    let hw = match video {
        Some(v) if flags.contains(SurfaceFlags::HWSURFACE) => {
            match v.device().alloc_shared_hw_surface(HEADER_SPACE, pixels_len) {
                Ok(alloc) => Some((alloc, v.clone())),
                Err(e) => {
                    log::debug!("gal: shared video memory unavailable ({}), using shm", e);
                    None
                }
            }
        }
        _ => None,
    };

    let mut mapping = match hw {
        Some((alloc, video)) => SharedMapping {
            backing: Backing::Hw {
                handle: alloc.handle,
                ptr: alloc.ptr,
                map_size: alloc.map_size,
                video,
            },
            owner: true,
            writable: true,
            sem_slot: None,
            pixels_off: alloc.pixels_off,
            pixels_len,
            pid,
        },
        None => {
            let map_size = (HEADER_SPACE + pixels_len + PAGE_SIZE - 1) / PAGE_SIZE * PAGE_SIZE;
            let rights = shm_flags::SHM_READ | shm_flags::SHM_WRITE;
            let id = shm::create("gal-surface", map_size, pid, rights)
                .map_err(|e| report(GalError::Shm(e)))?;
            let view = match shm::map(id, pid, rights) {
                Ok(view) => view,
                Err(e) => {
                    let _ = shm::destroy(id, pid);
                    return Err(report(GalError::Shm(e)));
                }
            };
            SharedMapping {
                backing: Backing::Shm(view),
                owner: true,
                writable: true,
                sem_slot: None,
                pixels_off: HEADER_SPACE,
                pixels_len,
                pid,
            }
        }
    };
    if mapping.pixels_off < size_of::<SharedSurfaceHeader>()
        || mapping.pixels_off + pixels_len > mapping.map_size()
    {
        return Err(report(GalError::Device("shared allocation too small".into())));
    }

    mapping.sem_slot = sem::alloc_slot().map_err(report)?;

    let by_hw = mapping.hw_handle().is_some();
    let header = SharedSurfaceHeader {
        magic: SHARED_HEADER_MAGIC,
        version: SHARED_HEADER_VERSION,
        creator: pid,
        handle: mapping.handle().id,
        byhw: by_hw as u32,
        width,
        height,
        pitch,
        depth: depth as u32,
        rmask: format.rmask,
        gmask: format.gmask,
        bmask: format.bmask,
        amask: format.amask,
        header_size: size_of::<SharedSurfaceHeader>() as u32,
        map_size: mapping.map_size() as u64,
        pixels_off: mapping.pixels_off as u64,
        sem_slot: mapping.sem_slot.unwrap_or(NO_SEM_SLOT),
        reserved: 0,
        dirty: DirtyInfo::new(),
    };
    // SAFETY: the mapping holds at least a header, 64-byte aligned.
    unsafe { ptr::write(mapping.header_ptr(), header) };
    log::info!(
        "gal: shared surface {:?} {}x{}x{} created by pid {}",
        mapping.handle(),
        width,
        height,
        depth,
        pid
    );

    let (flags, video) = match &mapping.backing {
        Backing::Hw { video, .. } => (SurfaceFlags::HWSURFACE, Some(video.clone())),
        Backing::Shm(_) => (SurfaceFlags::empty(), None),
    };
    Ok(Surface::with_storage(
        flags,
        format,
        width,
        height,
        pitch,
        PixelStorage::Shared(mapping),
        video,
    ))
}

/// Attach to a shared surface created by another process.
pub fn attach_shared_surface(
    video: Option<&VideoHandle>,
    pid: u64,
    handle: SharedHandle,
    writable: bool,
) -> Result<Surface, GalError> {
    let mut mapping = if handle.by_hw {
        let video = video.ok_or_else(|| report(GalError::Unsupported))?;
        let alloc = video
            .device()
            .attach_shared_hw_surface(handle.id, writable)
            .map_err(report)?;
        SharedMapping {
            backing: Backing::Hw {
                handle: alloc.handle,
                ptr: alloc.ptr,
                map_size: alloc.map_size,
                video: video.clone(),
            },
            owner: false,
            writable,
            sem_slot: None,
            pixels_off: 0,
            pixels_len: 0,
            pid,
        }
    } else {
        let rights = if writable {
            shm_flags::SHM_READ | shm_flags::SHM_WRITE
        } else {
            shm_flags::SHM_READ
        };
        let view = shm::map(ShmId(handle.id), pid, rights).map_err(|e| report(GalError::Shm(e)))?;
        SharedMapping {
            backing: Backing::Shm(view),
            owner: false,
            writable,
            sem_slot: None,
            pixels_off: 0,
            pixels_len: 0,
            pid,
        }
    };

    if mapping.map_size() < size_of::<SharedSurfaceHeader>() {
        return Err(report(GalError::BadSharedHeader("mapping smaller than header".into())));
    }
    let header = mapping.header();
    if header.magic != SHARED_HEADER_MAGIC {
        return Err(report(GalError::BadSharedHeader("bad magic".into())));
    }
    if header.version != SHARED_HEADER_VERSION
        || header.header_size as usize != size_of::<SharedSurfaceHeader>()
    {
        return Err(report(GalError::BadSharedHeader(alloc::format!(
            "version {} size {}",
            header.version,
            header.header_size
        ))));
    }
    let format = PixelFormat::new(
        header.depth as u8,
        header.rmask,
        header.gmask,
        header.bmask,
        header.amask,
    )
    .map_err(|_| report(GalError::BadSharedHeader(alloc::format!("depth {}", header.depth))))?;
    let pixels_off = header.pixels_off as usize;
    let pixels_len = header.pitch as usize * header.height as usize;
    if header.pitch < calculate_pitch(&format, header.width)
        || pixels_off < size_of::<SharedSurfaceHeader>()
        || pixels_off + pixels_len > mapping.map_size()
    {
        return Err(report(GalError::BadSharedHeader("geometry exceeds mapping".into())));
    }

    mapping.pixels_off = pixels_off;
    mapping.pixels_len = pixels_len;
    if header.sem_slot != NO_SEM_SLOT {
        sem::retain_slot(header.sem_slot).map_err(report)?;
        mapping.sem_slot = Some(header.sem_slot);
    }
    log::info!(
        "gal: pid {} attached shared surface {:?} ({})",
        pid,
        handle,
        if writable { "read-write" } else { "read-only" }
    );

    let (flags, video) = match &mapping.backing {
        Backing::Hw { video, .. } => (SurfaceFlags::HWSURFACE, Some(video.clone())),
        Backing::Shm(_) => (SurfaceFlags::empty(), None),
    };
    Ok(Surface::with_storage(
        flags,
        format,
        header.width,
        header.height,
        header.pitch,
        PixelStorage::Shared(mapping),
        video,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rect::Rect;
    use crate::video::{MemoryVideoDevice, VideoCaps};
    use alloc::sync::Arc;

    fn setup() {
        sem::init(crate::config::DEFAULT_SEM_SLOTS);
    }

    fn rgb565_shared(pid: u64) -> Surface {
        create_shared_surface(None, pid, SurfaceFlags::empty(), 16, 8, 16, 0, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_header_layout() {
        assert_eq!(size_of::<SharedSurfaceHeader>(), 224);
        assert_eq!(core::mem::offset_of!(SharedSurfaceHeader, byhw), 24);
        assert_eq!(core::mem::offset_of!(SharedSurfaceHeader, map_size), 64);
        assert_eq!(core::mem::offset_of!(SharedSurfaceHeader, sem_slot), 80);
        assert_eq!(core::mem::offset_of!(SharedSurfaceHeader, dirty), 88);
        assert_eq!(HEADER_SPACE, 256);
    }

    #[test]
    fn test_round_trip_between_processes() {
        setup();
        let mut owner = rgb565_shared(100);
        owner.fill_rect(Some(&Rect::new(2, 2, 3, 3)), 0xF800).unwrap();
        let handle = owner.shared().unwrap().handle();
        assert!(!handle.by_hw);

        let mut peer = attach_shared_surface(None, 200, handle, true).unwrap();
        assert_eq!((peer.width(), peer.height(), peer.pitch()), (16, 8, 32));
        assert_eq!(peer.format().rmask, PixelFormat::rgb565().rmask);
        assert_eq!(peer.get_pixel(3, 3), Some(0xF800));

        // The owner's fill is visible in the shared dirty record.
        let (_, rects) = peer.take_dirty();
        assert_eq!(rects, [Rect::new(2, 2, 3, 3)]);
        assert!(owner.dirty_info().is_empty());

        {
            let _guard = peer.lock_shared().unwrap();
            peer.put_pixel(0, 0, 0x001F).unwrap();
        }
        peer.mark_dirty(&Rect::new(0, 0, 1, 1));
        assert_eq!(owner.get_pixel(0, 0), Some(0x001F));
        assert_eq!(owner.dirty_info().rects().collect::<alloc::vec::Vec<_>>(), [Rect::new(0, 0, 1, 1)]);
    }

    #[test]
    fn test_read_only_attach() {
        setup();
        let owner = rgb565_shared(101);
        let mut peer =
            attach_shared_surface(None, 201, owner.shared().unwrap().handle(), false).unwrap();
        assert_eq!(peer.fill_rect(None, 1).unwrap_err(), GalError::ReadOnly);
        assert_eq!(peer.pixels_mut().unwrap_err(), GalError::ReadOnly);
    }

    #[test]
    fn test_attach_rejects_garbage() {
        setup();
        let id = shm::create("junk", 4096, 7, shm_flags::SHM_READ | shm_flags::SHM_WRITE).unwrap();
        let err = attach_shared_surface(None, 8, SharedHandle { id: id.0, by_hw: false }, false)
            .unwrap_err();
        assert!(matches!(err, GalError::BadSharedHeader(_)));
        shm::destroy(id, 7).unwrap();
    }

    #[test]
    fn test_owner_teardown_defers_region() {
        setup();
        let owner = rgb565_shared(102);
        let slot = owner.shared().unwrap().sem_slot().unwrap();
        let handle = owner.shared().unwrap().handle();
        let peer = attach_shared_surface(None, 202, handle, true).unwrap();
        assert_eq!(peer.shared().unwrap().sem_slot(), Some(slot));

        drop(owner);
        // The region outlives the owner while attached, but cannot be
        // attached anew.
        assert_eq!(peer.get_pixel(0, 0), Some(0));
        assert!(attach_shared_surface(None, 203, handle, false).is_err());
        drop(peer);
        assert!(shm::get(ShmId(handle.id)).is_none());
    }

    #[test]
    fn test_attacher_keeps_slot_after_owner() {
        setup();
        let owner = rgb565_shared(105);
        let handle = owner.shared().unwrap().handle();
        let mut peer = attach_shared_surface(None, 205, handle, true).unwrap();
        let _ = peer.take_dirty();

        drop(owner);
        peer.mark_dirty(&Rect::new(1, 1, 2, 2));
        assert_eq!(peer.dirty_info().bounds(), Rect::new(1, 1, 2, 2));
        assert!(peer.lock_shared().unwrap().is_some());
    }

    #[test]
    fn test_slots_returned_on_teardown() {
        setup();
        // More surfaces than the pool has slots, one at a time.
        for pid in 0..crate::config::DEFAULT_SEM_SLOTS as u64 * 2 {
            let s = rgb565_shared(1000 + pid);
            assert!(s.shared().unwrap().sem_slot().is_some());
        }
    }

    #[test]
    fn test_dirty_overflow_merges() {
        setup();
        let mut s = rgb565_shared(103);
        for i in 0..crate::config::NR_DIRTY_RECTS as i32 + 1 {
            s.mark_dirty(&Rect::new(i, i % 2 * 4, 1, 1));
        }
        let info = s.dirty_info();
        assert_eq!(info.len(), 1);
        assert_eq!(info.bounds(), Rect::new(0, 0, 9, 5));
    }

    #[test]
    fn test_video_memory_shared_surface() {
        setup();
        let dev: Arc<dyn crate::video::VideoDevice> = Arc::new(
            MemoryVideoDevice::new(PixelFormat::rgb565(), 1 << 18).unwrap(),
        );
        let video = VideoHandle::new(dev, VideoCaps::all());
        let mut owner = create_shared_surface(
            Some(&video),
            104,
            SurfaceFlags::HWSURFACE,
            8,
            8,
            16,
            0,
            0,
            0,
            0,
        )
        .unwrap();
        assert!(owner.flags().contains(SurfaceFlags::HWSURFACE));
        let handle = owner.shared().unwrap().handle();
        assert!(handle.by_hw);
        owner.put_pixel(7, 7, 0x1234).unwrap();

        let peer = attach_shared_surface(Some(&video), 204, handle, false).unwrap();
        assert_eq!(peer.get_pixel(7, 7), Some(0x1234));
        assert!(attach_shared_surface(None, 205, handle, false).is_err());
    }
}
