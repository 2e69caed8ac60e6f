//! Anonymous shared memory regions.
//!
//! Regions back software shared surfaces. The creating process owns a
//! region; any process may map it (views are keyed by pid) and only the
//! owner may destroy it. Destroying a region that still has views marks it
//! doomed: no new views are handed out and the last unmap drops it from
//! the registry. Pages stay allocated while any [`ShmView`] holds them.

use alloc::alloc::{alloc_zeroed, dealloc, Layout};
use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::ptr::NonNull;
use spin::Mutex;

use crate::config::PAGE_SIZE;

/// Region identifier, as stored in shared surface handles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ShmId(pub u64);

/// Access rights.
pub mod flags {
    pub const SHM_READ: u32 = 0x01;
    pub const SHM_WRITE: u32 = 0x02;
}

/// Registry failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShmError {
    /// No such region, or it is being destroyed.
    NotFound,
    OutOfMemory,
    /// Zero or oversized request.
    InvalidSize,
    /// Rights beyond those the region was created with, or a destroy by a
    /// process other than the owner.
    PermissionDenied,
    /// The process has no view of the region.
    NotMapped,
    /// Too many live regions.
    LimitReached,
}

/// Most regions alive at once.
const MAX_REGIONS: usize = 4096;
/// Most bytes held by all regions together.
const MAX_TOTAL_BYTES: usize = 1 << 30;

/// Zeroed, page-aligned pages.
struct Pages {
    ptr: NonNull<u8>,
    layout: Layout,
}

// Plain memory; views coordinate access through surface semaphores.
unsafe impl Send for Pages {}
unsafe impl Sync for Pages {}

impl Pages {
    fn alloc(len: usize) -> Result<Self, ShmError> {
        let layout = Layout::from_size_align(len, PAGE_SIZE).map_err(|_| ShmError::InvalidSize)?;
        // SAFETY: `len` is a non-zero multiple of the page size.
        let ptr = NonNull::new(unsafe { alloc_zeroed(layout) }).ok_or(ShmError::OutOfMemory)?;
        Ok(Self { ptr, layout })
    }
}

impl Drop for Pages {
    fn drop(&mut self) {
        // SAFETY: allocated in `alloc` with this layout.
        unsafe { dealloc(self.ptr.as_ptr(), self.layout) };
    }
}

/// One process's view of a region.
pub struct ShmView {
    id: ShmId,
    pid: u64,
    rights: u32,
    pages: Arc<Pages>,
}

impl ShmView {
    pub fn id(&self) -> ShmId {
        self.id
    }

    pub fn pid(&self) -> u64 {
        self.pid
    }

    /// Mapped length; whole pages.
    pub fn len(&self) -> usize {
        self.pages.layout.size()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn writable(&self) -> bool {
        self.rights & flags::SHM_WRITE != 0
    }

    /// Base address of the pages.
    pub fn as_ptr(&self) -> *mut u8 {
        self.pages.ptr.as_ptr()
    }
}

impl core::fmt::Debug for ShmView {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ShmView")
            .field("id", &self.id)
            .field("pid", &self.pid)
            .field("rights", &self.rights)
            .field("len", &self.len())
            .finish()
    }
}

/// Snapshot of a region's bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegionInfo {
    pub label: String,
    pub len: usize,
    pub owner: u64,
    /// Pids holding views, one entry per view.
    pub viewers: Vec<u64>,
    /// Destroyed by the owner; waiting for the last view to go.
    pub doomed: bool,
}

struct Region {
    label: String,
    owner: u64,
    rights: u32,
    viewers: Vec<u64>,
    doomed: bool,
    pages: Arc<Pages>,
}

impl Region {
    fn info(&self) -> RegionInfo {
        RegionInfo {
            label: self.label.clone(),
            len: self.pages.layout.size(),
            owner: self.owner,
            viewers: self.viewers.clone(),
            doomed: self.doomed,
        }
    }
}

/// All live regions.
pub struct ShmRegistry {
    regions: BTreeMap<ShmId, Region>,
    next_id: u64,
    bytes: usize,
}

impl Default for ShmRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ShmRegistry {
    pub const fn new() -> Self {
        Self {
            regions: BTreeMap::new(),
            next_id: 1,
            bytes: 0,
        }
    }

    /// Allocate a zeroed region of at least `size` bytes, rounded up to
    /// whole pages, that views may map with at most `rights`.
    pub fn create(&mut self, label: &str, size: usize, owner: u64, rights: u32) -> Result<ShmId, ShmError> {
        if size == 0 || size > MAX_TOTAL_BYTES {
            return Err(ShmError::InvalidSize);
        }
        if self.regions.len() >= MAX_REGIONS {
            return Err(ShmError::LimitReached);
        }
        let len = (size + PAGE_SIZE - 1) / PAGE_SIZE * PAGE_SIZE;
        if self.bytes + len > MAX_TOTAL_BYTES {
            return Err(ShmError::OutOfMemory);
        }

        let pages = Arc::new(Pages::alloc(len)?);
        let id = ShmId(self.next_id);
        self.next_id += 1;
        self.bytes += len;
        self.regions.insert(
            id,
            Region {
                label: String::from(label),
                owner,
                rights,
                viewers: Vec::new(),
                doomed: false,
                pages,
            },
        );
        log::trace!("gal: shm region {:?} '{}' created, {} bytes", id, label, len);
        Ok(id)
    }

    pub fn info(&self, id: ShmId) -> Option<RegionInfo> {
        self.regions.get(&id).map(Region::info)
    }

    /// Hand `pid` a view of `id` with `rights`.
    pub fn map(&mut self, id: ShmId, pid: u64, rights: u32) -> Result<ShmView, ShmError> {
        let region = match self.regions.get_mut(&id) {
            Some(r) if !r.doomed => r,
            _ => return Err(ShmError::NotFound),
        };
        if rights & !region.rights != 0 {
            return Err(ShmError::PermissionDenied);
        }
        region.viewers.push(pid);
        Ok(ShmView {
            id,
            pid,
            rights,
            pages: region.pages.clone(),
        })
    }

    /// Drop one view of `id` held by `pid`. The pages themselves live on
    /// until the [`ShmView`] is dropped.
    pub fn unmap(&mut self, id: ShmId, pid: u64) -> Result<(), ShmError> {
        let region = self.regions.get_mut(&id).ok_or(ShmError::NotFound)?;
        let at = region
            .viewers
            .iter()
            .position(|&p| p == pid)
            .ok_or(ShmError::NotMapped)?;
        region.viewers.swap_remove(at);
        if region.doomed && region.viewers.is_empty() {
            self.reap(id);
        }
        Ok(())
    }

    /// Destroy `id` on behalf of its owner; deferred while views remain.
    pub fn destroy(&mut self, id: ShmId, pid: u64) -> Result<(), ShmError> {
        let region = self.regions.get_mut(&id).ok_or(ShmError::NotFound)?;
        if region.owner != pid {
            return Err(ShmError::PermissionDenied);
        }
        if region.viewers.is_empty() {
            self.reap(id);
        } else {
            region.doomed = true;
        }
        Ok(())
    }

    fn reap(&mut self, id: ShmId) {
        if let Some(region) = self.regions.remove(&id) {
            self.bytes -= region.pages.layout.size();
            log::trace!("gal: shm region {:?} '{}' removed", id, region.label);
        }
    }

    /// (live regions, bytes held).
    pub fn stats(&self) -> (usize, usize) {
        (self.regions.len(), self.bytes)
    }
}

static REGISTRY: Mutex<ShmRegistry> = Mutex::new(ShmRegistry::new());

pub fn create(label: &str, size: usize, owner: u64, rights: u32) -> Result<ShmId, ShmError> {
    REGISTRY.lock().create(label, size, owner, rights)
}

/// Bookkeeping of a live region.
pub fn get(id: ShmId) -> Option<RegionInfo> {
    REGISTRY.lock().info(id)
}

pub fn map(id: ShmId, pid: u64, rights: u32) -> Result<ShmView, ShmError> {
    REGISTRY.lock().map(id, pid, rights)
}

pub fn unmap(id: ShmId, pid: u64) -> Result<(), ShmError> {
    REGISTRY.lock().unmap(id, pid)
}

pub fn destroy(id: ShmId, pid: u64) -> Result<(), ShmError> {
    REGISTRY.lock().destroy(id, pid)
}

pub fn stats() -> (usize, usize) {
    REGISTRY.lock().stats()
}

#[cfg(test)]
mod tests {
    use super::*;

    const RW: u32 = flags::SHM_READ | flags::SHM_WRITE;

    #[test]
    fn test_create_rounds_to_pages() {
        let mut registry = ShmRegistry::new();
        let id = registry.create("test", 100, 1, RW).unwrap();
        assert_eq!(registry.info(id).unwrap().len, PAGE_SIZE);
        assert_eq!(registry.stats(), (1, PAGE_SIZE));
        assert_eq!(registry.create("zero", 0, 1, RW), Err(ShmError::InvalidSize));
    }

    #[test]
    fn test_views_share_pages() {
        let mut registry = ShmRegistry::new();
        let id = registry.create("test", PAGE_SIZE, 1, RW).unwrap();
        let owner = registry.map(id, 1, RW).unwrap();
        let other = registry.map(id, 2, flags::SHM_READ).unwrap();
        assert!(owner.writable());
        assert!(!other.writable());

        unsafe {
            *owner.as_ptr().add(10) = 0xAB;
            assert_eq!(*other.as_ptr().add(10), 0xAB);
        }

        registry.unmap(id, 2).unwrap();
        assert_eq!(registry.unmap(id, 2), Err(ShmError::NotMapped));
        assert_eq!(registry.info(id).unwrap().viewers, alloc::vec![1]);
    }

    #[test]
    fn test_rights_checked() {
        let mut registry = ShmRegistry::new();
        let id = registry.create("ro", PAGE_SIZE, 1, flags::SHM_READ).unwrap();
        assert_eq!(registry.map(id, 2, RW).unwrap_err(), ShmError::PermissionDenied);
    }

    #[test]
    fn test_destroy_waits_for_last_view() {
        let mut registry = ShmRegistry::new();
        let id = registry.create("test", PAGE_SIZE, 1, flags::SHM_READ).unwrap();
        let view = registry.map(id, 2, flags::SHM_READ).unwrap();

        assert_eq!(registry.destroy(id, 2), Err(ShmError::PermissionDenied));
        registry.destroy(id, 1).unwrap();
        assert!(registry.info(id).unwrap().doomed);
        assert_eq!(registry.map(id, 3, flags::SHM_READ).unwrap_err(), ShmError::NotFound);

        registry.unmap(id, 2).unwrap();
        assert!(registry.info(id).is_none());
        assert_eq!(registry.stats(), (0, 0));
        // The view still owns the pages.
        assert_eq!(view.len(), PAGE_SIZE);
    }
}
