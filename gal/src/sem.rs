//! Semaphore slots guarding shared surface headers.
//!
//! One process-wide pool hands out binary semaphores by slot index. The
//! index is written into the shared header so every attacher locks the same
//! slot. Acquisition spins; critical sections are a handful of header
//! field updates.
//!
//! Exactly one shared surface may be created before the pool exists (the
//! bootstrap screen surface); it carries no slot and its header updates go
//! unguarded.

use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU32, Ordering};
use spin::RwLock;

use crate::error::GalError;

const SLOT_FREE: u32 = 1;
const SLOT_HELD: u32 = 0;

/// A binary semaphore.
struct SemSlot {
    value: AtomicU32,
}

impl SemSlot {
    fn new() -> Self {
        Self {
            value: AtomicU32::new(SLOT_FREE),
        }
    }

    fn try_acquire(&self) -> bool {
        self.value
            .compare_exchange(SLOT_FREE, SLOT_HELD, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    fn acquire(&self) {
        while !self.try_acquire() {
            while self.value.load(Ordering::Relaxed) == SLOT_HELD {
                core::hint::spin_loop();
            }
        }
    }

    fn release(&self) {
        self.value.store(SLOT_FREE, Ordering::Release);
    }
}

/// Fixed set of semaphores with allocation bookkeeping.
///
/// Every mapping of a shared surface holds a reference on its slot; the
/// slot goes back to the pool when the last one is dropped.
pub struct SemaphorePool {
    slots: Arc<[SemSlot]>,
    refs: Vec<u32>,
}

impl SemaphorePool {
    /// Create a pool of `nr_slots` free semaphores.
    pub fn new(nr_slots: usize) -> Self {
        let slots: Vec<SemSlot> = (0..nr_slots).map(|_| SemSlot::new()).collect();
        Self {
            slots: Arc::from(slots),
            refs: vec![0; nr_slots],
        }
    }

    /// Total number of slots.
    pub fn capacity(&self) -> usize {
        self.refs.len()
    }

    /// Slots currently handed out.
    pub fn used(&self) -> usize {
        self.refs.iter().filter(|r| **r > 0).count()
    }

    /// Reserve a free slot, holding one reference on it.
    pub fn alloc(&mut self) -> Result<u32, GalError> {
        let index = self
            .refs
            .iter()
            .position(|r| *r == 0)
            .ok_or(GalError::SemaphoreExhausted)?;
        self.refs[index] = 1;
        Ok(index as u32)
    }

    /// Take another reference on an allocated slot.
    pub fn retain(&mut self, slot: u32) -> Result<(), GalError> {
        match self.refs.get_mut(slot as usize) {
            Some(r) if *r > 0 => {
                *r += 1;
                Ok(())
            }
            _ => Err(unallocated(slot)),
        }
    }

    /// Drop one reference; the last one returns the slot to the pool.
    pub fn free(&mut self, slot: u32) {
        if let Some(r) = self.refs.get_mut(slot as usize) {
            *r = r.saturating_sub(1);
        }
    }

    /// Block until `slot` is held.
    pub fn lock(&self, slot: u32) -> Result<SemGuard, GalError> {
        Ok(self.handle(slot)?.acquire())
    }

    /// Unacquired reference to an allocated slot.
    fn handle(&self, slot: u32) -> Result<SlotHandle, GalError> {
        let index = slot as usize;
        if self.refs.get(index).copied().unwrap_or(0) == 0 {
            return Err(unallocated(slot));
        }
        Ok(SlotHandle {
            slots: self.slots.clone(),
            index,
        })
    }
}

fn unallocated(slot: u32) -> GalError {
    GalError::Device(alloc::format!("semaphore slot {} not allocated", slot))
}

/// A slot reference that can be acquired without holding the pool lock.
struct SlotHandle {
    slots: Arc<[SemSlot]>,
    index: usize,
}

impl SlotHandle {
    fn acquire(self) -> SemGuard {
        self.slots[self.index].acquire();
        SemGuard {
            slots: self.slots,
            index: self.index,
        }
    }
}

/// Holds a semaphore slot until dropped.
pub struct SemGuard {
    slots: Arc<[SemSlot]>,
    index: usize,
}

impl SemGuard {
    /// Slot this guard holds.
    pub fn slot(&self) -> u32 {
        self.index as u32
    }
}

impl Drop for SemGuard {
    fn drop(&mut self) {
        self.slots[self.index].release();
    }
}

impl core::fmt::Debug for SemGuard {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SemGuard").field("slot", &self.index).finish()
    }
}

/// Pool plus the one-time bootstrap exemption.
pub struct SemaphoreTable {
    pool: Option<SemaphorePool>,
    bootstrap_taken: bool,
}

impl SemaphoreTable {
    pub const fn new() -> Self {
        Self {
            pool: None,
            bootstrap_taken: false,
        }
    }

    /// Create the pool unless one exists already.
    pub fn init(&mut self, nr_slots: usize) {
        if self.pool.is_none() {
            log::debug!("gal: semaphore pool with {} slots", nr_slots);
            self.pool = Some(SemaphorePool::new(nr_slots));
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.pool.is_some()
    }

    /// Slot for a new shared surface. `Ok(None)` is the bootstrap surface
    /// created before the pool; a second such request fails.
    pub fn alloc(&mut self) -> Result<Option<u32>, GalError> {
        match self.pool.as_mut() {
            Some(pool) => pool.alloc().map(Some),
            None if !self.bootstrap_taken => {
                self.bootstrap_taken = true;
                Ok(None)
            }
            None => Err(GalError::SemaphoreExhausted),
        }
    }

    pub fn retain(&mut self, slot: u32) -> Result<(), GalError> {
        self.pool
            .as_mut()
            .ok_or(GalError::SemaphoreExhausted)?
            .retain(slot)
    }

    pub fn free(&mut self, slot: u32) {
        if let Some(pool) = self.pool.as_mut() {
            pool.free(slot);
        }
    }

    pub fn lock(&self, slot: u32) -> Result<SemGuard, GalError> {
        Ok(self.handle(slot)?.acquire())
    }

    fn handle(&self, slot: u32) -> Result<SlotHandle, GalError> {
        self.pool
            .as_ref()
            .ok_or(GalError::SemaphoreExhausted)?
            .handle(slot)
    }

    /// (used, capacity) of the pool.
    pub fn stats(&self) -> (usize, usize) {
        self.pool
            .as_ref()
            .map(|p| (p.used(), p.capacity()))
            .unwrap_or((0, 0))
    }
}

/// Process-wide semaphore table.
static SEMAPHORES: RwLock<SemaphoreTable> = RwLock::new(SemaphoreTable::new());

/// Initialize the process-wide pool (no-op if already initialized).
pub fn init(nr_slots: usize) {
    SEMAPHORES.write().init(nr_slots);
}

/// Whether the process-wide pool exists.
pub fn is_initialized() -> bool {
    SEMAPHORES.read().is_initialized()
}

/// Allocate a slot from the process-wide pool.
pub fn alloc_slot() -> Result<Option<u32>, GalError> {
    SEMAPHORES.write().alloc()
}

/// Add a reference to a slot of the process-wide pool, for a new mapping
/// of a surface that already has one.
pub fn retain_slot(slot: u32) -> Result<(), GalError> {
    SEMAPHORES.write().retain(slot)
}

/// Drop a reference to a slot of the process-wide pool.
pub fn free_slot(slot: u32) {
    SEMAPHORES.write().free(slot);
}

/// Lock a slot of the process-wide pool. The table lock is released before
/// waiting on the slot.
pub fn lock(slot: u32) -> Result<SemGuard, GalError> {
    let handle = SEMAPHORES.read().handle(slot)?;
    Ok(handle.acquire())
}

/// Pool usage statistics.
pub fn stats() -> (usize, usize) {
    SEMAPHORES.read().stats()
}
