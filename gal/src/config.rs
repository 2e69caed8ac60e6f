//! GAL configuration.
//!
//! Compile-time limits and layout constants, plus the runtime
//! [`GalConfig`] handed to [`GalContext::init`](crate::GalContext::init).

use crate::video::VideoCaps;

/// Page size used to round shared surface mappings (4 KB).
pub const PAGE_SIZE: usize = 4096;

/// Capacity of the dirty rectangle list kept per surface.
pub const NR_DIRTY_RECTS: usize = 8;

/// Semaphore slots allocated when the pool is created without a config.
pub const DEFAULT_SEM_SLOTS: usize = 64;

/// Magic value at offset 0 of every shared surface header ("GALS").
pub const SHARED_HEADER_MAGIC: u32 = 0x5341_4C47;

/// Layout version of the shared surface header.
pub const SHARED_HEADER_VERSION: u32 = 1;

/// Largest number of horizontal bands a stretch is split into.
pub const MAX_CONCURRENT_TASKS: usize = 8;

/// Fixed-point one for the 16.16 stretch accumulator.
pub const FIXED_ONE: u32 = 0x1_0000;

/// Runtime configuration.
#[derive(Debug, Clone, Copy)]
pub struct GalConfig {
    /// Accelerations the caller permits; masked into the device's own caps.
    pub accel_mask: VideoCaps,
    /// Number of bands for parallel stretching (1, 2, 4 or 8).
    pub concurrent_tasks: usize,
    /// Semaphore pool size for shared surfaces.
    pub sem_slots: usize,
    /// Allow run-length encoding of eligible sources.
    pub rle: bool,
}

impl Default for GalConfig {
    fn default() -> Self {
        Self {
            accel_mask: VideoCaps::all(),
            concurrent_tasks: 1,
            sem_slots: DEFAULT_SEM_SLOTS,
            rle: true,
        }
    }
}

impl GalConfig {
    /// Apply the legacy acceleration bit mask: bit 0 fill, bit 1 blit,
    /// bit 2 colorkey blit, bit 3 alpha blit.
    pub fn with_accel_bits(mut self, bits: u32) -> Self {
        let mut mask = VideoCaps::ANY_SIZE | VideoCaps::MULTI_SURFACE;
        if bits & 0x01 != 0 {
            mask |= VideoCaps::HW_FILL;
        }
        if bits & 0x02 != 0 {
            mask |= VideoCaps::HW_BLIT | VideoCaps::SW_BLIT;
        }
        if bits & 0x04 != 0 {
            mask |= VideoCaps::HW_BLIT_CC | VideoCaps::SW_BLIT_CC;
        }
        if bits & 0x08 != 0 {
            mask |= VideoCaps::HW_BLIT_A | VideoCaps::SW_BLIT_A;
        }
        self.accel_mask = mask;
        self
    }

    /// Clamp the band count to a supported value.
    pub fn with_tasks(mut self, tasks: usize) -> Self {
        self.concurrent_tasks = normalize_tasks(tasks);
        self
    }

    /// Read `KPIO_GAL_HWACCEL_FLAGS` and `KPIO_GAL_TASKS` from the environment.
    #[cfg(feature = "std")]
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(bits) = std::env::var("KPIO_GAL_HWACCEL_FLAGS")
            .ok()
            .and_then(|v| v.trim().parse::<u32>().ok())
        {
            config = config.with_accel_bits(bits);
        }
        if let Some(tasks) = std::env::var("KPIO_GAL_TASKS")
            .ok()
            .and_then(|v| v.trim().parse::<usize>().ok())
        {
            config = config.with_tasks(tasks);
        }
        config
    }
}

/// Round a requested band count down to 1, 2, 4 or 8.
pub fn normalize_tasks(tasks: usize) -> usize {
    match tasks {
        0 | 1 => 1,
        2 | 3 => 2,
        4..=7 => 4,
        _ => MAX_CONCURRENT_TASKS,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accel_bits() {
        let config = GalConfig::default().with_accel_bits(0x03);
        assert!(config.accel_mask.contains(VideoCaps::HW_FILL));
        assert!(config.accel_mask.contains(VideoCaps::HW_BLIT));
        assert!(!config.accel_mask.contains(VideoCaps::HW_BLIT_CC));
        assert!(!config.accel_mask.contains(VideoCaps::HW_BLIT_A));
    }

    #[test]
    fn test_normalize_tasks() {
        assert_eq!(normalize_tasks(0), 1);
        assert_eq!(normalize_tasks(3), 2);
        assert_eq!(normalize_tasks(6), 4);
        assert_eq!(normalize_tasks(64), 8);
    }
}
