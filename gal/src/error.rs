//! Error types for the graphics abstraction layer.
//!
//! Every error that reaches a caller is also recorded in a process-wide
//! "last error" string.

use alloc::string::{String, ToString};
use core::fmt;
use spin::Mutex;

use crate::shm::ShmError;

/// GAL error types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GalError {
    /// A required surface handle was missing.
    NullSurface,
    /// A rectangle lies outside the surface it refers to.
    InvalidRect,
    /// No routine exists for the source/destination format pair.
    UnsupportedBlit,
    /// The video device does not implement the requested operation.
    Unsupported,
    /// Pixel, palette or table allocation failed.
    OutOfMemory,
    /// Write attempted through a read-only shared attachment.
    ReadOnly,
    /// No video mode has been set, or none matches the request.
    NoVideoMode,
    /// Pixel format request cannot be satisfied.
    InvalidFormat(String),
    /// Shared memory registry failure.
    Shm(ShmError),
    /// Every semaphore slot of the pool is in use.
    SemaphoreExhausted,
    /// A mapped shared surface header failed validation.
    BadSharedHeader(String),
    /// Driver-specific failure.
    Device(String),
}

impl fmt::Display for GalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GalError::NullSurface => write!(f, "passed a NULL surface"),
            GalError::InvalidRect => write!(f, "invalid rectangle"),
            GalError::UnsupportedBlit => write!(f, "Blit combination not supported"),
            GalError::Unsupported => write!(f, "operation not supported by the video device"),
            GalError::OutOfMemory => write!(f, "out of memory"),
            GalError::ReadOnly => write!(f, "surface is attached read-only"),
            GalError::NoVideoMode => write!(f, "no video mode has been set"),
            GalError::InvalidFormat(msg) => write!(f, "invalid pixel format: {}", msg),
            GalError::Shm(e) => write!(f, "shared memory error: {:?}", e),
            GalError::SemaphoreExhausted => write!(f, "no free semaphore slot"),
            GalError::BadSharedHeader(msg) => write!(f, "bad shared surface header: {}", msg),
            GalError::Device(msg) => write!(f, "video device error: {}", msg),
        }
    }
}

impl From<ShmError> for GalError {
    fn from(e: ShmError) -> Self {
        GalError::Shm(e)
    }
}

/// Process-wide last error message.
static LAST_ERROR: Mutex<Option<String>> = Mutex::new(None);

/// Record an error message.
pub fn set_error(msg: &str) {
    *LAST_ERROR.lock() = Some(String::from(msg));
}

/// Get the last recorded error message, if any.
pub fn last_error() -> Option<String> {
    LAST_ERROR.lock().clone()
}

/// Forget the last recorded error.
pub fn clear_error() {
    *LAST_ERROR.lock() = None;
}

/// Record `err` as the last error and hand it back for propagation.
pub(crate) fn report(err: GalError) -> GalError {
    log::debug!("gal: {}", err);
    set_error(&err.to_string());
    err
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_sets_last_error() {
        let err = report(GalError::UnsupportedBlit);
        assert_eq!(err, GalError::UnsupportedBlit);
        // Other tests may race on the global; only check it was set at all.
        assert!(last_error().is_some());
    }

    #[test]
    fn test_display_messages() {
        assert_eq!(
            GalError::UnsupportedBlit.to_string(),
            "Blit combination not supported"
        );
        assert_eq!(
            GalError::InvalidFormat("bpp 7".into()).to_string(),
            "invalid pixel format: bpp 7"
        );
    }
}
