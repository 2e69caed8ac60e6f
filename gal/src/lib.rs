//! KPIO Graphics Abstraction Layer
//!
//! Pixel surfaces and the blitting engine behind KPIO's 2D graphics.
//!
//! # Architecture
//!
//! - `pixels`: pixel formats, palettes and color mapping
//! - `surface`: surfaces, clip rectangles, colorkey/alpha state, fills
//! - `map`: per-source blit maps (translation tables, routine choice)
//! - `blit`: clipped blits, software copy/key/blend routines, hardware hand-off
//! - `rle`: run-length encoded colorkey and alpha surfaces
//! - `stretch`: scaled and transformed blits
//! - `shared`: surfaces shared between processes, with dirty tracking
//! - `video`: the video device interface and an in-memory device
//! - `context`: the video mode, display surface and surface placement
//!
//! The crate is `no_std`; the `std` feature adds environment driven
//! configuration and threaded band rendering.

#![cfg_attr(not(any(test, feature = "std")), no_std)]

extern crate alloc;

pub mod blit;
pub mod config;
pub mod context;
pub mod dirty;
pub mod error;
pub mod map;
pub mod pixels;
pub mod rect;
pub mod rle;
pub mod sem;
pub mod shared;
pub mod shm;
pub mod stretch;
pub mod surface;
pub mod tasks;
pub mod video;

pub use blit::{lower_blit, upper_blit};
pub use config::GalConfig;
pub use context::GalContext;
pub use dirty::DirtyInfo;
pub use error::GalError;
pub use pixels::{Color, Palette, PixelFormat};
pub use rect::Rect;
pub use shared::SharedHandle;
pub use stretch::{soft_stretch, stretch_blit, Filter, StretchOptions, Transform};
pub use surface::{Surface, SurfaceFlags, SurfaceRef};
pub use video::{MemoryVideoDevice, VideoCaps, VideoDevice, VideoInfo};
