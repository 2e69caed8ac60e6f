//! Horizontal band fan-out.
//!
//! Row-independent work (stretching, transforms) is split into up to
//! [`MAX_CONCURRENT_TASKS`](crate::config::MAX_CONCURRENT_TASKS) bands of
//! whole rows. With the `std` feature each band runs on a scoped thread;
//! without it the bands run one after another on the caller.

use alloc::vec::Vec;

use crate::config::normalize_tasks;
use crate::rect::Rect;

/// Split `rect` into `tasks` (normalized to 1, 2, 4 or 8) bands of rows.
/// The last band takes the remainder; there are never more bands than rows.
pub fn split_rect(rect: &Rect, tasks: usize) -> Vec<Rect> {
    if rect.is_empty() {
        return Vec::new();
    }
    let n = (normalize_tasks(tasks) as u32).min(rect.height);
    let step = rect.height / n;
    (0..n)
        .map(|i| {
            let y = rect.y + (i * step) as i32;
            let height = if i + 1 == n {
                rect.height - i * step
            } else {
                step
            };
            Rect::new(rect.x, y, rect.width, height)
        })
        .collect()
}

/// Run `work` over the bands of `rect` inside a `pitch`-strided buffer.
///
/// Each call gets its band and the rows it covers, with row 0 of the slice
/// being `band.y`. Bands own disjoint rows, so they may run concurrently.
pub fn for_each_band<F>(pixels: &mut [u8], pitch: usize, rect: &Rect, tasks: usize, work: F)
where
    F: Fn(&Rect, &mut [u8]) + Sync,
{
    let bands = split_rect(rect, tasks);
    let mut chunks = Vec::with_capacity(bands.len());
    let mut rest = pixels;
    let mut offset = 0usize;
    for band in &bands {
        let start = band.y as usize * pitch;
        let end = (band.bottom() as usize * pitch).min(offset + rest.len());
        let (_, tail) = core::mem::take(&mut rest).split_at_mut(start - offset);
        let (chunk, tail) = tail.split_at_mut(end - start);
        chunks.push(chunk);
        rest = tail;
        offset = end;
    }
    run(&bands, chunks, &work);
}

#[cfg(any(test, feature = "std"))]
fn run<F>(bands: &[Rect], chunks: Vec<&mut [u8]>, work: &F)
where
    F: Fn(&Rect, &mut [u8]) + Sync,
{
    if bands.len() == 1 {
        for chunk in chunks {
            work(&bands[0], chunk);
        }
        return;
    }
    std::thread::scope(|scope| {
        let mut jobs = bands.iter().zip(chunks);
        let first = jobs.next();
        for (band, chunk) in jobs {
            scope.spawn(move || work(band, chunk));
        }
        if let Some((band, chunk)) = first {
            work(band, chunk);
        }
    });
}

#[cfg(not(any(test, feature = "std")))]
fn run<F>(bands: &[Rect], chunks: Vec<&mut [u8]>, work: &F)
where
    F: Fn(&Rect, &mut [u8]) + Sync,
{
    for (band, chunk) in bands.iter().zip(chunks) {
        work(band, chunk);
    }
}
