//! Dirty region bookkeeping.
//!
//! [`DirtyInfo`] is stored verbatim inside the shared surface header, so it
//! only holds fixed-width integers and a fixed-capacity rectangle array.
//! When the array is full the whole set collapses into one bounding
//! rectangle; consumers may over-redraw but never miss a change.

use alloc::vec::Vec;

use crate::config::NR_DIRTY_RECTS;
use crate::rect::Rect;

/// Wire form of a dirty rectangle.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DirtyRect {
    pub x: i32,
    pub y: i32,
    pub w: u32,
    pub h: u32,
}

impl From<Rect> for DirtyRect {
    fn from(r: Rect) -> Self {
        Self {
            x: r.x,
            y: r.y,
            w: r.width,
            h: r.height,
        }
    }
}

impl From<DirtyRect> for Rect {
    fn from(r: DirtyRect) -> Self {
        Rect::new(r.x, r.y, r.w, r.h)
    }
}

/// Aging counter plus a bounded list of changed rectangles.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirtyInfo {
    /// Bumped on every recorded change; consumers compare it to skip work.
    pub dirty_age: u32,
    /// Valid entries at the front of `dirty_rcs`.
    pub nr_dirty_rcs: u32,
    pub dirty_rcs: [DirtyRect; NR_DIRTY_RECTS],
}

impl Default for DirtyInfo {
    fn default() -> Self {
        Self::new()
    }
}

impl DirtyInfo {
    /// Empty dirty info with age zero.
    pub const fn new() -> Self {
        Self {
            dirty_age: 0,
            nr_dirty_rcs: 0,
            dirty_rcs: [DirtyRect {
                x: 0,
                y: 0,
                w: 0,
                h: 0,
            }; NR_DIRTY_RECTS],
        }
    }

    /// Number of valid rectangles, clamped to capacity.
    #[inline]
    pub fn len(&self) -> usize {
        (self.nr_dirty_rcs as usize).min(NR_DIRTY_RECTS)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Currently recorded rectangles.
    pub fn rects(&self) -> impl Iterator<Item = Rect> + '_ {
        self.dirty_rcs[..self.len()].iter().map(|r| Rect::from(*r))
    }

    /// Bounding rectangle of everything recorded.
    pub fn bounds(&self) -> Rect {
        self.rects().fold(Rect::default(), |acc, r| acc.union(&r))
    }

    /// Record a changed rectangle.
    ///
    /// A rectangle already covered by an entry only bumps the age. On
    /// overflow every entry and the new rectangle merge into one.
    pub fn add(&mut self, rect: &Rect) {
        if rect.is_empty() {
            return;
        }
        self.dirty_age = self.dirty_age.wrapping_add(1);

        let n = self.len();
        if self.dirty_rcs[..n]
            .iter()
            .any(|r| Rect::from(*r).contains_rect(rect))
        {
            return;
        }

        if n < NR_DIRTY_RECTS {
            self.dirty_rcs[n] = DirtyRect::from(*rect);
            self.nr_dirty_rcs = (n + 1) as u32;
        } else {
            let merged = self.bounds().union(rect);
            self.dirty_rcs[0] = DirtyRect::from(merged);
            self.nr_dirty_rcs = 1;
        }
    }

    /// Hand the recorded rectangles to a consumer and clear the list.
    /// The age is kept so consumers can tell whether anything happened
    /// since their last look.
    pub fn take(&mut self) -> (u32, Vec<Rect>) {
        let rects = self.rects().collect();
        self.nr_dirty_rcs = 0;
        (self.dirty_age, rects)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_and_take() {
        let mut info = DirtyInfo::new();
        info.add(&Rect::new(0, 0, 10, 10));
        info.add(&Rect::new(20, 20, 5, 5));
        assert_eq!(info.len(), 2);
        assert_eq!(info.dirty_age, 2);

        let (age, rects) = info.take();
        assert_eq!(age, 2);
        assert_eq!(rects.len(), 2);
        assert!(info.is_empty());
        assert_eq!(info.dirty_age, 2);
    }

    #[test]
    fn test_contained_rect_only_ages() {
        let mut info = DirtyInfo::new();
        info.add(&Rect::new(0, 0, 100, 100));
        info.add(&Rect::new(10, 10, 5, 5));
        assert_eq!(info.len(), 1);
        assert_eq!(info.dirty_age, 2);
    }

    #[test]
    fn test_overflow_merges_to_bounds() {
        let mut info = DirtyInfo::new();
        for i in 0..NR_DIRTY_RECTS as i32 {
            info.add(&Rect::new(i * 10, 0, 5, 5));
        }
        assert_eq!(info.len(), NR_DIRTY_RECTS);

        info.add(&Rect::new(0, 100, 1, 1));
        assert_eq!(info.len(), 1);
        assert_eq!(info.dirty_age, NR_DIRTY_RECTS as u32 + 1);
        let expected = Rect::from_edges(0, 0, (NR_DIRTY_RECTS as i32 - 1) * 10 + 5, 101);
        assert_eq!(info.rects().next(), Some(expected));
    }

    #[test]
    fn test_empty_rect_ignored() {
        let mut info = DirtyInfo::new();
        info.add(&Rect::new(5, 5, 0, 3));
        assert_eq!(info.dirty_age, 0);
        assert!(info.is_empty());
    }
}
