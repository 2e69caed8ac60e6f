//! Rectangle arithmetic used by clipping, blitting and dirty tracking.
//!
//! Edges are half open: a rectangle covers columns `x..right()` and rows
//! `y..bottom()`.

/// A rectangle in surface pixel space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub const fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// `width` x `height` at the origin, i.e. the bounds of a surface.
    pub const fn sized(width: u32, height: u32) -> Self {
        Self::new(0, 0, width, height)
    }

    /// From exclusive edges; inverted edges give an empty rectangle.
    pub fn from_edges(left: i32, top: i32, right: i32, bottom: i32) -> Self {
        Self::new(
            left,
            top,
            right.saturating_sub(left).max(0) as u32,
            bottom.saturating_sub(top).max(0) as u32,
        )
    }

    #[inline]
    pub fn right(&self) -> i32 {
        self.x + self.width as i32
    }

    #[inline]
    pub fn bottom(&self) -> i32 {
        self.y + self.height as i32
    }

    /// No pixel covered.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// At least one pixel in common. Empty rectangles share nothing.
    pub fn intersects(&self, other: &Rect) -> bool {
        !self.is_empty()
            && !other.is_empty()
            && self.x < other.right()
            && other.x < self.right()
            && self.y < other.bottom()
            && other.y < self.bottom()
    }

    /// The common pixels, or `None` when there are none.
    pub fn intersection(&self, other: &Rect) -> Option<Rect> {
        self.intersects(other).then(|| {
            Rect::from_edges(
                self.x.max(other.x),
                self.y.max(other.y),
                self.right().min(other.right()),
                self.bottom().min(other.bottom()),
            )
        })
    }

    /// Bounding rectangle of both; an empty side is ignored.
    pub fn union(&self, other: &Rect) -> Rect {
        match (self.is_empty(), other.is_empty()) {
            (true, _) => *other,
            (_, true) => *self,
            _ => Rect::from_edges(
                self.x.min(other.x),
                self.y.min(other.y),
                self.right().max(other.right()),
                self.bottom().max(other.bottom()),
            ),
        }
    }

    /// Pixel count.
    pub fn area(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }

    pub fn contains(&self, px: i32, py: i32) -> bool {
        (self.x..self.right()).contains(&px) && (self.y..self.bottom()).contains(&py)
    }

    /// Whether `other` lies entirely inside. Empty rectangles count by
    /// origin only.
    pub fn contains_rect(&self, other: &Rect) -> bool {
        other.x >= self.x
            && other.y >= self.y
            && other.right() <= self.right()
            && other.bottom() <= self.bottom()
    }

    pub fn offset(&self, dx: i32, dy: i32) -> Rect {
        Rect::new(self.x + dx, self.y + dy, self.width, self.height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clip_to_surface() {
        let bounds = Rect::sized(64, 48);
        let blit = Rect::new(40, 30, 40, 40);
        assert!(blit.intersects(&bounds));
        assert_eq!(blit.intersection(&bounds), Some(Rect::new(40, 30, 24, 18)));
        assert!(bounds.contains_rect(&Rect::new(40, 30, 24, 18)));
        assert!(!bounds.contains_rect(&blit));
    }

    #[test]
    fn test_shared_edge_is_not_overlap() {
        let left = Rect::new(0, 0, 8, 8);
        let right = Rect::new(8, 0, 8, 8);
        assert!(!left.intersects(&right));
        assert_eq!(left.intersection(&right), None);
        assert!(!left.intersects(&Rect::new(2, 2, 0, 4)));
    }

    #[test]
    fn test_bounding_union() {
        let a = Rect::new(2, 3, 4, 4);
        let b = Rect::new(10, 1, 2, 2);
        assert_eq!(a.union(&b), Rect::new(2, 1, 10, 6));
        assert_eq!(Rect::default().union(&b), b);
        assert_eq!(a.union(&Rect::new(50, 50, 0, 0)), a);
    }

    #[test]
    fn test_negative_origin() {
        let r = Rect::new(-5, -5, 10, 10);
        assert_eq!(r.intersection(&Rect::sized(8, 8)), Some(Rect::new(0, 0, 5, 5)));
        assert!(r.contains(-5, 4));
        assert!(!r.contains(5, 0));
        assert_eq!(r.offset(5, 5), Rect::sized(10, 10));
        assert_eq!(Rect::from_edges(4, 4, 2, 9), Rect::new(4, 4, 0, 5));
    }
}
