//! Integer rectangles in image pixel coordinates and the ROI difference
//! transform used for incremental updates.

use std::fmt;

/// Axis-aligned rectangle. `x`/`y` is the top-left pixel, the rectangle
/// covers `x..x + width` and `y..y + height`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl Rect {
    pub const fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Rectangle anchored at the origin, e.g. a full image extent.
    pub const fn from_size(width: i32, height: i32) -> Self {
        Self::new(0, 0, width, height)
    }

    pub fn right(&self) -> i32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> i32 {
        self.y + self.height
    }

    pub fn area(&self) -> i64 {
        if self.is_empty() {
            0
        } else {
            i64::from(self.width) * i64::from(self.height)
        }
    }

    pub fn is_empty(&self) -> bool {
        self.width <= 0 || self.height <= 0
    }

    pub fn contains(&self, px: i32, py: i32) -> bool {
        px >= self.x && px < self.right() && py >= self.y && py < self.bottom()
    }

    /// Overlap of two rectangles, `Rect::default()` when they do not overlap.
    pub fn intersect(&self, other: &Rect) -> Rect {
        let x = self.x.max(other.x);
        let y = self.y.max(other.y);
        let right = self.right().min(other.right());
        let bottom = self.bottom().min(other.bottom());
        if right <= x || bottom <= y {
            Rect::default()
        } else {
            Rect::new(x, y, right - x, bottom - y)
        }
    }

    /// Express this rectangle relative to `origin`'s top-left corner.
    pub fn relative_to(&self, origin: &Rect) -> Rect {
        Rect::new(self.x - origin.x, self.y - origin.y, self.width, self.height)
    }
}

impl fmt::Display for Rect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}+{}+{}", self.width, self.height, self.x, self.y)
    }
}

/// Result of [`rect_transform`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RectDiff {
    /// Disjoint pieces of the old ROI that leave the new ROI.
    pub sub: Vec<Rect>,
    /// Disjoint pieces of the new ROI that were not in the old ROI.
    pub add: Vec<Rect>,
    /// Whether patching with `sub`/`add` beats recomputing the new ROI.
    pub profitable: bool,
}

impl RectDiff {
    pub fn sub_area(&self) -> i64 {
        self.sub.iter().map(Rect::area).sum()
    }

    pub fn add_area(&self) -> i64 {
        self.add.iter().map(Rect::area).sum()
    }
}

/// Split `outer \ inner` into at most four disjoint rectangles.
///
/// `inner` must lie within `outer` (it is normally their intersection).
/// Top and bottom strips span the full width of `outer`, left and right
/// strips only the height of `inner`.
pub fn rect_complement(outer: &Rect, inner: &Rect) -> Vec<Rect> {
    if outer.is_empty() {
        return Vec::new();
    }
    if inner.is_empty() {
        return vec![*outer];
    }

    [
        Rect::new(outer.x, outer.y, outer.width, inner.y - outer.y),
        Rect::new(outer.x, inner.bottom(), outer.width, outer.bottom() - inner.bottom()),
        Rect::new(outer.x, inner.y, inner.x - outer.x, inner.height),
        Rect::new(inner.right(), inner.y, outer.right() - inner.right(), inner.height),
    ]
    .into_iter()
    .filter(|r| !r.is_empty())
    .collect()
}

/// Compute the regions to discard (`sub`) and to newly compute (`add`) when the
/// ROI moves from `old` to `new`.
///
/// Both lists are in absolute image coordinates, not relative to either ROI:
/// panning `(0, 0, 100, 100)` to `(50, 0, 100, 100)` subtracts
/// `(0, 0, 50, 100)` and adds `(100, 0, 50, 100)`.
///
/// The update is profitable when both rectangles overlap and
/// `area(sub) + area(add) <= threshold * area(new)`.
pub fn rect_transform(old: &Rect, new: &Rect, threshold: f64) -> RectDiff {
    let overlap = old.intersect(new);
    let diff = RectDiff {
        sub: rect_complement(old, &overlap),
        add: rect_complement(new, &overlap),
        profitable: false,
    };
    if overlap.is_empty() {
        return diff;
    }

    let changed = (diff.sub_area() + diff.add_area()) as f64;
    let profitable = changed <= threshold * new.area() as f64;
    RectDiff { profitable, ..diff }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn pixels(rect: &Rect) -> HashSet<(i32, i32)> {
        let mut set = HashSet::new();
        for y in rect.y..rect.bottom() {
            for x in rect.x..rect.right() {
                set.insert((x, y));
            }
        }
        set
    }

    #[test]
    fn test_intersect() {
        let a = Rect::new(0, 0, 10, 10);
        assert_eq!(a.intersect(&Rect::new(5, 5, 10, 10)), Rect::new(5, 5, 5, 5));
        assert!(a.intersect(&Rect::new(10, 0, 5, 5)).is_empty());
        assert_eq!(a.intersect(&a), a);
    }

    #[test]
    fn test_horizontal_pan() {
        let diff = rect_transform(&Rect::new(0, 0, 100, 100), &Rect::new(50, 0, 100, 100), 1.0);
        assert_eq!(diff.sub, vec![Rect::new(0, 0, 50, 100)]);
        assert_eq!(diff.add, vec![Rect::new(100, 0, 50, 100)]);
        assert!(diff.profitable);
    }

    #[test]
    fn test_unchanged_roi_is_empty_diff() {
        let roi = Rect::new(13, 7, 40, 30);
        let diff = rect_transform(&roi, &roi, 1.0);
        assert!(diff.sub.is_empty());
        assert!(diff.add.is_empty());
        assert!(diff.profitable);
    }

    #[test]
    fn test_disjoint_rois_not_profitable() {
        let diff = rect_transform(&Rect::new(0, 0, 10, 10), &Rect::new(20, 20, 10, 10), 1.0);
        assert!(!diff.profitable);
        assert_eq!(diff.sub, vec![Rect::new(0, 0, 10, 10)]);
        assert_eq!(diff.add, vec![Rect::new(20, 20, 10, 10)]);
    }

    #[test]
    fn test_threshold_controls_profitability() {
        let old = Rect::new(0, 0, 100, 100);
        let new = Rect::new(60, 0, 100, 100);
        assert!(!rect_transform(&old, &new, 1.0).profitable);
        assert!(rect_transform(&old, &new, 1.5).profitable);
        assert!(!rect_transform(&old, &new, 0.0).profitable);
    }

    #[test]
    fn test_replay_reproduces_new_roi() {
        let coords = [0, 2, 3, 5];
        let sizes = [1, 2, 4, 6];
        let mut rects = Vec::new();
        for &x in &coords {
            for &y in &coords {
                for &w in &sizes {
                    for &h in &sizes {
                        rects.push(Rect::new(x, y, w, h));
                    }
                }
            }
        }

        for old in &rects {
            for new in rects.iter().step_by(7) {
                let diff = rect_transform(old, new, f64::INFINITY);
                let old_px = pixels(old);
                let new_px = pixels(new);

                let mut current = old_px.clone();
                let mut seen_sub = HashSet::new();
                for r in &diff.sub {
                    for p in pixels(r) {
                        assert!(old_px.contains(&p) && !new_px.contains(&p));
                        assert!(seen_sub.insert(p), "sub overlaps itself");
                        current.remove(&p);
                    }
                }
                for r in &diff.add {
                    for p in pixels(r) {
                        assert!(new_px.contains(&p) && !old_px.contains(&p));
                        assert!(!seen_sub.contains(&p));
                        assert!(current.insert(p), "add overlaps itself");
                    }
                }
                assert_eq!(current, new_px, "replay {} -> {}", old, new);
            }
        }
    }

    #[test]
    fn test_display_format() {
        assert_eq!(Rect::new(1, 2, 30, 40).to_string(), "30x40+1+2");
    }
}
