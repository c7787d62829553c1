//! Tile-aligned rectangles and the overlap predicate.

use crate::error::GeometryError;
use std::fmt;

/// A rectangle on the virtual canvas, in pixels.
///
/// `(x, y)` is the top-left corner. The covered area is the half-open box
/// `[x, x + w) × [y, y + h)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Rect {
    /// Left edge
    pub x: i64,
    /// Top edge
    pub y: i64,
    /// Width in pixels
    pub w: i64,
    /// Height in pixels
    pub h: i64,
}

impl Rect {
    /// Create a new rectangle.
    pub const fn new(x: i64, y: i64, w: i64, h: i64) -> Self {
        Self { x, y, w, h }
    }

    /// Exclusive right edge.
    #[inline]
    pub const fn right(&self) -> i64 {
        self.x.saturating_add(self.w)
    }

    /// Exclusive bottom edge.
    #[inline]
    pub const fn bottom(&self) -> i64 {
        self.y.saturating_add(self.h)
    }

    /// Area in square pixels (0 for degenerate rectangles).
    pub fn area(&self) -> u128 {
        if self.w <= 0 || self.h <= 0 {
            return 0;
        }
        self.w as u128 * self.h as u128
    }

    /// True if width and height are positive multiples of `tile`.
    pub fn is_snapped(&self, tile: i64) -> bool {
        tile > 0 && self.w > 0 && self.h > 0 && self.w % tile == 0 && self.h % tile == 0
    }

    /// True if the top-left corner sits on a grid line of `tile`.
    pub fn is_aligned(&self, tile: i64) -> bool {
        tile > 0 && self.x.rem_euclid(tile) == 0 && self.y.rem_euclid(tile) == 0
    }

    /// The overlapping region of two rectangles, if any.
    pub fn intersection(&self, other: &Self) -> Option<Self> {
        if !overlaps(self, other) {
            return None;
        }
        let x = self.x.max(other.x);
        let y = self.y.max(other.y);
        let right = self.right().min(other.right());
        let bottom = self.bottom().min(other.bottom());
        Some(Self::new(x, y, right - x, bottom - y))
    }
}

impl fmt::Display for Rect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}@({},{})", self.w, self.h, self.x, self.y)
    }
}

/// True unless the rectangles are disjoint on at least one axis.
///
/// Touching edges and corners do not count as overlap.
#[inline]
pub fn overlaps(a: &Rect, b: &Rect) -> bool {
    !(a.right() <= b.x || b.right() <= a.x || a.bottom() <= b.y || b.bottom() <= a.y)
}

/// True if `candidate` overlaps any rectangle in `rects`.
pub fn has_overlap(candidate: &Rect, rects: &[Rect]) -> bool {
    rects.iter().any(|r| overlaps(candidate, r))
}

/// Number of grid cells covered by `r`.
///
/// Fails unless `w` and `h` are both positive multiples of `tile` and both
/// far edges are representable.
pub fn cell_count(r: &Rect, tile: i64) -> Result<u64, GeometryError> {
    if tile <= 0 {
        return Err(GeometryError::InvalidTile(tile));
    }
    if r.w <= 0 || r.h <= 0 {
        return Err(GeometryError::InvalidGeometry {
            rect: *r,
            reason: "width and height must be positive",
        });
    }
    if r.w % tile != 0 || r.h % tile != 0 {
        return Err(GeometryError::InvalidGeometry {
            rect: *r,
            reason: "width and height must be multiples of the tile size",
        });
    }
    if r.x.checked_add(r.w).is_none() || r.y.checked_add(r.h).is_none() {
        return Err(GeometryError::InvalidGeometry {
            rect: *r,
            reason: "rectangle extends past the canvas edge",
        });
    }
    let cols = (r.w / tile) as u64;
    let rows = (r.h / tile) as u64;
    cols.checked_mul(rows).ok_or(GeometryError::InvalidGeometry {
        rect: *r,
        reason: "cell count overflows",
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const T: i64 = 32;

    #[test]
    fn touching_edges_do_not_overlap() {
        let a = Rect::new(0, 0, 64, 64);
        let right = Rect::new(64, 0, 32, 32);
        let below = Rect::new(0, 64, 32, 32);
        let corner = Rect::new(64, 64, 32, 32);
        assert!(!overlaps(&a, &right));
        assert!(!overlaps(&a, &below));
        assert!(!overlaps(&a, &corner));
    }

    #[test]
    fn shared_area_overlaps() {
        let a = Rect::new(0, 0, 64, 64);
        let b = Rect::new(32, 32, 64, 64);
        assert!(overlaps(&a, &b));
        assert_eq!(a.intersection(&b), Some(Rect::new(32, 32, 32, 32)));
    }

    #[test]
    fn containment_overlaps() {
        let outer = Rect::new(-128, -128, 256, 256);
        let inner = Rect::new(0, 0, 32, 32);
        assert!(overlaps(&outer, &inner));
        assert!(overlaps(&inner, &outer));
    }

    #[test]
    fn disjoint_on_one_axis_is_enough() {
        // Same columns, different rows
        let a = Rect::new(0, 0, 64, 32);
        let b = Rect::new(0, 96, 64, 32);
        assert!(!overlaps(&a, &b));
        assert_eq!(a.intersection(&b), None);
    }

    #[test]
    fn has_overlap_scans_all() {
        let rects = [Rect::new(0, 0, 32, 32), Rect::new(100 * T, 0, 32, 32)];
        assert!(has_overlap(&Rect::new(100 * T, 0, 64, 64), &rects));
        assert!(!has_overlap(&Rect::new(T, 0, 32, 32), &rects));
        assert!(!has_overlap(&Rect::new(0, 0, 32, 32), &[]));
    }

    #[test]
    fn cell_count_valid() {
        assert_eq!(cell_count(&Rect::new(0, 0, 64, 96), T).unwrap(), 6);
        assert_eq!(cell_count(&Rect::new(-64, 5, 32, 32), T).unwrap(), 1);
    }

    #[test]
    fn cell_count_rejects_unsnapped() {
        let err = cell_count(&Rect::new(0, 0, 40, 32), T).unwrap_err();
        assert!(matches!(err, GeometryError::InvalidGeometry { .. }));
    }

    #[test]
    fn cell_count_rejects_empty() {
        assert!(cell_count(&Rect::new(0, 0, 0, 32), T).is_err());
        assert!(cell_count(&Rect::new(0, 0, 32, -32), T).is_err());
    }

    #[test]
    fn cell_count_rejects_bad_tile() {
        assert_eq!(
            cell_count(&Rect::new(0, 0, 32, 32), 0),
            Err(GeometryError::InvalidTile(0))
        );
    }

    #[test]
    fn cell_count_rejects_edge_overflow() {
        let at_edge = Rect::new(i64::MAX, 0, 32, 32);
        assert!(matches!(
            cell_count(&at_edge, T),
            Err(GeometryError::InvalidGeometry { .. })
        ));
        assert!(cell_count(&Rect::new(0, i64::MAX - 31, 32, 32), T).is_err());
        // Far edge exactly at the limit is still representable
        assert_eq!(cell_count(&Rect::new(i64::MAX - 32, 0, 32, 32), T).unwrap(), 1);
        assert_eq!(cell_count(&Rect::new(i64::MIN, i64::MIN, 32, 32), T).unwrap(), 1);
    }

    #[test]
    fn alignment_checks_origin() {
        assert!(Rect::new(-64, 96, 32, 32).is_aligned(T));
        assert!(!Rect::new(5, 0, 32, 32).is_aligned(T));
        assert!(!Rect::new(0, -7, 32, 32).is_aligned(T));
        assert!(!Rect::new(0, 0, 32, 32).is_aligned(0));
    }

    #[test]
    fn extreme_coordinates_do_not_panic() {
        let a = Rect::new(i64::MAX - 10, 0, 64, 64);
        let b = Rect::new(i64::MAX - 5, 0, 64, 64);
        assert!(overlaps(&a, &b));
    }

    fn rect_strategy() -> impl Strategy<Value = Rect> {
        (-50i64..50, -50i64..50, 1i64..8, 1i64..8)
            .prop_map(|(x, y, w, h)| Rect::new(x * T, y * T, w * T, h * T))
    }

    proptest! {
        #[test]
        fn overlap_is_symmetric(a in rect_strategy(), b in rect_strategy()) {
            prop_assert_eq!(overlaps(&a, &b), overlaps(&b, &a));
        }

        #[test]
        fn overlap_iff_positive_intersection(a in rect_strategy(), b in rect_strategy()) {
            match a.intersection(&b) {
                Some(i) => prop_assert!(i.area() > 0),
                None => prop_assert!(!overlaps(&a, &b)),
            }
        }

        #[test]
        fn every_valid_rect_overlaps_itself(a in rect_strategy()) {
            prop_assert!(overlaps(&a, &a));
        }

        #[test]
        fn cells_match_area(a in rect_strategy()) {
            let cells = cell_count(&a, T).unwrap() as u128;
            prop_assert_eq!(cells * (T as u128) * (T as u128), a.area());
        }
    }
}
