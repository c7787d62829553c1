//! Snapping arbitrary pixel values onto the tile grid.
//!
//! Positions floor to the grid line at or below them. Lengths floor to the
//! nearest lower multiple of the tile, but never below one tile, so a
//! snapped rectangle always covers at least one cell.

use crate::rect::Rect;

/// Floor a coordinate to the grid line at or below it.
///
/// Uses Euclidean division, so `-1` snaps to `-tile`, not `0`. A
/// non-positive `tile` leaves `n` unchanged.
#[inline]
pub fn snap_coord(n: i64, tile: i64) -> i64 {
    if tile <= 0 {
        return n;
    }
    n.div_euclid(tile).saturating_mul(tile)
}

/// Floor a length to the nearest lower multiple of `tile`, minimum one tile.
///
/// A non-positive `tile` leaves `n` unchanged.
#[inline]
pub fn snap_len(n: i64, tile: i64) -> i64 {
    if tile <= 0 {
        return n;
    }
    (n.div_euclid(tile) * tile).max(tile)
}

/// Snap every field of a rectangle onto the grid.
pub fn snap_rect(r: &Rect, tile: i64) -> Rect {
    Rect {
        x: snap_coord(r.x, tile),
        y: snap_coord(r.y, tile),
        w: snap_len(r.w, tile),
        h: snap_len(r.h, tile),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rect::cell_count;

    #[test]
    fn len_floors_to_lower_multiple() {
        assert_eq!(snap_len(32, 32), 32);
        assert_eq!(snap_len(63, 32), 32);
        assert_eq!(snap_len(64, 32), 64);
        assert_eq!(snap_len(100, 32), 96);
    }

    #[test]
    fn len_minimum_one_tile() {
        assert_eq!(snap_len(0, 32), 32);
        assert_eq!(snap_len(5, 32), 32);
        assert_eq!(snap_len(-70, 32), 32);
    }

    #[test]
    fn coord_floors_toward_negative_infinity() {
        assert_eq!(snap_coord(0, 32), 0);
        assert_eq!(snap_coord(31, 32), 0);
        assert_eq!(snap_coord(-1, 32), -32);
        assert_eq!(snap_coord(-32, 32), -32);
        assert_eq!(snap_coord(-33, 32), -64);
    }

    #[test]
    fn bad_tile_is_a_no_op() {
        assert_eq!(snap_coord(17, 0), 17);
        assert_eq!(snap_len(17, -32), 17);
        let r = Rect::new(5, 7, 9, 11);
        assert_eq!(snap_rect(&r, 0), r);
    }

    #[test]
    fn snapped_rect_is_idempotent() {
        let r = snap_rect(&Rect::new(17, -3, 250, 31), 32);
        assert_eq!(r, Rect::new(0, -32, 224, 32));
        assert_eq!(snap_rect(&r, 32), r);
        assert_eq!(cell_count(&r, 32).unwrap(), 7);
    }
}
