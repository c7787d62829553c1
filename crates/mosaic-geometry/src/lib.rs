//! Mosaic Canvas Geometry
//!
//! Axis-aligned rectangles on an unbounded virtual canvas, snapped to a
//! fixed tile grid.
//!
//! # Grid Model
//!
//! The canvas is measured in pixels but priced in **cells**. A cell is one
//! `tile × tile` square; every placement rectangle has a width and height
//! that are positive multiples of the tile size, so its area is always a
//! whole number of cells:
//!
//! ```text
//! cells = (w / tile) × (h / tile)
//! ```
//!
//! # Overlap
//!
//! Rectangles are half-open on both axes. Two rectangles that only share an
//! edge or a corner do not overlap, so neighbouring placements can tile the
//! canvas without gaps.
//!
//! Everything here is a pure function: no state, no allocation on the hot
//! path, deterministic for every valid input.

mod error;
mod rect;
mod snap;

pub use error::GeometryError;
pub use rect::{cell_count, has_overlap, overlaps, Rect};
pub use snap::{snap_coord, snap_len, snap_rect};

/// Default tile edge length in pixels.
pub const TILE: i64 = 32;
