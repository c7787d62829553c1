//! Error types for canvas geometry.

use crate::rect::Rect;
use thiserror::Error;

/// Errors raised when a rectangle cannot be priced on the tile grid.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GeometryError {
    /// Tile size must be strictly positive
    #[error("tile size must be positive, got {0}")]
    InvalidTile(i64),

    /// Rectangle is not a whole number of tiles
    #[error("invalid geometry {rect}: {reason}")]
    InvalidGeometry {
        rect: Rect,
        reason: &'static str,
    },
}
