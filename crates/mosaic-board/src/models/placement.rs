//! Placement model - a live rectangle in the accepted set.

use super::{Mime, Wei};
use mosaic_geometry::Rect;
use serde::{Deserialize, Serialize};

/// The committed subset of an accepted proposal.
///
/// Field order is part of the manifest's canonical serialization; do not
/// reorder.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Placement {
    pub id: String,
    pub owner: String,
    pub cid: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub mime: Mime,
    pub rect: Rect,
    pub cells: u64,
    pub bid_per_cell_wei: Wei,
}

/// Find the first pair of overlapping placements, if any.
pub(crate) fn find_overlap(set: &[Placement]) -> Option<(&Placement, &Placement)> {
    for (i, a) in set.iter().enumerate() {
        for b in &set[i + 1..] {
            if mosaic_geometry::overlaps(&a.rect, &b.rect) {
                return Some((a, b));
            }
        }
    }
    None
}
