//! Data models for the board.
//!
//! # Core Types
//!
//! - [`Proposal`] - A candidate placement with its vote tally and status
//! - [`Placement`] - The committed subset of an accepted proposal
//! - [`Manifest`] - Immutable snapshot of the accepted set for one epoch
//!
//! # Supporting Types
//!
//! - [`Wei`] - Per-cell bid amount, decimal-string on the wire
//! - [`ManifestHash`] - BLAKE3 commitment over a manifest's canonical bytes
//! - [`ContentId`] - Opaque identifier of a durably stored manifest
//! - [`Receipt`] - Confirmation returned by the external ledger

mod manifest;
mod placement;
mod proposal;
mod wei;

pub use manifest::{ContentId, Manifest, ManifestHash, ManifestRecord, Receipt};
pub use placement::Placement;
pub(crate) use placement::find_overlap;
pub use proposal::{ledger_key, Mime, Proposal, ProposalDraft, ProposalStatus};
pub use wei::Wei;
