//! Proposal model - a bid for a rectangle on the canvas.

use super::{Placement, Wei};
use crate::error::{Error, Result};
use mosaic_geometry::Rect;
use mosaic_referendum::Tally;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Lifecycle status of a proposal.
///
/// Every transition leaves `Proposed`; nothing ever re-enters it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProposalStatus {
    Proposed,
    Accepted,
    Rejected,
    Expired,
}

impl ProposalStatus {
    pub const fn is_terminal(&self) -> bool {
        !matches!(self, ProposalStatus::Proposed)
    }

    pub const fn can_transition_to(&self, next: ProposalStatus) -> bool {
        matches!(self, ProposalStatus::Proposed) && !matches!(next, ProposalStatus::Proposed)
    }
}

impl fmt::Display for ProposalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ProposalStatus::Proposed => "proposed",
            ProposalStatus::Accepted => "accepted",
            ProposalStatus::Rejected => "rejected",
            ProposalStatus::Expired => "expired",
        };
        f.write_str(s)
    }
}

/// Content type of the asset behind a placement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Mime {
    #[default]
    #[serde(rename = "image/png")]
    Png,
    #[serde(rename = "image/jpeg")]
    Jpeg,
}

impl FromStr for Mime {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "image/png" => Ok(Mime::Png),
            "image/jpeg" | "image/jpg" => Ok(Mime::Jpeg),
            other => Err(Error::Validation(format!(
                "unsupported content type {:?} (expected image/png or image/jpeg)",
                other
            ))),
        }
    }
}

/// Client-supplied fields of a new proposal.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProposalDraft {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub owner: String,
    #[serde(default)]
    pub cid: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub mime: Option<String>,
    pub rect: Rect,
    /// Optional; must match the geometry when given
    #[serde(default)]
    pub cells: Option<u64>,
    pub bid_per_cell_wei: Wei,
}

/// A placement proposal tracked by the ledger.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Proposal {
    /// Unique identifier, immutable once created
    pub id: String,

    /// Submitting principal
    pub owner: String,

    /// Content identifier of the off-chain asset (never dereferenced)
    pub cid: String,

    /// Display name
    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub mime: Mime,

    /// Target rectangle, tile-snapped
    pub rect: Rect,

    /// Cell count derived from `rect`
    pub cells: u64,

    /// Price offered per cell
    pub bid_per_cell_wei: Wei,

    pub epoch_submitted: u64,

    /// Last epoch in which votes are accepted
    pub vote_ends_at_epoch: u64,

    /// Voter -> yes/no, last write wins
    #[serde(default)]
    pub voters: BTreeMap<String, bool>,

    pub yes: u64,
    pub no: u64,

    pub status: ProposalStatus,

    /// Wall-clock submission time (unix ms)
    pub created_at_ms: u64,
}

impl Proposal {
    /// Current yes/no tally.
    pub fn tally(&self) -> Tally {
        Tally::new(self.yes, self.no)
    }

    /// The vote previously cast by `voter`, if any.
    pub fn vote_of(&self, voter: &str) -> Option<bool> {
        self.voters.get(voter).copied()
    }

    /// Record a vote and recount. Returns false if it changed nothing.
    pub fn record_vote(&mut self, voter: String, yes: bool) -> bool {
        if self.voters.get(&voter) == Some(&yes) {
            return false;
        }
        self.voters.insert(voter, yes);
        self.recount();
        true
    }

    /// Recompute `yes`/`no` from the voter map.
    pub fn recount(&mut self) {
        self.yes = self.voters.values().filter(|v| **v).count() as u64;
        self.no = self.voters.len() as u64 - self.yes;
    }

    /// Move to a terminal status.
    pub fn transition(&mut self, next: ProposalStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(Error::InvalidTransition(format!(
                "proposal {} cannot move from {} to {}",
                self.id, self.status, next
            )));
        }
        self.status = next;
        Ok(())
    }

    /// Whether votes are still accepted at `epoch`.
    pub fn voting_open(&self, epoch: u64) -> bool {
        self.status == ProposalStatus::Proposed && epoch <= self.vote_ends_at_epoch
    }

    /// The committed subset of this proposal.
    pub fn placement(&self) -> Placement {
        Placement {
            id: self.id.clone(),
            owner: self.owner.clone(),
            cid: self.cid.clone(),
            name: self.name.clone(),
            mime: self.mime,
            rect: self.rect,
            cells: self.cells,
            bid_per_cell_wei: self.bid_per_cell_wei,
        }
    }

    /// 32-byte key used for this proposal on the external ledger.
    pub fn ledger_key(&self) -> [u8; 32] {
        ledger_key(&self.id)
    }

    /// Generate an ID from the proposal's identifying content.
    pub fn generate_id(content: &[u8]) -> String {
        let hash = blake3::hash(content);
        format!("0x{}", hex::encode(hash.as_bytes()))
    }
}

/// Map a proposal id onto the ledger's `bytes32` id space.
///
/// Ids that already are `0x` + 64 hex chars map to their bytes; anything
/// else is hashed.
pub fn ledger_key(id: &str) -> [u8; 32] {
    if let Some(hex_part) = id.strip_prefix("0x") {
        if hex_part.len() == 64 {
            let mut out = [0u8; 32];
            if hex::decode_to_slice(hex_part, &mut out).is_ok() {
                return out;
            }
        }
    }
    *blake3::hash(id.as_bytes()).as_bytes()
}
