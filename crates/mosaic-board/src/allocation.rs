//! Allocation resolver - admits a non-overlapping subset of candidates.
//!
//! Greedy over candidates ranked by bid (descending), then submission
//! epoch, then id. A candidate wins only if its bid is strictly greater
//! than every accepted placement it overlaps, and it does not overlap a
//! winner already chosen in the same pass. Same-pass collisions go to
//! whichever claimant ranks first.

use crate::models::{Placement, Proposal, ProposalStatus, Wei};
use mosaic_geometry::overlaps;
use mosaic_referendum::{decide, FailReason, ReferendumRules, Verdict};
use std::collections::BTreeMap;
use std::fmt;

/// Why a candidate was not admitted.
#[derive(Debug, Clone, PartialEq)]
pub enum RejectReason {
    ReferendumFailed(FailReason),
    OutbidByIncumbent { incumbent: String, incumbent_bid: Wei },
    ContestedThisEpoch { winner: String },
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::ReferendumFailed(reason) => write!(f, "referendum failed: {}", reason),
            RejectReason::OutbidByIncumbent {
                incumbent,
                incumbent_bid,
            } => write!(
                f,
                "incumbent {} holds the area at {} wei per cell",
                incumbent, incumbent_bid
            ),
            RejectReason::ContestedThisEpoch { winner } => {
                write!(f, "area claimed this epoch by {}", winner)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Rejection {
    pub id: String,
    pub reason: RejectReason,
}

/// Outcome of one allocation pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Resolution {
    /// Admitted this pass, in rank order
    pub winners: Vec<Placement>,
    /// Incumbents displaced by a winner
    pub evicted: Vec<Placement>,
    pub rejected: Vec<Rejection>,
    /// `(accepted - evicted) ++ winners`
    pub new_accepted_set: Vec<Placement>,
}

impl Resolution {
    /// Status every considered candidate moves to.
    pub fn status_updates(&self) -> BTreeMap<String, ProposalStatus> {
        let mut out = BTreeMap::new();
        for w in &self.winners {
            out.insert(w.id.clone(), ProposalStatus::Accepted);
        }
        for r in &self.rejected {
            out.insert(r.id.clone(), ProposalStatus::Rejected);
        }
        out
    }

    pub fn winner_ids(&self) -> Vec<String> {
        self.winners.iter().map(|w| w.id.clone()).collect()
    }

    pub fn rejected_ids(&self) -> Vec<String> {
        self.rejected.iter().map(|r| r.id.clone()).collect()
    }

    pub fn evicted_ids(&self) -> Vec<String> {
        self.evicted.iter().map(|e| e.id.clone()).collect()
    }
}

/// Sort candidates into admission order.
pub fn rank_candidates(candidates: &mut [&Proposal]) {
    candidates.sort_by(|a, b| {
        b.bid_per_cell_wei
            .cmp(&a.bid_per_cell_wei)
            .then(a.epoch_submitted.cmp(&b.epoch_submitted))
            .then_with(|| a.id.cmp(&b.id))
    });
}

/// Run the referendum gate and the greedy allocation over `candidates`.
///
/// Pure: `accepted` is copied, never modified. The result does not depend
/// on the order of either input; both are taken in id order.
pub fn allocate(
    candidates: &[Proposal],
    accepted: &[Placement],
    rules: &ReferendumRules,
    force: bool,
) -> Resolution {
    let mut by_id: Vec<&Proposal> = candidates.iter().collect();
    by_id.sort_by(|a, b| a.id.cmp(&b.id));

    let mut rejected = Vec::new();
    let mut passing = Vec::with_capacity(by_id.len());

    for c in by_id {
        match decide(&c.tally(), rules, force) {
            Verdict::Passed => passing.push(c),
            Verdict::Failed(reason) => {
                tracing::debug!(id = %c.id, %reason, "Candidate failed referendum");
                rejected.push(Rejection {
                    id: c.id.clone(),
                    reason: RejectReason::ReferendumFailed(reason),
                });
            }
        }
    }

    rank_candidates(&mut passing);

    let mut working: Vec<Placement> = accepted.to_vec();
    working.sort_by(|a, b| a.id.cmp(&b.id));
    let mut winners: Vec<Placement> = Vec::new();
    let mut evicted: Vec<Placement> = Vec::new();

    for p in passing {
        let strongest = working
            .iter()
            .filter(|inc| overlaps(&inc.rect, &p.rect))
            .max_by_key(|inc| inc.bid_per_cell_wei);

        if let Some(inc) = strongest {
            if inc.bid_per_cell_wei >= p.bid_per_cell_wei {
                tracing::debug!(id = %p.id, incumbent = %inc.id, "Outbid by incumbent");
                rejected.push(Rejection {
                    id: p.id.clone(),
                    reason: RejectReason::OutbidByIncumbent {
                        incumbent: inc.id.clone(),
                        incumbent_bid: inc.bid_per_cell_wei,
                    },
                });
                continue;
            }
        }

        if let Some(w) = winners.iter().find(|w| overlaps(&w.rect, &p.rect)) {
            tracing::debug!(id = %p.id, winner = %w.id, "Contested this epoch");
            rejected.push(Rejection {
                id: p.id.clone(),
                reason: RejectReason::ContestedThisEpoch {
                    winner: w.id.clone(),
                },
            });
            continue;
        }

        let (displaced, kept): (Vec<Placement>, Vec<Placement>) = working
            .into_iter()
            .partition(|inc| overlaps(&inc.rect, &p.rect));
        working = kept;
        evicted.extend(displaced);

        tracing::debug!(id = %p.id, bid = %p.bid_per_cell_wei, "Candidate admitted");
        winners.push(p.placement());
    }

    let mut new_accepted_set = working;
    new_accepted_set.extend(winners.iter().cloned());

    Resolution {
        winners,
        evicted,
        rejected,
        new_accepted_set,
    }
}
