//! Proposal ledger - the single owner of proposals and the accepted set.
//!
//! All mutations go through [`ProposalLedger`], which serializes writers
//! with a short lock and delegates persistence to a [`LedgerStore`].
//! Votes are single-proposal read-modify-writes and interleave freely with
//! an epoch close; the close only touches the statuses of proposals it
//! snapshotted.

use crate::error::{Error, Result};
use crate::models::{
    ManifestRecord, Mime, Placement, Proposal, ProposalDraft, ProposalStatus, Wei,
};
use crate::storage::{EpochCommit, LedgerStore};
use ed25519_dalek::SigningKey;
use mosaic_geometry::{cell_count, overlaps, Rect};
use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

const OPERATOR_KEY_META: &str = "operator_signing_key";

/// Submission and retention rules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerPolicy {
    pub vote_window_epochs: u64,
    pub max_cells_per_rect: u64,
    pub tile: i64,
    pub base_fee_per_cell_wei: Wei,
    /// Refuse submissions that cannot outbid the placements they overlap
    pub precheck_displacement: bool,
    pub gc_retention_epochs: u64,
}

impl Default for LedgerPolicy {
    fn default() -> Self {
        Self {
            vote_window_epochs: 2,
            max_cells_per_rect: 400,
            tile: mosaic_geometry::TILE,
            base_fee_per_cell_wei: Wei::ZERO,
            precheck_displacement: true,
            gc_retention_epochs: 24,
        }
    }
}

/// Result of a vote.
#[derive(Debug, Clone)]
pub struct VoteOutcome {
    pub proposal: Proposal,
    /// The voter had already cast this exact vote
    pub unchanged: bool,
}

/// What a GC pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct GcReport {
    /// Stale proposals moved to `expired`
    pub expired: Vec<String>,
    /// Terminal proposals removed
    pub dropped: Vec<String>,
}

/// The local half of an epoch close, computed by the resolver.
#[derive(Debug, Clone)]
pub struct CommitPlan {
    pub accepted: Vec<Placement>,
    /// Status each snapshotted candidate moves to
    pub statuses: BTreeMap<String, ProposalStatus>,
    pub record: ManifestRecord,
}

/// Proposal ledger over a pluggable store.
pub struct ProposalLedger {
    store: Arc<dyn LedgerStore>,
    policy: LedgerPolicy,
    write_lock: Mutex<()>,
}

impl ProposalLedger {
    pub fn new(store: Arc<dyn LedgerStore>, policy: LedgerPolicy) -> Self {
        Self {
            store,
            policy,
            write_lock: Mutex::new(()),
        }
    }

    pub fn policy(&self) -> &LedgerPolicy {
        &self.policy
    }

    fn lock(&self) -> MutexGuard<'_, ()> {
        self.write_lock.lock().unwrap_or_else(|e| e.into_inner())
    }

    // --- Proposals ---

    /// Validate and record a new proposal.
    pub fn submit(&self, draft: ProposalDraft, epoch: u64, now_ms: u64) -> Result<Proposal> {
        let owner = draft.owner.trim().to_string();
        let cid = draft.cid.trim().to_string();
        if owner.is_empty() {
            return Err(Error::Validation("owner is required".into()));
        }
        if cid.is_empty() {
            return Err(Error::Validation("cid is required".into()));
        }

        if !draft.rect.is_aligned(self.policy.tile) {
            return Err(Error::Validation(format!(
                "rect origin ({}, {}) is not on the {}px grid",
                draft.rect.x, draft.rect.y, self.policy.tile
            )));
        }
        let cells = cell_count(&draft.rect, self.policy.tile)?;
        if cells == 0 || cells > self.policy.max_cells_per_rect {
            return Err(Error::Validation(format!(
                "rect covers {} cells; allowed 1..={}",
                cells, self.policy.max_cells_per_rect
            )));
        }
        if let Some(claimed) = draft.cells {
            if claimed != cells {
                return Err(Error::Validation(format!(
                    "cells mismatch: rect covers {} cells, got {}",
                    cells, claimed
                )));
            }
        }

        let mime = match draft.mime.as_deref() {
            Some(m) => m.parse::<Mime>()?,
            None => Mime::default(),
        };

        let bid = draft.bid_per_cell_wei;
        if bid > Wei::LEDGER_MAX {
            return Err(Error::Validation(format!(
                "bidPerCellWei {} exceeds the ledger maximum {}",
                bid,
                Wei::LEDGER_MAX
            )));
        }
        if bid < self.policy.base_fee_per_cell_wei {
            return Err(Error::Validation(format!(
                "bidPerCellWei {} is below the base fee {}",
                bid, self.policy.base_fee_per_cell_wei
            )));
        }

        let _guard = self.lock();

        let id = match draft.id.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            Some(id) => {
                if self.store.get_proposal(id)?.is_some() {
                    return Err(Error::Conflict(format!("proposal {} already exists", id)));
                }
                id.to_string()
            }
            None => self.fresh_id(&owner, &cid, &draft.rect, bid, now_ms)?,
        };

        if self.policy.precheck_displacement {
            if let Some(floor) = self.displacement_floor(&draft.rect)? {
                if bid <= floor {
                    return Err(Error::BidTooLow {
                        require_greater_than: floor,
                    });
                }
            }
        }

        let proposal = Proposal {
            id,
            owner,
            cid,
            name: draft.name.unwrap_or_default(),
            mime,
            rect: draft.rect,
            cells,
            bid_per_cell_wei: bid,
            epoch_submitted: epoch,
            vote_ends_at_epoch: epoch.saturating_add(self.policy.vote_window_epochs.max(1)),
            voters: BTreeMap::new(),
            yes: 0,
            no: 0,
            status: ProposalStatus::Proposed,
            created_at_ms: now_ms,
        };
        self.store.put_proposal(&proposal)?;

        tracing::info!(
            id = %proposal.id,
            rect = %proposal.rect,
            cells,
            bid = %bid,
            vote_ends = proposal.vote_ends_at_epoch,
            "Proposal submitted"
        );
        Ok(proposal)
    }

    fn fresh_id(&self, owner: &str, cid: &str, rect: &Rect, bid: Wei, now_ms: u64) -> Result<String> {
        let mut nonce: u64 = 0;
        loop {
            let content = format!("{}|{}|{}|{}|{}|{}", owner, cid, rect, bid, now_ms, nonce);
            let id = Proposal::generate_id(content.as_bytes());
            if self.store.get_proposal(&id)?.is_none() {
                return Ok(id);
            }
            nonce += 1;
        }
    }

    /// Cast or change a vote.
    ///
    /// Re-casting an identical vote succeeds with `unchanged` set even after
    /// voting has closed.
    pub fn vote(&self, id: &str, voter: &str, yes: bool, epoch: u64) -> Result<VoteOutcome> {
        let voter = voter.trim().to_lowercase();
        if voter.is_empty() {
            return Err(Error::Validation("voter is required".into()));
        }

        let _guard = self.lock();
        let mut proposal = self
            .store
            .get_proposal(id)?
            .ok_or_else(|| Error::NotFound(format!("proposal {}", id)))?;

        if proposal.vote_of(&voter) == Some(yes) {
            return Ok(VoteOutcome {
                proposal,
                unchanged: true,
            });
        }

        if proposal.status != ProposalStatus::Proposed {
            return Err(Error::VotingClosed(format!(
                "proposal {} is {}",
                id, proposal.status
            )));
        }
        if epoch > proposal.vote_ends_at_epoch {
            return Err(Error::VotingClosed(format!(
                "voting for {} ended at epoch {}",
                id, proposal.vote_ends_at_epoch
            )));
        }

        proposal.record_vote(voter, yes);
        self.store.put_proposal(&proposal)?;
        tracing::debug!(id, yes = proposal.yes, no = proposal.no, "Vote recorded");

        Ok(VoteOutcome {
            proposal,
            unchanged: false,
        })
    }

    pub fn get(&self, id: &str) -> Result<Option<Proposal>> {
        self.store.get_proposal(id)
    }

    /// All tracked proposals, ordered by id.
    pub fn list(&self) -> Result<Vec<Proposal>> {
        self.store.list_proposals()
    }

    /// Proposals whose voting window has closed by `epoch` (or every open
    /// proposal when forced), sorted by id.
    pub fn list_candidates(&self, epoch: u64, force: bool) -> Result<Vec<Proposal>> {
        let mut candidates: Vec<Proposal> = self
            .store
            .list_proposals()?
            .into_iter()
            .filter(|p| p.status == ProposalStatus::Proposed)
            .filter(|p| force || p.vote_ends_at_epoch <= epoch)
            .collect();
        candidates.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(candidates)
    }

    /// Proposals still collecting votes, highest bid first then oldest.
    pub fn pending(&self, epoch: u64) -> Result<Vec<Proposal>> {
        let mut pending: Vec<Proposal> = self
            .store
            .list_proposals()?
            .into_iter()
            .filter(|p| p.voting_open(epoch))
            .collect();
        pending.sort_by(|a, b| {
            b.bid_per_cell_wei
                .cmp(&a.bid_per_cell_wei)
                .then(a.created_at_ms.cmp(&b.created_at_ms))
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(pending)
    }

    /// Expire and drop proposals whose window ended long ago.
    pub fn gc(&self, epoch: u64) -> Result<GcReport> {
        let _guard = self.lock();
        let retention = self.policy.gc_retention_epochs;
        let mut report = GcReport::default();

        for mut p in self.store.list_proposals()? {
            if p.vote_ends_at_epoch.saturating_add(retention) >= epoch {
                continue;
            }
            if p.status.is_terminal() {
                self.store.delete_proposal(&p.id)?;
                report.dropped.push(p.id);
            } else {
                p.transition(ProposalStatus::Expired)?;
                self.store.put_proposal(&p)?;
                report.expired.push(p.id);
            }
        }

        if !report.expired.is_empty() || !report.dropped.is_empty() {
            tracing::info!(
                epoch,
                expired = report.expired.len(),
                dropped = report.dropped.len(),
                "Ledger GC"
            );
        }
        Ok(report)
    }

    // --- Accepted set ---

    pub fn accepted_set(&self) -> Result<Vec<Placement>> {
        self.store.accepted_set()
    }

    /// Replace the live set outside an epoch close (genesis, repair).
    pub fn replace_accepted_set(&self, set: Vec<Placement>) -> Result<()> {
        let _guard = self.lock();
        self.store.replace_accepted_set(&set)
    }

    /// Highest bid among accepted placements overlapping `rect`.
    pub fn displacement_floor(&self, rect: &Rect) -> Result<Option<Wei>> {
        Ok(self
            .store
            .accepted_set()?
            .iter()
            .filter(|p| overlaps(&p.rect, rect))
            .map(|p| p.bid_per_cell_wei)
            .max())
    }

    // --- Epoch close ---

    /// Apply a resolved epoch atomically.
    ///
    /// Statuses are applied to the proposals as they are now, so votes cast
    /// after the candidate snapshot are kept.
    pub fn commit_epoch(&self, plan: CommitPlan) -> Result<()> {
        let _guard = self.lock();

        let mut proposals = Vec::with_capacity(plan.statuses.len());
        for (id, status) in &plan.statuses {
            let mut current = self
                .store
                .get_proposal(id)?
                .ok_or_else(|| Error::Invariant(format!("candidate {} vanished before commit", id)))?;
            current.transition(*status)?;
            proposals.push(current);
        }

        let commit = EpochCommit {
            accepted: plan.accepted,
            proposals,
            record: plan.record,
        };
        self.store.commit_epoch(&commit)
    }

    pub fn manifest(&self, epoch: u64) -> Result<Option<ManifestRecord>> {
        self.store.get_manifest(epoch)
    }

    pub fn latest_manifest(&self) -> Result<Option<ManifestRecord>> {
        self.store.latest_manifest()
    }

    /// Seed the board from a genesis manifest if nothing was finalized yet.
    ///
    /// Returns false when a manifest already exists.
    pub fn seed_genesis(&self, record: ManifestRecord) -> Result<bool> {
        let _guard = self.lock();
        if self.store.latest_manifest()?.is_some() {
            return Ok(false);
        }
        for p in &record.manifest.placements {
            if !p.rect.is_aligned(self.policy.tile) {
                return Err(Error::Validation(format!(
                    "genesis placement {} is off the grid",
                    p.id
                )));
            }
            cell_count(&p.rect, self.policy.tile)?;
        }
        let ids: HashSet<&str> = record.manifest.placement_ids().collect();
        if ids.len() != record.manifest.placements.len() {
            return Err(Error::Validation("genesis manifest repeats a placement id".into()));
        }
        let commit = EpochCommit {
            accepted: record.manifest.placements.clone(),
            proposals: Vec::new(),
            record,
        };
        self.store.commit_epoch(&commit)?;
        tracing::info!(
            placements = commit.accepted.len(),
            epoch = commit.record.epoch(),
            "Seeded genesis manifest"
        );
        Ok(true)
    }

    // --- Operator identity ---

    /// Get or create the operator's signing key (persistent identity).
    pub fn operator_key(&self) -> Result<SigningKey> {
        let _guard = self.lock();
        if let Some(data) = self.store.get_meta(OPERATOR_KEY_META)? {
            let bytes: [u8; 32] = data
                .as_slice()
                .try_into()
                .map_err(|_| Error::Storage("invalid stored operator key".into()))?;
            return Ok(SigningKey::from_bytes(&bytes));
        }
        let key = SigningKey::from_bytes(&rand::random::<[u8; 32]>());
        self.store.put_meta(OPERATOR_KEY_META, key.as_bytes())?;
        Ok(key)
    }
}
