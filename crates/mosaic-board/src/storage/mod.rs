//! Ledger persistence.
//!
//! The [`LedgerStore`] trait is the only way the ledger touches state.
//! Two backends:
//!
//! - [`MemoryStore`] - process-local, for tests and ephemeral nodes
//! - [`RocksStore`] - RocksDB, durable; epoch commits are one `WriteBatch`

mod memory;
mod rocks;

pub use memory::MemoryStore;
pub use rocks::RocksStore;

use crate::error::{Error, Result};
use crate::models::{find_overlap, ManifestRecord, Placement, Proposal};

/// Everything an epoch close changes, applied all-or-nothing.
#[derive(Debug, Clone)]
pub struct EpochCommit {
    /// The new accepted set, replacing the old one wholesale
    pub accepted: Vec<Placement>,
    /// Proposals whose status changed, already transitioned
    pub proposals: Vec<Proposal>,
    /// Manifest record appended for the epoch
    pub record: ManifestRecord,
}

/// Storage backend for the proposal ledger.
pub trait LedgerStore: Send + Sync {
    // --- Proposals ---

    fn put_proposal(&self, proposal: &Proposal) -> Result<()>;

    fn get_proposal(&self, id: &str) -> Result<Option<Proposal>>;

    fn delete_proposal(&self, id: &str) -> Result<()>;

    /// All proposals, ordered by id.
    fn list_proposals(&self) -> Result<Vec<Proposal>>;

    // --- Accepted set ---

    fn accepted_set(&self) -> Result<Vec<Placement>>;

    /// Replace the accepted set. Fails with `Invariant` on overlap.
    fn replace_accepted_set(&self, set: &[Placement]) -> Result<()>;

    // --- Manifests ---

    fn get_manifest(&self, epoch: u64) -> Result<Option<ManifestRecord>>;

    fn latest_manifest(&self) -> Result<Option<ManifestRecord>>;

    /// Atomically apply an epoch close.
    ///
    /// Fails with `AlreadyFinalized` if a manifest exists for the epoch and
    /// with `Invariant` if the new accepted set overlaps; neither failure
    /// writes anything.
    fn commit_epoch(&self, commit: &EpochCommit) -> Result<()>;

    // --- Node metadata ---

    fn get_meta(&self, key: &str) -> Result<Option<Vec<u8>>>;

    fn put_meta(&self, key: &str, value: &[u8]) -> Result<()>;
}

/// Reject a set containing overlapping placements.
///
/// Overlap is only meaningful when both far edges are representable, so a
/// placement past the canvas edge is refused outright.
pub(crate) fn ensure_disjoint(set: &[Placement]) -> Result<()> {
    if let Some(p) = set
        .iter()
        .find(|p| p.rect.x.checked_add(p.rect.w).is_none() || p.rect.y.checked_add(p.rect.h).is_none())
    {
        return Err(Error::Invariant(format!(
            "placement {} at {} extends past the canvas edge",
            p.id, p.rect
        )));
    }
    match find_overlap(set) {
        Some((a, b)) => Err(Error::Invariant(format!(
            "accepted set would overlap: {} at {} and {} at {}",
            a.id, a.rect, b.id, b.rect
        ))),
        None => Ok(()),
    }
}

/// Backend-agnostic checks run before an epoch commit is written.
pub(crate) fn check_commit(
    commit: &EpochCommit,
    existing: Option<&ManifestRecord>,
    latest: Option<&ManifestRecord>,
) -> Result<()> {
    let epoch = commit.record.epoch();
    if existing.is_some() {
        return Err(Error::AlreadyFinalized(epoch));
    }
    if let Some(latest) = latest {
        if latest.epoch() > epoch {
            return Err(Error::Invariant(format!(
                "epoch {} is older than latest manifest {}",
                epoch,
                latest.epoch()
            )));
        }
    }
    ensure_disjoint(&commit.accepted)
}

#[cfg(test)]
pub(crate) mod tests {
    //! Contract tests shared by both backends.

    use super::*;
    use crate::models::{ContentId, Manifest, ManifestHash, Mime, ProposalStatus, Wei};
    use mosaic_geometry::Rect;
    use std::collections::BTreeMap;

    pub(crate) fn proposal(id: &str, rect: Rect) -> Proposal {
        Proposal {
            id: id.into(),
            owner: "owner".into(),
            cid: "cid".into(),
            name: String::new(),
            mime: Mime::Png,
            rect,
            cells: 1,
            bid_per_cell_wei: Wei(10),
            epoch_submitted: 0,
            vote_ends_at_epoch: 2,
            voters: BTreeMap::new(),
            yes: 0,
            no: 0,
            status: ProposalStatus::Proposed,
            created_at_ms: 0,
        }
    }

    fn record(epoch: u64, placements: Vec<Placement>) -> ManifestRecord {
        let manifest = Manifest {
            epoch,
            finalized_at: 0,
            placements,
        };
        let hash = ManifestHash::of(&manifest.canonical_bytes().unwrap());
        ManifestRecord {
            manifest,
            content_id: ContentId(format!("test-{}", epoch)),
            hash,
            receipt: None,
        }
    }

    pub(crate) fn proposals_round_trip(store: &dyn LedgerStore) {
        let a = proposal("b", Rect::new(0, 0, 32, 32));
        let b = proposal("a", Rect::new(32, 0, 32, 32));
        store.put_proposal(&a).unwrap();
        store.put_proposal(&b).unwrap();

        assert_eq!(store.get_proposal("b").unwrap(), Some(a));
        let ids: Vec<_> = store
            .list_proposals()
            .unwrap()
            .into_iter()
            .map(|p| p.id)
            .collect();
        assert_eq!(ids, vec!["a", "b"]);

        store.delete_proposal("a").unwrap();
        assert!(store.get_proposal("a").unwrap().is_none());
    }

    pub(crate) fn accepted_set_rejects_overlap(store: &dyn LedgerStore) {
        let ok = vec![
            proposal("a", Rect::new(0, 0, 32, 32)).placement(),
            proposal("b", Rect::new(32, 0, 32, 32)).placement(),
        ];
        store.replace_accepted_set(&ok).unwrap();

        let bad = vec![
            proposal("a", Rect::new(0, 0, 64, 64)).placement(),
            proposal("c", Rect::new(32, 32, 32, 32)).placement(),
        ];
        assert!(matches!(
            store.replace_accepted_set(&bad),
            Err(Error::Invariant(_))
        ));

        // Saturated edges would make these look disjoint
        let edge = Rect::new(i64::MAX - 31, 0, 32, 32);
        let twins = vec![
            proposal("x", edge).placement(),
            proposal("y", edge).placement(),
        ];
        assert!(matches!(
            store.replace_accepted_set(&twins),
            Err(Error::Invariant(_))
        ));
        assert_eq!(store.accepted_set().unwrap(), ok);
    }

    pub(crate) fn commit_is_atomic_and_append_only(store: &dyn LedgerStore) {
        let mut p = proposal("a", Rect::new(0, 0, 32, 32));
        store.put_proposal(&p).unwrap();
        p.transition(ProposalStatus::Accepted).unwrap();

        let commit = EpochCommit {
            accepted: vec![p.placement()],
            proposals: vec![p.clone()],
            record: record(3, vec![p.placement()]),
        };
        store.commit_epoch(&commit).unwrap();

        assert_eq!(store.accepted_set().unwrap(), vec![p.placement()]);
        assert_eq!(
            store.get_proposal("a").unwrap().unwrap().status,
            ProposalStatus::Accepted
        );
        assert_eq!(store.latest_manifest().unwrap().unwrap().epoch(), 3);
        assert!(store.get_manifest(3).unwrap().is_some());

        // Same epoch again is refused and writes nothing
        let again = EpochCommit {
            accepted: vec![],
            proposals: vec![],
            record: record(3, vec![]),
        };
        assert!(matches!(
            store.commit_epoch(&again),
            Err(Error::AlreadyFinalized(3))
        ));
        assert_eq!(store.accepted_set().unwrap().len(), 1);

        // Older epoch is refused
        let older = EpochCommit {
            accepted: vec![],
            proposals: vec![],
            record: record(2, vec![]),
        };
        assert!(store.commit_epoch(&older).is_err());

        // Overlapping set is refused without touching proposals
        let q = proposal("q", Rect::new(0, 0, 64, 64));
        let overlapping = EpochCommit {
            accepted: vec![p.placement(), q.placement()],
            proposals: vec![q.clone()],
            record: record(4, vec![]),
        };
        assert!(matches!(
            store.commit_epoch(&overlapping),
            Err(Error::Invariant(_))
        ));
        assert!(store.get_proposal("q").unwrap().is_none());
        assert!(store.get_manifest(4).unwrap().is_none());
        assert_eq!(store.latest_manifest().unwrap().unwrap().epoch(), 3);
    }

    pub(crate) fn meta_round_trip(store: &dyn LedgerStore) {
        assert!(store.get_meta("operator_key").unwrap().is_none());
        store.put_meta("operator_key", &[7u8; 32]).unwrap();
        assert_eq!(store.get_meta("operator_key").unwrap(), Some(vec![7u8; 32]));
    }
}
