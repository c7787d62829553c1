//! In-memory ledger store for tests and ephemeral nodes.

use super::{check_commit, ensure_disjoint, EpochCommit, LedgerStore};
use crate::error::Result;
use crate::models::{ManifestRecord, Placement, Proposal};
use std::collections::BTreeMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

#[derive(Debug, Default)]
struct Inner {
    proposals: BTreeMap<String, Proposal>,
    accepted: Vec<Placement>,
    manifests: BTreeMap<u64, ManifestRecord>,
    meta: BTreeMap<String, Vec<u8>>,
}

/// Thread-safe in-memory store.
///
/// All state sits behind one lock so an epoch commit is observed whole.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    // A panic while holding the lock leaves the maps consistent (every
    // mutation is a single insert or a pre-validated batch), so poisoning
    // is ignored.
    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }
}

impl LedgerStore for MemoryStore {
    fn put_proposal(&self, proposal: &Proposal) -> Result<()> {
        self.write()
            .proposals
            .insert(proposal.id.clone(), proposal.clone());
        Ok(())
    }

    fn get_proposal(&self, id: &str) -> Result<Option<Proposal>> {
        Ok(self.read().proposals.get(id).cloned())
    }

    fn delete_proposal(&self, id: &str) -> Result<()> {
        self.write().proposals.remove(id);
        Ok(())
    }

    fn list_proposals(&self) -> Result<Vec<Proposal>> {
        Ok(self.read().proposals.values().cloned().collect())
    }

    fn accepted_set(&self) -> Result<Vec<Placement>> {
        Ok(self.read().accepted.clone())
    }

    fn replace_accepted_set(&self, set: &[Placement]) -> Result<()> {
        ensure_disjoint(set)?;
        self.write().accepted = set.to_vec();
        Ok(())
    }

    fn get_manifest(&self, epoch: u64) -> Result<Option<ManifestRecord>> {
        Ok(self.read().manifests.get(&epoch).cloned())
    }

    fn latest_manifest(&self) -> Result<Option<ManifestRecord>> {
        Ok(self.read().manifests.values().next_back().cloned())
    }

    fn commit_epoch(&self, commit: &EpochCommit) -> Result<()> {
        let mut inner = self.write();
        let epoch = commit.record.epoch();
        check_commit(
            commit,
            inner.manifests.get(&epoch),
            inner.manifests.values().next_back(),
        )?;

        inner.accepted = commit.accepted.clone();
        for p in &commit.proposals {
            inner.proposals.insert(p.id.clone(), p.clone());
        }
        inner.manifests.insert(epoch, commit.record.clone());
        Ok(())
    }

    fn get_meta(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.read().meta.get(key).cloned())
    }

    fn put_meta(&self, key: &str, value: &[u8]) -> Result<()> {
        self.write().meta.insert(key.to_string(), value.to_vec());
        Ok(())
    }
}
