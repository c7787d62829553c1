//! Durable ledger store using RocksDB.

use super::{check_commit, ensure_disjoint, EpochCommit, LedgerStore};
use crate::error::{Error, Result};
use crate::models::{ManifestRecord, Placement, Proposal};
use rocksdb::{Options, WriteBatch, DB};
use std::path::Path;
use std::sync::Mutex;

const PROPOSAL_PREFIX: &str = "proposal:";
const ACCEPTED_KEY: &[u8] = b"accepted:set";
const MANIFEST_PREFIX: &str = "manifest:";
const LATEST_KEY: &[u8] = b"manifest-latest";
const META_PREFIX: &str = "meta:";

fn proposal_key(id: &str) -> String {
    format!("{}{}", PROPOSAL_PREFIX, id)
}

// Zero-padded so lexicographic order matches numeric order.
fn manifest_key(epoch: u64) -> String {
    format!("{}{:020}", MANIFEST_PREFIX, epoch)
}

/// RocksDB-backed store.
pub struct RocksStore {
    db: DB,
    commit_lock: Mutex<()>,
}

impl RocksStore {
    /// Open or create storage at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        let db = DB::open(&opts, path)?;
        Ok(Self {
            db,
            commit_lock: Mutex::new(()),
        })
    }

    fn get_json<T: serde::de::DeserializeOwned>(&self, key: &[u8]) -> Result<Option<T>> {
        match self.db.get(key)? {
            Some(data) => Ok(Some(serde_json::from_slice(&data)?)),
            None => Ok(None),
        }
    }
}

impl LedgerStore for RocksStore {
    fn put_proposal(&self, proposal: &Proposal) -> Result<()> {
        let value = serde_json::to_vec(proposal)?;
        self.db.put(proposal_key(&proposal.id).as_bytes(), value)?;
        Ok(())
    }

    fn get_proposal(&self, id: &str) -> Result<Option<Proposal>> {
        self.get_json(proposal_key(id).as_bytes())
    }

    fn delete_proposal(&self, id: &str) -> Result<()> {
        self.db.delete(proposal_key(id).as_bytes())?;
        Ok(())
    }

    fn list_proposals(&self) -> Result<Vec<Proposal>> {
        let prefix = PROPOSAL_PREFIX.as_bytes();
        let mut proposals = Vec::new();

        for item in self.db.prefix_iterator(prefix) {
            let (key, value) = item?;
            if !key.starts_with(prefix) {
                break;
            }
            proposals.push(serde_json::from_slice(&value)?);
        }

        Ok(proposals)
    }

    fn accepted_set(&self) -> Result<Vec<Placement>> {
        Ok(self.get_json(ACCEPTED_KEY)?.unwrap_or_default())
    }

    fn replace_accepted_set(&self, set: &[Placement]) -> Result<()> {
        ensure_disjoint(set)?;
        self.db.put(ACCEPTED_KEY, serde_json::to_vec(set)?)?;
        Ok(())
    }

    fn get_manifest(&self, epoch: u64) -> Result<Option<ManifestRecord>> {
        self.get_json(manifest_key(epoch).as_bytes())
    }

    fn latest_manifest(&self) -> Result<Option<ManifestRecord>> {
        let Some(raw) = self.db.get(LATEST_KEY)? else {
            return Ok(None);
        };
        let epoch: u64 = std::str::from_utf8(&raw)
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| Error::Storage("corrupt latest-manifest pointer".into()))?;
        self.get_manifest(epoch)
    }

    fn commit_epoch(&self, commit: &EpochCommit) -> Result<()> {
        let _guard = self.commit_lock.lock().unwrap_or_else(|e| e.into_inner());
        let epoch = commit.record.epoch();
        check_commit(
            commit,
            self.get_manifest(epoch)?.as_ref(),
            self.latest_manifest()?.as_ref(),
        )?;

        let mut batch = WriteBatch::default();
        batch.put(ACCEPTED_KEY, serde_json::to_vec(&commit.accepted)?);
        for p in &commit.proposals {
            batch.put(proposal_key(&p.id).as_bytes(), serde_json::to_vec(p)?);
        }
        batch.put(
            manifest_key(epoch).as_bytes(),
            serde_json::to_vec(&commit.record)?,
        );
        batch.put(LATEST_KEY, epoch.to_string().as_bytes());
        self.db.write(batch)?;
        Ok(())
    }

    fn get_meta(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.db.get(format!("{}{}", META_PREFIX, key).as_bytes())?)
    }

    fn put_meta(&self, key: &str, value: &[u8]) -> Result<()> {
        self.db
            .put(format!("{}{}", META_PREFIX, key).as_bytes(), value)?;
        Ok(())
    }
}
