//! Epoch close - resolve, snapshot, anchor, then commit locally.
//!
//! The close is a two-step saga. Everything up to and including the
//! external submission is preparation and leaves the ledger untouched; the
//! local commit happens in a single `commit_epoch` call only after the
//! external ledger confirmed. A failed attempt keeps its prepared
//! resolution and manifest, and every retry for that epoch submits the same
//! hash again, even if votes arrived in between.

use crate::allocation::{allocate, Rejection, Resolution};
use crate::committer::{FinalizationCommitter, FinalizeCall, FinalizedEvent};
use crate::epoch::{Clock, EpochClock};
use crate::error::{Error, Result};
use crate::ledger::{CommitPlan, ProposalLedger};
use crate::manifest::{content_hash, ManifestBuilder};
use crate::models::{ledger_key, ContentId, Manifest, ManifestHash, ManifestRecord, Placement, Proposal, Receipt};
use mosaic_referendum::ReferendumRules;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};

/// Parameters of one close.
#[derive(Debug, Clone, Copy, Default)]
pub struct FinalizeRequest {
    /// Bypass the referendum and close every open proposal
    pub force: bool,
    /// Epoch to close; defaults to the current one
    pub epoch: Option<u64>,
}

/// Result of a successful close.
#[derive(Debug, Clone)]
pub struct FinalizeSummary {
    pub epoch: u64,
    pub content_id: ContentId,
    pub manifest_hash: ManifestHash,
    pub receipt: Receipt,
    pub winners: Vec<String>,
    pub rejected: Vec<Rejection>,
    pub evicted: Vec<String>,
    /// Size of the new accepted set
    pub accepted: usize,
}

#[derive(Debug, Clone)]
pub enum FinalizeOutcome {
    /// Nothing was due; no manifest written
    Idle { epoch: u64 },
    Finalized(FinalizeSummary),
}

struct PreparedFinalization {
    epoch: u64,
    inputs: [u8; 32],
    resolution: Resolution,
    manifest: Manifest,
    content_id: ContentId,
    hash: ManifestHash,
}

/// Orchestrates epoch closes. One close runs at a time.
pub struct EpochCloser {
    ledger: Arc<ProposalLedger>,
    rules: ReferendumRules,
    builder: ManifestBuilder,
    committer: FinalizationCommitter,
    clock: Arc<dyn Clock>,
    epochs: EpochClock,
    prepared: Mutex<Option<PreparedFinalization>>,
    events: broadcast::Sender<FinalizedEvent>,
}

impl EpochCloser {
    pub fn new(
        ledger: Arc<ProposalLedger>,
        rules: ReferendumRules,
        builder: ManifestBuilder,
        committer: FinalizationCommitter,
        clock: Arc<dyn Clock>,
        epochs: EpochClock,
    ) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            ledger,
            rules,
            builder,
            committer,
            clock,
            epochs,
            prepared: Mutex::new(None),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<FinalizedEvent> {
        self.events.subscribe()
    }

    pub fn current_epoch(&self) -> u64 {
        self.epochs.current(self.clock.as_ref())
    }

    pub fn seconds_left(&self) -> u64 {
        self.epochs.seconds_left(self.clock.as_ref().now_secs())
    }

    pub fn builder(&self) -> &ManifestBuilder {
        &self.builder
    }

    pub fn rules(&self) -> &ReferendumRules {
        &self.rules
    }

    /// Close an epoch.
    pub async fn finalize(&self, req: FinalizeRequest) -> Result<FinalizeOutcome> {
        let mut prepared = self.prepared.lock().await;

        let current = self.current_epoch();
        let epoch = req.epoch.unwrap_or(current);
        if epoch > current {
            return Err(Error::Validation(format!(
                "epoch {} has not started (current is {})",
                epoch, current
            )));
        }
        let ledger_epoch = u32::try_from(epoch)
            .map_err(|_| Error::Validation(format!("epoch {} exceeds the ledger range", epoch)))?;

        if self.ledger.manifest(epoch)?.is_some() {
            return Err(Error::AlreadyFinalized(epoch));
        }
        if let Some(latest) = self.ledger.latest_manifest()? {
            if latest.epoch() > epoch {
                return Err(Error::Validation(format!(
                    "epoch {} precedes latest finalized epoch {}",
                    epoch,
                    latest.epoch()
                )));
            }
        }

        let candidates = self.ledger.list_candidates(epoch, req.force)?;
        let accepted = self.ledger.accepted_set()?;
        let inputs = inputs_digest(epoch, req.force, &candidates, &accepted)?;

        // An earlier attempt may have reached the external ledger before it
        // failed here; only that exact manifest can ever commit for the epoch.
        let reusable = prepared.as_ref().filter(|p| p.epoch == epoch).map(|p| {
            if p.inputs == inputs {
                tracing::info!(epoch, hash = %p.hash, "Retrying prepared finalization");
            } else {
                tracing::warn!(
                    epoch,
                    hash = %p.hash,
                    "Inputs changed since the prepared finalization; resubmitting it unchanged"
                );
            }
            (
                p.resolution.clone(),
                p.manifest.clone(),
                p.content_id.clone(),
                p.hash,
            )
        });

        let (resolution, manifest, content_id, hash) = match reusable {
            Some(prepared) => prepared,
            None => {
                if candidates.is_empty() {
                    tracing::debug!(epoch, "No candidates due");
                    return Ok(FinalizeOutcome::Idle { epoch });
                }
                let resolution = allocate(&candidates, &accepted, &self.rules, req.force);
                let manifest = ManifestBuilder::build(
                    epoch,
                    &resolution.new_accepted_set,
                    self.clock.now_ms(),
                );
                let content_id = self.builder.persist(&manifest).await?;
                let hash = content_hash(&manifest.canonical_bytes()?);
                *prepared = Some(PreparedFinalization {
                    epoch,
                    inputs,
                    resolution: resolution.clone(),
                    manifest: manifest.clone(),
                    content_id: content_id.clone(),
                    hash,
                });
                (resolution, manifest, content_id, hash)
            }
        };

        let call = FinalizeCall {
            epoch: ledger_epoch,
            manifest_hash: hash,
            content_id: content_id.clone(),
            accepted_ids: resolution.winners.iter().map(|w| ledger_key(&w.id)).collect(),
            rejected_ids: resolution.rejected.iter().map(|r| ledger_key(&r.id)).collect(),
        };
        let receipt = self.committer.submit(call).await?;

        self.ledger.commit_epoch(CommitPlan {
            accepted: resolution.new_accepted_set.clone(),
            statuses: resolution.status_updates(),
            record: ManifestRecord {
                manifest,
                content_id: content_id.clone(),
                hash,
                receipt: Some(receipt.clone()),
            },
        })?;
        *prepared = None;

        if let Err(e) = self.ledger.gc(epoch) {
            tracing::warn!(epoch, error = %e, "GC after finalize failed");
        }

        let _ = self.events.send(FinalizedEvent {
            epoch,
            manifest_hash: hash,
            content_id: content_id.clone(),
            tx_id: receipt.tx_id.clone(),
        });

        tracing::info!(
            epoch,
            winners = resolution.winners.len(),
            rejected = resolution.rejected.len(),
            evicted = resolution.evicted.len(),
            accepted = resolution.new_accepted_set.len(),
            content_id = %content_id,
            hash = %hash,
            "Epoch finalized"
        );

        Ok(FinalizeOutcome::Finalized(FinalizeSummary {
            epoch,
            content_id,
            manifest_hash: hash,
            receipt,
            winners: resolution.winner_ids(),
            evicted: resolution.evicted_ids(),
            accepted: resolution.new_accepted_set.len(),
            rejected: resolution.rejected,
        }))
    }

    /// Close each epoch shortly after it ends. Runs until the task is dropped.
    pub async fn run_scheduler(self: Arc<Self>) {
        let mut last_closed: Option<u64> = None;
        loop {
            let wait = self.seconds_left().max(1) + 1;
            tokio::time::sleep(Duration::from_secs(wait)).await;

            let current = self.current_epoch();
            let Some(ended) = current.checked_sub(1) else {
                continue;
            };
            if last_closed == Some(ended) {
                continue;
            }

            match self
                .finalize(FinalizeRequest {
                    force: false,
                    epoch: Some(ended),
                })
                .await
            {
                Ok(FinalizeOutcome::Idle { .. }) | Err(Error::AlreadyFinalized(_)) => {
                    last_closed = Some(ended);
                }
                Ok(FinalizeOutcome::Finalized(_)) => last_closed = Some(ended),
                // Retried after the next sleep
                Err(e) => tracing::error!(epoch = ended, error = %e, "Scheduled finalize failed"),
            }
        }
    }
}

/// Digest of everything a close's manifest depends on.
fn inputs_digest(
    epoch: u64,
    force: bool,
    candidates: &[Proposal],
    accepted: &[Placement],
) -> Result<[u8; 32]> {
    let mut hasher = blake3::Hasher::new();
    hasher.update(&epoch.to_be_bytes());
    hasher.update(&[force as u8]);
    for c in candidates {
        hasher.update(c.id.as_bytes());
        hasher.update(&[0]);
        hasher.update(&c.yes.to_be_bytes());
        hasher.update(&c.no.to_be_bytes());
    }
    hasher.update(&serde_json::to_vec(accepted)?);
    Ok(*hasher.finalize().as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::committer::{InMemoryLedger, LedgerClient, SignedCall};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};
    use crate::epoch::ManualClock;
    use crate::ledger::LedgerPolicy;
    use crate::manifest::MemoryContentStore;
    use crate::models::{ProposalDraft, Wei};
    use crate::storage::MemoryStore;
    use ed25519_dalek::SigningKey;
    use mosaic_geometry::Rect;

    struct Harness {
        ledger: Arc<ProposalLedger>,
        clock: Arc<ManualClock>,
        closer: EpochCloser,
    }

    fn harness() -> Harness {
        let ledger = Arc::new(ProposalLedger::new(
            Arc::new(MemoryStore::new()),
            LedgerPolicy::default(),
        ));
        let key = SigningKey::from_bytes(&[5; 32]);
        let chain = Arc::new(InMemoryLedger::new(key.verifying_key()));
        let clock = Arc::new(ManualClock::new(0));
        let closer = EpochCloser::new(
            ledger.clone(),
            ReferendumRules::default(),
            ManifestBuilder::new(Arc::new(MemoryContentStore::new()), false, Duration::from_secs(5)),
            FinalizationCommitter::new(chain, key, Duration::from_secs(5)),
            clock.clone(),
            EpochClock::new(0, 100),
        );
        Harness { ledger, clock, closer }
    }

    fn draft(id: &str, rect: Rect, bid: u128) -> ProposalDraft {
        ProposalDraft {
            id: Some(id.into()),
            owner: "o".into(),
            cid: "c".into(),
            name: None,
            mime: None,
            rect,
            cells: None,
            bid_per_cell_wei: Wei(bid),
        }
    }

    #[tokio::test]
    async fn idle_when_nothing_due() {
        let h = harness();
        h.ledger.submit(draft("a", Rect::new(0, 0, 32, 32), 1), 0, 0).unwrap();
        let out = h.closer.finalize(FinalizeRequest::default()).await.unwrap();
        assert!(matches!(out, FinalizeOutcome::Idle { epoch: 0 }));
        assert!(h.ledger.latest_manifest().unwrap().is_none());
    }

    #[tokio::test]
    async fn future_epoch_is_refused() {
        let h = harness();
        let req = FinalizeRequest {
            force: true,
            epoch: Some(1),
        };
        assert!(matches!(h.closer.finalize(req).await, Err(Error::Validation(_))));
    }

    #[tokio::test]
    async fn forced_close_then_already_finalized() {
        let h = harness();
        h.ledger.submit(draft("a", Rect::new(0, 0, 32, 32), 1), 0, 0).unwrap();
        let mut events = h.closer.subscribe();

        let out = h
            .closer
            .finalize(FinalizeRequest { force: true, epoch: None })
            .await
            .unwrap();
        let FinalizeOutcome::Finalized(summary) = out else {
            panic!("expected a finalized epoch");
        };
        assert_eq!(summary.winners, vec!["a"]);
        assert_eq!(summary.accepted, 1);
        assert_eq!(events.recv().await.unwrap().manifest_hash, summary.manifest_hash);

        h.ledger.submit(draft("b", Rect::new(64, 0, 32, 32), 1), 0, 0).unwrap();
        assert!(matches!(
            h.closer.finalize(FinalizeRequest { force: true, epoch: None }).await,
            Err(Error::AlreadyFinalized(0))
        ));

        // Older than the latest manifest
        h.clock.advance_secs(300);
        h.closer
            .finalize(FinalizeRequest { force: true, epoch: Some(2) })
            .await
            .unwrap();
        assert!(matches!(
            h.closer.finalize(FinalizeRequest { force: true, epoch: Some(1) }).await,
            Err(Error::Validation(_))
        ));
    }

    /// Applies the first call on the inner ledger, then never answers it.
    struct AnchorThenStall {
        inner: Arc<InMemoryLedger>,
        stalled: AtomicBool,
    }

    #[async_trait]
    impl LedgerClient for AnchorThenStall {
        async fn finalize_epoch(&self, call: &SignedCall) -> Result<Receipt> {
            let receipt = self.inner.finalize_epoch(call).await?;
            if !self.stalled.swap(true, Ordering::SeqCst) {
                std::future::pending::<()>().await;
            }
            Ok(receipt)
        }
    }

    #[tokio::test]
    async fn retry_after_lost_response_commits_the_anchored_manifest() {
        let ledger = Arc::new(ProposalLedger::new(
            Arc::new(MemoryStore::new()),
            LedgerPolicy::default(),
        ));
        let key = SigningKey::from_bytes(&[6; 32]);
        let chain = Arc::new(InMemoryLedger::new(key.verifying_key()));
        let client = Arc::new(AnchorThenStall {
            inner: chain.clone(),
            stalled: AtomicBool::new(false),
        });
        let clock = Arc::new(ManualClock::new(0));
        let closer = EpochCloser::new(
            ledger.clone(),
            ReferendumRules::default(),
            ManifestBuilder::new(Arc::new(MemoryContentStore::new()), false, Duration::from_secs(5)),
            FinalizationCommitter::new(client, key, Duration::from_millis(50)),
            clock.clone(),
            EpochClock::new(0, 100),
        );
        ledger.submit(draft("a", Rect::new(0, 0, 32, 32), 1), 0, 0).unwrap();
        let forced = FinalizeRequest { force: true, epoch: None };

        assert!(matches!(
            closer.finalize(forced).await,
            Err(Error::SubmissionFailed(_))
        ));
        let anchored = chain.receipt(0).await.unwrap();
        assert!(ledger.manifest(0).unwrap().is_none());

        // A late vote changes the inputs; the anchored manifest still wins
        ledger.vote("a", "late", true, 0).unwrap();
        clock.advance_secs(1);

        let FinalizeOutcome::Finalized(summary) = closer.finalize(forced).await.unwrap() else {
            panic!("expected a finalized epoch");
        };
        assert_eq!(summary.manifest_hash, anchored.manifest_hash);
        assert_eq!(summary.receipt, anchored);
        let record = ledger.manifest(0).unwrap().unwrap();
        assert_eq!(record.hash, anchored.manifest_hash);
        assert_eq!(ledger.get("a").unwrap().unwrap().yes, 1);
    }

    #[test]
    fn digest_tracks_tallies() {
        let p = Proposal {
            id: "a".into(),
            owner: String::new(),
            cid: String::new(),
            name: String::new(),
            mime: Default::default(),
            rect: Rect::new(0, 0, 32, 32),
            cells: 1,
            bid_per_cell_wei: Wei(1),
            epoch_submitted: 0,
            vote_ends_at_epoch: 1,
            voters: Default::default(),
            yes: 1,
            no: 0,
            status: crate::models::ProposalStatus::Proposed,
            created_at_ms: 0,
        };
        let a = inputs_digest(1, false, &[p.clone()], &[]).unwrap();
        let mut q = p.clone();
        q.no = 1;
        assert_ne!(a, inputs_digest(1, false, &[q], &[]).unwrap());
        assert_ne!(a, inputs_digest(1, true, &[p.clone()], &[]).unwrap());
        assert_eq!(a, inputs_digest(1, false, &[p], &[]).unwrap());
    }
}
