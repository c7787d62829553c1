//! Finalization committer - anchors a manifest hash on the external ledger.
//!
//! The external ledger exposes one operation,
//! `finalizeEpoch(epoch, manifestHash, manifestContentId, acceptedIds,
//! rejectedIds)`, and emits `Finalized(epoch, manifestHash,
//! manifestContentId)`. Calls are signed with the operator's ed25519 key.

use crate::error::{Error, Result};
use crate::models::{ContentId, ManifestHash, Receipt};
use async_trait::async_trait;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};

const CALL_DOMAIN: &[u8] = b"mosaic.finalizeEpoch.v1";

/// Arguments of `finalizeEpoch`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinalizeCall {
    pub epoch: u32,
    pub manifest_hash: ManifestHash,
    pub content_id: ContentId,
    pub accepted_ids: Vec<[u8; 32]>,
    pub rejected_ids: Vec<[u8; 32]>,
}

impl FinalizeCall {
    /// Deterministic encoding that is signed and hashed into the tx id.
    pub fn encode(&self) -> Vec<u8> {
        let cid = self.content_id.as_str().as_bytes();
        let mut msg = Vec::with_capacity(
            CALL_DOMAIN.len()
                + 4
                + 32
                + 8
                + cid.len()
                + 16
                + 32 * (self.accepted_ids.len() + self.rejected_ids.len()),
        );
        msg.extend_from_slice(CALL_DOMAIN);
        msg.extend_from_slice(&self.epoch.to_be_bytes());
        msg.extend_from_slice(self.manifest_hash.as_bytes());
        msg.extend_from_slice(&(cid.len() as u64).to_be_bytes());
        msg.extend_from_slice(cid);
        for ids in [&self.accepted_ids, &self.rejected_ids] {
            msg.extend_from_slice(&(ids.len() as u64).to_be_bytes());
            for id in ids {
                msg.extend_from_slice(id);
            }
        }
        msg
    }

    /// Hex BLAKE3 of the encoded call.
    pub fn call_id(&self) -> String {
        format!("0x{}", blake3::hash(&self.encode()).to_hex())
    }

    pub fn sign(self, key: &SigningKey) -> SignedCall {
        let signature = key.sign(&self.encode());
        SignedCall {
            operator: key.verifying_key(),
            signature,
            call: self,
        }
    }
}

/// A call together with the operator's signature over it.
#[derive(Debug, Clone)]
pub struct SignedCall {
    pub call: FinalizeCall,
    pub operator: VerifyingKey,
    pub signature: Signature,
}

impl SignedCall {
    pub fn verify(&self) -> bool {
        self.operator
            .verify(&self.call.encode(), &self.signature)
            .is_ok()
    }
}

/// `Finalized` event emitted once an epoch is anchored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalizedEvent {
    pub epoch: u64,
    pub manifest_hash: ManifestHash,
    pub content_id: ContentId,
    pub tx_id: String,
}

/// The external ledger's write surface.
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Submit a finalization. `Reverted` means the ledger refused it;
    /// `SubmissionFailed` means it never got a verdict.
    async fn finalize_epoch(&self, call: &SignedCall) -> Result<Receipt>;
}

/// Signs and submits finalizations with a bounded wait.
pub struct FinalizationCommitter {
    client: Arc<dyn LedgerClient>,
    signing_key: SigningKey,
    timeout: Duration,
}

impl FinalizationCommitter {
    pub fn new(client: Arc<dyn LedgerClient>, signing_key: SigningKey, timeout: Duration) -> Self {
        Self {
            client,
            signing_key,
            timeout,
        }
    }

    pub fn operator(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }

    pub async fn submit(&self, call: FinalizeCall) -> Result<Receipt> {
        let epoch = call.epoch;
        let signed = call.sign(&self.signing_key);

        let result = match tokio::time::timeout(self.timeout, self.client.finalize_epoch(&signed)).await {
            Ok(Ok(receipt)) => Ok(receipt),
            Ok(Err(e @ (Error::Reverted(_) | Error::SubmissionFailed(_)))) => Err(e),
            Ok(Err(other)) => Err(Error::SubmissionFailed(other.to_string())),
            Err(_) => Err(Error::SubmissionFailed(format!(
                "no ledger response within {:?}",
                self.timeout
            ))),
        };

        match &result {
            Ok(receipt) => tracing::info!(epoch, tx = %receipt.tx_id, seq = receipt.sequence, "Finalization anchored"),
            Err(e) => tracing::warn!(epoch, error = %e, "Finalization submission failed"),
        }
        result
    }
}

#[derive(Default)]
struct LedgerBook {
    finalized: BTreeMap<u32, (Receipt, ContentId)>,
    sequence: u64,
}

/// Process-local stand-in for the external ledger.
///
/// Accepts calls only from the configured operator. Re-submitting an
/// epoch with the same hash returns the original receipt; a different hash
/// reverts.
pub struct InMemoryLedger {
    operator: VerifyingKey,
    book: Mutex<LedgerBook>,
    events: broadcast::Sender<FinalizedEvent>,
    fail_next: AtomicBool,
    revert_next: AtomicBool,
}

impl InMemoryLedger {
    pub fn new(operator: VerifyingKey) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            operator,
            book: Mutex::new(LedgerBook::default()),
            events,
            fail_next: AtomicBool::new(false),
            revert_next: AtomicBool::new(false),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<FinalizedEvent> {
        self.events.subscribe()
    }

    /// Make the next call fail before reaching the ledger.
    pub fn fail_next(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }

    /// Make the next valid call revert.
    pub fn revert_next(&self) {
        self.revert_next.store(true, Ordering::SeqCst);
    }

    pub async fn receipt(&self, epoch: u32) -> Option<Receipt> {
        self.book
            .lock()
            .await
            .finalized
            .get(&epoch)
            .map(|(r, _)| r.clone())
    }

    pub async fn finalized_count(&self) -> usize {
        self.book.lock().await.finalized.len()
    }
}

#[async_trait]
impl LedgerClient for InMemoryLedger {
    async fn finalize_epoch(&self, signed: &SignedCall) -> Result<Receipt> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(Error::SubmissionFailed("ledger unreachable".into()));
        }
        if !signed.verify() {
            return Err(Error::SubmissionFailed("invalid call signature".into()));
        }
        if signed.operator != self.operator {
            return Err(Error::Reverted("caller is not the operator".into()));
        }
        if self.revert_next.swap(false, Ordering::SeqCst) {
            return Err(Error::Reverted("execution reverted".into()));
        }

        let call = &signed.call;
        let mut book = self.book.lock().await;

        if let Some((existing, _)) = book.finalized.get(&call.epoch) {
            if existing.manifest_hash == call.manifest_hash {
                return Ok(existing.clone());
            }
            return Err(Error::Reverted(format!(
                "epoch {} already finalized with {}",
                call.epoch, existing.manifest_hash
            )));
        }

        book.sequence += 1;
        let receipt = Receipt {
            epoch: u64::from(call.epoch),
            tx_id: call.call_id(),
            sequence: book.sequence,
            manifest_hash: call.manifest_hash,
        };
        book.finalized
            .insert(call.epoch, (receipt.clone(), call.content_id.clone()));

        // No subscribers is fine
        let _ = self.events.send(FinalizedEvent {
            epoch: receipt.epoch,
            manifest_hash: receipt.manifest_hash,
            content_id: call.content_id.clone(),
            tx_id: receipt.tx_id.clone(),
        });
        Ok(receipt)
    }
}

/// A ledger that never answers. Used to exercise timeouts.
#[cfg(test)]
pub(crate) struct StalledLedger;

#[cfg(test)]
#[async_trait]
impl LedgerClient for StalledLedger {
    async fn finalize_epoch(&self, _call: &SignedCall) -> Result<Receipt> {
        std::future::pending().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(seed: u8) -> SigningKey {
        SigningKey::from_bytes(&[seed; 32])
    }

    fn call(epoch: u32, hash: u8) -> FinalizeCall {
        FinalizeCall {
            epoch,
            manifest_hash: ManifestHash([hash; 32]),
            content_id: ContentId("b3:abc".into()),
            accepted_ids: vec![[1; 32]],
            rejected_ids: vec![[2; 32], [3; 32]],
        }
    }

    fn committer(ledger: Arc<InMemoryLedger>, key: SigningKey) -> FinalizationCommitter {
        FinalizationCommitter::new(ledger, key, Duration::from_secs(5))
    }

    #[test]
    fn encoding_separates_id_lists() {
        let mut a = call(1, 0);
        let mut b = call(1, 0);
        a.accepted_ids = vec![[1; 32], [2; 32]];
        a.rejected_ids = vec![];
        b.accepted_ids = vec![[1; 32]];
        b.rejected_ids = vec![[2; 32]];
        assert_ne!(a.encode(), b.encode());
        assert_ne!(a.call_id(), b.call_id());
    }

    #[test]
    fn signature_covers_call() {
        let mut signed = call(1, 0).sign(&key(1));
        assert!(signed.verify());
        signed.call.epoch = 2;
        assert!(!signed.verify());
    }

    #[tokio::test]
    async fn submit_and_emit() {
        let k = key(7);
        let ledger = Arc::new(InMemoryLedger::new(k.verifying_key()));
        let mut events = ledger.subscribe();
        let c = committer(ledger.clone(), k);

        let receipt = c.submit(call(4, 9)).await.unwrap();
        assert_eq!(receipt.epoch, 4);
        assert_eq!(receipt.sequence, 1);
        assert_eq!(receipt.tx_id, call(4, 9).call_id());

        let ev = events.recv().await.unwrap();
        assert_eq!(ev.epoch, 4);
        assert_eq!(ev.manifest_hash, ManifestHash([9; 32]));
        assert_eq!(ev.content_id.as_str(), "b3:abc");
    }

    #[tokio::test]
    async fn resubmission_is_idempotent_per_hash() {
        let k = key(7);
        let ledger = Arc::new(InMemoryLedger::new(k.verifying_key()));
        let c = committer(ledger.clone(), k);

        let first = c.submit(call(4, 9)).await.unwrap();
        let again = c.submit(call(4, 9)).await.unwrap();
        assert_eq!(first, again);
        assert!(matches!(c.submit(call(4, 8)).await, Err(Error::Reverted(_))));
        assert_eq!(ledger.finalized_count().await, 1);
    }

    #[tokio::test]
    async fn wrong_operator_reverts() {
        let ledger = Arc::new(InMemoryLedger::new(key(1).verifying_key()));
        let c = committer(ledger.clone(), key(2));
        assert!(matches!(c.submit(call(1, 1)).await, Err(Error::Reverted(_))));
        assert!(ledger.receipt(1).await.is_none());
    }

    #[tokio::test]
    async fn fault_injection() {
        let k = key(3);
        let ledger = Arc::new(InMemoryLedger::new(k.verifying_key()));
        let c = committer(ledger.clone(), k);

        ledger.fail_next();
        assert!(matches!(c.submit(call(1, 1)).await, Err(Error::SubmissionFailed(_))));
        ledger.revert_next();
        assert!(matches!(c.submit(call(1, 1)).await, Err(Error::Reverted(_))));
        assert!(c.submit(call(1, 1)).await.is_ok());
    }

    #[tokio::test]
    async fn timeout_is_submission_failure() {
        let c = FinalizationCommitter::new(Arc::new(StalledLedger), key(1), Duration::from_millis(50));
        assert!(matches!(c.submit(call(1, 1)).await, Err(Error::SubmissionFailed(_))));
    }
}
