//! Manifest builder - snapshots the accepted set and stores it durably.

use crate::error::{Error, Result};
use crate::models::{ContentId, Manifest, ManifestHash, Placement};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

/// Content-addressed blob storage for manifests.
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Store `bytes` and return where they live.
    async fn put(&self, bytes: &[u8]) -> Result<ContentId>;

    async fn get(&self, id: &ContentId) -> Result<Option<Vec<u8>>>;
}

/// Stores manifests as files named by their BLAKE3 hash.
pub struct FsContentStore {
    dir: PathBuf,
}

impl FsContentStore {
    /// Open a store rooted at `dir`, creating it if needed.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn path_for(&self, hex: &str) -> PathBuf {
        self.dir.join(format!("{}.manifest.json", hex))
    }
}

#[async_trait]
impl ContentStore for FsContentStore {
    async fn put(&self, bytes: &[u8]) -> Result<ContentId> {
        let hex = blake3::hash(bytes).to_hex();
        tokio::fs::write(self.path_for(hex.as_str()), bytes).await?;
        Ok(ContentId(format!("b3:{}", hex)))
    }

    async fn get(&self, id: &ContentId) -> Result<Option<Vec<u8>>> {
        let Some(hex) = id.as_str().strip_prefix("b3:") else {
            return Ok(None);
        };
        if hex.len() != 64 || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Ok(None);
        }
        match tokio::fs::read(self.path_for(hex)).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

/// In-memory content store. Can be switched to fail every upload.
#[derive(Default)]
pub struct MemoryContentStore {
    blobs: RwLock<HashMap<ContentId, Vec<u8>>>,
    failing: AtomicBool,
}

impl MemoryContentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub async fn len(&self) -> usize {
        self.blobs.read().await.len()
    }
}

#[async_trait]
impl ContentStore for MemoryContentStore {
    async fn put(&self, bytes: &[u8]) -> Result<ContentId> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::UploadFailed("content store unavailable".into()));
        }
        let id = ContentId(format!("mem:{}", blake3::hash(bytes).to_hex()));
        self.blobs.write().await.insert(id.clone(), bytes.to_vec());
        Ok(id)
    }

    async fn get(&self, id: &ContentId) -> Result<Option<Vec<u8>>> {
        Ok(self.blobs.read().await.get(id).cloned())
    }
}

/// BLAKE3 over a manifest's canonical bytes.
pub fn content_hash(bytes: &[u8]) -> ManifestHash {
    ManifestHash::of(bytes)
}

/// Builds, hashes and persists manifests.
pub struct ManifestBuilder {
    store: Arc<dyn ContentStore>,
    allow_synthetic: bool,
    timeout: Duration,
}

impl ManifestBuilder {
    pub fn new(store: Arc<dyn ContentStore>, allow_synthetic: bool, timeout: Duration) -> Self {
        Self {
            store,
            allow_synthetic,
            timeout,
        }
    }

    /// Snapshot `accepted` as the manifest for `epoch`.
    pub fn build(epoch: u64, accepted: &[Placement], finalized_at: u64) -> Manifest {
        Manifest {
            epoch,
            finalized_at,
            placements: accepted.to_vec(),
        }
    }

    /// Store the manifest and return its content id.
    ///
    /// With synthetic ids allowed, a failed or timed-out upload yields
    /// `dev-manifest-epoch-<n>` instead of an error.
    pub async fn persist(&self, manifest: &Manifest) -> Result<ContentId> {
        let bytes = manifest.canonical_bytes()?;
        let outcome = match tokio::time::timeout(self.timeout, self.store.put(&bytes)).await {
            Ok(Ok(id)) => Ok(id),
            Ok(Err(e)) => Err(Error::UploadFailed(e.to_string())),
            Err(_) => Err(Error::UploadFailed(format!(
                "upload timed out after {:?}",
                self.timeout
            ))),
        };

        match outcome {
            Ok(id) => {
                tracing::debug!(epoch = manifest.epoch, content_id = %id, "Manifest stored");
                Ok(id)
            }
            Err(e) if self.allow_synthetic => {
                let id = ContentId::synthetic(manifest.epoch);
                tracing::warn!(epoch = manifest.epoch, error = %e, content_id = %id, "Manifest upload failed; using synthetic content id");
                Ok(id)
            }
            Err(e) => {
                tracing::warn!(epoch = manifest.epoch, error = %e, "Manifest upload failed");
                Err(e)
            }
        }
    }

    /// Load a stored manifest back.
    pub async fn fetch(&self, id: &ContentId) -> Result<Manifest> {
        let bytes = self
            .store
            .get(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("manifest content {}", id)))?;
        Manifest::from_bytes(&bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Mime, Wei};
    use mosaic_geometry::Rect;
    use tempfile::tempdir;

    fn placements() -> Vec<Placement> {
        vec![Placement {
            id: "p".into(),
            owner: "o".into(),
            cid: "c".into(),
            name: String::new(),
            mime: Mime::Jpeg,
            rect: Rect::new(-32, 64, 32, 32),
            cells: 1,
            bid_per_cell_wei: Wei(42),
        }]
    }

    #[tokio::test]
    async fn fs_store_round_trip() {
        let dir = tempdir().unwrap();
        let store = Arc::new(FsContentStore::open(dir.path().join("manifests")).unwrap());
        let builder = ManifestBuilder::new(store, false, Duration::from_secs(5));

        let manifest = ManifestBuilder::build(3, &placements(), 1234);
        let id = builder.persist(&manifest).await.unwrap();
        assert!(id.as_str().starts_with("b3:"));

        let loaded = builder.fetch(&id).await.unwrap();
        assert_eq!(loaded, manifest);
        assert_eq!(
            content_hash(&loaded.canonical_bytes().unwrap()),
            content_hash(&manifest.canonical_bytes().unwrap())
        );
    }

    #[tokio::test]
    async fn fs_store_ignores_foreign_ids() {
        let dir = tempdir().unwrap();
        let store = FsContentStore::open(dir.path()).unwrap();
        assert!(store.get(&ContentId("ipfs://x".into())).await.unwrap().is_none());
        assert!(store.get(&ContentId("b3:../etc".into())).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn upload_failure_surfaces() {
        let store = Arc::new(MemoryContentStore::new());
        store.set_failing(true);
        let builder = ManifestBuilder::new(store.clone(), false, Duration::from_secs(5));
        let manifest = ManifestBuilder::build(1, &[], 0);
        assert!(matches!(
            builder.persist(&manifest).await,
            Err(Error::UploadFailed(_))
        ));
        assert_eq!(store.len().await, 0);
    }

    #[tokio::test]
    async fn synthetic_fallback_when_allowed() {
        let store = Arc::new(MemoryContentStore::new());
        store.set_failing(true);
        let builder = ManifestBuilder::new(store, true, Duration::from_secs(5));
        let id = builder
            .persist(&ManifestBuilder::build(9, &[], 0))
            .await
            .unwrap();
        assert_eq!(id.as_str(), "dev-manifest-epoch-9");
    }

    #[tokio::test]
    async fn same_manifest_same_id() {
        let store = Arc::new(MemoryContentStore::new());
        let builder = ManifestBuilder::new(store.clone(), false, Duration::from_secs(5));
        let m = ManifestBuilder::build(2, &placements(), 99);
        let a = builder.persist(&m).await.unwrap();
        let b = builder.persist(&m.clone()).await.unwrap();
        assert_eq!(a, b);
        assert_eq!(store.len().await, 1);
    }
}
