//! Manifest model - the immutable per-epoch snapshot of the accepted set.

use super::Placement;
use crate::error::{Error, Result};
use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Snapshot of the accepted set at the close of an epoch.
///
/// Field order is fixed; the canonical serialization is compact JSON in
/// declaration order, so re-serializing a parsed manifest yields the same
/// bytes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    pub epoch: u64,

    /// Finalization time (unix ms)
    pub finalized_at: u64,

    pub placements: Vec<Placement>,
}

impl Manifest {
    /// Canonical bytes that are hashed and stored.
    pub fn canonical_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    pub fn placement_ids(&self) -> impl Iterator<Item = &str> {
        self.placements.iter().map(|p| p.id.as_str())
    }
}

/// BLAKE3 digest of a manifest's canonical bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ManifestHash(pub [u8; 32]);

impl ManifestHash {
    pub fn of(bytes: &[u8]) -> Self {
        Self(*blake3::hash(bytes).as_bytes())
    }

    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for ManifestHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl FromStr for ManifestHash {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let digits = s.strip_prefix("0x").unwrap_or(s);
        let mut out = [0u8; 32];
        hex::decode_to_slice(digits, &mut out)
            .map_err(|e| Error::Validation(format!("bad manifest hash {:?}: {}", s, e)))?;
        Ok(Self(out))
    }
}

impl Serialize for ManifestHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ManifestHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}

/// Where a manifest is durably stored.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentId(pub String);

impl ContentId {
    /// Placeholder id used when uploads are allowed to fail in development.
    pub fn synthetic(epoch: u64) -> Self {
        Self(format!("dev-manifest-epoch-{}", epoch))
    }

    pub fn is_synthetic(&self) -> bool {
        self.0.starts_with("dev-manifest-epoch-")
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Confirmation returned by the external ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Receipt {
    pub epoch: u64,
    pub tx_id: String,
    pub sequence: u64,
    pub manifest_hash: ManifestHash,
}

/// A finalized manifest together with where and how it was committed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestRecord {
    pub manifest: Manifest,
    pub content_id: ContentId,
    pub hash: ManifestHash,
    /// `None` for a seeded genesis manifest
    #[serde(default)]
    pub receipt: Option<Receipt>,
}

impl ManifestRecord {
    pub fn epoch(&self) -> u64 {
        self.manifest.epoch
    }
}
