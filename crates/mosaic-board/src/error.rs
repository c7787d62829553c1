//! Error types for the board node.

use crate::models::Wei;
use mosaic_geometry::GeometryError;
use thiserror::Error;

/// Result type for board operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in board operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed user input
    #[error("Validation error: {0}")]
    Validation(String),

    /// Rectangle is not on the tile grid
    #[error("Validation error: {0}")]
    Geometry(#[from] GeometryError),

    /// Not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Duplicate or conflicting write
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Bid cannot displace an overlapping accepted placement
    #[error("bid too low to displace accepted placement(s): must exceed {require_greater_than} wei per cell")]
    BidTooLow { require_greater_than: Wei },

    /// Vote on a closed proposal
    #[error("Voting closed: {0}")]
    VotingClosed(String),

    /// Illegal proposal status change
    #[error("Invalid status transition: {0}")]
    InvalidTransition(String),

    /// Manifest for this epoch already committed
    #[error("Epoch {0} already finalized")]
    AlreadyFinalized(u64),

    /// Manifest persistence failed
    #[error("Manifest upload failed: {0}")]
    UploadFailed(String),

    /// Ledger submission failed before reaching the ledger
    #[error("Ledger submission failed: {0}")]
    SubmissionFailed(String),

    /// Ledger rejected the finalization
    #[error("Ledger reverted: {0}")]
    Reverted(String),

    /// Broken internal invariant
    #[error("Invariant violated: {0}")]
    Invariant(String),

    /// Storage error
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error
    #[error("Config error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<rocksdb::Error> for Error {
    fn from(e: rocksdb::Error) -> Self {
        Error::Storage(e.to_string())
    }
}
