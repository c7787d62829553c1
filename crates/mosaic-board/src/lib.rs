//! Mosaic Board - Epoch Resolution Engine
//!
//! Resolves periodic competition for non-overlapping rectangular slots on a
//! shared canvas. Participants submit placement proposals with a per-cell
//! bid, the community votes, and at each epoch boundary the node admits a
//! non-overlapping subset, evicting incumbents only when strictly outbid,
//! then anchors a hash of the resulting manifest on an external ledger.
//!
//! # Architecture
//!
//! - **Ledger**: proposals, votes and the accepted set over a pluggable store
//! - **Allocation**: referendum gate plus bid-ranked greedy admission
//! - **Manifest**: immutable per-epoch snapshots, BLAKE3-addressed
//! - **Committer**: signed `finalizeEpoch` submission to the external ledger
//! - **Finalize**: the epoch-close saga tying the above together
//! - **API**: HTTP endpoints and a WebSocket feed of finalized epochs
//! - **Admin Socket**: Unix socket for local operator commands (board-admin CLI)
//!
//! # Example
//!
//! ```no_run
//! use mosaic_board::{BoardConfig, BoardNode};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = BoardConfig::from_env()?;
//!     let node = BoardNode::new(config).await?;
//!     node.run().await?;
//!     Ok(())
//! }
//! ```

pub mod admin_socket;
pub mod allocation;
pub mod api;
pub mod committer;
pub mod epoch;
pub mod error;
pub mod finalize;
pub mod ledger;
pub mod manifest;
pub mod models;
pub mod node;
pub mod storage;
pub mod ws;

pub use allocation::{allocate, RejectReason, Rejection, Resolution};
pub use committer::{
    FinalizationCommitter, FinalizeCall, FinalizedEvent, InMemoryLedger, LedgerClient, SignedCall,
};
pub use epoch::{Clock, EpochClock, ManualClock, SystemClock};
pub use error::{Error, Result};
pub use finalize::{EpochCloser, FinalizeOutcome, FinalizeRequest, FinalizeSummary};
pub use ledger::{CommitPlan, GcReport, LedgerPolicy, ProposalLedger, VoteOutcome};
pub use manifest::{content_hash, ContentStore, FsContentStore, ManifestBuilder, MemoryContentStore};
pub use models::{
    ContentId, Manifest, ManifestHash, ManifestRecord, Mime, Placement, Proposal, ProposalDraft,
    ProposalStatus, Receipt, Wei,
};
pub use node::{BoardConfig, BoardNode, BoardState, StoreKind};
pub use storage::{LedgerStore, MemoryStore, RocksStore};
