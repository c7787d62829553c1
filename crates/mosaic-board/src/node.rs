//! Board Node - the main application entry point.
//!
//! Architecture:
//! - Single daemon process owning the proposal ledger (RocksDB or memory)
//! - HTTP API for clients (proposals, votes, manifests, finalize)
//! - Unix admin socket for local operator commands (board-admin CLI)
//! - Epoch scheduler closing each epoch shortly after it ends

use crate::admin_socket::AdminSocket;
use crate::api;
use crate::committer::{FinalizationCommitter, FinalizedEvent, InMemoryLedger};
use crate::epoch::{Clock, EpochClock, SystemClock};
use crate::error::{Error, Result};
use crate::finalize::EpochCloser;
use crate::ledger::{LedgerPolicy, ProposalLedger};
use crate::manifest::{content_hash, ContentStore, FsContentStore, ManifestBuilder};
use crate::models::{Manifest, ManifestRecord, Wei};
use crate::storage::{LedgerStore, MemoryStore, RocksStore};
use mosaic_referendum::ReferendumRules;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

/// Which ledger store backs the node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKind {
    RocksDb,
    Memory,
}

impl FromStr for StoreKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "rocksdb" | "rocks" => Ok(StoreKind::RocksDb),
            "memory" | "mem" => Ok(StoreKind::Memory),
            other => Err(Error::Config(format!("unknown store {:?}", other))),
        }
    }
}

/// Configuration for a board node.
#[derive(Debug, Clone)]
pub struct BoardConfig {
    /// Data directory for storage and manifest files
    pub data_dir: PathBuf,

    /// HTTP API listen address
    pub api_addr: SocketAddr,

    /// Admin socket path (for board-admin CLI)
    pub admin_socket: PathBuf,

    pub store: StoreKind,

    pub vote_window_epochs: u64,
    pub quorum: u64,
    pub approval_fraction: f64,
    pub base_fee_per_cell_wei: Wei,
    pub max_cells_per_rect: u64,
    pub tile_size: i64,

    pub epoch_seconds: u64,
    pub epoch_zero_unix: u64,

    /// Epochs a closed proposal is kept after its window ends
    pub gc_retention_epochs: u64,

    /// Bound on manifest upload and ledger submission
    pub io_timeout: Duration,

    /// Fall back to `dev-manifest-epoch-<n>` when uploads fail
    pub allow_synthetic_cid: bool,

    pub precheck_displacement: bool,

    /// Run the epoch scheduler
    pub auto_finalize: bool,

    /// Manifest JSON seeded as the starting board
    pub genesis_manifest: Option<PathBuf>,
}

impl Default for BoardConfig {
    fn default() -> Self {
        let data_dir = PathBuf::from("./board-data");
        Self {
            admin_socket: data_dir.join("admin.sock"),
            data_dir,
            api_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            store: StoreKind::RocksDb,
            vote_window_epochs: 2,
            quorum: 5,
            approval_fraction: 0.51,
            base_fee_per_cell_wei: Wei::ZERO,
            max_cells_per_rect: 400,
            tile_size: mosaic_geometry::TILE,
            epoch_seconds: 3600,
            epoch_zero_unix: 1_730_937_600,
            gc_retention_epochs: 24,
            io_timeout: Duration::from_secs(30),
            allow_synthetic_cid: false,
            precheck_displacement: true,
            auto_finalize: true,
            genesis_manifest: None,
        }
    }
}

fn parse_var<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, name: &str, default: T) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    match lookup(name) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map_err(|e| Error::Config(format!("invalid {}={:?}: {}", name, raw, e))),
        _ => Ok(default),
    }
}

fn parse_flag(lookup: &impl Fn(&str) -> Option<String>, name: &str, default: bool) -> Result<bool> {
    match lookup(name).map(|v| v.trim().to_ascii_lowercase()) {
        None => Ok(default),
        Some(v) => match v.as_str() {
            "" => Ok(default),
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(Error::Config(format!("invalid {}={:?}: expected a boolean", name, v))),
        },
    }
}

impl BoardConfig {
    /// Create config from environment variables with sensible defaults.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Create config from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let d = Self::default();

        let data_dir = lookup("BOARD_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or(d.data_dir);
        let admin_socket = lookup("BOARD_ADMIN_SOCKET")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("admin.sock"));

        let config = Self {
            api_addr: parse_var(&lookup, "BOARD_API_ADDR", d.api_addr)?,
            store: parse_var(&lookup, "BOARD_STORE", d.store)?,
            vote_window_epochs: parse_var(&lookup, "BOARD_VOTE_WINDOW_EPOCHS", d.vote_window_epochs)?,
            quorum: parse_var(&lookup, "BOARD_QUORUM", d.quorum)?,
            approval_fraction: parse_var(&lookup, "BOARD_APPROVAL_FRACTION", d.approval_fraction)?,
            base_fee_per_cell_wei: parse_var(&lookup, "BOARD_BASE_FEE_PER_CELL_WEI", d.base_fee_per_cell_wei)?,
            max_cells_per_rect: parse_var(&lookup, "BOARD_MAX_CELLS_PER_RECT", d.max_cells_per_rect)?,
            tile_size: parse_var(&lookup, "BOARD_TILE_SIZE", d.tile_size)?,
            epoch_seconds: parse_var(&lookup, "BOARD_EPOCH_SECONDS", d.epoch_seconds)?,
            epoch_zero_unix: parse_var(&lookup, "BOARD_EPOCH_ZERO_UNIX", d.epoch_zero_unix)?,
            gc_retention_epochs: parse_var(&lookup, "BOARD_GC_RETENTION_EPOCHS", d.gc_retention_epochs)?,
            io_timeout: Duration::from_secs(parse_var(&lookup, "BOARD_IO_TIMEOUT_SECS", d.io_timeout.as_secs())?),
            allow_synthetic_cid: parse_flag(&lookup, "BOARD_ALLOW_SYNTHETIC_CID", d.allow_synthetic_cid)?,
            precheck_displacement: parse_flag(&lookup, "BOARD_PRECHECK_DISPLACEMENT", d.precheck_displacement)?,
            auto_finalize: parse_flag(&lookup, "BOARD_AUTO_FINALIZE", d.auto_finalize)?,
            genesis_manifest: lookup("BOARD_GENESIS_MANIFEST")
                .filter(|s| !s.trim().is_empty())
                .map(PathBuf::from),
            data_dir,
            admin_socket,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.tile_size <= 0 {
            return Err(Error::Config(format!("tile size must be positive, got {}", self.tile_size)));
        }
        if self.epoch_seconds == 0 {
            return Err(Error::Config("epoch length must be positive".into()));
        }
        if self.max_cells_per_rect == 0 {
            return Err(Error::Config("max cells per rect must be positive".into()));
        }
        self.referendum_rules().map(|_| ())
    }

    pub fn ledger_policy(&self) -> LedgerPolicy {
        LedgerPolicy {
            vote_window_epochs: self.vote_window_epochs,
            max_cells_per_rect: self.max_cells_per_rect,
            tile: self.tile_size,
            base_fee_per_cell_wei: self.base_fee_per_cell_wei,
            precheck_displacement: self.precheck_displacement,
            gc_retention_epochs: self.gc_retention_epochs,
        }
    }

    pub fn referendum_rules(&self) -> Result<ReferendumRules> {
        ReferendumRules::new(self.quorum, self.approval_fraction)
            .map_err(|e| Error::Config(e.to_string()))
    }

    pub fn epoch_clock(&self) -> EpochClock {
        EpochClock::new(self.epoch_zero_unix, self.epoch_seconds)
    }
}

/// Shared state for the board node - one ledger shared by all components.
pub struct BoardState {
    pub ledger: Arc<ProposalLedger>,
    pub closer: Arc<EpochCloser>,
    /// Process-local stand-in for the external ledger
    pub chain: Arc<InMemoryLedger>,
    pub clock: Arc<dyn Clock>,
    pub epochs: EpochClock,
    pub config: BoardConfig,
}

impl BoardState {
    /// Wire the components together over the given backends.
    pub fn new(
        config: BoardConfig,
        store: Arc<dyn LedgerStore>,
        content: Arc<dyn ContentStore>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;
        let ledger = Arc::new(ProposalLedger::new(store, config.ledger_policy()));

        let operator = ledger.operator_key()?;
        let chain = Arc::new(InMemoryLedger::new(operator.verifying_key()));
        let committer = FinalizationCommitter::new(chain.clone(), operator, config.io_timeout);
        let builder = ManifestBuilder::new(content, config.allow_synthetic_cid, config.io_timeout);

        let epochs = config.epoch_clock();
        let closer = Arc::new(EpochCloser::new(
            Arc::clone(&ledger),
            config.referendum_rules()?,
            builder,
            committer,
            Arc::clone(&clock),
            epochs,
        ));

        Ok(Self {
            ledger,
            closer,
            chain,
            clock,
            epochs,
            config,
        })
    }

    pub fn current_epoch(&self) -> u64 {
        self.epochs.current(self.clock.as_ref())
    }

    /// Seed the ledger from a genesis manifest file, once.
    pub async fn seed_genesis_from(&self, path: &std::path::Path) -> Result<bool> {
        let bytes = tokio::fs::read(path).await?;
        let manifest = Manifest::from_bytes(&bytes)?;
        for p in &manifest.placements {
            mosaic_geometry::cell_count(&p.rect, self.config.tile_size)?;
        }
        let content_id = self.closer.builder().persist(&manifest).await?;
        let hash = content_hash(&manifest.canonical_bytes()?);
        self.ledger.seed_genesis(ManifestRecord {
            manifest,
            content_id,
            hash,
            receipt: None,
        })
    }
}

/// Record every `Finalized` event the external ledger emits.
///
/// Returns the number of events seen once the ledger goes away.
pub(crate) async fn log_ledger_events(mut events: broadcast::Receiver<FinalizedEvent>) -> usize {
    let mut seen = 0;
    loop {
        match events.recv().await {
            Ok(ev) => {
                seen += 1;
                tracing::info!(
                    epoch = ev.epoch,
                    hash = %ev.manifest_hash,
                    content_id = %ev.content_id,
                    tx = %ev.tx_id,
                    "Ledger emitted Finalized"
                );
            }
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                tracing::warn!(missed, "Ledger event log fell behind");
            }
            Err(broadcast::error::RecvError::Closed) => return seen,
        }
    }
}

/// A board node instance.
pub struct BoardNode {
    state: Arc<BoardState>,
    config: BoardConfig,
}

impl BoardNode {
    /// Create a new board node.
    pub async fn new(config: BoardConfig) -> Result<Self> {
        // Ensure data directory exists
        std::fs::create_dir_all(&config.data_dir)?;

        let store: Arc<dyn LedgerStore> = match config.store {
            StoreKind::RocksDb => Arc::new(RocksStore::open(config.data_dir.join("ledger"))?),
            StoreKind::Memory => Arc::new(MemoryStore::new()),
        };
        let content = Arc::new(FsContentStore::open(config.data_dir.join("manifests"))?);

        let state = Arc::new(BoardState::new(
            config.clone(),
            store,
            content,
            Arc::new(SystemClock),
        )?);

        if let Some(path) = &config.genesis_manifest {
            if state.seed_genesis_from(path).await? {
                tracing::info!("Genesis manifest loaded from {:?}", path);
            }
        }

        Ok(Self { state, config })
    }

    /// Get the shared state (for API handlers).
    pub fn state(&self) -> Arc<BoardState> {
        Arc::clone(&self.state)
    }

    /// Run the node (starts HTTP server, admin socket, and epoch scheduler).
    pub async fn run(self) -> Result<()> {
        tracing::info!("Board node starting");
        tracing::info!("  API: http://{}", self.config.api_addr);
        tracing::info!("  Admin: {:?}", self.config.admin_socket);
        tracing::info!("  Data: {:?} ({:?})", self.config.data_dir, self.config.store);
        tracing::info!(
            "  Epoch: {} (length {}s)",
            self.state.current_epoch(),
            self.config.epoch_seconds
        );

        // Start admin socket server in background
        let admin_socket = AdminSocket::new(self.state(), &self.config.admin_socket);
        tokio::spawn(async move {
            if let Err(e) = admin_socket.run().await {
                tracing::error!("Admin socket error: {}", e);
            }
        });

        tokio::spawn(log_ledger_events(self.state.chain.subscribe()));

        if self.config.auto_finalize {
            tokio::spawn(Arc::clone(&self.state.closer).run_scheduler());
        } else {
            tracing::info!("Epoch scheduler disabled; finalize manually");
        }

        // Build HTTP API
        let app = api::build_router(self.state());

        // Start HTTP server
        let listener = tokio::net::TcpListener::bind(self.config.api_addr).await?;
        tracing::info!("HTTP server listening on {}", self.config.api_addr);

        axum::serve(listener, app).await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ContentId, ManifestHash};
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name: &str| map.get(name).cloned()
    }

    #[test]
    fn defaults() {
        let c = BoardConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(c.quorum, 5);
        assert_eq!(c.approval_fraction, 0.51);
        assert_eq!(c.vote_window_epochs, 2);
        assert_eq!(c.max_cells_per_rect, 400);
        assert_eq!(c.tile_size, 32);
        assert_eq!(c.epoch_seconds, 3600);
        assert_eq!(c.epoch_zero_unix, 1_730_937_600);
        assert_eq!(c.store, StoreKind::RocksDb);
        assert_eq!(c.admin_socket, PathBuf::from("./board-data/admin.sock"));
        assert!(c.auto_finalize && c.precheck_displacement && !c.allow_synthetic_cid);
    }

    #[test]
    fn overrides() {
        let c = BoardConfig::from_lookup(lookup(&[
            ("BOARD_DATA_DIR", "/tmp/b"),
            ("BOARD_STORE", "memory"),
            ("BOARD_QUORUM", "3"),
            ("BOARD_BASE_FEE_PER_CELL_WEI", "1000000000"),
            ("BOARD_ALLOW_SYNTHETIC_CID", "true"),
            ("BOARD_AUTO_FINALIZE", "0"),
            ("BOARD_IO_TIMEOUT_SECS", "5"),
        ]))
        .unwrap();
        assert_eq!(c.admin_socket, PathBuf::from("/tmp/b/admin.sock"));
        assert_eq!(c.store, StoreKind::Memory);
        assert_eq!(c.quorum, 3);
        assert_eq!(c.base_fee_per_cell_wei, Wei(1_000_000_000));
        assert!(c.allow_synthetic_cid);
        assert!(!c.auto_finalize);
        assert_eq!(c.io_timeout, Duration::from_secs(5));
        assert_eq!(c.ledger_policy().base_fee_per_cell_wei, Wei(1_000_000_000));
    }

    #[test]
    fn bad_values_are_config_errors() {
        for vars in [
            [("BOARD_QUORUM", "five")],
            [("BOARD_APPROVAL_FRACTION", "1.5")],
            [("BOARD_TILE_SIZE", "0")],
            [("BOARD_STORE", "postgres")],
            [("BOARD_AUTO_FINALIZE", "maybe")],
            [("BOARD_API_ADDR", "nowhere")],
        ] {
            assert!(
                matches!(BoardConfig::from_lookup(lookup(&vars)), Err(Error::Config(_))),
                "{:?} should fail",
                vars
            );
        }
    }

    #[tokio::test]
    async fn genesis_manifest_seeds_accepted_set() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("genesis.json");
        std::fs::write(
            &path,
            r#"{"epoch":0,"finalizedAt":0,"placements":[
                {"id":"g1","owner":"o","cid":"c","rect":{"x":0,"y":0,"w":64,"h":64},"cells":4,"bidPerCellWei":"5"}
            ]}"#,
        )
        .unwrap();

        let state = BoardState::new(
            BoardConfig::default(),
            Arc::new(MemoryStore::new()),
            Arc::new(crate::manifest::MemoryContentStore::new()),
            Arc::new(crate::epoch::ManualClock::new(0)),
        )
        .unwrap();

        assert!(state.seed_genesis_from(&path).await.unwrap());
        assert!(!state.seed_genesis_from(&path).await.unwrap());
        let accepted = state.ledger.accepted_set().unwrap();
        assert_eq!(accepted.len(), 1);
        assert_eq!(accepted[0].bid_per_cell_wei, Wei(5));
    }

    #[tokio::test]
    async fn ledger_event_log_drains_until_closed() {
        let (tx, rx) = broadcast::channel(4);
        let watcher = tokio::spawn(log_ledger_events(rx));
        tx.send(FinalizedEvent {
            epoch: 3,
            manifest_hash: ManifestHash([7u8; 32]),
            content_id: ContentId("cid-3".into()),
            tx_id: "tx-3".into(),
        })
        .unwrap();
        drop(tx);
        assert_eq!(watcher.await.unwrap(), 1);
    }
}
