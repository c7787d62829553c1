//! Unix socket server for admin commands.
//!
//! Provides a local IPC interface for operators: status, forced or
//! targeted epoch closes, GC, and candidate inspection.

use crate::error::Result;
use crate::finalize::{FinalizeOutcome, FinalizeRequest};
use crate::node::BoardState;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};

/// Admin command sent over the socket.
#[derive(Debug, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum AdminCommand {
    /// Ping (health check)
    Ping,
    /// Current epoch and ledger summary
    Status,
    /// Close an epoch now
    Finalize {
        #[serde(default)]
        force: bool,
        #[serde(default)]
        epoch: Option<u64>,
    },
    /// Expire and drop stale proposals
    Gc,
    /// Proposals due for the current epoch's close
    Candidates,
}

/// Response from admin command.
#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AdminResponse {
    Ok { message: String },
    Error { error: String },
    List { items: Vec<String> },
    Status {
        epoch: u64,
        seconds_left: u64,
        proposals: usize,
        accepted: usize,
        latest_finalized_epoch: Option<u64>,
    },
    Pong,
}

/// Admin socket server.
pub struct AdminSocket {
    state: Arc<BoardState>,
    socket_path: PathBuf,
}

impl AdminSocket {
    /// Create a new admin socket server.
    pub fn new(state: Arc<BoardState>, socket_path: impl AsRef<Path>) -> Self {
        Self {
            state,
            socket_path: socket_path.as_ref().to_path_buf(),
        }
    }

    /// Run the admin socket server.
    pub async fn run(&self) -> Result<()> {
        // Remove existing socket file if present
        let _ = std::fs::remove_file(&self.socket_path);

        let listener = UnixListener::bind(&self.socket_path)?;
        tracing::info!("Admin socket listening on {:?}", self.socket_path);

        loop {
            match listener.accept().await {
                Ok((stream, _)) => {
                    let state = Arc::clone(&self.state);
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, state).await {
                            tracing::error!("Admin connection error: {}", e);
                        }
                    });
                }
                Err(e) => {
                    tracing::error!("Failed to accept admin connection: {}", e);
                }
            }
        }
    }

    /// Get the socket path.
    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }
}

async fn handle_connection(stream: UnixStream, state: Arc<BoardState>) -> Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    while reader.read_line(&mut line).await? > 0 {
        let response = match serde_json::from_str::<AdminCommand>(&line) {
            Ok(cmd) => execute_command(cmd, &state).await,
            Err(e) => AdminResponse::Error {
                error: format!("Invalid command: {}", e),
            },
        };

        let response_json = serde_json::to_string(&response)? + "\n";
        writer.write_all(response_json.as_bytes()).await?;
        line.clear();
    }

    Ok(())
}

fn error(e: impl std::fmt::Display) -> AdminResponse {
    AdminResponse::Error {
        error: e.to_string(),
    }
}

/// Proposal count, accepted count and latest finalized epoch.
fn ledger_summary(state: &BoardState) -> Result<(usize, usize, Option<u64>)> {
    Ok((
        state.ledger.list()?.len(),
        state.ledger.accepted_set()?.len(),
        state.ledger.latest_manifest()?.map(|r| r.epoch()),
    ))
}

pub(crate) async fn execute_command(cmd: AdminCommand, state: &BoardState) -> AdminResponse {
    match cmd {
        AdminCommand::Ping => AdminResponse::Pong,
        AdminCommand::Status => {
            match ledger_summary(state) {
                Ok((proposals, accepted, latest_finalized_epoch)) => AdminResponse::Status {
                    epoch: state.current_epoch(),
                    seconds_left: state.closer.seconds_left(),
                    proposals,
                    accepted,
                    latest_finalized_epoch,
                },
                Err(e) => error(e),
            }
        }
        AdminCommand::Finalize { force, epoch } => {
            match state.closer.finalize(FinalizeRequest { force, epoch }).await {
                Ok(FinalizeOutcome::Idle { epoch }) => AdminResponse::Ok {
                    message: format!("Epoch {}: nothing to finalize", epoch),
                },
                Ok(FinalizeOutcome::Finalized(s)) => {
                    tracing::info!("Admin finalized epoch {}", s.epoch);
                    AdminResponse::Ok {
                        message: format!(
                            "Epoch {} finalized: {} winner(s), {} rejected, {} evicted, {} accepted; manifest {} ({}), tx {}",
                            s.epoch,
                            s.winners.len(),
                            s.rejected.len(),
                            s.evicted.len(),
                            s.accepted,
                            s.content_id,
                            s.manifest_hash,
                            s.receipt.tx_id
                        ),
                    }
                }
                Err(e) => error(e),
            }
        }
        AdminCommand::Gc => match state.ledger.gc(state.current_epoch()) {
            Ok(report) => AdminResponse::Ok {
                message: format!(
                    "Expired {} proposal(s), dropped {}",
                    report.expired.len(),
                    report.dropped.len()
                ),
            },
            Err(e) => error(e),
        },
        AdminCommand::Candidates => match state.ledger.list_candidates(state.current_epoch(), false) {
            Ok(candidates) => AdminResponse::List {
                items: candidates
                    .into_iter()
                    .map(|p| {
                        format!(
                            "{} {} bid={} yes={} no={}",
                            p.id, p.rect, p.bid_per_cell_wei, p.yes, p.no
                        )
                    })
                    .collect(),
            },
            Err(e) => error(e),
        },
    }
}
