//! WebSocket streaming of finalized epochs.
//!
//! Connect to `/api/v1/ws/finalized`. On connect the client receives a
//! `snapshot` with the current epoch and latest manifest, then one
//! `finalized` event per closed epoch and a `heartbeat` every 15 seconds.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use crate::committer::FinalizedEvent;
use crate::epoch::Clock;
use crate::node::BoardState;

const HEARTBEAT_SECS: u64 = 15;

/// WebSocket message types
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BoardEvent {
    /// State at connect time
    Snapshot {
        epoch: u64,
        seconds_left: u64,
        latest_finalized_epoch: Option<u64>,
        latest_manifest_hash: Option<String>,
    },
    /// An epoch was finalized
    Finalized(FinalizedEvent),
    /// Events were dropped because the client fell behind
    Lagged { missed: u64 },
    /// Heartbeat to keep connection alive
    Heartbeat { timestamp: u64, epoch: u64 },
}

/// WebSocket handler for finalized epochs
pub async fn ws_finalized_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<BoardState>>,
) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

fn snapshot(state: &BoardState) -> BoardEvent {
    let latest = match state.ledger.latest_manifest() {
        Ok(latest) => latest,
        Err(e) => {
            warn!("Failed to read latest manifest for snapshot: {}", e);
            None
        }
    };
    BoardEvent::Snapshot {
        epoch: state.current_epoch(),
        seconds_left: state.closer.seconds_left(),
        latest_finalized_epoch: latest.as_ref().map(|r| r.epoch()),
        latest_manifest_hash: latest.map(|r| r.hash.to_string()),
    }
}

async fn handle_socket(mut socket: WebSocket, state: Arc<BoardState>) {
    info!("WebSocket client connected for finalized events");

    // Subscribe before the snapshot so nothing falls in between
    let mut events = state.closer.subscribe();

    if let Err(e) = send_event(&mut socket, &snapshot(&state)).await {
        warn!("Failed to send initial snapshot: {}", e);
        return;
    }

    let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(HEARTBEAT_SECS));
    interval.tick().await;

    loop {
        tokio::select! {
            // Handle incoming messages from client
            msg = socket.recv() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        debug!("Received from client: {}", text);
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        info!("WebSocket client disconnected");
                        break;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if let Err(e) = socket.send(Message::Pong(data)).await {
                            warn!("Failed to send pong: {}", e);
                            break;
                        }
                    }
                    Some(Err(e)) => {
                        warn!("WebSocket error: {}", e);
                        break;
                    }
                    _ => {}
                }
            }
            event = events.recv() => {
                let out = match event {
                    Ok(ev) => BoardEvent::Finalized(ev),
                    Err(RecvError::Lagged(missed)) => BoardEvent::Lagged { missed },
                    Err(RecvError::Closed) => break,
                };
                if let Err(e) = send_event(&mut socket, &out).await {
                    warn!("Failed to send event: {}", e);
                    break;
                }
            }
            _ = interval.tick() => {
                let heartbeat = BoardEvent::Heartbeat {
                    timestamp: state.clock.now_secs(),
                    epoch: state.current_epoch(),
                };
                if let Err(e) = send_event(&mut socket, &heartbeat).await {
                    warn!("Failed to send heartbeat: {}", e);
                    break;
                }
            }
        }
    }
}

/// Send a board event over WebSocket
async fn send_event(socket: &mut WebSocket, event: &BoardEvent) -> Result<(), axum::Error> {
    let json = serde_json::to_string(event).map_err(axum::Error::new)?;
    socket.send(Message::Text(json)).await
}
