//! HTTP API for the board.

use crate::epoch::Clock;
use crate::error::Error;
use crate::finalize::{FinalizeOutcome, FinalizeRequest};
use crate::models::{Manifest, ManifestRecord, Placement, Proposal, ProposalDraft, Receipt, Wei};
use crate::node::BoardState;
use crate::ws::ws_finalized_handler;
use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use mosaic_referendum::yes_votes_needed;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

type AppState = Arc<BoardState>;

/// Build the API router.
pub fn build_router(state: AppState) -> Router {
    // CORS layer for browser access
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Health (at root and under /api/v1 for compatibility)
        .route("/health", get(health))
        .route("/api/v1/health", get(health))
        .route("/ready", get(ready))
        // Proposals
        .route("/api/v1/proposals", get(list_proposals).post(create_proposal))
        .route("/api/v1/proposals/:id", get(get_proposal))
        .route("/api/v1/votes", post(cast_vote))
        // Epoch close and manifests
        .route("/api/v1/finalize", post(finalize))
        .route("/api/v1/manifest", get(get_manifest))
        .route("/api/v1/mempool", get(mempool))
        .route("/api/v1/status", get(status))
        .route("/api/v1/accepted", get(accepted))
        // WebSocket for finalized epochs
        .route("/api/v1/ws/finalized", get(ws_finalized_handler))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

// --- Errors ---

/// Error response body
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ErrorBody {
    error: String,
    code: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    require_greater_than_wei: Option<Wei>,
}

/// A board error rendered as a JSON response.
#[derive(Debug)]
pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        Self(e)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self(Error::Validation(rejection.body_text()))
    }
}

impl ApiError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match &self.0 {
            Error::Validation(_) | Error::Geometry(_) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
            Error::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            Error::Conflict(_) => (StatusCode::CONFLICT, "CONFLICT"),
            Error::BidTooLow { .. } => (StatusCode::CONFLICT, "BID_TOO_LOW"),
            Error::VotingClosed(_) => (StatusCode::CONFLICT, "VOTING_CLOSED"),
            Error::AlreadyFinalized(_) => (StatusCode::CONFLICT, "ALREADY_FINALIZED"),
            Error::UploadFailed(_) => (StatusCode::BAD_GATEWAY, "UPLOAD_FAILED"),
            Error::SubmissionFailed(_) => (StatusCode::BAD_GATEWAY, "SUBMISSION_FAILED"),
            Error::Reverted(_) => (StatusCode::BAD_GATEWAY, "REVERTED"),
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!("Request failed: {}", self.0);
        }
        let require_greater_than_wei = match &self.0 {
            Error::BidTooLow {
                require_greater_than,
            } => Some(*require_greater_than),
            _ => None,
        };
        let body = ErrorBody {
            error: self.0.to_string(),
            code,
            require_greater_than_wei,
        };
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

fn now_ms(state: &BoardState) -> u64 {
    state.clock.now_ms()
}

// --- Health endpoints ---

async fn health() -> &'static str {
    "OK"
}

async fn ready(State(state): State<AppState>) -> ApiResult<&'static str> {
    state.ledger.latest_manifest()?;
    Ok("OK")
}

// --- Proposal endpoints ---

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ProposalView {
    #[serde(flatten)]
    proposal: Proposal,
    seconds_left: u64,
    /// Bid over the whole rect
    total_bid_wei: Wei,
    /// Further yes votes that would let it pass; absent once closed or
    /// when no number of yes votes can
    #[serde(skip_serializing_if = "Option::is_none")]
    yes_votes_needed: Option<u64>,
}

impl ProposalView {
    fn new(state: &BoardState, proposal: Proposal) -> Self {
        let (seconds_left, yes_votes_needed) = if proposal.status.is_terminal() {
            (0, None)
        } else {
            (
                state
                    .epochs
                    .seconds_until_end_of(proposal.vote_ends_at_epoch, state.clock.now_secs()),
                yes_votes_needed(&proposal.tally(), state.closer.rules()),
            )
        };
        Self {
            total_bid_wei: proposal.bid_per_cell_wei.times_cells(proposal.cells),
            proposal,
            seconds_left,
            yes_votes_needed,
        }
    }
}

async fn list_proposals(State(state): State<AppState>) -> ApiResult<Json<Vec<ProposalView>>> {
    let proposals = state.ledger.list()?;
    Ok(Json(
        proposals
            .into_iter()
            .map(|p| ProposalView::new(&state, p))
            .collect(),
    ))
}

async fn get_proposal(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<ProposalView>> {
    let proposal = state
        .ledger
        .get(&id)?
        .ok_or_else(|| Error::NotFound(format!("proposal {}", id)))?;
    Ok(Json(ProposalView::new(&state, proposal)))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CreatedProposal {
    id: String,
    epoch_submitted: u64,
    vote_ends_at_epoch: u64,
}

async fn create_proposal(
    State(state): State<AppState>,
    body: Result<Json<ProposalDraft>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<CreatedProposal>)> {
    let Json(draft) = body?;
    let epoch = state.current_epoch();
    let proposal = state.ledger.submit(draft, epoch, now_ms(&state))?;
    Ok((
        StatusCode::CREATED,
        Json(CreatedProposal {
            id: proposal.id,
            epoch_submitted: proposal.epoch_submitted,
            vote_ends_at_epoch: proposal.vote_ends_at_epoch,
        }),
    ))
}

// --- Votes ---

/// `true`/`false` or `"yes"`/`"no"`.
#[derive(Deserialize)]
#[serde(untagged)]
enum VoteValue {
    Bool(bool),
    Text(String),
}

impl VoteValue {
    fn as_bool(&self) -> Result<bool, Error> {
        match self {
            VoteValue::Bool(b) => Ok(*b),
            VoteValue::Text(s) => match s.trim().to_ascii_lowercase().as_str() {
                "yes" => Ok(true),
                "no" => Ok(false),
                _ => Err(Error::Validation(format!("vote must be yes or no, got {:?}", s))),
            },
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct VoteRequest {
    proposal_id: String,
    voter: String,
    vote: VoteValue,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct VoteResponse {
    id: String,
    yes: u64,
    no: u64,
    voters: usize,
    percent_yes: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    yes_votes_needed: Option<u64>,
    unchanged: bool,
}

async fn cast_vote(
    State(state): State<AppState>,
    body: Result<Json<VoteRequest>, JsonRejection>,
) -> ApiResult<Json<VoteResponse>> {
    let Json(req) = body?;
    let yes = req.vote.as_bool()?;
    let outcome = state
        .ledger
        .vote(&req.proposal_id, &req.voter, yes, state.current_epoch())?;
    let p = outcome.proposal;
    let needed = if p.status.is_terminal() {
        None
    } else {
        yes_votes_needed(&p.tally(), state.closer.rules())
    };
    Ok(Json(VoteResponse {
        percent_yes: p.tally().approval(),
        yes_votes_needed: needed,
        voters: p.voters.len(),
        id: p.id,
        yes: p.yes,
        no: p.no,
        unchanged: outcome.unchanged,
    }))
}

// --- Finalize ---

#[derive(Deserialize)]
struct FinalizeParams {
    force: Option<String>,
    epoch: Option<u64>,
}

#[derive(Serialize)]
struct RejectedView {
    id: String,
    reason: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct FinalizeResponse {
    epoch: u64,
    idle: bool,
    manifest_content_id: Option<String>,
    manifest_hash: Option<String>,
    winners: Vec<String>,
    accepted: usize,
    rejected: Vec<RejectedView>,
    evicted: Vec<String>,
    tx_id: Option<String>,
}

async fn finalize(
    State(state): State<AppState>,
    Query(params): Query<FinalizeParams>,
) -> ApiResult<Json<FinalizeResponse>> {
    let force = matches!(params.force.as_deref(), Some("1") | Some("true"));
    let outcome = state
        .closer
        .finalize(FinalizeRequest {
            force,
            epoch: params.epoch,
        })
        .await?;

    let response = match outcome {
        FinalizeOutcome::Idle { epoch } => FinalizeResponse {
            epoch,
            idle: true,
            manifest_content_id: None,
            manifest_hash: None,
            winners: Vec::new(),
            accepted: state.ledger.accepted_set()?.len(),
            rejected: Vec::new(),
            evicted: Vec::new(),
            tx_id: None,
        },
        FinalizeOutcome::Finalized(s) => FinalizeResponse {
            epoch: s.epoch,
            idle: false,
            manifest_content_id: Some(s.content_id.to_string()),
            manifest_hash: Some(s.manifest_hash.to_string()),
            winners: s.winners,
            accepted: s.accepted,
            rejected: s
                .rejected
                .into_iter()
                .map(|r| RejectedView {
                    reason: r.reason.to_string(),
                    id: r.id,
                })
                .collect(),
            evicted: s.evicted,
            tx_id: Some(s.receipt.tx_id),
        },
    };
    Ok(Json(response))
}

// --- Manifest ---

#[derive(Deserialize)]
struct ManifestParams {
    epoch: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ManifestResponse {
    epoch: u64,
    content_id: String,
    /// Placeholder id from a development node whose upload failed
    synthetic: bool,
    hash: String,
    manifest: Manifest,
    receipt: Option<Receipt>,
    cell_size: i64,
    max_cells_per_piece: u64,
}

async fn get_manifest(
    State(state): State<AppState>,
    Query(params): Query<ManifestParams>,
) -> ApiResult<Json<ManifestResponse>> {
    let record: Option<ManifestRecord> = match params.epoch.as_deref().map(str::trim) {
        None | Some("") | Some("latest") => state.ledger.latest_manifest()?,
        Some(raw) => {
            let epoch: u64 = raw
                .parse()
                .map_err(|_| Error::Validation(format!("bad epoch {:?}", raw)))?;
            state.ledger.manifest(epoch)?
        }
    };
    let record = record.ok_or_else(|| Error::NotFound("manifest".into()))?;

    Ok(Json(ManifestResponse {
        epoch: record.epoch(),
        content_id: record.content_id.to_string(),
        synthetic: record.content_id.is_synthetic(),
        hash: record.hash.to_string(),
        manifest: record.manifest,
        receipt: record.receipt,
        cell_size: state.config.tile_size,
        max_cells_per_piece: state.config.max_cells_per_rect,
    }))
}

// --- Mempool / status / accepted ---

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct MempoolResponse {
    epoch: u64,
    count: usize,
    pending_cells: u64,
    base_fee_per_cell_wei: Wei,
    proposals: Vec<ProposalView>,
}

async fn mempool(State(state): State<AppState>) -> ApiResult<Json<MempoolResponse>> {
    let epoch = state.current_epoch();
    let pending = state.ledger.pending(epoch)?;
    let pending_cells = pending.iter().map(|p| p.cells).sum();
    Ok(Json(MempoolResponse {
        epoch,
        count: pending.len(),
        pending_cells,
        base_fee_per_cell_wei: state.config.base_fee_per_cell_wei,
        proposals: pending
            .into_iter()
            .map(|p| ProposalView::new(&state, p))
            .collect(),
    }))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusResponse {
    epoch: u64,
    seconds_left: u64,
    latest_finalized_epoch: Option<u64>,
    latest_manifest_content_id: Option<String>,
}

async fn status(State(state): State<AppState>) -> ApiResult<Json<StatusResponse>> {
    let latest = state.ledger.latest_manifest()?;
    Ok(Json(StatusResponse {
        epoch: state.current_epoch(),
        seconds_left: state.closer.seconds_left(),
        latest_finalized_epoch: latest.as_ref().map(|r| r.epoch()),
        latest_manifest_content_id: latest.map(|r| r.content_id.to_string()),
    }))
}

#[derive(Serialize)]
struct AcceptedResponse {
    count: usize,
    placements: Vec<Placement>,
}

async fn accepted(State(state): State<AppState>) -> ApiResult<Json<AcceptedResponse>> {
    let placements = state.ledger.accepted_set()?;
    Ok(Json(AcceptedResponse {
        count: placements.len(),
        placements,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_status_mapping() {
        let cases = [
            (Error::Validation("x".into()), StatusCode::BAD_REQUEST),
            (Error::NotFound("x".into()), StatusCode::NOT_FOUND),
            (Error::VotingClosed("x".into()), StatusCode::CONFLICT),
            (Error::BidTooLow { require_greater_than: Wei(3) }, StatusCode::CONFLICT),
            (Error::AlreadyFinalized(2), StatusCode::CONFLICT),
            (Error::UploadFailed("x".into()), StatusCode::BAD_GATEWAY),
            (Error::Reverted("x".into()), StatusCode::BAD_GATEWAY),
            (Error::Storage("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError(err).status_and_code().0, status);
        }
    }

    #[test]
    fn vote_values() {
        let parse = |json: &str| serde_json::from_str::<VoteValue>(json).unwrap().as_bool();
        assert!(parse("true").unwrap());
        assert!(!parse("false").unwrap());
        assert!(parse("\"YES\"").unwrap());
        assert!(!parse("\"no\"").unwrap());
        assert!(parse("\"maybe\"").is_err());
    }
}
