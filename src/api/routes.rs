//! HTTP route handlers.
//!
//! All endpoints return JSON. Protected handlers verify the shared secret
//! before doing anything else. The wall clock is read here and passed down.

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

use super::auth::CronAuth;
use crate::draft_window::{self, WindowInfo};
use crate::engine::lifecycle::{DistributionOutcome, RankingReport, TransitionOutcome};
use crate::engine::orchestrator::{BatchReport, CronOrchestrator, RoundFailure};
use crate::prizes::PrizePreview;
use crate::types::{EntryStatus, PrizeRecord, Roster, SettlementError};

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

pub struct ApiState {
    pub orchestrator: CronOrchestrator,
    pub auth: CronAuth,
}

pub type AppState = Arc<ApiState>;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Error body: `{"error": "...", "kind": "..."}`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    kind: String,
    message: String,
}

impl ApiError {
    fn not_found(kind: &str, message: String) -> Self {
        Self { status: StatusCode::NOT_FOUND, kind: kind.to_string(), message }
    }
}

impl From<SettlementError> for ApiError {
    fn from(e: SettlementError) -> Self {
        let status = match &e {
            SettlementError::Unauthorized => StatusCode::UNAUTHORIZED,
            SettlementError::RoundNotFound(_) | SettlementError::EntryNotFound(_) => {
                StatusCode::NOT_FOUND
            }
            SettlementError::NotEligible { .. }
            | SettlementError::AlreadyLocked(_)
            | SettlementError::AlreadyDistributed(_) => StatusCode::CONFLICT,
            SettlementError::MalformedRoster { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            SettlementError::UpstreamUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            SettlementError::Persistence(_) | SettlementError::Config(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        if status.is_server_error() {
            tracing::error!(error = %e, "Request failed");
        }
        Self { status, kind: e.kind().to_string(), message: e.to_string() }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message, "kind": self.kind }))).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct StartBatchResponse {
    pub started: Vec<String>,
    pub already_processed: Vec<String>,
    pub errors: Vec<RoundFailure>,
    pub duration_ms: u64,
}

#[derive(Debug, Serialize)]
pub struct EndBatchResponse {
    pub ended: Vec<String>,
    pub already_processed: Vec<String>,
    pub errors: Vec<RoundFailure>,
    pub duration_ms: u64,
}

impl From<BatchReport> for StartBatchResponse {
    fn from(r: BatchReport) -> Self {
        Self {
            started: r.succeeded,
            already_processed: r.already_processed,
            errors: r.errors,
            duration_ms: r.duration_ms,
        }
    }
}

impl From<BatchReport> for EndBatchResponse {
    fn from(r: BatchReport) -> Self {
        Self {
            ended: r.succeeded,
            already_processed: r.already_processed,
            errors: r.errors,
            duration_ms: r.duration_ms,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct TransitionResponse {
    pub round_id: String,
    pub outcome: TransitionOutcome,
}

#[derive(Debug, Deserialize)]
pub struct RankingQuery {
    #[serde(default)]
    pub live: bool,
}

#[derive(Debug, Deserialize)]
pub struct RosterSubmission {
    pub participant_id: String,
    pub name: String,
    pub symbols: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct EntryConfirmation {
    #[serde(default)]
    pub payment_ref: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct EntryResponse {
    pub entry_id: String,
    pub status: EntryStatus,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let cron_auth = state.auth.is_configured();
    match state.orchestrator.lifecycle().store().ping().await {
        Ok(()) => (StatusCode::OK, Json(json!({ "status": "ok", "cron_auth": cron_auth }))),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "status": "degraded", "cron_auth": cron_auth, "error": e.to_string() })),
        ),
    }
}

pub async fn cron_start(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<StartBatchResponse> {
    state.auth.verify(&headers)?;
    let report = state.orchestrator.start_due_rounds(Utc::now()).await?;
    Ok(Json(report.into()))
}

pub async fn cron_end(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<EndBatchResponse> {
    state.auth.verify(&headers)?;
    let report = state.orchestrator.end_due_rounds(Utc::now()).await?;
    Ok(Json(report.into()))
}

pub async fn admin_start_round(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(round_id): Path<String>,
) -> ApiResult<TransitionResponse> {
    state.auth.verify(&headers)?;
    let outcome = state.orchestrator.lifecycle().start_round(&round_id, Utc::now()).await?;
    Ok(Json(TransitionResponse { round_id, outcome }))
}

pub async fn admin_open_draft(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(round_id): Path<String>,
) -> ApiResult<TransitionResponse> {
    state.auth.verify(&headers)?;
    let outcome = state.orchestrator.lifecycle().open_draft(&round_id, Utc::now()).await?;
    Ok(Json(TransitionResponse { round_id, outcome }))
}

pub async fn admin_end_round(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(round_id): Path<String>,
) -> ApiResult<TransitionResponse> {
    state.auth.verify(&headers)?;
    let outcome = state.orchestrator.lifecycle().end_round(&round_id, Utc::now()).await?;
    Ok(Json(TransitionResponse { round_id, outcome }))
}

pub async fn admin_distribute(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(round_id): Path<String>,
) -> ApiResult<DistributionOutcome> {
    state.auth.verify(&headers)?;
    let outcome = state
        .orchestrator
        .lifecycle()
        .distribute_prizes(&round_id, Utc::now())
        .await?;
    Ok(Json(outcome))
}

pub async fn admin_confirm_entry(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(entry_id): Path<String>,
    body: Option<Json<EntryConfirmation>>,
) -> ApiResult<EntryResponse> {
    state.auth.verify(&headers)?;
    let Json(body) = body.unwrap_or_default();
    let status = state
        .orchestrator
        .lifecycle()
        .confirm_entry(&entry_id, body.payment_ref.as_deref())
        .await?;
    Ok(Json(EntryResponse { entry_id, status }))
}

pub async fn submit_roster(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(round_id): Path<String>,
    Json(body): Json<RosterSubmission>,
) -> ApiResult<Roster> {
    state.auth.verify(&headers)?;
    let roster = state
        .orchestrator
        .lifecycle()
        .submit_roster(&round_id, &body.participant_id, &body.name, body.symbols, Utc::now())
        .await?;
    Ok(Json(roster))
}

pub async fn get_ranking(
    State(state): State<AppState>,
    Path(round_id): Path<String>,
    Query(query): Query<RankingQuery>,
) -> ApiResult<RankingReport> {
    let report = state
        .orchestrator
        .lifecycle()
        .compute_ranking(&round_id, query.live, Utc::now())
        .await?;
    Ok(Json(report))
}

pub async fn get_prizes(
    State(state): State<AppState>,
    Path(round_id): Path<String>,
) -> ApiResult<PrizePreview> {
    let preview = state
        .orchestrator
        .lifecycle()
        .calculate_prize_distribution(&round_id)
        .await?;
    Ok(Json(preview))
}

pub async fn get_prize_record(
    State(state): State<AppState>,
    Path(round_id): Path<String>,
) -> ApiResult<PrizeRecord> {
    match state.orchestrator.lifecycle().prize_record(&round_id).await? {
        Some(record) => Ok(Json(record)),
        None => Err(ApiError::not_found(
            "prize_record_not_found",
            format!("No prize record for round {round_id}"),
        )),
    }
}

pub async fn get_draft_window() -> Json<WindowInfo> {
    Json(draft_window::window_info(Utc::now()))
}
