use std::time::Duration;

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use ro_common::api::{
    HiredCountResponse, MoveCandidateRequest, MoveCandidateResponse, ReconcileResponse,
    SyncStartRequest, SyncStatusResponse,
};

use crate::SharedState;
use crate::auth::AuthUser;
use crate::error::ApiError;

pub async fn reconcile_job(
    State(state): State<SharedState>,
    Path(job_id): Path<String>,
    _auth: AuthUser,
) -> Result<Json<ReconcileResponse>, ApiError> {
    let summary = state.engine.reconcile_job(&job_id).await?;
    Ok(Json(ReconcileResponse { job_id, summary }))
}

pub async fn hired_count(
    State(state): State<SharedState>,
    Path(job_id): Path<String>,
    _auth: AuthUser,
) -> Result<Json<HiredCountResponse>, ApiError> {
    let hired_count = state.engine.hired_count(&job_id).await?;
    Ok(Json(HiredCountResponse { job_id, hired_count }))
}

pub async fn recompute_hired(
    State(state): State<SharedState>,
    Path(job_id): Path<String>,
    _auth: AuthUser,
) -> Result<Json<HiredCountResponse>, ApiError> {
    let hired_count = state.engine.recompute_hired(&job_id).await?;
    Ok(Json(HiredCountResponse { job_id, hired_count }))
}

pub async fn start_sync(
    State(state): State<SharedState>,
    Path(job_id): Path<String>,
    _auth: AuthUser,
    body: Option<Json<SyncStartRequest>>,
) -> Result<Json<SyncStatusResponse>, ApiError> {
    let request = body.map(|Json(request)| request).unwrap_or_default();
    let interval = request
        .interval_secs
        .map(Duration::from_secs)
        .unwrap_or(state.config.reconcile_interval);

    state.scheduler.start(&job_id, interval).await?;
    Ok(Json(SyncStatusResponse {
        job_id,
        running: true,
    }))
}

pub async fn stop_sync(
    State(state): State<SharedState>,
    Path(job_id): Path<String>,
    _auth: AuthUser,
) -> Result<Json<SyncStatusResponse>, ApiError> {
    state.scheduler.stop(&job_id).await;
    Ok(Json(SyncStatusResponse {
        job_id,
        running: false,
    }))
}

pub async fn move_candidate(
    State(state): State<SharedState>,
    Path(candidate_id): Path<String>,
    _auth: AuthUser,
    Json(request): Json<MoveCandidateRequest>,
) -> Result<Json<MoveCandidateResponse>, ApiError> {
    let status = request.status.trim();
    if status.is_empty() {
        return Err(ApiError::BadRequest("status is required".into()));
    }

    let moved = state.engine.move_candidate(&candidate_id, status).await?;
    Ok(Json(MoveCandidateResponse {
        candidate_id: moved.candidate_id,
        from: moved.from,
        to: moved.to,
        manual_override: true,
    }))
}

pub async fn clear_override(
    State(state): State<SharedState>,
    Path(candidate_id): Path<String>,
    _auth: AuthUser,
) -> Result<StatusCode, ApiError> {
    state.engine.clear_override(&candidate_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
