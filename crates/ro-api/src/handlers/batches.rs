use axum::{
    Json,
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
};
use ro_common::api::{LaunchCampaignRequest, LaunchCampaignResponse, StopCampaignResponse};
use ro_common::dispatch::BatchView;
use ro_common::models::BatchJob;

use crate::SharedState;
use crate::auth::AuthUser;
use crate::error::ApiError;

pub async fn launch_campaign(
    State(state): State<SharedState>,
    Path(campaign_id): Path<String>,
    _auth: AuthUser,
    body: Bytes,
) -> Result<(StatusCode, Json<LaunchCampaignResponse>), ApiError> {
    let request = parse_launch_request(&body)?;
    if request.candidate_ids.as_ref().is_some_and(Vec::is_empty) {
        return Err(ApiError::BadRequest("candidate_ids must not be empty".into()));
    }

    let launched = state
        .launcher
        .launch(&campaign_id, request.candidate_ids.as_deref())
        .await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(LaunchCampaignResponse {
            campaign_id,
            batch_id: launched.batch_id,
        }),
    ))
}

/// An empty body launches every uncalled candidate; anything else must be a
/// valid request, since a misread candidate list would dial the whole campaign.
fn parse_launch_request(body: &[u8]) -> Result<LaunchCampaignRequest, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(LaunchCampaignRequest::default());
    }
    serde_json::from_slice(body)
        .map_err(|err| ApiError::BadRequest(format!("invalid launch request: {err}")))
}

pub async fn stop_campaign(
    State(state): State<SharedState>,
    Path(campaign_id): Path<String>,
    _auth: AuthUser,
) -> Result<Json<StopCampaignResponse>, ApiError> {
    let cancelled_batches = state
        .launcher
        .dispatcher()
        .stop_campaign(&campaign_id)
        .await?;
    Ok(Json(StopCampaignResponse {
        campaign_id,
        cancelled_batches,
    }))
}

pub async fn get_batch(
    State(state): State<SharedState>,
    Path(batch_id): Path<String>,
    _auth: AuthUser,
) -> Result<Json<BatchView>, ApiError> {
    let view = state.launcher.dispatcher().get_batch(&batch_id).await?;
    Ok(Json(view))
}

pub async fn cancel_batch(
    State(state): State<SharedState>,
    Path(batch_id): Path<String>,
    _auth: AuthUser,
) -> Result<Json<BatchJob>, ApiError> {
    let batch = state.launcher.dispatcher().cancel_batch(&batch_id).await?;
    Ok(Json(batch))
}
