use axum::{Json, body::Bytes, extract::State};
use ro_common::api::{WebhookAck, WebhookPayload};
use serde_json::Value;
use tracing::{info, warn};

use crate::SharedState;
use crate::error::ApiError;

/// Inbound provider events. Anything carrying an `event` name is
/// acknowledged with 200 whatever happens downstream, so the provider never
/// retries into duplicate processing.
pub async fn voice(
    State(state): State<SharedState>,
    body: Bytes,
) -> Result<Json<WebhookAck>, ApiError> {
    let value: Value = serde_json::from_slice(&body)
        .map_err(|_| ApiError::BadRequest("request body must be a JSON object".into()))?;

    let has_event = value
        .get("event")
        .and_then(Value::as_str)
        .is_some_and(|event| !event.trim().is_empty());
    if !has_event {
        return Err(ApiError::BadRequest("missing event".into()));
    }

    let payload: WebhookPayload = match serde_json::from_value(value) {
        Ok(payload) => payload,
        Err(err) => {
            warn!(error = %err, "unreadable webhook payload");
            return Ok(Json(WebhookAck {
                received: true,
                outcome: "ignored".into(),
            }));
        }
    };

    let outcome = state.processor.handle_event(&payload).await;
    info!(
        event = %payload.event,
        call_id = payload.call_id().unwrap_or(""),
        outcome = outcome.as_str(),
        "webhook handled"
    );

    Ok(Json(WebhookAck {
        received: true,
        outcome: outcome.as_str().to_string(),
    }))
}
