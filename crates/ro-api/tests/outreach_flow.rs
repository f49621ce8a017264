use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    body::Body,
    http::{Method, Request, StatusCode},
};
use http_body_util::BodyExt;
use ro_common::models::{
    CallStatus, Campaign, CampaignCandidate, KanbanColumn, PipelineCandidate,
};
use ro_common::store::{MemoryStore, OutreachStore};
use ro_common::voice::FakeVoiceProvider;
use serde_json::{Value, json};
use tower::ServiceExt;

const KEY: &str = "test-key";

fn seeded() -> (Arc<MemoryStore>, Arc<FakeVoiceProvider>, Router) {
    let store = Arc::new(MemoryStore::new());
    let mut campaign = Campaign::new("camp", "Evening pickers");
    campaign.job_id = Some("job".into());
    store.insert_campaign(campaign);
    for (id, phone) in [("cand-a", "+15550001"), ("cand-b", "+15550002")] {
        let mut candidate = CampaignCandidate::new(id, "camp", "Test", id);
        candidate.phone = Some(phone.into());
        store.insert_campaign_candidate(candidate);
    }

    store.insert_job("job", 0);
    for (position, key) in ["applied", "interested", "interview", "hired"]
        .into_iter()
        .enumerate()
    {
        store.insert_column(KanbanColumn {
            id: format!("col-{key}"),
            job_id: "job".into(),
            title: key.to_string(),
            status_key: key.to_string(),
            position: position as i32,
            is_post_hire: false,
        });
    }
    let mut pipeline = PipelineCandidate::new("p-a", "job", "applied");
    pipeline.phone = Some("+1 555 0001".into());
    store.insert_pipeline_candidate(pipeline);

    let provider = Arc::new(FakeVoiceProvider::new());
    let state = ro_api::test_state_with(KEY, store.clone(), provider.clone());
    (store, provider, ro_api::create_router(state))
}

async fn call(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if !uri.starts_with("/webhooks") {
        builder = builder.header("x-api-key", KEY);
    }
    let body = match body {
        Some(json) => {
            builder = builder.header("content-type", "application/json");
            Body::from(json.to_string())
        }
        None => Body::empty(),
    };
    let response = app
        .clone()
        .oneshot(builder.body(body).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
}

async fn wait_for_batch(app: &Router, batch_id: &str) -> Value {
    for _ in 0..200 {
        let (_, body) = call(app, Method::GET, &format!("/api/batches/{batch_id}"), None).await;
        if body["batch"]["status"] == "completed" {
            return body;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("batch {batch_id} did not complete");
}

fn event(kind: &str, call_id: &str, candidate_id: &str) -> Value {
    json!({
        "event": kind,
        "call": {
            "call_id": call_id,
            "start_timestamp": 1_714_564_800_000_i64,
            "end_timestamp": 1_714_564_860_000_i64,
            "metadata": {"campaign_id": "camp", "candidate_id": candidate_id}
        },
        "call_analysis": {
            "call_summary": "Interested in the role. Can start next week.",
            "in_voicemail": false,
            "post_call_analysis_data": {"interested": "Yes", "available_to_work": "true"}
        }
    })
}

#[tokio::test]
async fn launch_calls_and_webhooks_update_only_the_called_candidate() {
    let (store, provider, app) = seeded();

    let (status, launched) = call(&app, Method::POST, "/api/campaigns/camp/launch", None).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let batch_id = launched["batch_id"].as_str().unwrap().to_string();

    let view = wait_for_batch(&app, &batch_id).await;
    assert_eq!(view["batch"]["completed_calls"], 2);
    assert_eq!(view["calls"].as_array().unwrap().len(), 2);
    assert_eq!(provider.agents_created(), 1);

    let call_a = FakeVoiceProvider::call_id_for("+15550001");
    for kind in ["call_started", "call_ended", "call_analyzed"] {
        let (status, ack) = call(
            &app,
            Method::POST,
            "/webhooks/voice",
            Some(event(kind, &call_a, "cand-a")),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(ack["outcome"], "processed", "{kind}");
    }

    let a = store.get_campaign_candidate("cand-a").await.unwrap().unwrap();
    let b = store.get_campaign_candidate("cand-b").await.unwrap().unwrap();
    assert_eq!(a.call_status, CallStatus::Contacted);
    assert_eq!(a.interested, Some(true));
    assert_eq!(a.available_to_work, Some(true));
    assert_eq!(b.call_status, CallStatus::NotCalled);
    assert_eq!(b.interested, None);

    let (status, summary) = call(&app, Method::POST, "/api/jobs/job/reconcile", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(summary["updated"], 1);
    let pipeline = store.get_pipeline_candidate("p-a").await.unwrap().unwrap();
    assert_eq!(pipeline.status, "interested");
}

#[tokio::test]
async fn manual_moves_stick_until_the_override_is_cleared() {
    let (store, _provider, app) = seeded();

    let (status, moved) = call(
        &app,
        Method::POST,
        "/api/pipeline/candidates/p-a/move",
        Some(json!({"status": "hired"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(moved["from"], "applied");
    assert_eq!(moved["manual_override"], true);

    let (_, hired) = call(&app, Method::GET, "/api/jobs/job/hired", None).await;
    assert_eq!(hired["hired_count"], 1);

    let (status, _) = call(
        &app,
        Method::POST,
        "/api/pipeline/candidates/p-a/move",
        Some(json!({"status": "offer"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = call(
        &app,
        Method::DELETE,
        "/api/pipeline/candidates/p-a/override",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let pipeline = store.get_pipeline_candidate("p-a").await.unwrap().unwrap();
    assert!(!pipeline.manual_override);

    let (_, recomputed) = call(&app, Method::POST, "/api/jobs/job/hired/recompute", None).await;
    assert_eq!(recomputed["hired_count"], 1);
}

#[tokio::test]
async fn stopping_a_campaign_pauses_it() {
    let (store, _provider, app) = seeded();

    let (status, body) = call(&app, Method::POST, "/api/campaigns/camp/stop", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["cancelled_batches"], json!([]));
    let campaign = store.get_campaign("camp").await.unwrap().unwrap();
    assert_eq!(campaign.status.as_str(), "paused");

    let (status, _) = call(&app, Method::POST, "/api/campaigns/missing/stop", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn sync_can_be_started_and_stopped_per_job() {
    let (_store, _provider, app) = seeded();

    let (status, body) = call(
        &app,
        Method::POST,
        "/api/jobs/job/sync/start",
        Some(json!({"interval_secs": 3600})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["running"], true);

    let (status, _) = call(
        &app,
        Method::POST,
        "/api/jobs/job/sync/start",
        Some(json!({"interval_secs": 0})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = call(&app, Method::POST, "/api/jobs/job/sync/stop", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["running"], false);
}

#[tokio::test]
async fn malformed_launch_body_dials_nobody() {
    let (store, provider, app) = seeded();

    let (status, body) = call(
        &app,
        Method::POST,
        "/api/campaigns/camp/launch",
        Some(json!({"candidate_ids": "cand-a"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "bad_request");

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method(Method::POST)
                .uri("/api/campaigns/camp/launch")
                .header("x-api-key", KEY)
                .header("content-type", "application/json")
                .body(Body::from(r#"{"candidate_ids": ["cand-a""#))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(provider.call_count(), 0);
    assert!(store.call_records().is_empty());
}
