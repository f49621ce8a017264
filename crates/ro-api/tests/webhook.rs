use axum::{
    body::Body,
    http::{Method, Request, StatusCode},
};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tower::ServiceExt;

fn post(body: &str) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri("/webhooks/voice")
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn send(request: Request<Body>) -> (StatusCode, Value) {
    let app = ro_api::create_router(ro_api::test_state("test-key"));
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

#[tokio::test]
async fn missing_event_is_a_bad_request() {
    let (status, body) = send(post(r#"{"call": {"call_id": "c-1"}}"#)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "bad_request");

    let (status, _) = send(post("not json")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn events_are_acknowledged_even_when_nothing_matches() {
    let (status, body) = send(post(
        &json!({"event": "call_started", "call": {"call_id": "unknown"}}).to_string(),
    ))
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["received"], true);
    assert_eq!(body["outcome"], "ignored");

    let (status, body) = send(post(r#"{"event": "transfer_started"}"#)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["outcome"], "ignored");

    // Wrongly typed fields still get a 200.
    let (status, _) = send(post(r#"{"event": "call_ended", "call": {"call_id": 7}}"#)).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn webhook_needs_no_api_key() {
    let (status, _) = send(post(r#"{"event": "call_ended"}"#)).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn non_post_methods_are_rejected() {
    let (status, _) = send(
        Request::builder()
            .method(Method::GET)
            .uri("/webhooks/voice")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
}

#[tokio::test]
async fn preflight_is_permissive() {
    let app = ro_api::create_router(ro_api::test_state("test-key"));
    let response = app
        .oneshot(
            Request::builder()
                .method(Method::OPTIONS)
                .uri("/webhooks/voice")
                .header("origin", "https://provider.example")
                .header("access-control-request-method", "POST")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response
            .headers()
            .get("access-control-allow-origin")
            .and_then(|v| v.to_str().ok()),
        Some("*")
    );
}
