use std::sync::Arc;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    response::Response,
};
use chrono::{Duration, Utc};
use serde_json::{json, Value};
use tower::ServiceExt;

use shared_utils::test_utils::TestConfig;
use telehealth_cell::{telehealth_routes, TelehealthState};

const API_TOKEN: &str = "api-secret";
const WEBHOOK_TOKEN: &str = "hook-secret";

fn create_state() -> Arc<TelehealthState> {
    let config = TestConfig {
        api_token: Some(API_TOKEN.to_string()),
        webhook_token: Some(WEBHOOK_TOKEN.to_string()),
        ..TestConfig::default()
    };
    Arc::new(TelehealthState::in_memory(config.to_arc()).unwrap())
}

async fn send(state: &Arc<TelehealthState>, request: Request<Body>) -> (StatusCode, Value) {
    let response: Response = telehealth_routes(state.clone())
        .oneshot(request)
        .await
        .unwrap();

    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json = if body.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body).unwrap()
    };
    (status, json)
}

fn json_request(method: &str, uri: &str, token: Option<&str>, body: Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("Content-Type", "application/json");
    if let Some(token) = token {
        builder = builder.header("Authorization", format!("Bearer {}", token));
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

fn get_request(uri: &str, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().uri(uri);
    if let Some(token) = token {
        builder = builder.header("Authorization", format!("Bearer {}", token));
    }
    builder.body(Body::empty()).unwrap()
}

fn meeting_body(appointment_time: chrono::DateTime<Utc>) -> Value {
    json!({
        "provider_id": 7,
        "provider_name": "Dr. Rivera",
        "patient_id": 42,
        "patient_name": "Ana Gomez",
        "appointment_time": appointment_time
    })
}

#[tokio::test]
async fn test_health_check_without_backend() {
    let state = create_state();
    let (status, json) = send(&state, get_request("/health", None)).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "healthy");
    assert_eq!(json["backend_configured"], false);
    assert_eq!(json["persistence"], "memory");
}

#[tokio::test]
async fn test_protected_routes_require_api_token() {
    let state = create_state();

    let (status, json) = send(&state, get_request("/notifications", None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(json["error"].is_string());

    let (status, _) = send(&state, get_request("/notifications", Some("wrong"))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_webhook_requires_its_own_token() {
    let state = create_state();
    let payload = json!({"topic": "videoconsultation-started", "vc": {"id": "vc-1"}});

    let (status, json) = send(
        &state,
        json_request("POST", "/webhook", Some(API_TOKEN), payload),
    )
    .await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(json["error"].is_string());
}

#[tokio::test]
async fn test_webhook_rejects_invalid_json() {
    let state = create_state();
    let request = Request::builder()
        .method("POST")
        .uri("/webhook")
        .header("Authorization", format!("Bearer {}", WEBHOOK_TOKEN))
        .header("Content-Type", "application/json")
        .body(Body::from("{not json"))
        .unwrap();

    let (status, json) = send(&state, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"], "Invalid JSON payload");
}

#[tokio::test]
async fn test_webhook_rejects_payload_without_identifier() {
    let state = create_state();
    let (status, json) = send(
        &state,
        json_request(
            "POST",
            "/webhook",
            Some(WEBHOOK_TOKEN),
            json!({"topic": "videoconsultation-started", "vc": {}}),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(json["error"].is_string());
}

#[tokio::test]
async fn test_webhook_unknown_meeting_is_404() {
    let state = create_state();
    let (status, json) = send(
        &state,
        json_request(
            "POST",
            "/webhook",
            Some(WEBHOOK_TOKEN),
            json!({"topic": "videoconsultation-finished", "vc": {"id": "no-such-id"}}),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["success"], false);
    assert!(json["message"].is_string());
}

#[tokio::test]
async fn test_meeting_lifecycle_through_the_router() {
    let state = create_state();

    // Create, then create again: same links
    let (status, created) = send(
        &state,
        json_request(
            "POST",
            "/appointments/1001/meeting",
            Some(API_TOKEN),
            meeting_body(Utc::now()),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(created["success"], true);

    let (_, again) = send(
        &state,
        json_request(
            "POST",
            "/appointments/1001/meeting",
            Some(API_TOKEN),
            meeting_body(Utc::now()),
        ),
    )
    .await;
    assert_eq!(
        created["meeting"]["patient_join_url"],
        again["meeting"]["patient_join_url"]
    );

    // Join URL inside the window
    let (status, lookup) = send(
        &state,
        get_request("/appointments/1001/meeting?role=patient", Some(API_TOKEN)),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(lookup["join_url"], created["meeting"]["patient_join_url"]);

    // Local meetings resolve by their shared token
    let secret = created["meeting"]["patient_secret"].as_str().unwrap().to_string();
    let (status, ingested) = send(
        &state,
        json_request(
            "POST",
            "/webhook",
            Some(WEBHOOK_TOKEN),
            json!({"topic": "patient-set-attendance", "vc": {"secret": secret}}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ingested["success"], true);
    assert_eq!(ingested["result"]["status"], "patient_joined");

    // Provider 7 sees the notification and marks it read
    let (status, listed) = send(
        &state,
        get_request("/notifications?providerId=7", Some(API_TOKEN)),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(listed["count"], 1);
    assert_eq!(listed["notifications"][0]["topic"], "patient-waiting");

    let id = listed["notifications"][0]["id"].clone();
    let (status, marked) = send(
        &state,
        json_request(
            "POST",
            "/notifications",
            Some(API_TOKEN),
            json!({"notification_ids": [id, 999]}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(marked["marked_read"], 1);

    let (_, listed) = send(
        &state,
        get_request("/notifications?providerId=7", Some(API_TOKEN)),
    )
    .await;
    assert_eq!(listed["count"], 0);
}

#[tokio::test]
async fn test_join_url_outside_window_is_forbidden() {
    let state = create_state();
    let next_week = Utc::now() + Duration::days(7);

    let (status, _) = send(
        &state,
        json_request(
            "POST",
            "/appointments/2002/meeting",
            Some(API_TOKEN),
            meeting_body(next_week),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, json) = send(
        &state,
        get_request("/appointments/2002/meeting?role=provider", Some(API_TOKEN)),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert!(json["error"].as_str().unwrap().contains("Join link"));

    // Without a role the record itself is still readable
    let (status, json) = send(
        &state,
        get_request("/appointments/2002/meeting", Some(API_TOKEN)),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(json.get("join_url").is_none());
}

#[tokio::test]
async fn test_missing_meeting_is_404() {
    let state = create_state();
    let (status, _) = send(
        &state,
        get_request("/appointments/404/meeting", Some(API_TOKEN)),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_remote_lookup_without_backend() {
    let state = create_state();
    let (status, json) = send(
        &state,
        get_request("/meetings/vc-1/remote?medic=m1", Some(API_TOKEN)),
    )
    .await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(json["error"].as_str().unwrap().contains("TELESALUD_API_URL"));
}
