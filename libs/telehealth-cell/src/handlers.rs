// libs/telehealth-cell/src/handlers.rs
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use serde_json::{json, Value};
use tracing::{error, warn};

use shared_models::error::AppError;

use crate::error::TelehealthError;
use crate::models::{
    MarkReadRequest, MeetingLookupQuery, MeetingRequestBody, NotificationListQuery,
    RemoteMeetingQuery,
};
use crate::services::webhook::AUDIT_TARGET;
use crate::state::TelehealthState;

fn to_app_error(e: TelehealthError) -> AppError {
    match e {
        TelehealthError::MeetingNotFound { .. } | TelehealthError::NotFound => {
            AppError::NotFound(e.to_string())
        }
        TelehealthError::ValidationError { message }
        | TelehealthError::InvalidPayload { message } => AppError::BadRequest(message),
        TelehealthError::InvalidState { .. } => AppError::Conflict(e.to_string()),
        TelehealthError::OutsideJoinWindow { .. } => AppError::Forbidden(e.to_string()),
        TelehealthError::BackendUnavailable { .. }
        | TelehealthError::BackendRejected { .. }
        | TelehealthError::BackendError { .. }
        | TelehealthError::MalformedResponse { .. } => AppError::ExternalService(e.to_string()),
        TelehealthError::DatabaseError { message } => AppError::Database(message),
        _ => AppError::Internal(e.to_string()),
    }
}

// ==============================================================================
// MEETING HANDLERS
// ==============================================================================

/// Create the appointment's meeting, or return the existing one
#[axum::debug_handler]
pub async fn ensure_meeting(
    State(state): State<Arc<TelehealthState>>,
    Path(appointment_id): Path<i64>,
    Json(body): Json<MeetingRequestBody>,
) -> Result<Json<Value>, AppError> {
    let request = body.into_request(appointment_id);
    let meeting = state
        .orchestrator
        .ensure_meeting(&request)
        .await
        .map_err(to_app_error)?;

    Ok(Json(json!({
        "success": true,
        "meeting": meeting
    })))
}

/// Replace the join links of a meeting that has not finished
#[axum::debug_handler]
pub async fn regenerate_meeting(
    State(state): State<Arc<TelehealthState>>,
    Path(appointment_id): Path<i64>,
    Json(body): Json<MeetingRequestBody>,
) -> Result<Json<Value>, AppError> {
    let request = body.into_request(appointment_id);
    let meeting = state
        .orchestrator
        .regenerate_meeting(&request)
        .await
        .map_err(to_app_error)?;

    Ok(Json(json!({
        "success": true,
        "meeting": meeting
    })))
}

/// Stored meeting; with `?role=` also the join URL, inside the join window only
#[axum::debug_handler]
pub async fn get_meeting(
    State(state): State<Arc<TelehealthState>>,
    Path(appointment_id): Path<i64>,
    Query(query): Query<MeetingLookupQuery>,
) -> Result<Json<Value>, AppError> {
    let meeting = state
        .orchestrator
        .get_meeting(appointment_id)
        .await
        .map_err(to_app_error)?;

    let Some(role) = query.role else {
        return Ok(Json(json!({
            "success": true,
            "meeting": meeting
        })));
    };

    let join_url = state
        .orchestrator
        .join_url_for(&meeting, role, Utc::now())
        .map_err(to_app_error)?;

    Ok(Json(json!({
        "success": true,
        "meeting": meeting,
        "role": role,
        "join_url": join_url
    })))
}

/// Meeting details as reported by the telesalud backend
#[axum::debug_handler]
pub async fn get_remote_meeting(
    State(state): State<Arc<TelehealthState>>,
    Path(backend_id): Path<String>,
    Query(query): Query<RemoteMeetingQuery>,
) -> Result<Json<Value>, AppError> {
    let backend = state.orchestrator.backend().ok_or_else(|| {
        to_app_error(TelehealthError::ConfigurationMissing {
            setting: "TELESALUD_API_URL".to_string(),
        })
    })?;

    let data = backend
        .get_meeting(&backend_id, &query.medic)
        .await
        .map_err(to_app_error)?;

    Ok(Json(json!({
        "success": true,
        "data": data
    })))
}

// ==============================================================================
// WEBHOOK HANDLER
// ==============================================================================

/// Lifecycle webhook posted by the telesalud backend.
/// Every outcome is a structured response the sender can act on.
pub async fn receive_webhook(
    State(state): State<Arc<TelehealthState>>,
    body: Bytes,
) -> Response {
    let payload: Value = match serde_json::from_slice(&body) {
        Ok(payload) => payload,
        Err(e) => {
            warn!(target: AUDIT_TARGET, reason = %e, "Webhook body is not valid JSON");
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": "Invalid JSON payload" })),
            )
                .into_response();
        }
    };

    match state.ingestor.ingest(&payload).await {
        Ok(result) => (
            StatusCode::OK,
            Json(json!({
                "success": true,
                "result": result
            })),
        )
            .into_response(),
        Err(TelehealthError::InvalidPayload { message }) => {
            (StatusCode::BAD_REQUEST, Json(json!({ "error": message }))).into_response()
        }
        Err(TelehealthError::UnknownMeeting { identifier }) => (
            StatusCode::NOT_FOUND,
            Json(json!({
                "success": false,
                "message": format!("No meeting matches {}", identifier)
            })),
        )
            .into_response(),
        Err(e) => {
            error!("Webhook processing failed ({}): {}", e.kind(), e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "Internal error processing webhook" })),
            )
                .into_response()
        }
    }
}

// ==============================================================================
// NOTIFICATION HANDLERS
// ==============================================================================

#[axum::debug_handler]
pub async fn list_notifications(
    State(state): State<Arc<TelehealthState>>,
    Query(query): Query<NotificationListQuery>,
) -> Result<Json<Value>, AppError> {
    let notifications = state
        .notifications
        .list_unread(query.provider_id)
        .await
        .map_err(to_app_error)?;

    Ok(Json(json!({
        "success": true,
        "count": notifications.len(),
        "notifications": notifications
    })))
}

#[axum::debug_handler]
pub async fn mark_notifications_read(
    State(state): State<Arc<TelehealthState>>,
    Json(request): Json<MarkReadRequest>,
) -> Result<Json<Value>, AppError> {
    let marked_read = state
        .notifications
        .mark_read(&request.notification_ids)
        .await
        .map_err(to_app_error)?;

    Ok(Json(json!({
        "success": true,
        "marked_read": marked_read
    })))
}

// ==============================================================================
// SYSTEM HANDLERS
// ==============================================================================

/// Health check, probing the telesalud backend when one is configured
#[axum::debug_handler]
pub async fn health_check(State(state): State<Arc<TelehealthState>>) -> Json<Value> {
    let persistence = if state.config.is_configured() { "supabase" } else { "memory" };

    let Some(backend) = state.orchestrator.backend() else {
        return Json(json!({
            "status": "healthy",
            "backend_configured": false,
            "backend_reachable": false,
            "persistence": persistence,
            "message": "Telesalud backend not configured, using local meeting links"
        }));
    };

    let reachable = backend.test_connection().await;
    Json(json!({
        "status": if reachable { "healthy" } else { "degraded" },
        "backend_configured": true,
        "backend_reachable": reachable,
        "persistence": persistence,
        "message": if reachable {
            "Telesalud backend is reachable"
        } else {
            "Telesalud backend has connectivity issues, meetings fall back to local links"
        }
    }))
}
