// libs/telehealth-cell/src/router.rs
use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};

use shared_utils::extractor::{require_bearer_token, BearerToken};

use crate::handlers::*;
use crate::state::TelehealthState;

/// Creates the telehealth routes
pub fn telehealth_routes(state: Arc<TelehealthState>) -> Router {
    let api_token = BearerToken::new(state.config.api_token.clone());
    let webhook_token = BearerToken::new(state.config.telesalud.webhook_token.clone());

    // Public routes
    let public_routes = Router::new().route("/health", get(health_check));

    // Called by the telesalud backend
    let webhook_routes = Router::new()
        .route("/webhook", post(receive_webhook))
        .layer(middleware::from_fn_with_state(webhook_token, require_bearer_token));

    // Called by the host EMR and the provider UI
    let protected_routes = Router::new()
        .route(
            "/appointments/{appointment_id}/meeting",
            post(ensure_meeting).get(get_meeting),
        )
        .route(
            "/appointments/{appointment_id}/meeting/regenerate",
            post(regenerate_meeting),
        )
        .route("/meetings/{backend_id}/remote", get(get_remote_meeting))
        .route(
            "/notifications",
            get(list_notifications).post(mark_notifications_read),
        )
        .layer(middleware::from_fn_with_state(api_token, require_bearer_token));

    Router::new()
        .merge(public_routes)
        .merge(webhook_routes)
        .merge(protected_routes)
        .with_state(state)
}
