use std::sync::Arc;

use axum::{routing::get, Router};

use telehealth_cell::{telehealth_routes, TelehealthState};

pub fn create_router(telehealth: Arc<TelehealthState>) -> Router {
    Router::new()
        .route("/", get(|| async { "Telesalud bridge API is running!" }))
        .nest("/telesalud", telehealth_routes(telehealth))
}
