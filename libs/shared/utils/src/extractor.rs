use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{header::AUTHORIZATION, Request},
    middleware::Next,
    response::Response,
};

use shared_models::error::AppError;

/// Token a route group expects in `Authorization: Bearer ...`. `None` disables the check.
#[derive(Clone, Default)]
pub struct BearerToken(Option<Arc<str>>);

impl BearerToken {
    pub fn new(token: Option<String>) -> Self {
        Self(token.filter(|t| !t.is_empty()).map(Arc::from))
    }

    pub fn is_enabled(&self) -> bool {
        self.0.is_some()
    }

    pub fn accepts(&self, presented: Option<&str>) -> bool {
        match (&self.0, presented) {
            (None, _) => true,
            (Some(expected), Some(token)) => constant_time_eq(expected.as_bytes(), token.as_bytes()),
            (Some(_), None) => false,
        }
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Pulls the token out of an `Authorization: Bearer` header, if present and well formed
pub fn bearer_token<B>(request: &Request<B>) -> Option<&str> {
    request
        .headers()
        .get(AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
}

// Middleware for shared-secret bearer authentication
pub async fn require_bearer_token(
    State(expected): State<BearerToken>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, AppError> {
    if !expected.is_enabled() {
        return Ok(next.run(request).await);
    }

    let presented = bearer_token(&request);
    if presented.is_none() {
        return Err(AppError::Auth("Missing or invalid authorization header".to_string()));
    }

    if !expected.accepts(presented) {
        return Err(AppError::Auth("Invalid bearer token".to_string()));
    }

    Ok(next.run(request).await)
}
