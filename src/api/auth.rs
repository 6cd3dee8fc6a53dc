use axum::{
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::{IntoResponse, Response},
};

use super::routes::ApiState;
use crate::error::AppError;

/// Bearer-key gate for the admin surface. A no-op when no login secret is configured.
pub async fn require_bearer(State(state): State<ApiState>, req: Request, next: Next) -> Response {
    let Some(secret) = state.login_secret.as_deref() else {
        return next.run(req).await;
    };

    let token = req
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
        .map(str::trim);

    match token {
        Some(t) if key_matches(t, secret) => next.run(req).await,
        Some(_) => AppError::Unauthorized("invalid API key".to_string()).into_response(),
        None => AppError::Unauthorized("missing Authorization: Bearer <key> header".to_string())
            .into_response(),
    }
}

/// Compares a presented key with the configured secret in constant time.
pub fn key_matches(presented: &str, secret: &str) -> bool {
    constant_time_eq(presented.as_bytes(), secret.as_bytes())
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter()
        .zip(b.iter())
        .fold(0u8, |acc, (x, y)| acc | (x ^ y))
        == 0
}
