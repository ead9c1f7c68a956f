use axum::{
    extract::{Request, State},
    response::{IntoResponse, Response},
};

use crate::errors::AppError;

/// Bearer-token authentication middleware.
///
/// If a token is configured, every request must carry
/// `Authorization: Bearer <token>` matching that value.
/// With no token configured, authentication is disabled (dev mode).
pub async fn require_auth(
    State(expected): State<Option<String>>,
    req: Request,
    next: axum::middleware::Next,
) -> Response {
    let Some(expected) = expected else {
        return next.run(req).await;
    };

    let token = req
        .headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    match token {
        Some(token) if token == expected => next.run(req).await,
        _ => AppError::Unauthorized.into_response(),
    }
}
