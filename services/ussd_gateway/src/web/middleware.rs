//! services/ussd_gateway/src/web/middleware.rs
//!
//! Shared-secret check for the gateway callback route.

use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::Response,
};
use std::sync::Arc;
use tracing::warn;

use crate::web::state::AppState;

/// Header the gateway is configured to send with every callback.
pub const GATEWAY_TOKEN_HEADER: &str = "x-gateway-token";

/// Middleware that rejects callers without the configured gateway token.
///
/// When no token is configured every request passes. A mismatch answers
/// 401; only callers that are not the gateway ever see it.
pub async fn require_gateway_token(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let Some(expected) = state.config.gateway_token.as_deref() else {
        return Ok(next.run(req).await);
    };

    let supplied = req
        .headers()
        .get(GATEWAY_TOKEN_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or(StatusCode::UNAUTHORIZED)?;

    if !tokens_match(supplied.as_bytes(), expected.as_bytes()) {
        warn!("Rejected USSD callback with an invalid gateway token");
        return Err(StatusCode::UNAUTHORIZED);
    }

    Ok(next.run(req).await)
}

/// Compares without short-circuiting on the first differing byte.
fn tokens_match(supplied: &[u8], expected: &[u8]) -> bool {
    if supplied.len() != expected.len() {
        return false;
    }
    supplied
        .iter()
        .zip(expected)
        .fold(0u8, |acc, (a, b)| acc | (a ^ b))
        == 0
}

#[cfg(test)]
mod tests {
    use super::tokens_match;

    #[test]
    fn token_comparison() {
        assert!(tokens_match(b"s3cret", b"s3cret"));
        assert!(!tokens_match(b"s3cret", b"s3crex"));
        assert!(!tokens_match(b"s3cre", b"s3cret"));
    }
}
