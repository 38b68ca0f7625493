//! Magic-link issuance and consumption.
//!
//! Issuance is a JSON endpoint gated by a static bearer credential.
//! Consumption authenticates the caller's session on success and always
//! redirects, carrying the failure reason as a query parameter otherwise.
//! Every consume attempt finishes with a sweep of expired tokens.

use std::sync::Arc;

use hyper::body::Incoming;
use hyper::header::AUTHORIZATION;
use hyper::{Request, Response, StatusCode};

use crate::server::http::{json, json_error, query_param, redirect, BoxBody};
use crate::server::state::AppState;
use crate::session::Session;

pub async fn handle_request(state: Arc<AppState>, req: Request<Incoming>) -> Response<BoxBody> {
    if state.issuer_key.trim().is_empty() {
        return json_error(
            StatusCode::UNAUTHORIZED,
            "unauthorized",
            "Magic link issuance is not configured",
        );
    }

    let expected = format!("Bearer {}", state.issuer_key);
    let provided = req
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("");
    if !constant_time_eq(provided, &expected) {
        return json_error(
            StatusCode::UNAUTHORIZED,
            "unauthorized",
            "Unauthorized: missing or invalid API key",
        );
    }

    let token = state.tokens.issue(state.link_valid_minutes);
    json(
        StatusCode::OK,
        serde_json::json!({
            "token": token.value,
            "link": format!("/magic-link/consume?token={}", token.value),
            "expiresAt": token.expires_at,
        }),
    )
}

pub async fn handle_consume(
    state: Arc<AppState>,
    session: Arc<Session>,
    req: Request<Incoming>,
) -> Response<BoxBody> {
    let token = query_param(req.uri(), "token").unwrap_or_default();

    let response = match state.tokens.validate_and_consume(&token, &session.id) {
        Ok(_) => {
            session.set_authenticated();
            log::info!(
                target: "tokens",
                "session {} authenticated via link token",
                session.id
            );
            redirect("/#chat-bottom")
        }
        Err(err) => redirect(&format!(
            "/magic-link/request?error={}",
            urlencoding::encode(&err.to_string())
        )),
    };

    state.tokens.sweep();
    response
}

/// Compare without leaking where the first mismatch sits.
fn constant_time_eq(a: &str, b: &str) -> bool {
    let a = a.as_bytes();
    let b = b.as_bytes();
    if a.len() != b.len() {
        return false;
    }
    let mut acc = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        acc |= x ^ y;
    }
    acc == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_time_eq_matches_exactly() {
        assert!(constant_time_eq("secret", "secret"));
        assert!(!constant_time_eq("secret", "other!"));
        assert!(!constant_time_eq("short", "longer"));
        assert!(constant_time_eq("", ""));
    }
}
