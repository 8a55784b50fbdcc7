use axum::extract::{Request, State};
use axum::http::{header, HeaderMap};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use log::warn;

use super::{ApiError, AppState};

/// Rejects any request without the configured Basic Auth credentials
pub async fn require_auth(State(state): State<AppState>, request: Request, next: Next) -> Response {
    match basic_credentials(request.headers()) {
        Some((username, password))
            if credentials_match(
                (username.as_str(), password.as_str()),
                (state.api.username.as_str(), state.api.password.expose()),
            ) =>
        {
            next.run(request).await
        }
        Some((username, _)) => {
            warn!(
                "Rejected {} {}: bad credentials for '{}'",
                request.method(),
                request.uri().path(),
                username
            );
            ApiError::AuthenticationFailed.into_response()
        }
        None => {
            warn!(
                "Rejected {} {}: missing credentials",
                request.method(),
                request.uri().path()
            );
            ApiError::AuthenticationFailed.into_response()
        }
    }
}

/// Compares both fields in full, in time independent of where they differ
fn credentials_match(given: (&str, &str), expected: (&str, &str)) -> bool {
    let username = constant_time_eq(given.0.as_bytes(), expected.0.as_bytes());
    let password = constant_time_eq(given.1.as_bytes(), expected.1.as_bytes());
    username & password
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Username and password from an `Authorization: Basic ...` header
fn basic_credentials(headers: &HeaderMap) -> Option<(String, String)> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, encoded) = value.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("basic") {
        return None;
    }
    let decoded = String::from_utf8(STANDARD.decode(encoded.trim()).ok()?).ok()?;
    let (username, password) = decoded.split_once(':')?;
    Some((username.to_string(), password.to_string()))
}
