use std::net::IpAddr;

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use log::error;
use serde::Serialize;
use thiserror::Error;

use crate::injector::InjectError;
use crate::registry::RegistryError;

pub const AUTH_REALM: &str = "Basic realm=\"bgpd-injector\"";

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Authentication required")]
    AuthenticationFailed,
    #[error("{0}")]
    BadRequest(String),
    #[error("Peer {0} not found")]
    PeerNotFound(IpAddr),
    #[error("No route for {0}")]
    NotFound(String),
    #[error("Method not allowed")]
    MethodNotAllowed,
    #[error(transparent)]
    Inject(#[from] InjectError),
    #[error("{0}")]
    Internal(String),
}

/// JSON body for every error response
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error_code: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::AuthenticationFailed => StatusCode::UNAUTHORIZED,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::PeerNotFound(_) | ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            ApiError::Inject(InjectError::SessionNotEstablished) => StatusCode::CONFLICT,
            ApiError::Inject(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            ApiError::AuthenticationFailed => "AuthenticationFailed",
            ApiError::BadRequest(_) => "BadRequest",
            ApiError::PeerNotFound(_) => "PeerNotFound",
            ApiError::NotFound(_) => "NotFound",
            ApiError::MethodNotAllowed => "MethodNotAllowed",
            ApiError::Inject(InjectError::SessionNotEstablished) => "SessionNotEstablished",
            ApiError::Inject(InjectError::InvalidRequest { .. }) => "InvalidRequest",
            ApiError::Inject(InjectError::UnsupportedAddressFamily(_)) => {
                "UnsupportedAddressFamily"
            }
            ApiError::Inject(InjectError::UnsupportedCapability(_)) => "UnsupportedCapability",
            ApiError::Internal(_) => "InternalError",
        }
    }

    fn body(&self) -> ErrorBody {
        let (message, field) = match self {
            // Internal details stay in the log
            ApiError::Internal(_) => ("Internal server error".to_string(), None),
            ApiError::Inject(InjectError::InvalidRequest { field, reason }) => {
                (reason.clone(), Some(field.clone()))
            }
            other => (other.to_string(), None),
        };
        ErrorBody {
            error_code: self.error_code(),
            message,
            field,
        }
    }
}

impl From<RegistryError> for ApiError {
    fn from(error: RegistryError) -> Self {
        match error {
            RegistryError::PeerNotFound(addr) => ApiError::PeerNotFound(addr),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let ApiError::Internal(reason) = &self {
            error!("API internal error: {}", reason);
        }
        let mut response = (self.status(), Json(self.body())).into_response();
        if let ApiError::AuthenticationFailed = self {
            response
                .headers_mut()
                .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static(AUTH_REALM));
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Family;

    #[test]
    fn test_status_mapping() {
        let cases = vec![
            (ApiError::AuthenticationFailed, 401),
            (ApiError::BadRequest("bad".into()), 400),
            (ApiError::PeerNotFound("10.0.0.9".parse().unwrap()), 404),
            (ApiError::Inject(InjectError::SessionNotEstablished), 409),
            (
                ApiError::Inject(InjectError::UnsupportedAddressFamily(Family::IPV6_UNICAST)),
                422,
            ),
            (
                ApiError::Inject(InjectError::UnsupportedCapability("route-refresh".into())),
                422,
            ),
            (ApiError::Internal("oops".into()), 500),
        ];
        for (error, status) in cases {
            assert_eq!(error.status().as_u16(), status, "{:?}", error);
        }
    }

    #[test]
    fn test_invalid_request_body() {
        let error = ApiError::Inject(InjectError::InvalidRequest {
            field: "nlri".into(),
            reason: "Not a valid prefix: '10.1.0.0/99'".into(),
        });
        let body = serde_json::to_value(error.body()).unwrap();
        assert_eq!(body["error_code"], "InvalidRequest");
        assert_eq!(body["field"], "nlri");
    }

    #[test]
    fn test_internal_error_is_generic() {
        let body = serde_json::to_value(ApiError::Internal("db on fire".into()).body()).unwrap();
        assert_eq!(body["message"], "Internal server error");
        assert!(body.get("field").is_none());
    }

    #[test]
    fn test_unauthorized_has_challenge() {
        let response = ApiError::AuthenticationFailed.into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            response.headers().get(header::WWW_AUTHENTICATE).unwrap(),
            AUTH_REALM
        );
    }
}
