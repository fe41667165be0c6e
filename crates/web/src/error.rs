//! HTTP mapping of core errors

use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use munkey_core::Error;
use serde::Serialize;

/// Unified error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

/// Wrapper giving core errors an HTTP shape.
#[derive(Debug)]
pub struct ApiError(pub Error);

impl ApiError {
    fn error_code(&self) -> &'static str {
        match &self.0 {
            Error::NotFound(_) => "not_found",
            Error::Conflict(_) => "conflict",
            Error::MalformedEnvelope(_) | Error::UnsupportedVersion(_) => "bad_request",
            Error::InvalidSignature => "invalid_signature",
            _ => "internal",
        }
    }

    fn status_code(&self) -> StatusCode {
        match &self.0 {
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::Conflict(_) => StatusCode::CONFLICT,
            Error::MalformedEnvelope(_) | Error::UnsupportedVersion(_) => StatusCode::BAD_REQUEST,
            Error::InvalidSignature => StatusCode::FORBIDDEN,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<Error> for ApiError {
    fn from(error: Error) -> Self {
        Self(error)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self.0, "Request failed");
        } else {
            tracing::debug!(error = %self.0, "Request rejected");
        }

        let body = ErrorResponse {
            error: self.error_code().to_string(),
            message: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}
