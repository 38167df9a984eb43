//! API error type mapping the core taxonomy onto HTTP.
//!
//! Every failure crosses the wire as
//! `{"error": {"code", "message", "retryable"}}` with the status code
//! determined by the taxonomy variant, so agent clients can branch on `code`
//! without parsing messages.

use axum::{
  Json,
  http::StatusCode,
  response::{IntoResponse, Response},
};
use lore_core::{Error, ErrorCode};
use serde_json::json;
use thiserror::Error as ThisError;

/// An error returned by an API handler. Thin wrapper so the core error can
/// implement [`IntoResponse`] from this crate.
#[derive(Debug, ThisError)]
#[error(transparent)]
pub struct ApiError(#[from] pub Error);

impl ApiError {
  pub fn validation(message: impl Into<String>) -> Self {
    Self(Error::Validation(message.into()))
  }
}

fn status_for(code: ErrorCode) -> StatusCode {
  match code {
    ErrorCode::FailedStorage => StatusCode::SERVICE_UNAVAILABLE,
    ErrorCode::SchemaViolation => StatusCode::UNPROCESSABLE_ENTITY,
    ErrorCode::QuotaExceeded => StatusCode::TOO_MANY_REQUESTS,
    ErrorCode::AccessDenied => StatusCode::FORBIDDEN,
    ErrorCode::MergeConflict => StatusCode::CONFLICT,
    ErrorCode::ValidationError => StatusCode::BAD_REQUEST,
    ErrorCode::NotFound => StatusCode::NOT_FOUND,
  }
}

impl IntoResponse for ApiError {
  fn into_response(self) -> Response {
    let code = self.0.code();
    let body = json!({
      "error": {
        "code":      code.as_str(),
        "message":   self.0.to_string(),
        "retryable": self.0.retryable(),
      }
    });
    (status_for(code), Json(body)).into_response()
  }
}
