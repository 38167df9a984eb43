//! Error taxonomy for the Lore truth layer.
//!
//! One closed set of typed failures shared by every crate in the workspace.
//! The taxonomy is part of the store contract: ownership and merge violations
//! originate inside storage backends, so the trait surfaces these variants
//! directly instead of a per-backend error type.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Stable wire-level error code exposed across the tool-invocation boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
  FailedStorage,
  SchemaViolation,
  QuotaExceeded,
  AccessDenied,
  MergeConflict,
  ValidationError,
  NotFound,
}

impl ErrorCode {
  pub fn as_str(self) -> &'static str {
    match self {
      Self::FailedStorage => "FAILED_STORAGE",
      Self::SchemaViolation => "SCHEMA_VIOLATION",
      Self::QuotaExceeded => "QUOTA_EXCEEDED",
      Self::AccessDenied => "ACCESS_DENIED",
      Self::MergeConflict => "MERGE_CONFLICT",
      Self::ValidationError => "VALIDATION_ERROR",
      Self::NotFound => "NOT_FOUND",
    }
  }
}

#[derive(Debug, Error)]
pub enum Error {
  /// Backend I/O failure (blob write, database, row decode). Retryable;
  /// `ingest` in particular is idempotent by content hash, so a retried call
  /// converges on the same Source.
  #[error("storage failure: {0}")]
  Storage(String),

  /// A field value failed validation against the schema registry. Rejection
  /// is explicit; values are never silently coerced or dropped.
  #[error("schema violation on {entity_type}.{field}: {reason}")]
  SchemaViolation {
    entity_type: String,
    field:       String,
    reason:      String,
  },

  /// Soft monthly interpretation cap reached. Non-fatal; the window resets.
  #[error("monthly interpretation quota exhausted ({used}/{limit})")]
  QuotaExceeded { used: u64, limit: u32 },

  /// The addressed record belongs to another user. Carries no detail beyond
  /// the fact of denial.
  #[error("access denied")]
  AccessDenied,

  /// Double-merge, self-merge, or otherwise inconsistent entity state.
  #[error("merge conflict: {0}")]
  MergeConflict(String),

  /// Malformed call payload, rejected before any persistence occurred.
  #[error("invalid request: {0}")]
  Validation(String),

  #[error("{what} not found: {id}")]
  NotFound { what: &'static str, id: String },
}

impl Error {
  /// Wrap any backend failure as a retryable storage error.
  pub fn storage(err: impl std::fmt::Display) -> Self {
    Self::Storage(err.to_string())
  }

  pub fn not_found(what: &'static str, id: impl std::fmt::Display) -> Self {
    Self::NotFound { what, id: id.to_string() }
  }

  pub fn code(&self) -> ErrorCode {
    match self {
      Self::Storage(_) => ErrorCode::FailedStorage,
      Self::SchemaViolation { .. } => ErrorCode::SchemaViolation,
      Self::QuotaExceeded { .. } => ErrorCode::QuotaExceeded,
      Self::AccessDenied => ErrorCode::AccessDenied,
      Self::MergeConflict(_) => ErrorCode::MergeConflict,
      Self::Validation(_) => ErrorCode::ValidationError,
      Self::NotFound { .. } => ErrorCode::NotFound,
    }
  }

  /// Whether a caller may safely retry the same call.
  pub fn retryable(&self) -> bool {
    matches!(self, Self::Storage(_))
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
