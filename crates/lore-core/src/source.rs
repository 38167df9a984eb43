//! Source — an immutable, content-addressed record of ingested raw bytes.
//!
//! Identical bytes from the same user always resolve to the same Source row
//! and blob, which is what makes `ingest` idempotent and freely retryable.
//! Sources are never mutated or deleted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Metadata for one ingested blob. The bytes themselves live in blob storage
/// at `locator`, relative to the configured blob root.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Source {
  pub source_id:    Uuid,
  pub user_id:      Uuid,
  /// SHA-256 of the raw bytes, lowercase hex. Unique per user.
  pub content_hash: String,
  pub mime_type:    String,
  /// Blob path relative to the blob root: `{user_id}/{content_hash}`.
  pub locator:      String,
  pub byte_len:     u64,
  pub created_at:   DateTime<Utc>,
}

/// Input to [`crate::store::TruthStore::ingest_source`].
#[derive(Debug, Clone)]
pub struct NewSource {
  pub mime_type: String,
  pub bytes:     Vec<u8>,
}

/// Result of [`crate::store::TruthStore::ingest_source`].
#[derive(Debug, Clone, Serialize)]
pub struct IngestOutcome {
  pub source:       Source,
  /// `true` when the bytes were already present for this user; no new blob
  /// or row was written.
  pub deduplicated: bool,
}
