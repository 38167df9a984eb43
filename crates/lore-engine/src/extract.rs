//! The extractor contract shared by both extraction variants.
//!
//! An extractor turns raw source bytes into candidate entities. The engine
//! never assumes the output is reproducible; every invocation is wrapped in
//! an interpretation run that records the extractor's configuration verbatim,
//! and that audit record is the only determinism claim made.

use std::collections::BTreeMap;

use async_trait::async_trait;
use lore_core::{run::ExtractorKind, source::Source};
use thiserror::Error;

/// One candidate entity proposed by an extractor, before resolution and
/// schema validation.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
  /// Claimed entity type. Unknown names are not an error; they validate
  /// against the registry's fallback type.
  pub entity_type: String,
  pub fields:      BTreeMap<String, serde_json::Value>,
}

/// Extraction failure. Recorded on the run row as a `failed` status rather
/// than surfaced as an RPC error; the run is the audit record.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct ExtractError(pub String);

impl ExtractError {
  pub fn new(msg: impl Into<String>) -> Self {
    Self(msg.into())
  }
}

/// A pluggable extraction backend.
///
/// Two variants exist: the deterministic [`rules`](crate::rules) parser for
/// pre-structured inputs and the non-deterministic [`model`](crate::model)
/// extractor for free text. Both land behind this trait so the engine treats
/// them uniformly.
#[async_trait]
pub trait Extractor: Send + Sync {
  fn kind(&self) -> ExtractorKind;

  /// Model identifier recorded on the run config, for model-backed variants.
  fn model(&self) -> Option<String> {
    None
  }

  fn temperature(&self) -> Option<f64> {
    None
  }

  /// SHA-256 over the prompt template, for model-backed variants.
  fn prompt_fingerprint(&self) -> Option<String> {
    None
  }

  async fn extract(
    &self,
    source: &Source,
    bytes: &[u8],
  ) -> Result<Vec<Candidate>, ExtractError>;
}
