//! Handlers for the ingestion and interpretation actions.
//!
//! | Action | Notes |
//! |--------|-------|
//! | `ingest` | raw bytes (base64) or inline text, optional same-call interpretation |
//! | `ingest_structured` | pre-structured entity payload, priority-100 observations |
//! | `reinterpret` | new run over an existing source |
//! | `get_source` | source metadata |
//! | `list_interpretation_runs` | run audit trail of one source |

use std::{collections::BTreeMap, sync::Arc};

use axum::{Json, extract::State};
use base64::Engine as _;
use lore_engine::{Engine, InterpretOptions, StructuredPayload};
use lore_core::{
  observation::Observation,
  run::{ExtractorKind, InterpretationRun},
  source::Source,
  store::TruthStore,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{UserId, error::ApiError};

// ─── ingest ──────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct IngestBody {
  /// Raw bytes, standard base64. Mutually exclusive with `text`.
  pub content_base64: Option<String>,
  /// Convenience for textual content.
  pub text:           Option<String>,
  pub mime_type:      Option<String>,
  /// Interpret the source in the same call.
  #[serde(default)]
  pub interpret:      bool,
}

#[derive(Debug, Serialize)]
pub struct IngestResponse {
  pub source_id:             Uuid,
  pub deduplicated:          bool,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub interpretation_run_id: Option<Uuid>,
}

/// `POST /tools/ingest`
pub async fn ingest<S>(
  State(engine): State<Arc<Engine<S>>>,
  UserId(user_id): UserId,
  Json(body): Json<IngestBody>,
) -> Result<Json<IngestResponse>, ApiError>
where
  S: TruthStore + 'static,
{
  let (bytes, default_mime) = match (body.content_base64, body.text) {
    (Some(encoded), None) => {
      let bytes = base64::engine::general_purpose::STANDARD
        .decode(encoded.as_bytes())
        .map_err(|e| ApiError::validation(format!("bad base64 content: {e}")))?;
      (bytes, "application/octet-stream")
    }
    (None, Some(text)) => (text.into_bytes(), "text/plain"),
    _ => {
      return Err(ApiError::validation(
        "exactly one of content_base64 or text is required",
      ));
    }
  };
  let mime_type = body.mime_type.unwrap_or_else(|| default_mime.to_string());

  let result = engine
    .ingest(user_id, bytes, mime_type, body.interpret)
    .await?;

  Ok(Json(IngestResponse {
    source_id:             result.outcome.source.source_id,
    deduplicated:          result.outcome.deduplicated,
    interpretation_run_id: result.run.map(|r| r.run_id),
  }))
}

// ─── ingest_structured ───────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct IngestStructuredBody {
  pub entity_type:    String,
  pub fields:         BTreeMap<String, serde_json::Value>,
  pub schema_version: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct IngestStructuredResponse {
  pub source_id:             Uuid,
  pub interpretation_run_id: Uuid,
  pub observations:          Vec<Observation>,
}

/// `POST /tools/ingest_structured`
pub async fn ingest_structured<S>(
  State(engine): State<Arc<Engine<S>>>,
  UserId(user_id): UserId,
  Json(body): Json<IngestStructuredBody>,
) -> Result<Json<IngestStructuredResponse>, ApiError>
where
  S: TruthStore + 'static,
{
  let result = engine
    .ingest_structured(user_id, StructuredPayload {
      entity_type:    body.entity_type,
      fields:         body.fields,
      schema_version: body.schema_version,
    })
    .await?;

  Ok(Json(IngestStructuredResponse {
    source_id:             result.source.source_id,
    interpretation_run_id: result.run.run_id,
    observations:          result.observations,
  }))
}

// ─── reinterpret ─────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct ReinterpretBody {
  pub source_id:      Uuid,
  /// Force an extractor variant; defaults to mime-type selection.
  pub extractor:      Option<ExtractorKind>,
  pub schema_version: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct ReinterpretResponse {
  pub interpretation_run_id: Uuid,
}

/// `POST /tools/reinterpret` — not idempotent by design: every call appends a
/// new audited run.
pub async fn reinterpret<S>(
  State(engine): State<Arc<Engine<S>>>,
  UserId(user_id): UserId,
  Json(body): Json<ReinterpretBody>,
) -> Result<Json<ReinterpretResponse>, ApiError>
where
  S: TruthStore + 'static,
{
  let run = engine
    .interpret(user_id, body.source_id, InterpretOptions {
      extractor:      body.extractor,
      schema_version: body.schema_version,
    })
    .await?;

  Ok(Json(ReinterpretResponse { interpretation_run_id: run.run_id }))
}

// ─── get_source / list_interpretation_runs ───────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct SourceRefBody {
  pub source_id: Uuid,
}

/// `POST /tools/get_source`
pub async fn get_source<S>(
  State(engine): State<Arc<Engine<S>>>,
  UserId(user_id): UserId,
  Json(body): Json<SourceRefBody>,
) -> Result<Json<Source>, ApiError>
where
  S: TruthStore + 'static,
{
  Ok(Json(engine.get_source(user_id, body.source_id).await?))
}

#[derive(Debug, Serialize)]
pub struct ListRunsResponse {
  pub runs: Vec<InterpretationRun>,
}

/// `POST /tools/list_interpretation_runs`
pub async fn list_runs<S>(
  State(engine): State<Arc<Engine<S>>>,
  UserId(user_id): UserId,
  Json(body): Json<SourceRefBody>,
) -> Result<Json<ListRunsResponse>, ApiError>
where
  S: TruthStore + 'static,
{
  let runs = engine.list_runs(user_id, body.source_id).await?;
  Ok(Json(ListRunsResponse { runs }))
}
