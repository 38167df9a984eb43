//! Handlers for entity-addressed mutations and listings.
//!
//! | Action | Notes |
//! |--------|-------|
//! | `correct` | manual priority-1000 observation |
//! | `merge_entities` | one-way duplicate consolidation |
//! | `retrieve_entities` | filtered listing, merged excluded by default |
//! | `list_raw_fragments` | rejected-field audit trail of one entity |

use std::sync::Arc;

use axum::{Json, extract::State};
use chrono::{DateTime, Utc};
use lore_core::{
  entity::{Entity, EntityQuery},
  observation::RawFragment,
  store::TruthStore,
};
use lore_engine::Engine;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{UserId, error::ApiError};

// ─── correct ─────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct CorrectBody {
  pub entity_id: Uuid,
  pub field:     String,
  pub value:     serde_json::Value,
}

#[derive(Debug, Serialize)]
pub struct CorrectResponse {
  pub observation_id: Uuid,
  /// Canonical entity the correction landed on; differs from the request
  /// when the addressed entity was merged away.
  pub entity_id:      Uuid,
}

/// `POST /tools/correct`
pub async fn correct<S>(
  State(engine): State<Arc<Engine<S>>>,
  UserId(user_id): UserId,
  Json(body): Json<CorrectBody>,
) -> Result<Json<CorrectResponse>, ApiError>
where
  S: TruthStore + 'static,
{
  let observation = engine
    .correct(user_id, body.entity_id, body.field, body.value)
    .await?;
  Ok(Json(CorrectResponse {
    observation_id: observation.observation_id,
    entity_id:      observation.entity_id,
  }))
}

// ─── merge_entities ──────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct MergeBody {
  pub from_entity_id: Uuid,
  pub to_entity_id:   Uuid,
}

#[derive(Debug, Serialize)]
pub struct MergeResponse {
  pub merge_id:          Uuid,
  pub observation_count: u64,
}

/// `POST /tools/merge_entities`
pub async fn merge_entities<S>(
  State(engine): State<Arc<Engine<S>>>,
  UserId(user_id): UserId,
  Json(body): Json<MergeBody>,
) -> Result<Json<MergeResponse>, ApiError>
where
  S: TruthStore + 'static,
{
  let merge = engine
    .merge_entities(user_id, body.from_entity_id, body.to_entity_id)
    .await?;
  Ok(Json(MergeResponse {
    merge_id:          merge.merge_id,
    observation_count: merge.observation_count,
  }))
}

// ─── retrieve_entities ───────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
pub struct RetrieveBody {
  pub kind:           Option<String>,
  #[serde(default)]
  pub include_merged: bool,
  pub created_after:  Option<DateTime<Utc>>,
  pub created_before: Option<DateTime<Utc>>,
  pub limit:          Option<usize>,
  pub offset:         Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct RetrieveResponse {
  pub entities: Vec<Entity>,
}

/// `POST /tools/retrieve_entities`
pub async fn retrieve_entities<S>(
  State(engine): State<Arc<Engine<S>>>,
  UserId(user_id): UserId,
  Json(body): Json<RetrieveBody>,
) -> Result<Json<RetrieveResponse>, ApiError>
where
  S: TruthStore + 'static,
{
  let entities = engine
    .retrieve_entities(user_id, EntityQuery {
      kind:           body.kind,
      include_merged: body.include_merged,
      created_after:  body.created_after,
      created_before: body.created_before,
      limit:          body.limit,
      offset:         body.offset,
    })
    .await?;
  Ok(Json(RetrieveResponse { entities }))
}

// ─── list_raw_fragments ──────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct EntityRefBody {
  pub entity_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct FragmentsResponse {
  pub fragments: Vec<RawFragment>,
}

/// `POST /tools/list_raw_fragments`
pub async fn list_raw_fragments<S>(
  State(engine): State<Arc<Engine<S>>>,
  UserId(user_id): UserId,
  Json(body): Json<EntityRefBody>,
) -> Result<Json<FragmentsResponse>, ApiError>
where
  S: TruthStore + 'static,
{
  let fragments = engine.list_fragments(user_id, body.entity_id).await?;
  Ok(Json(FragmentsResponse { fragments }))
}
