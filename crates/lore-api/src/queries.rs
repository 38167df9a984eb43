//! Handlers for the provenance-aware read actions.
//!
//! | Action | Notes |
//! |--------|-------|
//! | `get_entity_snapshot` | reduced current state with per-field provenance |
//! | `get_field_provenance` | winning observation chain for one field |
//! | `list_timeline_events` | chronological audit view |
//! | `get_schema` | entity types and field schemas of one registry version |

use std::sync::Arc;

use axum::{Json, extract::State};
use chrono::{DateTime, Utc};
use lore_core::{
  schema::SchemaVersion,
  snapshot::EntitySnapshot,
  store::TruthStore,
  timeline::TimelineEvent,
};
use lore_engine::{Engine, query::FieldProvenance};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{UserId, error::ApiError};

// ─── get_entity_snapshot ─────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct EntityRefBody {
  pub entity_id: Uuid,
}

/// `POST /tools/get_entity_snapshot`
pub async fn get_snapshot<S>(
  State(engine): State<Arc<Engine<S>>>,
  UserId(user_id): UserId,
  Json(body): Json<EntityRefBody>,
) -> Result<Json<EntitySnapshot>, ApiError>
where
  S: TruthStore + 'static,
{
  Ok(Json(engine.get_snapshot(user_id, body.entity_id).await?))
}

// ─── get_field_provenance ────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct ProvenanceBody {
  pub entity_id: Uuid,
  pub field:     String,
}

/// `POST /tools/get_field_provenance`
pub async fn get_field_provenance<S>(
  State(engine): State<Arc<Engine<S>>>,
  UserId(user_id): UserId,
  Json(body): Json<ProvenanceBody>,
) -> Result<Json<FieldProvenance>, ApiError>
where
  S: TruthStore + 'static,
{
  let provenance = engine
    .get_field_provenance(user_id, body.entity_id, &body.field)
    .await?;
  Ok(Json(provenance))
}

// ─── list_timeline_events ────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct TimelineBody {
  pub entity_id: Uuid,
  /// Inclusive lower bound.
  pub from:      Option<DateTime<Utc>>,
  /// Exclusive upper bound.
  pub until:     Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct TimelineResponse {
  pub events: Vec<TimelineEvent>,
}

/// `POST /tools/list_timeline_events`
pub async fn list_timeline_events<S>(
  State(engine): State<Arc<Engine<S>>>,
  UserId(user_id): UserId,
  Json(body): Json<TimelineBody>,
) -> Result<Json<TimelineResponse>, ApiError>
where
  S: TruthStore + 'static,
{
  let events = engine
    .list_timeline(user_id, body.entity_id, body.from, body.until)
    .await?;
  Ok(Json(TimelineResponse { events }))
}

// ─── get_schema ──────────────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
pub struct GetSchemaBody {
  /// Registry version to describe. Defaults to the active version.
  pub version: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct GetSchemaResponse {
  pub version: u32,
  #[serde(flatten)]
  pub schema:  SchemaVersion,
}

/// `POST /tools/get_schema`
pub async fn get_schema<S>(
  State(engine): State<Arc<Engine<S>>>,
  UserId(_user_id): UserId,
  Json(body): Json<GetSchemaBody>,
) -> Result<Json<GetSchemaResponse>, ApiError>
where
  S: TruthStore + 'static,
{
  let version = body.version.unwrap_or(engine.registry().active_version());
  let schema = engine.registry().version(version)?.clone();
  Ok(Json(GetSchemaResponse { version, schema }))
}
