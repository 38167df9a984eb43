//! Encoding and decoding helpers between Rust domain types and the plain-text
//! representations stored in SQLite columns.
//!
//! All timestamps are stored as RFC 3339 UTC strings, which compare
//! correctly as text. UUIDs are stored as hyphenated lowercase strings.
//! Structured fields (run config, run status, observation values) are stored
//! as compact JSON. A row that fails to decode is a storage failure; the
//! taxonomy has no softer slot for a corrupt database.

use chrono::{DateTime, Utc};
use lore_core::{
  Error, Result,
  entity::{Entity, EntityMerge},
  observation::{Observation, Priority, RawFragment},
  run::{InterpretationRun, RunConfig, RunStatus},
  source::Source,
};
use uuid::Uuid;

// ─── Uuid ────────────────────────────────────────────────────────────────────

pub fn encode_uuid(id: Uuid) -> String { id.hyphenated().to_string() }

pub fn decode_uuid(s: &str) -> Result<Uuid> {
  Uuid::parse_str(s).map_err(|e| Error::Storage(format!("bad uuid in row: {e}")))
}

fn decode_uuid_opt(s: Option<String>) -> Result<Option<Uuid>> {
  s.as_deref().map(decode_uuid).transpose()
}

// ─── DateTime<Utc> ───────────────────────────────────────────────────────────

pub fn encode_dt(dt: DateTime<Utc>) -> String { dt.to_rfc3339() }

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::Storage(format!("bad timestamp in row: {e}")))
}

fn decode_dt_opt(s: Option<String>) -> Result<Option<DateTime<Utc>>> {
  s.as_deref().map(decode_dt).transpose()
}

fn decode_json(s: &str) -> Result<serde_json::Value> {
  serde_json::from_str(s).map_err(|e| Error::Storage(format!("bad json in row: {e}")))
}

// ─── Row types ───────────────────────────────────────────────────────────────

/// Raw strings read directly from a `sources` row.
pub struct RawSource {
  pub source_id:    String,
  pub user_id:      String,
  pub content_hash: String,
  pub mime_type:    String,
  pub locator:      String,
  pub byte_len:     i64,
  pub created_at:   String,
}

impl RawSource {
  pub fn into_source(self) -> Result<Source> {
    Ok(Source {
      source_id:    decode_uuid(&self.source_id)?,
      user_id:      decode_uuid(&self.user_id)?,
      content_hash: self.content_hash,
      mime_type:    self.mime_type,
      locator:      self.locator,
      byte_len:     self.byte_len as u64,
      created_at:   decode_dt(&self.created_at)?,
    })
  }
}

/// Raw strings read directly from an `interpretation_runs` row.
pub struct RawRun {
  pub run_id:       String,
  pub source_id:    String,
  pub user_id:      String,
  pub config_json:  String,
  pub status_json:  String,
  pub created_at:   String,
  pub completed_at: Option<String>,
}

impl RawRun {
  pub fn into_run(self) -> Result<InterpretationRun> {
    let config: RunConfig = serde_json::from_str(&self.config_json)
      .map_err(|e| Error::Storage(format!("bad run config in row: {e}")))?;
    let status: RunStatus = serde_json::from_str(&self.status_json)
      .map_err(|e| Error::Storage(format!("bad run status in row: {e}")))?;

    Ok(InterpretationRun {
      run_id: decode_uuid(&self.run_id)?,
      source_id: decode_uuid(&self.source_id)?,
      user_id: decode_uuid(&self.user_id)?,
      config,
      status,
      created_at: decode_dt(&self.created_at)?,
      completed_at: decode_dt_opt(self.completed_at)?,
    })
  }
}

/// Raw strings read directly from an `entities` row.
pub struct RawEntity {
  pub entity_id:   String,
  pub user_id:     String,
  pub kind:        String,
  pub created_at:  String,
  pub merged_into: Option<String>,
  pub merged_at:   Option<String>,
}

impl RawEntity {
  pub fn into_entity(self) -> Result<Entity> {
    Ok(Entity {
      entity_id:   decode_uuid(&self.entity_id)?,
      user_id:     decode_uuid(&self.user_id)?,
      kind:        self.kind,
      created_at:  decode_dt(&self.created_at)?,
      merged_into: decode_uuid_opt(self.merged_into)?,
      merged_at:   decode_dt_opt(self.merged_at)?,
    })
  }
}

/// Raw strings read directly from an `observations` row.
pub struct RawObservation {
  pub observation_id: String,
  pub entity_id:      String,
  pub field:          String,
  pub value_json:     String,
  pub priority:       i64,
  pub source_id:      String,
  pub run_id:         Option<String>,
  pub created_at:     String,
}

impl RawObservation {
  pub fn into_observation(self) -> Result<Observation> {
    let priority = Priority::from_rank(self.priority).ok_or_else(|| {
      Error::Storage(format!("unknown priority rank in row: {}", self.priority))
    })?;

    Ok(Observation {
      observation_id: decode_uuid(&self.observation_id)?,
      entity_id: decode_uuid(&self.entity_id)?,
      field: self.field,
      value: decode_json(&self.value_json)?,
      priority,
      source_id: decode_uuid(&self.source_id)?,
      interpretation_run_id: decode_uuid_opt(self.run_id)?,
      created_at: decode_dt(&self.created_at)?,
    })
  }
}

/// Raw strings read directly from a `raw_fragments` row.
pub struct RawFragmentRow {
  pub fragment_id: String,
  pub entity_id:   String,
  pub field:       String,
  pub value_json:  String,
  pub reason:      String,
  pub source_id:   String,
  pub run_id:      Option<String>,
  pub created_at:  String,
}

impl RawFragmentRow {
  pub fn into_fragment(self) -> Result<RawFragment> {
    Ok(RawFragment {
      fragment_id: decode_uuid(&self.fragment_id)?,
      entity_id: decode_uuid(&self.entity_id)?,
      field: self.field,
      value: decode_json(&self.value_json)?,
      reason: self.reason,
      source_id: decode_uuid(&self.source_id)?,
      interpretation_run_id: decode_uuid_opt(self.run_id)?,
      created_at: decode_dt(&self.created_at)?,
    })
  }
}

/// Raw strings read directly from an `entity_merges` row.
pub struct RawMerge {
  pub merge_id:          String,
  pub user_id:           String,
  pub from_entity_id:    String,
  pub to_entity_id:      String,
  pub observation_count: i64,
  pub created_at:        String,
}

impl RawMerge {
  pub fn into_merge(self) -> Result<EntityMerge> {
    Ok(EntityMerge {
      merge_id:          decode_uuid(&self.merge_id)?,
      user_id:           decode_uuid(&self.user_id)?,
      from_entity_id:    decode_uuid(&self.from_entity_id)?,
      to_entity_id:      decode_uuid(&self.to_entity_id)?,
      observation_count: self.observation_count as u64,
      created_at:        decode_dt(&self.created_at)?,
    })
  }
}
