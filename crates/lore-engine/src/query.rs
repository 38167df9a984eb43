//! Provenance-aware read paths: snapshots, field provenance, timelines.
//!
//! Every read addressed to a merged entity transparently redirects to its
//! canonical target, so clients holding a stale entity id keep getting
//! answers. Snapshots are recomputed from the ledger on every call; nothing
//! here is cached.

use lore_core::{
  Error, Result,
  observation::RawFragment,
  snapshot::{self, EntitySnapshot},
  timeline::{self, TimelineEvent},
  store::TruthStore,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::engine::Engine;

/// Provenance chain of one snapshot field: the winning observation and its
/// links back to run and source.
#[derive(Debug, Clone, Serialize)]
pub struct FieldProvenance {
  pub entity_id:             Uuid,
  pub field:                 String,
  pub observation_id:        Uuid,
  pub source_id:             Uuid,
  pub interpretation_run_id: Option<Uuid>,
}

impl<S: TruthStore> Engine<S> {
  /// Reduce an entity's full ledger to its current state.
  pub async fn get_snapshot(
    &self,
    user_id: Uuid,
    entity_id: Uuid,
  ) -> Result<EntitySnapshot> {
    let entity = self.canonical_entity(user_id, entity_id).await?;
    let observations = self
      .store
      .observations_for_entity(user_id, entity.entity_id)
      .await?;
    Ok(snapshot::reduce(&entity, &observations))
  }

  /// Trace one snapshot field back to the observation that won it.
  pub async fn get_field_provenance(
    &self,
    user_id: Uuid,
    entity_id: Uuid,
    field: &str,
  ) -> Result<FieldProvenance> {
    let snapshot = self.get_snapshot(user_id, entity_id).await?;
    let Some(winner) = snapshot.fields.get(field) else {
      return Err(Error::not_found("field", field));
    };
    Ok(FieldProvenance {
      entity_id:             snapshot.entity_id,
      field:                 field.to_string(),
      observation_id:        winner.observation_id,
      source_id:             winner.source_id,
      interpretation_run_id: winner.interpretation_run_id,
    })
  }

  /// Chronological event history of an entity within an optional range
  /// (`from` inclusive, `until` exclusive).
  pub async fn list_timeline(
    &self,
    user_id: Uuid,
    entity_id: Uuid,
    from: Option<DateTime<Utc>>,
    until: Option<DateTime<Utc>>,
  ) -> Result<Vec<TimelineEvent>> {
    let entity = self.canonical_entity(user_id, entity_id).await?;
    let observations = self
      .store
      .observations_for_entity(user_id, entity.entity_id)
      .await?;
    let merges = self.store.merges_into(user_id, entity.entity_id).await?;
    Ok(timeline::assemble(&entity, &observations, &merges, from, until))
  }

  /// Rejected fragments recorded against an entity, for audit.
  pub async fn list_fragments(
    &self,
    user_id: Uuid,
    entity_id: Uuid,
  ) -> Result<Vec<RawFragment>> {
    let entity = self.canonical_entity(user_id, entity_id).await?;
    self.store.fragments_for_entity(user_id, entity.entity_id).await
  }
}
