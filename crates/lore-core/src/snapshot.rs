//! Snapshot reduction — the pure function that turns a ledger into state.
//!
//! A snapshot is derived, never stored. For each field the reducer picks the
//! observation with the greatest `(priority, created_at, observation_id)`
//! key; the id bytes break exact ties, so the winner is a total order over
//! the ledger and the result cannot depend on insertion or iteration order.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
  entity::Entity,
  observation::{Observation, Priority},
};

// ─── Snapshot types ──────────────────────────────────────────────────────────

/// Winning value for one field, with the provenance of the observation that
/// supplied it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotField {
  pub value:                 serde_json::Value,
  pub priority:              Priority,
  pub observation_id:        Uuid,
  pub source_id:             Uuid,
  pub interpretation_run_id: Option<Uuid>,
  /// `created_at` of the winning observation.
  pub observed_at:           DateTime<Utc>,
}

/// The reduced current state of one entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntitySnapshot {
  pub entity_id:         Uuid,
  pub user_id:           Uuid,
  pub kind:              String,
  /// Winning value per field. Empty when the entity has no accepted
  /// observations yet, which is a valid state, not an error.
  pub fields:            BTreeMap<String, SnapshotField>,
  /// Ledger size the snapshot was reduced from.
  pub observation_count: usize,
}

// ─── Reduction ───────────────────────────────────────────────────────────────

/// Total-order reduction key. Greater wins.
pub fn reduction_key(o: &Observation) -> (Priority, DateTime<Utc>, [u8; 16]) {
  (o.priority, o.created_at, *o.observation_id.as_bytes())
}

/// Reduce an entity's full observation ledger to its current state.
///
/// Pure and deterministic: equal sets of observations produce equal
/// snapshots whatever order the slice arrives in. The slice must be the
/// complete ledger for `entity` (merged-in observations included, since the
/// merge repoints them).
pub fn reduce(entity: &Entity, observations: &[Observation]) -> EntitySnapshot {
  let mut winners: BTreeMap<&str, &Observation> = BTreeMap::new();

  for obs in observations {
    match winners.get(obs.field.as_str()) {
      Some(current) if reduction_key(current) >= reduction_key(obs) => {}
      _ => {
        winners.insert(&obs.field, obs);
      }
    }
  }

  let fields = winners
    .into_iter()
    .map(|(field, obs)| {
      (field.to_string(), SnapshotField {
        value:                 obs.value.clone(),
        priority:              obs.priority,
        observation_id:        obs.observation_id,
        source_id:             obs.source_id,
        interpretation_run_id: obs.interpretation_run_id,
        observed_at:           obs.created_at,
      })
    })
    .collect();

  EntitySnapshot {
    entity_id: entity.entity_id,
    user_id: entity.user_id,
    kind: entity.kind.clone(),
    fields,
    observation_count: observations.len(),
  }
}
