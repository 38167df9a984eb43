//! Entity — the thin envelope that aggregates observations.
//!
//! An entity holds only identity metadata. Its current state is assembled on
//! read by reducing all of its observations; see [`crate::snapshot`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A canonical addressable object owned by exactly one user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
  pub entity_id:   Uuid,
  pub user_id:     Uuid,
  /// Entity type name, validated against the schema registry.
  pub kind:        String,
  pub created_at:  DateTime<Utc>,
  /// Set exactly once by a merge, then permanent. Merges are flat: a merge
  /// target is never itself merged away, so one hop always reaches the
  /// canonical entity.
  pub merged_into: Option<Uuid>,
  pub merged_at:   Option<DateTime<Utc>>,
}

impl Entity {
  pub fn is_merged(&self) -> bool {
    self.merged_into.is_some()
  }
}

/// Audit record for a one-way entity consolidation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityMerge {
  pub merge_id:          Uuid,
  pub user_id:           Uuid,
  pub from_entity_id:    Uuid,
  pub to_entity_id:      Uuid,
  /// Observations repointed by the merge transaction.
  pub observation_count: u64,
  pub created_at:        DateTime<Utc>,
}

/// Filters for [`crate::store::TruthStore::list_entities`].
///
/// Merged-away entities are excluded unless `include_merged` is set.
#[derive(Debug, Clone, Default)]
pub struct EntityQuery {
  pub kind:           Option<String>,
  pub include_merged: bool,
  pub created_after:  Option<DateTime<Utc>>,
  pub created_before: Option<DateTime<Utc>>,
  pub limit:          Option<usize>,
  pub offset:         Option<usize>,
}
