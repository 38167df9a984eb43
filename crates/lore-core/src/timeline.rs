//! Entity timelines — the chronological audit view of one entity's life.
//!
//! A timeline lists everything that ever happened to an entity: its
//! creation, every observation recorded against it, and every merge that
//! folded another entity into it. Observations repointed by a merge keep
//! their original `created_at`, so a merged-in entity's history appears on
//! the canonical entity at the times it actually happened.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
  entity::{Entity, EntityMerge},
  observation::{Observation, Priority},
};

/// One event on an entity's timeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineEvent {
  pub at:   DateTime<Utc>,
  #[serde(flatten)]
  pub kind: TimelineEventKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TimelineEventKind {
  EntityCreated,
  ObservationRecorded {
    observation_id:        Uuid,
    field:                 String,
    priority:              Priority,
    source_id:             Uuid,
    interpretation_run_id: Option<Uuid>,
  },
  EntityMergedIn {
    merge_id:          Uuid,
    from_entity_id:    Uuid,
    observation_count: u64,
  },
}

impl TimelineEventKind {
  /// Order within a single instant, plus an id to make the sort total.
  fn tiebreak(&self) -> (u8, [u8; 16]) {
    match self {
      Self::EntityCreated => (0, [0; 16]),
      Self::ObservationRecorded { observation_id, .. } => {
        (1, *observation_id.as_bytes())
      }
      Self::EntityMergedIn { merge_id, .. } => (2, *merge_id.as_bytes()),
    }
  }
}

/// Assemble the event timeline for `entity` from its ledger and the merges
/// that targeted it.
///
/// `from` is inclusive, `until` exclusive. Events are chronological, oldest
/// first, in a total order that does not depend on input order.
pub fn assemble(
  entity: &Entity,
  observations: &[Observation],
  merges_in: &[EntityMerge],
  from: Option<DateTime<Utc>>,
  until: Option<DateTime<Utc>>,
) -> Vec<TimelineEvent> {
  let mut events = Vec::with_capacity(1 + observations.len() + merges_in.len());

  events.push(TimelineEvent {
    at:   entity.created_at,
    kind: TimelineEventKind::EntityCreated,
  });

  for obs in observations {
    events.push(TimelineEvent {
      at:   obs.created_at,
      kind: TimelineEventKind::ObservationRecorded {
        observation_id:        obs.observation_id,
        field:                 obs.field.clone(),
        priority:              obs.priority,
        source_id:             obs.source_id,
        interpretation_run_id: obs.interpretation_run_id,
      },
    });
  }

  for merge in merges_in {
    events.push(TimelineEvent {
      at:   merge.created_at,
      kind: TimelineEventKind::EntityMergedIn {
        merge_id:          merge.merge_id,
        from_entity_id:    merge.from_entity_id,
        observation_count: merge.observation_count,
      },
    });
  }

  events.retain(|e| {
    from.is_none_or(|f| e.at >= f) && until.is_none_or(|u| e.at < u)
  });
  events.sort_by_key(|e| (e.at, e.kind.tiebreak()));
  events
}
