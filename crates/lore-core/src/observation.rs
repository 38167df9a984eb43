//! Observation types — the fundamental unit of the Lore truth store.
//!
//! An observation is an immutable, prioritized claim about one field of one
//! entity, with provenance back to the source bytes it came from. Observations
//! are never updated or deleted; conflicting claims coexist in the ledger and
//! are resolved at read time by the snapshot reducer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ─── Priority ────────────────────────────────────────────────────────────────

/// Where an observation ranks in snapshot reduction. Higher always wins;
/// variant order matches rank order so `Ord` can be derived.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
  /// Produced by the non-deterministic model-backed extractor.
  Extracted,
  /// Parsed from pre-structured input by the deterministic rule extractor.
  Structured,
  /// Manually authored correction. Reinterpretation only ever emits the two
  /// lower priorities, so a correction permanently outranks it.
  Correction,
}

impl Priority {
  /// Numeric rank persisted in the database: 0, 100, 1000.
  pub fn rank(self) -> u16 {
    match self {
      Self::Extracted => 0,
      Self::Structured => 100,
      Self::Correction => 1000,
    }
  }

  pub fn from_rank(rank: i64) -> Option<Self> {
    match rank {
      0 => Some(Self::Extracted),
      100 => Some(Self::Structured),
      1000 => Some(Self::Correction),
      _ => None,
    }
  }
}

// ─── Observation ─────────────────────────────────────────────────────────────

/// An immutable prioritized claim about one field of one entity.
///
/// The only write ever issued against a persisted observation is the
/// `entity_id` repoint inside the merge transaction; everything else is
/// append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
  pub observation_id: Uuid,
  pub entity_id:      Uuid,
  pub field:          String,
  pub value:          serde_json::Value,
  pub priority:       Priority,
  pub source_id:      Uuid,
  /// `None` only for manual corrections, which carry a synthesized Source
  /// but no interpretation run.
  pub interpretation_run_id: Option<Uuid>,
  /// Server-assigned; never changes after creation.
  pub created_at:     DateTime<Utc>,
}

/// Input to [`crate::store::TruthStore::append_observation`].
/// `observation_id` and `created_at` are always assigned by the store.
#[derive(Debug, Clone)]
pub struct NewObservation {
  pub entity_id:             Uuid,
  pub field:                 String,
  pub value:                 serde_json::Value,
  pub priority:              Priority,
  pub source_id:             Uuid,
  pub interpretation_run_id: Option<Uuid>,
}

// ─── RawFragment ─────────────────────────────────────────────────────────────

/// A candidate field that failed schema validation. Same provenance shape as
/// an observation plus the rejection reason; retained for audit and excluded
/// from snapshot computation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawFragment {
  pub fragment_id:           Uuid,
  pub entity_id:             Uuid,
  pub field:                 String,
  pub value:                 serde_json::Value,
  pub reason:                String,
  pub source_id:             Uuid,
  pub interpretation_run_id: Option<Uuid>,
  pub created_at:            DateTime<Utc>,
}

/// Input to [`crate::store::TruthStore::append_fragment`].
#[derive(Debug, Clone)]
pub struct NewFragment {
  pub entity_id:             Uuid,
  pub field:                 String,
  pub value:                 serde_json::Value,
  pub reason:                String,
  pub source_id:             Uuid,
  pub interpretation_run_id: Option<Uuid>,
}

// ─── Resolution lookup text ──────────────────────────────────────────────────

/// Normalised scalar form of a value, as used by the `field-match-v1`
/// resolution heuristic. Both sides of a lookup must pass through this
/// function: stores index it at append time, the resolver queries with it.
///
/// Text is trimmed, whitespace-collapsed, and lowercased; numbers and
/// booleans use their JSON rendering; anything else has no lookup form.
pub fn lookup_text(value: &serde_json::Value) -> Option<String> {
  use serde_json::Value;
  match value {
    Value::String(s) => {
      let collapsed = s.split_whitespace().collect::<Vec<_>>().join(" ");
      (!collapsed.is_empty()).then(|| collapsed.to_lowercase())
    }
    Value::Number(n) => Some(n.to_string()),
    Value::Bool(b) => Some(b.to_string()),
    Value::Null | Value::Array(_) | Value::Object(_) => None,
  }
}
