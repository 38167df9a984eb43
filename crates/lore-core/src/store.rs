//! The `TruthStore` trait — the storage abstraction the pipeline runs on.
//!
//! Implemented by storage backends (e.g. `lore-store-sqlite`). Higher layers
//! (`lore-engine`, `lore-api`) depend on this abstraction, not on any
//! concrete backend.
//!
//! Every method takes the acting `user_id` and validates ownership before
//! touching anything, reads included; the error taxonomy in
//! [`crate::error::Error`] is part of the trait contract, not an
//! implementation detail.

use std::future::Future;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::{
  entity::{Entity, EntityMerge, EntityQuery},
  error::Result,
  observation::{NewFragment, NewObservation, Observation, RawFragment},
  run::{InterpretationRun, NewRun, RunOutcome},
  source::{IngestOutcome, NewSource, Source},
};

/// Abstraction over a Lore truth-store backend.
///
/// Sources, runs, observations, and fragments are append-only. The single
/// sanctioned in-place mutation is the `entity_id` rewrite inside
/// [`TruthStore::merge_entities`], which must be transactional: readers
/// never observe a half-merged entity.
///
/// All methods return `Send` futures so the trait can be used in
/// multi-threaded async runtimes (tokio with `axum`).
pub trait TruthStore: Send + Sync {
  // ── Sources ───────────────────────────────────────────────────────────

  /// Store raw bytes content-addressed under their SHA-256.
  ///
  /// Idempotent: identical bytes from the same user resolve to the existing
  /// Source with `deduplicated = true`. The blob is written before the row,
  /// so a Source row never exists without its bytes.
  fn ingest_source(
    &self,
    user_id: Uuid,
    input: NewSource,
  ) -> impl Future<Output = Result<IngestOutcome>> + Send + '_;

  /// Retrieve Source metadata by id.
  fn get_source(
    &self,
    user_id: Uuid,
    source_id: Uuid,
  ) -> impl Future<Output = Result<Source>> + Send + '_;

  /// Retrieve the original raw bytes of a Source from blob storage.
  fn read_source_bytes(
    &self,
    user_id: Uuid,
    source_id: Uuid,
  ) -> impl Future<Output = Result<Vec<u8>>> + Send + '_;

  // ── Interpretation runs ───────────────────────────────────────────────

  /// Create a run in `running` state with its config recorded verbatim.
  fn create_run(
    &self,
    user_id: Uuid,
    input: NewRun,
  ) -> impl Future<Output = Result<InterpretationRun>> + Send + '_;

  /// Move a running run to a terminal state. Terminal states are immutable;
  /// finishing an already-terminal run is a validation error.
  fn finish_run(
    &self,
    user_id: Uuid,
    run_id: Uuid,
    outcome: RunOutcome,
  ) -> impl Future<Output = Result<InterpretationRun>> + Send + '_;

  fn get_run(
    &self,
    user_id: Uuid,
    run_id: Uuid,
  ) -> impl Future<Output = Result<InterpretationRun>> + Send + '_;

  /// All runs recorded against one Source, newest first.
  fn list_runs(
    &self,
    user_id: Uuid,
    source_id: Uuid,
  ) -> impl Future<Output = Result<Vec<InterpretationRun>>> + Send + '_;

  /// Number of quota-consuming runs the user has created at or after
  /// `since`; runs flagged `quota_exempt` are skipped. Feeds the soft
  /// monthly quota check.
  fn count_runs_since(
    &self,
    user_id: Uuid,
    since: DateTime<Utc>,
  ) -> impl Future<Output = Result<u64>> + Send + '_;

  // ── Entities ──────────────────────────────────────────────────────────

  fn create_entity(
    &self,
    user_id: Uuid,
    kind: String,
  ) -> impl Future<Output = Result<Entity>> + Send + '_;

  fn get_entity(
    &self,
    user_id: Uuid,
    entity_id: Uuid,
  ) -> impl Future<Output = Result<Entity>> + Send + '_;

  /// List entities matching `query`. Merged-away entities are excluded
  /// unless the query opts in.
  fn list_entities(
    &self,
    user_id: Uuid,
    query: EntityQuery,
  ) -> impl Future<Output = Result<Vec<Entity>>> + Send + '_;

  /// Entity-resolution lookup: the earliest unmerged entity of `kind` with
  /// an observation on `field` whose normalised text equals `value_text`.
  fn find_entity_by_field(
    &self,
    user_id: Uuid,
    kind: String,
    field: String,
    value_text: String,
  ) -> impl Future<Output = Result<Option<Entity>>> + Send + '_;

  // ── Observations — append-only writes ─────────────────────────────────

  /// Append one observation. `observation_id` and `created_at` are assigned
  /// by the store. If the target entity was merged away, the write follows
  /// `merged_into` to the canonical entity; redirect and insert happen in
  /// one transaction so a concurrent merge cannot strand the row.
  fn append_observation(
    &self,
    user_id: Uuid,
    input: NewObservation,
  ) -> impl Future<Output = Result<Observation>> + Send + '_;

  /// Append one rejected fragment. Same redirect rule as
  /// [`TruthStore::append_observation`].
  fn append_fragment(
    &self,
    user_id: Uuid,
    input: NewFragment,
  ) -> impl Future<Output = Result<RawFragment>> + Send + '_;

  /// The full observation ledger of one entity, in unspecified order. The
  /// snapshot reducer does not care and nothing else may.
  fn observations_for_entity(
    &self,
    user_id: Uuid,
    entity_id: Uuid,
  ) -> impl Future<Output = Result<Vec<Observation>>> + Send + '_;

  /// Rejected fragments recorded against one entity, newest first.
  fn fragments_for_entity(
    &self,
    user_id: Uuid,
    entity_id: Uuid,
  ) -> impl Future<Output = Result<Vec<RawFragment>>> + Send + '_;

  // ── Merge ─────────────────────────────────────────────────────────────

  /// Fold `from_entity_id` into `to_entity_id`.
  ///
  /// Preconditions (all violations are `MergeConflict`): distinct entities,
  /// same kind, neither already merged. In ONE transaction: repoint every
  /// observation and fragment of `from`, set `from.merged_into` and
  /// `merged_at`, insert the audit row. Merges are flat: a merge target is
  /// never itself merged away, so reads follow at most one hop.
  fn merge_entities(
    &self,
    user_id: Uuid,
    from_entity_id: Uuid,
    to_entity_id: Uuid,
  ) -> impl Future<Output = Result<EntityMerge>> + Send + '_;

  /// Merge audit rows targeting `entity_id`, oldest first. Feeds timeline
  /// assembly.
  fn merges_into(
    &self,
    user_id: Uuid,
    entity_id: Uuid,
  ) -> impl Future<Output = Result<Vec<EntityMerge>>> + Send + '_;
}
