//! Entity resolution — deciding which entity a candidate refers to.
//!
//! The heuristic is deliberately simple and versioned: `field-match-v1`
//! matches the candidate's identity-field value, normalised, against prior
//! observations of the same entity type, taking the earliest unmerged entity.
//! Its version tag is recorded on every run config so a future heuristic can
//! coexist with audit trails produced by this one.

use lore_core::{
  Result,
  entity::Entity,
  observation::lookup_text,
  schema::SchemaRegistry,
  store::TruthStore,
};
use uuid::Uuid;

use crate::extract::Candidate;

/// Version tag recorded on run configs.
pub const RESOLVER_VERSION: &str = "field-match-v1";

/// Resolve `candidate` to an existing entity or create a fresh one.
///
/// A type with no identity field (the fallback type included) never matches;
/// every such candidate gets its own entity. Merged entities never come back
/// from the lookup, so resolution always lands on a canonical entity.
pub async fn resolve_or_create<S: TruthStore>(
  store: &S,
  registry: &SchemaRegistry,
  user_id: Uuid,
  schema_version: u32,
  candidate: &Candidate,
) -> Result<Entity> {
  if let Some(identity) =
    registry.identity_field(schema_version, &candidate.entity_type)
    && let Some(value) = candidate.fields.get(identity)
    && let Some(text) = lookup_text(value)
    && let Some(entity) = store
      .find_entity_by_field(
        user_id,
        candidate.entity_type.clone(),
        identity.to_string(),
        text,
      )
      .await?
  {
    tracing::debug!(
      entity_id = %entity.entity_id,
      kind = %entity.kind,
      "resolved candidate to existing entity"
    );
    return Ok(entity);
  }

  store.create_entity(user_id, candidate.entity_type.clone()).await
}
