//! [`Engine`] — the pipeline orchestrator over a [`TruthStore`].

use std::{collections::BTreeMap, sync::Arc};

use chrono::{Datelike, TimeZone, Utc};
use lore_core::{
  Error, Result,
  entity::{Entity, EntityMerge, EntityQuery},
  observation::{NewFragment, NewObservation, Observation, Priority},
  run::{ExtractorKind, InterpretationRun, NewRun, RunConfig, RunOutcome},
  schema::{FieldCheck, SchemaRegistry},
  source::{IngestOutcome, NewSource, Source},
  store::TruthStore,
};
use uuid::Uuid;

use crate::{
  extract::{Candidate, Extractor},
  model::ModelExtractor,
  resolve::{self, RESOLVER_VERSION},
  rules::RulesExtractor,
};

// ─── Configuration ───────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct EngineConfig {
  /// Soft cap on interpretation runs per user per calendar month. A run
  /// consumes quota when it is created, whether or not it later completes;
  /// structured ingestion is exempt.
  pub monthly_run_quota: u32,
  /// Model extractor settings. When absent, every input goes through the
  /// rule-based extractor.
  pub model:             Option<crate::model::ModelConfig>,
}

impl Default for EngineConfig {
  fn default() -> Self {
    Self { monthly_run_quota: 500, model: None }
  }
}

/// Per-call options for [`Engine::interpret`].
#[derive(Debug, Clone, Default)]
pub struct InterpretOptions {
  /// Force a specific extractor variant instead of choosing by mime type.
  pub extractor:      Option<ExtractorKind>,
  /// Schema version to validate against. Defaults to the active version.
  pub schema_version: Option<u32>,
}

// ─── Results ─────────────────────────────────────────────────────────────────

/// Outcome of [`Engine::ingest`].
#[derive(Debug)]
pub struct IngestResult {
  pub outcome: IngestOutcome,
  pub run:     Option<InterpretationRun>,
}

/// Input to [`Engine::ingest_structured`]: one pre-structured entity payload.
#[derive(Debug, Clone)]
pub struct StructuredPayload {
  pub entity_type:    String,
  pub fields:         BTreeMap<String, serde_json::Value>,
  pub schema_version: Option<u32>,
}

/// Outcome of [`Engine::ingest_structured`].
#[derive(Debug)]
pub struct StructuredResult {
  pub source:       Source,
  pub run:          InterpretationRun,
  pub observations: Vec<Observation>,
}

// ─── Engine ──────────────────────────────────────────────────────────────────

/// The ingestion, interpretation, correction, and merge surface, generic over
/// the storage backend.
pub struct Engine<S> {
  pub(crate) store:    Arc<S>,
  pub(crate) registry: SchemaRegistry,
  config:              EngineConfig,
  rules:               Arc<dyn Extractor>,
  model:               Option<Arc<dyn Extractor>>,
}

impl<S: TruthStore> Engine<S> {
  pub fn new(
    store: Arc<S>,
    registry: SchemaRegistry,
    config: EngineConfig,
  ) -> Self {
    let model: Option<Arc<dyn Extractor>> = config
      .model
      .clone()
      .map(|cfg| Arc::new(ModelExtractor::new(cfg)) as Arc<dyn Extractor>);

    Self {
      store,
      registry,
      config,
      rules: Arc::new(RulesExtractor),
      model,
    }
  }

  /// Replace the extractor slot matching `extractor.kind()`. Used to wire in
  /// custom or scripted extraction backends.
  pub fn with_extractor(mut self, extractor: Arc<dyn Extractor>) -> Self {
    match extractor.kind() {
      ExtractorKind::Rules => self.rules = extractor,
      ExtractorKind::Model => self.model = Some(extractor),
    }
    self
  }

  pub fn registry(&self) -> &SchemaRegistry {
    &self.registry
  }

  // ── Ingestion ─────────────────────────────────────────────────────────────

  /// Ingest raw bytes, optionally interpreting them in the same call.
  pub async fn ingest(
    &self,
    user_id: Uuid,
    bytes: Vec<u8>,
    mime_type: String,
    interpret: bool,
  ) -> Result<IngestResult> {
    let outcome = self
      .store
      .ingest_source(user_id, NewSource { mime_type, bytes })
      .await?;

    tracing::info!(
      source_id = %outcome.source.source_id,
      deduplicated = outcome.deduplicated,
      byte_len = outcome.source.byte_len,
      "ingested source"
    );

    let run = if interpret {
      Some(
        self
          .interpret(
            user_id,
            outcome.source.source_id,
            InterpretOptions::default(),
          )
          .await?,
      )
    } else {
      None
    };

    Ok(IngestResult { outcome, run })
  }

  /// Ingest a pre-structured entity payload.
  ///
  /// The payload is content-addressed like any other source, then validated
  /// straight into priority-100 observations under a rules-configured run.
  /// Quota-exempt: no extraction backend is invoked.
  pub async fn ingest_structured(
    &self,
    user_id: Uuid,
    payload: StructuredPayload,
  ) -> Result<StructuredResult> {
    let schema_version =
      payload.schema_version.unwrap_or(self.registry.active_version());
    // Unknown versions must fail before anything persists.
    self.registry.version(schema_version)?;
    if payload.fields.is_empty() {
      return Err(Error::Validation("payload has no fields".to_string()));
    }

    let candidate = Candidate {
      entity_type: payload.entity_type.clone(),
      fields:      payload.fields.clone(),
    };

    let bytes = serde_json::to_vec(&serde_json::json!({
      "entity_type": payload.entity_type,
      "fields":      payload.fields,
    }))
    .map_err(Error::storage)?;

    let outcome = self
      .store
      .ingest_source(user_id, NewSource {
        mime_type: "application/json".to_string(),
        bytes,
      })
      .await?;
    let source = outcome.source;

    let run = self
      .store
      .create_run(user_id, NewRun {
        source_id:    source.source_id,
        config:       self.run_config(&*self.rules, schema_version),
        quota_exempt: true,
      })
      .await?;

    let (observations, fragments) = match self
      .record_candidates(
        user_id,
        &source,
        &run,
        schema_version,
        Priority::Structured,
        vec![candidate],
      )
      .await
    {
      Ok(recorded) => recorded,
      Err(e) => return Err(self.abandon_run(user_id, run.run_id, e).await),
    };

    let run = self
      .store
      .finish_run(user_id, run.run_id, RunOutcome::Completed {
        observations: observations.len() as u32,
        fragments,
      })
      .await?;

    Ok(StructuredResult { source, run, observations })
  }

  // ── Interpretation ────────────────────────────────────────────────────────

  /// Run one interpretation over a stored source.
  ///
  /// The returned run is terminal: `completed` with counts, or `failed` with
  /// the extraction error recorded for audit. Only errors that prevented the
  /// run from existing at all (quota, ownership, storage) surface as `Err`.
  pub async fn interpret(
    &self,
    user_id: Uuid,
    source_id: Uuid,
    options: InterpretOptions,
  ) -> Result<InterpretationRun> {
    let source = self.store.get_source(user_id, source_id).await?;
    let schema_version =
      options.schema_version.unwrap_or(self.registry.active_version());
    self.registry.version(schema_version)?;

    self.check_quota(user_id).await?;

    let extractor = self.extractor_for(&source.mime_type, options.extractor)?;
    let run = self
      .store
      .create_run(user_id, NewRun {
        source_id,
        config: self.run_config(&*extractor, schema_version),
        quota_exempt: false,
      })
      .await?;

    let bytes = self.store.read_source_bytes(user_id, source_id).await?;

    let candidates = match extractor.extract(&source, &bytes).await {
      Ok(candidates) => candidates,
      Err(e) => {
        tracing::warn!(
          run_id = %run.run_id,
          source_id = %source_id,
          error = %e,
          "extraction failed"
        );
        return self
          .store
          .finish_run(user_id, run.run_id, RunOutcome::Failed {
            error: e.to_string(),
          })
          .await;
      }
    };

    let priority = match extractor.kind() {
      ExtractorKind::Rules => Priority::Structured,
      ExtractorKind::Model => Priority::Extracted,
    };

    let (observations, fragments) = match self
      .record_candidates(
        user_id,
        &source,
        &run,
        schema_version,
        priority,
        candidates,
      )
      .await
    {
      Ok(recorded) => recorded,
      Err(e) => return Err(self.abandon_run(user_id, run.run_id, e).await),
    };

    tracing::info!(
      run_id = %run.run_id,
      source_id = %source_id,
      observations = observations.len(),
      fragments,
      "interpretation completed"
    );

    self
      .store
      .finish_run(user_id, run.run_id, RunOutcome::Completed {
        observations: observations.len() as u32,
        fragments,
      })
      .await
  }

  /// Resolve each candidate to an entity and validate its fields into
  /// observations and fragments.
  async fn record_candidates(
    &self,
    user_id: Uuid,
    source: &Source,
    run: &InterpretationRun,
    schema_version: u32,
    priority: Priority,
    candidates: Vec<Candidate>,
  ) -> Result<(Vec<Observation>, u32)> {
    let mut observations = Vec::new();
    let mut fragments = 0u32;

    for candidate in candidates {
      let entity = resolve::resolve_or_create(
        &*self.store,
        &self.registry,
        user_id,
        schema_version,
        &candidate,
      )
      .await?;

      for (field, value) in candidate.fields {
        let check = self.registry.validate_field(
          schema_version,
          &candidate.entity_type,
          &field,
          &value,
        )?;

        match check {
          FieldCheck::Accepted { value, .. } => {
            let observation = self
              .store
              .append_observation(user_id, NewObservation {
                entity_id: entity.entity_id,
                field,
                value,
                priority,
                source_id: source.source_id,
                interpretation_run_id: Some(run.run_id),
              })
              .await?;
            observations.push(observation);
          }
          FieldCheck::Rejected { reason } => {
            self
              .store
              .append_fragment(user_id, NewFragment {
                entity_id: entity.entity_id,
                field,
                value,
                reason,
                source_id: source.source_id,
                interpretation_run_id: Some(run.run_id),
              })
              .await?;
            fragments += 1;
          }
        }
      }
    }

    Ok((observations, fragments))
  }

  fn run_config(
    &self,
    extractor: &dyn Extractor,
    schema_version: u32,
  ) -> RunConfig {
    RunConfig {
      extractor: extractor.kind(),
      model: extractor.model(),
      temperature: extractor.temperature(),
      prompt_fingerprint: extractor.prompt_fingerprint(),
      resolver_version: RESOLVER_VERSION.to_string(),
      schema_version,
      code_version: env!("CARGO_PKG_VERSION").to_string(),
    }
  }

  /// Pick the extractor for a source: forced kind if requested, otherwise
  /// rules for JSON-shaped inputs and the model (when configured) for
  /// everything else.
  fn extractor_for(
    &self,
    mime_type: &str,
    requested: Option<ExtractorKind>,
  ) -> Result<Arc<dyn Extractor>> {
    match requested {
      Some(ExtractorKind::Rules) => Ok(self.rules.clone()),
      Some(ExtractorKind::Model) => self.model.clone().ok_or_else(|| {
        Error::Validation("model extractor is not configured".to_string())
      }),
      None => {
        let structured = mime_type == "application/json"
          || mime_type.ends_with("+json");
        if structured {
          Ok(self.rules.clone())
        } else {
          Ok(self.model.clone().unwrap_or_else(|| self.rules.clone()))
        }
      }
    }
  }

  /// Force a run to `failed` when persistence errored after it was created.
  /// The caller sees the original error; a second failure here is logged and
  /// dropped.
  async fn abandon_run(
    &self,
    user_id: Uuid,
    run_id: Uuid,
    cause: Error,
  ) -> Error {
    let outcome = RunOutcome::Failed { error: cause.to_string() };
    if let Err(e) = self.store.finish_run(user_id, run_id, outcome).await {
      tracing::warn!(%run_id, error = %e, "could not finalise abandoned run");
    }
    cause
  }

  async fn check_quota(&self, user_id: Uuid) -> Result<()> {
    let limit = self.config.monthly_run_quota;
    let used = self.store.count_runs_since(user_id, month_start()).await?;
    if used >= limit as u64 {
      tracing::warn!(%user_id, used, limit, "monthly run quota exhausted");
      return Err(Error::QuotaExceeded { used, limit });
    }
    Ok(())
  }

  // ── Correction ────────────────────────────────────────────────────────────

  /// Record a manual correction: a priority-1000 observation that permanently
  /// outranks anything reinterpretation can produce.
  ///
  /// The correction payload is itself ingested as a content-addressed source,
  /// so the provenance chain stays complete without an interpretation run.
  /// Corrections addressed to a merged entity land on its canonical target.
  pub async fn correct(
    &self,
    user_id: Uuid,
    entity_id: Uuid,
    field: String,
    value: serde_json::Value,
  ) -> Result<Observation> {
    let entity = self.canonical_entity(user_id, entity_id).await?;

    let version = self.registry.active_version();
    let check =
      self.registry.validate_field(version, &entity.kind, &field, &value)?;
    let value = match check {
      FieldCheck::Accepted { value, .. } => value,
      FieldCheck::Rejected { reason } => {
        return Err(Error::SchemaViolation {
          entity_type: entity.kind,
          field,
          reason,
        });
      }
    };

    let bytes = serde_json::to_vec(&serde_json::json!({
      "correction": {
        "entity_id": entity.entity_id,
        "field":     field,
        "value":     value,
      }
    }))
    .map_err(Error::storage)?;

    let outcome = self
      .store
      .ingest_source(user_id, NewSource {
        mime_type: "application/json".to_string(),
        bytes,
      })
      .await?;

    self
      .store
      .append_observation(user_id, NewObservation {
        entity_id: entity.entity_id,
        field,
        value,
        priority: Priority::Correction,
        source_id: outcome.source.source_id,
        interpretation_run_id: None,
      })
      .await
  }

  // ── Merge and listing ─────────────────────────────────────────────────────

  pub async fn merge_entities(
    &self,
    user_id: Uuid,
    from_entity_id: Uuid,
    to_entity_id: Uuid,
  ) -> Result<EntityMerge> {
    let merge = self
      .store
      .merge_entities(user_id, from_entity_id, to_entity_id)
      .await?;
    tracing::info!(
      merge_id = %merge.merge_id,
      from = %from_entity_id,
      to = %to_entity_id,
      observations = merge.observation_count,
      "merged entities"
    );
    Ok(merge)
  }

  pub async fn retrieve_entities(
    &self,
    user_id: Uuid,
    query: EntityQuery,
  ) -> Result<Vec<Entity>> {
    self.store.list_entities(user_id, query).await
  }

  pub async fn get_source(
    &self,
    user_id: Uuid,
    source_id: Uuid,
  ) -> Result<Source> {
    self.store.get_source(user_id, source_id).await
  }

  pub async fn list_runs(
    &self,
    user_id: Uuid,
    source_id: Uuid,
  ) -> Result<Vec<InterpretationRun>> {
    self.store.list_runs(user_id, source_id).await
  }

  /// Resolve an entity reference, following a merged entity's redirect to
  /// its canonical target. One hop suffices: merges are flat.
  pub(crate) async fn canonical_entity(
    &self,
    user_id: Uuid,
    entity_id: Uuid,
  ) -> Result<Entity> {
    let entity = self.store.get_entity(user_id, entity_id).await?;
    match entity.merged_into {
      Some(target) => self.store.get_entity(user_id, target).await,
      None => Ok(entity),
    }
  }
}

/// Start of the current UTC calendar month — the quota window boundary.
fn month_start() -> chrono::DateTime<Utc> {
  let now = Utc::now();
  Utc
    .with_ymd_and_hms(now.year(), now.month(), 1, 0, 0, 0)
    .single()
    // The first of a month at midnight is always a valid UTC instant.
    .unwrap_or(now)
}

#[cfg(test)]
mod month_tests {
  use super::*;

  #[test]
  fn month_start_is_first_midnight_of_current_month() {
    let start = month_start();
    let now = Utc::now();
    assert_eq!(start.day(), 1);
    assert_eq!(start.month(), now.month());
    assert_eq!(start.year(), now.year());
    assert!(start <= now);
  }
}
