//! Integration tests for `SqliteStore` against an in-memory database with
//! tempdir-backed blobs.

use lore_core::{
  Error,
  entity::EntityQuery,
  observation::{NewFragment, NewObservation, Priority},
  run::{ExtractorKind, NewRun, RunConfig, RunOutcome, RunStatus},
  source::{NewSource, Source},
  store::TruthStore,
};
use serde_json::json;
use uuid::Uuid;

use crate::SqliteStore;

const USER_A: Uuid = Uuid::from_u128(0xA);
const USER_B: Uuid = Uuid::from_u128(0xB);

async fn store() -> (SqliteStore, tempfile::TempDir) {
  let dir = tempfile::tempdir().expect("tempdir");
  let s = SqliteStore::open_in_memory(dir.path())
    .await
    .expect("in-memory store");
  (s, dir)
}

fn text_source(text: &str) -> NewSource {
  NewSource {
    mime_type: "text/plain".to_string(),
    bytes:     text.as_bytes().to_vec(),
  }
}

async fn seeded_source(s: &SqliteStore, user: Uuid, text: &str) -> Source {
  s.ingest_source(user, text_source(text))
    .await
    .expect("ingest")
    .source
}

fn rules_config() -> RunConfig {
  RunConfig {
    extractor:          ExtractorKind::Rules,
    model:              None,
    temperature:        None,
    prompt_fingerprint: None,
    resolver_version:   "field-match-v1".to_string(),
    schema_version:     1,
    code_version:       "test".to_string(),
  }
}

fn run_input(source_id: Uuid) -> NewRun {
  NewRun { source_id, config: rules_config(), quota_exempt: false }
}

fn obs(
  entity_id: Uuid,
  source_id: Uuid,
  field: &str,
  value: serde_json::Value,
  priority: Priority,
) -> NewObservation {
  NewObservation {
    entity_id,
    field: field.to_string(),
    value,
    priority,
    source_id,
    interpretation_run_id: None,
  }
}

// ─── Sources ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn ingest_is_idempotent_per_user() {
  let (s, dir) = store().await;

  let first = s.ingest_source(USER_A, text_source("hello")).await.unwrap();
  assert!(!first.deduplicated);
  assert_eq!(first.source.byte_len, 5);
  assert_eq!(first.source.mime_type, "text/plain");

  let second = s.ingest_source(USER_A, text_source("hello")).await.unwrap();
  assert!(second.deduplicated);
  assert_eq!(second.source.source_id, first.source.source_id);
  assert_eq!(second.source.content_hash, first.source.content_hash);

  // exactly one blob file for the user
  let user_dir = dir.path().join(USER_A.hyphenated().to_string());
  let blobs: Vec<_> = std::fs::read_dir(&user_dir).unwrap().collect();
  assert_eq!(blobs.len(), 1);
}

#[tokio::test]
async fn same_bytes_for_two_users_are_separate_sources() {
  let (s, _dir) = store().await;

  let a = s.ingest_source(USER_A, text_source("shared")).await.unwrap();
  let b = s.ingest_source(USER_B, text_source("shared")).await.unwrap();

  assert!(!a.deduplicated);
  assert!(!b.deduplicated);
  assert_ne!(a.source.source_id, b.source.source_id);
  assert_eq!(a.source.content_hash, b.source.content_hash);
}

#[tokio::test]
async fn source_bytes_round_trip() {
  let (s, _dir) = store().await;

  let source = seeded_source(&s, USER_A, "raw payload").await;
  let bytes = s.read_source_bytes(USER_A, source.source_id).await.unwrap();
  assert_eq!(bytes, b"raw payload");
}

#[tokio::test]
async fn source_reads_enforce_ownership() {
  let (s, _dir) = store().await;

  let source = seeded_source(&s, USER_A, "mine").await;

  let err = s.get_source(USER_B, source.source_id).await.unwrap_err();
  assert!(matches!(err, Error::AccessDenied));

  let err = s
    .read_source_bytes(USER_B, source.source_id)
    .await
    .unwrap_err();
  assert!(matches!(err, Error::AccessDenied));

  let err = s.get_source(USER_A, Uuid::new_v4()).await.unwrap_err();
  assert!(matches!(err, Error::NotFound { .. }));
}

// ─── Interpretation runs ─────────────────────────────────────────────────────

#[tokio::test]
async fn run_lifecycle_running_to_completed() {
  let (s, _dir) = store().await;
  let source = seeded_source(&s, USER_A, "doc").await;

  let run = s
    .create_run(USER_A, run_input(source.source_id))
    .await
    .unwrap();
  assert_eq!(run.status, RunStatus::Running);
  assert!(run.completed_at.is_none());

  let finished = s
    .finish_run(USER_A, run.run_id, RunOutcome::Completed {
      observations: 3,
      fragments:    1,
    })
    .await
    .unwrap();
  assert_eq!(finished.status, RunStatus::Completed {
    observations: 3,
    fragments:    1,
  });
  assert!(finished.completed_at.is_some());
  assert_eq!(finished.config, rules_config());
}

#[tokio::test]
async fn finished_run_cannot_be_finished_again() {
  let (s, _dir) = store().await;
  let source = seeded_source(&s, USER_A, "doc").await;

  let run = s
    .create_run(USER_A, run_input(source.source_id))
    .await
    .unwrap();
  s.finish_run(USER_A, run.run_id, RunOutcome::Failed {
    error: "model unreachable".to_string(),
  })
  .await
  .unwrap();

  let fetched = s.get_run(USER_A, run.run_id).await.unwrap();
  assert!(matches!(fetched.status, RunStatus::Failed { ref error } if error == "model unreachable"));

  let err = s
    .finish_run(USER_A, run.run_id, RunOutcome::Completed {
      observations: 0,
      fragments:    0,
    })
    .await
    .unwrap_err();
  assert!(matches!(err, Error::Validation(_)));
}

#[tokio::test]
async fn create_run_requires_owned_source() {
  let (s, _dir) = store().await;
  let source = seeded_source(&s, USER_A, "doc").await;

  let err = s
    .create_run(USER_B, run_input(source.source_id))
    .await
    .unwrap_err();
  assert!(matches!(err, Error::AccessDenied));
}

#[tokio::test]
async fn list_runs_is_source_scoped_newest_first() {
  let (s, _dir) = store().await;
  let source = seeded_source(&s, USER_A, "doc").await;
  let other = seeded_source(&s, USER_A, "other doc").await;

  let first = s
    .create_run(USER_A, run_input(source.source_id))
    .await
    .unwrap();
  let second = s
    .create_run(USER_A, run_input(source.source_id))
    .await
    .unwrap();
  s.create_run(USER_A, run_input(other.source_id))
    .await
    .unwrap();

  let runs = s.list_runs(USER_A, source.source_id).await.unwrap();
  assert_eq!(runs.len(), 2);
  let ids: Vec<_> = runs.iter().map(|r| r.run_id).collect();
  assert!(ids.contains(&first.run_id));
  assert!(ids.contains(&second.run_id));
  assert!(runs[0].created_at >= runs[1].created_at);
}

#[tokio::test]
async fn count_runs_since_is_per_user() {
  let (s, _dir) = store().await;
  let start = chrono::Utc::now();

  let a_source = seeded_source(&s, USER_A, "a").await;
  let b_source = seeded_source(&s, USER_B, "b").await;

  for _ in 0..3 {
    s.create_run(USER_A, run_input(a_source.source_id))
      .await
      .unwrap();
  }
  s.create_run(USER_B, run_input(b_source.source_id))
    .await
    .unwrap();

  assert_eq!(s.count_runs_since(USER_A, start).await.unwrap(), 3);
  assert_eq!(s.count_runs_since(USER_B, start).await.unwrap(), 1);
  assert_eq!(
    s.count_runs_since(USER_A, chrono::Utc::now()).await.unwrap(),
    0
  );
}

#[tokio::test]
async fn count_runs_since_skips_quota_exempt_runs() {
  let (s, _dir) = store().await;
  let start = chrono::Utc::now();
  let source = seeded_source(&s, USER_A, "doc").await;

  s.create_run(USER_A, run_input(source.source_id))
    .await
    .unwrap();
  s.create_run(USER_A, NewRun {
    quota_exempt: true,
    ..run_input(source.source_id)
  })
  .await
  .unwrap();

  assert_eq!(s.count_runs_since(USER_A, start).await.unwrap(), 1);

  // exempt runs still appear in the audit listing
  let runs = s.list_runs(USER_A, source.source_id).await.unwrap();
  assert_eq!(runs.len(), 2);
}

// ─── Entities ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn create_and_get_entity() {
  let (s, _dir) = store().await;

  let entity = s.create_entity(USER_A, "person".to_string()).await.unwrap();
  assert_eq!(entity.kind, "person");
  assert!(!entity.is_merged());

  let fetched = s.get_entity(USER_A, entity.entity_id).await.unwrap();
  assert_eq!(fetched, entity);

  let err = s.get_entity(USER_B, entity.entity_id).await.unwrap_err();
  assert!(matches!(err, Error::AccessDenied));
}

#[tokio::test]
async fn list_entities_filters_kind_and_merged() {
  let (s, _dir) = store().await;

  let keep = s.create_entity(USER_A, "person".to_string()).await.unwrap();
  let gone = s.create_entity(USER_A, "person".to_string()).await.unwrap();
  s.create_entity(USER_A, "organization".to_string())
    .await
    .unwrap();
  s.create_entity(USER_B, "person".to_string()).await.unwrap();

  s.merge_entities(USER_A, gone.entity_id, keep.entity_id)
    .await
    .unwrap();

  let people = s
    .list_entities(USER_A, EntityQuery {
      kind: Some("person".to_string()),
      ..Default::default()
    })
    .await
    .unwrap();
  assert_eq!(people.len(), 1);
  assert_eq!(people[0].entity_id, keep.entity_id);

  let with_merged = s
    .list_entities(USER_A, EntityQuery {
      kind: Some("person".to_string()),
      include_merged: true,
      ..Default::default()
    })
    .await
    .unwrap();
  assert_eq!(with_merged.len(), 2);

  let everything = s
    .list_entities(USER_A, EntityQuery::default())
    .await
    .unwrap();
  assert_eq!(everything.len(), 2); // keep + organization; B's entity invisible
}

#[tokio::test]
async fn list_entities_respects_limit_and_offset() {
  let (s, _dir) = store().await;

  for _ in 0..5 {
    s.create_entity(USER_A, "person".to_string()).await.unwrap();
  }

  let page = s
    .list_entities(USER_A, EntityQuery {
      limit: Some(2),
      ..Default::default()
    })
    .await
    .unwrap();
  assert_eq!(page.len(), 2);

  let rest = s
    .list_entities(USER_A, EntityQuery {
      offset: Some(4),
      ..Default::default()
    })
    .await
    .unwrap();
  assert_eq!(rest.len(), 1);
}

// ─── Observations ────────────────────────────────────────────────────────────

#[tokio::test]
async fn append_and_list_observations() {
  let (s, _dir) = store().await;
  let source = seeded_source(&s, USER_A, "doc").await;
  let entity = s.create_entity(USER_A, "person".to_string()).await.unwrap();

  let recorded = s
    .append_observation(
      USER_A,
      obs(
        entity.entity_id,
        source.source_id,
        "name",
        json!("Alice"),
        Priority::Structured,
      ),
    )
    .await
    .unwrap();
  assert_eq!(recorded.entity_id, entity.entity_id);
  assert_eq!(recorded.priority, Priority::Structured);

  let ledger = s
    .observations_for_entity(USER_A, entity.entity_id)
    .await
    .unwrap();
  assert_eq!(ledger.len(), 1);
  assert_eq!(ledger[0], recorded);
}

#[tokio::test]
async fn append_enforces_entity_ownership() {
  let (s, _dir) = store().await;
  let source = seeded_source(&s, USER_A, "doc").await;
  let entity = s.create_entity(USER_A, "person".to_string()).await.unwrap();

  let err = s
    .append_observation(
      USER_B,
      obs(
        entity.entity_id,
        source.source_id,
        "name",
        json!("Mallory"),
        Priority::Correction,
      ),
    )
    .await
    .unwrap_err();
  assert!(matches!(err, Error::AccessDenied));

  let err = s
    .observations_for_entity(USER_B, entity.entity_id)
    .await
    .unwrap_err();
  assert!(matches!(err, Error::AccessDenied));
}

#[tokio::test]
async fn append_to_merged_entity_redirects_to_canonical() {
  let (s, _dir) = store().await;
  let source = seeded_source(&s, USER_A, "doc").await;
  let canonical = s.create_entity(USER_A, "person".to_string()).await.unwrap();
  let merged = s.create_entity(USER_A, "person".to_string()).await.unwrap();

  s.merge_entities(USER_A, merged.entity_id, canonical.entity_id)
    .await
    .unwrap();

  let recorded = s
    .append_observation(
      USER_A,
      obs(
        merged.entity_id,
        source.source_id,
        "email",
        json!("alice@example.com"),
        Priority::Correction,
      ),
    )
    .await
    .unwrap();
  assert_eq!(recorded.entity_id, canonical.entity_id);

  let ledger = s
    .observations_for_entity(USER_A, canonical.entity_id)
    .await
    .unwrap();
  assert_eq!(ledger.len(), 1);
}

#[tokio::test]
async fn fragments_round_trip() {
  let (s, _dir) = store().await;
  let source = seeded_source(&s, USER_A, "doc").await;
  let entity = s.create_entity(USER_A, "person".to_string()).await.unwrap();

  let fragment = s
    .append_fragment(USER_A, NewFragment {
      entity_id:             entity.entity_id,
      field:                 "birthday".to_string(),
      value:                 json!("next Tuesday"),
      reason:                "expected YYYY-MM-DD date".to_string(),
      source_id:             source.source_id,
      interpretation_run_id: None,
    })
    .await
    .unwrap();

  let fragments = s
    .fragments_for_entity(USER_A, entity.entity_id)
    .await
    .unwrap();
  assert_eq!(fragments.len(), 1);
  assert_eq!(fragments[0], fragment);
  assert_eq!(fragments[0].reason, "expected YYYY-MM-DD date");
}

// ─── Resolution lookup ───────────────────────────────────────────────────────

#[tokio::test]
async fn find_entity_by_field_matches_normalised_text() {
  let (s, _dir) = store().await;
  let source = seeded_source(&s, USER_A, "doc").await;
  let entity = s.create_entity(USER_A, "person".to_string()).await.unwrap();

  s.append_observation(
    USER_A,
    obs(
      entity.entity_id,
      source.source_id,
      "name",
      json!("  Alice   Liddell "),
      Priority::Extracted,
    ),
  )
  .await
  .unwrap();

  let found = s
    .find_entity_by_field(
      USER_A,
      "person".to_string(),
      "name".to_string(),
      "alice liddell".to_string(),
    )
    .await
    .unwrap();
  assert_eq!(found.map(|e| e.entity_id), Some(entity.entity_id));

  let missing = s
    .find_entity_by_field(
      USER_A,
      "person".to_string(),
      "name".to_string(),
      "bob".to_string(),
    )
    .await
    .unwrap();
  assert!(missing.is_none());

  // other users never see the entity
  let cross = s
    .find_entity_by_field(
      USER_B,
      "person".to_string(),
      "name".to_string(),
      "alice liddell".to_string(),
    )
    .await
    .unwrap();
  assert!(cross.is_none());
}

#[tokio::test]
async fn find_entity_by_field_prefers_earliest_and_skips_merged() {
  let (s, _dir) = store().await;
  let source = seeded_source(&s, USER_A, "doc").await;

  let older = s.create_entity(USER_A, "person".to_string()).await.unwrap();
  let newer = s.create_entity(USER_A, "person".to_string()).await.unwrap();
  for entity in [&older, &newer] {
    s.append_observation(
      USER_A,
      obs(
        entity.entity_id,
        source.source_id,
        "name",
        json!("Alice"),
        Priority::Extracted,
      ),
    )
    .await
    .unwrap();
  }

  let found = s
    .find_entity_by_field(
      USER_A,
      "person".to_string(),
      "name".to_string(),
      "alice".to_string(),
    )
    .await
    .unwrap();
  assert_eq!(found.map(|e| e.entity_id), Some(older.entity_id));

  // once the earliest is merged away, the lookup lands on the survivor
  s.merge_entities(USER_A, older.entity_id, newer.entity_id)
    .await
    .unwrap();
  let found = s
    .find_entity_by_field(
      USER_A,
      "person".to_string(),
      "name".to_string(),
      "alice".to_string(),
    )
    .await
    .unwrap();
  assert_eq!(found.map(|e| e.entity_id), Some(newer.entity_id));
}

// ─── Merge ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn merge_repoints_ledger_and_records_audit() {
  let (s, _dir) = store().await;
  let source = seeded_source(&s, USER_A, "doc").await;
  let keep = s.create_entity(USER_A, "person".to_string()).await.unwrap();
  let gone = s.create_entity(USER_A, "person".to_string()).await.unwrap();

  let kept_obs = s
    .append_observation(
      USER_A,
      obs(
        keep.entity_id,
        source.source_id,
        "name",
        json!("Alice"),
        Priority::Structured,
      ),
    )
    .await
    .unwrap();
  let moved_obs = s
    .append_observation(
      USER_A,
      obs(
        gone.entity_id,
        source.source_id,
        "email",
        json!("alice@example.com"),
        Priority::Extracted,
      ),
    )
    .await
    .unwrap();
  s.append_fragment(USER_A, NewFragment {
    entity_id:             gone.entity_id,
    field:                 "birthday".to_string(),
    value:                 json!("soon"),
    reason:                "expected YYYY-MM-DD date".to_string(),
    source_id:             source.source_id,
    interpretation_run_id: None,
  })
  .await
  .unwrap();

  let merge = s
    .merge_entities(USER_A, gone.entity_id, keep.entity_id)
    .await
    .unwrap();
  assert_eq!(merge.from_entity_id, gone.entity_id);
  assert_eq!(merge.to_entity_id, keep.entity_id);
  assert_eq!(merge.observation_count, 1);

  // ledger fully repointed, original timestamps intact
  let ledger = s
    .observations_for_entity(USER_A, keep.entity_id)
    .await
    .unwrap();
  assert_eq!(ledger.len(), 2);
  let moved = ledger
    .iter()
    .find(|o| o.observation_id == moved_obs.observation_id)
    .unwrap();
  assert_eq!(moved.entity_id, keep.entity_id);
  assert_eq!(moved.created_at, moved_obs.created_at);
  assert!(
    ledger.iter().any(|o| o.observation_id == kept_obs.observation_id)
  );

  let fragments = s
    .fragments_for_entity(USER_A, keep.entity_id)
    .await
    .unwrap();
  assert_eq!(fragments.len(), 1);

  // merged entity is marked and the audit row is queryable
  let gone_now = s.get_entity(USER_A, gone.entity_id).await.unwrap();
  assert_eq!(gone_now.merged_into, Some(keep.entity_id));
  assert!(gone_now.merged_at.is_some());

  let merges = s.merges_into(USER_A, keep.entity_id).await.unwrap();
  assert_eq!(merges.len(), 1);
  assert_eq!(merges[0].merge_id, merge.merge_id);
}

#[tokio::test]
async fn merge_preconditions_are_conflicts() {
  let (s, _dir) = store().await;
  let a = s.create_entity(USER_A, "person".to_string()).await.unwrap();
  let b = s.create_entity(USER_A, "person".to_string()).await.unwrap();
  let c = s.create_entity(USER_A, "person".to_string()).await.unwrap();
  let org = s
    .create_entity(USER_A, "organization".to_string())
    .await
    .unwrap();

  let err = s
    .merge_entities(USER_A, a.entity_id, a.entity_id)
    .await
    .unwrap_err();
  assert!(matches!(err, Error::MergeConflict(_)));

  let err = s
    .merge_entities(USER_A, a.entity_id, org.entity_id)
    .await
    .unwrap_err();
  assert!(matches!(err, Error::MergeConflict(_)));

  s.merge_entities(USER_A, a.entity_id, b.entity_id)
    .await
    .unwrap();

  // an already-merged from
  let err = s
    .merge_entities(USER_A, a.entity_id, c.entity_id)
    .await
    .unwrap_err();
  assert!(matches!(err, Error::MergeConflict(_)));

  // an already-merged target
  let err = s
    .merge_entities(USER_A, c.entity_id, a.entity_id)
    .await
    .unwrap_err();
  assert!(matches!(err, Error::MergeConflict(_)));
}

#[tokio::test]
async fn merge_validates_ownership_before_mutating() {
  let (s, _dir) = store().await;
  let mine = s.create_entity(USER_A, "person".to_string()).await.unwrap();
  let theirs = s.create_entity(USER_B, "person".to_string()).await.unwrap();

  let err = s
    .merge_entities(USER_A, mine.entity_id, theirs.entity_id)
    .await
    .unwrap_err();
  assert!(matches!(err, Error::AccessDenied));

  // nothing moved
  let mine_now = s.get_entity(USER_A, mine.entity_id).await.unwrap();
  assert!(!mine_now.is_merged());
  let theirs_now = s.get_entity(USER_B, theirs.entity_id).await.unwrap();
  assert!(!theirs_now.is_merged());
}
