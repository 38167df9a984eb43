//! [`SqliteStore`] — the SQLite implementation of [`TruthStore`].

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use lore_core::{
  Error, Result,
  entity::{Entity, EntityMerge, EntityQuery},
  observation::{
    NewFragment, NewObservation, Observation, RawFragment, lookup_text,
  },
  run::{InterpretationRun, NewRun, RunOutcome, RunStatus},
  source::{IngestOutcome, NewSource, Source},
  store::TruthStore,
};
use rusqlite::OptionalExtension as _;
use uuid::Uuid;

use crate::{
  blob::{self, BlobStore},
  encode::{
    RawEntity, RawFragmentRow, RawMerge, RawObservation, RawRun, RawSource,
    decode_uuid, encode_dt, encode_uuid,
  },
  schema::SCHEMA,
};

// ─── Store ───────────────────────────────────────────────────────────────────

/// A Lore truth store backed by a single SQLite file plus a blob directory.
///
/// Cloning is cheap — the inner connection is reference-counted. All calls
/// through one store serialise on the connection's dedicated thread, so each
/// closure below executes atomically with respect to the others; the merge
/// additionally runs in an explicit transaction because it must hold across
/// process crashes too.
#[derive(Clone)]
pub struct SqliteStore {
  conn:  tokio_rusqlite::Connection,
  blobs: BlobStore,
}

/// Wrap a domain error so it survives the trip out of a connection closure.
fn domain(err: Error) -> tokio_rusqlite::Error {
  tokio_rusqlite::Error::Other(Box::new(err))
}

/// Recover domain errors smuggled through the closure boundary; everything
/// else is a retryable storage failure.
fn from_call(err: tokio_rusqlite::Error) -> Error {
  match err {
    tokio_rusqlite::Error::Other(inner) => match inner.downcast::<Error>() {
      Ok(domain) => *domain,
      Err(other) => Error::storage(other),
    },
    other => Error::storage(other),
  }
}

impl SqliteStore {
  /// Open (or create) a store at `db_path` with blobs rooted at `blob_root`,
  /// and run schema initialisation.
  pub async fn open(
    db_path: impl AsRef<Path>,
    blob_root: impl Into<PathBuf>,
  ) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(db_path)
      .await
      .map_err(Error::storage)?;
    let store = Self { conn, blobs: BlobStore::new(blob_root) };
    store.init_schema().await?;
    Ok(store)
  }

  /// Open an in-memory store — useful for testing. Blobs still need a real
  /// directory.
  pub async fn open_in_memory(blob_root: impl Into<PathBuf>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory()
      .await
      .map_err(Error::storage)?;
    let store = Self { conn, blobs: BlobStore::new(blob_root) };
    store.init_schema().await?;
    Ok(store)
  }

  async fn init_schema(&self) -> Result<()> {
    self
      .call(|conn| {
        conn.execute_batch(SCHEMA)?;
        Ok(())
      })
      .await
  }

  async fn call<T, F>(&self, f: F) -> Result<T>
  where
    F: FnOnce(&mut rusqlite::Connection) -> tokio_rusqlite::Result<T>
      + Send
      + 'static,
    T: Send + 'static,
  {
    self.conn.call(f).await.map_err(from_call)
  }
}

// ─── Row mappers ─────────────────────────────────────────────────────────────

fn source_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawSource> {
  Ok(RawSource {
    source_id:    row.get(0)?,
    user_id:      row.get(1)?,
    content_hash: row.get(2)?,
    mime_type:    row.get(3)?,
    locator:      row.get(4)?,
    byte_len:     row.get(5)?,
    created_at:   row.get(6)?,
  })
}

fn run_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawRun> {
  Ok(RawRun {
    run_id:       row.get(0)?,
    source_id:    row.get(1)?,
    user_id:      row.get(2)?,
    config_json:  row.get(3)?,
    status_json:  row.get(4)?,
    created_at:   row.get(5)?,
    completed_at: row.get(6)?,
  })
}

fn entity_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawEntity> {
  Ok(RawEntity {
    entity_id:   row.get(0)?,
    user_id:     row.get(1)?,
    kind:        row.get(2)?,
    created_at:  row.get(3)?,
    merged_into: row.get(4)?,
    merged_at:   row.get(5)?,
  })
}

fn observation_from_row(
  row: &rusqlite::Row<'_>,
) -> rusqlite::Result<RawObservation> {
  Ok(RawObservation {
    observation_id: row.get(0)?,
    entity_id:      row.get(1)?,
    field:          row.get(2)?,
    value_json:     row.get(3)?,
    priority:       row.get(4)?,
    source_id:      row.get(5)?,
    run_id:         row.get(6)?,
    created_at:     row.get(7)?,
  })
}

fn fragment_from_row(
  row: &rusqlite::Row<'_>,
) -> rusqlite::Result<RawFragmentRow> {
  Ok(RawFragmentRow {
    fragment_id: row.get(0)?,
    entity_id:   row.get(1)?,
    field:       row.get(2)?,
    value_json:  row.get(3)?,
    reason:      row.get(4)?,
    source_id:   row.get(5)?,
    run_id:      row.get(6)?,
    created_at:  row.get(7)?,
  })
}

fn merge_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawMerge> {
  Ok(RawMerge {
    merge_id:          row.get(0)?,
    user_id:           row.get(1)?,
    from_entity_id:    row.get(2)?,
    to_entity_id:      row.get(3)?,
    observation_count: row.get(4)?,
    created_at:        row.get(5)?,
  })
}

const SOURCE_COLS: &str =
  "source_id, user_id, content_hash, mime_type, locator, byte_len, created_at";
const RUN_COLS: &str =
  "run_id, source_id, user_id, config_json, status_json, created_at, \
   completed_at";
const ENTITY_COLS: &str =
  "entity_id, user_id, kind, created_at, merged_into, merged_at";
const OBSERVATION_COLS: &str =
  "observation_id, entity_id, field, value_json, priority, source_id, run_id, \
   created_at";
const FRAGMENT_COLS: &str =
  "fragment_id, entity_id, field, value_json, reason, source_id, run_id, \
   created_at";
const MERGE_COLS: &str =
  "merge_id, user_id, from_entity_id, to_entity_id, observation_count, \
   created_at";

// ─── Ownership guards (run inside connection closures) ───────────────────────

fn fetch_source_by_hash(
  conn: &rusqlite::Connection,
  user_str: &str,
  hash: &str,
) -> tokio_rusqlite::Result<Option<RawSource>> {
  Ok(
    conn
      .query_row(
        &format!(
          "SELECT {SOURCE_COLS} FROM sources
           WHERE user_id = ?1 AND content_hash = ?2"
        ),
        rusqlite::params![user_str, hash],
        source_from_row,
      )
      .optional()?,
  )
}

fn require_source(
  conn: &rusqlite::Connection,
  user_str: &str,
  id: Uuid,
) -> tokio_rusqlite::Result<RawSource> {
  let raw = conn
    .query_row(
      &format!("SELECT {SOURCE_COLS} FROM sources WHERE source_id = ?1"),
      rusqlite::params![encode_uuid(id)],
      source_from_row,
    )
    .optional()?;

  let Some(raw) = raw else {
    return Err(domain(Error::not_found("source", id)));
  };
  if raw.user_id != user_str {
    return Err(domain(Error::AccessDenied));
  }
  Ok(raw)
}

fn require_run(
  conn: &rusqlite::Connection,
  user_str: &str,
  id: Uuid,
) -> tokio_rusqlite::Result<RawRun> {
  let raw = conn
    .query_row(
      &format!("SELECT {RUN_COLS} FROM interpretation_runs WHERE run_id = ?1"),
      rusqlite::params![encode_uuid(id)],
      run_from_row,
    )
    .optional()?;

  let Some(raw) = raw else {
    return Err(domain(Error::not_found("run", id)));
  };
  if raw.user_id != user_str {
    return Err(domain(Error::AccessDenied));
  }
  Ok(raw)
}

fn require_entity(
  conn: &rusqlite::Connection,
  user_str: &str,
  id: Uuid,
) -> tokio_rusqlite::Result<RawEntity> {
  let raw = conn
    .query_row(
      &format!("SELECT {ENTITY_COLS} FROM entities WHERE entity_id = ?1"),
      rusqlite::params![encode_uuid(id)],
      entity_from_row,
    )
    .optional()?;

  let Some(raw) = raw else {
    return Err(domain(Error::not_found("entity", id)));
  };
  if raw.user_id != user_str {
    return Err(domain(Error::AccessDenied));
  }
  Ok(raw)
}

// ─── TruthStore impl ─────────────────────────────────────────────────────────

impl TruthStore for SqliteStore {
  // ── Sources ───────────────────────────────────────────────────────────────

  async fn ingest_source(
    &self,
    user_id: Uuid,
    input: NewSource,
  ) -> Result<IngestOutcome> {
    let hash = blob::content_hash(&input.bytes);
    let locator = blob::locator(user_id, &hash);
    let user_str = encode_uuid(user_id);

    // Dedup check first: a hit skips the blob write entirely.
    let existing = {
      let user_str = user_str.clone();
      let hash = hash.clone();
      self
        .call(move |conn| fetch_source_by_hash(conn, &user_str, &hash))
        .await?
    };
    if let Some(raw) = existing {
      return Ok(IngestOutcome {
        source:       raw.into_source()?,
        deduplicated: true,
      });
    }

    // Blob before row: a Source row must never exist without its bytes. A
    // crash after this write leaves an orphan blob that the retried ingest
    // overwrites with identical content.
    self.blobs.write(&locator, &input.bytes).await?;

    let source = Source {
      source_id: Uuid::new_v4(),
      user_id,
      content_hash: hash.clone(),
      mime_type: input.mime_type,
      locator,
      byte_len: input.bytes.len() as u64,
      created_at: Utc::now(),
    };

    let insert = {
      let id_str = encode_uuid(source.source_id);
      let user_str = user_str.clone();
      let hash = hash.clone();
      let mime = source.mime_type.clone();
      let loc = source.locator.clone();
      let len = source.byte_len as i64;
      let at_str = encode_dt(source.created_at);

      self
        .call(move |conn| {
          // Lose gracefully to a concurrent ingest of the same bytes:
          // whichever row landed first owns the hash.
          conn.execute(
            "INSERT INTO sources
               (source_id, user_id, content_hash, mime_type, locator,
                byte_len, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT (user_id, content_hash) DO NOTHING",
            rusqlite::params![id_str, user_str, hash, mime, loc, len, at_str],
          )?;
          let inserted = conn.changes() == 1;

          match fetch_source_by_hash(conn, &user_str, &hash)? {
            Some(raw) => Ok((raw, inserted)),
            None => Err(domain(Error::Storage(
              "source row missing after insert".to_string(),
            ))),
          }
        })
        .await?
    };

    let (raw, inserted) = insert;
    Ok(IngestOutcome {
      source:       raw.into_source()?,
      deduplicated: !inserted,
    })
  }

  async fn get_source(&self, user_id: Uuid, source_id: Uuid) -> Result<Source> {
    let user_str = encode_uuid(user_id);
    let raw = self
      .call(move |conn| require_source(conn, &user_str, source_id))
      .await?;
    raw.into_source()
  }

  async fn read_source_bytes(
    &self,
    user_id: Uuid,
    source_id: Uuid,
  ) -> Result<Vec<u8>> {
    let source = self.get_source(user_id, source_id).await?;
    self.blobs.read(&source.locator).await
  }

  // ── Interpretation runs ───────────────────────────────────────────────────

  async fn create_run(
    &self,
    user_id: Uuid,
    input: NewRun,
  ) -> Result<InterpretationRun> {
    let run = InterpretationRun {
      run_id: Uuid::new_v4(),
      source_id: input.source_id,
      user_id,
      config: input.config,
      status: RunStatus::Running,
      created_at: Utc::now(),
      completed_at: None,
    };

    let run_str = encode_uuid(run.run_id);
    let source_str = encode_uuid(run.source_id);
    let user_str = encode_uuid(user_id);
    let config_json = serde_json::to_string(&run.config).map_err(Error::storage)?;
    let status_json = serde_json::to_string(&run.status).map_err(Error::storage)?;
    let at_str = encode_dt(run.created_at);
    let source_id = input.source_id;
    let exempt = input.quota_exempt;

    self
      .call(move |conn| {
        require_source(conn, &user_str, source_id)?;
        conn.execute(
          "INSERT INTO interpretation_runs
             (run_id, source_id, user_id, config_json, status_json,
              quota_exempt, created_at, completed_at)
           VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, NULL)",
          rusqlite::params![
            run_str, source_str, user_str, config_json, status_json, exempt,
            at_str
          ],
        )?;
        Ok(())
      })
      .await?;

    Ok(run)
  }

  async fn finish_run(
    &self,
    user_id: Uuid,
    run_id: Uuid,
    outcome: RunOutcome,
  ) -> Result<InterpretationRun> {
    let status = match outcome {
      RunOutcome::Completed { observations, fragments } => {
        RunStatus::Completed { observations, fragments }
      }
      RunOutcome::Failed { error } => RunStatus::Failed { error },
    };

    let user_str = encode_uuid(user_id);
    let run_str = encode_uuid(run_id);
    let status_json = serde_json::to_string(&status).map_err(Error::storage)?;
    let at_str = encode_dt(Utc::now());

    let raw = self
      .call(move |conn| {
        let raw = require_run(conn, &user_str, run_id)?;
        // completed_at is set exactly when the status goes terminal
        if raw.completed_at.is_some() {
          return Err(domain(Error::Validation(format!(
            "run {run_id} is already finished"
          ))));
        }
        conn.execute(
          "UPDATE interpretation_runs
           SET status_json = ?1, completed_at = ?2
           WHERE run_id = ?3",
          rusqlite::params![status_json, at_str, run_str],
        )?;
        require_run(conn, &user_str, run_id)
      })
      .await?;

    raw.into_run()
  }

  async fn get_run(
    &self,
    user_id: Uuid,
    run_id: Uuid,
  ) -> Result<InterpretationRun> {
    let user_str = encode_uuid(user_id);
    let raw = self
      .call(move |conn| require_run(conn, &user_str, run_id))
      .await?;
    raw.into_run()
  }

  async fn list_runs(
    &self,
    user_id: Uuid,
    source_id: Uuid,
  ) -> Result<Vec<InterpretationRun>> {
    let user_str = encode_uuid(user_id);

    let raws: Vec<RawRun> = self
      .call(move |conn| {
        require_source(conn, &user_str, source_id)?;
        let mut stmt = conn.prepare(&format!(
          "SELECT {RUN_COLS} FROM interpretation_runs
           WHERE source_id = ?1
           ORDER BY created_at DESC, run_id DESC"
        ))?;
        let rows = stmt
          .query_map(rusqlite::params![encode_uuid(source_id)], run_from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawRun::into_run).collect()
  }

  async fn count_runs_since(
    &self,
    user_id: Uuid,
    since: DateTime<Utc>,
  ) -> Result<u64> {
    let user_str = encode_uuid(user_id);
    let since_str = encode_dt(since);

    let count: i64 = self
      .call(move |conn| {
        Ok(conn.query_row(
          "SELECT COUNT(*) FROM interpretation_runs
           WHERE user_id = ?1 AND created_at >= ?2 AND quota_exempt = 0",
          rusqlite::params![user_str, since_str],
          |row| row.get(0),
        )?)
      })
      .await?;

    Ok(count as u64)
  }

  // ── Entities ──────────────────────────────────────────────────────────────

  async fn create_entity(&self, user_id: Uuid, kind: String) -> Result<Entity> {
    let entity = Entity {
      entity_id: Uuid::new_v4(),
      user_id,
      kind,
      created_at: Utc::now(),
      merged_into: None,
      merged_at: None,
    };

    let id_str = encode_uuid(entity.entity_id);
    let user_str = encode_uuid(user_id);
    let kind_str = entity.kind.clone();
    let at_str = encode_dt(entity.created_at);

    self
      .call(move |conn| {
        conn.execute(
          "INSERT INTO entities (entity_id, user_id, kind, created_at)
           VALUES (?1, ?2, ?3, ?4)",
          rusqlite::params![id_str, user_str, kind_str, at_str],
        )?;
        Ok(())
      })
      .await?;

    Ok(entity)
  }

  async fn get_entity(&self, user_id: Uuid, entity_id: Uuid) -> Result<Entity> {
    let user_str = encode_uuid(user_id);
    let raw = self
      .call(move |conn| require_entity(conn, &user_str, entity_id))
      .await?;
    raw.into_entity()
  }

  async fn list_entities(
    &self,
    user_id: Uuid,
    query: EntityQuery,
  ) -> Result<Vec<Entity>> {
    let user_str = encode_uuid(user_id);
    let kind = query.kind.clone();
    let after_str = query.created_after.map(encode_dt);
    let before_str = query.created_before.map(encode_dt);
    let include_merged = query.include_merged;
    let limit_val = query.limit.unwrap_or(100) as i64;
    let offset_val = query.offset.unwrap_or(0) as i64;

    let raws: Vec<RawEntity> = self
      .call(move |conn| {
        // Optional conditions use fixed placeholder numbers; the LIMIT and
        // OFFSET slots are always referenced, so binding every parameter is
        // valid whichever conditions are present.
        let mut conds = vec!["user_id = ?1"];
        if kind.is_some() {
          conds.push("kind = ?2");
        }
        if !include_merged {
          conds.push("merged_into IS NULL");
        }
        if after_str.is_some() {
          conds.push("created_at > ?3");
        }
        if before_str.is_some() {
          conds.push("created_at < ?4");
        }

        let sql = format!(
          "SELECT {ENTITY_COLS} FROM entities
           WHERE {}
           ORDER BY created_at ASC, entity_id ASC
           LIMIT ?5 OFFSET ?6",
          conds.join(" AND ")
        );

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
          .query_map(
            rusqlite::params![
              user_str,
              kind.as_deref(),
              after_str.as_deref(),
              before_str.as_deref(),
              limit_val,
              offset_val,
            ],
            entity_from_row,
          )?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawEntity::into_entity).collect()
  }

  async fn find_entity_by_field(
    &self,
    user_id: Uuid,
    kind: String,
    field: String,
    value_text: String,
  ) -> Result<Option<Entity>> {
    let user_str = encode_uuid(user_id);

    let raw: Option<RawEntity> = self
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              &format!(
                "SELECT {ENTITY_COLS} FROM entities e
                 WHERE e.user_id = ?1 AND e.kind = ?2
                   AND e.merged_into IS NULL
                   AND EXISTS (
                     SELECT 1 FROM observations o
                     WHERE o.entity_id = e.entity_id
                       AND o.field = ?3 AND o.value_text = ?4
                   )
                 ORDER BY e.created_at ASC, e.entity_id ASC
                 LIMIT 1"
              ),
              rusqlite::params![user_str, kind, field, value_text],
              entity_from_row,
            )
            .optional()?,
        )
      })
      .await?;

    raw.map(RawEntity::into_entity).transpose()
  }

  // ── Observations — append-only writes ─────────────────────────────────────

  async fn append_observation(
    &self,
    user_id: Uuid,
    input: NewObservation,
  ) -> Result<Observation> {
    let observation_id = Uuid::new_v4();
    let created_at = Utc::now();

    let user_str = encode_uuid(user_id);
    let obs_str = encode_uuid(observation_id);
    let field = input.field.clone();
    let value_json =
      serde_json::to_string(&input.value).map_err(Error::storage)?;
    let value_text = lookup_text(&input.value);
    let rank = input.priority.rank() as i64;
    let source_str = encode_uuid(input.source_id);
    let run_str = input.interpretation_run_id.map(encode_uuid);
    let at_str = encode_dt(created_at);
    let entity_id = input.entity_id;

    let target_str: String = self
      .call(move |conn| {
        let raw = require_entity(conn, &user_str, entity_id)?;
        // Writes to a merged-away entity land on its canonical target.
        // Redirect and insert share the closure, so a concurrent merge
        // cannot slip between them.
        let target = raw.merged_into.unwrap_or(raw.entity_id);
        conn.execute(
          "INSERT INTO observations
             (observation_id, entity_id, field, value_json, value_text,
              priority, source_id, run_id, created_at)
           VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
          rusqlite::params![
            obs_str, target, field, value_json, value_text, rank, source_str,
            run_str, at_str
          ],
        )?;
        Ok(target)
      })
      .await?;

    Ok(Observation {
      observation_id,
      entity_id: decode_uuid(&target_str)?,
      field: input.field,
      value: input.value,
      priority: input.priority,
      source_id: input.source_id,
      interpretation_run_id: input.interpretation_run_id,
      created_at,
    })
  }

  async fn append_fragment(
    &self,
    user_id: Uuid,
    input: NewFragment,
  ) -> Result<RawFragment> {
    let fragment_id = Uuid::new_v4();
    let created_at = Utc::now();

    let user_str = encode_uuid(user_id);
    let frag_str = encode_uuid(fragment_id);
    let field = input.field.clone();
    let value_json =
      serde_json::to_string(&input.value).map_err(Error::storage)?;
    let reason = input.reason.clone();
    let source_str = encode_uuid(input.source_id);
    let run_str = input.interpretation_run_id.map(encode_uuid);
    let at_str = encode_dt(created_at);
    let entity_id = input.entity_id;

    let target_str: String = self
      .call(move |conn| {
        let raw = require_entity(conn, &user_str, entity_id)?;
        let target = raw.merged_into.unwrap_or(raw.entity_id);
        conn.execute(
          "INSERT INTO raw_fragments
             (fragment_id, entity_id, field, value_json, reason, source_id,
              run_id, created_at)
           VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
          rusqlite::params![
            frag_str, target, field, value_json, reason, source_str, run_str,
            at_str
          ],
        )?;
        Ok(target)
      })
      .await?;

    Ok(RawFragment {
      fragment_id,
      entity_id: decode_uuid(&target_str)?,
      field: input.field,
      value: input.value,
      reason: input.reason,
      source_id: input.source_id,
      interpretation_run_id: input.interpretation_run_id,
      created_at,
    })
  }

  async fn observations_for_entity(
    &self,
    user_id: Uuid,
    entity_id: Uuid,
  ) -> Result<Vec<Observation>> {
    let user_str = encode_uuid(user_id);

    let raws: Vec<RawObservation> = self
      .call(move |conn| {
        require_entity(conn, &user_str, entity_id)?;
        let mut stmt = conn.prepare(&format!(
          "SELECT {OBSERVATION_COLS} FROM observations WHERE entity_id = ?1"
        ))?;
        let rows = stmt
          .query_map(
            rusqlite::params![encode_uuid(entity_id)],
            observation_from_row,
          )?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawObservation::into_observation).collect()
  }

  async fn fragments_for_entity(
    &self,
    user_id: Uuid,
    entity_id: Uuid,
  ) -> Result<Vec<RawFragment>> {
    let user_str = encode_uuid(user_id);

    let raws: Vec<RawFragmentRow> = self
      .call(move |conn| {
        require_entity(conn, &user_str, entity_id)?;
        let mut stmt = conn.prepare(&format!(
          "SELECT {FRAGMENT_COLS} FROM raw_fragments
           WHERE entity_id = ?1
           ORDER BY created_at DESC, fragment_id DESC"
        ))?;
        let rows = stmt
          .query_map(
            rusqlite::params![encode_uuid(entity_id)],
            fragment_from_row,
          )?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawFragmentRow::into_fragment).collect()
  }

  // ── Merge ─────────────────────────────────────────────────────────────────

  async fn merge_entities(
    &self,
    user_id: Uuid,
    from_entity_id: Uuid,
    to_entity_id: Uuid,
  ) -> Result<EntityMerge> {
    let merge_id = Uuid::new_v4();
    let created_at = Utc::now();

    let user_str = encode_uuid(user_id);
    let merge_str = encode_uuid(merge_id);
    let from_str = encode_uuid(from_entity_id);
    let to_str = encode_uuid(to_entity_id);
    let at_str = encode_dt(created_at);

    let observation_count: i64 = self
      .call(move |conn| {
        let tx = conn.transaction()?;

        let from_raw = require_entity(&tx, &user_str, from_entity_id)?;
        let to_raw = require_entity(&tx, &user_str, to_entity_id)?;

        if from_entity_id == to_entity_id {
          return Err(domain(Error::MergeConflict(
            "an entity cannot be merged into itself".to_string(),
          )));
        }
        if from_raw.merged_into.is_some() {
          return Err(domain(Error::MergeConflict(format!(
            "entity {from_entity_id} is already merged"
          ))));
        }
        if to_raw.merged_into.is_some() {
          return Err(domain(Error::MergeConflict(format!(
            "merge target {to_entity_id} is itself merged"
          ))));
        }
        if from_raw.kind != to_raw.kind {
          return Err(domain(Error::MergeConflict(format!(
            "cannot merge a {} into a {}",
            from_raw.kind, to_raw.kind
          ))));
        }

        let observation_count = tx.execute(
          "UPDATE observations SET entity_id = ?1 WHERE entity_id = ?2",
          rusqlite::params![to_str, from_str],
        )?;
        tx.execute(
          "UPDATE raw_fragments SET entity_id = ?1 WHERE entity_id = ?2",
          rusqlite::params![to_str, from_str],
        )?;
        tx.execute(
          "UPDATE entities SET merged_into = ?1, merged_at = ?2
           WHERE entity_id = ?3",
          rusqlite::params![to_str, at_str, from_str],
        )?;
        tx.execute(
          "INSERT INTO entity_merges
             (merge_id, user_id, from_entity_id, to_entity_id,
              observation_count, created_at)
           VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
          rusqlite::params![
            merge_str,
            user_str,
            from_str,
            to_str,
            observation_count as i64,
            at_str
          ],
        )?;

        tx.commit()?;
        Ok(observation_count as i64)
      })
      .await?;

    Ok(EntityMerge {
      merge_id,
      user_id,
      from_entity_id,
      to_entity_id,
      observation_count: observation_count as u64,
      created_at,
    })
  }

  async fn merges_into(
    &self,
    user_id: Uuid,
    entity_id: Uuid,
  ) -> Result<Vec<EntityMerge>> {
    let user_str = encode_uuid(user_id);

    let raws: Vec<RawMerge> = self
      .call(move |conn| {
        require_entity(conn, &user_str, entity_id)?;
        let mut stmt = conn.prepare(&format!(
          "SELECT {MERGE_COLS} FROM entity_merges
           WHERE to_entity_id = ?1
           ORDER BY created_at ASC, merge_id ASC"
        ))?;
        let rows = stmt
          .query_map(rusqlite::params![encode_uuid(entity_id)], merge_from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawMerge::into_merge).collect()
  }
}
