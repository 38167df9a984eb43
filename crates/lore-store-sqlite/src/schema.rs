//! SQL schema for the Lore SQLite store.
//!
//! Applied in full at every connection startup; the DDL is idempotent.
//! `PRAGMA user_version` is stamped so future migrations have a version
//! number to key off, but nothing reads it yet.

/// Full schema DDL; idempotent thanks to `CREATE TABLE IF NOT EXISTS`.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;

-- Sources are immutable. The blob named by `locator` is written before the
-- row is inserted, so a row never exists without its bytes.
CREATE TABLE IF NOT EXISTS sources (
    source_id    TEXT PRIMARY KEY,
    user_id      TEXT NOT NULL,
    content_hash TEXT NOT NULL,    -- sha-256 of the bytes, lowercase hex
    mime_type    TEXT NOT NULL,
    locator      TEXT NOT NULL,    -- blob path relative to the blob root
    byte_len     INTEGER NOT NULL,
    created_at   TEXT NOT NULL,
    UNIQUE (user_id, content_hash)
);

-- Mutable only while status is 'running'; terminal rows are never touched.
CREATE TABLE IF NOT EXISTS interpretation_runs (
    run_id       TEXT PRIMARY KEY,
    source_id    TEXT NOT NULL REFERENCES sources(source_id),
    user_id      TEXT NOT NULL,
    config_json  TEXT NOT NULL,    -- RunConfig, recorded verbatim
    status_json  TEXT NOT NULL,    -- tagged RunStatus
    quota_exempt INTEGER NOT NULL DEFAULT 0,
    created_at   TEXT NOT NULL,
    completed_at TEXT              -- set exactly when status goes terminal
);

CREATE TABLE IF NOT EXISTS entities (
    entity_id   TEXT PRIMARY KEY,
    user_id     TEXT NOT NULL,
    kind        TEXT NOT NULL,
    created_at  TEXT NOT NULL,
    merged_into TEXT REFERENCES entities(entity_id),
    merged_at   TEXT
);

-- Observations are strictly append-only. The single sanctioned UPDATE is the
-- entity_id rewrite inside the merge transaction; no DELETE is ever issued.
CREATE TABLE IF NOT EXISTS observations (
    observation_id TEXT PRIMARY KEY,
    entity_id      TEXT NOT NULL REFERENCES entities(entity_id),
    field          TEXT NOT NULL,
    value_json     TEXT NOT NULL,
    value_text     TEXT,           -- normalised scalar, resolution lookups only
    priority       INTEGER NOT NULL,
    source_id      TEXT NOT NULL REFERENCES sources(source_id),
    run_id         TEXT REFERENCES interpretation_runs(run_id),
    created_at     TEXT NOT NULL
);

-- Candidate fields that failed schema validation. Same append-only and
-- merge-rewrite rules as observations.
CREATE TABLE IF NOT EXISTS raw_fragments (
    fragment_id TEXT PRIMARY KEY,
    entity_id   TEXT NOT NULL REFERENCES entities(entity_id),
    field       TEXT NOT NULL,
    value_json  TEXT NOT NULL,
    reason      TEXT NOT NULL,
    source_id   TEXT NOT NULL REFERENCES sources(source_id),
    run_id      TEXT REFERENCES interpretation_runs(run_id),
    created_at  TEXT NOT NULL
);

-- One row per merge, written inside the merge transaction. An entity can be
-- merged away at most once.
CREATE TABLE IF NOT EXISTS entity_merges (
    merge_id          TEXT PRIMARY KEY,
    user_id           TEXT NOT NULL,
    from_entity_id    TEXT NOT NULL REFERENCES entities(entity_id),
    to_entity_id      TEXT NOT NULL REFERENCES entities(entity_id),
    observation_count INTEGER NOT NULL,
    created_at        TEXT NOT NULL,
    UNIQUE (from_entity_id),
    CHECK  (from_entity_id != to_entity_id)
);

CREATE INDEX IF NOT EXISTS observations_entity_idx ON observations(entity_id);
CREATE INDEX IF NOT EXISTS observations_lookup_idx ON observations(field, value_text);
CREATE INDEX IF NOT EXISTS fragments_entity_idx    ON raw_fragments(entity_id);
CREATE INDEX IF NOT EXISTS runs_source_idx         ON interpretation_runs(source_id);
CREATE INDEX IF NOT EXISTS runs_user_created_idx   ON interpretation_runs(user_id, created_at);
CREATE INDEX IF NOT EXISTS entities_user_idx       ON entities(user_id, kind);
CREATE INDEX IF NOT EXISTS merges_to_idx           ON entity_merges(to_entity_id);

PRAGMA user_version = 1;
";
