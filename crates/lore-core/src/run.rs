//! Interpretation runs — versioned, audited extraction attempts.
//!
//! A run records the exact configuration one extraction was invoked with.
//! Extraction output is never claimed to be reproducible; the durable
//! source+config pairing is the audit boundary around that non-determinism.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Which extractor variant a run invoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtractorKind {
  /// Deterministic parser for pre-structured inputs.
  Rules,
  /// Non-deterministic model-backed extractor for unstructured text.
  Model,
}

/// Extraction configuration, recorded verbatim on the run row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
  pub extractor:          ExtractorKind,
  /// Model identifier, for model-backed runs.
  pub model:              Option<String>,
  pub temperature:        Option<f64>,
  /// SHA-256 over the prompt template, for model-backed runs.
  pub prompt_fingerprint: Option<String>,
  /// Version tag of the entity resolution heuristic in effect.
  pub resolver_version:   String,
  /// Schema registry version candidate fields were validated against.
  pub schema_version:     u32,
  /// Engine crate version that executed the run.
  pub code_version:       String,
}

/// Lifecycle of a run. Terminal states are immutable once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunStatus {
  Running,
  Completed { observations: u32, fragments: u32 },
  Failed { error: String },
}

impl RunStatus {
  pub fn is_terminal(&self) -> bool {
    !matches!(self, Self::Running)
  }
}

/// One extraction attempt over one Source. A Source may accumulate many runs
/// (reinterpretation); each only ever adds observations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterpretationRun {
  pub run_id:       Uuid,
  pub source_id:    Uuid,
  pub user_id:      Uuid,
  pub config:       RunConfig,
  pub status:       RunStatus,
  pub created_at:   DateTime<Utc>,
  pub completed_at: Option<DateTime<Utc>>,
}

/// Input to [`crate::store::TruthStore::create_run`]. Runs always start in
/// [`RunStatus::Running`].
#[derive(Debug, Clone)]
pub struct NewRun {
  pub source_id:    Uuid,
  pub config:       RunConfig,
  /// Bookkeeping runs (structured ingestion) keep full audit rows but do not
  /// count against the monthly interpretation quota.
  pub quota_exempt: bool,
}

/// Terminal outcome passed to [`crate::store::TruthStore::finish_run`].
#[derive(Debug, Clone)]
pub enum RunOutcome {
  Completed { observations: u32, fragments: u32 },
  Failed { error: String },
}
