//! Tool-invocation surface for Lore.
//!
//! Exposes an axum [`Router`] of capability-style actions under
//! `POST /tools/<action>`, backed by a [`lore_engine::Engine`] over any
//! [`TruthStore`]. The acting user arrives in the `x-lore-user` header;
//! resolving that id to an authenticated principal is the caller's concern,
//! as are TLS and other transport matters.
//!
//! # Mounting
//!
//! ```rust,ignore
//! let app = lore_api::tool_router(Arc::new(engine));
//! ```

pub mod entities;
pub mod error;
pub mod ingest;
pub mod queries;

use std::sync::Arc;

use axum::{
  Router,
  extract::FromRequestParts,
  http::request::Parts,
  routing::post,
};
use lore_core::store::TruthStore;
use lore_engine::Engine;
use uuid::Uuid;

pub use error::ApiError;

/// Header carrying the acting user's id on every call.
pub const USER_HEADER: &str = "x-lore-user";

/// Build the full tool router for `engine`.
pub fn tool_router<S>(engine: Arc<Engine<S>>) -> Router<()>
where
  S: TruthStore + 'static,
{
  Router::new()
    // Ingestion & interpretation
    .route("/tools/ingest", post(ingest::ingest::<S>))
    .route("/tools/ingest_structured", post(ingest::ingest_structured::<S>))
    .route("/tools/reinterpret", post(ingest::reinterpret::<S>))
    .route("/tools/get_source", post(ingest::get_source::<S>))
    .route("/tools/list_interpretation_runs", post(ingest::list_runs::<S>))
    // Entity mutations & listings
    .route("/tools/correct", post(entities::correct::<S>))
    .route("/tools/merge_entities", post(entities::merge_entities::<S>))
    .route("/tools/retrieve_entities", post(entities::retrieve_entities::<S>))
    .route("/tools/list_raw_fragments", post(entities::list_raw_fragments::<S>))
    // Provenance-aware reads
    .route("/tools/get_entity_snapshot", post(queries::get_snapshot::<S>))
    .route(
      "/tools/get_field_provenance",
      post(queries::get_field_provenance::<S>),
    )
    .route(
      "/tools/list_timeline_events",
      post(queries::list_timeline_events::<S>),
    )
    .route("/tools/get_schema", post(queries::get_schema::<S>))
    .with_state(engine)
}

/// Extractor for the acting user id from the [`USER_HEADER`] header.
///
/// A missing or malformed header is a `VALIDATION_ERROR`, rejected before
/// the handler body runs.
pub struct UserId(pub Uuid);

impl<St: Send + Sync> FromRequestParts<St> for UserId {
  type Rejection = ApiError;

  async fn from_request_parts(
    parts: &mut Parts,
    _state: &St,
  ) -> Result<Self, Self::Rejection> {
    let value = parts
      .headers
      .get(USER_HEADER)
      .ok_or_else(|| {
        ApiError::validation(format!("missing {USER_HEADER} header"))
      })?
      .to_str()
      .map_err(|_| {
        ApiError::validation(format!("{USER_HEADER} header is not valid text"))
      })?;

    let user_id = Uuid::parse_str(value).map_err(|_| {
      ApiError::validation(format!("{USER_HEADER} header is not a uuid"))
    })?;
    Ok(Self(user_id))
  }
}

// ─── Integration tests ───────────────────────────────────────────────────────
