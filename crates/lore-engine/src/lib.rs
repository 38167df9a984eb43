//! The Lore interpretation engine.
//!
//! Turns ingested Sources into Observations: extraction (rule-based or
//! model-backed), entity resolution, schema validation, and the audited
//! [`InterpretationRun`](lore_core::run::InterpretationRun) around all of it.
//! Also home to the correction service and the provenance-aware query layer,
//! both of which are thin compositions over the same store trait.

mod engine;
pub mod extract;
pub mod model;
pub mod query;
pub mod resolve;
pub mod rules;

pub use engine::{
  Engine, EngineConfig, IngestResult, InterpretOptions, StructuredPayload,
  StructuredResult,
};
pub use model::ModelConfig;
