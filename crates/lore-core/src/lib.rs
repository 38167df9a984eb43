//! Core types and trait definitions for the Lore truth store.
//!
//! This crate is deliberately free of HTTP and database dependencies.
//! All other crates depend on it; it depends on nothing heavier than serde.

pub mod entity;
pub mod error;
pub mod observation;
pub mod run;
pub mod schema;
pub mod snapshot;
pub mod source;
pub mod store;
pub mod timeline;

pub use error::{Error, ErrorCode, Result};
