//! SQLite + filesystem backend for the Lore truth store.
//!
//! Wraps [`tokio_rusqlite`] so all database access runs on a dedicated thread
//! without blocking the async runtime. Raw source bytes are not kept in the
//! database: they live beside it as content-addressed blob files.

mod blob;
mod encode;
mod schema;
mod store;

pub use store::SqliteStore;

#[cfg(test)]
mod tests;
