//! Content-addressed blob files for raw source bytes.
//!
//! Blobs live under one root directory at `{user_id}/{content_hash}`. The
//! path is a pure function of owner and content, so writing the same bytes
//! twice lands on the same file with identical content and ingest stays
//! idempotent even if an earlier attempt died between blob write and row
//! insert.

use std::path::PathBuf;

use lore_core::{Error, Result};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// SHA-256 of `bytes`, lowercase hex.
pub fn content_hash(bytes: &[u8]) -> String {
  hex::encode(Sha256::digest(bytes))
}

/// Blob path relative to the blob root.
pub fn locator(user_id: Uuid, content_hash: &str) -> String {
  format!("{}/{content_hash}", user_id.hyphenated())
}

/// Filesystem blob storage rooted at one directory.
#[derive(Debug, Clone)]
pub struct BlobStore {
  root: PathBuf,
}

impl BlobStore {
  pub fn new(root: impl Into<PathBuf>) -> Self {
    Self { root: root.into() }
  }

  fn path_for(&self, locator: &str) -> PathBuf {
    self.root.join(locator)
  }

  /// Write `bytes` at `locator`, creating parent directories as needed.
  /// Overwrites are harmless: the locator names the content.
  pub async fn write(&self, locator: &str, bytes: &[u8]) -> Result<()> {
    let path = self.path_for(locator);
    if let Some(parent) = path.parent() {
      tokio::fs::create_dir_all(parent).await.map_err(Error::storage)?;
    }
    tokio::fs::write(&path, bytes).await.map_err(Error::storage)
  }

  /// Read the bytes at `locator`. A missing blob behind a persisted Source
  /// row is a storage failure, not a not-found.
  pub async fn read(&self, locator: &str) -> Result<Vec<u8>> {
    tokio::fs::read(self.path_for(locator))
      .await
      .map_err(|e| Error::Storage(format!("blob {locator}: {e}")))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn hash_is_stable_lowercase_hex() {
    let hash = content_hash(b"hello world");
    assert_eq!(
      hash,
      "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
    );
  }

  #[test]
  fn locator_is_user_scoped() {
    let user = Uuid::from_u128(7);
    let hash = content_hash(b"x");
    let loc = locator(user, &hash);
    assert!(loc.starts_with("00000000-0000-0000-0000-000000000007/"));
    assert!(loc.ends_with(&hash));
  }

  #[tokio::test]
  async fn write_then_read_round_trips() {
    let dir = tempfile::tempdir().expect("tempdir");
    let blobs = BlobStore::new(dir.path());

    let loc = locator(Uuid::from_u128(7), &content_hash(b"payload"));
    blobs.write(&loc, b"payload").await.expect("write");
    assert_eq!(blobs.read(&loc).await.expect("read"), b"payload");

    // second write of the same content is a no-op in effect
    blobs.write(&loc, b"payload").await.expect("rewrite");
    assert_eq!(blobs.read(&loc).await.expect("read"), b"payload");
  }

  #[tokio::test]
  async fn missing_blob_is_a_storage_error() {
    let dir = tempfile::tempdir().expect("tempdir");
    let blobs = BlobStore::new(dir.path());
    let err = blobs.read("nope/missing").await.unwrap_err();
    assert!(matches!(err, Error::Storage(_)));
  }
}
