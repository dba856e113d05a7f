//! Storage abstraction over the local filesystem and S3-compatible object
//! stores.
//!
//! All persistent I/O of the engine goes through the [`Storage`] trait: the
//! per-table parquet objects, listing for garbage collection, and the
//! conditional (compare-and-swap) writes a clustered deployment would use to
//! serialise writers. Paths handed to the trait are always relative to the
//! storage root; backends translate them for the analytical engine via
//! [`Storage::write_path`] / [`Storage::read_path`].

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::sync::Arc;

mod fs;
mod s3;

pub use fs::FsStorage;
pub use s3::{S3Config, S3Storage};

/// Errors returned by storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// The object does not exist.
    #[error("object not found: {0}")]
    NotFound(String),

    /// A conditional write lost the race: the stored ETag no longer matches.
    #[error("precondition failed for {path} (current etag: {current})")]
    PreconditionFailed {
        /// Path of the contested object.
        path: String,
        /// ETag observed on the stored object.
        current: String,
    },

    /// Local filesystem failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Object store backend failure.
    #[error("object store error: {0}")]
    Backend(String),
}

impl From<object_store::Error> for StorageError {
    fn from(err: object_store::Error) -> Self {
        match err {
            object_store::Error::NotFound { path, .. } => StorageError::NotFound(path),
            object_store::Error::Precondition { path, source } => {
                StorageError::PreconditionFailed {
                    path,
                    current: source.to_string(),
                }
            }
            other => StorageError::Backend(other.to_string()),
        }
    }
}

/// Metadata for a stored object.
#[derive(Debug, Clone)]
pub struct FileInfo {
    /// Size in bytes.
    pub size: u64,
    /// Last modification time.
    pub modified: DateTime<Utc>,
    /// Entity tag used for conditional writes. MD5 of the content on the
    /// filesystem backend; the store's own ETag on S3.
    pub etag: String,
}

/// Options for [`Storage::write`].
#[derive(Debug, Clone, Default)]
pub struct WriteOptions {
    /// When set, the write succeeds only if the stored object's current
    /// ETag equals this value.
    pub if_match: Option<String>,
}

impl WriteOptions {
    /// Unconditional write.
    pub fn overwrite() -> Self {
        Self::default()
    }

    /// Conditional write against the given ETag.
    pub fn if_match(etag: impl Into<String>) -> Self {
        Self {
            if_match: Some(etag.into()),
        }
    }
}

/// Byte-level access to the engine's persistent area.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Reads an object and its metadata.
    async fn read(&self, path: &str) -> Result<(Bytes, FileInfo), StorageError>;

    /// Creates or replaces an object. With `if_match` set the write is a
    /// compare-and-swap and fails with [`StorageError::PreconditionFailed`]
    /// when the stored ETag differs.
    async fn write(&self, path: &str, data: Bytes, opts: WriteOptions) -> Result<(), StorageError>;

    /// Object metadata without content.
    async fn stat(&self, path: &str) -> Result<FileInfo, StorageError>;

    /// Deletes an object. Absent objects are treated as success.
    async fn delete(&self, path: &str) -> Result<(), StorageError>;

    /// Lists objects under a prefix, returning paths relative to the
    /// storage root.
    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError>;

    /// Creates a directory. No-op on object stores.
    async fn create_dir(&self, path: &str) -> Result<(), StorageError>;

    /// Path the analytical engine can write parquet to.
    fn write_path(&self, path: &str) -> String;

    /// Path the analytical engine can read parquet from. May be a public
    /// HTTPS URL when the bucket exposes one.
    fn read_path(&self, path: &str) -> String;

    /// DDL fragment registering the backend's credentials with the
    /// analytical engine, or the empty string when none are needed.
    fn engine_secret(&self, name: &str) -> String;
}

/// Selects a backend from the environment: `S3_BUCKET` set means the
/// object-store backend, otherwise the filesystem backend rooted at
/// `root_dir`.
pub fn storage_from_env(root_dir: &str) -> Arc<dyn Storage> {
    let config = S3Config::from_env(root_dir);
    if config.bucket.is_empty() {
        Arc::new(FsStorage::new(root_dir))
    } else {
        tracing::info!(bucket = %config.bucket, root = %root_dir, "using S3 storage backend");
        Arc::new(S3Storage::new(config))
    }
}
