//! Local filesystem backend.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use md5::{Digest, Md5};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::Mutex;

use super::{FileInfo, Storage, StorageError, WriteOptions};

/// Filesystem-backed storage rooted at a directory.
///
/// The ETag is the lowercase hex MD5 of the content, which is sufficient
/// for compare-and-swap within a single host. Conditional writes are
/// serialised internally so that of two racing writers with the same
/// observed ETag exactly one wins.
pub struct FsStorage {
    root: PathBuf,
    cas_lock: Mutex<()>,
}

fn content_etag(data: &[u8]) -> String {
    let digest = Md5::digest(data);
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

impl FsStorage {
    /// Creates a backend rooted at `root`. The directory is created on
    /// first write, not here.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            cas_lock: Mutex::new(()),
        }
    }

    fn full_path(&self, path: &str) -> PathBuf {
        self.root.join(path.trim_start_matches('/'))
    }

    async fn stat_inner(&self, path: &str) -> Result<FileInfo, StorageError> {
        let full = self.full_path(path);
        let meta = fs::metadata(&full).await.map_err(|err| map_io(err, path))?;
        let data = fs::read(&full).await.map_err(|err| map_io(err, path))?;
        Ok(FileInfo {
            size: meta.len(),
            modified: modified_of(&meta),
            etag: content_etag(&data),
        })
    }

    async fn write_creating_dirs(&self, full: &Path, data: &Bytes) -> Result<(), StorageError> {
        match fs::write(full, data).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                if let Some(parent) = full.parent() {
                    fs::create_dir_all(parent).await?;
                }
                fs::write(full, data).await.map_err(StorageError::Io)
            }
            Err(err) => Err(StorageError::Io(err)),
        }
    }

    async fn collect_files(
        &self,
        dir: PathBuf,
        out: &mut Vec<String>,
    ) -> Result<(), StorageError> {
        let mut stack = vec![dir];
        while let Some(current) = stack.pop() {
            let mut entries = match fs::read_dir(&current).await {
                Ok(entries) => entries,
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => continue,
                Err(err) => return Err(StorageError::Io(err)),
            };
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if entry.file_type().await?.is_dir() {
                    stack.push(path);
                } else if let Ok(rel) = path.strip_prefix(&self.root) {
                    out.push(rel.to_string_lossy().replace('\\', "/"));
                }
            }
        }
        Ok(())
    }
}

fn modified_of(meta: &std::fs::Metadata) -> DateTime<Utc> {
    meta.modified()
        .map(DateTime::<Utc>::from)
        .unwrap_or_else(|_| Utc::now())
}

fn map_io(err: std::io::Error, path: &str) -> StorageError {
    if err.kind() == std::io::ErrorKind::NotFound {
        StorageError::NotFound(path.to_string())
    } else {
        StorageError::Io(err)
    }
}

#[async_trait]
impl Storage for FsStorage {
    async fn read(&self, path: &str) -> Result<(Bytes, FileInfo), StorageError> {
        let full = self.full_path(path);
        let data = fs::read(&full).await.map_err(|err| map_io(err, path))?;
        let meta = fs::metadata(&full).await.map_err(|err| map_io(err, path))?;
        let info = FileInfo {
            size: meta.len(),
            modified: modified_of(&meta),
            etag: content_etag(&data),
        };
        Ok((Bytes::from(data), info))
    }

    async fn write(&self, path: &str, data: Bytes, opts: WriteOptions) -> Result<(), StorageError> {
        let full = self.full_path(path);

        if let Some(expected) = opts.if_match {
            // Check-and-write must be atomic with respect to other
            // conditional writers on this backend.
            let _guard = self.cas_lock.lock().await;
            let info = self.stat_inner(path).await?;
            if info.etag != expected {
                return Err(StorageError::PreconditionFailed {
                    path: path.to_string(),
                    current: info.etag,
                });
            }
            return self.write_creating_dirs(&full, &data).await;
        }

        self.write_creating_dirs(&full, &data).await
    }

    async fn stat(&self, path: &str) -> Result<FileInfo, StorageError> {
        self.stat_inner(path).await
    }

    async fn delete(&self, path: &str) -> Result<(), StorageError> {
        match fs::remove_file(self.full_path(path)).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(StorageError::Io(err)),
        }
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let mut files = Vec::new();
        let start = self.full_path(prefix);
        if start.is_file() {
            files.push(prefix.trim_start_matches('/').to_string());
            return Ok(files);
        }
        self.collect_files(start, &mut files).await?;
        files.sort();
        Ok(files)
    }

    async fn create_dir(&self, path: &str) -> Result<(), StorageError> {
        fs::create_dir_all(self.full_path(path)).await?;
        Ok(())
    }

    fn write_path(&self, path: &str) -> String {
        self.full_path(path).to_string_lossy().into_owned()
    }

    fn read_path(&self, path: &str) -> String {
        self.write_path(path)
    }

    fn engine_secret(&self, _name: &str) -> String {
        String::new()
    }
}
