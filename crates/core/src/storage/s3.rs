//! S3-compatible object store backend.

use async_trait::async_trait;
use bytes::Bytes;
use futures::TryStreamExt;
use object_store::aws::{AmazonS3, AmazonS3Builder, S3ConditionalPut};
use object_store::path::Path as ObjectPath;
use object_store::{ObjectMeta, ObjectStore, PutMode, PutOptions, UpdateVersion};
use url::Url;

use super::{FileInfo, Storage, StorageError, WriteOptions};

/// Connection settings for the S3 backend.
#[derive(Debug, Clone, Default)]
pub struct S3Config {
    /// Key prefix all objects live under.
    pub root_dir: String,
    /// Bucket name; empty selects the filesystem backend instead.
    pub bucket: String,
    /// Access key id.
    pub access_key: String,
    /// Secret access key.
    pub secret_key: String,
    /// Region, defaulting to `us-east-1`.
    pub region: String,
    /// Custom endpoint for S3-compatible stores (MinIO and friends).
    pub endpoint: String,
    /// Force path-style addressing.
    pub use_path_style: bool,
    /// Public URL prefix letting the analytical engine read parquet over
    /// plain HTTPS instead of the signed endpoint.
    pub public_url_prefix: String,
}

impl S3Config {
    /// Loads settings from the conventional `AWS_*` / `S3_*` environment
    /// variables.
    pub fn from_env(root_dir: &str) -> Self {
        let region = std::env::var("AWS_REGION").unwrap_or_default();
        Self {
            root_dir: root_dir.to_string(),
            bucket: std::env::var("S3_BUCKET").unwrap_or_default(),
            access_key: std::env::var("AWS_ACCESS_KEY_ID").unwrap_or_default(),
            secret_key: std::env::var("AWS_SECRET_ACCESS_KEY").unwrap_or_default(),
            region: if region.is_empty() {
                "us-east-1".to_string()
            } else {
                region
            },
            endpoint: std::env::var("S3_ENDPOINT").unwrap_or_default(),
            use_path_style: std::env::var("S3_USE_PATH_STYLE").as_deref() == Ok("true"),
            public_url_prefix: std::env::var("S3_PUBLIC_URL_PREFIX").unwrap_or_default(),
        }
    }
}

/// Object-store storage over an S3-compatible bucket.
pub struct S3Storage {
    store: AmazonS3,
    config: S3Config,
}

impl S3Storage {
    /// Builds the client. Panics on a malformed configuration, mirroring
    /// process startup behaviour: there is nothing sensible to do without
    /// a storage backend.
    pub fn new(config: S3Config) -> Self {
        let mut builder = AmazonS3Builder::new()
            .with_bucket_name(&config.bucket)
            .with_region(&config.region)
            .with_access_key_id(&config.access_key)
            .with_secret_access_key(&config.secret_key)
            .with_conditional_put(S3ConditionalPut::ETagMatch)
            .with_virtual_hosted_style_request(!config.use_path_style);
        if !config.endpoint.is_empty() {
            builder = builder
                .with_endpoint(&config.endpoint)
                .with_allow_http(config.endpoint.starts_with("http://"));
        }
        let store = builder
            .build()
            .unwrap_or_else(|err| panic!("failed to build S3 client: {err}"));
        Self { store, config }
    }

    fn full_key(&self, path: &str) -> ObjectPath {
        let root = self.config.root_dir.trim_matches('/');
        let path = path.trim_start_matches('/');
        if root.is_empty() {
            ObjectPath::from(path)
        } else {
            ObjectPath::from(format!("{root}/{path}"))
        }
    }

    fn relative_key(&self, location: &ObjectPath) -> String {
        let key = location.to_string();
        let root = self.config.root_dir.trim_matches('/');
        key.strip_prefix(root)
            .map(|rest| rest.trim_start_matches('/').to_string())
            .unwrap_or(key)
    }
}

fn info_from_meta(meta: &ObjectMeta) -> FileInfo {
    FileInfo {
        size: meta.size as u64,
        modified: meta.last_modified,
        etag: meta
            .e_tag
            .as_deref()
            .unwrap_or_default()
            .trim_matches('"')
            .to_string(),
    }
}

#[async_trait]
impl Storage for S3Storage {
    async fn read(&self, path: &str) -> Result<(Bytes, FileInfo), StorageError> {
        let key = self.full_key(path);
        let result = self.store.get(&key).await?;
        let info = info_from_meta(&result.meta);
        let data = result.bytes().await?;
        tracing::debug!(key = %key, size = info.size, etag = %info.etag, "s3 read");
        Ok((data, info))
    }

    async fn write(&self, path: &str, data: Bytes, opts: WriteOptions) -> Result<(), StorageError> {
        let key = self.full_key(path);
        let mode = match &opts.if_match {
            Some(etag) => PutMode::Update(UpdateVersion {
                e_tag: Some(etag.clone()),
                version: None,
            }),
            None => PutMode::Overwrite,
        };
        tracing::debug!(key = %key, size = data.len(), conditional = opts.if_match.is_some(), "s3 write");
        self.store
            .put_opts(&key, data.into(), PutOptions::from(mode))
            .await?;
        Ok(())
    }

    async fn stat(&self, path: &str) -> Result<FileInfo, StorageError> {
        let meta = self.store.head(&self.full_key(path)).await?;
        Ok(info_from_meta(&meta))
    }

    async fn delete(&self, path: &str) -> Result<(), StorageError> {
        match self.store.delete(&self.full_key(path)).await {
            Ok(()) | Err(object_store::Error::NotFound { .. }) => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let key = self.full_key(prefix);
        let mut stream = self.store.list(Some(&key));
        let mut files = Vec::new();
        while let Some(meta) = stream.try_next().await? {
            files.push(self.relative_key(&meta.location));
        }
        files.sort();
        Ok(files)
    }

    async fn create_dir(&self, _path: &str) -> Result<(), StorageError> {
        // Directories are implicit in object keys.
        Ok(())
    }

    fn write_path(&self, path: &str) -> String {
        format!("s3://{}/{}", self.config.bucket, self.full_key(path))
    }

    fn read_path(&self, path: &str) -> String {
        if self.config.public_url_prefix.is_empty() {
            return self.write_path(path);
        }
        format!(
            "{}/{}",
            self.config.public_url_prefix.trim_end_matches('/'),
            self.full_key(path)
        )
    }

    fn engine_secret(&self, name: &str) -> String {
        if self.config.access_key.is_empty() || self.config.secret_key.is_empty() {
            return String::new();
        }
        let mut parts = vec![
            "TYPE S3".to_string(),
            format!("KEY_ID '{}'", self.config.access_key),
            format!("SECRET '{}'", self.config.secret_key),
            format!("REGION '{}'", self.config.region),
        ];
        if !self.config.endpoint.is_empty() {
            match Url::parse(&self.config.endpoint) {
                Ok(url) => {
                    let host = url.host_str().unwrap_or_default();
                    let endpoint = match url.port() {
                        Some(port) => format!("{host}:{port}"),
                        None => host.to_string(),
                    };
                    parts.push(format!("ENDPOINT '{endpoint}'"));
                    parts.push(format!("USE_SSL '{}'", url.scheme() == "https"));
                }
                Err(err) => {
                    tracing::error!(error = %err, "invalid S3 endpoint URL, omitting from secret");
                    return String::new();
                }
            }
        }
        if self.config.use_path_style {
            parts.push("URL_STYLE 'path'".to_string());
        }
        format!(
            "CREATE OR REPLACE SECRET {} (\n    {}\n);",
            name,
            parts.join(",\n    ")
        )
    }
}
