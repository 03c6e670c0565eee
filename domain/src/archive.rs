//! Durable object storage for consolidated recordings.

use crate::error::{DomainErrorKind, Error, InternalErrorKind};
use async_trait::async_trait;
use log::*;
use opendal::{services, ErrorKind, Operator};
use service::config::{ArchiveBackend, Config};
use std::path::Path;
use tokio::io::AsyncReadExt;
use uuid::Uuid;

const UPLOAD_CHUNK_BYTES: usize = 8 << 20;

/// Object key of a recording's consolidated file.
///
/// Derived only from the external id so that repeated uploads land on the same object.
pub fn archive_key(external_id: Uuid) -> String {
    format!("recordings/{external_id}.mp4")
}

#[derive(Debug, Clone, PartialEq)]
pub struct ArchivedObject {
    pub bucket: String,
    pub key: String,
    pub size_bytes: i64,
    /// False when a complete object was already stored and nothing was transferred.
    pub uploaded: bool,
}

#[async_trait]
pub trait ArchiveStore: Send + Sync {
    fn bucket(&self) -> &str;

    /// Size of the object stored under `key`, or `None` when there is none.
    async fn stored_size(&self, key: &str) -> Result<Option<i64>, Error>;

    /// Stores `source` under `key` unless an object of `expected_size` bytes is
    /// already there. Re-running with the same key overwrites, never duplicates.
    async fn upsert(
        &self,
        key: &str,
        source: &Path,
        expected_size: i64,
    ) -> Result<ArchivedObject, Error>;
}

pub struct OpendalArchive {
    operator: Operator,
    bucket: String,
}

impl OpendalArchive {
    pub fn new(operator: Operator, bucket: impl Into<String>) -> Self {
        Self {
            operator,
            bucket: bucket.into(),
        }
    }

    pub fn from_config(config: &Config) -> Result<Self, Error> {
        Ok(Self::new(create_operator(config)?, config.archive_bucket.clone()))
    }

}

#[async_trait]
impl ArchiveStore for OpendalArchive {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn stored_size(&self, key: &str) -> Result<Option<i64>, Error> {
        match self.operator.stat(key).await {
            Ok(metadata) => Ok(Some(metadata.content_length() as i64)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::storage(e)),
        }
    }

    async fn upsert(
        &self,
        key: &str,
        source: &Path,
        expected_size: i64,
    ) -> Result<ArchivedObject, Error> {
        // An earlier upload may have succeeded without us recording it.
        if self.stored_size(key).await? == Some(expected_size) {
            info!("Archive object {key} already complete, skipping upload");
            return Ok(ArchivedObject {
                bucket: self.bucket.clone(),
                key: key.to_string(),
                size_bytes: expected_size,
                uploaded: false,
            });
        }

        let mut file = tokio::fs::File::open(source).await.map_err(|e| Error {
            source: Some(Box::new(e)),
            error_kind: DomainErrorKind::Internal(InternalErrorKind::Other(format!(
                "consolidated file {} is not readable",
                source.display()
            ))),
        })?;

        debug!("Uploading {} to {}/{key}", source.display(), self.bucket);

        let mut writer = self.operator.writer(key).await.map_err(Error::storage)?;
        let mut size_bytes: i64 = 0;
        loop {
            let mut buffer = Vec::with_capacity(UPLOAD_CHUNK_BYTES);
            let read = (&mut file)
                .take(UPLOAD_CHUNK_BYTES as u64)
                .read_to_end(&mut buffer)
                .await
                .map_err(|e| Error {
                    source: Some(Box::new(e)),
                    error_kind: DomainErrorKind::Internal(InternalErrorKind::Other(
                        "failed reading consolidated file".to_string(),
                    )),
                })?;
            if read == 0 {
                break;
            }
            size_bytes += read as i64;
            if let Err(e) = writer.write(buffer).await {
                writer.abort().await.ok();
                return Err(Error::storage(e));
            }
        }
        writer.close().await.map_err(Error::storage)?;

        info!("Archived {size_bytes} bytes to {}/{key}", self.bucket);

        Ok(ArchivedObject {
            bucket: self.bucket.clone(),
            key: key.to_string(),
            size_bytes,
            uploaded: true,
        })
    }
}

/// Builds the opendal operator for the configured archive backend.
pub fn create_operator(config: &Config) -> Result<Operator, Error> {
    let operator = match config.archive_backend {
        ArchiveBackend::Fs => {
            info!(
                "Configuring filesystem archive with root: {}",
                config.archive_root
            );
            let builder = services::Fs::default().root(&config.archive_root);
            Operator::new(builder).map_err(Error::storage)?.finish()
        }
        ArchiveBackend::S3 => {
            info!(
                "Configuring S3 archive with bucket: {}, region: {:?}",
                config.archive_bucket, config.archive_region
            );
            let mut builder = services::S3::default()
                .bucket(&config.archive_bucket)
                .root(config.archive_root.trim_start_matches("./"));

            if let Some(region) = &config.archive_region {
                builder = builder.region(region);
            }
            if let Some(endpoint) = &config.archive_endpoint {
                builder = builder.endpoint(endpoint);
            }
            if let Some(access_key_id) = config.archive_access_key_id() {
                builder = builder.access_key_id(&access_key_id);
            }
            if let Some(secret_access_key) = config.archive_secret_access_key() {
                builder = builder.secret_access_key(&secret_access_key);
            }

            Operator::new(builder).map_err(Error::storage)?.finish()
        }
    };

    Ok(operator)
}
