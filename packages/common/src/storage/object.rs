use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::Client;
use aws_sdk_s3::config::{Credentials, Region};
use aws_sdk_s3::primitives::ByteStream;
use tokio::io::AsyncReadExt;
use tracing::debug;

use super::error::StorageError;
use super::traits::{BoxReader, StorageProvider};

/// Connection settings for one S3-compatible volume.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectStoreConfig {
    pub bucket: String,
    /// Optional key prefix prepended to every object path.
    pub prefix: Option<String>,
    /// Custom endpoint for S3-compatible targets (MinIO, Ceph, ...).
    pub endpoint: Option<String>,
    pub region: Option<String>,
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
}

/// Object-store volume backed by an S3-compatible bucket.
///
/// The client owns a connection pool; the volume manager caches one
/// provider per volume and recreates it only when the connection config
/// materially changes.
pub struct ObjectStoreProvider {
    client: Client,
    bucket: String,
    prefix: String,
}

impl ObjectStoreProvider {
    pub async fn connect(config: ObjectStoreConfig) -> Result<Self, StorageError> {
        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if let Some(region) = config.region.clone() {
            loader = loader.region(Region::new(region));
        }
        if let (Some(access_key), Some(secret_key)) =
            (config.access_key.clone(), config.secret_key.clone())
        {
            loader = loader.credentials_provider(Credentials::new(
                access_key,
                secret_key,
                None,
                None,
                "spax-volume",
            ));
        }
        let shared = loader.load().await;

        let mut builder = aws_sdk_s3::config::Builder::from(&shared);
        if let Some(endpoint) = &config.endpoint {
            // Path-style addressing is what S3-compatible targets expect.
            builder = builder.endpoint_url(endpoint).force_path_style(true);
        }
        let client = Client::from_conf(builder.build());

        debug!(bucket = %config.bucket, endpoint = ?config.endpoint, "Object store provider ready");

        Ok(Self {
            client,
            bucket: config.bucket,
            prefix: config
                .prefix
                .map(|p| p.trim_matches('/').to_string())
                .filter(|p| !p.is_empty())
                .unwrap_or_default(),
        })
    }

    fn key(&self, path: &str) -> String {
        if self.prefix.is_empty() {
            path.to_string()
        } else {
            format!("{}/{}", self.prefix, path)
        }
    }
}

#[async_trait]
impl StorageProvider for ObjectStoreProvider {
    async fn write(
        &self,
        path: &str,
        mut reader: BoxReader,
        size: u64,
    ) -> Result<(), StorageError> {
        let mut body = Vec::with_capacity(size as usize);
        reader.read_to_end(&mut body).await?;

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(self.key(path))
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|e| StorageError::backend(format!("put {path}"), e))?;
        Ok(())
    }

    async fn read(&self, path: &str) -> Result<BoxReader, StorageError> {
        let result = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(self.key(path))
            .send()
            .await;
        match result {
            Ok(output) => Ok(Box::new(output.body.into_async_read())),
            Err(e) => {
                let service_error = e.into_service_error();
                if service_error.is_no_such_key() {
                    Err(StorageError::NotFound(path.to_string()))
                } else {
                    Err(StorageError::backend(format!("get {path}"), service_error))
                }
            }
        }
    }

    async fn delete(&self, path: &str) -> Result<bool, StorageError> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(self.key(path))
            .send()
            .await
            .map_err(|e| StorageError::backend(format!("delete {path}"), e))?;
        // S3 deletes are idempotent; a missing key still succeeds.
        Ok(true)
    }

    async fn exists(&self, path: &str) -> Result<bool, StorageError> {
        let result = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(self.key(path))
            .send()
            .await;
        match result {
            Ok(_) => Ok(true),
            Err(e) => {
                let service_error = e.into_service_error();
                if service_error.is_not_found() {
                    Ok(false)
                } else {
                    Err(StorageError::backend(format!("head {path}"), service_error))
                }
            }
        }
    }

    async fn size(&self, path: &str) -> Result<u64, StorageError> {
        let result = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(self.key(path))
            .send()
            .await;
        match result {
            Ok(head) => Ok(head.content_length().unwrap_or(0).max(0) as u64),
            Err(e) => {
                let service_error = e.into_service_error();
                if service_error.is_not_found() {
                    Err(StorageError::NotFound(path.to_string()))
                } else {
                    Err(StorageError::backend(format!("head {path}"), service_error))
                }
            }
        }
    }
}
