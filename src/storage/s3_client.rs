//! S3-compatible object store
//!
//! Wraps the AWS SDK. One bucket per job container.

use std::path::Path;

use aws_config::BehaviorVersion;
use aws_sdk_s3::{
    config::{Credentials, Region},
    primitives::{ByteStream, DateTime as SmithyDateTime},
    Client,
};
use chrono::{DateTime, Utc};
use tokio::io::AsyncWriteExt;

use crate::error::{AppError, Result, StorageError};

use super::store::ObjectStore;
use super::types::{ListOptions, ObjectList, ObjectMetadata, S3Locator};

fn to_chrono(dt: &SmithyDateTime) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(dt.secs(), dt.subsec_nanos())
}

/// S3-compatible object store for one customer namespace
#[derive(Clone)]
pub struct S3ObjectStore {
    client: Client,
}

impl S3ObjectStore {
    pub async fn new(locator: &S3Locator, default_region: &str) -> Result<Self> {
        let credentials = Credentials::new(
            &locator.access_key,
            &locator.secret_key,
            None,
            None,
            "licensing-server",
        );

        let region = locator
            .region
            .clone()
            .unwrap_or_else(|| default_region.to_string());

        let mut builder = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(region))
            .credentials_provider(credentials);

        if let Some(endpoint) = &locator.endpoint {
            // MinIO and most other S3-compatible services need path-style
            builder = builder.endpoint_url(endpoint).force_path_style(true);
        }

        tracing::debug!(endpoint = ?locator.endpoint, "Opened S3 namespace");
        Ok(Self {
            client: Client::from_conf(builder.build()),
        })
    }
}

#[async_trait::async_trait]
impl ObjectStore for S3ObjectStore {
    async fn create_container_if_absent(&self, container: &str) -> Result<bool> {
        if self.container_exists(container).await? {
            return Ok(false);
        }

        match self.client.create_bucket().bucket(container).send().await {
            Ok(_) => {
                tracing::info!(container = %container, "Created container");
                Ok(true)
            }
            Err(e) => {
                let already_there = e.as_service_error().is_some_and(|se| {
                    se.is_bucket_already_owned_by_you() || se.is_bucket_already_exists()
                });
                if already_there {
                    Ok(false)
                } else {
                    Err(StorageError::SdkError(format!(
                        "Failed to create container {}: {}",
                        container, e
                    ))
                    .into())
                }
            }
        }
    }

    async fn container_exists(&self, container: &str) -> Result<bool> {
        match self.client.head_bucket().bucket(container).send().await {
            Ok(_) => Ok(true),
            Err(e) if e.as_service_error().is_some_and(|se| se.is_not_found()) => Ok(false),
            Err(e) => Err(StorageError::SdkError(format!(
                "Failed to check container {}: {}",
                container, e
            ))
            .into()),
        }
    }

    async fn list_objects(&self, container: &str, options: ListOptions) -> Result<ObjectList> {
        let mut request = self.client.list_objects_v2().bucket(container);

        if let Some(prefix) = options.prefix {
            request = request.prefix(prefix);
        }

        if let Some(delimiter) = options.delimiter {
            request = request.delimiter(delimiter);
        }

        if let Some(max_keys) = options.max_keys {
            request = request.max_keys(max_keys);
        }

        if let Some(token) = options.continuation_token {
            request = request.continuation_token(token);
        }

        let response = request.send().await.map_err(|e| {
            if e.as_service_error().is_some_and(|se| se.is_no_such_bucket()) {
                StorageError::ContainerNotFound(container.to_string())
            } else {
                StorageError::SdkError(format!("Failed to list {}: {}", container, e))
            }
        })?;

        let objects = response
            .contents()
            .iter()
            .map(|obj| ObjectMetadata {
                key: obj.key().unwrap_or_default().to_string(),
                size: obj.size().unwrap_or(0),
                last_modified: obj.last_modified().and_then(to_chrono),
                content_type: None, // Not available in list response
                etag: obj.e_tag().map(|s| s.to_string()),
            })
            .collect();

        let prefixes = response
            .common_prefixes()
            .iter()
            .filter_map(|p| p.prefix().map(|s| s.to_string()))
            .collect();

        Ok(ObjectList {
            objects,
            prefixes,
            continuation_token: response.next_continuation_token().map(|s| s.to_string()),
            is_truncated: response.is_truncated().unwrap_or(false),
        })
    }

    async fn head_object(&self, container: &str, key: &str) -> Result<ObjectMetadata> {
        let response = self
            .client
            .head_object()
            .bucket(container)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                if e.as_service_error().is_some_and(|se| se.is_not_found()) {
                    AppError::Storage(StorageError::ObjectNotFound(key.to_string()))
                } else {
                    AppError::Storage(StorageError::SdkError(format!(
                        "Failed to head object {}: {}",
                        key, e
                    )))
                }
            })?;

        Ok(ObjectMetadata {
            key: key.to_string(),
            size: response.content_length().unwrap_or(0),
            last_modified: response.last_modified().and_then(to_chrono),
            content_type: response.content_type().map(|s| s.to_string()),
            etag: response.e_tag().map(|s| s.to_string()),
        })
    }

    async fn put_object(
        &self,
        container: &str,
        key: &str,
        source: &Path,
        content_type: &str,
    ) -> Result<ObjectMetadata> {
        let size = tokio::fs::metadata(source).await?.len() as i64;
        let body = ByteStream::from_path(source).await.map_err(|e| {
            StorageError::SdkError(format!("Failed to open {}: {}", source.display(), e))
        })?;

        let response = self
            .client
            .put_object()
            .bucket(container)
            .key(key)
            .body(body)
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| StorageError::SdkError(format!("Failed to put object {}: {}", key, e)))?;

        Ok(ObjectMetadata {
            key: key.to_string(),
            size,
            last_modified: Some(Utc::now()),
            content_type: Some(content_type.to_string()),
            etag: response.e_tag().map(|s| s.to_string()),
        })
    }

    async fn get_object_to_file(
        &self,
        container: &str,
        key: &str,
        destination: &Path,
    ) -> Result<ObjectMetadata> {
        let response = self
            .client
            .get_object()
            .bucket(container)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                if e.as_service_error().is_some_and(|se| se.is_no_such_key()) {
                    AppError::Storage(StorageError::ObjectNotFound(key.to_string()))
                } else {
                    AppError::Storage(StorageError::SdkError(format!(
                        "Failed to get object {}: {}",
                        key, e
                    )))
                }
            })?;

        let metadata = ObjectMetadata {
            key: key.to_string(),
            size: response.content_length().unwrap_or(0),
            last_modified: response.last_modified().and_then(to_chrono),
            content_type: response.content_type().map(|s| s.to_string()),
            etag: response.e_tag().map(|s| s.to_string()),
        };

        if let Some(parent) = destination.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::File::create(destination).await?;
        let mut body = Box::pin(response.body.into_async_read());
        tokio::io::copy(&mut body, &mut file).await?;
        file.flush().await?;

        Ok(metadata)
    }
}
