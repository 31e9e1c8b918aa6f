//! Container-scoped object store abstraction

use std::path::Path;
use std::sync::Arc;

use crate::error::Result;

use super::memory::MemoryObjectStore;
use super::s3_client::S3ObjectStore;
use super::types::{ListOptions, ObjectList, ObjectMetadata, StorageLocator};

/// Page size used when walking a whole container.
const LIST_PAGE_SIZE: i32 = 1000;

// ============================================================================
// Object Store Trait
// ============================================================================

#[async_trait::async_trait]
pub trait ObjectStore: Send + Sync {
    /// Create the container. Returns true when it did not exist before.
    async fn create_container_if_absent(&self, container: &str) -> Result<bool>;

    async fn container_exists(&self, container: &str) -> Result<bool>;

    /// One page of objects in the container.
    async fn list_objects(&self, container: &str, options: ListOptions) -> Result<ObjectList>;

    async fn head_object(&self, container: &str, key: &str) -> Result<ObjectMetadata>;

    /// Stream a local file into the container.
    async fn put_object(
        &self,
        container: &str,
        key: &str,
        source: &Path,
        content_type: &str,
    ) -> Result<ObjectMetadata>;

    /// Stream an object into a local file, creating parent directories.
    async fn get_object_to_file(
        &self,
        container: &str,
        key: &str,
        destination: &Path,
    ) -> Result<ObjectMetadata>;

    /// Every object under the prefix, following continuation tokens.
    async fn list_all_objects(
        &self,
        container: &str,
        prefix: Option<&str>,
    ) -> Result<Vec<ObjectMetadata>> {
        let mut all_objects = Vec::new();
        let mut continuation_token = None;

        loop {
            let mut options = ListOptions::new().with_max_keys(LIST_PAGE_SIZE);

            if let Some(p) = prefix {
                options = options.with_prefix(p);
            }

            if let Some(token) = continuation_token.take() {
                options = options.with_continuation_token(token);
            }

            let page = self.list_objects(container, options).await?;
            all_objects.extend(page.objects);

            if !page.is_truncated {
                break;
            }

            continuation_token = page.continuation_token;
        }

        Ok(all_objects)
    }
}

// ============================================================================
// Connectors
// ============================================================================

/// Opens the object store a customer's storage key points at.
#[async_trait::async_trait]
pub trait StoreConnector: Send + Sync {
    async fn connect(&self, storage_key: &str) -> Result<Arc<dyn ObjectStore>>;
}

/// Connector for S3 locators and the shared `memory:` store.
#[derive(Clone)]
pub struct DefaultConnector {
    default_region: String,
    memory: Arc<MemoryObjectStore>,
}

impl DefaultConnector {
    pub fn new(default_region: impl Into<String>) -> Self {
        Self {
            default_region: default_region.into(),
            memory: Arc::new(MemoryObjectStore::new()),
        }
    }

    /// The store behind every `memory:` storage key.
    pub fn memory_store(&self) -> Arc<MemoryObjectStore> {
        self.memory.clone()
    }
}

#[async_trait::async_trait]
impl StoreConnector for DefaultConnector {
    async fn connect(&self, storage_key: &str) -> Result<Arc<dyn ObjectStore>> {
        match StorageLocator::parse(storage_key)? {
            StorageLocator::Memory => Ok(self.memory.clone()),
            StorageLocator::S3(locator) => {
                let store = S3ObjectStore::new(&locator, &self.default_region).await?;
                Ok(Arc::new(store))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{AppError, StorageError};

    #[tokio::test]
    async fn test_memory_locator_is_shared() {
        let connector = DefaultConnector::new("us-east-1");
        let first = connector.connect("memory:").await.unwrap();
        first.create_container_if_absent("survey").await.unwrap();

        let second = connector.connect("memory:").await.unwrap();
        assert!(second.container_exists("survey").await.unwrap());
        assert!(connector.memory_store().container_exists("survey").await.unwrap());
    }

    #[tokio::test]
    async fn test_bad_locator() {
        let connector = DefaultConnector::new("us-east-1");
        let err = connector.connect("not json").await.err().unwrap();
        assert!(matches!(
            err,
            AppError::Storage(StorageError::InvalidLocator(_))
        ));
    }
}
