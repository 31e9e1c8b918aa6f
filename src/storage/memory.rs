//! In-process object store
//!
//! Backs the `memory:` storage key for local development and tests.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::error::{Result, StorageError};

use super::store::ObjectStore;
use super::types::{ListOptions, ObjectList, ObjectMetadata};

#[derive(Debug, Clone)]
struct MemoryObject {
    data: Vec<u8>,
    last_modified: DateTime<Utc>,
    content_type: Option<String>,
}

impl MemoryObject {
    fn metadata(&self, key: &str) -> ObjectMetadata {
        ObjectMetadata {
            key: key.to_string(),
            size: self.data.len() as i64,
            last_modified: Some(self.last_modified),
            content_type: self.content_type.clone(),
            etag: None,
        }
    }
}

/// One listing entry: an object, or a common prefix standing for the keys
/// grouped under it.
enum Entry {
    Object(ObjectMetadata),
    Prefix(String),
}

#[derive(Default)]
pub struct MemoryObjectStore {
    containers: RwLock<HashMap<String, BTreeMap<String, MemoryObject>>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store bytes directly, creating the container if needed.
    pub async fn insert_object(
        &self,
        container: &str,
        key: &str,
        data: Vec<u8>,
        last_modified: DateTime<Utc>,
    ) {
        let mut containers = self.containers.write().await;
        containers.entry(container.to_string()).or_default().insert(
            key.to_string(),
            MemoryObject {
                data,
                last_modified,
                content_type: None,
            },
        );
    }

    /// Stored bytes of an object.
    pub async fn object_data(&self, container: &str, key: &str) -> Option<Vec<u8>> {
        let containers = self.containers.read().await;
        containers
            .get(container)
            .and_then(|objects| objects.get(key))
            .map(|o| o.data.clone())
    }
}

#[async_trait::async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn create_container_if_absent(&self, container: &str) -> Result<bool> {
        let mut containers = self.containers.write().await;
        if containers.contains_key(container) {
            return Ok(false);
        }
        containers.insert(container.to_string(), BTreeMap::new());
        Ok(true)
    }

    async fn container_exists(&self, container: &str) -> Result<bool> {
        Ok(self.containers.read().await.contains_key(container))
    }

    async fn list_objects(&self, container: &str, options: ListOptions) -> Result<ObjectList> {
        let containers = self.containers.read().await;
        let objects = containers
            .get(container)
            .ok_or_else(|| StorageError::ContainerNotFound(container.to_string()))?;

        let prefix = options.prefix.as_deref().unwrap_or("");
        let max_keys = options.max_keys.unwrap_or(1000).max(1) as usize;

        // (last raw key, entry) in key order, prefixes grouped
        let mut entries: Vec<(String, Entry)> = Vec::new();
        for (key, object) in objects.range(prefix.to_string()..) {
            if !key.starts_with(prefix) {
                break;
            }
            let rest = &key[prefix.len()..];
            let grouped = options
                .delimiter
                .as_deref()
                .filter(|d| !d.is_empty())
                .and_then(|d| rest.find(d).map(|i| format!("{}{}", prefix, &rest[..i + d.len()])));

            match grouped {
                Some(common) => {
                    let extends_last =
                        matches!(entries.last(), Some((_, Entry::Prefix(p))) if *p == common);
                    match entries.last_mut() {
                        Some((last, _)) if extends_last => *last = key.clone(),
                        _ => entries.push((key.clone(), Entry::Prefix(common))),
                    }
                }
                None => entries.push((key.clone(), Entry::Object(object.metadata(key)))),
            }
        }

        let after = options.continuation_token.unwrap_or_default();
        let mut remaining = entries
            .into_iter()
            .filter(|(last, _)| after.is_empty() || *last > after)
            .peekable();

        let mut page = ObjectList::default();
        let mut taken = 0;
        let mut last_key = None;
        while taken < max_keys {
            let Some((last, entry)) = remaining.next() else {
                break;
            };
            match entry {
                Entry::Object(meta) => page.objects.push(meta),
                Entry::Prefix(p) => page.prefixes.push(p),
            }
            last_key = Some(last);
            taken += 1;
        }
        if remaining.peek().is_some() {
            page.is_truncated = true;
            page.continuation_token = last_key;
        }

        Ok(page)
    }

    async fn head_object(&self, container: &str, key: &str) -> Result<ObjectMetadata> {
        let containers = self.containers.read().await;
        let objects = containers
            .get(container)
            .ok_or_else(|| StorageError::ContainerNotFound(container.to_string()))?;
        objects
            .get(key)
            .map(|o| o.metadata(key))
            .ok_or_else(|| StorageError::ObjectNotFound(key.to_string()).into())
    }

    async fn put_object(
        &self,
        container: &str,
        key: &str,
        source: &Path,
        content_type: &str,
    ) -> Result<ObjectMetadata> {
        let data = tokio::fs::read(source).await?;

        let mut containers = self.containers.write().await;
        let objects = containers
            .get_mut(container)
            .ok_or_else(|| StorageError::ContainerNotFound(container.to_string()))?;
        let object = MemoryObject {
            data,
            last_modified: Utc::now(),
            content_type: Some(content_type.to_string()),
        };
        let metadata = object.metadata(key);
        objects.insert(key.to_string(), object);
        Ok(metadata)
    }

    async fn get_object_to_file(
        &self,
        container: &str,
        key: &str,
        destination: &Path,
    ) -> Result<ObjectMetadata> {
        let object = {
            let containers = self.containers.read().await;
            containers
                .get(container)
                .ok_or_else(|| StorageError::ContainerNotFound(container.to_string()))?
                .get(key)
                .cloned()
                .ok_or_else(|| StorageError::ObjectNotFound(key.to_string()))?
        };

        if let Some(parent) = destination.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(destination, &object.data).await?;
        Ok(object.metadata(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;

    async fn seeded() -> MemoryObjectStore {
        let store = MemoryObjectStore::new();
        let now = Utc::now();
        for key in ["age.vtr", "region.vtr", "CaseData/a.dat", "CaseData/b.dat", "Specs/x.spec"] {
            store.insert_object("survey", key, key.as_bytes().to_vec(), now).await;
        }
        store
    }

    #[tokio::test]
    async fn test_list_with_delimiter() {
        let store = seeded().await;
        let page = store
            .list_objects("survey", ListOptions::new().with_delimiter("/"))
            .await
            .unwrap();

        let keys: Vec<_> = page.objects.iter().map(|o| o.key.as_str()).collect();
        assert_eq!(keys, vec!["age.vtr", "region.vtr"]);
        assert_eq!(page.prefixes, vec!["CaseData/", "Specs/"]);
        assert!(!page.is_truncated);
    }

    #[tokio::test]
    async fn test_pagination_walks_everything() {
        let store = seeded().await;
        let first = store
            .list_objects("survey", ListOptions::new().with_max_keys(2))
            .await
            .unwrap();
        assert!(first.is_truncated);
        assert_eq!(first.objects.len(), 2);

        let all = store.list_all_objects("survey", None).await.unwrap();
        assert_eq!(all.len(), 5);
        let specs = store.list_all_objects("survey", Some("Specs/")).await.unwrap();
        assert_eq!(specs.len(), 1);
    }

    #[tokio::test]
    async fn test_put_and_get_file() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("in.txt");
        tokio::fs::write(&source, b"hello").await.unwrap();

        let store = MemoryObjectStore::new();
        assert!(store.create_container_if_absent("job").await.unwrap());
        assert!(!store.create_container_if_absent("job").await.unwrap());

        let put = store
            .put_object("job", "docs/in.txt", &source, "text/plain")
            .await
            .unwrap();
        assert_eq!(put.size, 5);

        let target = dir.path().join("out").join("docs").join("in.txt");
        store
            .get_object_to_file("job", "docs/in.txt", &target)
            .await
            .unwrap();
        assert_eq!(tokio::fs::read(&target).await.unwrap(), b"hello");

        let head = store.head_object("job", "docs/in.txt").await.unwrap();
        assert_eq!(head.content_type.as_deref(), Some("text/plain"));
    }

    #[tokio::test]
    async fn test_missing_container_and_object() {
        let store = MemoryObjectStore::new();
        let err = store
            .list_objects("nope", ListOptions::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AppError::Storage(StorageError::ContainerNotFound(_))
        ));

        store.create_container_if_absent("job").await.unwrap();
        let err = store.head_object("job", "missing").await.unwrap_err();
        assert!(matches!(
            err,
            AppError::Storage(StorageError::ObjectNotFound(_))
        ));
    }
}
