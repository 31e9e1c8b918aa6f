//! Storage types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StorageError;

/// Metadata about a stored object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMetadata {
    pub key: String,
    pub size: i64,
    pub last_modified: Option<DateTime<Utc>>,
    pub content_type: Option<String>,
    pub etag: Option<String>,
}

/// One page of a container listing
#[derive(Debug, Clone, Default, Serialize)]
pub struct ObjectList {
    pub objects: Vec<ObjectMetadata>,
    /// Common prefixes when listing with a delimiter
    pub prefixes: Vec<String>,
    pub continuation_token: Option<String>,
    pub is_truncated: bool,
}

/// Options for listing objects
#[derive(Debug, Clone, Default)]
pub struct ListOptions {
    pub prefix: Option<String>,
    pub delimiter: Option<String>,
    pub max_keys: Option<i32>,
    pub continuation_token: Option<String>,
}

impl ListOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    pub fn with_delimiter(mut self, delimiter: impl Into<String>) -> Self {
        self.delimiter = Some(delimiter.into());
        self
    }

    pub fn with_max_keys(mut self, max_keys: i32) -> Self {
        self.max_keys = Some(max_keys);
        self
    }

    pub fn with_continuation_token(mut self, token: impl Into<String>) -> Self {
        self.continuation_token = Some(token.into());
        self
    }
}

/// Credentials for an S3-compatible namespace, stored as JSON in the
/// customer's storage key.
#[derive(Clone, Deserialize)]
pub struct S3Locator {
    pub endpoint: Option<String>,
    pub access_key: String,
    pub secret_key: String,
    pub region: Option<String>,
}

impl std::fmt::Debug for S3Locator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3Locator")
            .field("endpoint", &self.endpoint)
            .field("region", &self.region)
            .finish_non_exhaustive()
    }
}

/// Parsed customer storage key
#[derive(Debug, Clone)]
pub enum StorageLocator {
    /// `memory:` selects the process-wide in-memory store
    Memory,
    S3(S3Locator),
}

impl StorageLocator {
    pub const MEMORY: &'static str = "memory:";

    pub fn parse(raw: &str) -> Result<Self, StorageError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(StorageError::InvalidLocator("storage key is empty".to_string()));
        }
        if raw.eq_ignore_ascii_case(Self::MEMORY) {
            return Ok(StorageLocator::Memory);
        }
        serde_json::from_str::<S3Locator>(raw)
            .map(StorageLocator::S3)
            .map_err(|e| StorageError::InvalidLocator(format!("malformed storage key: {}", e)))
    }
}
