//! Configuration management for the licensing server

use serde::Deserialize;
use std::env;

/// Reference table of file extensions to content types.
pub const DEFAULT_MIME_TYPES_URL: &str =
    "https://systemrcs.blob.core.windows.net/reference/mime-types.xml";

/// Arbitrary upper bound on parallel item transfers per session.
pub const DEFAULT_MAX_PARALLEL_TRANSFERS: usize = 4;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub storage: StorageConfig,
    pub transfer: TransferConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Region used when a customer locator does not name one
    pub default_region: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TransferConfig {
    pub mime_types_url: String,
    pub max_parallel: usize,
}

impl TransferConfig {
    /// Worker pool size: the configured maximum capped by hardware parallelism.
    pub fn pool_size(&self) -> usize {
        let cores = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        self.max_parallel.min(cores).max(1)
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 3000,
            },
            database: DatabaseConfig {
                url: "sqlite:./licensing.db".to_string(),
            },
            storage: StorageConfig {
                default_region: "us-east-1".to_string(),
            },
            transfer: TransferConfig {
                mime_types_url: DEFAULT_MIME_TYPES_URL.to_string(),
                max_parallel: DEFAULT_MAX_PARALLEL_TRANSFERS,
            },
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, env::VarError> {
        Ok(Config {
            server: ServerConfig {
                host: env::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: env::var("SERVER_PORT")
                    .unwrap_or_else(|_| "3000".to_string())
                    .parse()
                    .unwrap_or(3000),
            },
            database: DatabaseConfig {
                url: env::var("DATABASE_URL")?,
            },
            storage: StorageConfig {
                default_region: env::var("STORAGE_DEFAULT_REGION")
                    .unwrap_or_else(|_| "us-east-1".to_string()),
            },
            transfer: TransferConfig {
                mime_types_url: env::var("MIME_TYPES_URL")
                    .unwrap_or_else(|_| DEFAULT_MIME_TYPES_URL.to_string()),
                max_parallel: env::var("TRANSFER_MAX_PARALLEL")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(DEFAULT_MAX_PARALLEL_TRANSFERS),
            },
        })
    }
}
