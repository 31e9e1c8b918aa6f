//! Application state management

use std::sync::Arc;

use crate::config::Config;
use crate::inspect::StorageInspector;
use crate::licensing::LicensingProvider;
use crate::storage::StoreConnector;
use crate::transfer::{MimeTableCache, TransferService};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: Config,
    licensing: LicensingProvider,
    transfers: TransferService,
    inspector: StorageInspector,
}

impl AppState {
    /// Wire the services over one database pool and store connector.
    pub fn new(
        config: Config,
        licensing: LicensingProvider,
        connector: Arc<dyn StoreConnector>,
        mime: MimeTableCache,
    ) -> Self {
        let transfers = TransferService::new(
            licensing.clone(),
            connector.clone(),
            mime,
            config.transfer.pool_size(),
        );
        let inspector = StorageInspector::new(licensing.clone(), connector);

        Self {
            inner: Arc::new(AppStateInner {
                config,
                licensing,
                transfers,
                inspector,
            }),
        }
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub fn licensing(&self) -> &LicensingProvider {
        &self.inner.licensing
    }

    pub fn transfers(&self) -> &TransferService {
        &self.inner.transfers
    }

    pub fn inspector(&self) -> &StorageInspector {
        &self.inner.inspector
    }
}
