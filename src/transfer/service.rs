//! Transfer service: validates a job, registers the session and runs the
//! engine on its own task.

use std::sync::Arc;

use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::licensing::{EntityId, Job, LicensingProvider};
use crate::storage::{ObjectStore, StoreConnector};

use super::classifier::MimeTableCache;
use super::engine::{DownloadRequest, Transfer, TransferWork, UploadRequest};
use super::progress::ProgressEvent;
use super::session::{SessionStatus, TransferDirection, TransferRegistry};

/// A started session: its id and the progress stream.
#[derive(Debug)]
pub struct TransferHandle {
    pub session_id: Uuid,
    pub events: mpsc::UnboundedReceiver<ProgressEvent>,
}

#[derive(Clone)]
pub struct TransferService {
    inner: Arc<Inner>,
}

struct Inner {
    licensing: LicensingProvider,
    connector: Arc<dyn StoreConnector>,
    registry: TransferRegistry,
    mime: MimeTableCache,
    pool_size: usize,
}

impl TransferService {
    pub fn new(
        licensing: LicensingProvider,
        connector: Arc<dyn StoreConnector>,
        mime: MimeTableCache,
        pool_size: usize,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                licensing,
                connector,
                registry: TransferRegistry::new(),
                mime,
                pool_size: pool_size.max(1),
            }),
        }
    }

    pub fn registry(&self) -> &TransferRegistry {
        &self.inner.registry
    }

    /// Start uploading local files and directories into the job container.
    ///
    /// The mime table is loaded first; a failed download fails this call and
    /// is retried by the next one.
    pub async fn start_upload(&self, job_id: &str, request: UploadRequest) -> Result<TransferHandle> {
        let id = EntityId::parse(job_id)?;
        if request.sources.is_empty() {
            return Err(AppError::BadRequest(
                "At least one upload source is required".to_string(),
            ));
        }
        let mime = self.inner.mime.get().await?;
        let (job, store) = self.open_job(&id, TransferDirection::Upload).await?;
        self.launch(&id, &job, store, TransferDirection::Upload, TransferWork::Upload(request, mime))
            .await
    }

    /// Start downloading every object of the job container into a folder.
    pub async fn start_download(
        &self,
        job_id: &str,
        request: DownloadRequest,
    ) -> Result<TransferHandle> {
        let id = EntityId::parse(job_id)?;
        let (job, store) = self.open_job(&id, TransferDirection::Download).await?;
        self.launch(&id, &job, store, TransferDirection::Download, TransferWork::Download(request))
            .await
    }

    pub async fn cancel(&self, session_id: Uuid) -> bool {
        self.inner.registry.cancel(session_id).await
    }

    pub async fn session_status(&self, session_id: Uuid) -> Option<SessionStatus> {
        self.inner.registry.status(session_id).await
    }

    pub async fn purge_finished_older_than(&self, age: chrono::Duration) -> usize {
        self.inner.registry.purge_finished_older_than(age).await
    }

    /// The job and the store holding its container.
    async fn open_job(
        &self,
        id: &EntityId,
        direction: TransferDirection,
    ) -> Result<(Job, Arc<dyn ObjectStore>)> {
        let verb = match direction {
            TransferDirection::Upload => "upload",
            TransferDirection::Download => "download",
        };
        let job = self
            .inner
            .licensing
            .read_job(id.as_str())
            .await?
            .ok_or_else(|| AppError::JobNotFound(format!("Job Id {} does not exist for {}", id, verb)))?;

        let Some(customer_id) = job.customer_id.as_ref() else {
            return Err(AppError::JobOrphaned(id.to_string()));
        };
        let customer = self
            .inner
            .licensing
            .read_customer(customer_id.as_str())
            .await?
            .ok_or_else(|| AppError::JobOrphaned(id.to_string()))?;

        let store = self.inner.connector.connect(&customer.storage_key).await?;
        Ok((job, store))
    }

    async fn launch(
        &self,
        id: &EntityId,
        job: &Job,
        store: Arc<dyn ObjectStore>,
        direction: TransferDirection,
        work: TransferWork,
    ) -> Result<TransferHandle> {
        let ticket = self.inner.registry.begin(id, &job.name, direction).await?;
        let (tx, rx) = mpsc::unbounded_channel();

        let transfer = Transfer {
            job_id: id.to_string(),
            container: job.name.clone(),
            store,
            pool_size: self.inner.pool_size,
            counters: ticket.counters.clone(),
            cancel: ticket.cancel.clone(),
            events: tx,
        };

        let registry = self.inner.registry.clone();
        let session_id = ticket.session_id;
        tokio::spawn(async move {
            let outcome = transfer.run(work).await;
            registry.finish(session_id, outcome.state, outcome.error).await;
            transfer.emit(outcome.summary);
        });

        Ok(TransferHandle {
            session_id,
            events: rx,
        })
    }
}
