//! Parallel transfer engine
//!
//! Moves whole files between a local tree and a job container over a
//! bounded pool of concurrent item transfers, reporting each step on the
//! session's progress channel.

use std::collections::HashMap;
use std::future::Future;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::{Instant, SystemTime};

use chrono::{DateTime, Utc};
use futures::stream::{self, TryStreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::{AppError, Result};
use crate::storage::{ObjectMetadata, ObjectStore};

use super::classifier::MimeTable;
use super::progress::{ProgressEvent, TransferCounters};
use super::session::TransferState;

/// Directories whose files are stored under lowercased names.
const LOWERCASE_NAME_DIRS: [&str; 2] = ["CaseData", "Specs"];

pub const CANCELLED_MESSAGE: &str = "transfer cancelled";

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadRequest {
    /// Local files and directories to upload
    pub sources: Vec<PathBuf>,
    #[serde(default)]
    pub new_and_changed_only: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadRequest {
    pub destination: PathBuf,
    #[serde(default)]
    pub new_and_changed_only: bool,
}

pub enum TransferWork {
    Upload(UploadRequest, Arc<MimeTable>),
    Download(DownloadRequest),
}

/// How a session ended. The summary event is left for the caller to send
/// once the registry reflects the final state.
#[derive(Debug)]
pub struct TransferOutcome {
    pub state: TransferState,
    pub error: Option<String>,
    pub summary: ProgressEvent,
}

enum Halt {
    Cancelled,
    Failed(AppError),
}

impl From<AppError> for Halt {
    fn from(e: AppError) -> Self {
        Halt::Failed(e)
    }
}

/// One session's worth of transfer work against a job container
pub struct Transfer {
    pub job_id: String,
    /// Container name, which is also the job name
    pub container: String,
    pub store: Arc<dyn ObjectStore>,
    pub pool_size: usize,
    pub counters: Arc<TransferCounters>,
    pub cancel: CancellationToken,
    pub events: mpsc::UnboundedSender<ProgressEvent>,
}

impl Transfer {
    /// Send an event. A caller that stopped listening does not stop the work.
    pub fn emit(&self, event: ProgressEvent) {
        let _ = self.events.send(event);
    }

    pub async fn run(&self, work: TransferWork) -> TransferOutcome {
        let started = Instant::now();
        let result = match &work {
            TransferWork::Upload(request, mime) => self.run_upload(request, mime).await,
            TransferWork::Download(request) => self.run_download(request).await,
        };

        let (state, error) = match result {
            Ok(()) => (TransferState::Completed, None),
            Err(Halt::Cancelled) => {
                self.emit(ProgressEvent::Error {
                    message: CANCELLED_MESSAGE.to_string(),
                });
                (TransferState::Cancelled, Some(CANCELLED_MESSAGE.to_string()))
            }
            Err(Halt::Failed(e)) => {
                let message = e.first_line();
                tracing::warn!(job_id = %self.job_id, container = %self.container, error = %e, "Transfer failed");
                self.emit(ProgressEvent::Error {
                    message: message.clone(),
                });
                (TransferState::Failed, Some(message))
            }
        };

        TransferOutcome {
            state,
            error,
            summary: self.counters.end_event(started.elapsed().as_secs_f64()),
        }
    }

    // ========================================================================
    // Upload
    // ========================================================================

    async fn run_upload(
        &self,
        request: &UploadRequest,
        mime: &MimeTable,
    ) -> std::result::Result<(), Halt> {
        let (dirs, files) = split_sources(&request.sources).await;
        let root = upload_root(&dirs, &files).ok_or_else(|| {
            AppError::BadRequest("none of the upload sources exist".to_string())
        })?;

        self.emit(ProgressEvent::Start {
            pool_size: self.pool_size,
            job_id: self.job_id.clone(),
            job_name: self.container.clone(),
            root: root.display().to_string(),
        });

        self.store.create_container_if_absent(&self.container).await?;

        let remote = if request.new_and_changed_only {
            let listed_at = Instant::now();
            let objects = self.store.list_all_objects(&self.container, None).await?;
            self.emit(ProgressEvent::BlobList {
                count: objects.len(),
                seconds: listed_at.elapsed().as_secs_f64(),
            });
            objects
                .into_iter()
                .map(|o| (o.key.clone(), o))
                .collect::<HashMap<_, _>>()
        } else {
            HashMap::new()
        };

        let local_files = collect_files(&dirs, files).await?;
        tracing::debug!(container = %self.container, files = local_files.len(), "Upload plan ready");

        self.for_each_item(local_files, |file| {
            self.upload_item(&root, file, &remote, mime)
        })
        .await
    }

    async fn upload_item(
        &self,
        root: &Path,
        file: PathBuf,
        remote: &HashMap<String, ObjectMetadata>,
        mime: &MimeTable,
    ) -> std::result::Result<(), Halt> {
        let name = object_name(root, &file);
        let metadata = tokio::fs::metadata(&file).await.map_err(AppError::from)?;
        let bytes = metadata.len();

        if let Some(existing) = remote.get(&name) {
            if let (Ok(modified), Some(remote_time)) = (metadata.modified(), existing.last_modified)
            {
                let local_time = DateTime::<Utc>::from(modified);
                if local_time <= remote_time {
                    tracing::debug!(container = %self.container, name = %name, "Skipping unchanged upload");
                    self.counters.record_skip(bytes);
                    self.emit(ProgressEvent::Skip {
                        name,
                        bytes,
                        local: local_time,
                        remote: remote_time,
                    });
                    return Ok(());
                }
            }
        }

        self.emit(ProgressEvent::Upload {
            name: name.clone(),
            bytes,
        });
        let content_type = mime.classify_file(&file).await?;
        self.until_cancelled(self.store.put_object(&self.container, &name, &file, &content_type))
            .await?;
        self.counters.record_transfer(bytes);
        tracing::debug!(container = %self.container, name = %name, bytes, "Uploaded");
        Ok(())
    }

    // ========================================================================
    // Download
    // ========================================================================

    async fn run_download(&self, request: &DownloadRequest) -> std::result::Result<(), Halt> {
        self.emit(ProgressEvent::Start {
            pool_size: self.pool_size,
            job_id: self.job_id.clone(),
            job_name: self.container.clone(),
            root: request.destination.display().to_string(),
        });

        let objects = self.store.list_all_objects(&self.container, None).await?;
        tokio::fs::create_dir_all(&request.destination)
            .await
            .map_err(AppError::from)?;

        let destination = request.destination.as_path();
        let check_local = request.new_and_changed_only;
        self.for_each_item(objects, |object| {
            self.download_item(destination, object, check_local)
        })
        .await
    }

    async fn download_item(
        &self,
        destination: &Path,
        object: ObjectMetadata,
        check_local: bool,
    ) -> std::result::Result<(), Halt> {
        let target = local_path(destination, &object.key)?;
        let bytes = object.size.max(0) as u64;

        if check_local {
            if let (Some(remote_time), Ok(local)) =
                (object.last_modified, tokio::fs::metadata(&target).await)
            {
                if let Ok(modified) = local.modified() {
                    let local_time = DateTime::<Utc>::from(modified);
                    if remote_time <= local_time {
                        tracing::debug!(container = %self.container, name = %object.key, "Skipping unchanged download");
                        self.counters.record_skip(bytes);
                        self.emit(ProgressEvent::Skip {
                            name: object.key,
                            bytes,
                            local: local_time,
                            remote: remote_time,
                        });
                        return Ok(());
                    }
                }
            }
        }

        self.emit(ProgressEvent::Download {
            name: object.key.clone(),
            bytes,
        });
        let partial = partial_path(&target);
        let fetched = self
            .until_cancelled(self.fetch_to(&object, &partial))
            .await;
        if let Err(halt) = fetched {
            if let Err(e) = tokio::fs::remove_file(&partial).await {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!(path = %partial.display(), error = %e, "Could not remove partial download");
                }
            }
            return Err(halt);
        }
        tokio::fs::rename(&partial, &target)
            .await
            .map_err(AppError::from)?;
        self.counters.record_transfer(bytes);
        tracing::debug!(container = %self.container, name = %object.key, bytes, "Downloaded");
        Ok(())
    }

    /// Fetch an object into `path` and give it the remote modification time.
    async fn fetch_to(&self, object: &ObjectMetadata, path: &Path) -> Result<()> {
        self.store
            .get_object_to_file(&self.container, &object.key, path)
            .await?;
        if let Some(remote_time) = object.last_modified {
            set_modified(path, remote_time).await?;
        }
        Ok(())
    }

    // ========================================================================
    // Worker pool
    // ========================================================================

    /// Run `work` over the items, at most `pool_size` at a time. The first
    /// failure or an observed cancellation stops the rest.
    async fn for_each_item<T, F, Fut>(
        &self,
        items: Vec<T>,
        work: F,
    ) -> std::result::Result<(), Halt>
    where
        F: Fn(T) -> Fut,
        Fut: Future<Output = std::result::Result<(), Halt>>,
    {
        stream::iter(items.into_iter().map(Ok::<T, Halt>))
            .try_for_each_concurrent(self.pool_size, |item| {
                let item_work = work(item);
                async move {
                    if self.cancel.is_cancelled() {
                        return Err(Halt::Cancelled);
                    }
                    item_work.await
                }
            })
            .await
    }

    /// Race one storage call against cancellation. A cancelled call is
    /// dropped mid-flight, so the caller discards whatever it left behind.
    async fn until_cancelled<T>(
        &self,
        work: impl Future<Output = Result<T>>,
    ) -> std::result::Result<T, Halt> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Halt::Cancelled),
            result = work => result.map_err(Halt::Failed),
        }
    }
}

/// Existing sources split into directories and files.
async fn split_sources(sources: &[PathBuf]) -> (Vec<PathBuf>, Vec<PathBuf>) {
    let mut dirs = Vec::new();
    let mut files = Vec::new();
    for source in sources {
        match tokio::fs::metadata(source).await {
            Ok(m) if m.is_dir() => dirs.push(source.clone()),
            Ok(_) => files.push(source.clone()),
            Err(e) => {
                tracing::warn!(path = %source.display(), error = %e, "Upload source not found");
            }
        }
    }
    (dirs, files)
}

/// The parent of the first directory, else the directory of the first file.
fn upload_root(dirs: &[PathBuf], files: &[PathBuf]) -> Option<PathBuf> {
    dirs.first()
        .map(|d| d.parent().unwrap_or(d).to_path_buf())
        .or_else(|| files.first().and_then(|f| f.parent()).map(Path::to_path_buf))
}

async fn collect_files(dirs: &[PathBuf], files: Vec<PathBuf>) -> Result<Vec<PathBuf>> {
    let mut found = files;
    let mut pending = dirs.to_vec();
    while let Some(dir) = pending.pop() {
        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let file_type = entry.file_type().await?;
            if file_type.is_dir() {
                pending.push(entry.path());
            } else if file_type.is_file() {
                found.push(entry.path());
            }
        }
    }
    Ok(found)
}

/// Object name for a local file: its path below `root`, `/` separated.
pub(crate) fn object_name(root: &Path, file: &Path) -> String {
    let relative = match file.strip_prefix(root) {
        Ok(relative) => relative,
        Err(_) => Path::new(file.file_name().unwrap_or_default()),
    };

    let mut parts: Vec<String> = relative
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect();

    if in_lowercase_dir(file) {
        if let Some(file_name) = parts.last_mut() {
            *file_name = file_name.to_lowercase();
        }
    }

    parts.join("/")
}

fn in_lowercase_dir(file: &Path) -> bool {
    file.parent().is_some_and(|dir| {
        dir.components().any(|c| match c {
            Component::Normal(part) => {
                let part = part.to_string_lossy();
                LOWERCASE_NAME_DIRS
                    .iter()
                    .any(|d| part.eq_ignore_ascii_case(d))
            }
            _ => false,
        })
    })
}

/// Local path for an object name below the destination.
fn local_path(destination: &Path, name: &str) -> Result<PathBuf> {
    let mut path = destination.to_path_buf();
    for part in name.split('/').filter(|p| !p.is_empty()) {
        if part == "." || part == ".." {
            return Err(AppError::BadRequest(format!(
                "Object name '{}' escapes the download folder",
                name
            )));
        }
        path.push(part);
    }
    Ok(path)
}

/// Hidden sibling a download is written to before it is moved into place.
fn partial_path(target: &Path) -> PathBuf {
    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    target.with_file_name(format!(".{}.partial", name))
}

async fn set_modified(path: &Path, time: DateTime<Utc>) -> Result<()> {
    let file = tokio::fs::OpenOptions::new().write(true).open(path).await?;
    file.into_std().await.set_modified(SystemTime::from(time))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryObjectStore;
    use crate::transfer::classifier::{MIME_BINARY, MIME_TEXT};
    use chrono::Duration;

    const XML: &str = r#"<types><type name="text/csv"><ext>.csv</ext></type></types>"#;

    struct Harness {
        transfer: Transfer,
        memory: Arc<MemoryObjectStore>,
        events: mpsc::UnboundedReceiver<ProgressEvent>,
    }

    fn harness(pool_size: usize) -> Harness {
        let memory = Arc::new(MemoryObjectStore::new());
        let (tx, rx) = mpsc::unbounded_channel();
        Harness {
            transfer: Transfer {
                job_id: "20000001".into(),
                container: "demo".into(),
                store: memory.clone(),
                pool_size,
                counters: Arc::new(TransferCounters::default()),
                cancel: CancellationToken::new(),
                events: tx,
            },
            memory,
            events: rx,
        }
    }

    fn drain(events: &mut mpsc::UnboundedReceiver<ProgressEvent>) -> Vec<ProgressEvent> {
        let mut out = Vec::new();
        while let Ok(event) = events.try_recv() {
            out.push(event);
        }
        out
    }

    async fn job_tree() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        let job = dir.path().join("demo");
        tokio::fs::create_dir_all(job.join("CaseData")).await.unwrap();
        tokio::fs::create_dir_all(job.join("Specs")).await.unwrap();
        tokio::fs::write(job.join("age.vtr"), [0u8, 1, 2, 3]).await.unwrap();
        tokio::fs::write(job.join("CaseData").join("Resp.DAT"), b"1,2\n")
            .await
            .unwrap();
        tokio::fs::write(job.join("Specs").join("Table.CSV"), b"a,b\n")
            .await
            .unwrap();
        dir
    }

    fn upload_work(sources: Vec<PathBuf>, new_and_changed_only: bool) -> TransferWork {
        TransferWork::Upload(
            UploadRequest {
                sources,
                new_and_changed_only,
            },
            Arc::new(MimeTable::from_xml(XML).unwrap()),
        )
    }

    #[test]
    fn test_object_names() {
        let root = Path::new("/data/jobs");
        assert_eq!(
            object_name(root, Path::new("/data/jobs/demo/age.vtr")),
            "demo/age.vtr"
        );
        assert_eq!(
            object_name(root, Path::new("/data/jobs/demo/CaseData/Resp.DAT")),
            "demo/CaseData/resp.dat"
        );
        assert_eq!(
            object_name(root, Path::new("/data/jobs/demo/specs/sub/T.CSV")),
            "demo/specs/sub/t.csv"
        );
        assert_eq!(
            object_name(root, Path::new("/elsewhere/Notes.TXT")),
            "Notes.TXT"
        );
    }

    #[test]
    fn test_upload_root() {
        let dirs = vec![PathBuf::from("/data/jobs/demo")];
        let files = vec![PathBuf::from("/tmp/x/readme.txt")];
        assert_eq!(upload_root(&dirs, &files), Some(PathBuf::from("/data/jobs")));
        assert_eq!(upload_root(&[], &files), Some(PathBuf::from("/tmp/x")));
        assert_eq!(upload_root(&[], &[]), None);
    }

    #[test]
    fn test_local_path_rejects_escape() {
        let base = Path::new("/out");
        assert_eq!(
            local_path(base, "demo/CaseData/a.dat").unwrap(),
            PathBuf::from("/out/demo/CaseData/a.dat")
        );
        assert!(local_path(base, "../etc/passwd").is_err());
    }

    #[tokio::test]
    async fn test_upload_tree() {
        let tree = job_tree().await;
        let mut h = harness(2);

        let outcome = h
            .transfer
            .run(upload_work(vec![tree.path().join("demo")], false))
            .await;
        assert_eq!(outcome.state, TransferState::Completed);
        assert!(outcome.error.is_none());

        let events = drain(&mut h.events);
        assert_eq!(
            events[0].to_string(),
            format!("START|2|20000001|demo|{}", tree.path().display())
        );
        let uploads = events.iter().filter(|e| e.tag() == "UPLOAD").count();
        assert_eq!(uploads, 3);

        assert_eq!(
            h.memory.object_data("demo", "demo/CaseData/resp.dat").await,
            Some(b"1,2\n".to_vec())
        );
        let csv = h
            .memory
            .head_object("demo", "demo/Specs/table.csv")
            .await
            .unwrap();
        assert_eq!(csv.content_type.as_deref(), Some("text/csv"));
        let vtr = h.memory.head_object("demo", "demo/age.vtr").await.unwrap();
        assert_eq!(vtr.content_type.as_deref(), Some(MIME_BINARY));
        let dat = h
            .memory
            .head_object("demo", "demo/CaseData/resp.dat")
            .await
            .unwrap();
        assert_eq!(dat.content_type.as_deref(), Some(MIME_TEXT));

        match outcome.summary {
            ProgressEvent::End {
                count,
                bytes,
                skip_count,
                ..
            } => {
                assert_eq!(count, 3);
                assert_eq!(bytes, 12);
                assert_eq!(skip_count, 0);
            }
            other => panic!("unexpected summary {other}"),
        }
    }

    #[tokio::test]
    async fn test_upload_skips_unchanged() {
        let tree = job_tree().await;
        let mut h = harness(4);
        let future = Utc::now() + Duration::hours(1);
        h.memory
            .insert_object("demo", "demo/age.vtr", vec![9; 4], future)
            .await;
        h.memory
            .insert_object(
                "demo",
                "demo/Specs/table.csv",
                vec![],
                Utc::now() - Duration::days(30),
            )
            .await;

        let outcome = h
            .transfer
            .run(upload_work(vec![tree.path().join("demo")], true))
            .await;
        assert_eq!(outcome.state, TransferState::Completed);

        let events = drain(&mut h.events);
        assert_eq!(events[0].tag(), "START");
        assert_eq!(events[1].to_string().split('|').take(2).collect::<Vec<_>>(), ["BLOBLIST", "2"]);

        let skipped: Vec<_> = events.iter().filter(|e| e.tag() == "SKIP").collect();
        assert_eq!(skipped.len(), 1);
        assert!(skipped[0].to_string().starts_with("SKIP|demo/age.vtr|4|"));

        // skipped object untouched, stale one replaced
        assert_eq!(h.memory.object_data("demo", "demo/age.vtr").await, Some(vec![9; 4]));
        assert_eq!(
            h.memory.object_data("demo", "demo/Specs/table.csv").await,
            Some(b"a,b\n".to_vec())
        );
        let totals = h.transfer.counters.snapshot();
        assert_eq!(totals.count, 2);
        assert_eq!(totals.skip_count, 1);
        assert_eq!(totals.skip_bytes, 4);
    }

    #[tokio::test]
    async fn test_upload_without_sources_fails() {
        let mut h = harness(1);
        let outcome = h
            .transfer
            .run(upload_work(vec![PathBuf::from("/definitely/not/here")], false))
            .await;
        assert_eq!(outcome.state, TransferState::Failed);
        let events = drain(&mut h.events);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].tag(), "ERROR");
    }

    #[tokio::test]
    async fn test_cancelled_before_items() {
        let tree = job_tree().await;
        let mut h = harness(2);
        h.transfer.cancel.cancel();

        let outcome = h
            .transfer
            .run(upload_work(vec![tree.path().join("demo")], false))
            .await;
        assert_eq!(outcome.state, TransferState::Cancelled);
        assert_eq!(outcome.error.as_deref(), Some(CANCELLED_MESSAGE));

        let events = drain(&mut h.events);
        assert_eq!(events.first().map(|e| e.tag()), Some("START"));
        assert_eq!(
            events.last().map(|e| e.to_string()),
            Some("ERROR|transfer cancelled".to_string())
        );
        assert!(!events.iter().any(|e| e.tag() == "UPLOAD"));
        assert_eq!(h.transfer.counters.snapshot().count, 0);
    }

    #[tokio::test]
    async fn test_download_then_skip() {
        let out = tempfile::tempdir().unwrap();
        let mut h = harness(3);
        let stamp = Utc::now() - Duration::hours(2);
        h.memory
            .insert_object("demo", "age.vtr", vec![1, 2, 3], stamp)
            .await;
        h.memory
            .insert_object("demo", "CaseData/a.dat", b"xyz!".to_vec(), stamp)
            .await;

        let request = DownloadRequest {
            destination: out.path().to_path_buf(),
            new_and_changed_only: true,
        };
        let outcome = h.transfer.run(TransferWork::Download(request.clone())).await;
        assert_eq!(outcome.state, TransferState::Completed);
        assert_eq!(
            tokio::fs::read(out.path().join("CaseData").join("a.dat"))
                .await
                .unwrap(),
            b"xyz!"
        );
        let events = drain(&mut h.events);
        assert_eq!(events.iter().filter(|e| e.tag() == "DOWNLOAD").count(), 2);

        // local copies carry the remote time, so a second pass skips both
        let outcome = h.transfer.run(TransferWork::Download(request)).await;
        assert_eq!(outcome.state, TransferState::Completed);
        let events = drain(&mut h.events);
        assert_eq!(events.iter().filter(|e| e.tag() == "SKIP").count(), 2);
        assert_eq!(h.transfer.counters.snapshot().skip_count, 2);
    }

    #[tokio::test]
    async fn test_download_missing_container_reports_error() {
        let out = tempfile::tempdir().unwrap();
        let mut h = harness(1);
        let outcome = h
            .transfer
            .run(TransferWork::Download(DownloadRequest {
                destination: out.path().to_path_buf(),
                new_and_changed_only: false,
            }))
            .await;
        assert_eq!(outcome.state, TransferState::Failed);
        assert!(outcome.error.unwrap().contains("Container not found"));

        let events = drain(&mut h.events);
        assert_eq!(events[0].tag(), "START");
        assert_eq!(events[1].tag(), "ERROR");
    }

    /// Memory store whose downloads write a few bytes and then hang until
    /// `stall` is cleared.
    struct StallingStore {
        inner: Arc<MemoryObjectStore>,
        stall: std::sync::atomic::AtomicBool,
    }

    #[async_trait::async_trait]
    impl ObjectStore for StallingStore {
        async fn create_container_if_absent(&self, container: &str) -> Result<bool> {
            self.inner.create_container_if_absent(container).await
        }

        async fn container_exists(&self, container: &str) -> Result<bool> {
            self.inner.container_exists(container).await
        }

        async fn list_objects(
            &self,
            container: &str,
            options: crate::storage::ListOptions,
        ) -> Result<crate::storage::ObjectList> {
            self.inner.list_objects(container, options).await
        }

        async fn head_object(&self, container: &str, key: &str) -> Result<ObjectMetadata> {
            self.inner.head_object(container, key).await
        }

        async fn put_object(
            &self,
            container: &str,
            key: &str,
            source: &Path,
            content_type: &str,
        ) -> Result<ObjectMetadata> {
            self.inner.put_object(container, key, source, content_type).await
        }

        async fn get_object_to_file(
            &self,
            container: &str,
            key: &str,
            destination: &Path,
        ) -> Result<ObjectMetadata> {
            if self.stall.load(std::sync::atomic::Ordering::SeqCst) {
                tokio::fs::write(destination, b"HALF").await?;
                return std::future::pending().await;
            }
            self.inner.get_object_to_file(container, key, destination).await
        }
    }

    fn transfer_over(
        store: Arc<dyn ObjectStore>,
    ) -> (Transfer, mpsc::UnboundedReceiver<ProgressEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let transfer = Transfer {
            job_id: "20000001".into(),
            container: "demo".into(),
            store,
            pool_size: 1,
            counters: Arc::new(TransferCounters::default()),
            cancel: CancellationToken::new(),
            events: tx,
        };
        (transfer, rx)
    }

    #[tokio::test]
    async fn test_cancel_mid_download_leaves_nothing_behind() {
        let out = tempfile::tempdir().unwrap();
        let memory = Arc::new(MemoryObjectStore::new());
        memory
            .insert_object(
                "demo",
                "big.dat",
                b"seventeen bytes!!".to_vec(),
                Utc::now() - Duration::hours(2),
            )
            .await;
        let store = Arc::new(StallingStore {
            inner: memory,
            stall: std::sync::atomic::AtomicBool::new(true),
        });
        let request = DownloadRequest {
            destination: out.path().to_path_buf(),
            new_and_changed_only: true,
        };

        let (transfer, mut events) = transfer_over(store.clone());
        let cancel = transfer.cancel.clone();
        let (outcome, _) = tokio::join!(
            transfer.run(TransferWork::Download(request.clone())),
            async move {
                tokio::time::sleep(std::time::Duration::from_millis(100)).await;
                cancel.cancel();
            }
        );
        assert_eq!(outcome.state, TransferState::Cancelled);
        let tags: Vec<_> = drain(&mut events).iter().map(|e| e.tag()).collect();
        assert_eq!(tags, ["START", "DOWNLOAD", "ERROR"]);
        assert_eq!(transfer.counters.snapshot().count, 0);

        // neither the target nor the partial file survives the cancel
        let mut entries = tokio::fs::read_dir(out.path()).await.unwrap();
        assert!(entries.next_entry().await.unwrap().is_none());

        // a resume fetches the object again instead of skipping it
        store.stall.store(false, std::sync::atomic::Ordering::SeqCst);
        let (transfer, mut events) = transfer_over(store);
        let outcome = transfer.run(TransferWork::Download(request)).await;
        assert_eq!(outcome.state, TransferState::Completed);
        assert!(!drain(&mut events).iter().any(|e| e.tag() == "SKIP"));
        assert_eq!(
            tokio::fs::read(out.path().join("big.dat")).await.unwrap(),
            b"seventeen bytes!!"
        );
    }
}
