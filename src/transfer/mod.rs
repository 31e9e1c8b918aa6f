//! Job transfers
//!
//! Uploads and downloads between local folders and a job's storage
//! container, one running session per job.

pub mod classifier;
pub mod engine;
pub mod progress;
pub mod service;
pub mod session;

pub use classifier::{MimeTable, MimeTableCache, MIME_BINARY, MIME_TEXT};
pub use engine::{DownloadRequest, UploadRequest};
pub use progress::{CounterSnapshot, ProgressEvent, TransferCounters};
pub use service::{TransferHandle, TransferService};
pub use session::{SessionStatus, TransferDirection, TransferRegistry, TransferState};
