//! Transfer progress events and shared counters

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::Serialize;

const SKIP_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// One line of a transfer's progress stream.
///
/// `Display` renders the pipe-delimited wire form, tag first.
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    Start {
        pool_size: usize,
        job_id: String,
        job_name: String,
        root: String,
    },
    /// Remote listing used for skip decisions
    BlobList { count: usize, seconds: f64 },
    Upload { name: String, bytes: u64 },
    Download { name: String, bytes: u64 },
    Skip {
        name: String,
        bytes: u64,
        local: DateTime<Utc>,
        remote: DateTime<Utc>,
    },
    Error { message: String },
    End {
        count: u64,
        bytes: u64,
        skip_count: u64,
        skip_bytes: u64,
        seconds: f64,
    },
}

impl ProgressEvent {
    pub fn tag(&self) -> &'static str {
        match self {
            ProgressEvent::Start { .. } => "START",
            ProgressEvent::BlobList { .. } => "BLOBLIST",
            ProgressEvent::Upload { .. } => "UPLOAD",
            ProgressEvent::Download { .. } => "DOWNLOAD",
            ProgressEvent::Skip { .. } => "SKIP",
            ProgressEvent::Error { .. } => "ERROR",
            ProgressEvent::End { .. } => "END",
        }
    }
}

impl fmt::Display for ProgressEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = self.tag();
        match self {
            ProgressEvent::Start {
                pool_size,
                job_id,
                job_name,
                root,
            } => write!(f, "{tag}|{pool_size}|{job_id}|{job_name}|{root}"),
            ProgressEvent::BlobList { count, seconds } => write!(f, "{tag}|{count}|{seconds:.2}"),
            ProgressEvent::Upload { name, bytes } | ProgressEvent::Download { name, bytes } => {
                write!(f, "{tag}|{name}|{bytes}")
            }
            ProgressEvent::Skip {
                name,
                bytes,
                local,
                remote,
            } => write!(
                f,
                "{tag}|{name}|{bytes}|{}|{}",
                local.format(SKIP_TIME_FORMAT),
                remote.format(SKIP_TIME_FORMAT)
            ),
            ProgressEvent::Error { message } => write!(f, "{tag}|{message}"),
            ProgressEvent::End {
                count,
                bytes,
                skip_count,
                skip_bytes,
                seconds,
            } => write!(
                f,
                "{tag}|{count}|{bytes}|{skip_count}|{skip_bytes}|{seconds:.1}"
            ),
        }
    }
}

/// Totals shared by every worker of one session
#[derive(Debug, Default)]
pub struct TransferCounters {
    count: AtomicU64,
    bytes: AtomicU64,
    skip_count: AtomicU64,
    skip_bytes: AtomicU64,
}

/// Point-in-time copy of [`TransferCounters`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CounterSnapshot {
    pub count: u64,
    pub bytes: u64,
    pub skip_count: u64,
    pub skip_bytes: u64,
}

impl TransferCounters {
    pub fn record_transfer(&self, bytes: u64) {
        self.count.fetch_add(1, Ordering::Relaxed);
        self.bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn record_skip(&self, bytes: u64) {
        self.skip_count.fetch_add(1, Ordering::Relaxed);
        self.skip_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            count: self.count.load(Ordering::Relaxed),
            bytes: self.bytes.load(Ordering::Relaxed),
            skip_count: self.skip_count.load(Ordering::Relaxed),
            skip_bytes: self.skip_bytes.load(Ordering::Relaxed),
        }
    }

    /// Summary event for the end of a session.
    pub fn end_event(&self, seconds: f64) -> ProgressEvent {
        let totals = self.snapshot();
        ProgressEvent::End {
            count: totals.count,
            bytes: totals.bytes,
            skip_count: totals.skip_count,
            skip_bytes: totals.skip_bytes,
            seconds,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::sync::Arc;

    #[test]
    fn test_wire_format() {
        let start = ProgressEvent::Start {
            pool_size: 4,
            job_id: "20000001".into(),
            job_name: "demo".into(),
            root: "/data/jobs".into(),
        };
        assert_eq!(start.to_string(), "START|4|20000001|demo|/data/jobs");

        let upload = ProgressEvent::Upload {
            name: "CaseData/a.dat".into(),
            bytes: 1024,
        };
        assert_eq!(upload.to_string(), "UPLOAD|CaseData/a.dat|1024");

        let listing = ProgressEvent::BlobList {
            count: 12,
            seconds: 0.4567,
        };
        assert_eq!(listing.to_string(), "BLOBLIST|12|0.46");

        let end = ProgressEvent::End {
            count: 3,
            bytes: 300,
            skip_count: 1,
            skip_bytes: 10,
            seconds: 2.26,
        };
        assert_eq!(end.to_string(), "END|3|300|1|10|2.3");

        let error = ProgressEvent::Error {
            message: "transfer cancelled".into(),
        };
        assert_eq!(error.to_string(), "ERROR|transfer cancelled");
    }

    #[test]
    fn test_skip_times() {
        let skip = ProgressEvent::Skip {
            name: "age.vtr".into(),
            bytes: 77,
            local: Utc.with_ymd_and_hms(2024, 3, 1, 8, 30, 0).unwrap(),
            remote: Utc.with_ymd_and_hms(2024, 3, 2, 9, 0, 5).unwrap(),
        };
        assert_eq!(
            skip.to_string(),
            "SKIP|age.vtr|77|2024-03-01T08:30:00|2024-03-02T09:00:05"
        );
    }

    #[tokio::test]
    async fn test_counters_under_concurrency() {
        let counters = Arc::new(TransferCounters::default());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let counters = counters.clone();
            handles.push(tokio::spawn(async move {
                for _ in 0..1000 {
                    counters.record_transfer(2);
                    counters.record_skip(1);
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let totals = counters.snapshot();
        assert_eq!(totals.count, 8000);
        assert_eq!(totals.bytes, 16000);
        assert_eq!(totals.skip_count, 8000);
        assert_eq!(totals.skip_bytes, 8000);
    }
}
