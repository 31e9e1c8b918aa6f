//! Transfer Session Registry
//!
//! Tracks transfer sessions in memory:
//! - At most one running session per job
//! - Cooperative cancellation through a per-session token
//! - Cleanup of finished sessions past a cutoff

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::licensing::EntityId;

use super::progress::{CounterSnapshot, TransferCounters};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferDirection {
    Upload,
    Download,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferState {
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TransferState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, TransferState::Running)
    }
}

#[derive(Debug)]
struct TransferSession {
    job_id: EntityId,
    job_name: String,
    direction: TransferDirection,
    state: TransferState,
    started_at: DateTime<Utc>,
    ended_at: Option<DateTime<Utc>>,
    error: Option<String>,
    counters: Arc<TransferCounters>,
    cancel: CancellationToken,
}

/// Snapshot of a session for status queries
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatus {
    pub session_id: Uuid,
    pub job_id: EntityId,
    pub job_name: String,
    pub direction: TransferDirection,
    pub state: TransferState,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub counters: CounterSnapshot,
}

/// What a newly registered session hands to its worker
#[derive(Debug, Clone)]
pub struct SessionTicket {
    pub session_id: Uuid,
    pub counters: Arc<TransferCounters>,
    pub cancel: CancellationToken,
}

#[derive(Clone, Default)]
pub struct TransferRegistry {
    inner: Arc<RegistryInner>,
}

#[derive(Default)]
struct RegistryInner {
    sessions: RwLock<HashMap<Uuid, TransferSession>>,
}

impl TransferRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    // ========================================================================
    // Session Lifecycle
    // ========================================================================

    /// Register a running session for a job.
    ///
    /// The running check and the insert happen under one write lock, so two
    /// concurrent starts for the same job cannot both succeed.
    pub async fn begin(
        &self,
        job_id: &EntityId,
        job_name: &str,
        direction: TransferDirection,
    ) -> Result<SessionTicket> {
        let mut sessions = self.inner.sessions.write().await;

        if let Some(running) = sessions
            .values()
            .find(|s| s.job_id == *job_id && s.state == TransferState::Running)
        {
            return Err(match running.direction {
                TransferDirection::Upload => AppError::JobUploadRunning(job_id.to_string()),
                TransferDirection::Download => AppError::JobDownloadRunning(job_id.to_string()),
            });
        }

        let ticket = SessionTicket {
            session_id: Uuid::new_v4(),
            counters: Arc::new(TransferCounters::default()),
            cancel: CancellationToken::new(),
        };
        sessions.insert(
            ticket.session_id,
            TransferSession {
                job_id: job_id.clone(),
                job_name: job_name.to_string(),
                direction,
                state: TransferState::Running,
                started_at: Utc::now(),
                ended_at: None,
                error: None,
                counters: ticket.counters.clone(),
                cancel: ticket.cancel.clone(),
            },
        );

        tracing::info!(
            session_id = %ticket.session_id,
            job_id = %job_id,
            job_name = %job_name,
            direction = ?direction,
            "Transfer session started"
        );

        Ok(ticket)
    }

    /// Move a session to its terminal state.
    pub async fn finish(&self, session_id: Uuid, state: TransferState, error: Option<String>) {
        let mut sessions = self.inner.sessions.write().await;
        if let Some(session) = sessions.get_mut(&session_id) {
            session.state = state;
            session.ended_at = Some(Utc::now());
            session.error = error;

            let totals = session.counters.snapshot();
            tracing::info!(
                session_id = %session_id,
                job_id = %session.job_id,
                state = ?state,
                count = totals.count,
                bytes = totals.bytes,
                skip_count = totals.skip_count,
                "Transfer session finished"
            );
        }
    }

    /// Request cancellation. False when the session is unknown or already
    /// finished.
    pub async fn cancel(&self, session_id: Uuid) -> bool {
        let sessions = self.inner.sessions.read().await;
        match sessions.get(&session_id) {
            Some(session) if session.state == TransferState::Running => {
                session.cancel.cancel();
                tracing::info!(session_id = %session_id, "Transfer cancellation requested");
                true
            }
            _ => false,
        }
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub async fn status(&self, session_id: Uuid) -> Option<SessionStatus> {
        let sessions = self.inner.sessions.read().await;
        sessions.get(&session_id).map(|s| SessionStatus {
            session_id,
            job_id: s.job_id.clone(),
            job_name: s.job_name.clone(),
            direction: s.direction,
            state: s.state,
            started_at: s.started_at,
            ended_at: s.ended_at,
            error: s.error.clone(),
            counters: s.counters.snapshot(),
        })
    }

    // ========================================================================
    // Cleanup
    // ========================================================================

    /// Drop finished sessions that ended more than `age` ago.
    pub async fn purge_finished_older_than(&self, age: Duration) -> usize {
        let cutoff = Utc::now() - age;
        let mut sessions = self.inner.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, s| {
            !(s.state.is_terminal() && s.ended_at.is_some_and(|ended| ended < cutoff))
        });
        let purged = before - sessions.len();

        if purged > 0 {
            tracing::info!(count = purged, "Purged finished transfer sessions");
        }

        purged
    }

    /// Start background cleanup of sessions finished longer than `retention`
    pub fn start_cleanup_task(self, retention: Duration) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(300));

            loop {
                interval.tick().await;
                self.purge_finished_older_than(retention).await;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(n: u32) -> EntityId {
        EntityId::from_number(20_000_000 + n)
    }

    #[tokio::test]
    async fn test_one_running_session_per_job() {
        let registry = TransferRegistry::new();
        let ticket = registry
            .begin(&job(1), "alpha", TransferDirection::Upload)
            .await
            .unwrap();

        let err = registry
            .begin(&job(1), "alpha", TransferDirection::Upload)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::JobUploadRunning(_)));

        let err = registry
            .begin(&job(1), "alpha", TransferDirection::Download)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::JobUploadRunning(_)));

        // other jobs are independent
        assert!(registry
            .begin(&job(2), "beta", TransferDirection::Download)
            .await
            .is_ok());
        let err = registry
            .begin(&job(2), "beta", TransferDirection::Upload)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::JobDownloadRunning(_)));

        registry
            .finish(ticket.session_id, TransferState::Completed, None)
            .await;
        assert!(registry
            .begin(&job(1), "alpha", TransferDirection::Download)
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_concurrent_starts_admit_one() {
        let registry = TransferRegistry::new();
        let mut handles = Vec::new();
        for _ in 0..16 {
            let registry = registry.clone();
            handles.push(tokio::spawn(async move {
                registry
                    .begin(&job(7), "race", TransferDirection::Upload)
                    .await
                    .is_ok()
            }));
        }

        let mut admitted = 0;
        for handle in handles {
            if handle.await.unwrap() {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 1);
    }

    #[tokio::test]
    async fn test_cancel_and_status() {
        let registry = TransferRegistry::new();
        let ticket = registry
            .begin(&job(3), "gamma", TransferDirection::Download)
            .await
            .unwrap();
        ticket.counters.record_transfer(10);

        assert!(registry.cancel(ticket.session_id).await);
        assert!(ticket.cancel.is_cancelled());
        assert!(!registry.cancel(Uuid::new_v4()).await);

        registry
            .finish(
                ticket.session_id,
                TransferState::Cancelled,
                Some("transfer cancelled".into()),
            )
            .await;
        assert!(!registry.cancel(ticket.session_id).await);

        let status = registry.status(ticket.session_id).await.unwrap();
        assert_eq!(status.state, TransferState::Cancelled);
        assert_eq!(status.direction, TransferDirection::Download);
        assert_eq!(status.counters.count, 1);
        assert_eq!(status.counters.bytes, 10);
        assert!(status.ended_at.is_some());
        assert_eq!(status.error.as_deref(), Some("transfer cancelled"));
    }

    #[tokio::test]
    async fn test_purge_keeps_running_sessions() {
        let registry = TransferRegistry::new();
        let done = registry
            .begin(&job(4), "delta", TransferDirection::Upload)
            .await
            .unwrap();
        let running = registry
            .begin(&job(5), "epsilon", TransferDirection::Upload)
            .await
            .unwrap();
        registry
            .finish(done.session_id, TransferState::Failed, Some("boom".into()))
            .await;

        assert_eq!(registry.purge_finished_older_than(Duration::hours(1)).await, 0);
        assert_eq!(registry.purge_finished_older_than(Duration::seconds(-1)).await, 1);
        assert!(registry.status(done.session_id).await.is_none());
        assert!(registry.status(running.session_id).await.is_some());
    }
}
