use crate::{Job, JobError, JobId, JobStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Snapshot of a job's externally visible state, pushed on every change.
///
/// A stream of these for one job is totally ordered: the executor is the
/// single writer for its job, so snapshots are published in the order the
/// underlying transitions occurred. The stream ends with the first
/// terminal-status snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobProgress {
    pub job_id: JobId,
    pub status: JobStatus,
    pub progress: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue_position: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JobError>,
    pub timestamp: DateTime<Utc>,
}

impl JobProgress {
    pub fn snapshot(job: &Job) -> Self {
        Self {
            job_id: job.id,
            status: job.status,
            progress: job.progress,
            queue_position: job.queue_position,
            error: job.error.clone(),
            timestamp: Utc::now(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Contract the executor calls after every status or progress change.
/// The backing transport (push stream, message broker) is external.
pub trait ProgressPublisher: Send + Sync {
    fn publish(&self, update: JobProgress);
}

/// In-process publisher backed by a tokio broadcast channel. Consumers
/// subscribe and filter by job id; dropped receivers only lose their own
/// lagged messages.
pub struct ProgressBus {
    sender: broadcast::Sender<JobProgress>,
}

impl ProgressBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobProgress> {
        self.sender.subscribe()
    }
}

impl ProgressPublisher for ProgressBus {
    fn publish(&self, update: JobProgress) {
        // No subscribers is fine; updates are also persisted via the queue.
        let _ = self.sender.send(update);
    }
}
