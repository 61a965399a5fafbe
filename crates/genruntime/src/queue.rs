use async_trait::async_trait;
use gencore::{
    Job, JobId, JobProgress, JobStatus, JobUpdate, ProgressPublisher, QueueError, SubmitRequest,
};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// A job handed to a worker together with its cooperative cancellation
/// token. The lease is process-local: a crashed worker's jobs are
/// re-queued by the adapter's own lease-timeout mechanism, not by the
/// engine.
#[derive(Clone)]
pub struct LeasedJob {
    pub job: Job,
    pub cancellation: CancellationToken,
}

/// External collaborator contract for job persistence and dispatch.
///
/// `update_status` must be idempotent per job id; the executor calls it
/// exactly once per status or progress transition and is the only writer
/// for a leased job.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Persist a new job and return it with its queue position set.
    async fn enqueue(&self, request: SubmitRequest) -> Result<Job, QueueError>;

    /// Non-blocking poll for the next leasable job.
    async fn lease(&self) -> Result<Option<LeasedJob>, QueueError>;

    async fn update_status(&self, job_id: JobId, update: JobUpdate) -> Result<(), QueueError>;

    async fn get(&self, job_id: JobId) -> Result<Option<Job>, QueueError>;

    /// Request cooperative cancellation. Returns whether the request had
    /// any effect; idempotent if the job is already terminal.
    async fn cancel(&self, job_id: JobId) -> Result<bool, QueueError>;
}

#[derive(Default)]
struct QueueInner {
    pending: VecDeque<JobId>,
    jobs: HashMap<JobId, Job>,
    tokens: HashMap<JobId, CancellationToken>,
}

impl QueueInner {
    fn renumber_pending(&mut self) {
        for (position, id) in self.pending.iter().enumerate() {
            if let Some(job) = self.jobs.get_mut(id) {
                job.queue_position = Some(position + 1);
            }
        }
    }
}

/// In-process queue used by the CLI and the test suite. Real deployments
/// substitute a broker-backed adapter behind the same trait.
pub struct InMemoryQueue {
    inner: Mutex<QueueInner>,
    publisher: Arc<dyn ProgressPublisher>,
}

impl InMemoryQueue {
    pub fn new(publisher: Arc<dyn ProgressPublisher>) -> Self {
        Self {
            inner: Mutex::new(QueueInner::default()),
            publisher,
        }
    }
}

#[async_trait]
impl JobQueue for InMemoryQueue {
    async fn enqueue(&self, request: SubmitRequest) -> Result<Job, QueueError> {
        let mut inner = self.inner.lock().await;
        let mut job = Job::new(request);
        let id = job.id;
        job.queue_position = Some(inner.pending.len() + 1);
        inner.pending.push_back(id);
        inner.jobs.insert(id, job.clone());
        inner.tokens.insert(id, CancellationToken::new());
        tracing::info!(job_id = %id, position = ?job.queue_position, "Job enqueued");
        self.publisher.publish(JobProgress::snapshot(&job));
        Ok(job)
    }

    async fn lease(&self) -> Result<Option<LeasedJob>, QueueError> {
        let mut inner = self.inner.lock().await;
        while let Some(id) = inner.pending.pop_front() {
            let Some(job) = inner.jobs.get_mut(&id) else { continue };
            // Jobs cancelled while queued are already terminal; skip them.
            if job.status != JobStatus::Queued {
                continue;
            }
            job.queue_position = None;
            let job = job.clone();
            let cancellation = inner
                .tokens
                .get(&id)
                .cloned()
                .unwrap_or_default();
            inner.renumber_pending();
            tracing::debug!(job_id = %id, "Job leased");
            return Ok(Some(LeasedJob { job, cancellation }));
        }
        Ok(None)
    }

    async fn update_status(&self, job_id: JobId, update: JobUpdate) -> Result<(), QueueError> {
        let mut inner = self.inner.lock().await;
        let job = inner
            .jobs
            .get_mut(&job_id)
            .ok_or(QueueError::NotFound(job_id))?;
        update.apply(job);
        Ok(())
    }

    async fn get(&self, job_id: JobId) -> Result<Option<Job>, QueueError> {
        let inner = self.inner.lock().await;
        Ok(inner.jobs.get(&job_id).cloned())
    }

    async fn cancel(&self, job_id: JobId) -> Result<bool, QueueError> {
        let mut inner = self.inner.lock().await;
        let job = inner
            .jobs
            .get_mut(&job_id)
            .ok_or(QueueError::NotFound(job_id))?;

        if job.status.is_terminal() {
            return Ok(false);
        }

        if job.status == JobStatus::Queued {
            // Never leased; terminal immediately, no executor involved.
            JobUpdate::status(JobStatus::Cancelled).apply(job);
            let snapshot = JobProgress::snapshot(job);
            inner.pending.retain(|id| *id != job_id);
            inner.renumber_pending();
            tracing::info!(job_id = %job_id, "Queued job cancelled");
            self.publisher.publish(snapshot);
        } else if let Some(token) = inner.tokens.get(&job_id) {
            // Processing: flag the run; the executor stamps the terminal
            // status at the next node boundary.
            tracing::info!(job_id = %job_id, "Cancellation requested for running job");
            token.cancel();
        }
        Ok(true)
    }
}
