use crate::queue::{InMemoryQueue, JobQueue};
use crate::registry::StepRegistry;
use crate::store::{InMemoryTemplateStore, TemplateStore};
use crate::worker::{WorkerPool, WorkerPoolConfig};
use gencore::{
    EngineError, Job, JobId, JobProgress, ProgressBus, QueueError, SubmitRequest, Template,
    TemplateId,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub workers: usize,
    pub poll_interval: Duration,
    pub max_parallel_steps: usize,
    pub event_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            poll_interval: Duration::from_millis(50),
            max_parallel_steps: usize::MAX,
            event_capacity: 1024,
        }
    }
}

/// In-process engine: registry, template store, in-memory queue, progress
/// bus, and a running worker pool wired together. The CLI and the test
/// suite drive the whole system through this facade.
pub struct Engine {
    registry: Arc<StepRegistry>,
    templates: Arc<InMemoryTemplateStore>,
    queue: Arc<InMemoryQueue>,
    bus: Arc<ProgressBus>,
    pool: WorkerPool,
}

impl Engine {
    pub fn start(registry: StepRegistry, config: EngineConfig) -> Self {
        let registry = Arc::new(registry);
        let templates = Arc::new(InMemoryTemplateStore::new());
        let bus = Arc::new(ProgressBus::new(config.event_capacity));
        let queue = Arc::new(InMemoryQueue::new(bus.clone()));
        let pool = WorkerPool::start(
            WorkerPoolConfig {
                workers: config.workers,
                poll_interval: config.poll_interval,
                max_parallel_steps: config.max_parallel_steps,
            },
            Arc::clone(&registry),
            templates.clone() as Arc<dyn TemplateStore>,
            queue.clone() as Arc<dyn JobQueue>,
            bus.clone() as Arc<dyn gencore::ProgressPublisher>,
        );
        Self {
            registry,
            templates,
            queue,
            bus,
            pool,
        }
    }

    pub fn registry(&self) -> &StepRegistry {
        &self.registry
    }

    pub async fn register_template(&self, template: Template) -> TemplateId {
        self.templates.insert(template).await
    }

    /// Submit a generation job. The template must exist at submission
    /// time; compile validation itself happens on the leasing worker.
    pub async fn submit(&self, request: SubmitRequest) -> Result<Job, EngineError> {
        if self.templates.get(request.template_id).await.is_none() {
            return Err(EngineError::TemplateNotFound(request.template_id));
        }
        Ok(self.queue.enqueue(request).await?)
    }

    pub async fn status(&self, job_id: JobId) -> Result<Job, EngineError> {
        self.queue
            .get(job_id)
            .await?
            .ok_or(EngineError::Queue(QueueError::NotFound(job_id)))
    }

    /// Idempotent if the job is already terminal.
    pub async fn cancel(&self, job_id: JobId) -> Result<bool, EngineError> {
        Ok(self.queue.cancel(job_id).await?)
    }

    /// Server-initiated push of every status change; consumers filter by
    /// job id and stop at the first terminal snapshot.
    pub fn subscribe(&self) -> broadcast::Receiver<JobProgress> {
        self.bus.subscribe()
    }

    pub async fn shutdown(self) {
        self.pool.shutdown().await;
    }
}
