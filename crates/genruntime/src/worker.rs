use crate::compiler::PipelineCompiler;
use crate::executor::Executor;
use crate::queue::{JobQueue, LeasedJob};
use crate::registry::StepRegistry;
use crate::store::TemplateStore;
use chrono::Utc;
use gencore::{JobError, JobProgress, JobStatus, JobUpdate, ProgressPublisher};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    /// Bounded number of worker units; each leases one job at a time.
    pub workers: usize,
    /// Poll interval when the queue is empty.
    pub poll_interval: Duration,
    /// Concurrency limit within one job's DAG.
    pub max_parallel_steps: usize,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            poll_interval: Duration::from_millis(50),
            max_parallel_steps: usize::MAX,
        }
    }
}

/// Long-lived workers that lease jobs from the queue and hand each one to
/// a fresh executor run. Workers share no mutable state beyond the queue
/// and template adapters.
pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
    shutdown: CancellationToken,
}

impl WorkerPool {
    pub fn start(
        config: WorkerPoolConfig,
        registry: Arc<StepRegistry>,
        templates: Arc<dyn TemplateStore>,
        queue: Arc<dyn JobQueue>,
        publisher: Arc<dyn ProgressPublisher>,
    ) -> Self {
        let shutdown = CancellationToken::new();
        let handles = (0..config.workers)
            .map(|worker_id| {
                let registry = Arc::clone(&registry);
                let templates = Arc::clone(&templates);
                let queue = Arc::clone(&queue);
                let publisher = Arc::clone(&publisher);
                let shutdown = shutdown.clone();
                let config = config.clone();
                tokio::spawn(async move {
                    tracing::info!(worker_id, "Worker started");
                    while !shutdown.is_cancelled() {
                        match queue.lease().await {
                            Ok(Some(leased)) => {
                                process_job(
                                    &config,
                                    &registry,
                                    templates.as_ref(),
                                    queue.as_ref(),
                                    publisher.as_ref(),
                                    leased,
                                )
                                .await;
                            }
                            Ok(None) => {
                                tokio::select! {
                                    _ = shutdown.cancelled() => break,
                                    _ = tokio::time::sleep(config.poll_interval) => {}
                                }
                            }
                            Err(err) => {
                                tracing::error!(worker_id, "Queue lease failed: {}", err);
                                tokio::select! {
                                    _ = shutdown.cancelled() => break,
                                    _ = tokio::time::sleep(config.poll_interval) => {}
                                }
                            }
                        }
                    }
                    tracing::info!(worker_id, "Worker stopped");
                })
            })
            .collect();
        Self { handles, shutdown }
    }

    /// Stop leasing and wait for in-flight jobs to finish.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        for handle in self.handles {
            let _ = handle.await;
        }
    }
}

async fn process_job(
    config: &WorkerPoolConfig,
    registry: &StepRegistry,
    templates: &dyn TemplateStore,
    queue: &dyn JobQueue,
    publisher: &dyn ProgressPublisher,
    leased: LeasedJob,
) {
    let LeasedJob { job, cancellation } = leased;

    let Some(template) = templates.get(job.template_id).await else {
        tracing::error!(job_id = %job.id, template_id = %job.template_id, "Template not found");
        fail_before_processing(
            queue,
            publisher,
            &job.id,
            JobError::compile(format!("template not found: {}", job.template_id)),
        )
        .await;
        return;
    };

    let dag = match PipelineCompiler::new(registry).compile(&template) {
        Ok(dag) => dag,
        Err(err) => {
            // Rejected before any execution; the job never reaches
            // `processing`.
            tracing::warn!(job_id = %job.id, "Template failed to compile: {}", err);
            fail_before_processing(queue, publisher, &job.id, JobError::compile(err.to_string()))
                .await;
            return;
        }
    };

    let executor = Executor::new(config.max_parallel_steps);
    match executor
        .run(&job, &dag, registry, queue, publisher, cancellation)
        .await
    {
        Ok(outcome) => {
            tracing::info!(job_id = %job.id, status = ?outcome.status, "Job finished");
        }
        Err(err) => {
            // Infrastructure failure (queue update, panicked task): the
            // run is abandoned; best effort to record the failure.
            tracing::error!(job_id = %job.id, "Executor aborted: {}", err);
            let update = JobUpdate::status(JobStatus::Failed)
                .with_error(JobError::internal(err.to_string()));
            if let Err(err) = queue.update_status(job.id, update).await {
                tracing::error!(job_id = %job.id, "Failed to record job failure: {}", err);
            }
        }
    }
}

async fn fail_before_processing(
    queue: &dyn JobQueue,
    publisher: &dyn ProgressPublisher,
    job_id: &gencore::JobId,
    error: JobError,
) {
    let update = JobUpdate::status(JobStatus::Failed).with_error(error.clone());
    if let Err(err) = queue.update_status(*job_id, update).await {
        tracing::error!(job_id = %job_id, "Failed to record compile rejection: {}", err);
    }
    publisher.publish(JobProgress {
        job_id: *job_id,
        status: JobStatus::Failed,
        progress: 0,
        queue_position: None,
        error: Some(error),
        timestamp: Utc::now(),
    });
}
