#![allow(dead_code)]

use async_trait::async_trait;
use futures::future::BoxFuture;
use gencore::{
    JobProgress, ProgressBus, Step, StepContext, StepError, StepOutput, SubmitRequest, Template,
    Value,
};
use genruntime::{InMemoryQueue, JobQueue, LeasedJob, StepFactory, StepPolicy, StepRegistry};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::broadcast;

pub type StepFn =
    Arc<dyn Fn(StepContext) -> BoxFuture<'static, Result<StepOutput, StepError>> + Send + Sync>;

/// Test step driven by a closure.
pub struct FnStep {
    tag: String,
    run: StepFn,
}

#[async_trait]
impl Step for FnStep {
    fn step_type(&self) -> &str {
        &self.tag
    }

    async fn execute(&self, ctx: StepContext) -> Result<StepOutput, StepError> {
        (self.run)(ctx).await
    }
}

pub struct FnStepFactory {
    tag: String,
    policy: StepPolicy,
    run: StepFn,
}

impl StepFactory for FnStepFactory {
    fn step_type(&self) -> &str {
        &self.tag
    }

    fn create(&self, _parameters: &HashMap<String, Value>) -> Result<Box<dyn Step>, StepError> {
        Ok(Box::new(FnStep {
            tag: self.tag.clone(),
            run: Arc::clone(&self.run),
        }))
    }

    fn policy(&self) -> StepPolicy {
        self.policy
    }
}

pub fn register_fn<F, Fut>(registry: &mut StepRegistry, tag: &str, policy: StepPolicy, f: F)
where
    F: Fn(StepContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<StepOutput, StepError>> + Send + 'static,
{
    let run: StepFn = Arc::new(move |ctx| Box::pin(f(ctx)));
    registry.register(Arc::new(FnStepFactory {
        tag: tag.to_string(),
        policy,
        run,
    }));
}

/// A step type that writes the single fixed output named by `output`.
pub fn register_const(registry: &mut StepRegistry, tag: &str, output: &str, value: Value) {
    let output = output.to_string();
    register_fn(registry, tag, StepPolicy::default(), move |_ctx| {
        let output = output.clone();
        let value = value.clone();
        async move { Ok(StepOutput::new().with(output, value)) }
    });
}

pub struct Harness {
    pub queue: Arc<InMemoryQueue>,
    pub bus: Arc<ProgressBus>,
}

impl Harness {
    pub fn new() -> Self {
        let bus = Arc::new(ProgressBus::new(256));
        let queue = Arc::new(InMemoryQueue::new(bus.clone()));
        Self { queue, bus }
    }

    pub async fn submit_and_lease(&self, template: &Template, prompt: &str) -> LeasedJob {
        self.queue
            .enqueue(SubmitRequest {
                template_id: template.id,
                prompt: prompt.to_string(),
                parameters: HashMap::new(),
            })
            .await
            .expect("enqueue");
        self.queue
            .lease()
            .await
            .expect("lease")
            .expect("job available")
    }
}

/// Drain the bus into the per-job snapshot history, stopping at the first
/// terminal snapshot for that job.
pub async fn collect_until_terminal(
    events: &mut broadcast::Receiver<JobProgress>,
    job_id: gencore::JobId,
) -> Vec<JobProgress> {
    let mut history = Vec::new();
    loop {
        let update = tokio::time::timeout(std::time::Duration::from_secs(5), events.recv())
            .await
            .expect("progress stream stalled")
            .expect("progress stream closed");
        if update.job_id != job_id {
            continue;
        }
        let terminal = update.is_terminal();
        history.push(update);
        if terminal {
            return history;
        }
    }
}
