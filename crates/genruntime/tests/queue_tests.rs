mod common;

use common::{collect_until_terminal, register_const, Harness};
use gencore::{
    EngineError, JobErrorKind, JobStatus, QueueError, StepSpec, SubmitRequest, Template, Value,
};
use genruntime::{Engine, EngineConfig, JobQueue, StepRegistry};
use std::collections::HashMap;
use uuid::Uuid;

fn request(template: &Template, prompt: &str) -> SubmitRequest {
    SubmitRequest {
        template_id: template.id,
        prompt: prompt.to_string(),
        parameters: HashMap::new(),
    }
}

fn single_step_template() -> (StepRegistry, Template) {
    let mut registry = StepRegistry::new();
    register_const(&mut registry, "gen", "out", Value::String("done".into()));
    let template = Template::new("t", "test")
        .with_step(StepSpec::new("a", "gen").reads("prompt").writes("out"));
    (registry, template)
}

#[tokio::test]
async fn enqueue_assigns_and_renumbers_queue_positions() {
    let harness = Harness::new();
    let (_, template) = single_step_template();

    let first = harness.queue.enqueue(request(&template, "one")).await.unwrap();
    let second = harness.queue.enqueue(request(&template, "two")).await.unwrap();
    let third = harness.queue.enqueue(request(&template, "three")).await.unwrap();
    assert_eq!(first.queue_position, Some(1));
    assert_eq!(second.queue_position, Some(2));
    assert_eq!(third.queue_position, Some(3));

    let leased = harness.queue.lease().await.unwrap().unwrap();
    assert_eq!(leased.job.id, first.id);
    assert_eq!(leased.job.queue_position, None);

    // The remaining queued jobs move up.
    let second = harness.queue.get(second.id).await.unwrap().unwrap();
    let third = harness.queue.get(third.id).await.unwrap().unwrap();
    assert_eq!(second.queue_position, Some(1));
    assert_eq!(third.queue_position, Some(2));
}

#[tokio::test]
async fn lease_skips_jobs_cancelled_while_queued() {
    let harness = Harness::new();
    let (_, template) = single_step_template();

    let first = harness.queue.enqueue(request(&template, "one")).await.unwrap();
    let second = harness.queue.enqueue(request(&template, "two")).await.unwrap();

    assert!(harness.queue.cancel(first.id).await.unwrap());
    let stored = harness.queue.get(first.id).await.unwrap().unwrap();
    assert_eq!(stored.status, JobStatus::Cancelled);

    let leased = harness.queue.lease().await.unwrap().unwrap();
    assert_eq!(leased.job.id, second.id);
    assert!(harness.queue.lease().await.unwrap().is_none());
}

#[tokio::test]
async fn cancel_is_idempotent_once_terminal() {
    let harness = Harness::new();
    let (_, template) = single_step_template();
    let job = harness.queue.enqueue(request(&template, "one")).await.unwrap();

    assert!(harness.queue.cancel(job.id).await.unwrap());
    assert!(!harness.queue.cancel(job.id).await.unwrap());
}

#[tokio::test]
async fn cancel_unknown_job_is_not_found() {
    let harness = Harness::new();
    let missing = Uuid::new_v4();
    assert!(matches!(
        harness.queue.cancel(missing).await,
        Err(QueueError::NotFound(id)) if id == missing
    ));
}

#[tokio::test]
async fn engine_runs_a_job_end_to_end() {
    let (registry, template) = single_step_template();
    let engine = Engine::start(registry, EngineConfig::default());
    let template_id = engine.register_template(template).await;

    let mut events = engine.subscribe();
    let job = engine
        .submit(SubmitRequest {
            template_id,
            prompt: "a red fox".into(),
            parameters: HashMap::new(),
        })
        .await
        .unwrap();

    let history = collect_until_terminal(&mut events, job.id).await;
    assert_eq!(history.last().unwrap().status, JobStatus::Completed);
    assert_eq!(history.last().unwrap().progress, 100);

    let job = engine.status(job.id).await.unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.artifacts["out"], Value::String("done".into()));
    engine.shutdown().await;
}

#[tokio::test]
async fn compile_error_fails_the_job_without_processing() {
    let (registry, _) = single_step_template();
    let broken = Template::new("broken", "test")
        .with_step(StepSpec::new("a", "gen").reads("no_such_input").writes("out"));

    let engine = Engine::start(registry, EngineConfig::default());
    let template_id = engine.register_template(broken).await;

    let mut events = engine.subscribe();
    let job = engine
        .submit(SubmitRequest {
            template_id,
            prompt: "x".into(),
            parameters: HashMap::new(),
        })
        .await
        .unwrap();

    let history = collect_until_terminal(&mut events, job.id).await;
    assert!(
        history.iter().all(|u| u.status != JobStatus::Processing),
        "rejected job must never report Processing"
    );
    let last = history.last().unwrap();
    assert_eq!(last.status, JobStatus::Failed);
    assert_eq!(last.progress, 0);

    let job = engine.status(job.id).await.unwrap();
    assert_eq!(job.error.as_ref().map(|e| e.kind), Some(JobErrorKind::Compile));
    assert!(job.artifacts.is_empty());
    engine.shutdown().await;
}

#[tokio::test]
async fn submit_with_unknown_template_is_rejected() {
    let (registry, _) = single_step_template();
    let engine = Engine::start(registry, EngineConfig::default());

    let missing = Uuid::new_v4();
    let err = engine
        .submit(SubmitRequest {
            template_id: missing,
            prompt: "x".into(),
            parameters: HashMap::new(),
        })
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::TemplateNotFound(id) if id == missing));
    engine.shutdown().await;
}

#[tokio::test]
async fn engine_cancels_a_queued_job() {
    let (registry, template) = single_step_template();
    // No workers: the job stays queued until we cancel it.
    let engine = Engine::start(
        registry,
        EngineConfig {
            workers: 0,
            ..EngineConfig::default()
        },
    );
    let template_id = engine.register_template(template).await;

    let mut events = engine.subscribe();
    let job = engine
        .submit(SubmitRequest {
            template_id,
            prompt: "x".into(),
            parameters: HashMap::new(),
        })
        .await
        .unwrap();

    assert!(engine.cancel(job.id).await.unwrap());
    let history = collect_until_terminal(&mut events, job.id).await;
    assert_eq!(history.last().unwrap().status, JobStatus::Cancelled);

    let job = engine.status(job.id).await.unwrap();
    assert_eq!(job.status, JobStatus::Cancelled);
    assert!(job.artifacts.is_empty());
    engine.shutdown().await;
}
