mod common;

use common::{collect_until_terminal, register_fn, Harness};
use gencore::{
    JobErrorKind, JobStatus, StepError, StepOutput, StepSpec, Template, Value,
};
use genruntime::{Executor, JobQueue, NodeState, PipelineCompiler, StepPolicy, StepRegistry};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn counting_echo(
    registry: &mut StepRegistry,
    tag: &str,
    output: &str,
    counter: Arc<AtomicUsize>,
) {
    let output = output.to_string();
    register_fn(registry, tag, StepPolicy::default(), move |_ctx| {
        let output = output.clone();
        let counter = Arc::clone(&counter);
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(StepOutput::new().with(output, Value::Bool(true)))
        }
    });
}

#[tokio::test]
async fn linear_pipeline_completes_with_monotonic_progress() {
    let mut registry = StepRegistry::new();
    let counters: Vec<Arc<AtomicUsize>> =
        (0..3).map(|_| Arc::new(AtomicUsize::new(0))).collect();
    counting_echo(&mut registry, "one", "s1", counters[0].clone());
    counting_echo(&mut registry, "two", "s2", counters[1].clone());
    counting_echo(&mut registry, "three", "s3", counters[2].clone());

    let template = Template::new("t", "test")
        .with_step(StepSpec::new("a", "one").reads("prompt").writes("s1"))
        .with_step(StepSpec::new("b", "two").reads("s1").writes("s2"))
        .with_step(StepSpec::new("c", "three").reads("s2").writes("s3"));
    let dag = PipelineCompiler::new(&registry).compile(&template).unwrap();

    let harness = Harness::new();
    let mut events = harness.bus.subscribe();
    let leased = harness.submit_and_lease(&template, "a red fox").await;
    let job_id = leased.job.id;

    let outcome = Executor::default()
        .run(
            &leased.job,
            &dag,
            &registry,
            harness.queue.as_ref(),
            harness.bus.as_ref(),
            leased.cancellation,
        )
        .await
        .unwrap();

    assert_eq!(outcome.status, JobStatus::Completed);
    assert_eq!(outcome.progress, 100);
    assert!(outcome.error.is_none());
    // Every node visited exactly once.
    for counter in &counters {
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
    assert!(outcome.node_states.iter().all(|s| *s == NodeState::Succeeded));
    // Only the terminal output survives as a final artifact.
    assert_eq!(outcome.artifacts.len(), 1);
    assert_eq!(outcome.artifacts["s3"], Value::Bool(true));

    let history = collect_until_terminal(&mut events, job_id).await;
    let mut last_progress = 0;
    for update in &history {
        assert!(update.progress >= last_progress, "progress went backwards");
        last_progress = update.progress;
    }
    assert_eq!(history.last().unwrap().status, JobStatus::Completed);
    assert_eq!(history.last().unwrap().progress, 100);

    let stored = harness.queue.get(job_id).await.unwrap().unwrap();
    assert_eq!(stored.status, JobStatus::Completed);
    assert_eq!(stored.progress, 100);
    assert!(stored.started_at.is_some() && stored.finished_at.is_some());
}

#[tokio::test]
async fn independent_branches_run_concurrently() {
    let mut registry = StepRegistry::new();
    let barrier = Arc::new(tokio::sync::Barrier::new(2));

    for (tag, output) in [("wait_a", "a1"), ("wait_b", "a2")] {
        let barrier = Arc::clone(&barrier);
        let output = output.to_string();
        register_fn(&mut registry, tag, StepPolicy::default(), move |_ctx| {
            let barrier = Arc::clone(&barrier);
            let output = output.clone();
            async move {
                // Deadlocks unless both branch heads are in flight at once.
                match tokio::time::timeout(Duration::from_secs(2), barrier.wait()).await {
                    Ok(_) => Ok(StepOutput::new().with(output, Value::Bool(true))),
                    Err(_) => Err(StepError::Backend("branches did not overlap".into())),
                }
            }
        });
    }
    counting_echo(&mut registry, "tail_a", "r1", Arc::new(AtomicUsize::new(0)));
    counting_echo(&mut registry, "tail_b", "r2", Arc::new(AtomicUsize::new(0)));

    let template = Template::new("t", "test")
        .with_step(StepSpec::new("wa", "wait_a").reads("prompt").writes("a1"))
        .with_step(StepSpec::new("wb", "wait_b").reads("prompt").writes("a2"))
        .with_step(StepSpec::new("ta", "tail_a").reads("a1").writes("r1"))
        .with_step(StepSpec::new("tb", "tail_b").reads("a2").writes("r2"));
    let dag = PipelineCompiler::new(&registry).compile(&template).unwrap();

    let harness = Harness::new();
    let leased = harness.submit_and_lease(&template, "x").await;
    let outcome = Executor::default()
        .run(
            &leased.job,
            &dag,
            &registry,
            harness.queue.as_ref(),
            harness.bus.as_ref(),
            leased.cancellation,
        )
        .await
        .unwrap();

    assert_eq!(outcome.status, JobStatus::Completed);
    assert_eq!(outcome.artifacts.len(), 2);
}

#[tokio::test]
async fn strictly_sequential_execution_is_still_correct() {
    // Concurrency is a performance property; one-at-a-time dispatch must
    // produce the same final artifacts.
    let mut registry = StepRegistry::new();
    counting_echo(&mut registry, "one", "a1", Arc::new(AtomicUsize::new(0)));
    counting_echo(&mut registry, "two", "a2", Arc::new(AtomicUsize::new(0)));
    counting_echo(&mut registry, "tail_a", "r1", Arc::new(AtomicUsize::new(0)));
    counting_echo(&mut registry, "tail_b", "r2", Arc::new(AtomicUsize::new(0)));

    let template = Template::new("t", "test")
        .with_step(StepSpec::new("wa", "one").reads("prompt").writes("a1"))
        .with_step(StepSpec::new("wb", "two").reads("prompt").writes("a2"))
        .with_step(StepSpec::new("ta", "tail_a").reads("a1").writes("r1"))
        .with_step(StepSpec::new("tb", "tail_b").reads("a2").writes("r2"));
    let dag = PipelineCompiler::new(&registry).compile(&template).unwrap();

    let harness = Harness::new();
    let leased = harness.submit_and_lease(&template, "x").await;
    let outcome = Executor::new(1)
        .run(
            &leased.job,
            &dag,
            &registry,
            harness.queue.as_ref(),
            harness.bus.as_ref(),
            leased.cancellation,
        )
        .await
        .unwrap();

    assert_eq!(outcome.status, JobStatus::Completed);
    let mut names: Vec<_> = outcome.artifacts.keys().cloned().collect();
    names.sort();
    assert_eq!(names, vec!["r1", "r2"]);
}

#[tokio::test]
async fn failure_skips_downstream_but_not_siblings() {
    let mut registry = StepRegistry::new();
    register_fn(&mut registry, "broken", StepPolicy::default(), |_ctx| async {
        Err(StepError::Backend("inference backend unavailable".into()))
    });
    let side_runs = Arc::new(AtomicUsize::new(0));
    let down_runs = Arc::new(AtomicUsize::new(0));
    counting_echo(&mut registry, "side", "s1", side_runs.clone());
    counting_echo(&mut registry, "down", "d1", down_runs.clone());

    let template = Template::new("t", "test")
        .with_step(StepSpec::new("fail", "broken").reads("prompt").writes("f1"))
        .with_step(StepSpec::new("down", "down").reads("f1").writes("d1"))
        .with_step(StepSpec::new("side", "side").reads("prompt").writes("s1"));
    let dag = PipelineCompiler::new(&registry).compile(&template).unwrap();

    let harness = Harness::new();
    let leased = harness.submit_and_lease(&template, "x").await;
    let job_id = leased.job.id;
    let outcome = Executor::default()
        .run(
            &leased.job,
            &dag,
            &registry,
            harness.queue.as_ref(),
            harness.bus.as_ref(),
            leased.cancellation,
        )
        .await
        .unwrap();

    assert_eq!(outcome.status, JobStatus::Failed);
    let error = outcome.error.unwrap();
    assert_eq!(error.kind, JobErrorKind::NodeExecution);
    assert_eq!(error.step_id.as_deref(), Some("fail"));
    assert!(error.message.contains("inference backend unavailable"));

    assert_eq!(outcome.node_states[0], NodeState::Failed);
    assert_eq!(outcome.node_states[1], NodeState::Skipped);
    assert_eq!(outcome.node_states[2], NodeState::Succeeded);
    assert_eq!(side_runs.load(Ordering::SeqCst), 1);
    assert_eq!(down_runs.load(Ordering::SeqCst), 0);
    assert!(outcome.progress < 100);

    let stored = harness.queue.get(job_id).await.unwrap().unwrap();
    assert_eq!(stored.status, JobStatus::Failed);
    assert!(stored.error.is_some());
}

fn flaky(registry: &mut StepRegistry, tag: &str, failures: usize, counter: Arc<AtomicUsize>) {
    register_fn(
        registry,
        tag,
        StepPolicy::default(),
        move |_ctx| {
            let counter = Arc::clone(&counter);
            async move {
                let attempt = counter.fetch_add(1, Ordering::SeqCst) + 1;
                if attempt <= failures {
                    Err(StepError::Backend(format!("transient failure {attempt}")))
                } else {
                    Ok(StepOutput::new().with("out", Value::Bool(true)))
                }
            }
        },
    );
}

#[tokio::test]
async fn retry_budget_recovers_from_transient_failures() {
    let mut registry = StepRegistry::new();
    let attempts = Arc::new(AtomicUsize::new(0));
    flaky(&mut registry, "flaky", 2, attempts.clone());

    let template = Template::new("t", "test").with_step(
        StepSpec::new("a", "flaky")
            .reads("prompt")
            .writes("out")
            .with_retry(3),
    );
    let dag = PipelineCompiler::new(&registry).compile(&template).unwrap();

    let harness = Harness::new();
    let leased = harness.submit_and_lease(&template, "x").await;
    let outcome = Executor::default()
        .run(
            &leased.job,
            &dag,
            &registry,
            harness.queue.as_ref(),
            harness.bus.as_ref(),
            leased.cancellation,
        )
        .await
        .unwrap();

    assert_eq!(outcome.status, JobStatus::Completed);
    assert!(outcome.error.is_none());
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn exhausted_retries_fail_the_job() {
    let mut registry = StepRegistry::new();
    let attempts = Arc::new(AtomicUsize::new(0));
    flaky(&mut registry, "flaky", usize::MAX, attempts.clone());

    let template = Template::new("t", "test").with_step(
        StepSpec::new("a", "flaky")
            .reads("prompt")
            .writes("out")
            .with_retry(2),
    );
    let dag = PipelineCompiler::new(&registry).compile(&template).unwrap();

    let harness = Harness::new();
    let leased = harness.submit_and_lease(&template, "x").await;
    let outcome = Executor::default()
        .run(
            &leased.job,
            &dag,
            &registry,
            harness.queue.as_ref(),
            harness.bus.as_ref(),
            leased.cancellation,
        )
        .await
        .unwrap();

    assert_eq!(outcome.status, JobStatus::Failed);
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn timeout_consumes_an_attempt() {
    let mut registry = StepRegistry::new();
    let attempts = Arc::new(AtomicUsize::new(0));
    {
        let attempts = attempts.clone();
        register_fn(&mut registry, "slow_once", StepPolicy::default(), move |_ctx| {
            let attempts = Arc::clone(&attempts);
            async move {
                if attempts.fetch_add(1, Ordering::SeqCst) == 0 {
                    tokio::time::sleep(Duration::from_millis(500)).await;
                }
                Ok(StepOutput::new().with("out", Value::Bool(true)))
            }
        });
    }

    let template = Template::new("t", "test").with_step(
        StepSpec::new("a", "slow_once")
            .reads("prompt")
            .writes("out")
            .with_retry(2)
            .with_timeout_ms(50),
    );
    let dag = PipelineCompiler::new(&registry).compile(&template).unwrap();

    let harness = Harness::new();
    let leased = harness.submit_and_lease(&template, "x").await;
    let outcome = Executor::default()
        .run(
            &leased.job,
            &dag,
            &registry,
            harness.queue.as_ref(),
            harness.bus.as_ref(),
            leased.cancellation,
        )
        .await
        .unwrap();

    assert_eq!(outcome.status, JobStatus::Completed);
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn timeout_without_retry_fails_the_job() {
    let mut registry = StepRegistry::new();
    register_fn(&mut registry, "hang", StepPolicy::default(), |_ctx| async {
        tokio::time::sleep(Duration::from_secs(10)).await;
        Ok(StepOutput::new().with("out", Value::Bool(true)))
    });

    let template = Template::new("t", "test").with_step(
        StepSpec::new("a", "hang")
            .reads("prompt")
            .writes("out")
            .with_timeout_ms(50),
    );
    let dag = PipelineCompiler::new(&registry).compile(&template).unwrap();

    let harness = Harness::new();
    let leased = harness.submit_and_lease(&template, "x").await;
    let outcome = Executor::default()
        .run(
            &leased.job,
            &dag,
            &registry,
            harness.queue.as_ref(),
            harness.bus.as_ref(),
            leased.cancellation,
        )
        .await
        .unwrap();

    assert_eq!(outcome.status, JobStatus::Failed);
    let error = outcome.error.unwrap();
    assert_eq!(error.kind, JobErrorKind::NodeExecution);
    assert!(error.message.contains("timed out"));
}

#[tokio::test]
async fn cancellation_stops_dispatch_and_discards_results() {
    let mut registry = StepRegistry::new();
    let token_slot: Arc<Mutex<Option<CancellationToken>>> = Arc::new(Mutex::new(None));
    {
        let token_slot = Arc::clone(&token_slot);
        register_fn(&mut registry, "canceller", StepPolicy::default(), move |_ctx| {
            let token_slot = Arc::clone(&token_slot);
            async move {
                if let Some(token) = token_slot.lock().unwrap().as_ref() {
                    token.cancel();
                }
                Ok(StepOutput::new().with("s1", Value::Bool(true)))
            }
        });
    }
    let later_runs = Arc::new(AtomicUsize::new(0));
    counting_echo(&mut registry, "later", "s2", later_runs.clone());
    counting_echo(&mut registry, "last", "s3", Arc::new(AtomicUsize::new(0)));

    let template = Template::new("t", "test")
        .with_step(StepSpec::new("a", "canceller").reads("prompt").writes("s1"))
        .with_step(StepSpec::new("b", "later").reads("s1").writes("s2"))
        .with_step(StepSpec::new("c", "last").reads("s2").writes("s3"));
    let dag = PipelineCompiler::new(&registry).compile(&template).unwrap();

    let harness = Harness::new();
    let leased = harness.submit_and_lease(&template, "x").await;
    *token_slot.lock().unwrap() = Some(leased.cancellation.clone());
    let job_id = leased.job.id;

    let outcome = Executor::default()
        .run(
            &leased.job,
            &dag,
            &registry,
            harness.queue.as_ref(),
            harness.bus.as_ref(),
            leased.cancellation,
        )
        .await
        .unwrap();

    assert_eq!(outcome.status, JobStatus::Cancelled);
    assert!(outcome.artifacts.is_empty(), "outputs must be discarded");
    assert!(outcome.error.is_none());
    assert_eq!(later_runs.load(Ordering::SeqCst), 0);
    assert!(outcome.progress < 100);

    let stored = harness.queue.get(job_id).await.unwrap().unwrap();
    assert_eq!(stored.status, JobStatus::Cancelled);
}

#[tokio::test]
async fn missing_declared_output_fails_the_node() {
    let mut registry = StepRegistry::new();
    register_fn(&mut registry, "partial", StepPolicy::default(), |_ctx| async {
        Ok(StepOutput::new().with("x", Value::Bool(true)))
    });

    let template = Template::new("t", "test").with_step(
        StepSpec::new("a", "partial")
            .reads("prompt")
            .writes("x")
            .writes("y"),
    );
    let dag = PipelineCompiler::new(&registry).compile(&template).unwrap();

    let harness = Harness::new();
    let leased = harness.submit_and_lease(&template, "x").await;
    let outcome = Executor::default()
        .run(
            &leased.job,
            &dag,
            &registry,
            harness.queue.as_ref(),
            harness.bus.as_ref(),
            leased.cancellation,
        )
        .await
        .unwrap();

    assert_eq!(outcome.status, JobStatus::Failed);
    assert!(outcome
        .error
        .unwrap()
        .message
        .contains("did not produce declared output"));
}
