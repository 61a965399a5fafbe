use crate::compiler::PipelineDag;
use crate::queue::JobQueue;
use crate::registry::StepRegistry;
use chrono::Utc;
use futures::stream::{FuturesUnordered, StreamExt};
use gencore::{
    EngineError, ExecutionContext, Job, JobError, JobId, JobProgress, JobStatus, JobUpdate,
    ProgressPublisher, StepContext, StepError, Value,
};
use std::collections::{HashMap, VecDeque};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

/// Runtime state of one compiled step node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    Pending,
    Ready,
    Running,
    Succeeded,
    Failed,
    /// Never started because an upstream node failed.
    Skipped,
}

/// Terminal result of one executor run.
#[derive(Debug)]
pub struct JobOutcome {
    pub status: JobStatus,
    pub progress: u8,
    /// Terminal outputs; empty unless the job completed.
    pub artifacts: HashMap<String, Value>,
    pub error: Option<JobError>,
    pub node_states: Vec<NodeState>,
}

/// Walks a compiled DAG, runs ready steps concurrently, and reports every
/// state change through the queue adapter and the progress publisher.
///
/// One executor run exclusively owns its job: it is the only writer of
/// that job's status, so updates arrive in transition order.
pub struct Executor {
    max_parallel: usize,
}

impl Default for Executor {
    /// Unbounded within a job; cross-job resource use is bounded by the
    /// worker pool size, not by node count inside one pipeline.
    fn default() -> Self {
        Self {
            max_parallel: usize::MAX,
        }
    }
}

impl Executor {
    pub fn new(max_parallel: usize) -> Self {
        Self {
            max_parallel: max_parallel.max(1),
        }
    }

    pub async fn run(
        &self,
        job: &Job,
        dag: &PipelineDag,
        registry: &StepRegistry,
        queue: &dyn JobQueue,
        publisher: &dyn ProgressPublisher,
        cancellation: CancellationToken,
    ) -> Result<JobOutcome, EngineError> {
        let total = dag.len();
        let mut ctx = ExecutionContext::new(job.id, cancellation.clone());
        ctx.seed(job.prompt.clone(), job.parameters.clone());

        let mut states = vec![NodeState::Pending; total];
        let mut remaining: Vec<usize> =
            dag.nodes.iter().map(|n| n.predecessors.len()).collect();
        let mut ready: VecDeque<usize> = VecDeque::new();
        for idx in dag.roots() {
            states[idx] = NodeState::Ready;
            ready.push_back(idx);
        }

        let mut running = FuturesUnordered::new();
        let mut succeeded = 0usize;
        let mut first_error: Option<JobError> = None;
        let mut cancelled = false;

        tracing::info!(job_id = %job.id, steps = total, "Starting pipeline execution");
        push_update(
            queue,
            publisher,
            job.id,
            JobStatus::Processing,
            0,
            None,
            None,
        )
        .await?;

        loop {
            // Cancellation is advisory at node boundaries: checked here,
            // before any dispatch, never preemptive.
            if cancellation.is_cancelled() {
                cancelled = true;
            } else {
                while running.len() < self.max_parallel {
                    let Some(idx) = ready.pop_front() else { break };
                    let node = &dag.nodes[idx];

                    let step = match registry.create(&node.spec.step_type, &node.spec.parameters)
                    {
                        Ok(step) => step,
                        Err(err) => {
                            tracing::error!(
                                job_id = %job.id,
                                step = %node.spec.id,
                                "Step construction failed: {}", err
                            );
                            states[idx] = NodeState::Failed;
                            first_error
                                .get_or_insert(JobError::node(node.spec.id.clone(), err.to_string()));
                            skip_downstream(dag, &mut states, idx);
                            continue;
                        }
                    };

                    // Compilation resolved every input, so each lookup hits.
                    let inputs: HashMap<String, Value> = node
                        .spec
                        .inputs
                        .iter()
                        .filter_map(|name| ctx.artifact(name).map(|v| (name.clone(), v.clone())))
                        .collect();
                    let step_ctx = StepContext {
                        job_id: job.id,
                        step_id: node.spec.id.clone(),
                        inputs,
                        parameters: node.spec.parameters.clone(),
                    };
                    let policy = node.policy;

                    states[idx] = NodeState::Running;
                    tracing::debug!(job_id = %job.id, step = %node.spec.id, "Dispatching step");

                    running.push(tokio::spawn(async move {
                        let mut attempt = 0u32;
                        loop {
                            attempt += 1;
                            let exec = step.execute(step_ctx.clone());
                            let result = match policy.timeout {
                                Some(limit) => match timeout(limit, exec).await {
                                    Ok(result) => result,
                                    Err(_) => Err(StepError::Timeout {
                                        ms: limit.as_millis() as u64,
                                    }),
                                },
                                None => exec.await,
                            };
                            match result {
                                Ok(output) => return (idx, Ok(output)),
                                Err(err) if attempt < policy.max_attempts => {
                                    tracing::warn!(
                                        step = %step_ctx.step_id,
                                        attempt,
                                        "Step attempt failed, retrying: {}", err
                                    );
                                }
                                Err(err) => return (idx, Err(err)),
                            }
                        }
                    }));
                }
            }

            if running.is_empty() {
                break;
            }

            let Some(joined) = running.next().await else { break };
            let (idx, result) =
                joined.map_err(|err| EngineError::TaskPanicked(err.to_string()))?;
            let node = &dag.nodes[idx];

            if cancellation.is_cancelled() {
                // The node was allowed to finish; its output is discarded.
                cancelled = true;
                states[idx] = match result {
                    Ok(_) => NodeState::Succeeded,
                    Err(_) => NodeState::Failed,
                };
                continue;
            }

            match result {
                Ok(output) => {
                    // Commit exactly the declared outputs; anything else a
                    // step returns is dropped.
                    let mut outputs = output.outputs;
                    let mut commit_failure: Option<JobError> = None;
                    for name in &node.spec.outputs {
                        match outputs.remove(name) {
                            Some(value) => {
                                // A name collision here is an invariant
                                // breach compilation should have made
                                // impossible. Fatal, never retried.
                                if let Err(err) =
                                    ctx.commit_artifact(&node.spec.id, name.clone(), value)
                                {
                                    commit_failure = Some(JobError::internal(err.to_string()));
                                    break;
                                }
                            }
                            None => {
                                commit_failure = Some(JobError::node(
                                    node.spec.id.clone(),
                                    format!("step did not produce declared output '{name}'"),
                                ));
                                break;
                            }
                        }
                    }
                    if !outputs.is_empty() {
                        tracing::debug!(
                            job_id = %job.id,
                            step = %node.spec.id,
                            dropped = ?outputs.keys().collect::<Vec<_>>(),
                            "Ignoring undeclared step outputs"
                        );
                    }
                    if let Some(error) = commit_failure {
                        tracing::error!(
                            job_id = %job.id,
                            step = %node.spec.id,
                            "Output commit failed: {}", error.message
                        );
                        states[idx] = NodeState::Failed;
                        first_error.get_or_insert(error);
                        skip_downstream(dag, &mut states, idx);
                        continue;
                    }

                    states[idx] = NodeState::Succeeded;
                    succeeded += 1;
                    for &succ in &node.successors {
                        if states[succ] == NodeState::Pending {
                            remaining[succ] -= 1;
                            if remaining[succ] == 0 {
                                states[succ] = NodeState::Ready;
                                ready.push_back(succ);
                            }
                        }
                    }

                    // The sole place progress changes.
                    let progress = ((100 * succeeded) / total) as u8;
                    ctx.advance_progress(progress);
                    tracing::info!(
                        job_id = %job.id,
                        step = %node.spec.id,
                        progress,
                        "Step completed"
                    );
                    push_update(
                        queue,
                        publisher,
                        job.id,
                        JobStatus::Processing,
                        progress,
                        None,
                        None,
                    )
                    .await?;
                }
                Err(err) => {
                    tracing::error!(job_id = %job.id, step = %node.spec.id, "Step failed: {}", err);
                    states[idx] = NodeState::Failed;
                    first_error.get_or_insert(JobError::node(node.spec.id.clone(), err.to_string()));
                    skip_downstream(dag, &mut states, idx);
                }
            }
        }

        let mut artifacts = HashMap::new();
        let (status, error) = if cancelled && succeeded < total {
            (JobStatus::Cancelled, None)
        } else if let Some(err) = first_error {
            (JobStatus::Failed, Some(err))
        } else if succeeded == total {
            for name in &dag.terminal_outputs {
                if let Some(value) = ctx.artifact(name) {
                    artifacts.insert(name.clone(), value.clone());
                }
            }
            (JobStatus::Completed, None)
        } else {
            // Unreachable for an acyclic compile output.
            (
                JobStatus::Failed,
                Some(JobError::internal("executor stalled with unfinished steps")),
            )
        };

        let progress = ctx.progress();
        tracing::info!(job_id = %job.id, ?status, progress, "Pipeline finished");
        push_update(
            queue,
            publisher,
            job.id,
            status,
            progress,
            error.clone(),
            (status == JobStatus::Completed).then(|| artifacts.clone()),
        )
        .await?;

        Ok(JobOutcome {
            status,
            progress,
            artifacts,
            error,
            node_states: states,
        })
    }
}

fn skip_downstream(dag: &PipelineDag, states: &mut [NodeState], from: usize) {
    let mut stack = vec![from];
    while let Some(idx) = stack.pop() {
        for &succ in &dag.nodes[idx].successors {
            if states[succ] == NodeState::Pending {
                states[succ] = NodeState::Skipped;
                stack.push(succ);
            }
        }
    }
}

async fn push_update(
    queue: &dyn JobQueue,
    publisher: &dyn ProgressPublisher,
    job_id: JobId,
    status: JobStatus,
    progress: u8,
    error: Option<JobError>,
    artifacts: Option<HashMap<String, Value>>,
) -> Result<(), EngineError> {
    let mut update = JobUpdate::status(status).with_progress(progress);
    if let Some(err) = &error {
        update = update.with_error(err.clone());
    }
    if let Some(artifacts) = artifacts {
        update = update.with_artifacts(artifacts);
    }
    queue.update_status(job_id, update).await?;
    publisher.publish(JobProgress {
        job_id,
        status,
        progress,
        queue_position: None,
        error,
        timestamp: Utc::now(),
    });
    Ok(())
}
