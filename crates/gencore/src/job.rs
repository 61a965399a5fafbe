use crate::{StepId, TemplateId, Value};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

pub type JobId = Uuid;

/// Submission payload from the API layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitRequest {
    pub template_id: TemplateId,
    pub prompt: String,
    #[serde(default)]
    pub parameters: HashMap<String, Value>,
}

/// Lifecycle of a generation job. Transitions are monotonic:
/// `Queued -> Processing -> {Completed | Failed | Cancelled}`, with the two
/// shortcuts `Queued -> Failed` (compile rejection) and
/// `Queued -> Cancelled` (cancelled before any worker leased the job).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobErrorKind {
    /// Template rejected before any execution.
    Compile,
    /// A step exhausted its retry budget (timeouts included).
    NodeExecution,
    /// Invariant breach inside the engine itself.
    Internal,
}

/// User-visible failure description. Carries the failing step's identity
/// and a human-readable message, never internal stack traces.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobError {
    pub kind: JobErrorKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step_id: Option<StepId>,
    pub message: String,
}

impl JobError {
    pub fn compile(message: impl Into<String>) -> Self {
        Self {
            kind: JobErrorKind::Compile,
            step_id: None,
            message: message.into(),
        }
    }

    pub fn node(step_id: impl Into<StepId>, message: impl Into<String>) -> Self {
        Self {
            kind: JobErrorKind::NodeExecution,
            step_id: Some(step_id.into()),
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            kind: JobErrorKind::Internal,
            step_id: None,
            message: message.into(),
        }
    }
}

/// A generation job record as persisted by the queue adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub template_id: TemplateId,
    pub prompt: String,
    pub parameters: HashMap<String, Value>,
    pub status: JobStatus,
    pub progress: u8,
    /// Meaningful only while the job is queued.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue_position: Option<usize>,
    /// Terminal artifacts, populated only on completion.
    #[serde(default)]
    pub artifacts: HashMap<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JobError>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn new(request: SubmitRequest) -> Self {
        Self {
            id: Uuid::new_v4(),
            template_id: request.template_id,
            prompt: request.prompt,
            parameters: request.parameters,
            status: JobStatus::Queued,
            progress: 0,
            queue_position: None,
            artifacts: HashMap::new(),
            error: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        }
    }
}

/// Partial update applied through the queue adapter's status contract.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobUpdate {
    pub status: Option<JobStatus>,
    pub progress: Option<u8>,
    pub artifacts: Option<HashMap<String, Value>>,
    pub error: Option<JobError>,
}

impl JobUpdate {
    pub fn status(status: JobStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn progress(progress: u8) -> Self {
        Self {
            progress: Some(progress),
            ..Self::default()
        }
    }

    pub fn with_progress(mut self, progress: u8) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn with_artifacts(mut self, artifacts: HashMap<String, Value>) -> Self {
        self.artifacts = Some(artifacts);
        self
    }

    pub fn with_error(mut self, error: JobError) -> Self {
        self.error = Some(error);
        self
    }

    /// Apply the update to a job record, stamping lifecycle timestamps the
    /// way the queue adapter contract requires. Progress never decreases and
    /// a terminal status is never overwritten.
    pub fn apply(self, job: &mut Job) {
        if let Some(status) = self.status {
            if !job.status.is_terminal() {
                job.status = status;
                if status == JobStatus::Processing && job.started_at.is_none() {
                    job.started_at = Some(Utc::now());
                    job.queue_position = None;
                }
                if status.is_terminal() && job.finished_at.is_none() {
                    job.finished_at = Some(Utc::now());
                    job.queue_position = None;
                }
            }
        }
        if let Some(progress) = self.progress {
            job.progress = job.progress.max(progress);
        }
        if let Some(artifacts) = self.artifacts {
            job.artifacts = artifacts;
        }
        if let Some(error) = self.error {
            job.error = Some(error);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queued_job() -> Job {
        Job::new(SubmitRequest {
            template_id: Uuid::new_v4(),
            prompt: "test".into(),
            parameters: HashMap::new(),
        })
    }

    #[test]
    fn processing_stamps_started_at() {
        let mut job = queued_job();
        JobUpdate::status(JobStatus::Processing).apply(&mut job);
        assert_eq!(job.status, JobStatus::Processing);
        assert!(job.started_at.is_some());
        assert!(job.finished_at.is_none());
    }

    #[test]
    fn terminal_status_is_sticky() {
        let mut job = queued_job();
        JobUpdate::status(JobStatus::Cancelled).apply(&mut job);
        JobUpdate::status(JobStatus::Processing).apply(&mut job);
        assert_eq!(job.status, JobStatus::Cancelled);
        assert!(job.finished_at.is_some());
    }

    #[test]
    fn progress_is_monotonic() {
        let mut job = queued_job();
        JobUpdate::progress(60).apply(&mut job);
        JobUpdate::progress(30).apply(&mut job);
        assert_eq!(job.progress, 60);
    }
}
