use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::coordinator::{CoordinationOutcome, CoordinationRequest};

/// Lifecycle status of a job. Only moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Pending => write!(f, "pending"),
            JobStatus::Processing => write!(f, "processing"),
            JobStatus::Completed => write!(f, "completed"),
            JobStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Why a job ended in `failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobFailureKind {
    /// The request was accepted but no longer validates at execution time.
    Validation,
    /// No usable output: parallel failure, failed synthesis, nothing produced.
    Total,
    /// The per-job ceiling was hit.
    Timeout,
    /// The run crashed or the process restarted under it.
    Internal,
}

impl fmt::Display for JobFailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobFailureKind::Validation => write!(f, "validation"),
            JobFailureKind::Total => write!(f, "total failure"),
            JobFailureKind::Timeout => write!(f, "timeout"),
            JobFailureKind::Internal => write!(f, "internal"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobFailure {
    pub kind: JobFailureKind,
    pub message: String,
}

impl JobFailure {
    pub fn new(kind: JobFailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for JobFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// One asynchronous coordination run, from submission to terminal outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub status: JobStatus,
    /// 0 to 100, never decreases.
    pub progress: u8,
    pub message: String,
    pub request: CoordinationRequest,
    /// Present iff `status` is `completed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<CoordinationOutcome>,
    /// Present iff `status` is `failed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JobFailure>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    pub estimated_total_seconds: u64,
    #[serde(default)]
    pub status_history: Vec<JobStatus>,
}

impl Job {
    pub fn new(request: CoordinationRequest, estimated_total_seconds: u64) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            status: JobStatus::Pending,
            progress: 0,
            message: "queued".to_string(),
            request,
            result: None,
            error: None,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
            estimated_total_seconds,
            status_history: vec![JobStatus::Pending],
        }
    }

    /// Whether the job reached a terminal state before `cutoff`. Pending and
    /// running jobs never qualify.
    pub fn finished_before(&self, cutoff: DateTime<Utc>) -> bool {
        self.status.is_terminal() && self.completed_at.is_some_and(|at| at < cutoff)
    }

    /// Advisory seconds left: the full estimate while queued, the estimate
    /// minus elapsed time while running, zero once finished.
    pub fn estimated_remaining_seconds(&self, now: DateTime<Utc>) -> u64 {
        match (self.status, self.started_at) {
            (JobStatus::Pending, _) => self.estimated_total_seconds,
            (JobStatus::Processing, Some(started)) => {
                let elapsed = (now - started).num_seconds().max(0) as u64;
                self.estimated_total_seconds.saturating_sub(elapsed)
            }
            (JobStatus::Processing, None) => self.estimated_total_seconds,
            (JobStatus::Completed | JobStatus::Failed, _) => 0,
        }
    }
}

/// Payload returned by `submit`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitReceipt {
    pub job_id: String,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub estimated_completion_seconds: u64,
}

impl From<&Job> for SubmitReceipt {
    fn from(job: &Job) -> Self {
        Self {
            job_id: job.id.clone(),
            status: job.status,
            created_at: job.created_at,
            estimated_completion_seconds: job.estimated_total_seconds,
        }
    }
}

/// Payload returned by `status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub job_id: String,
    pub status: JobStatus,
    pub progress: u8,
    pub message: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub estimated_remaining_seconds: u64,
}

impl JobSnapshot {
    pub fn of(job: &Job, now: DateTime<Utc>) -> Self {
        Self {
            job_id: job.id.clone(),
            status: job.status,
            progress: job.progress,
            message: job.message.clone(),
            created_at: job.created_at,
            updated_at: job.updated_at,
            estimated_remaining_seconds: job.estimated_remaining_seconds(now),
        }
    }
}

/// Payload returned by `result` once a job is terminal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobResultView {
    pub job_id: String,
    pub status: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<CoordinationOutcome>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JobFailure>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<&Job> for JobResultView {
    fn from(job: &Job) -> Self {
        Self {
            job_id: job.id.clone(),
            status: job.status,
            result: job.result.clone(),
            error: job.error.clone(),
            completed_at: job.completed_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::coordinator::CoordinationMode;

    fn job() -> Job {
        Job::new(
            CoordinationRequest::new("plan a launch", CoordinationMode::Sequential),
            60,
        )
    }

    #[test]
    fn new_job_is_pending() {
        let job = job();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.progress, 0);
        assert_eq!(job.status_history, vec![JobStatus::Pending]);
        assert!(job.result.is_none() && job.error.is_none());
        assert_eq!(Uuid::parse_str(&job.id).unwrap().get_version_num(), 4);
    }

    #[test]
    fn ids_are_unique() {
        assert_ne!(job().id, job().id);
    }

    #[test]
    fn remaining_estimate_follows_status() {
        let mut job = job();
        let now = Utc::now();
        assert_eq!(job.estimated_remaining_seconds(now), 60);

        job.status = JobStatus::Processing;
        job.started_at = Some(now - Duration::seconds(45));
        assert_eq!(job.estimated_remaining_seconds(now), 15);

        job.started_at = Some(now - Duration::seconds(600));
        assert_eq!(job.estimated_remaining_seconds(now), 0);

        job.status = JobStatus::Completed;
        job.started_at = Some(now);
        assert_eq!(job.estimated_remaining_seconds(now), 0);
    }

    #[test]
    fn status_serializes_lowercase() {
        let json = serde_json::to_string(&JobStatus::Processing).unwrap();
        assert_eq!(json, "\"processing\"");
        assert!(JobStatus::Failed.is_terminal());
        assert!(!JobStatus::Processing.is_terminal());
    }

    #[test]
    fn failure_display() {
        let failure = JobFailure::new(JobFailureKind::Timeout, "exceeded 1800s");
        assert_eq!(failure.to_string(), "timeout: exceeded 1800s");
    }

    #[test]
    fn job_serialization_roundtrip() {
        let job = job();
        let json = serde_json::to_string(&job).unwrap();
        let back: Job = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, job.id);
        assert_eq!(back.request, job.request);
        assert_eq!(back.status, JobStatus::Pending);
    }
}
