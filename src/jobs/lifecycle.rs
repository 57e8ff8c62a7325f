use chrono::Utc;
use thiserror::Error;

use super::job::{Job, JobFailure, JobStatus};
use crate::coordinator::CoordinationOutcome;

/// An illegal move in the job lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("job {id} is already {status}")]
    Terminal { id: String, status: JobStatus },

    #[error("job {id} cannot move from {from} to {to}")]
    Invalid {
        id: String,
        from: JobStatus,
        to: JobStatus,
    },
}

/// Drives a [`Job`] through `pending → processing → completed | failed`.
///
/// Every mutation goes through these methods. A terminal job rejects all
/// of them, so its record never changes again.
impl Job {
    /// Pending → Processing.
    pub fn claim(&mut self) -> Result<(), TransitionError> {
        self.advance(JobStatus::Processing)?;
        self.started_at = Some(self.updated_at);
        self.message = "processing".to_string();
        Ok(())
    }

    /// Records progress from the running coordination. Lower values than
    /// the current one are ignored; 100 is reserved for completion.
    pub fn report_progress(&mut self, percent: u8, message: &str) -> Result<(), TransitionError> {
        if self.status != JobStatus::Processing {
            return Err(self.rejection(JobStatus::Processing));
        }
        self.progress = self.progress.max(percent.min(99));
        self.message = message.to_string();
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn complete(&mut self, outcome: CoordinationOutcome) -> Result<(), TransitionError> {
        self.advance(JobStatus::Completed)?;
        self.progress = 100;
        self.message = match &outcome.partial_failure {
            None => "completed".to_string(),
            Some(cause) => format!("completed with partial output: {cause}"),
        };
        self.result = Some(outcome);
        self.completed_at = Some(self.updated_at);
        Ok(())
    }

    /// Fails a pending or processing job.
    pub fn fail(&mut self, failure: JobFailure) -> Result<(), TransitionError> {
        self.advance(JobStatus::Failed)?;
        self.message = failure.to_string();
        self.error = Some(failure);
        self.completed_at = Some(self.updated_at);
        Ok(())
    }

    fn advance(&mut self, to: JobStatus) -> Result<(), TransitionError> {
        let allowed = matches!(
            (self.status, to),
            (JobStatus::Pending, JobStatus::Processing)
                | (JobStatus::Pending, JobStatus::Failed)
                | (JobStatus::Processing, JobStatus::Completed)
                | (JobStatus::Processing, JobStatus::Failed)
        );
        if !allowed {
            return Err(self.rejection(to));
        }
        self.status = to;
        self.status_history.push(to);
        self.updated_at = Utc::now();
        Ok(())
    }

    fn rejection(&self, to: JobStatus) -> TransitionError {
        if self.status.is_terminal() {
            TransitionError::Terminal {
                id: self.id.clone(),
                status: self.status,
            }
        } else {
            TransitionError::Invalid {
                id: self.id.clone(),
                from: self.status,
                to,
            }
        }
    }
}
