//! Durable asynchronous job lifecycle around coordination runs.

mod job;
mod lifecycle;
mod manager;
mod store;

pub use job::{
    Job, JobFailure, JobFailureKind, JobResultView, JobSnapshot, JobStatus, SubmitReceipt,
};
pub use lifecycle::TransitionError;
pub use manager::{JobManager, JobSettings};
pub use store::{FileJobStore, JobStore, MemoryJobStore, StoreError};
