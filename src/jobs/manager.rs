use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::job::{
    Job, JobFailure, JobFailureKind, JobResultView, JobSnapshot, JobStatus, SubmitReceipt,
};
use super::store::{JobStore, StoreError};
use crate::coordinator::{CoordinationOutcome, CoordinationRequest, Coordinator, ProgressSink};
use crate::error::{CoordinationError, JobError};

/// Tuning for the job manager.
#[derive(Debug, Clone)]
pub struct JobSettings {
    pub workers: usize,
    /// Hard ceiling on one job's execution.
    pub job_timeout: Duration,
    /// Finished jobs are deleted this long after they reached a terminal state.
    pub retention: Duration,
    pub sweep_interval: Duration,
    /// Advisory duration of one backend round trip, used for estimates.
    pub estimate_per_call: Duration,
}

impl Default for JobSettings {
    fn default() -> Self {
        Self {
            workers: 4,
            job_timeout: Duration::from_secs(30 * 60),
            retention: Duration::from_secs(24 * 60 * 60),
            sweep_interval: Duration::from_secs(5 * 60),
            estimate_per_call: Duration::from_secs(20),
        }
    }
}

/// Accepts coordination requests as jobs and runs them on a worker pool.
///
/// `submit` validates and persists synchronously, then returns; a worker
/// claims the job later, runs the [`Coordinator`] under the per-job
/// ceiling and stores the terminal outcome. Clients poll `status` and
/// `result`.
pub struct JobManager {
    store: Arc<dyn JobStore>,
    coordinator: Arc<Coordinator>,
    settings: JobSettings,
    queue: mpsc::UnboundedSender<String>,
    shutdown: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl JobManager {
    /// Recovers persisted jobs, then spawns the workers and the sweeper.
    pub async fn start(
        store: Arc<dyn JobStore>,
        coordinator: Arc<Coordinator>,
        settings: JobSettings,
    ) -> Result<Arc<Self>, JobError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let manager = Arc::new(Self {
            store,
            coordinator,
            settings,
            queue: tx,
            shutdown: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
        });

        manager.recover().await?;

        let rx = Arc::new(Mutex::new(rx));
        let workers = manager.settings.workers.max(1);
        let mut handles = Vec::with_capacity(workers + 1);
        for worker in 0..workers {
            handles.push(tokio::spawn(
                Arc::clone(&manager).worker_loop(worker, Arc::clone(&rx)),
            ));
        }
        handles.push(tokio::spawn(Arc::clone(&manager).sweeper_loop()));
        manager.tasks.lock().await.extend(handles);

        info!(workers, "job manager started");
        Ok(manager)
    }

    pub fn coordinator(&self) -> &Arc<Coordinator> {
        &self.coordinator
    }

    /// Validates and enqueues a request. Invalid requests never create a job.
    pub async fn submit(&self, request: CoordinationRequest) -> Result<SubmitReceipt, JobError> {
        let units = self.coordinator.validate(&request).map_err(|e| match e {
            CoordinationError::Validation(msg) => JobError::Validation(msg),
            other => JobError::Validation(other.to_string()),
        })?;

        let steps = Coordinator::latency_steps(request.mode, &units) as u64;
        let estimate = self.settings.estimate_per_call.as_secs() * steps;
        let job = Job::new(request, estimate);
        let receipt = SubmitReceipt::from(&job);
        let id = job.id.clone();
        info!(
            job_id = %id,
            mode = %job.request.mode,
            agents = ?units.iter().map(|u| u.role.as_str()).collect::<Vec<_>>(),
            "job submitted"
        );

        self.store.insert(job).await?;
        self.enqueue(id);
        Ok(receipt)
    }

    pub async fn status(&self, id: &str) -> Result<JobSnapshot, JobError> {
        let job = self.load(id).await?;
        Ok(JobSnapshot::of(&job, Utc::now()))
    }

    /// Terminal payload of a job. `NotReady` while it is still pending or running.
    pub async fn result(&self, id: &str) -> Result<JobResultView, JobError> {
        let job = self.load(id).await?;
        if !job.status.is_terminal() {
            return Err(JobError::NotReady(job.id));
        }
        Ok(JobResultView::from(&job))
    }

    /// Deletes finished jobs past the retention window. Returns how many went.
    /// Pending and running jobs are never swept.
    pub async fn sweep(&self) -> Result<usize, JobError> {
        let retention = TimeDelta::from_std(self.settings.retention).unwrap_or(TimeDelta::MAX);
        let cutoff = Utc::now()
            .checked_sub_signed(retention)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let removed = self.store.remove_finished_before(cutoff).await?;
        if !removed.is_empty() {
            info!(count = removed.len(), "expired jobs removed");
        }
        Ok(removed.len())
    }

    /// Stops claiming new jobs and waits for in-flight ones to finish.
    /// Jobs still queued stay pending in the store.
    pub async fn shutdown(&self) {
        if self.shutdown.is_cancelled() {
            return;
        }
        info!("job manager shutting down");
        self.shutdown.cancel();
        let handles: Vec<_> = self.tasks.lock().await.drain(..).collect();
        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "job manager task ended abnormally");
            }
        }
        info!("job manager stopped");
    }

    async fn load(&self, id: &str) -> Result<Job, JobError> {
        self.store
            .get(id)
            .await?
            .ok_or_else(|| JobError::NotFound(id.to_string()))
    }

    fn enqueue(&self, id: String) {
        if let Err(e) = self.queue.send(id) {
            warn!(job_id = %e.0, "job queue closed, job stays pending");
        }
    }

    /// Requeues pending jobs from a previous process and fails the ones it
    /// left running.
    async fn recover(&self) -> Result<(), JobError> {
        let mut requeued = 0;
        let mut interrupted = 0;
        for mut job in self.store.list().await? {
            match job.status {
                JobStatus::Pending => {
                    self.enqueue(job.id);
                    requeued += 1;
                }
                JobStatus::Processing => {
                    job.fail(JobFailure::new(
                        JobFailureKind::Internal,
                        "interrupted by restart",
                    ))
                    .map_err(StoreError::from)?;
                    self.store.save(&job).await?;
                    interrupted += 1;
                }
                _ => {}
            }
        }
        if requeued + interrupted > 0 {
            info!(requeued, interrupted, "recovered jobs from store");
        }
        Ok(())
    }

    async fn worker_loop(
        self: Arc<Self>,
        worker: usize,
        queue: Arc<Mutex<mpsc::UnboundedReceiver<String>>>,
    ) {
        debug!(worker, "worker started");
        loop {
            let next = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                id = async { queue.lock().await.recv().await } => id,
            };
            let Some(id) = next else { break };
            self.execute(&id).await;
        }
        debug!(worker, "worker stopped");
    }

    async fn sweeper_loop(self: Arc<Self>) {
        let mut interval = tokio::time::interval(self.settings.sweep_interval);
        interval.tick().await;
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = interval.tick() => {
                    if let Err(e) = self.sweep().await {
                        warn!(error = %e, "retention sweep failed");
                    }
                }
            }
        }
    }

    /// Claims and runs one job. Never panics and never leaves the job
    /// non-terminal unless the store itself fails.
    async fn execute(&self, id: &str) {
        let job = match self.store.claim(id).await {
            Ok(Some(job)) => job,
            Ok(None) => {
                debug!(job_id = %id, "job already claimed or removed");
                return;
            }
            Err(e) => {
                error!(job_id = %id, error = %e, "failed to claim job");
                return;
            }
        };
        info!(job_id = %id, mode = %job.request.mode, "job claimed");

        let request = job.request.clone();
        let job = Arc::new(Mutex::new(job));
        let reporter = JobProgressReporter {
            store: Arc::clone(&self.store),
            job: Arc::clone(&job),
        };
        let coordinator = Arc::clone(&self.coordinator);
        let run = tokio::spawn(async move { coordinator.run(&request, &reporter).await });
        let abort = run.abort_handle();

        let verdict = match tokio::time::timeout(self.settings.job_timeout, run).await {
            Ok(Ok(result)) => classify(result),
            Ok(Err(join_err)) => Err(JobFailure::new(
                JobFailureKind::Internal,
                format!("coordination task crashed: {join_err}"),
            )),
            Err(_) => {
                abort.abort();
                Err(JobFailure::new(
                    JobFailureKind::Timeout,
                    format!(
                        "exceeded the {}s job ceiling",
                        self.settings.job_timeout.as_secs()
                    ),
                ))
            }
        };

        let mut job = job.lock().await;
        let transition = match verdict {
            Ok(outcome) => {
                info!(job_id = %id, partial = outcome.partial_failure.is_some(), "job completed");
                job.complete(outcome)
            }
            Err(failure) => {
                warn!(job_id = %id, kind = %failure.kind, error = %failure.message, "job failed");
                job.fail(failure)
            }
        };
        if let Err(e) = transition {
            error!(job_id = %id, error = %e, "illegal job transition");
            return;
        }
        if let Err(e) = self.store.save(&job).await {
            error!(job_id = %id, error = %e, "failed to persist job outcome");
        }
    }
}

fn classify(
    result: Result<CoordinationOutcome, CoordinationError>,
) -> Result<CoordinationOutcome, JobFailure> {
    result.map_err(|e| match e {
        CoordinationError::Validation(msg) => JobFailure::new(JobFailureKind::Validation, msg),
        CoordinationError::TotalFailure { cause } => JobFailure::new(JobFailureKind::Total, cause),
    })
}

/// Persists coordinator progress onto the job it belongs to.
struct JobProgressReporter {
    store: Arc<dyn JobStore>,
    job: Arc<Mutex<Job>>,
}

#[async_trait]
impl ProgressSink for JobProgressReporter {
    async fn report(&self, percent: u8, message: &str) {
        let mut job = self.job.lock().await;
        if job.report_progress(percent, message).is_err() {
            return;
        }
        if let Err(e) = self.store.save(&job).await {
            warn!(job_id = %job.id, error = %e, "failed to persist progress");
        }
    }
}
