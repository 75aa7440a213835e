use super::context::JobContext;
use super::handle::{SchedulerCommand, SchedulerHandle, SharedJobState};
use super::job::{BackgroundJob, JobError, JobSchedule, ShutdownBehavior};
use crate::server::metrics;
use crate::server_store::{JobRunStatus, ServerStore};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Longest the scheduler sleeps without re-checking its jobs.
const MAX_IDLE: Duration = Duration::from_secs(60);

/// How long shutdown waits for each running job.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

/// Stand-in for "never" when a delay does not fit in an `Instant`.
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

/// `now + delay`, capped instead of panicking on overflow.
fn instant_after(now: Instant, delay: Duration) -> Instant {
    now.checked_add(delay)
        .or_else(|| now.checked_add(FAR_FUTURE))
        .unwrap_or(now)
}

/// Manages background job scheduling and execution.
pub struct JobScheduler {
    /// Shared state accessible by SchedulerHandle
    shared_state: Arc<RwLock<SharedJobState>>,

    /// Task handles of started jobs, cleaned up once finished
    running_handles: HashMap<String, JoinHandle<()>>,

    job_cancel_tokens: HashMap<String, CancellationToken>,

    /// Next due time of every interval job
    next_runs: HashMap<String, Instant>,

    server_store: Arc<dyn ServerStore>,

    command_receiver: mpsc::Receiver<SchedulerCommand>,

    shutdown_token: CancellationToken,

    /// Shared context; each run gets a child cancellation token.
    job_context: JobContext,
}

impl JobScheduler {
    pub fn new(
        server_store: Arc<dyn ServerStore>,
        command_receiver: mpsc::Receiver<SchedulerCommand>,
        shutdown_token: CancellationToken,
        job_context: JobContext,
        shared_state: Arc<RwLock<SharedJobState>>,
    ) -> Self {
        Self {
            shared_state,
            running_handles: HashMap::new(),
            job_cancel_tokens: HashMap::new(),
            next_runs: HashMap::new(),
            server_store,
            command_receiver,
            shutdown_token,
            job_context,
        }
    }

    /// Register a job with the scheduler.
    ///
    /// Interval jobs become due `initial_delay` after registration.
    pub async fn register_job(&mut self, job: Arc<dyn BackgroundJob>) {
        let job_id = job.id().to_string();
        info!("Registering job: {} - {}", job_id, job.description());

        if let JobSchedule::Interval { initial_delay, .. } = job.schedule() {
            self.next_runs
                .insert(job_id.clone(), instant_after(Instant::now(), initial_delay));
        }

        let mut state = self.shared_state.write().await;
        state.jobs.insert(job_id, job);
    }

    pub async fn job_count(&self) -> usize {
        self.shared_state.read().await.jobs.len()
    }

    /// Main scheduler loop. Returns once the shutdown token fires and running
    /// jobs have been given their grace period.
    pub async fn run(&mut self) {
        let job_count = self.job_count().await;
        info!("Starting job scheduler with {} registered jobs", job_count);

        match self.server_store.mark_stale_jobs_failed() {
            Ok(count) if count > 0 => {
                info!("Marked {} stale jobs as failed from previous run", count);
            }
            Ok(_) => {}
            Err(e) => {
                error!("Failed to mark stale jobs: {}", e);
            }
        }

        loop {
            self.cleanup_completed_jobs();

            let sleep_duration = self.time_until_next_scheduled_job();
            debug!(
                "Scheduler sleeping for {:?} until next scheduled job",
                sleep_duration
            );

            tokio::select! {
                _ = tokio::time::sleep(sleep_duration) => {
                    self.run_due_jobs().await;
                }
                Some(cmd) = self.command_receiver.recv() => {
                    self.handle_command(cmd).await;
                }
                _ = self.shutdown_token.cancelled() => {
                    info!("Scheduler received shutdown signal");
                    self.shutdown().await;
                    break;
                }
            }
        }

        info!("Job scheduler stopped");
    }

    async fn handle_command(&mut self, cmd: SchedulerCommand) {
        match cmd {
            SchedulerCommand::TriggerJob { job_id, response } => {
                let result = self.trigger_job(&job_id).await;
                let _ = response.send(result);
            }
        }
    }

    async fn trigger_job(&mut self, job_id: &str) -> Result<(), JobError> {
        {
            let state = self.shared_state.read().await;
            if !state.jobs.contains_key(job_id) {
                return Err(JobError::NotFound);
            }
            if state.running_jobs.contains(job_id) {
                return Err(JobError::AlreadyRunning);
            }
        }

        self.spawn_job(job_id, "manual").await;
        Ok(())
    }

    fn time_until_next_scheduled_job(&self) -> Duration {
        let now = Instant::now();
        self.next_runs
            .values()
            .map(|at| at.saturating_duration_since(now))
            .min()
            .unwrap_or(MAX_IDLE)
            .min(MAX_IDLE)
    }

    /// Starts every interval job whose due time has passed.
    ///
    /// A job still running from its previous tick skips this one.
    async fn run_due_jobs(&mut self) {
        let now = Instant::now();
        let due: Vec<String> = self
            .next_runs
            .iter()
            .filter(|(_, at)| **at <= now)
            .map(|(job_id, _)| job_id.clone())
            .collect();

        for job_id in due {
            let (period, is_running) = {
                let state = self.shared_state.read().await;
                let period = match state.jobs.get(&job_id).map(|job| job.schedule()) {
                    Some(JobSchedule::Interval { period, .. }) => period,
                    _ => {
                        self.next_runs.remove(&job_id);
                        continue;
                    }
                };
                (period, state.running_jobs.contains(&job_id))
            };

            self.next_runs
                .insert(job_id.clone(), instant_after(now, period));

            if is_running {
                warn!(
                    "Job {} is still running, skipping this scheduled run",
                    job_id
                );
                continue;
            }
            self.spawn_job(&job_id, "schedule").await;
        }
    }

    async fn spawn_job(&mut self, job_id: &str, triggered_by: &str) {
        let job = {
            let state = self.shared_state.read().await;
            match state.jobs.get(job_id) {
                Some(job) => Arc::clone(job),
                None => {
                    error!("Attempted to spawn unknown job: {}", job_id);
                    return;
                }
            }
        };

        let run_id = match self.server_store.record_job_start(job_id, triggered_by) {
            Ok(id) => id,
            Err(e) => {
                error!("Failed to record job start for {}: {}", job_id, e);
                return;
            }
        };

        info!(
            "Starting job: {} (run_id: {}, triggered_by: {})",
            job_id, run_id, triggered_by
        );

        {
            let mut state = self.shared_state.write().await;
            state.running_jobs.insert(job_id.to_string());
        }
        metrics::set_background_job_running(job_id, true);

        let cancel_token = self.job_context.cancellation_token.child_token();
        self.job_cancel_tokens
            .insert(job_id.to_string(), cancel_token.clone());
        let ctx = JobContext::new(cancel_token);

        let server_store = Arc::clone(&self.server_store);
        let job_id_owned = job_id.to_string();
        let shared_state = Arc::clone(&self.shared_state);

        let handle = tokio::spawn(async move {
            let start_time = Instant::now();
            let time_limit = job.timeout();

            // Separate task so a panicking job is reported instead of
            // unwinding through the bookkeeping below
            let result = tokio::spawn(async move {
                match time_limit {
                    Some(limit) => tokio::time::timeout(limit, job.execute(&ctx))
                        .await
                        .unwrap_or(Err(JobError::Timeout)),
                    None => job.execute(&ctx).await,
                }
            })
            .await;
            let elapsed = start_time.elapsed();

            let (status, error_msg, status_label) = match result {
                Ok(Ok(())) => {
                    info!(
                        "Job {} completed successfully in {:?}",
                        job_id_owned, elapsed
                    );
                    (JobRunStatus::Completed, None, "success")
                }
                Ok(Err(JobError::Cancelled)) => {
                    info!("Job {} was cancelled after {:?}", job_id_owned, elapsed);
                    (
                        JobRunStatus::Failed,
                        Some("Cancelled".to_string()),
                        "cancelled",
                    )
                }
                Ok(Err(JobError::Timeout)) => {
                    error!("Job {} timed out after {:?}", job_id_owned, elapsed);
                    (
                        JobRunStatus::Failed,
                        Some(JobError::Timeout.to_string()),
                        "timeout",
                    )
                }
                Ok(Err(e)) => {
                    error!("Job {} failed after {:?}: {}", job_id_owned, elapsed, e);
                    (JobRunStatus::Failed, Some(e.to_string()), "failed")
                }
                Err(e) => {
                    error!("Job {} panicked after {:?}: {}", job_id_owned, elapsed, e);
                    (
                        JobRunStatus::Failed,
                        Some(format!("Task panic: {}", e)),
                        "panic",
                    )
                }
            };

            metrics::record_background_job_execution(&job_id_owned, status_label, elapsed);
            metrics::set_background_job_running(&job_id_owned, false);

            if let Err(e) = server_store.record_job_finish(run_id, status, error_msg) {
                error!("Failed to record job finish for {}: {}", job_id_owned, e);
            }

            let mut state = shared_state.write().await;
            state.running_jobs.remove(&job_id_owned);
        });

        self.running_handles.insert(job_id.to_string(), handle);
    }

    fn cleanup_completed_jobs(&mut self) {
        let finished: Vec<String> = self
            .running_handles
            .iter()
            .filter(|(_, handle)| handle.is_finished())
            .map(|(job_id, _)| job_id.clone())
            .collect();

        for job_id in finished {
            self.running_handles.remove(&job_id);
            self.job_cancel_tokens.remove(&job_id);
        }
    }

    /// Cancels cancellable jobs and waits for running ones to finish.
    async fn shutdown(&mut self) {
        info!("Shutting down scheduler...");

        let mut wait_jobs = Vec::new();
        {
            let state = self.shared_state.read().await;
            for (job_id, handle) in self.running_handles.drain() {
                let behavior = state
                    .jobs
                    .get(&job_id)
                    .map(|job| job.shutdown_behavior())
                    .unwrap_or_default();

                if behavior == ShutdownBehavior::Cancellable {
                    if let Some(token) = self.job_cancel_tokens.get(&job_id) {
                        debug!("Cancelling job: {}", job_id);
                        token.cancel();
                    }
                }
                wait_jobs.push((job_id, handle, behavior));
            }
        }

        for (job_id, handle, behavior) in wait_jobs {
            if behavior == ShutdownBehavior::WaitForCompletion {
                info!("Waiting for job {} to complete...", job_id);
            }
            if tokio::time::timeout(SHUTDOWN_GRACE, handle).await.is_err() {
                warn!(
                    "Job {} did not finish within {:?} of shutdown",
                    job_id, SHUTDOWN_GRACE
                );
            }
        }

        self.job_cancel_tokens.clear();
        info!("Scheduler shutdown complete");
    }
}

/// Create a scheduler and its handle.
pub fn create_scheduler(
    server_store: Arc<dyn ServerStore>,
    shutdown_token: CancellationToken,
    job_context: JobContext,
) -> (JobScheduler, SchedulerHandle) {
    let (command_tx, command_rx) = mpsc::channel(100);
    let shared_state = Arc::new(RwLock::new(SharedJobState {
        jobs: HashMap::new(),
        running_jobs: HashSet::new(),
    }));

    let scheduler = JobScheduler::new(
        Arc::clone(&server_store),
        command_rx,
        shutdown_token,
        job_context,
        Arc::clone(&shared_state),
    );

    let handle = SchedulerHandle::new(command_tx, shared_state, server_store);

    (scheduler, handle)
}
