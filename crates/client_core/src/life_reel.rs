//! Long-running life-reel jobs: creation, status polling and the job registry.
//!
//! A job id is absent from the registry until [`LifeReelCoordinator::start`]
//! returns it. From then on its record is only changed by responses to this
//! coordinator's own polls, and a record that reached `completed` or `failed`
//! never changes again. Records live for the coordinator's lifetime unless a
//! finished job is dropped with [`LifeReelCoordinator::forget`].

use std::{collections::HashMap, sync::Arc, time::Duration};

use shared::{
    domain::{JobId, JobStatus},
    protocol::LifeReelJobResponse,
};
use tokio::{sync::Mutex, task::JoinHandle};
use tracing::{info, warn};

use crate::{
    config::ClientSettings,
    error::{JobError, ValidationError},
    transport::{decode, ApiRequest, Transport},
};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReelOptions {
    pub duration_per_image: f64,
    pub transition_duration: f64,
}

impl Default for ReelOptions {
    fn default() -> Self {
        Self {
            duration_per_image: 3.0,
            transition_duration: 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_consecutive_failures: u32,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self::from_settings(&ClientSettings::default())
    }
}

impl PollPolicy {
    pub fn from_settings(settings: &ClientSettings) -> Self {
        Self {
            interval: settings.poll_interval(),
            max_consecutive_failures: settings.poll_max_consecutive_failures.max(1),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LifeReelJob {
    pub job_id: JobId,
    pub status: JobStatus,
    pub output_path: Option<String>,
    pub error: Option<String>,
}

impl From<LifeReelJobResponse> for LifeReelJob {
    fn from(value: LifeReelJobResponse) -> Self {
        Self {
            job_id: value.job_id,
            status: value.status,
            output_path: value.output_path,
            error: value.error,
        }
    }
}

struct JobRecord {
    job: LifeReelJob,
    /// Set while a poll loop owns this job.
    active_loop: Option<u64>,
    consecutive_failures: u32,
}

#[derive(Default)]
struct ReelState {
    jobs: HashMap<JobId, JobRecord>,
    next_loop: u64,
}

enum LoopStart {
    Started(u64),
    AlreadyTerminal(LifeReelJob),
}

pub struct LifeReelCoordinator {
    transport: Arc<dyn Transport>,
    policy: PollPolicy,
    inner: Mutex<ReelState>,
}

impl LifeReelCoordinator {
    pub fn new(transport: Arc<dyn Transport>, policy: PollPolicy) -> Self {
        Self {
            transport,
            policy,
            inner: Mutex::new(ReelState::default()),
        }
    }

    pub fn policy(&self) -> PollPolicy {
        self.policy
    }

    pub async fn start(&self, options: ReelOptions) -> Result<LifeReelJob, JobError> {
        let value = self
            .transport
            .send(
                ApiRequest::post("/life-reel/create")
                    .query("duration_per_image", options.duration_per_image)
                    .query("transition_duration", options.transition_duration),
            )
            .await?;
        let response: LifeReelJobResponse = decode(value)?;
        let job = LifeReelJob::from(response);

        self.inner.lock().await.jobs.insert(
            job.job_id,
            JobRecord {
                job: job.clone(),
                active_loop: None,
                consecutive_failures: 0,
            },
        );
        info!(job_id = job.job_id.0, status = %job.status, "reel: job started");
        Ok(job)
    }

    /// Fetches the current status once.
    ///
    /// Rejected without a request for unknown jobs, terminal jobs, and jobs
    /// that a poll loop or another manual poll currently owns. While the
    /// request is outstanding the job counts as polled, so no loop can start.
    pub async fn poll(&self, job_id: JobId) -> Result<LifeReelJob, JobError> {
        let loop_id = {
            let mut guard = self.inner.lock().await;
            let loop_id = guard.next_loop;
            let record = guard
                .jobs
                .get_mut(&job_id)
                .ok_or(ValidationError::UnknownJob(job_id))?;
            if record.job.status.is_terminal() {
                return Err(ValidationError::JobTerminal(job_id).into());
            }
            if record.active_loop.is_some() {
                return Err(JobError::PollAlreadyActive(job_id));
            }
            record.active_loop = Some(loop_id);
            guard.next_loop += 1;
            loop_id
        };

        let outcome = match self.fetch_status(job_id).await {
            Ok(response) => self
                .apply_status(job_id, response, loop_id)
                .await
                .ok_or(JobError::PollAbandoned(job_id)),
            Err(err) => Err(err),
        };
        self.end_loop(job_id, loop_id).await;
        outcome
    }

    /// Polls on the configured interval until the job is terminal.
    pub async fn watch(&self, job_id: JobId) -> Result<LifeReelJob, JobError> {
        match self.begin_loop(job_id).await? {
            LoopStart::AlreadyTerminal(job) => Ok(job),
            LoopStart::Started(loop_id) => {
                let result = self.run_loop(job_id, loop_id).await;
                self.end_loop(job_id, loop_id).await;
                result
            }
        }
    }

    /// Like [`watch`](Self::watch) but on a spawned task, so the loop outlives
    /// whatever view started it. A second loop for the same job is rejected
    /// here, before anything is spawned.
    pub async fn spawn_watch(
        self: &Arc<Self>,
        job_id: JobId,
    ) -> Result<JoinHandle<Result<LifeReelJob, JobError>>, JobError> {
        let start = self.begin_loop(job_id).await?;
        let coordinator = Arc::clone(self);
        Ok(tokio::spawn(async move {
            match start {
                LoopStart::AlreadyTerminal(job) => Ok(job),
                LoopStart::Started(loop_id) => {
                    let result = coordinator.run_loop(job_id, loop_id).await;
                    coordinator.end_loop(job_id, loop_id).await;
                    result
                }
            }
        }))
    }

    /// Stops acting on the job's poll loop. Responses still in flight are
    /// discarded. Returns whether a loop was active.
    pub async fn abandon(&self, job_id: JobId) -> bool {
        let mut guard = self.inner.lock().await;
        let Some(record) = guard.jobs.get_mut(&job_id) else {
            return false;
        };
        let was_active = record.active_loop.take().is_some();
        if was_active {
            info!(job_id = job_id.0, "reel: poll loop abandoned");
        }
        was_active
    }

    /// Drops a terminal job from the registry. Jobs still pending or running
    /// are kept; returns whether a record was removed.
    pub async fn forget(&self, job_id: JobId) -> bool {
        let mut guard = self.inner.lock().await;
        let terminal = guard
            .jobs
            .get(&job_id)
            .is_some_and(|record| record.job.status.is_terminal() && record.active_loop.is_none());
        if terminal {
            guard.jobs.remove(&job_id);
            info!(job_id = job_id.0, "reel: forgot finished job");
        }
        terminal
    }

    pub async fn job(&self, job_id: JobId) -> Option<LifeReelJob> {
        self.inner
            .lock()
            .await
            .jobs
            .get(&job_id)
            .map(|record| record.job.clone())
    }

    pub async fn jobs(&self) -> Vec<LifeReelJob> {
        let guard = self.inner.lock().await;
        let mut jobs: Vec<_> = guard.jobs.values().map(|record| record.job.clone()).collect();
        jobs.sort_by_key(|job| job.job_id);
        jobs
    }

    pub async fn is_polling(&self, job_id: JobId) -> bool {
        self.inner
            .lock()
            .await
            .jobs
            .get(&job_id)
            .is_some_and(|record| record.active_loop.is_some())
    }

    pub async fn consecutive_failures(&self, job_id: JobId) -> u32 {
        self.inner
            .lock()
            .await
            .jobs
            .get(&job_id)
            .map_or(0, |record| record.consecutive_failures)
    }

    async fn begin_loop(&self, job_id: JobId) -> Result<LoopStart, JobError> {
        let mut guard = self.inner.lock().await;
        let loop_id = guard.next_loop;
        let record = guard
            .jobs
            .get_mut(&job_id)
            .ok_or(ValidationError::UnknownJob(job_id))?;
        if record.job.status.is_terminal() {
            return Ok(LoopStart::AlreadyTerminal(record.job.clone()));
        }
        if record.active_loop.is_some() {
            info!(
                job_id = job_id.0,
                "reel: poll loop already running; rejecting duplicate"
            );
            return Err(JobError::PollAlreadyActive(job_id));
        }
        record.active_loop = Some(loop_id);
        record.consecutive_failures = 0;
        guard.next_loop += 1;
        Ok(LoopStart::Started(loop_id))
    }

    async fn end_loop(&self, job_id: JobId, loop_id: u64) {
        let mut guard = self.inner.lock().await;
        if let Some(record) = guard.jobs.get_mut(&job_id) {
            if record.active_loop == Some(loop_id) {
                record.active_loop = None;
            }
        }
    }

    async fn owns_loop(&self, job_id: JobId, loop_id: u64) -> bool {
        self.inner
            .lock()
            .await
            .jobs
            .get(&job_id)
            .is_some_and(|record| record.active_loop == Some(loop_id))
    }

    async fn run_loop(&self, job_id: JobId, loop_id: u64) -> Result<LifeReelJob, JobError> {
        let max_failures = self.policy.max_consecutive_failures;
        let mut attempt: u32 = 0;
        loop {
            tokio::time::sleep(self.policy.interval).await;
            if !self.owns_loop(job_id, loop_id).await {
                return Err(JobError::PollAbandoned(job_id));
            }

            attempt += 1;
            match self.fetch_status(job_id).await {
                Ok(response) => {
                    let job = self
                        .apply_status(job_id, response, loop_id)
                        .await
                        .ok_or(JobError::PollAbandoned(job_id))?;
                    info!(
                        job_id = job_id.0,
                        attempt,
                        status = %job.status,
                        "reel: poll attempt"
                    );
                    if job.status.is_terminal() {
                        info!(job_id = job_id.0, status = %job.status, "reel: job finished");
                        return Ok(job);
                    }
                }
                Err(JobError::Transport(err)) => {
                    let failures = self.record_failure(job_id, loop_id).await;
                    warn!(
                        job_id = job_id.0,
                        attempt,
                        failures,
                        max_failures,
                        error = %err,
                        "reel: poll failed; will retry"
                    );
                    if failures >= max_failures {
                        warn!(job_id = job_id.0, failures, "reel: poll retries exhausted");
                        return Err(JobError::PollExhausted {
                            job_id,
                            attempts: failures,
                            last_error: err,
                        });
                    }
                }
                Err(err) => {
                    warn!(job_id = job_id.0, error = %err, "reel: poll failed permanently");
                    return Err(err);
                }
            }
        }
    }

    async fn fetch_status(&self, job_id: JobId) -> Result<LifeReelJobResponse, JobError> {
        let value = self
            .transport
            .send(ApiRequest::get(format!("/life-reel/status/{job_id}")))
            .await?;
        let response: LifeReelJobResponse = decode(value)?;
        if response.job_id != job_id {
            return Err(JobError::ResponseMismatch(format!(
                "polled job {job_id}, backend answered for job {}",
                response.job_id
            )));
        }
        Ok(response)
    }

    /// Applies a status response, or drops it (returns `None`) when `loop_id`
    /// no longer owns the job.
    async fn apply_status(
        &self,
        job_id: JobId,
        response: LifeReelJobResponse,
        loop_id: u64,
    ) -> Option<LifeReelJob> {
        let mut guard = self.inner.lock().await;
        let record = guard.jobs.get_mut(&job_id)?;
        if record.active_loop != Some(loop_id) {
            info!(job_id = job_id.0, "reel: discarding response for abandoned loop");
            return None;
        }
        record.consecutive_failures = 0;
        if !record.job.status.is_terminal() {
            record.job = LifeReelJob::from(response);
        }
        Some(record.job.clone())
    }

    async fn record_failure(&self, job_id: JobId, loop_id: u64) -> u32 {
        let mut guard = self.inner.lock().await;
        match guard.jobs.get_mut(&job_id) {
            Some(record) if record.active_loop == Some(loop_id) => {
                record.consecutive_failures += 1;
                record.consecutive_failures
            }
            _ => 0,
        }
    }
}

#[cfg(test)]
#[path = "tests/life_reel_tests.rs"]
mod tests;
