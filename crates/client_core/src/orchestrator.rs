//! View-state owner between the presentation layer and the coordinators.
//!
//! Each kind of operation keeps its own [`OperationState`]: the last good
//! result, whether a call is in flight, and the last error. A failure leaves
//! the previous result in place; the next success of the same kind clears the
//! error. Switching the active view never cancels anything.

use std::{future::Future, sync::Arc};

use shared::{
    domain::{Emotion, JobId},
    protocol::{AnalysisResult, StyleModelSummary, TimelineEntry},
};
use tokio::{
    sync::{broadcast, Mutex},
    task::JoinHandle,
};
use tracing::{debug, info};

use crate::{
    config::ClientSettings,
    error::{JobError, TransportError},
    gallery::GalleryLoader,
    life_reel::{LifeReelCoordinator, LifeReelJob, PollPolicy, ReelOptions},
    style::{ImageRef, StyleCoordinator, StyleModel, TrainRequest, TrainedModelHandle},
    transport::{HttpTransport, Transport},
    upload::{CollectionStats, UploadBatch, UploadCoordinator},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Workflow {
    #[default]
    Upload,
    Gallery,
    Reel,
    Style,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    Upload,
    Curate,
    Timeline,
    Highlights,
    ByEmotion,
    Stats,
    LifeReel,
    Train,
    Generate,
}

/// View state of one kind of operation.
///
/// Overlapping calls of the same kind are allowed. `in_flight` stays set until
/// every outstanding call has returned, and only the most recently issued call
/// may replace `result` or `last_error`.
#[derive(Debug, Clone, PartialEq)]
pub struct OperationState<T> {
    pub result: Option<T>,
    pub in_flight: bool,
    pub last_error: Option<JobError>,
    latest_ticket: u64,
    outstanding: u32,
}

impl<T> Default for OperationState<T> {
    fn default() -> Self {
        Self {
            result: None,
            in_flight: false,
            last_error: None,
            latest_ticket: 0,
            outstanding: 0,
        }
    }
}

impl<T> OperationState<T> {
    fn begin(&mut self) -> u64 {
        self.latest_ticket += 1;
        self.outstanding += 1;
        self.in_flight = true;
        self.latest_ticket
    }

    fn is_latest(&self, ticket: u64) -> bool {
        self.latest_ticket == ticket
    }

    /// Returns whether the outcome was applied; outcomes of superseded calls
    /// are dropped.
    fn finish(&mut self, ticket: u64, outcome: Result<T, JobError>) -> bool {
        self.outstanding = self.outstanding.saturating_sub(1);
        self.in_flight = self.outstanding > 0;
        if !self.is_latest(ticket) {
            return false;
        }
        match outcome {
            Ok(value) => {
                self.result = Some(value);
                self.last_error = None;
            }
            Err(err) => self.last_error = Some(err),
        }
        true
    }
}

#[derive(Debug, Clone, Default)]
pub struct ViewSnapshot {
    pub active: Workflow,
    pub upload: OperationState<Vec<AnalysisResult>>,
    pub curated: OperationState<Vec<TimelineEntry>>,
    pub timeline: OperationState<Vec<TimelineEntry>>,
    pub highlights: OperationState<Vec<TimelineEntry>>,
    pub by_emotion: OperationState<Vec<TimelineEntry>>,
    pub stats: OperationState<CollectionStats>,
    /// The job the reel view follows; older jobs keep polling unobserved.
    pub reel_job: Option<JobId>,
    pub reel: OperationState<LifeReelJob>,
    pub training: OperationState<StyleModel>,
    pub generation: OperationState<Vec<ImageRef>>,
}

#[derive(Debug, Clone)]
pub enum OrchestratorEvent {
    ViewChanged(Workflow),
    OperationStarted(OperationKind),
    OperationSucceeded(OperationKind),
    OperationFailed { kind: OperationKind, error: JobError },
    ReelFinished(LifeReelJob),
}

/// A started life reel plus the task that resolves once its poll loop ends.
pub struct ReelTracking {
    pub job: LifeReelJob,
    pub completion: JoinHandle<Result<LifeReelJob, JobError>>,
}

pub struct Orchestrator {
    upload: UploadCoordinator,
    gallery: GalleryLoader,
    reel: Arc<LifeReelCoordinator>,
    style: StyleCoordinator,
    view: Mutex<ViewSnapshot>,
    events: broadcast::Sender<OrchestratorEvent>,
}

impl Orchestrator {
    pub fn new(transport: Arc<dyn Transport>, policy: PollPolicy) -> Arc<Self> {
        let (events, _) = broadcast::channel(256);
        Arc::new(Self {
            upload: UploadCoordinator::new(Arc::clone(&transport)),
            gallery: GalleryLoader::new(Arc::clone(&transport)),
            reel: Arc::new(LifeReelCoordinator::new(Arc::clone(&transport), policy)),
            style: StyleCoordinator::new(transport),
            view: Mutex::new(ViewSnapshot::default()),
            events,
        })
    }

    pub fn from_settings(settings: &ClientSettings) -> Result<Arc<Self>, TransportError> {
        let transport = HttpTransport::new(&settings.api_base_url, settings.request_timeout())?;
        Ok(Self::new(
            Arc::new(transport),
            PollPolicy::from_settings(settings),
        ))
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<OrchestratorEvent> {
        self.events.subscribe()
    }

    pub fn life_reel(&self) -> &Arc<LifeReelCoordinator> {
        &self.reel
    }

    pub fn style(&self) -> &StyleCoordinator {
        &self.style
    }

    pub async fn switch_view(&self, workflow: Workflow) {
        self.view.lock().await.active = workflow;
        self.emit(OrchestratorEvent::ViewChanged(workflow));
    }

    /// Current view state. The followed reel job's status is read fresh from
    /// the life-reel coordinator.
    pub async fn snapshot(&self) -> ViewSnapshot {
        let mut snapshot = self.view.lock().await.clone();
        if let Some(job_id) = snapshot.reel_job {
            if let Some(job) = self.reel.job(job_id).await {
                snapshot.reel.result = Some(job);
            }
        }
        snapshot
    }

    pub async fn upload(&self, batch: UploadBatch) -> Result<Vec<AnalysisResult>, JobError> {
        self.track(
            OperationKind::Upload,
            |view| &mut view.upload,
            self.upload.submit_batch(batch),
        )
        .await
    }

    pub async fn curate(&self, top_n: u32) -> Result<Vec<TimelineEntry>, JobError> {
        self.track(
            OperationKind::Curate,
            |view| &mut view.curated,
            self.upload.curate(top_n),
        )
        .await
    }

    pub async fn load_stats(&self) -> Result<CollectionStats, JobError> {
        self.track(OperationKind::Stats, |view| &mut view.stats, self.upload.stats())
            .await
    }

    pub async fn load_timeline(&self) -> Result<Vec<TimelineEntry>, JobError> {
        self.track(
            OperationKind::Timeline,
            |view| &mut view.timeline,
            self.gallery.fetch_timeline(),
        )
        .await
    }

    pub async fn load_highlights(&self, limit: u32) -> Result<Vec<TimelineEntry>, JobError> {
        self.track(
            OperationKind::Highlights,
            |view| &mut view.highlights,
            self.gallery.fetch_highlights(limit),
        )
        .await
    }

    pub async fn load_by_emotion(&self, emotion: Emotion) -> Result<Vec<TimelineEntry>, JobError> {
        self.track(
            OperationKind::ByEmotion,
            |view| &mut view.by_emotion,
            self.gallery.fetch_by_emotion(emotion),
        )
        .await
    }

    /// Starts a reel and follows it on a background poll loop.
    pub async fn start_life_reel(
        self: &Arc<Self>,
        options: ReelOptions,
    ) -> Result<ReelTracking, JobError> {
        let ticket = self.view.lock().await.reel.begin();
        self.emit(OrchestratorEvent::OperationStarted(OperationKind::LifeReel));

        let job = match self.reel.start(options).await {
            Ok(job) => job,
            Err(err) => return Err(self.fail_reel_start(ticket, err).await),
        };
        {
            let mut view = self.view.lock().await;
            if view.reel.is_latest(ticket) {
                view.reel_job = Some(job.job_id);
                view.reel.result = Some(job.clone());
            }
        }
        let poll_loop = match self.reel.spawn_watch(job.job_id).await {
            Ok(handle) => handle,
            Err(err) => return Err(self.fail_reel_start(ticket, err).await),
        };

        let orchestrator = Arc::clone(self);
        let job_id = job.job_id;
        let completion = tokio::spawn(async move {
            let outcome = match poll_loop.await {
                Ok(outcome) => outcome,
                Err(join_err) => {
                    debug!(job_id = job_id.0, error = %join_err, "reel: poll task ended abnormally");
                    Err(JobError::PollAbandoned(job_id))
                }
            };
            orchestrator.finish_reel(ticket, job_id, &outcome).await;
            outcome
        });

        Ok(ReelTracking { job, completion })
    }

    /// Stops following a reel job. Its status stays as last observed.
    pub async fn abandon_life_reel(&self, job_id: JobId) -> bool {
        self.reel.abandon(job_id).await
    }

    pub async fn train_style(&self, request: TrainRequest) -> Result<StyleModel, JobError> {
        self.track(
            OperationKind::Train,
            |view| &mut view.training,
            self.style.train(request),
        )
        .await
    }

    pub async fn generate(
        &self,
        model: &TrainedModelHandle,
        prompt: &str,
        num_images: u32,
        seed: Option<i64>,
    ) -> Result<Vec<ImageRef>, JobError> {
        self.track(
            OperationKind::Generate,
            |view| &mut view.generation,
            self.style.generate(model, prompt, num_images, seed),
        )
        .await
    }

    /// Handle of the most recently trained model, if any training succeeded.
    pub async fn latest_model(&self) -> Option<TrainedModelHandle> {
        self.view
            .lock()
            .await
            .training
            .result
            .as_ref()
            .map(|model| model.handle().clone())
    }

    pub async fn list_style_models(&self) -> Result<Vec<StyleModelSummary>, JobError> {
        self.style.list_models().await
    }

    async fn track<T, Fut>(
        &self,
        kind: OperationKind,
        slot: fn(&mut ViewSnapshot) -> &mut OperationState<T>,
        operation: Fut,
    ) -> Result<T, JobError>
    where
        T: Clone,
        Fut: Future<Output = Result<T, JobError>>,
    {
        let ticket = slot(&mut *self.view.lock().await).begin();
        self.emit(OrchestratorEvent::OperationStarted(kind));

        let outcome = operation.await;

        if !slot(&mut *self.view.lock().await).finish(ticket, outcome.clone()) {
            debug!(?kind, "orchestrator: dropping outcome of a superseded call");
        }
        self.emit_outcome(kind, &outcome);
        outcome
    }

    async fn fail_reel_start(&self, ticket: u64, err: JobError) -> JobError {
        self.view.lock().await.reel.finish(ticket, Err(err.clone()));
        self.emit_outcome(OperationKind::LifeReel, &Err::<(), _>(err.clone()));
        err
    }

    async fn finish_reel(
        &self,
        ticket: u64,
        job_id: JobId,
        outcome: &Result<LifeReelJob, JobError>,
    ) {
        if !self.view.lock().await.reel.finish(ticket, outcome.clone()) {
            debug!(job_id = job_id.0, "reel: ignoring outcome of a job no longer followed");
            return;
        }
        if let Ok(job) = outcome {
            info!(job_id = job_id.0, status = %job.status, "reel: followed job finished");
            self.emit(OrchestratorEvent::ReelFinished(job.clone()));
        }
        self.emit_outcome(OperationKind::LifeReel, outcome);
    }

    fn emit_outcome<T>(&self, kind: OperationKind, outcome: &Result<T, JobError>) {
        match outcome {
            Ok(_) => self.emit(OrchestratorEvent::OperationSucceeded(kind)),
            Err(error) => self.emit(OrchestratorEvent::OperationFailed {
                kind,
                error: error.clone(),
            }),
        }
    }

    fn emit(&self, event: OrchestratorEvent) {
        let _ = self.events.send(event);
    }
}

#[cfg(test)]
#[path = "tests/orchestrator_tests.rs"]
mod tests;
