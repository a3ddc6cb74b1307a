//! Job submission and polling facade.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use mediaproc_ai::{Backend, CapabilityClient, MediaSource, PageConverter, PdfRasterizer};
use mediaproc_core::{JobId, OwnerId};

use super::feed::{DEFAULT_SAMPLE_EVERY, FrameFeed, PageFeed, StoredUnits, UnitFeed, VideoDecoder};
use super::launcher::TaskLauncher;
use super::retry::RetryPolicy;
use super::runner::JobRunner;
use super::store::{MediaStore, StoreError};
use super::summary::{JobStats, JobSummary};
use super::types::{Job, JobKind, JobStatus, Unit, UnitResult};

/// Service error.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("invalid request: {0}")]
    Invalid(String),
    #[error("{0} backend is not configured")]
    Unavailable(Backend),
    #[error("job not found: {0}")]
    NotFound(JobId),
    #[error("job {0} was already launched")]
    AlreadyLaunched(JobId),
    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for ServiceError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::JobNotFound(id) => ServiceError::NotFound(id),
            other => ServiceError::Store(other),
        }
    }
}

/// A unit enumerated by the caller at submission time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewUnit {
    pub ordinal: u64,
    pub source: MediaSource,
}

/// Everything needed to create a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRequest {
    pub owner_id: OwnerId,
    pub kind: JobKind,
    /// Defaults to the kind's usual backend.
    #[serde(default)]
    pub backend: Option<Backend>,
    /// Container media for `pdf_convert`, `ocr_extract`, and `video_detect`.
    #[serde(default)]
    pub media: Option<PathBuf>,
    #[serde(default)]
    pub units: Vec<NewUnit>,
}

/// The feed and capability a job runs with.
pub struct Pipeline {
    pub feed: Box<dyn UnitFeed>,
    pub client: Arc<dyn CapabilityClient>,
}

/// Builds the pipeline for a job.
pub trait PipelineFactory: Send + Sync {
    fn build(&self, job: &Job) -> Result<Pipeline, ServiceError>;
}

/// Produces a fresh client per job, so each run owns its lazily loaded model.
pub type ClientFactory = Arc<dyn Fn() -> Arc<dyn CapabilityClient> + Send + Sync>;

/// Like [`ClientFactory`], for OCR clients that render the PDF pages they read.
pub type OcrFactory =
    Arc<dyn Fn(Arc<dyn PdfRasterizer>) -> Arc<dyn CapabilityClient> + Send + Sync>;

/// Pipelines assembled from configured backends.
pub struct PipelineRegistry {
    workflow: Option<Arc<dyn CapabilityClient>>,
    vision: Option<Arc<dyn CapabilityClient>>,
    ocr: Option<OcrFactory>,
    detection: Option<ClientFactory>,
    decoder: Option<Arc<dyn VideoDecoder>>,
    rasterizer: Option<Arc<dyn PdfRasterizer>>,
    output_root: PathBuf,
    sample_every: u64,
}

impl PipelineRegistry {
    /// Registry writing converted pages under `output_root`.
    pub fn new(output_root: impl Into<PathBuf>) -> Self {
        Self {
            workflow: None,
            vision: None,
            ocr: None,
            detection: None,
            decoder: None,
            rasterizer: None,
            output_root: output_root.into(),
            sample_every: DEFAULT_SAMPLE_EVERY,
        }
    }

    pub fn with_workflow(mut self, client: Arc<dyn CapabilityClient>) -> Self {
        self.workflow = Some(client);
        self
    }

    pub fn with_vision(mut self, client: Arc<dyn CapabilityClient>) -> Self {
        self.vision = Some(client);
        self
    }

    pub fn with_ocr(mut self, factory: OcrFactory) -> Self {
        self.ocr = Some(factory);
        self
    }

    pub fn with_detection(mut self, factory: ClientFactory) -> Self {
        self.detection = Some(factory);
        self
    }

    pub fn with_decoder(mut self, decoder: Arc<dyn VideoDecoder>) -> Self {
        self.decoder = Some(decoder);
        self
    }

    pub fn with_rasterizer(mut self, rasterizer: Arc<dyn PdfRasterizer>) -> Self {
        self.rasterizer = Some(rasterizer);
        self
    }

    pub fn with_sample_every(mut self, every: u64) -> Self {
        self.sample_every = every.max(1);
        self
    }

    fn media(job: &Job) -> Result<PathBuf, ServiceError> {
        job.media
            .clone()
            .ok_or_else(|| ServiceError::Invalid(format!("{} job {} has no media", job.kind, job.id)))
    }
}

impl PipelineFactory for PipelineRegistry {
    fn build(&self, job: &Job) -> Result<Pipeline, ServiceError> {
        let unavailable = || ServiceError::Unavailable(job.backend);
        let pipeline = match job.kind {
            JobKind::PdfConvert => {
                let rasterizer = self.rasterizer.clone().ok_or_else(unavailable)?;
                let pdf = Self::media(job)?;
                let output = self.output_root.join("pages").join(job.id.to_string());
                Pipeline {
                    feed: Box::new(PageFeed::new(rasterizer.clone(), pdf)),
                    client: Arc::new(PageConverter::new(rasterizer, output)),
                }
            }
            JobKind::OcrExtract => {
                let rasterizer = self.rasterizer.clone().ok_or_else(unavailable)?;
                let factory = self.ocr.as_ref().ok_or_else(unavailable)?;
                Pipeline {
                    feed: Box::new(PageFeed::new(rasterizer.clone(), Self::media(job)?)),
                    client: factory(rasterizer),
                }
            }
            JobKind::ImageAnalyze => {
                let client = match job.backend {
                    Backend::Workflow => self.workflow.clone(),
                    Backend::Vision => self.vision.clone(),
                    _ => None,
                };
                Pipeline {
                    feed: Box::new(StoredUnits::new()),
                    client: client.ok_or_else(unavailable)?,
                }
            }
            JobKind::VideoDetect => {
                let decoder = self.decoder.clone().ok_or_else(unavailable)?;
                let client = self.detection.as_ref().map(|f| f()).ok_or_else(unavailable)?;
                Pipeline {
                    feed: Box::new(FrameFeed::new(decoder, Self::media(job)?, self.sample_every)),
                    client,
                }
            }
        };
        Ok(pipeline)
    }
}

/// Creates jobs, launches their runs, and answers polling queries.
pub struct JobService<S, L> {
    store: Arc<S>,
    runner: JobRunner<S>,
    launcher: L,
    pipelines: Arc<dyn PipelineFactory>,
}

impl<S: MediaStore + 'static, L: TaskLauncher> JobService<S, L> {
    pub fn new(
        store: Arc<S>,
        policy: RetryPolicy,
        launcher: L,
        pipelines: Arc<dyn PipelineFactory>,
    ) -> Self {
        Self {
            runner: JobRunner::new(store.clone(), policy),
            store,
            launcher,
            pipelines,
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Validate and persist a job with its units. Nothing runs yet.
    pub async fn create_job(&self, request: JobRequest) -> Result<JobId, ServiceError> {
        let (job, units) = prepare(request)?;
        self.persist(job, units).await
    }

    /// Schedule the run of a pending job.
    pub async fn launch(&self, job_id: JobId) -> Result<(), ServiceError> {
        let job = self.store.load_job(job_id).await?;
        if job.status != JobStatus::Pending {
            return Err(ServiceError::AlreadyLaunched(job_id));
        }
        let pipeline = self.pipelines.build(&job)?;
        self.schedule(job_id, pipeline);
        Ok(())
    }

    /// Create and launch in one step; returns as soon as the job is stored.
    ///
    /// The pipeline is built before anything is persisted, so a request for
    /// an unconfigured backend leaves no job behind.
    pub async fn submit(&self, request: JobRequest) -> Result<JobId, ServiceError> {
        let (job, units) = prepare(request)?;
        let pipeline = self.pipelines.build(&job)?;
        let job_id = self.persist(job, units).await?;
        self.schedule(job_id, pipeline);
        Ok(job_id)
    }

    pub async fn get_job(&self, job_id: JobId) -> Result<Job, ServiceError> {
        Ok(self.store.load_job(job_id).await?)
    }

    /// Jobs oldest first, optionally for one owner.
    pub async fn list_jobs(&self, owner: Option<OwnerId>) -> Result<Vec<Job>, ServiceError> {
        Ok(self.store.list_jobs(owner).await?)
    }

    pub async fn list_units(&self, job_id: JobId) -> Result<Vec<Unit>, ServiceError> {
        Ok(self.store.list_units(job_id).await?)
    }

    pub async fn list_results(&self, job_id: JobId) -> Result<Vec<UnitResult>, ServiceError> {
        Ok(self.store.list_results(job_id).await?)
    }

    pub async fn summary(&self, job_id: JobId) -> Result<JobSummary, ServiceError> {
        let job = self.store.load_job(job_id).await?;
        let results = self.store.list_results(job_id).await?;
        Ok(JobSummary::build(&job, &results))
    }

    pub async fn stats(&self, owner: Option<OwnerId>) -> Result<JobStats, ServiceError> {
        let jobs = self.store.list_jobs(owner).await?;
        Ok(JobStats::collect(&jobs, owner))
    }

    /// Store the job and its units. A job whose units could not all be
    /// stored is marked failed so it never sits pending half-populated.
    async fn persist(&self, job: Job, units: Vec<Unit>) -> Result<JobId, ServiceError> {
        let job_id = self.store.insert_job(job).await?;
        for unit in units {
            let ordinal = unit.ordinal;
            if let Err(err) = self.store.insert_unit(unit).await {
                warn!(%job_id, ordinal, error = %err, "unit insert failed; failing job");
                self.abandon(job_id).await;
                return Err(err.into());
            }
        }
        Ok(job_id)
    }

    async fn abandon(&self, job_id: JobId) {
        let result = async {
            let mut job = self.store.load_job(job_id).await?;
            job.mark_failed().map_err(|e| StoreError::Conflict(e.to_string()))?;
            self.store.save_job(&job).await
        }
        .await;
        if let Err(err) = result {
            error!(%job_id, error = %err, "could not mark partially stored job failed");
        }
    }

    fn schedule(&self, job_id: JobId, pipeline: Pipeline) {
        let runner = self.runner.clone();
        let Pipeline { feed, client } = pipeline;
        self.launcher.schedule(
            job_id,
            Box::pin(async move {
                let status = runner.run(job_id, feed, client.as_ref()).await;
                info!(%job_id, %status, "job run finished");
            }),
        );
        info!(%job_id, "job launched");
    }
}

fn prepare(request: JobRequest) -> Result<(Job, Vec<Unit>), ServiceError> {
    let kind = request.kind;
    let backend = request.backend.unwrap_or(kind.default_backend());
    if !kind.accepts(backend) {
        return Err(ServiceError::Invalid(format!(
            "{kind} jobs cannot run on the {backend} backend"
        )));
    }

    let mut job = Job::new(request.owner_id, kind, backend);
    if kind.streams_units() {
        let media = request
            .media
            .ok_or_else(|| ServiceError::Invalid(format!("{kind} jobs need a media path")))?;
        if !request.units.is_empty() {
            return Err(ServiceError::Invalid(format!(
                "{kind} jobs derive their units from the media"
            )));
        }
        job = job.with_media(media);
        return Ok((job, Vec::new()));
    }

    if request.media.is_some() {
        return Err(ServiceError::Invalid(format!(
            "{kind} jobs take units, not a media path"
        )));
    }
    let mut seen = HashSet::new();
    for unit in &request.units {
        if !kind.accepts_source(&unit.source) {
            return Err(ServiceError::Invalid(format!(
                "{kind} jobs cannot read unit {} ({})",
                unit.ordinal,
                unit.source.filename()
            )));
        }
        if !seen.insert(unit.ordinal) {
            return Err(ServiceError::Invalid(format!(
                "duplicate unit ordinal {}",
                unit.ordinal
            )));
        }
    }

    job = job.with_total_units(request.units.len() as u64);
    let units = request
        .units
        .into_iter()
        .map(|u| Unit::new(job.id, u.ordinal, u.source))
        .collect();
    Ok((job, units))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::feed::testing::FakeVideo;
    use crate::jobs::launcher::TokioLauncher;
    use crate::jobs::runner::testing::ScriptedClient;
    use crate::jobs::store::InMemoryMediaStore;
    use async_trait::async_trait;
    use mediaproc_ai::{CapabilityError, LazyModel, OcrClient, OcrEngine, TextBlock};
    use mediaproc_core::UnitId;
    use std::path::Path;
    use std::time::Duration;

    type Service = JobService<InMemoryMediaStore, TokioLauncher>;

    fn service(registry: PipelineRegistry) -> Service {
        JobService::new(
            InMemoryMediaStore::arc(),
            RetryPolicy::fixed(3, Duration::from_millis(5)),
            TokioLauncher::current(),
            Arc::new(registry),
        )
    }

    fn images(n: u64) -> Vec<NewUnit> {
        (1..=n)
            .map(|ordinal| NewUnit {
                ordinal,
                source: MediaSource::file(format!("/media/selected/{ordinal}.jpg")),
            })
            .collect()
    }

    fn analyze(owner: OwnerId, units: Vec<NewUnit>) -> JobRequest {
        JobRequest {
            owner_id: owner,
            kind: JobKind::ImageAnalyze,
            backend: None,
            media: None,
            units,
        }
    }

    async fn wait_terminal(service: &Service, job_id: JobId) -> Job {
        for _ in 0..500 {
            let job = service.get_job(job_id).await.unwrap();
            if job.status.is_terminal() {
                return job;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job {job_id} never finished");
    }

    #[tokio::test]
    async fn create_persists_job_and_units_before_returning() {
        let service = service(PipelineRegistry::new("/tmp/mediaproc"));
        let job_id = service.create_job(analyze(OwnerId::new(), images(3))).await.unwrap();

        let job = service.get_job(job_id).await.unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.total_units, 3);
        assert_eq!(job.backend, Backend::Workflow);
        assert_eq!(service.list_units(job_id).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn duplicate_ordinals_are_rejected() {
        let service = service(PipelineRegistry::new("/tmp/mediaproc"));
        let mut units = images(2);
        units[1].ordinal = 1;
        assert!(matches!(
            service.create_job(analyze(OwnerId::new(), units)).await,
            Err(ServiceError::Invalid(_))
        ));
    }

    #[tokio::test]
    async fn wrong_backend_is_rejected() {
        let service = service(PipelineRegistry::new("/tmp/mediaproc"));
        let mut request = analyze(OwnerId::new(), images(1));
        request.backend = Some(Backend::Detection);
        assert!(matches!(
            service.create_job(request).await,
            Err(ServiceError::Invalid(_))
        ));
    }

    #[tokio::test]
    async fn submit_without_backend_leaves_nothing_behind() {
        let service = service(PipelineRegistry::new("/tmp/mediaproc"));
        let owner = OwnerId::new();
        let err = service.submit(analyze(owner, images(1))).await.unwrap_err();
        assert!(matches!(err, ServiceError::Unavailable(Backend::Workflow)));
        assert_eq!(service.stats(Some(owner)).await.unwrap().total, 0);
    }

    #[tokio::test]
    async fn submitted_job_runs_in_background() {
        let client = Arc::new(ScriptedClient::new(Backend::Workflow).failing(
            2,
            [CapabilityError::from_status(400, "unsupported file type")],
        ));
        let registry = PipelineRegistry::new("/tmp/mediaproc").with_workflow(client.clone());
        let service = service(registry);
        let owner = OwnerId::new();

        let job_id = service.submit(analyze(owner, images(3))).await.unwrap();
        let job = wait_terminal(&service, job_id).await;

        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.processed_units, 3);
        let summary = service.summary(job_id).await.unwrap();
        assert_eq!((summary.succeeded, summary.failed), (2, 1));
        assert_eq!(summary.progress_percent, 100.0);

        let stats = service.stats(Some(owner)).await.unwrap();
        assert_eq!((stats.total, stats.completed), (1, 1));
    }

    #[tokio::test]
    async fn launch_twice_is_refused() {
        let client = Arc::new(ScriptedClient::new(Backend::Vision));
        let registry = PipelineRegistry::new("/tmp/mediaproc").with_vision(client);
        let service = service(registry);
        let mut request = analyze(OwnerId::new(), images(1));
        request.backend = Some(Backend::Vision);

        let job_id = service.create_job(request).await.unwrap();
        service.launch(job_id).await.unwrap();
        wait_terminal(&service, job_id).await;

        assert!(matches!(
            service.launch(job_id).await,
            Err(ServiceError::AlreadyLaunched(_))
        ));
    }

    #[tokio::test]
    async fn video_jobs_need_media() {
        let service = service(PipelineRegistry::new("/tmp/mediaproc"));
        let request = JobRequest {
            owner_id: OwnerId::new(),
            kind: JobKind::VideoDetect,
            backend: None,
            media: None,
            units: Vec::new(),
        };
        assert!(matches!(
            service.create_job(request).await,
            Err(ServiceError::Invalid(_))
        ));
    }

    #[tokio::test]
    async fn video_job_uses_fresh_detection_client() {
        let built = Arc::new(std::sync::atomic::AtomicU32::new(0));
        let counter = built.clone();
        let factory: ClientFactory = Arc::new(move || {
            counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Arc::new(ScriptedClient::new(Backend::Detection)) as Arc<dyn CapabilityClient>
        });
        let registry = PipelineRegistry::new("/tmp/mediaproc")
            .with_decoder(Arc::new(FakeVideo {
                fps: 25.0,
                frames: 12,
                fail_at: None,
            }))
            .with_detection(factory);
        let service = service(registry);

        let request = JobRequest {
            owner_id: OwnerId::new(),
            kind: JobKind::VideoDetect,
            backend: None,
            media: Some("/media/videos/lobby.mp4".into()),
            units: Vec::new(),
        };
        let first = service.submit(request.clone()).await.unwrap();
        let second = service.submit(request).await.unwrap();

        for job_id in [first, second] {
            let job = wait_terminal(&service, job_id).await;
            assert_eq!(job.status, JobStatus::Completed);
            assert_eq!(job.processed_units, 12);
            let summary = service.summary(job_id).await.unwrap();
            assert_eq!(summary.detections.unwrap().frames, 3);
        }
        assert_eq!(built.load(std::sync::atomic::Ordering::SeqCst), 2);
    }

    struct Pages(u32);

    impl PdfRasterizer for Pages {
        fn page_count(&self, _pdf: &Path) -> Result<u32, CapabilityError> {
            Ok(self.0)
        }

        fn render_page(&self, _pdf: &Path, page_index: u32) -> Result<Vec<u8>, CapabilityError> {
            Ok(vec![page_index as u8 + 1])
        }
    }

    /// Reads the page number the rasterizer stamped into the image.
    struct PageText;

    impl OcrEngine for PageText {
        fn read_text(&self, image: &[u8]) -> Result<Vec<TextBlock>, CapabilityError> {
            Ok(vec![TextBlock {
                text: format!("page {}", image[0]),
                confidence: 0.9,
                bbox: [[0.0, 0.0]; 4],
            }])
        }
    }

    fn ocr_request(media: Option<&str>, units: Vec<NewUnit>) -> JobRequest {
        JobRequest {
            owner_id: OwnerId::new(),
            kind: JobKind::OcrExtract,
            backend: None,
            media: media.map(PathBuf::from),
            units,
        }
    }

    #[tokio::test]
    async fn ocr_job_reads_every_pdf_page() {
        let factory: OcrFactory = Arc::new(|pages: Arc<dyn PdfRasterizer>| {
            Arc::new(OcrClient::new(LazyModel::new("ocr", || Ok(PageText))).with_pages(pages))
                as Arc<dyn CapabilityClient>
        });
        let registry = PipelineRegistry::new("/tmp/mediaproc")
            .with_rasterizer(Arc::new(Pages(3)))
            .with_ocr(factory);
        let service = service(registry);

        let job_id = service
            .submit(ocr_request(Some("/up/contract.pdf"), Vec::new()))
            .await
            .unwrap();
        let job = wait_terminal(&service, job_id).await;
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!((job.processed_units, job.total_units), (3, 3));

        let texts: Vec<String> = service
            .list_results(job_id)
            .await
            .unwrap()
            .iter()
            .map(|r| r.payload.as_success().unwrap()["full_text"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(texts, ["page 1", "page 2", "page 3"]);
        assert_eq!(service.summary(job_id).await.unwrap().ocr.unwrap().total_pages, 3);
    }

    #[tokio::test]
    async fn units_must_suit_the_kind() {
        let service = service(PipelineRegistry::new("/tmp/mediaproc"));

        assert!(matches!(
            service.create_job(ocr_request(None, Vec::new())).await,
            Err(ServiceError::Invalid(_))
        ));
        assert!(matches!(
            service.create_job(ocr_request(Some("/up/a.pdf"), images(1))).await,
            Err(ServiceError::Invalid(_))
        ));

        let page = NewUnit {
            ordinal: 1,
            source: MediaSource::PdfPage {
                path: "/up/a.pdf".into(),
                page_index: 0,
            },
        };
        assert!(matches!(
            service.create_job(analyze(OwnerId::new(), vec![page])).await,
            Err(ServiceError::Invalid(_))
        ));
        assert_eq!(service.stats(None).await.unwrap().total, 0);
    }

    /// Store that refuses one unit ordinal.
    struct RejectsOrdinal {
        inner: InMemoryMediaStore,
        ordinal: u64,
    }

    #[async_trait]
    impl MediaStore for RejectsOrdinal {
        async fn insert_job(&self, job: Job) -> Result<JobId, StoreError> {
            self.inner.insert_job(job).await
        }

        async fn load_job(&self, job_id: JobId) -> Result<Job, StoreError> {
            self.inner.load_job(job_id).await
        }

        async fn save_job(&self, job: &Job) -> Result<(), StoreError> {
            self.inner.save_job(job).await
        }

        async fn list_jobs(&self, owner: Option<OwnerId>) -> Result<Vec<Job>, StoreError> {
            self.inner.list_jobs(owner).await
        }

        async fn insert_unit(&self, unit: Unit) -> Result<UnitId, StoreError> {
            if unit.ordinal == self.ordinal {
                return Err(StoreError::Storage("disk full".to_string()));
            }
            self.inner.insert_unit(unit).await
        }

        async fn list_units(&self, job_id: JobId) -> Result<Vec<Unit>, StoreError> {
            self.inner.list_units(job_id).await
        }

        async fn save_unit(&self, unit: &Unit) -> Result<(), StoreError> {
            self.inner.save_unit(unit).await
        }

        async fn create_result(&self, result: UnitResult) -> Result<(), StoreError> {
            self.inner.create_result(result).await
        }

        async fn list_results(&self, job_id: JobId) -> Result<Vec<UnitResult>, StoreError> {
            self.inner.list_results(job_id).await
        }
    }

    #[tokio::test]
    async fn partially_stored_job_is_failed() {
        let store = Arc::new(RejectsOrdinal {
            inner: InMemoryMediaStore::new(),
            ordinal: 2,
        });
        let service = JobService::new(
            store,
            RetryPolicy::default(),
            TokioLauncher::current(),
            Arc::new(PipelineRegistry::new("/tmp/mediaproc")),
        );

        let err = service
            .create_job(analyze(OwnerId::new(), images(3)))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Store(StoreError::Storage(_))));

        let jobs = service.list_jobs(None).await.unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].status, JobStatus::Failed);
    }
}
