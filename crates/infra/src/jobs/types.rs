//! Job, unit, and result records.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use mediaproc_ai::{Backend, Frame, MediaSource, WorkItem};
use mediaproc_core::{DomainError, DomainResult, JobId, OwnerId, ResultId, UnitId};

use super::envelope::ErrorEnvelope;

/// What a job does.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    /// Render every page of a PDF to an image.
    PdfConvert,
    /// Extract text from every page of a PDF.
    OcrExtract,
    /// Extract structured fields from selected images.
    ImageAnalyze,
    /// Detect objects in sampled video frames.
    VideoDetect,
}

impl JobKind {
    pub fn as_str(self) -> &'static str {
        match self {
            JobKind::PdfConvert => "pdf_convert",
            JobKind::OcrExtract => "ocr_extract",
            JobKind::ImageAnalyze => "image_analyze",
            JobKind::VideoDetect => "video_detect",
        }
    }

    pub fn default_backend(self) -> Backend {
        match self {
            JobKind::PdfConvert => Backend::Rasterizer,
            JobKind::OcrExtract => Backend::Ocr,
            JobKind::ImageAnalyze => Backend::Workflow,
            JobKind::VideoDetect => Backend::Detection,
        }
    }

    pub fn accepts(self, backend: Backend) -> bool {
        match self {
            JobKind::ImageAnalyze => matches!(backend, Backend::Workflow | Backend::Vision),
            other => other.default_backend() == backend,
        }
    }

    /// Kinds whose units are produced while the job runs (one per page or frame).
    pub fn streams_units(self) -> bool {
        matches!(
            self,
            JobKind::PdfConvert | JobKind::OcrExtract | JobKind::VideoDetect
        )
    }

    /// Whether a caller-enumerated unit with this source can run under this kind.
    pub fn accepts_source(self, source: &MediaSource) -> bool {
        match self {
            JobKind::ImageAnalyze => {
                matches!(source, MediaSource::File { .. } | MediaSource::Bytes { .. })
            }
            _ => false,
        }
    }
}

impl core::fmt::Display for JobKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Job lifecycle: `pending → processing → {completed, failed}`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    /// Every unit reached a terminal result (some may be error envelopes).
    Completed,
    /// Orchestration itself could not run.
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    fn rank(self) -> u8 {
        match self {
            JobStatus::Pending => 0,
            JobStatus::Processing => 1,
            JobStatus::Completed | JobStatus::Failed => 2,
        }
    }

    /// True when moving from `self` to `next` never regresses.
    pub fn can_advance_to(self, next: JobStatus) -> bool {
        !self.is_terminal() && next.rank() > self.rank()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }
}

impl core::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One user-submitted processing request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub owner_id: OwnerId,
    pub kind: JobKind,
    pub backend: Backend,
    pub status: JobStatus,
    /// Container media (PDF, video) for kinds that stream their units.
    pub media: Option<PathBuf>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub total_units: u64,
    pub processed_units: u64,
}

impl Job {
    pub fn new(owner_id: OwnerId, kind: JobKind, backend: Backend) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            owner_id,
            kind,
            backend,
            status: JobStatus::Pending,
            media: None,
            created_at: now,
            updated_at: now,
            total_units: 0,
            processed_units: 0,
        }
    }

    pub fn with_media(mut self, media: impl Into<PathBuf>) -> Self {
        self.media = Some(media.into());
        self
    }

    pub fn with_total_units(mut self, total: u64) -> Self {
        self.total_units = total;
        self
    }

    fn advance(&mut self, next: JobStatus) -> DomainResult<()> {
        if !self.status.can_advance_to(next) {
            return Err(DomainError::transition(
                format!("job {}", self.id),
                self.status.as_str(),
                next.as_str(),
            ));
        }
        self.status = next;
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn mark_processing(&mut self) -> DomainResult<()> {
        self.advance(JobStatus::Processing)
    }

    pub fn mark_completed(&mut self) -> DomainResult<()> {
        self.advance(JobStatus::Completed)
    }

    pub fn mark_failed(&mut self) -> DomainResult<()> {
        self.advance(JobStatus::Failed)
    }

    /// Replace the unit total (e.g. once a container reports its length).
    ///
    /// Never drops below what has already been processed.
    pub fn set_total(&mut self, total: u64) {
        self.total_units = total.max(self.processed_units);
        self.updated_at = Utc::now();
    }

    /// Count one more processed unit (sampled or skipped).
    pub fn record_processed(&mut self) {
        self.processed_units += 1;
        self.total_units = self.total_units.max(self.processed_units);
        self.updated_at = Utc::now();
    }

    /// Progress in percent, 100 for an empty finished job.
    pub fn progress_percent(&self) -> f64 {
        if self.total_units == 0 {
            return if self.status.is_terminal() { 100.0 } else { 0.0 };
        }
        (self.processed_units as f64 / self.total_units as f64) * 100.0
    }
}

/// Unit-local status, tracked for long pipelines (e.g. per-page OCR).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

/// One atomic piece of work: a page, an image, or a sampled frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Unit {
    pub id: UnitId,
    pub job_id: JobId,
    /// Page number, frame number, or selection order. Unique within a job.
    pub ordinal: u64,
    pub source: MediaSource,
    pub status: UnitStatus,
    pub created_at: DateTime<Utc>,
}

impl Unit {
    pub fn new(job_id: JobId, ordinal: u64, source: MediaSource) -> Self {
        Self {
            id: UnitId::new(),
            job_id,
            ordinal,
            source,
            status: UnitStatus::Pending,
            created_at: Utc::now(),
        }
    }

    /// The capability's view of this unit.
    pub fn work_item(&self, frame: Option<Arc<Frame>>) -> WorkItem {
        WorkItem {
            ordinal: self.ordinal,
            source: self.source.clone(),
            frame,
        }
    }
}

/// Outcome carried by a result: extracted data or a structured error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "data", rename_all = "snake_case")]
pub enum ResultPayload {
    Success(JsonValue),
    Failure(ErrorEnvelope),
}

impl ResultPayload {
    pub fn is_success(&self) -> bool {
        matches!(self, ResultPayload::Success(_))
    }

    pub fn as_success(&self) -> Option<&JsonValue> {
        match self {
            ResultPayload::Success(v) => Some(v),
            ResultPayload::Failure(_) => None,
        }
    }

    pub fn as_failure(&self) -> Option<&ErrorEnvelope> {
        match self {
            ResultPayload::Failure(e) => Some(e),
            ResultPayload::Success(_) => None,
        }
    }
}

/// Terminal outcome of one unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitResult {
    pub id: ResultId,
    pub job_id: JobId,
    pub unit_id: UnitId,
    pub ordinal: u64,
    pub payload: ResultPayload,
    pub created_at: DateTime<Utc>,
}

impl UnitResult {
    pub fn new(unit: &Unit, payload: ResultPayload) -> Self {
        Self {
            id: ResultId::new(),
            job_id: unit.job_id,
            unit_id: unit.id,
            ordinal: unit.ordinal,
            payload,
            created_at: Utc::now(),
        }
    }
}
