//! Unit feeds: where a running job gets its units from.
//!
//! A job either has its units enumerated up front ([`StoredUnits`]) or
//! produces them while it runs from a container: one unit per PDF page
//! ([`PageFeed`]) or one unit per sampled video frame ([`FrameFeed`]).

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use mediaproc_ai::{CapabilityError, Frame, MediaSource, PdfRasterizer};
use mediaproc_core::JobId;

use super::store::{MediaStore, StoreError};
use super::types::{Job, Unit};

/// Every 5th frame is analyzed unless configured otherwise.
pub const DEFAULT_SAMPLE_EVERY: u64 = 5;

/// Feed error.
#[derive(Debug, thiserror::Error)]
pub enum FeedError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("media source failed: {0}")]
    Source(#[from] CapabilityError),
    #[error("feed read before open")]
    NotOpened,
}

/// One step of a feed.
#[derive(Debug, Clone)]
pub enum FeedItem {
    /// A unit to run.
    Work {
        unit: Unit,
        /// Decoded pixels for frame units.
        frame: Option<Arc<Frame>>,
        /// False when the unit was produced by the feed and still has to be stored.
        persisted: bool,
    },
    /// A container element that counts toward progress but yields no result.
    Skipped { ordinal: u64 },
}

/// Source of a job's units, consumed in ordinal order.
#[async_trait]
pub trait UnitFeed: Send {
    /// Prepare the feed for `job`; returns the total unit count when known.
    async fn open(&mut self, store: &dyn MediaStore, job: &Job) -> Result<Option<u64>, FeedError>;

    /// Next item, or `None` when the feed is exhausted.
    async fn next_item(&mut self) -> Result<Option<FeedItem>, FeedError>;
}

/// Units enumerated at job creation, read back from the store.
#[derive(Debug, Default)]
pub struct StoredUnits {
    pending: Option<VecDeque<Unit>>,
}

impl StoredUnits {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UnitFeed for StoredUnits {
    async fn open(&mut self, store: &dyn MediaStore, job: &Job) -> Result<Option<u64>, FeedError> {
        let units = store.list_units(job.id).await?;
        let total = units.len() as u64;
        self.pending = Some(units.into());
        Ok(Some(total))
    }

    async fn next_item(&mut self) -> Result<Option<FeedItem>, FeedError> {
        let pending = self.pending.as_mut().ok_or(FeedError::NotOpened)?;
        Ok(pending.pop_front().map(|unit| FeedItem::Work {
            unit,
            frame: None,
            persisted: true,
        }))
    }
}

/// One unit per PDF page, ordinal = 1-based page number.
pub struct PageFeed {
    rasterizer: Arc<dyn PdfRasterizer>,
    pdf: PathBuf,
    state: Option<(JobId, u32)>,
    next_page: u32,
}

impl PageFeed {
    pub fn new(rasterizer: Arc<dyn PdfRasterizer>, pdf: impl Into<PathBuf>) -> Self {
        Self {
            rasterizer,
            pdf: pdf.into(),
            state: None,
            next_page: 0,
        }
    }
}

#[async_trait]
impl UnitFeed for PageFeed {
    async fn open(&mut self, _store: &dyn MediaStore, job: &Job) -> Result<Option<u64>, FeedError> {
        let rasterizer = self.rasterizer.clone();
        let pdf = self.pdf.clone();
        let pages = tokio::task::spawn_blocking(move || rasterizer.page_count(&pdf))
            .await
            .map_err(|e| CapabilityError::local_fault(format!("page count task failed: {e}")))??;

        info!(job_id = %job.id, pdf = %self.pdf.display(), pages, "pdf opened");
        self.state = Some((job.id, pages));
        Ok(Some(u64::from(pages)))
    }

    async fn next_item(&mut self) -> Result<Option<FeedItem>, FeedError> {
        let (job_id, pages) = self.state.ok_or(FeedError::NotOpened)?;
        if self.next_page >= pages {
            return Ok(None);
        }
        let page_index = self.next_page;
        self.next_page += 1;

        let unit = Unit::new(
            job_id,
            u64::from(page_index) + 1,
            MediaSource::PdfPage {
                path: self.pdf.clone(),
                page_index,
            },
        );
        Ok(Some(FeedItem::Work {
            unit,
            frame: None,
            persisted: false,
        }))
    }
}

/// An opened video stream.
pub trait FrameSource: Send {
    fn fps(&self) -> f64;

    /// Frame count reported by the container, if any.
    fn frame_count(&self) -> Option<u64>;

    /// Decode the next frame; `Ok(None)` at end of stream.
    fn next_frame(&mut self) -> Result<Option<Frame>, CapabilityError>;
}

/// Opens video files into frame streams.
pub trait VideoDecoder: Send + Sync {
    fn open(&self, path: &Path) -> Result<Box<dyn FrameSource>, CapabilityError>;
}

/// Samples every Nth frame of a video into a detection unit.
///
/// Frame numbers start at 0; frames that are not sampled are reported as
/// [`FeedItem::Skipped`] so they still advance progress.
pub struct FrameFeed {
    decoder: Arc<dyn VideoDecoder>,
    video: PathBuf,
    sample_every: u64,
    job_id: Option<JobId>,
    source: Option<Box<dyn FrameSource>>,
    fps: f64,
    next_number: u64,
}

impl FrameFeed {
    pub fn new(decoder: Arc<dyn VideoDecoder>, video: impl Into<PathBuf>, sample_every: u64) -> Self {
        Self {
            decoder,
            video: video.into(),
            sample_every: sample_every.max(1),
            job_id: None,
            source: None,
            fps: 0.0,
            next_number: 0,
        }
    }

    pub fn is_sampled(&self, frame_number: u64) -> bool {
        frame_number % self.sample_every == 0
    }
}

#[async_trait]
impl UnitFeed for FrameFeed {
    async fn open(&mut self, _store: &dyn MediaStore, job: &Job) -> Result<Option<u64>, FeedError> {
        let decoder = self.decoder.clone();
        let video = self.video.clone();
        let source = tokio::task::spawn_blocking(move || decoder.open(&video))
            .await
            .map_err(|e| CapabilityError::local_fault(format!("decoder task failed: {e}")))??;

        let fps = source.fps();
        if !fps.is_finite() || fps <= 0.0 {
            return Err(CapabilityError::local_fault(format!(
                "video {} reports no usable frame rate ({fps})",
                self.video.display()
            ))
            .into());
        }
        let total = source.frame_count();

        info!(
            job_id = %job.id,
            video = %self.video.display(),
            fps,
            frames = ?total,
            sample_every = self.sample_every,
            "video opened"
        );
        self.job_id = Some(job.id);
        self.fps = fps;
        self.source = Some(source);
        Ok(total)
    }

    async fn next_item(&mut self) -> Result<Option<FeedItem>, FeedError> {
        let job_id = self.job_id.ok_or(FeedError::NotOpened)?;
        let Some(mut source) = self.source.take() else {
            return Ok(None);
        };

        let (source, decoded) = tokio::task::spawn_blocking(move || {
            let frame = source.next_frame();
            (source, frame)
        })
        .await
        .map_err(|e| CapabilityError::local_fault(format!("decoder task failed: {e}")))?;

        let Some(frame) = decoded? else {
            debug!(%job_id, frames = self.next_number, "video exhausted");
            return Ok(None);
        };
        self.source = Some(source);

        let number = self.next_number;
        self.next_number += 1;
        if !self.is_sampled(number) {
            return Ok(Some(FeedItem::Skipped { ordinal: number }));
        }

        let unit = Unit::new(
            job_id,
            number,
            MediaSource::Frame {
                number,
                timestamp: number as f64 / self.fps,
            },
        );
        Ok(Some(FeedItem::Work {
            unit,
            frame: Some(Arc::new(frame)),
            persisted: false,
        }))
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// Synthetic video: `frames` blank frames at `fps`, optionally failing at one frame.
    pub struct FakeVideo {
        pub fps: f64,
        pub frames: u64,
        pub fail_at: Option<u64>,
    }

    struct FakeSource {
        fps: f64,
        frames: u64,
        fail_at: Option<u64>,
        next: u64,
    }

    impl FrameSource for FakeSource {
        fn fps(&self) -> f64 {
            self.fps
        }

        fn frame_count(&self) -> Option<u64> {
            Some(self.frames)
        }

        fn next_frame(&mut self) -> Result<Option<Frame>, CapabilityError> {
            if self.fail_at == Some(self.next) {
                return Err(CapabilityError::local_fault("corrupt packet"));
            }
            if self.next >= self.frames {
                return Ok(None);
            }
            self.next += 1;
            Ok(Some(Frame {
                width: 1,
                height: 1,
                data: vec![0, 0, 0],
            }))
        }
    }

    impl VideoDecoder for FakeVideo {
        fn open(&self, _path: &Path) -> Result<Box<dyn FrameSource>, CapabilityError> {
            Ok(Box::new(FakeSource {
                fps: self.fps,
                frames: self.frames,
                fail_at: self.fail_at,
                next: 0,
            }))
        }
    }
}
