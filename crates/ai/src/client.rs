use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::detect::Frame;
use crate::error::CapabilityError;

/// Which external capability serves a unit.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    /// Remote workflow API (upload, then run).
    Workflow,
    /// Remote vision-LLM API.
    Vision,
    /// Local OCR engine.
    Ocr,
    /// Local object-detection model.
    Detection,
    /// Local PDF page rasterizer.
    Rasterizer,
}

impl Backend {
    pub fn as_str(self) -> &'static str {
        match self {
            Backend::Workflow => "workflow",
            Backend::Vision => "vision",
            Backend::Ocr => "ocr",
            Backend::Detection => "detection",
            Backend::Rasterizer => "rasterizer",
        }
    }

    /// User-facing hint attached to ordinary analysis failures.
    pub fn analysis_hint(self) -> &'static str {
        match self {
            Backend::Workflow | Backend::Vision => {
                "Please check if the image contains a valid e-invoice."
            }
            Backend::Ocr => "Please check that the page image is readable and not blank.",
            Backend::Detection => "Please check that the video decodes correctly.",
            Backend::Rasterizer => "Please check that the PDF is not encrypted or corrupted.",
        }
    }
}

impl core::fmt::Display for Backend {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a unit's media lives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MediaSource {
    /// An image file on local disk.
    File { path: PathBuf },
    /// Raw image bytes held in memory.
    Bytes { filename: String, data: Vec<u8> },
    /// One page of a PDF (0-based index).
    PdfPage { path: PathBuf, page_index: u32 },
    /// One decoded video frame; pixels travel alongside in [`WorkItem::frame`].
    Frame { number: u64, timestamp: f64 },
}

impl MediaSource {
    pub fn file(path: impl Into<PathBuf>) -> Self {
        MediaSource::File { path: path.into() }
    }

    /// Display name used for uploads and logs.
    pub fn filename(&self) -> String {
        match self {
            MediaSource::File { path } => file_name(path),
            MediaSource::Bytes { filename, .. } => filename.clone(),
            MediaSource::PdfPage { path, page_index } => {
                format!("{}#page{}", file_name(path), page_index + 1)
            }
            MediaSource::Frame { number, .. } => format!("frame_{number}"),
        }
    }

    /// Read the media bytes of an image-like source.
    pub async fn read_bytes(&self) -> Result<Vec<u8>, CapabilityError> {
        match self {
            MediaSource::File { path } => tokio::fs::read(path)
                .await
                .map_err(|e| CapabilityError::from_io(path, &e)),
            MediaSource::Bytes { data, .. } => Ok(data.clone()),
            other => Err(CapabilityError::local_fault(format!(
                "source {} has no standalone image bytes",
                other.filename()
            ))),
        }
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// MIME type for an image upload, derived from the file extension.
pub fn image_mime(filename: &str) -> &'static str {
    let lower = filename.to_lowercase();
    if lower.ends_with(".png") {
        "image/png"
    } else {
        "image/jpeg"
    }
}

/// What a capability sees of one unit.
#[derive(Debug, Clone)]
pub struct WorkItem {
    /// Page number, frame number, or selection order.
    pub ordinal: u64,
    pub source: MediaSource,
    /// Decoded pixels for frame units; never persisted.
    pub frame: Option<Arc<Frame>>,
}

impl WorkItem {
    pub fn new(ordinal: u64, source: MediaSource) -> Self {
        Self {
            ordinal,
            source,
            frame: None,
        }
    }

    pub fn with_frame(mut self, frame: Arc<Frame>) -> Self {
        self.frame = Some(frame);
        self
    }
}

/// Reference to media already staged on a remote backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileRef(pub String);

/// Boundary to one external AI/ML backend.
///
/// Implementations classify every fault into a [`CapabilityError`]; nothing
/// else crosses this boundary.
#[async_trait]
pub trait CapabilityClient: Send + Sync {
    fn backend(&self) -> Backend;

    /// Staging step (e.g. upload) run once per unit before any attempt.
    ///
    /// A staging failure ends the unit's attempt sequence immediately.
    async fn stage(&self, _item: &WorkItem) -> Result<Option<FileRef>, CapabilityError> {
        Ok(None)
    }

    /// The retryable step: produce the structured result for one unit.
    async fn invoke(
        &self,
        item: &WorkItem,
        staged: Option<&FileRef>,
    ) -> Result<JsonValue, CapabilityError>;
}

#[async_trait]
impl<C: CapabilityClient + ?Sized> CapabilityClient for Arc<C> {
    fn backend(&self) -> Backend {
        (**self).backend()
    }

    async fn stage(&self, item: &WorkItem) -> Result<Option<FileRef>, CapabilityError> {
        (**self).stage(item).await
    }

    async fn invoke(
        &self,
        item: &WorkItem,
        staged: Option<&FileRef>,
    ) -> Result<JsonValue, CapabilityError> {
        (**self).invoke(item, staged).await
    }
}
