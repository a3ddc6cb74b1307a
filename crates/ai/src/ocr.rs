//! Local OCR over page images.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value as JsonValue, json};

use crate::client::{Backend, CapabilityClient, FileRef, MediaSource, WorkItem};
use crate::convert::PdfRasterizer;
use crate::error::CapabilityError;
use crate::lazy::LazyModel;

/// Blocks at or below this confidence are dropped.
pub const DEFAULT_MIN_CONFIDENCE: f32 = 0.5;

/// One recognised text region.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextBlock {
    pub text: String,
    pub confidence: f32,
    /// Quadrilateral corners, clockwise from top-left.
    pub bbox: [[f32; 2]; 4],
}

/// Local OCR engine (inference is the engine's business, not ours).
pub trait OcrEngine: Send + Sync {
    fn read_text(&self, image: &[u8]) -> Result<Vec<TextBlock>, CapabilityError>;
}

/// Page OCR capability.
///
/// Reads image files directly. PDF pages are rendered through the attached
/// rasterizer first.
pub struct OcrClient<E> {
    engine: LazyModel<E>,
    pages: Option<Arc<dyn PdfRasterizer>>,
    min_confidence: f32,
}

impl<E: OcrEngine + 'static> OcrClient<E> {
    pub fn new(engine: LazyModel<E>) -> Self {
        Self {
            engine,
            pages: None,
            min_confidence: DEFAULT_MIN_CONFIDENCE,
        }
    }

    pub fn with_pages(mut self, rasterizer: Arc<dyn PdfRasterizer>) -> Self {
        self.pages = Some(rasterizer);
        self
    }

    pub fn with_min_confidence(mut self, min_confidence: f32) -> Self {
        self.min_confidence = min_confidence;
        self
    }

    pub fn is_loaded(&self) -> bool {
        self.engine.is_loaded()
    }

    async fn page_image(&self, source: &MediaSource) -> Result<Vec<u8>, CapabilityError> {
        let MediaSource::PdfPage { path, page_index } = source else {
            return source.read_bytes().await;
        };
        let rasterizer = self.pages.clone().ok_or_else(|| {
            CapabilityError::local_fault(format!(
                "cannot render {}: no pdf rasterizer attached",
                source.filename()
            ))
        })?;
        let (pdf, page_index) = (path.clone(), *page_index);
        tokio::task::spawn_blocking(move || rasterizer.render_page(&pdf, page_index))
            .await
            .map_err(|e| CapabilityError::local_fault(format!("render task failed: {e}")))?
    }
}

/// Build the per-page payload from raw engine output.
pub fn page_payload(page_number: u64, blocks: Vec<TextBlock>, min_confidence: f32) -> JsonValue {
    let kept: Vec<TextBlock> = blocks
        .into_iter()
        .filter(|b| b.confidence > min_confidence)
        .map(|b| TextBlock {
            text: b.text.trim().to_string(),
            ..b
        })
        .collect();
    let full_text = kept
        .iter()
        .map(|b| b.text.as_str())
        .collect::<Vec<_>>()
        .join(" ");

    json!({
        "page_number": page_number,
        "text_blocks": kept,
        "full_text": full_text,
    })
}

#[async_trait]
impl<E: OcrEngine + 'static> CapabilityClient for OcrClient<E> {
    fn backend(&self) -> Backend {
        Backend::Ocr
    }

    async fn invoke(
        &self,
        item: &WorkItem,
        _staged: Option<&FileRef>,
    ) -> Result<JsonValue, CapabilityError> {
        let image = self.page_image(&item.source).await?;
        let engine = self.engine.get().await?;
        let blocks = tokio::task::spawn_blocking(move || engine.read_text(&image))
            .await
            .map_err(|e| CapabilityError::local_fault(format!("ocr task failed: {e}")))??;
        Ok(page_payload(item.ordinal, blocks, self.min_confidence))
    }
}
