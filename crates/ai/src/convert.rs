//! PDF page conversion to PNG images.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value as JsonValue, json};

use crate::client::{Backend, CapabilityClient, FileRef, MediaSource, WorkItem};
use crate::error::CapabilityError;

/// PDF rendering collaborator.
pub trait PdfRasterizer: Send + Sync {
    fn page_count(&self, pdf: &Path) -> Result<u32, CapabilityError>;

    /// Render one page (0-based) to PNG bytes.
    fn render_page(&self, pdf: &Path, page_index: u32) -> Result<Vec<u8>, CapabilityError>;
}

/// `<stem>_page_<n>.png`, n is 1-based.
pub fn page_image_name(pdf: &Path, page_index: u32) -> String {
    let stem = pdf
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "document".to_string());
    format!("{stem}_page_{}.png", page_index + 1)
}

/// Renders PDF pages and writes them under an output directory.
pub struct PageConverter {
    rasterizer: Arc<dyn PdfRasterizer>,
    output_dir: PathBuf,
}

impl PageConverter {
    pub fn new(rasterizer: Arc<dyn PdfRasterizer>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            rasterizer,
            output_dir: output_dir.into(),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }
}

#[async_trait]
impl CapabilityClient for PageConverter {
    fn backend(&self) -> Backend {
        Backend::Rasterizer
    }

    async fn invoke(
        &self,
        item: &WorkItem,
        _staged: Option<&FileRef>,
    ) -> Result<JsonValue, CapabilityError> {
        let MediaSource::PdfPage { path, page_index } = &item.source else {
            return Err(CapabilityError::local_fault(format!(
                "conversion needs a pdf page, got {}",
                item.source.filename()
            )));
        };
        let page_index = *page_index;

        let rasterizer = self.rasterizer.clone();
        let pdf = path.clone();
        let png = tokio::task::spawn_blocking(move || rasterizer.render_page(&pdf, page_index))
            .await
            .map_err(|e| CapabilityError::local_fault(format!("render task failed: {e}")))??;

        tokio::fs::create_dir_all(&self.output_dir)
            .await
            .map_err(|e| CapabilityError::from_io(&self.output_dir, &e))?;
        let image_path = self.output_dir.join(page_image_name(path, page_index));
        tokio::fs::write(&image_path, &png)
            .await
            .map_err(|e| CapabilityError::from_io(&image_path, &e))?;

        Ok(json!({
            "page_number": page_index + 1,
            "image_path": image_path,
        }))
    }
}
