//! `mediaproc-ai`
//!
//! **Responsibility:** the boundary to external AI/ML capabilities.
//!
//! - Every backend implements [`CapabilityClient`]: given one unit, return a
//!   structured payload or a classified [`CapabilityError`].
//! - Inference itself (OCR, detection, rasterization) stays behind traits;
//!   this crate only adapts it to the boundary.
//! - Nothing here touches job state or storage.

pub mod client;
pub mod convert;
pub mod detect;
pub mod error;
pub mod lazy;
pub mod ocr;
pub mod vision;
pub mod workflow;

#[cfg(test)]
mod test_support;

pub use client::{Backend, CapabilityClient, FileRef, MediaSource, WorkItem};
pub use convert::{PageConverter, PdfRasterizer};
pub use detect::{Detection, DetectionClient, Frame, ObjectDetector};
pub use error::{CapabilityError, FailureClass, RawFailure, classify, classify_status};
pub use lazy::LazyModel;
pub use ocr::{OcrClient, OcrEngine, TextBlock};
pub use vision::{VisionClient, VisionSettings};
pub use workflow::{WorkflowClient, WorkflowSettings};
