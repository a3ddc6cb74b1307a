//! Local object detection over decoded video frames.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value as JsonValue, json};

use crate::client::{Backend, CapabilityClient, FileRef, MediaSource, WorkItem};
use crate::error::CapabilityError;
use crate::lazy::LazyModel;

/// A decoded frame (packed pixels, layout is the decoder's and the model's contract).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

/// One detected object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    #[serde(rename = "class")]
    pub class_name: String,
    pub confidence: f32,
    /// `[x1, y1, x2, y2]` in pixels.
    pub bbox: [f32; 4],
}

/// Local detection model.
pub trait ObjectDetector: Send + Sync {
    fn detect(&self, frame: &Frame) -> Result<Vec<Detection>, CapabilityError>;
}

/// Frame detection capability.
pub struct DetectionClient<D> {
    model: LazyModel<D>,
}

impl<D: ObjectDetector + 'static> DetectionClient<D> {
    pub fn new(model: LazyModel<D>) -> Self {
        Self { model }
    }

    pub fn is_loaded(&self) -> bool {
        self.model.is_loaded()
    }
}

#[async_trait]
impl<D: ObjectDetector + 'static> CapabilityClient for DetectionClient<D> {
    fn backend(&self) -> Backend {
        Backend::Detection
    }

    async fn invoke(
        &self,
        item: &WorkItem,
        _staged: Option<&FileRef>,
    ) -> Result<JsonValue, CapabilityError> {
        let MediaSource::Frame { number, timestamp } = item.source else {
            return Err(CapabilityError::local_fault(format!(
                "detection needs a frame, got {}",
                item.source.filename()
            )));
        };
        let frame = item
            .frame
            .clone()
            .ok_or_else(|| CapabilityError::local_fault(format!("frame {number} has no pixels")))?;

        let model = self.model.get().await?;
        let detections = tokio::task::spawn_blocking(move || model.detect(&frame))
            .await
            .map_err(|e| CapabilityError::local_fault(format!("detection task failed: {e}")))??;

        Ok(json!({
            "frame_number": number,
            "timestamp": timestamp,
            "detections": detections,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FailureClass;
    use std::sync::Arc;

    struct OnePerson;

    impl ObjectDetector for OnePerson {
        fn detect(&self, _frame: &Frame) -> Result<Vec<Detection>, CapabilityError> {
            Ok(vec![Detection {
                class_name: "person".to_string(),
                confidence: 0.87,
                bbox: [1.0, 2.0, 30.0, 60.0],
            }])
        }
    }

    fn frame() -> Arc<Frame> {
        Arc::new(Frame {
            width: 2,
            height: 2,
            data: vec![0; 12],
        })
    }

    #[tokio::test]
    async fn payload_uses_class_key() {
        let client = DetectionClient::new(LazyModel::new("yolo", || Ok(OnePerson)));
        let item = WorkItem::new(
            10,
            MediaSource::Frame {
                number: 10,
                timestamp: 0.4,
            },
        )
        .with_frame(frame());

        let payload = client.invoke(&item, None).await.unwrap();
        assert_eq!(payload["frame_number"], 10);
        assert_eq!(payload["detections"][0]["class"], "person");
        assert_eq!(payload["detections"][0]["bbox"][2], 30.0);
    }

    #[tokio::test]
    async fn missing_pixels_is_a_local_fault() {
        let client = DetectionClient::new(LazyModel::new("yolo", || Ok(OnePerson)));
        let item = WorkItem::new(
            0,
            MediaSource::Frame {
                number: 0,
                timestamp: 0.0,
            },
        );
        let err = client.invoke(&item, None).await.unwrap_err();
        assert_eq!(err.class, FailureClass::LocalFault);
        assert!(!client.is_loaded());
    }
}
