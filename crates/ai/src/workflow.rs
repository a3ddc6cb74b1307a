//! Remote workflow API client (upload-then-run).
//!
//! The run request has exactly one documented shape:
//!
//! ```json
//! {
//!   "inputs": { "<input_variable>": { "type": "image", "transfer_method": "local_file", "upload_file_id": "<id>" } },
//!   "user": "<user>",
//!   "response_mode": "blocking"
//! }
//! ```
//!
//! `input_variable` must match the workflow's start node. A mismatch is a
//! configuration error and shows up as a failed run, not something to work out
//! at runtime.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use serde_json::{Value as JsonValue, json};
use tracing::{debug, warn};

use crate::client::{Backend, CapabilityClient, FileRef, WorkItem, image_mime};
use crate::error::{CapabilityError, RawFailure};

/// Connection settings for the workflow backend.
#[derive(Debug, Clone)]
pub struct WorkflowSettings {
    /// Base URL, without the `/v1` suffix.
    pub server: String,
    pub api_key: String,
    /// End-user identifier sent with every request.
    pub user: String,
    pub timeout: Duration,
    /// Name of the workflow's image input variable.
    pub input_variable: String,
}

impl Default for WorkflowSettings {
    fn default() -> Self {
        Self {
            server: "http://localhost".to_string(),
            api_key: String::new(),
            user: "mediaproc".to_string(),
            timeout: Duration::from_secs(60),
            input_variable: "upload".to_string(),
        }
    }
}

impl WorkflowSettings {
    /// Reject settings that can only ever produce failed runs.
    pub fn validate(&self) -> Result<(), String> {
        if self.server.trim().is_empty() {
            return Err("workflow server URL is empty".to_string());
        }
        if !(self.server.starts_with("http://") || self.server.starts_with("https://")) {
            return Err(format!("workflow server URL must be http(s): {}", self.server));
        }
        let var = self.input_variable.trim();
        if var.is_empty() {
            return Err("workflow input variable is empty".to_string());
        }
        if !var.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(format!("workflow input variable is not an identifier: {var}"));
        }
        Ok(())
    }

    /// The run request body for an uploaded file.
    pub fn run_request(&self, file: &FileRef) -> JsonValue {
        let mut inputs = serde_json::Map::new();
        inputs.insert(
            self.input_variable.clone(),
            json!({
                "type": "image",
                "transfer_method": "local_file",
                "upload_file_id": file.0,
            }),
        );
        json!({
            "inputs": inputs,
            "user": self.user,
            "response_mode": "blocking",
        })
    }
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    id: String,
}

#[derive(Debug, Deserialize)]
struct RunResponse {
    #[serde(default)]
    data: Option<RunData>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RunData {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    outputs: Option<JsonValue>,
    #[serde(default)]
    error: Option<String>,
}

/// Interpret a workflow run response body (HTTP 200).
pub fn interpret_run_response(body: &str) -> Result<JsonValue, CapabilityError> {
    let parsed: RunResponse = serde_json::from_str(body).map_err(|e| {
        CapabilityError::from_raw(
            RawFailure::MalformedResponse,
            format!("malformed workflow response: {e}"),
        )
    })?;

    let data = parsed.data;
    let status = data.as_ref().and_then(|d| d.status.clone());
    if status.as_deref() == Some("succeeded") {
        let result = data
            .and_then(|d| d.outputs)
            .and_then(|o| o.get("result").cloned())
            .unwrap_or_else(|| json!({}));
        return Ok(result);
    }

    let error = data
        .and_then(|d| d.error)
        .or(parsed.message)
        .unwrap_or_else(|| {
            format!(
                "workflow finished with status {}",
                status.as_deref().unwrap_or("unknown")
            )
        });
    Err(CapabilityError::from_raw(
        RawFailure::WorkflowFailed(error.clone()),
        error,
    ))
}

/// Client for the remote workflow API.
#[derive(Debug, Clone)]
pub struct WorkflowClient {
    http: reqwest::Client,
    settings: WorkflowSettings,
}

impl WorkflowClient {
    pub fn new(settings: WorkflowSettings) -> Result<Self, CapabilityError> {
        settings.validate().map_err(CapabilityError::permanent)?;
        let http = reqwest::Client::builder()
            .timeout(settings.timeout)
            .build()
            .map_err(|e| CapabilityError::local_fault(format!("http client: {e}")))?;
        Ok(Self { http, settings })
    }

    pub fn settings(&self) -> &WorkflowSettings {
        &self.settings
    }

    /// Upload media and return the backend's file reference. Expects HTTP 201.
    pub async fn upload(
        &self,
        bytes: Vec<u8>,
        filename: &str,
        mime: &str,
    ) -> Result<FileRef, CapabilityError> {
        let url = format!("{}/v1/files/upload", self.settings.server);
        debug!(%url, filename, size = bytes.len(), mime, "uploading file");

        let part = Part::bytes(bytes)
            .file_name(filename.to_string())
            .mime_str(mime)
            .map_err(|e| CapabilityError::local_fault(format!("invalid mime {mime}: {e}")))?;
        let form = Form::new()
            .part("file", part)
            .text("user", self.settings.user.clone());

        let resp = self
            .http
            .post(&url)
            .bearer_auth(&self.settings.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(|e| CapabilityError::from_reqwest(&e))?;

        let status = resp.status();
        if status != StatusCode::CREATED {
            let text = resp.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), "upload rejected");
            return Err(CapabilityError::from_status(
                status.as_u16(),
                format!("upload failed: {text}"),
            ));
        }
        let text = resp
            .text()
            .await
            .map_err(|e| CapabilityError::from_reqwest(&e))?;

        let parsed: UploadResponse = serde_json::from_str(&text).map_err(|e| {
            CapabilityError::from_raw(
                RawFailure::MalformedResponse,
                format!("malformed upload response: {e}"),
            )
        })?;
        Ok(FileRef(parsed.id))
    }

    /// Run the workflow on an uploaded file (one attempt).
    pub async fn run_workflow(&self, file: &FileRef) -> Result<JsonValue, CapabilityError> {
        let url = format!("{}/v1/workflows/run", self.settings.server);
        let resp = self
            .http
            .post(&url)
            .bearer_auth(&self.settings.api_key)
            .json(&self.settings.run_request(file))
            .send()
            .await
            .map_err(|e| CapabilityError::from_reqwest(&e))?;

        let status = resp.status();
        if status != StatusCode::OK {
            let text = resp.text().await.unwrap_or_default();
            return Err(CapabilityError::from_status(
                status.as_u16(),
                format!("workflow failed: {text}"),
            ));
        }
        let text = resp
            .text()
            .await
            .map_err(|e| CapabilityError::from_reqwest(&e))?;
        interpret_run_response(&text)
    }
}

#[async_trait]
impl CapabilityClient for WorkflowClient {
    fn backend(&self) -> Backend {
        Backend::Workflow
    }

    async fn stage(&self, item: &WorkItem) -> Result<Option<FileRef>, CapabilityError> {
        let bytes = item.source.read_bytes().await?;
        let filename = item.source.filename();
        let file = self.upload(bytes, &filename, image_mime(&filename)).await?;
        Ok(Some(file))
    }

    async fn invoke(
        &self,
        _item: &WorkItem,
        staged: Option<&FileRef>,
    ) -> Result<JsonValue, CapabilityError> {
        let file = staged
            .ok_or_else(|| CapabilityError::local_fault("workflow run without an uploaded file"))?;
        self.run_workflow(file).await
    }
}
