//! Remote vision-LLM client (chat completion with an inline image).

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::Deserialize;
use serde_json::{Value as JsonValue, json};

use crate::client::{Backend, CapabilityClient, FileRef, WorkItem};
use crate::error::{CapabilityError, RawFailure};

pub const DEFAULT_VISION_URL: &str = "https://open.bigmodel.cn/api/paas/v4/chat/completions";

pub const DEFAULT_PROMPT: &str = "You are a professional invoice information extraction assistant. \
Extract the invoice information from the image and output it as JSON.";

#[derive(Debug, Clone)]
pub struct VisionSettings {
    pub api_url: String,
    pub api_key: String,
    pub model: String,
    pub timeout: Duration,
    /// System prompt prepended to the extraction instruction.
    pub prompt: String,
}

impl Default for VisionSettings {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_VISION_URL.to_string(),
            api_key: String::new(),
            model: "glm-4v-flash".to_string(),
            timeout: Duration::from_secs(30),
            prompt: DEFAULT_PROMPT.to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: String,
}

/// Pull the outermost JSON object out of free-form model output.
///
/// When no object parses, the raw text is kept alongside a note so nothing is lost.
pub fn extract_json_object(content: &str) -> JsonValue {
    let (Some(start), Some(end)) = (content.find('{'), content.rfind('}')) else {
        return json!({ "raw_response": content, "error": "No valid JSON found" });
    };
    if end < start {
        return json!({ "raw_response": content, "error": "No valid JSON found" });
    }
    match serde_json::from_str::<JsonValue>(&content[start..=end]) {
        Ok(v) => v,
        Err(_) => json!({ "raw_response": content, "error": "JSON parsing failed" }),
    }
}

#[derive(Debug, Clone)]
pub struct VisionClient {
    http: reqwest::Client,
    settings: VisionSettings,
}

impl VisionClient {
    pub fn new(settings: VisionSettings) -> Result<Self, CapabilityError> {
        let http = reqwest::Client::builder()
            .timeout(settings.timeout)
            .build()
            .map_err(|e| CapabilityError::local_fault(format!("http client: {e}")))?;
        Ok(Self { http, settings })
    }

    fn request_body(&self, image: &[u8]) -> JsonValue {
        let encoded = STANDARD.encode(image);
        json!({
            "model": self.settings.model,
            "messages": [{
                "role": "user",
                "content": [
                    {
                        "type": "text",
                        "text": format!(
                            "{}\n\nAnalyze this invoice image, extract all key fields, and output them in the specified JSON format.",
                            self.settings.prompt
                        ),
                    },
                    {
                        "type": "image_url",
                        "image_url": { "url": format!("data:image/jpeg;base64,{encoded}") },
                    },
                ],
            }],
            "temperature": 0.1,
            "max_tokens": 2000,
        })
    }

    /// Analyze one image and return the extracted fields plus the raw reply.
    pub async fn analyze_image(&self, image: &[u8]) -> Result<JsonValue, CapabilityError> {
        let resp = self
            .http
            .post(&self.settings.api_url)
            .bearer_auth(&self.settings.api_key)
            .json(&self.request_body(image))
            .send()
            .await
            .map_err(|e| CapabilityError::from_reqwest(&e))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(CapabilityError::from_status(status.as_u16(), body));
        }

        let text = resp
            .text()
            .await
            .map_err(|e| CapabilityError::from_reqwest(&e))?;
        let chat: ChatResponse = serde_json::from_str(&text).map_err(|e| {
            CapabilityError::from_raw(
                RawFailure::MalformedResponse,
                format!("malformed completion response: {e}"),
            )
        })?;
        let content = chat
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| {
                CapabilityError::from_raw(RawFailure::MalformedResponse, "completion had no choices")
            })?;

        Ok(json!({
            "data": extract_json_object(&content),
            "raw_response": content,
        }))
    }
}

#[async_trait]
impl CapabilityClient for VisionClient {
    fn backend(&self) -> Backend {
        Backend::Vision
    }

    async fn invoke(
        &self,
        item: &WorkItem,
        _staged: Option<&FileRef>,
    ) -> Result<JsonValue, CapabilityError> {
        let bytes = item.source.read_bytes().await?;
        self.analyze_image(&bytes).await
    }
}
