//! Process configuration, read once from the environment at startup.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

use mediaproc_ai::{VisionSettings, WorkflowSettings};

use crate::jobs::{DEFAULT_SAMPLE_EVERY, RetryPolicy};

pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8000";
pub const DEFAULT_MEDIA_ROOT: &str = "media";

/// Configuration error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("{var}={value:?} is invalid: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
    #[error("workflow settings rejected: {0}")]
    Workflow(String),
}

/// Everything the pipelines need from the environment.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Present when `WORKFLOW_SERVER` is set.
    pub workflow: Option<WorkflowSettings>,
    /// Present when `VISION_API_KEY` is set.
    pub vision: Option<VisionSettings>,
    pub retry: RetryPolicy,
    pub sample_every: u64,
    pub media_root: PathBuf,
    pub bind_addr: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            workflow: None,
            vision: None,
            retry: RetryPolicy::default(),
            sample_every: DEFAULT_SAMPLE_EVERY,
            media_root: PathBuf::from(DEFAULT_MEDIA_ROOT),
            bind_addr: DEFAULT_BIND_ADDR.to_string(),
        }
    }
}

impl PipelineConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build from any variable source; unset and empty values fall back to defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |var: &str| lookup(var).filter(|v| !v.trim().is_empty());
        let defaults = PipelineConfig::default();

        let workflow = match get("WORKFLOW_SERVER") {
            Some(server) => {
                let base = WorkflowSettings::default();
                let api_key = get("WORKFLOW_API_KEY").unwrap_or_else(|| {
                    warn!("WORKFLOW_API_KEY not set; workflow requests will be rejected");
                    String::new()
                });
                let settings = WorkflowSettings {
                    server: server.trim_end_matches('/').to_string(),
                    api_key,
                    user: get("WORKFLOW_USER").unwrap_or(base.user),
                    timeout: secs(&get, "WORKFLOW_TIMEOUT_SECS", base.timeout)?,
                    input_variable: get("WORKFLOW_INPUT_VARIABLE").unwrap_or(base.input_variable),
                };
                settings.validate().map_err(ConfigError::Workflow)?;
                Some(settings)
            }
            None => {
                warn!("WORKFLOW_SERVER not set; workflow backend disabled");
                None
            }
        };

        let vision = match get("VISION_API_KEY") {
            Some(api_key) => {
                let base = VisionSettings::default();
                Some(VisionSettings {
                    api_url: get("VISION_API_URL").unwrap_or(base.api_url),
                    api_key,
                    model: get("VISION_MODEL").unwrap_or(base.model),
                    timeout: secs(&get, "VISION_TIMEOUT_SECS", base.timeout)?,
                    prompt: prompt(get("VISION_PROMPT_FILE"), base.prompt),
                })
            }
            None => {
                warn!("VISION_API_KEY not set; vision backend disabled");
                None
            }
        };

        let max_attempts: u32 = parsed(&get, "RETRY_MAX_ATTEMPTS", defaults.retry.max_attempts)?;
        if max_attempts == 0 {
            return Err(invalid("RETRY_MAX_ATTEMPTS", "0", "must be at least 1"));
        }
        let retry = RetryPolicy::fixed(
            max_attempts,
            secs(&get, "RETRY_DELAY_SECS", defaults.retry.delay)?,
        );

        let sample_every: u64 = parsed(&get, "VIDEO_SAMPLE_EVERY", defaults.sample_every)?;
        if sample_every == 0 {
            return Err(invalid("VIDEO_SAMPLE_EVERY", "0", "must be at least 1"));
        }

        Ok(Self {
            workflow,
            vision,
            retry,
            sample_every,
            media_root: get("MEDIA_ROOT").map(PathBuf::from).unwrap_or(defaults.media_root),
            bind_addr: get("BIND_ADDR").unwrap_or(defaults.bind_addr),
        })
    }
}

fn invalid(var: &'static str, value: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        var,
        value: value.to_string(),
        reason: reason.into(),
    }
}

fn parsed<T, G>(get: &G, var: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(var) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e: T::Err| invalid(var, &raw, e.to_string())),
        None => Ok(default),
    }
}

fn secs<G>(get: &G, var: &'static str, default: Duration) -> Result<Duration, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    parsed(get, var, default.as_secs()).map(Duration::from_secs)
}

fn prompt(file: Option<String>, default: String) -> String {
    let Some(path) = file else {
        return default;
    };
    match std::fs::read_to_string(&path) {
        Ok(text) if !text.trim().is_empty() => text.trim().to_string(),
        Ok(_) => {
            warn!(path = %path, "vision prompt file is empty; using built-in prompt");
            default
        }
        Err(err) => {
            warn!(path = %path, error = %err, "cannot read vision prompt file; using built-in prompt");
            default
        }
    }
}
