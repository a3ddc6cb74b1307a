//! Service wiring from configuration.

use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};

use mediaproc_ai::{VisionClient, WorkflowClient};
use mediaproc_infra::PipelineConfig;
use mediaproc_infra::jobs::{InMemoryMediaStore, JobService, PipelineRegistry, TokioLauncher};

/// The job service as served over HTTP.
pub type ApiService = JobService<InMemoryMediaStore, TokioLauncher>;

/// Registry with every remote backend the configuration enables.
///
/// Local engines (OCR, detection, PDF rendering, video decoding) are
/// registered by embedders through [`PipelineRegistry`]; jobs needing an
/// unregistered one are refused at submission.
pub fn build_registry(config: &PipelineConfig) -> anyhow::Result<PipelineRegistry> {
    let mut registry =
        PipelineRegistry::new(config.media_root.clone()).with_sample_every(config.sample_every);

    if let Some(settings) = &config.workflow {
        let client = WorkflowClient::new(settings.clone()).context("workflow client")?;
        info!(server = %settings.server, input = %settings.input_variable, "workflow backend enabled");
        registry = registry.with_workflow(Arc::new(client));
    }
    if let Some(settings) = &config.vision {
        let client = VisionClient::new(settings.clone()).context("vision client")?;
        info!(model = %settings.model, "vision backend enabled");
        registry = registry.with_vision(Arc::new(client));
    }
    if config.workflow.is_none() && config.vision.is_none() {
        warn!("no remote analysis backend configured; image analysis jobs will be refused");
    }
    Ok(registry)
}

/// Job service on the current runtime, backed by the in-memory store.
pub fn build_services(config: &PipelineConfig) -> anyhow::Result<ApiService> {
    let registry = build_registry(config)?;
    Ok(with_registry(config, registry))
}

pub fn with_registry(config: &PipelineConfig, registry: PipelineRegistry) -> ApiService {
    JobService::new(
        InMemoryMediaStore::arc(),
        config.retry,
        TokioLauncher::current(),
        Arc::new(registry),
    )
}
