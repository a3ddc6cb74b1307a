use serde::{Deserialize, Serialize};

use mediaproc_core::{JobId, OwnerId};
use mediaproc_infra::jobs::{Job, JobKind, JobStatus};

use crate::app::errors;

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Default, Deserialize)]
pub struct OwnerQuery {
    pub owner_id: Option<String>,
}

impl OwnerQuery {
    pub fn owner(&self) -> Result<Option<OwnerId>, axum::response::Response> {
        match self.owner_id.as_deref() {
            None => Ok(None),
            Some(raw) => raw.parse().map(Some).map_err(|_| {
                errors::json_error(
                    axum::http::StatusCode::BAD_REQUEST,
                    "invalid_id",
                    "invalid owner id",
                )
            }),
        }
    }
}

// -------------------------
// Response DTOs
// -------------------------

#[derive(Debug, Serialize)]
pub struct JobCreated {
    pub job_id: JobId,
    pub status: JobStatus,
}

#[derive(Debug, Serialize)]
pub struct JobView {
    pub id: JobId,
    pub owner_id: OwnerId,
    pub kind: JobKind,
    pub backend: String,
    pub status: JobStatus,
    pub total_units: u64,
    pub processed_units: u64,
    pub progress_percent: f64,
    pub created_at: String,
    pub updated_at: String,
}

impl From<Job> for JobView {
    fn from(job: Job) -> Self {
        Self {
            progress_percent: job.progress_percent(),
            id: job.id,
            owner_id: job.owner_id,
            kind: job.kind,
            backend: job.backend.to_string(),
            status: job.status,
            total_units: job.total_units,
            processed_units: job.processed_units,
            created_at: job.created_at.to_rfc3339(),
            updated_at: job.updated_at.to_rfc3339(),
        }
    }
}

pub fn parse_job_id(raw: &str) -> Result<JobId, axum::response::Response> {
    raw.parse().map_err(|_| {
        errors::json_error(
            axum::http::StatusCode::BAD_REQUEST,
            "invalid_id",
            "invalid job id",
        )
    })
}
