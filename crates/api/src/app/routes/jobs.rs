use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};

use mediaproc_infra::jobs::JobRequest;

use crate::app::services::ApiService;
use crate::app::{dto, errors};

pub fn router() -> Router {
    Router::new()
        .route("/", post(create_job).get(list_jobs))
        .route("/stats", get(job_stats))
        .route("/:id", get(get_job))
        .route("/:id/units", get(list_units))
        .route("/:id/results", get(list_results))
        .route("/:id/summary", get(job_summary))
}

/// Persist the job and its units, schedule the run, answer immediately.
pub async fn create_job(
    Extension(services): Extension<Arc<ApiService>>,
    Json(body): Json<JobRequest>,
) -> axum::response::Response {
    match services.submit(body).await {
        Ok(job_id) => (
            StatusCode::ACCEPTED,
            Json(dto::JobCreated {
                job_id,
                status: mediaproc_infra::jobs::JobStatus::Pending,
            }),
        )
            .into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}

pub async fn list_jobs(
    Extension(services): Extension<Arc<ApiService>>,
    Query(query): Query<dto::OwnerQuery>,
) -> axum::response::Response {
    let owner = match query.owner() {
        Ok(o) => o,
        Err(resp) => return resp,
    };
    match services.list_jobs(owner).await {
        Ok(jobs) => {
            let views: Vec<dto::JobView> = jobs.into_iter().map(Into::into).collect();
            Json(views).into_response()
        }
        Err(e) => errors::service_error_to_response(e),
    }
}

pub async fn job_stats(
    Extension(services): Extension<Arc<ApiService>>,
    Query(query): Query<dto::OwnerQuery>,
) -> axum::response::Response {
    let owner = match query.owner() {
        Ok(o) => o,
        Err(resp) => return resp,
    };
    match services.stats(owner).await {
        Ok(stats) => Json(stats).into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}

pub async fn get_job(
    Extension(services): Extension<Arc<ApiService>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let job_id = match dto::parse_job_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match services.get_job(job_id).await {
        Ok(job) => Json(dto::JobView::from(job)).into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}

pub async fn list_units(
    Extension(services): Extension<Arc<ApiService>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let job_id = match dto::parse_job_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match services.list_units(job_id).await {
        Ok(units) => Json(units).into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}

pub async fn list_results(
    Extension(services): Extension<Arc<ApiService>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let job_id = match dto::parse_job_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match services.list_results(job_id).await {
        Ok(results) => Json(results).into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}

pub async fn job_summary(
    Extension(services): Extension<Arc<ApiService>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let job_id = match dto::parse_job_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match services.summary(job_id).await {
        Ok(summary) => Json(summary).into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}
