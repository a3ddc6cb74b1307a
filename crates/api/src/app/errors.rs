use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use mediaproc_infra::jobs::{ServiceError, StoreError};

pub fn service_error_to_response(err: ServiceError) -> axum::response::Response {
    match err {
        ServiceError::Invalid(msg) => json_error(StatusCode::BAD_REQUEST, "validation_error", msg),
        ServiceError::Unavailable(backend) => json_error(
            StatusCode::SERVICE_UNAVAILABLE,
            "backend_unavailable",
            format!("{backend} backend is not configured"),
        ),
        ServiceError::NotFound(id) => {
            json_error(StatusCode::NOT_FOUND, "not_found", format!("job {id} not found"))
        }
        ServiceError::AlreadyLaunched(id) => json_error(
            StatusCode::CONFLICT,
            "conflict",
            format!("job {id} was already launched"),
        ),
        ServiceError::Store(StoreError::DuplicateOrdinal { ordinal, .. }) => json_error(
            StatusCode::BAD_REQUEST,
            "validation_error",
            format!("duplicate unit ordinal {ordinal}"),
        ),
        ServiceError::Store(e) => json_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "store_error",
            e.to_string(),
        ),
    }
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}
