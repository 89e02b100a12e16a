use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use mend_core::error::{ApprovalError, FailureError, HealthError, MendError, SnapshotError};
use serde_json::json;

pub fn map_error(err: &MendError) -> Response {
    let (status, code) = match err {
        MendError::Failure(FailureError::NotFound)
        | MendError::Snapshot(SnapshotError::NotFound)
        | MendError::Health(HealthError::NotFound)
        | MendError::Approval(ApprovalError::NotFound) => (StatusCode::NOT_FOUND, "not_found"),
        MendError::Failure(FailureError::InvalidInput { .. }) => {
            (StatusCode::BAD_REQUEST, "invalid_input")
        }
        MendError::Config(_) => (StatusCode::BAD_REQUEST, "invalid_config"),
        _ => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
    };
    (
        status,
        Json(json!({
            "error": code,
            "message": err.to_string(),
        })),
    )
        .into_response()
}
