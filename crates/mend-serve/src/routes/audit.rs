use crate::routes::error::map_error;
use crate::{build_store, AppState};
use axum::extract::{Query, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use mend_core::audit::AuditRepository;
use mend_core::store::Store;
use mend_core::types::{AuditAction, AuditFilter, AuditOutcome, FailureId};
use serde::Deserialize;
use std::str::FromStr;
use utoipa::IntoParams;

#[derive(Debug, Deserialize, IntoParams)]
pub struct AuditQuery {
    pub failure_id: Option<String>,
    pub action: Option<AuditAction>,
    pub outcome: Option<AuditOutcome>,
    pub since: Option<chrono::DateTime<chrono::Utc>>,
    pub until: Option<chrono::DateTime<chrono::Utc>>,
    pub limit: Option<u32>,
}

#[utoipa::path(
    get,
    path = "/api/audit",
    params(AuditQuery),
    responses((status = 200, body = Vec<mend_core::types::AuditEntry>))
)]
pub(crate) async fn get_audit_trail(
    State(state): State<AppState>,
    Query(query): Query<AuditQuery>,
) -> Response {
    let store = match build_store(&state) {
        Ok(store) => store,
        Err(err) => return map_error(&err).into_response(),
    };
    let failure_id = match query.failure_id.map(|raw| FailureId::from_str(&raw)).transpose() {
        Ok(id) => id,
        Err(err) => {
            return map_error(&mend_core::error::FailureError::InvalidInput {
                message: err.to_string(),
            }
            .into())
            .into_response()
        }
    };
    let filter = AuditFilter {
        failure_id,
        action: query.action,
        outcome: query.outcome,
        since: query.since,
        until: query.until,
        limit: query.limit,
    };
    match store.audit().query(filter) {
        Ok(entries) => Json(entries).into_response(),
        Err(err) => map_error(&err.into()).into_response(),
    }
}
