use crate::routes::error::map_error;
use crate::{build_store, AppState};
use axum::extract::{Path, Query, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use mend_core::classify::AnalysisRepository;
use mend_core::decisions::DecisionRepository;
use mend_core::failures::FailureRepository;
use mend_core::store::Store;
use mend_core::types::{
    Analysis, DecisionRecord, Failure, FailureFilter, FailureId, FailureStatus,
};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use utoipa::{IntoParams, ToSchema};

const MAX_FEED_LIMIT: u32 = 200;
const DEFAULT_FEED_LIMIT: u32 = 50;

#[derive(Debug, Deserialize, IntoParams)]
pub struct FeedQuery {
    pub repository: Option<String>,
    pub status: Option<FailureStatus>,
    pub limit: Option<u32>,
}

/// Feed item without the captured log payload.
#[derive(Debug, Serialize, ToSchema)]
pub struct FailureSummary {
    pub id: FailureId,
    pub repository: String,
    pub branch: String,
    pub workflow: String,
    pub workflow_run_id: String,
    pub failure_reason: String,
    pub status: FailureStatus,
    pub status_reason: Option<String>,
    pub detected_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

impl From<Failure> for FailureSummary {
    fn from(failure: Failure) -> Self {
        Self {
            id: failure.id,
            repository: failure.repository,
            branch: failure.branch,
            workflow: failure.workflow,
            workflow_run_id: failure.workflow_run_id,
            failure_reason: failure.failure_reason,
            status: failure.status,
            status_reason: failure.status_reason,
            detected_at: failure.detected_at,
            updated_at: failure.updated_at,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct FailureDetail {
    pub failure: FailureSummary,
    pub analysis: Option<Analysis>,
    pub decisions: Vec<DecisionRecord>,
}

#[utoipa::path(
    get,
    path = "/api/failures",
    params(FeedQuery),
    responses((status = 200, body = Vec<FailureSummary>))
)]
pub(crate) async fn list_failures(
    State(state): State<AppState>,
    Query(query): Query<FeedQuery>,
) -> Response {
    let store = match build_store(&state) {
        Ok(store) => store,
        Err(err) => return map_error(&err).into_response(),
    };
    let limit = query.limit.unwrap_or(DEFAULT_FEED_LIMIT).min(MAX_FEED_LIMIT);
    let filter = FailureFilter {
        repository: query.repository,
        status: query.status,
        since: None,
        limit: Some(limit),
    };
    match store.failures().list(filter) {
        Ok(failures) => Json(
            failures
                .into_iter()
                .map(FailureSummary::from)
                .collect::<Vec<_>>(),
        )
        .into_response(),
        Err(err) => map_error(&err.into()).into_response(),
    }
}

#[utoipa::path(
    get,
    path = "/api/failures/{id}",
    params(("id" = String, Path, description = "Failure ID")),
    responses((status = 200, body = FailureDetail))
)]
pub(crate) async fn get_failure(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Response {
    let store = match build_store(&state) {
        Ok(store) => store,
        Err(err) => return map_error(&err).into_response(),
    };
    let id = match FailureId::from_str(&id) {
        Ok(id) => id,
        Err(err) => {
            return map_error(&mend_core::error::FailureError::InvalidInput {
                message: err.to_string(),
            }
            .into())
            .into_response()
        }
    };
    let failure = match store.failures().get(&id) {
        Ok(Some(failure)) => failure,
        Ok(None) => {
            return map_error(&mend_core::error::FailureError::NotFound.into()).into_response()
        }
        Err(err) => return map_error(&err.into()).into_response(),
    };
    let analysis = store.analyses().get(&id).unwrap_or(None);
    let decisions = store.decisions().list_for_failure(&id).unwrap_or_default();
    Json(FailureDetail {
        failure: failure.into(),
        analysis,
        decisions,
    })
    .into_response()
}
