use crate::routes::error::map_error;
use crate::{build_store, AppState};
use axum::extract::{Query, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use mend_core::circuit::CircuitRepository;
use mend_core::store::Store;
use serde::Deserialize;
use utoipa::IntoParams;

#[derive(Debug, Deserialize, IntoParams)]
pub struct RepoQuery {
    pub repo: String,
}

#[utoipa::path(
    get,
    path = "/api/repos",
    responses((status = 200, body = Vec<String>))
)]
pub(crate) async fn list_repos(State(state): State<AppState>) -> Response {
    Json(state.config.repositories.clone()).into_response()
}

#[utoipa::path(
    get,
    path = "/api/personality",
    params(RepoQuery),
    responses((status = 200, body = mend_core::types::PersonalityProfile))
)]
pub(crate) async fn get_personality(
    State(state): State<AppState>,
    Query(query): Query<RepoQuery>,
) -> Response {
    let store = match build_store(&state) {
        Ok(store) => store,
        Err(err) => return map_error(&err).into_response(),
    };
    match state.profiler.profile(&store.failures(), &query.repo) {
        Ok(profile) => Json(profile).into_response(),
        Err(err) => map_error(&err.into()).into_response(),
    }
}

#[utoipa::path(
    get,
    path = "/api/circuits",
    responses((status = 200, body = Vec<mend_core::types::CircuitState>))
)]
pub(crate) async fn list_open_circuits(State(state): State<AppState>) -> Response {
    let store = match build_store(&state) {
        Ok(store) => store,
        Err(err) => return map_error(&err).into_response(),
    };
    match store.circuits().list_open() {
        Ok(circuits) => Json(circuits).into_response(),
        Err(err) => map_error(&err.into()).into_response(),
    }
}
