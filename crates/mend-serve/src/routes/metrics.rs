use crate::routes::error::map_error;
use crate::{build_store, AppState};
use axum::extract::State;
use axum::http::header;
use axum::response::{IntoResponse, Response};
use mend_core::circuit::CircuitRepository;
use mend_core::memory::PatternRepository;
use mend_core::store::Store;

/// Text exposition of counters plus the store-derived gauges.
pub(crate) async fn render_metrics(State(state): State<AppState>) -> Response {
    let store = match build_store(&state) {
        Ok(store) => store,
        Err(err) => return map_error(&err).into_response(),
    };
    let circuits_open = store.circuits().count_open().unwrap_or(0);
    let patterns_total = store.patterns().count().unwrap_or(0);
    let body = state.metrics.render(circuits_open, patterns_total);
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        body,
    )
        .into_response()
}
