pub mod audit;
pub mod error;
pub mod failures;
pub mod metrics;
pub mod repos;
pub mod stats;

use crate::AppState;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics::render_metrics))
        .route("/api/stats", get(stats::get_stats))
        .route("/api/risk-distribution", get(stats::get_risk_distribution))
        .route("/api/failures", get(failures::list_failures))
        .route("/api/failures/:id", get(failures::get_failure))
        .route("/api/audit", get(audit::get_audit_trail))
        .route("/api/repos", get(repos::list_repos))
        .route("/api/personality", get(repos::get_personality))
        .route("/api/circuits", get(repos::list_open_circuits))
        .with_state(state)
}

async fn healthz() -> Json<serde_json::Value> {
    Json(json!({"status": "ok"}))
}
