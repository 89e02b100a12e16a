use crate::routes::error::map_error;
use crate::{build_store, AppState};
use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{Duration as ChronoDuration, Utc};
use mend_core::circuit::CircuitRepository;
use mend_core::classify::AnalysisRepository;
use mend_core::failures::FailureRepository;
use mend_core::memory::PatternRepository;
use mend_core::store::Store;
use mend_core::types::FailureStatus;
use serde::Serialize;
use utoipa::ToSchema;

#[derive(Debug, Serialize, ToSchema)]
pub struct DashboardStats {
    pub failures_24h: u64,
    pub success_rate_24h: f64,
    pub active_remediations: usize,
    pub open_circuits: u64,
    pub patterns_learned: u64,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct RiskDistribution {
    pub buckets: Vec<RiskBucket>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct RiskBucket {
    pub risk_score: u8,
    pub count: u64,
}

#[utoipa::path(
    get,
    path = "/api/stats",
    responses((status = 200, body = DashboardStats))
)]
pub(crate) async fn get_stats(State(state): State<AppState>) -> Response {
    let store = match build_store(&state) {
        Ok(store) => store,
        Err(err) => return map_error(&err).into_response(),
    };
    let since = Utc::now() - ChronoDuration::hours(24);

    let failures_24h = match store.failures().count_since(since) {
        Ok(count) => count,
        Err(err) => return map_error(&err.into()).into_response(),
    };
    let stats = match store.failures().stats_window(None, since) {
        Ok(stats) => stats,
        Err(err) => return map_error(&err.into()).into_response(),
    };
    let terminal = stats.iter().filter(|s| s.status.is_terminal()).count();
    let remediated = stats.iter().filter(|s| s.remediation_succeeded()).count();
    let active = stats
        .iter()
        .filter(|s| s.status == FailureStatus::PrOpen)
        .count();
    let open_circuits = match store.circuits().count_open() {
        Ok(count) => count,
        Err(err) => return map_error(&err.into()).into_response(),
    };
    let patterns_learned = match store.patterns().count() {
        Ok(count) => count,
        Err(err) => return map_error(&err.into()).into_response(),
    };

    Json(DashboardStats {
        failures_24h,
        success_rate_24h: if terminal == 0 {
            0.0
        } else {
            remediated as f64 / terminal as f64
        },
        active_remediations: active,
        open_circuits,
        patterns_learned,
    })
    .into_response()
}

#[utoipa::path(
    get,
    path = "/api/risk-distribution",
    responses((status = 200, body = RiskDistribution))
)]
pub(crate) async fn get_risk_distribution(State(state): State<AppState>) -> Response {
    let store = match build_store(&state) {
        Ok(store) => store,
        Err(err) => return map_error(&err).into_response(),
    };
    match store.analyses().risk_distribution() {
        Ok(distribution) => Json(RiskDistribution {
            buckets: distribution
                .into_iter()
                .map(|(risk_score, count)| RiskBucket { risk_score, count })
                .collect(),
        })
        .into_response(),
        Err(err) => map_error(&err.into()).into_response(),
    }
}
