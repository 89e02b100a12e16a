use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::routes::stats::get_stats,
        crate::routes::stats::get_risk_distribution,
        crate::routes::failures::list_failures,
        crate::routes::failures::get_failure,
        crate::routes::audit::get_audit_trail,
        crate::routes::repos::list_repos,
        crate::routes::repos::get_personality,
        crate::routes::repos::list_open_circuits,
    ),
    components(schemas(
        crate::routes::stats::DashboardStats,
        crate::routes::stats::RiskDistribution,
        crate::routes::stats::RiskBucket,
        crate::routes::failures::FailureSummary,
        crate::routes::failures::FailureDetail,
        mend_core::types::AuditEntry,
        mend_core::types::CircuitState,
        mend_core::types::PersonalityProfile,
    ))
)]
pub struct ApiDoc;

pub fn generate_spec() -> String {
    ApiDoc::openapi()
        .to_pretty_json()
        .unwrap_or_else(|_| "{}".to_string())
}
