use crate::types::ids::{CheckId, FailureId, SnapshotId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Post-remediation verification scheduled after PR open. Resolved once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct HealthCheck {
    pub id: CheckId,
    pub remediation_id: FailureId,
    pub snapshot_id: SnapshotId,
    pub repository: String,
    pub branch: String,
    pub pr_number: u64,
    pub scheduled_at: DateTime<Utc>,
    pub executed_at: Option<DateTime<Utc>>,
    pub passed: Option<bool>,
    pub checks: Vec<CheckResult>,
    pub triggered_rollback: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct CheckResult {
    pub name: String,
    pub passed: bool,
    pub message: String,
}
