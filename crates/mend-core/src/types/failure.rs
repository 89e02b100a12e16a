use crate::types::enums::FailureStatus;
use crate::types::ids::FailureId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// A detected CI workflow failure, owned by the orchestrator state machine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Failure {
    pub id: FailureId,
    pub repository: String,
    pub branch: String,
    pub workflow: String,
    pub workflow_run_id: String,
    pub commit_sha: String,
    pub failure_reason: String,
    /// Bounded log tail captured at detection time.
    pub logs: String,
    pub status: FailureStatus,
    /// Human-readable reason attached on terminal transitions.
    pub status_reason: Option<String>,
    pub detected_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Per-failure aggregate row used by the profiler and dashboard stats.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct FailureStat {
    pub repository: String,
    pub category: Option<String>,
    pub status: FailureStatus,
    pub detected_at: DateTime<Utc>,
    pub resolution_ms: Option<i64>,
}

impl FailureStat {
    pub fn remediation_succeeded(&self) -> bool {
        self.status == FailureStatus::Remediated
    }
}
