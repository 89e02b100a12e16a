use crate::types::enums::ApprovalStatus;
use crate::types::ids::{ApprovalId, FailureId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Escalation checkpoint created when the safety gate denies auto-apply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ApprovalRequest {
    pub id: ApprovalId,
    pub failure_id: FailureId,
    pub repository: String,
    pub pr_number: u64,
    pub required_reviewers: Vec<String>,
    pub environment_name: String,
    pub deployment_id: String,
    pub status: ApprovalStatus,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolved_by: Option<String>,
}
