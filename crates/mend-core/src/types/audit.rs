use crate::types::enums::{AuditAction, AuditOutcome};
use crate::types::ids::{ApprovalId, AuditId, FailureId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;

/// Append-only audit trail entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct AuditEntry {
    pub id: AuditId,
    pub at: DateTime<Utc>,
    pub actor: String,
    pub action: AuditAction,
    pub failure_id: Option<FailureId>,
    pub request_id: Option<ApprovalId>,
    pub outcome: AuditOutcome,
    #[schema(value_type = Object)]
    pub details: Value,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, ToSchema)]
pub struct AuditFilter {
    pub failure_id: Option<FailureId>,
    pub action: Option<AuditAction>,
    pub outcome: Option<AuditOutcome>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub limit: Option<u32>,
}
