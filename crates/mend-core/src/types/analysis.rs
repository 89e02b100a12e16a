use crate::types::enums::{Effort, ErrorType};
use crate::types::ids::FailureId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Model-produced classification and remediation plan for one failure.
/// Immutable once stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Analysis {
    pub failure_id: FailureId,
    pub error_type: ErrorType,
    pub category: String,
    /// 0..=10, opaque input to the safety gates.
    pub risk_score: u8,
    /// 0..=100, after personality adjustment.
    pub confidence: u8,
    pub effort: Effort,
    pub proposed_fix: String,
    pub files_to_modify: Vec<String>,
    pub fix_operations: Vec<FixOperation>,
    pub fix_commands: Vec<String>,
    pub reasoning: String,
    pub affected_components: Vec<String>,
    pub model_id: String,
    pub response_latency_ms: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct FixOperation {
    pub path: String,
    pub operation: FixOperationKind,
    pub rationale: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum FixOperationKind {
    Update,
    Create,
}
