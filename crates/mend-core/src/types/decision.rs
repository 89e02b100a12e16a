use crate::types::enums::DecisionKind;
use crate::types::ids::{DecisionId, FailureId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// One AI decision in the explainability ledger. Never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct DecisionRecord {
    pub id: DecisionId,
    pub failure_id: FailureId,
    pub kind: DecisionKind,
    pub chosen: String,
    pub alternatives: Vec<Alternative>,
    /// sha256 hex of the prompt context the decision was made against.
    pub context_digest: String,
    pub confidence: f64,
    pub model_id: String,
    pub response_latency_ms: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Alternative {
    pub option: String,
    pub score: f64,
    pub rejection_reason: String,
}
