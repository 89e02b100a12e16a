use crate::types::enums::EmbeddingFamily;
use crate::types::ids::PatternId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// A stored (failure -> fix) example retrieved by similarity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Pattern {
    pub id: PatternId,
    pub repository: String,
    pub branch: String,
    pub failure_reason: String,
    pub category: String,
    /// Normalized with the circuit breaker's scheme before embedding.
    pub error_signature: String,
    pub proposed_fix: String,
    pub files_modified: Vec<String>,
    pub fix_commands: Vec<String>,
    pub fix_successful: bool,
    pub risk_score: u8,
    pub resolution_time_ms: i64,
    #[schema(value_type = Vec<f32>)]
    pub embedding: Vec<f32>,
    pub embedding_family: EmbeddingFamily,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct PatternMatch {
    pub pattern: Pattern,
    pub similarity: f32,
}
