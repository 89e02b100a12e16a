use crate::types::enums::CircuitPhase;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Persistent state for one failure signature. Never deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct CircuitState {
    pub signature: String,
    pub repository: String,
    pub branch: String,
    pub error_pattern: String,
    pub phase: CircuitPhase,
    pub failure_count: u32,
    pub last_failure_at: Option<DateTime<Utc>>,
    pub opened_at: Option<DateTime<Utc>>,
    pub auto_reset_at: Option<DateTime<Utc>>,
    pub manually_reset_by: Option<String>,
    pub history: Vec<CircuitTransition>,
}

impl CircuitState {
    pub fn new(signature: String, repository: String, branch: String, error_pattern: String) -> Self {
        Self {
            signature,
            repository,
            branch,
            error_pattern,
            phase: CircuitPhase::Closed,
            failure_count: 0,
            last_failure_at: None,
            opened_at: None,
            auto_reset_at: None,
            manually_reset_by: None,
            history: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct CircuitTransition {
    pub from: CircuitPhase,
    pub to: CircuitPhase,
    pub reason: String,
    pub at: DateTime<Utc>,
    pub actor: String,
}
