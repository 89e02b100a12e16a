use crate::types::enums::FailureStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewFailure {
    pub repository: String,
    pub branch: String,
    pub workflow: String,
    pub workflow_run_id: String,
    pub commit_sha: String,
    pub failure_reason: String,
    pub logs: String,
    pub detected_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, ToSchema)]
pub struct FailureFilter {
    pub repository: Option<String>,
    pub status: Option<FailureStatus>,
    pub since: Option<DateTime<Utc>>,
    pub limit: Option<u32>,
}
