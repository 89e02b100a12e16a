//! Wire shapes for the subset of the GitHub REST v3 API the monitor uses.

use chrono::{DateTime, Utc};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct RunsPage {
    #[serde(default)]
    pub workflow_runs: Vec<ApiWorkflowRun>,
}

#[derive(Debug, Deserialize)]
pub struct ApiWorkflowRun {
    pub id: u64,
    pub name: Option<String>,
    pub head_branch: Option<String>,
    pub head_sha: Option<String>,
    pub conclusion: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct JobsPage {
    #[serde(default)]
    pub jobs: Vec<ApiJob>,
}

#[derive(Debug, Deserialize)]
pub struct ApiJob {
    pub id: u64,
    pub name: String,
    pub conclusion: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ApiRef {
    pub object: ApiRefObject,
}

#[derive(Debug, Deserialize)]
pub struct ApiRefObject {
    pub sha: String,
}

#[derive(Debug, Deserialize)]
pub struct ApiRepository {
    pub default_branch: String,
}

#[derive(Debug, Deserialize)]
pub struct ApiContent {
    #[serde(rename = "type")]
    pub kind: String,
    pub content: Option<String>,
    pub sha: String,
    pub path: String,
}

#[derive(Debug, Deserialize)]
pub struct ApiPull {
    pub number: u64,
    pub html_url: String,
    pub state: String,
    pub merged_at: Option<DateTime<Utc>>,
    pub head: ApiPullRef,
    pub base: ApiPullRef,
}

#[derive(Debug, Deserialize)]
pub struct ApiPullRef {
    #[serde(rename = "ref")]
    pub reference: String,
}

#[derive(Debug, Deserialize)]
pub struct ApiDeployment {
    pub id: u64,
}

#[derive(Debug, Deserialize)]
pub struct ApiDeploymentStatus {
    pub state: String,
}
