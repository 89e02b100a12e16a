//! Source-control hosting client boundary. Adapters translate transport
//! errors into `VcsError` here; the control loop never sees raw HTTP.

use crate::error::VcsError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowRun {
    pub id: u64,
    pub workflow: String,
    pub head_branch: String,
    pub head_sha: String,
    pub conclusion: Option<RunConclusion>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunConclusion {
    Success,
    Failure,
    Cancelled,
    Other,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunJob {
    pub id: u64,
    pub name: String,
    pub conclusion: Option<RunConclusion>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileContent {
    pub path: String,
    pub content: String,
    /// Blob sha required by the contents API for updates.
    pub sha: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PullRequest {
    pub number: u64,
    pub url: String,
    pub head: String,
    pub base: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrState {
    Open,
    Closed,
    Merged,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentState {
    Pending,
    Approved,
    Rejected,
}

#[async_trait]
pub trait VcsClient: Send + Sync {
    async fn list_failed_runs(
        &self,
        repository: &str,
        per_page: u32,
    ) -> Result<Vec<WorkflowRun>, VcsError>;

    async fn run_jobs(&self, repository: &str, run_id: u64) -> Result<Vec<RunJob>, VcsError>;

    /// Logs for one job. `VcsError::LogsExpired` when the host has dropped
    /// them (410 Gone).
    async fn job_logs(&self, repository: &str, job_id: u64) -> Result<String, VcsError>;

    async fn branch_head_sha(&self, repository: &str, branch: &str) -> Result<String, VcsError>;

    async fn default_branch(&self, repository: &str) -> Result<String, VcsError>;

    async fn get_file(
        &self,
        repository: &str,
        path: &str,
        reference: &str,
    ) -> Result<Option<FileContent>, VcsError>;

    async fn create_branch(
        &self,
        repository: &str,
        branch: &str,
        from_sha: &str,
    ) -> Result<(), VcsError>;

    /// Create or update a file on a branch with a commit message. `sha` is
    /// the current blob sha for updates, `None` for creation.
    async fn put_file(
        &self,
        repository: &str,
        path: &str,
        content: &str,
        message: &str,
        branch: &str,
        sha: Option<&str>,
    ) -> Result<(), VcsError>;

    async fn create_pull(
        &self,
        repository: &str,
        title: &str,
        body: &str,
        head: &str,
        base: &str,
    ) -> Result<PullRequest, VcsError>;

    async fn create_pr_comment(
        &self,
        repository: &str,
        pr_number: u64,
        body: &str,
    ) -> Result<(), VcsError>;

    async fn create_deployment(
        &self,
        repository: &str,
        reference: &str,
        environment: &str,
        description: &str,
    ) -> Result<String, VcsError>;

    async fn deployment_status(
        &self,
        repository: &str,
        deployment_id: &str,
    ) -> Result<DeploymentState, VcsError>;

    async fn latest_run_conclusion(
        &self,
        repository: &str,
        branch: &str,
        workflow: &str,
    ) -> Result<Option<RunConclusion>, VcsError>;

    async fn pr_state(&self, repository: &str, pr_number: u64) -> Result<PrState, VcsError>;
}
