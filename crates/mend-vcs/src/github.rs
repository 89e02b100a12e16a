//! GitHub REST adapter. Transport errors are translated to `VcsError` at
//! this boundary; nothing above sees reqwest.

use crate::types::{
    ApiContent, ApiDeployment, ApiDeploymentStatus, ApiJob, ApiPull, ApiRef, ApiRepository,
    ApiWorkflowRun, JobsPage, RunsPage,
};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use mend_core::error::VcsError;
use mend_core::vcs::{
    DeploymentState, FileContent, PrState, PullRequest, RunConclusion, RunJob, VcsClient,
    WorkflowRun,
};
use reqwest::{Client, Response, StatusCode};
use serde_json::json;
use std::time::Duration;
use tracing::{debug, warn};

const API_BASE: &str = "https://api.github.com";
const USER_AGENT: &str = "mend-ci-monitor";
/// Per-call deadline for VCS operations.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(20);

pub struct GithubClient {
    http: Client,
    base_url: String,
    token: String,
}

impl GithubClient {
    pub fn new(token: String) -> Result<Self, VcsError> {
        Self::with_base_url(token, API_BASE.to_string())
    }

    pub fn with_base_url(token: String, base_url: String) -> Result<Self, VcsError> {
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|err| VcsError::Network {
                message: err.to_string(),
            })?;
        Ok(Self {
            http,
            base_url,
            token,
        })
    }

    /// One authenticated round trip to `/user`; fails fast on a bad token.
    pub async fn verify_authentication(&self) -> Result<(), VcsError> {
        let response = self
            .http
            .get(format!("{}/user", self.base_url))
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(map_transport)?;
        check_status(&response)?;
        debug!("github authentication verified");
        Ok(())
    }

    async fn get(&self, path: &str) -> Result<Response, VcsError> {
        let response = self
            .http
            .get(format!("{}{path}", self.base_url))
            .bearer_auth(&self.token)
            .header("Accept", "application/vnd.github.v3+json")
            .send()
            .await
            .map_err(map_transport)?;
        check_status(&response)?;
        Ok(response)
    }

    async fn send_json(
        &self,
        method: reqwest::Method,
        path: &str,
        body: serde_json::Value,
    ) -> Result<Response, VcsError> {
        let response = self
            .http
            .request(method, format!("{}{path}", self.base_url))
            .bearer_auth(&self.token)
            .header("Accept", "application/vnd.github.v3+json")
            .json(&body)
            .send()
            .await
            .map_err(map_transport)?;
        check_status(&response)?;
        Ok(response)
    }

    async fn decode<T: serde::de::DeserializeOwned>(response: Response) -> Result<T, VcsError> {
        response.json().await.map_err(|err| VcsError::Upstream {
            status: 200,
            message: format!("malformed response body: {err}"),
        })
    }
}

fn map_transport(err: reqwest::Error) -> VcsError {
    if err.is_timeout() {
        VcsError::Timeout
    } else {
        VcsError::Network {
            message: err.to_string(),
        }
    }
}

fn check_status(response: &Response) -> Result<(), VcsError> {
    let status = response.status();
    if status.is_success() {
        return Ok(());
    }
    match status {
        StatusCode::UNAUTHORIZED => Err(VcsError::AuthRejected),
        StatusCode::FORBIDDEN | StatusCode::TOO_MANY_REQUESTS => {
            let reset_after_secs = response
                .headers()
                .get("x-ratelimit-reset")
                .and_then(|value| value.to_str().ok())
                .and_then(|value| value.parse::<i64>().ok())
                .map(|reset| {
                    let now = chrono::Utc::now().timestamp();
                    (reset - now).max(1) as u64
                })
                .unwrap_or(60);
            Err(VcsError::RateLimited { reset_after_secs })
        }
        StatusCode::NOT_FOUND => Err(VcsError::NotFound {
            what: response.url().path().to_string(),
        }),
        StatusCode::GONE => Err(VcsError::LogsExpired {
            run_id: response.url().path().to_string(),
        }),
        other => Err(VcsError::Upstream {
            status: other.as_u16(),
            message: other.canonical_reason().unwrap_or("upstream error").to_string(),
        }),
    }
}

fn map_conclusion(raw: Option<&str>) -> Option<RunConclusion> {
    raw.map(|value| match value {
        "success" => RunConclusion::Success,
        "failure" => RunConclusion::Failure,
        "cancelled" => RunConclusion::Cancelled,
        _ => RunConclusion::Other,
    })
}

fn map_run(run: ApiWorkflowRun) -> WorkflowRun {
    WorkflowRun {
        id: run.id,
        workflow: run.name.unwrap_or_else(|| "unknown".to_string()),
        head_branch: run.head_branch.unwrap_or_else(|| "unknown".to_string()),
        head_sha: run.head_sha.unwrap_or_default(),
        conclusion: map_conclusion(run.conclusion.as_deref()),
        created_at: run.created_at,
    }
}

fn map_job(job: ApiJob) -> RunJob {
    RunJob {
        id: job.id,
        conclusion: map_conclusion(job.conclusion.as_deref()),
        name: job.name,
    }
}

#[async_trait]
impl VcsClient for GithubClient {
    async fn list_failed_runs(
        &self,
        repository: &str,
        per_page: u32,
    ) -> Result<Vec<WorkflowRun>, VcsError> {
        let response = self
            .get(&format!(
                "/repos/{repository}/actions/runs?status=failure&per_page={per_page}"
            ))
            .await?;
        let page: RunsPage = Self::decode(response).await?;
        Ok(page.workflow_runs.into_iter().map(map_run).collect())
    }

    async fn run_jobs(&self, repository: &str, run_id: u64) -> Result<Vec<RunJob>, VcsError> {
        let response = self
            .get(&format!("/repos/{repository}/actions/runs/{run_id}/jobs"))
            .await?;
        let page: JobsPage = Self::decode(response).await?;
        Ok(page.jobs.into_iter().map(map_job).collect())
    }

    async fn job_logs(&self, repository: &str, job_id: u64) -> Result<String, VcsError> {
        let response = match self
            .get(&format!("/repos/{repository}/actions/jobs/{job_id}/logs"))
            .await
        {
            Ok(response) => response,
            // The host drops logs after retention; tolerate both signals.
            Err(VcsError::NotFound { .. }) => return Ok(String::new()),
            Err(VcsError::LogsExpired { .. }) => {
                return Err(VcsError::LogsExpired {
                    run_id: job_id.to_string(),
                })
            }
            Err(err) => return Err(err),
        };
        response.text().await.map_err(map_transport)
    }

    async fn branch_head_sha(&self, repository: &str, branch: &str) -> Result<String, VcsError> {
        let response = self
            .get(&format!("/repos/{repository}/git/refs/heads/{branch}"))
            .await?;
        let reference: ApiRef = Self::decode(response).await?;
        Ok(reference.object.sha)
    }

    async fn default_branch(&self, repository: &str) -> Result<String, VcsError> {
        let response = self.get(&format!("/repos/{repository}")).await?;
        let repo: ApiRepository = Self::decode(response).await?;
        Ok(repo.default_branch)
    }

    async fn get_file(
        &self,
        repository: &str,
        path: &str,
        reference: &str,
    ) -> Result<Option<FileContent>, VcsError> {
        let response = match self
            .get(&format!("/repos/{repository}/contents/{path}?ref={reference}"))
            .await
        {
            Ok(response) => response,
            Err(VcsError::NotFound { .. }) => return Ok(None),
            Err(err) => return Err(err),
        };
        let content: ApiContent = Self::decode(response).await?;
        if content.kind != "file" {
            return Ok(None);
        }
        let raw = content.content.unwrap_or_default().replace(['\n', ' '], "");
        let bytes = BASE64.decode(raw).map_err(|err| VcsError::Upstream {
            status: 200,
            message: format!("undecodable file content: {err}"),
        })?;
        let text = String::from_utf8(bytes).map_err(|err| VcsError::Upstream {
            status: 200,
            message: format!("non-utf8 file content: {err}"),
        })?;
        Ok(Some(FileContent {
            path: content.path,
            content: text,
            sha: content.sha,
        }))
    }

    async fn create_branch(
        &self,
        repository: &str,
        branch: &str,
        from_sha: &str,
    ) -> Result<(), VcsError> {
        self.send_json(
            reqwest::Method::POST,
            &format!("/repos/{repository}/git/refs"),
            json!({
                "ref": format!("refs/heads/{branch}"),
                "sha": from_sha,
            }),
        )
        .await?;
        debug!(repository, branch, from_sha, "branch created");
        Ok(())
    }

    async fn put_file(
        &self,
        repository: &str,
        path: &str,
        content: &str,
        message: &str,
        branch: &str,
        sha: Option<&str>,
    ) -> Result<(), VcsError> {
        let mut body = json!({
            "message": message,
            "content": BASE64.encode(content.as_bytes()),
            "branch": branch,
        });
        if let Some(sha) = sha {
            body["sha"] = json!(sha);
        }
        self.send_json(
            reqwest::Method::PUT,
            &format!("/repos/{repository}/contents/{path}"),
            body,
        )
        .await?;
        debug!(repository, path, branch, "file written");
        Ok(())
    }

    async fn create_pull(
        &self,
        repository: &str,
        title: &str,
        body: &str,
        head: &str,
        base: &str,
    ) -> Result<PullRequest, VcsError> {
        let response = self
            .send_json(
                reqwest::Method::POST,
                &format!("/repos/{repository}/pulls"),
                json!({
                    "title": title,
                    "body": body,
                    "head": head,
                    "base": base,
                }),
            )
            .await?;
        let pull: ApiPull = Self::decode(response).await?;
        Ok(PullRequest {
            number: pull.number,
            url: pull.html_url,
            head: pull.head.reference,
            base: pull.base.reference,
        })
    }

    async fn create_pr_comment(
        &self,
        repository: &str,
        pr_number: u64,
        body: &str,
    ) -> Result<(), VcsError> {
        self.send_json(
            reqwest::Method::POST,
            &format!("/repos/{repository}/issues/{pr_number}/comments"),
            json!({ "body": body }),
        )
        .await?;
        Ok(())
    }

    async fn create_deployment(
        &self,
        repository: &str,
        reference: &str,
        environment: &str,
        description: &str,
    ) -> Result<String, VcsError> {
        let response = self
            .send_json(
                reqwest::Method::POST,
                &format!("/repos/{repository}/deployments"),
                json!({
                    "ref": reference,
                    "environment": environment,
                    "description": description,
                    "auto_merge": false,
                    "required_contexts": [],
                }),
            )
            .await?;
        let deployment: ApiDeployment = Self::decode(response).await?;
        Ok(deployment.id.to_string())
    }

    async fn deployment_status(
        &self,
        repository: &str,
        deployment_id: &str,
    ) -> Result<DeploymentState, VcsError> {
        let response = self
            .get(&format!(
                "/repos/{repository}/deployments/{deployment_id}/statuses"
            ))
            .await?;
        let statuses: Vec<ApiDeploymentStatus> = Self::decode(response).await?;
        // Statuses come newest-first; the latest decides.
        let state = match statuses.first().map(|status| status.state.as_str()) {
            Some("success") => DeploymentState::Approved,
            Some("failure") | Some("error") => DeploymentState::Rejected,
            Some(other) => {
                warn!(other, "unrecognized deployment state, treating as pending");
                DeploymentState::Pending
            }
            None => DeploymentState::Pending,
        };
        Ok(state)
    }

    async fn latest_run_conclusion(
        &self,
        repository: &str,
        branch: &str,
        workflow: &str,
    ) -> Result<Option<RunConclusion>, VcsError> {
        let response = self
            .get(&format!(
                "/repos/{repository}/actions/runs?branch={branch}&per_page=10"
            ))
            .await?;
        let page: RunsPage = Self::decode(response).await?;
        Ok(page
            .workflow_runs
            .into_iter()
            .filter(|run| run.name.as_deref() == Some(workflow))
            .find_map(|run| map_conclusion(run.conclusion.as_deref())))
    }

    async fn pr_state(&self, repository: &str, pr_number: u64) -> Result<PrState, VcsError> {
        let response = self
            .get(&format!("/repos/{repository}/pulls/{pr_number}"))
            .await?;
        let pull: ApiPull = Self::decode(response).await?;
        Ok(if pull.merged_at.is_some() {
            PrState::Merged
        } else if pull.state == "open" {
            PrState::Open
        } else {
            PrState::Closed
        })
    }
}
