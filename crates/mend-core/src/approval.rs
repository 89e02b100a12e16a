//! Approval escalation through the host's review-gated deployment
//! environments, plus a structured PR comment summarizing the analysis.

use crate::clock::Clock;
use crate::config::Config;
use crate::dryrun::DryRunRecorder;
use crate::error::{ApprovalError, MendError};
use crate::types::{
    Analysis, ApprovalId, ApprovalRequest, ApprovalStatus, Failure, FailureId,
};
use crate::vcs::{DeploymentState, VcsClient};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::sync::Arc;
use tracing::{info, warn};

pub const APPROVAL_ENVIRONMENT: &str = "auto-remediation-approval";

pub trait ApprovalRepository {
    fn insert(&self, request: &ApprovalRequest) -> Result<(), ApprovalError>;
    fn get(&self, id: &ApprovalId) -> Result<Option<ApprovalRequest>, ApprovalError>;
    fn get_for_failure(
        &self,
        failure_id: &FailureId,
    ) -> Result<Option<ApprovalRequest>, ApprovalError>;
    fn list_pending(&self) -> Result<Vec<ApprovalRequest>, ApprovalError>;
    fn resolve(
        &self,
        id: &ApprovalId,
        status: ApprovalStatus,
        resolved_at: DateTime<Utc>,
        resolved_by: Option<String>,
    ) -> Result<ApprovalRequest, ApprovalError>;
}

pub struct ApprovalManager {
    vcs: Arc<dyn VcsClient>,
    config: Arc<Config>,
    clock: Arc<dyn Clock>,
    dry_run: Option<Arc<DryRunRecorder>>,
}

impl ApprovalManager {
    pub fn new(
        vcs: Arc<dyn VcsClient>,
        config: Arc<Config>,
        clock: Arc<dyn Clock>,
        dry_run: Option<Arc<DryRunRecorder>>,
    ) -> Self {
        Self {
            vcs,
            config,
            clock,
            dry_run,
        }
    }

    /// Reviewer selection by risk: >=8 two seniors, >=5 one senior, else any
    /// team member. Lists come from config, per-repo overridable.
    pub fn required_reviewers(&self, repository: &str, risk_score: u8) -> Vec<String> {
        let set = self.config.reviewers_for(repository);
        if risk_score >= 8 {
            set.senior.iter().take(2).cloned().collect()
        } else if risk_score >= 5 {
            set.senior.iter().take(1).cloned().collect()
        } else {
            set.team.iter().take(1).cloned().collect()
        }
    }

    /// Create the native approval checkpoint: a deployment into the gated
    /// environment plus a structured PR comment.
    pub async fn create<R: ApprovalRepository>(
        &self,
        approvals: &R,
        failure: &Failure,
        analysis: &Analysis,
        fix_branch: &str,
        pr_number: u64,
        gate_reason: &str,
    ) -> Result<ApprovalRequest, MendError> {
        let reviewers = self.required_reviewers(&failure.repository, analysis.risk_score);
        let description = format!(
            "auto-remediation approval for {} (risk {}/10)",
            failure.repository, analysis.risk_score
        );

        let deployment_id = if let Some(recorder) = &self.dry_run {
            recorder.record(
                "create_deployment",
                &format!("{}@{APPROVAL_ENVIRONMENT}", failure.repository),
                &description,
            );
            format!("dry-run-{pr_number}")
        } else {
            self.vcs
                .create_deployment(
                    &failure.repository,
                    fix_branch,
                    APPROVAL_ENVIRONMENT,
                    &description,
                )
                .await?
        };

        let comment = approval_comment(analysis, gate_reason, &reviewers);
        if let Some(recorder) = &self.dry_run {
            recorder.record(
                "create_pr_comment",
                &format!("{}#{pr_number}", failure.repository),
                &comment,
            );
        } else {
            self.vcs
                .create_pr_comment(&failure.repository, pr_number, &comment)
                .await?;
        }

        let now = self.clock.now();
        let request = ApprovalRequest {
            id: ApprovalId::generate(),
            failure_id: failure.id.clone(),
            repository: failure.repository.clone(),
            pr_number,
            required_reviewers: reviewers,
            environment_name: APPROVAL_ENVIRONMENT.to_string(),
            deployment_id,
            status: ApprovalStatus::Pending,
            created_at: now,
            expires_at: now + ChronoDuration::hours(self.config.approval_timeout_hours as i64),
            resolved_at: None,
            resolved_by: None,
        };
        approvals.insert(&request).map_err(MendError::Approval)?;
        info!(
            request_id = %request.id,
            failure_id = %failure.id,
            pr = pr_number,
            reviewers = request.required_reviewers.len(),
            "approval requested"
        );
        Ok(request)
    }

    /// Poll one pending request: expiry first, then the deployment status.
    /// Resolves the stored record when the state settles.
    pub async fn check<R: ApprovalRepository>(
        &self,
        approvals: &R,
        request: &ApprovalRequest,
    ) -> Result<ApprovalStatus, MendError> {
        if request.status != ApprovalStatus::Pending {
            return Ok(request.status);
        }
        let now = self.clock.now();
        if now >= request.expires_at {
            let resolved = approvals
                .resolve(&request.id, ApprovalStatus::Expired, now, None)
                .map_err(MendError::Approval)?;
            warn!(request_id = %resolved.id, "approval request expired");
            return Ok(ApprovalStatus::Expired);
        }

        let state = self
            .vcs
            .deployment_status(&request.repository, &request.deployment_id)
            .await?;
        let status = match state {
            DeploymentState::Pending => ApprovalStatus::Pending,
            DeploymentState::Approved => ApprovalStatus::Approved,
            DeploymentState::Rejected => ApprovalStatus::Rejected,
        };
        if status != ApprovalStatus::Pending {
            approvals
                .resolve(&request.id, status, now, Some("environment-reviewer".to_string()))
                .map_err(MendError::Approval)?;
            info!(request_id = %request.id, status = ?status, "approval resolved");
        }
        Ok(status)
    }

    /// Startup recovery: pending requests already past expiry resolve to
    /// expired.
    pub fn expire_overdue<R: ApprovalRepository>(
        &self,
        approvals: &R,
    ) -> Result<Vec<ApprovalRequest>, MendError> {
        let now = self.clock.now();
        let mut expired = Vec::new();
        for request in approvals.list_pending().map_err(MendError::Approval)? {
            if now >= request.expires_at {
                let resolved = approvals
                    .resolve(&request.id, ApprovalStatus::Expired, now, None)
                    .map_err(MendError::Approval)?;
                expired.push(resolved);
            }
        }
        Ok(expired)
    }
}

fn approval_comment(analysis: &Analysis, gate_reason: &str, reviewers: &[String]) -> String {
    format!(
        "## Auto-remediation approval required\n\n\
         **Risk score:** {}/10\n\
         **Escalation reason:** {}\n\
         **Required reviewers:** {}\n\n\
         **Analysis:**\n{}\n\n\
         **Proposed fix:**\n{}\n\n\
         Approve the `{APPROVAL_ENVIRONMENT}` deployment to apply this \
         remediation; reject it to discard.\n",
        analysis.risk_score,
        gate_reason,
        if reviewers.is_empty() {
            "team".to_string()
        } else {
            reviewers.join(", ")
        },
        analysis.reasoning,
        analysis.proposed_fix,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ReviewerSet;

    fn manager_with_reviewers() -> ApprovalManager {
        let mut config = Config::default();
        config.reviewers = ReviewerSet {
            senior: vec!["alice".to_string(), "bo".to_string(), "chen".to_string()],
            team: vec!["dana".to_string(), "eli".to_string()],
        };
        let clock = Arc::new(crate::clock::SystemClock);
        let vcs: Arc<dyn VcsClient> = Arc::new(NoopVcs);
        ApprovalManager::new(vcs, Arc::new(config), clock, None)
    }

    struct NoopVcs;

    #[async_trait::async_trait]
    impl VcsClient for NoopVcs {
        async fn list_failed_runs(
            &self,
            _: &str,
            _: u32,
        ) -> Result<Vec<crate::vcs::WorkflowRun>, crate::error::VcsError> {
            Ok(Vec::new())
        }
        async fn run_jobs(
            &self,
            _: &str,
            _: u64,
        ) -> Result<Vec<crate::vcs::RunJob>, crate::error::VcsError> {
            Ok(Vec::new())
        }
        async fn job_logs(&self, _: &str, _: u64) -> Result<String, crate::error::VcsError> {
            Ok(String::new())
        }
        async fn branch_head_sha(&self, _: &str, _: &str) -> Result<String, crate::error::VcsError> {
            Ok("sha".to_string())
        }
        async fn default_branch(&self, _: &str) -> Result<String, crate::error::VcsError> {
            Ok("main".to_string())
        }
        async fn get_file(
            &self,
            _: &str,
            _: &str,
            _: &str,
        ) -> Result<Option<crate::vcs::FileContent>, crate::error::VcsError> {
            Ok(None)
        }
        async fn create_branch(&self, _: &str, _: &str, _: &str) -> Result<(), crate::error::VcsError> {
            Ok(())
        }
        async fn put_file(
            &self,
            _: &str,
            _: &str,
            _: &str,
            _: &str,
            _: &str,
            _: Option<&str>,
        ) -> Result<(), crate::error::VcsError> {
            Ok(())
        }
        async fn create_pull(
            &self,
            _: &str,
            _: &str,
            _: &str,
            head: &str,
            base: &str,
        ) -> Result<crate::vcs::PullRequest, crate::error::VcsError> {
            Ok(crate::vcs::PullRequest {
                number: 1,
                url: String::new(),
                head: head.to_string(),
                base: base.to_string(),
            })
        }
        async fn create_pr_comment(&self, _: &str, _: u64, _: &str) -> Result<(), crate::error::VcsError> {
            Ok(())
        }
        async fn create_deployment(
            &self,
            _: &str,
            _: &str,
            _: &str,
            _: &str,
        ) -> Result<String, crate::error::VcsError> {
            Ok("deploy-1".to_string())
        }
        async fn deployment_status(
            &self,
            _: &str,
            _: &str,
        ) -> Result<crate::vcs::DeploymentState, crate::error::VcsError> {
            Ok(crate::vcs::DeploymentState::Pending)
        }
        async fn latest_run_conclusion(
            &self,
            _: &str,
            _: &str,
            _: &str,
        ) -> Result<Option<crate::vcs::RunConclusion>, crate::error::VcsError> {
            Ok(None)
        }
        async fn pr_state(&self, _: &str, _: u64) -> Result<crate::vcs::PrState, crate::error::VcsError> {
            Ok(crate::vcs::PrState::Open)
        }
    }

    #[test]
    fn reviewer_selection_scales_with_risk() {
        let manager = manager_with_reviewers();
        assert_eq!(
            manager.required_reviewers("x/y", 9),
            vec!["alice".to_string(), "bo".to_string()]
        );
        assert_eq!(manager.required_reviewers("x/y", 8).len(), 2);
        assert_eq!(
            manager.required_reviewers("x/y", 6),
            vec!["alice".to_string()]
        );
        assert_eq!(
            manager.required_reviewers("x/y", 3),
            vec!["dana".to_string()]
        );
    }
}
