//! Post-remediation health checks: a small rule set evaluated after the
//! configured delay, deciding whether the fix stands or rolls back.

use crate::error::{HealthError, MendError};
use crate::failures::FailureRepository;
use crate::store::Store;
use crate::types::{CheckId, CheckResult, Failure, HealthCheck};
use crate::vcs::{PrState, RunConclusion, VcsClient};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{info, warn};

pub trait HealthCheckRepository {
    fn insert(&self, check: &HealthCheck) -> Result<(), HealthError>;
    fn get(&self, id: &CheckId) -> Result<Option<HealthCheck>, HealthError>;
    /// Unresolved checks whose scheduled instant has passed.
    fn due(&self, now: DateTime<Utc>) -> Result<Vec<HealthCheck>, HealthError>;
    /// All unresolved checks, for rescheduling after a restart.
    fn unexecuted(&self) -> Result<Vec<HealthCheck>, HealthError>;
    fn resolve(
        &self,
        id: &CheckId,
        executed_at: DateTime<Utc>,
        passed: bool,
        checks: &[CheckResult],
        triggered_rollback: bool,
    ) -> Result<HealthCheck, HealthError>;
}

#[derive(Debug, Clone)]
pub struct HealthOutcome {
    pub passed: bool,
    pub checks: Vec<CheckResult>,
}

pub struct HealthChecker {
    vcs: Arc<dyn VcsClient>,
}

impl HealthChecker {
    pub fn new(vcs: Arc<dyn VcsClient>) -> Self {
        Self { vcs }
    }

    /// Evaluate the rule set for one scheduled check: the latest workflow
    /// conclusion on the target branch, the PR still being open, and no new
    /// failure burst since the remediation.
    pub async fn evaluate<S: Store>(
        &self,
        store: &S,
        check: &HealthCheck,
        failure: &Failure,
    ) -> Result<HealthOutcome, MendError> {
        let mut checks = Vec::new();

        let conclusion = self
            .vcs
            .latest_run_conclusion(&check.repository, &check.branch, &failure.workflow)
            .await;
        checks.push(match conclusion {
            Ok(Some(RunConclusion::Success)) => CheckResult {
                name: "workflow_status".to_string(),
                passed: true,
                message: "latest run on target branch succeeded".to_string(),
            },
            Ok(Some(RunConclusion::Failure)) => CheckResult {
                name: "workflow_status".to_string(),
                passed: false,
                message: "latest run on target branch failed".to_string(),
            },
            Ok(Some(_)) | Ok(None) => CheckResult {
                name: "workflow_status".to_string(),
                passed: true,
                message: "no completed run since remediation".to_string(),
            },
            Err(err) => CheckResult {
                name: "workflow_status".to_string(),
                passed: false,
                message: format!("status lookup failed: {err}"),
            },
        });

        let pr = self.vcs.pr_state(&check.repository, check.pr_number).await;
        checks.push(match pr {
            Ok(PrState::Open) | Ok(PrState::Merged) => CheckResult {
                name: "pr_present".to_string(),
                passed: true,
                message: "remediation PR present".to_string(),
            },
            Ok(PrState::Closed) => CheckResult {
                name: "pr_present".to_string(),
                passed: false,
                message: "remediation PR was closed without merge".to_string(),
            },
            Err(err) => CheckResult {
                name: "pr_present".to_string(),
                passed: false,
                message: format!("PR lookup failed: {err}"),
            },
        });

        // Correlated regressions: new failures on the same repo since the
        // remediation PR opened point at a wider breakage. `updated_at` is
        // the pr_open transition instant, which bounds the whole delay
        // window; `scheduled_at` would only start counting once the check
        // itself was due.
        let remediated_at = failure.updated_at;
        let recent = store
            .failures()
            .stats_window(Some(&check.repository), remediated_at)
            .map_err(MendError::Failure)?;
        let new_failures = recent
            .iter()
            .filter(|stat| stat.detected_at > remediated_at)
            .count();
        checks.push(CheckResult {
            name: "no_regression_burst".to_string(),
            passed: new_failures == 0,
            message: if new_failures == 0 {
                "no new failures since remediation".to_string()
            } else {
                format!("{new_failures} new failure(s) since remediation")
            },
        });

        let passed = checks.iter().all(|check| check.passed);
        if passed {
            info!(check_id = %check.id, "health check passed");
        } else {
            warn!(check_id = %check.id, "health check failed");
        }
        Ok(HealthOutcome { passed, checks })
    }
}
