//! The control loop driver. Carries each failure through
//! detect -> classify -> gate -> propose -> apply -> verify -> rollback,
//! owning nothing but sequencing, transitions, and error translation.

use crate::approval::{ApprovalManager, ApprovalRepository};
use crate::audit::{AuditEvent, AuditRepository};
use crate::circuit::CircuitBreaker;
use crate::classify::{AnalysisRepository, Classifier};
use crate::clock::Clock;
use crate::config::Config;
use crate::decisions::{DecisionBuilder, DecisionRepository};
use crate::dryrun::DryRunRecorder;
use crate::error::MendError;
use crate::executor::Executor;
use crate::failures::{validate_transition, FailureRepository};
use crate::gate::{SafetyGate, Verdict};
use crate::health::{HealthChecker, HealthCheckRepository};
use crate::llm::ModelClient;
use crate::memory::{NewPattern, PatternMemory};
use crate::metrics::MetricsRegistry;
use crate::notify::{Notification, NotificationKind, Notifier};
use crate::personality::PersonalityProfiler;
use crate::signature::FailureSignature;
use crate::snapshot::{SnapshotManager, SnapshotRepository};
use crate::store::Store;
use crate::types::{
    Analysis, ApprovalStatus, AuditAction, AuditOutcome, DecisionKind, Failure, FailureId,
    FailureStatus, HealthCheck,
};
use crate::vcs::VcsClient;
use serde_json::json;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Shared handles the engine is assembled from. All are cheap clones.
#[derive(Clone)]
pub struct EngineDeps {
    pub config: Arc<Config>,
    pub clock: Arc<dyn Clock>,
    pub vcs: Arc<dyn VcsClient>,
    pub model: Arc<dyn ModelClient>,
    pub notifier: Arc<dyn Notifier>,
    pub breaker: Arc<CircuitBreaker>,
    pub memory: Arc<PatternMemory>,
    pub profiler: Arc<PersonalityProfiler>,
    pub metrics: Arc<MetricsRegistry>,
    pub dry_run: Option<Arc<DryRunRecorder>>,
}

pub struct Engine<S: Store> {
    store: S,
    deps: EngineDeps,
    classifier: Classifier,
    gate: SafetyGate,
    executor: Executor,
    health: HealthChecker,
    approvals: ApprovalManager,
    snapshots: Arc<SnapshotManager>,
}

impl<S: Store> Engine<S> {
    pub fn new(store: S, deps: EngineDeps) -> Self {
        let snapshots = Arc::new(SnapshotManager::new(
            deps.vcs.clone(),
            deps.clock.clone(),
            deps.config.snapshot_retention_days,
            deps.dry_run.clone(),
        ));
        let classifier = Classifier::new(
            deps.model.clone(),
            deps.memory.clone(),
            deps.profiler.clone(),
            deps.clock.clone(),
        );
        let gate = SafetyGate::new(deps.config.clone());
        let executor = Executor::new(
            deps.vcs.clone(),
            deps.model.clone(),
            snapshots.clone(),
            deps.clock.clone(),
            deps.dry_run.clone(),
            deps.config.health_check_delay_minutes,
        );
        let health = HealthChecker::new(deps.vcs.clone());
        let approvals = ApprovalManager::new(
            deps.vcs.clone(),
            deps.config.clone(),
            deps.clock.clone(),
            deps.dry_run.clone(),
        );
        Self {
            store,
            deps,
            classifier,
            gate,
            executor,
            health,
            approvals,
            snapshots,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn snapshots(&self) -> &SnapshotManager {
        &self.snapshots
    }

    /// Startup recovery: warm the pattern index, expire overdue approvals,
    /// and report unexecuted health checks back into the schedule.
    pub async fn recover(&self) -> Result<(), MendError> {
        let warmed = self.deps.memory.warm(&self.store.patterns())?;
        let expired = self.approvals.expire_overdue(&self.store.approvals())?;
        for request in &expired {
            self.audit(
                AuditEvent::new("approval", AuditAction::Approval, AuditOutcome::Failure)
                    .failure(&request.failure_id)
                    .request(&request.id)
                    .details(json!({"reason": "expired while offline"})),
            );
            if let Ok(Some(failure)) = self.store.failures().get(&request.failure_id) {
                if !failure.status.is_terminal() {
                    let _ = self.transition(&failure, FailureStatus::Failed, "approval_expired");
                }
            }
        }
        let pending_checks = self.store.health_checks().unexecuted()?;
        info!(
            patterns = warmed,
            expired_approvals = expired.len(),
            pending_health_checks = pending_checks.len(),
            "startup recovery complete"
        );
        Ok(())
    }

    /// Drive one failure from detection to its next resting state. Callers
    /// hold the per-repository lock; this method never runs concurrently for
    /// the same repository.
    pub async fn process_failure(&self, id: &FailureId) -> Result<FailureStatus, MendError> {
        let failure = self
            .store
            .failures()
            .get(id)?
            .ok_or(crate::error::FailureError::NotFound)?;
        if failure.status.is_terminal() {
            return Ok(failure.status);
        }
        if failure.status == FailureStatus::Detected {
            self.deps.metrics.failures_detected.inc();
        }

        // Circuit accounting happens before any model call: every observed
        // failure counts toward the signature, and an open circuit stops the
        // pipeline here.
        let signature = FailureSignature::new(
            &failure.repository,
            &failure.branch,
            &failure.failure_reason,
        );
        let outcome = self
            .deps
            .breaker
            .record_failure(&self.store.circuits(), &signature)
            .await?;
        if outcome.opened {
            self.notify(
                NotificationKind::Critical,
                &failure,
                "Circuit opened",
                &format!(
                    "Auto-remediation frozen for `{}`#`{}` until {} ({} consecutive failures).",
                    failure.repository,
                    failure.branch,
                    outcome
                        .state
                        .auto_reset_at
                        .map(|at| at.to_rfc3339())
                        .unwrap_or_default(),
                    outcome.state.failure_count,
                ),
            )
            .await;
        }
        if !self
            .deps
            .breaker
            .is_allowed(&self.store.circuits(), &signature)
            .await?
        {
            self.audit(
                AuditEvent::new("safety_gate", AuditAction::Validation, AuditOutcome::Failure)
                    .failure(&failure.id)
                    .details(json!({"gate": "circuit", "reason": "circuit_open"})),
            );
            let updated = self.transition(&failure, FailureStatus::Failed, "circuit_open")?;
            return Ok(updated.status);
        }

        // Classification.
        let analysis = match self.classifier.classify(&self.store, &failure).await {
            Ok(analysis) => analysis,
            Err(err) => {
                error!(failure_id = %failure.id, error = %err, "classification failed");
                self.audit(
                    AuditEvent::new("classifier", AuditAction::Error, AuditOutcome::Failure)
                        .failure(&failure.id)
                        .error(err.to_string()),
                );
                let updated = self.transition(
                    &failure,
                    FailureStatus::Failed,
                    &format!("classification error: {err}"),
                )?;
                return Ok(updated.status);
            }
        };
        self.deps
            .metrics
            .llm_latency_ms
            .observe(analysis.response_latency_ms.max(0) as u64);
        self.audit(
            AuditEvent::new("classifier", AuditAction::Analysis, AuditOutcome::Success)
                .failure(&failure.id)
                .details(json!({
                    "error_type": analysis.error_type,
                    "category": analysis.category,
                    "risk_score": analysis.risk_score,
                    "confidence": analysis.confidence,
                })),
        );
        let failure = self.transition(&failure, FailureStatus::Analyzed, "classified")?;

        match analysis.error_type {
            crate::types::ErrorType::Developer => {
                self.handle_developer_issue(&failure, &analysis).await
            }
            crate::types::ErrorType::Devops => self.handle_devops_issue(&failure, &analysis).await,
        }
    }

    /// Developer issues route to notification, never to a PR.
    async fn handle_developer_issue(
        &self,
        failure: &Failure,
        analysis: &Analysis,
    ) -> Result<FailureStatus, MendError> {
        let failure = self.transition(failure, FailureStatus::Gated, "developer issue")?;
        self.audit(
            AuditEvent::new("safety_gate", AuditAction::Validation, AuditOutcome::Success)
                .failure(&failure.id)
                .details(json!({"route": "developer_notification"})),
        );

        self.notify(
            NotificationKind::Analysis,
            &failure,
            "Developer issue detected",
            &format!(
                "Repository: {}\nBranch: {}\nCategory: {}\nConfidence: {}%\nReason: {}\nSuggested fix: {}",
                failure.repository,
                failure.branch,
                analysis.category,
                analysis.confidence,
                failure.failure_reason,
                analysis.proposed_fix,
            ),
        )
        .await;
        self.audit(
            AuditEvent::new("notifier", AuditAction::Notification, AuditOutcome::Success)
                .failure(&failure.id)
                .details(json!({"kind": "analysis"})),
        );

        let updated = self.transition(&failure, FailureStatus::DeveloperNotified, "developer notified")?;
        Ok(updated.status)
    }

    async fn handle_devops_issue(
        &self,
        failure: &Failure,
        analysis: &Analysis,
    ) -> Result<FailureStatus, MendError> {
        let decision = self
            .gate
            .evaluate(&self.store.circuits(), &self.deps.breaker, failure, analysis)
            .await?;

        let risk_decision = DecisionBuilder::new(
            failure.id.clone(),
            DecisionKind::RiskAssessment,
            format!("{:?}", decision.verdict).to_lowercase(),
        )
        .context(&decision.reason())
        .confidence(f64::from(analysis.confidence) / 100.0)
        .model(&analysis.model_id, analysis.response_latency_ms)
        .build(self.deps.clock.now());
        self.store.decisions().append(risk_decision)?;

        self.audit(
            AuditEvent::new(
                "safety_gate",
                AuditAction::Validation,
                if decision.verdict == Verdict::Block {
                    AuditOutcome::Failure
                } else {
                    AuditOutcome::Success
                },
            )
            .failure(&failure.id)
            .details(json!({
                "verdict": decision.verdict,
                "simulated": decision.simulated,
                "outcomes": decision.outcomes,
                "blast_score": decision.blast.as_ref().map(|b| b.score),
            })),
        );

        let failure = self.transition(failure, FailureStatus::Gated, &decision.reason())?;

        if decision.verdict == Verdict::Block {
            let updated = self.transition(&failure, FailureStatus::Failed, &decision.reason())?;
            return Ok(updated.status);
        }

        // Propose: snapshot, branch, edits, PR. Both the auto and approval
        // paths materialize the PR; approval merely gates the transition.
        let prepared = match self.executor.prepare(&self.store, &failure, analysis).await {
            Ok(prepared) => prepared,
            Err(err) => {
                error!(failure_id = %failure.id, error = %err, "remediation failed");
                self.audit(
                    AuditEvent::new("executor", AuditAction::Remediation, AuditOutcome::Failure)
                        .failure(&failure.id)
                        .error(err.to_string()),
                );
                self.notify(
                    NotificationKind::RemediationResult,
                    &failure,
                    "Remediation failed",
                    &format!("Could not prepare a fix for `{}`: {err}", failure.repository),
                )
                .await;
                let updated = self.transition(
                    &failure,
                    FailureStatus::Failed,
                    &format!("remediation error: {err}"),
                )?;
                return Ok(updated.status);
            }
        };

        if decision.simulated {
            // Dry run: everything above was intercepted; finish the walk so
            // the failure still reaches a terminal state.
            let failure = self.transition(&failure, FailureStatus::PrOpen, "simulated")?;
            let updated =
                self.transition(&failure, FailureStatus::Remediated, "dry_run simulation")?;
            self.audit(
                AuditEvent::new("executor", AuditAction::Remediation, AuditOutcome::Success)
                    .failure(&updated.id)
                    .details(json!({"simulated": true, "files": prepared.files_changed})),
            );
            return Ok(updated.status);
        }

        match decision.verdict {
            Verdict::AutoApply => {
                let failure = self.transition(&failure, FailureStatus::PrOpen, "pr opened")?;
                self.deps.metrics.remediations_opened.inc();
                self.executor.schedule_health_check(
                    &self.store,
                    &failure,
                    &prepared.snapshot.id,
                    prepared.pull_request.number,
                )?;
                self.audit(
                    AuditEvent::new("executor", AuditAction::Remediation, AuditOutcome::Pending)
                        .failure(&failure.id)
                        .details(json!({
                            "pr_url": prepared.pull_request.url,
                            "fix_branch": prepared.fix_branch,
                            "files": prepared.files_changed,
                        })),
                );
                self.notify(
                    NotificationKind::RemediationResult,
                    &failure,
                    "Fix PR opened",
                    &format!(
                        "Opened {} against `{}` (category `{}`, risk {}/10).",
                        prepared.pull_request.url,
                        failure.branch,
                        analysis.category,
                        analysis.risk_score,
                    ),
                )
                .await;
                Ok(failure.status)
            }
            Verdict::RequireApproval => {
                let request = self
                    .approvals
                    .create(
                        &self.store.approvals(),
                        &failure,
                        analysis,
                        &prepared.fix_branch,
                        prepared.pull_request.number,
                        &decision.reason(),
                    )
                    .await?;
                self.audit(
                    AuditEvent::new("approval", AuditAction::Approval, AuditOutcome::Pending)
                        .failure(&failure.id)
                        .request(&request.id)
                        .details(json!({
                            "reason": decision.reason(),
                            "reviewers": request.required_reviewers,
                            "pr_number": request.pr_number,
                        })),
                );
                self.notify(
                    NotificationKind::ApprovalRequest,
                    &failure,
                    "Approval required",
                    &format!(
                        "Remediation for `{}` needs approval ({}). PR: {}",
                        failure.repository,
                        decision.reason(),
                        prepared.pull_request.url,
                    ),
                )
                .await;
                // Stays gated until the approval poll resolves it.
                Ok(failure.status)
            }
            Verdict::Block => unreachable!("blocked verdicts return above"),
        }
    }

    /// Poll pending approval requests and move resolved ones along.
    pub async fn poll_approvals(&self) -> Result<usize, MendError> {
        let pending = self.store.approvals().list_pending()?;
        let mut resolved = 0usize;
        for request in pending {
            let status = self
                .approvals
                .check(&self.store.approvals(), &request)
                .await?;
            if status == ApprovalStatus::Pending {
                continue;
            }
            resolved += 1;

            let Some(failure) = self.store.failures().get(&request.failure_id)? else {
                warn!(request_id = %request.id, "approval resolved for unknown failure");
                continue;
            };
            if failure.status.is_terminal() {
                continue;
            }

            match status {
                ApprovalStatus::Approved => {
                    self.audit(
                        AuditEvent::new("approval", AuditAction::Approval, AuditOutcome::Success)
                            .failure(&failure.id)
                            .request(&request.id)
                            .details(json!({"approved": true})),
                    );
                    let failure =
                        self.transition(&failure, FailureStatus::PrOpen, "approval granted")?;
                    self.deps.metrics.remediations_opened.inc();
                    if let Some(snapshot) = self
                        .store
                        .snapshots()
                        .active_for_remediation(&failure.id)?
                    {
                        self.executor.schedule_health_check(
                            &self.store,
                            &failure,
                            &snapshot.id,
                            request.pr_number,
                        )?;
                    }
                    self.notify(
                        NotificationKind::RemediationResult,
                        &failure,
                        "Approved fix applied",
                        &format!(
                            "Approved remediation PR #{} for `{}` is live.",
                            request.pr_number, failure.repository
                        ),
                    )
                    .await;
                }
                ApprovalStatus::Rejected => {
                    self.audit(
                        AuditEvent::new("approval", AuditAction::Approval, AuditOutcome::Failure)
                            .failure(&failure.id)
                            .request(&request.id)
                            .details(json!({"approved": false})),
                    );
                    self.transition(&failure, FailureStatus::Failed, "approval_rejected")?;
                }
                ApprovalStatus::Expired => {
                    self.audit(
                        AuditEvent::new("approval", AuditAction::Approval, AuditOutcome::Failure)
                            .failure(&failure.id)
                            .request(&request.id)
                            .details(json!({"expired": true})),
                    );
                    self.notify(
                        NotificationKind::Critical,
                        &failure,
                        "Approval timed out",
                        &format!(
                            "Approval for `{}` PR #{} expired after {}h.",
                            failure.repository,
                            request.pr_number,
                            self.deps.config.approval_timeout_hours,
                        ),
                    )
                    .await;
                    self.transition(&failure, FailureStatus::Failed, "approval_expired")?;
                }
                ApprovalStatus::Pending => unreachable!(),
            }
        }
        Ok(resolved)
    }

    /// Execute every health check whose scheduled instant has passed.
    pub async fn run_due_health_checks(&self) -> Result<usize, MendError> {
        let due = self.store.health_checks().due(self.deps.clock.now())?;
        let mut executed = 0usize;
        for check in due {
            let Some(failure) = self.store.failures().get(&check.remediation_id)? else {
                warn!(check_id = %check.id, "health check for unknown failure");
                continue;
            };
            if failure.status != FailureStatus::PrOpen {
                // Resolved some other way; close the check without action.
                self.store.health_checks().resolve(
                    &check.id,
                    self.deps.clock.now(),
                    true,
                    &[],
                    false,
                )?;
                continue;
            }
            self.execute_health_check(&check, &failure).await?;
            executed += 1;
        }
        Ok(executed)
    }

    async fn execute_health_check(
        &self,
        check: &HealthCheck,
        failure: &Failure,
    ) -> Result<(), MendError> {
        let outcome = self.health.evaluate(&self.store, check, failure).await?;
        let now = self.deps.clock.now();
        let signature = FailureSignature::new(
            &failure.repository,
            &failure.branch,
            &failure.failure_reason,
        );

        if outcome.passed {
            self.store
                .health_checks()
                .resolve(&check.id, now, true, &outcome.checks, false)?;
            let updated =
                self.transition(failure, FailureStatus::Remediated, "health check passed")?;
            self.deps.metrics.remediations_succeeded.inc();
            self.deps
                .breaker
                .record_success(&self.store.circuits(), &signature)
                .await?;

            if let Ok(Some(analysis)) = self.store.analyses().get(&failure.id) {
                let resolution_ms = (now - failure.detected_at).num_milliseconds();
                let stored = self
                    .deps
                    .memory
                    .store_pattern(
                        &self.store.patterns(),
                        NewPattern {
                            repository: failure.repository.clone(),
                            branch: failure.branch.clone(),
                            failure_reason: failure.failure_reason.clone(),
                            category: analysis.category.clone(),
                            proposed_fix: analysis.proposed_fix.clone(),
                            files_modified: analysis.files_to_modify.clone(),
                            fix_commands: analysis.fix_commands.clone(),
                            fix_successful: true,
                            risk_score: analysis.risk_score,
                            resolution_time_ms: resolution_ms,
                        },
                    )
                    .await?;
                if stored.is_some() {
                    self.deps.profiler.invalidate(&failure.repository);
                }
            }

            self.audit(
                AuditEvent::new("health_checker", AuditAction::Remediation, AuditOutcome::Success)
                    .failure(&updated.id)
                    .details(json!({"check_id": check.id, "checks": outcome.checks})),
            );
            return Ok(());
        }

        // Failed health check: roll the snapshot back.
        let rollback = self
            .snapshots
            .rollback_for_check(&self.store, check)
            .await;
        match rollback {
            Ok(result) => {
                self.store
                    .health_checks()
                    .resolve(&check.id, now, false, &outcome.checks, true)?;
                let updated =
                    self.transition(failure, FailureStatus::RolledBack, "health check failed")?;
                self.deps.metrics.rollbacks.inc();
                self.deps
                    .breaker
                    .record_failure(&self.store.circuits(), &signature)
                    .await?;
                self.audit(
                    AuditEvent::new(
                        "health_checker",
                        AuditAction::Rollback,
                        if result.complete {
                            AuditOutcome::Success
                        } else {
                            AuditOutcome::Failure
                        },
                    )
                    .failure(&updated.id)
                    .details(json!({
                        "snapshot_id": result.snapshot_id,
                        "complete": result.complete,
                        "files": result.files,
                    })),
                );
                self.notify(
                    NotificationKind::Critical,
                    &updated,
                    "Remediation rolled back",
                    &format!(
                        "Health check failed for `{}` PR #{}; snapshot {} restored ({}).",
                        failure.repository,
                        check.pr_number,
                        result.snapshot_id,
                        if result.complete { "complete" } else { "partial" },
                    ),
                )
                .await;
            }
            Err(err) => {
                error!(check_id = %check.id, error = %err, "rollback failed");
                self.store
                    .health_checks()
                    .resolve(&check.id, now, false, &outcome.checks, true)?;
                self.audit(
                    AuditEvent::new("health_checker", AuditAction::Rollback, AuditOutcome::Failure)
                        .failure(&failure.id)
                        .error(err.to_string()),
                );
                self.transition(failure, FailureStatus::Failed, "rollback failed")?;
            }
        }
        Ok(())
    }

    /// Audited status transition; illegal moves are integrity errors.
    fn transition(
        &self,
        failure: &Failure,
        to: FailureStatus,
        reason: &str,
    ) -> Result<Failure, MendError> {
        validate_transition(failure.status, to)?;
        let updated = self.store.failures().set_status(
            &failure.id,
            to,
            Some(reason.to_string()),
            self.deps.clock.now(),
        )?;
        info!(
            failure_id = %failure.id,
            from = ?failure.status,
            to = ?to,
            reason,
            "failure transitioned"
        );
        Ok(updated)
    }

    fn audit(&self, event: AuditEvent) {
        let entry = event.into_entry(self.deps.clock.now());
        if let Err(err) = self.store.audit().append(entry) {
            error!(error = %err, "audit append failed");
        }
    }

    async fn notify(
        &self,
        kind: NotificationKind,
        failure: &Failure,
        title: &str,
        body: &str,
    ) {
        let channel = match kind {
            NotificationKind::Critical | NotificationKind::Escalation => {
                self.deps.config.channels.critical.clone()
            }
            NotificationKind::ApprovalRequest => self.deps.config.channels.approvals.clone(),
            _ => self.deps.config.channels.alerts.clone(),
        };
        let notification = Notification {
            kind,
            channel,
            title: title.to_string(),
            body: body.to_string(),
            failure_id: Some(failure.id.clone()),
        };
        if let Some(recorder) = &self.deps.dry_run {
            recorder.record("notify", &notification.channel, &notification.body);
            return;
        }
        // Notification failures are non-fatal: log and continue.
        if let Err(err) = self.deps.notifier.send(notification).await {
            warn!(error = %err, kind = ?kind, "notification failed");
        }
    }
}

impl SnapshotManager {
    /// Rollback addressed through a health check record.
    pub async fn rollback_for_check<S: Store>(
        &self,
        store: &S,
        check: &HealthCheck,
    ) -> Result<crate::types::RollbackOutcome, MendError> {
        let snapshot = store
            .snapshots()
            .get(&check.snapshot_id)?
            .ok_or(crate::error::SnapshotError::NotFound)?;
        let fix_branch = snapshot.fix_branch.clone();
        self.rollback(&store.snapshots(), &check.snapshot_id, &fix_branch)
            .await
            .map_err(MendError::Snapshot)
    }
}
