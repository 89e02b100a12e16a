//! End-to-end scenarios driving the engine with a scripted model, a
//! stateful fake host, and a manual clock over the real sqlite store.

mod common;

use chrono::Duration as ChronoDuration;
use common::*;
use mend_core::approval::ApprovalRepository;
use mend_core::audit::AuditRepository;
use mend_core::circuit::CircuitRepository;
use mend_core::clock::Clock;
use mend_core::config::{Config, ReviewerSet};
use mend_core::failures::FailureRepository;
use mend_core::health::HealthCheckRepository;
use mend_core::memory::PatternRepository;
use mend_core::notify::NotificationKind;
use mend_core::poller::Poller;
use mend_core::signature::FailureSignature;
use mend_core::snapshot::{content_hash, SnapshotRepository};
use mend_core::store::Store;
use mend_core::types::{
    AuditAction, AuditFilter, AuditOutcome, CircuitPhase, CircuitState, FailureStatus,
};
use mend_core::vcs::{DeploymentState, RunConclusion, RunJob, WorkflowRun};

const WORKFLOW_FILE: &str = ".github/workflows/build.yml";
const ORIGINAL_WORKFLOW: &str = "jobs:\n  build:\n    timeout-minutes: 5\n";
// No trailing newline: generated content is fence-stripped and trimmed
// before it is written.
const FIXED_WORKFLOW: &str = "jobs:\n  build:\n    timeout-minutes: 20";

fn base_config() -> Config {
    let mut config = Config::default();
    config.repositories = vec![REPO.to_string()];
    config.reviewers = ReviewerSet {
        senior: vec!["alice".to_string(), "bo".to_string()],
        team: vec!["dana".to_string()],
    };
    config
}

/// S1: a developer issue routes to notification, never to a PR.
#[tokio::test]
async fn developer_issue_routes_to_notification_not_pr() {
    let model = FakeModel::scripted(vec![Ok(developer_classification())]);
    let h = harness(base_config(), model);
    let failure = h
        .engine
        .store()
        .failures()
        .insert(new_failure(
            "AssertionError: expected 5 but got 3 at tests/math_test: line 42",
            &h.clock,
        ))
        .unwrap();

    let status = h.engine.process_failure(&failure.id).await.unwrap();

    assert_eq!(status, FailureStatus::DeveloperNotified);
    assert!(h.vcs.created_branches.lock().unwrap().is_empty());
    assert!(h.vcs.pulls.lock().unwrap().is_empty());

    let sent = h.notifier.sent.lock().unwrap();
    let analysis_messages: Vec<_> = sent
        .iter()
        .filter(|n| n.kind == NotificationKind::Analysis)
        .collect();
    assert_eq!(analysis_messages.len(), 1);
    let body = &analysis_messages[0].body;
    assert!(body.contains(REPO));
    assert!(body.contains("test_failure"));
    assert!(body.contains("85"));
    assert!(body.contains("fix the assertion"));
}

/// S2: a low-risk devops fix auto-opens a PR against the failing branch.
#[tokio::test]
async fn low_risk_devops_fix_auto_opens_pr() {
    let model = FakeModel::scripted(vec![
        Ok(devops_classification(3, &[WORKFLOW_FILE])),
        Ok(FIXED_WORKFLOW.to_string()),
    ]);
    let h = harness(base_config(), model);
    h.vcs.seed_file(WORKFLOW_FILE, ORIGINAL_WORKFLOW);
    let failure = h
        .engine
        .store()
        .failures()
        .insert(new_failure("npm install timeout after 30s", &h.clock))
        .unwrap();

    let status = h.engine.process_failure(&failure.id).await.unwrap();
    assert_eq!(status, FailureStatus::PrOpen);

    // Snapshot captured the pre-change bytes.
    let snapshot = h
        .engine
        .store()
        .snapshots()
        .active_for_remediation(&failure.id)
        .unwrap()
        .expect("snapshot exists");
    assert_eq!(snapshot.files.len(), 1);
    assert_eq!(snapshot.files[0].content, ORIGINAL_WORKFLOW);
    assert_eq!(
        snapshot.files[0].content_hash,
        content_hash(ORIGINAL_WORKFLOW)
    );
    assert_eq!(snapshot.base_commit_sha, BRANCH_SHA);

    // Branch/base invariant: head created from the failing branch tip, PR
    // targets the failing branch, head is not the default branch.
    let branches = h.vcs.created_branches.lock().unwrap().clone();
    assert_eq!(branches.len(), 1);
    assert!(branches[0].0.starts_with("mend/fix/"));
    assert_eq!(branches[0].1, BRANCH_SHA);
    let pulls = h.vcs.pulls.lock().unwrap().clone();
    assert_eq!(pulls.len(), 1);
    assert_eq!(pulls[0].base, BRANCH);
    assert_ne!(pulls[0].head, h.vcs.default_branch);

    // The edit landed on the fix branch only.
    let fix_branch = h.vcs.fix_branch().unwrap();
    assert_eq!(
        h.vcs.file_at(&fix_branch, WORKFLOW_FILE).unwrap(),
        FIXED_WORKFLOW
    );
    assert_eq!(
        h.vcs.file_at(BRANCH, WORKFLOW_FILE).unwrap(),
        ORIGINAL_WORKFLOW
    );

    // Remediation notification carries the PR URL.
    let sent = h.notifier.sent.lock().unwrap();
    let result_messages: Vec<_> = sent
        .iter()
        .filter(|n| n.kind == NotificationKind::RemediationResult)
        .collect();
    assert_eq!(result_messages.len(), 1);
    assert!(result_messages[0].body.contains(&pulls[0].url));

    // Health check scheduled at t + 5 minutes.
    let checks = h.engine.store().health_checks().unexecuted().unwrap();
    assert_eq!(checks.len(), 1);
    assert_eq!(
        checks[0].scheduled_at,
        h.clock.now() + ChronoDuration::minutes(5)
    );
}

/// S3: high-risk devops needs approval; the PR exists but the failure only
/// reaches pr_open after the gate approves, and rejection fails it.
#[tokio::test]
async fn high_risk_devops_requires_approval() {
    let model = FakeModel::scripted(vec![
        Ok(devops_classification(8, &["k8s/deployment.yaml"])),
        Ok("spec:\n  timeoutSeconds: 120\n".to_string()),
    ]);
    let h = harness(base_config(), model);
    h.vcs.seed_file("k8s/deployment.yaml", "spec:\n  timeoutSeconds: 30\n");
    let failure = h
        .engine
        .store()
        .failures()
        .insert(new_failure("Kubernetes deployment timeout", &h.clock))
        .unwrap();

    let status = h.engine.process_failure(&failure.id).await.unwrap();
    assert_eq!(status, FailureStatus::Gated);

    let request = h
        .engine
        .store()
        .approvals()
        .get_for_failure(&failure.id)
        .unwrap()
        .expect("approval request");
    assert_eq!(
        request.required_reviewers,
        vec!["alice".to_string(), "bo".to_string()]
    );
    assert_eq!(request.environment_name, "auto-remediation-approval");
    assert_eq!(h.vcs.deployments.lock().unwrap().len(), 1);
    assert_eq!(h.vcs.comments.lock().unwrap().len(), 1);

    // Approval granted: the failure moves to pr_open.
    *h.vcs.deployment_state.lock().unwrap() = DeploymentState::Approved;
    let resolved = h.engine.poll_approvals().await.unwrap();
    assert_eq!(resolved, 1);
    let failure = h
        .engine
        .store()
        .failures()
        .get(&failure.id)
        .unwrap()
        .unwrap();
    assert_eq!(failure.status, FailureStatus::PrOpen);
}

#[tokio::test]
async fn rejected_approval_fails_with_reason() {
    let model = FakeModel::scripted(vec![
        Ok(devops_classification(8, &["k8s/deployment.yaml"])),
        Ok("spec: changed\n".to_string()),
    ]);
    let h = harness(base_config(), model);
    h.vcs.seed_file("k8s/deployment.yaml", "spec: original\n");
    let failure = h
        .engine
        .store()
        .failures()
        .insert(new_failure("Kubernetes deployment timeout", &h.clock))
        .unwrap();
    h.engine.process_failure(&failure.id).await.unwrap();

    *h.vcs.deployment_state.lock().unwrap() = DeploymentState::Rejected;
    h.engine.poll_approvals().await.unwrap();

    let failure = h
        .engine
        .store()
        .failures()
        .get(&failure.id)
        .unwrap()
        .unwrap();
    assert_eq!(failure.status, FailureStatus::Failed);
    assert_eq!(failure.status_reason.as_deref(), Some("approval_rejected"));
}

/// S4: the circuit opens on the third consecutive failure for one signature
/// and subsequent attempts are blocked without a model call.
#[tokio::test]
async fn circuit_opens_on_third_consecutive_failure() {
    // Script enough responses for two full runs; the third must not consume
    // any.
    let model = FakeModel::scripted(vec![
        Ok(devops_classification(3, &[WORKFLOW_FILE])),
        Ok(FIXED_WORKFLOW.to_string()),
        Ok(devops_classification(3, &[WORKFLOW_FILE])),
        Ok(FIXED_WORKFLOW.to_string()),
    ]);
    let h = harness(base_config(), model);
    h.vcs.seed_file(WORKFLOW_FILE, ORIGINAL_WORKFLOW);

    let reason = "npm install timeout after 30s";
    for run in ["1", "2"] {
        let failure = h
            .engine
            .store()
            .failures()
            .insert(new_failure_with_run(reason, run, &h.clock))
            .unwrap();
        h.engine.process_failure(&failure.id).await.unwrap();
    }
    let calls_before_third = h.model.call_count();

    let third = h
        .engine
        .store()
        .failures()
        .insert(new_failure_with_run(reason, "3", &h.clock))
        .unwrap();
    let status = h.engine.process_failure(&third.id).await.unwrap();

    assert_eq!(status, FailureStatus::Failed);
    let third = h.engine.store().failures().get(&third.id).unwrap().unwrap();
    assert_eq!(third.status_reason.as_deref(), Some("circuit_open"));
    // No LLM call was made for the blocked attempt.
    assert_eq!(h.model.call_count(), calls_before_third);

    let signature = FailureSignature::new(REPO, BRANCH, reason);
    let circuit = h
        .engine
        .store()
        .circuits()
        .get(&signature.key())
        .unwrap()
        .unwrap();
    assert_eq!(circuit.phase, CircuitPhase::Open);
    assert_eq!(circuit.opened_at, Some(h.clock.now()));
    assert_eq!(
        circuit.auto_reset_at,
        Some(h.clock.now() + ChronoDuration::hours(24))
    );

    // A fourth failure within the window is likewise blocked.
    let fourth = h
        .engine
        .store()
        .failures()
        .insert(new_failure_with_run(reason, "4", &h.clock))
        .unwrap();
    let status = h.engine.process_failure(&fourth.id).await.unwrap();
    assert_eq!(status, FailureStatus::Failed);
    assert_eq!(h.model.call_count(), calls_before_third);
}

/// S5: a failed health check rolls the snapshot back byte-for-byte and
/// fires a critical alert plus a rollback audit entry.
#[tokio::test]
async fn rollback_on_health_check_failure() {
    let model = FakeModel::scripted(vec![
        Ok(devops_classification(3, &[WORKFLOW_FILE])),
        Ok(FIXED_WORKFLOW.to_string()),
    ]);
    let h = harness(base_config(), model);
    h.vcs.seed_file(WORKFLOW_FILE, ORIGINAL_WORKFLOW);
    let failure = h
        .engine
        .store()
        .failures()
        .insert(new_failure("npm install timeout after 30s", &h.clock))
        .unwrap();
    h.engine.process_failure(&failure.id).await.unwrap();
    let fix_branch = h.vcs.fix_branch().unwrap();
    assert_eq!(
        h.vcs.file_at(&fix_branch, WORKFLOW_FILE).unwrap(),
        FIXED_WORKFLOW
    );

    // The follow-up run on the target branch failed.
    *h.vcs.latest_conclusion.lock().unwrap() = Some(RunConclusion::Failure);
    h.clock.advance(ChronoDuration::minutes(5));
    let executed = h.engine.run_due_health_checks().await.unwrap();
    assert_eq!(executed, 1);

    // Post-rollback contents equal the snapshot bytes, hash for hash.
    assert_eq!(
        h.vcs.file_at(&fix_branch, WORKFLOW_FILE).unwrap(),
        ORIGINAL_WORKFLOW
    );
    let failure = h
        .engine
        .store()
        .failures()
        .get(&failure.id)
        .unwrap()
        .unwrap();
    assert_eq!(failure.status, FailureStatus::RolledBack);

    let sent = h.notifier.sent.lock().unwrap();
    assert!(sent
        .iter()
        .any(|n| n.kind == NotificationKind::Critical && n.body.contains("rolled back")
            || n.kind == NotificationKind::Critical && n.title.contains("rolled back")));
    drop(sent);

    let rollback_entries = h
        .engine
        .store()
        .audit()
        .query(AuditFilter {
            action: Some(AuditAction::Rollback),
            ..Default::default()
        })
        .unwrap();
    assert_eq!(rollback_entries.len(), 1);
    assert_eq!(rollback_entries[0].outcome, AuditOutcome::Success);
    assert_eq!(h.metrics.rollbacks.get(), 1);
}

/// S6 continuation: a passing health check closes the loop, records the
/// pattern, and resets the circuit.
#[tokio::test]
async fn passing_health_check_remediates_and_learns() {
    let model = FakeModel::scripted(vec![
        Ok(devops_classification(3, &[WORKFLOW_FILE])),
        Ok(FIXED_WORKFLOW.to_string()),
    ]);
    let h = harness(base_config(), model);
    h.vcs.seed_file(WORKFLOW_FILE, ORIGINAL_WORKFLOW);
    let reason = "npm install timeout after 30s";
    let failure = h
        .engine
        .store()
        .failures()
        .insert(new_failure(reason, &h.clock))
        .unwrap();
    h.engine.process_failure(&failure.id).await.unwrap();

    h.clock.advance(ChronoDuration::minutes(5));
    h.engine.run_due_health_checks().await.unwrap();

    let failure = h
        .engine
        .store()
        .failures()
        .get(&failure.id)
        .unwrap()
        .unwrap();
    assert_eq!(failure.status, FailureStatus::Remediated);
    assert_eq!(h.metrics.remediations_succeeded.get(), 1);

    // Pattern stored only on confirmed success.
    assert_eq!(h.engine.store().patterns().count().unwrap(), 1);
    let patterns = h.engine.store().patterns().all().unwrap();
    assert!(patterns[0].fix_successful);

    // Circuit failure count cleared by the success.
    let signature = FailureSignature::new(REPO, BRANCH, reason);
    let circuit = h
        .engine
        .store()
        .circuits()
        .get(&signature.key())
        .unwrap()
        .unwrap();
    assert_eq!(circuit.failure_count, 0);
    assert_eq!(circuit.phase, CircuitPhase::Closed);
}

/// Property 1: processing the same run id twice produces exactly one
/// failure record and one detection audit entry.
#[tokio::test]
async fn polling_is_idempotent_per_run_id() {
    let model = FakeModel::scripted(Vec::new());
    let h = harness(base_config(), model);
    h.vcs.runs.lock().unwrap().push(WorkflowRun {
        id: 7,
        workflow: WORKFLOW.to_string(),
        head_branch: BRANCH.to_string(),
        head_sha: BRANCH_SHA.to_string(),
        conclusion: Some(RunConclusion::Failure),
        created_at: h.clock.now(),
    });
    h.vcs.jobs.lock().unwrap().insert(
        7,
        vec![RunJob {
            id: 71,
            name: "build".to_string(),
            conclusion: Some(RunConclusion::Failure),
        }],
    );
    h.vcs
        .logs
        .lock()
        .unwrap()
        .insert(71, "Error: npm install timeout after 30s\n".to_string());

    let poller = Poller::new(h.vcs.clone(), h.clock.clone());
    let first = poller.poll_once(h.engine.store(), REPO).await.unwrap();
    assert_eq!(first.len(), 1);
    assert_eq!(
        first[0].failure_reason,
        "Error: npm install timeout after 30s"
    );
    let second = poller.poll_once(h.engine.store(), REPO).await.unwrap();
    assert!(second.is_empty());

    let detections = h
        .engine
        .store()
        .audit()
        .query(AuditFilter {
            action: Some(AuditAction::Detection),
            ..Default::default()
        })
        .unwrap();
    assert_eq!(detections.len(), 1);
}

/// Property 6: with dry_run enabled no write reaches the host or notifier,
/// and every simulated action carries a payload digest.
#[tokio::test]
async fn dry_run_intercepts_every_outbound_write() {
    let mut config = base_config();
    config.dry_run = true;
    let model = FakeModel::scripted(vec![
        Ok(devops_classification(3, &[WORKFLOW_FILE])),
        Ok(FIXED_WORKFLOW.to_string()),
    ]);
    let h = harness(config, model);
    h.vcs.seed_file(WORKFLOW_FILE, ORIGINAL_WORKFLOW);
    let failure = h
        .engine
        .store()
        .failures()
        .insert(new_failure("npm install timeout after 30s", &h.clock))
        .unwrap();

    let status = h.engine.process_failure(&failure.id).await.unwrap();
    assert_eq!(status, FailureStatus::Remediated);

    assert!(h.vcs.created_branches.lock().unwrap().is_empty());
    assert!(h.vcs.puts.lock().unwrap().is_empty());
    assert!(h.vcs.pulls.lock().unwrap().is_empty());
    assert!(h.vcs.comments.lock().unwrap().is_empty());
    assert!(h.notifier.sent.lock().unwrap().is_empty());

    let report = h.dry_run.as_ref().unwrap().report();
    assert!(report.total_actions > 0);
    for action in ["create_branch", "put_file", "create_pull"] {
        assert!(
            report.action_counts.contains_key(action),
            "missing simulated {action}"
        );
    }
    assert!(report
        .actions
        .iter()
        .all(|action| action.payload_digest.len() == 64));
}

/// Gate Block verdicts terminate the failure with an audited reason.
#[tokio::test]
async fn blocked_failure_reaches_terminal_state_with_audit_trail() {
    let model = FakeModel::scripted(vec![Ok(devops_classification(3, &[WORKFLOW_FILE]))]);
    let h = harness(base_config(), model);
    h.vcs.seed_file(WORKFLOW_FILE, ORIGINAL_WORKFLOW);

    // Pre-open the circuit for this signature.
    let reason = "npm install timeout after 30s";
    let signature = FailureSignature::new(REPO, BRANCH, reason);
    let mut state = CircuitState::new(
        signature.key(),
        REPO.to_string(),
        BRANCH.to_string(),
        signature.error_pattern.clone(),
    );
    state.failure_count = 3;
    state.phase = CircuitPhase::Open;
    state.opened_at = Some(h.clock.now());
    state.auto_reset_at = Some(h.clock.now() + ChronoDuration::hours(24));
    h.engine.store().circuits().upsert(&state).unwrap();

    let failure = h
        .engine
        .store()
        .failures()
        .insert(new_failure(reason, &h.clock))
        .unwrap();
    let status = h.engine.process_failure(&failure.id).await.unwrap();
    assert_eq!(status, FailureStatus::Failed);

    let validations = h
        .engine
        .store()
        .audit()
        .query(AuditFilter {
            failure_id: Some(failure.id.clone()),
            action: Some(AuditAction::Validation),
            ..Default::default()
        })
        .unwrap();
    assert_eq!(validations.len(), 1);
    assert_eq!(validations[0].outcome, AuditOutcome::Failure);
}

/// Changing the per-repo threshold reclassifies the same analysis.
#[tokio::test]
async fn threshold_change_reclassifies_verdict() {
    // Risk 4 auto-applies at the default threshold of 5.
    let model = FakeModel::scripted(vec![
        Ok(devops_classification(4, &[WORKFLOW_FILE])),
        Ok(FIXED_WORKFLOW.to_string()),
    ]);
    let h = harness(base_config(), model);
    h.vcs.seed_file(WORKFLOW_FILE, ORIGINAL_WORKFLOW);
    let failure = h
        .engine
        .store()
        .failures()
        .insert(new_failure("npm install timeout after 30s", &h.clock))
        .unwrap();
    let status = h.engine.process_failure(&failure.id).await.unwrap();
    assert_eq!(status, FailureStatus::PrOpen);

    // The same risk under a tightened threshold escalates instead.
    let mut tightened = base_config();
    tightened.risk_threshold = 3;
    let model = FakeModel::scripted(vec![
        Ok(devops_classification(4, &[WORKFLOW_FILE])),
        Ok(FIXED_WORKFLOW.to_string()),
    ]);
    let h2 = harness(tightened, model);
    h2.vcs.seed_file(WORKFLOW_FILE, ORIGINAL_WORKFLOW);
    let failure = h2
        .engine
        .store()
        .failures()
        .insert(new_failure("npm install timeout after 30s", &h2.clock))
        .unwrap();
    let status = h2.engine.process_failure(&failure.id).await.unwrap();
    assert_eq!(status, FailureStatus::Gated);
    assert!(h2
        .engine
        .store()
        .approvals()
        .get_for_failure(&failure.id)
        .unwrap()
        .is_some());
}

/// Unparseable model output terminates the failure; nothing is fabricated.
#[tokio::test]
async fn parse_failure_is_terminal_without_fabricated_defaults() {
    let model = FakeModel::scripted(vec![Ok(
        "I am terribly sorry, I cannot help with that.".to_string()
    )]);
    let h = harness(base_config(), model);
    let failure = h
        .engine
        .store()
        .failures()
        .insert(new_failure("npm install timeout after 30s", &h.clock))
        .unwrap();

    let status = h.engine.process_failure(&failure.id).await.unwrap();
    assert_eq!(status, FailureStatus::Failed);
    let failure = h
        .engine
        .store()
        .failures()
        .get(&failure.id)
        .unwrap()
        .unwrap();
    assert!(failure
        .status_reason
        .as_deref()
        .unwrap()
        .contains("classification error"));
    // No analysis row was stored.
    use mend_core::classify::AnalysisRepository;
    assert!(h
        .engine
        .store()
        .analyses()
        .get(&failure.id)
        .unwrap()
        .is_none());
}
