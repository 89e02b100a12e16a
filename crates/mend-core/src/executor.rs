//! Applies an allowed remediation: snapshot, fix branch from the failing
//! branch tip, AI-generated file edits, a PR whose base is the failing
//! branch, and a scheduled health check. Every outbound write goes through
//! the dry-run interceptor when enabled.

use crate::clock::Clock;
use crate::decisions::{DecisionBuilder, DecisionRepository};
use crate::dryrun::DryRunRecorder;
use crate::error::{FailureError, LlmError, MendError, VcsError};
use crate::health::HealthCheckRepository;
use crate::llm::{ChatRequest, ModelClient};
use crate::parse::strip_code_fences;
use crate::prompt::{file_fix_prompt, FILE_FIX_SYSTEM};
use crate::snapshot::{SnapshotManager, SnapshotRepository};
use crate::store::Store;
use crate::types::{Analysis, CheckId, DecisionKind, Failure, HealthCheck, Snapshot};
use crate::vcs::{PullRequest, VcsClient};
use chrono::Duration as ChronoDuration;
use std::sync::Arc;
use tracing::{info, warn};

pub const FIX_BRANCH_PREFIX: &str = "mend/fix";
const FIX_MAX_TOKENS: u32 = 4_000;

#[derive(Debug, Clone)]
pub struct PreparedRemediation {
    pub snapshot: Snapshot,
    pub fix_branch: String,
    pub pull_request: PullRequest,
    pub files_changed: Vec<String>,
    pub simulated: bool,
}

pub struct Executor {
    vcs: Arc<dyn VcsClient>,
    model: Arc<dyn ModelClient>,
    snapshots: Arc<SnapshotManager>,
    clock: Arc<dyn Clock>,
    dry_run: Option<Arc<DryRunRecorder>>,
    health_check_delay: ChronoDuration,
}

impl Executor {
    pub fn new(
        vcs: Arc<dyn VcsClient>,
        model: Arc<dyn ModelClient>,
        snapshots: Arc<SnapshotManager>,
        clock: Arc<dyn Clock>,
        dry_run: Option<Arc<DryRunRecorder>>,
        health_check_delay_minutes: u64,
    ) -> Self {
        Self {
            vcs,
            model,
            snapshots,
            clock,
            dry_run,
            health_check_delay: ChronoDuration::minutes(health_check_delay_minutes as i64),
        }
    }

    /// Snapshot, branch, edit, open PR. The failure stays in its current
    /// state; the orchestrator owns transitions.
    pub async fn prepare<S: Store>(
        &self,
        store: &S,
        failure: &Failure,
        analysis: &Analysis,
    ) -> Result<PreparedRemediation, MendError> {
        if analysis.files_to_modify.is_empty() {
            return Err(MendError::Failure(FailureError::InvalidInput {
                message: "no files to modify".to_string(),
            }));
        }

        // Branch source invariant: the fix branch starts at the tip of the
        // broken branch and the PR targets the broken branch.
        let base_sha = self
            .vcs
            .branch_head_sha(&failure.repository, &failure.branch)
            .await?;
        let default_branch = self.vcs.default_branch(&failure.repository).await?;
        let fix_branch = format!(
            "{FIX_BRANCH_PREFIX}/{}-{}",
            failure.branch,
            self.clock.now().timestamp()
        );
        debug_assert_ne!(fix_branch, default_branch);

        let mut snapshot = self
            .snapshots
            .capture(
                &store.snapshots(),
                &failure.repository,
                &failure.id,
                &failure.branch,
                &fix_branch,
                &base_sha,
                &analysis.files_to_modify,
            )
            .await?;
        self.create_branch(&failure.repository, &fix_branch, &base_sha)
            .await?;

        let files_changed = self
            .apply_edits(store, failure, analysis, &mut snapshot, &fix_branch, &base_sha)
            .await?;
        if files_changed.is_empty() {
            return Err(MendError::Failure(FailureError::InvalidInput {
                message: "model produced no content changes".to_string(),
            }));
        }

        let title = format!("fix({}): {}", analysis.category, failure.branch);
        let body = pr_body(failure, analysis);
        let pull_request = self
            .create_pull(&failure.repository, &title, &body, &fix_branch, &failure.branch)
            .await?;
        debug_assert_eq!(pull_request.base, failure.branch);
        debug_assert_ne!(pull_request.head, default_branch);

        info!(
            failure_id = %failure.id,
            fix_branch = %fix_branch,
            pr = pull_request.number,
            files = files_changed.len(),
            simulated = self.dry_run.is_some(),
            "remediation prepared"
        );
        Ok(PreparedRemediation {
            snapshot,
            fix_branch,
            pull_request,
            files_changed,
            simulated: self.dry_run.is_some(),
        })
    }

    #[allow(clippy::too_many_arguments)]
    async fn apply_edits<S: Store>(
        &self,
        store: &S,
        failure: &Failure,
        analysis: &Analysis,
        snapshot: &mut Snapshot,
        fix_branch: &str,
        base_sha: &str,
    ) -> Result<Vec<String>, MendError> {
        // Under dry-run the fix branch was never created upstream, so reads
        // resolve against the branch point instead.
        let read_ref = if self.dry_run.is_some() {
            base_sha
        } else {
            fix_branch
        };
        let mut changed = Vec::new();
        for path in &analysis.files_to_modify {
            let current = self
                .vcs
                .get_file(&failure.repository, path, read_ref)
                .await?;
            let Some(current) = current else {
                warn!(path, "file not found on fix branch, skipping");
                continue;
            };

            let new_content = self
                .generate_file_fix(failure, analysis, path, &current.content)
                .await?;
            if new_content.trim() == current.content.trim() {
                warn!(path, "no changes generated, skipping");
                continue;
            }

            self.snapshots
                .mark_edited(&store.snapshots(), snapshot, path, &new_content)?;
            let message = format!(
                "fix: {} - {}",
                analysis.category,
                head(&analysis.reasoning, 80)
            );
            self.put_file(
                &failure.repository,
                path,
                &new_content,
                &message,
                fix_branch,
                Some(&current.sha),
            )
            .await?;
            changed.push(path.clone());
        }

        let decision = DecisionBuilder::new(
            failure.id.clone(),
            DecisionKind::FixGeneration,
            format!("edited {} file(s)", changed.len()),
        )
        .context(&analysis.proposed_fix)
        .confidence(f64::from(analysis.confidence) / 100.0)
        .model(&analysis.model_id, analysis.response_latency_ms)
        .build(self.clock.now());
        store.decisions().append(decision).map_err(MendError::Audit)?;

        Ok(changed)
    }

    async fn generate_file_fix(
        &self,
        failure: &Failure,
        analysis: &Analysis,
        path: &str,
        current_content: &str,
    ) -> Result<String, LlmError> {
        let request = ChatRequest {
            system: FILE_FIX_SYSTEM.to_string(),
            user: file_fix_prompt(failure, analysis, path, current_content),
            json_mode: false,
            max_tokens: FIX_MAX_TOKENS,
        };
        let response = self.model.chat(request).await?;
        if response.content.trim().is_empty() {
            return Err(LlmError::EmptyCompletion);
        }
        Ok(strip_code_fences(&response.content))
    }

    /// Insert the post-PR health check record; the scheduler executes it
    /// once `scheduled_at` passes.
    pub fn schedule_health_check<S: Store>(
        &self,
        store: &S,
        failure: &Failure,
        snapshot_id: &crate::types::SnapshotId,
        pr_number: u64,
    ) -> Result<HealthCheck, MendError> {
        let check = HealthCheck {
            id: CheckId::generate(),
            remediation_id: failure.id.clone(),
            snapshot_id: snapshot_id.clone(),
            repository: failure.repository.clone(),
            branch: failure.branch.clone(),
            pr_number,
            scheduled_at: self.clock.now() + self.health_check_delay,
            executed_at: None,
            passed: None,
            checks: Vec::new(),
            triggered_rollback: false,
        };
        if let Some(recorder) = &self.dry_run {
            recorder.record(
                "schedule_health_check",
                &format!("{}#{}", failure.repository, failure.branch),
                check.id.as_str(),
            );
            return Ok(check);
        }
        store.health_checks().insert(&check).map_err(MendError::Health)?;
        info!(
            check_id = %check.id,
            scheduled_at = %check.scheduled_at,
            "health check scheduled"
        );
        Ok(check)
    }

    async fn create_branch(
        &self,
        repository: &str,
        branch: &str,
        sha: &str,
    ) -> Result<(), VcsError> {
        if let Some(recorder) = &self.dry_run {
            recorder.record("create_branch", &format!("{repository}#{branch}"), sha);
            return Ok(());
        }
        self.vcs.create_branch(repository, branch, sha).await
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
        if let Some(recorder) = &self.dry_run {
            recorder.record("put_file", &format!("{repository}:{path}"), content);
            return Ok(());
        }
        self.vcs
            .put_file(repository, path, content, message, branch, sha)
            .await
    }

    async fn create_pull(
        &self,
        repository: &str,
        title: &str,
        body: &str,
        head: &str,
        base: &str,
    ) -> Result<PullRequest, VcsError> {
        if let Some(recorder) = &self.dry_run {
            recorder.record("create_pull", &format!("{repository}:{head}->{base}"), body);
            return Ok(PullRequest {
                number: 0,
                url: format!("[dry-run] {repository}#{head}"),
                head: head.to_string(),
                base: base.to_string(),
            });
        }
        self.vcs
            .create_pull(repository, title, body, head, base)
            .await
    }
}

fn pr_body(failure: &Failure, analysis: &Analysis) -> String {
    let run_url = format!(
        "https://github.com/{}/actions/runs/{}",
        failure.repository, failure.workflow_run_id
    );
    let files = analysis
        .files_to_modify
        .iter()
        .map(|f| format!("- `{f}`"))
        .collect::<Vec<_>>()
        .join("\n");
    let commands = if analysis.fix_commands.is_empty() {
        "- *none*".to_string()
    } else {
        analysis
            .fix_commands
            .iter()
            .map(|c| format!("- `{c}`"))
            .collect::<Vec<_>>()
            .join("\n")
    };

    format!(
        "## Automated CI failure fix\n\n\
         | Metric | Value |\n| :--- | :--- |\n\
         | Failure type | {:?} |\n\
         | Category | `{}` |\n\
         | Risk score | `{}/10` |\n\
         | Confidence | `{}%` |\n\
         | Effort | `{:?}` |\n\n\
         **Failed run:** [{}]({run_url})\n\
         **Target branch:** `{}`\n\n\
         ### Problem\n> {}\n\n\
         ### Reasoning\n{}\n\n\
         ### Proposed remediation\n{}\n\n\
         ### Files modified\n{files}\n\n\
         ### Commands (if applicable)\n{commands}\n\n\
         ---\n*Opened automatically; review carefully before merging.*\n",
        analysis.error_type,
        analysis.category,
        analysis.risk_score,
        analysis.confidence,
        analysis.effort,
        failure.workflow_run_id,
        failure.branch,
        failure.failure_reason,
        analysis.reasoning,
        analysis.proposed_fix,
    )
}

fn head(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
