//! Per-repository polling: fetch recently failed workflow runs, dedupe
//! against the store, capture bounded log tails, and emit new failures.

use crate::audit::{AuditEvent, AuditRepository};
use crate::clock::Clock;
use crate::error::{MendError, PollError, VcsError};
use crate::failures::FailureRepository;
use crate::store::Store;
use crate::types::{AuditAction, AuditOutcome, Failure, FailureStatus, NewFailure};
use crate::vcs::{RunConclusion, VcsClient};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Captured logs are bounded to this many bytes of tail.
pub const LOG_TAIL_BYTES: usize = 256 * 1024;
const RUNS_PER_PAGE: u32 = 30;
const FALLBACK_REASON_LINES: usize = 40;
const REASON_MAX_CHARS: usize = 200;

const ERROR_KEYWORDS: &[&str] = &[
    "error",
    "failed",
    "timeout",
    "exception",
    "fatal",
    "panic",
    "segmentation fault",
    "out of memory",
];

pub struct Poller {
    vcs: Arc<dyn VcsClient>,
    clock: Arc<dyn Clock>,
}

impl Poller {
    pub fn new(vcs: Arc<dyn VcsClient>, clock: Arc<dyn Clock>) -> Self {
        Self { vcs, clock }
    }

    /// One poll cycle for one repository. Returns only runs not already in
    /// the store; processing the same run twice never creates duplicates.
    pub async fn poll_once<S: Store>(
        &self,
        store: &S,
        repository: &str,
    ) -> Result<Vec<Failure>, MendError> {
        let runs = match self.vcs.list_failed_runs(repository, RUNS_PER_PAGE).await {
            Ok(runs) => runs,
            Err(VcsError::RateLimited { reset_after_secs }) => {
                return Err(MendError::Poll(PollError::RateLimited { reset_after_secs }));
            }
            Err(err) if err.is_transient() => {
                return Err(MendError::Poll(PollError::Upstream {
                    message: err.to_string(),
                }));
            }
            Err(err) => {
                return Err(MendError::Poll(PollError::Malformed {
                    message: err.to_string(),
                }));
            }
        };
        debug!(repository, runs = runs.len(), "failed runs listed");

        let mut detected = Vec::new();
        for run in runs {
            let run_id = run.id.to_string();
            match store.failures().exists(repository, &run_id) {
                Ok(true) => {
                    debug!(repository, run_id, "run already processed, skipping");
                    continue;
                }
                Ok(false) => {}
                Err(err) => return Err(MendError::Failure(err)),
            }

            let (logs, logs_expired) = match self.collect_logs(repository, run.id).await {
                Ok(logs) => (logs, false),
                Err(VcsError::LogsExpired { .. }) => (String::new(), true),
                Err(err) => {
                    // Malformed or partial upstream data: log and let the
                    // tick complete with what we have.
                    warn!(repository, run_id, error = %err, "log collection failed");
                    continue;
                }
            };

            let failure_reason = if logs_expired {
                "logs unavailable (expired or deleted)".to_string()
            } else {
                extract_failure_reason(&logs)
            };

            let failure = store
                .failures()
                .insert(NewFailure {
                    repository: repository.to_string(),
                    branch: run.head_branch.clone(),
                    workflow: run.workflow.clone(),
                    workflow_run_id: run_id.clone(),
                    commit_sha: run.head_sha.clone(),
                    failure_reason,
                    logs,
                    detected_at: self.clock.now(),
                })
                .map_err(MendError::Failure)?;

            store
                .audit()
                .append(
                    AuditEvent::new("poller", AuditAction::Detection, AuditOutcome::Success)
                        .failure(&failure.id)
                        .details(json!({
                            "repository": repository,
                            "branch": failure.branch,
                            "workflow": failure.workflow,
                            "run_id": run_id,
                            "commit": failure.commit_sha,
                        }))
                        .into_entry(self.clock.now()),
                )
                .map_err(MendError::Audit)?;

            let failure = if logs_expired {
                store
                    .failures()
                    .set_status(
                        &failure.id,
                        FailureStatus::Failed,
                        Some("logs unavailable (expired or deleted)".to_string()),
                        self.clock.now(),
                    )
                    .map_err(MendError::Failure)?
            } else {
                failure
            };

            info!(
                failure_id = %failure.id,
                repository,
                branch = %failure.branch,
                run_id,
                "new failure detected"
            );
            detected.push(failure);
        }
        Ok(detected)
    }

    /// Aggregate the failed jobs' logs, keeping a bounded tail.
    async fn collect_logs(&self, repository: &str, run_id: u64) -> Result<String, VcsError> {
        let jobs = self.vcs.run_jobs(repository, run_id).await?;
        let failed: Vec<_> = jobs
            .into_iter()
            .filter(|job| job.conclusion == Some(RunConclusion::Failure))
            .collect();

        let mut combined = String::new();
        let mut any_logs = false;
        let mut all_expired = !failed.is_empty();
        for job in failed {
            match self.vcs.job_logs(repository, job.id).await {
                Ok(logs) if !logs.is_empty() => {
                    any_logs = true;
                    all_expired = false;
                    combined.push_str(&format!("--- LOGS FOR JOB: {} ---\n", job.name));
                    combined.push_str(&logs);
                    combined.push('\n');
                }
                Ok(_) => {
                    all_expired = false;
                }
                Err(VcsError::LogsExpired { .. }) => {}
                Err(err) => return Err(err),
            }
        }
        if !any_logs && all_expired {
            return Err(VcsError::LogsExpired {
                run_id: run_id.to_string(),
            });
        }
        Ok(tail_bytes(&combined, LOG_TAIL_BYTES).to_string())
    }
}

/// First line matching a known error heuristic, else the last 40 non-empty
/// lines joined.
pub fn extract_failure_reason(logs: &str) -> String {
    for line in logs.lines() {
        let lower = line.to_lowercase();
        if ERROR_KEYWORDS.iter().any(|keyword| lower.contains(keyword)) {
            return cap_chars(line.trim(), REASON_MAX_CHARS);
        }
    }

    let tail: Vec<&str> = logs
        .lines()
        .filter(|line| !line.trim().is_empty())
        .collect();
    let start = tail.len().saturating_sub(FALLBACK_REASON_LINES);
    let joined = tail[start..].join(" ");
    if joined.is_empty() {
        "unknown failure reason".to_string()
    } else {
        cap_chars(&joined, REASON_MAX_CHARS)
    }
}

fn cap_chars(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

/// Last `max` bytes, snapped to a char boundary.
fn tail_bytes(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut start = text.len() - max;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    &text[start..]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reason_prefers_first_error_line() {
        let logs = "setting up job\ninstalling deps\nError: npm install timeout after 30s\nmore output";
        assert_eq!(
            extract_failure_reason(logs),
            "Error: npm install timeout after 30s"
        );
    }

    #[test]
    fn reason_falls_back_to_tail_lines() {
        let logs = "step one\nstep two\nstep three";
        assert_eq!(extract_failure_reason(logs), "step one step two step three");
    }

    #[test]
    fn reason_is_capped() {
        let logs = format!("Error: {}", "x".repeat(500));
        assert_eq!(extract_failure_reason(&logs).chars().count(), 200);
    }

    #[test]
    fn empty_logs_yield_unknown() {
        assert_eq!(extract_failure_reason(""), "unknown failure reason");
    }

    #[test]
    fn tail_bytes_respects_char_boundaries() {
        let text = format!("{}日本語テキスト", "a".repeat(10));
        let tail = tail_bytes(&text, 8);
        assert!(tail.len() <= 8);
        assert!(tail.chars().count() > 0);
    }
}
