//! Safety gate: composes circuit state, repository protection, edit surface,
//! risk threshold, and blast radius into an allow/deny verdict. Gates run in
//! order and short-circuit on Block; every outcome is recorded.

use crate::blast::{BlastRadius, BlastRadiusAnalysis};
use crate::circuit::{CircuitBreaker, CircuitRepository};
use crate::config::Config;
use crate::error::CircuitError;
use crate::signature::FailureSignature;
use crate::types::{Analysis, Failure};
use regex::Regex;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};
use utoipa::ToSchema;

pub const BLAST_APPROVAL_THRESHOLD: u8 = 8;
pub const BLAST_BLOCK_THRESHOLD: u8 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    AutoApply,
    RequireApproval,
    Block,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum GateName {
    Circuit,
    ProtectedRepository,
    ApplicationCode,
    FileSelection,
    RiskThreshold,
    BlastRadius,
    DryRun,
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct GateOutcome {
    pub gate: GateName,
    pub passed: bool,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct GateDecision {
    pub verdict: Verdict,
    /// Dry-run override: side effects downstream are intercepted.
    pub simulated: bool,
    pub outcomes: Vec<GateOutcome>,
    pub blast: Option<BlastRadiusAnalysis>,
}

impl GateDecision {
    /// First failing reason, for audit and notifications.
    pub fn reason(&self) -> String {
        self.outcomes
            .iter()
            .find(|outcome| !outcome.passed)
            .map(|outcome| outcome.reason.clone())
            .unwrap_or_else(|| "all safety checks passed".to_string())
    }
}

pub struct SafetyGate {
    config: Arc<Config>,
    application_source: Vec<Regex>,
}

impl SafetyGate {
    pub fn new(config: Arc<Config>) -> Self {
        let application_source = config
            .application_source_patterns
            .iter()
            .filter_map(|pattern| match Regex::new(pattern) {
                Ok(re) => Some(re),
                Err(err) => {
                    warn!(pattern, error = %err, "invalid application source pattern ignored");
                    None
                }
            })
            .collect();
        Self {
            config,
            application_source,
        }
    }

    pub async fn evaluate<R: CircuitRepository>(
        &self,
        circuits: &R,
        breaker: &CircuitBreaker,
        failure: &Failure,
        analysis: &Analysis,
    ) -> Result<GateDecision, CircuitError> {
        let mut outcomes = Vec::new();
        let mut verdict = Verdict::AutoApply;

        // 1. Circuit check: OPEN blocks outright, HALF_OPEN admits a trial.
        let signature =
            FailureSignature::new(&failure.repository, &failure.branch, &failure.failure_reason);
        let allowed = breaker.is_allowed(circuits, &signature).await?;
        outcomes.push(GateOutcome {
            gate: GateName::Circuit,
            passed: allowed,
            reason: if allowed {
                "circuit closed or half-open".to_string()
            } else {
                "circuit_open".to_string()
            },
        });
        if !allowed {
            warn!(failure_id = %failure.id, signature = %signature.key(), "blocked by open circuit");
            return Ok(GateDecision {
                verdict: Verdict::Block,
                simulated: false,
                outcomes,
                blast: None,
            });
        }

        // 2. Protected repository: escalate regardless of risk.
        let protected = self.config.is_protected(&failure.repository);
        outcomes.push(GateOutcome {
            gate: GateName::ProtectedRepository,
            passed: !protected,
            reason: if protected {
                format!("repository {} is protected", failure.repository)
            } else {
                "repository not protected".to_string()
            },
        });
        if protected {
            verdict = Verdict::RequireApproval;
        }

        // 3. Application code: edits into application source need a human.
        let app_files: Vec<&String> = analysis
            .files_to_modify
            .iter()
            .filter(|path| {
                self.application_source
                    .iter()
                    .any(|pattern| pattern.is_match(path))
            })
            .collect();
        outcomes.push(GateOutcome {
            gate: GateName::ApplicationCode,
            passed: app_files.is_empty(),
            reason: if app_files.is_empty() {
                "no application source touched".to_string()
            } else {
                format!(
                    "touches application source: {}",
                    app_files
                        .iter()
                        .map(|s| s.as_str())
                        .collect::<Vec<_>>()
                        .join(", ")
                )
            },
        });
        if !app_files.is_empty() {
            verdict = Verdict::RequireApproval;
        }

        // 4. File selection: a fix with no target files needs manual review.
        let has_files = !analysis.files_to_modify.is_empty();
        outcomes.push(GateOutcome {
            gate: GateName::FileSelection,
            passed: has_files,
            reason: if has_files {
                format!("files to modify: {}", analysis.files_to_modify.join(", "))
            } else {
                "no files identified for modification".to_string()
            },
        });
        if !has_files {
            verdict = Verdict::RequireApproval;
        }

        // 5. Risk threshold.
        let threshold = self.config.risk_threshold_for(&failure.repository);
        let under = analysis.risk_score < threshold;
        outcomes.push(GateOutcome {
            gate: GateName::RiskThreshold,
            passed: under,
            reason: if under {
                format!("risk {} < threshold {}", analysis.risk_score, threshold)
            } else {
                format!("risk {} >= threshold {}", analysis.risk_score, threshold)
            },
        });
        if !under {
            verdict = Verdict::RequireApproval;
        }

        // 6. Blast radius: >= 8 escalates, >= 10 blocks.
        let blast = BlastRadius::estimate(
            &failure.repository,
            &failure.branch,
            &analysis.files_to_modify,
            &analysis.category,
        );
        let blast_pass = blast.score < BLAST_APPROVAL_THRESHOLD;
        outcomes.push(GateOutcome {
            gate: GateName::BlastRadius,
            passed: blast_pass,
            reason: format!("blast radius {} ({:?})", blast.score, blast.level),
        });
        if blast.score >= BLAST_BLOCK_THRESHOLD {
            return Ok(GateDecision {
                verdict: Verdict::Block,
                simulated: false,
                outcomes,
                blast: Some(blast),
            });
        }
        if !blast_pass {
            verdict = Verdict::RequireApproval;
        }

        // 7. Dry-run override: keep the verdict, intercept side effects.
        let simulated = self.config.dry_run;
        if simulated {
            outcomes.push(GateOutcome {
                gate: GateName::DryRun,
                passed: true,
                reason: "dry-run enabled, side effects intercepted".to_string(),
            });
        }

        info!(
            failure_id = %failure.id,
            verdict = ?verdict,
            simulated,
            "safety gate evaluated"
        );
        Ok(GateDecision {
            verdict,
            simulated,
            outcomes,
            blast: Some(blast),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit::CircuitBreaker;
    use crate::clock::ManualClock;
    use crate::error::CircuitError;
    use crate::types::{
        CircuitPhase, CircuitState, Effort, ErrorType, FailureId, FailureStatus,
    };
    use chrono::{TimeZone, Utc};
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    struct MemCircuits {
        states: Mutex<HashMap<String, CircuitState>>,
    }

    impl CircuitRepository for MemCircuits {
        fn get(&self, signature: &str) -> Result<Option<CircuitState>, CircuitError> {
            Ok(self.states.lock().unwrap().get(signature).cloned())
        }
        fn upsert(&self, state: &CircuitState) -> Result<(), CircuitError> {
            self.states
                .lock()
                .unwrap()
                .insert(state.signature.clone(), state.clone());
            Ok(())
        }
        fn list_open(&self) -> Result<Vec<CircuitState>, CircuitError> {
            Ok(self
                .states
                .lock()
                .unwrap()
                .values()
                .filter(|s| s.phase == CircuitPhase::Open)
                .cloned()
                .collect())
        }
        fn count_open(&self) -> Result<u64, CircuitError> {
            Ok(self.list_open()?.len() as u64)
        }
    }

    fn failure(repository: &str, branch: &str) -> Failure {
        Failure {
            id: FailureId::generate(),
            repository: repository.to_string(),
            branch: branch.to_string(),
            workflow: "build".to_string(),
            workflow_run_id: "42".to_string(),
            commit_sha: "abc1234".to_string(),
            failure_reason: "npm install timeout after 30s".to_string(),
            logs: String::new(),
            status: FailureStatus::Analyzed,
            status_reason: None,
            detected_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn analysis(failure: &Failure, risk: u8, files: Vec<String>) -> Analysis {
        Analysis {
            failure_id: failure.id.clone(),
            error_type: ErrorType::Devops,
            category: "timeout".to_string(),
            risk_score: risk,
            confidence: 90,
            effort: Effort::Low,
            proposed_fix: "raise the timeout".to_string(),
            files_to_modify: files,
            fix_operations: Vec::new(),
            fix_commands: Vec::new(),
            reasoning: "install exceeded the limit".to_string(),
            affected_components: vec!["workflow".to_string()],
            model_id: "test".to_string(),
            response_latency_ms: 10,
            created_at: Utc::now(),
        }
    }

    fn harness(config: Config) -> (SafetyGate, CircuitBreaker, MemCircuits) {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 6, 3, 12, 0, 0).unwrap(),
        ));
        (
            SafetyGate::new(Arc::new(config)),
            CircuitBreaker::new(3, 24, clock),
            MemCircuits::default(),
        )
    }

    #[tokio::test]
    async fn low_risk_workflow_fix_auto_applies() {
        let (gate, breaker, circuits) = harness(Config::default());
        let failure = failure("x/y", "main");
        let analysis = analysis(&failure, 3, vec![".github/workflows/build.yml".to_string()]);
        let decision = gate
            .evaluate(&circuits, &breaker, &failure, &analysis)
            .await
            .unwrap();
        assert_eq!(decision.verdict, Verdict::AutoApply);
        assert!(!decision.simulated);
        assert!(decision.outcomes.iter().all(|o| o.passed));
    }

    #[tokio::test]
    async fn open_circuit_blocks_before_other_gates() {
        let (gate, breaker, circuits) = harness(Config::default());
        let failure = failure("x/y", "main");
        let signature =
            FailureSignature::new(&failure.repository, &failure.branch, &failure.failure_reason);
        for _ in 0..3 {
            breaker.record_failure(&circuits, &signature).await.unwrap();
        }
        let analysis = analysis(&failure, 1, vec![".github/workflows/build.yml".to_string()]);
        let decision = gate
            .evaluate(&circuits, &breaker, &failure, &analysis)
            .await
            .unwrap();
        assert_eq!(decision.verdict, Verdict::Block);
        assert_eq!(decision.reason(), "circuit_open");
        // Short-circuit: only the circuit gate ran.
        assert_eq!(decision.outcomes.len(), 1);
    }

    #[tokio::test]
    async fn risk_at_threshold_requires_approval() {
        let (gate, breaker, circuits) = harness(Config::default());
        let failure = failure("x/y", "main");
        let analysis = analysis(&failure, 5, vec![".github/workflows/build.yml".to_string()]);
        let decision = gate
            .evaluate(&circuits, &breaker, &failure, &analysis)
            .await
            .unwrap();
        assert_eq!(decision.verdict, Verdict::RequireApproval);
        assert!(decision.reason().contains("risk 5 >= threshold 5"));
    }

    #[tokio::test]
    async fn protected_repository_requires_approval_at_any_risk() {
        let mut config = Config::default();
        config.protected_repositories.push("x/y".to_string());
        let (gate, breaker, circuits) = harness(config);
        let failure = failure("x/y", "main");
        let analysis = analysis(&failure, 0, vec![".github/workflows/build.yml".to_string()]);
        let decision = gate
            .evaluate(&circuits, &breaker, &failure, &analysis)
            .await
            .unwrap();
        assert_eq!(decision.verdict, Verdict::RequireApproval);
    }

    #[tokio::test]
    async fn application_source_requires_approval() {
        let (gate, breaker, circuits) = harness(Config::default());
        let failure = failure("x/y", "main");
        let analysis = analysis(&failure, 2, vec!["src/billing/handler.py".to_string()]);
        let decision = gate
            .evaluate(&circuits, &breaker, &failure, &analysis)
            .await
            .unwrap();
        assert_eq!(decision.verdict, Verdict::RequireApproval);
        assert!(decision.reason().contains("application source"));
    }

    #[tokio::test]
    async fn empty_file_selection_requires_approval() {
        let (gate, breaker, circuits) = harness(Config::default());
        let failure = failure("x/y", "main");
        let analysis = analysis(&failure, 2, Vec::new());
        let decision = gate
            .evaluate(&circuits, &breaker, &failure, &analysis)
            .await
            .unwrap();
        assert_eq!(decision.verdict, Verdict::RequireApproval);
        assert!(decision.reason().contains("no files identified"));
    }

    #[tokio::test]
    async fn dry_run_keeps_verdict_but_marks_simulated() {
        let mut config = Config::default();
        config.dry_run = true;
        let (gate, breaker, circuits) = harness(config);
        let failure = failure("x/y", "main");
        let analysis = analysis(&failure, 3, vec![".github/workflows/build.yml".to_string()]);
        let decision = gate
            .evaluate(&circuits, &breaker, &failure, &analysis)
            .await
            .unwrap();
        assert_eq!(decision.verdict, Verdict::AutoApply);
        assert!(decision.simulated);
    }

    #[tokio::test]
    async fn per_repo_threshold_reclassifies() {
        let mut config = Config::default();
        config.repository_overrides.insert(
            "x/y".to_string(),
            crate::config::RepoOverride {
                risk_threshold: Some(2),
                protected: None,
                reviewers: None,
            },
        );
        let (gate, breaker, circuits) = harness(config);
        let failure = failure("x/y", "main");
        let analysis = analysis(&failure, 3, vec![".github/workflows/build.yml".to_string()]);
        let decision = gate
            .evaluate(&circuits, &breaker, &failure, &analysis)
            .await
            .unwrap();
        assert_eq!(decision.verdict, Verdict::RequireApproval);
    }
}
