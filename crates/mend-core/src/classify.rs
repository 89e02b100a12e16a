//! LLM-driven failure classification: prompt assembly, bounded retries,
//! multi-strategy parsing, personality-adjusted confidence, and decision
//! ledger entries.

use crate::backoff::{Backoff, MAX_RETRIES};
use crate::clock::Clock;
use crate::decisions::{DecisionBuilder, DecisionRepository};
use crate::error::{ClassifyError, FailureError, LlmError, MendError};
use crate::llm::{ChatRequest, ModelClient};
use crate::memory::PatternMemory;
use crate::parse::parse_analysis;
use crate::personality::PersonalityProfiler;
use crate::prompt::{analysis_prompt, ANALYSIS_SYSTEM};
use crate::store::Store;
use crate::types::{
    Analysis, DecisionKind, ErrorType, Failure, FixOperation, FixOperationKind,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

pub trait AnalysisRepository {
    fn insert(&self, analysis: &Analysis) -> Result<(), FailureError>;
    fn get(&self, id: &crate::types::FailureId) -> Result<Option<Analysis>, FailureError>;
    /// (risk_score, count) pairs for the dashboard histogram.
    fn risk_distribution(&self) -> Result<Vec<(u8, u64)>, FailureError>;
}

const ANALYSIS_MAX_TOKENS: u32 = 2_000;
/// Bound on the personality adjustment, in absolute percentage points.
const MAX_ADJUST_POINTS: i16 = 20;

pub struct Classifier {
    model: Arc<dyn ModelClient>,
    memory: Arc<PatternMemory>,
    profiler: Arc<PersonalityProfiler>,
    clock: Arc<dyn Clock>,
    backoff: Backoff,
}

impl Classifier {
    pub fn new(
        model: Arc<dyn ModelClient>,
        memory: Arc<PatternMemory>,
        profiler: Arc<PersonalityProfiler>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            model,
            memory,
            profiler,
            clock,
            backoff: Backoff::default(),
        }
    }

    /// Classify one failure into an Analysis, storing it plus the
    /// classification and file-selection decision records.
    pub async fn classify<S: Store>(
        &self,
        store: &S,
        failure: &Failure,
    ) -> Result<Analysis, MendError> {
        let historical = self
            .memory
            .historical_context(&failure.failure_reason, "unknown", &failure.repository)
            .await;
        let profile = self
            .profiler
            .profile(&store.failures(), &failure.repository)
            .ok();
        let prompt = analysis_prompt(failure, &historical, profile.as_ref());

        let response = self.chat_with_retries(&prompt).await?;
        let parsed = parse_analysis(&response.content).map_err(|err| {
            warn!(failure_id = %failure.id, error = %err, "analysis response unparseable");
            err
        })?;

        // Personality adjustment, bounded to +/- 20 absolute points.
        let raw_adjust = self
            .profiler
            .confidence_adjustment(
                &store.failures(),
                &failure.repository,
                &parsed.category,
                failure.detected_at,
            )
            .unwrap_or(0.0);
        let adjust_points =
            ((raw_adjust * 100.0).round() as i16).clamp(-MAX_ADJUST_POINTS, MAX_ADJUST_POINTS);
        let confidence =
            (i16::from(parsed.confidence) + adjust_points).clamp(0, 100) as u8;

        let now = self.clock.now();
        let fix_operations = parsed
            .files_to_modify
            .iter()
            .map(|path| FixOperation {
                path: path.clone(),
                operation: FixOperationKind::Update,
                rationale: parsed.proposed_fix.clone(),
            })
            .collect();

        let analysis = Analysis {
            failure_id: failure.id.clone(),
            error_type: parsed.error_type,
            category: parsed.category.clone(),
            risk_score: parsed.risk_score,
            confidence,
            effort: parsed.effort,
            proposed_fix: parsed.proposed_fix.clone(),
            files_to_modify: parsed.files_to_modify.clone(),
            fix_operations,
            fix_commands: parsed.fix_commands.clone(),
            reasoning: parsed.reasoning.clone(),
            affected_components: parsed.affected_components.clone(),
            model_id: response.model.clone(),
            response_latency_ms: response.latency_ms,
            created_at: now,
        };

        store
            .analyses()
            .insert(&analysis)
            .map_err(MendError::Failure)?;

        let rejected = match parsed.error_type {
            ErrorType::Devops => "developer",
            ErrorType::Developer => "devops",
        };
        let classification = DecisionBuilder::new(
            failure.id.clone(),
            DecisionKind::Classification,
            format!("{:?}: {}", parsed.error_type, parsed.category).to_lowercase(),
        )
        .alternative(rejected, 0.0, "lower model confidence")
        .context(&prompt)
        .confidence(f64::from(confidence) / 100.0)
        .model(&response.model, response.latency_ms)
        .build(now);
        store
            .decisions()
            .append(classification)
            .map_err(MendError::Audit)?;

        if !analysis.files_to_modify.is_empty() {
            let file_selection = DecisionBuilder::new(
                failure.id.clone(),
                DecisionKind::FileSelection,
                analysis.files_to_modify.join(", "),
            )
            .context(&prompt)
            .confidence(f64::from(confidence) / 100.0)
            .model(&response.model, response.latency_ms)
            .build(now);
            store
                .decisions()
                .append(file_selection)
                .map_err(MendError::Audit)?;
        }

        info!(
            failure_id = %failure.id,
            error_type = ?analysis.error_type,
            category = %analysis.category,
            risk = analysis.risk_score,
            confidence = analysis.confidence,
            adjust_points,
            "failure classified"
        );
        Ok(analysis)
    }

    /// Retryable errors (timeout, 5xx, network) use the shared backoff with
    /// at most three retries; rate limits honor the advertised sleep without
    /// consuming the retry budget.
    async fn chat_with_retries(
        &self,
        prompt: &str,
    ) -> Result<crate::llm::ChatResponse, ClassifyError> {
        let mut attempts = 0u32;
        let mut rate_limit_sleeps = 0u32;
        loop {
            let request = ChatRequest {
                system: ANALYSIS_SYSTEM.to_string(),
                user: prompt.to_string(),
                json_mode: true,
                max_tokens: ANALYSIS_MAX_TOKENS,
            };
            match self.model.chat(request).await {
                Ok(response) if response.content.trim().is_empty() => {
                    return Err(ClassifyError::ParseMalformed {
                        message: "empty completion".to_string(),
                    });
                }
                Ok(response) => return Ok(response),
                Err(LlmError::RateLimited { retry_after_secs }) => {
                    rate_limit_sleeps += 1;
                    if rate_limit_sleeps > MAX_RETRIES {
                        return Err(ClassifyError::RateLimited { retry_after_secs });
                    }
                    warn!(retry_after_secs, "model endpoint rate limited, honoring reset");
                    self.clock
                        .sleep(Duration::from_secs(retry_after_secs.max(1)))
                        .await;
                }
                Err(err @ (LlmError::Timeout | LlmError::Network { .. }))
                | Err(err @ LlmError::Upstream { status: 500..=599, .. }) => {
                    attempts += 1;
                    if attempts >= MAX_RETRIES {
                        return Err(match err {
                            LlmError::Timeout => ClassifyError::UpstreamTimeout,
                            other => ClassifyError::UpstreamRejected {
                                message: other.to_string(),
                            },
                        });
                    }
                    let delay = self.backoff.delay(attempts - 1);
                    warn!(attempt = attempts, ?delay, error = %err, "model call failed, retrying");
                    self.clock.sleep(delay).await;
                }
                Err(LlmError::AuthRejected) => {
                    return Err(ClassifyError::UpstreamRejected {
                        message: "authentication rejected".to_string(),
                    })
                }
                Err(other) => {
                    return Err(ClassifyError::UpstreamRejected {
                        message: other.to_string(),
                    })
                }
            }
        }
    }
}
