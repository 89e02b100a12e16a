//! Prompt assembly for classification and fix generation. Section order is
//! fixed: role preamble, failure facts, historical context, personality
//! snapshot, output schema reminder.

use crate::types::{Analysis, Failure, PersonalityProfile};

pub const ANALYSIS_SYSTEM: &str = r#"You are a CI failure analysis expert. You output ONLY valid JSON.
Example valid response:
{
    "error_type": "DEVOPS",
    "category": "config",
    "risk_score": 3,
    "confidence": 95,
    "proposed_fix": "Fix typo in workflow yaml",
    "effort_estimate": "low",
    "affected_components": ["workflow"],
    "reasoning": "The job failed because of a syntax error in ci.yml",
    "files_to_modify": [".github/workflows/ci.yml"],
    "fix_commands": []
}"#;

pub const FILE_FIX_SYSTEM: &str = "You are a specialized code repair tool. \
Output ONLY the raw fixed file content. NO markdown fences, NO explanations, \
NO text other than the literal file content.";

const CLASSIFICATION_RULES: &str = r#"CLASSIFICATION RULES:
- DEVOPS: infrastructure, deployment, CI config (.github/workflows/*.yml, Dockerfile, docker-compose.yml, dependency manifests), dependency resolution, runner timeouts, environment issues.
- DEVELOPER: application code bugs, failing unit/integration tests, compile or lint errors naming in-repo source files.

REQUIRED JSON structure:
{
    "error_type": "DEVOPS or DEVELOPER",
    "category": "dependency, timeout, config, flaky_test, infrastructure, test_failure, build_error, or lint_error",
    "risk_score": 0-10,
    "confidence": 0-100,
    "proposed_fix": "description",
    "effort_estimate": "low, medium, or high",
    "affected_components": ["components"],
    "reasoning": "explanation",
    "files_to_modify": ["EXACT/path/to/files"],
    "fix_commands": ["commands"]
}"#;

const LOG_TAIL_CHARS: usize = 5_000;

pub fn analysis_prompt(
    failure: &Failure,
    historical_context: &str,
    profile: Option<&PersonalityProfile>,
) -> String {
    let mut prompt = format!(
        "Analyze this CI workflow failure.\n\n\
         Repository: {}\nBranch: {}\nWorkflow: {}\nCommit: {}\nFailure Reason: {}\n",
        failure.repository,
        failure.branch,
        failure.workflow,
        failure.commit_sha,
        failure.failure_reason,
    );

    if !historical_context.is_empty() {
        prompt.push('\n');
        prompt.push_str(historical_context);
    }

    if let Some(profile) = profile {
        if profile.total_failures > 0 {
            prompt.push_str(&format!(
                "\nREPOSITORY PROFILE (trailing 30 days):\n\
                 - dominant category: {} \n\
                 - flaky test rate: {:.0}%\n\
                 - remediation success rate: {:.0}%\n",
                profile.dominant_category,
                profile.flaky_rate * 100.0,
                profile.success_rate * 100.0,
            ));
            for detected in &profile.detected_patterns {
                prompt.push_str(&format!("- note: {}\n", detected.description));
            }
        }
    }

    prompt.push('\n');
    prompt.push_str(CLASSIFICATION_RULES);
    prompt.push_str(&format!(
        "\n\nLogs (last part):\n{}\n\nOUTPUT ONLY THE JSON OBJECT. NO MARKDOWN. NO PREAMBLE. NO FENCES.",
        log_tail(&failure.logs, LOG_TAIL_CHARS)
    ));
    prompt
}

pub fn file_fix_prompt(
    failure: &Failure,
    analysis: &Analysis,
    path: &str,
    current_content: &str,
) -> String {
    format!(
        "Target File: {path}\nCurrent Content:\n```\n{current_content}\n```\n\n\
         Failure Context:\nReason: {}\nAnalysis: {}\nProposed Plan: {}\n\n\
         Output only the full fixed file content. No markdown, no explanations.",
        failure.failure_reason, analysis.reasoning, analysis.proposed_fix,
    )
}

fn log_tail(logs: &str, max_chars: usize) -> &str {
    let count = logs.chars().count();
    if count <= max_chars {
        return logs;
    }
    let skip = count - max_chars;
    match logs.char_indices().nth(skip) {
        Some((idx, _)) => &logs[idx..],
        None => logs,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{FailureId, FailureStatus};
    use chrono::Utc;

    fn failure() -> Failure {
        Failure {
            id: FailureId::generate(),
            repository: "x/y".to_string(),
            branch: "main".to_string(),
            workflow: "build".to_string(),
            workflow_run_id: "42".to_string(),
            commit_sha: "abc1234".to_string(),
            failure_reason: "npm install timeout after 30s".to_string(),
            logs: "a".repeat(10_000),
            status: FailureStatus::Detected,
            status_reason: None,
            detected_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn sections_appear_in_order() {
        let failure = failure();
        let prompt = analysis_prompt(&failure, "HISTORICAL CONTEXT - earlier fix", None);
        let facts = prompt.find("Repository: x/y").unwrap();
        let history = prompt.find("HISTORICAL CONTEXT").unwrap();
        let rules = prompt.find("CLASSIFICATION RULES").unwrap();
        let logs = prompt.find("Logs (last part)").unwrap();
        assert!(facts < history && history < rules && rules < logs);
    }

    #[test]
    fn log_tail_is_bounded() {
        let prompt = analysis_prompt(&failure(), "", None);
        // 5k log tail plus the fixed sections stays well under 7k.
        assert!(prompt.len() < 7_000);
    }

    #[test]
    fn profile_section_is_omitted_without_data() {
        let prompt = analysis_prompt(&failure(), "", None);
        assert!(!prompt.contains("REPOSITORY PROFILE"));
    }
}
