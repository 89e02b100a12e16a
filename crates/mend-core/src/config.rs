//! Runtime configuration: JSON file merged over defaults, secrets env-only.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Repositories to monitor, `owner/name`.
    pub repositories: Vec<String>,
    pub risk_threshold: u8,
    pub protected_repositories: Vec<String>,
    /// Anchored regex patterns marking application source; edits touching
    /// these escalate to approval.
    pub application_source_patterns: Vec<String>,
    pub approval_timeout_hours: u64,
    pub polling_interval_minutes: u64,
    pub snapshot_retention_days: u64,
    pub health_check_delay_minutes: u64,
    pub circuit_failure_threshold: u32,
    pub circuit_auto_reset_hours: u64,
    pub dry_run: bool,
    /// Record patterns for failed fixes too (negative examples).
    pub store_negative_patterns: bool,
    pub pattern_cap_per_repo: usize,
    pub reviewers: ReviewerSet,
    pub channels: Channels,
    pub repository_overrides: HashMap<String, RepoOverride>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            repositories: Vec::new(),
            risk_threshold: 5,
            protected_repositories: Vec::new(),
            application_source_patterns: vec![
                "^src/".to_string(),
                "^lib/".to_string(),
                "^app/".to_string(),
                "^tests?/".to_string(),
                r"\.(test|spec)\.[a-z]+$".to_string(),
            ],
            approval_timeout_hours: 24,
            polling_interval_minutes: 5,
            snapshot_retention_days: 7,
            health_check_delay_minutes: 5,
            circuit_failure_threshold: 3,
            circuit_auto_reset_hours: 24,
            dry_run: false,
            store_negative_patterns: false,
            pattern_cap_per_repo: 500,
            reviewers: ReviewerSet::default(),
            channels: Channels::default(),
            repository_overrides: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReviewerSet {
    pub senior: Vec<String>,
    pub team: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Channels {
    pub alerts: String,
    pub approvals: String,
    pub critical: String,
}

impl Default for Channels {
    fn default() -> Self {
        Self {
            alerts: "#ci-alerts".to_string(),
            approvals: "#ci-approvals".to_string(),
            critical: "#ci-critical".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RepoOverride {
    pub risk_threshold: Option<u8>,
    pub protected: Option<bool>,
    pub reviewers: Option<ReviewerSet>,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let config = if path.exists() {
            let content =
                std::fs::read_to_string(path).map_err(|err| ConfigError::Unreadable {
                    path: path.display().to_string(),
                    message: err.to_string(),
                })?;
            serde_json::from_str::<Config>(&content).map_err(|err| ConfigError::Invalid {
                name: path.display().to_string(),
                message: err.to_string(),
            })?
        } else {
            Config::default()
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.risk_threshold > 10 {
            return Err(ConfigError::Invalid {
                name: "risk_threshold".to_string(),
                message: "must be between 0 and 10".to_string(),
            });
        }
        if self.approval_timeout_hours == 0 {
            return Err(ConfigError::Invalid {
                name: "approval_timeout_hours".to_string(),
                message: "must be positive".to_string(),
            });
        }
        if self.polling_interval_minutes == 0 {
            return Err(ConfigError::Invalid {
                name: "polling_interval_minutes".to_string(),
                message: "must be positive".to_string(),
            });
        }
        if self.circuit_failure_threshold == 0 {
            return Err(ConfigError::Invalid {
                name: "circuit_failure_threshold".to_string(),
                message: "must be positive".to_string(),
            });
        }
        for (repo, over) in &self.repository_overrides {
            if let Some(threshold) = over.risk_threshold {
                if threshold > 10 {
                    return Err(ConfigError::Invalid {
                        name: format!("repository_overrides.{repo}.risk_threshold"),
                        message: "must be between 0 and 10".to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    pub fn risk_threshold_for(&self, repository: &str) -> u8 {
        self.repository_overrides
            .get(repository)
            .and_then(|over| over.risk_threshold)
            .unwrap_or(self.risk_threshold)
    }

    pub fn is_protected(&self, repository: &str) -> bool {
        if let Some(over) = self.repository_overrides.get(repository) {
            if let Some(protected) = over.protected {
                return protected;
            }
        }
        self.protected_repositories
            .iter()
            .any(|repo| repo == repository)
    }

    pub fn reviewers_for(&self, repository: &str) -> &ReviewerSet {
        self.repository_overrides
            .get(repository)
            .and_then(|over| over.reviewers.as_ref())
            .unwrap_or(&self.reviewers)
    }
}

/// Env-only secrets; never serialized and never written to disk.
#[derive(Clone)]
pub struct Secrets {
    pub github_token: String,
    pub llm_api_key: String,
    pub notifier_webhook: Option<String>,
    pub embedding_api_key: Option<String>,
}

impl std::fmt::Debug for Secrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Secrets").finish_non_exhaustive()
    }
}

impl Secrets {
    pub fn from_env() -> Result<Self, ConfigError> {
        let github_token = require_env("GITHUB_TOKEN")?;
        let llm_api_key = require_env("LLM_API_KEY")?;
        Ok(Self {
            github_token,
            llm_api_key,
            notifier_webhook: std::env::var("NOTIFIER_WEBHOOK_URL").ok().filter(|v| !v.is_empty()),
            embedding_api_key: std::env::var("EMBEDDING_API_KEY").ok().filter(|v| !v.is_empty()),
        })
    }
}

fn require_env(name: &'static str) -> Result<String, ConfigError> {
    match std::env::var(name) {
        Ok(value) if !value.is_empty() => Ok(value),
        _ => Err(ConfigError::Missing {
            name: name.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_validate() {
        Config::default().validate().expect("defaults valid");
    }

    #[test]
    fn per_repo_override_wins() {
        let mut config = Config::default();
        config.repository_overrides.insert(
            "x/y".to_string(),
            RepoOverride {
                risk_threshold: Some(2),
                protected: Some(true),
                reviewers: None,
            },
        );
        assert_eq!(config.risk_threshold_for("x/y"), 2);
        assert_eq!(config.risk_threshold_for("x/z"), 5);
        assert!(config.is_protected("x/y"));
        assert!(!config.is_protected("x/z"));
    }

    #[test]
    fn protected_list_still_applies_without_override() {
        let mut config = Config::default();
        config.protected_repositories.push("acme/payments".to_string());
        assert!(config.is_protected("acme/payments"));
    }

    #[test]
    fn load_rejects_out_of_range_threshold() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{}", r#"{"risk_threshold": 11}"#).unwrap();
        let err = Config::load(file.path()).unwrap_err();
        assert!(err.to_string().contains("risk_threshold"));
    }

    #[test]
    fn load_merges_partial_file_over_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            "{}",
            r#"{"repositories": ["x/y"], "polling_interval_minutes": 2}"#
        )
        .unwrap();
        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.repositories, vec!["x/y".to_string()]);
        assert_eq!(config.polling_interval_minutes, 2);
        assert_eq!(config.risk_threshold, 5);
    }
}
