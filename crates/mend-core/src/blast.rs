//! Pre-change blast radius estimation for a proposed edit set.

use crate::types::ImpactLevel;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::OnceLock;
use tracing::debug;
use utoipa::ToSchema;

const FILE_WEIGHT: f64 = 0.30;
const SERVICE_WEIGHT: f64 = 0.25;
const DOWNSTREAM_WEIGHT: f64 = 0.20;
const BRANCH_WEIGHT: f64 = 0.15;
const CATEGORY_WEIGHT: f64 = 0.10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct BlastRadiusAnalysis {
    pub score: u8,
    pub level: ImpactLevel,
    pub affected_services: Vec<String>,
    pub deployment_scope: DeploymentScope,
    pub rationale: String,
    pub recommendations: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentScope {
    SingleService,
    MultiService,
    PlatformWide,
}

/// Severity table matched against each modified path; the file component is
/// the max over files so adding a file never lowers the score.
struct SeverityRule {
    pattern: Regex,
    severity: f64,
}

fn severity_rules() -> &'static Vec<SeverityRule> {
    static RULES: OnceLock<Vec<SeverityRule>> = OnceLock::new();
    RULES.get_or_init(|| {
        let table: &[(&str, f64)] = &[
            (r"\.env\.production$", 10.0),
            (r"(^|/)kubernetes/.*\.ya?ml$", 9.0),
            (r"(^|/)k8s/.*\.ya?ml$", 9.0),
            (r"(^|/)terraform/.*\.tf$", 9.0),
            (r"(^|/)infrastructure/", 9.0),
            (r"\.github/workflows/.*\.ya?ml$", 9.0),
            (r"(^|/)docker-compose\.ya?ml$", 8.0),
            (r"(^|/)Dockerfile$", 8.0),
            (r"(^|/)requirements\.txt$", 8.0),
            (r"(^|/)package\.json$", 8.0),
            (r"(^|/)go\.mod$", 8.0),
            (r"(^|/)Cargo\.toml$", 8.0),
            (r"(^|/)pom\.xml$", 8.0),
            (r"(^|/)build\.gradle$", 8.0),
            (r"(^|/)config/.*\.ya?ml$", 7.0),
        ];
        table
            .iter()
            .map(|(pattern, severity)| SeverityRule {
                pattern: Regex::new(pattern).expect("static severity pattern"),
                severity: *severity,
            })
            .collect()
    })
}

fn dependency_manifest() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(^|/)(requirements\.txt|package\.json|go\.mod|Cargo\.toml|pom\.xml|build\.gradle)$")
            .expect("static manifest pattern")
    })
}

pub struct BlastRadius;

impl BlastRadius {
    pub fn estimate(
        repository: &str,
        branch: &str,
        files_to_modify: &[String],
        failure_category: &str,
    ) -> BlastRadiusAnalysis {
        let file_score = file_criticality(files_to_modify);
        let services = affected_services(repository, files_to_modify);
        let service_score = service_impact(&services, files_to_modify);
        let downstream_score = downstream_impact(files_to_modify);
        let branch_score = branch_criticality(branch);
        let category_score = category_risk(failure_category);

        let weighted = file_score * FILE_WEIGHT
            + service_score * SERVICE_WEIGHT
            + downstream_score * DOWNSTREAM_WEIGHT
            + branch_score * BRANCH_WEIGHT
            + category_score * CATEGORY_WEIGHT;
        let score = weighted.min(10.0).floor() as u8;

        let level = if score >= 9 {
            ImpactLevel::Critical
        } else if score >= 7 {
            ImpactLevel::High
        } else if score >= 4 {
            ImpactLevel::Medium
        } else {
            ImpactLevel::Low
        };

        let deployment_scope = if downstream_score >= 8.0 {
            DeploymentScope::PlatformWide
        } else if services.len() > 3 {
            DeploymentScope::MultiService
        } else {
            DeploymentScope::SingleService
        };

        let rationale = build_rationale(
            file_score,
            service_score,
            downstream_score,
            files_to_modify,
            &services,
        );
        let recommendations = build_recommendations(level, deployment_scope, &services);

        debug!(
            repository,
            branch,
            score,
            level = ?level,
            services = services.len(),
            "blast radius estimated"
        );

        BlastRadiusAnalysis {
            score,
            level,
            affected_services: services,
            deployment_scope,
            rationale,
            recommendations,
        }
    }
}

fn file_criticality(files: &[String]) -> f64 {
    files
        .iter()
        .map(|path| {
            severity_rules()
                .iter()
                .filter(|rule| rule.pattern.is_match(path))
                .map(|rule| rule.severity)
                .fold(2.0, f64::max)
        })
        .fold(0.0, f64::max)
}

fn affected_services(repository: &str, files: &[String]) -> Vec<String> {
    let mut services = BTreeSet::new();
    for path in files {
        let mut parts = path.split('/');
        if let (Some(root), Some(name)) = (parts.next(), parts.next()) {
            if matches!(root, "services" | "apps" | "packages") {
                services.insert(name.to_string());
            }
        }
        let lower = path.to_lowercase();
        if ["shared", "common", "lib", "core"]
            .iter()
            .any(|marker| lower.contains(marker))
        {
            services.insert("shared-components".to_string());
        }
    }
    if services.is_empty() {
        let repo_name = repository.rsplit('/').next().unwrap_or(repository);
        services.insert(repo_name.to_string());
    }
    services.into_iter().collect()
}

fn service_impact(services: &[String], files: &[String]) -> f64 {
    let explicit = files
        .iter()
        .filter(|path| {
            let mut parts = path.split('/');
            matches!(parts.next(), Some("services" | "apps" | "packages"))
        })
        .count();
    if explicit == 0 {
        3.0
    } else {
        match services.len() {
            0 | 1 => 5.0,
            2..=3 => 7.0,
            _ => 9.0,
        }
    }
}

fn downstream_impact(files: &[String]) -> f64 {
    if files.iter().any(|path| dependency_manifest().is_match(path)) {
        8.0
    } else {
        2.0
    }
}

fn branch_criticality(branch: &str) -> f64 {
    let lower = branch.to_lowercase();
    if matches!(lower.as_str(), "main" | "master" | "production" | "prod") {
        10.0
    } else if ["staging", "release", "hotfix"].iter().any(|m| lower.contains(m)) {
        7.0
    } else if ["develop", "dev", "integration"].iter().any(|m| lower.contains(m)) {
        5.0
    } else {
        2.0
    }
}

fn category_risk(category: &str) -> f64 {
    match category.to_lowercase().as_str() {
        "infrastructure" | "config" | "dependency" => 8.0,
        "timeout" | "build_error" => 5.0,
        "lint_error" | "flaky_test" | "test_failure" => 2.0,
        _ => 5.0,
    }
}

fn build_rationale(
    file_score: f64,
    service_score: f64,
    downstream_score: f64,
    files: &[String],
    services: &[String],
) -> String {
    let mut reasons = Vec::new();
    if file_score >= 7.0 {
        reasons.push(format!(
            "Modifying {} file(s) including critical infrastructure",
            files.len()
        ));
    } else if file_score >= 4.0 {
        reasons.push(format!("Modifying {} file(s)", files.len()));
    }
    if service_score >= 7.0 {
        reasons.push(format!("Affects {} services", services.len()));
    }
    if downstream_score >= 7.0 {
        reasons.push("Touches dependency manifests with downstream consumers".to_string());
    }
    if reasons.is_empty() {
        reasons.push("Limited scope changes to non-critical files".to_string());
    }
    format!("{}.", reasons.join(". "))
}

fn build_recommendations(
    level: ImpactLevel,
    scope: DeploymentScope,
    services: &[String],
) -> Vec<String> {
    let mut out = Vec::new();
    if matches!(level, ImpactLevel::High | ImpactLevel::Critical) {
        out.push("Require manual approval before merge".to_string());
        out.push("Have the rollback snapshot ready".to_string());
    }
    if scope == DeploymentScope::PlatformWide {
        out.push("Coordinate with downstream consumers".to_string());
    }
    if services.len() > 1 {
        out.push(format!("Verify all {} affected services", services.len()));
    }
    if level == ImpactLevel::Critical {
        out.push("Monitor correlated workflows closely after merge".to_string());
    }
    if out.is_empty() {
        out.push("Standard review process acceptable".to_string());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn workflow_file_on_main_scores_medium() {
        let analysis = BlastRadius::estimate(
            "x/y",
            "main",
            &[".github/workflows/build.yml".to_string()],
            "timeout",
        );
        // 9*0.3 + 3*0.25 + 2*0.2 + 10*0.15 + 5*0.1 = 5.85 -> 5
        assert_eq!(analysis.score, 5);
        assert_eq!(analysis.level, ImpactLevel::Medium);
    }

    #[test]
    fn ordinary_source_on_feature_branch_is_low() {
        let analysis = BlastRadius::estimate(
            "x/y",
            "feature/foo",
            &["docs/readme.md".to_string()],
            "lint_error",
        );
        assert!(analysis.score < 4);
        assert_eq!(analysis.level, ImpactLevel::Low);
    }

    #[test]
    fn adding_files_never_decreases_score() {
        let base = BlastRadius::estimate(
            "x/y",
            "main",
            &[".github/workflows/build.yml".to_string()],
            "config",
        );
        let more = BlastRadius::estimate(
            "x/y",
            "main",
            &[
                ".github/workflows/build.yml".to_string(),
                "package.json".to_string(),
                "services/billing/handler.js".to_string(),
            ],
            "config",
        );
        assert!(more.score >= base.score);
    }

    #[test]
    fn higher_severity_branch_never_decreases_score() {
        let files = vec!["Dockerfile".to_string()];
        let feature = BlastRadius::estimate("x/y", "feature/z", &files, "config");
        let develop = BlastRadius::estimate("x/y", "develop", &files, "config");
        let release = BlastRadius::estimate("x/y", "release/1.2", &files, "config");
        let main = BlastRadius::estimate("x/y", "main", &files, "config");
        assert!(develop.score >= feature.score);
        assert!(release.score >= develop.score);
        assert!(main.score >= release.score);
    }

    #[test]
    fn production_env_and_manifest_on_main_is_high() {
        let analysis = BlastRadius::estimate(
            "x/y",
            "production",
            &[".env.production".to_string(), "package.json".to_string()],
            "infrastructure",
        );
        // 10*0.3 + 3*0.25 + 8*0.2 + 10*0.15 + 8*0.1 = 7.65 -> 7
        assert_eq!(analysis.score, 7);
        assert_eq!(analysis.level, ImpactLevel::High);
        assert!(analysis
            .recommendations
            .iter()
            .any(|r| r.contains("manual approval")));
    }

    #[test]
    fn services_derived_from_path_roots() {
        let analysis = BlastRadius::estimate(
            "x/y",
            "main",
            &[
                "services/billing/app.py".to_string(),
                "services/auth/app.py".to_string(),
            ],
            "config",
        );
        assert_eq!(
            analysis.affected_services,
            vec!["auth".to_string(), "billing".to_string()]
        );
    }

    #[test]
    fn monolith_falls_back_to_repo_name() {
        let analysis =
            BlastRadius::estimate("acme/checkout", "main", &["main.go".to_string()], "config");
        assert_eq!(analysis.affected_services, vec!["checkout".to_string()]);
    }
}
