use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum FailureStatus {
    Detected,
    Analyzed,
    Gated,
    PrOpen,
    Remediated,
    RolledBack,
    Failed,
    DeveloperNotified,
}

impl FailureStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Remediated | Self::RolledBack | Self::Failed | Self::DeveloperNotified
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ErrorType {
    Devops,
    Developer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Effort {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum CircuitPhase {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotStatus {
    Active,
    RolledBack,
    Expired,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
    Expired,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum DecisionKind {
    Classification,
    FixGeneration,
    RiskAssessment,
    FileSelection,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ImpactLevel {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Detection,
    Analysis,
    Validation,
    Approval,
    Remediation,
    Rollback,
    Notification,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    Success,
    Failure,
    Pending,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingFamily {
    Remote,
    Hashed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_statuses() {
        assert!(FailureStatus::Remediated.is_terminal());
        assert!(FailureStatus::RolledBack.is_terminal());
        assert!(FailureStatus::Failed.is_terminal());
        assert!(FailureStatus::DeveloperNotified.is_terminal());
        assert!(!FailureStatus::Detected.is_terminal());
        assert!(!FailureStatus::PrOpen.is_terminal());
    }

    #[test]
    fn snake_case_wire_format() {
        let json = serde_json::to_string(&FailureStatus::DeveloperNotified).unwrap();
        assert_eq!(json, "\"developer_notified\"");
        let json = serde_json::to_string(&CircuitPhase::HalfOpen).unwrap();
        assert_eq!(json, "\"half_open\"");
    }
}
