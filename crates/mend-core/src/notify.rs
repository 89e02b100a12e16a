//! Outbound chat notification boundary.

use crate::error::NotifyError;
use crate::types::FailureId;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    InitialAlert,
    Analysis,
    ApprovalRequest,
    RemediationResult,
    Critical,
    Escalation,
    WeeklyReport,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub kind: NotificationKind,
    pub channel: String,
    pub title: String,
    pub body: String,
    pub failure_id: Option<FailureId>,
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, notification: Notification) -> Result<(), NotifyError>;
}
