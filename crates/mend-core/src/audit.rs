use crate::error::AuditError;
use crate::types::{
    ApprovalId, AuditAction, AuditEntry, AuditFilter, AuditId, AuditOutcome, FailureId,
};
use chrono::{DateTime, Utc};
use serde_json::Value;

pub trait AuditRepository {
    fn append(&self, entry: AuditEntry) -> Result<AuditEntry, AuditError>;
    fn query(&self, filter: AuditFilter) -> Result<Vec<AuditEntry>, AuditError>;
}

/// Builder for audit entries so call sites stay one-liners.
#[derive(Debug)]
pub struct AuditEvent {
    actor: &'static str,
    action: AuditAction,
    outcome: AuditOutcome,
    failure_id: Option<FailureId>,
    request_id: Option<ApprovalId>,
    details: Value,
    error: Option<String>,
}

impl AuditEvent {
    pub fn new(actor: &'static str, action: AuditAction, outcome: AuditOutcome) -> Self {
        Self {
            actor,
            action,
            outcome,
            failure_id: None,
            request_id: None,
            details: Value::Null,
            error: None,
        }
    }

    pub fn failure(mut self, id: &FailureId) -> Self {
        self.failure_id = Some(id.clone());
        self
    }

    pub fn request(mut self, id: &ApprovalId) -> Self {
        self.request_id = Some(id.clone());
        self
    }

    pub fn details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }

    pub fn error(mut self, message: impl Into<String>) -> Self {
        self.error = Some(message.into());
        self
    }

    pub fn into_entry(self, at: DateTime<Utc>) -> AuditEntry {
        AuditEntry {
            id: AuditId::generate(),
            at,
            actor: self.actor.to_string(),
            action: self.action,
            failure_id: self.failure_id,
            request_id: self.request_id,
            outcome: self.outcome,
            details: self.details,
            error: self.error,
        }
    }
}
