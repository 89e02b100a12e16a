use crate::error::AuditError;
use crate::types::{Alternative, DecisionId, DecisionKind, DecisionRecord, FailureId};
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

pub trait DecisionRepository {
    fn append(&self, record: DecisionRecord) -> Result<DecisionRecord, AuditError>;
    fn list_for_failure(&self, id: &FailureId) -> Result<Vec<DecisionRecord>, AuditError>;
}

/// Digest of the prompt context a decision was made against, so post-mortems
/// can correlate decisions with what the model actually saw.
pub fn context_digest(context: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(context.as_bytes());
    hex_lower(&hasher.finalize())
}

pub fn hex_lower(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        use std::fmt::Write;
        let _ = write!(out, "{b:02x}");
    }
    out
}

pub struct DecisionBuilder {
    failure_id: FailureId,
    kind: DecisionKind,
    chosen: String,
    alternatives: Vec<Alternative>,
    context_digest: String,
    confidence: f64,
    model_id: String,
    response_latency_ms: i64,
}

impl DecisionBuilder {
    pub fn new(failure_id: FailureId, kind: DecisionKind, chosen: impl Into<String>) -> Self {
        Self {
            failure_id,
            kind,
            chosen: chosen.into(),
            alternatives: Vec::new(),
            context_digest: String::new(),
            confidence: 0.0,
            model_id: String::new(),
            response_latency_ms: 0,
        }
    }

    pub fn alternative(
        mut self,
        option: impl Into<String>,
        score: f64,
        rejection_reason: impl Into<String>,
    ) -> Self {
        self.alternatives.push(Alternative {
            option: option.into(),
            score,
            rejection_reason: rejection_reason.into(),
        });
        self
    }

    pub fn context(mut self, context: &str) -> Self {
        self.context_digest = context_digest(context);
        self
    }

    pub fn confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence;
        self
    }

    pub fn model(mut self, model_id: impl Into<String>, latency_ms: i64) -> Self {
        self.model_id = model_id.into();
        self.response_latency_ms = latency_ms;
        self
    }

    pub fn build(self, at: DateTime<Utc>) -> DecisionRecord {
        DecisionRecord {
            id: DecisionId::generate(),
            failure_id: self.failure_id,
            kind: self.kind,
            chosen: self.chosen,
            alternatives: self.alternatives,
            context_digest: self.context_digest,
            confidence: self.confidence,
            model_id: self.model_id,
            response_latency_ms: self.response_latency_ms,
            created_at: at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_is_stable() {
        assert_eq!(context_digest("abc"), context_digest("abc"));
        assert_ne!(context_digest("abc"), context_digest("abd"));
        assert_eq!(context_digest("abc").len(), 64);
    }
}
