use crate::error::FailureError;
use crate::types::{Failure, FailureFilter, FailureId, FailureStat, FailureStatus, NewFailure};
use chrono::{DateTime, Utc};

pub trait FailureRepository {
    fn insert(&self, input: NewFailure) -> Result<Failure, FailureError>;
    fn get(&self, id: &FailureId) -> Result<Option<Failure>, FailureError>;
    /// Dedupe key for idempotent polling.
    fn exists(&self, repository: &str, workflow_run_id: &str) -> Result<bool, FailureError>;
    fn list(&self, filter: FailureFilter) -> Result<Vec<Failure>, FailureError>;
    fn set_status(
        &self,
        id: &FailureId,
        status: FailureStatus,
        reason: Option<String>,
        updated_at: DateTime<Utc>,
    ) -> Result<Failure, FailureError>;
    fn count_since(&self, since: DateTime<Utc>) -> Result<u64, FailureError>;
    /// Per-failure stat rows (joined with analysis category) for the
    /// profiler and dashboard aggregates.
    fn stats_window(
        &self,
        repository: Option<&str>,
        since: DateTime<Utc>,
    ) -> Result<Vec<FailureStat>, FailureError>;
}

/// Legal orchestrator transitions. Everything else is an integrity error.
pub fn validate_transition(from: FailureStatus, to: FailureStatus) -> Result<(), FailureError> {
    use FailureStatus::*;
    let ok = matches!(
        (from, to),
        (Detected, Analyzed)
            | (Detected, Failed)
            | (Analyzed, Gated)
            | (Analyzed, Failed)
            | (Gated, PrOpen)
            | (Gated, DeveloperNotified)
            | (Gated, Failed)
            | (PrOpen, Remediated)
            | (PrOpen, RolledBack)
            | (PrOpen, Failed)
    );
    if ok {
        Ok(())
    } else {
        Err(FailureError::InvalidTransition { from, to })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_documented_transitions() {
        use FailureStatus::*;
        for (from, to) in [
            (Detected, Analyzed),
            (Analyzed, Gated),
            (Gated, PrOpen),
            (Gated, DeveloperNotified),
            (Gated, Failed),
            (PrOpen, Remediated),
            (PrOpen, RolledBack),
            (Detected, Failed),
            (Analyzed, Failed),
        ] {
            assert!(validate_transition(from, to).is_ok(), "{from:?} -> {to:?}");
        }
    }

    #[test]
    fn rejects_exit_from_terminal_states() {
        use FailureStatus::*;
        for from in [Remediated, RolledBack, Failed, DeveloperNotified] {
            for to in [Detected, Analyzed, Gated, PrOpen, Remediated] {
                assert!(validate_transition(from, to).is_err(), "{from:?} -> {to:?}");
            }
        }
    }

    #[test]
    fn rejects_skipping_analysis() {
        assert!(
            validate_transition(FailureStatus::Detected, FailureStatus::PrOpen).is_err()
        );
    }
}
