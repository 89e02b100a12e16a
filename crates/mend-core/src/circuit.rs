//! Failure-signature keyed circuit breaker. Freezes remediation for a
//! signature once consecutive failures reach the threshold; thaws through a
//! probationary HALF_OPEN phase after the auto-reset window.

use crate::clock::Clock;
use crate::error::CircuitError;
use crate::signature::FailureSignature;
use crate::types::{CircuitPhase, CircuitState, CircuitTransition};
use chrono::Duration as ChronoDuration;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

pub trait CircuitRepository {
    fn get(&self, signature: &str) -> Result<Option<CircuitState>, CircuitError>;
    /// Writes are synchronous before any dependent decision.
    fn upsert(&self, state: &CircuitState) -> Result<(), CircuitError>;
    fn list_open(&self) -> Result<Vec<CircuitState>, CircuitError>;
    fn count_open(&self) -> Result<u64, CircuitError>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct CircuitOutcome {
    pub state: CircuitState,
    /// Set when this call transitioned the circuit to OPEN.
    pub opened: bool,
}

/// Per-signature async locks so read-modify-write plus persistence is atomic
/// with respect to concurrent workers.
#[derive(Default)]
struct SignatureLocks {
    inner: std::sync::Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl SignatureLocks {
    fn lock_for(&self, key: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut map = self.inner.lock().expect("signature locks poisoned");
        map.entry(key.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }
}

pub struct CircuitBreaker {
    failure_threshold: u32,
    auto_reset: ChronoDuration,
    clock: Arc<dyn Clock>,
    locks: SignatureLocks,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, auto_reset_hours: u64, clock: Arc<dyn Clock>) -> Self {
        Self {
            failure_threshold,
            auto_reset: ChronoDuration::hours(auto_reset_hours as i64),
            clock,
            locks: SignatureLocks::default(),
        }
    }

    fn load_or_new<R: CircuitRepository>(
        &self,
        repo: &R,
        signature: &FailureSignature,
    ) -> Result<CircuitState, CircuitError> {
        let key = signature.key();
        Ok(repo.get(&key)?.unwrap_or_else(|| {
            CircuitState::new(
                key,
                signature.repository.clone(),
                signature.branch.clone(),
                signature.error_pattern.clone(),
            )
        }))
    }

    /// Record an observed failure for this signature. Opens the circuit when
    /// the count reaches the threshold while CLOSED, or immediately when a
    /// HALF_OPEN trial fails.
    pub async fn record_failure<R: CircuitRepository>(
        &self,
        repo: &R,
        signature: &FailureSignature,
    ) -> Result<CircuitOutcome, CircuitError> {
        let guard = self.locks.lock_for(&signature.key());
        let _held = guard.lock().await;

        let now = self.clock.now();
        let mut state = self.load_or_new(repo, signature)?;
        state.failure_count += 1;
        state.last_failure_at = Some(now);

        let mut opened = false;
        match state.phase {
            CircuitPhase::Closed if state.failure_count >= self.failure_threshold => {
                state.history.push(CircuitTransition {
                    from: CircuitPhase::Closed,
                    to: CircuitPhase::Open,
                    reason: format!("failure threshold reached ({})", state.failure_count),
                    at: now,
                    actor: "system".to_string(),
                });
                state.phase = CircuitPhase::Open;
                state.opened_at = Some(now);
                state.auto_reset_at = Some(now + self.auto_reset);
                opened = true;
                warn!(
                    signature = %state.signature,
                    repository = %state.repository,
                    auto_reset_at = ?state.auto_reset_at,
                    "circuit opened, remediation frozen"
                );
            }
            CircuitPhase::HalfOpen => {
                state.history.push(CircuitTransition {
                    from: CircuitPhase::HalfOpen,
                    to: CircuitPhase::Open,
                    reason: "trial remediation failed".to_string(),
                    at: now,
                    actor: "system".to_string(),
                });
                state.phase = CircuitPhase::Open;
                state.opened_at = Some(now);
                state.auto_reset_at = Some(now + self.auto_reset);
                opened = true;
                warn!(signature = %state.signature, "half-open trial failed, circuit re-opened");
            }
            _ => {}
        }

        repo.upsert(&state)?;
        Ok(CircuitOutcome { state, opened })
    }

    /// Record a confirmed successful remediation. Resets the count, and a
    /// HALF_OPEN circuit closes — both, always.
    pub async fn record_success<R: CircuitRepository>(
        &self,
        repo: &R,
        signature: &FailureSignature,
    ) -> Result<CircuitState, CircuitError> {
        let guard = self.locks.lock_for(&signature.key());
        let _held = guard.lock().await;

        let now = self.clock.now();
        let mut state = self.load_or_new(repo, signature)?;
        state.failure_count = 0;
        state.last_failure_at = None;

        if state.phase == CircuitPhase::HalfOpen {
            state.history.push(CircuitTransition {
                from: CircuitPhase::HalfOpen,
                to: CircuitPhase::Closed,
                reason: "successful remediation after auto-reset".to_string(),
                at: now,
                actor: "system".to_string(),
            });
            state.phase = CircuitPhase::Closed;
            state.opened_at = None;
            state.auto_reset_at = None;
            info!(signature = %state.signature, "circuit closed after successful trial");
        }

        repo.upsert(&state)?;
        Ok(state)
    }

    /// Whether a remediation attempt may proceed. Performs the timed
    /// OPEN -> HALF_OPEN transition when the reset instant has passed.
    pub async fn is_allowed<R: CircuitRepository>(
        &self,
        repo: &R,
        signature: &FailureSignature,
    ) -> Result<bool, CircuitError> {
        let guard = self.locks.lock_for(&signature.key());
        let _held = guard.lock().await;

        let now = self.clock.now();
        let mut state = self.load_or_new(repo, signature)?;

        if state.phase == CircuitPhase::Open {
            if let Some(reset_at) = state.auto_reset_at {
                if now >= reset_at {
                    state.history.push(CircuitTransition {
                        from: CircuitPhase::Open,
                        to: CircuitPhase::HalfOpen,
                        reason: "auto-reset window elapsed".to_string(),
                        at: now,
                        actor: "system".to_string(),
                    });
                    state.phase = CircuitPhase::HalfOpen;
                    repo.upsert(&state)?;
                    info!(signature = %state.signature, "circuit half-open, one trial admitted");
                }
            }
        }

        Ok(matches!(
            state.phase,
            CircuitPhase::Closed | CircuitPhase::HalfOpen
        ))
    }

    pub async fn manual_reset<R: CircuitRepository>(
        &self,
        repo: &R,
        signature: &FailureSignature,
        actor: &str,
    ) -> Result<CircuitState, CircuitError> {
        let guard = self.locks.lock_for(&signature.key());
        let _held = guard.lock().await;

        let now = self.clock.now();
        let mut state = self.load_or_new(repo, signature)?;
        if !matches!(state.phase, CircuitPhase::Open | CircuitPhase::HalfOpen) {
            return Err(CircuitError::NotOpen {
                phase: format!("{:?}", state.phase),
            });
        }

        state.history.push(CircuitTransition {
            from: state.phase,
            to: CircuitPhase::Closed,
            reason: "manual reset".to_string(),
            at: now,
            actor: actor.to_string(),
        });
        state.phase = CircuitPhase::Closed;
        state.failure_count = 0;
        state.opened_at = None;
        state.auto_reset_at = None;
        state.manually_reset_by = Some(actor.to_string());
        repo.upsert(&state)?;
        info!(signature = %state.signature, actor, "circuit manually reset");
        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::{TimeZone, Utc};
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

    fn setup() -> (CircuitBreaker, MemCircuits, Arc<ManualClock>, FailureSignature) {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 6, 3, 12, 0, 0).unwrap(),
        ));
        let breaker = CircuitBreaker::new(3, 24, clock.clone());
        let signature = FailureSignature::new("x/y", "main", "npm install timeout after 30s");
        (breaker, MemCircuits::default(), clock, signature)
    }

    #[tokio::test]
    async fn opens_after_threshold_consecutive_failures() {
        let (breaker, repo, clock, sig) = setup();
        assert!(!breaker.record_failure(&repo, &sig).await.unwrap().opened);
        assert!(!breaker.record_failure(&repo, &sig).await.unwrap().opened);
        let third = breaker.record_failure(&repo, &sig).await.unwrap();
        assert!(third.opened);
        assert_eq!(third.state.phase, CircuitPhase::Open);
        assert_eq!(third.state.opened_at, Some(clock.now()));
        assert_eq!(
            third.state.auto_reset_at,
            Some(clock.now() + ChronoDuration::hours(24))
        );
        assert!(!breaker.is_allowed(&repo, &sig).await.unwrap());
    }

    #[tokio::test]
    async fn denies_while_open_until_reset_instant() {
        let (breaker, repo, clock, sig) = setup();
        for _ in 0..3 {
            breaker.record_failure(&repo, &sig).await.unwrap();
        }
        clock.advance(ChronoDuration::hours(23));
        assert!(!breaker.is_allowed(&repo, &sig).await.unwrap());
        clock.advance(ChronoDuration::hours(1));
        assert!(breaker.is_allowed(&repo, &sig).await.unwrap());
        let state = repo.get(&sig.key()).unwrap().unwrap();
        assert_eq!(state.phase, CircuitPhase::HalfOpen);
    }

    #[tokio::test]
    async fn half_open_success_closes_and_clears_count() {
        let (breaker, repo, clock, sig) = setup();
        for _ in 0..3 {
            breaker.record_failure(&repo, &sig).await.unwrap();
        }
        clock.advance(ChronoDuration::hours(24));
        assert!(breaker.is_allowed(&repo, &sig).await.unwrap());

        let state = breaker.record_success(&repo, &sig).await.unwrap();
        assert_eq!(state.phase, CircuitPhase::Closed);
        assert_eq!(state.failure_count, 0);
        // open -> half_open -> closed on top of the initial closed -> open
        assert_eq!(state.history.len(), 3);
        assert!(breaker.is_allowed(&repo, &sig).await.unwrap());
    }

    #[tokio::test]
    async fn half_open_failure_reopens_and_extends_reset() {
        let (breaker, repo, clock, sig) = setup();
        for _ in 0..3 {
            breaker.record_failure(&repo, &sig).await.unwrap();
        }
        clock.advance(ChronoDuration::hours(24));
        assert!(breaker.is_allowed(&repo, &sig).await.unwrap());

        let outcome = breaker.record_failure(&repo, &sig).await.unwrap();
        assert!(outcome.opened);
        assert_eq!(outcome.state.phase, CircuitPhase::Open);
        assert_eq!(
            outcome.state.auto_reset_at,
            Some(clock.now() + ChronoDuration::hours(24))
        );
    }

    #[tokio::test]
    async fn manual_reset_requires_open_circuit() {
        let (breaker, repo, _clock, sig) = setup();
        breaker.record_failure(&repo, &sig).await.unwrap();
        let err = breaker.manual_reset(&repo, &sig, "oncall").await.unwrap_err();
        assert!(matches!(err, CircuitError::NotOpen { .. }));

        for _ in 0..2 {
            breaker.record_failure(&repo, &sig).await.unwrap();
        }
        let state = breaker.manual_reset(&repo, &sig, "oncall").await.unwrap();
        assert_eq!(state.phase, CircuitPhase::Closed);
        assert_eq!(state.failure_count, 0);
        assert_eq!(state.manually_reset_by.as_deref(), Some("oncall"));
    }

    #[tokio::test]
    async fn success_resets_count_without_phase_change_when_closed() {
        let (breaker, repo, _clock, sig) = setup();
        breaker.record_failure(&repo, &sig).await.unwrap();
        breaker.record_failure(&repo, &sig).await.unwrap();
        let state = breaker.record_success(&repo, &sig).await.unwrap();
        assert_eq!(state.phase, CircuitPhase::Closed);
        assert_eq!(state.failure_count, 0);
        // Two more failures should not open it (count restarted).
        breaker.record_failure(&repo, &sig).await.unwrap();
        let outcome = breaker.record_failure(&repo, &sig).await.unwrap();
        assert!(!outcome.opened);
    }
}
