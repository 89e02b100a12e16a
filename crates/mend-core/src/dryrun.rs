//! Dry-run interception: outbound state-changing calls become logged no-ops
//! recording (action, target, payload digest), summarized at end of run.

use crate::clock::Clock;
use crate::decisions::context_digest;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use tracing::info;
use utoipa::ToSchema;

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct SimulatedAction {
    pub at: DateTime<Utc>,
    pub action: String,
    pub target: String,
    pub payload_digest: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct DryRunReport {
    pub session_id: String,
    pub started_at: DateTime<Utc>,
    pub generated_at: DateTime<Utc>,
    pub total_actions: usize,
    pub action_counts: BTreeMap<String, usize>,
    pub actions: Vec<SimulatedAction>,
}

pub struct DryRunRecorder {
    session_id: String,
    started_at: DateTime<Utc>,
    clock: Arc<dyn Clock>,
    actions: Mutex<Vec<SimulatedAction>>,
}

impl DryRunRecorder {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        let started_at = clock.now();
        let session_id = format!("dryrun_{}", started_at.format("%Y%m%d_%H%M%S"));
        info!(session_id, "dry-run mode enabled, no outbound writes will be performed");
        Self {
            session_id,
            started_at,
            clock,
            actions: Mutex::new(Vec::new()),
        }
    }

    /// Record an intercepted action. The payload is digested, never stored.
    pub fn record(&self, action: &str, target: &str, payload: &str) {
        let entry = SimulatedAction {
            at: self.clock.now(),
            action: action.to_string(),
            target: target.to_string(),
            payload_digest: context_digest(payload),
        };
        info!(
            action = %entry.action,
            target = %entry.target,
            digest = %entry.payload_digest,
            "[dry-run] intercepted"
        );
        self.actions.lock().expect("dry-run actions poisoned").push(entry);
    }

    pub fn report(&self) -> DryRunReport {
        let actions = self.actions.lock().expect("dry-run actions poisoned").clone();
        let mut action_counts: BTreeMap<String, usize> = BTreeMap::new();
        for action in &actions {
            *action_counts.entry(action.action.clone()).or_default() += 1;
        }
        DryRunReport {
            session_id: self.session_id.clone(),
            started_at: self.started_at,
            generated_at: self.clock.now(),
            total_actions: actions.len(),
            action_counts,
            actions,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::TimeZone;

    #[test]
    fn report_counts_by_action_and_digests_payloads() {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 6, 3, 12, 0, 0).unwrap(),
        ));
        let recorder = DryRunRecorder::new(clock);
        recorder.record("create_branch", "x/y#mend/fix/main-1", "sha abc");
        recorder.record("put_file", "x/y:.github/workflows/build.yml", "content");
        recorder.record("put_file", "x/y:package.json", "content2");

        let report = recorder.report();
        assert_eq!(report.total_actions, 3);
        assert_eq!(report.action_counts.get("put_file"), Some(&2));
        assert_eq!(report.actions[0].payload_digest, context_digest("sha abc"));
    }
}
