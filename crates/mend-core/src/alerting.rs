//! Metric threshold evaluation (scheduled every 15 minutes): compares the
//! trailing 24 hours against a 7-day baseline and alerts on success-rate
//! drops and resolution-time spikes, with a per-alert cooldown.

use crate::clock::Clock;
use crate::error::MendError;
use crate::failures::FailureRepository;
use crate::notify::{Notification, NotificationKind, Notifier};
use crate::store::Store;
use crate::types::FailureStat;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

const BASELINE_DAYS: i64 = 7;
const WINDOW_HOURS: i64 = 24;
const COOLDOWN_HOURS: i64 = 1;
const SUCCESS_RATE_DROP: f64 = 0.2;
const RESOLUTION_SPIKE_FACTOR: f64 = 2.0;
/// Minimum samples before either window is trusted.
const MIN_SAMPLES: usize = 5;

pub struct MetricAlerts {
    clock: Arc<dyn Clock>,
    notifier: Arc<dyn Notifier>,
    channel: String,
    last_fired: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl MetricAlerts {
    pub fn new(clock: Arc<dyn Clock>, notifier: Arc<dyn Notifier>, channel: String) -> Self {
        Self {
            clock,
            notifier,
            channel,
            last_fired: Mutex::new(HashMap::new()),
        }
    }

    /// One evaluation tick. Returns the number of alerts fired.
    pub async fn evaluate<S: Store>(&self, store: &S) -> Result<usize, MendError> {
        let now = self.clock.now();
        let baseline_since = now - ChronoDuration::days(BASELINE_DAYS);
        let window_since = now - ChronoDuration::hours(WINDOW_HOURS);

        let stats = store.failures().stats_window(None, baseline_since)?;
        let baseline: Vec<&FailureStat> = stats
            .iter()
            .filter(|stat| stat.detected_at < window_since)
            .collect();
        let window: Vec<&FailureStat> = stats
            .iter()
            .filter(|stat| stat.detected_at >= window_since)
            .collect();
        if baseline.len() < MIN_SAMPLES || window.len() < MIN_SAMPLES {
            return Ok(0);
        }

        let mut fired = 0usize;

        let baseline_rate = success_rate(&baseline);
        let window_rate = success_rate(&window);
        if baseline_rate - window_rate >= SUCCESS_RATE_DROP {
            if self.fire(
                "success_rate_drop",
                &format!(
                    "Remediation success rate dropped to {:.0}% (7-day baseline {:.0}%).",
                    window_rate * 100.0,
                    baseline_rate * 100.0
                ),
                now,
            )
            .await
            {
                fired += 1;
            }
        }

        if let (Some(baseline_ms), Some(window_ms)) =
            (avg_resolution_ms(&baseline), avg_resolution_ms(&window))
        {
            if baseline_ms > 0.0 && window_ms >= baseline_ms * RESOLUTION_SPIKE_FACTOR {
                if self
                    .fire(
                        "resolution_time_spike",
                        &format!(
                            "Average resolution time spiked to {:.1} min (baseline {:.1} min).",
                            window_ms / 60_000.0,
                            baseline_ms / 60_000.0
                        ),
                        now,
                    )
                    .await
                {
                    fired += 1;
                }
            }
        }

        Ok(fired)
    }

    async fn fire(&self, key: &str, body: &str, now: DateTime<Utc>) -> bool {
        {
            let mut last = self.last_fired.lock().expect("alert cooldowns poisoned");
            if let Some(at) = last.get(key) {
                if now - *at < ChronoDuration::hours(COOLDOWN_HOURS) {
                    return false;
                }
            }
            last.insert(key.to_string(), now);
        }
        warn!(alert = key, "metric threshold breached");
        let notification = Notification {
            kind: NotificationKind::Escalation,
            channel: self.channel.clone(),
            title: format!("Metric alert: {key}"),
            body: body.to_string(),
            failure_id: None,
        };
        if let Err(err) = self.notifier.send(notification).await {
            warn!(error = %err, "metric alert notification failed");
        } else {
            info!(alert = key, "metric alert fired");
        }
        true
    }
}

fn success_rate(stats: &[&FailureStat]) -> f64 {
    let terminal: Vec<_> = stats.iter().filter(|s| s.status.is_terminal()).collect();
    if terminal.is_empty() {
        return 1.0;
    }
    terminal
        .iter()
        .filter(|s| s.remediation_succeeded())
        .count() as f64
        / terminal.len() as f64
}

fn avg_resolution_ms(stats: &[&FailureStat]) -> Option<f64> {
    let resolved: Vec<i64> = stats.iter().filter_map(|s| s.resolution_ms).collect();
    if resolved.is_empty() {
        return None;
    }
    Some(resolved.iter().sum::<i64>() as f64 / resolved.len() as f64)
}
