//! Weekly health report (scheduled Monday 09:00): aggregates the previous
//! week's failures and sends a summary notification.

use crate::clock::Clock;
use crate::error::MendError;
use crate::failures::FailureRepository;
use crate::notify::{Notification, NotificationKind, Notifier};
use crate::store::Store;
use chrono::{DateTime, Datelike, Duration as ChronoDuration, Utc, Weekday};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;
use utoipa::ToSchema;

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct WeeklyReport {
    pub week_start: DateTime<Utc>,
    pub week_end: DateTime<Utc>,
    pub total_failures: usize,
    pub remediated: usize,
    pub rolled_back: usize,
    pub developer_notified: usize,
    pub success_rate: f64,
    pub avg_resolution_minutes: f64,
    #[schema(value_type = Vec<Object>)]
    pub top_categories: Vec<(String, usize)>,
    #[schema(value_type = Vec<Object>)]
    pub top_repositories: Vec<(String, usize)>,
}

pub struct HealthReporter {
    clock: Arc<dyn Clock>,
    notifier: Arc<dyn Notifier>,
    channel: String,
}

impl HealthReporter {
    pub fn new(clock: Arc<dyn Clock>, notifier: Arc<dyn Notifier>, channel: String) -> Self {
        Self {
            clock,
            notifier,
            channel,
        }
    }

    pub fn generate<S: Store>(&self, store: &S) -> Result<WeeklyReport, MendError> {
        let now = self.clock.now();
        let week_start = now - ChronoDuration::days(7);
        let stats = store.failures().stats_window(None, week_start)?;

        let total = stats.len();
        let mut remediated = 0usize;
        let mut rolled_back = 0usize;
        let mut developer_notified = 0usize;
        let mut categories: HashMap<String, usize> = HashMap::new();
        let mut repositories: HashMap<String, usize> = HashMap::new();
        let mut resolution_total = 0i64;
        let mut resolved = 0usize;

        for stat in &stats {
            match stat.status {
                crate::types::FailureStatus::Remediated => remediated += 1,
                crate::types::FailureStatus::RolledBack => rolled_back += 1,
                crate::types::FailureStatus::DeveloperNotified => developer_notified += 1,
                _ => {}
            }
            *categories
                .entry(stat.category.clone().unwrap_or_else(|| "unknown".to_string()))
                .or_default() += 1;
            *repositories.entry(stat.repository.clone()).or_default() += 1;
            if let Some(ms) = stat.resolution_ms {
                resolution_total += ms;
                resolved += 1;
            }
        }

        let terminal = stats.iter().filter(|s| s.status.is_terminal()).count();
        Ok(WeeklyReport {
            week_start,
            week_end: now,
            total_failures: total,
            remediated,
            rolled_back,
            developer_notified,
            success_rate: if terminal == 0 {
                0.0
            } else {
                remediated as f64 / terminal as f64
            },
            avg_resolution_minutes: if resolved == 0 {
                0.0
            } else {
                (resolution_total as f64 / resolved as f64) / 60_000.0
            },
            top_categories: top_n(categories, 3),
            top_repositories: top_n(repositories, 3),
        })
    }

    pub async fn send<S: Store>(&self, store: &S) -> Result<WeeklyReport, MendError> {
        let report = self.generate(store)?;
        let notification = Notification {
            kind: NotificationKind::WeeklyReport,
            channel: self.channel.clone(),
            title: "Weekly CI remediation report".to_string(),
            body: format_report(&report),
            failure_id: None,
        };
        self.notifier
            .send(notification)
            .await
            .map_err(MendError::Notify)?;
        info!(
            failures = report.total_failures,
            remediated = report.remediated,
            "weekly report sent"
        );
        Ok(report)
    }
}

/// True on the tick that crosses Monday 09:00 local-equivalent (UTC here).
pub fn is_weekly_report_due(now: DateTime<Utc>, last_sent: Option<DateTime<Utc>>) -> bool {
    if now.weekday() != Weekday::Mon {
        return false;
    }
    let nine = now
        .date_naive()
        .and_hms_opt(9, 0, 0)
        .map(|naive| naive.and_utc());
    let Some(nine) = nine else { return false };
    if now < nine {
        return false;
    }
    match last_sent {
        Some(last) => last < nine,
        None => true,
    }
}

fn top_n(counts: HashMap<String, usize>, n: usize) -> Vec<(String, usize)> {
    let mut pairs: Vec<(String, usize)> = counts.into_iter().collect();
    pairs.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    pairs.truncate(n);
    pairs
}

fn format_report(report: &WeeklyReport) -> String {
    let categories = report
        .top_categories
        .iter()
        .map(|(name, count)| format!("{name} ({count})"))
        .collect::<Vec<_>>()
        .join(", ");
    let repositories = report
        .top_repositories
        .iter()
        .map(|(name, count)| format!("{name} ({count})"))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "Failures: {}\nRemediated: {}\nRolled back: {}\nRouted to developers: {}\n\
         Success rate: {:.0}%\nAvg resolution: {:.1} min\nTop categories: {}\nTop repositories: {}",
        report.total_failures,
        report.remediated,
        report.rolled_back,
        report.developer_notified,
        report.success_rate * 100.0,
        report.avg_resolution_minutes,
        if categories.is_empty() { "none".to_string() } else { categories },
        if repositories.is_empty() { "none".to_string() } else { repositories },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn weekly_report_due_only_after_monday_nine() {
        // 2024-06-10 is a Monday.
        let before = Utc.with_ymd_and_hms(2024, 6, 10, 8, 59, 0).unwrap();
        let after = Utc.with_ymd_and_hms(2024, 6, 10, 9, 5, 0).unwrap();
        let tuesday = Utc.with_ymd_and_hms(2024, 6, 11, 9, 5, 0).unwrap();
        assert!(!is_weekly_report_due(before, None));
        assert!(is_weekly_report_due(after, None));
        assert!(!is_weekly_report_due(tuesday, None));
    }

    #[test]
    fn weekly_report_not_resent_same_week() {
        let monday = Utc.with_ymd_and_hms(2024, 6, 10, 9, 5, 0).unwrap();
        let later = Utc.with_ymd_and_hms(2024, 6, 10, 23, 0, 0).unwrap();
        assert!(!is_weekly_report_due(later, Some(monday)));
        let next_monday = Utc.with_ymd_and_hms(2024, 6, 17, 9, 5, 0).unwrap();
        assert!(is_weekly_report_due(next_monday, Some(monday)));
    }
}
