//! Chat webhook notifier. Posts block-formatted messages to an incoming
//! webhook; a missing webhook URL degrades to log-only delivery.

use async_trait::async_trait;
use mend_core::error::NotifyError;
use mend_core::notify::{Notification, NotificationKind, Notifier};
use reqwest::{Client, StatusCode};
use serde_json::json;
use std::time::Duration;
use tracing::{info, warn};

/// Per-call deadline for notification delivery.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

pub struct WebhookNotifier {
    http: Client,
    webhook_url: Option<String>,
}

impl WebhookNotifier {
    pub fn new(webhook_url: Option<String>) -> Result<Self, NotifyError> {
        if webhook_url.is_none() {
            warn!("no notifier webhook configured, notifications will be logged only");
        }
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|err| NotifyError::Network {
                message: err.to_string(),
            })?;
        Ok(Self { http, webhook_url })
    }
}

fn emoji_for(kind: NotificationKind) -> &'static str {
    match kind {
        NotificationKind::InitialAlert => ":rotating_light:",
        NotificationKind::Analysis => ":mag:",
        NotificationKind::ApprovalRequest => ":raised_hand:",
        NotificationKind::RemediationResult => ":wrench:",
        NotificationKind::Critical => ":fire:",
        NotificationKind::Escalation => ":warning:",
        NotificationKind::WeeklyReport => ":bar_chart:",
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn send(&self, notification: Notification) -> Result<(), NotifyError> {
        let Some(url) = &self.webhook_url else {
            info!(
                kind = ?notification.kind,
                channel = %notification.channel,
                title = %notification.title,
                "notification (log-only)"
            );
            return Ok(());
        };

        let payload = json!({
            "channel": notification.channel,
            "text": format!(
                "{} *{}*\n{}",
                emoji_for(notification.kind),
                notification.title,
                notification.body,
            ),
        });

        let response = self
            .http
            .post(url)
            .json(&payload)
            .send()
            .await
            .map_err(|err| {
                if err.is_timeout() {
                    NotifyError::Timeout
                } else {
                    NotifyError::Network {
                        message: err.to_string(),
                    }
                }
            })?;

        match response.status() {
            status if status.is_success() => Ok(()),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(NotifyError::AuthRejected),
            other => Err(NotifyError::Upstream {
                status: other.as_u16(),
                message: other.canonical_reason().unwrap_or("upstream error").to_string(),
            }),
        }
    }
}
