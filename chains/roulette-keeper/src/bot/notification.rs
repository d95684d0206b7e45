use anyhow::{Error, Result};
use async_trait::async_trait;
use core_logic::Notifier;
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Slack incoming-webhook alerts
pub struct SlackNotifier {
    client: Client,
    webhook_url: String,
}

impl SlackNotifier {
    pub fn new(client: Client, webhook_url: &str) -> Self {
        Self {
            client,
            webhook_url: webhook_url.to_string(),
        }
    }

    pub fn format_alert(message: &str) -> String {
        format!(
            "🚨 *Critical error in Roulette Keeper* 🚨\n\n```\n{}\n```",
            message
        )
    }

    /// Send a message to Slack
    pub async fn send_message(&self, message: &str) -> Result<()> {
        let payload = serde_json::json!({ "text": Self::format_alert(message) });

        let response = self
            .client
            .post(&self.webhook_url)
            .json(&payload)
            .timeout(Duration::from_secs(30))
            .send()
            .await
            .map_err(|e| Error::new(e).context("Failed to send Slack request"))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(Error::msg(format!("Slack webhook error: {} - {}", status, text)));
        }

        info!("Slack notification sent successfully");
        Ok(())
    }
}

#[async_trait]
impl Notifier for SlackNotifier {
    async fn notify(&self, message: &str) {
        if let Err(e) = self.send_message(message).await {
            error!("Failed to send Slack notification: {:#}", e);
        }
    }
}

/// Alerts that only reach the log.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, message: &str) {
        error!(target: "alert", "{}", message);
    }
}

/// Slack when a webhook is configured, otherwise the log.
pub fn notifier_from_config(client: Client, webhook_url: Option<&str>) -> Arc<dyn Notifier> {
    match webhook_url.filter(|url| !url.trim().is_empty()) {
        Some(url) => {
            info!("Slack alerts enabled");
            Arc::new(SlackNotifier::new(client, url))
        }
        None => {
            warn!("No Slack webhook configured, alerts go to the log only");
            Arc::new(LogNotifier)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alert_wraps_message_in_code_block() {
        let text = SlackNotifier::format_alert("get_random failed after 3 attempts");
        assert!(text.starts_with("🚨 *Critical error in Roulette Keeper* 🚨"));
        assert!(text.ends_with("```\nget_random failed after 3 attempts\n```"));
    }
}
