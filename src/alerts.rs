//! Alert sending to chat webhooks

use crate::agent::{Alert, AlertCallback, AlertKind};
use crate::config::{AlertConfig, DiscordConfig, SlackConfig, TelegramConfig};
use crate::truncate;
use reqwest::Client;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

#[derive(Clone)]
pub struct Alerter {
    client: Client,
    telegram: Option<TelegramConfig>,
    slack: Option<SlackConfig>,
    discord: Option<DiscordConfig>,
}

impl Alerter {
    pub fn new(config: AlertConfig) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            client,
            telegram: config.telegram,
            slack: config.slack,
            discord: config.discord,
        }
    }

    pub fn has_channels(&self) -> bool {
        self.telegram.is_some() || self.slack.is_some() || self.discord.is_some()
    }

    /// Send an alert to all configured channels
    pub async fn send_alert(&self, alert: &Alert) -> anyhow::Result<()> {
        let message = format_message(alert);
        let mut handles = vec![];

        if let Some(ref tg) = self.telegram {
            let msg = message.clone();
            let client = self.client.clone();
            let config = tg.clone();
            handles.push(tokio::spawn(async move { send_telegram(&client, &config, &msg).await }));
        }

        if let Some(ref slack) = self.slack {
            let msg = message.clone();
            let client = self.client.clone();
            let config = slack.clone();
            handles.push(tokio::spawn(async move { send_slack(&client, &config, &msg).await }));
        }

        if let Some(ref discord) = self.discord {
            let msg = message.clone();
            let client = self.client.clone();
            let config = discord.clone();
            handles.push(tokio::spawn(async move { send_discord(&client, &config, &msg).await }));
        }

        for handle in handles {
            if let Err(e) = handle.await? {
                error!("Failed to send alert: {}", e);
            }
        }

        Ok(())
    }

    /// Agent alert callback that posts in the background.
    ///
    /// Needs a tokio runtime at call time; without one the alert is dropped
    /// with a warning.
    pub fn callback(self: Arc<Self>) -> AlertCallback {
        Arc::new(move |alert: &Alert| -> anyhow::Result<()> {
            if !self.has_channels() {
                return Ok(());
            }
            let handle = match tokio::runtime::Handle::try_current() {
                Ok(h) => h,
                Err(_) => {
                    warn!("No runtime for alert {}, dropping", alert.subject_id);
                    return Ok(());
                }
            };
            let alerter = Arc::clone(&self);
            let alert = alert.clone();
            handle.spawn(async move {
                if let Err(e) = alerter.send_alert(&alert).await {
                    error!("Alert delivery failed: {}", e);
                }
            });
            Ok(())
        })
    }
}

pub fn format_message(alert: &Alert) -> String {
    let (heading, id_label) = match alert.kind {
        AlertKind::ApprovalRequest => ("🔐 *Approval Required*", "Command"),
        AlertKind::HighSeverityDecision => ("🚨 *High Severity Finding*", "Decision"),
    };
    let mut message = format!(
        "{}\n\n\
        *Risk Level:* {}\n\
        *{}:* `{}`\n\
        *Summary:* {}\n\
        *Detail:* `{}`",
        heading,
        alert.risk_level,
        id_label,
        alert.subject_id,
        truncate(&alert.title, 200),
        truncate(&alert.detail, 300),
    );
    if alert.requires_sudo {
        message.push_str("\n*Requires elevated privileges*");
    }
    message
}

async fn send_telegram(client: &Client, config: &TelegramConfig, message: &str) -> anyhow::Result<()> {
    let url = format!("https://api.telegram.org/bot{}/sendMessage", config.bot_token);

    client
        .post(&url)
        .json(&json!({
            "chat_id": config.chat_id,
            "text": message,
            "parse_mode": "Markdown"
        }))
        .send()
        .await?
        .error_for_status()?;

    info!("Sent Telegram alert");
    Ok(())
}

async fn send_slack(client: &Client, config: &SlackConfig, message: &str) -> anyhow::Result<()> {
    client
        .post(&config.webhook_url)
        .json(&json!({ "text": message }))
        .send()
        .await?
        .error_for_status()?;

    info!("Sent Slack alert");
    Ok(())
}

async fn send_discord(client: &Client, config: &DiscordConfig, message: &str) -> anyhow::Result<()> {
    client
        .post(&config.webhook_url)
        .json(&json!({ "content": message }))
        .send()
        .await?
        .error_for_status()?;

    info!("Sent Discord alert");
    Ok(())
}
