//! Slack incoming-webhook notifier

use super::ChatNotifier;
use crate::error::NotifierError;
use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, info};

/// Username shown on posted messages
const USERNAME: &str = "tag-watcher";

#[derive(Debug, Serialize)]
struct SlackMessage<'a> {
    text: &'a str,
    username: &'a str,
}

/// Posts messages to a Slack-compatible webhook
pub struct SlackNotifier {
    webhook_url: Option<String>,
    client: reqwest::Client,
}

impl SlackNotifier {
    /// Create a notifier. Without a webhook URL, messages are dropped.
    pub fn new(webhook_url: Option<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let webhook_url = webhook_url.filter(|url| !url.is_empty());
        if webhook_url.is_some() {
            debug!("Slack notifications enabled");
        } else {
            debug!("Slack notifications disabled (no webhook configured)");
        }

        Ok(Self {
            webhook_url,
            client: reqwest::Client::builder().timeout(timeout).build()?,
        })
    }
}

#[async_trait]
impl ChatNotifier for SlackNotifier {
    fn enabled(&self) -> bool {
        self.webhook_url.is_some()
    }

    async fn send(&self, text: &str) -> Result<(), NotifierError> {
        let Some(url) = &self.webhook_url else {
            info!("Not posting to Slack, no webhook configured (set TAGWATCH_SLACK_WEBHOOK_URL)");
            return Ok(());
        };

        let response = self
            .client
            .post(url)
            .json(&SlackMessage {
                text,
                username: USERNAME,
            })
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(NotifierError::Status { status, body });
        }

        Ok(())
    }
}
