//! Chat-robot webhook notifier (DingTalk style `msgtype: text` payload)

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::{Value, json};
use std::time::Duration;
use tracing::{debug, error};

use super::Notifier;

#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
    access_token: Option<String>,
}

impl WebhookNotifier {
    pub fn new(url: String, access_token: Option<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build webhook HTTP client")?;
        Ok(Self {
            client,
            url,
            access_token,
        })
    }

    async fn deliver(&self, text: &str) -> Result<()> {
        let mut request = self.client.post(&self.url).json(&alarm_payload(text));
        if let Some(token) = &self.access_token {
            request = request.query(&[("access_token", token)]);
        }

        let response = request.send().await?.error_for_status()?;
        let body: Value = response.json().await.unwrap_or(Value::Null);
        match body.get("errcode").and_then(Value::as_i64) {
            Some(0) | None => Ok(()),
            Some(code) => anyhow::bail!(
                "webhook rejected alert: errcode={} errmsg={}",
                code,
                body.get("errmsg").and_then(Value::as_str).unwrap_or_default()
            ),
        }
    }
}

/// Request body sent for one alert
pub fn alarm_payload(text: &str) -> Value {
    json!({
        "msgtype": "text",
        "text": { "content": format!("ALARM: {}", text) },
    })
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, text: &str) -> bool {
        match self.deliver(text).await {
            Ok(()) => {
                debug!("Alert delivered to webhook");
                true
            }
            Err(e) => {
                error!(panic_keyword = "notify_err", err = %e, "Failed to deliver alert: {}", text);
                false
            }
        }
    }
}
