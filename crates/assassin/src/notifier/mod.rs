//! Alert delivery
//!
//! Delivery is best effort: failures are logged by the implementation and
//! reported as `false`, never escalated further.

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::NotifierConfig;

pub mod webhook;

pub use webhook::WebhookNotifier;

#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver one text alert; `true` when it was accepted
    async fn notify(&self, text: &str) -> bool;
}

/// Writes alerts to the log only
#[derive(Debug, Clone, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, text: &str) -> bool {
        warn!(keyword = "alarm", "ALARM: {}", text);
        true
    }
}

/// Build the notifier described by the configuration
pub fn from_config(config: &NotifierConfig) -> Result<Arc<dyn Notifier>> {
    match &config.webhook_url {
        Some(url) if !url.trim().is_empty() => {
            info!("Alerts will be delivered to webhook {}", url);
            Ok(Arc::new(WebhookNotifier::new(
                url.clone(),
                config.access_token.clone(),
                config.timeout,
            )?))
        }
        _ => {
            info!("No alert webhook configured, alerts are logged only");
            Ok(Arc::new(LogNotifier))
        }
    }
}
