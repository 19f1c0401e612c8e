use anyhow::{Context, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use super::{HandlerRegistry, TaskContext, TaskHandler};

/// Logs its arguments; handy as a heartbeat task
#[derive(Debug, Default)]
pub struct LogArgsHandler;

#[async_trait]
impl TaskHandler for LogArgsHandler {
    async fn call(&self, ctx: TaskContext) -> Result<()> {
        info!(
            task_key = %ctx.task_key,
            token = ctx.token,
            trace_id = %ctx.trace_id,
            args = %ctx.args,
            "log_args"
        );
        Ok(())
    }
}

/// GETs the URL given as args and fails on a non-2xx answer
#[derive(Debug, Clone)]
pub struct HttpGetHandler {
    client: reqwest::Client,
}

impl HttpGetHandler {
    pub fn new(timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self { client }
    }
}

#[async_trait]
impl TaskHandler for HttpGetHandler {
    async fn call(&self, ctx: TaskContext) -> Result<()> {
        let url = ctx.args.trim();
        anyhow::ensure!(!url.is_empty(), "http_get needs a URL in args");

        let response = self
            .client
            .get(url)
            .header("X-Trace-Id", &ctx.trace_id)
            .send()
            .await
            .with_context(|| format!("GET {url} failed"))?;

        let status = response.status();
        anyhow::ensure!(status.is_success(), "GET {} returned {}", url, status);

        info!(task_key = %ctx.task_key, trace_id = %ctx.trace_id, %status, "http_get {}", url);
        Ok(())
    }
}

pub fn register_builtin(registry: &mut HandlerRegistry) {
    registry
        .register("log_args", Arc::new(LogArgsHandler))
        .register("http_get", Arc::new(HttpGetHandler::new(Duration::from_secs(30))));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context(args: &str) -> TaskContext {
        TaskContext {
            task_key: "ping".to_string(),
            args: args.to_string(),
            token: 1,
            trace_id: "t".to_string(),
        }
    }

    #[tokio::test]
    async fn log_args_succeeds() {
        assert!(LogArgsHandler.call(context("hello")).await.is_ok());
    }

    #[tokio::test]
    async fn http_get_without_url_fails() {
        let handler = HttpGetHandler::new(Duration::from_millis(200));
        assert!(handler.call(context("  ")).await.is_err());
    }
}
