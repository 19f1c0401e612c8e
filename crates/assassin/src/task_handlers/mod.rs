//! Registry of invocable task bodies, keyed by `execute_func` name.

use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

pub mod builtin;

/// Everything a handler learns about the attempt it runs in
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskContext {
    pub task_key: String,
    /// Opaque argument string stored on the task definition
    pub args: String,
    /// Execution record id of the held permit
    pub token: i32,
    pub trace_id: String,
}

#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn call(&self, ctx: TaskContext) -> Result<()>;
}

/// Adapter turning an async closure into a [`TaskHandler`]
pub struct FnHandler<F>(F);

impl<F> FnHandler<F> {
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

#[async_trait]
impl<F, Fut> TaskHandler for FnHandler<F>
where
    F: Fn(TaskContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    async fn call(&self, ctx: TaskContext) -> Result<()> {
        (self.0)(ctx).await
    }
}

#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn TaskHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with the handlers shipped in this crate
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        builtin::register_builtin(&mut registry);
        registry
    }

    pub fn register<S: Into<String>>(&mut self, name: S, handler: Arc<dyn TaskHandler>) -> &mut Self {
        self.handlers.insert(name.into(), handler);
        self
    }

    pub fn register_fn<S, F, Fut>(&mut self, name: S, f: F) -> &mut Self
    where
        S: Into<String>,
        F: Fn(TaskContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.register(name, Arc::new(FnHandler::new(f)))
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn TaskHandler>> {
        self.handlers.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context() -> TaskContext {
        TaskContext {
            task_key: "sync".to_string(),
            args: "42".to_string(),
            token: 9,
            trace_id: "trace".to_string(),
        }
    }

    #[tokio::test]
    async fn closures_are_invocable_by_name() {
        let mut registry = HandlerRegistry::new();
        registry.register_fn("answer", |ctx: TaskContext| async move {
            anyhow::ensure!(ctx.args == "42", "wrong answer: {}", ctx.args);
            Ok(())
        });

        let handler = registry.get("answer").unwrap();
        assert!(handler.call(context()).await.is_ok());
        assert!(registry.get("missing").is_none());
    }

    #[test]
    fn builtin_handlers_are_listed() {
        let registry = HandlerRegistry::with_builtin();
        assert_eq!(registry.names(), vec!["http_get", "log_args"]);
    }
}
