//! Built-in application used by the `app-worker` binary.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};

use crate::app::{AppEvents, Application};
use crate::config::{FrameworkInfo, WorkerConfig};

type BootFuture = Pin<Box<dyn Future<Output = Result<(), String>> + Send>>;
type BootFn = Arc<dyn Fn() -> BootFuture + Send + Sync>;

/// Serves the framework identity and boots with a start timeout.
pub struct DefaultApplication {
    framework: FrameworkInfo,
    start_timeout: Duration,
    boot: BootFn,
}

impl DefaultApplication {
    pub fn new(config: &WorkerConfig) -> Self {
        Self {
            framework: config.framework().clone(),
            start_timeout: Duration::from_secs(config.options().start_timeout_secs),
            boot: Arc::new(|| Box::pin(async { Ok(()) })),
        }
    }

    /// Replace the boot step.
    pub fn with_boot<F, Fut>(mut self, boot: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), String>> + Send + 'static,
    {
        self.boot = Arc::new(move || Box::pin(boot()));
        self
    }

    pub fn with_start_timeout(mut self, timeout: Duration) -> Self {
        self.start_timeout = timeout;
        self
    }
}

impl Application for DefaultApplication {
    fn router(&self) -> Router {
        let identity = json!({
            "name": self.framework.name,
            "version": self.framework.version,
        });
        Router::new().route("/", get(move || identity_handler(identity.clone())))
    }

    fn start(&self, events: AppEvents) {
        let boot = (self.boot)();
        let timeout = self.start_timeout;
        tokio::spawn(async move {
            match tokio::time::timeout(timeout, boot).await {
                Ok(Ok(())) => events.ready(),
                Ok(Err(reason)) => events.error(reason),
                Err(_) => events.start_timeout(),
            }
        });
    }
}

async fn identity_handler(identity: Value) -> Json<Value> {
    Json(identity)
}
