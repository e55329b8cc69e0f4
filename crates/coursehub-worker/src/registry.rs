//! Handler registry: maps handler types to factories producing handlers.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing;

/// A unit of business logic executed for a job.
///
/// Implementations own payload deserialization and must tolerate being run
/// more than once for the same job: delivery is at-least-once.
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// Execute the job.
    ///
    /// `cancel` fires when the job is cancelled or its lease is lost while
    /// the handler is running. Long-running handlers should poll it.
    async fn execute(&self, payload: &Value, cancel: CancellationToken) -> Result<(), HandlerError>;
}

/// Failure reported by a handler.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HandlerError {
    /// May succeed on a later attempt.
    #[error("Transient job failure: {0}")]
    Transient(String),

    /// Will never succeed; do not retry.
    #[error("Permanent job failure: {0}")]
    Permanent(String),
}

impl HandlerError {
    /// Create a transient failure.
    pub fn transient(reason: impl Into<String>) -> Self {
        Self::Transient(reason.into())
    }

    /// Create a permanent failure.
    pub fn permanent(reason: impl Into<String>) -> Self {
        Self::Permanent(reason.into())
    }

    /// Failure detail without the category prefix.
    pub fn reason(&self) -> &str {
        match self {
            Self::Transient(reason) | Self::Permanent(reason) => reason,
        }
    }
}

impl From<serde_json::Error> for HandlerError {
    fn from(err: serde_json::Error) -> Self {
        Self::Permanent(format!("Invalid payload: {err}"))
    }
}

/// Produces a handler instance for one execution.
pub type HandlerFactory = Arc<dyn Fn() -> Arc<dyn JobHandler> + Send + Sync>;

/// Typed registry from handler-type identifier to [`HandlerFactory`].
#[derive(Default)]
pub struct HandlerRegistry {
    factories: HashMap<String, HandlerFactory>,
}

impl HandlerRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory invoked once per execution.
    pub fn register<F, H>(&mut self, handler_type: impl Into<String>, factory: F)
    where
        F: Fn() -> H + Send + Sync + 'static,
        H: JobHandler + 'static,
    {
        let handler_type = handler_type.into();
        tracing::info!("Registered job handler for type '{}'", handler_type);
        self.factories.insert(
            handler_type,
            Arc::new(move || Arc::new(factory()) as Arc<dyn JobHandler>),
        );
    }

    /// Register a single shared handler instance.
    pub fn register_shared(&mut self, handler_type: impl Into<String>, handler: Arc<dyn JobHandler>) {
        let handler_type = handler_type.into();
        tracing::info!("Registered shared job handler for type '{}'", handler_type);
        self.factories
            .insert(handler_type, Arc::new(move || Arc::clone(&handler)));
    }

    /// Produce a handler for `handler_type`, if one is registered.
    pub fn resolve(&self, handler_type: &str) -> Option<Arc<dyn JobHandler>> {
        self.factories.get(handler_type).map(|factory| factory())
    }

    /// Check if a handler is registered for a handler type.
    pub fn contains(&self, handler_type: &str) -> bool {
        self.factories.contains_key(handler_type)
    }

    /// Registered handler types, sorted.
    pub fn handler_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.factories.keys().cloned().collect();
        types.sort();
        types
    }
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("handler_types", &self.handler_types())
            .finish()
    }
}
