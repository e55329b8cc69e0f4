//! Echo job handler, for smoke-testing a deployment.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing;

use crate::registry::{HandlerError, JobHandler};

/// Payload accepted by [`EchoJobHandler`]. Every field is optional.
#[derive(Debug, Default, Deserialize)]
struct EchoPayload {
    /// Text to log
    #[serde(default)]
    message: Option<String>,
    /// Simulated work before finishing, in milliseconds
    #[serde(default)]
    delay_ms: u64,
    /// Fail with this reason instead of succeeding
    #[serde(default)]
    fail_with: Option<String>,
}

/// Logs its payload, optionally after a delay.
#[derive(Debug, Default, Clone, Copy)]
pub struct EchoJobHandler;

#[async_trait]
impl JobHandler for EchoJobHandler {
    async fn execute(&self, payload: &Value, cancel: CancellationToken) -> Result<(), HandlerError> {
        let payload: EchoPayload = if payload.is_null() {
            EchoPayload::default()
        } else {
            serde_json::from_value(payload.clone())?
        };

        if payload.delay_ms > 0 {
            tokio::select! {
                _ = cancel.cancelled() => {
                    return Err(HandlerError::transient("Echo interrupted"));
                }
                _ = tokio::time::sleep(Duration::from_millis(payload.delay_ms)) => {}
            }
        }

        if let Some(reason) = payload.fail_with {
            return Err(HandlerError::transient(reason));
        }

        tracing::info!(
            "Echo: {}",
            payload.message.as_deref().unwrap_or("(no message)")
        );
        Ok(())
    }
}
