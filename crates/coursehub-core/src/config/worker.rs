//! Dispatcher, lease and retry configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// Longest duration any worker setting may take (ten years).
pub const MAX_DURATION_SECONDS: u64 = 10 * 365 * 24 * 60 * 60;

/// Background job dispatcher configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Whether the dispatcher is enabled.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Number of handlers allowed to run concurrently per dispatcher.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Interval in seconds between polls when nothing is due.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_seconds: u64,
    /// Lifetime of a freshly acquired or renewed lease, in seconds.
    #[serde(default = "default_lease_duration")]
    pub lease_duration_seconds: u64,
    /// Heartbeat interval for lease renewal, in seconds.
    #[serde(default = "default_lease_renewal")]
    pub lease_renewal_seconds: u64,
    /// Retry budget applied to jobs enqueued without an explicit one.
    #[serde(default = "default_max_retries")]
    pub default_max_retries: u32,
    /// Backoff before the first retry, in seconds.
    #[serde(default = "default_retry_base_delay")]
    pub retry_base_delay_seconds: u64,
    /// Upper bound for the exponential backoff, in seconds.
    #[serde(default = "default_retry_max_delay")]
    pub retry_max_delay_seconds: u64,
    /// How long shutdown waits for in-flight handlers, in seconds.
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_seconds: u64,
}

impl WorkerConfig {
    /// Reject settings the dispatcher cannot run with.
    pub fn validate(&self) -> Result<(), AppError> {
        for (name, seconds) in [
            ("poll_interval_seconds", self.poll_interval_seconds),
            ("lease_duration_seconds", self.lease_duration_seconds),
            ("retry_base_delay_seconds", self.retry_base_delay_seconds),
            ("retry_max_delay_seconds", self.retry_max_delay_seconds),
            ("shutdown_timeout_seconds", self.shutdown_timeout_seconds),
        ] {
            if seconds > MAX_DURATION_SECONDS {
                return Err(AppError::configuration(format!(
                    "worker.{name} ({seconds}) exceeds the maximum of {MAX_DURATION_SECONDS}"
                )));
            }
        }
        if self.concurrency == 0 {
            return Err(AppError::configuration("worker.concurrency must be at least 1"));
        }
        if self.poll_interval_seconds == 0 {
            return Err(AppError::configuration(
                "worker.poll_interval_seconds must be at least 1",
            ));
        }
        if self.lease_duration_seconds == 0 {
            return Err(AppError::configuration(
                "worker.lease_duration_seconds must be at least 1",
            ));
        }
        if self.lease_renewal_seconds == 0
            || self.lease_renewal_seconds >= self.lease_duration_seconds
        {
            return Err(AppError::configuration(format!(
                "worker.lease_renewal_seconds ({}) must be positive and shorter than the lease ({})",
                self.lease_renewal_seconds, self.lease_duration_seconds
            )));
        }
        if self.retry_base_delay_seconds > self.retry_max_delay_seconds {
            return Err(AppError::configuration(format!(
                "worker.retry_base_delay_seconds ({}) exceeds retry_max_delay_seconds ({})",
                self.retry_base_delay_seconds, self.retry_max_delay_seconds
            )));
        }
        Ok(())
    }

    /// Poll interval as a [`Duration`].
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_seconds)
    }

    /// Lease lifetime as a [`chrono::Duration`].
    pub fn lease_duration(&self) -> chrono::Duration {
        bounded(self.lease_duration_seconds)
    }

    /// Backoff before the first retry as a [`chrono::Duration`].
    pub fn retry_base_delay(&self) -> chrono::Duration {
        bounded(self.retry_base_delay_seconds)
    }

    /// Backoff cap as a [`chrono::Duration`].
    pub fn retry_max_delay(&self) -> chrono::Duration {
        bounded(self.retry_max_delay_seconds)
    }

    /// Heartbeat interval as a [`Duration`].
    pub fn lease_renewal_interval(&self) -> Duration {
        Duration::from_secs(self.lease_renewal_seconds)
    }

    /// Shutdown grace period as a [`Duration`].
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_seconds)
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            concurrency: default_concurrency(),
            poll_interval_seconds: default_poll_interval(),
            lease_duration_seconds: default_lease_duration(),
            lease_renewal_seconds: default_lease_renewal(),
            default_max_retries: default_max_retries(),
            retry_base_delay_seconds: default_retry_base_delay(),
            retry_max_delay_seconds: default_retry_max_delay(),
            shutdown_timeout_seconds: default_shutdown_timeout(),
        }
    }
}

/// Clamped to [`MAX_DURATION_SECONDS`] so unvalidated settings cannot overflow.
fn bounded(seconds: u64) -> chrono::Duration {
    chrono::Duration::seconds(seconds.min(MAX_DURATION_SECONDS) as i64)
}

fn default_true() -> bool {
    true
}

fn default_concurrency() -> usize {
    4
}

fn default_poll_interval() -> u64 {
    2
}

fn default_lease_duration() -> u64 {
    300
}

fn default_lease_renewal() -> u64 {
    60
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_base_delay() -> u64 {
    10
}

fn default_retry_max_delay() -> u64 {
    3600
}

fn default_shutdown_timeout() -> u64 {
    30
}
