//! Background job scheduling for CourseHub.
//!
//! This crate provides:
//! - A handler registry mapping handler types to handler factories
//! - A lease manager layered on the job record store
//! - Retry and recurrence policies applied after each execution
//! - A dispatcher that polls, claims and executes due jobs on a bounded pool
//! - The [`JobService`] facade the rest of the platform enqueues through

pub mod dispatcher;
pub mod jobs;
pub mod lease;
pub mod recurrence;
pub mod registry;
pub mod retry;
pub mod service;

pub use dispatcher::{Dispatcher, PollOutcome};
pub use lease::{ClaimedJob, LeaseManager};
pub use recurrence::RecurrenceCalculator;
pub use registry::{HandlerError, HandlerRegistry, JobHandler};
pub use retry::{FailureOutcome, JobFailure, RetryPolicy};
pub use service::{JobCreateParams, JobService, QueueStats};
