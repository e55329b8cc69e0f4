//! # coursehub-entity
//!
//! The persisted job record and the enums describing its lifecycle.

pub mod job;

pub use job::{JobKind, JobRecord, JobSchedule, JobStatus, Lease, NewJob};
