//! Background job domain entities.

pub mod model;
pub mod status;

pub use model::{JobRecord, JobSchedule, Lease, NewJob};
pub use status::{JobKind, JobStatus};
