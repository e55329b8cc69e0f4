//! # coursehub-database
//!
//! The [`JobStore`] contract the scheduler persists through, a PostgreSQL
//! implementation backed by sqlx, and an in-process implementation for
//! single-node deployments and tests.

pub mod connection;
pub mod memory;
pub mod migration;
pub mod repositories;
pub mod store;

pub use connection::DatabasePool;
pub use memory::MemoryJobStore;
pub use repositories::job::JobRepository;
pub use store::{JobStore, WriteGuard};
