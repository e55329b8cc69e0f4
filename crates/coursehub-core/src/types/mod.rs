//! Core type definitions used across the CourseHub workspace.

pub mod id;

pub use id::*;
