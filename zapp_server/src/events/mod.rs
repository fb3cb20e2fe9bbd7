//! Lifecycle events for build records.

pub mod build;
