//! Zapp data models.

pub mod build;
pub mod platform;
pub mod repository;
pub mod status;
