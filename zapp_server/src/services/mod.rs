//! Build server services: build lifecycle, orchestration and GitHub integration.

pub mod build_runner;
pub mod build_service;
pub mod executor;
pub mod github_service;
pub mod repository_service;
