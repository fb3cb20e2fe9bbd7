//! Execution engines, the things that actually perform a build.
//!
//! The runner hands an engine a [`BuildRequest`], a [`LogSink`] that appends
//! output to the live build record, and a cancellation token. The engine
//! reports how the build ended; it never touches the record's status.

pub mod shell;

#[cfg(test)]
pub mod scripted;

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::events::build::BuildEvent;
use crate::models::build::BuildRecord;
use crate::models::platform::Platform;
use crate::models::repository::Repository;
use crate::models::status::BuildStatus;

pub use shell::ShellEngine;

/// Everything an engine needs to run one build.
#[derive(Debug, Clone)]
pub struct BuildRequest {
    pub build_id: Option<i64>,
    pub repository: Repository,
    pub scheme: String,
    pub platform: Platform,
    pub revision: Option<String>,
}

/// How a build ended, as reported by an engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildOutcome {
    Succeeded,
    Failed { reason: Option<String> },
    Canceled,
}

impl BuildOutcome {
    pub fn failed(reason: impl Into<String>) -> Self {
        BuildOutcome::Failed {
            reason: Some(reason.into()),
        }
    }

    pub fn status(&self) -> BuildStatus {
        match self {
            BuildOutcome::Succeeded => BuildStatus::Succeeded,
            BuildOutcome::Failed { .. } => BuildStatus::Failed,
            BuildOutcome::Canceled => BuildStatus::Canceled,
        }
    }
}

#[async_trait]
pub trait ExecutionEngine: Send + Sync {
    /// Run the build to completion.
    ///
    /// Implementations should return `BuildOutcome::Canceled` promptly once
    /// `cancel` fires; the runner stops waiting for them at that point anyway.
    async fn run(
        &self,
        request: BuildRequest,
        log: LogSink,
        cancel: CancellationToken,
    ) -> BuildOutcome;

    /// Name for logs.
    fn name(&self) -> &str;
}

/// Appends build output to a live build record.
#[derive(Clone)]
pub struct LogSink {
    record: Arc<RwLock<BuildRecord>>,
}

impl LogSink {
    pub fn new(record: Arc<RwLock<BuildRecord>>) -> Self {
        Self { record }
    }

    /// Append one line. Lines arriving after the build finished are dropped.
    pub async fn append(&self, line: impl Into<String>) {
        let event = BuildEvent::LogAppended { line: line.into() };
        if let Err(e) = self.record.write().await.apply(&event) {
            tracing::debug!("Dropping log line: {e}");
        }
    }
}
