//! Engine with a fixed script, for tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::engine::{BuildOutcome, BuildRequest, ExecutionEngine, LogSink};

/// Emits `lines`, waits `delay`, then reports `outcome`.
pub struct ScriptedEngine {
    outcome: BuildOutcome,
    lines: Vec<String>,
    delay: Duration,
    honour_cancel: bool,
    runs: AtomicUsize,
}

impl ScriptedEngine {
    pub fn new(outcome: BuildOutcome) -> Self {
        Self {
            outcome,
            lines: Vec::new(),
            delay: Duration::from_millis(20),
            honour_cancel: true,
            runs: AtomicUsize::new(0),
        }
    }

    pub fn with_lines(mut self, lines: &[&str]) -> Self {
        self.lines = lines.iter().map(|l| l.to_string()).collect();
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Keep running after cancellation, like an engine that cannot be interrupted.
    pub fn ignoring_cancel(mut self) -> Self {
        self.honour_cancel = false;
        self
    }

    pub fn run_count(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ExecutionEngine for ScriptedEngine {
    async fn run(
        &self,
        _request: BuildRequest,
        log: LogSink,
        cancel: CancellationToken,
    ) -> BuildOutcome {
        self.runs.fetch_add(1, Ordering::SeqCst);
        for line in &self.lines {
            log.append(line.clone()).await;
        }
        if self.honour_cancel {
            tokio::select! {
                _ = cancel.cancelled() => BuildOutcome::Canceled,
                _ = tokio::time::sleep(self.delay) => self.outcome.clone(),
            }
        } else {
            tokio::time::sleep(self.delay).await;
            self.outcome.clone()
        }
    }

    fn name(&self) -> &str {
        "scripted"
    }
}
