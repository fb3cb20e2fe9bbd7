//! Build runner: starts a build record, drives it to a terminal state and
//! delivers its completion exactly once.
//!
//! The record lives behind a `RwLock`; every mutation is one write-locked
//! `BuildRecord::apply`, so readers never see a half-applied transition.
//! The start check and the `NotStarted → Running` transition happen under the
//! same write lock, which is what makes a second concurrent `start` fail
//! instead of racing.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{oneshot, RwLock};
use tokio_util::sync::CancellationToken;

use crate::engine::{BuildOutcome, BuildRequest, ExecutionEngine, LogSink};
use crate::error::BuildError;
use crate::events::build::BuildEvent;
use crate::models::build::BuildRecord;
use crate::models::status::BuildStatus;
use crate::store::BuildStore;

/// Shared handle on a live build record.
#[derive(Clone)]
pub struct BuildHandle {
    record: Arc<RwLock<BuildRecord>>,
    cancel: CancellationToken,
}

/// Resolves once the build reached a terminal state.
#[must_use = "the completion is the only way to learn how the build ended"]
pub struct BuildCompletion {
    build_id: i64,
    rx: oneshot::Receiver<BuildRecord>,
}

impl BuildCompletion {
    pub fn build_id(&self) -> i64 {
        self.build_id
    }

    /// Wait for the final state of the build.
    pub async fn wait(self) -> Result<BuildRecord, BuildError> {
        self.rx.await.map_err(|_| BuildError::Abandoned)
    }
}

impl BuildHandle {
    pub fn new(record: BuildRecord) -> Self {
        Self {
            record: Arc::new(RwLock::new(record)),
            cancel: CancellationToken::new(),
        }
    }

    /// Consistent copy of the current state.
    pub async fn snapshot(&self) -> BuildRecord {
        self.record.read().await.clone()
    }

    /// Begin executing the build.
    ///
    /// Checks the preconditions (repository, scheme, platform, `NotStarted`,
    /// repository resolvable through `store`), moves the record to `Running`,
    /// persists it and hands the work to `engine` on a new task. Returns
    /// immediately. On refusal the record is left untouched and no completion
    /// exists.
    pub async fn start(
        &self,
        store: Arc<dyn BuildStore>,
        engine: Arc<dyn ExecutionEngine>,
    ) -> Result<BuildCompletion, BuildError> {
        let mut record = self.record.write().await;
        record.check_startable()?;

        let repository_id = record.repository_id.ok_or(BuildError::MissingRepository)?;
        let repository = store
            .load_repository(repository_id)
            .await?
            .ok_or(BuildError::RepositoryNotFound(repository_id))?;

        // Persist first; only a saved transition becomes visible.
        let mut started = record.clone();
        started.apply(&BuildEvent::BuildStarted { at: Utc::now() })?;
        let build_id = store.save_build(&started).await?;
        started.id = Some(build_id);

        let request = BuildRequest {
            build_id: Some(build_id),
            repository,
            scheme: started.scheme.clone().unwrap_or_default(),
            platform: started.platform.clone().unwrap_or_default(),
            revision: started.latest_revision.clone(),
        };
        *record = started;
        drop(record);

        crate::metrics::build_status_changed(BuildStatus::Running);
        tracing::info!(
            build_id,
            repository_id,
            engine = engine.name(),
            "Build started"
        );

        let (tx, rx) = oneshot::channel();
        let record = self.record.clone();
        let cancel = self.cancel.clone();

        tokio::spawn(async move {
            let log = LogSink::new(record.clone());
            let outcome = tokio::select! {
                outcome = engine.run(request, log, cancel.clone()) => outcome,
                _ = cancel.cancelled() => BuildOutcome::Canceled,
            };

            let finished = finish(&record, outcome, &cancel).await;
            persist_finished(store.as_ref(), &finished).await;

            crate::metrics::build_status_changed(finished.status());
            if let Some(duration) = finished.duration_ms() {
                crate::metrics::build_duration(duration);
            }
            tracing::info!(
                build_id,
                status = %finished.status(),
                duration_ms = finished.duration_ms(),
                "Build finished"
            );

            // The receiver may be gone; the outcome is already recorded.
            let _ = tx.send(finished);
        });

        Ok(BuildCompletion { build_id, rx })
    }

    /// Request cancellation of a running build.
    ///
    /// Once this returns `Ok`, the build ends `Canceled` whatever the engine
    /// reports afterwards.
    pub async fn cancel(&self) -> Result<(), BuildError> {
        // Held until the token fired, so the build cannot finish in between.
        let record = self.record.write().await;
        if record.status() != BuildStatus::Running {
            return Err(BuildError::NotRunning(record.status()));
        }
        self.cancel.cancel();
        Ok(())
    }
}

async fn finish(
    record: &RwLock<BuildRecord>,
    outcome: BuildOutcome,
    cancel: &CancellationToken,
) -> BuildRecord {
    let mut record = record.write().await;

    let outcome = if cancel.is_cancelled() {
        BuildOutcome::Canceled
    } else {
        outcome
    };
    let status = outcome.status();
    let reason = match outcome {
        BuildOutcome::Failed { reason } => reason,
        BuildOutcome::Succeeded | BuildOutcome::Canceled => None,
    };

    if let Some(event) = BuildEvent::finished(status, Utc::now(), reason) {
        if let Err(e) = record.apply(&event) {
            tracing::error!(build_id = record.id, "Could not record build outcome: {e}");
        }
    }
    record.clone()
}

const SAVE_RETRY_START: Duration = Duration::from_millis(200);
const SAVE_RETRY_MAX: Duration = Duration::from_secs(30);

/// Save the finished record, retrying until the store accepts it.
///
/// The completion is only delivered afterwards, so the live record stays the
/// one readers see until the stored row is terminal too.
async fn persist_finished(store: &dyn BuildStore, finished: &BuildRecord) {
    let mut delay = SAVE_RETRY_START;
    while let Err(e) = store.save_build(finished).await {
        tracing::error!(
            build_id = finished.id,
            retry_in_ms = delay.as_millis() as u64,
            "Failed to persist finished build: {e}"
        );
        tokio::time::sleep(delay).await;
        delay = (delay * 2).min(SAVE_RETRY_MAX);
    }
}
