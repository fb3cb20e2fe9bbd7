//! Build executor. Background task that polls for pending builds and runs them.
//!
//! Picks up `not_started` builds oldest first, starts them through the build
//! runner while fewer than `max_concurrent_builds` are in flight, and keeps
//! their handles so the API can read live logs and cancel them.

use std::sync::Arc;
use std::time::Duration;

use dashmap::{DashMap, DashSet};
use tokio::sync::Notify;

use crate::config::ZappConfig;
use crate::engine::ExecutionEngine;
use crate::error::BuildError;
use crate::models::build::BuildRecord;
use crate::services::build_runner::{BuildCompletion, BuildHandle};
use crate::services::github_service::{self, CommitStatus};
use crate::store::BuildStore;

/// Pending builds looked at per poll, on top of the refused ones.
const PENDING_SCAN: usize = 100;

pub struct Orchestrator {
    store: Arc<dyn BuildStore>,
    engine: Arc<dyn ExecutionEngine>,
    config: ZappConfig,
    in_flight: DashMap<i64, BuildHandle>,
    /// Repositories with a build in flight; one checkout runs one build.
    busy_repositories: DashSet<i64>,
    /// Pending builds whose start was refused; they are not retried.
    rejected: DashSet<i64>,
    wake: Notify,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn BuildStore>,
        engine: Arc<dyn ExecutionEngine>,
        config: ZappConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            engine,
            config,
            in_flight: DashMap::new(),
            busy_repositories: DashSet::new(),
            rejected: DashSet::new(),
            wake: Notify::new(),
        })
    }

    /// Run the executor loop forever. Spawned as a background tokio task.
    pub async fn run(self: Arc<Self>) {
        tracing::info!(
            engine = self.engine.name(),
            max_concurrent = self.config.max_concurrent_builds,
            "Build executor started"
        );

        let interval = Duration::from_secs(self.config.poll_interval_secs);
        loop {
            loop {
                match self.poll_once().await {
                    Ok(Some(_)) => continue,
                    Ok(None) => break,
                    Err(e) => {
                        tracing::error!("Executor poll error: {e}");
                        break;
                    }
                }
            }
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = self.wake.notified() => {}
            }
        }
    }

    /// Poll right away instead of at the next interval.
    pub fn wake(&self) {
        self.wake.notify_one();
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    /// Start the oldest startable pending build, if there is capacity.
    ///
    /// Builds of a repository that already has one in flight wait their turn;
    /// refused builds are skipped. Returns the id of the started build.
    pub async fn poll_once(self: &Arc<Self>) -> anyhow::Result<Option<i64>> {
        if self.in_flight.len() >= self.config.max_concurrent_builds {
            return Ok(None);
        }

        let limit = self.rejected.len() + PENDING_SCAN;
        let pending = self.store.pending_builds(limit as i64).await?;
        if pending.len() < limit {
            // Every pending build is in view: forget refusals that are no longer pending.
            self.rejected
                .retain(|id| pending.iter().any(|b| b.id == Some(*id)));
        }

        for build in pending {
            let Some(id) = build.id else { continue };
            if self.in_flight.contains_key(&id) || self.rejected.contains(&id) {
                continue;
            }
            if build
                .repository_id
                .is_some_and(|repository_id| self.busy_repositories.contains(&repository_id))
            {
                continue;
            }

            match self.start_build(build).await {
                Ok(id) => return Ok(Some(id)),
                Err(e) if e.is_rejection() => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(None)
    }

    /// Start a build record and track it until it finishes.
    pub async fn start_build(self: &Arc<Self>, build: BuildRecord) -> Result<i64, BuildError> {
        let pending_id = build.id;
        let handle = BuildHandle::new(build);

        let completion = match handle
            .start(self.store.clone(), self.engine.clone())
            .await
        {
            Ok(completion) => completion,
            Err(e) => {
                if let (Some(id), true) = (pending_id, e.is_rejection()) {
                    self.rejected.insert(id);
                }
                tracing::warn!(build_id = pending_id, "Build not started: {e}");
                return Err(e);
            }
        };

        let build_id = completion.build_id();
        let started = handle.snapshot().await;
        if let Some(repository_id) = started.repository_id {
            self.busy_repositories.insert(repository_id);
        }
        self.in_flight.insert(build_id, handle);
        crate::metrics::builds_in_flight(self.in_flight.len());
        self.report_status(&started).await;

        let this = Arc::clone(self);
        let repository_id = started.repository_id;
        tokio::spawn(async move { this.track(build_id, repository_id, completion).await });

        Ok(build_id)
    }

    async fn track(&self, build_id: i64, repository_id: Option<i64>, completion: BuildCompletion) {
        // Resolves only once the finished build is stored.
        match completion.wait().await {
            Ok(finished) => self.report_status(&finished).await,
            Err(e) => tracing::error!(build_id, "Build completion lost: {e}"),
        }
        self.in_flight.remove(&build_id);
        if let Some(repository_id) = repository_id {
            self.busy_repositories.remove(&repository_id);
        }
        crate::metrics::builds_in_flight(self.in_flight.len());
        // A slot is free.
        self.wake();
    }

    /// Cancel a running build.
    pub async fn cancel(&self, build_id: i64) -> Result<(), BuildError> {
        let handle = self.in_flight.get(&build_id).map(|h| h.value().clone());
        if let Some(handle) = handle {
            tracing::info!(build_id, "Cancelling build");
            return handle.cancel().await;
        }

        match self.store.load_build(build_id).await? {
            Some(build) => Err(BuildError::NotRunning(build.status())),
            None => Err(BuildError::NotFound(build_id)),
        }
    }

    /// Cancel everything in flight, e.g. on shutdown.
    pub async fn cancel_all(&self) {
        let handles: Vec<BuildHandle> = self.in_flight.iter().map(|h| h.value().clone()).collect();
        for handle in handles {
            let _ = handle.cancel().await;
        }
    }

    /// Current state of a build: the live record while it runs, the stored one otherwise.
    pub async fn build(&self, build_id: i64) -> anyhow::Result<Option<BuildRecord>> {
        let handle = self.in_flight.get(&build_id).map(|h| h.value().clone());
        match handle {
            Some(handle) => Ok(Some(handle.snapshot().await)),
            None => self.store.load_build(build_id).await,
        }
    }

    /// Replace stored records of in-flight builds by their live state.
    pub async fn overlay_live(&self, builds: Vec<BuildRecord>) -> Vec<BuildRecord> {
        let mut result = Vec::with_capacity(builds.len());
        for build in builds {
            let handle = build
                .id
                .and_then(|id| self.in_flight.get(&id).map(|h| h.value().clone()));
            match handle {
                Some(handle) => result.push(handle.snapshot().await),
                None => result.push(build),
            }
        }
        result
    }

    /// Post the build's state as a GitHub commit status, when possible.
    async fn report_status(&self, build: &BuildRecord) {
        let (Some(build_id), Some(repository_id), Some(sha)) =
            (build.id, build.repository_id, build.latest_revision.as_deref())
        else {
            return;
        };
        if self.config.github_token.is_empty() {
            return;
        }

        let repository = match self.store.load_repository(repository_id).await {
            Ok(Some(repository)) => repository,
            Ok(None) => return,
            Err(e) => {
                tracing::warn!(build_id, "Could not load repository for status update: {e}");
                return;
            }
        };
        let Some(github_repo) = repository.github_repo.as_deref() else {
            return;
        };

        let description = build.description();
        let target_url = format!("{}/api/builds/{}", self.config.dashboard_url, build_id);
        let status = CommitStatus {
            repo: github_repo,
            sha,
            state: build.status().github_state(),
            description: &description,
            target_url: &target_url,
        };
        if let Err(e) = github_service::post_status(&self.config.github_token, &status).await {
            tracing::warn!(build_id, "GitHub status update failed: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use chrono::Utc;

    use super::*;
    use crate::engine::scripted::ScriptedEngine;
    use crate::engine::BuildOutcome;
    use crate::events::build::BuildEvent;
    use crate::models::platform::Platform;
    use crate::models::repository::{NewRepository, Repository};
    use crate::models::status::BuildStatus;
    use crate::store::MemoryStore;

    async fn setup(
        engine: ScriptedEngine,
        max_concurrent_builds: usize,
    ) -> (Arc<MemoryStore>, Arc<Orchestrator>, i64) {
        let store = Arc::new(MemoryStore::new());
        let repo = store
            .create_repository(NewRepository::new("app", "/tmp/app"))
            .await
            .unwrap();
        let config = ZappConfig {
            max_concurrent_builds,
            ..ZappConfig::default()
        };
        let orchestrator = Orchestrator::new(store.clone(), Arc::new(engine), config);
        (store, orchestrator, repo.id)
    }

    async fn queue(store: &MemoryStore, repository_id: i64) -> i64 {
        let build = BuildRecord::new()
            .for_repository(repository_id)
            .with_scheme("Debug")
            .with_platform(Platform::new().with("os", "iOS"));
        store.save_build(&build).await.unwrap()
    }

    async fn settle(orchestrator: &Orchestrator) {
        for _ in 0..200 {
            if orchestrator.in_flight_count() == 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("builds did not finish");
    }

    #[tokio::test]
    async fn runs_pending_builds_oldest_first() {
        let (store, orchestrator, repo_id) =
            setup(ScriptedEngine::new(BuildOutcome::Succeeded), 1).await;
        let first = queue(&store, repo_id).await;
        let second = queue(&store, repo_id).await;

        assert_eq!(orchestrator.poll_once().await.unwrap(), Some(first));
        // At capacity.
        assert_eq!(orchestrator.poll_once().await.unwrap(), None);
        settle(&orchestrator).await;

        assert_eq!(orchestrator.poll_once().await.unwrap(), Some(second));
        settle(&orchestrator).await;

        for id in [first, second] {
            let build = store.load_build(id).await.unwrap().unwrap();
            assert_eq!(build.status(), BuildStatus::Succeeded);
        }
        assert_eq!(orchestrator.poll_once().await.unwrap(), None);
    }

    #[tokio::test]
    async fn refused_builds_do_not_hold_up_the_queue() {
        let (store, orchestrator, repo_id) =
            setup(ScriptedEngine::new(BuildOutcome::Succeeded), 2).await;
        let no_scheme = store
            .save_build(&BuildRecord::new().for_repository(repo_id))
            .await
            .unwrap();
        let good = queue(&store, repo_id).await;

        assert_eq!(orchestrator.poll_once().await.unwrap(), Some(good));
        assert!(orchestrator.rejected.contains(&no_scheme));
        settle(&orchestrator).await;

        let mut refused = store.load_build(no_scheme).await.unwrap().unwrap();
        assert_eq!(refused.status(), BuildStatus::NotStarted);
        assert_eq!(orchestrator.poll_once().await.unwrap(), None);

        // Once the row leaves the queue the refusal is forgotten.
        refused
            .apply(&BuildEvent::BuildStarted { at: Utc::now() })
            .unwrap();
        store.save_build(&refused).await.unwrap();
        assert_eq!(orchestrator.poll_once().await.unwrap(), None);
        assert!(orchestrator.rejected.is_empty());
    }

    #[tokio::test]
    async fn one_build_per_repository_at_a_time() {
        let (store, orchestrator, app) = setup(
            ScriptedEngine::new(BuildOutcome::Succeeded).with_delay(Duration::from_millis(300)),
            3,
        )
        .await;
        let lib = store
            .create_repository(NewRepository::new("lib", "/tmp/lib"))
            .await
            .unwrap()
            .id;
        let app_first = queue(&store, app).await;
        let app_second = queue(&store, app).await;
        let lib_first = queue(&store, lib).await;

        assert_eq!(orchestrator.poll_once().await.unwrap(), Some(app_first));
        assert_eq!(orchestrator.poll_once().await.unwrap(), Some(lib_first));
        assert_eq!(orchestrator.poll_once().await.unwrap(), None);
        assert_eq!(orchestrator.in_flight_count(), 2);
        settle(&orchestrator).await;

        assert_eq!(orchestrator.poll_once().await.unwrap(), Some(app_second));
        settle(&orchestrator).await;
    }

    /// Memory store whose `fail_on`-th save fails.
    struct FailingSaveStore {
        inner: MemoryStore,
        saves: AtomicUsize,
        fail_on: usize,
    }

    #[async_trait]
    impl BuildStore for FailingSaveStore {
        async fn save_build(&self, build: &BuildRecord) -> anyhow::Result<i64> {
            if self.saves.fetch_add(1, Ordering::SeqCst) + 1 == self.fail_on {
                anyhow::bail!("database unavailable");
            }
            self.inner.save_build(build).await
        }

        async fn load_build(&self, id: i64) -> anyhow::Result<Option<BuildRecord>> {
            self.inner.load_build(id).await
        }

        async fn list_builds(
            &self,
            repository_id: Option<i64>,
            limit: i64,
        ) -> anyhow::Result<Vec<BuildRecord>> {
            self.inner.list_builds(repository_id, limit).await
        }

        async fn pending_builds(&self, limit: i64) -> anyhow::Result<Vec<BuildRecord>> {
            self.inner.pending_builds(limit).await
        }

        async fn running_builds(&self) -> anyhow::Result<Vec<BuildRecord>> {
            self.inner.running_builds().await
        }

        async fn create_repository(
            &self,
            new_repository: NewRepository,
        ) -> anyhow::Result<Repository> {
            self.inner.create_repository(new_repository).await
        }

        async fn load_repository(&self, id: i64) -> anyhow::Result<Option<Repository>> {
            self.inner.load_repository(id).await
        }

        async fn list_repositories(&self) -> anyhow::Result<Vec<Repository>> {
            self.inner.list_repositories().await
        }

        async fn find_repository_by_github(
            &self,
            github_repo: &str,
        ) -> anyhow::Result<Option<Repository>> {
            self.inner.find_repository_by_github(github_repo).await
        }

        async fn remember_target(
            &self,
            repository_id: i64,
            scheme: &str,
            platform: &Platform,
        ) -> anyhow::Result<()> {
            self.inner
                .remember_target(repository_id, scheme, platform)
                .await
        }
    }

    #[tokio::test]
    async fn finished_build_is_stored_after_a_failed_save() {
        // Save 1 marks the build running, save 2 records the outcome.
        let store = Arc::new(FailingSaveStore {
            inner: MemoryStore::new(),
            saves: AtomicUsize::new(0),
            fail_on: 2,
        });
        let repo_id = store
            .create_repository(NewRepository::new("app", "/tmp/app"))
            .await
            .unwrap()
            .id;
        let id = queue(&store.inner, repo_id).await;
        let orchestrator = Orchestrator::new(
            store.clone(),
            Arc::new(ScriptedEngine::new(BuildOutcome::Succeeded)),
            ZappConfig::default(),
        );

        assert_eq!(orchestrator.poll_once().await.unwrap(), Some(id));
        settle(&orchestrator).await;

        assert!(store.saves.load(Ordering::SeqCst) >= 3);
        let build = store.load_build(id).await.unwrap().unwrap();
        assert_eq!(build.status(), BuildStatus::Succeeded);
        assert!(build.end_date().is_some());
        assert!(matches!(
            orchestrator.cancel(id).await,
            Err(BuildError::NotRunning(BuildStatus::Succeeded))
        ));
    }

    #[tokio::test]
    async fn cancel_reaches_in_flight_build() {
        let (store, orchestrator, repo_id) = setup(
            ScriptedEngine::new(BuildOutcome::Succeeded).with_delay(Duration::from_secs(30)),
            1,
        )
        .await;
        let id = queue(&store, repo_id).await;
        orchestrator.poll_once().await.unwrap();

        let live = orchestrator.build(id).await.unwrap().unwrap();
        assert_eq!(live.status(), BuildStatus::Running);

        orchestrator.cancel(id).await.unwrap();
        settle(&orchestrator).await;

        let build = store.load_build(id).await.unwrap().unwrap();
        assert_eq!(build.status(), BuildStatus::Canceled);
        assert!(matches!(
            orchestrator.cancel(id).await,
            Err(BuildError::NotRunning(BuildStatus::Canceled))
        ));
        assert!(matches!(
            orchestrator.cancel(999).await,
            Err(BuildError::NotFound(999))
        ));
    }
}
