//! In-process store. Holds everything in ordered maps behind one lock.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use crate::error::BuildError;
use crate::models::build::BuildRecord;
use crate::models::platform::Platform;
use crate::models::repository::{NewRepository, Repository};
use crate::models::status::BuildStatus;
use crate::store::BuildStore;

#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

#[derive(Default)]
struct Inner {
    builds: BTreeMap<i64, BuildRecord>,
    repositories: BTreeMap<i64, Repository>,
    next_build_id: i64,
    next_repository_id: i64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BuildStore for MemoryStore {
    async fn save_build(&self, build: &BuildRecord) -> anyhow::Result<i64> {
        let repository_id = build.repository_id.ok_or(BuildError::MissingRepository)?;
        let mut inner = self.inner.write().await;
        if !inner.repositories.contains_key(&repository_id) {
            return Err(BuildError::RepositoryNotFound(repository_id).into());
        }

        let id = match build.id {
            Some(id) if inner.builds.contains_key(&id) => id,
            Some(id) => anyhow::bail!("build {id} not found"),
            None => {
                inner.next_build_id += 1;
                inner.next_build_id
            }
        };

        let create_date = inner
            .builds
            .get(&id)
            .and_then(|b| b.create_date)
            .or(build.create_date)
            .unwrap_or_else(Utc::now);
        let mut stored = build.clone();
        stored.id = Some(id);
        stored.create_date = Some(create_date);
        inner.builds.insert(id, stored);
        Ok(id)
    }

    async fn load_build(&self, id: i64) -> anyhow::Result<Option<BuildRecord>> {
        Ok(self.inner.read().await.builds.get(&id).cloned())
    }

    async fn list_builds(
        &self,
        repository_id: Option<i64>,
        limit: i64,
    ) -> anyhow::Result<Vec<BuildRecord>> {
        let inner = self.inner.read().await;
        Ok(inner
            .builds
            .values()
            .rev()
            .filter(|b| repository_id.is_none() || b.repository_id == repository_id)
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn pending_builds(&self, limit: i64) -> anyhow::Result<Vec<BuildRecord>> {
        let inner = self.inner.read().await;
        Ok(inner
            .builds
            .values()
            .filter(|b| b.status() == BuildStatus::NotStarted)
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn running_builds(&self) -> anyhow::Result<Vec<BuildRecord>> {
        let inner = self.inner.read().await;
        Ok(inner
            .builds
            .values()
            .filter(|b| b.status() == BuildStatus::Running)
            .cloned()
            .collect())
    }

    async fn create_repository(&self, new_repository: NewRepository) -> anyhow::Result<Repository> {
        let mut inner = self.inner.write().await;
        inner.next_repository_id += 1;
        let repository = Repository {
            id: inner.next_repository_id,
            name: new_repository.name,
            local_path: new_repository.local_path,
            remote_url: new_repository.remote_url,
            github_repo: new_repository.github_repo,
            default_branch: new_repository.default_branch,
            last_scheme: new_repository.last_scheme,
            last_platform: new_repository.last_platform,
            active: true,
            create_date: Some(Utc::now()),
        };
        inner.repositories.insert(repository.id, repository.clone());
        Ok(repository)
    }

    async fn load_repository(&self, id: i64) -> anyhow::Result<Option<Repository>> {
        Ok(self.inner.read().await.repositories.get(&id).cloned())
    }

    async fn list_repositories(&self) -> anyhow::Result<Vec<Repository>> {
        let inner = self.inner.read().await;
        Ok(inner.repositories.values().filter(|r| r.active).cloned().collect())
    }

    async fn find_repository_by_github(
        &self,
        github_repo: &str,
    ) -> anyhow::Result<Option<Repository>> {
        let inner = self.inner.read().await;
        Ok(inner
            .repositories
            .values()
            .find(|r| r.active && r.github_repo.as_deref() == Some(github_repo))
            .cloned())
    }

    async fn remember_target(
        &self,
        repository_id: i64,
        scheme: &str,
        platform: &Platform,
    ) -> anyhow::Result<()> {
        let mut inner = self.inner.write().await;
        let repository = inner
            .repositories
            .get_mut(&repository_id)
            .ok_or(BuildError::RepositoryNotFound(repository_id))?;
        repository.last_scheme = Some(scheme.to_string());
        repository.last_platform = Some(platform.to_json());
        Ok(())
    }
}
