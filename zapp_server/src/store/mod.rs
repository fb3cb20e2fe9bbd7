//! Persistence adapter for builds and repositories.
//!
//! Build records do not persist themselves; everything that loads or saves
//! them goes through a [`BuildStore`]. `MemoryStore` backs tests and
//! database-less runs, `PgStore` backs production.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;

use crate::models::build::BuildRecord;
use crate::models::platform::Platform;
use crate::models::repository::{NewRepository, Repository};

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[async_trait]
pub trait BuildStore: Send + Sync {
    /// Insert (when `build.id` is `None`) or update a build and return its id.
    ///
    /// Fails for a build without a repository.
    async fn save_build(&self, build: &BuildRecord) -> anyhow::Result<i64>;

    async fn load_build(&self, id: i64) -> anyhow::Result<Option<BuildRecord>>;

    /// Newest first, optionally restricted to one repository.
    async fn list_builds(
        &self,
        repository_id: Option<i64>,
        limit: i64,
    ) -> anyhow::Result<Vec<BuildRecord>>;

    /// Builds still `NotStarted`, oldest first.
    async fn pending_builds(&self, limit: i64) -> anyhow::Result<Vec<BuildRecord>>;

    /// Every build still `Running`, oldest first.
    async fn running_builds(&self) -> anyhow::Result<Vec<BuildRecord>>;

    async fn create_repository(&self, new_repository: NewRepository) -> anyhow::Result<Repository>;

    async fn load_repository(&self, id: i64) -> anyhow::Result<Option<Repository>>;

    /// Active repositories, in creation order.
    async fn list_repositories(&self) -> anyhow::Result<Vec<Repository>>;

    async fn find_repository_by_github(&self, github_repo: &str)
        -> anyhow::Result<Option<Repository>>;

    /// Remember the scheme and platform last built for a repository.
    async fn remember_target(
        &self,
        repository_id: i64,
        scheme: &str,
        platform: &Platform,
    ) -> anyhow::Result<()>;
}
