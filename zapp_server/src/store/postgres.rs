//! PostgreSQL store over diesel-async with a deadpool connection pool.

use async_trait::async_trait;
use diesel::prelude::*;
use diesel_async::pooled_connection::deadpool::{Object, Pool};
use diesel_async::pooled_connection::AsyncDieselConnectionManager;
use diesel_async::{AsyncPgConnection, RunQueryDsl};

use crate::models::build::{BuildRecord, BuildRow};
use crate::models::platform::Platform;
use crate::models::repository::{NewRepository, Repository};
use crate::models::status::BuildStatus;
use crate::schema::{zapp_builds, zapp_repositories};
use crate::store::BuildStore;

pub type DieselPool = Pool<AsyncPgConnection>;

pub struct PgStore {
    pool: DieselPool,
}

impl PgStore {
    /// Build a pool for `database_url`. Connections are opened lazily.
    pub fn connect(database_url: &str, max_connections: usize) -> anyhow::Result<Self> {
        let manager = AsyncDieselConnectionManager::<AsyncPgConnection>::new(database_url);
        let pool = Pool::builder(manager)
            .max_size(max_connections)
            .build()
            .map_err(|e| anyhow::anyhow!("diesel pool: {e}"))?;
        Ok(Self { pool })
    }

    async fn conn(&self) -> anyhow::Result<Object<AsyncPgConnection>> {
        self.pool
            .get()
            .await
            .map_err(|e| anyhow::anyhow!("diesel pool: {e}"))
    }

    /// Create the tables if they do not exist yet.
    pub async fn migrate(&self) -> anyhow::Result<()> {
        let mut conn = self.conn().await?;
        crate::migration::run_migration(&mut *conn).await
    }
}

#[async_trait]
impl BuildStore for PgStore {
    async fn save_build(&self, build: &BuildRecord) -> anyhow::Result<i64> {
        let values = build.to_values()?;
        let mut conn = self.conn().await?;
        save_build(&mut *conn, build.id, values).await
    }

    async fn load_build(&self, id: i64) -> anyhow::Result<Option<BuildRecord>> {
        let mut conn = self.conn().await?;
        let row = zapp_builds::table
            .find(id)
            .select(BuildRow::as_select())
            .first::<BuildRow>(&mut *conn)
            .await
            .optional()?;
        row.map(BuildRecord::try_from).transpose()
    }

    async fn list_builds(
        &self,
        repository_id: Option<i64>,
        limit: i64,
    ) -> anyhow::Result<Vec<BuildRecord>> {
        let mut conn = self.conn().await?;
        let mut query = zapp_builds::table
            .select(BuildRow::as_select())
            .order(zapp_builds::id.desc())
            .limit(limit)
            .into_boxed();
        if let Some(repository_id) = repository_id {
            query = query.filter(zapp_builds::repository_id.eq(repository_id));
        }
        let rows = query.load::<BuildRow>(&mut *conn).await?;
        rows.into_iter().map(BuildRecord::try_from).collect()
    }

    async fn pending_builds(&self, limit: i64) -> anyhow::Result<Vec<BuildRecord>> {
        let mut conn = self.conn().await?;
        let rows = zapp_builds::table
            .filter(zapp_builds::status.eq(BuildStatus::NotStarted.as_str()))
            .order(zapp_builds::id.asc())
            .limit(limit)
            .select(BuildRow::as_select())
            .load::<BuildRow>(&mut *conn)
            .await?;
        rows.into_iter().map(BuildRecord::try_from).collect()
    }

    async fn running_builds(&self) -> anyhow::Result<Vec<BuildRecord>> {
        let mut conn = self.conn().await?;
        let rows = zapp_builds::table
            .filter(zapp_builds::status.eq(BuildStatus::Running.as_str()))
            .order(zapp_builds::id.asc())
            .select(BuildRow::as_select())
            .load::<BuildRow>(&mut *conn)
            .await?;
        rows.into_iter().map(BuildRecord::try_from).collect()
    }

    async fn create_repository(&self, new_repository: NewRepository) -> anyhow::Result<Repository> {
        let mut conn = self.conn().await?;
        let result = diesel::insert_into(zapp_repositories::table)
            .values(&new_repository)
            .get_result::<Repository>(&mut *conn)
            .await?;
        Ok(result)
    }

    async fn load_repository(&self, id: i64) -> anyhow::Result<Option<Repository>> {
        let mut conn = self.conn().await?;
        let result = zapp_repositories::table
            .find(id)
            .first::<Repository>(&mut *conn)
            .await
            .optional()?;
        Ok(result)
    }

    async fn list_repositories(&self) -> anyhow::Result<Vec<Repository>> {
        let mut conn = self.conn().await?;
        let results = zapp_repositories::table
            .filter(zapp_repositories::active.eq(true))
            .order(zapp_repositories::id.asc())
            .load::<Repository>(&mut *conn)
            .await?;
        Ok(results)
    }

    async fn find_repository_by_github(
        &self,
        github_repo: &str,
    ) -> anyhow::Result<Option<Repository>> {
        let mut conn = self.conn().await?;
        let result = zapp_repositories::table
            .filter(zapp_repositories::github_repo.eq(github_repo))
            .filter(zapp_repositories::active.eq(true))
            .first::<Repository>(&mut *conn)
            .await
            .optional()?;
        Ok(result)
    }

    async fn remember_target(
        &self,
        repository_id: i64,
        scheme: &str,
        platform: &Platform,
    ) -> anyhow::Result<()> {
        let mut conn = self.conn().await?;
        diesel::update(zapp_repositories::table.find(repository_id))
            .set((
                zapp_repositories::last_scheme.eq(Some(scheme)),
                zapp_repositories::last_platform.eq(Some(platform.to_json())),
            ))
            .execute(&mut *conn)
            .await?;
        Ok(())
    }
}

async fn save_build(
    conn: &mut AsyncPgConnection,
    id: Option<i64>,
    values: crate::models::build::BuildValues,
) -> anyhow::Result<i64> {
    match id {
        Some(id) => {
            let updated = diesel::update(zapp_builds::table.find(id))
                .set(&values)
                .execute(conn)
                .await?;
            if updated == 0 {
                anyhow::bail!("build {id} not found");
            }
            Ok(id)
        }
        None => {
            let id = diesel::insert_into(zapp_builds::table)
                .values(&values)
                .returning(zapp_builds::id)
                .get_result::<i64>(conn)
                .await?;
            Ok(id)
        }
    }
}
