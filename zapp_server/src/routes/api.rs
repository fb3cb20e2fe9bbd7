//! REST API for builds and repositories.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::build::BuildRecord;
use crate::models::platform::Platform;
use crate::models::repository::{NewRepository, Repository};
use crate::models::status::BuildStatus;
use crate::services::build_service::{self, NewBuild};
use crate::services::executor::Orchestrator;
use crate::services::repository_service;
use crate::store::BuildStore;

/// JSON response for a build.
#[derive(Debug, Serialize)]
pub struct BuildJson {
    pub id: Option<i64>,
    pub repository_id: Option<i64>,
    pub scheme: Option<String>,
    pub platform: Option<Platform>,
    pub latest_revision: Option<String>,
    pub commit_log: String,
    pub status: BuildStatus,
    pub status_description: &'static str,
    pub description: String,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub start_timestamp: Option<f64>,
    pub end_timestamp: Option<f64>,
    pub duration_ms: Option<i64>,
    pub create_date: Option<DateTime<Utc>>,
}

impl From<&BuildRecord> for BuildJson {
    fn from(build: &BuildRecord) -> Self {
        Self {
            id: build.id,
            repository_id: build.repository_id,
            scheme: build.scheme.clone(),
            platform: build.platform.clone(),
            latest_revision: build.latest_revision.clone(),
            commit_log: build.commit_log.clone(),
            status: build.status(),
            status_description: build.status_description(),
            description: build.description(),
            start_date: build.start_date(),
            end_date: build.end_date(),
            start_timestamp: build.start_timestamp(),
            end_timestamp: build.end_timestamp(),
            duration_ms: build.duration_ms(),
            create_date: build.create_date,
        }
    }
}

/// The build log, one entry per line.
#[derive(Debug, Serialize)]
pub struct BuildLogJson {
    pub id: i64,
    pub status: BuildStatus,
    pub lines: Vec<String>,
}

/// List builds, newest first, with live state for the ones in flight.
pub async fn list_builds(
    store: &dyn BuildStore,
    orchestrator: &Orchestrator,
    repository_id: Option<i64>,
    limit: i64,
) -> anyhow::Result<Vec<BuildJson>> {
    let builds = store.list_builds(repository_id, limit.clamp(1, 200)).await?;
    let builds = orchestrator.overlay_live(builds).await;
    Ok(builds.iter().map(BuildJson::from).collect())
}

/// Get a build by ID.
pub async fn get_build(
    orchestrator: &Orchestrator,
    build_id: i64,
) -> anyhow::Result<Option<BuildJson>> {
    Ok(orchestrator
        .build(build_id)
        .await?
        .as_ref()
        .map(BuildJson::from))
}

/// Get the log of a build, split into lines.
pub async fn get_build_log(
    orchestrator: &Orchestrator,
    build_id: i64,
) -> anyhow::Result<Option<BuildLogJson>> {
    Ok(orchestrator.build(build_id).await?.map(|build| BuildLogJson {
        id: build_id,
        status: build.status(),
        lines: build.log_lines().map(str::to_string).collect(),
    }))
}

/// Get the latest build of a repository.
pub async fn get_latest_build(
    store: &dyn BuildStore,
    orchestrator: &Orchestrator,
    repository_id: i64,
) -> anyhow::Result<Option<BuildJson>> {
    let Some(latest) = build_service::get_latest(store, repository_id).await? else {
        return Ok(None);
    };
    let live = orchestrator.overlay_live(vec![latest]).await;
    Ok(live.first().map(BuildJson::from))
}

// ── Trigger API ──

/// Request body for manually triggering a build.
#[derive(Debug, Deserialize)]
pub struct TriggerRequest {
    pub repository_id: i64,
    pub scheme: Option<String>,
    pub platform: Option<Platform>,
    pub revision: Option<String>,
    #[serde(default)]
    pub commit_log: String,
}

/// Response for a triggered build.
#[derive(Debug, Serialize)]
pub struct TriggerResponse {
    pub id: i64,
    pub status: BuildStatus,
    pub description: String,
}

/// Queue a build. The executor picks it up on its next poll.
pub async fn trigger_build(
    store: &dyn BuildStore,
    req: TriggerRequest,
) -> anyhow::Result<TriggerResponse> {
    let build = build_service::create_build(
        store,
        NewBuild {
            repository_id: req.repository_id,
            scheme: req.scheme,
            platform: req.platform,
            revision: req.revision,
            commit_log: req.commit_log,
        },
    )
    .await?;

    let id = build
        .id
        .ok_or_else(|| anyhow::anyhow!("created build has no id"))?;
    tracing::info!(build_id = id, "Build triggered via API");

    Ok(TriggerResponse {
        id,
        status: build.status(),
        description: build.description(),
    })
}

// ── Repository API ──

pub async fn list_repositories(store: &dyn BuildStore) -> anyhow::Result<Vec<Repository>> {
    store.list_repositories().await
}

pub async fn create_repository(
    store: &dyn BuildStore,
    new_repository: NewRepository,
) -> anyhow::Result<Repository> {
    repository_service::register_repository(store, new_repository).await
}
