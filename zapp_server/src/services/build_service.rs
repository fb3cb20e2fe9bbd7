//! Build creation and lookup.

use chrono::Utc;

use crate::events::build::BuildEvent;
use crate::models::build::{is_valid_revision, BuildRecord};
use crate::models::platform::Platform;
use crate::models::status::BuildStatus;
use crate::store::BuildStore;

/// What the orchestrator needs to queue a build.
#[derive(Debug, Clone, Default)]
pub struct NewBuild {
    pub repository_id: i64,
    /// Falls back to the repository's last scheme.
    pub scheme: Option<String>,
    /// Falls back to the repository's last platform.
    pub platform: Option<Platform>,
    pub revision: Option<String>,
    pub commit_log: String,
}

/// Create a new, not yet started build record.
///
/// The scheme and platform are remembered on the repository so the next
/// webhook-triggered build targets the same configuration.
pub async fn create_build(store: &dyn BuildStore, new_build: NewBuild) -> anyhow::Result<BuildRecord> {
    let repository = store
        .load_repository(new_build.repository_id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("Repository not found: {}", new_build.repository_id))?;

    let scheme = new_build
        .scheme
        .filter(|s| !s.is_empty())
        .or_else(|| repository.last_scheme.clone())
        .ok_or_else(|| anyhow::anyhow!("No scheme given for repository {}", repository.name))?;
    let platform = new_build
        .platform
        .filter(|p| !p.is_empty())
        .or_else(|| repository.last_platform())
        .ok_or_else(|| anyhow::anyhow!("No platform given for repository {}", repository.name))?;

    if let Some(revision) = new_build.revision.as_deref() {
        if !is_valid_revision(revision) {
            anyhow::bail!("Invalid revision: {revision:?}");
        }
    }

    store.remember_target(repository.id, &scheme, &platform).await?;

    let mut build = BuildRecord::new()
        .for_repository(repository.id)
        .with_scheme(scheme)
        .with_platform(platform)
        .with_commit_log(new_build.commit_log);
    if let Some(revision) = new_build.revision {
        build = build.with_revision(revision);
    }

    let id = store.save_build(&build).await?;
    build.id = Some(id);

    crate::metrics::build_status_changed(BuildStatus::NotStarted);
    tracing::info!(
        build_id = id,
        repository_id = repository.id,
        description = %build.description(),
        "Build created"
    );

    Ok(build)
}

/// Get the latest build for a repository.
pub async fn get_latest(
    store: &dyn BuildStore,
    repository_id: i64,
) -> anyhow::Result<Option<BuildRecord>> {
    Ok(store
        .list_builds(Some(repository_id), 1)
        .await?
        .into_iter()
        .next())
}

/// Fail builds left `Running` by a previous process.
///
/// Nothing can finish them any more; called once at start-up before the
/// executor begins polling. Returns how many builds were failed.
pub async fn fail_orphaned_builds(store: &dyn BuildStore) -> anyhow::Result<usize> {
    let orphans = store.running_builds().await?;
    for mut build in orphans.iter().cloned() {
        build.apply(&BuildEvent::BuildFailed {
            at: Utc::now(),
            reason: Some("server stopped while the build was running".to_string()),
        })?;
        store.save_build(&build).await?;
        crate::metrics::build_status_changed(BuildStatus::Failed);
        tracing::warn!(build_id = build.id, "Failed orphaned build");
    }
    Ok(orphans.len())
}

/// Join commit messages, oldest first, one paragraph each.
pub fn compose_commit_log<'a>(messages: impl IntoIterator<Item = &'a str>) -> String {
    messages
        .into_iter()
        .map(str::trim)
        .filter(|m| !m.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n")
}
