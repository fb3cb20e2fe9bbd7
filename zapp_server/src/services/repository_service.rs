//! Repository registration and lookup.

use crate::models::repository::{NewRepository, Repository};
use crate::store::BuildStore;

/// Register a repository after checking its required fields.
pub async fn register_repository(
    store: &dyn BuildStore,
    new_repository: NewRepository,
) -> anyhow::Result<Repository> {
    if new_repository.name.trim().is_empty() {
        anyhow::bail!("Repository name must not be empty");
    }
    if new_repository.local_path.trim().is_empty() {
        anyhow::bail!("Repository local_path must not be empty");
    }
    if let Some(platform) = &new_repository.last_platform {
        if !platform.is_object() {
            anyhow::bail!("Repository last_platform must be a JSON object");
        }
    }

    let repository = store.create_repository(new_repository).await?;
    tracing::info!(
        repository_id = repository.id,
        name = %repository.name,
        github_repo = ?repository.github_repo,
        "Repository registered"
    );
    Ok(repository)
}

/// Find an active repository by its GitHub name (e.g., "square/zapp").
pub async fn find_by_github(
    store: &dyn BuildStore,
    github_repo: &str,
) -> anyhow::Result<Option<Repository>> {
    store.find_repository_by_github(github_repo).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[tokio::test]
    async fn rejects_blank_fields() {
        let store = MemoryStore::new();
        assert!(register_repository(&store, NewRepository::new("", "/tmp/app"))
            .await
            .is_err());
        let mut new_repo = NewRepository::new("app", "/tmp/app");
        new_repo.last_platform = Some(serde_json::json!("iOS"));
        assert!(register_repository(&store, new_repo).await.is_err());
        assert!(store.list_repositories().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn finds_by_github_name() {
        let store = MemoryStore::new();
        let mut new_repo = NewRepository::new("zapp", "/src/zapp");
        new_repo.github_repo = Some("square/zapp".into());
        let repo = register_repository(&store, new_repo).await.unwrap();

        let found = find_by_github(&store, "square/zapp").await.unwrap();
        assert_eq!(found.map(|r| r.id), Some(repo.id));
        assert!(find_by_github(&store, "square/other").await.unwrap().is_none());
    }
}
