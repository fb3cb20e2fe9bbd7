//! GitHub webhook handler: receives push events and queues builds.

use axum::body::Bytes;
use axum::http::{HeaderMap, StatusCode};

use crate::config::ZappConfig;
use crate::services::build_service::{self, NewBuild};
use crate::services::executor::Orchestrator;
use crate::services::{github_service, repository_service};
use crate::store::BuildStore;

/// The parts of a push payload a build needs.
#[derive(Debug, PartialEq)]
pub struct PushEvent {
    pub repo_full_name: String,
    pub branch: String,
    pub commit_sha: String,
    pub commit_log: String,
}

/// Extract a [`PushEvent`] from a GitHub push payload.
///
/// Tag pushes and branch deletions yield `None`.
pub fn parse_push(payload: &serde_json::Value) -> Option<PushEvent> {
    if payload["deleted"].as_bool().unwrap_or(false) {
        return None;
    }

    let repo_full_name = payload["repository"]["full_name"].as_str()?;
    let branch = payload["ref"].as_str()?.strip_prefix("refs/heads/")?;
    let commit_sha = payload["after"].as_str().filter(|s| !s.is_empty())?;

    let messages = payload["commits"]
        .as_array()
        .map(|commits| {
            commits
                .iter()
                .filter_map(|c| c["message"].as_str())
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();
    let commit_log = if messages.is_empty() {
        payload["head_commit"]["message"]
            .as_str()
            .map(|m| build_service::compose_commit_log([m]))
            .unwrap_or_default()
    } else {
        build_service::compose_commit_log(messages)
    };

    Some(PushEvent {
        repo_full_name: repo_full_name.to_string(),
        branch: branch.to_string(),
        commit_sha: commit_sha.to_string(),
        commit_log,
    })
}

/// Handle an incoming GitHub webhook payload.
pub async fn handle_webhook(
    config: &ZappConfig,
    store: &dyn BuildStore,
    orchestrator: &Orchestrator,
    headers: &HeaderMap,
    body: Bytes,
) -> Result<StatusCode, StatusCode> {
    // Validate signature
    let signature = headers
        .get("x-hub-signature-256")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    if !github_service::validate_signature(&config.github_webhook_secret, &body, signature) {
        tracing::warn!("Webhook signature validation failed");
        return Err(StatusCode::UNAUTHORIZED);
    }

    let event_type = headers
        .get("x-github-event")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown");

    let payload: serde_json::Value =
        serde_json::from_slice(&body).map_err(|_| StatusCode::BAD_REQUEST)?;

    match event_type {
        "push" => handle_push(store, orchestrator, &payload).await,
        "ping" => {
            tracing::info!("Received GitHub ping webhook");
            Ok(StatusCode::OK)
        }
        _ => {
            tracing::debug!("Ignoring webhook event: {}", event_type);
            Ok(StatusCode::OK)
        }
    }
}

async fn handle_push(
    store: &dyn BuildStore,
    orchestrator: &Orchestrator,
    payload: &serde_json::Value,
) -> Result<StatusCode, StatusCode> {
    let Some(push) = parse_push(payload) else {
        return Ok(StatusCode::OK);
    };

    let repository = repository_service::find_by_github(store, &push.repo_full_name)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    let repository = match repository {
        Some(r) => r,
        None => {
            tracing::debug!("No repository registered for: {}", push.repo_full_name);
            return Ok(StatusCode::OK);
        }
    };

    if push.branch != repository.default_branch {
        tracing::debug!(
            repository_id = repository.id,
            branch = %push.branch,
            "Ignoring push to non-default branch"
        );
        return Ok(StatusCode::OK);
    }

    if repository.last_scheme.is_none() || repository.last_platform().is_none() {
        tracing::info!(
            repository_id = repository.id,
            "Push received but no scheme/platform known yet; trigger a build manually first"
        );
        return Ok(StatusCode::OK);
    }

    let new_build = NewBuild {
        repository_id: repository.id,
        revision: Some(push.commit_sha),
        commit_log: push.commit_log,
        ..NewBuild::default()
    };

    match build_service::create_build(store, new_build).await {
        Ok(build) => {
            tracing::info!(
                build_id = build.id,
                branch = %push.branch,
                "Build created from push webhook"
            );
            orchestrator.wake();
            Ok(StatusCode::CREATED)
        }
        Err(e) => {
            tracing::error!("Failed to create build: {}", e);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}
