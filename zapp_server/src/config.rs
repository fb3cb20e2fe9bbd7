//! Server configuration, loaded from environment variables.

use std::str::FromStr;

use crate::engine::shell::DEFAULT_BUILD_COMMAND;

#[derive(Clone, Debug)]
pub struct ZappConfig {
    /// GitHub webhook secret for HMAC validation.
    pub github_webhook_secret: String,
    /// GitHub personal access token for commit status updates.
    pub github_token: String,
    /// Dashboard base URL for GitHub status links.
    pub dashboard_url: String,
    /// Maximum number of builds running at once.
    pub max_concurrent_builds: usize,
    /// Seconds between polls for pending builds.
    pub poll_interval_secs: u64,
    /// Shell command that performs the build.
    pub build_command: String,
    /// Seconds a build may run before it is failed.
    pub build_timeout_secs: u64,
    /// Connections in the database pool.
    pub max_db_connections: usize,
}

impl Default for ZappConfig {
    fn default() -> Self {
        Self {
            github_webhook_secret: String::new(),
            github_token: String::new(),
            dashboard_url: "http://localhost:9090".to_string(),
            max_concurrent_builds: 1,
            poll_interval_secs: 5,
            build_command: DEFAULT_BUILD_COMMAND.to_string(),
            build_timeout_secs: 3600,
            max_db_connections: 5,
        }
    }
}

impl ZappConfig {
    pub fn from_env() -> Self {
        let config = Self::from_lookup(|key| std::env::var(key).ok());

        if config.github_webhook_secret.is_empty() {
            tracing::warn!("ZAPP_WEBHOOK_SECRET not set -- webhook signature validation disabled");
        }
        if config.github_token.is_empty() {
            tracing::warn!("ZAPP_GITHUB_TOKEN not set -- GitHub status updates disabled");
        }

        config
    }

    /// Build a config from any key lookup; unset or unparsable keys keep their default.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        Self {
            github_webhook_secret: lookup("ZAPP_WEBHOOK_SECRET").unwrap_or_default(),
            github_token: lookup("ZAPP_GITHUB_TOKEN").unwrap_or_default(),
            dashboard_url: lookup("ZAPP_DASHBOARD_URL").unwrap_or(defaults.dashboard_url),
            max_concurrent_builds: parsed(&lookup, "ZAPP_MAX_CONCURRENT")
                .filter(|n: &usize| *n > 0)
                .unwrap_or(defaults.max_concurrent_builds),
            poll_interval_secs: parsed(&lookup, "ZAPP_POLL_INTERVAL")
                .filter(|n: &u64| *n > 0)
                .unwrap_or(defaults.poll_interval_secs),
            build_command: lookup("ZAPP_BUILD_COMMAND")
                .filter(|s| !s.trim().is_empty())
                .unwrap_or(defaults.build_command),
            build_timeout_secs: parsed(&lookup, "ZAPP_BUILD_TIMEOUT").unwrap_or(defaults.build_timeout_secs),
            max_db_connections: parsed(&lookup, "ZAPP_DB_CONNECTIONS")
                .filter(|n: &usize| *n > 0)
                .unwrap_or(defaults.max_db_connections),
        }
    }
}

fn parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    lookup(key).and_then(|s| s.trim().parse().ok())
}
