//! zapp.repository: a source-control checkout that builds run against.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use crate::models::platform::Platform;
use crate::schema::zapp_repositories;

#[derive(Debug, Clone, PartialEq, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = zapp_repositories)]
pub struct Repository {
    pub id: i64,
    pub name: String,
    pub local_path: String,
    pub remote_url: Option<String>,
    /// `owner/name` on GitHub, used to match webhooks and post statuses.
    pub github_repo: Option<String>,
    pub default_branch: String,
    pub last_scheme: Option<String>,
    pub last_platform: Option<serde_json::Value>,
    pub active: bool,
    pub create_date: Option<DateTime<Utc>>,
}

impl Repository {
    pub fn last_platform(&self) -> Option<Platform> {
        self.last_platform.as_ref().and_then(Platform::from_json)
    }
}

#[derive(Debug, Clone, Insertable, Deserialize)]
#[diesel(table_name = zapp_repositories)]
pub struct NewRepository {
    pub name: String,
    pub local_path: String,
    #[serde(default)]
    pub remote_url: Option<String>,
    #[serde(default)]
    pub github_repo: Option<String>,
    #[serde(default = "default_branch")]
    pub default_branch: String,
    #[serde(default)]
    pub last_scheme: Option<String>,
    #[serde(default)]
    pub last_platform: Option<serde_json::Value>,
}

fn default_branch() -> String {
    "master".to_string()
}

impl NewRepository {
    pub fn new(name: impl Into<String>, local_path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            local_path: local_path.into(),
            remote_url: None,
            github_repo: None,
            default_branch: default_branch(),
            last_scheme: None,
            last_platform: None,
        }
    }
}
