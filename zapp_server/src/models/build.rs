//! zapp.build: one build attempt for a repository, scheme and platform.

use chrono::{DateTime, Utc};
use diesel::prelude::*;

use crate::error::BuildError;
use crate::events::build::BuildEvent;
use crate::models::platform::Platform;
use crate::models::status::BuildStatus;
use crate::schema::zapp_builds;

/// A build record.
///
/// The repository is referenced by id only; navigation goes through the
/// store. Status and dates are private: they only change through
/// [`BuildRecord::apply`], which enforces the lifecycle invariants.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BuildRecord {
    /// `None` until the record has been saved.
    pub id: Option<i64>,
    pub repository_id: Option<i64>,
    pub scheme: Option<String>,
    pub platform: Option<Platform>,
    pub latest_revision: Option<String>,
    /// Commit messages accumulated since the previous build.
    pub commit_log: String,
    pub create_date: Option<DateTime<Utc>>,
    log: String,
    status: BuildStatus,
    start_date: Option<DateTime<Utc>>,
    end_date: Option<DateTime<Utc>>,
}

impl BuildRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn for_repository(mut self, repository_id: i64) -> Self {
        self.repository_id = Some(repository_id);
        self
    }

    pub fn with_scheme(mut self, scheme: impl Into<String>) -> Self {
        self.scheme = Some(scheme.into());
        self
    }

    pub fn with_platform(mut self, platform: Platform) -> Self {
        self.platform = Some(platform);
        self
    }

    pub fn with_revision(mut self, revision: impl Into<String>) -> Self {
        self.latest_revision = Some(revision.into());
        self
    }

    pub fn with_commit_log(mut self, commit_log: impl Into<String>) -> Self {
        self.commit_log = commit_log.into();
        self
    }

    pub fn status(&self) -> BuildStatus {
        self.status
    }

    pub fn start_date(&self) -> Option<DateTime<Utc>> {
        self.start_date
    }

    pub fn end_date(&self) -> Option<DateTime<Utc>> {
        self.end_date
    }

    /// Seconds since the epoch, mirroring `start_date`.
    pub fn start_timestamp(&self) -> Option<f64> {
        self.start_date.map(epoch_seconds)
    }

    /// Seconds since the epoch, mirroring `end_date`.
    pub fn end_timestamp(&self) -> Option<f64> {
        self.end_date.map(epoch_seconds)
    }

    pub fn duration_ms(&self) -> Option<i64> {
        match (self.start_date, self.end_date) {
            (Some(start), Some(end)) => Some((end - start).num_milliseconds()),
            _ => None,
        }
    }

    /// Raw build output.
    pub fn log(&self) -> &str {
        &self.log
    }

    /// The build output split into lines, recomputed on every call.
    pub fn log_lines(&self) -> std::str::Lines<'_> {
        self.log.lines()
    }

    pub fn status_description(&self) -> &'static str {
        self.status.description()
    }

    /// `"<scheme> on <platform>: <status>"`.
    pub fn description(&self) -> String {
        let scheme = self
            .scheme
            .as_deref()
            .filter(|s| !s.is_empty())
            .unwrap_or("(no scheme)");
        let platform = self
            .platform
            .as_ref()
            .filter(|p| !p.is_empty())
            .map(Platform::label)
            .unwrap_or_else(|| "(no platform)".to_string());
        format!("{scheme} on {platform}: {}", self.status_description())
    }

    /// Check everything `start` needs that the record itself can answer.
    pub fn check_startable(&self) -> Result<(), BuildError> {
        if self.status != BuildStatus::NotStarted {
            return Err(BuildError::AlreadyStarted(self.status));
        }
        if self.repository_id.is_none() {
            return Err(BuildError::MissingRepository);
        }
        if self.scheme.as_deref().is_none_or(str::is_empty) {
            return Err(BuildError::MissingScheme);
        }
        if self.platform.as_ref().is_none_or(Platform::is_empty) {
            return Err(BuildError::MissingPlatform);
        }
        Ok(())
    }

    /// Apply a lifecycle event. On error the record is unchanged.
    pub fn apply(&mut self, event: &BuildEvent) -> Result<(), BuildError> {
        if let Some(next) = event.target_status() {
            if !self.status.can_transition_to(next) {
                return Err(BuildError::InvalidTransition {
                    from: self.status,
                    to: next,
                });
            }
        }

        match event {
            BuildEvent::BuildStarted { at } => {
                self.start_date = Some(*at);
            }
            BuildEvent::LogAppended { line } => {
                if self.status != BuildStatus::Running {
                    return Err(BuildError::NotRunning(self.status));
                }
                self.push_line(line);
            }
            BuildEvent::BuildFailed { at, reason } => {
                if let Some(reason) = reason {
                    self.push_line(&format!("error: {reason}"));
                }
                self.finish_at(*at);
            }
            BuildEvent::BuildSucceeded { at } | BuildEvent::BuildCanceled { at } => {
                self.finish_at(*at);
            }
        }

        if let Some(next) = event.target_status() {
            self.status = next;
        }
        Ok(())
    }

    fn push_line(&mut self, line: &str) {
        self.log.push_str(line.trim_end_matches(['\r', '\n']));
        self.log.push('\n');
    }

    // The end never precedes the start, even if the wall clock stepped back.
    fn finish_at(&mut self, at: DateTime<Utc>) {
        let end = match self.start_date {
            Some(start) if start > at => start,
            _ => at,
        };
        self.end_date = Some(end);
    }

    /// Column values for insert/update.
    pub fn to_values(&self) -> Result<BuildValues, BuildError> {
        let repository_id = self.repository_id.ok_or(BuildError::MissingRepository)?;
        Ok(BuildValues {
            repository_id,
            scheme: self.scheme.clone(),
            platform: self.platform.as_ref().map(Platform::to_json),
            latest_revision: self.latest_revision.clone(),
            commit_log: self.commit_log.clone(),
            log: self.log.clone(),
            status: self.status.as_str().to_string(),
            start_date: self.start_date,
            start_timestamp: self.start_timestamp(),
            end_date: self.end_date,
            end_timestamp: self.end_timestamp(),
        })
    }
}

/// A revision git can only read as a revision, never as an option.
pub fn is_valid_revision(revision: &str) -> bool {
    !revision.is_empty()
        && !revision.starts_with('-')
        && !revision.chars().any(|c| c.is_whitespace() || c.is_control())
}

fn epoch_seconds(date: DateTime<Utc>) -> f64 {
    date.timestamp_micros() as f64 / 1_000_000.0
}

/// Row as stored in `zapp_builds`.
#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = zapp_builds)]
pub struct BuildRow {
    pub id: i64,
    pub repository_id: i64,
    pub scheme: Option<String>,
    pub platform: Option<serde_json::Value>,
    pub latest_revision: Option<String>,
    pub commit_log: String,
    pub log: String,
    pub status: String,
    pub start_date: Option<DateTime<Utc>>,
    pub start_timestamp: Option<f64>,
    pub end_date: Option<DateTime<Utc>>,
    pub end_timestamp: Option<f64>,
    pub create_date: Option<DateTime<Utc>>,
}

/// Writable columns of `zapp_builds`.
#[derive(Debug, Clone, Insertable, AsChangeset)]
#[diesel(table_name = zapp_builds, treat_none_as_null = true)]
pub struct BuildValues {
    pub repository_id: i64,
    pub scheme: Option<String>,
    pub platform: Option<serde_json::Value>,
    pub latest_revision: Option<String>,
    pub commit_log: String,
    pub log: String,
    pub status: String,
    pub start_date: Option<DateTime<Utc>>,
    pub start_timestamp: Option<f64>,
    pub end_date: Option<DateTime<Utc>>,
    pub end_timestamp: Option<f64>,
}

impl TryFrom<BuildRow> for BuildRecord {
    type Error = anyhow::Error;

    fn try_from(row: BuildRow) -> anyhow::Result<Self> {
        let status: BuildStatus = row.status.parse()?;
        match (status, row.start_date, row.end_date) {
            (BuildStatus::NotStarted, Some(_), _) | (BuildStatus::NotStarted, _, Some(_)) => {
                anyhow::bail!("build {} is not started but has dates", row.id)
            }
            (_, None, Some(_)) => anyhow::bail!("build {} ended without starting", row.id),
            (BuildStatus::Running, _, Some(_)) => {
                anyhow::bail!("build {} is running but has an end date", row.id)
            }
            _ => {}
        }
        for (name, date, timestamp) in [
            ("start", row.start_date, row.start_timestamp),
            ("end", row.end_date, row.end_timestamp),
        ] {
            if !timestamp_matches(date, timestamp) {
                anyhow::bail!(
                    "build {} has a {name} timestamp that disagrees with its date",
                    row.id
                );
            }
        }

        Ok(BuildRecord {
            id: Some(row.id),
            repository_id: Some(row.repository_id),
            scheme: row.scheme,
            platform: row.platform.as_ref().and_then(Platform::from_json),
            latest_revision: row.latest_revision,
            commit_log: row.commit_log,
            create_date: row.create_date,
            log: row.log,
            status,
            start_date: row.start_date,
            end_date: row.end_date,
        })
    }
}

// Millisecond tolerance for the float round trip through the database.
fn timestamp_matches(date: Option<DateTime<Utc>>, timestamp: Option<f64>) -> bool {
    match (date, timestamp) {
        (Some(date), Some(timestamp)) => (epoch_seconds(date) - timestamp).abs() < 1e-3,
        (None, None) => true,
        _ => false,
    }
}
