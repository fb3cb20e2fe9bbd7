//! Build lifecycle events.
//!
//! Every mutation of a build record goes through one of these events, applied
//! by `BuildRecord::apply` under the record's write lock.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::status::BuildStatus;

/// Events that can happen to a build.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum BuildEvent {
    /// Build execution has started.
    BuildStarted { at: DateTime<Utc> },
    /// A line of build output arrived.
    LogAppended { line: String },
    /// Build finished successfully.
    BuildSucceeded { at: DateTime<Utc> },
    /// Build failed.
    BuildFailed {
        at: DateTime<Utc>,
        reason: Option<String>,
    },
    /// Build was cancelled.
    BuildCanceled { at: DateTime<Utc> },
}

impl BuildEvent {
    /// Status the record moves to, `None` for events that keep the status.
    pub fn target_status(&self) -> Option<BuildStatus> {
        match self {
            BuildEvent::BuildStarted { .. } => Some(BuildStatus::Running),
            BuildEvent::LogAppended { .. } => None,
            BuildEvent::BuildSucceeded { .. } => Some(BuildStatus::Succeeded),
            BuildEvent::BuildFailed { .. } => Some(BuildStatus::Failed),
            BuildEvent::BuildCanceled { .. } => Some(BuildStatus::Canceled),
        }
    }

    /// Event recording that a build reached `status` at `at`.
    ///
    /// Returns `None` for statuses that are not terminal.
    pub fn finished(status: BuildStatus, at: DateTime<Utc>, reason: Option<String>) -> Option<Self> {
        match status {
            BuildStatus::Succeeded => Some(BuildEvent::BuildSucceeded { at }),
            BuildStatus::Failed => Some(BuildEvent::BuildFailed { at, reason }),
            BuildStatus::Canceled => Some(BuildEvent::BuildCanceled { at }),
            BuildStatus::NotStarted | BuildStatus::Running => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finished_only_builds_terminal_events() {
        let now = Utc::now();
        assert!(BuildEvent::finished(BuildStatus::Running, now, None).is_none());
        assert_eq!(
            BuildEvent::finished(BuildStatus::Canceled, now, None),
            Some(BuildEvent::BuildCanceled { at: now })
        );
    }

    #[test]
    fn events_serialize_with_type_tag() {
        let event = BuildEvent::LogAppended { line: "ok".into() };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "LogAppended");
        assert_eq!(json["line"], "ok");
    }
}
