//! Build lifecycle states.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Lifecycle state of a build record.
///
/// `NotStarted → Running → {Succeeded, Failed, Canceled}`; the three outcome
/// states are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildStatus {
    #[default]
    NotStarted,
    Running,
    Succeeded,
    Failed,
    Canceled,
}

impl BuildStatus {
    pub const ALL: [BuildStatus; 5] = [
        BuildStatus::NotStarted,
        BuildStatus::Running,
        BuildStatus::Succeeded,
        BuildStatus::Failed,
        BuildStatus::Canceled,
    ];

    /// Storage code, also used as the metrics label.
    pub fn as_str(self) -> &'static str {
        match self {
            BuildStatus::NotStarted => "not_started",
            BuildStatus::Running => "running",
            BuildStatus::Succeeded => "succeeded",
            BuildStatus::Failed => "failed",
            BuildStatus::Canceled => "canceled",
        }
    }

    /// Human-readable rendering shown next to a build.
    pub fn description(self) -> &'static str {
        match self {
            BuildStatus::NotStarted => "Not started",
            BuildStatus::Running => "Running",
            BuildStatus::Succeeded => "Succeeded",
            BuildStatus::Failed => "Failed",
            BuildStatus::Canceled => "Canceled",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            BuildStatus::Succeeded | BuildStatus::Failed | BuildStatus::Canceled
        )
    }

    /// Whether `next` is a legal successor of `self`.
    pub fn can_transition_to(self, next: BuildStatus) -> bool {
        match self {
            BuildStatus::NotStarted => next == BuildStatus::Running,
            BuildStatus::Running => next.is_terminal(),
            _ => false,
        }
    }

    /// GitHub commit status state for this build status.
    pub fn github_state(self) -> &'static str {
        match self {
            BuildStatus::NotStarted | BuildStatus::Running => "pending",
            BuildStatus::Succeeded => "success",
            BuildStatus::Failed => "failure",
            BuildStatus::Canceled => "error",
        }
    }
}

impl fmt::Display for BuildStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown build status: {0}")]
pub struct UnknownStatus(pub String);

impl FromStr for BuildStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        BuildStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| UnknownStatus(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states_have_no_successor() {
        for from in [BuildStatus::Succeeded, BuildStatus::Failed, BuildStatus::Canceled] {
            for to in BuildStatus::ALL {
                assert!(!from.can_transition_to(to), "{from} -> {to}");
            }
        }
    }

    #[test]
    fn not_started_only_moves_to_running() {
        let allowed: Vec<_> = BuildStatus::ALL
            .into_iter()
            .filter(|s| BuildStatus::NotStarted.can_transition_to(*s))
            .collect();
        assert_eq!(allowed, vec![BuildStatus::Running]);
    }

    #[test]
    fn storage_codes_parse_back() {
        assert_eq!("canceled".parse::<BuildStatus>().unwrap(), BuildStatus::Canceled);
        assert!("pending".parse::<BuildStatus>().is_err());
    }

    #[test]
    fn running_description_is_fixed() {
        assert_eq!(BuildStatus::Running.description(), "Running");
        assert_eq!(BuildStatus::NotStarted.description(), "Not started");
    }
}
