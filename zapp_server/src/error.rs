//! Domain errors for build lifecycle operations.

use crate::models::status::BuildStatus;

/// Why a build operation was refused or could not complete.
///
/// Precondition failures leave the record untouched; no completion is ever
/// delivered for a build whose start was refused.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("build has no repository")]
    MissingRepository,
    #[error("build has no scheme")]
    MissingScheme,
    #[error("build has no platform")]
    MissingPlatform,
    #[error("build {0} not found")]
    NotFound(i64),
    #[error("repository {0} not found")]
    RepositoryNotFound(i64),
    #[error("build already {0}")]
    AlreadyStarted(BuildStatus),
    #[error("build is not running (status: {0})")]
    NotRunning(BuildStatus),
    #[error("invalid transition from {from} to {to}")]
    InvalidTransition { from: BuildStatus, to: BuildStatus },
    #[error("build task ended without reporting an outcome")]
    Abandoned,
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

impl BuildError {
    /// Precondition failures are the caller's fault; the rest are not.
    pub fn is_rejection(&self) -> bool {
        !matches!(self, BuildError::Abandoned | BuildError::Store(_))
    }
}
