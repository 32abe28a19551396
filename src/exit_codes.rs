//! Exit codes of the `anky` binary.
//!
//! # Exit Code Table
//!
//! | Code | Constant | Description |
//! |------|----------|-------------|
//! | 0 | `SUCCESS` | Command completed; every awaited run reached `completed` |
//! | 1 | `INTERNAL` | General/internal failure |
//! | 2 | `CLI_ARGS` | Invalid arguments, event payload, or configuration |
//! | 3 | `NOT_FOUND` | Artifact or session does not exist |
//! | 9 | `LEASE_HELD` | Another run holds the artifact's lease |
//! | 10 | `DEADLINE` | A run exceeded the pipeline deadline |
//! | 70 | `PIPELINE_FAILED` | A run ended in `failed` |
//! | 130 | `INTERRUPTED` | Ctrl-C while waiting; runs stay resumable |

use anky_config::ConfigError;
use anky_utils::error::{PipelineError, RepositoryError, TriggerError};

/// Process exit code.
///
/// ```rust
/// use anky::ExitCode;
///
/// assert_eq!(ExitCode::PIPELINE_FAILED.as_i32(), 70);
/// assert_eq!(ExitCode::SUCCESS, ExitCode::from_i32(0));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitCode(i32);

impl ExitCode {
    pub const SUCCESS: ExitCode = ExitCode(0);
    pub const INTERNAL: ExitCode = ExitCode(1);
    pub const CLI_ARGS: ExitCode = ExitCode(2);
    pub const NOT_FOUND: ExitCode = ExitCode(3);
    pub const LEASE_HELD: ExitCode = ExitCode(9);
    pub const DEADLINE: ExitCode = ExitCode(10);
    pub const PIPELINE_FAILED: ExitCode = ExitCode(70);
    pub const INTERRUPTED: ExitCode = ExitCode(130);

    /// Numeric value for `std::process::exit()`.
    #[must_use]
    pub const fn as_i32(self) -> i32 {
        self.0
    }

    #[must_use]
    pub const fn from_i32(code: i32) -> Self {
        ExitCode(code)
    }

    /// Map an error surfaced by a command to its exit code.
    #[must_use]
    pub fn for_error(err: &anyhow::Error) -> Self {
        for cause in err.chain() {
            if cause.is::<ConfigError>() {
                return Self::CLI_ARGS;
            }
            if let Some(trigger) = cause.downcast_ref::<TriggerError>() {
                return match trigger {
                    TriggerError::Validation(_) => Self::CLI_ARGS,
                    TriggerError::Repository(repo) => Self::for_repository(repo),
                    TriggerError::PoolClosed => Self::INTERNAL,
                };
            }
            if let Some(pipeline) = cause.downcast_ref::<PipelineError>() {
                return match pipeline {
                    PipelineError::Repository(repo) => Self::for_repository(repo),
                    PipelineError::DeadlineExceeded { .. } => Self::DEADLINE,
                    PipelineError::Cancelled => Self::INTERRUPTED,
                    _ => Self::PIPELINE_FAILED,
                };
            }
            if let Some(repo) = cause.downcast_ref::<RepositoryError>() {
                return Self::for_repository(repo);
            }
        }
        Self::INTERNAL
    }

    fn for_repository(err: &RepositoryError) -> Self {
        match err {
            RepositoryError::ArtifactNotFound(_) | RepositoryError::SessionNotFound(_) => {
                Self::NOT_FOUND
            }
            RepositoryError::LeaseHeld { .. } => Self::LEASE_HELD,
            RepositoryError::Terminal { .. } => Self::CLI_ARGS,
            _ => Self::INTERNAL,
        }
    }
}

impl From<ExitCode> for i32 {
    fn from(code: ExitCode) -> Self {
        code.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anky_utils::types::{ArtifactId, ArtifactStatus};
    use anyhow::Context;
    use std::time::Duration;

    #[test]
    fn test_repository_errors() {
        let id = ArtifactId::new();
        let err = anyhow::Error::new(RepositoryError::ArtifactNotFound(id));
        assert_eq!(ExitCode::for_error(&err), ExitCode::NOT_FOUND);

        let err = anyhow::Error::new(PipelineError::Repository(RepositoryError::LeaseHeld {
            artifact_id: id,
            owner: "host-a/run".into(),
        }));
        assert_eq!(ExitCode::for_error(&err), ExitCode::LEASE_HELD);

        let err = anyhow::Error::new(RepositoryError::Terminal {
            artifact_id: id,
            status: ArtifactStatus::Completed,
        });
        assert_eq!(ExitCode::for_error(&err), ExitCode::CLI_ARGS);
    }

    #[test]
    fn test_context_is_looked_through() {
        let err = Err::<(), _>(TriggerError::Validation("session text is empty".into()))
            .context("Failed to handle event")
            .unwrap_err();
        assert_eq!(ExitCode::for_error(&err), ExitCode::CLI_ARGS);

        let err = Err::<(), _>(PipelineError::DeadlineExceeded {
            deadline: Duration::from_secs(1800),
        })
        .context("run")
        .unwrap_err();
        assert_eq!(ExitCode::for_error(&err), ExitCode::DEADLINE);
    }

    #[test]
    fn test_unknown_errors_are_internal() {
        let err = anyhow::anyhow!("disk on fire");
        assert_eq!(ExitCode::for_error(&err), ExitCode::INTERNAL);
        assert_eq!(i32::from(ExitCode::INTERNAL), 1);
    }
}
