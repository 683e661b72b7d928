//! CLI error handling

use std::fmt;

use kiln_errors::UserFacingError;
use kiln_types::{BuildReport, NodeState, SkipReason};

/// Process exit codes
pub mod exit_code {
    pub const SUCCESS: i32 = 0;
    pub const GENERAL: i32 = 1;
    pub const RESOLUTION: i32 = 2;
    pub const BUILD: i32 = 3;
    pub const TEST: i32 = 4;
    pub const INTERRUPTED: i32 = 130;

    use super::{BuildReport, NodeState, SkipReason};

    /// Exit code for a finished build run
    ///
    /// A build failure outranks an interruption, which outranks a test
    /// failure. When the only failures are strict test failures, the nodes
    /// skipped because of them count as test failures too.
    pub fn for_report(report: &BuildReport) -> i32 {
        let is_test_failure = |code: &str| code == "build.test_failed";
        let mut tests = report.summary().tests_failed > 0;
        let mut skipped = false;
        let mut cancelled = false;
        for node in &report.nodes {
            match &node.state {
                NodeState::Failed { code, .. } if is_test_failure(code) => tests = true,
                NodeState::Failed { .. } => return BUILD,
                NodeState::Skipped(SkipReason::UpstreamFailure { .. }) => skipped = true,
                NodeState::Skipped(SkipReason::Cancelled) => cancelled = true,
                NodeState::Built | NodeState::Cached => {}
            }
        }
        if cancelled {
            INTERRUPTED
        } else if tests {
            TEST
        } else if skipped {
            BUILD
        } else {
            SUCCESS
        }
    }
}

/// CLI-specific error type
#[derive(Debug)]
pub enum CliError {
    /// Configuration error
    Config(kiln_errors::ConfigError),
    /// Error raised by a library crate
    Ops(kiln_errors::Error),
    /// Invalid command arguments
    InvalidArguments(String),
    /// I/O error
    Io(std::io::Error),
}

impl CliError {
    /// Exit code for a run that ended with this error
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::Ops(e) if e.is_test_failure() => exit_code::TEST,
            CliError::Ops(kiln_errors::Error::Resolve(_) | kiln_errors::Error::Recipe(_)) => {
                exit_code::RESOLUTION
            }
            CliError::Ops(kiln_errors::Error::Build(_)) => exit_code::BUILD,
            CliError::Ops(kiln_errors::Error::Cancelled) => exit_code::INTERRUPTED,
            _ => exit_code::GENERAL,
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::Config(e) => write!(f, "Configuration error: {e}"),
            CliError::Ops(e) => {
                let message = e.user_message();
                write!(f, "{message}")?;
                if let Some(code) = e.user_code() {
                    write!(f, "\n  Code: {code}")?;
                }
                if let Some(hint) = e.user_hint() {
                    write!(f, "\n  Hint: {hint}")?;
                }
                if e.is_retryable() {
                    write!(f, "\n  Retry: safe to retry this operation.")?;
                }
                Ok(())
            }
            CliError::InvalidArguments(msg) => write!(f, "Invalid arguments: {msg}"),
            CliError::Io(e) => write!(f, "I/O error: {e}"),
        }
    }
}

impl std::error::Error for CliError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CliError::Config(e) => Some(e),
            CliError::Ops(e) => Some(e),
            CliError::Io(e) => Some(e),
            CliError::InvalidArguments(_) => None,
        }
    }
}

impl From<kiln_errors::ConfigError> for CliError {
    fn from(e: kiln_errors::ConfigError) -> Self {
        CliError::Config(e)
    }
}

impl From<kiln_errors::Error> for CliError {
    fn from(e: kiln_errors::Error) -> Self {
        CliError::Ops(e)
    }
}

impl From<std::io::Error> for CliError {
    fn from(e: std::io::Error) -> Self {
        CliError::Io(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_errors::{BuildError, Error, ResolveError};
    use kiln_types::{NodeContext, NodeReport, PackageRef, TestOutcome};

    #[test]
    fn test_exit_codes_distinguish_failure_kinds() {
        let resolution = CliError::from(Error::from(ResolveError::RecipeNotFound {
            name: "zlib".to_string(),
            version: "1.3.1".to_string(),
        }));
        assert_eq!(resolution.exit_code(), exit_code::RESOLUTION);

        let build = CliError::from(Error::from(BuildError::Validation {
            package: "glfw/3.4".to_string(),
            message: "requires cppstd >= 17".to_string(),
        }));
        assert_eq!(build.exit_code(), exit_code::BUILD);

        let test = CliError::from(Error::from(BuildError::TestFailed {
            package: "glfw/3.4".to_string(),
            message: "example exited with 1".to_string(),
        }));
        assert_eq!(test.exit_code(), exit_code::TEST);

        assert_eq!(CliError::InvalidArguments(String::new()).exit_code(), exit_code::GENERAL);
    }

    fn report(states: Vec<(NodeState, TestOutcome)>) -> BuildReport {
        BuildReport {
            run_id: uuid::Uuid::new_v4(),
            started_at: chrono::Utc::now(),
            nodes: states
                .into_iter()
                .enumerate()
                .map(|(i, (state, test))| NodeReport {
                    package: PackageRef::parse(&format!("pkg{i}/1.0.0")).unwrap(),
                    context: NodeContext::Target,
                    fingerprint: None,
                    state,
                    test,
                    duration_ms: 0,
                })
                .collect(),
            duration_ms: 0,
        }
    }

    #[test]
    fn test_report_exit_codes() {
        let ok = report(vec![(NodeState::Built, TestOutcome::Passed), (NodeState::Cached, TestOutcome::NotRun)]);
        assert_eq!(exit_code::for_report(&ok), exit_code::SUCCESS);

        let soft_test = report(vec![(NodeState::Built, TestOutcome::Failed { message: "1 failed".to_string() })]);
        assert_eq!(exit_code::for_report(&soft_test), exit_code::TEST);

        let strict_test = report(vec![(
            NodeState::Failed {
                code: "build.test_failed".to_string(),
                message: "1 failed".to_string(),
            },
            TestOutcome::Failed { message: "1 failed".to_string() },
        )]);
        assert_eq!(exit_code::for_report(&strict_test), exit_code::TEST);

        let build = report(vec![
            (
                NodeState::Failed {
                    code: "build.command_failed".to_string(),
                    message: "make exited with 2".to_string(),
                },
                TestOutcome::NotRun,
            ),
            (
                NodeState::Skipped(SkipReason::UpstreamFailure {
                    root_cause: "pkg0/1.0.0".to_string(),
                }),
                TestOutcome::NotRun,
            ),
            (NodeState::Built, TestOutcome::Failed { message: "1 failed".to_string() }),
        ]);
        assert_eq!(exit_code::for_report(&build), exit_code::BUILD);

        let strict_with_dependent = report(vec![
            (
                NodeState::Failed {
                    code: "build.test_failed".to_string(),
                    message: "1 failed".to_string(),
                },
                TestOutcome::Failed { message: "1 failed".to_string() },
            ),
            (
                NodeState::Skipped(SkipReason::UpstreamFailure {
                    root_cause: "pkg0/1.0.0".to_string(),
                }),
                TestOutcome::NotRun,
            ),
        ]);
        assert_eq!(exit_code::for_report(&strict_with_dependent), exit_code::TEST);

        let cancelled = report(vec![(NodeState::Built, TestOutcome::NotRun), (NodeState::Skipped(SkipReason::Cancelled), TestOutcome::NotRun)]);
        assert_eq!(exit_code::for_report(&cancelled), exit_code::INTERRUPTED);
    }

    #[test]
    fn test_interruption_outranks_lenient_test_failure() {
        let run = report(vec![
            (NodeState::Built, TestOutcome::Failed { message: "1 failed".to_string() }),
            (NodeState::Skipped(SkipReason::Cancelled), TestOutcome::NotRun),
        ]);
        assert_eq!(exit_code::for_report(&run), exit_code::INTERRUPTED);
    }
}
