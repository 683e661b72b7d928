//! Lifecycle phase error types

use std::borrow::Cow;

use crate::UserFacingError;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum BuildError {
    #[error("validation failed for {package}: {message}")]
    Validation { package: String, message: String },

    #[error("source fetch failed for {package} from {url}: {message}")]
    SourceFetch {
        package: String,
        url: String,
        message: String,
    },

    #[error("patch {patch} failed to apply for {package}: {message}")]
    PatchApply {
        package: String,
        patch: String,
        message: String,
    },

    #[error("{phase} failed for {package}: {message}")]
    Failed {
        package: String,
        phase: String,
        message: String,
    },

    #[error("command `{command}` exited with {exit_code:?} in {phase} of {package}")]
    CommandFailed {
        package: String,
        phase: String,
        command: String,
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("packaging failed for {package}: {message}")]
    Packaging { package: String, message: String },

    #[error("{package} has no {phase} branch for platform {os}")]
    UnsupportedPlatform {
        package: String,
        phase: String,
        os: String,
    },

    #[error("tests failed for {package}: {message}")]
    TestFailed { package: String, message: String },

    #[error("{phase} of {package} timed out after {seconds} seconds")]
    Timeout {
        package: String,
        phase: String,
        seconds: u64,
    },

    #[error("upstream dependency {dependency} of {package} did not complete")]
    UpstreamFailed { package: String, dependency: String },
}

impl BuildError {
    /// Name of the package the failure belongs to
    #[must_use]
    pub fn package(&self) -> &str {
        match self {
            Self::Validation { package, .. }
            | Self::SourceFetch { package, .. }
            | Self::PatchApply { package, .. }
            | Self::Failed { package, .. }
            | Self::CommandFailed { package, .. }
            | Self::Packaging { package, .. }
            | Self::UnsupportedPlatform { package, .. }
            | Self::TestFailed { package, .. }
            | Self::Timeout { package, .. }
            | Self::UpstreamFailed { package, .. } => package,
        }
    }
}

impl UserFacingError for BuildError {
    fn user_message(&self) -> Cow<'_, str> {
        match self {
            Self::CommandFailed { stderr, .. } if !stderr.trim().is_empty() => {
                let tail: Vec<&str> = stderr.trim_end().lines().rev().take(5).collect();
                let tail: Vec<&str> = tail.into_iter().rev().collect();
                Cow::Owned(format!("{self}\n{}", tail.join("\n")))
            }
            _ => Cow::Owned(self.to_string()),
        }
    }

    fn user_hint(&self) -> Option<&'static str> {
        match self {
            Self::Validation { .. } => {
                Some("Adjust the settings (compiler, cppstd, os) to meet the recipe's requirements.")
            }
            Self::SourceFetch { .. } => {
                Some("Check network access or point the recipe at a local source tree.")
            }
            Self::PatchApply { .. } => {
                Some("Update the patch so it applies cleanly to the current sources.")
            }
            Self::UnsupportedPlatform { .. } => {
                Some("Add a branch for this operating system to the recipe phase.")
            }
            Self::Timeout { .. } => {
                Some("Increase the build timeout or reduce parallelism, then retry.")
            }
            Self::Packaging { .. } => {
                Some("Make sure the package phase produces every file the recipe declares.")
            }
            _ => None,
        }
    }

    fn is_retryable(&self) -> bool {
        matches!(self, Self::SourceFetch { .. } | Self::Timeout { .. })
    }

    fn user_code(&self) -> Option<&'static str> {
        let code = match self {
            Self::Validation { .. } => "build.validation",
            Self::SourceFetch { .. } => "build.source_fetch",
            Self::PatchApply { .. } => "build.patch_apply",
            Self::Failed { .. } => "build.failed",
            Self::CommandFailed { .. } => "build.command_failed",
            Self::Packaging { .. } => "build.packaging",
            Self::UnsupportedPlatform { .. } => "build.unsupported_platform",
            Self::TestFailed { .. } => "build.test_failed",
            Self::Timeout { .. } => "build.timeout",
            Self::UpstreamFailed { .. } => "build.upstream_failed",
        };
        Some(code)
    }
}
