#![warn(mismatched_lifetime_syntaxes)]
#![deny(clippy::pedantic, unsafe_code)]
#![allow(clippy::module_name_repetitions)]

//! Error types for the kiln build orchestrator
//!
//! Every error is `Clone` so one failure can be recorded in the build
//! report and still be returned to the caller.

use std::borrow::Cow;
use std::path::PathBuf;

use thiserror::Error;

pub mod build;
pub mod cache;
pub mod config;
pub mod recipe;
pub mod resolve;
pub mod version;

pub use build::BuildError;
pub use cache::CacheError;
pub use config::ConfigError;
pub use recipe::RecipeError;
pub use resolve::ResolveError;
pub use version::VersionError;

/// Error crossing crate boundaries; each domain keeps its own enum
#[derive(Debug, Clone, Error)]
pub enum Error {
    #[error("recipe error: {0}")]
    Recipe(#[from] RecipeError),

    #[error("dependency resolution error: {0}")]
    Resolve(#[from] ResolveError),

    #[error("build error: {0}")]
    Build(#[from] BuildError),

    #[error("cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("version error: {0}")]
    Version(#[from] VersionError),

    #[error("internal error: {0}")]
    Internal(String),

    /// Interrupted by the user or by a sibling failure
    #[error("operation cancelled")]
    Cancelled,

    #[error("I/O error: {message}")]
    Io {
        kind: std::io::ErrorKind,
        message: String,
        path: Option<PathBuf>,
    },
}

impl Error {
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    pub fn io_with_path(err: &std::io::Error, path: impl Into<PathBuf>) -> Self {
        Self::Io {
            kind: err.kind(),
            message: err.to_string(),
            path: Some(path.into()),
        }
    }

    #[must_use]
    pub fn is_resolution(&self) -> bool {
        matches!(self, Self::Resolve(_))
    }

    #[must_use]
    pub fn is_test_failure(&self) -> bool {
        matches!(self, Self::Build(BuildError::TestFailed { .. }))
    }

    fn domain(&self) -> Option<&dyn UserFacingError> {
        let err: &dyn UserFacingError = match self {
            Self::Recipe(err) => err,
            Self::Resolve(err) => err,
            Self::Build(err) => err,
            Self::Cache(err) => err,
            Self::Config(err) => err,
            Self::Version(err) => err,
            Self::Internal(_) | Self::Cancelled | Self::Io { .. } => return None,
        };
        Some(err)
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::Io {
            kind: err.kind(),
            message: err.to_string(),
            path: None,
        }
    }
}

impl From<semver::Error> for Error {
    fn from(err: semver::Error) -> Self {
        VersionError::Semver {
            message: err.to_string(),
        }
        .into()
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Internal(format!("JSON error: {err}"))
    }
}

/// YAML parsed from memory; file loaders attach the real path themselves
impl From<serde_yml::Error> for Error {
    fn from(err: serde_yml::Error) -> Self {
        RecipeError::Parse {
            path: String::from("<inline>"),
            message: err.to_string(),
        }
        .into()
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// What the CLI and the build report show for a failure
pub trait UserFacingError {
    fn user_message(&self) -> Cow<'_, str>;

    /// One-line remediation hint
    fn user_hint(&self) -> Option<&'static str> {
        None
    }

    /// Whether running the same command again may succeed
    fn is_retryable(&self) -> bool {
        false
    }

    /// Stable dotted code such as `build.command_failed`
    fn user_code(&self) -> Option<&'static str> {
        None
    }
}

impl UserFacingError for Error {
    fn user_message(&self) -> Cow<'_, str> {
        match self {
            Self::Build(err) => err.user_message(),
            Self::Resolve(err) => err.user_message(),
            Self::Io { message, .. } => Cow::Borrowed(message),
            _ => Cow::Owned(self.to_string()),
        }
    }

    fn user_hint(&self) -> Option<&'static str> {
        self.domain().and_then(|err| err.user_hint())
    }

    fn is_retryable(&self) -> bool {
        match self {
            Self::Io { .. } => true,
            other => other.domain().is_some_and(|err| err.is_retryable()),
        }
    }

    fn user_code(&self) -> Option<&'static str> {
        match self {
            Self::Internal(_) => Some("error.internal"),
            Self::Cancelled => Some("error.cancelled"),
            Self::Io { .. } => Some("error.io"),
            other => other.domain().and_then(|err| err.user_code()),
        }
    }
}
