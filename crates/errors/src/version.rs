//! Version label errors

use std::borrow::Cow;

use crate::UserFacingError;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum VersionError {
    /// Empty label, or one containing whitespace or reference separators
    #[error("invalid version label `{input}`")]
    InvalidVersion { input: String },

    #[error("invalid required_kiln_version `{input}`: {message}")]
    InvalidKilnRequirement { input: String, message: String },

    #[error("malformed semantic version: {message}")]
    Semver { message: String },
}

impl UserFacingError for VersionError {
    fn user_message(&self) -> Cow<'_, str> {
        Cow::Owned(self.to_string())
    }

    fn user_hint(&self) -> Option<&'static str> {
        match self {
            Self::InvalidVersion { .. } => Some("Version labels look like 1.3.1 or 2024.01; they may not contain `/`, `@` or `:`."),
            Self::InvalidKilnRequirement { .. } => Some("Write a semver requirement such as `>=0.1`."),
            Self::Semver { .. } => None,
        }
    }

    fn user_code(&self) -> Option<&'static str> {
        Some(match self {
            Self::InvalidVersion { .. } => "version.invalid",
            Self::InvalidKilnRequirement { .. } => "version.invalid_kiln_requirement",
            Self::Semver { .. } => "version.semver",
        })
    }
}
