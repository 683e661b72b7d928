//! Recipe loading error types

use std::borrow::Cow;

use crate::UserFacingError;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum RecipeError {
    #[error("failed to parse recipe {path}: {message}")]
    Parse { path: String, message: String },

    #[error("invalid recipe {name}: {message}")]
    Invalid { name: String, message: String },

    #[error("duplicate recipe {name}/{version}")]
    Duplicate { name: String, version: String },

    #[error("recipe {name} requires kiln {required}, running {current}")]
    UnsupportedKilnVersion {
        name: String,
        required: String,
        current: String,
    },

    #[error("recipe directory not found: {path}")]
    DirectoryNotFound { path: String },
}

impl UserFacingError for RecipeError {
    fn user_message(&self) -> Cow<'_, str> {
        Cow::Owned(self.to_string())
    }

    fn user_hint(&self) -> Option<&'static str> {
        match self {
            Self::Parse { .. } | Self::Invalid { .. } => {
                Some("Correct the recipe definition before retrying the build.")
            }
            Self::Duplicate { .. } => Some("Remove one of the recipes declaring the same version."),
            Self::UnsupportedKilnVersion { .. } => Some("Upgrade kiln to a compatible release."),
            Self::DirectoryNotFound { .. } => {
                Some("Pass --recipes or set recipe_dirs in the configuration file.")
            }
        }
    }

    fn user_code(&self) -> Option<&'static str> {
        let code = match self {
            Self::Parse { .. } => "recipe.parse",
            Self::Invalid { .. } => "recipe.invalid",
            Self::Duplicate { .. } => "recipe.duplicate",
            Self::UnsupportedKilnVersion { .. } => "recipe.unsupported_kiln_version",
            Self::DirectoryNotFound { .. } => "recipe.directory_not_found",
        };
        Some(code)
    }
}
