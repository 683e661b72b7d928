//! Dependency resolution error types

use std::borrow::Cow;

use crate::UserFacingError;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum ResolveError {
    #[error("recipe not found: {name}/{version}")]
    RecipeNotFound { name: String, version: String },

    #[error("version conflict for {name}: requested {}", .versions.join(", "))]
    VersionConflict { name: String, versions: Vec<String> },

    #[error("option conflict for {package}: {message}")]
    OptionConflict { package: String, message: String },

    #[error("cyclic dependency: {}", .path.join(" -> "))]
    CyclicDependency { path: Vec<String> },

    #[error("cyclic tool requirement: {}", .path.join(" -> "))]
    ToolCycle { path: Vec<String> },

    #[error("cyclic component requirement in {package}: {}", .path.join(" -> "))]
    ComponentCycle { package: String, path: Vec<String> },

    #[error("component {component} of {package} requires unknown {target}")]
    UnknownComponent {
        package: String,
        component: String,
        target: String,
    },

    #[error("invalid requirement {reference}: {reason}")]
    InvalidRequirement { reference: String, reason: String },
}

impl UserFacingError for ResolveError {
    fn user_message(&self) -> Cow<'_, str> {
        Cow::Owned(self.to_string())
    }

    fn user_hint(&self) -> Option<&'static str> {
        match self {
            Self::RecipeNotFound { .. } => {
                Some("Add the recipe to a recipe directory or fix the requested version.")
            }
            Self::VersionConflict { .. } | Self::OptionConflict { .. } => {
                Some("Pin a single version with a root-level override in the manifest.")
            }
            Self::CyclicDependency { .. } | Self::ToolCycle { .. } => {
                Some("Break the cycle by removing one of the listed requirements.")
            }
            Self::ComponentCycle { .. } | Self::UnknownComponent { .. } => {
                Some("Fix the component requirements in the recipe's package_info.")
            }
            Self::InvalidRequirement { .. } => Some("Use the name/version reference format."),
        }
    }

    fn user_code(&self) -> Option<&'static str> {
        let code = match self {
            Self::RecipeNotFound { .. } => "resolve.recipe_not_found",
            Self::VersionConflict { .. } => "resolve.version_conflict",
            Self::OptionConflict { .. } => "resolve.option_conflict",
            Self::CyclicDependency { .. } => "resolve.cyclic_dependency",
            Self::ToolCycle { .. } => "resolve.tool_cycle",
            Self::ComponentCycle { .. } => "resolve.component_cycle",
            Self::UnknownComponent { .. } => "resolve.unknown_component",
            Self::InvalidRequirement { .. } => "resolve.invalid_requirement",
        };
        Some(code)
    }
}
