//! Configuration error types

use std::borrow::Cow;

use crate::UserFacingError;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("no user configuration directory on this system")]
    NoConfigDir,

    #[error("cannot read config file {path}: {message}")]
    Unreadable { path: String, message: String },

    #[error("invalid TOML in {path}: {message}")]
    Parse { path: String, message: String },

    #[error("invalid value for {field}: {value}")]
    InvalidValue { field: String, value: String },
}

impl UserFacingError for ConfigError {
    fn user_message(&self) -> Cow<'_, str> {
        Cow::Owned(self.to_string())
    }

    fn user_hint(&self) -> Option<&'static str> {
        match self {
            Self::NoConfigDir => Some("Pass --config with an explicit path."),
            Self::Unreadable { .. } => Some("Check the path given to --config."),
            Self::Parse { .. } => Some("Fix the TOML syntax; see the [general], [build] and [paths] sections."),
            Self::InvalidValue { field, .. } if field.starts_with("KILN_") => {
                Some("Unset or correct the environment variable.")
            }
            Self::InvalidValue { .. } => Some("Fix the configuration value and retry the command."),
        }
    }

    fn user_code(&self) -> Option<&'static str> {
        let code = match self {
            Self::NoConfigDir => "config.no_config_dir",
            Self::Unreadable { .. } => "config.unreadable",
            Self::Parse { .. } => "config.parse",
            Self::InvalidValue { .. } => "config.invalid_value",
        };
        Some(code)
    }
}
