use serde::{Deserialize, Serialize};

/// Free-form diagnostics not tied to a resolver, build or cache step
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum GeneralEvent {
    Warning {
        message: String,
        /// Underlying cause, rendered after the message
        context: Option<String>,
    },

    Error {
        message: String,
        details: Option<String>,
    },

    /// Only shown on the terminal with `--verbose`
    DebugLog { message: String },
}

impl GeneralEvent {
    pub fn warning(message: impl Into<String>, context: Option<String>) -> Self {
        Self::Warning {
            message: message.into(),
            context,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
            details: None,
        }
    }

    pub fn debug(message: impl Into<String>) -> Self {
        Self::DebugLog {
            message: message.into(),
        }
    }
}
