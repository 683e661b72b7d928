use kiln_errors::UserFacingError;
use serde::{Deserialize, Serialize};

/// Serializable snapshot of an error, carried by failure events and reports
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureContext {
    /// Dotted code such as `build.command_failed`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
    pub retryable: bool,
}

impl FailureContext {
    #[must_use]
    pub fn new(
        code: Option<impl Into<String>>,
        message: impl Into<String>,
        hint: Option<impl Into<String>>,
        retryable: bool,
    ) -> Self {
        Self {
            code: code.map(Into::into),
            message: message.into(),
            hint: hint.map(Into::into),
            retryable,
        }
    }

    #[must_use]
    pub fn from_error<E: UserFacingError + ?Sized>(error: &E) -> Self {
        Self {
            code: error.user_code().map(str::to_string),
            message: error.user_message().into_owned(),
            hint: error.user_hint().map(str::to_string),
            retryable: error.is_retryable(),
        }
    }
}
