//! Package cache error types

use std::borrow::Cow;

use crate::UserFacingError;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum CacheError {
    #[error("corrupted cache entry at {path}: {message}")]
    Corrupted { path: String, message: String },

    #[error("failed to publish {fingerprint}: {message}")]
    PublishFailed {
        fingerprint: String,
        message: String,
    },

    #[error("cache entry not found: {fingerprint}")]
    NotFound { fingerprint: String },

    #[error("invalid fingerprint: {input}")]
    InvalidFingerprint { input: String },
}

impl UserFacingError for CacheError {
    fn user_message(&self) -> Cow<'_, str> {
        Cow::Owned(self.to_string())
    }

    fn user_hint(&self) -> Option<&'static str> {
        match self {
            Self::Corrupted { .. } => Some("Run `kiln cache clean` to drop damaged entries."),
            Self::PublishFailed { .. } => Some("Ensure the cache directory is writable and retry."),
            _ => None,
        }
    }

    fn is_retryable(&self) -> bool {
        matches!(self, Self::PublishFailed { .. })
    }

    fn user_code(&self) -> Option<&'static str> {
        let code = match self {
            Self::Corrupted { .. } => "cache.corrupted",
            Self::PublishFailed { .. } => "cache.publish_failed",
            Self::NotFound { .. } => "cache.not_found",
            Self::InvalidFingerprint { .. } => "cache.invalid_fingerprint",
        };
        Some(code)
    }
}
