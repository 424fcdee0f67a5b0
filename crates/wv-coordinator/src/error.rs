//! Coordinator Error Types
//!
//! Expected outcomes (already exists, not found, rate limited) are not
//! errors; they come back as outcome structs.

use thiserror::Error;
use wv_common::RetryError;
use wv_events::PublishError;
use wv_store::StoreError;

#[derive(Error, Debug)]
pub enum CoordinatorError {
    #[error("Validation error: {message}")]
    Validation { message: String },

    #[error("Authentication error: {message}")]
    Authentication { message: String },

    #[error("Operation already in progress for {subject}, wait and retry")]
    InProgress { subject: String },

    #[error("Unsupported credential type: {credential_type}")]
    UnsupportedType { credential_type: String },

    #[error("Read path error: {message}")]
    Query { message: String },

    #[error("OAuth error: {message}")]
    OAuth { message: String },

    #[error("Dispatch error: {message}")]
    Dispatch { message: String },

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Publish error: {0}")]
    Publish(#[from] PublishError),

    #[error(transparent)]
    Retry(#[from] RetryError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CoordinatorError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation { message: message.into() }
    }

    pub fn authentication(message: impl Into<String>) -> Self {
        Self::Authentication { message: message.into() }
    }

    pub fn in_progress(subject: impl Into<String>) -> Self {
        Self::InProgress { subject: subject.into() }
    }

    pub fn unsupported_type(credential_type: impl Into<String>) -> Self {
        Self::UnsupportedType { credential_type: credential_type.into() }
    }

    pub fn query(message: impl Into<String>) -> Self {
        Self::Query { message: message.into() }
    }

    pub fn oauth(message: impl Into<String>) -> Self {
        Self::OAuth { message: message.into() }
    }

    pub fn dispatch(message: impl Into<String>) -> Self {
        Self::Dispatch { message: message.into() }
    }

    /// Whether a caller may try the same request again later
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::InProgress { .. } | Self::Store(_) | Self::Publish(_) | Self::Retry(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, CoordinatorError>;
