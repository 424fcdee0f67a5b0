use serde::{Deserialize, Serialize};
use chrono::{DateTime, Utc};
use std::fmt;
use std::time::Duration;

pub mod backoff;
pub mod retry;

pub use backoff::BackoffConfig;
pub use retry::{Attempt, Deadline, RetryError, RetryPolicy};

// ============================================================================
// Defaults
// ============================================================================

/// Lower bound of the random backoff window
pub const DEFAULT_MIN_RANGE: Duration = Duration::from_millis(100);
/// Upper bound of the random backoff window
pub const DEFAULT_MAX_RANGE: Duration = Duration::from_millis(500);
/// Linear component added per attempt
pub const DEFAULT_SLEEP_OFFSET: Duration = Duration::from_millis(50);
/// Retryable attempts before a pipeline gives up
pub const DEFAULT_MAX_ATTEMPTS: u32 = 10;
/// Deadline applied to a request when the caller does not supply one
pub const DEFAULT_REQUEST_DEADLINE: Duration = Duration::from_secs(20);

/// Timestamp layout used in identifiers and payloads (RFC 3339, seconds)
pub fn format_timestamp(time: DateTime<Utc>) -> String {
    time.to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}

// ============================================================================
// Change Events
// ============================================================================

/// Operation announced on the change log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeOperation {
    Create,
    Update,
    Delete,
}

impl ChangeOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeOperation::Create => "create",
            ChangeOperation::Update => "update",
            ChangeOperation::Delete => "delete",
        }
    }
}

impl fmt::Display for ChangeOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable envelope appended to a topic, keyed by entity identifier
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeEvent<T> {
    pub operation: ChangeOperation,
    pub payload: T,
    pub timestamp: DateTime<Utc>,
}

impl<T> ChangeEvent<T> {
    pub fn new(operation: ChangeOperation, payload: T) -> Self {
        Self {
            operation,
            payload,
            timestamp: Utc::now(),
        }
    }
}
