pub mod memory;
pub mod rest_proxy;

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error};
use wv_common::{ChangeEvent, ChangeOperation};

pub use memory::{InMemoryEventLog, LoggedEvent};
pub use rest_proxy::{RestProxyConfig, RestProxyLog};

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("Failed to serialize event: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Event log rejected append with status {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("Event log unavailable: {0}")]
    Unavailable(String),
}

/// Append-only, key-ordered log
#[async_trait]
pub trait EventLog: Send + Sync {
    async fn append(
        &self,
        topic: &str,
        key: &str,
        value: serde_json::Value,
    ) -> Result<(), PublishError>;
}

/// Announces entity changes as [`ChangeEvent`] envelopes keyed by entity id
#[derive(Clone)]
pub struct ChangePublisher {
    log: Arc<dyn EventLog>,
}

impl ChangePublisher {
    pub fn new(log: Arc<dyn EventLog>) -> Self {
        Self { log }
    }

    pub async fn publish<T: Serialize + Sync>(
        &self,
        topic: &str,
        key: &str,
        operation: ChangeOperation,
        payload: &T,
    ) -> Result<(), PublishError> {
        let envelope = serde_json::to_value(ChangeEvent::new(operation, payload))?;

        match self.log.append(topic, key, envelope).await {
            Ok(()) => {
                debug!(topic, key, %operation, "Published change event");
                Ok(())
            }
            Err(e) => {
                error!(topic, key, %operation, error = %e, "Failed to publish change event");
                Err(e)
            }
        }
    }
}
