//! Domain services
//!
//! Thin layers over the [`Coordinator`](crate::coordinator::Coordinator)
//! that add each entity's read path and side flows.

pub mod action;
pub mod credential;
pub mod workflow;

pub use action::{ActionCreated, ActionService};
pub use credential::{AuthorizationUrl, CredentialService, CredentialSettings};
pub use workflow::WorkflowService;

use serde::de::DeserializeOwned;
use serde::Serialize;
use wv_common::{Attempt, ChangeOperation, Deadline, RetryPolicy};
use wv_events::ChangePublisher;

use crate::clients::QueryClient;
use crate::error::Result;

/// Run a read path query under the deadline-bounded retry and decode rows
pub(crate) async fn fetch_rows<T: DeserializeOwned>(
    query: &dyn QueryClient,
    policy: &RetryPolicy,
    deadline: &Deadline,
    pipe: &str,
    params: &[(&str, String)],
) -> Result<Vec<T>> {
    let rows = policy
        .run_until(pipe, deadline, |_| async move {
            match query.fetch(pipe, params).await {
                Ok(rows) => Attempt::Done(rows),
                Err(e) => Attempt::Retry(e.to_string()),
            }
        })
        .await?;

    rows.into_iter()
        .map(|row| serde_json::from_value(row).map_err(Into::into))
        .collect()
}

/// Publish without a registry claim to compensate; only retried
pub(crate) async fn publish_until<T: Serialize + Sync>(
    publisher: &ChangePublisher,
    policy: &RetryPolicy,
    deadline: &Deadline,
    topic: &str,
    key: &str,
    operation: ChangeOperation,
    payload: &T,
) -> Result<()> {
    policy
        .run_until("publish", deadline, |_| async move {
            match publisher.publish(topic, key, operation, payload).await {
                Ok(()) => Attempt::Done(()),
                Err(e) => Attempt::Retry(e.to_string()),
            }
        })
        .await?;
    Ok(())
}
