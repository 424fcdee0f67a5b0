use std::sync::Arc;

use tracing::{error, info};
use wv_common::{Attempt, Deadline, RetryPolicy};

use crate::clients::{ActionDispatcher, DispatchOutcome, ServiceTokenProvider};
use crate::coordinator::Coordinator;
use crate::domain::Action;
use crate::error::{CoordinatorError, Result};

/// Result of creating an action
#[derive(Debug, Clone, PartialEq)]
pub struct ActionCreated {
    pub created: bool,
    pub exists: bool,
    /// Whether the execution service accepted the action directly
    pub dispatched: bool,
    pub action: Option<Action>,
}

pub struct ActionService {
    coordinator: Coordinator<Action>,
    dispatcher: Arc<dyn ActionDispatcher>,
    tokens: Arc<dyn ServiceTokenProvider>,
    /// When set, a sink on the event log delivers actions and nothing is
    /// sent directly
    http_sink_enabled: bool,
    policy: RetryPolicy,
}

impl ActionService {
    pub fn new(
        coordinator: Coordinator<Action>,
        dispatcher: Arc<dyn ActionDispatcher>,
        tokens: Arc<dyn ServiceTokenProvider>,
        http_sink_enabled: bool,
    ) -> Self {
        let policy = coordinator.settings().policy;
        Self {
            coordinator,
            dispatcher,
            tokens,
            http_sink_enabled,
            policy,
        }
    }

    fn dispatches(&self, action: &Action) -> bool {
        !self.http_sink_enabled && action.runs_immediately()
    }

    pub async fn create(&self, action: Action, deadline: &Deadline) -> Result<ActionCreated> {
        // Fail before any write if the action cannot be handed over
        let token = if self.dispatches(&action) {
            Some(self.tokens.token().await.map_err(|e| match e {
                CoordinatorError::Authentication { .. } => e,
                other => CoordinatorError::authentication(other.to_string()),
            })?)
        } else {
            None
        };

        let outcome = self.coordinator.create(action, deadline).await?;
        let mut created = ActionCreated {
            created: outcome.created,
            exists: outcome.exists,
            dispatched: false,
            action: outcome.entity,
        };

        if let (Some(token), Some(action)) = (token, created.action.as_ref()) {
            created.dispatched = self.dispatch(action, &token, deadline).await?;
        }
        Ok(created)
    }

    /// Retry the hand-off alone; the action is already claimed and published
    async fn dispatch(&self, action: &Action, token: &str, deadline: &Deadline) -> Result<bool> {
        let result = self
            .policy
            .run_until("action dispatch", deadline, |_| async move {
                match self.dispatcher.dispatch(action, token).await {
                    Ok(DispatchOutcome::Accepted) => Attempt::Done(true),
                    Ok(DispatchOutcome::Refused { status }) => {
                        error!(
                            action_id = %action.action_id,
                            status,
                            "Execution service refused action"
                        );
                        Attempt::Done(false)
                    }
                    Err(e) => Attempt::Retry(e.to_string()),
                }
            })
            .await;

        match result {
            Ok(accepted) => {
                if accepted {
                    info!(action_id = %action.action_id, "Action sent to execution service");
                }
                Ok(accepted)
            }
            Err(e) if e.is_exhausted() => {
                error!(
                    action_id = %action.action_id,
                    error = %e,
                    "Cannot send action to execution service, requires dead-letter handling"
                );
                crate::metrics::record_retry_exhausted("action dispatch");
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }
}
