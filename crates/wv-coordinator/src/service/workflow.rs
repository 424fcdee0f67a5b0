use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error};
use wv_common::{Attempt, Deadline};
use wv_store::LockPurpose;

use crate::clients::QueryClient;
use crate::coordinator::{Coordinator, CreateOutcome, DeleteOutcome, UpdateOutcome};
use crate::domain::{Workflow, WorkflowDraft};
use crate::entity::CoordinatedEntity;
use crate::error::{CoordinatorError, Result};
use crate::service::fetch_rows;

/// Read path pipe returning one workflow of an owner
pub const WORKFLOW_PIPE: &str = "workflow_data";
/// Read path pipe returning every workflow of an owner
pub const ALL_WORKFLOWS_PIPE: &str = "all_workflows_data";
pub const MAX_WORKFLOW_ROWS: usize = 999;

pub struct WorkflowService {
    coordinator: Coordinator<Workflow>,
    query: Arc<dyn QueryClient>,
    read_lock_ttl: Duration,
}

impl WorkflowService {
    pub fn new(
        coordinator: Coordinator<Workflow>,
        query: Arc<dyn QueryClient>,
        read_lock_ttl: Duration,
    ) -> Self {
        Self {
            coordinator,
            query,
            read_lock_ttl,
        }
    }

    /// Create a workflow from a draft, seeded with the start node
    pub async fn create(
        &self,
        draft: WorkflowDraft,
        deadline: &Deadline,
    ) -> Result<CreateOutcome<Workflow>> {
        self.coordinator.create(Workflow::from_draft(draft), deadline).await
    }

    pub async fn update(&self, workflow: Workflow, deadline: &Deadline) -> Result<UpdateOutcome> {
        self.coordinator.update(workflow, deadline).await
    }

    pub async fn delete(
        &self,
        owner: &str,
        id: &str,
        deadline: &Deadline,
    ) -> Result<DeleteOutcome> {
        self.coordinator.delete(owner, id, deadline).await
    }

    /// Fetch one workflow. Unregistered identifiers return `None` without
    /// touching the read path; a held read lock is retried until the
    /// deadline.
    pub async fn get(
        &self,
        owner: &str,
        id: &str,
        deadline: &Deadline,
    ) -> Result<Option<Workflow>> {
        if self.coordinator.owner_of(id, deadline).await?.as_deref() != Some(owner) {
            debug!(owner, workflow_id = id, "Workflow not registered to owner");
            return Ok(None);
        }

        let policy = self.coordinator.settings().policy;
        policy
            .run_until("workflow read", deadline, |_| async move {
                self.read_attempt(owner, id, deadline).await
            })
            .await?
    }

    async fn read_attempt(
        &self,
        owner: &str,
        id: &str,
        deadline: &Deadline,
    ) -> Attempt<Result<Option<Workflow>>> {
        let guard = match self
            .coordinator
            .locks()
            .try_acquire(Workflow::SCOPE, LockPurpose::Read, id, self.read_lock_ttl, deadline)
            .await
        {
            Ok(Some(guard)) => guard,
            Ok(None) => return Attempt::Retry(format!("read of {} already in flight", id)),
            Err(e) => return Attempt::Retry(format!("read lock failed: {}", e)),
        };

        let params = [
            ("user_id", owner.to_string()),
            ("workflow_id", id.to_string()),
            ("limit_count", "1".to_string()),
        ];
        let fetched = self.query.fetch(WORKFLOW_PIPE, &params).await;
        guard.release().await;

        let rows = match fetched {
            Ok(rows) => rows,
            Err(e) => return Attempt::Retry(e.to_string()),
        };

        match rows.len() {
            0 => Attempt::Done(Ok(None)),
            1 => Attempt::Done(
                rows.into_iter()
                    .next()
                    .map(serde_json::from_value)
                    .transpose()
                    .map_err(CoordinatorError::from),
            ),
            n => {
                error!(owner, workflow_id = id, rows = n, "Expected a single workflow row");
                let message = format!("workflow {} matched {} rows", id, n);
                Attempt::Done(Err(CoordinatorError::query(message)))
            }
        }
    }

    pub async fn list(&self, owner: &str, deadline: &Deadline) -> Result<Vec<Workflow>> {
        let params = [
            ("user_id", owner.to_string()),
            ("limit_count", MAX_WORKFLOW_ROWS.to_string()),
        ];
        let policy = self.coordinator.settings().policy;
        fetch_rows(self.query.as_ref(), &policy, deadline, ALL_WORKFLOWS_PIPE, &params).await
    }
}
