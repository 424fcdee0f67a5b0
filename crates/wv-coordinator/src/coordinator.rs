//! Create/Update Coordinator
//!
//! One state machine shared by every [`CoordinatedEntity`]. Each create
//! attempt mints an identifier, checks the owner's name index, takes the
//! create lock, claims both registry entries and publishes a `create`
//! event. A failed publish removes the claim again before the attempt is
//! retried with a fresh identifier. Collisions end the call immediately.
//!
//! Write attempts run under [`RetryPolicy::run_until_settled`]: once a claim
//! is taken the attempt always reaches its publish or its rollback, and the
//! deadline is honored between attempts.

use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, error, info, warn};
use wv_common::{Attempt, ChangeOperation, Deadline, RetryError, RetryPolicy};
use wv_events::ChangePublisher;
use wv_store::{Claim, ClaimOutcome, LockManager, LockPurpose, UniquenessRegistry, UpdateClaim};

use crate::entity::CoordinatedEntity;
use crate::error::{CoordinatorError, Result};
use crate::metrics;

#[derive(Debug, Clone)]
pub struct CoordinatorSettings {
    /// Topic change events are appended to
    pub topic: String,
    pub create_lock_ttl: Duration,
    /// Minimum spacing between two updates of the same identifier
    pub update_lock_ttl: Duration,
    pub delete_lock_ttl: Duration,
    pub policy: RetryPolicy,
}

impl CoordinatorSettings {
    pub fn new(topic: impl Into<String>, policy: RetryPolicy) -> Self {
        Self {
            topic: topic.into(),
            create_lock_ttl: Duration::from_secs(20),
            update_lock_ttl: Duration::from_secs(10),
            delete_lock_ttl: Duration::from_secs(20),
            policy,
        }
    }
}

/// `(created, exists)` plus the stored entity on success
#[derive(Debug, Clone, PartialEq)]
pub struct CreateOutcome<E> {
    pub created: bool,
    pub exists: bool,
    pub entity: Option<E>,
}

impl<E> CreateOutcome<E> {
    fn created(entity: E) -> Self {
        Self { created: true, exists: false, entity: Some(entity) }
    }

    fn exists() -> Self {
        Self { created: false, exists: true, entity: None }
    }

    fn failed() -> Self {
        Self { created: false, exists: false, entity: None }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdateOutcome {
    pub updated: bool,
    pub exists: bool,
}

impl UpdateOutcome {
    const UPDATED: Self = Self { updated: true, exists: true };
    /// Rate limited, or the new name belongs to another entity
    const NOT_UPDATED: Self = Self { updated: false, exists: true };
    const NOT_FOUND: Self = Self { updated: false, exists: false };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeleteOutcome {
    pub deleted: bool,
    pub exists: bool,
}

impl DeleteOutcome {
    const DELETED: Self = Self { deleted: true, exists: true };
    const BUSY: Self = Self { deleted: false, exists: true };
    const NOT_FOUND: Self = Self { deleted: false, exists: false };
}

enum CreateStep<E> {
    Created(E),
    Collision,
}

enum UpdateStep {
    Updated,
    RateLimited,
    NameTaken,
    NotFound,
}

enum DeleteStep {
    Deleted,
    Busy,
    NotFound,
}

/// Payload of a `delete` event
#[derive(Debug, Serialize)]
struct Tombstone<'a> {
    id: &'a str,
    owner: &'a str,
}

/// Generic create/update/delete pipeline for one entity kind
pub struct Coordinator<E> {
    registry: Arc<dyn UniquenessRegistry>,
    locks: LockManager,
    publisher: ChangePublisher,
    settings: CoordinatorSettings,
    _entity: PhantomData<fn() -> E>,
}

impl<E> Clone for Coordinator<E> {
    fn clone(&self) -> Self {
        Self {
            registry: self.registry.clone(),
            locks: self.locks.clone(),
            publisher: self.publisher.clone(),
            settings: self.settings.clone(),
            _entity: PhantomData,
        }
    }
}

impl<E: CoordinatedEntity> Coordinator<E> {
    pub fn new(
        registry: Arc<dyn UniquenessRegistry>,
        locks: LockManager,
        publisher: ChangePublisher,
        settings: CoordinatorSettings,
    ) -> Self {
        Self {
            registry,
            locks,
            publisher,
            settings,
            _entity: PhantomData,
        }
    }

    pub fn settings(&self) -> &CoordinatorSettings {
        &self.settings
    }

    pub fn locks(&self) -> &LockManager {
        &self.locks
    }

    /// Owner registered for an identifier, retrying store failures
    pub async fn owner_of(&self, id: &str, deadline: &Deadline) -> Result<Option<String>> {
        let operation = format!("{} owner lookup", E::SCOPE);
        let owner = self
            .settings
            .policy
            .run_until(&operation, deadline, |_| async move {
                match self.registry.owner_of(E::SCOPE, id).await {
                    Ok(owner) => Attempt::Done(owner),
                    Err(e) => Attempt::Retry(e.to_string()),
                }
            })
            .await?;
        Ok(owner)
    }

    // ========================================================================
    // Create
    // ========================================================================

    pub async fn create(&self, entity: E, deadline: &Deadline) -> Result<CreateOutcome<E>> {
        entity.validate()?;

        let operation = format!("{} create", E::SCOPE);
        let result = self
            .settings
            .policy
            .run_until_settled(&operation, deadline, |attempt| {
                let candidate = entity.clone();
                async move { self.create_attempt(candidate, attempt, deadline).await }
            })
            .await;

        match result {
            Ok(CreateStep::Created(entity)) => {
                info!(
                    scope = E::SCOPE,
                    entity_id = %entity.id(),
                    owner = %entity.owner(),
                    "Entity created"
                );
                Ok(CreateOutcome::created(entity))
            }
            Ok(CreateStep::Collision) => Ok(CreateOutcome::exists()),
            Err(e) => {
                give_up(&operation, e)?;
                Ok(CreateOutcome::failed())
            }
        }
    }

    async fn create_attempt(
        &self,
        mut entity: E,
        attempt: u32,
        deadline: &Deadline,
    ) -> Attempt<CreateStep<E>> {
        let now = Utc::now();
        entity.mint_id(now);
        let id = entity.id().to_string();

        // nothing is claimed yet, so the deadline may cut this step short
        let name_check = deadline
            .bound("name check", self.registry.name_taken(E::SCOPE, entity.owner(), entity.name()))
            .await;
        match name_check {
            Ok(Ok(true)) => {
                debug!(
                    scope = E::SCOPE,
                    owner = %entity.owner(),
                    name = %entity.name(),
                    "Name already taken"
                );
                metrics::record_claim(E::SCOPE, "collision");
                return Attempt::Done(CreateStep::Collision);
            }
            Ok(Ok(false)) => {}
            Ok(Err(e)) => return Attempt::Retry(format!("name check failed: {}", e)),
            Err(e) => return Attempt::Retry(e.to_string()),
        }

        let ttl = self.settings.create_lock_ttl;
        let guard = match self
            .locks
            .try_acquire(E::SCOPE, LockPurpose::Create, &id, ttl, deadline)
            .await
        {
            Ok(Some(guard)) => guard,
            Ok(None) => {
                debug!(scope = E::SCOPE, entity_id = %id, "Candidate identifier is contended");
                metrics::record_claim(E::SCOPE, "collision");
                return Attempt::Done(CreateStep::Collision);
            }
            Err(e) => return Attempt::Retry(format!("create lock failed: {}", e)),
        };

        entity.on_create(now);
        let claim = entity.claim();

        match self.registry.claim_create(&claim).await {
            Ok(ClaimOutcome::Claimed) => metrics::record_claim(E::SCOPE, "claimed"),
            Ok(ClaimOutcome::AlreadyExists) => {
                guard.release().await;
                metrics::record_claim(E::SCOPE, "collision");
                return Attempt::Done(CreateStep::Collision);
            }
            Ok(ClaimOutcome::Contended) => {
                guard.release().await;
                metrics::record_claim(E::SCOPE, "contended");
                return Attempt::Retry("registry transaction aborted".to_string());
            }
            Err(e) => {
                guard.release().await;
                return Attempt::Retry(format!("claim failed: {}", e));
            }
        }

        if let Err(e) = self
            .publisher
            .publish(&self.settings.topic, &id, ChangeOperation::Create, &entity)
            .await
        {
            self.undo_create(&claim, attempt).await;
            guard.release().await;
            return Attempt::Retry(format!("publish failed: {}", e));
        }

        guard.release().await;
        Attempt::Done(CreateStep::Created(entity))
    }

    async fn undo_create(&self, claim: &Claim, attempt: u32) {
        metrics::record_rollback(E::SCOPE);
        match self.registry.remove(claim).await {
            Ok(_) => warn!(
                scope = E::SCOPE,
                entity_id = %claim.id,
                attempt,
                "Rolled back claim after publish failure"
            ),
            Err(e) => error!(
                scope = E::SCOPE,
                entity_id = %claim.id,
                error = %e,
                "Rollback failed, registry entries left behind"
            ),
        }
    }

    // ========================================================================
    // Update
    // ========================================================================

    pub async fn update(&self, entity: E, deadline: &Deadline) -> Result<UpdateOutcome> {
        entity.validate()?;

        let owner = match self.owner_of(entity.id(), deadline).await {
            Ok(owner) => owner,
            Err(CoordinatorError::Retry(e)) => {
                give_up(&format!("{} update", E::SCOPE), e)?;
                return Ok(UpdateOutcome::NOT_FOUND);
            }
            Err(e) => return Err(e),
        };
        if owner.as_deref() != Some(entity.owner()) {
            debug!(
                scope = E::SCOPE,
                entity_id = %entity.id(),
                "Update target not registered to owner"
            );
            return Ok(UpdateOutcome::NOT_FOUND);
        }

        let operation = format!("{} update", E::SCOPE);
        let result = self
            .settings
            .policy
            .run_until_settled(&operation, deadline, |attempt| {
                let candidate = entity.clone();
                async move { self.update_attempt(candidate, attempt, deadline).await }
            })
            .await;

        match result {
            Ok(UpdateStep::Updated) => {
                info!(scope = E::SCOPE, entity_id = %entity.id(), "Entity updated");
                Ok(UpdateOutcome::UPDATED)
            }
            Ok(UpdateStep::RateLimited) | Ok(UpdateStep::NameTaken) => {
                Ok(UpdateOutcome::NOT_UPDATED)
            }
            Ok(UpdateStep::NotFound) => Ok(UpdateOutcome::NOT_FOUND),
            Err(e) => {
                give_up(&operation, e)?;
                Ok(UpdateOutcome::NOT_FOUND)
            }
        }
    }

    async fn update_attempt(
        &self,
        mut entity: E,
        attempt: u32,
        deadline: &Deadline,
    ) -> Attempt<UpdateStep> {
        let id = entity.id().to_string();

        let ttl = self.settings.update_lock_ttl;
        let guard = match self
            .locks
            .try_acquire(E::SCOPE, LockPurpose::Update, &id, ttl, deadline)
            .await
        {
            Ok(Some(guard)) => guard,
            Ok(None) => {
                debug!(scope = E::SCOPE, entity_id = %id, "Update rate limited");
                return Attempt::Done(UpdateStep::RateLimited);
            }
            Err(e) => return Attempt::Retry(format!("update lock failed: {}", e)),
        };

        entity.on_update(Utc::now());
        let claim = entity.claim();

        let previous_name = match self.registry.claim_update(&claim).await {
            Ok(UpdateClaim::Updated { previous_name }) => previous_name,
            Ok(UpdateClaim::NotFound) => {
                guard.release().await;
                return Attempt::Done(UpdateStep::NotFound);
            }
            Ok(UpdateClaim::NameTaken) => {
                guard.release().await;
                metrics::record_claim(E::SCOPE, "collision");
                return Attempt::Done(UpdateStep::NameTaken);
            }
            Ok(UpdateClaim::Contended) => {
                guard.release().await;
                metrics::record_claim(E::SCOPE, "contended");
                return Attempt::Retry("registry transaction aborted".to_string());
            }
            Err(e) => {
                guard.release().await;
                return Attempt::Retry(format!("claim update failed: {}", e));
            }
        };

        if let Err(e) = self
            .publisher
            .publish(&self.settings.topic, &id, ChangeOperation::Update, &entity)
            .await
        {
            self.undo_update(&claim, previous_name, attempt).await;
            guard.release().await;
            return Attempt::Retry(format!("publish failed: {}", e));
        }

        guard.hold();
        Attempt::Done(UpdateStep::Updated)
    }

    /// Point the owner's index back at the name held before the update
    async fn undo_update(&self, claim: &Claim, previous_name: Option<String>, attempt: u32) {
        metrics::record_rollback(E::SCOPE);

        let previous = match previous_name {
            Some(previous) if previous != claim.name => previous,
            _ => {
                debug!(
                    scope = E::SCOPE,
                    entity_id = %claim.id,
                    attempt,
                    "Name unchanged, nothing to revert"
                );
                return;
            }
        };

        match self.registry.claim_update(&claim.renamed(previous.clone())).await {
            Ok(UpdateClaim::Updated { .. }) => warn!(
                scope = E::SCOPE,
                entity_id = %claim.id,
                name = %previous,
                attempt,
                "Reverted name after publish failure"
            ),
            Ok(other) => error!(
                scope = E::SCOPE,
                entity_id = %claim.id,
                outcome = ?other,
                "Could not revert name after publish failure"
            ),
            Err(e) => error!(
                scope = E::SCOPE,
                entity_id = %claim.id,
                error = %e,
                "Could not revert name after publish failure"
            ),
        }
    }

    // ========================================================================
    // Delete
    // ========================================================================

    pub async fn delete(
        &self,
        owner: &str,
        id: &str,
        deadline: &Deadline,
    ) -> Result<DeleteOutcome> {
        let operation = format!("{} delete", E::SCOPE);

        let registered = match self.owner_of(id, deadline).await {
            Ok(registered) => registered,
            Err(CoordinatorError::Retry(e)) => {
                give_up(&operation, e)?;
                return Ok(DeleteOutcome::NOT_FOUND);
            }
            Err(e) => return Err(e),
        };
        if registered.as_deref() != Some(owner) {
            return Ok(DeleteOutcome::NOT_FOUND);
        }

        let result = self
            .settings
            .policy
            .run_until_settled(&operation, deadline, |attempt| async move {
                self.delete_attempt(owner, id, attempt, deadline).await
            })
            .await;

        match result {
            Ok(DeleteStep::Deleted) => {
                info!(scope = E::SCOPE, entity_id = %id, "Entity deleted");
                Ok(DeleteOutcome::DELETED)
            }
            Ok(DeleteStep::Busy) => Ok(DeleteOutcome::BUSY),
            Ok(DeleteStep::NotFound) => Ok(DeleteOutcome::NOT_FOUND),
            Err(e) => {
                give_up(&operation, e)?;
                Ok(DeleteOutcome::NOT_FOUND)
            }
        }
    }

    async fn delete_attempt(
        &self,
        owner: &str,
        id: &str,
        attempt: u32,
        deadline: &Deadline,
    ) -> Attempt<DeleteStep> {
        let ttl = self.settings.delete_lock_ttl;
        let guard = match self
            .locks
            .try_acquire(E::SCOPE, LockPurpose::Delete, id, ttl, deadline)
            .await
        {
            Ok(Some(guard)) => guard,
            Ok(None) => return Attempt::Done(DeleteStep::Busy),
            Err(e) => return Attempt::Retry(format!("delete lock failed: {}", e)),
        };

        let name = match self.registry.name_of(E::SCOPE, owner, id).await {
            Ok(name) => name,
            Err(e) => {
                guard.release().await;
                return Attempt::Retry(format!("name lookup failed: {}", e));
            }
        };
        let claim = Claim::new(E::SCOPE, id, owner, name.clone().unwrap_or_default());

        match self.registry.remove(&claim).await {
            Ok(true) => {}
            Ok(false) => {
                guard.release().await;
                return Attempt::Done(DeleteStep::NotFound);
            }
            Err(e) => {
                guard.release().await;
                return Attempt::Retry(format!("remove failed: {}", e));
            }
        }

        let tombstone = Tombstone { id, owner };
        if let Err(e) = self
            .publisher
            .publish(&self.settings.topic, id, ChangeOperation::Delete, &tombstone)
            .await
        {
            metrics::record_rollback(E::SCOPE);
            match name {
                Some(_) => match self.registry.claim_create(&claim).await {
                    Ok(ClaimOutcome::Claimed) => warn!(
                        scope = E::SCOPE,
                        entity_id = %id,
                        attempt,
                        "Restored claim after publish failure"
                    ),
                    Ok(outcome) => error!(
                        scope = E::SCOPE,
                        entity_id = %id,
                        outcome = ?outcome,
                        "Could not restore claim"
                    ),
                    Err(e) => error!(
                        scope = E::SCOPE,
                        entity_id = %id,
                        error = %e,
                        "Could not restore claim"
                    ),
                },
                None => error!(
                    scope = E::SCOPE,
                    entity_id = %id,
                    "No name recorded, claim not restored"
                ),
            }
            guard.release().await;
            return Attempt::Retry(format!("publish failed: {}", e));
        }

        guard.release().await;
        Attempt::Done(DeleteStep::Deleted)
    }
}

/// Exhausted bounds end as a logged failure result; deadline and
/// cancellation are surfaced to the caller
fn give_up(operation: &str, error: RetryError) -> Result<()> {
    if error.is_exhausted() {
        error!(operation, error = %error, "Retry bound exhausted, requires dead-letter handling");
        metrics::record_retry_exhausted(operation);
        Ok(())
    } else {
        warn!(operation, error = %error, "Operation stopped before completion");
        Err(error.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Workflow, WorkflowDraft};
    use async_trait::async_trait;
    use wv_common::BackoffConfig;
    use wv_events::{EventLog, InMemoryEventLog, PublishError};
    use wv_store::InMemoryStore;

    struct Harness {
        store: Arc<InMemoryStore>,
        log: Arc<InMemoryEventLog>,
        coordinator: Coordinator<Workflow>,
    }

    /// Event log whose appends take longer than a short request deadline
    struct SlowLog {
        inner: Arc<InMemoryEventLog>,
        delay: Duration,
    }

    #[async_trait]
    impl EventLog for SlowLog {
        async fn append(
            &self,
            topic: &str,
            key: &str,
            value: serde_json::Value,
        ) -> std::result::Result<(), PublishError> {
            tokio::time::sleep(self.delay).await;
            self.inner.append(topic, key, value).await
        }
    }

    fn harness(max_attempts: u32) -> Harness {
        let log = Arc::new(InMemoryEventLog::new());
        harness_with(max_attempts, log.clone(), log)
    }

    fn slow_harness(max_attempts: u32, delay: Duration) -> Harness {
        let log = Arc::new(InMemoryEventLog::new());
        let slow = Arc::new(SlowLog { inner: log.clone(), delay });
        harness_with(max_attempts, log, slow)
    }

    fn harness_with(
        max_attempts: u32,
        log: Arc<InMemoryEventLog>,
        sink: Arc<dyn EventLog>,
    ) -> Harness {
        let store = Arc::new(InMemoryStore::new());
        let policy = RetryPolicy::new(
            max_attempts,
            BackoffConfig::new(
                Duration::from_millis(100),
                Duration::from_millis(500),
                Duration::from_millis(50),
            ),
        );
        let coordinator = Coordinator::new(
            store.clone(),
            LockManager::new(store.clone(), policy),
            ChangePublisher::new(sink),
            CoordinatorSettings::new("workflows.command", policy),
        );
        Harness { store, log, coordinator }
    }

    fn workflow(name: &str) -> Workflow {
        Workflow::from_draft(WorkflowDraft::new("u1", name, "reports"))
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_claims_and_publishes() {
        let h = harness(10);
        let outcome = h
            .coordinator
            .create(workflow("Sales Sync"), &Deadline::never())
            .await
            .unwrap();

        assert!(outcome.created);
        assert!(!outcome.exists);
        let created = outcome.entity.unwrap();
        assert_eq!(h.store.hget("workflows:all", &created.id), Some("u1".to_string()));
        assert_eq!(h.store.hget("users:u1:workflows", "Sales Sync"), Some(created.id.clone()));
        assert!(!h.store.is_locked(&format!("lock:workflow:create:{}", created.id)));

        let events = h.log.events_for_key(&created.id);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].operation(), Some("create"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_contended_claim_is_retried_with_new_identifier() {
        let h = harness(10);
        h.store.contend_next(2);

        let outcome = h
            .coordinator
            .create(workflow("Sales Sync"), &Deadline::never())
            .await
            .unwrap();

        assert!(outcome.created);
        assert_eq!(h.store.hash_len("workflows:all"), 1);
        assert_eq!(h.log.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_publish_failure_rolls_back_then_retries() {
        let h = harness(10);
        h.log.fail_next(1);

        let outcome = h
            .coordinator
            .create(workflow("Sales Sync"), &Deadline::never())
            .await
            .unwrap();
        let created = outcome.entity.unwrap();

        assert!(outcome.created);
        assert_eq!(h.log.attempts(), 2);
        // only the second identifier survives
        assert_eq!(h.store.hash_len("workflows:all"), 1);
        assert_eq!(h.store.hget("users:u1:workflows", "Sales Sync"), Some(created.id));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_returns_failure_without_error() {
        let h = harness(3);
        h.log.set_failing(true);

        let outcome = h
            .coordinator
            .create(workflow("Sales Sync"), &Deadline::never())
            .await
            .unwrap();

        assert!(!outcome.created);
        assert!(!outcome.exists);
        assert_eq!(h.log.attempts(), 3);
        assert_eq!(h.store.hash_len("workflows:all"), 0);
        assert_eq!(h.store.hash_len("users:u1:workflows"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_rate_limit_and_name_revert() {
        let h = harness(3);
        let created = h
            .coordinator
            .create(workflow("Sales Sync"), &Deadline::never())
            .await
            .unwrap()
            .entity
            .unwrap();

        let mut renamed = created.clone();
        renamed.name = "Sales Sync v2".to_string();
        h.log.set_failing(true);
        let outcome = h.coordinator.update(renamed.clone(), &Deadline::never()).await.unwrap();
        assert_eq!(outcome, UpdateOutcome { updated: false, exists: false });
        assert_eq!(h.store.hget("users:u1:workflows", "Sales Sync"), Some(created.id.clone()));
        assert_eq!(h.store.hget("users:u1:workflows", "Sales Sync v2"), None);
        assert_eq!(h.store.hget("workflows:all", &created.id), Some("u1".to_string()));

        h.log.set_failing(false);
        let first = h.coordinator.update(renamed.clone(), &Deadline::never()).await.unwrap();
        let second = h.coordinator.update(renamed, &Deadline::never()).await.unwrap();
        assert_eq!(first, UpdateOutcome { updated: true, exists: true });
        assert_eq!(second, UpdateOutcome { updated: false, exists: true });
    }

    #[tokio::test(start_paused = true)]
    async fn test_delete_removes_entries_and_publishes() {
        let h = harness(3);
        let created = h
            .coordinator
            .create(workflow("Sales Sync"), &Deadline::never())
            .await
            .unwrap()
            .entity
            .unwrap();

        let wrong_owner = h
            .coordinator
            .delete("u2", &created.id, &Deadline::never())
            .await
            .unwrap();
        assert_eq!(wrong_owner, DeleteOutcome { deleted: false, exists: false });

        let outcome = h.coordinator.delete("u1", &created.id, &Deadline::never()).await.unwrap();
        assert_eq!(outcome, DeleteOutcome { deleted: true, exists: true });
        assert_eq!(h.store.hget("workflows:all", &created.id), None);
        assert_eq!(h.store.hget("users:u1:workflows", "Sales Sync"), None);

        let events = h.log.events_for_key(&created.id);
        assert_eq!(events.last().and_then(|e| e.operation()), Some("delete"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_delete_publish_failure_restores_claim() {
        let h = harness(2);
        let created = h
            .coordinator
            .create(workflow("Sales Sync"), &Deadline::never())
            .await
            .unwrap()
            .entity
            .unwrap();

        h.log.set_failing(true);
        let outcome = h.coordinator.delete("u1", &created.id, &Deadline::never()).await.unwrap();

        assert!(!outcome.deleted);
        assert_eq!(h.store.hget("workflows:all", &created.id), Some("u1".to_string()));
        assert_eq!(h.store.hget("users:u1:workflows", "Sales Sync"), Some(created.id));
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_publish_completes_past_the_deadline() {
        let h = slow_harness(3, Duration::from_secs(5));

        let outcome = h
            .coordinator
            .create(workflow("Sales Sync"), &Deadline::after(Duration::from_secs(1)))
            .await
            .unwrap();

        assert!(outcome.created);
        let created = outcome.entity.unwrap();
        assert_eq!(h.log.events_for_key(&created.id).len(), 1);
        assert_eq!(h.store.hget("workflows:all", &created.id), Some("u1".to_string()));
        assert_eq!(h.store.hget("users:u1:workflows", "Sales Sync"), Some(created.id));
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_failed_publish_is_rolled_back_before_the_deadline_error() {
        let h = slow_harness(3, Duration::from_secs(5));
        h.log.set_failing(true);

        let result = h
            .coordinator
            .create(workflow("Sales Sync"), &Deadline::after(Duration::from_secs(1)))
            .await;

        assert!(matches!(
            result,
            Err(CoordinatorError::Retry(RetryError::DeadlineExceeded { .. }))
        ));
        assert_eq!(h.log.attempts(), 1);
        assert_eq!(h.store.hash_len("workflows:all"), 0);
        assert_eq!(h.store.hash_len("users:u1:workflows"), 0);
    }
}
