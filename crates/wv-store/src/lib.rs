//! Cache-side coordination primitives
//!
//! - [`LockStore`] / [`LockManager`]: TTL-bound exclusive claims
//! - [`UniquenessRegistry`]: transactional check-and-set over the global
//!   index (`<scope>s:all`, id -> owner) and the per-owner index
//!   (`users:<owner>:<scope>s`, name -> id)
//!
//! Both traits are implemented by [`RedisStore`] and [`InMemoryStore`].

pub mod lock;
pub mod memory;
pub mod redis_store;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use wv_common::RetryError;

pub use lock::{lock_key, LockGuard, LockManager, LockPurpose};
pub use memory::InMemoryStore;
pub use redis_store::RedisStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error(transparent)]
    Retry(#[from] RetryError),
}

// ============================================================================
// Locks
// ============================================================================

/// Raw lock contract: atomic set-if-absent with expiry, and delete
#[async_trait]
pub trait LockStore: Send + Sync {
    /// Returns `false` when the key is already held
    async fn acquire(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, StoreError>;

    /// Returns `false` when there was nothing to delete
    async fn release(&self, key: &str) -> Result<bool, StoreError>;
}

// ============================================================================
// Uniqueness Registry
// ============================================================================

/// Key of the global index for a scope
pub fn global_key(scope: &str) -> String {
    format!("{}s:all", scope)
}

/// Key of the per-owner name index for a scope
pub fn owner_key(scope: &str, owner: &str) -> String {
    format!("users:{}:{}s", owner, scope)
}

/// An identifier/name pair reserved for one owner
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Claim {
    pub scope: String,
    pub id: String,
    pub owner: String,
    pub name: String,
}

impl Claim {
    pub fn new(
        scope: impl Into<String>,
        id: impl Into<String>,
        owner: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            scope: scope.into(),
            id: id.into(),
            owner: owner.into(),
            name: name.into(),
        }
    }

    pub fn global_key(&self) -> String {
        global_key(&self.scope)
    }

    pub fn owner_key(&self) -> String {
        owner_key(&self.scope, &self.owner)
    }

    /// Same claim under a different name
    pub fn renamed(&self, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..self.clone()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// Both index entries written
    Claimed,
    /// The identifier or the name is already taken
    AlreadyExists,
    /// The transaction was aborted by a concurrent write; retryable
    Contended,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateClaim {
    /// The per-owner entry now points the new name at the identifier.
    /// `previous_name` is the snapshot to revert to.
    Updated { previous_name: Option<String> },
    /// The identifier is not registered to this owner
    NotFound,
    /// Another entity of the same owner already uses the name
    NameTaken,
    Contended,
}

#[async_trait]
pub trait UniquenessRegistry: Send + Sync {
    /// Atomically check both indexes and write both entries
    async fn claim_create(&self, claim: &Claim) -> Result<ClaimOutcome, StoreError>;

    /// Atomically re-point the owner's name entry at the identifier
    async fn claim_update(&self, claim: &Claim) -> Result<UpdateClaim, StoreError>;

    /// Atomically delete both entries. Returns whether anything was removed.
    async fn remove(&self, claim: &Claim) -> Result<bool, StoreError>;

    async fn owner_of(&self, scope: &str, id: &str) -> Result<Option<String>, StoreError>;

    async fn name_taken(&self, scope: &str, owner: &str, name: &str) -> Result<bool, StoreError>;

    /// Current name of an identifier in the owner's index
    async fn name_of(
        &self,
        scope: &str,
        owner: &str,
        id: &str,
    ) -> Result<Option<String>, StoreError>;
}
