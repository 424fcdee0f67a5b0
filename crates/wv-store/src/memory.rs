//! In-memory lock store and registry for tests and local development

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::Instant;

use crate::{Claim, ClaimOutcome, LockStore, StoreError, UniquenessRegistry, UpdateClaim};

#[derive(Default)]
struct State {
    hashes: HashMap<String, HashMap<String, String>>,
    locks: HashMap<String, (String, Instant)>,
}

impl State {
    fn field(&self, key: &str, field: &str) -> Option<&String> {
        self.hashes.get(key).and_then(|h| h.get(field))
    }

    fn hset(&mut self, key: &str, field: &str, value: &str) {
        self.hashes
            .entry(key.to_string())
            .or_default()
            .insert(field.to_string(), value.to_string());
    }

    fn hdel(&mut self, key: &str, field: &str) -> bool {
        let removed = match self.hashes.get_mut(key) {
            Some(hash) => hash.remove(field).is_some(),
            None => false,
        };
        if self.hashes.get(key).is_some_and(|h| h.is_empty()) {
            self.hashes.remove(key);
        }
        removed
    }

    fn purge_expired(&mut self, now: Instant) {
        self.locks.retain(|_, (_, expires_at)| *expires_at > now);
    }
}

/// Single-process store with the same atomicity as the Redis backend
#[derive(Default)]
pub struct InMemoryStore {
    state: Mutex<State>,
    unavailable: AtomicBool,
    contended: AtomicUsize,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call fail as if the store were unreachable
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Abort the next `count` registry transactions as contended
    pub fn contend_next(&self, count: usize) {
        self.contended.store(count, Ordering::SeqCst);
    }

    pub fn is_locked(&self, key: &str) -> bool {
        let mut state = self.state.lock();
        state.purge_expired(Instant::now());
        state.locks.contains_key(key)
    }

    /// Value of a hash field, for assertions
    pub fn hget(&self, key: &str, field: &str) -> Option<String> {
        self.state.lock().field(key, field).cloned()
    }

    pub fn hash_len(&self, key: &str) -> usize {
        self.state.lock().hashes.get(key).map(|h| h.len()).unwrap_or(0)
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("in-memory store marked unavailable".to_string()));
        }
        Ok(())
    }

    fn take_contention(&self) -> bool {
        self.contended
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl LockStore for InMemoryStore {
    async fn acquire(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, StoreError> {
        self.check_available()?;
        let now = Instant::now();
        let mut state = self.state.lock();
        state.purge_expired(now);

        if state.locks.contains_key(key) {
            return Ok(false);
        }
        state.locks.insert(key.to_string(), (value.to_string(), now + ttl));
        Ok(true)
    }

    async fn release(&self, key: &str) -> Result<bool, StoreError> {
        self.check_available()?;
        let mut state = self.state.lock();
        state.purge_expired(Instant::now());
        Ok(state.locks.remove(key).is_some())
    }
}

#[async_trait]
impl UniquenessRegistry for InMemoryStore {
    async fn claim_create(&self, claim: &Claim) -> Result<ClaimOutcome, StoreError> {
        self.check_available()?;
        if self.take_contention() {
            return Ok(ClaimOutcome::Contended);
        }

        let (global, owner) = (claim.global_key(), claim.owner_key());
        let mut state = self.state.lock();
        if state.field(&global, &claim.id).is_some() || state.field(&owner, &claim.name).is_some() {
            return Ok(ClaimOutcome::AlreadyExists);
        }

        state.hset(&global, &claim.id, &claim.owner);
        state.hset(&owner, &claim.name, &claim.id);
        Ok(ClaimOutcome::Claimed)
    }

    async fn claim_update(&self, claim: &Claim) -> Result<UpdateClaim, StoreError> {
        self.check_available()?;
        if self.take_contention() {
            return Ok(UpdateClaim::Contended);
        }

        let (global, owner) = (claim.global_key(), claim.owner_key());
        let mut state = self.state.lock();
        if state.field(&global, &claim.id) != Some(&claim.owner) {
            return Ok(UpdateClaim::NotFound);
        }
        if let Some(holder) = state.field(&owner, &claim.name) {
            if holder != &claim.id {
                return Ok(UpdateClaim::NameTaken);
            }
        }

        let previous_name = state.hashes.get(&owner).and_then(|names| {
            names
                .iter()
                .find(|(_, id)| *id == &claim.id)
                .map(|(name, _)| name.clone())
        });
        if let Some(previous) = &previous_name {
            if previous != &claim.name {
                state.hdel(&owner, previous);
            }
        }
        state.hset(&owner, &claim.name, &claim.id);
        Ok(UpdateClaim::Updated { previous_name })
    }

    async fn remove(&self, claim: &Claim) -> Result<bool, StoreError> {
        self.check_available()?;
        let (global, owner) = (claim.global_key(), claim.owner_key());
        let mut state = self.state.lock();

        let mut removed = state.hdel(&global, &claim.id);
        if state.field(&owner, &claim.name) == Some(&claim.id) {
            removed |= state.hdel(&owner, &claim.name);
        }
        Ok(removed)
    }

    async fn owner_of(&self, scope: &str, id: &str) -> Result<Option<String>, StoreError> {
        self.check_available()?;
        Ok(self.state.lock().field(&crate::global_key(scope), id).cloned())
    }

    async fn name_taken(&self, scope: &str, owner: &str, name: &str) -> Result<bool, StoreError> {
        self.check_available()?;
        Ok(self.state.lock().field(&crate::owner_key(scope, owner), name).is_some())
    }

    async fn name_of(
        &self,
        scope: &str,
        owner: &str,
        id: &str,
    ) -> Result<Option<String>, StoreError> {
        self.check_available()?;
        let state = self.state.lock();
        Ok(state.hashes.get(&crate::owner_key(scope, owner)).and_then(|names| {
            names
                .iter()
                .find(|(_, value)| value.as_str() == id)
                .map(|(name, _)| name.clone())
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn claim(id: &str, name: &str) -> Claim {
        Claim::new("workflow", id, "u1", name)
    }

    #[tokio::test]
    async fn test_claim_create_writes_both_indexes() {
        let store = InMemoryStore::new();
        let outcome = store.claim_create(&claim("w-1", "Sales Sync")).await.unwrap();

        assert_eq!(outcome, ClaimOutcome::Claimed);
        assert_eq!(store.hget("workflows:all", "w-1").as_deref(), Some("u1"));
        assert_eq!(store.hget("users:u1:workflows", "Sales Sync").as_deref(), Some("w-1"));
    }

    #[tokio::test]
    async fn test_claim_create_rejects_taken_id_or_name() {
        let store = InMemoryStore::new();
        store.claim_create(&claim("w-1", "Sales Sync")).await.unwrap();

        assert_eq!(
            store.claim_create(&claim("w-2", "Sales Sync")).await.unwrap(),
            ClaimOutcome::AlreadyExists
        );
        assert_eq!(
            store.claim_create(&claim("w-1", "Other")).await.unwrap(),
            ClaimOutcome::AlreadyExists
        );
        assert_eq!(store.hash_len("users:u1:workflows"), 1);
    }

    #[tokio::test]
    async fn test_same_name_allowed_for_other_owner() {
        let store = InMemoryStore::new();
        store.claim_create(&claim("w-1", "Sales Sync")).await.unwrap();

        let other = Claim::new("workflow", "w-2", "u2", "Sales Sync");
        assert_eq!(store.claim_create(&other).await.unwrap(), ClaimOutcome::Claimed);
    }

    #[tokio::test]
    async fn test_concurrent_claims_have_one_winner() {
        let store = Arc::new(InMemoryStore::new());
        let mut handles = Vec::new();
        for i in 0..16 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.claim_create(&claim(&format!("w-{}", i), "Sales Sync")).await.unwrap()
            }));
        }

        let mut claimed = 0;
        for handle in handles {
            if handle.await.unwrap() == ClaimOutcome::Claimed {
                claimed += 1;
            }
        }
        assert_eq!(claimed, 1);
    }

    #[tokio::test]
    async fn test_remove_deletes_both_entries() {
        let store = InMemoryStore::new();
        let c = claim("w-1", "Sales Sync");
        store.claim_create(&c).await.unwrap();

        assert!(store.remove(&c).await.unwrap());
        assert!(store.owner_of("workflow", "w-1").await.unwrap().is_none());
        assert!(!store.name_taken("workflow", "u1", "Sales Sync").await.unwrap());
        assert!(!store.remove(&c).await.unwrap());
    }

    #[tokio::test]
    async fn test_claim_update_renames_and_reports_snapshot() {
        let store = InMemoryStore::new();
        store.claim_create(&claim("w-1", "Sales Sync")).await.unwrap();

        let outcome = store.claim_update(&claim("w-1", "Sales Sync v2")).await.unwrap();
        assert_eq!(
            outcome,
            UpdateClaim::Updated { previous_name: Some("Sales Sync".to_string()) }
        );
        let name = store.name_of("workflow", "u1", "w-1").await.unwrap();
        assert_eq!(name.as_deref(), Some("Sales Sync v2"));
        assert!(!store.name_taken("workflow", "u1", "Sales Sync").await.unwrap());
    }

    #[tokio::test]
    async fn test_claim_update_guards() {
        let store = InMemoryStore::new();
        store.claim_create(&claim("w-1", "A")).await.unwrap();
        store.claim_create(&claim("w-2", "B")).await.unwrap();

        assert_eq!(store.claim_update(&claim("w-1", "B")).await.unwrap(), UpdateClaim::NameTaken);
        assert_eq!(store.claim_update(&claim("w-9", "C")).await.unwrap(), UpdateClaim::NotFound);

        let foreign = Claim::new("workflow", "w-1", "u2", "A");
        assert_eq!(store.claim_update(&foreign).await.unwrap(), UpdateClaim::NotFound);
    }

    #[tokio::test]
    async fn test_contention_is_reported_then_clears() {
        let store = InMemoryStore::new();
        store.contend_next(1);

        assert_eq!(store.claim_create(&claim("w-1", "A")).await.unwrap(), ClaimOutcome::Contended);
        assert_eq!(store.claim_create(&claim("w-1", "A")).await.unwrap(), ClaimOutcome::Claimed);
    }

    #[tokio::test]
    async fn test_unavailable_store_errors() {
        let store = InMemoryStore::new();
        store.set_unavailable(true);
        assert!(matches!(
            store.claim_create(&claim("w-1", "A")).await,
            Err(StoreError::Unavailable(_))
        ));
    }
}
