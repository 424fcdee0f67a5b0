//! Scoped distributed locks
//!
//! A [`LockGuard`] is returned for every acquired lock. Exclusion locks are
//! released with [`LockGuard::release`]; a guard dropped on an early return
//! schedules the release on the current runtime. Rate-limiting locks are
//! [`LockGuard::hold`]-ed instead, so the key lives until its TTL.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;
use tracing::{debug, warn};
use wv_common::{Attempt, Deadline, RetryPolicy};

use crate::{LockStore, StoreError};

/// Sentinel stored under every lock key
pub const LOCK_SENTINEL: &str = "1";

/// What a lock guards
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockPurpose {
    Create,
    Update,
    Read,
    Delete,
    /// Per-subject throttle (credential exchanges)
    Subject,
}

impl LockPurpose {
    pub fn as_str(&self) -> &'static str {
        match self {
            LockPurpose::Create => "create",
            LockPurpose::Update => "update",
            LockPurpose::Read => "read",
            LockPurpose::Delete => "delete",
            LockPurpose::Subject => "user",
        }
    }
}

impl fmt::Display for LockPurpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `lock:<scope>:<purpose>:<id>`
pub fn lock_key(scope: &str, purpose: LockPurpose, id: &str) -> String {
    format!("lock:{}:{}:{}", scope, purpose, id)
}

/// Acquires locks, retrying store connectivity failures
#[derive(Clone)]
pub struct LockManager {
    store: Arc<dyn LockStore>,
    policy: RetryPolicy,
}

impl LockManager {
    pub fn new(store: Arc<dyn LockStore>, policy: RetryPolicy) -> Self {
        Self { store, policy }
    }

    /// Try to take the lock once. `Ok(None)` means it is held by someone else.
    pub async fn try_acquire(
        &self,
        scope: &str,
        purpose: LockPurpose,
        id: &str,
        ttl: Duration,
        deadline: &Deadline,
    ) -> Result<Option<LockGuard>, StoreError> {
        let key = lock_key(scope, purpose, id);

        let acquired = self
            .policy
            .run_until("lock acquire", deadline, |attempt| {
                let key = key.clone();
                async move {
                    match self.store.acquire(&key, LOCK_SENTINEL, ttl).await {
                        Ok(acquired) => Attempt::Done(acquired),
                        Err(e) => {
                            warn!(key = %key, attempt, error = %e, "Lock store unreachable");
                            Attempt::Retry(e.to_string())
                        }
                    }
                }
            })
            .await?;

        if !acquired {
            debug!(key = %key, "Lock already held");
            return Ok(None);
        }

        debug!(key = %key, ttl_ms = ttl.as_millis() as u64, "Lock acquired");
        Ok(Some(LockGuard {
            store: self.store.clone(),
            key,
            armed: true,
        }))
    }
}

/// Handle to an acquired lock
pub struct LockGuard {
    store: Arc<dyn LockStore>,
    key: String,
    armed: bool,
}

impl LockGuard {
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Delete the key now. Returns `false` if it had already expired or been
    /// removed by someone else.
    pub async fn release(mut self) -> bool {
        self.armed = false;
        release_key(self.store.as_ref(), &self.key).await
    }

    /// Keep the key until its TTL runs out
    pub fn hold(mut self) {
        self.armed = false;
        debug!(key = %self.key, "Lock left to expire");
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }

        let store = self.store.clone();
        let key = std::mem::take(&mut self.key);
        match Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    release_key(store.as_ref(), &key).await;
                });
            }
            Err(_) => warn!(key = %key, "No runtime to release lock, leaving it to expire"),
        }
    }
}

async fn release_key(store: &dyn LockStore, key: &str) -> bool {
    match store.release(key).await {
        Ok(true) => {
            debug!(key = %key, "Lock released");
            true
        }
        Ok(false) => {
            warn!(key = %key, "Lock already expired or removed");
            false
        }
        Err(e) => {
            warn!(key = %key, error = %e, "Failed to release lock");
            false
        }
    }
}
