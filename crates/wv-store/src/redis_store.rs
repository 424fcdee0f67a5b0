//! Redis backend
//!
//! Plain reads and lock commands go through a shared [`ConnectionManager`].
//! Registry transactions use WATCH + MULTI/EXEC, which needs a connection of
//! its own: a WATCH issued on a shared connection would observe other
//! callers' writes.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::{ConnectionManager, MultiplexedConnection};
use redis::AsyncCommands;
use tracing::{debug, info};

use crate::{Claim, ClaimOutcome, LockStore, StoreError, UniquenessRegistry, UpdateClaim};

/// Optimistic retries of a removal before giving up
const REMOVE_ATTEMPTS: u32 = 16;

pub struct RedisStore {
    client: redis::Client,
    manager: ConnectionManager,
}

impl RedisStore {
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(url)?;
        let manager = ConnectionManager::new(client.clone()).await?;
        info!(url = %url, "Connected to Redis");
        Ok(Self { client, manager })
    }

    pub async fn ping(&self) -> Result<(), StoreError> {
        let mut con = self.manager.clone();
        let _: String = redis::cmd("PING").query_async(&mut con).await?;
        Ok(())
    }

    async fn dedicated(&self) -> Result<MultiplexedConnection, StoreError> {
        Ok(self.client.get_multiplexed_async_connection().await?)
    }

    async fn watch(con: &mut MultiplexedConnection, keys: &[&str]) -> Result<(), StoreError> {
        let _: () = redis::cmd("WATCH").arg(keys).query_async(con).await?;
        Ok(())
    }

    async fn unwatch(con: &mut MultiplexedConnection) -> Result<(), StoreError> {
        let _: () = redis::cmd("UNWATCH").query_async(con).await?;
        Ok(())
    }
}

#[async_trait]
impl LockStore for RedisStore {
    async fn acquire(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, StoreError> {
        let mut con = self.manager.clone();
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("PX")
            .arg(ttl.as_millis() as u64)
            .query_async(&mut con)
            .await?;
        Ok(reply.is_some())
    }

    async fn release(&self, key: &str) -> Result<bool, StoreError> {
        let mut con = self.manager.clone();
        let deleted: i64 = con.del(key).await?;
        Ok(deleted > 0)
    }
}

#[async_trait]
impl UniquenessRegistry for RedisStore {
    async fn claim_create(&self, claim: &Claim) -> Result<ClaimOutcome, StoreError> {
        let (global, owner) = (claim.global_key(), claim.owner_key());
        let mut con = self.dedicated().await?;
        Self::watch(&mut con, &[&global, &owner]).await?;

        let id_taken: bool = con.hexists(&global, &claim.id).await?;
        let name_taken: bool = con.hexists(&owner, &claim.name).await?;
        if id_taken || name_taken {
            Self::unwatch(&mut con).await?;
            debug!(id = %claim.id, id_taken, name_taken, "Claim collides");
            return Ok(ClaimOutcome::AlreadyExists);
        }

        let result: Option<Vec<redis::Value>> = redis::pipe()
            .atomic()
            .hset(&global, &claim.id, &claim.owner)
            .hset(&owner, &claim.name, &claim.id)
            .query_async(&mut con)
            .await?;

        Ok(match result {
            Some(_) => ClaimOutcome::Claimed,
            None => ClaimOutcome::Contended,
        })
    }

    async fn claim_update(&self, claim: &Claim) -> Result<UpdateClaim, StoreError> {
        let (global, owner) = (claim.global_key(), claim.owner_key());
        let mut con = self.dedicated().await?;
        Self::watch(&mut con, &[&global, &owner]).await?;

        let registered: Option<String> = con.hget(&global, &claim.id).await?;
        if registered.as_deref() != Some(claim.owner.as_str()) {
            Self::unwatch(&mut con).await?;
            return Ok(UpdateClaim::NotFound);
        }

        let names: HashMap<String, String> = con.hgetall(&owner).await?;
        if names.get(&claim.name).is_some_and(|holder| holder != &claim.id) {
            Self::unwatch(&mut con).await?;
            return Ok(UpdateClaim::NameTaken);
        }
        let previous_name = names
            .into_iter()
            .find(|(_, id)| id == &claim.id)
            .map(|(name, _)| name);

        let mut pipe = redis::pipe();
        pipe.atomic();
        if let Some(previous) = previous_name.as_deref().filter(|p| *p != claim.name) {
            pipe.hdel(&owner, previous);
        }
        pipe.hset(&owner, &claim.name, &claim.id);

        let result: Option<Vec<redis::Value>> = pipe.query_async(&mut con).await?;
        Ok(match result {
            Some(_) => UpdateClaim::Updated { previous_name },
            None => UpdateClaim::Contended,
        })
    }

    async fn remove(&self, claim: &Claim) -> Result<bool, StoreError> {
        let (global, owner) = (claim.global_key(), claim.owner_key());
        let mut con = self.dedicated().await?;

        // Writes by the same owner abort EXEC; both entries must go together
        for attempt in 1..=REMOVE_ATTEMPTS {
            Self::watch(&mut con, &[&owner]).await?;
            let holder: Option<String> = con.hget(&owner, &claim.name).await?;

            let mut pipe = redis::pipe();
            pipe.atomic();
            pipe.hdel(&global, &claim.id);
            if holder.as_deref() == Some(claim.id.as_str()) {
                pipe.hdel(&owner, &claim.name);
            }

            let result: Option<Vec<i64>> = pipe.query_async(&mut con).await?;
            match result {
                Some(deleted) => return Ok(deleted.iter().sum::<i64>() > 0),
                None => debug!(id = %claim.id, attempt, "Remove aborted by a concurrent write"),
            }
        }

        Err(StoreError::Unavailable(format!(
            "remove of {} aborted {} times in a row",
            claim.id, REMOVE_ATTEMPTS
        )))
    }

    async fn owner_of(&self, scope: &str, id: &str) -> Result<Option<String>, StoreError> {
        let mut con = self.manager.clone();
        Ok(con.hget(crate::global_key(scope), id).await?)
    }

    async fn name_taken(&self, scope: &str, owner: &str, name: &str) -> Result<bool, StoreError> {
        let mut con = self.manager.clone();
        Ok(con.hexists(crate::owner_key(scope, owner), name).await?)
    }

    async fn name_of(
        &self,
        scope: &str,
        owner: &str,
        id: &str,
    ) -> Result<Option<String>, StoreError> {
        let mut con = self.manager.clone();
        let names: HashMap<String, String> = con.hgetall(crate::owner_key(scope, owner)).await?;
        Ok(names.into_iter().find(|(_, value)| value == id).map(|(name, _)| name))
    }
}
