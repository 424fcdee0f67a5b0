//! Redis backend tests
//!
//! These start a Redis container and are ignored by default:
//! `cargo test -p wv-store -- --ignored`

use std::sync::Arc;
use std::time::Duration;

use testcontainers_modules::redis::Redis;
use testcontainers_modules::testcontainers::runners::AsyncRunner;
use testcontainers_modules::testcontainers::ContainerAsync;
use wv_common::{Deadline, RetryPolicy};
use wv_store::{
    Claim, ClaimOutcome, LockManager, LockPurpose, LockStore, RedisStore, UniquenessRegistry,
    UpdateClaim,
};

async fn start_redis() -> (ContainerAsync<Redis>, RedisStore) {
    let container = Redis::default().start().await.expect("start redis container");
    let host = container.get_host().await.expect("container host");
    let port = container.get_host_port_ipv4(6379).await.expect("container port");
    let store = RedisStore::connect(&format!("redis://{}:{}", host, port))
        .await
        .expect("connect to redis");
    (container, store)
}

fn unique_owner() -> String {
    format!("user-{}", uuid::Uuid::new_v4())
}

fn fresh_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

#[tokio::test]
#[ignore]
async fn test_lock_is_exclusive_and_expires() {
    let (_container, store) = start_redis().await;
    let key = format!("lock:workflow:create:{}", uuid::Uuid::new_v4());

    assert!(store.acquire(&key, "1", Duration::from_millis(300)).await.unwrap());
    assert!(!store.acquire(&key, "1", Duration::from_millis(300)).await.unwrap());

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(store.acquire(&key, "1", Duration::from_secs(5)).await.unwrap());
    assert!(store.release(&key).await.unwrap());
    assert!(!store.release(&key).await.unwrap());
}

#[tokio::test]
#[ignore]
async fn test_claim_lifecycle() {
    let (_container, store) = start_redis().await;
    let owner = unique_owner();
    let claim = Claim::new("workflow", fresh_id(), &owner, "Sales Sync");

    assert_eq!(store.claim_create(&claim).await.unwrap(), ClaimOutcome::Claimed);
    assert_eq!(store.claim_create(&claim).await.unwrap(), ClaimOutcome::AlreadyExists);
    assert_eq!(store.owner_of("workflow", &claim.id).await.unwrap(), Some(owner.clone()));

    let renamed = claim.renamed("Sales Sync v2");
    assert_eq!(
        store.claim_update(&renamed).await.unwrap(),
        UpdateClaim::Updated { previous_name: Some("Sales Sync".to_string()) }
    );
    assert!(!store.name_taken("workflow", &owner, "Sales Sync").await.unwrap());
    assert_eq!(
        store.name_of("workflow", &owner, &claim.id).await.unwrap().as_deref(),
        Some("Sales Sync v2")
    );

    assert!(store.remove(&renamed).await.unwrap());
    assert!(store.owner_of("workflow", &claim.id).await.unwrap().is_none());
    assert!(!store.name_taken("workflow", &owner, "Sales Sync v2").await.unwrap());
}

#[tokio::test]
#[ignore]
async fn test_concurrent_claims_on_one_name_have_one_winner() {
    let (_container, store) = start_redis().await;
    let store = Arc::new(store);
    let owner = unique_owner();

    let mut handles = Vec::new();
    for _ in 0..8 {
        let store = store.clone();
        let owner = owner.clone();
        handles.push(tokio::spawn(async move {
            let claim = Claim::new("workflow", fresh_id(), owner, "Sales Sync");
            store.claim_create(&claim).await.unwrap()
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
#[ignore]
async fn test_lock_manager_over_redis() {
    let (_container, store) = start_redis().await;
    let locks = LockManager::new(Arc::new(store), RetryPolicy::default());
    let id = fresh_id();

    let guard = locks
        .try_acquire(
            "action",
            LockPurpose::Create,
            &id,
            Duration::from_secs(20),
            &Deadline::never(),
        )
        .await
        .unwrap()
        .expect("lock should be free");
    assert!(locks
        .try_acquire(
            "action",
            LockPurpose::Create,
            &id,
            Duration::from_secs(20),
            &Deadline::never(),
        )
        .await
        .unwrap()
        .is_none());
    assert!(guard.release().await);
}

#[tokio::test]
#[ignore]
async fn test_remove_under_owner_writes_clears_both_entries() {
    let (_container, store) = start_redis().await;
    let store = Arc::new(store);
    let owner = unique_owner();

    let mut removed = Vec::new();
    for i in 0..20 {
        let claim = Claim::new("workflow", fresh_id(), &owner, format!("old-{}", i));
        assert_eq!(store.claim_create(&claim).await.unwrap(), ClaimOutcome::Claimed);
        removed.push(claim);
    }

    // every claim_create below writes the hash each remove is watching
    let mut handles = Vec::new();
    for (i, claim) in removed.iter().cloned().enumerate() {
        let remover = store.clone();
        handles.push(tokio::spawn(async move { remover.remove(&claim).await.unwrap() }));

        let writer = store.clone();
        let fresh = Claim::new("workflow", fresh_id(), &owner, format!("new-{}", i));
        handles.push(tokio::spawn(async move {
            writer.claim_create(&fresh).await.unwrap() == ClaimOutcome::Claimed
        }));
    }
    for handle in handles {
        assert!(handle.await.unwrap());
    }

    for claim in &removed {
        assert!(store.owner_of("workflow", &claim.id).await.unwrap().is_none());
        assert!(!store.name_taken("workflow", &owner, &claim.name).await.unwrap());
    }
    assert!(store.name_taken("workflow", &owner, "new-0").await.unwrap());
}
