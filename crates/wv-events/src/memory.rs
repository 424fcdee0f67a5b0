//! In-memory event log
//!
//! Keeps every append in order. Appends can be made to fail for testing the
//! compensation paths.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::{EventLog, PublishError};

#[derive(Debug, Clone, PartialEq)]
pub struct LoggedEvent {
    pub topic: String,
    pub key: String,
    pub value: serde_json::Value,
}

impl LoggedEvent {
    pub fn operation(&self) -> Option<&str> {
        self.value.get("operation").and_then(|v| v.as_str())
    }
}

#[derive(Default)]
pub struct InMemoryEventLog {
    events: Mutex<Vec<LoggedEvent>>,
    failing: AtomicBool,
    fail_next: AtomicUsize,
    attempts: AtomicUsize,
}

impl InMemoryEventLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every append until switched off
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Fail the next `count` appends
    pub fn fail_next(&self, count: usize) {
        self.fail_next.store(count, Ordering::SeqCst);
    }

    pub fn events(&self) -> Vec<LoggedEvent> {
        self.events.lock().clone()
    }

    pub fn events_for_key(&self, key: &str) -> Vec<LoggedEvent> {
        self.events.lock().iter().filter(|e| e.key == key).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }

    /// Appends tried, including failed ones
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EventLog for InMemoryEventLog {
    async fn append(
        &self,
        topic: &str,
        key: &str,
        value: serde_json::Value,
    ) -> Result<(), PublishError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);

        let forced = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if forced || self.failing.load(Ordering::SeqCst) {
            return Err(PublishError::Unavailable("in-memory log marked failing".to_string()));
        }

        self.events.lock().push(LoggedEvent {
            topic: topic.to_string(),
            key: key.to_string(),
            value,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_fail_next_then_recover() {
        let log = InMemoryEventLog::new();
        log.fail_next(2);

        assert!(log.append("t", "k", json!({})).await.is_err());
        assert!(log.append("t", "k", json!({})).await.is_err());
        assert!(log.append("t", "k", json!({"operation": "create"})).await.is_ok());

        assert_eq!(log.attempts(), 3);
        assert_eq!(log.len(), 1);
        assert_eq!(log.events()[0].operation(), Some("create"));
    }

    #[tokio::test]
    async fn test_per_key_order_is_kept() {
        let log = InMemoryEventLog::new();
        for op in ["create", "update", "delete"] {
            log.append("t", "w-1", json!({"operation": op})).await.unwrap();
            log.append("t", "w-2", json!({"operation": op})).await.unwrap();
        }

        let ops: Vec<_> = log
            .events_for_key("w-1")
            .iter()
            .map(|e| e.operation().unwrap_or_default().to_string())
            .collect();
        assert_eq!(ops, vec!["create", "update", "delete"]);
    }
}
