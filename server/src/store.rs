//! Message persistence.
//!
//! The broadcast engine hands every delivered envelope to a [`MessageStore`]
//! in a detached task. Delivery never waits for the store and never fails
//! because of it, so a store is a best-effort log, not a delivery guarantee.
//!
//! [`MemoryStore`] keeps the most recent messages in a bounded ring. Once the
//! capacity is reached the oldest message is dropped for every new one.
//!
//! The gateway itself only appends. [`MessageStore::recent`] and
//! [`MessageStore::recent_for_sender`] are the read side, for history readers
//! embedding the library next to the gateway.
//!
//! # Example
//!
//! ```rust
//! use chrono::Utc;
//! use gatehouse_server::store::{MemoryStore, MessageStore, StoredMessage};
//!
//! #[tokio::main]
//! async fn main() {
//!     let store = MemoryStore::new(2);
//!     for (sender, body) in [("u1", "one"), ("u2", "two"), ("u1", "three")] {
//!         let message = StoredMessage {
//!             sender_subject_id: sender.to_string(),
//!             body: body.to_string(),
//!             correlation_id: "req-1".to_string(),
//!             received_at: Utc::now(),
//!         };
//!         store.append(message).await.unwrap();
//!     }
//!
//!     let recent = store.recent(10).await.unwrap();
//!     let bodies: Vec<&str> = recent.iter().map(|m| m.body.as_str()).collect();
//!     assert_eq!(bodies, ["three", "two"]);
//!
//!     let from_u1 = store.recent_for_sender("u1", 10).await.unwrap();
//!     assert_eq!(from_u1.len(), 1);
//!     assert_eq!(store.len().await, 2);
//! }
//! ```

use std::collections::VecDeque;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::RwLock;

/// Errors reported by a [`MessageStore`].
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store refused or failed the write.
    #[error("failed to persist message: {0}")]
    Write(String),

    /// The store could not answer a query.
    #[error("failed to read messages: {0}")]
    Read(String),
}

/// A persisted chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredMessage {
    pub sender_subject_id: String,
    pub body: String,
    pub correlation_id: String,
    pub received_at: DateTime<Utc>,
}

/// Durable log of chat messages, keyed by sender and queried by recency.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Appends a message.
    async fn append(&self, message: StoredMessage) -> Result<(), StoreError>;

    /// Returns up to `limit` messages, newest first.
    async fn recent(&self, limit: usize) -> Result<Vec<StoredMessage>, StoreError>;

    /// Returns up to `limit` messages from `sender`, newest first.
    async fn recent_for_sender(
        &self,
        sender: &str,
        limit: usize,
    ) -> Result<Vec<StoredMessage>, StoreError>;
}

/// Bounded in-memory store.
#[derive(Debug)]
pub struct MemoryStore {
    capacity: usize,
    messages: RwLock<VecDeque<StoredMessage>>,
}

impl MemoryStore {
    /// Creates a store holding at most `capacity` messages.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            messages: RwLock::new(VecDeque::with_capacity(capacity)),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub async fn len(&self) -> usize {
        self.messages.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.messages.read().await.is_empty()
    }
}

#[async_trait]
impl MessageStore for MemoryStore {
    async fn append(&self, message: StoredMessage) -> Result<(), StoreError> {
        if self.capacity == 0 {
            return Ok(());
        }
        let mut messages = self.messages.write().await;
        while messages.len() >= self.capacity {
            messages.pop_front();
        }
        messages.push_back(message);
        Ok(())
    }

    async fn recent(&self, limit: usize) -> Result<Vec<StoredMessage>, StoreError> {
        let messages = self.messages.read().await;
        Ok(messages.iter().rev().take(limit).cloned().collect())
    }

    async fn recent_for_sender(
        &self,
        sender: &str,
        limit: usize,
    ) -> Result<Vec<StoredMessage>, StoreError> {
        let messages = self.messages.read().await;
        Ok(messages
            .iter()
            .rev()
            .filter(|m| m.sender_subject_id == sender)
            .take(limit)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(sender: &str, body: &str) -> StoredMessage {
        StoredMessage {
            sender_subject_id: sender.to_string(),
            body: body.to_string(),
            correlation_id: "req-1".to_string(),
            received_at: Utc::now(),
        }
    }

    fn bodies(messages: &[StoredMessage]) -> Vec<&str> {
        messages.iter().map(|m| m.body.as_str()).collect()
    }

    #[tokio::test]
    async fn recent_returns_newest_first() {
        let store = MemoryStore::new(10);
        for body in ["one", "two", "three"] {
            store.append(message("u1", body)).await.unwrap();
        }

        let recent = store.recent(2).await.unwrap();
        assert_eq!(bodies(&recent), vec!["three", "two"]);
    }

    #[tokio::test]
    async fn capacity_evicts_oldest() {
        let store = MemoryStore::new(2);
        for body in ["one", "two", "three"] {
            store.append(message("u1", body)).await.unwrap();
        }

        assert_eq!(store.len().await, 2);
        let recent = store.recent(10).await.unwrap();
        assert_eq!(bodies(&recent), vec!["three", "two"]);
    }

    #[tokio::test]
    async fn recent_for_sender_filters() {
        let store = MemoryStore::new(10);
        store.append(message("u1", "a")).await.unwrap();
        store.append(message("u2", "b")).await.unwrap();
        store.append(message("u1", "c")).await.unwrap();

        let mine = store.recent_for_sender("u1", 10).await.unwrap();
        assert_eq!(bodies(&mine), vec!["c", "a"]);
        assert!(store.recent_for_sender("u3", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn zero_capacity_keeps_nothing() {
        let store = MemoryStore::new(0);
        store.append(message("u1", "a")).await.unwrap();
        assert!(store.is_empty().await);
    }

    #[test]
    fn stored_message_serializes_camel_case() {
        let value = serde_json::to_value(message("u1", "hi")).unwrap();
        assert_eq!(value["senderSubjectId"], "u1");
        assert_eq!(value["correlationId"], "req-1");
        assert!(value.get("receivedAt").is_some());
    }
}
