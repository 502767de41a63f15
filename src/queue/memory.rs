//! In-memory work queue.

use crate::core::{StoreError, StoreErrorCode};
use crate::queue::traits::{QueueMessage, WorkQueue};

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};
use uuid::Uuid;

#[derive(Debug)]
struct Entry {
    message_id: String,
    body: String,
    receipt_handle: Option<String>,
    visible_at: Instant,
}

/// A FIFO work queue held in memory with visibility-timeout semantics.
///
/// A zero visibility timeout leaves received messages visible, matching
/// the behavior of hosted queues.
#[derive(Debug, Default)]
pub struct InMemoryQueue {
    entries: Mutex<VecDeque<Entry>>,
}

impl InMemoryQueue {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a queue pre-filled with `bodies`.
    pub fn with_messages<I, S>(bodies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let queue = Self::new();
        {
            let mut entries = queue.lock();
            for body in bodies {
                entries.push_back(new_entry(body.into()));
            }
        }
        queue
    }

    /// Returns the number of messages not yet deleted.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Returns `true` if every message was deleted.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Returns the bodies of every message not yet deleted, in order.
    pub fn bodies(&self) -> Vec<String> {
        self.lock().iter().map(|e| e.body.clone()).collect()
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<Entry>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn new_entry(body: String) -> Entry {
    Entry {
        message_id: Uuid::new_v4().to_string(),
        body,
        receipt_handle: None,
        visible_at: Instant::now(),
    }
}

#[async_trait]
impl WorkQueue for InMemoryQueue {
    async fn receive(
        &self,
        max_messages: usize,
        visibility_timeout: Duration,
    ) -> Result<Vec<QueueMessage>, StoreError> {
        let now = Instant::now();
        let mut entries = self.lock();
        let mut received = Vec::new();
        for entry in entries.iter_mut() {
            if received.len() >= max_messages {
                break;
            }
            if entry.visible_at > now {
                continue;
            }
            let receipt = Uuid::new_v4().simple().to_string();
            entry.receipt_handle = Some(receipt.clone());
            entry.visible_at = now + visibility_timeout;
            received.push(QueueMessage {
                message_id: entry.message_id.clone(),
                receipt_handle: receipt,
                body: entry.body.clone(),
            });
        }
        Ok(received)
    }

    async fn delete(&self, receipt_handle: &str) -> Result<(), StoreError> {
        let mut entries = self.lock();
        let position = entries
            .iter()
            .position(|e| e.receipt_handle.as_deref() == Some(receipt_handle))
            .ok_or_else(|| {
                StoreError::new(
                    "delete_message",
                    receipt_handle,
                    StoreErrorCode::Other("ReceiptHandleIsInvalid".into()),
                    "no in-flight message has this receipt handle",
                )
            })?;
        entries.remove(position);
        Ok(())
    }

    async fn send(&self, body: &str) -> Result<String, StoreError> {
        let entry = new_entry(body.to_string());
        let id = entry.message_id.clone();
        self.lock().push_back(entry);
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_receive_and_delete() {
        let queue = InMemoryQueue::with_messages(["a.txt", "b.txt"]);

        let batch = queue.receive(1, Duration::ZERO).await.unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].body, "a.txt");

        queue.delete(&batch[0].receipt_handle).await.unwrap();
        assert_eq!(queue.bodies(), vec!["b.txt"]);
    }

    #[tokio::test]
    async fn test_visibility_timeout_hides_message() {
        let queue = InMemoryQueue::with_messages(["a.txt"]);
        let first = queue.receive(10, Duration::from_secs(60)).await.unwrap();
        assert_eq!(first.len(), 1);
        assert!(queue.receive(10, Duration::ZERO).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_stale_receipt_rejected() {
        let queue = InMemoryQueue::with_messages(["a.txt"]);
        let first = queue.receive(1, Duration::ZERO).await.unwrap();
        let second = queue.receive(1, Duration::ZERO).await.unwrap();
        assert!(queue.delete(&first[0].receipt_handle).await.is_err());
        queue.delete(&second[0].receipt_handle).await.unwrap();
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_send_returns_id() {
        let queue = InMemoryQueue::new();
        let id = queue.send("c.txt").await.unwrap();
        assert!(!id.is_empty());
        assert_eq!(queue.len(), 1);
    }
}
