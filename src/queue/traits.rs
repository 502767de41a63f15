//! Work queue trait definition.

use crate::core::StoreError;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::time::Duration;

/// A message received from a [`WorkQueue`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueMessage {
    /// Provider-assigned message id.
    pub message_id: String,
    /// Opaque handle required to delete this delivery.
    pub receipt_handle: String,
    /// Message body, for the batch pipeline an object key.
    pub body: String,
}

/// A queue of pending work items.
///
/// Received messages become invisible to other receivers for the
/// visibility timeout and reappear unless deleted.
#[async_trait]
pub trait WorkQueue: Send + Sync + Debug {
    /// Receives up to `max_messages` visible messages.
    async fn receive(
        &self,
        max_messages: usize,
        visibility_timeout: Duration,
    ) -> Result<Vec<QueueMessage>, StoreError>;

    /// Deletes the delivery identified by `receipt_handle`.
    async fn delete(&self, receipt_handle: &str) -> Result<(), StoreError>;

    /// Enqueues `body` and returns the new message id.
    async fn send(&self, body: &str) -> Result<String, StoreError>;
}

/// A shared, type-erased work queue.
pub type ArcWorkQueue = std::sync::Arc<dyn WorkQueue>;
