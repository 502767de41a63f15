//! Work queues feeding the batch pipeline.

mod memory;
mod traits;

pub use memory::InMemoryQueue;
pub use traits::{ArcWorkQueue, QueueMessage, WorkQueue};
