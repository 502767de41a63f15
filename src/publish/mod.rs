//! Result publishing.
//!
//! - [`tags`] - Idempotent merge of scan results into tags and metadata
//! - [`notify`] - Notification messages and topics
//! - [`results`] - The [`ResultPublisher`] tying both to the object store

pub mod notify;
pub mod results;
pub mod tags;

pub use notify::{
    ArcTopic, MemoryTopic, Notification, NotificationBuilder, NotificationTopic, NotifySubject,
    ATTRIBUTE_METADATA_PREFIX, MESSAGE_STRUCTURE,
};
pub use results::{PublisherConfig, ResultPublisher};
pub use tags::{has_scan_tags, merge_scan_metadata, merge_scan_tags};
