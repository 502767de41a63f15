//! Batch scan example.
//!
//! This example shows how to:
//! - Feed a work queue from object-created events
//! - Drain the queue and scan every object with one engine invocation
//! - Read the batch report
//!
//! Run with: cargo run --example batch_scan

use bucket_antivirus::inventory::{forward_event, object_created_event};
use bucket_antivirus::prelude::*;
use bucket_antivirus::queue::ArcWorkQueue;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

const BUCKET: &str = "uploads";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    println!("=== Bucket Antivirus Batch Scan Example ===\n");

    let store = Arc::new(InMemoryObjectStore::new().with_bucket(BUCKET));
    let queue: ArcWorkQueue = Arc::new(InMemoryQueue::new());
    let keys = ["a.txt", "b.txt", "photos/c.jpg", "photos/d.jpg"];
    for key in keys {
        store.put_object(BUCKET, key, key.as_bytes().to_vec());
        let event = object_created_event(&ObjectRef::new(BUCKET, key));
        forward_event(&queue, &event, EventSource::S3).await?;
    }
    println!("Queued {} objects\n", keys.len());

    let engine = Arc::new(
        MockEngine::new()
            .with_infection("a.txt", "Eicar-Test-Signature")
            .with_infection("photos/d.jpg", "Win.Trojan.Agent-1"),
    );
    let topic = Arc::new(MemoryTopic::new());
    let staging = tempfile::tempdir()?;

    let config = AvConfig::new()
        .with_scan_bucket(BUCKET)
        .with_staging_path(staging.path());
    let publisher = ResultPublisher::new(store.clone(), topic, config.publisher_config());
    let batch = BatchOrchestrator::new(
        queue,
        store.clone(),
        engine.clone(),
        publisher,
        config.batch_config()?,
    );

    let report = batch.run().await?;

    println!("\n=== Batch Report ===");
    println!("Received:  {}", report.received);
    println!("Staged:    {}", report.downloaded.len());
    println!("Safe:      {:?}", report.safe);
    for (key, signature) in &report.infected {
        println!("Infected:  {} -> {}", key, signature);
    }
    println!("Failures:  {}", report.failures.len());
    println!("Engine invocations: {}", engine.scan_count());

    println!("\n=== Stored Tags ===");
    for key in keys {
        let tags = store.tags_of(BUCKET, key).unwrap_or_default();
        println!(
            "{:<14} status={:<9} signature={}",
            key,
            tags.get("av-status").unwrap_or("-"),
            tags.get("av-signature").unwrap_or("-")
        );
    }
    Ok(())
}
