//! Single-object scan example.
//!
//! This example shows how to:
//! - Build a scan gate from an in-memory store, a mock engine and a
//!   recording notification topic
//! - Process object-created events for a clean, an infected and a
//!   trusted upload
//! - Inspect the resulting tags and notifications
//!
//! Run with: cargo run --example single_object

use bucket_antivirus::inventory::object_created_event;
use bucket_antivirus::prelude::*;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

const BUCKET: &str = "uploads";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    println!("=== Bucket Antivirus Single Object Example ===\n");

    let store = Arc::new(InMemoryObjectStore::new().with_bucket(BUCKET));
    store.put_object(BUCKET, "report.txt", b"quarterly numbers".to_vec());
    store.put_object(BUCKET, "invoice.exe", b"X5O!P%@AP[4\\PZX54(P^)7CC)7}$EICAR".to_vec());
    store.put_object_with(
        BUCKET,
        "export.csv",
        b"id,amount".to_vec(),
        Some("text/csv"),
        vec![Tag::new("av-generated-safely", "true")].into(),
    );

    let engine = Arc::new(MockEngine::new().with_infection("invoice.exe", "Eicar-Test-Signature"));
    let topic = Arc::new(MemoryTopic::new());
    let staging = tempfile::tempdir()?;

    let config = AvConfig::new()
        .with_status_topic("status")
        .with_delete_infected(true)
        .with_staging_path(staging.path());
    let publisher = ResultPublisher::new(store.clone(), topic.clone(), config.publisher_config());
    let gate = ObjectScanGate::new(store.clone(), engine.clone(), publisher)
        .with_config(config.gate_config());

    for key in ["report.txt", "invoice.exe", "export.csv"] {
        let event = object_created_event(&ObjectRef::new(BUCKET, key));
        let outcome = gate.process_event(&event).await?;

        println!("{}", key);
        println!("  States:  {:?}", outcome.transitions);
        match &outcome.result {
            Some(result) => println!("  Result:  {} ({})", result.status, result.signature),
            None => println!("  Result:  skipped"),
        }
        println!("  Deleted: {}", outcome.deleted);
        if let Some(tags) = store.tags_of(BUCKET, key) {
            for tag in tags.iter() {
                println!("  Tag:     {}={}", tag.key, tag.value);
            }
        }
        println!();
    }

    println!("=== Notifications ===\n");
    for (topic_name, notification) in topic.published() {
        println!("[{}] {}", topic_name, notification.envelope());
    }

    println!("\nEngine invocations: {}", engine.scan_count());
    Ok(())
}
