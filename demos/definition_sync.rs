//! Definition sync example.
//!
//! This example shows how to:
//! - Publish definition files with checksum tags to a shared store
//! - Plan which files a fresh host must download
//! - Download them and confirm a second pass has nothing to do
//!
//! Run with: cargo run --example definition_sync

use bucket_antivirus::core::FileHasher;
use bucket_antivirus::prelude::*;
use chrono::{TimeZone, Utc};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

const DEFS_BUCKET: &str = "av-definitions";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    println!("=== Bucket Antivirus Definition Sync Example ===\n");

    let store = Arc::new(InMemoryObjectStore::new().with_bucket(DEFS_BUCKET));
    let hasher = FileHasher::new();
    let remote = [
        ("main.cvd", &b"main database"[..], 2019),
        ("daily.cld", &b"daily incremental"[..], 2021),
        ("daily.cvd", &b"daily full"[..], 2020),
        ("bytecode.cvd", &b"bytecode"[..], 2020),
    ];
    for (name, data, year) in remote {
        let key = format!("clamav_defs/{}", name);
        store.put_object_with(
            DEFS_BUCKET,
            &key,
            data.to_vec(),
            None,
            vec![Tag::new("md5", hasher.hash_bytes(data))].into(),
        );
        store.set_last_modified(DEFS_BUCKET, &key, Utc.with_ymd_and_hms(year, 1, 1, 0, 0, 0).unwrap());
    }

    let local = tempfile::tempdir()?;
    let config = AvConfig::new()
        .with_definition_bucket(DEFS_BUCKET)
        .with_definition_path(local.path());
    let client = config.definition_client(store.clone())?;
    let sync = DefinitionSync::new(client, local.path()).with_catalog(config.definition_catalog());

    let plan = sync.plan_downloads().await?;
    println!("Planned downloads:  {:?}", plan.filenames());
    println!("Older in series:    {:?}", plan.older_in_series);

    let summary = sync.download_stale().await?;
    println!("Downloaded:         {:?}", summary.downloaded);

    let again = sync.plan_downloads().await?;
    println!("Second pass plans:  {:?}", again.filenames());
    println!("Up to date:         {:?}", again.up_to_date);
    Ok(())
}
