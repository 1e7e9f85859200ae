//! Helios Record Store (HRS)
//!
//! Command-line access to the versioned record store.

mod commands;
mod config;

use std::sync::Arc;

use clap::Parser;
use helios_record_store::RecordStore;
use helios_record_store::backends::sqlite::SqliteBackend;
use tracing::info;

use crate::config::HrsConfig;

/// Initialize logging with the given level.
fn init_logging(level: &str) {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("helios_record_store={level},hrs={level}")));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

/// Opens the SQLite backend and builds the record store around it.
async fn open_store(config: &HrsConfig) -> anyhow::Result<RecordStore> {
    info!(database = %config.database, "Opening SQLite document store");
    let backend = if config.database == ":memory:" {
        SqliteBackend::in_memory()?
    } else {
        SqliteBackend::open(&config.database)?
    };
    backend.init_schema()?;

    let mut store = RecordStore::new(Arc::new(backend), config.store_config());
    if let Some(blob_config) = config.blob_config() {
        let blobs = blob_config.build()?;
        info!(backend = ?blob_config, "Externalizing binaries");
        store = store.with_blob_storage(Arc::new(blobs));
    }
    store.init().await?;
    Ok(store)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = HrsConfig::parse();
    init_logging(&config.log_level);

    if let Err(errors) = config.validate() {
        for error in &errors {
            eprintln!("Configuration error: {}", error);
        }
        std::process::exit(1);
    }

    let store = open_store(&config).await?;
    let output = commands::run(&store, config.command).await?;
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
