//! Subcommand implementations.

use std::io::Read;
use std::path::Path;

use anyhow::{Context, bail};
use chrono::{DateTime, Utc};
use helios_record_store::key::{ResourceKey, apply as apply_key};
use helios_record_store::types::{DeletedMarker, Entry};
use helios_record_store::{ListParams, RecordStore};
use serde_json::{Value, json};
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::Command;

/// Runs one subcommand and returns its JSON output.
pub async fn run(store: &RecordStore, command: Command) -> anyhow::Result<Value> {
    match command {
        Command::Init => {
            info!("Record store initialized");
            Ok(json!({"initialized": true}))
        }
        Command::Put { file, batch_id } => put(store, &file, batch_id).await,
        Command::Delete { key, reason } => delete(store, &key, reason).await,
        Command::Get { key } => get(store, &key).await,
        Command::List {
            collection,
            include_deleted,
            limit,
        } => {
            let mut params = ListParams::new();
            if let Some(collection) = collection {
                params = params.collection(collection);
            }
            if include_deleted {
                params = params.include_deleted();
            }
            if let Some(limit) = limit {
                params = params.limit(limit);
            }
            Ok(serde_json::to_value(store.list_current(&params).await?)?)
        }
        Command::History { key, since, limit } => history(store, key, since, limit).await,
        Command::Tags { collection } => {
            let tags = store.list_tags(collection.as_deref()).await?;
            Ok(serde_json::to_value(tags)?)
        }
        Command::Purge { batch_id } => {
            let removed = store.purge_batch(batch_id).await?;
            Ok(json!({"batchId": batch_id, "removed": removed}))
        }
        Command::Clean { yes } => {
            if !yes {
                bail!("clean deletes every record; pass --yes to confirm");
            }
            warn!("Cleaning record store");
            store.clean().await?;
            Ok(json!({"cleaned": true}))
        }
        Command::NextId { collection } => {
            let key = store.sequence().next_key(&collection).await?;
            Ok(json!({"key": key.to_string()}))
        }
    }
}

fn read_input(file: &Path) -> anyhow::Result<Value> {
    let text = if file == Path::new("-") {
        let mut text = String::new();
        std::io::stdin()
            .read_to_string(&mut text)
            .context("failed to read stdin")?;
        text
    } else {
        std::fs::read_to_string(file)
            .with_context(|| format!("failed to read {}", file.display()))?
    };
    serde_json::from_str(&text).context("input is not valid JSON")
}

/// Gives an entry the ids it lacks.
///
/// Explicit numeric ids raise the resource sequence so later assigned ids
/// never collide with them.
async fn assign_key(store: &RecordStore, entry: &mut Entry) -> anyhow::Result<ResourceKey> {
    let key = entry.key()?;
    let sequence = store.sequence();
    let Some(id) = key.resource_id.as_deref() else {
        let assigned = sequence.next_key(&key.collection).await?;
        apply_key(&assigned, entry)?;
        return Ok(assigned);
    };
    if let Ok(numeric) = id.parse::<i64>() {
        sequence.ensure_sequence_floor(numeric).await?;
    }
    let key = if key.has_version() {
        key
    } else {
        sequence.next_version_key(&key).await?
    };
    apply_key(&key, entry)?;
    Ok(key)
}

async fn put(store: &RecordStore, file: &Path, batch_id: Option<Uuid>) -> anyhow::Result<Value> {
    let resources = match read_input(file)? {
        Value::Array(items) => items,
        other => vec![other],
    };

    let mut entries = Vec::with_capacity(resources.len());
    for resource in resources {
        let mut entry = Entry::resource(resource);
        assign_key(store, &mut entry).await?;
        entries.push(entry);
    }

    let batch_id = batch_id.unwrap_or_else(Uuid::new_v4);
    let written = store.add_batch(entries, Some(batch_id)).await?;
    let keys = written
        .iter()
        .map(|entry| entry.key().map(|k| k.to_string()))
        .collect::<Result<Vec<_>, _>>()?;
    info!(batch_id = %batch_id, count = keys.len(), "Stored batch");
    Ok(json!({"batchId": batch_id, "written": keys}))
}

async fn delete(store: &RecordStore, input: &str, reason: Option<String>) -> anyhow::Result<Value> {
    let key = ResourceKey::parse(input)?;
    let Some(id) = key.resource_id.as_deref() else {
        bail!("'{}' does not name a resource", input);
    };
    if store.find_by_id(&key.collection, id).await?.is_none() {
        bail!("{} not found", key.without_version());
    }

    let mut marker = DeletedMarker::new(&key.collection, id);
    if let Some(reason) = reason {
        marker = marker.with_reason(reason);
    }
    let mut entry = Entry::deleted(marker);
    let versioned = store.sequence().next_version_key(&key).await?;
    apply_key(&versioned, &mut entry)?;

    store.add(entry, None).await?;
    Ok(json!({"deleted": versioned.to_string()}))
}

async fn get(store: &RecordStore, input: &str) -> anyhow::Result<Value> {
    let key = ResourceKey::parse(input)?;
    let Some(id) = key.resource_id.as_deref() else {
        bail!("'{}' does not name a resource", input);
    };
    let entry = match key.version_id.as_deref() {
        Some(version) => store.find_by_version(&key.collection, id, version).await?,
        None => store.find_by_id(&key.collection, id).await?,
    };
    match entry {
        Some(entry) => Ok(serde_json::to_value(entry)?),
        None => bail!("{} not found", key),
    }
}

async fn history(
    store: &RecordStore,
    key: Option<String>,
    since: Option<String>,
    limit: Option<usize>,
) -> anyhow::Result<Value> {
    let mut params = ListParams::new();
    if let Some(since) = since {
        let since = DateTime::parse_from_rfc3339(&since)
            .with_context(|| format!("invalid timestamp '{}'", since))?;
        params = params.since(since.with_timezone(&Utc));
    }
    if let Some(limit) = limit {
        params = params.limit(limit);
    }

    let summaries = match key {
        Some(input) => {
            let key = ResourceKey::parse(&input)?;
            if key.resource_id.is_some() {
                store.list_history_for_id(&key, &params).await?
            } else {
                store
                    .list_history(&params.collection(key.collection))
                    .await?
            }
        }
        None => store.list_history(&params).await?,
    };
    Ok(serde_json::to_value(summaries)?)
}
