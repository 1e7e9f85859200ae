//! Command-line configuration for the record store tool.
//!
//! # Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `HRS_DATABASE` | records.db | SQLite database path, or `:memory:` |
//! | `HRS_LOG_LEVEL` | info | Log level |
//! | `HRS_BASE_URL` | | This server's base URL |
//! | `HRS_MAX_BINARY_SIZE` | 5242880 | Max binary payload (bytes) |
//! | `HRS_BLOB_DIR` | | Externalize binaries under this directory |
//! | `HRS_S3_BUCKET` | | Externalize binaries in this S3 bucket |
//! | `HRS_S3_REGION` | | S3 region |
//! | `HRS_S3_ENDPOINT` | | S3-compatible endpoint |

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use helios_record_store::backends::blob::BlobBackendConfig;
use helios_record_store::config::{DEFAULT_MAX_BINARY_SIZE, StoreConfig};
use uuid::Uuid;

/// Record store tool configuration.
#[derive(Debug, Clone, Parser)]
#[command(name = "hrs")]
#[command(about = "Helios versioned record store")]
pub struct HrsConfig {
    /// SQLite database path.
    #[arg(long, env = "HRS_DATABASE", default_value = "records.db")]
    pub database: String,

    /// Log level (error, warn, info, debug, trace).
    #[arg(long, env = "HRS_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Base URL of this server; absolute keys under it are local.
    #[arg(long, env = "HRS_BASE_URL")]
    pub base_url: Option<String>,

    /// Largest accepted binary payload in bytes.
    #[arg(long, env = "HRS_MAX_BINARY_SIZE", default_value_t = DEFAULT_MAX_BINARY_SIZE)]
    pub max_binary_size: usize,

    /// Directory for externalized binary content.
    #[arg(long, env = "HRS_BLOB_DIR", conflicts_with = "s3_bucket")]
    pub blob_dir: Option<PathBuf>,

    /// S3 bucket for externalized binary content.
    #[arg(long, env = "HRS_S3_BUCKET")]
    pub s3_bucket: Option<String>,

    /// S3 region.
    #[arg(long, env = "HRS_S3_REGION")]
    pub s3_region: Option<String>,

    /// S3-compatible endpoint URL.
    #[arg(long, env = "HRS_S3_ENDPOINT")]
    pub s3_endpoint: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

/// Store operations.
#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Create the schema and required indices.
    Init,

    /// Store resources read from a JSON file (`-` for stdin).
    ///
    /// The file holds one resource or an array of resources, written as one
    /// batch. Missing ids and versions are assigned from the sequences.
    Put {
        /// Input file.
        file: PathBuf,
        /// Batch id to record; generated when absent.
        #[arg(long)]
        batch_id: Option<Uuid>,
    },

    /// Record the deletion of a resource.
    Delete {
        /// Resource key, e.g. `Patient/1`.
        key: String,
        /// Reason stored with the deletion marker.
        #[arg(long)]
        reason: Option<String>,
    },

    /// Print the current version, or a specific version, of a resource.
    Get {
        /// Resource key, e.g. `Patient/1` or `Patient/1/_history/2`.
        key: String,
    },

    /// List current resources, newest first.
    List {
        /// Restrict to one collection.
        collection: Option<String>,
        /// Include resources whose current version is a deletion.
        #[arg(long)]
        include_deleted: bool,
        /// Maximum number of summaries.
        #[arg(long)]
        limit: Option<usize>,
    },

    /// List versions, newest first, deletions included.
    History {
        /// Resource key or collection; everything when absent.
        key: Option<String>,
        /// Only versions after this RFC 3339 timestamp.
        #[arg(long)]
        since: Option<String>,
        /// Maximum number of summaries.
        #[arg(long)]
        limit: Option<usize>,
    },

    /// List distinct tags.
    Tags {
        /// Restrict to one collection.
        collection: Option<String>,
    },

    /// Remove everything a batch wrote.
    Purge {
        /// Batch id.
        batch_id: Uuid,
    },

    /// Delete all records, counters, snapshots and blobs.
    Clean {
        /// Confirm the deletion.
        #[arg(long)]
        yes: bool,
    },

    /// Reserve and print a new resource key.
    NextId {
        /// Collection of the new resource.
        collection: String,
    },
}

impl HrsConfig {
    /// Validates the configuration, returning every problem found.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.database.trim().is_empty() {
            errors.push("Database path cannot be empty".to_string());
        }

        if let Err(store_errors) = self.store_config().validate() {
            errors.extend(store_errors);
        }

        if let Some(blob) = self.blob_config() {
            if let Err(blob_errors) = blob.validate() {
                errors.extend(blob_errors);
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Returns the record store configuration.
    pub fn store_config(&self) -> StoreConfig {
        let config = StoreConfig::default().with_max_binary_size(self.max_binary_size);
        match &self.base_url {
            Some(base_url) => config.with_base_url(base_url.clone()),
            None => config,
        }
    }

    /// Returns the blob backend to attach, if any.
    pub fn blob_config(&self) -> Option<BlobBackendConfig> {
        if let Some(path) = &self.blob_dir {
            return Some(BlobBackendConfig::Local { path: path.clone() });
        }
        self.s3_bucket
            .as_ref()
            .map(|bucket| BlobBackendConfig::S3 {
                bucket: bucket.clone(),
                region: self.s3_region.clone(),
                endpoint: self.s3_endpoint.clone(),
            })
    }
}
