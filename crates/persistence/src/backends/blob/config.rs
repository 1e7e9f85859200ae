//! Blob backend selection.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{BlobError, StorageError, StorageResult};

use super::ObjectStoreBlobStorage;

/// Which blob backend to attach to a record store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum BlobBackendConfig {
    /// Volatile in-process storage.
    Memory,
    /// Files under a local directory.
    Local {
        /// Root directory of the blobs.
        path: PathBuf,
    },
    /// An S3 bucket. Requires the `s3` feature.
    S3 {
        /// Bucket name.
        bucket: String,
        /// AWS region; read from the environment when absent.
        #[serde(default)]
        region: Option<String>,
        /// Custom endpoint for S3-compatible stores such as MinIO.
        #[serde(default)]
        endpoint: Option<String>,
    },
}

impl BlobBackendConfig {
    /// Validates the configuration, returning every problem found.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();
        match self {
            BlobBackendConfig::Memory => {}
            BlobBackendConfig::Local { path } => {
                if path.as_os_str().is_empty() {
                    errors.push("local blob path must not be empty".to_string());
                }
            }
            BlobBackendConfig::S3 {
                bucket, endpoint, ..
            } => {
                if bucket.trim().is_empty() {
                    errors.push("s3 bucket must not be empty".to_string());
                }
                if let Some(endpoint) = endpoint {
                    if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
                        errors.push(format!(
                            "s3 endpoint must be an http(s) URL, got '{}'",
                            endpoint
                        ));
                    }
                }
                if !cfg!(feature = "s3") {
                    errors.push("s3 blob storage requires the 's3' feature".to_string());
                }
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Builds the configured backend.
    pub fn build(&self) -> StorageResult<ObjectStoreBlobStorage> {
        self.validate().map_err(|errors| {
            StorageError::Blob(BlobError::InvalidConfig {
                message: errors.join("; "),
            })
        })?;

        match self {
            BlobBackendConfig::Memory => Ok(ObjectStoreBlobStorage::in_memory()),
            BlobBackendConfig::Local { path } => ObjectStoreBlobStorage::local(path),
            #[cfg(feature = "s3")]
            BlobBackendConfig::S3 {
                bucket,
                region,
                endpoint,
            } => ObjectStoreBlobStorage::s3(bucket, region.as_deref(), endpoint.as_deref()),
            #[cfg(not(feature = "s3"))]
            BlobBackendConfig::S3 { .. } => Err(StorageError::Blob(BlobError::InvalidConfig {
                message: "s3 blob storage requires the 's3' feature".to_string(),
            })),
        }
    }
}
